/// Largest servo angle the device accepts, in degrees.
pub const MAX_ANGLE: u8 = 180;

/// One host-to-device command. The argument shape is fixed by the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetFlap(FlapStatus),
    SetFilter(FilterState),
    /// Pause, in milliseconds.
    Wait(u32),
    EnterLoadingMode,
    SaveProgram(LoopData),
    ExecuteProgram,
    Reset,
    Calibrate(CalibrationData),
    SaveCalibration,
    PrintCalibration,
    Emergency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    SetFlap,
    SetFilter,
    Wait,
    EnterLoadingMode,
    SaveProgram,
    ExecuteProgram,
    Reset,
    Calibrate,
    SaveCalibration,
    PrintCalibration,
    Emergency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlapStatus {
    Closed,
    Opened,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterState {
    None,
    Fs1,
    Fs2,
    Fs3,
    Fs4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MotorId {
    S0,
    S1,
    S2,
    S3,
    S4,
}

/// Loop section of a stored program: steps `begin_mark..end_mark` repeat
/// `num_repetitions` times. `begin_mark <= end_mark` always holds for values
/// produced by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopData {
    pub begin_mark: u32,
    pub end_mark: u32,
    pub num_repetitions: u32,
}

/// Extreme servo positions for one motor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationData {
    pub motor: MotorId,
    pub opened_angle: u8,
    pub closed_angle: u8,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::SetFlap(_) => CommandKind::SetFlap,
            Command::SetFilter(_) => CommandKind::SetFilter,
            Command::Wait(_) => CommandKind::Wait,
            Command::EnterLoadingMode => CommandKind::EnterLoadingMode,
            Command::SaveProgram(_) => CommandKind::SaveProgram,
            Command::ExecuteProgram => CommandKind::ExecuteProgram,
            Command::Reset => CommandKind::Reset,
            Command::Calibrate(_) => CommandKind::Calibrate,
            Command::SaveCalibration => CommandKind::SaveCalibration,
            Command::PrintCalibration => CommandKind::PrintCalibration,
            Command::Emergency => CommandKind::Emergency,
        }
    }
}

impl CommandKind {
    pub const ALL: [CommandKind; 11] = [
        CommandKind::SetFlap,
        CommandKind::SetFilter,
        CommandKind::Wait,
        CommandKind::EnterLoadingMode,
        CommandKind::SaveProgram,
        CommandKind::ExecuteProgram,
        CommandKind::Reset,
        CommandKind::Calibrate,
        CommandKind::SaveCalibration,
        CommandKind::PrintCalibration,
        CommandKind::Emergency,
    ];

    /// Wire code.
    pub fn code(self) -> char {
        match self {
            CommandKind::SetFlap => 'G',
            CommandKind::SetFilter => 'F',
            CommandKind::Wait => 'W',
            CommandKind::EnterLoadingMode => 'L',
            CommandKind::SaveProgram => 'P',
            CommandKind::ExecuteProgram => 'E',
            CommandKind::Reset => 'R',
            CommandKind::Calibrate => 'C',
            CommandKind::SaveCalibration => 'S',
            CommandKind::PrintCalibration => 'H',
            CommandKind::Emergency => 'Y',
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        let mut chars = code.chars();
        let c = chars.next()?;
        if chars.next().is_some() {
            return None;
        }
        Self::ALL.into_iter().find(|k| k.code() == c)
    }

    /// Number of comma-separated argument fields following the code.
    pub fn arg_count(self) -> usize {
        match self {
            CommandKind::SetFlap | CommandKind::SetFilter | CommandKind::Wait => 1,
            CommandKind::SaveProgram | CommandKind::Calibrate => 3,
            _ => 0,
        }
    }

    /// Whether a program file may contain this kind of step.
    pub fn is_program_step(self) -> bool {
        matches!(
            self,
            CommandKind::SetFlap | CommandKind::SetFilter | CommandKind::Wait
        )
    }
}

impl FlapStatus {
    pub fn value(self) -> u8 {
        match self {
            FlapStatus::Closed => 0,
            FlapStatus::Opened => 1,
        }
    }

    pub fn from_value(v: u64) -> Option<Self> {
        match v {
            0 => Some(FlapStatus::Closed),
            1 => Some(FlapStatus::Opened),
            _ => None,
        }
    }
}

impl FilterState {
    pub fn value(self) -> u8 {
        match self {
            FilterState::None => 0,
            FilterState::Fs1 => 1,
            FilterState::Fs2 => 2,
            FilterState::Fs3 => 3,
            FilterState::Fs4 => 4,
        }
    }

    pub fn from_value(v: u64) -> Option<Self> {
        match v {
            0 => Some(FilterState::None),
            1 => Some(FilterState::Fs1),
            2 => Some(FilterState::Fs2),
            3 => Some(FilterState::Fs3),
            4 => Some(FilterState::Fs4),
            _ => None,
        }
    }
}

impl MotorId {
    pub const ALL: [MotorId; 5] = [
        MotorId::S0,
        MotorId::S1,
        MotorId::S2,
        MotorId::S3,
        MotorId::S4,
    ];

    pub fn index(self) -> usize {
        match self {
            MotorId::S0 => 0,
            MotorId::S1 => 1,
            MotorId::S2 => 2,
            MotorId::S3 => 3,
            MotorId::S4 => 4,
        }
    }

    pub fn from_index(i: u64) -> Option<Self> {
        usize::try_from(i)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
    }
}
