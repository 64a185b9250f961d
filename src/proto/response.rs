use super::command::{CalibrationData, Command};

/// Calibration of all five motors, indexed by motor id.
pub type CalibrationTable = [CalibrationData; 5];

/// One device-to-host message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    ParsingOk,
    ParsingErr,
    DispatchErr,
    /// The device finished executing the echoed command.
    ExecFinish(Command),
    CalibData(CalibrationTable),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    ParsingOk,
    ParsingErr,
    DispatchErr,
    ExecFinish,
    CalibData,
}

impl Response {
    pub fn kind(&self) -> ResponseKind {
        match self {
            Response::ParsingOk => ResponseKind::ParsingOk,
            Response::ParsingErr => ResponseKind::ParsingErr,
            Response::DispatchErr => ResponseKind::DispatchErr,
            Response::ExecFinish(_) => ResponseKind::ExecFinish,
            Response::CalibData(_) => ResponseKind::CalibData,
        }
    }
}

impl ResponseKind {
    pub const ALL: [ResponseKind; 5] = [
        ResponseKind::ParsingOk,
        ResponseKind::ParsingErr,
        ResponseKind::DispatchErr,
        ResponseKind::ExecFinish,
        ResponseKind::CalibData,
    ];

    pub fn code(self) -> char {
        match self {
            ResponseKind::ParsingOk => 'o',
            ResponseKind::ParsingErr => 'p',
            ResponseKind::DispatchErr => 'd',
            ResponseKind::ExecFinish => 'f',
            ResponseKind::CalibData => 'c',
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
}
