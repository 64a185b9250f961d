// src/proto/parser.rs
use std::fmt::Write;

use thiserror::Error;

use super::command::{
    CalibrationData, Command, CommandKind, FilterState, FlapStatus, LoopData, MAX_ANGLE, MotorId,
};
use super::response::{CalibrationTable, Response, ResponseKind};

/// Every wire message ends with this byte.
pub const TERMINATOR: char = '\n';
const SEPARATOR: char = ',';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("malformed command line: {0:?}")]
    Format(String),
    #[error("unknown command code: {0:?}")]
    UnknownKind(String),
    #[error("invalid command value: {0}")]
    Value(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseError {
    #[error("malformed response line: {0:?}")]
    Format(String),
    #[error("unknown response code: {0:?}")]
    UnknownKind(String),
    #[error("invalid response value: {0}")]
    Value(String),
}

/// Public API: serialize a command to a newline-terminated line.
pub fn encode_command(cmd: &Command) -> String {
    let mut out = String::new();
    out.push(cmd.kind().code());

    macro_rules! push_field {
        ($v:expr) => {{
            out.push(SEPARATOR);
            let _ = write!(out, "{}", $v);
        }};
    }

    match cmd {
        Command::SetFlap(status) => push_field!(status.value()),
        Command::SetFilter(state) => push_field!(state.value()),
        Command::Wait(ms) => push_field!(ms),
        Command::SaveProgram(data) => {
            push_field!(data.begin_mark);
            push_field!(data.end_mark);
            push_field!(data.num_repetitions);
        }
        Command::Calibrate(data) => {
            push_field!(data.motor.index());
            push_field!(data.opened_angle);
            push_field!(data.closed_angle);
        }
        Command::EnterLoadingMode
        | Command::ExecuteProgram
        | Command::Reset
        | Command::SaveCalibration
        | Command::PrintCalibration
        | Command::Emergency => {}
    }

    out.push(TERMINATOR);
    out
}

/// Public API: parse a newline-terminated line into a command.
///
/// Numeric fields accept a leading sign and keep only the magnitude, so
/// `W,-500` decodes the same as `W,500`.
pub fn decode_command(line: &str) -> Result<Command, CommandError> {
    let body = line
        .strip_suffix(TERMINATOR)
        .ok_or_else(|| CommandError::Format(line.to_string()))?;
    let parts: Vec<&str> = body.split(SEPARATOR).collect();

    let kind =
        CommandKind::from_code(parts[0]).ok_or_else(|| CommandError::UnknownKind(parts[0].into()))?;
    if parts.len() != 1 + kind.arg_count() {
        return Err(CommandError::Format(body.to_string()));
    }
    let args = &parts[1..];

    let cmd = match kind {
        CommandKind::SetFlap => {
            let v = field(args[0])?;
            Command::SetFlap(
                FlapStatus::from_value(v)
                    .ok_or_else(|| CommandError::Value(format!("{body}: flap {v}")))?,
            )
        }
        CommandKind::SetFilter => {
            let v = field(args[0])?;
            Command::SetFilter(
                FilterState::from_value(v)
                    .ok_or_else(|| CommandError::Value(format!("{body}: filter {v}")))?,
            )
        }
        CommandKind::Wait => Command::Wait(field_u32(args[0])?),
        CommandKind::SaveProgram => {
            let data = LoopData {
                begin_mark: field_u32(args[0])?,
                end_mark: field_u32(args[1])?,
                num_repetitions: field_u32(args[2])?,
            };
            if data.begin_mark > data.end_mark {
                return Err(CommandError::Value(format!(
                    "{body}: begin mark {} after end mark {}",
                    data.begin_mark, data.end_mark
                )));
            }
            Command::SaveProgram(data)
        }
        CommandKind::Calibrate => {
            let id = field(args[0])?;
            let motor = MotorId::from_index(id)
                .ok_or_else(|| CommandError::Value(format!("{body}: motor {id}")))?;
            let (opened_angle, closed_angle) = angles(field(args[1])?, field(args[2])?)
                .map_err(CommandError::Value)?;
            Command::Calibrate(CalibrationData {
                motor,
                opened_angle,
                closed_angle,
            })
        }
        CommandKind::EnterLoadingMode => Command::EnterLoadingMode,
        CommandKind::ExecuteProgram => Command::ExecuteProgram,
        CommandKind::Reset => Command::Reset,
        CommandKind::SaveCalibration => Command::SaveCalibration,
        CommandKind::PrintCalibration => Command::PrintCalibration,
        CommandKind::Emergency => Command::Emergency,
    };
    Ok(cmd)
}

/// Serialize a response the way the device sends it.
#[cfg(test)]
pub fn encode_response(resp: &Response) -> String {
    let mut out = String::new();
    out.push(resp.kind().code());
    match resp {
        Response::ExecFinish(cmd) => {
            out.push(SEPARATOR);
            // the echoed command brings its own terminator
            out.push_str(&encode_command(cmd));
            return out;
        }
        Response::CalibData(table) => {
            for entry in table {
                let _ = write!(
                    out,
                    "{SEPARATOR}{} {}",
                    entry.opened_angle, entry.closed_angle
                );
            }
        }
        Response::ParsingOk | Response::ParsingErr | Response::DispatchErr => {}
    }
    out.push(TERMINATOR);
    out
}

/// Public API: parse a newline-terminated device line into a response.
pub fn decode_response(line: &str) -> Result<Response, ResponseError> {
    let body = line
        .strip_suffix(TERMINATOR)
        .ok_or_else(|| ResponseError::Format(line.to_string()))?;
    let parts: Vec<&str> = body.split(SEPARATOR).collect();

    let kind = ResponseKind::from_code(parts[0])
        .ok_or_else(|| ResponseError::UnknownKind(body.to_string()))?;

    match kind {
        ResponseKind::ParsingOk | ResponseKind::ParsingErr | ResponseKind::DispatchErr => {
            if parts.len() != 1 {
                return Err(ResponseError::Format(body.to_string()));
            }
            Ok(match kind {
                ResponseKind::ParsingOk => Response::ParsingOk,
                ResponseKind::ParsingErr => Response::ParsingErr,
                _ => Response::DispatchErr,
            })
        }
        ResponseKind::ExecFinish => {
            if parts.len() < 2 {
                return Err(ResponseError::Format(body.to_string()));
            }
            let mut echoed = parts[1..].join(",");
            echoed.push(TERMINATOR);
            decode_command(&echoed)
                .map(Response::ExecFinish)
                .map_err(|e| ResponseError::Value(format!("{body}: {e}")))
        }
        ResponseKind::CalibData => {
            if parts.len() != 1 + MotorId::ALL.len() {
                return Err(ResponseError::Format(body.to_string()));
            }
            let mut table = [CalibrationData {
                motor: MotorId::S0,
                opened_angle: 0,
                closed_angle: 0,
            }; 5];
            for (slot, (motor, part)) in table
                .iter_mut()
                .zip(MotorId::ALL.into_iter().zip(&parts[1..]))
            {
                *slot = calib_entry(motor, part)?;
            }
            Ok(Response::CalibData(table))
        }
    }
}

/* ---------- helpers ---------- */

fn field(s: &str) -> Result<u64, CommandError> {
    s.parse::<i64>()
        .map(i64::unsigned_abs)
        .map_err(|_| CommandError::Value(format!("not a number: {s:?}")))
}

fn field_u32(s: &str) -> Result<u32, CommandError> {
    let v = field(s)?;
    u32::try_from(v).map_err(|_| CommandError::Value(format!("out of range: {v}")))
}

fn angles(opened: u64, closed: u64) -> Result<(u8, u8), String> {
    if opened > MAX_ANGLE as u64 || closed > MAX_ANGLE as u64 {
        return Err(format!("angles: {opened}, {closed}"));
    }
    Ok((opened as u8, closed as u8))
}

fn calib_entry(motor: MotorId, part: &str) -> Result<CalibrationData, ResponseError> {
    let pair: Vec<&str> = part.split(' ').collect();
    if pair.len() != 2 {
        return Err(ResponseError::Format(part.to_string()));
    }
    let opened = field(pair[0]).map_err(|e| ResponseError::Value(e.to_string()))?;
    let closed = field(pair[1]).map_err(|e| ResponseError::Value(e.to_string()))?;
    let (opened_angle, closed_angle) = angles(opened, closed).map_err(ResponseError::Value)?;
    Ok(CalibrationData {
        motor,
        opened_angle,
        closed_angle,
    })
}

/// Build a calibration table from `(opened, closed)` pairs ordered by motor id.
#[cfg(test)]
pub fn table_from_pairs(pairs: [(u8, u8); 5]) -> CalibrationTable {
    let mut i = 0;
    pairs.map(|(opened_angle, closed_angle)| {
        let motor = MotorId::ALL[i];
        i += 1;
        CalibrationData {
            motor,
            opened_angle,
            closed_angle,
        }
    })
}

/* ---------- tests ---------- */

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_commands() -> Vec<Command> {
        vec![
            Command::SetFlap(FlapStatus::Opened),
            Command::SetFilter(FilterState::Fs3),
            Command::Wait(500_000),
            Command::EnterLoadingMode,
            Command::SaveProgram(LoopData {
                begin_mark: 3,
                end_mark: 6,
                num_repetitions: 5,
            }),
            Command::ExecuteProgram,
            Command::Reset,
            Command::Calibrate(CalibrationData {
                motor: MotorId::S2,
                opened_angle: 30,
                closed_angle: 160,
            }),
            Command::SaveCalibration,
            Command::PrintCalibration,
            Command::Emergency,
        ]
    }

    #[test]
    fn encode_layout() {
        assert_eq!(encode_command(&Command::SetFlap(FlapStatus::Closed)), "G,0\n");
        assert_eq!(encode_command(&Command::SetFilter(FilterState::Fs4)), "F,4\n");
        assert_eq!(encode_command(&Command::Wait(250)), "W,250\n");
        assert_eq!(encode_command(&Command::EnterLoadingMode), "L\n");
        assert_eq!(
            encode_command(&Command::SaveProgram(LoopData {
                begin_mark: 2,
                end_mark: 4,
                num_repetitions: 3
            })),
            "P,2,4,3\n"
        );
        assert_eq!(
            encode_command(&Command::Calibrate(CalibrationData {
                motor: MotorId::S1,
                opened_angle: 10,
                closed_angle: 170
            })),
            "C,1,10,170\n"
        );
        assert_eq!(encode_command(&Command::Emergency), "Y\n");
    }

    #[test]
    fn roundtrip_every_kind() {
        for cmd in sample_commands() {
            let line = encode_command(&cmd);
            assert!(line.ends_with('\n'));
            assert_eq!(decode_command(&line), Ok(cmd), "line {line:?}");
        }
    }

    #[test]
    fn missing_newline_is_format_error() {
        assert!(matches!(decode_command("G,1"), Err(CommandError::Format(_))));
        assert!(matches!(decode_command("R"), Err(CommandError::Format(_))));
        assert!(matches!(decode_command(""), Err(CommandError::Format(_))));
    }

    #[test]
    fn wrong_field_count_is_format_error() {
        assert!(matches!(decode_command("G\n"), Err(CommandError::Format(_))));
        assert!(matches!(decode_command("G,1,1\n"), Err(CommandError::Format(_))));
        assert!(matches!(decode_command("R,1\n"), Err(CommandError::Format(_))));
        assert!(matches!(decode_command("P,1,2\n"), Err(CommandError::Format(_))));
        assert!(matches!(decode_command("C,1,2,3,4\n"), Err(CommandError::Format(_))));
    }

    #[test]
    fn unknown_code() {
        assert!(matches!(decode_command("X\n"), Err(CommandError::UnknownKind(_))));
        assert!(matches!(decode_command("GG,1\n"), Err(CommandError::UnknownKind(_))));
        assert!(matches!(decode_command("\n"), Err(CommandError::UnknownKind(_))));
        // response codes are not command codes
        assert!(matches!(decode_command("o\n"), Err(CommandError::UnknownKind(_))));
    }

    #[test]
    fn value_errors() {
        assert!(matches!(decode_command("G,2\n"), Err(CommandError::Value(_))));
        assert!(matches!(decode_command("F,5\n"), Err(CommandError::Value(_))));
        assert!(matches!(decode_command("W,abc\n"), Err(CommandError::Value(_))));
        assert!(matches!(decode_command("W,\n"), Err(CommandError::Value(_))));
        assert!(matches!(decode_command("C,5,10,10\n"), Err(CommandError::Value(_))));
        assert!(matches!(decode_command("C,0,181,10\n"), Err(CommandError::Value(_))));
        assert!(matches!(decode_command("C,0,10,200\n"), Err(CommandError::Value(_))));
        assert!(matches!(decode_command("P,5,4,1\n"), Err(CommandError::Value(_))));
        assert!(matches!(decode_command("P,x,4,1\n"), Err(CommandError::Value(_))));
    }

    #[test]
    fn negative_numbers_are_normalized() {
        assert_eq!(decode_command("W,-500\n"), Ok(Command::Wait(500)));
        assert_eq!(
            decode_command("C,-3,-20,170\n"),
            Ok(Command::Calibrate(CalibrationData {
                motor: MotorId::S3,
                opened_angle: 20,
                closed_angle: 170,
            }))
        );
        assert_eq!(
            decode_command("G,-1\n"),
            Ok(Command::SetFlap(FlapStatus::Opened))
        );
    }

    #[test]
    fn simple_responses() {
        assert_eq!(decode_response("o\n"), Ok(Response::ParsingOk));
        assert_eq!(decode_response("p\n"), Ok(Response::ParsingErr));
        assert_eq!(decode_response("d\n"), Ok(Response::DispatchErr));
        assert!(matches!(decode_response("o"), Err(ResponseError::Format(_))));
        assert!(matches!(decode_response("o,1\n"), Err(ResponseError::Format(_))));
        assert!(matches!(decode_response("z\n"), Err(ResponseError::UnknownKind(_))));
        assert!(matches!(decode_response("G,1\n"), Err(ResponseError::UnknownKind(_))));
    }

    #[test]
    fn exec_finish_echo() {
        assert_eq!(
            decode_response("f,F,3\n"),
            Ok(Response::ExecFinish(Command::SetFilter(FilterState::Fs3)))
        );
        assert_eq!(
            decode_response("f,P,2,4,3\n"),
            Ok(Response::ExecFinish(Command::SaveProgram(LoopData {
                begin_mark: 2,
                end_mark: 4,
                num_repetitions: 3,
            })))
        );
        assert_eq!(
            decode_response("f,C,2,3,160\n"),
            Ok(Response::ExecFinish(Command::Calibrate(CalibrationData {
                motor: MotorId::S2,
                opened_angle: 3,
                closed_angle: 160,
            })))
        );
        assert!(matches!(decode_response("f\n"), Err(ResponseError::Format(_))));
        assert!(matches!(decode_response("f,X\n"), Err(ResponseError::Value(_))));
        assert!(matches!(decode_response("f,G,7\n"), Err(ResponseError::Value(_))));
        assert!(matches!(decode_response("f,G\n"), Err(ResponseError::Value(_))));
    }

    #[test]
    fn calib_data_table() {
        let resp = decode_response("c,0 180,0 180,10 170,20 170,30 150\n").unwrap();
        let Response::CalibData(table) = resp else {
            panic!("wrong variant");
        };
        let pairs: Vec<(u8, u8)> = table
            .iter()
            .map(|c| (c.opened_angle, c.closed_angle))
            .collect();
        assert_eq!(pairs, vec![(0, 180), (0, 180), (10, 170), (20, 170), (30, 150)]);
        for (i, entry) in table.iter().enumerate() {
            assert_eq!(entry.motor.index(), i);
        }
    }

    #[test]
    fn calib_data_errors() {
        assert!(matches!(
            decode_response("c,0 180,0 180,10 170,20 170\n"),
            Err(ResponseError::Format(_))
        ));
        assert!(matches!(
            decode_response("c,0 180,0 180,10 170,20 170,30\n"),
            Err(ResponseError::Format(_))
        ));
        assert!(matches!(
            decode_response("c,0 180,0 180,10 170,20 170,30 190\n"),
            Err(ResponseError::Value(_))
        ));
        assert!(matches!(
            decode_response("c,0 180,0 180,a 170,20 170,30 150\n"),
            Err(ResponseError::Value(_))
        ));
    }

    #[test]
    fn encode_response_layout() {
        assert_eq!(encode_response(&Response::ParsingOk), "o\n");
        assert_eq!(
            encode_response(&Response::ExecFinish(Command::Wait(10))),
            "f,W,10\n"
        );
        let table = table_from_pairs([(0, 180), (0, 180), (10, 170), (20, 170), (30, 150)]);
        let line = encode_response(&Response::CalibData(table));
        assert_eq!(line, "c,0 180,0 180,10 170,20 170,30 150\n");
        assert_eq!(decode_response(&line), Ok(Response::CalibData(table)));
    }

    #[test]
    fn error_display() {
        let e = CommandError::UnknownKind("X".into());
        assert_eq!(e.to_string(), "unknown command code: \"X\"");
        let e = ResponseError::Value("angles: 190, 0".into());
        assert_eq!(e.to_string(), "invalid response value: angles: 190, 0");
    }
}
