//! Wire codec: one ASCII line per message, fields separated by commas after
//! a single-character kind code.

pub mod command;
pub mod parser;
pub mod response;

pub use command::{
    CalibrationData, Command, CommandKind, FilterState, FlapStatus, LoopData, MotorId,
};
#[cfg(test)]
pub use parser::encode_response;
pub use parser::{CommandError, ResponseError, decode_command, decode_response, encode_command};
pub use response::{CalibrationTable, Response};
