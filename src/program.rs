//! Stored programs ("algorithms"): a prologue, a repeated loop and an
//! epilogue of flap/filter/wait steps.
//!
//! # Format
//! JSON object with keys `before`, `loop`, `after` (arrays of command lines
//! in wire format, trailing newline optional) and `loop_times`.

use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::proto::{Command, CommandError, CommandKind, LoopData, decode_command, encode_command};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProgramError {
    #[error("{section}[{index}]: {source}")]
    BadLine {
        section: &'static str,
        index: usize,
        source: CommandError,
    },
    #[error("{section}[{index}]: {kind:?} is not allowed in a program")]
    NotAStep {
        section: &'static str,
        index: usize,
        kind: CommandKind,
    },
    #[error("program too long: {0} steps")]
    TooLong(usize),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ProgramFile {
    before: Vec<String>,
    #[serde(rename = "loop")]
    looped: Vec<String>,
    after: Vec<String>,
    loop_times: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    pub before: Vec<Command>,
    pub looped: Vec<Command>,
    pub after: Vec<Command>,
    pub loop_times: u32,
}

impl Program {
    /// The upload batch: loading mode, every step, then the loop
    /// description. Marks count user steps only; `end_mark` is exclusive.
    pub fn to_commands(&self) -> Result<Vec<Command>, ProgramError> {
        let steps = self.before.len() + self.looped.len() + self.after.len();
        let begin_mark = u32::try_from(self.before.len()).map_err(|_| ProgramError::TooLong(steps))?;
        let end_mark = u32::try_from(self.before.len() + self.looped.len())
            .map_err(|_| ProgramError::TooLong(steps))?;

        let mut out = Vec::with_capacity(steps + 2);
        out.push(Command::EnterLoadingMode);
        out.extend(self.before.iter().copied());
        out.extend(self.looped.iter().copied());
        out.extend(self.after.iter().copied());
        out.push(Command::SaveProgram(LoopData {
            begin_mark,
            end_mark,
            num_repetitions: self.loop_times,
        }));
        Ok(out)
    }

    fn from_file(file: ProgramFile) -> Result<Self, ProgramError> {
        Ok(Self {
            before: section("before", &file.before)?,
            looped: section("loop", &file.looped)?,
            after: section("after", &file.after)?,
            loop_times: file.loop_times,
        })
    }

    fn to_file(&self) -> ProgramFile {
        ProgramFile {
            before: lines(&self.before),
            looped: lines(&self.looped),
            after: lines(&self.after),
            loop_times: self.loop_times,
        }
    }
}

fn lines(cmds: &[Command]) -> Vec<String> {
    cmds.iter().map(encode_command).collect()
}

fn section(name: &'static str, lines: &[String]) -> Result<Vec<Command>, ProgramError> {
    lines
        .iter()
        .enumerate()
        .map(|(index, line)| {
            let decoded = if line.ends_with('\n') {
                decode_command(line)
            } else {
                decode_command(&format!("{line}\n"))
            };
            let cmd = decoded.map_err(|source| ProgramError::BadLine {
                section: name,
                index,
                source,
            })?;
            if !cmd.kind().is_program_step() {
                return Err(ProgramError::NotAStep {
                    section: name,
                    index,
                    kind: cmd.kind(),
                });
            }
            Ok(cmd)
        })
        .collect()
}

pub fn read_program<R: Read>(reader: R) -> Result<Program> {
    let file: ProgramFile = serde_json::from_reader(reader).context("parse program JSON")?;
    Ok(Program::from_file(file)?)
}

pub fn write_program<W: Write>(writer: W, program: &Program) -> Result<()> {
    serde_json::to_writer_pretty(writer, &program.to_file()).context("write program JSON")
}

pub fn load_program(path: &Path) -> Result<Program> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("open program {}", path.display()))?;
    read_program(std::io::BufReader::new(file))
        .with_context(|| format!("load program {}", path.display()))
}

pub fn save_program(path: &Path, program: &Program) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("create program {}", path.display()))?;
    let mut writer = std::io::BufWriter::new(file);
    write_program(&mut writer, program)?;
    writer
        .flush()
        .with_context(|| format!("flush program {}", path.display()))
}
