use std::io::{BufRead, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, warn};

use crate::calibration::{load_calibration, save_calibration, upload_commands};
use crate::cli::SerialOpts;
use crate::dialogue::Dialogue;
use crate::program::load_program;
use crate::proto::Command;
use crate::session::{ConsolePresenter, drain, open, parse_line, pump, pump_until};
use crate::transport::Transport;

const HELP: &str = "\
  <line>              send one command in wire form, e.g. G,1  F,2  W,500
  reset               reset (emergency stop while a program runs)
  exec                run the stored program
  upload FILE         store a program file on the device
  calib read [FILE]   print the device calibration, optionally saving it
  calib write FILE    program a calibration file
  connect DEV         switch serial port
  status              show dialogue state
  help | quit";

#[derive(Debug, PartialEq, Eq)]
enum Intent<'a> {
    Quit,
    Help,
    Status,
    Reset,
    Exec,
    Upload(&'a str),
    CalibRead(Option<&'a str>),
    CalibWrite(&'a str),
    Connect(&'a str),
    Send(&'a str),
}

fn parse_intent(input: &str) -> Option<Intent<'_>> {
    let mut words = input.split_whitespace();
    let first = words.next()?;
    let rest: Vec<&str> = words.collect();
    Some(match (first, rest.as_slice()) {
        ("quit" | "exit", []) => Intent::Quit,
        ("help" | "?", []) => Intent::Help,
        ("status", []) => Intent::Status,
        ("reset", []) => Intent::Reset,
        ("exec", []) => Intent::Exec,
        ("upload", [file]) => Intent::Upload(*file),
        ("calib", ["read"]) => Intent::CalibRead(None),
        ("calib", ["read", file]) => Intent::CalibRead(Some(*file)),
        ("calib", ["write", file]) => Intent::CalibWrite(*file),
        ("connect", [dev]) => Intent::Connect(*dev),
        _ => Intent::Send(input.trim()),
    })
}

/// Runs one intent. Returns false when the console should exit.
///
/// Lines that arrived while the prompt was waiting (a program finishing, for
/// instance) are delivered first.
fn dispatch<T: Transport>(
    dialogue: &mut Dialogue<T, ConsolePresenter>,
    intent: Intent<'_>,
    settle: Duration,
) -> Result<bool> {
    if dialogue.transport().is_open() {
        drain(dialogue);
    }
    match intent {
        Intent::Quit => return Ok(false),
        Intent::Help => println!("{HELP}"),
        Intent::Status => println!(
            "open={} idle={} busy={} program={}",
            dialogue.transport().is_open(),
            dialogue.is_idle(),
            dialogue.is_busy(),
            dialogue.has_program()
        ),
        Intent::Reset => {
            if dialogue.submit_reset().is_ok() {
                pump(dialogue, settle);
            }
        }
        Intent::Exec => {
            // a running program is silent; return to the prompt so reset stays reachable
            if dialogue.submit_single(Command::ExecuteProgram).is_ok() {
                pump_until(dialogue, settle, |d| !d.is_busy());
            }
        }
        Intent::Upload(file) => {
            let commands = load_program(Path::new(file))?.to_commands()?;
            if dialogue.submit_batch(commands, false).is_ok() {
                pump(dialogue, settle);
            }
        }
        Intent::CalibRead(file) => {
            dialogue.presenter_mut().last_table = None;
            if dialogue.submit_single(Command::PrintCalibration).is_ok() {
                pump_until(dialogue, settle, |d| d.presenter().last_table.is_some());
            }
            if let (Some(file), Some(table)) = (file, dialogue.presenter().last_table) {
                save_calibration(Path::new(file), &table)?;
            }
        }
        Intent::CalibWrite(file) => {
            let table = load_calibration(Path::new(file))?;
            if dialogue.submit_batch(upload_commands(&table), false).is_ok() {
                pump(dialogue, settle);
            }
        }
        Intent::Connect(dev) => {
            if let Err(e) = dialogue.connect(dev) {
                debug!("[pofs] staying disconnected: {}", e);
            }
        }
        Intent::Send(text) => {
            let cmd = parse_line(text)?;
            if dialogue.submit_single(cmd).is_ok() {
                pump(dialogue, settle);
            }
        }
    }
    Ok(true)
}

pub fn run(opts: SerialOpts) -> Result<()> {
    let mut dialogue = open(&opts)?;
    let stdin = std::io::stdin();
    let mut input = String::new();
    println!("connected to {}; type help for commands", opts.dev);

    loop {
        print!("pofs> ");
        std::io::stdout().flush()?;
        input.clear();
        if stdin.lock().read_line(&mut input)? == 0 {
            break;
        }
        let Some(intent) = parse_intent(&input) else {
            continue;
        };
        match dispatch(&mut dialogue, intent, opts.settle()) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => warn!("[pofs] {:#}", e),
        }
    }
    dialogue.disconnect();
    Ok(())
}
