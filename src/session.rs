use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::calibration::{load_calibration, save_calibration, upload_commands};
use crate::cli::{CalibReadOpts, CalibWriteOpts, CheckOpts, SendOpts, SerialOpts, UploadOpts};
use crate::dialogue::{Dialogue, Notice, Presenter};
use crate::port::SerialLink;
use crate::program::{load_program, save_program};
use crate::proto::{CalibrationTable, Command, decode_command, encode_command};
use crate::transport::{ReadStatus, Transport};

/// Logs dialogue notices and keeps what the front end needs afterwards.
#[derive(Debug, Default)]
pub struct ConsolePresenter {
    pub errors: usize,
    pub last_table: Option<CalibrationTable>,
}

impl Presenter for ConsolePresenter {
    fn notify(&mut self, notice: Notice) {
        match notice {
            Notice::Sent(cmd) => info!("[pofs] sent {}", encode_command(&cmd).trim_end()),
            Notice::Acknowledged => debug!("[pofs] acknowledged"),
            Notice::Finished(cmd) => info!("[pofs] finished {}", encode_command(&cmd).trim_end()),
            Notice::Idle => debug!("[pofs] idle"),
            Notice::Error(e) => {
                self.errors += 1;
                warn!("[pofs] {}", e);
            }
        }
    }

    fn calibration_table(&mut self, table: &CalibrationTable) {
        println!("motor  opened  closed");
        for entry in table {
            println!(
                "{:>5}  {:>6}  {:>6}",
                entry.motor.index(),
                entry.opened_angle,
                entry.closed_angle
            );
        }
        self.last_table = Some(*table);
    }
}

pub type ConsoleDialogue = Dialogue<SerialLink, ConsolePresenter>;

pub fn open(opts: &SerialOpts) -> Result<ConsoleDialogue> {
    let mut dialogue = Dialogue::new(SerialLink::new(opts.baud), ConsolePresenter::default());
    dialogue
        .connect(&opts.dev)
        .with_context(|| format!("connect {}", opts.dev))?;
    Ok(dialogue)
}

/// Feed transport reads into the dialogue until `done` holds. Gives up, and
/// reports a missing packet, once nothing has arrived for `quiet`.
pub fn pump_until<T, P, F>(dialogue: &mut Dialogue<T, P>, quiet: Duration, done: F) -> bool
where
    T: Transport,
    P: Presenter,
    F: Fn(&Dialogue<T, P>) -> bool,
{
    let mut last_rx = Instant::now();
    while !done(dialogue) {
        match dialogue.transport_mut().read_line() {
            ReadStatus::NoPacket => {
                if last_rx.elapsed() >= quiet {
                    dialogue.on_line_received(ReadStatus::NoPacket);
                    return false;
                }
            }
            status => {
                last_rx = Instant::now();
                dialogue.on_line_received(status);
            }
        }
    }
    true
}

pub fn pump<T: Transport, P: Presenter>(dialogue: &mut Dialogue<T, P>, quiet: Duration) -> bool {
    pump_until(dialogue, quiet, |d| d.is_idle())
}

/// Hand every line already waiting on the transport to the dialogue, without
/// waiting for more. Returns how many reads were delivered.
pub fn drain<T: Transport, P: Presenter>(dialogue: &mut Dialogue<T, P>) -> usize {
    let mut delivered = 0;
    loop {
        match dialogue.transport_mut().read_line() {
            ReadStatus::NoPacket => return delivered,
            status => {
                dialogue.on_line_received(status);
                delivered += 1;
            }
        }
    }
}

/// Realtime batch. A calibration print is acknowledged before its table
/// arrives, so in that case pumping continues until the table is in.
pub fn send_batch<T: Transport>(
    dialogue: &mut Dialogue<T, ConsolePresenter>,
    commands: Vec<Command>,
    quiet: Duration,
) -> bool {
    let wants_table = commands.contains(&Command::PrintCalibration);
    if wants_table {
        dialogue.presenter_mut().last_table = None;
    }
    if dialogue.submit_batch(commands, true).is_err() {
        return false;
    }
    pump_until(dialogue, quiet, |d| {
        d.is_idle() && (!wants_table || d.presenter().last_table.is_some())
    })
}

/// Accepts wire text with or without its trailing newline.
pub fn parse_line(text: &str) -> Result<Command> {
    let mut line = text.trim().to_string();
    line.push('\n');
    decode_command(&line).with_context(|| format!("bad command {:?}", text.trim()))
}

fn finish(dialogue: &ConsoleDialogue, what: &str) -> Result<()> {
    let errors = dialogue.presenter().errors;
    if errors > 0 {
        bail!("{}: {} problem(s) reported by the dialogue", what, errors);
    }
    Ok(())
}

pub fn run_ports() -> Result<()> {
    let ports = crate::port::list_ports()?;
    if ports.is_empty() {
        eprintln!("no serial ports found");
    }
    for p in ports {
        println!("{}", p);
    }
    Ok(())
}

pub fn run_send(opts: SendOpts) -> Result<()> {
    let commands = opts
        .lines
        .iter()
        .map(|l| parse_line(l))
        .collect::<Result<Vec<_>>>()?;
    let mut dialogue = open(&opts.ser)?;
    send_batch(&mut dialogue, commands, opts.ser.settle());
    finish(&dialogue, "send")
}

pub fn run_reset(opts: SerialOpts) -> Result<()> {
    let mut dialogue = open(&opts)?;
    if dialogue.submit_reset().is_ok() {
        pump(&mut dialogue, opts.settle());
    }
    finish(&dialogue, "reset")
}

pub fn run_upload(opts: UploadOpts) -> Result<()> {
    let program = load_program(&opts.file)?;
    let commands = program.to_commands()?;
    let mut dialogue = open(&opts.ser)?;
    info!(
        "[pofs] uploading {} ({} steps, loop x{})",
        opts.file.display(),
        commands.len(),
        program.loop_times
    );
    if dialogue.submit_batch(commands, false).is_err()
        || !pump(&mut dialogue, opts.ser.settle())
        || !dialogue.has_program()
    {
        finish(&dialogue, "upload")?;
        bail!("upload: program not stored");
    }
    info!("[pofs] program stored");

    if opts.execute && dialogue.submit_single(Command::ExecuteProgram).is_ok() {
        let timeout = Duration::from_secs(opts.run_timeout_s);
        if !pump(&mut dialogue, timeout) {
            warn!("[pofs] program still running, stopping it");
            if dialogue.submit_reset().is_ok() {
                pump(&mut dialogue, opts.ser.settle());
            }
        }
    }
    finish(&dialogue, "upload")
}

pub fn run_check(opts: CheckOpts) -> Result<()> {
    let program = load_program(&opts.file)?;
    for cmd in program.to_commands()? {
        print!("{}", encode_command(&cmd));
    }
    if let Some(path) = &opts.rewrite {
        save_program(path, &program)?;
        info!("[pofs] program written to {}", path.display());
    }
    Ok(())
}

pub fn run_calib_read(opts: CalibReadOpts) -> Result<()> {
    let mut dialogue = open(&opts.ser)?;
    if dialogue.submit_single(Command::PrintCalibration).is_ok() {
        pump_until(&mut dialogue, opts.ser.settle(), |d| {
            d.presenter().last_table.is_some()
        });
    }
    finish(&dialogue, "calib read")?;
    let Some(table) = dialogue.presenter().last_table else {
        bail!("calib read: device sent no calibration table");
    };
    if let Some(path) = &opts.save {
        save_calibration(path, &table)?;
        info!("[pofs] calibration saved to {}", path.display());
    }
    Ok(())
}

pub fn run_calib_write(opts: CalibWriteOpts) -> Result<()> {
    let table = load_calibration(&opts.file)?;
    let mut dialogue = open(&opts.ser)?;
    if dialogue.submit_batch(upload_commands(&table), false).is_ok() {
        pump(&mut dialogue, opts.ser.settle());
    }
    finish(&dialogue, "calib write")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialogue::tests::RecordingPresenter;
    use crate::proto::FlapStatus;
    use crate::transport::mock::MockTransport;

    #[test]
    fn parse_line_accepts_bare_text() {
        assert_eq!(
            parse_line(" G,1 ").unwrap(),
            Command::SetFlap(FlapStatus::Opened)
        );
        assert_eq!(parse_line("R\n").unwrap(), Command::Reset);
        assert!(parse_line("Q").is_err());
    }

    #[test]
    fn pump_drains_scripted_replies() {
        let mut t = MockTransport::opened();
        t.push_line("o\n");
        t.push_line("f,G,1\n");
        let mut d = Dialogue::new(t, RecordingPresenter::default());
        d.submit_single(Command::SetFlap(FlapStatus::Opened)).unwrap();
        assert!(pump(&mut d, Duration::from_millis(50)));
        assert!(d.is_idle());
        assert!(d.presenter().errors().is_empty());
    }

    #[test]
    fn pump_gives_up_on_silence() {
        let mut t = MockTransport::opened();
        t.push_line("o\n");
        let mut d = Dialogue::new(t, RecordingPresenter::default());
        d.submit_single(Command::Reset).unwrap();
        assert!(!pump(&mut d, Duration::from_millis(20)));
        assert!(!d.is_idle());
        assert_eq!(
            d.presenter().errors(),
            vec![&crate::dialogue::DialogueError::NoPacket]
        );
    }

    #[test]
    fn pump_until_waits_for_table() {
        let mut t = MockTransport::opened();
        t.push_line("o\n");
        t.push_line("c,0 180,0 180,10 170,20 170,30 150\n");
        let mut d = Dialogue::new(t, RecordingPresenter::default());
        d.submit_single(Command::PrintCalibration).unwrap();
        assert!(pump_until(&mut d, Duration::from_millis(50), |d| {
            !d.presenter().tables.is_empty()
        }));
        assert_eq!(d.presenter().tables.len(), 1);
    }

    #[test]
    fn drain_stops_at_first_silence() {
        let mut t = MockTransport::opened();
        t.push_line("o\n");
        t.reads.push_back(ReadStatus::NoPacket);
        t.push_line("f,G,1\n");
        let mut d = Dialogue::new(t, RecordingPresenter::default());
        d.submit_single(Command::SetFlap(FlapStatus::Opened)).unwrap();
        assert_eq!(drain(&mut d), 1);
        assert!(!d.is_idle());
        assert_eq!(drain(&mut d), 1);
        assert!(d.is_idle());
        assert_eq!(drain(&mut d), 0);
        assert!(d.presenter().errors().is_empty());
    }

    #[test]
    fn send_waits_for_calibration_table() {
        let mut t = MockTransport::opened();
        t.push_line("o\n");
        t.reads.push_back(ReadStatus::NoPacket);
        t.push_line("c,0 180,0 180,10 170,20 170,30 150\n");
        let mut d = Dialogue::new(t, ConsolePresenter::default());
        assert!(send_batch(
            &mut d,
            vec![Command::PrintCalibration],
            Duration::from_millis(50)
        ));
        let table = d.presenter().last_table.expect("table delivered");
        assert_eq!(table[4].opened_angle, 30);
        assert_eq!(table[4].closed_angle, 150);
        assert_eq!(d.presenter().errors, 0);
    }

    #[test]
    fn send_reports_missing_calibration_table() {
        let mut t = MockTransport::opened();
        t.push_line("o\n");
        let mut d = Dialogue::new(t, ConsolePresenter::default());
        assert!(!send_batch(
            &mut d,
            vec![Command::PrintCalibration],
            Duration::from_millis(20)
        ));
        assert!(d.is_idle());
        assert_eq!(d.presenter().errors, 1);
    }

    #[test]
    fn send_without_print_stops_when_idle() {
        let mut t = MockTransport::opened();
        t.push_line("o\n");
        t.push_line("f,W,5\n");
        let mut d = Dialogue::new(t, ConsolePresenter::default());
        assert!(send_batch(&mut d, vec![Command::Wait(5)], Duration::from_millis(20)));
        assert_eq!(d.presenter().errors, 0);
        assert!(d.presenter().last_table.is_none());
    }

    #[test]
    fn console_presenter_counts_errors_and_keeps_table() {
        let mut p = ConsolePresenter::default();
        p.notify(Notice::Idle);
        p.notify(Notice::Error(crate::dialogue::DialogueError::Busy));
        assert_eq!(p.errors, 1);
        let table = crate::proto::parser::table_from_pairs([(1, 2); 5]);
        p.calibration_table(&table);
        assert_eq!(p.last_table, Some(table));
    }
}
