//! Host-side dialogue with the flap/filter device.
//!
//! Every command written to the device owes a list of responses. The list is
//! consumed from the back: the parse acknowledgment is pushed last so it is
//! expected first, and the execution report (realtime dispatch only) is
//! pushed before it so it is expected second. Batches hold one such list per
//! queued command and advance one command per fully acknowledged list.

use std::collections::VecDeque;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::proto::{
    CalibrationTable, Command, CommandKind, Response, ResponseError, decode_response,
    encode_command,
};
use crate::transport::{ReadStatus, Transport};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DialogueError {
    #[error("port is not open")]
    PortClosed,
    #[error("could not open port: {0}")]
    Connect(String),
    #[error("device is busy; only emergency stop is accepted")]
    Busy,
    #[error("no program loaded")]
    NoProgram,
    #[error("nothing to send")]
    EmptyBatch,
    #[error("write failed: {0}")]
    Write(String),
    #[error("no packet received")]
    NoPacket,
    #[error("undecodable bytes received")]
    Decoding,
    #[error("bad response: {0}")]
    BadResponse(#[from] ResponseError),
    #[error("device could not parse the command")]
    DeviceParsing,
    #[error("device could not dispatch the command")]
    DeviceDispatch,
    #[error("desync: unexpected response {0:?}")]
    Unexpected(Response),
    #[error("desync: expected {expected:?}, got {got:?}")]
    Mismatch { expected: Response, got: Response },
    #[error("desync: responses still owed but nothing left to send")]
    NothingToSend,
}

/// What the controller tells the user-facing side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Sent(Command),
    Acknowledged,
    Finished(Command),
    Idle,
    Error(DialogueError),
}

pub trait Presenter {
    fn notify(&mut self, notice: Notice);
    fn calibration_table(&mut self, table: &CalibrationTable);
}

/// Responses still owed for one command, consumed from the back.
type Expectations = Vec<Response>;

pub struct Dialogue<T, P> {
    transport: T,
    presenter: P,
    transmit_queue: VecDeque<Command>,
    expectation_queue: VecDeque<Expectations>,
    current: Expectations,
    device_busy: bool,
    last_program_tail: Option<Command>,
    // tail of a program upload still in flight
    pending_program_tail: Option<Command>,
}

impl<T: Transport, P: Presenter> Dialogue<T, P> {
    pub fn new(transport: T, presenter: P) -> Self {
        Self {
            transport,
            presenter,
            transmit_queue: VecDeque::new(),
            expectation_queue: VecDeque::new(),
            current: Vec::new(),
            device_busy: false,
            last_program_tail: None,
            pending_program_tail: None,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn presenter_mut(&mut self) -> &mut P {
        &mut self.presenter
    }

    pub fn is_busy(&self) -> bool {
        self.device_busy
    }

    /// No command is outstanding and nothing is queued.
    pub fn is_idle(&self) -> bool {
        self.current.is_empty()
            && self.transmit_queue.is_empty()
            && self.expectation_queue.is_empty()
    }

    pub fn has_program(&self) -> bool {
        self.last_program_tail.is_some()
    }

    /// Open `name` with a fresh session.
    pub fn connect(&mut self, name: &str) -> Result<(), DialogueError> {
        self.transport.close();
        self.reset_session();
        self.last_program_tail = None;
        match self.transport.open(name) {
            Ok(()) => {
                info!("[dialogue] connected to {}", name);
                Ok(())
            }
            Err(e) => self.reject(DialogueError::Connect(e.to_string())),
        }
    }

    pub fn disconnect(&mut self) {
        self.transport.close();
        self.reset_session();
        info!("[dialogue] disconnected");
    }

    /// Realtime dispatch of one command: the device must acknowledge parsing
    /// and then report execution.
    pub fn submit_single(&mut self, cmd: Command) -> Result<(), DialogueError> {
        self.check_ready(cmd.kind())?;
        let expectations = self.expectations_for(&cmd, true)?;
        if !self.is_idle() {
            warn!("[dialogue] {:?} preempts the dialogue in progress", cmd);
        }
        self.transmit_queue.clear();
        self.expectation_queue.clear();
        self.pending_program_tail = None;
        if cmd.kind() == CommandKind::ExecuteProgram {
            self.device_busy = true;
        }
        self.current = expectations;
        self.transmit(cmd)
    }

    /// Reset the device, or stop it if it is running a program.
    pub fn submit_reset(&mut self) -> Result<(), DialogueError> {
        if self.device_busy {
            let sent = self.submit_single(Command::Emergency);
            // assume the device aborts its program
            self.device_busy = false;
            sent
        } else {
            self.submit_single(Command::Reset)
        }
    }

    /// Queue `commands` and send the first. Each later command goes out once
    /// its predecessor is fully acknowledged. With `realtime == false` only
    /// the parse acknowledgment is owed per command.
    pub fn submit_batch(
        &mut self,
        commands: Vec<Command>,
        realtime: bool,
    ) -> Result<(), DialogueError> {
        let Some(first) = commands.first() else {
            return self.reject(DialogueError::EmptyBatch);
        };
        self.check_ready(first.kind())?;

        let mut expectation_queue = VecDeque::with_capacity(commands.len());
        for cmd in &commands {
            expectation_queue.push_back(self.expectations_for(cmd, realtime)?);
        }
        self.transmit_queue = commands.into();
        self.expectation_queue = expectation_queue;
        self.pending_program_tail = self
            .transmit_queue
            .back()
            .filter(|c| c.kind() == CommandKind::SaveProgram)
            .copied();
        let runs_program = self
            .transmit_queue
            .iter()
            .any(|c| c.kind() == CommandKind::ExecuteProgram);
        if realtime && runs_program {
            self.device_busy = true;
        }
        info!(
            "[dialogue] batch of {} commands (realtime={})",
            self.transmit_queue.len(),
            realtime
        );

        match (self.transmit_queue.pop_front(), self.expectation_queue.pop_front()) {
            (Some(cmd), Some(expectations)) => {
                self.current = expectations;
                self.transmit(cmd)
            }
            _ => self.reject(DialogueError::EmptyBatch),
        }
    }

    /// Feed one read result from the transport into the dialogue.
    pub fn on_line_received(&mut self, status: ReadStatus) {
        let line = match status {
            ReadStatus::Line(line) => line,
            ReadStatus::NoPacket => return self.report(DialogueError::NoPacket),
            ReadStatus::DecodingError => return self.report(DialogueError::Decoding),
        };
        let response = match decode_response(&line) {
            Ok(r) => r,
            Err(e) => return self.report(e.into()),
        };
        debug!("[dialogue] rx {:?} {:?}", response.kind(), line);

        match response {
            Response::ParsingOk | Response::ExecFinish(_) => self.consume(response),
            Response::ParsingErr => self.abort(DialogueError::DeviceParsing),
            Response::DispatchErr => self.abort(DialogueError::DeviceDispatch),
            Response::CalibData(table) => self.presenter.calibration_table(&table),
        }
    }

    fn consume(&mut self, got: Response) {
        let Some(expected) = self.current.pop() else {
            return self.report(DialogueError::Unexpected(got));
        };
        if expected != got {
            self.report(DialogueError::Mismatch { expected, got });
        }
        match got {
            Response::ExecFinish(cmd) => self.presenter.notify(Notice::Finished(cmd)),
            _ => self.presenter.notify(Notice::Acknowledged),
        }
        if !self.current.is_empty() {
            return;
        }

        match self.expectation_queue.pop_front() {
            Some(next) => {
                self.current = next;
                match self.transmit_queue.pop_front() {
                    Some(cmd) => {
                        if let Err(e) = self.transmit(cmd) {
                            debug!("[dialogue] batch stopped: {}", e);
                        }
                    }
                    None => self.abort(DialogueError::NothingToSend),
                }
            }
            None if !self.transmit_queue.is_empty() => self.abort(DialogueError::NothingToSend),
            None => self.finish(),
        }
    }

    fn finish(&mut self) {
        if let Some(tail) = self.pending_program_tail.take() {
            info!("[dialogue] program stored, tail {:?}", tail);
            self.last_program_tail = Some(tail);
        }
        self.device_busy = false;
        self.presenter.notify(Notice::Idle);
    }

    fn check_ready(&mut self, kind: CommandKind) -> Result<(), DialogueError> {
        if !self.transport.is_open() {
            return self.reject(DialogueError::PortClosed);
        }
        if self.device_busy && kind != CommandKind::Emergency {
            return self.reject(DialogueError::Busy);
        }
        Ok(())
    }

    fn expectations_for(
        &mut self,
        cmd: &Command,
        realtime: bool,
    ) -> Result<Expectations, DialogueError> {
        let mut expectations = Vec::with_capacity(2);
        if realtime {
            match cmd.kind() {
                CommandKind::PrintCalibration => {}
                CommandKind::ExecuteProgram => match self.last_program_tail.as_ref().copied() {
                    // the device echoes the last step of the program it ran
                    Some(tail) => expectations.push(Response::ExecFinish(tail)),
                    None => return self.reject(DialogueError::NoProgram),
                },
                _ => expectations.push(Response::ExecFinish(*cmd)),
            }
        }
        expectations.push(Response::ParsingOk);
        Ok(expectations)
    }

    fn transmit(&mut self, cmd: Command) -> Result<(), DialogueError> {
        let line = encode_command(&cmd);
        match self.transport.write_line(&line) {
            Ok(()) => {
                debug!("[dialogue] tx {:?}", line);
                self.presenter.notify(Notice::Sent(cmd));
                Ok(())
            }
            Err(e) => {
                let err = DialogueError::Write(e.to_string());
                self.abort(err.clone());
                Err(err)
            }
        }
    }

    fn abort(&mut self, err: DialogueError) {
        self.reset_session();
        self.report(err);
    }

    fn reset_session(&mut self) {
        self.transmit_queue.clear();
        self.expectation_queue.clear();
        self.current.clear();
        self.device_busy = false;
        self.pending_program_tail = None;
    }

    fn reject<V>(&mut self, err: DialogueError) -> Result<V, DialogueError> {
        self.report(err.clone());
        Err(err)
    }

    fn report(&mut self, err: DialogueError) {
        warn!("[dialogue] {}", err);
        self.presenter.notify(Notice::Error(err));
    }
}
