use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "pofs", about = "Host control for the POFS flap/filter device")]
pub struct Cli {
    /// Verbose logging (every line sent and received)
    #[arg(long, global = true, default_value_t = false)]
    pub debug: bool,
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Cmd {
    /// List available serial ports
    Ports,
    /// Send commands in wire form (e.g. "G,1" "W,500"), one after another
    Send(SendOpts),
    /// Reset the device
    Reset(SerialOpts),
    /// Upload a program file, optionally running it afterwards
    Upload(UploadOpts),
    /// Validate a program file and print its upload batch
    Check(CheckOpts),
    /// Servo calibration
    #[command(subcommand)]
    Calib(CalibCmd),
    /// Interactive console
    Repl(SerialOpts),
}

#[derive(Subcommand, Debug, Clone)]
pub enum CalibCmd {
    /// Print the calibration stored on the device
    Read(CalibReadOpts),
    /// Program and store a calibration file on the device
    Write(CalibWriteOpts),
}

#[derive(Args, Debug, Clone)]
pub struct SerialOpts {
    /// Serial device path
    #[arg(long, default_value = "/dev/ttyUSB0")]
    pub dev: String,
    /// Baud rate
    #[arg(long, default_value_t = 9600)]
    pub baud: u32,
    /// Give up on a silent device after this many milliseconds
    #[arg(long, default_value_t = 2000)]
    pub settle_ms: u64,
}

impl SerialOpts {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

#[derive(Args, Debug, Clone)]
pub struct SendOpts {
    #[command(flatten)]
    pub ser: SerialOpts,
    /// Command lines, newline optional
    #[arg(required = true)]
    pub lines: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct UploadOpts {
    #[command(flatten)]
    pub ser: SerialOpts,
    /// Program file (JSON: before / loop / after / loop_times)
    pub file: PathBuf,
    /// Run the program once it is stored
    #[arg(long, default_value_t = false)]
    pub execute: bool,
    /// How long to wait for a running program to finish, in seconds
    #[arg(long, default_value_t = 600)]
    pub run_timeout_s: u64,
}

#[derive(Args, Debug, Clone)]
pub struct CheckOpts {
    /// Program file
    pub file: PathBuf,
    /// Write the program back in canonical form to this path
    #[arg(long)]
    pub rewrite: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct CalibReadOpts {
    #[command(flatten)]
    pub ser: SerialOpts,
    /// Also write the table to this file
    #[arg(long)]
    pub save: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct CalibWriteOpts {
    #[command(flatten)]
    pub ser: SerialOpts,
    /// Calibration file (JSON: five [opened, closed] rows)
    pub file: PathBuf,
}
