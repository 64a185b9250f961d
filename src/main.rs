use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod calibration;
mod cli;
mod dialogue;
mod port;
mod program;
mod proto;
mod repl;
mod session;
mod transport;

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    init_logging(args.debug);
    match args.cmd {
        cli::Cmd::Ports => session::run_ports(),
        cli::Cmd::Send(opts) => session::run_send(opts),
        cli::Cmd::Reset(opts) => session::run_reset(opts),
        cli::Cmd::Upload(opts) => session::run_upload(opts),
        cli::Cmd::Check(opts) => session::run_check(opts),
        cli::Cmd::Calib(cli::CalibCmd::Read(opts)) => session::run_calib_read(opts),
        cli::Cmd::Calib(cli::CalibCmd::Write(opts)) => session::run_calib_write(opts),
        cli::Cmd::Repl(opts) => repl::run(opts),
    }
}
