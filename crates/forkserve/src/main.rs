mod cmd;
mod exit;
mod http;
mod logging;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel, LogSettings};

#[derive(Parser, Debug)]
#[command(name = "forkserve", version, about = "Development bundle server")]
struct Cli {
    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr). FORKSERVE_LOG overrides it.
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    let logging = LogSettings {
        format: cli.log_format,
        level: cli.log_level,
    };
    init_logging(logging);

    match cmd::run(cli.command, logging) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}
