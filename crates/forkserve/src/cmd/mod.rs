use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};

use crate::exit::CliResult;
use crate::logging::LogSettings;

pub mod serve;
pub mod version;
pub mod worker;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve bundles over HTTP, launching one build worker per platform.
    Serve(ServeArgs),
    /// Run a build worker. Launched by `serve`; not meant to be run by hand.
    Worker(WorkerArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, logging: LogSettings) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, logging),
        Command::Worker(args) => worker::run(args),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on.
    #[arg(long, env = "FORKSERVE_HOST", default_value = "127.0.0.1")]
    pub host: String,
    /// Port to listen on.
    #[arg(long, short = 'p', env = "FORKSERVE_PORT", default_value = "8081")]
    pub port: u16,
    /// Directory holding build output.
    #[arg(long, env = "FORKSERVE_ROOT", default_value = "dist")]
    pub root: PathBuf,
    /// Shell command each worker runs to produce its output.
    #[arg(long, env = "FORKSERVE_BUILD_CMD")]
    pub build_cmd: Option<String>,
    /// Rebuild when files under this directory change.
    #[arg(long, value_name = "DIR")]
    pub watch: Option<PathBuf>,
    /// Platforms accepted in bundle requests (comma-separated).
    #[arg(long, value_delimiter = ',', default_value = "ios,android")]
    pub platforms: Vec<String>,
    /// Platforms to start building immediately (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub eager: Vec<String>,
    /// Build production bundles unless a request asks otherwise.
    #[arg(long)]
    pub release: bool,
    /// Minify bundles unless a request asks otherwise.
    #[arg(long)]
    pub minify: bool,
    /// Directory for the worker socket.
    #[arg(long, value_name = "DIR")]
    pub socket_dir: Option<PathBuf>,
    /// How long a launched worker may take to connect (e.g. 30s, 500ms).
    #[arg(long, default_value = "30s", value_parser = parse_duration)]
    pub attach_timeout: Duration,
    /// How long a worker may take to answer a lookup.
    #[arg(long, default_value = "30s", value_parser = parse_duration)]
    pub lookup_timeout: Duration,
}

#[derive(Args, Debug)]
pub struct WorkerArgs {
    /// Directory holding build output.
    #[arg(long, default_value = "dist")]
    pub root: PathBuf,
    /// Shell command that produces the output.
    #[arg(long)]
    pub build_cmd: Option<String>,
    /// Rebuild when files under this directory change.
    #[arg(long, value_name = "DIR")]
    pub watch: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("duration must not be empty".to_string());
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| format!("invalid duration value: {input}"))?;
    if value == 0 {
        return Err("duration must be greater than zero".to_string());
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
