//! Starting worker processes.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;

use forkserve_protocol::{env, BuildProfile, Platform};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::LaunchError;

/// Everything a worker needs to find its way back to the router.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub platform: Platform,
    pub socket_path: PathBuf,
    pub auth_token: String,
    pub profile: BuildProfile,
}

impl LaunchSpec {
    /// Environment variables that carry this spec into the worker process.
    pub fn env(&self) -> Result<Vec<(&'static str, String)>, LaunchError> {
        let profile = serde_json::to_string(&self.profile).map_err(|err| LaunchError::Prepare {
            platform: self.platform.clone(),
            reason: err.to_string(),
        })?;
        Ok(vec![
            (env::PLATFORM, self.platform.to_string()),
            (env::SOCKET, self.socket_path.display().to_string()),
            (env::TOKEN, self.auth_token.clone()),
            (env::PROFILE, profile),
        ])
    }
}

/// A running worker, as far as the router is concerned.
pub trait WorkerProcess: Send {
    fn pid(&self) -> Option<u32>;

    /// Stop the worker. Must not block; safe to call more than once.
    fn kill(&mut self);

    /// Resolves with a description of the exit status once the worker exits
    /// on its own. Yields a receiver at most once; a killed worker never
    /// reports.
    fn take_exit(&mut self) -> Option<oneshot::Receiver<String>> {
        None
    }
}

/// Starts one worker per platform on demand.
pub trait WorkerLauncher: Send + Sync + 'static {
    fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn WorkerProcess>, LaunchError>;
}

/// Launches workers as child processes of the router.
///
/// The child's stdout and stderr are forwarded line by line into the
/// router's log.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn WorkerProcess>, LaunchError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(spec.env()?)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| LaunchError::Spawn {
            platform: spec.platform.clone(),
            source,
        })?;
        let pid = child.id();
        info!(platform = %spec.platform, ?pid, program = ?self.program, "spawned build worker");

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, spec.platform.clone(), false));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, spec.platform.clone(), true));
        }

        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        let platform = spec.platform.clone();
        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    let status = match status {
                        Ok(status) if status.success() => {
                            debug!(%platform, "build worker exited");
                            status.to_string()
                        }
                        Ok(status) => {
                            warn!(%platform, %status, "build worker exited");
                            status.to_string()
                        }
                        Err(err) => {
                            warn!(%platform, error = %err, "failed to wait for build worker");
                            err.to_string()
                        }
                    };
                    let _ = exit_tx.send(status);
                }
                _ = kill_rx => {
                    if let Err(err) = child.kill().await {
                        debug!(%platform, error = %err, "build worker already gone");
                    }
                }
            }
        });

        Ok(Box::new(ChildProcess {
            pid,
            kill: Some(kill_tx),
            exit: Some(exit_rx),
        }))
    }
}

struct ChildProcess {
    pid: Option<u32>,
    kill: Option<oneshot::Sender<()>>,
    exit: Option<oneshot::Receiver<String>>,
}

impl WorkerProcess for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn kill(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }

    fn take_exit(&mut self) -> Option<oneshot::Receiver<String>> {
        self.exit.take()
    }
}

async fn forward_lines<R: AsyncRead + Unpin>(stream: R, platform: Platform, stderr: bool) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if stderr => warn!(%platform, "{line}"),
            Ok(Some(line)) => info!(%platform, "{line}"),
            Ok(None) => break,
            Err(err) => {
                debug!(%platform, error = %err, "stopped forwarding worker output");
                break;
            }
        }
    }
}
