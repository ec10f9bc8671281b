//! A pipeline that serves a directory of prebuilt output.
//!
//! An optional shell command produces the output; an optional source watch
//! reruns it whenever something under the watched directory changes.

use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use forkserve_protocol::LogLevel;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::mime::content_type_for;
use crate::pipeline::{BuildContext, BuildEvents, BuildPipeline, OutputFile};

/// `"true"`/`"false"`: whether the pinned profile is a dev build.
pub const DEV_ENV: &str = "FORKSERVE_DEV";
/// `"true"`/`"false"`: whether the pinned profile minifies.
pub const MINIFY_ENV: &str = "FORKSERVE_MINIFY";

const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

/// Serves files from `root`, preferring `root/<platform>/` over `root/`.
pub struct DirectoryPipeline {
    builder: ShellBuild,
    watch: Option<PathBuf>,
    debounce: Duration,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

#[derive(Debug, Clone)]
struct ShellBuild {
    root: PathBuf,
    command: Option<String>,
}

impl DirectoryPipeline {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            builder: ShellBuild {
                root: root.into(),
                command: None,
            },
            watch: None,
            debounce: DEFAULT_DEBOUNCE,
            watcher: Mutex::new(None),
        }
    }

    /// Shell command (run with `sh -c`) that writes the output under root.
    pub fn build_command(mut self, command: impl Into<String>) -> Self {
        self.builder.command = Some(command.into());
        self
    }

    /// Rebuild when anything under `dir` changes. Changes inside the
    /// output root are ignored.
    pub fn watch(mut self, dir: impl Into<PathBuf>) -> Self {
        self.watch = Some(dir.into());
        self
    }

    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    fn install_watcher(
        &self,
        dir: &Path,
        context: &BuildContext,
        events: &BuildEvents,
    ) -> Result<(), PipelineError> {
        let builder = self.builder.clone();
        let context = context.clone();
        let events = events.clone();
        let debounce = self.debounce;
        let root = std::path::absolute(&builder.root).unwrap_or_else(|_| builder.root.clone());
        let mut last_build: Option<Instant> = None;

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(err) => {
                    warn!(error = %err, "source watch error");
                    return;
                }
            };
            if !matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
            ) {
                return;
            }
            if event.paths.iter().all(|path| path.starts_with(&root)) {
                return;
            }

            let now = Instant::now();
            if let Some(last) = last_build {
                if now.duration_since(last) < debounce {
                    return;
                }
            }
            last_build = Some(now);

            debug!(paths = ?event.paths, "sources changed, rebuilding");
            if let Err(err) = builder.run(&context, &events) {
                warn!(error = %err, "rebuild failed");
                let _ = events.failed(err.to_string());
            }
        })
        .map_err(|source| PipelineError::Watch {
            path: dir.to_path_buf(),
            source,
        })?;

        watcher
            .watch(dir, RecursiveMode::Recursive)
            .map_err(|source| PipelineError::Watch {
                path: dir.to_path_buf(),
                source,
            })?;

        info!(dir = %dir.display(), "watching sources");
        *self.watcher.lock().unwrap_or_else(|p| p.into_inner()) = Some(watcher);
        Ok(())
    }
}

impl ShellBuild {
    fn run(&self, context: &BuildContext, events: &BuildEvents) -> Result<(), PipelineError> {
        events.start()?;

        let errors = match &self.command {
            None => Vec::new(),
            Some(command) => self.run_command(command, context, events)?,
        };

        if errors.is_empty() {
            events.progress(1.0)?;
        }
        events.finished(errors)
    }

    fn run_command(
        &self,
        command: &str,
        context: &BuildContext,
        events: &BuildEvents,
    ) -> Result<Vec<String>, PipelineError> {
        let mut shell = Command::new("sh");
        shell
            .arg("-c")
            .arg(command)
            .env(forkserve_protocol::env::PLATFORM, context.platform.as_str())
            .env(DEV_ENV, context.profile.dev.to_string())
            .env(MINIFY_ENV, context.profile.minify.to_string());

        debug!(%command, platform = %context.platform, "running build command");
        let output = shell.output().map_err(|source| PipelineError::Command {
            command: command.to_string(),
            source,
        })?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            if !line.trim().is_empty() {
                events.log(LogLevel::Info, line)?;
            }
        }

        if output.status.success() {
            return Ok(Vec::new());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.is_empty() {
            Ok(vec![format!("build command exited with {}", output.status)])
        } else {
            Ok(vec![stderr])
        }
    }
}

impl BuildPipeline for DirectoryPipeline {
    fn start(&self, context: &BuildContext, events: BuildEvents) -> Result<(), PipelineError> {
        self.builder.run(context, &events)?;
        if let Some(dir) = &self.watch {
            self.install_watcher(dir, context, &events)?;
        }
        Ok(())
    }

    fn lookup(&self, context: &BuildContext, relative_path: &str) -> Option<OutputFile> {
        let relative = sanitize(relative_path)?;
        let root = &self.builder.root;

        [
            root.join(context.platform.as_str()).join(&relative),
            root.join(&relative),
        ]
        .into_iter()
        .find(|candidate| candidate.is_file())
        .map(|path| {
            let path = std::path::absolute(&path).unwrap_or(path);
            OutputFile {
                mime_type: content_type_for(&path).to_string(),
                path,
            }
        })
    }
}

/// Relative path with only normal components, or `None` if the request
/// tries to leave the root.
fn sanitize(requested: &str) -> Option<PathBuf> {
    let trimmed = requested.trim_start_matches('/');
    let mut clean = PathBuf::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if clean.as_os_str().is_empty() {
        None
    } else {
        Some(clean)
    }
}
