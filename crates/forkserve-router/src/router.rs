//! The router: a cloneable handle in front of a single actor task that owns
//! every worker and every outstanding request.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use forkserve_peer::{Connection, HandshakeConfig, TransportHub};
use forkserve_protocol::{BuildProfile, BundleRequest, LogLevel, Message, Platform, TaskId};
use forkserve_transport::unique_socket_path;
use rand::Rng;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use crate::config::RouterConfig;
use crate::error::{BundleError, FileError};
use crate::event::RouterEvent;
use crate::fan_out::FanOut;
use crate::launcher::{LaunchSpec, WorkerLauncher};
use crate::outcome::{read_output, BundleResult, FileResult};
use crate::task_queue::{TaskError, TaskQueue};
use crate::worker::{BuildState, BuildWorker, BundleWaiter};

/// Handle to a running router. Cheap to clone; every clone talks to the
/// same workers.
///
/// The router stops (and kills its workers) when [`Router::terminate`] is
/// called or the last handle is dropped.
#[derive(Clone)]
pub struct Router {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<RouterEvent>,
}

impl Router {
    /// Start a router on the current tokio runtime.
    pub fn start(config: RouterConfig, launcher: impl WorkerLauncher) -> Self {
        let (commands, inbox) = mpsc::unbounded_channel();
        let (signals, signal_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        let core = RouterCore::new(config, Arc::new(launcher), events.clone(), signals);
        tokio::spawn(core.run(inbox, signal_rx));

        Self { commands, events }
    }

    /// Serve `request.filename` from the worker for `request.platform`,
    /// starting that worker and waiting for its build as needed.
    pub async fn request_bundle(&self, request: BundleRequest) -> BundleResult {
        let (reply, answer) = oneshot::channel();
        if self
            .commands
            .send(Command::RequestBundle { request, reply })
            .is_err()
        {
            return Err(BundleError::Terminated);
        }
        answer.await.unwrap_or(Err(BundleError::Terminated))
    }

    /// Ask every live worker for `filename`; the first one that has it wins.
    pub async fn request_file(&self, filename: impl Into<String>) -> FileResult {
        let (reply, answer) = oneshot::channel();
        let filename = filename.into();
        if self
            .commands
            .send(Command::RequestFile { filename, reply })
            .is_err()
        {
            return Err(FileError::Terminated);
        }
        answer.await.unwrap_or(Err(FileError::Terminated))
    }

    /// Kill every worker and resolve everything outstanding. Idempotent.
    pub async fn terminate(&self) {
        let (done, finished) = oneshot::channel();
        if self.commands.send(Command::Terminate { done }).is_ok() {
            let _ = finished.await;
        }
    }

    /// Subscribe to lifecycle and log events.
    pub fn subscribe(&self) -> broadcast::Receiver<RouterEvent> {
        self.events.subscribe()
    }
}

enum Command {
    RequestBundle {
        request: BundleRequest,
        reply: oneshot::Sender<BundleResult>,
    },
    RequestFile {
        filename: String,
        reply: oneshot::Sender<FileResult>,
    },
    Terminate {
        done: oneshot::Sender<()>,
    },
}

/// Events from worker I/O tasks and timers back into the actor.
pub(crate) enum Signal {
    Attached {
        platform: Platform,
        generation: u64,
        connection: Connection,
    },
    AttachFailed {
        platform: Platform,
        generation: u64,
        reason: String,
    },
    Inbound {
        platform: Platform,
        generation: u64,
        message: Message,
    },
    Disconnected {
        platform: Platform,
        generation: u64,
        reason: String,
    },
    Exited {
        platform: Platform,
        generation: u64,
        status: String,
    },
    Expired {
        task_id: TaskId,
    },
}

enum Pending {
    Bundle {
        platform: Platform,
        reply: oneshot::Sender<BundleResult>,
    },
    Lookup {
        filename: String,
        join: FanOut<oneshot::Sender<FileResult>>,
    },
}

/// How a worker leaves the table.
enum Retirement {
    Failed(String),
    Terminated,
}

struct RouterCore {
    config: RouterConfig,
    launcher: Arc<dyn WorkerLauncher>,
    events: broadcast::Sender<RouterEvent>,
    signals: mpsc::UnboundedSender<Signal>,
    workers: HashMap<Platform, BuildWorker>,
    tasks: TaskQueue<Pending>,
    hub: Option<TransportHub>,
    auth_token: String,
    next_generation: u64,
    terminated: bool,
}

impl RouterCore {
    fn new(
        config: RouterConfig,
        launcher: Arc<dyn WorkerLauncher>,
        events: broadcast::Sender<RouterEvent>,
        signals: mpsc::UnboundedSender<Signal>,
    ) -> Self {
        let token: [u8; 16] = rand::thread_rng().gen();
        let auth_token = token.iter().map(|b| format!("{b:02x}")).collect();
        Self {
            config,
            launcher,
            events,
            signals,
            workers: HashMap::new(),
            tasks: TaskQueue::new(),
            hub: None,
            auth_token,
            next_generation: 0,
            terminated: false,
        }
    }

    async fn run(
        mut self,
        mut inbox: mpsc::UnboundedReceiver<Command>,
        mut signals: mpsc::UnboundedReceiver<Signal>,
    ) {
        loop {
            tokio::select! {
                command = inbox.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(signal) = signals.recv() => self.handle_signal(signal),
            }
        }
        self.terminate();
        debug!("router stopped");
    }

    fn publish(&self, event: RouterEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::RequestBundle { reply, .. } if self.terminated => {
                let _ = reply.send(Err(BundleError::Terminated));
            }
            Command::RequestFile { reply, .. } if self.terminated => {
                let _ = reply.send(Err(FileError::Terminated));
            }
            Command::RequestBundle { request, reply } => self.request_bundle(request, reply),
            Command::RequestFile { filename, reply } => self.request_file(filename, reply),
            Command::Terminate { done } => {
                self.terminate();
                let _ = done.send(());
            }
        }
    }

    fn handle_signal(&mut self, signal: Signal) {
        match signal {
            Signal::Expired { task_id } => self.expire(task_id),
            Signal::Attached {
                platform,
                generation,
                connection,
            } => {
                let signals = self.signals.clone();
                let Some(worker) = self.current_worker(&platform, generation) else {
                    debug!(%platform, generation, "dropping connection of a retired worker");
                    return;
                };
                let worker_id = connection.worker_id().to_string();
                info!(%platform, %worker_id, generation, "build worker connected");
                worker.attach(connection, signals);
                self.publish(RouterEvent::WorkerAttached {
                    platform,
                    worker_id,
                    generation,
                });
            }
            Signal::AttachFailed {
                platform,
                generation,
                reason,
            } => {
                if self.current_worker(&platform, generation).is_some() {
                    error!(%platform, %reason, "build worker never connected");
                    self.publish(RouterEvent::TransportFault {
                        platform: platform.clone(),
                        reason: reason.clone(),
                    });
                    self.retire_worker(&platform, Retirement::Failed(reason));
                }
            }
            Signal::Disconnected {
                platform,
                generation,
                reason,
            } => {
                if self.current_worker(&platform, generation).is_some() {
                    warn!(%platform, %reason, "lost connection to build worker");
                    self.publish(RouterEvent::TransportFault {
                        platform: platform.clone(),
                        reason: reason.clone(),
                    });
                    self.retire_worker(&platform, Retirement::Failed(reason));
                }
            }
            Signal::Exited {
                platform,
                generation,
                status,
            } => {
                // Once attached, the dropped connection reports the loss.
                let unattached = self
                    .current_worker(&platform, generation)
                    .is_some_and(|worker| !worker.is_attached());
                if unattached {
                    let reason = format!("worker exited before connecting ({status})");
                    error!(%platform, %reason, "build worker died during startup");
                    self.publish(RouterEvent::TransportFault {
                        platform: platform.clone(),
                        reason: reason.clone(),
                    });
                    self.retire_worker(&platform, Retirement::Failed(reason));
                }
            }
            Signal::Inbound {
                platform,
                generation,
                message,
            } => {
                if self.current_worker(&platform, generation).is_some() {
                    self.handle_message(platform, message);
                } else {
                    debug!(
                        %platform,
                        generation,
                        kind = message.kind(),
                        "ignoring message from a retired worker"
                    );
                }
            }
        }
    }

    fn current_worker(&mut self, platform: &Platform, generation: u64) -> Option<&mut BuildWorker> {
        self.workers
            .get_mut(platform)
            .filter(|worker| worker.generation == generation)
    }

    fn request_bundle(&mut self, request: BundleRequest, reply: oneshot::Sender<BundleResult>) {
        let BundleRequest {
            platform,
            filename,
            options,
        } = request;

        let state = match self.workers.get(&platform) {
            Some(worker) if worker.profile.conflicts_with(&options) => {
                debug!(
                    %platform,
                    pinned = ?worker.profile,
                    requested = ?options,
                    "bundle options conflict"
                );
                let _ = reply.send(Err(BundleError::OptionConflict {
                    pinned: worker.profile,
                    requested: options,
                }));
                return;
            }
            Some(worker) => Some(worker.state),
            None => None,
        };

        match state {
            Some(BuildState::Idle) => self.lookup_bundle(&platform, filename, reply),
            Some(BuildState::Building) => self.park(&platform, filename, reply),
            None => {
                let profile = self.config.default_profile.apply(&options);
                match self.spawn_worker(&platform, profile) {
                    Ok(()) => self.park(&platform, filename, reply),
                    Err(err) => {
                        let _ = reply.send(Err(err));
                    }
                }
            }
        }
    }

    fn park(
        &mut self,
        platform: &Platform,
        filename: String,
        reply: oneshot::Sender<BundleResult>,
    ) {
        if let Some(worker) = self.workers.get_mut(platform) {
            trace!(%platform, %filename, "waiting for build to finish");
            worker.waiters.push(BundleWaiter { filename, reply });
        }
    }

    fn lookup_bundle(
        &mut self,
        platform: &Platform,
        filename: String,
        reply: oneshot::Sender<BundleResult>,
    ) {
        let Some(worker) = self.workers.get_mut(platform) else {
            let _ = reply.send(Err(BundleError::BuildFailed {
                message: format!("no build worker for {platform}"),
            }));
            return;
        };
        let task_id = self.tasks.add(Pending::Bundle {
            platform: platform.clone(),
            reply,
        });
        worker.inflight.insert(task_id);
        worker.send(Message::RequestFile { filename, task_id });
        self.arm_deadline(task_id);
    }

    fn request_file(&mut self, filename: String, reply: oneshot::Sender<FileResult>) {
        if self.workers.is_empty() {
            let _ = reply.send(Err(FileError::NotFound));
            return;
        }

        let task_id = self.tasks.add(Pending::Lookup {
            filename: filename.clone(),
            join: FanOut::new(self.workers.len(), reply),
        });
        for worker in self.workers.values_mut() {
            worker.inflight.insert(task_id);
            worker.send(Message::RequestFile {
                filename: filename.clone(),
                task_id,
            });
        }
        debug!(%filename, %task_id, workers = self.workers.len(), "fanned out file lookup");
        self.arm_deadline(task_id);
    }

    fn arm_deadline(&self, task_id: TaskId) {
        let signals = self.signals.clone();
        let deadline = self.config.lookup_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            let _ = signals.send(Signal::Expired { task_id });
        });
    }

    fn expire(&mut self, task_id: TaskId) {
        for worker in self.workers.values_mut() {
            worker.inflight.remove(&task_id);
        }
        match self.tasks.pop(task_id) {
            Ok(Pending::Bundle { platform, reply }) => {
                warn!(%platform, %task_id, "bundle lookup timed out");
                let _ = reply.send(Err(BundleError::TimedOut));
            }
            Ok(Pending::Lookup { filename, mut join }) => {
                let unanswered = join.remaining();
                if let Some(reply) = join.expire() {
                    warn!(%filename, %task_id, unanswered, "file lookup timed out");
                    let _ = reply.send(Err(FileError::TimedOut { unanswered }));
                }
            }
            // Resolved before the deadline.
            Err(_) => {}
        }
    }

    fn handle_message(&mut self, platform: Platform, message: Message) {
        match message {
            Message::BuildStart => {
                if let Some(worker) = self.workers.get_mut(&platform) {
                    worker.state = BuildState::Building;
                }
                info!(%platform, "build started");
                self.publish(RouterEvent::BuildStarted { platform });
            }
            Message::BuildProgress { progress } => {
                trace!(%platform, progress, "build progress");
                self.publish(RouterEvent::BuildProgress { platform, progress });
            }
            Message::BuildFinished { errors } => self.finish_build(platform, errors),
            Message::BuildFailed { message } => {
                error!(%platform, %message, "build worker failed");
                self.publish(RouterEvent::BuildFailed {
                    platform: platform.clone(),
                    message: message.clone(),
                });
                self.retire_worker(&platform, Retirement::Failed(message));
            }
            Message::Log { message, level } => {
                match level {
                    LogLevel::Error => error!(%platform, "{message}"),
                    LogLevel::Warn => warn!(%platform, "{message}"),
                    LogLevel::Info => info!(%platform, "{message}"),
                    LogLevel::Debug => debug!(%platform, "{message}"),
                    LogLevel::Trace => trace!(%platform, "{message}"),
                }
                self.publish(RouterEvent::Log {
                    platform,
                    level,
                    message,
                });
            }
            Message::FileReceived {
                task_id,
                file_path,
                mime_type,
            } => self.file_received(&platform, task_id, PathBuf::from(file_path), mime_type),
            Message::FileNotFound { task_id } => self.file_not_found(&platform, task_id),
            other @ (Message::RequestBundle(_) | Message::RequestFile { .. }) => {
                warn!(
                    %platform,
                    kind = other.kind(),
                    "worker sent a router-bound message; dropping it"
                );
            }
        }
    }

    fn finish_build(&mut self, platform: Platform, errors: Vec<String>) {
        let Some(worker) = self.workers.get_mut(&platform) else {
            return;
        };
        let waiters = std::mem::take(&mut worker.waiters);
        if errors.is_empty() {
            worker.state = BuildState::Idle;
            info!(%platform, waiting = waiters.len(), "build finished");
        } else {
            worker.state = BuildState::Building;
            warn!(%platform, errors = errors.len(), "build finished with errors");
        }

        self.publish(RouterEvent::BuildFinished {
            platform: platform.clone(),
            errors: errors.clone(),
        });

        for waiter in waiters {
            if errors.is_empty() {
                self.lookup_bundle(&platform, waiter.filename, waiter.reply);
            } else {
                let _ = waiter.reply.send(Err(BundleError::Compile {
                    errors: errors.clone(),
                }));
            }
        }
    }

    /// Accept an answer only from a worker that was asked. Anything else is
    /// logged and dropped.
    fn claim(&mut self, platform: &Platform, task_id: TaskId) -> bool {
        let asked = self
            .workers
            .get_mut(platform)
            .is_some_and(|worker| worker.inflight.remove(&task_id));
        if asked {
            return true;
        }
        match self.tasks.get_mut(task_id) {
            Ok(_) => error!(
                %platform,
                %task_id,
                "worker answered a task it was not asked about; dropping"
            ),
            Err(err) => self.report_task_error(platform, err),
        }
        false
    }

    fn report_task_error(&self, platform: &Platform, err: TaskError) {
        match err {
            TaskError::Retired(task_id) => {
                debug!(%platform, %task_id, "late answer for a resolved task")
            }
            TaskError::NeverIssued(task_id) => {
                error!(
                    %platform,
                    %task_id,
                    "worker answered a task that was never issued; dropping"
                )
            }
        }
    }

    fn file_received(
        &mut self,
        platform: &Platform,
        task_id: TaskId,
        path: PathBuf,
        mime_type: String,
    ) {
        if !self.claim(platform, task_id) {
            return;
        }
        let pending = match self.tasks.get_mut(task_id) {
            Ok(pending) => pending,
            Err(err) => return self.report_task_error(platform, err),
        };
        match pending {
            Pending::Bundle { .. } => {
                if let Ok(Pending::Bundle { reply, .. }) = self.tasks.pop(task_id) {
                    tokio::spawn(async move {
                        let result = read_output(path, mime_type)
                            .await
                            .map_err(|(path, message)| BundleError::Read { path, message });
                        let _ = reply.send(result);
                    });
                }
            }
            Pending::Lookup { filename, join } => {
                let responder = join.hit();
                debug!(%platform, %filename, %task_id, first = responder.is_some(), "file found");
                if join.is_complete() {
                    let _ = self.tasks.pop(task_id);
                }
                if let Some(reply) = responder {
                    tokio::spawn(async move {
                        let result = read_output(path, mime_type)
                            .await
                            .map_err(|(path, message)| FileError::Read { path, message });
                        let _ = reply.send(result);
                    });
                }
            }
        }
    }

    fn file_not_found(&mut self, platform: &Platform, task_id: TaskId) {
        if !self.claim(platform, task_id) {
            return;
        }
        self.count_miss(task_id, FileError::NotFound, BundleError::NotFound);
    }

    /// Resolve one worker's share of a task negatively.
    fn count_miss(&mut self, task_id: TaskId, lookup_error: FileError, bundle_error: BundleError) {
        let is_bundle = match self.tasks.get_mut(task_id) {
            Ok(Pending::Bundle { .. }) => true,
            Ok(Pending::Lookup { join, .. }) => {
                if let Some(reply) = join.miss() {
                    let _ = reply.send(Err(lookup_error));
                }
                if join.is_complete() {
                    let _ = self.tasks.pop(task_id);
                }
                false
            }
            Err(_) => return,
        };
        if is_bundle {
            if let Ok(Pending::Bundle { reply, .. }) = self.tasks.pop(task_id) {
                let _ = reply.send(Err(bundle_error));
            }
        }
    }

    fn ensure_hub(&mut self) -> Result<(), BundleError> {
        if self.hub.is_some() {
            return Ok(());
        }
        let path = unique_socket_path(&self.config.socket_dir);
        let handshake = HandshakeConfig {
            auth_token: Some(self.auth_token.clone()),
            ..self.config.handshake.clone()
        };
        match TransportHub::bind(&path, handshake) {
            Ok(hub) => {
                self.hub = Some(hub);
                Ok(())
            }
            Err(err) => {
                let message = err.to_string();
                error!(path = ?path, %message, "failed to open worker socket");
                self.publish(RouterEvent::Fatal {
                    message: message.clone(),
                });
                Err(BundleError::Transport(message))
            }
        }
    }

    fn spawn_worker(
        &mut self,
        platform: &Platform,
        profile: BuildProfile,
    ) -> Result<(), BundleError> {
        self.ensure_hub()?;
        let Some(hub) = self.hub.as_ref() else {
            return Err(BundleError::Transport("worker socket unavailable".to_string()));
        };

        self.next_generation += 1;
        let generation = self.next_generation;
        let attached = hub.expect(platform);
        let spec = LaunchSpec {
            platform: platform.clone(),
            socket_path: hub.path().to_path_buf(),
            auth_token: self.auth_token.clone(),
            profile,
        };

        let mut process = match self.launcher.launch(&spec) {
            Ok(process) => process,
            Err(err) => {
                hub.forget(platform);
                let message = err.to_string();
                error!(%platform, %message, "failed to launch build worker");
                self.publish(RouterEvent::BuildFailed {
                    platform: platform.clone(),
                    message: message.clone(),
                });
                self.release_hub_if_idle();
                return Err(BundleError::BuildFailed { message });
            }
        };

        let signals = self.signals.clone();
        let attach_timeout = self.config.attach_timeout;
        let waiting_for = platform.clone();
        tokio::spawn(async move {
            let signal = match tokio::time::timeout(attach_timeout, attached).await {
                Ok(Ok(connection)) => Signal::Attached {
                    platform: waiting_for,
                    generation,
                    connection,
                },
                Ok(Err(_)) => Signal::AttachFailed {
                    platform: waiting_for,
                    generation,
                    reason: "worker socket closed before the worker connected".to_string(),
                },
                Err(_) => Signal::AttachFailed {
                    platform: waiting_for,
                    generation,
                    reason: format!("worker did not connect within {attach_timeout:?}"),
                },
            };
            let _ = signals.send(signal);
        });

        if let Some(exit) = process.take_exit() {
            let signals = self.signals.clone();
            let platform = platform.clone();
            tokio::spawn(async move {
                if let Ok(status) = exit.await {
                    let _ = signals.send(Signal::Exited {
                        platform,
                        generation,
                        status,
                    });
                }
            });
        }

        let worker = BuildWorker::new(platform.clone(), generation, profile, process);
        let pid = worker.pid();
        info!(%platform, ?pid, generation, ?profile, "build worker spawned");
        self.workers.insert(platform.clone(), worker);
        self.publish(RouterEvent::WorkerSpawned {
            platform: platform.clone(),
            pid,
            generation,
        });
        Ok(())
    }

    /// Remove a worker, kill it, and settle everything that depended on it.
    /// The next bundle request for the platform spawns a fresh worker.
    fn retire_worker(&mut self, platform: &Platform, cause: Retirement) {
        let Some(mut worker) = self.workers.remove(platform) else {
            return;
        };
        let was_attached = worker.is_attached();
        worker.terminate();
        if let Some(hub) = &self.hub {
            hub.forget(platform);
        }

        let (bundle_error, lookup_error) = match cause {
            Retirement::Failed(message) => {
                (BundleError::BuildFailed { message }, FileError::NotFound)
            }
            Retirement::Terminated => (BundleError::Terminated, FileError::Terminated),
        };
        for waiter in worker.waiters.drain(..) {
            let _ = waiter.reply.send(Err(bundle_error.clone()));
        }
        // A worker that went away counts as a miss for lookups it was asked.
        let inflight: Vec<TaskId> = worker.inflight.drain().collect();
        for task_id in inflight {
            self.count_miss(task_id, lookup_error.clone(), bundle_error.clone());
        }

        info!(%platform, was_attached, "build worker stopped");
        self.publish(RouterEvent::WorkerStopped {
            platform: platform.clone(),
        });
        self.release_hub_if_idle();
    }

    fn release_hub_if_idle(&mut self) {
        if self.workers.is_empty() {
            if let Some(hub) = self.hub.take() {
                hub.shutdown();
            }
        }
    }

    fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;

        for (_, pending) in self.tasks.drain() {
            match pending {
                Pending::Bundle { reply, .. } => {
                    let _ = reply.send(Err(BundleError::Terminated));
                }
                Pending::Lookup { mut join, .. } => {
                    if let Some(reply) = join.expire() {
                        let _ = reply.send(Err(FileError::Terminated));
                    }
                }
            }
        }

        let platforms: Vec<Platform> = self.workers.keys().cloned().collect();
        for platform in platforms {
            self.retire_worker(&platform, Retirement::Terminated);
        }
        if let Some(hub) = self.hub.take() {
            hub.shutdown();
        }
        info!("router terminated");
    }
}
