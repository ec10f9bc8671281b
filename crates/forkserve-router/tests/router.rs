#![cfg(unix)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use forkserve_protocol::{LogLevel, Message, TaskId};
use forkserve_router::{
    BuildOptions, BuildProfile, BundleError, BundleRequest, FileError, LaunchError, LaunchSpec,
    ProcessLauncher, Router, RouterConfig, RouterEvent, WorkerLauncher, WorkerProcess,
};
use forkserve_worker::{
    run_worker, BuildContext, BuildEvents, BuildPipeline, DirectoryPipeline, OutputFile,
    PipelineError, WorkerSettings,
};
use tokio::sync::broadcast;

/// Pipeline with a configurable build outcome, serving files from `root`.
#[derive(Clone)]
struct Script {
    root: PathBuf,
    broken: Option<&'static str>,
    build_delay: Duration,
    slow_assets: Option<Duration>,
    starts: Arc<AtomicUsize>,
}

impl Script {
    fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            broken: None,
            build_delay: Duration::ZERO,
            slow_assets: None,
            starts: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl BuildPipeline for Script {
    fn start(&self, context: &BuildContext, events: BuildEvents) -> Result<(), PipelineError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        events.start()?;
        events.log(LogLevel::Info, format!("bundling for {}", context.platform))?;
        thread::sleep(self.build_delay);
        events.progress(1.0)?;
        if self.broken == Some(context.platform.as_str()) {
            events.finished(vec!["SyntaxError: unexpected token".to_string()])
        } else {
            events.finished(Vec::new())
        }
    }

    fn lookup(&self, context: &BuildContext, relative_path: &str) -> Option<OutputFile> {
        if let Some(delay) = self.slow_assets {
            if !relative_path.ends_with(".bundle") {
                thread::sleep(delay);
            }
        }
        DirectoryPipeline::new(&self.root).lookup(context, relative_path)
    }
}

type Body = Arc<dyn Fn(WorkerSettings) + Send + Sync>;

/// Runs each worker on a thread of the test process.
struct ThreadLauncher {
    body: Body,
    launches: Arc<Mutex<Vec<String>>>,
}

impl ThreadLauncher {
    fn new(body: impl Fn(WorkerSettings) + Send + Sync + 'static) -> Self {
        Self {
            body: Arc::new(body),
            launches: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn serving(pipeline: Script) -> Self {
        Self::new(move |settings| {
            let _ = run_worker(settings, pipeline.clone());
        })
    }

    fn launches(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.launches)
    }
}

struct ThreadWorker;

impl WorkerProcess for ThreadWorker {
    fn pid(&self) -> Option<u32> {
        None
    }

    fn kill(&mut self) {}
}

impl WorkerLauncher for ThreadLauncher {
    fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn WorkerProcess>, LaunchError> {
        self.launches.lock().unwrap().push(spec.platform.to_string());
        let settings = WorkerSettings {
            platform: spec.platform.clone(),
            socket_path: spec.socket_path.clone(),
            auth_token: spec.auth_token.clone(),
            profile: spec.profile,
        };
        let body = Arc::clone(&self.body);
        thread::spawn(move || body(settings));
        Ok(Box::new(ThreadWorker))
    }
}

struct BrokenLauncher {
    attempts: Arc<AtomicUsize>,
}

impl WorkerLauncher for BrokenLauncher {
    fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn WorkerProcess>, LaunchError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(LaunchError::Spawn {
            platform: spec.platform.clone(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such bundler"),
        })
    }
}

/// Worker speaking the wire protocol directly: sends `opening` once
/// connected, then answers each `REQUEST_FILE` with the messages `answer`
/// returns. `None` hangs up.
fn raw_worker(
    settings: WorkerSettings,
    opening: Vec<Message>,
    answer: impl Fn(&str, TaskId) -> Option<Vec<Message>>,
) {
    let mut link = forkserve_peer::connect(
        &settings.socket_path,
        &settings.platform,
        &settings.handshake_config(),
    )
    .unwrap();
    for message in &opening {
        link.send(message).unwrap();
    }

    while let Ok(message) = link.recv() {
        if let Message::RequestFile { filename, task_id } = message {
            let Some(replies) = answer(&filename, task_id) else {
                return;
            };
            for reply in &replies {
                if link.send(reply).is_err() {
                    return;
                }
            }
        }
    }
}

/// A build that finishes cleanly right away.
fn built() -> Vec<Message> {
    vec![
        Message::BuildStart,
        Message::BuildFinished { errors: Vec::new() },
    ]
}

fn received(task_id: TaskId, path: &Path, mime_type: &str) -> Message {
    Message::FileReceived {
        task_id,
        file_path: path.display().to_string(),
        mime_type: mime_type.to_string(),
    }
}

fn config(sockets: &Path) -> RouterConfig {
    RouterConfig {
        socket_dir: sockets.to_path_buf(),
        attach_timeout: Duration::from_secs(10),
        lookup_timeout: Duration::from_secs(10),
        ..RouterConfig::default()
    }
}

fn output_tree() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    std::fs::create_dir_all(root.join("ios")).unwrap();
    std::fs::create_dir_all(root.join("android")).unwrap();
    std::fs::create_dir_all(root.join("assets")).unwrap();
    std::fs::write(root.join("ios/index.ios.bundle"), "ios bundle").unwrap();
    std::fs::write(root.join("android/index.android.bundle"), "android bundle").unwrap();
    std::fs::write(root.join("android/only-android.png"), "android png").unwrap();
    std::fs::write(root.join("assets/icon.png"), "shared png").unwrap();
    dir
}

fn bundle(platform: &str) -> BundleRequest {
    BundleRequest {
        platform: platform.parse().unwrap(),
        filename: format!("index.{platform}.bundle"),
        options: BuildOptions::default(),
    }
}

async fn wait_for(
    events: &mut broadcast::Receiver<RouterEvent>,
    wanted: impl Fn(&RouterEvent) -> bool,
) -> RouterEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if wanted(&event) => return event,
                Ok(_) => continue,
                Err(err) => panic!("event stream ended: {err}"),
            }
        }
    })
    .await
    .expect("event should be published")
}

fn drain(events: &mut broadcast::Receiver<RouterEvent>) -> Vec<RouterEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bundle_is_served_after_build() {
    let out = output_tree();
    let sockets = tempfile::tempdir().unwrap();
    let launcher = ThreadLauncher::serving(Script::new(out.path()));
    let router = Router::start(config(sockets.path()), launcher);

    let served = router.request_bundle(bundle("ios")).await.unwrap();
    assert_eq!(served.content.as_ref(), b"ios bundle");
    assert_eq!(served.mime_type, "application/javascript");

    router.terminate().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn compile_errors_are_data() {
    let out = output_tree();
    let sockets = tempfile::tempdir().unwrap();
    let mut script = Script::new(out.path());
    script.broken = Some("ios");
    let router = Router::start(config(sockets.path()), ThreadLauncher::serving(script));

    let err = router.request_bundle(bundle("ios")).await.unwrap_err();
    assert_eq!(
        err,
        BundleError::Compile {
            errors: vec!["SyntaxError: unexpected token".to_string()]
        }
    );

    router.terminate().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_requests_share_one_worker_and_build() {
    let out = output_tree();
    let sockets = tempfile::tempdir().unwrap();
    let mut script = Script::new(out.path());
    script.build_delay = Duration::from_millis(200);
    let starts = Arc::clone(&script.starts);
    let launcher = ThreadLauncher::serving(script);
    let launches = launcher.launches();
    let router = Router::start(config(sockets.path()), launcher);

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let router = router.clone();
            tokio::spawn(async move { router.request_bundle(bundle("ios")).await })
        })
        .collect();
    for handle in handles {
        let served = handle.await.unwrap().unwrap();
        assert_eq!(served.content.as_ref(), b"ios bundle");
    }

    assert_eq!(*launches.lock().unwrap(), vec!["ios".to_string()]);
    assert_eq!(starts.load(Ordering::SeqCst), 1);

    router.terminate().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn conflicting_options_do_not_rebuild() {
    let out = output_tree();
    let sockets = tempfile::tempdir().unwrap();
    let script = Script::new(out.path());
    let starts = Arc::clone(&script.starts);
    let launcher = ThreadLauncher::serving(script);
    let launches = launcher.launches();
    let router = Router::start(config(sockets.path()), launcher);

    let mut first = bundle("ios");
    first.options = BuildOptions {
        dev: Some(true),
        minify: Some(false),
    };
    router.request_bundle(first).await.unwrap();

    let mut second = bundle("ios");
    second.options = BuildOptions {
        dev: Some(false),
        minify: Some(false),
    };
    let err = router.request_bundle(second).await.unwrap_err();
    assert_eq!(
        err,
        BundleError::OptionConflict {
            pinned: BuildProfile {
                dev: true,
                minify: false
            },
            requested: BuildOptions {
                dev: Some(false),
                minify: Some(false)
            },
        }
    );

    // Same options as pinned, spelled differently, are fine.
    let mut third = bundle("ios");
    third.options = BuildOptions {
        dev: Some(true),
        minify: None,
    };
    router.request_bundle(third).await.unwrap();

    assert_eq!(launches.lock().unwrap().len(), 1);
    assert_eq!(starts.load(Ordering::SeqCst), 1);

    router.terminate().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn platforms_are_isolated() {
    let out = output_tree();
    let sockets = tempfile::tempdir().unwrap();
    let mut script = Script::new(out.path());
    script.broken = Some("ios");
    let launcher = ThreadLauncher::serving(script);
    let launches = launcher.launches();
    let router = Router::start(config(sockets.path()), launcher);

    let (ios, android) = tokio::join!(
        router.request_bundle(bundle("ios")),
        router.request_bundle(bundle("android"))
    );
    assert!(matches!(ios, Err(BundleError::Compile { .. })));
    assert_eq!(android.unwrap().content.as_ref(), b"android bundle");

    let launched: HashSet<String> = launches.lock().unwrap().iter().cloned().collect();
    assert_eq!(
        launched,
        HashSet::from(["ios".to_string(), "android".to_string()])
    );

    router.terminate().await;
}

#[tokio::test]
async fn file_request_without_workers_is_not_found() {
    let sockets = tempfile::tempdir().unwrap();
    let launcher = ThreadLauncher::new(|_| {});
    let launches = launcher.launches();
    let router = Router::start(config(sockets.path()), launcher);

    assert_eq!(
        router.request_file("assets/icon.png").await.unwrap_err(),
        FileError::NotFound
    );
    assert!(launches.lock().unwrap().is_empty());

    router.terminate().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn file_lookup_fans_out_to_every_worker() {
    let out = output_tree();
    let sockets = tempfile::tempdir().unwrap();
    let launcher = ThreadLauncher::serving(Script::new(out.path()));
    let router = Router::start(config(sockets.path()), launcher);

    router.request_bundle(bundle("ios")).await.unwrap();
    router.request_bundle(bundle("android")).await.unwrap();

    let only = router.request_file("only-android.png").await.unwrap();
    assert_eq!(only.content.as_ref(), b"android png");
    assert_eq!(only.mime_type, "image/png");

    let shared = router.request_file("/assets/icon.png").await.unwrap();
    assert_eq!(shared.content.as_ref(), b"shared png");

    assert_eq!(
        router.request_file("missing.png").await.unwrap_err(),
        FileError::NotFound
    );

    router.terminate().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn terminate_is_idempotent_and_final() {
    let out = output_tree();
    let sockets = tempfile::tempdir().unwrap();
    let launcher = ThreadLauncher::serving(Script::new(out.path()));
    let router = Router::start(config(sockets.path()), launcher);

    router.request_bundle(bundle("ios")).await.unwrap();
    router.terminate().await;
    router.terminate().await;

    assert_eq!(
        router.request_bundle(bundle("ios")).await.unwrap_err(),
        BundleError::Terminated
    );
    assert_eq!(
        router.request_file("assets/icon.png").await.unwrap_err(),
        FileError::Terminated
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn terminate_resolves_waiting_requests() {
    let out = output_tree();
    let sockets = tempfile::tempdir().unwrap();
    let mut script = Script::new(out.path());
    script.build_delay = Duration::from_secs(5);
    let router = Router::start(config(sockets.path()), ThreadLauncher::serving(script));

    let waiting = {
        let router = router.clone();
        tokio::spawn(async move { router.request_bundle(bundle("ios")).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    router.terminate().await;

    assert_eq!(waiting.await.unwrap().unwrap_err(), BundleError::Terminated);
}

#[tokio::test]
async fn spawn_failure_is_reported() {
    let sockets = tempfile::tempdir().unwrap();
    let attempts = Arc::new(AtomicUsize::new(0));
    let router = Router::start(
        config(sockets.path()),
        BrokenLauncher {
            attempts: Arc::clone(&attempts),
        },
    );
    let mut events = router.subscribe();

    let err = router.request_bundle(bundle("ios")).await.unwrap_err();
    let BundleError::BuildFailed { message } = err else {
        panic!("unexpected {err:?}");
    };
    assert!(message.contains("no such bundler"), "{message}");

    wait_for(&mut events, |event| {
        matches!(event, RouterEvent::BuildFailed { platform, .. } if platform.as_str() == "ios")
    })
    .await;

    // Nothing is left behind; the next request tries again.
    assert!(router.request_bundle(bundle("ios")).await.is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(
        router.request_file("anything").await.unwrap_err(),
        FileError::NotFound
    );

    router.terminate().await;
}

#[tokio::test]
async fn worker_that_never_connects_fails_the_build() {
    let sockets = tempfile::tempdir().unwrap();
    let config = RouterConfig {
        attach_timeout: Duration::from_millis(200),
        ..config(sockets.path())
    };
    let router = Router::start(config, ThreadLauncher::new(|_| {}));

    let err = router.request_bundle(bundle("ios")).await.unwrap_err();
    let BundleError::BuildFailed { message } = err else {
        panic!("unexpected {err:?}");
    };
    assert!(message.contains("did not connect"), "{message}");

    router.terminate().await;
}

#[tokio::test]
async fn worker_that_exits_during_startup_fails_fast() {
    let sockets = tempfile::tempdir().unwrap();
    let router = Router::start(config(sockets.path()), ProcessLauncher::new("false"));
    let mut events = router.subscribe();

    let started = Instant::now();
    let err = router.request_bundle(bundle("ios")).await.unwrap_err();
    assert!(
        matches!(err, BundleError::BuildFailed { ref message } if message.contains("exited")),
        "{err:?}"
    );
    assert!(started.elapsed() < Duration::from_secs(5));

    wait_for(&mut events, |event| {
        matches!(event, RouterEvent::WorkerStopped { platform } if platform.as_str() == "ios")
    })
    .await;

    router.terminate().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_lookup_times_out() {
    let out = output_tree();
    let sockets = tempfile::tempdir().unwrap();
    let mut script = Script::new(out.path());
    script.slow_assets = Some(Duration::from_secs(2));
    let config = RouterConfig {
        lookup_timeout: Duration::from_millis(300),
        ..config(sockets.path())
    };
    let router = Router::start(config, ThreadLauncher::serving(script));

    router.request_bundle(bundle("ios")).await.unwrap();
    assert_eq!(
        router.request_file("assets/icon.png").await.unwrap_err(),
        FileError::TimedOut { unanswered: 1 }
    );

    router.terminate().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn crashed_worker_counts_as_a_miss() {
    let out = output_tree();
    let sockets = tempfile::tempdir().unwrap();
    let root = out.path().to_path_buf();
    let launcher = ThreadLauncher::new(move |settings| {
        if settings.platform.as_str() == "android" {
            let root = root.clone();
            raw_worker(settings, built(), move |filename, task_id| {
                filename.ends_with(".bundle").then(|| {
                    let bundle = root.join("android/index.android.bundle");
                    vec![received(task_id, &bundle, "application/javascript")]
                })
            });
        } else {
            let _ = run_worker(settings, Script::new(&root));
        }
    });
    let router = Router::start(config(sockets.path()), launcher);
    let mut events = router.subscribe();

    router.request_bundle(bundle("ios")).await.unwrap();
    router.request_bundle(bundle("android")).await.unwrap();

    // ios misses, android hangs up mid-lookup.
    assert_eq!(
        router.request_file("nowhere.png").await.unwrap_err(),
        FileError::NotFound
    );

    wait_for(&mut events, |event| {
        matches!(event, RouterEvent::WorkerStopped { platform } if platform.as_str() == "android")
    })
    .await;

    // The surviving worker keeps serving.
    let shared = router.request_file("assets/icon.png").await.unwrap();
    assert_eq!(shared.content.as_ref(), b"shared png");

    router.terminate().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unsolicited_answers_are_ignored() {
    let out = output_tree();
    let sockets = tempfile::tempdir().unwrap();
    let bundle_path = out.path().join("ios/index.ios.bundle");
    let launcher = ThreadLauncher::new(move |settings| {
        let bundle_path = bundle_path.clone();
        let mut opening = built();
        opening.extend([
            Message::FileNotFound {
                task_id: TaskId(999),
            },
            Message::FileReceived {
                task_id: TaskId(0),
                file_path: "/etc/hostname".to_string(),
                mime_type: "text/plain".to_string(),
            },
            Message::RequestFile {
                filename: "index.ios.bundle".to_string(),
                task_id: TaskId(1),
            },
        ]);
        raw_worker(settings, opening, move |_, task_id| {
            Some(vec![received(task_id, &bundle_path, "application/javascript")])
        });
    });
    let router = Router::start(config(sockets.path()), launcher);

    let served = router.request_bundle(bundle("ios")).await.unwrap();
    assert_eq!(served.content.as_ref(), b"ios bundle");
    let served = router.request_bundle(bundle("ios")).await.unwrap();
    assert_eq!(served.content.as_ref(), b"ios bundle");

    router.terminate().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lifecycle_events_are_published() {
    let out = output_tree();
    let sockets = tempfile::tempdir().unwrap();
    let launcher = ThreadLauncher::serving(Script::new(out.path()));
    let router = Router::start(config(sockets.path()), launcher);
    let mut events = router.subscribe();

    router.request_bundle(bundle("ios")).await.unwrap();
    let kinds: Vec<&'static str> = drain(&mut events)
        .iter()
        .map(|event| match event {
            RouterEvent::WorkerSpawned { .. } => "spawned",
            RouterEvent::WorkerAttached { .. } => "attached",
            RouterEvent::BuildStarted { .. } => "started",
            RouterEvent::BuildProgress { .. } => "progress",
            RouterEvent::BuildFinished { .. } => "finished",
            RouterEvent::Log { .. } => "log",
            _ => "other",
        })
        .collect();

    assert_eq!(
        kinds,
        vec!["spawned", "attached", "started", "log", "progress", "finished"]
    );

    router.terminate().await;
}

/// Bundle requests answered from `bundle_path`. `touch` starts a rebuild,
/// `break` fails the worker.
fn rebuilding_worker(settings: WorkerSettings, bundle_path: PathBuf) {
    raw_worker(settings, built(), move |filename, task_id| {
        Some(match filename {
            "touch" => vec![Message::BuildStart, Message::FileNotFound { task_id }],
            "break" => vec![Message::BuildFailed {
                message: "boom".to_string(),
            }],
            _ => vec![received(task_id, &bundle_path, "application/javascript")],
        })
    });
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn build_failure_mid_life_retires_and_respawns() {
    let out = output_tree();
    let sockets = tempfile::tempdir().unwrap();
    let bundle_path = out.path().join("ios/index.ios.bundle");
    let launcher = ThreadLauncher::new(move |settings| {
        rebuilding_worker(settings, bundle_path.clone());
    });
    let launches = launcher.launches();
    let router = Router::start(config(sockets.path()), launcher);
    let mut events = router.subscribe();

    router.request_bundle(bundle("ios")).await.unwrap();
    assert_eq!(
        router.request_file("touch").await.unwrap_err(),
        FileError::NotFound
    );

    // Both bundle requests wait on the rebuild that then fails.
    let (first, second, lookup) = tokio::join!(
        router.request_bundle(bundle("ios")),
        router.request_bundle(bundle("ios")),
        router.request_file("break"),
    );
    let failed = BundleError::BuildFailed {
        message: "boom".to_string(),
    };
    assert_eq!(first.unwrap_err(), failed);
    assert_eq!(second.unwrap_err(), failed);
    assert_eq!(lookup.unwrap_err(), FileError::NotFound);

    wait_for(&mut events, |event| {
        matches!(event, RouterEvent::WorkerStopped { platform } if platform.as_str() == "ios")
    })
    .await;

    let served = router.request_bundle(bundle("ios")).await.unwrap();
    assert_eq!(served.content.as_ref(), b"ios bundle");
    assert_eq!(launches.lock().unwrap().len(), 2);

    router.terminate().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bundle_requests_wait_for_a_running_rebuild() {
    let out = output_tree();
    let sockets = tempfile::tempdir().unwrap();
    let bundle_path = out.path().join("ios/index.ios.bundle");
    let launcher = ThreadLauncher::new(move |settings| {
        let bundle_path = bundle_path.clone();
        let ready = AtomicBool::new(true);
        raw_worker(settings, built(), move |filename, task_id| {
            Some(match filename {
                "touch" => {
                    ready.store(false, Ordering::SeqCst);
                    vec![Message::BuildStart, Message::FileNotFound { task_id }]
                }
                "finish" => {
                    ready.store(true, Ordering::SeqCst);
                    vec![
                        Message::BuildFinished { errors: Vec::new() },
                        Message::FileNotFound { task_id },
                    ]
                }
                _ if ready.load(Ordering::SeqCst) => {
                    vec![received(task_id, &bundle_path, "application/javascript")]
                }
                _ => vec![Message::FileNotFound { task_id }],
            })
        });
    });
    let router = Router::start(config(sockets.path()), launcher);

    router.request_bundle(bundle("ios")).await.unwrap();
    assert_eq!(
        router.request_file("touch").await.unwrap_err(),
        FileError::NotFound
    );

    // Asking the worker now would miss; the request has to sit out the build.
    let (served, _) = tokio::join!(
        router.request_bundle(bundle("ios")),
        router.request_file("finish"),
    );
    assert_eq!(served.unwrap().content.as_ref(), b"ios bundle");

    router.terminate().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn requests_for_a_connecting_worker_are_delivered_in_order() {
    let out = output_tree();
    let sockets = tempfile::tempdir().unwrap();
    let root = out.path().to_path_buf();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let launcher = {
        let seen = Arc::clone(&seen);
        ThreadLauncher::new(move |settings| {
            if settings.platform.as_str() != "android" {
                let _ = run_worker(settings, Script::new(&root));
                return;
            }
            thread::sleep(Duration::from_millis(300));
            let root = root.clone();
            let seen = Arc::clone(&seen);
            raw_worker(settings, built(), move |filename, task_id| {
                seen.lock().unwrap().push(filename.to_string());
                Some(vec![match filename {
                    "a.png" => Message::FileNotFound { task_id },
                    "b.png" => {
                        received(task_id, &root.join("android/only-android.png"), "image/png")
                    }
                    _ => received(
                        task_id,
                        &root.join("android/index.android.bundle"),
                        "application/javascript",
                    ),
                }])
            });
        })
    };
    let router = Router::start(config(sockets.path()), launcher);

    router.request_bundle(bundle("ios")).await.unwrap();
    let (android, a, b) = tokio::join!(
        router.request_bundle(bundle("android")),
        router.request_file("a.png"),
        router.request_file("b.png"),
    );
    assert_eq!(android.unwrap().content.as_ref(), b"android bundle");
    assert_eq!(a.unwrap_err(), FileError::NotFound);
    assert_eq!(b.unwrap().content.as_ref(), b"android png");
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["a.png", "b.png", "index.android.bundle"]
    );

    router.terminate().await;
}
