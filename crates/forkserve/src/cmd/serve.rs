use std::sync::{Arc, Mutex};

use forkserve_protocol::{BuildOptions, BuildProfile, BundleRequest, Platform};
use forkserve_router::{ProcessLauncher, Router, RouterConfig, RouterEvent};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cmd::ServeArgs;
use crate::exit::{io_error, CliError, CliResult, CONFIG, INTERNAL, SUCCESS, TRANSPORT_ERROR, USAGE};
use crate::http::{self, AppState};
use crate::logging::LogSettings;

pub fn run(args: ServeArgs, logging: LogSettings) -> CliResult<i32> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::new(INTERNAL, format!("failed to start runtime: {err}")))?;
    runtime.block_on(serve(args, logging))
}

async fn serve(args: ServeArgs, logging: LogSettings) -> CliResult<i32> {
    let platforms = parse_platforms(&args.platforms)?;
    let eager = parse_platforms(&args.eager)?;
    if let Some(platform) = eager.iter().find(|p| !platforms.contains(p)) {
        return Err(CliError::new(
            USAGE,
            format!("eager platform {platform} is not in --platforms"),
        ));
    }

    let root = std::path::absolute(&args.root)
        .map_err(|err| io_error("failed to resolve output root", err))?;
    let launcher = worker_launcher(&args, &root, logging)?;

    let mut config = RouterConfig {
        default_profile: BuildProfile {
            dev: !args.release,
            minify: args.minify,
        },
        attach_timeout: args.attach_timeout,
        lookup_timeout: args.lookup_timeout,
        ..RouterConfig::default()
    };
    if let Some(dir) = &args.socket_dir {
        config.socket_dir = dir.clone();
    }

    let listener = tokio::net::TcpListener::bind((args.host.as_str(), args.port))
        .await
        .map_err(|err| io_error(&format!("failed to bind {}:{}", args.host, args.port), err))?;
    let local = listener
        .local_addr()
        .map_err(|err| io_error("failed to read listen address", err))?;

    let router = Router::start(config, launcher);
    let events = router.subscribe();
    let shutdown = CancellationToken::new();
    let fatal = Arc::new(Mutex::new(None::<String>));

    for platform in eager {
        let router = router.clone();
        tokio::spawn(async move {
            let filename = format!("index.{platform}.bundle");
            let request = BundleRequest {
                platform: platform.clone(),
                filename,
                options: BuildOptions::default(),
            };
            match router.request_bundle(request).await {
                Ok(_) => info!(%platform, "eager build ready"),
                Err(err) => warn!(%platform, error = %err, "eager build did not produce a bundle"),
            }
        });
    }

    let app = http::app(AppState::new(router.clone(), platforms, shutdown.clone()));
    info!(addr = %local, root = %root.display(), "forkserve listening");

    let stop = {
        let router = router.clone();
        let shutdown = shutdown.clone();
        let fatal = Arc::clone(&fatal);
        async move {
            if let Some(message) = wait_for_shutdown(events).await {
                *fatal.lock().unwrap_or_else(|p| p.into_inner()) = Some(message);
            }
            router.terminate().await;
            shutdown.cancel();
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(stop)
        .await
        .map_err(|err| io_error("server error", err))?;
    router.terminate().await;

    let fatal = fatal.lock().unwrap_or_else(|p| p.into_inner()).take();
    match fatal {
        Some(message) => Err(CliError::new(TRANSPORT_ERROR, message)),
        None => Ok(SUCCESS),
    }
}

fn parse_platforms(names: &[String]) -> CliResult<Vec<Platform>> {
    names
        .iter()
        .map(|name| {
            name.trim()
                .parse::<Platform>()
                .map_err(|err| CliError::new(USAGE, format!("invalid platform {name:?}: {err}")))
        })
        .collect()
}

fn worker_launcher(
    args: &ServeArgs,
    root: &std::path::Path,
    logging: LogSettings,
) -> CliResult<ProcessLauncher> {
    let exe = std::env::current_exe()
        .map_err(|err| CliError::new(CONFIG, format!("cannot locate own executable: {err}")))?;

    let mut launcher = ProcessLauncher::new(exe)
        .args(logging.to_args())
        .arg("worker")
        .arg("--root")
        .arg(root);
    if let Some(command) = &args.build_cmd {
        launcher = launcher.arg("--build-cmd").arg(command);
    }
    if let Some(dir) = &args.watch {
        let dir = std::path::absolute(dir)
            .map_err(|err| io_error("failed to resolve watch directory", err))?;
        launcher = launcher.arg("--watch").arg(dir);
    }
    Ok(launcher)
}

/// Resolves on SIGINT, SIGTERM or a fatal router event. Returns the fatal
/// message, if that is what ended the wait.
async fn wait_for_shutdown(mut events: broadcast::Receiver<RouterEvent>) -> Option<String> {
    let fatal = async move {
        loop {
            match events.recv().await {
                Ok(RouterEvent::Fatal { message }) => return message,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
            }
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT, shutting down");
            None
        }
        _ = terminate_signal() => {
            info!("received SIGTERM, shutting down");
            None
        }
        message = fatal => {
            error!(%message, "router cannot continue");
            Some(message)
        }
    }
}

#[cfg(unix)]
async fn terminate_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(err) => {
            warn!(error = %err, "cannot listen for SIGTERM");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate_signal() {
    std::future::pending::<()>().await;
}
