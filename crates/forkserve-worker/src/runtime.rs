use std::sync::Arc;
use std::thread;

use forkserve_peer::PeerError;
use forkserve_protocol::Message;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::pipeline::{BuildContext, BuildEvents, BuildPipeline};
use crate::settings::WorkerSettings;

/// Join the router described by `settings` and serve `pipeline` until the
/// router closes the connection.
///
/// The pipeline starts on its own thread; this thread answers
/// `REQUEST_FILE` lookups. A pipeline that fails to start is reported as
/// `BUILD_FAILED` and the worker keeps answering lookups.
pub fn run_worker<P: BuildPipeline>(settings: WorkerSettings, pipeline: P) -> Result<()> {
    let link = forkserve_peer::connect(
        &settings.socket_path,
        &settings.platform,
        &settings.handshake_config(),
    )?;
    let (mut reader, writer, handshake) = link.into_split();
    info!(
        worker_id = %handshake.worker_id,
        platform = %settings.platform,
        "joined router"
    );

    let context = BuildContext {
        platform: settings.platform.clone(),
        profile: settings.profile,
    };
    let events = BuildEvents::new(writer);
    let pipeline = Arc::new(pipeline);

    {
        let pipeline = Arc::clone(&pipeline);
        let context = context.clone();
        let events = events.clone();
        thread::Builder::new()
            .name(format!("forkserve-build-{}", context.platform))
            .spawn(move || {
                if let Err(err) = pipeline.start(&context, events.clone()) {
                    warn!(
                        platform = %context.platform,
                        error = %err,
                        "build pipeline failed to start"
                    );
                    if let Err(report) = events.failed(err.to_string()) {
                        debug!(error = %report, "could not report pipeline failure");
                    }
                }
            })?;
    }

    loop {
        let message = match reader.recv() {
            Ok(message) => message,
            Err(PeerError::Disconnected(reason)) => {
                info!(platform = %context.platform, %reason, "router went away");
                return Ok(());
            }
            Err(PeerError::Protocol(err)) => {
                warn!(error = %err, "dropping malformed message from router");
                continue;
            }
            Err(err) => return Err(err.into()),
        };

        match message {
            Message::RequestFile { filename, task_id } => {
                let reply = match pipeline.lookup(&context, &filename) {
                    Some(output) => {
                        debug!(%task_id, %filename, path = %output.path.display(), "lookup hit");
                        Message::FileReceived {
                            task_id,
                            file_path: output.path.display().to_string(),
                            mime_type: output.mime_type,
                        }
                    }
                    None => {
                        debug!(%task_id, %filename, "lookup miss");
                        Message::FileNotFound { task_id }
                    }
                };
                if let Err(err) = events.emit(&reply) {
                    info!(error = %err, "router stopped listening");
                    return Ok(());
                }
            }
            other => {
                warn!(kind = other.kind(), "ignoring message not addressed to workers");
            }
        }
    }
}
