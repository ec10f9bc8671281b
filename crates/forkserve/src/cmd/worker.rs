use forkserve_worker::{run_worker, DirectoryPipeline, WorkerSettings};
use tracing::info;

use crate::cmd::WorkerArgs;
use crate::exit::{worker_error, CliResult, SUCCESS};

pub fn run(args: WorkerArgs) -> CliResult<i32> {
    let settings =
        WorkerSettings::from_env().map_err(|err| worker_error("worker setup failed", err))?;

    let mut pipeline = DirectoryPipeline::new(&args.root);
    if let Some(command) = args.build_cmd {
        pipeline = pipeline.build_command(command);
    }
    if let Some(dir) = args.watch {
        pipeline = pipeline.watch(dir);
    }

    info!(
        platform = %settings.platform,
        root = %args.root.display(),
        "build worker starting"
    );
    run_worker(settings, pipeline).map_err(|err| worker_error("worker failed", err))?;
    Ok(SUCCESS)
}
