//! Worker side of forkserve.
//!
//! A worker process is launched by the router for a single platform. It
//! reads its [`WorkerSettings`] from the environment, dials the router and
//! drives a [`BuildPipeline`]: build events flow to the router, and the
//! router's `REQUEST_FILE` lookups are answered from the pipeline's output.
//!
//! ```no_run
//! use forkserve_worker::{run_worker, DirectoryPipeline, WorkerSettings};
//!
//! let settings = WorkerSettings::from_env()?;
//! let pipeline = DirectoryPipeline::new("dist");
//! run_worker(settings, pipeline)?;
//! # Ok::<(), forkserve_worker::WorkerError>(())
//! ```

pub mod directory;
pub mod error;
pub mod mime;
pub mod pipeline;
pub mod runtime;
pub mod settings;

pub use directory::DirectoryPipeline;
pub use error::{PipelineError, Result, WorkerError};
pub use mime::content_type_for;
pub use pipeline::{BuildContext, BuildEvents, BuildPipeline, OutputFile};
pub use runtime::run_worker;
pub use settings::WorkerSettings;
