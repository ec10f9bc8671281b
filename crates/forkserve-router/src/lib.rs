//! Orchestration core of forkserve.
//!
//! A [`Router`] keeps at most one long-lived build worker per platform.
//! Workers are spawned lazily on the first bundle request, connect back over
//! a shared local socket, and answer file lookups by task id.
//!
//! - Bundle requests wait for the platform's in-flight build, then look the
//!   bundle up on that worker.
//! - File requests fan out to every live worker; the first hit wins and the
//!   last miss reports not-found.
//! - Every outstanding request resolves exactly once: with content, a typed
//!   error, a timeout, or [`BundleError::Terminated`].

pub mod config;
pub mod error;
pub mod event;
pub mod fan_out;
pub mod launcher;
pub mod outcome;
pub mod router;
pub mod task_queue;

mod worker;

pub use config::RouterConfig;
pub use error::{BundleError, FileError, LaunchError};
pub use event::RouterEvent;
pub use fan_out::FanOut;
pub use launcher::{LaunchSpec, ProcessLauncher, WorkerLauncher, WorkerProcess};
pub use outcome::{BundleResult, FileResult, ServedFile};
pub use router::Router;
pub use task_queue::{TaskError, TaskQueue};

pub use forkserve_protocol::{BuildOptions, BuildProfile, BundleRequest, Platform};
