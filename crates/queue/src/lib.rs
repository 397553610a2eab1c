//! HandBrake encode queue
//!
//! Keeps an ordered, crash-recoverable list of encode jobs and runs them one
//! at a time through either the command-line encoder or an in-process one.
//! The query codec converts between typed encode settings and the engine's
//! command-line syntax.

pub mod engine;
pub mod jobs;
pub mod log_capture;
pub mod post_action;
pub mod query;
pub mod queue;
pub mod runner;
pub mod startup;
pub mod status;
pub mod status_server;
pub mod task;

pub use hbqueue_config as config;
pub use hbqueue_config::Config;

pub use engine::{
    CliEngine, DefaultEngineFactory, DoneReport, EngineError, EngineFactory, EngineHandle,
    EnginePhase, LibraryEngine, NativeEngine, ProgressReport,
};
pub use jobs::{Job, JobId, JobStatus};
pub use log_capture::{archive_log, ActivityLog, LogCaptureError, LogTailer};
pub use post_action::{perform_post_queue_action, PostActionError};
pub use query::{generate_query, generate_query_with, parse_query, QueryOptions};
pub use queue::{JobQueue, QueueError};
pub use runner::{QueueEvent, QueueRunner, RunSummary, RunnerSettings, RunnerState};
pub use startup::{check_engine_available, parse_engine_version, run_startup_checks, StartupError};
pub use status::{new_shared_status, record_events, QueueSnapshot, SharedStatus};
pub use status_server::{create_status_router, run_status_server, ServerError};
pub use task::EncodeTask;
