//! Encode engine abstraction.
//!
//! A queue run drives exactly one [`EngineHandle`] per job. Two backends
//! implement it: [`CliEngine`] spawns the command-line encoder and parses its
//! output, [`LibraryEngine`] drives an in-process encoder through the
//! [`NativeEngine`] seam and polls its JSON state.

mod cli;
mod library;
mod process;
mod status;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

use crate::config::{Config, EngineBackend};
use crate::jobs::Job;
use crate::log_capture::ActivityLog;

pub use cli::{CliEngine, CliEngineSettings};
pub use library::{LibraryEngine, NativeEngine, MAX_POLL_FAILURES};
pub use process::sweep_orphan_processes;
pub use status::{parse_cli_status, parse_library_state};

/// Lifecycle of a single engine handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnginePhase {
    Idle,
    Starting,
    Running,
    Paused,
    Stopping,
    Terminated,
}

impl std::fmt::Display for EnginePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EnginePhase::Idle => "idle",
            EnginePhase::Starting => "starting",
            EnginePhase::Running => "running",
            EnginePhase::Paused => "paused",
            EnginePhase::Stopping => "stopping",
            EnginePhase::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Progress as reported by an engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProgressReport {
    Scanning {
        /// Fraction in 0..=1.
        progress: f64,
        current_preview: u32,
        preview_count: u32,
        current_title: u32,
        title_count: u32,
    },
    Working {
        /// Percent in 0..=100.
        percent: f64,
        current_fps: f64,
        avg_fps: f64,
        eta: Duration,
        pass: u32,
        pass_count: u32,
    },
    Done {
        success: bool,
        error_code: i32,
    },
}

/// Final outcome of an engine run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DoneReport {
    pub success: bool,
    pub error_code: i32,
}

impl DoneReport {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            error_code: 0,
        }
    }

    pub fn failed(error_code: i32) -> Self {
        Self {
            success: false,
            error_code,
        }
    }
}

impl From<DoneReport> for ProgressReport {
    fn from(done: DoneReport) -> Self {
        ProgressReport::Done {
            success: done.success,
            error_code: done.error_code,
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to launch engine: {0}")]
    Launch(String),

    #[error("{operation} is not supported by the {backend} engine")]
    NotSupported {
        operation: &'static str,
        backend: &'static str,
    },

    #[error("cannot {operation} while the engine is {phase}")]
    InvalidState {
        operation: &'static str,
        phase: EnginePhase,
    },

    #[error("engine IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One encode in flight.
///
/// A handle is good for a single `start`; the runner asks the factory for a
/// fresh one per job.
#[async_trait]
pub trait EngineHandle: Send + Sync {
    /// Short backend name for logs and errors.
    fn backend(&self) -> &'static str;

    async fn start(&self, job: &Job) -> Result<(), EngineError>;

    async fn pause(&self) -> Result<(), EngineError>;

    async fn resume(&self) -> Result<(), EngineError>;

    /// Stop the encode. Calling this more than once, or before `start`, is
    /// harmless.
    async fn stop(&self);

    /// Latest progress report, if any has arrived.
    fn poll_status(&self) -> Option<ProgressReport>;

    /// Resolves once the engine has terminated.
    async fn wait(&self) -> DoneReport;

    fn phase(&self) -> EnginePhase;

    fn activity_log(&self) -> ActivityLog;
}

/// Creates a fresh engine handle for each job.
pub trait EngineFactory: Send + Sync {
    fn create(&self) -> Result<Arc<dyn EngineHandle>, EngineError>;
}

/// Builds the backend selected in configuration.
pub struct DefaultEngineFactory {
    config: Config,
    native: Option<Arc<dyn NativeEngine>>,
}

impl DefaultEngineFactory {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            native: None,
        }
    }

    /// Attach the in-process encoder used by the library backend.
    pub fn with_native(mut self, native: Arc<dyn NativeEngine>) -> Self {
        self.native = Some(native);
        self
    }
}

impl EngineFactory for DefaultEngineFactory {
    fn create(&self) -> Result<Arc<dyn EngineHandle>, EngineError> {
        match self.config.engine.backend {
            EngineBackend::Cli => Ok(Arc::new(CliEngine::new(CliEngineSettings::from_config(
                &self.config,
            )))),
            EngineBackend::Library => {
                let native = self.native.clone().ok_or_else(|| {
                    EngineError::Launch("no native encoder is linked into this build".to_string())
                })?;
                Ok(Arc::new(LibraryEngine::new(native, &self.config)))
            }
        }
    }
}

/// Phase, latest report and outcome shared between a handle and its
/// background tasks.
#[derive(Debug)]
pub(crate) struct Session {
    phase: watch::Sender<EnginePhase>,
    report: watch::Sender<Option<ProgressReport>>,
    done: watch::Sender<Option<DoneReport>>,
    log: ActivityLog,
}

impl Session {
    pub(crate) fn new() -> Self {
        Self {
            phase: watch::Sender::new(EnginePhase::Idle),
            report: watch::Sender::new(None),
            done: watch::Sender::new(None),
            log: ActivityLog::new(),
        }
    }

    pub(crate) fn log(&self) -> &ActivityLog {
        &self.log
    }

    pub(crate) fn phase(&self) -> EnginePhase {
        *self.phase.borrow()
    }

    pub(crate) fn set_phase(&self, phase: EnginePhase) {
        self.phase.send_replace(phase);
    }

    /// Move from `from` to `to`, failing with `InvalidState` otherwise.
    pub(crate) fn transition(
        &self,
        operation: &'static str,
        from: EnginePhase,
        to: EnginePhase,
    ) -> Result<(), EngineError> {
        let mut result = Ok(());
        self.phase.send_if_modified(|phase| {
            if *phase == from {
                *phase = to;
                true
            } else {
                result = Err(EngineError::InvalidState {
                    operation,
                    phase: *phase,
                });
                false
            }
        });
        result
    }

    pub(crate) fn publish(&self, report: ProgressReport) {
        if self.is_done() {
            return;
        }
        self.report.send_replace(Some(report));
    }

    pub(crate) fn latest(&self) -> Option<ProgressReport> {
        self.report.borrow().clone()
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done.borrow().is_some()
    }

    /// Record the outcome. Only the first call has any effect.
    pub(crate) fn finish(&self, outcome: DoneReport) {
        let first = self.done.send_if_modified(|done| {
            if done.is_some() {
                false
            } else {
                *done = Some(outcome);
                true
            }
        });
        if first {
            self.report.send_replace(Some(outcome.into()));
            self.set_phase(EnginePhase::Terminated);
        }
    }

    pub(crate) async fn wait(&self) -> DoneReport {
        let mut rx = self.done.subscribe();
        loop {
            if let Some(done) = *rx.borrow_and_update() {
                return done;
            }
            if rx.changed().await.is_err() {
                return DoneReport::failed(-1);
            }
        }
    }
}
