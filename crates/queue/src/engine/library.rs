//! In-process engine backend.
//!
//! The encoder itself sits behind [`NativeEngine`]; this module owns the
//! polling loop that turns its JSON state into progress reports and tails
//! the log file it writes.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::status::parse_library_state;
use super::{DoneReport, EngineError, EngineHandle, EnginePhase, ProgressReport, Session};
use crate::config::Config;
use crate::jobs::Job;
use crate::log_capture::{
    query_header, ActivityLog, LogTailer, LAST_ENCODE_LOG, TAIL_SNAPSHOT_LOG,
};
use crate::query::parse_query;
use crate::task::EncodeTask;

/// Consecutive failed state polls tolerated before the job is abandoned.
pub const MAX_POLL_FAILURES: u32 = 5;

const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// The in-process encoder.
///
/// Calls are synchronous and expected to return promptly; the encode itself
/// runs on the encoder's own threads.
pub trait NativeEngine: Send + Sync {
    fn start_encode(&self, task: &EncodeTask) -> Result<(), EngineError>;

    fn pause(&self);

    fn resume(&self);

    fn stop(&self);

    /// Current state as the encoder's JSON document.
    fn state_json(&self) -> Result<String, EngineError>;

    /// File the encoder writes its activity log to.
    fn log_path(&self) -> PathBuf;
}

pub struct LibraryEngine {
    native: Arc<dyn NativeEngine>,
    session: Arc<Session>,
    poll_interval: Duration,
    snapshot_path: PathBuf,
    live_log_path: PathBuf,
    max_log_bytes: u64,
    stopped: Arc<AtomicBool>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl LibraryEngine {
    pub fn new(native: Arc<dyn NativeEngine>, config: &Config) -> Self {
        Self {
            native,
            session: Arc::new(Session::new()),
            poll_interval: Duration::from_millis(config.engine.poll_interval_ms.max(1)),
            snapshot_path: config.logging.log_dir.join(TAIL_SNAPSHOT_LOG),
            live_log_path: config.logging.log_dir.join(LAST_ENCODE_LOG),
            max_log_bytes: config.logging.max_log_bytes,
            stopped: Arc::new(AtomicBool::new(false)),
            poller: Mutex::new(None),
        }
    }

    fn spawn_poller(&self) -> JoinHandle<()> {
        let native = self.native.clone();
        let session = self.session.clone();
        let stopped = self.stopped.clone();
        let poll_interval = self.poll_interval;
        let max_log_bytes = self.max_log_bytes;
        let mut tailer = LogTailer::new(native.log_path(), self.snapshot_path.clone());

        tokio::spawn(async move {
            let log = session.log().clone();
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut failures = 0u32;

            let outcome = loop {
                ticker.tick().await;
                tailer.poll(&log, false);

                if log.body_bytes() > max_log_bytes {
                    warn!("encode log exceeded its size limit, stopping engine");
                    stopped.store(true, Ordering::SeqCst);
                    native.stop();
                    break DoneReport::failed(-1);
                }

                let state = native.state_json().and_then(|json| {
                    parse_library_state(&json)
                        .map_err(|e| EngineError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))
                });

                match state {
                    Ok(Some(ProgressReport::Done {
                        success,
                        error_code,
                    })) => {
                        tailer.poll(&log, true);
                        let success = success && !stopped.load(Ordering::SeqCst);
                        info!(success, code = error_code, "engine finished");
                        break DoneReport {
                            success,
                            error_code,
                        };
                    }
                    Ok(Some(report)) => {
                        failures = 0;
                        session.publish(report);
                    }
                    Ok(None) => failures = 0,
                    Err(e) => {
                        failures += 1;
                        warn!(failures, error = %e, "engine state poll failed");
                        if failures > MAX_POLL_FAILURES {
                            tailer.poll(&log, true);
                            break DoneReport::failed(-1);
                        }
                    }
                }
            };

            if let Err(e) = log.finish() {
                warn!(error = %e, "failed to flush encode log");
            }
            session.finish(outcome);
        })
    }

    fn abort_poller(&self) {
        let handle = self
            .poller
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

#[async_trait]
impl EngineHandle for LibraryEngine {
    fn backend(&self) -> &'static str {
        "library"
    }

    async fn start(&self, job: &Job) -> Result<(), EngineError> {
        self.session
            .transition("start", EnginePhase::Idle, EnginePhase::Starting)?;

        let log = self.session.log();
        let header = query_header(job);
        if let Err(e) = log.begin(&header, Some(&self.live_log_path), Some(self.max_log_bytes)) {
            warn!(path = %self.live_log_path.display(), error = %e, "encode log file unavailable");
            log.begin(&header, None, Some(self.max_log_bytes))?;
        }

        let task = parse_query(&job.query);
        if let Err(e) = self.native.start_encode(&task) {
            log.append_line(&format!("failed to start engine: {e}"));
            let _ = log.finish();
            self.session.finish(DoneReport::failed(-1));
            return Err(e);
        }

        let _ = self
            .session
            .transition("run", EnginePhase::Starting, EnginePhase::Running);
        let handle = self.spawn_poller();
        *self
            .poller
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);

        info!(job_id = job.id, "library encode started");
        Ok(())
    }

    async fn pause(&self) -> Result<(), EngineError> {
        self.session
            .transition("pause", EnginePhase::Running, EnginePhase::Paused)?;
        self.native.pause();
        debug!("library encode paused");
        Ok(())
    }

    async fn resume(&self) -> Result<(), EngineError> {
        self.session
            .transition("resume", EnginePhase::Paused, EnginePhase::Running)?;
        self.native.resume();
        debug!("library encode resumed");
        Ok(())
    }

    async fn stop(&self) {
        match self.session.phase() {
            EnginePhase::Idle => {
                self.session.finish(DoneReport::failed(-1));
                return;
            }
            EnginePhase::Terminated => return,
            _ => {}
        }

        self.session.set_phase(EnginePhase::Stopping);
        self.stopped.store(true, Ordering::SeqCst);
        self.native.stop();

        if tokio::time::timeout(STOP_TIMEOUT, self.session.wait())
            .await
            .is_err()
        {
            warn!("engine did not report completion after stop");
            self.abort_poller();
            let _ = self.session.log().finish();
            self.session.finish(DoneReport::failed(-1));
        }
    }

    fn poll_status(&self) -> Option<ProgressReport> {
        self.session.latest()
    }

    async fn wait(&self) -> DoneReport {
        self.session.wait().await
    }

    fn phase(&self) -> EnginePhase {
        self.session.phase()
    }

    fn activity_log(&self) -> ActivityLog {
        self.session.log().clone()
    }
}

impl Drop for LibraryEngine {
    fn drop(&mut self) {
        self.abort_poller();
    }
}
