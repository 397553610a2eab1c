//! Queue status snapshot.
//!
//! A [`QueueSnapshot`] is the read model behind the status endpoint. It is
//! kept current by folding [`QueueEvent`]s into it.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

use crate::engine::ProgressReport;
use crate::jobs::{current_timestamp_ms, Job, JobId};
use crate::queue::JobQueue;
use crate::runner::{QueueEvent, RunnerState};

/// The job the engine is working on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CurrentJob {
    pub id: JobId,
    pub source: String,
    pub destination: String,
    pub progress: Option<ProgressReport>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueueSnapshot {
    pub timestamp_unix_ms: i64,
    pub state: RunnerState,
    pub queue_len: usize,
    pub pending: Vec<Job>,
    pub current: Option<CurrentJob>,
    pub last_job: Option<Job>,
    pub completed_jobs: u64,
    pub failed_jobs: u64,
    pub cancelled_jobs: u64,
}

/// Shared snapshot for the runner's event relay and the HTTP handlers.
pub type SharedStatus = Arc<RwLock<QueueSnapshot>>;

pub fn new_shared_status() -> SharedStatus {
    Arc::new(RwLock::new(QueueSnapshot::default()))
}

impl QueueSnapshot {
    /// Fold one event into the snapshot.
    pub fn apply(&mut self, event: &QueueEvent) {
        self.timestamp_unix_ms = current_timestamp_ms();
        match event {
            QueueEvent::NewJobStarted { job } => {
                self.state = RunnerState::Running;
                self.current = Some(CurrentJob {
                    id: job.id,
                    source: job.source.to_string_lossy().into_owned(),
                    destination: job.destination.to_string_lossy().into_owned(),
                    progress: None,
                });
            }
            QueueEvent::Progress { job_id, report } => {
                if let Some(current) = self.current.as_mut().filter(|c| c.id == *job_id) {
                    current.progress = Some(report.clone());
                }
            }
            QueueEvent::CurrentJobCompleted { job, success } => {
                self.current = None;
                self.last_job = Some(job.clone());
                if *success {
                    self.completed_jobs += 1;
                } else if job.status == crate::jobs::JobStatus::Cancelled {
                    self.cancelled_jobs += 1;
                } else {
                    self.failed_jobs += 1;
                }
            }
            QueueEvent::QueuePaused => self.state = RunnerState::Paused,
            QueueEvent::QueueCompleted => self.state = RunnerState::Completed,
            QueueEvent::QueueStopped => self.state = RunnerState::Stopped,
        }
    }

    /// Copy the pending list from the queue.
    pub fn refresh_pending(&mut self, queue: &JobQueue) {
        self.pending = queue.jobs();
        self.queue_len = self.pending.len();
    }
}

/// Keep `status` current until the event stream closes.
pub async fn record_events(
    mut events: mpsc::UnboundedReceiver<QueueEvent>,
    status: SharedStatus,
    queue: Arc<JobQueue>,
) {
    status.write().await.refresh_pending(&queue);
    while let Some(event) = events.recv().await {
        let mut snapshot = status.write().await;
        snapshot.apply(&event);
        snapshot.refresh_pending(&queue);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobStatus;
    use std::time::Duration;

    fn working(percent: f64) -> ProgressReport {
        ProgressReport::Working {
            percent,
            current_fps: 25.0,
            avg_fps: 24.0,
            eta: Duration::from_secs(30),
            pass: 1,
            pass_count: 1,
        }
    }

    #[test]
    fn test_apply_tracks_current_job_and_counts() {
        let mut snapshot = QueueSnapshot::default();
        let job = Job::new(1, "-i a", "a.mkv", "a.mp4");

        snapshot.apply(&QueueEvent::NewJobStarted { job: job.clone() });
        assert_eq!(snapshot.state, RunnerState::Running);
        assert_eq!(snapshot.current.as_ref().unwrap().id, 1);

        snapshot.apply(&QueueEvent::Progress {
            job_id: 1,
            report: working(40.0),
        });
        assert_eq!(
            snapshot.current.as_ref().unwrap().progress,
            Some(working(40.0))
        );

        // progress for some other job is ignored
        snapshot.apply(&QueueEvent::Progress {
            job_id: 9,
            report: working(99.0),
        });
        assert_eq!(
            snapshot.current.as_ref().unwrap().progress,
            Some(working(40.0))
        );

        let mut finished = job.clone();
        finished.set_status(JobStatus::Completed);
        snapshot.apply(&QueueEvent::CurrentJobCompleted {
            job: finished,
            success: true,
        });
        assert!(snapshot.current.is_none());
        assert_eq!(snapshot.completed_jobs, 1);

        let mut cancelled = job;
        cancelled.cancel("stopped by user");
        snapshot.apply(&QueueEvent::CurrentJobCompleted {
            job: cancelled,
            success: false,
        });
        assert_eq!(snapshot.cancelled_jobs, 1);
        assert_eq!(snapshot.failed_jobs, 0);

        snapshot.apply(&QueueEvent::QueueStopped);
        assert_eq!(snapshot.state, RunnerState::Stopped);
    }

    #[tokio::test]
    async fn test_record_events_refreshes_pending() {
        let queue = Arc::new(JobQueue::in_memory());
        queue.add("-i a", "a.mkv", "a.mp4");
        queue.add("-i b", "b.mkv", "b.mp4");
        let status = new_shared_status();
        let (tx, rx) = mpsc::unbounded_channel();

        let job = queue.get_next_job().unwrap();
        tx.send(QueueEvent::NewJobStarted { job }).unwrap();
        drop(tx);
        record_events(rx, status.clone(), queue.clone()).await;

        let snapshot = status.read().await;
        assert_eq!(snapshot.queue_len, 1);
        assert_eq!(snapshot.pending[0].destination, std::path::PathBuf::from("b.mp4"));
        assert_eq!(snapshot.current.as_ref().unwrap().destination, "a.mp4");
    }
}
