//! The ordered encode queue.
//!
//! Every mutation is written through to the recovery file while the queue
//! lock is held, so the file always reflects some state the in-memory list
//! actually passed through.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::jobs::{job_exists_for_destination, load_jobs, save_jobs, Job, JobId, JobStatus};
use crate::query::{generate_query_with, quote_arg, QueryOptions};
use crate::task::EncodeTask;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue is empty")]
    Empty,

    #[error("failed to load queue from {path}: {reason}")]
    Load { path: PathBuf, reason: String },

    #[error("failed to persist queue to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Default)]
struct QueueState {
    jobs: Vec<Job>,
    next_id: JobId,
    last_encode: Option<Job>,
}

/// Ordered list of pending jobs with write-through persistence.
#[derive(Debug)]
pub struct JobQueue {
    state: Mutex<QueueState>,
    recovery_file: Option<PathBuf>,
}

impl JobQueue {
    /// A queue persisted to `recovery_file`. Nothing is read until
    /// [`load_from_file`](Self::load_from_file) is called.
    pub fn new(recovery_file: impl Into<PathBuf>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                next_id: 1,
                ..QueueState::default()
            }),
            recovery_file: Some(recovery_file.into()),
        }
    }

    /// A queue that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(QueueState {
                next_id: 1,
                ..QueueState::default()
            }),
            recovery_file: None,
        }
    }

    pub fn recovery_file(&self) -> Option<&Path> {
        self.recovery_file.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a job built from a raw query.
    pub fn add(
        &self,
        query: impl Into<String>,
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
    ) -> JobId {
        self.add_with(query, source, destination, 0, false)
    }

    /// Append a job whose query is generated from `task`.
    pub fn add_task(&self, task: &EncodeTask, options: &QueryOptions) -> JobId {
        self.add_with(
            generate_query_with(task, options),
            task.source.clone(),
            task.destination.clone(),
            task.title,
            false,
        )
    }

    pub fn add_with(
        &self,
        query: impl Into<String>,
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        title: u32,
        custom_query: bool,
    ) -> JobId {
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;

        let mut job = Job::new(id, query, source, destination);
        job.title = title;
        job.custom_query = custom_query;
        debug!(job_id = id, destination = %job.destination.display(), "job queued");
        state.jobs.push(job);

        self.persist(&state);
        id
    }

    /// Remove the job at `index`. Out-of-range indexes change nothing.
    pub fn remove(&self, index: usize) -> Option<Job> {
        let mut state = self.lock();
        let removed = (index < state.jobs.len()).then(|| state.jobs.remove(index));
        self.persist(&state);
        removed
    }

    /// Swap the job at `index` with the one before it.
    pub fn move_up(&self, index: usize) {
        let mut state = self.lock();
        if index > 0 && index < state.jobs.len() {
            state.jobs.swap(index, index - 1);
        }
        self.persist(&state);
    }

    /// Swap the job at `index` with the one after it.
    pub fn move_down(&self, index: usize) {
        let mut state = self.lock();
        if index + 1 < state.jobs.len() {
            state.jobs.swap(index, index + 1);
        }
        self.persist(&state);
    }

    /// Dequeue the head job, marking it in progress and recording it as
    /// the last encode.
    pub fn get_next_job(&self) -> Result<Job, QueueError> {
        let mut state = self.lock();
        if state.jobs.is_empty() {
            return Err(QueueError::Empty);
        }

        let mut job = state.jobs.remove(0);
        job.set_status(JobStatus::InProgress);
        state.last_encode = Some(job.clone());
        self.persist(&state);
        Ok(job)
    }

    /// Replace the last-encode record with the job's final state.
    pub fn record_last_encode(&self, job: &Job) {
        self.lock().last_encode = Some(job.clone());
    }

    pub fn last_encode(&self) -> Option<Job> {
        self.lock().last_encode.clone()
    }

    pub fn count(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Snapshot of the pending jobs in execution order.
    pub fn jobs(&self) -> Vec<Job> {
        self.lock().jobs.clone()
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.jobs.clear();
        self.persist(&state);
    }

    /// True if a pending job already writes to `destination`.
    pub fn check_for_duplicate_destination(&self, destination: &Path) -> bool {
        job_exists_for_destination(&self.lock().jobs, destination)
    }

    /// Restore the pending list from the recovery file.
    ///
    /// Completed jobs are dropped and jobs that were mid-encode go back to
    /// waiting. On failure the in-memory queue is left untouched.
    pub fn load_from_file(&self) -> Result<usize, QueueError> {
        let Some(path) = self.recovery_file.as_deref() else {
            return Ok(0);
        };

        // held across the read so a concurrent add cannot land in between
        let mut state = self.lock();
        let restored = read_restorable(path)?;
        let max_id = restored.iter().map(|j| j.id).max().unwrap_or(0);
        state.next_id = state.next_id.max(max_id + 1);
        state.jobs = restored;
        let count = state.jobs.len();
        self.persist(&state);

        info!(path = %path.display(), jobs = count, "queue restored");
        Ok(count)
    }

    /// Append the jobs from another queue file, assigning fresh ids.
    pub fn import(&self, path: &Path) -> Result<usize, QueueError> {
        let imported = read_restorable(path)?;
        let mut state = self.lock();
        let count = imported.len();
        for mut job in imported {
            job.id = state.next_id;
            state.next_id += 1;
            state.jobs.push(job);
        }
        self.persist(&state);

        info!(path = %path.display(), jobs = count, "queue imported");
        Ok(count)
    }

    /// Save the pending jobs to `path` in recovery-file form, for a later
    /// [`import`](Self::import).
    pub fn export(&self, path: &Path) -> Result<usize, QueueError> {
        let state = self.lock();
        save_jobs(&state.jobs, path).map_err(|source| QueueError::Persist {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), jobs = state.jobs.len(), "queue exported");
        Ok(state.jobs.len())
    }

    /// Write the pending jobs as a single shell line that runs them one
    /// after another, stopping at the first failure.
    pub fn export_batch_script(&self, path: &Path, cli_path: &Path) -> Result<(), QueueError> {
        let script = batch_script(&self.lock().jobs, cli_path);
        fs::write(path, script)?;
        Ok(())
    }

    /// Write the current list to the recovery file, reporting failures.
    pub fn save(&self) -> Result<(), QueueError> {
        let state = self.lock();
        self.try_persist(&state)
    }

    fn try_persist(&self, state: &QueueState) -> Result<(), QueueError> {
        let Some(path) = self.recovery_file.as_deref() else {
            return Ok(());
        };
        save_jobs(&state.jobs, path).map_err(|source| QueueError::Persist {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write-through persistence. A failed write never fails the mutation.
    fn persist(&self, state: &QueueState) {
        if let Err(e) = self.try_persist(state) {
            warn!(error = %e, "queue change not persisted");
        }
    }
}

fn read_restorable(path: &Path) -> Result<Vec<Job>, QueueError> {
    let jobs = load_jobs(path).map_err(|e| QueueError::Load {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    Ok(jobs
        .into_iter()
        .filter(|job| job.status != JobStatus::Completed)
        .map(|mut job| {
            if job.status == JobStatus::InProgress {
                job.set_status(JobStatus::Waiting);
            }
            job
        })
        .collect())
}

fn batch_script(jobs: &[Job], cli_path: &Path) -> String {
    let engine = quote_arg(&cli_path.to_string_lossy());
    jobs.iter()
        .map(|job| format!("{} {}", engine, job.query.trim()))
        .collect::<Vec<_>>()
        .join(" && ")
}
