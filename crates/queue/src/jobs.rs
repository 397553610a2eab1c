//! Queue entries and their on-disk form.
//!
//! A [`Job`] is one queued encode: the query that drives the engine plus the
//! source/destination it was built from. The recovery file is a pretty-printed
//! JSON array of jobs in execution order.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub type JobId = u64;

/// Status of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the queue.
    #[default]
    Waiting,
    /// Handed to the engine.
    InProgress,
    /// Engine reported success.
    Completed,
    /// Engine failed to launch or reported failure.
    Error,
    /// Stopped by the user.
    Cancelled,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Waiting => write!(f, "waiting"),
            JobStatus::InProgress => write!(f, "in_progress"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Error => write!(f, "error"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One queued encode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    /// Monotonically assigned by the queue.
    pub id: JobId,
    /// Engine query string.
    pub query: String,
    /// True when the query was hand-edited rather than generated.
    #[serde(default)]
    pub custom_query: bool,
    pub source: PathBuf,
    pub destination: PathBuf,
    #[serde(default)]
    pub title: u32,
    #[serde(default)]
    pub status: JobStatus,
    /// Unix timestamp (milliseconds) when the job was queued.
    #[serde(default)]
    pub created_at: i64,
    /// Unix timestamp (milliseconds) of the last status change.
    #[serde(default)]
    pub updated_at: i64,
    /// Why the job ended in Error or Cancelled.
    #[serde(default)]
    pub error_reason: Option<String>,
}

impl Job {
    pub fn new(
        id: JobId,
        query: impl Into<String>,
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        let now = current_timestamp_ms();
        Self {
            id,
            query: query.into(),
            custom_query: false,
            source: source.into(),
            destination: destination.into(),
            title: 0,
            status: JobStatus::Waiting,
            created_at: now,
            updated_at: now,
            error_reason: None,
        }
    }

    /// Update the job's updated_at timestamp to now.
    pub fn touch(&mut self) {
        self.updated_at = current_timestamp_ms();
    }

    pub fn set_status(&mut self, status: JobStatus) {
        self.status = status;
        self.touch();
    }

    /// Mark the job as failed with a reason.
    pub fn fail(&mut self, reason: &str) {
        self.status = JobStatus::Error;
        self.error_reason = Some(reason.to_string());
        self.touch();
    }

    pub fn cancel(&mut self, reason: &str) {
        self.status = JobStatus::Cancelled;
        self.error_reason = Some(reason.to_string());
        self.touch();
    }

    /// Check if the job is in a terminal state (completed, error, or cancelled).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            JobStatus::Completed | JobStatus::Error | JobStatus::Cancelled
        )
    }

    /// Check if the job is active (waiting or in progress).
    pub fn is_active(&self) -> bool {
        matches!(self.status, JobStatus::Waiting | JobStatus::InProgress)
    }
}

/// Get current timestamp in milliseconds since Unix epoch.
pub(crate) fn current_timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Writes the job list to `path`.
///
/// The list is written to a sibling temp file first and renamed over the
/// target, so a crash mid-write leaves the previous file intact.
pub fn save_jobs(jobs: &[Job], path: &Path) -> Result<(), io::Error> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let json = serde_json::to_string_pretty(jobs)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)
}

/// Loads a job list written by [`save_jobs`].
///
/// A missing or blank file is an empty list. Anything else that fails to
/// parse is reported as `InvalidData`.
pub fn load_jobs(path: &Path) -> Result<Vec<Job>, io::Error> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    serde_json::from_str(&content).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Collapses doubled backslashes so `C:\\out\\x.mp4` and `C:\out\x.mp4`
/// compare equal. No other path equivalence is attempted.
pub fn normalize_destination(path: &str) -> String {
    let mut normalized = path.to_string();
    while normalized.contains("\\\\") {
        normalized = normalized.replace("\\\\", "\\");
    }
    normalized
}

/// Checks whether any job already writes to `destination`.
pub fn job_exists_for_destination(jobs: &[Job], destination: &Path) -> bool {
    let wanted = normalize_destination(&destination.to_string_lossy());
    jobs.iter()
        .any(|job| normalize_destination(&job.destination.to_string_lossy()) == wanted)
}
