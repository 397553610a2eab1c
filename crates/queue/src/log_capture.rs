//! Engine activity log capture.
//!
//! [`ActivityLog`] accumulates the log of the running job in memory and,
//! for the CLI backend, mirrors it into a durable file as lines arrive.
//! [`LogTailer`] follows a log file another process is writing by copying it
//! to a snapshot and reading only the lines past its cursor.
//! [`archive_log`] writes the finished log next to the destination and into
//! the configured log directories.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Local;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::LoggingConfig;
use crate::jobs::Job;

/// File name of the live log for the job currently encoding.
pub const LAST_ENCODE_LOG: &str = "last_encode_log.txt";

/// File name of the snapshot used while tailing an engine-owned log.
pub const TAIL_SNAPSHOT_LOG: &str = "tmp_appReadable_log.txt";

const RULE: &str = "#########################################";

#[derive(Debug, Error)]
pub enum LogCaptureError {
    #[error("failed to snapshot {path}: {source}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("log file error: {0}")]
    Io(#[from] io::Error),
}

/// Header written once at the top of every job log.
pub fn query_header(job: &Job) -> String {
    let mut header = String::new();
    header.push_str(&format!("### CLI Query: {}\n", job.query));
    if job.custom_query {
        header.push_str("### User Query: custom query in use\n");
    }
    header.push_str(RULE);
    header.push_str("\n\n");
    header
}

#[derive(Debug, Default)]
struct LogState {
    header: String,
    body: String,
    file: Option<BufWriter<File>>,
    bytes: u64,
    limit: Option<u64>,
}

/// In-memory log of one job, cheap to clone and share with reader tasks.
#[derive(Debug, Clone, Default)]
pub struct ActivityLog {
    inner: Arc<Mutex<LogState>>,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reset the log for a new job.
    ///
    /// When `file` is given the header and every appended line are also
    /// written there. `limit` caps the captured body in bytes.
    pub fn begin(&self, header: &str, file: Option<&Path>, limit: Option<u64>) -> io::Result<()> {
        let mut state = self.lock();
        *state = LogState {
            header: header.to_string(),
            limit,
            ..LogState::default()
        };

        if let Some(path) = file {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut writer = BufWriter::new(File::create(path)?);
            writer.write_all(header.as_bytes())?;
            state.file = Some(writer);
        }
        Ok(())
    }

    /// Append one line. Returns false once the size limit has been passed.
    pub fn append_line(&self, line: &str) -> bool {
        let mut state = self.lock();
        push_line(&mut state, line);
        within_limit(&state)
    }

    /// Append a batch of lines. Returns false once the size limit has been passed.
    pub fn append_lines<S: AsRef<str>>(&self, lines: &[S]) -> bool {
        let mut state = self.lock();
        for line in lines {
            push_line(&mut state, line.as_ref());
        }
        within_limit(&state)
    }

    /// Drop everything captured after the header.
    pub fn reset_body(&self) {
        let mut state = self.lock();
        state.body.clear();
        state.bytes = 0;
    }

    /// Header followed by the captured body.
    pub fn text(&self) -> String {
        let state = self.lock();
        let mut text = String::with_capacity(state.header.len() + state.body.len());
        text.push_str(&state.header);
        text.push_str(&state.body);
        text
    }

    pub fn body_bytes(&self) -> u64 {
        self.lock().bytes
    }

    /// Flush and close the durable file, if any.
    pub fn finish(&self) -> io::Result<()> {
        let mut state = self.lock();
        match state.file.take() {
            Some(mut writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

fn push_line(state: &mut LogState, line: &str) {
    state.body.push_str(line);
    state.body.push('\n');
    state.bytes += line.len() as u64 + 1;

    let failed = match state.file.as_mut() {
        Some(writer) => writeln!(writer, "{line}").is_err(),
        None => false,
    };
    if failed {
        warn!("log file write failed, continuing in memory only");
        state.file = None;
    }
}

fn within_limit(state: &LogState) -> bool {
    state.limit.map_or(true, |limit| state.bytes <= limit)
}

/// Follows a log file owned by another writer.
#[derive(Debug)]
pub struct LogTailer {
    source: PathBuf,
    snapshot: PathBuf,
    cursor: usize,
}

impl LogTailer {
    pub fn new(source: impl Into<PathBuf>, snapshot: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            snapshot: snapshot.into(),
            cursor: 0,
        }
    }

    /// Append lines written since the last read to `log`.
    ///
    /// Only newline-terminated lines are consumed unless `final_read` is set,
    /// so a line the writer is halfway through is picked up whole next time.
    pub fn tail(&mut self, log: &ActivityLog, final_read: bool) -> Result<usize, LogCaptureError> {
        fs::copy(&self.source, &self.snapshot).map_err(|source| LogCaptureError::Snapshot {
            path: self.source.clone(),
            source,
        })?;
        let bytes = fs::read(&self.snapshot)?;
        let content = String::from_utf8_lossy(&bytes);

        let lines: Vec<&str> = content
            .split_inclusive('\n')
            .filter(|line| final_read || line.ends_with('\n'))
            .map(|line| line.trim_end_matches(['\r', '\n']))
            .collect();

        if lines.len() < self.cursor {
            // the writer started over
            self.cursor = 0;
            log.reset_body();
        }

        let fresh = &lines[self.cursor..];
        log.append_lines(fresh);
        self.cursor = lines.len();
        Ok(fresh.len())
    }

    /// [`tail`](Self::tail) that never fails. Any read error resets the
    /// cursor and the captured body, so the next successful read starts over
    /// instead of leaving a gap.
    pub fn poll(&mut self, log: &ActivityLog, final_read: bool) -> usize {
        match self.tail(log, final_read) {
            Ok(n) => n,
            Err(e) => {
                debug!(error = %e, "log tail failed, resetting");
                self.cursor = 0;
                log.reset_body();
                0
            }
        }
    }
}

/// Write a finished job log to the log directory and, when configured,
/// beside the encoded file and into a copy directory.
///
/// The file name is the destination's file name followed by a timestamp.
pub fn archive_log(
    text: &str,
    destination: &Path,
    settings: &LoggingConfig,
) -> Result<Vec<PathBuf>, LogCaptureError> {
    let name = archive_file_name(destination, &Local::now().format("%Y-%m-%d %H-%M-%S").to_string());

    let mut targets = vec![settings.log_dir.join(&name)];
    if settings.save_log_with_video {
        if let Some(parent) = destination.parent() {
            targets.push(parent.join(&name));
        }
    }
    if let Some(dir) = &settings.save_log_copy_directory {
        targets.push(dir.join(&name));
    }

    let mut written = Vec::with_capacity(targets.len());
    for target in targets {
        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&target, text)?;
        written.push(target);
    }
    Ok(written)
}

fn archive_file_name(destination: &Path, timestamp: &str) -> String {
    let file_name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "encode".to_string());
    format!("{file_name} {timestamp}.txt")
}
