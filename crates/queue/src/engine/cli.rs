//! Command-line engine backend.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::process::{apply_priority, configure_command, sweep_orphan_processes};
use super::status::parse_cli_status;
use super::{DoneReport, EngineError, EngineHandle, EnginePhase, ProgressReport, Session};
use crate::config::{Config, ProcessPriority};
use crate::jobs::Job;
use crate::log_capture::{query_header, ActivityLog, LAST_ENCODE_LOG};
use crate::query::split_args;

/// How long to wait for output readers to drain after the process exits.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long `stop` waits for the process to go away.
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct CliEngineSettings {
    pub cli_path: PathBuf,
    pub priority: ProcessPriority,
    pub minimized: bool,
    pub sweep_orphans: bool,
    pub log_dir: PathBuf,
    pub max_log_bytes: u64,
}

impl CliEngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            cli_path: config.engine.cli_path.clone(),
            priority: config.engine.process_priority,
            minimized: config.engine.minimized,
            sweep_orphans: config.engine.sweep_orphans,
            log_dir: config.logging.log_dir.clone(),
            max_log_bytes: config.logging.max_log_bytes,
        }
    }
}

/// Kill request shared by the output readers, the monitor and `stop`.
#[derive(Debug, Clone, Default)]
struct KillSwitch {
    notify: Arc<Notify>,
    killed: Arc<AtomicBool>,
}

impl KillSwitch {
    fn request(&self) {
        self.killed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Log a line, killing the engine the first time the log outgrows its limit.
    fn append_guarded(&self, log: &ActivityLog, line: &str) {
        if !log.append_line(line) && !self.killed.swap(true, Ordering::SeqCst) {
            warn!("encode log exceeded its size limit, stopping engine");
            self.notify.notify_one();
        }
    }

    fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

/// Runs the encoder as a child process and reads progress from its stdout.
pub struct CliEngine {
    settings: CliEngineSettings,
    session: Arc<Session>,
    kill: KillSwitch,
}

impl CliEngine {
    pub fn new(settings: CliEngineSettings) -> Self {
        Self {
            settings,
            session: Arc::new(Session::new()),
            kill: KillSwitch::default(),
        }
    }
}

#[async_trait]
impl EngineHandle for CliEngine {
    fn backend(&self) -> &'static str {
        "cli"
    }

    async fn start(&self, job: &Job) -> Result<(), EngineError> {
        self.session
            .transition("start", EnginePhase::Idle, EnginePhase::Starting)?;

        let log = self.session.log();
        let log_path = self.settings.log_dir.join(LAST_ENCODE_LOG);
        let header = query_header(job);
        if let Err(e) = log.begin(&header, Some(&log_path), Some(self.settings.max_log_bytes)) {
            warn!(path = %log_path.display(), error = %e, "encode log file unavailable");
            log.begin(&header, None, Some(self.settings.max_log_bytes))?;
        }

        let mut cmd = Command::new(&self.settings.cli_path);
        cmd.args(split_args(&job.query))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        configure_command(&mut cmd, self.settings.priority, self.settings.minimized);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let reason = format!("{}: {}", self.settings.cli_path.display(), e);
                log.append_line(&format!("failed to start engine: {reason}"));
                let _ = log.finish();
                self.session.finish(DoneReport::failed(-1));
                return Err(EngineError::Launch(reason));
            }
        };

        if let Some(pid) = child.id() {
            info!(job_id = job.id, pid, "engine started");
            tokio::spawn(apply_priority(pid, self.settings.priority));
        }

        let stdout = child.stdout.take().map(|out| {
            tokio::spawn(read_progress(out, self.session.clone(), self.kill.clone()))
        });
        let stderr = child.stderr.take().map(|err| {
            let log = log.clone();
            let kill = self.kill.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(err).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    kill.append_guarded(&log, &line);
                }
            })
        });

        // a stop issued while spawning has already moved us to Stopping
        let _ = self
            .session
            .transition("run", EnginePhase::Starting, EnginePhase::Running);

        let session = self.session.clone();
        let kill = self.kill.clone();
        let log = log.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill.notify.notified() => {
                    if let Err(e) = child.start_kill() {
                        debug!(error = %e, "kill failed, process may have exited");
                    }
                    child.wait().await
                }
            };

            for reader in [stdout, stderr].into_iter().flatten() {
                if tokio::time::timeout(READER_DRAIN_TIMEOUT, reader).await.is_err() {
                    debug!("engine output still open after exit");
                }
            }

            let outcome = match status {
                Ok(status) => {
                    let code = status.code().unwrap_or(-1);
                    if kill.is_killed() {
                        DoneReport::failed(code)
                    } else if status.success() {
                        DoneReport::succeeded()
                    } else {
                        DoneReport::failed(code)
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed waiting for engine");
                    DoneReport::failed(-1)
                }
            };

            if let Err(e) = log.finish() {
                warn!(error = %e, "failed to flush encode log");
            }
            info!(success = outcome.success, code = outcome.error_code, "engine exited");
            session.finish(outcome);
        });

        Ok(())
    }

    async fn pause(&self) -> Result<(), EngineError> {
        Err(EngineError::NotSupported {
            operation: "pause",
            backend: self.backend(),
        })
    }

    async fn resume(&self) -> Result<(), EngineError> {
        Err(EngineError::NotSupported {
            operation: "resume",
            backend: self.backend(),
        })
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
        self.kill.request();

        if self.settings.sweep_orphans {
            let cli_path = self.settings.cli_path.clone();
            match tokio::task::spawn_blocking(move || sweep_orphan_processes(&cli_path)).await {
                Ok(0) => {}
                Ok(n) => info!(count = n, "swept orphaned engine processes"),
                Err(e) => warn!(error = %e, "orphan sweep panicked"),
            }
        }

        if tokio::time::timeout(STOP_TIMEOUT, self.session.wait())
            .await
            .is_err()
        {
            warn!("engine did not exit after stop");
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

/// Read progress from stdout, splitting on both `\r` and `\n`.
async fn read_progress<R: AsyncRead + Unpin>(out: R, session: Arc<Session>, kill: KillSwitch) {
    let mut reader = BufReader::new(out);
    let mut chunk = [0u8; 4096];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        for &byte in &chunk[..n] {
            if byte == b'\r' || byte == b'\n' {
                handle_stdout_line(&pending, &session, &kill);
                pending.clear();
            } else {
                pending.push(byte);
            }
        }
    }
    handle_stdout_line(&pending, &session, &kill);
}

fn handle_stdout_line(bytes: &[u8], session: &Session, kill: &KillSwitch) {
    if bytes.is_empty() {
        return;
    }
    let line = String::from_utf8_lossy(bytes);
    match parse_cli_status(&line) {
        Some(report) => session.publish(report),
        None => kill.append_guarded(session.log(), line.trim_end()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings(dir: &TempDir, cli_path: &str) -> CliEngineSettings {
        CliEngineSettings {
            cli_path: PathBuf::from(cli_path),
            priority: ProcessPriority::Normal,
            minimized: true,
            sweep_orphans: false,
            log_dir: dir.path().to_path_buf(),
            max_log_bytes: 1_000_000,
        }
    }

    #[tokio::test]
    async fn test_launch_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let engine = CliEngine::new(settings(&dir, "/nonexistent/hbqueue-engine"));
        let job = Job::new(1, "-i in.mkv -o out.mp4", "in.mkv", "out.mp4");

        let err = engine.start(&job).await.unwrap_err();
        assert!(matches!(err, EngineError::Launch(_)));
        assert_eq!(engine.phase(), EnginePhase::Terminated);
        assert!(!engine.wait().await.success);
        assert!(engine.activity_log().text().contains("### CLI Query:"));
    }

    #[tokio::test]
    async fn test_pause_is_not_supported() {
        let dir = TempDir::new().unwrap();
        let engine = CliEngine::new(settings(&dir, "HandBrakeCLI"));
        assert!(matches!(
            engine.pause().await,
            Err(EngineError::NotSupported { .. })
        ));
        assert!(matches!(
            engine.resume().await,
            Err(EngineError::NotSupported { .. })
        ));
    }

    #[tokio::test]
    async fn test_stop_before_start_is_harmless() {
        let dir = TempDir::new().unwrap();
        let engine = CliEngine::new(settings(&dir, "HandBrakeCLI"));
        engine.stop().await;
        engine.stop().await;
        assert_eq!(engine.phase(), EnginePhase::Terminated);
    }

    #[tokio::test]
    async fn test_progress_reader_splits_on_carriage_returns() {
        let session = Arc::new(Session::new());
        let output: &[u8] =
            b"Encoding: task 1 of 1, 10.00 %\rEncoding: task 1 of 1, 55.50 % (30.00 fps, avg 29.00 fps, ETA 00h01m00s)\rhello\n";
        read_progress(output, session.clone(), KillSwitch::default()).await;

        assert_eq!(
            session.latest(),
            Some(ProgressReport::Working {
                percent: 55.5,
                current_fps: 30.0,
                avg_fps: 29.0,
                eta: Duration::from_secs(60),
                pass: 1,
                pass_count: 1,
            })
        );
        assert_eq!(session.log().text(), "hello\n");
    }

    #[tokio::test]
    async fn test_stdout_text_counts_toward_log_limit() {
        let session = Arc::new(Session::new());
        session.log().begin("", None, Some(16)).unwrap();
        let kill = KillSwitch::default();

        let output: &[u8] = b"Encoding: task 1 of 1, 5.00 %\rsome chatter\nmore chatter past the limit\n";
        read_progress(output, session.clone(), kill.clone()).await;

        assert!(kill.is_killed());
        // the monitor is woken by the stored permit
        tokio::time::timeout(Duration::from_secs(1), kill.notify.notified())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_stdout_text_within_limit_does_not_kill() {
        let session = Arc::new(Session::new());
        session.log().begin("", None, Some(1_000)).unwrap();
        let kill = KillSwitch::default();

        read_progress(&b"hello\n"[..], session.clone(), kill.clone()).await;
        assert!(!kill.is_killed());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_process_to_completion() {
        let dir = TempDir::new().unwrap();
        let engine = CliEngine::new(settings(&dir, "echo"));
        let job = Job::new(1, "Encoding: task 1 of 1, 99.00 %", "in.mkv", "out.mp4");

        engine.start(&job).await.unwrap();
        let done = engine.wait().await;
        assert!(done.success);
        assert_eq!(engine.phase(), EnginePhase::Terminated);

        let live_log = std::fs::read_to_string(dir.path().join(LAST_ENCODE_LOG)).unwrap();
        assert!(live_log.starts_with("### CLI Query: Encoding: task 1 of 1"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_kills_running_process() {
        let dir = TempDir::new().unwrap();
        let engine = CliEngine::new(settings(&dir, "sleep"));
        let job = Job::new(1, "30", "in.mkv", "out.mp4");

        engine.start(&job).await.unwrap();
        engine.stop().await;
        let done = engine.wait().await;
        assert!(!done.success);
        assert_eq!(engine.phase(), EnginePhase::Terminated);

        // second stop is a no-op
        engine.stop().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let dir = TempDir::new().unwrap();
        let engine = CliEngine::new(settings(&dir, "false"));
        let job = Job::new(1, "", "in.mkv", "out.mp4");

        engine.start(&job).await.unwrap();
        let done = engine.wait().await;
        assert!(!done.success);
        assert_eq!(done.error_code, 1);
    }
}
