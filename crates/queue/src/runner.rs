//! Sequential queue execution.
//!
//! [`QueueRunner`] takes jobs off the head of a [`JobQueue`] one at a time,
//! hands each to a fresh engine from the [`EngineFactory`], and reports what
//! happens to every subscriber. Pause takes effect between jobs; stop
//! interrupts the job in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::{Config, LoggingConfig, PostQueueAction};
use crate::engine::{
    DoneReport, EngineError, EngineFactory, EngineHandle, EnginePhase, ProgressReport,
};
use crate::jobs::{Job, JobId, JobStatus};
use crate::log_capture::archive_log;
use crate::post_action::perform_post_queue_action;
use crate::queue::{JobQueue, QueueError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
    Stopped,
}

/// Notifications raised while the queue runs, in the order they happen.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    NewJobStarted { job: Job },
    Progress { job_id: JobId, report: ProgressReport },
    CurrentJobCompleted { job: Job, success: bool },
    QueuePaused,
    QueueCompleted,
    QueueStopped,
}

/// Tally of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// True when the run ended because of [`QueueRunner::stop`].
    pub stopped: bool,
}

impl RunSummary {
    fn record(&mut self, job: &Job) {
        match job.status {
            JobStatus::Completed => self.completed += 1,
            JobStatus::Cancelled => self.cancelled += 1,
            _ => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// How often the engine is asked for progress.
    pub poll_interval: Duration,
    /// How often a paused queue rechecks for resume or stop.
    pub pause_poll: Duration,
    pub logging: LoggingConfig,
    pub after_queue: PostQueueAction,
}

impl RunnerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.engine.poll_interval_ms.max(1)),
            pause_poll: Duration::from_secs(config.queue.pause_poll_secs.max(1)),
            logging: config.logging.clone(),
            after_queue: config.after_queue,
        }
    }
}

struct RunnerInner {
    queue: Arc<JobQueue>,
    factory: Arc<dyn EngineFactory>,
    settings: RunnerSettings,
    state: Mutex<RunnerState>,
    active: AtomicBool,
    pause_requested: AtomicBool,
    stop_requested: AtomicBool,
    wake: Notify,
    current: Mutex<Option<Arc<dyn EngineHandle>>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<QueueEvent>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RunnerInner {
    fn emit(&self, event: QueueEvent) {
        debug!(?event, "queue event");
        lock(&self.subscribers).retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn set_state(&self, state: RunnerState) {
        *lock(&self.state) = state;
    }

    fn stopping(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    fn current_engine(&self) -> Option<Arc<dyn EngineHandle>> {
        lock(&self.current).clone()
    }

    async fn wait_while_paused(&self) {
        if !self.pause_requested.load(Ordering::SeqCst) || self.stopping() {
            return;
        }

        self.set_state(RunnerState::Paused);
        self.emit(QueueEvent::QueuePaused);
        info!(pending = self.queue.count(), "queue paused");

        while self.pause_requested.load(Ordering::SeqCst) && !self.stopping() {
            tokio::select! {
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.settings.pause_poll) => {}
            }
        }

        if !self.stopping() {
            self.set_state(RunnerState::Running);
            info!("queue resumed");
        }
    }
}

/// Drives a [`JobQueue`] through an engine, one job at a time.
#[derive(Clone)]
pub struct QueueRunner {
    inner: Arc<RunnerInner>,
}

impl QueueRunner {
    pub fn new(
        queue: Arc<JobQueue>,
        factory: Arc<dyn EngineFactory>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            inner: Arc::new(RunnerInner {
                queue,
                factory,
                settings,
                state: Mutex::new(RunnerState::Idle),
                active: AtomicBool::new(false),
                pause_requested: AtomicBool::new(false),
                stop_requested: AtomicBool::new(false),
                wake: Notify::new(),
                current: Mutex::new(None),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.inner.queue
    }

    /// Start working through the queue.
    ///
    /// Returns the worker's handle when a new run begins. When a run is
    /// already active this clears any pending pause and returns `None`, as
    /// it does for an empty queue.
    pub fn start(&self) -> Option<JoinHandle<RunSummary>> {
        let inner = &self.inner;
        if inner.active.load(Ordering::SeqCst) {
            self.resume();
            return None;
        }
        if inner.queue.is_empty() {
            debug!("start requested on an empty queue");
            return None;
        }
        if inner
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.resume();
            return None;
        }

        inner.pause_requested.store(false, Ordering::SeqCst);
        inner.stop_requested.store(false, Ordering::SeqCst);
        inner.set_state(RunnerState::Running);
        Some(tokio::spawn(run_queue(inner.clone())))
    }

    /// Pause once the current job finishes.
    pub fn pause(&self) {
        if self.inner.active.load(Ordering::SeqCst) {
            self.inner.pause_requested.store(true, Ordering::SeqCst);
            info!("queue will pause after the current job");
        }
    }

    pub fn resume(&self) {
        self.inner.pause_requested.store(false, Ordering::SeqCst);
        self.inner.wake.notify_one();
    }

    /// Stop the run, interrupting the job in flight.
    pub async fn stop(&self) {
        let inner = &self.inner;
        if !inner.active.load(Ordering::SeqCst) {
            return;
        }
        inner.stop_requested.store(true, Ordering::SeqCst);
        inner.pause_requested.store(false, Ordering::SeqCst);
        inner.wake.notify_one();

        if let Some(engine) = inner.current_engine() {
            info!("stopping current encode");
            engine.stop().await;
        }
    }

    /// Pause the encode itself, where the engine supports it.
    pub async fn pause_encode(&self) -> Result<(), EngineError> {
        match self.inner.current_engine() {
            Some(engine) => engine.pause().await,
            None => Err(EngineError::InvalidState {
                operation: "pause",
                phase: EnginePhase::Idle,
            }),
        }
    }

    pub async fn resume_encode(&self) -> Result<(), EngineError> {
        match self.inner.current_engine() {
            Some(engine) => engine.resume().await,
            None => Err(EngineError::InvalidState {
                operation: "resume",
                phase: EnginePhase::Idle,
            }),
        }
    }

    /// Receive every event raised from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<QueueEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.inner.subscribers).push(tx);
        rx
    }

    pub fn state(&self) -> RunnerState {
        *lock(&self.inner.state)
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }
}

async fn run_queue(inner: Arc<RunnerInner>) -> RunSummary {
    let mut summary = RunSummary::default();
    info!(pending = inner.queue.count(), "queue run started");

    loop {
        if inner.stopping() {
            break;
        }

        let job = match inner.queue.get_next_job() {
            Ok(job) => job,
            Err(QueueError::Empty) => break,
            Err(e) => {
                error!(error = %e, "failed to take next job");
                break;
            }
        };

        let job = run_job(&inner, job).await;
        summary.record(&job);
        inner.queue.record_last_encode(&job);
        let success = job.status == JobStatus::Completed;
        inner.emit(QueueEvent::CurrentJobCompleted { job, success });

        if inner.stopping() {
            break;
        }
        inner.wait_while_paused().await;
    }

    summary.stopped = inner.stopping();
    if summary.stopped {
        inner.set_state(RunnerState::Stopped);
        inner.emit(QueueEvent::QueueStopped);
        info!(?summary, "queue stopped");
    } else {
        inner.set_state(RunnerState::Completed);
        inner.emit(QueueEvent::QueueCompleted);
        info!(?summary, "queue completed");

        if let Err(e) = perform_post_queue_action(inner.settings.after_queue).await {
            warn!(error = %e, "post-queue action failed");
        }
    }

    inner.active.store(false, Ordering::SeqCst);
    summary
}

async fn run_job(inner: &RunnerInner, mut job: Job) -> Job {
    info!(
        job_id = job.id,
        source = %job.source.display(),
        destination = %job.destination.display(),
        "job started"
    );
    inner.emit(QueueEvent::NewJobStarted { job: job.clone() });

    let engine = match inner.factory.create() {
        Ok(engine) => engine,
        Err(e) => {
            error!(job_id = job.id, error = %e, "no engine available");
            job.fail(&e.to_string());
            return job;
        }
    };

    if let Err(e) = engine.start(&job).await {
        error!(job_id = job.id, error = %e, "engine failed to start");
        job.fail(&e.to_string());
        archive(inner, engine.as_ref(), &job);
        return job;
    }

    *lock(&inner.current) = Some(engine.clone());
    if inner.stopping() {
        // stop arrived before the engine was registered
        engine.stop().await;
    }

    let done = watch_progress(inner, job.id, engine.as_ref()).await;
    lock(&inner.current).take();
    archive(inner, engine.as_ref(), &job);

    if done.success {
        job.set_status(JobStatus::Completed);
    } else if inner.stopping() {
        job.cancel("stopped by user");
    } else {
        job.fail(&format!("engine exited with code {}", done.error_code));
    }
    info!(job_id = job.id, status = %job.status, "job finished");
    job
}

/// Relay progress until the engine terminates.
async fn watch_progress(inner: &RunnerInner, job_id: JobId, engine: &dyn EngineHandle) -> DoneReport {
    let mut ticker = tokio::time::interval(inner.settings.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let wait = engine.wait();
    tokio::pin!(wait);
    let mut last: Option<ProgressReport> = None;

    loop {
        tokio::select! {
            done = &mut wait => return done,
            _ = ticker.tick() => {
                let Some(report) = engine.poll_status() else { continue };
                if matches!(report, ProgressReport::Done { .. }) || last.as_ref() == Some(&report) {
                    continue;
                }
                inner.emit(QueueEvent::Progress { job_id, report: report.clone() });
                last = Some(report);
            }
        }
    }
}

fn archive(inner: &RunnerInner, engine: &dyn EngineHandle, job: &Job) {
    let text = engine.activity_log().text();
    match archive_log(&text, &job.destination, &inner.settings.logging) {
        Ok(paths) => debug!(job_id = job.id, copies = paths.len(), "encode log archived"),
        Err(e) => warn!(job_id = job.id, error = %e, "failed to archive encode log"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Session;
    use crate::log_capture::ActivityLog;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tempfile::TempDir;

    #[derive(Debug, Clone, Copy)]
    enum Behavior {
        Succeed,
        Fail(i32),
        RefuseLaunch,
        RunUntilStopped,
    }

    struct FakeEngine {
        session: Arc<Session>,
        behavior: Behavior,
    }

    #[async_trait]
    impl EngineHandle for FakeEngine {
        fn backend(&self) -> &'static str {
            "fake"
        }

        async fn start(&self, job: &Job) -> Result<(), EngineError> {
            self.session
                .transition("start", EnginePhase::Idle, EnginePhase::Starting)?;
            self.session.log().begin(&format!("query {}\n", job.query), None, None)?;
            if let Behavior::RefuseLaunch = self.behavior {
                self.session.finish(DoneReport::failed(-1));
                return Err(EngineError::Launch("refused".to_string()));
            }
            self.session.set_phase(EnginePhase::Running);

            let session = self.session.clone();
            let behavior = self.behavior;
            tokio::spawn(async move {
                session.publish(ProgressReport::Working {
                    percent: 50.0,
                    current_fps: 10.0,
                    avg_fps: 10.0,
                    eta: Duration::from_secs(1),
                    pass: 1,
                    pass_count: 1,
                });
                session.log().append_line("encoding");
                tokio::time::sleep(Duration::from_millis(30)).await;
                match behavior {
                    Behavior::Succeed => session.finish(DoneReport::succeeded()),
                    Behavior::Fail(code) => session.finish(DoneReport::failed(code)),
                    _ => {}
                }
            });
            Ok(())
        }

        async fn pause(&self) -> Result<(), EngineError> {
            Err(EngineError::NotSupported {
                operation: "pause",
                backend: "fake",
            })
        }

        async fn resume(&self) -> Result<(), EngineError> {
            Err(EngineError::NotSupported {
                operation: "resume",
                backend: "fake",
            })
        }

        async fn stop(&self) {
            self.session.finish(DoneReport::failed(-1));
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

    #[derive(Default)]
    struct FakeFactory {
        script: Mutex<VecDeque<Behavior>>,
    }

    impl FakeFactory {
        fn new(script: Vec<Behavior>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
            })
        }
    }

    impl EngineFactory for FakeFactory {
        fn create(&self) -> Result<Arc<dyn EngineHandle>, EngineError> {
            let behavior = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Behavior::Succeed);
            Ok(Arc::new(FakeEngine {
                session: Arc::new(Session::new()),
                behavior,
            }))
        }
    }

    fn settings(dir: &TempDir) -> RunnerSettings {
        let mut logging = Config::default().logging;
        logging.log_dir = dir.path().join("logs");
        RunnerSettings {
            poll_interval: Duration::from_millis(5),
            pause_poll: Duration::from_millis(10),
            logging,
            after_queue: PostQueueAction::None,
        }
    }

    fn queue_with(n: usize) -> Arc<JobQueue> {
        let queue = Arc::new(JobQueue::in_memory());
        for i in 1..=n {
            queue.add(format!("-i {i}.mkv"), format!("{i}.mkv"), format!("{i}.mp4"));
        }
        queue
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<QueueEvent>) -> Vec<QueueEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn lifecycle(events: &[QueueEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                QueueEvent::NewJobStarted { job } => Some(format!("start {}", job.id)),
                QueueEvent::CurrentJobCompleted { job, success } => {
                    Some(format!("done {} {}", job.id, success))
                }
                QueueEvent::QueuePaused => Some("paused".to_string()),
                QueueEvent::QueueCompleted => Some("completed".to_string()),
                QueueEvent::QueueStopped => Some("stopped".to_string()),
                QueueEvent::Progress { .. } => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_runs_jobs_in_order() {
        let dir = TempDir::new().unwrap();
        let runner = QueueRunner::new(queue_with(2), FakeFactory::new(vec![]), settings(&dir));
        let mut rx = runner.subscribe();

        let summary = runner.start().unwrap().await.unwrap();
        assert_eq!(summary.completed, 2);
        assert!(!summary.stopped);
        assert_eq!(runner.state(), RunnerState::Completed);
        assert!(runner.queue().is_empty());
        assert!(!runner.is_active());

        let events = drain(&mut rx);
        assert_eq!(
            lifecycle(&events),
            vec!["start 1", "done 1 true", "start 2", "done 2 true", "completed"]
        );
        assert_eq!(
            runner.queue().last_encode().unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_progress_only_between_start_and_completion() {
        let dir = TempDir::new().unwrap();
        let runner = QueueRunner::new(queue_with(2), FakeFactory::new(vec![]), settings(&dir));
        let mut rx = runner.subscribe();
        runner.start().unwrap().await.unwrap();

        let mut running: Option<JobId> = None;
        let mut progress_seen = 0;
        for event in drain(&mut rx) {
            match event {
                QueueEvent::NewJobStarted { job } => running = Some(job.id),
                QueueEvent::Progress { job_id, .. } => {
                    assert_eq!(Some(job_id), running);
                    progress_seen += 1;
                }
                QueueEvent::CurrentJobCompleted { .. } => running = None,
                _ => {}
            }
        }
        assert!(progress_seen > 0);
    }

    #[tokio::test]
    async fn test_launch_failure_does_not_stop_the_queue() {
        let dir = TempDir::new().unwrap();
        let factory = FakeFactory::new(vec![Behavior::RefuseLaunch, Behavior::Fail(2)]);
        let runner = QueueRunner::new(queue_with(3), factory, settings(&dir));
        let mut rx = runner.subscribe();

        let summary = runner.start().unwrap().await.unwrap();
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.completed, 1);
        assert_eq!(
            lifecycle(&drain(&mut rx)),
            vec![
                "start 1",
                "done 1 false",
                "start 2",
                "done 2 false",
                "start 3",
                "done 3 true",
                "completed"
            ]
        );
    }

    #[tokio::test]
    async fn test_stop_cancels_current_job_and_keeps_the_rest() {
        let dir = TempDir::new().unwrap();
        let factory = FakeFactory::new(vec![Behavior::RunUntilStopped]);
        let runner = QueueRunner::new(queue_with(2), factory, settings(&dir));
        let mut rx = runner.subscribe();

        let handle = runner.start().unwrap();
        match rx.recv().await.unwrap() {
            QueueEvent::NewJobStarted { job } => assert_eq!(job.id, 1),
            other => panic!("unexpected event {other:?}"),
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        runner.stop().await;

        let summary = handle.await.unwrap();
        assert!(summary.stopped);
        assert_eq!(summary.cancelled, 1);
        assert_eq!(runner.state(), RunnerState::Stopped);
        assert_eq!(runner.queue().count(), 1);
        assert_eq!(
            lifecycle(&drain(&mut rx)),
            vec!["done 1 false", "stopped"]
        );
        assert_eq!(
            runner.queue().last_encode().unwrap().status,
            JobStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_pause_between_jobs_then_resume() {
        let dir = TempDir::new().unwrap();
        let runner = QueueRunner::new(queue_with(2), FakeFactory::new(vec![]), settings(&dir));
        let mut rx = runner.subscribe();

        let handle = runner.start().unwrap();
        runner.pause();

        loop {
            if let QueueEvent::QueuePaused = rx.recv().await.unwrap() {
                break;
            }
        }
        assert_eq!(runner.state(), RunnerState::Paused);
        assert_eq!(runner.queue().count(), 1);

        // a second start while paused resumes instead of spawning
        assert!(runner.start().is_none());
        let summary = handle.await.unwrap();
        assert_eq!(summary.completed, 2);
        assert_eq!(runner.state(), RunnerState::Completed);
    }

    #[tokio::test]
    async fn test_stop_while_paused() {
        let dir = TempDir::new().unwrap();
        let runner = QueueRunner::new(queue_with(2), FakeFactory::new(vec![]), settings(&dir));
        let mut rx = runner.subscribe();

        let handle = runner.start().unwrap();
        runner.pause();
        loop {
            if let QueueEvent::QueuePaused = rx.recv().await.unwrap() {
                break;
            }
        }
        runner.stop().await;

        let summary = handle.await.unwrap();
        assert!(summary.stopped);
        assert_eq!(summary.completed, 1);
        assert_eq!(runner.queue().count(), 1);
    }

    #[tokio::test]
    async fn test_start_on_empty_queue_does_nothing() {
        let dir = TempDir::new().unwrap();
        let runner = QueueRunner::new(queue_with(0), FakeFactory::new(vec![]), settings(&dir));
        assert!(runner.start().is_none());
        assert_eq!(runner.state(), RunnerState::Idle);
    }

    #[tokio::test]
    async fn test_engine_pause_without_current_job() {
        let dir = TempDir::new().unwrap();
        let runner = QueueRunner::new(queue_with(0), FakeFactory::new(vec![]), settings(&dir));
        assert!(matches!(
            runner.pause_encode().await,
            Err(EngineError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_logs_are_archived_per_job() {
        let dir = TempDir::new().unwrap();
        let runner = QueueRunner::new(queue_with(1), FakeFactory::new(vec![]), settings(&dir));
        runner.start().unwrap().await.unwrap();

        let archived: Vec<_> = std::fs::read_dir(dir.path().join("logs"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(archived.len(), 1);
        assert!(archived[0].starts_with("1.mp4 "));

        let text = std::fs::read_to_string(dir.path().join("logs").join(&archived[0])).unwrap();
        assert_eq!(text, "query -i 1.mkv\nencoding\n");
    }
}
