//! Services manager for the long-running pipeline tasks
//!
//! The cache watcher and the organizer register as managed tasks and are
//! started, stopped, and queried through the manager; the operator-facing
//! control surface consumes exactly these four operations (`start`, `stop`,
//! `status`, `run_once`).
//!
//! One live instance per task: `start` on a running task is a no-op that
//! reports the current state, concurrent starts are serialized per task, and
//! `run_once` is single-flight. Task failures are recorded on the status
//! board; they never propagate to the manager or sibling tasks.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Lifecycle state of a managed task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Aggregated result of one on-demand run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub processed: usize,
    pub skipped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

/// Status of one managed task, readable concurrently with the task running.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServiceStatus {
    pub state: ServiceState,
    /// Last successful poll (cache watcher)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_poll: Option<DateTime<Utc>>,
    /// Last completed run (organizer)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<RunSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Shared status board. Writers are the owning task and the manager; readers
/// take a snapshot without blocking either beyond the read lock.
#[derive(Clone, Default)]
pub struct StatusBoard(Arc<RwLock<HashMap<String, ServiceStatus>>>);

impl StatusBoard {
    pub fn snapshot(&self) -> HashMap<String, ServiceStatus> {
        self.0.read().clone()
    }

    fn ensure(&self, name: &str) {
        self.0.write().entry(name.to_string()).or_default();
    }

    fn set_state(&self, name: &str, state: ServiceState) {
        self.0.write().entry(name.to_string()).or_default().state = state;
    }

    fn state_of(&self, name: &str) -> ServiceState {
        self.0.read().get(name).map(|s| s.state).unwrap_or_default()
    }

    fn record_poll(&self, name: &str) {
        self.0
            .write()
            .entry(name.to_string())
            .or_default()
            .last_poll = Some(Utc::now());
    }

    fn record_run(&self, name: &str, summary: RunSummary) {
        self.0.write().entry(name.to_string()).or_default().last_run = Some(summary);
    }

    fn record_error(&self, name: &str, message: String) {
        self.0
            .write()
            .entry(name.to_string())
            .or_default()
            .last_error = Some(message);
    }

    /// A healthy start or run supersedes whatever failed before it.
    fn clear_error(&self, name: &str) {
        self.0
            .write()
            .entry(name.to_string())
            .or_default()
            .last_error = None;
    }
}

/// Handle a task uses to check for cancellation and publish progress.
#[derive(Clone)]
pub struct TaskContext {
    pub cancel: CancellationToken,
    board: StatusBoard,
    name: &'static str,
}

impl TaskContext {
    pub fn record_poll(&self) {
        self.board.record_poll(self.name);
    }

    pub fn record_run(&self, summary: RunSummary) {
        self.board.record_run(self.name, summary);
    }
}

/// A task the manager can start, stop, and run on demand.
///
/// `run` is the long-running mode: loop until `ctx.cancel` fires, checking it
/// at the top of each iteration, never mid-operation. A task whose work is a
/// single pass (the organizer) returns when the pass completes. `run_once`
/// performs exactly one pass/poll and reports a summary.
#[async_trait]
pub trait ManagedTask: Send + Sync + 'static {
    /// Unique name for logging and lookup (e.g. "cache_watcher").
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: TaskContext) -> anyhow::Result<()>;

    async fn run_once(&self, ctx: TaskContext) -> anyhow::Result<RunSummary>;
}

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("unknown service: {0}")]
    UnknownService(String),

    #[error("{0} is already running")]
    AlreadyRunning(&'static str),

    #[error("{service} failed: {message}")]
    TaskFailed {
        service: &'static str,
        message: String,
    },
}

#[derive(Default)]
struct TaskRuntime {
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

struct TaskSlot {
    task: Arc<dyn ManagedTask>,
    // Serializes start/stop/run_once for this task
    runtime: Mutex<TaskRuntime>,
}

/// Owns the managed tasks and their lifecycle.
pub struct ServicesManager {
    board: StatusBoard,
    slots: HashMap<&'static str, TaskSlot>,
}

impl ServicesManager {
    pub fn new() -> Self {
        Self {
            board: StatusBoard::default(),
            slots: HashMap::new(),
        }
    }

    pub fn register(&mut self, task: Arc<dyn ManagedTask>) {
        self.board.ensure(task.name());
        self.slots.insert(
            task.name(),
            TaskSlot {
                task,
                runtime: Mutex::new(TaskRuntime::default()),
            },
        );
    }

    /// Snapshot of every task's status.
    pub fn status(&self) -> HashMap<String, ServiceStatus> {
        self.board.snapshot()
    }

    /// Start a task's long-running mode. Idempotent: a Running task stays
    /// untouched and its current state is reported.
    pub async fn start(&self, name: &str) -> Result<ServiceState, ManagerError> {
        let slot = self.slot(name)?;
        let task_name = slot.task.name();
        let mut rt = slot.runtime.lock().await;
        reap(&mut rt);
        if rt.handle.is_some() {
            return Ok(self.board.state_of(task_name));
        }

        self.board.set_state(task_name, ServiceState::Starting);
        let cancel = CancellationToken::new();
        let ctx = TaskContext {
            cancel: cancel.clone(),
            board: self.board.clone(),
            name: task_name,
        };
        let task = slot.task.clone();
        let board = self.board.clone();
        // Running is published before the spawn; the task itself only ever
        // writes Stopped at exit, so a fast-exiting task cannot be
        // overwritten back to Running
        self.board.clear_error(task_name);
        self.board.set_state(task_name, ServiceState::Running);
        let handle = tokio::spawn(async move {
            if let Err(e) = task.run(ctx).await {
                error!(service = task_name, error = %e, "Service exited with error");
                board.record_error(task_name, e.to_string());
            }
            board.set_state(task_name, ServiceState::Stopped);
        });
        rt.cancel = Some(cancel);
        rt.handle = Some(handle);

        info!(service = task_name, "Service started");
        Ok(ServiceState::Running)
    }

    /// Signal cancellation and wait for the task to observe it at its next
    /// cooperative checkpoint. In-flight I/O is never interrupted.
    pub async fn stop(&self, name: &str) -> Result<ServiceState, ManagerError> {
        let slot = self.slot(name)?;
        let task_name = slot.task.name();
        let mut rt = slot.runtime.lock().await;

        let Some(handle) = rt.handle.take() else {
            return Ok(self.board.state_of(task_name));
        };
        self.board.set_state(task_name, ServiceState::Stopping);
        if let Some(cancel) = rt.cancel.take() {
            cancel.cancel();
        }
        if let Err(e) = handle.await {
            error!(service = task_name, error = %e, "Service task panicked");
            self.board.record_error(task_name, e.to_string());
        }
        self.board.set_state(task_name, ServiceState::Stopped);

        info!(service = task_name, "Service stopped");
        Ok(ServiceState::Stopped)
    }

    /// Run a single pass of a task, single-flight: rejected while the task is
    /// busy in any mode.
    pub async fn run_once(&self, name: &str) -> Result<RunSummary, ManagerError> {
        let slot = self.slot(name)?;
        let task_name = slot.task.name();
        let Ok(mut rt) = slot.runtime.try_lock() else {
            return Err(ManagerError::AlreadyRunning(task_name));
        };
        reap(&mut rt);
        if rt.handle.is_some() {
            return Err(ManagerError::AlreadyRunning(task_name));
        }

        self.board.set_state(task_name, ServiceState::Starting);
        let ctx = TaskContext {
            cancel: CancellationToken::new(),
            board: self.board.clone(),
            name: task_name,
        };
        self.board.set_state(task_name, ServiceState::Running);
        let result = slot.task.run_once(ctx).await;
        self.board.set_state(task_name, ServiceState::Stopped);

        match result {
            Ok(summary) => {
                self.board.clear_error(task_name);
                self.board.record_run(task_name, summary.clone());
                Ok(summary)
            }
            Err(e) => {
                self.board.record_error(task_name, e.to_string());
                Err(ManagerError::TaskFailed {
                    service: task_name,
                    message: e.to_string(),
                })
            }
        }
    }

    fn slot(&self, name: &str) -> Result<&TaskSlot, ManagerError> {
        self.slots
            .get(name)
            .ok_or_else(|| ManagerError::UnknownService(name.to_string()))
    }
}

impl Default for ServicesManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Forget a handle whose task already finished so the slot can start again.
fn reap(rt: &mut TaskRuntime) {
    if rt.handle.as_ref().is_some_and(|h| h.is_finished()) {
        rt.handle = None;
        rt.cancel = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct TickTask {
        ticks: Arc<AtomicUsize>,
        run_delay: Duration,
    }

    #[async_trait]
    impl ManagedTask for TickTask {
        fn name(&self) -> &'static str {
            "tick"
        }

        async fn run(&self, ctx: TaskContext) -> anyhow::Result<()> {
            loop {
                if ctx.cancel.is_cancelled() {
                    break;
                }
                self.ticks.fetch_add(1, Ordering::SeqCst);
                ctx.record_poll();
                tokio::select! {
                    _ = ctx.cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_millis(5)) => {}
                }
            }
            Ok(())
        }

        async fn run_once(&self, _ctx: TaskContext) -> anyhow::Result<RunSummary> {
            tokio::time::sleep(self.run_delay).await;
            self.ticks.fetch_add(1, Ordering::SeqCst);
            Ok(RunSummary {
                processed: 1,
                skipped: 0,
                error: None,
                completed_at: Utc::now(),
            })
        }
    }

    fn manager_with_tick(run_delay: Duration) -> (ServicesManager, Arc<AtomicUsize>) {
        let ticks = Arc::new(AtomicUsize::new(0));
        let mut manager = ServicesManager::new();
        manager.register(Arc::new(TickTask {
            ticks: ticks.clone(),
            run_delay,
        }));
        (manager, ticks)
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let (manager, ticks) = manager_with_tick(Duration::ZERO);

        assert_eq!(manager.start("tick").await.unwrap(), ServiceState::Running);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let before = ticks.load(Ordering::SeqCst);

        // Second start must not spawn a second loop
        assert_eq!(manager.start("tick").await.unwrap(), ServiceState::Running);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let after = ticks.load(Ordering::SeqCst);

        // Roughly one tick per 5ms from a single loop; two loops would double it
        assert!(
            after - before <= 8,
            "unexpected tick rate: {}",
            after - before
        );

        manager.stop("tick").await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_reaches_stopped() {
        let (manager, _ticks) = manager_with_tick(Duration::ZERO);
        manager.start("tick").await.unwrap();
        assert_eq!(manager.stop("tick").await.unwrap(), ServiceState::Stopped);
        assert_eq!(
            manager.status().get("tick").unwrap().state,
            ServiceState::Stopped
        );

        // Stopping again is a no-op
        assert_eq!(manager.stop("tick").await.unwrap(), ServiceState::Stopped);
    }

    #[tokio::test]
    async fn test_run_once_is_single_flight() {
        let (manager, _ticks) = manager_with_tick(Duration::from_millis(50));
        let manager = Arc::new(manager);

        let first = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.run_once("tick").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let second = manager.run_once("tick").await;
        assert!(matches!(second, Err(ManagerError::AlreadyRunning(_))));

        let first = first.await.unwrap().unwrap();
        assert_eq!(first.processed, 1);
    }

    #[tokio::test]
    async fn test_run_once_rejected_while_running() {
        let (manager, _ticks) = manager_with_tick(Duration::ZERO);
        manager.start("tick").await.unwrap();
        assert!(matches!(
            manager.run_once("tick").await,
            Err(ManagerError::AlreadyRunning(_))
        ));
        manager.stop("tick").await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_service() {
        let (manager, _ticks) = manager_with_tick(Duration::ZERO);
        assert!(matches!(
            manager.start("nope").await,
            Err(ManagerError::UnknownService(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_fast_exit_never_reports_stale_running() {
        struct ExitImmediately;

        #[async_trait]
        impl ManagedTask for ExitImmediately {
            fn name(&self) -> &'static str {
                "fast"
            }

            async fn run(&self, _ctx: TaskContext) -> anyhow::Result<()> {
                Ok(())
            }

            async fn run_once(&self, _ctx: TaskContext) -> anyhow::Result<RunSummary> {
                Ok(RunSummary {
                    processed: 0,
                    skipped: 0,
                    error: None,
                    completed_at: Utc::now(),
                })
            }
        }

        let mut manager = ServicesManager::new();
        manager.register(Arc::new(ExitImmediately));

        // The task's Stopped write must never lose to the start path's
        // Running write, no matter how quickly run() returns
        for i in 0..25 {
            manager.start("fast").await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
            assert_eq!(
                manager.status().get("fast").unwrap().state,
                ServiceState::Stopped,
                "iteration {i}: finished task still reported Running"
            );
        }
    }

    #[tokio::test]
    async fn test_error_cleared_on_next_success() {
        struct Flaky {
            fail: Arc<std::sync::atomic::AtomicBool>,
        }

        #[async_trait]
        impl ManagedTask for Flaky {
            fn name(&self) -> &'static str {
                "flaky"
            }

            async fn run(&self, _ctx: TaskContext) -> anyhow::Result<()> {
                Ok(())
            }

            async fn run_once(&self, _ctx: TaskContext) -> anyhow::Result<RunSummary> {
                if self.fail.load(Ordering::SeqCst) {
                    anyhow::bail!("lookup unavailable");
                }
                Ok(RunSummary {
                    processed: 1,
                    skipped: 0,
                    error: None,
                    completed_at: Utc::now(),
                })
            }
        }

        let fail = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let mut manager = ServicesManager::new();
        manager.register(Arc::new(Flaky { fail: fail.clone() }));

        assert!(manager.run_once("flaky").await.is_err());
        assert!(manager.status().get("flaky").unwrap().last_error.is_some());

        // The stale error must not linger next to a healthy run
        fail.store(false, Ordering::SeqCst);
        manager.run_once("flaky").await.unwrap();
        assert!(manager.status().get("flaky").unwrap().last_error.is_none());

        // A fresh start clears it as well
        fail.store(true, Ordering::SeqCst);
        assert!(manager.run_once("flaky").await.is_err());
        manager.start("flaky").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(manager.status().get("flaky").unwrap().last_error.is_none());
    }

    #[tokio::test]
    async fn test_restart_after_natural_exit() {
        struct OneShot;

        #[async_trait]
        impl ManagedTask for OneShot {
            fn name(&self) -> &'static str {
                "oneshot"
            }

            async fn run(&self, _ctx: TaskContext) -> anyhow::Result<()> {
                Ok(())
            }

            async fn run_once(&self, _ctx: TaskContext) -> anyhow::Result<RunSummary> {
                Ok(RunSummary {
                    processed: 0,
                    skipped: 0,
                    error: None,
                    completed_at: Utc::now(),
                })
            }
        }

        let mut manager = ServicesManager::new();
        manager.register(Arc::new(OneShot));

        manager.start("oneshot").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            manager.status().get("oneshot").unwrap().state,
            ServiceState::Stopped
        );

        // The finished handle is reaped and the task can start again
        assert_eq!(
            manager.start("oneshot").await.unwrap(),
            ServiceState::Running
        );
    }
}
