//! Run-loop lifecycle shared by every background task.

use crate::worker::wait::{wait_for_with_interval, DEFAULT_CHECK_INTERVAL};
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub type StepFuture<'a> = BoxFuture<'a, Duration>;

/// One unit of background work. Implementations run a single bounded step
/// and report how long the worker should idle before the next one;
/// [`Duration::ZERO`] means more work is immediately available. Steps must
/// not panic and must swallow their own errors; the worker keeps looping no
/// matter what a step observed.
pub trait WorkerLoop: Send + Sync + 'static {
    fn run_step(&self) -> StepFuture<'_>;
}

/// Cooperative polling worker driving one [`WorkerLoop`].
///
/// At most one loop is in flight per worker: `start` while running is a
/// no-op, and `stop` flags the loop to quit, then awaits the in-flight step
/// so no partial work survives it. A stopped worker can be started again.
pub struct Worker {
    name: String,
    task: Arc<dyn WorkerLoop>,
    running: Arc<AtomicBool>,
    check_interval: Duration,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn new(name: impl Into<String>, task: Arc<dyn WorkerLoop>) -> Self {
        Self {
            name: name.into(),
            task,
            running: Arc::new(AtomicBool::new(false)),
            check_interval: DEFAULT_CHECK_INTERVAL,
            handle: None,
        }
    }

    /// Overrides how often an idling loop rechecks for a pending `stop`.
    pub fn with_check_interval(mut self, check_interval: Duration) -> Self {
        self.check_interval = check_interval;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }

        self.running.store(true, Ordering::SeqCst);
        let name = self.name.clone();
        let task = Arc::clone(&self.task);
        let running = Arc::clone(&self.running);
        let check_interval = self.check_interval;

        self.handle = Some(tokio::spawn(async move {
            tracing::debug!(worker = %name, "worker loop started");
            while running.load(Ordering::SeqCst) {
                let idle = task.run_step().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                if !idle.is_zero() {
                    wait_for_with_interval(
                        || !running.load(Ordering::SeqCst),
                        idle,
                        check_interval,
                    )
                    .await;
                }
            }
            tracing::debug!(worker = %name, "worker loop stopped");
        }));
    }

    /// Signals the loop to quit and waits for the in-flight step to finish.
    pub async fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        let Some(handle) = self.handle.take() else {
            return;
        };
        if let Err(error) = handle.await {
            tracing::error!(worker = %self.name, %error, "worker task terminated abnormally");
        }
    }
}
