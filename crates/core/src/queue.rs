//! Rate-limited FIFO task queue.
//!
//! Every outbound call to the ledger endpoint goes through one queue. Tasks
//! run one at a time, in submission order, and consecutive task starts are at
//! least `min_gap` apart. A task that fails, times out or panics is reported
//! and the queue moves on; retryable tasks go back to the tail and run again
//! on a later tick.

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::QueueConfig;

type TaskFactory = Box<dyn FnMut() -> BoxFuture<'static, Result<()>> + Send>;

struct QueuedTask {
    label: String,
    factory: TaskFactory,
    attempt: u32,
    max_attempts: u32,
}

/// A task that did not complete successfully.
#[derive(Debug, Clone)]
pub struct TaskFailure {
    pub label: String,
    pub error: String,
    /// 1-based attempt number that failed
    pub attempt: u32,
    pub timed_out: bool,
    /// Whether the task was put back on the queue
    pub will_retry: bool,
}

/// Queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub completed: u64,
    pub failed: u64,
}

pub struct RateLimitedQueue {
    tasks: Mutex<VecDeque<QueuedTask>>,
    wake: Notify,
    min_gap: Duration,
    task_timeout: Duration,
    max_attempts: u32,
    failures: Mutex<Option<mpsc::UnboundedSender<TaskFailure>>>,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl RateLimitedQueue {
    pub fn new(config: &QueueConfig) -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
            wake: Notify::new(),
            min_gap: config.min_gap(),
            task_timeout: config.task_timeout(),
            max_attempts: config.max_attempts.max(1),
            failures: Mutex::new(None),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Route failure reports to a channel in addition to the log.
    ///
    /// There is one reporter at a time: calling this again closes the
    /// receiver handed out before.
    pub fn failure_channel(&self) -> mpsc::UnboundedReceiver<TaskFailure> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.failures.lock().replace(tx).is_some() {
            warn!("Failure channel replaced, previous receiver closed");
        }
        rx
    }

    /// Enqueue a task that runs once.
    pub fn submit<F, Fut>(&self, label: impl Into<String>, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let mut task = Some(task);
        let factory: TaskFactory = Box::new(move || match task.take() {
            Some(task) => task().boxed(),
            None => async { anyhow::bail!("one-shot task polled twice") }.boxed(),
        });
        self.push(label.into(), factory, 1);
    }

    /// Enqueue a task rebuilt by `factory` for each attempt, up to the
    /// configured `max_attempts`.
    pub fn submit_retrying<F, Fut>(&self, label: impl Into<String>, mut factory: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let factory: TaskFactory = Box::new(move || factory().boxed());
        self.push(label.into(), factory, self.max_attempts);
    }

    /// Run a retrying task through the queue and wait for its value.
    pub async fn call<T, F, Fut>(&self, label: impl Into<String>, mut f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let label = label.into();
        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(Mutex::new(Some(tx)));

        self.submit_retrying(label.clone(), move || {
            let tx = tx.clone();
            let fut = f();
            async move {
                let value = fut.await?;
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(value);
                }
                Ok(())
            }
        });

        // The sender drops with the task once it runs out of attempts
        rx.await.with_context(|| format!("{} failed", label))
    }

    /// Tasks waiting to start.
    pub fn depth(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.depth(),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    fn push(&self, label: String, factory: TaskFactory, max_attempts: u32) {
        let depth = {
            let mut tasks = self.tasks.lock();
            tasks.push_back(QueuedTask {
                label,
                factory,
                attempt: 1,
                max_attempts,
            });
            tasks.len()
        };
        debug!(depth, "Task queued");
        self.wake.notify_one();
    }

    /// Drain the queue until `shutdown` flips to true.
    ///
    /// The task in flight when shutdown is signalled is allowed to finish;
    /// tasks still pending are dropped.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            min_gap_ms = self.min_gap.as_millis() as u64,
            task_timeout_ms = self.task_timeout.as_millis() as u64,
            "Request queue started"
        );
        let mut last_start: Option<Instant> = None;

        loop {
            let Some(task) = self.next_task(&mut shutdown).await else {
                break;
            };

            if let Some(last) = last_start {
                tokio::select! {
                    _ = sleep_until(last + self.min_gap) => {}
                    _ = shutdown.changed() => {
                        break;
                    }
                }
            }

            last_start = Some(Instant::now());
            self.execute(task).await;
        }

        let dropped = {
            let mut tasks = self.tasks.lock();
            let n = tasks.len();
            tasks.clear();
            n
        };
        info!(dropped, "Request queue stopped");
    }

    async fn next_task(&self, shutdown: &mut watch::Receiver<bool>) -> Option<QueuedTask> {
        loop {
            if *shutdown.borrow() {
                return None;
            }
            if let Some(task) = self.tasks.lock().pop_front() {
                return Some(task);
            }
            tokio::select! {
                _ = self.wake.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }

    async fn execute(&self, mut task: QueuedTask) {
        let fut = (task.factory)();
        let outcome = timeout(self.task_timeout, AssertUnwindSafe(fut).catch_unwind()).await;

        let (error, timed_out) = match outcome {
            Ok(Ok(Ok(()))) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                debug!(task = %task.label, attempt = task.attempt, "Task completed");
                return;
            }
            Ok(Ok(Err(e))) => (format!("{:#}", e), false),
            Ok(Err(_)) => ("task panicked".to_string(), false),
            Err(_) => (
                format!("timed out after {}ms", self.task_timeout.as_millis()),
                true,
            ),
        };

        self.failed.fetch_add(1, Ordering::Relaxed);
        let will_retry = task.attempt < task.max_attempts;
        warn!(
            task = %task.label,
            attempt = task.attempt,
            max_attempts = task.max_attempts,
            timed_out,
            will_retry,
            error = %error,
            "Queued task failed"
        );

        let failure = TaskFailure {
            label: task.label.clone(),
            error,
            attempt: task.attempt,
            timed_out,
            will_retry,
        };
        if let Some(tx) = self.failures.lock().as_ref() {
            let _ = tx.send(failure);
        }

        if will_retry {
            task.attempt += 1;
            self.tasks.lock().push_back(task);
        }
    }
}
