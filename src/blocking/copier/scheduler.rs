//! A fixed size worker pool fed through a bounded queue.
use crate::{Result, SyncError};
use crossbeam::channel::{self, Receiver, Sender};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

/// How many tasks can wait in queue before `add_task` blocks.
pub const TASK_QUEUE_CAPACITY: usize = 1000;

/// Result of all tasks handled by a [TaskScheduler].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulerReport {
    /// tasks which went through the handler, whatever the outcome.
    pub processed: usize,
    /// tasks whose handler returned an error or panicked.
    pub failed: usize,
}

#[derive(Default)]
struct Counters {
    processed: AtomicUsize,
    failed: AtomicUsize,
}

/// Runs a handler over submitted tasks with a fixed number of workers.
///
/// A failing or panicking task never stops its worker, every task submitted before
/// [TaskScheduler::close_and_wait] is handled exactly once.
pub struct TaskScheduler<T: Send + 'static> {
    sender: Option<Sender<T>>,
    // every worker reports here when it leaves.
    finished: Receiver<()>,
    workers: usize,
    counters: Arc<Counters>,
    // keeps worker threads alive until all of them are done.
    _pool: ThreadPool,
}

impl<T: Send + 'static> TaskScheduler<T> {
    /// Start `workers` workers (at least one), waiting for tasks.
    pub fn start<F>(workers: usize, capacity: usize, handler: F) -> Result<Self>
    where
        F: Fn(T) -> Result<()> + Send + Sync + 'static,
    {
        let workers = workers.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("copy-worker-{}", i))
            .build()?;
        let (sender, receiver) = channel::bounded::<T>(capacity.max(1));
        let handler = Arc::new(handler);
        let counters = Arc::new(Counters::default());
        let (finished_tx, finished) = channel::bounded::<()>(workers);

        for worker in 0..workers {
            let receiver = receiver.clone();
            let handler = handler.clone();
            let counters = counters.clone();
            let finished_tx = finished_tx.clone();
            pool.spawn(move || {
                for task in receiver.iter() {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(task)));
                    counters.processed.fetch_add(1, Ordering::SeqCst);
                    match outcome {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            counters.failed.fetch_add(1, Ordering::SeqCst);
                            error!(worker, ?e, "Task failed");
                        }
                        Err(_) => {
                            counters.failed.fetch_add(1, Ordering::SeqCst);
                            error!(worker, "Task panicked");
                        }
                    }
                }
                debug!(worker, "Task queue closed, worker exit");
                let _ = finished_tx.send(());
            });
        }

        Ok(TaskScheduler {
            sender: Some(sender),
            finished,
            workers,
            counters,
            _pool: pool,
        })
    }

    /// Queue a task, blocks while the queue is full.
    pub fn add_task(&self, task: T) -> Result<()> {
        match &self.sender {
            Some(sender) => sender.send(task).map_err(|_| SyncError::SchedulerClosed),
            None => Err(SyncError::SchedulerClosed),
        }
    }

    /// Stop accepting tasks, and wait until every queued task is handled.
    pub fn close_and_wait(mut self) -> SchedulerReport {
        self.sender.take();
        for _ in 0..self.workers {
            if self.finished.recv().is_err() {
                break;
            }
        }
        SchedulerReport {
            processed: self.counters.processed.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
        }
    }
}

impl<T: Send + 'static> Drop for TaskScheduler<T> {
    fn drop(&mut self) {
        // workers leave their loop once the queue is disconnected.
        self.sender.take();
    }
}
