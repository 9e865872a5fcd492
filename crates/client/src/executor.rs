//! Ordered callback executor.
//!
//! Completions for one ledger must be observed in the order their responses
//! were processed, while completions for different ledgers may run in
//! parallel. [`OrderedExecutor`] hashes a key onto one of N worker tasks; each
//! worker drains its own unbounded queue sequentially.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use parking_lot::{Mutex, RwLock};
use tokio::{runtime::Handle, sync::mpsc};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Worker pool where tasks submitted with equal keys run in submission order.
pub struct OrderedExecutor {
    /// Queue senders, one per worker. Emptied on shutdown, which lets workers
    /// drain what was already queued and exit.
    workers: RwLock<Vec<mpsc::UnboundedSender<Task>>>,
    threads: usize,
    shutdown: AtomicBool,
}

impl OrderedExecutor {
    /// Spawns `threads` workers on `runtime`.
    ///
    /// A `threads` value of 0 is treated as 1.
    #[must_use]
    pub fn new(threads: usize, runtime: &Handle) -> Self {
        let threads = threads.max(1);
        let workers = (0..threads)
            .map(|worker| {
                let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
                runtime.spawn(async move {
                    while let Some(task) = rx.recv().await {
                        task();
                    }
                    tracing::trace!(worker, "ordered executor worker stopped");
                });
                tx
            })
            .collect();
        Self { workers: RwLock::new(workers), threads, shutdown: AtomicBool::new(false) }
    }

    /// Queues `task` on the worker owning `key`.
    ///
    /// # Errors
    ///
    /// Hands the task back if the executor has been shut down or the owning
    /// worker has exited, so the caller can complete it some other way.
    pub fn submit_ordered<F>(&self, key: i64, task: F) -> Result<(), F>
    where
        F: FnOnce() + Send + 'static,
    {
        let workers = self.workers.read();
        if self.shutdown.load(Ordering::Acquire) {
            return Err(task);
        }
        let Some(worker) = workers.get(worker_index(key, self.threads)) else {
            return Err(task);
        };
        // A rejected send drops the boxed closure but leaves the task in its slot.
        let slot = Arc::new(Mutex::new(Some(task)));
        let queued = Arc::clone(&slot);
        let boxed: Task = Box::new(move || {
            if let Some(task) = queued.lock().take() {
                task();
            }
        });
        if worker.send(boxed).is_err() {
            tracing::warn!(key, "ordered executor worker exited");
            if let Some(task) = slot.lock().take() {
                return Err(task);
            }
        }
        Ok(())
    }

    /// Stops accepting tasks. Already queued tasks still run.
    pub fn shutdown(&self) {
        let mut workers = self.workers.write();
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            workers.clear();
            tracing::debug!(threads = self.threads, "ordered executor shut down");
        }
    }

    /// Returns true once [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Number of workers.
    #[must_use]
    pub fn threads(&self) -> usize {
        self.threads
    }
}

impl std::fmt::Debug for OrderedExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderedExecutor")
            .field("threads", &self.threads)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

/// Maps a possibly negative key onto `[0, n)`.
pub(crate) fn sign_safe_mod(key: i64, n: usize) -> usize {
    let n = i64::try_from(n.max(1)).unwrap_or(i64::MAX);
    // rem_euclid with a positive modulus is always in [0, n)
    usize::try_from(key.rem_euclid(n)).unwrap_or(0)
}

fn worker_index(key: i64, threads: usize) -> usize {
    sign_safe_mod(key, threads)
}
