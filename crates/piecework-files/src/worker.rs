//! Hashing worker pool with caller-runs backpressure.
//!
//! Provides a thread pool tuned for bounded-memory piece hashing:
//! - Workers start on demand, up to a fixed maximum, and exit after an idle
//!   keep-alive (the pool costs nothing between runs)
//! - A bounded queue of `workers × queue_factor` jobs caps resident chunks
//! - When the queue is full the submitting thread runs the job itself,
//!   which throttles the producer whenever hashing falls behind I/O
//! - A panicking job is contained and never takes its worker down

use crate::config::PoolConfig;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Unit of work run by the pool
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Pool-wide statistics
#[derive(Debug, Default)]
pub struct PoolStats {
    /// Jobs handed to `execute`
    pub submitted: AtomicU64,
    /// Jobs that went through the queue
    pub queued: AtomicU64,
    /// Jobs run on the submitting thread because the queue was full
    pub ran_inline: AtomicU64,
    /// Jobs finished (queued or inline)
    pub completed: AtomicU64,
    /// Jobs that panicked
    pub panicked: AtomicU64,
    /// Worker threads started over the pool's lifetime
    pub workers_started: AtomicU64,
}

impl PoolStats {
    /// Jobs submitted so far
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Jobs executed inline by the submitter
    pub fn ran_inline(&self) -> u64 {
        self.ran_inline.load(Ordering::Relaxed)
    }

    /// Jobs finished
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Jobs that panicked
    pub fn panicked(&self) -> u64 {
        self.panicked.load(Ordering::Relaxed)
    }

    /// Worker threads started
    pub fn workers_started(&self) -> u64 {
        self.workers_started.load(Ordering::Relaxed)
    }
}

struct Shared {
    task_tx: Sender<Job>,
    task_rx: Receiver<Job>,
    max_workers: usize,
    keep_alive: Duration,
    thread_name: String,
    live: AtomicUsize,
    idle: AtomicUsize,
    next_id: AtomicUsize,
    shutdown: AtomicBool,
    stats: PoolStats,
}

impl Shared {
    /// Reserve a worker slot if the pool is below its maximum
    fn try_reserve(&self) -> bool {
        let mut live = self.live.load(Ordering::SeqCst);
        while live < self.max_workers {
            match self
                .live
                .compare_exchange(live, live + 1, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return true,
                Err(actual) => live = actual,
            }
        }
        false
    }

    fn run(&self, job: Job) {
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            self.stats.panicked.fetch_add(1, Ordering::Relaxed);
            error!("Hashing job panicked");
        }
        self.stats.completed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Bounded worker pool for piece hashing
///
/// Cloning is cheap and shares the same workers and queue.
#[derive(Clone)]
pub struct WorkerPool {
    shared: Arc<Shared>,
}

impl WorkerPool {
    /// Create a new worker pool. No thread is started until work arrives.
    ///
    /// # Examples
    /// ```no_run
    /// use piecework_files::{PoolConfig, WorkerPool};
    ///
    /// let pool = WorkerPool::new(PoolConfig::with_workers(4));
    /// assert_eq!(pool.queue_capacity(), 12);
    /// ```
    pub fn new(config: PoolConfig) -> Self {
        let max_workers = config.effective_workers();
        let capacity = config.queue_capacity();

        info!(
            "Creating hashing pool with {} workers (queue capacity: {})",
            max_workers, capacity
        );

        let (task_tx, task_rx) = bounded(capacity);

        Self {
            shared: Arc::new(Shared {
                task_tx,
                task_rx,
                max_workers,
                keep_alive: config.keep_alive,
                thread_name: config.thread_name,
                live: AtomicUsize::new(0),
                idle: AtomicUsize::new(0),
                next_id: AtomicUsize::new(0),
                shutdown: AtomicBool::new(false),
                stats: PoolStats::default(),
            }),
        }
    }

    /// Run `job` on the pool.
    ///
    /// Never blocks on a full queue: the job is handed to a new worker if
    /// one can still be started, and run on the calling thread otherwise.
    /// After [`shutdown`](Self::shutdown) every job runs on the caller.
    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let shared = &self.shared;
        shared.stats.submitted.fetch_add(1, Ordering::Relaxed);

        if shared.shutdown.load(Ordering::Acquire) {
            self.run_inline(Box::new(job));
            return;
        }

        match shared.task_tx.try_send(Box::new(job)) {
            Ok(()) => {
                shared.stats.queued.fetch_add(1, Ordering::Relaxed);
                if shared.idle.load(Ordering::SeqCst) == 0 && shared.try_reserve() {
                    if let Err(e) = self.spawn_worker(None) {
                        warn!("{}", e);
                        self.drain_if_unattended();
                    }
                }
            }
            Err(TrySendError::Full(job)) => {
                if shared.try_reserve() {
                    // A job lost with a failed spawn is dropped unrun; jobs
                    // must release their resources on drop.
                    if let Err(e) = self.spawn_worker(Some(job)) {
                        warn!("{}", e);
                    }
                } else {
                    self.run_inline(job);
                }
            }
            Err(TrySendError::Disconnected(job)) => self.run_inline(job),
        }
    }

    /// Run queued jobs on the caller when no worker is left to take them
    fn drain_if_unattended(&self) {
        while self.live_workers() == 0 {
            match self.shared.task_rx.try_recv() {
                Ok(job) => self.run_inline(job),
                Err(_) => break,
            }
        }
    }

    fn run_inline(&self, job: Job) {
        self.shared.stats.ran_inline.fetch_add(1, Ordering::Relaxed);
        self.shared.run(job);
    }

    /// Start a worker in an already reserved slot
    fn spawn_worker(&self, first: Option<Job>) -> Result<(), WorkerError> {
        let shared = &self.shared;
        let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{}", shared.thread_name, id);

        let worker = Worker {
            id,
            shared: Arc::clone(shared),
        };
        match thread::Builder::new()
            .name(name)
            .spawn(move || worker.run(first))
        {
            Ok(_) => {
                shared.stats.workers_started.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                shared.live.fetch_sub(1, Ordering::SeqCst);
                Err(WorkerError::Spawn(format!("worker {id}: {e}")))
            }
        }
    }

    /// Maximum number of workers
    pub fn max_workers(&self) -> usize {
        self.shared.max_workers
    }

    /// Capacity of the bounded queue
    pub fn queue_capacity(&self) -> usize {
        self.shared.task_tx.capacity().unwrap_or(0)
    }

    /// Jobs currently waiting in the queue
    pub fn queued(&self) -> usize {
        self.shared.task_rx.len()
    }

    /// Worker threads currently alive
    pub fn live_workers(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    /// Get pool statistics
    pub fn stats(&self) -> &PoolStats {
        &self.shared.stats
    }

    /// Stop accepting queued work.
    ///
    /// Workers finish what is already queued and exit; later submissions
    /// run on the caller.
    pub fn shutdown(&self) {
        info!(
            "Shutting down hashing pool ({} live workers)",
            self.live_workers()
        );
        self.shared.shutdown.store(true, Ordering::Release);
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(PoolConfig::from_env())
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("max_workers", &self.max_workers())
            .field("queue_capacity", &self.queue_capacity())
            .field("live_workers", &self.live_workers())
            .finish()
    }
}

/// Individual worker thread
struct Worker {
    id: usize,
    shared: Arc<Shared>,
}

impl Worker {
    fn run(self, first: Option<Job>) {
        let shared = &self.shared;
        debug!("Hashing worker {} starting", self.id);

        if let Some(job) = first {
            shared.run(job);
        }

        loop {
            shared.idle.fetch_add(1, Ordering::SeqCst);
            let next = shared.task_rx.recv_timeout(shared.keep_alive);
            shared.idle.fetch_sub(1, Ordering::SeqCst);

            match next {
                Ok(job) => shared.run(job),
                Err(RecvTimeoutError::Timeout) => {
                    shared.live.fetch_sub(1, Ordering::SeqCst);
                    // A submitter may have queued a job after seeing this
                    // worker idle; take the slot back rather than strand it.
                    if shared.task_rx.is_empty()
                        || shared.shutdown.load(Ordering::Acquire)
                        || !shared.try_reserve()
                    {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    shared.live.fetch_sub(1, Ordering::SeqCst);
                    break;
                }
            }
        }

        debug!("Hashing worker {} exiting after idle timeout", self.id);
    }
}

/// Worker pool errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// A worker thread could not be started
    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
}
