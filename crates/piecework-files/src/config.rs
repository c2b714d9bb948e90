//! Worker pool configuration and hashing thread-count policy.

use std::time::Duration;
use tracing::warn;

/// Environment variable overriding the number of hashing threads.
pub const HASHING_THREADS_ENV: &str = "PIECEWORK_HASHING_THREADS";

/// Queue slots per worker. Large enough to keep every worker busy while
/// the producer runs a job inline, small enough to bound resident chunks.
pub const DEFAULT_QUEUE_FACTOR: usize = 3;

/// Idle time after which a worker thread exits.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(1);

/// Worker pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of worker threads (0 = auto-detect from CPU count)
    pub num_workers: usize,
    /// Queue slots per worker
    pub queue_factor: usize,
    /// Idle keep-alive before a worker exits
    pub keep_alive: Duration,
    /// Thread name prefix
    pub thread_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 0, // Auto-detect
            queue_factor: DEFAULT_QUEUE_FACTOR,
            keep_alive: DEFAULT_KEEP_ALIVE,
            thread_name: "piecework-hasher".to_string(),
        }
    }
}

impl PoolConfig {
    /// Configuration with the worker count taken from
    /// [`HASHING_THREADS_ENV`], falling back to the host CPU count.
    #[must_use]
    pub fn from_env() -> Self {
        let value = std::env::var(HASHING_THREADS_ENV).ok();
        Self::with_workers(resolve_worker_count(value.as_deref()))
    }

    /// Configuration with an explicit worker count
    #[must_use]
    pub fn with_workers(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Self::default()
        }
    }

    /// Worker count after auto-detection
    #[must_use]
    pub fn effective_workers(&self) -> usize {
        if self.num_workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.num_workers
        }
    }

    /// Bounded queue capacity (`workers × queue_factor`, at least one)
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.effective_workers()
            .saturating_mul(self.queue_factor)
            .max(1)
    }
}

/// Resolve the hashing thread count from an optional override.
///
/// A positive integer wins; anything else (absent, zero, negative,
/// unparsable) falls back to the number of CPUs on the host.
///
/// # Example
///
/// ```
/// use piecework_files::resolve_worker_count;
///
/// assert_eq!(resolve_worker_count(Some("6")), 6);
/// assert_eq!(resolve_worker_count(Some("-2")), num_cpus::get());
/// ```
#[must_use]
pub fn resolve_worker_count(value: Option<&str>) -> usize {
    value
        .and_then(parse_worker_override)
        .unwrap_or_else(|| num_cpus::get().max(1))
}

/// Parse a thread-count override, logging and discarding anything that is
/// not a positive integer.
#[must_use]
pub fn parse_worker_override(raw: &str) -> Option<usize> {
    match raw.trim().parse::<i64>().map(usize::try_from) {
        Ok(Ok(count)) if count > 0 => Some(count),
        _ => {
            warn!(
                "Ignoring {}={:?}: expected a positive integer",
                HASHING_THREADS_ENV, raw
            );
            None
        }
    }
}
