use std::sync::Arc;
use std::time::Duration;

use crate::error::Error;

/// Default pool capacity: 1 MiB, used only on first creation of the backing file.
pub const DEFAULT_CAPACITY: u64 = 1024 * 1024;

/// Configuration accepted by [`crate::pool::SharedPool::open`].
///
/// Every field mirrors a row of the configuration table in the design: most only take
/// effect on first creation of the backing file (`capacity`), others are purely
/// process-local cadence knobs (`sweep_interval`, `poll_interval`) or timeouts.
#[derive(Clone)]
pub struct PoolConfig {
    /// Identifies the backing file; required.
    pub name: String,
    /// Total bytes available for entries. Ignored when the file already exists.
    pub capacity: u64,
    /// When set, values are passed through the encryption transformer using this key.
    pub encryption_key: Option<[u8; 32]>,
    /// Cadence of the TTL sweep.
    pub sweep_interval: Duration,
    /// Max wait for the advisory file lock. `None` waits indefinitely.
    pub lock_timeout: Option<Duration>,
    /// Cadence of the watcher's snapshot-diff poll.
    pub poll_interval: Duration,
    /// Max wait for a remote `HTTPRouter` response.
    pub call_timeout: Duration,
    /// TTL applied to the request record `HTTPRouter` writes for every call.
    pub request_ttl: Duration,
    /// Optional sink invoked with persistent (non-transient) background errors.
    pub error_sink: Option<Arc<dyn Fn(&Error) + Send + Sync>>,
    /// Logger threaded through the pool and any watcher attached to it.
    pub logger: Option<slog::Logger>,
}

impl PoolConfig {
    /// Starts a config with the given pool name and every other field at its documented
    /// default; chain the setters below to override individual knobs.
    pub fn new(name: impl Into<String>) -> PoolConfig {
        PoolConfig {
            name: name.into(),
            ..PoolConfig::default()
        }
    }

    pub fn capacity(mut self, capacity: u64) -> PoolConfig {
        self.capacity = capacity;
        self
    }

    pub fn encryption_key(mut self, key: [u8; 32]) -> PoolConfig {
        self.encryption_key = Some(key);
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> PoolConfig {
        self.sweep_interval = interval;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> PoolConfig {
        self.poll_interval = interval;
        self
    }

    pub fn lock_timeout(mut self, timeout: Duration) -> PoolConfig {
        self.lock_timeout = Some(timeout);
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> PoolConfig {
        self.call_timeout = timeout;
        self
    }

    pub fn request_ttl(mut self, ttl: Duration) -> PoolConfig {
        self.request_ttl = ttl;
        self
    }

    pub fn error_sink(mut self, sink: Arc<dyn Fn(&Error) + Send + Sync>) -> PoolConfig {
        self.error_sink = Some(sink);
        self
    }

    pub fn logger(mut self, logger: slog::Logger) -> PoolConfig {
        self.logger = Some(logger);
        self
    }
}

impl Default for PoolConfig {
    fn default() -> PoolConfig {
        PoolConfig {
            name: String::new(),
            capacity: DEFAULT_CAPACITY,
            encryption_key: None,
            sweep_interval: Duration::from_secs(1),
            lock_timeout: None,
            poll_interval: Duration::from_millis(50),
            call_timeout: Duration::from_secs(5),
            request_ttl: Duration::from_secs(30),
            error_sink: None,
            logger: None,
        }
    }
}
