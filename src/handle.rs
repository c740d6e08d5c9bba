//! Ergonomic subscribe/emit facade over a pool and its watcher.

use std::time::Duration;

use parking_lot::Mutex;

use crate::error::Error;
use crate::pool::SharedPool;
use crate::value::Value;
use crate::watcher::{EventWatcher, SubscriptionId};

/// Binds a watcher to one pool and tracks the subscriptions registered through it, so
/// `cleanup` can unwind exactly what this handle added.
pub struct EventHandle {
    pool: SharedPool,
    watcher: EventWatcher,
    owns_pool: bool,
    owned: Mutex<Vec<(String, SubscriptionId)>>,
}

impl EventHandle {
    /// Attaches to `pool`'s single shared watcher (created on first use), and owns `pool`
    /// itself: `cleanup` stops that watcher (as part of stopping the pool) and releases
    /// the pool.
    pub fn new(pool: SharedPool) -> EventHandle {
        let watcher = pool.watcher();
        EventHandle {
            pool,
            watcher,
            owns_pool: true,
            owned: Mutex::new(Vec::new()),
        }
    }

    /// Binds to a watcher and pool shared with other components (e.g. sibling handles, or
    /// a derived channel on the same pool); `cleanup` only unsubscribes this handle's own
    /// callbacks and leaves the watcher and pool running.
    pub fn with_watcher(pool: SharedPool, watcher: EventWatcher) -> EventHandle {
        EventHandle {
            pool,
            watcher,
            owns_pool: false,
            owned: Mutex::new(Vec::new()),
        }
    }

    /// Subscribes `f` to `event`. Returns a token that can be passed to `off`, though
    /// `cleanup` will also remove it.
    pub fn on(
        &self,
        event: &str,
        f: impl Fn(Option<Value>) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.watcher.subscribe(event, f);
        self.owned.lock().push((event.to_string(), id));
        id
    }

    pub fn off(&self, event: &str, id: SubscriptionId) -> bool {
        let removed = self.watcher.unsubscribe(event, id);
        self.owned.lock().retain(|(k, sid)| !(k == event && *sid == id));
        removed
    }

    pub fn emit(&self, event: &str, value: &Value, ttl: Option<Duration>) -> Result<(), Error> {
        self.pool.set(event, value, ttl)
    }

    /// Unsubscribes everything registered through this handle, then releases the pool (and,
    /// as part of that, its shared watcher) if this handle owns it.
    pub fn cleanup(&self) -> Result<(), Error> {
        let owned = std::mem::take(&mut *self.owned.lock());
        for (event, id) in owned {
            self.watcher.unsubscribe(&event, id);
        }

        if self.owns_pool {
            self.pool.cleanup()?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex as StdMutex};

    static NEXT_ID: AtomicU64 = AtomicU64::new(0);

    fn test_pool(tag: &str) -> SharedPool {
        let id = NEXT_ID.fetch_add(1, Ordering::SeqCst);
        let name = format!("handle-test-{tag}-{}-{id}", std::process::id());
        SharedPool::open(
            PoolConfig::new(name)
                .poll_interval(Duration::from_millis(10))
                .sweep_interval(Duration::from_millis(50)),
        )
        .unwrap()
    }

    #[test]
    fn multi_handler_emit_reaches_every_subscriber() {
        let pool = test_pool("multi-handler");
        let handle = EventHandle::new(pool);

        let seen_a = Arc::new(StdMutex::new(Vec::new()));
        let seen_b = Arc::new(StdMutex::new(Vec::new()));
        let a = seen_a.clone();
        let b = seen_b.clone();

        handle.on("user", move |v| a.lock().unwrap().push(v));
        handle.on("user", move |v| b.lock().unwrap().push(v));

        handle
            .emit("user", &Value::Str("Bob".into()), None)
            .unwrap();
        std::thread::sleep(Duration::from_millis(60));

        assert_eq!(seen_a.lock().unwrap().as_slice(), &[Some(Value::Str("Bob".into()))]);
        assert_eq!(seen_b.lock().unwrap().as_slice(), &[Some(Value::Str("Bob".into()))]);

        handle.cleanup().unwrap();
    }

    #[test]
    fn cleanup_removes_owned_subscriptions_only() {
        let pool = test_pool("cleanup-scope");
        let watcher = EventWatcher::watch(pool.clone());

        let handle_a = EventHandle::with_watcher(pool.clone(), watcher.clone());
        let handle_b = EventHandle::with_watcher(pool.clone(), watcher.clone());

        let seen_b = Arc::new(StdMutex::new(Vec::new()));
        let seen_b_clone = seen_b.clone();

        handle_a.on("k", |_| {});
        handle_b.on("k", move |v| seen_b_clone.lock().unwrap().push(v));

        handle_a.cleanup().unwrap();

        pool.set("k", &Value::Int(1), None).unwrap();
        std::thread::sleep(Duration::from_millis(60));

        assert_eq!(seen_b.lock().unwrap().as_slice(), &[Some(Value::Int(1))]);

        watcher.stop();
        pool.cleanup().unwrap();
    }
}
