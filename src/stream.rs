//! A monotonic-sequence pub/sub stream layered on a single pool key.

use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use crate::error::Error;
use crate::pool::SharedPool;
use crate::value::Value;
use crate::watcher::{EventWatcher, SubscriptionId};

/// A stream keyed by one pool entry, encoded as `{seq, payload}`.
///
/// Cheap to construct repeatedly against the same key — all instances over the same pool
/// key observe the same sequence, since the state lives entirely in the pool.
pub struct StreamChannel {
    pool: SharedPool,
    watcher: EventWatcher,
    key: String,
}

impl StreamChannel {
    /// Attaches to `pool`'s single shared watcher (see [`SharedPool::watcher`]).
    pub fn open(pool: SharedPool, stream_key: impl Into<String>) -> StreamChannel {
        let watcher = pool.watcher();
        StreamChannel {
            pool,
            watcher,
            key: stream_key.into(),
        }
    }

    /// Uses an already-obtained watcher reference rather than fetching the pool's shared
    /// one again, as `RoomSockets` and `HTTPRouter` do when constructing many
    /// `StreamChannel`s against one watcher.
    pub fn with_watcher(
        pool: SharedPool,
        watcher: EventWatcher,
        stream_key: impl Into<String>,
    ) -> StreamChannel {
        StreamChannel {
            pool,
            watcher,
            key: stream_key.into(),
        }
    }

    /// Publishes `payload` as the next sequence number. The read-then-write is atomic
    /// with respect to other pool operations, so concurrent publishers never collide on
    /// the same sequence number.
    pub fn publish(&self, payload: Value) -> Result<u64, Error> {
        let record = self.pool.update(&self.key, None, move |current| {
            let seq = current.as_ref().and_then(record_seq).map(|s| s + 1).unwrap_or(1);
            make_record(seq, payload)
        })?;

        record_seq(&record).ok_or_else(|| Error::Decode("stream record missing seq".into()))
    }

    /// The last published sequence number, if any.
    pub fn last_seq(&self) -> Result<Option<u64>, Error> {
        Ok(self.pool.get(&self.key)?.as_ref().and_then(record_seq))
    }

    /// Subscribes `cb` to new payloads. Values at or behind the subscriber's last-seen
    /// sequence number are dropped rather than redelivered, so a slow subscriber only ever
    /// sees the most recent payload once it catches up.
    pub fn subscribe(&self, cb: impl Fn(Value) + Send + Sync + 'static) -> SubscriptionId {
        let last_seen = AtomicU64::new(0);

        self.watcher.subscribe(&self.key, move |value| {
            let Some(value) = value else {
                // A stream key is only ever overwritten, never deleted, by this protocol.
                return;
            };
            let Some((seq, payload)) = split_record(&value) else {
                return;
            };
            if seq <= last_seen.load(Ordering::SeqCst) {
                return;
            }
            last_seen.store(seq, Ordering::SeqCst);
            cb(payload);
        })
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.watcher.unsubscribe(&self.key, id)
    }

    /// No-op: the watcher this channel uses is owned by the pool (see
    /// [`SharedPool::watcher`]), so stopping it is [`SharedPool::cleanup`]'s
    /// responsibility, not this channel's. Kept for symmetry with the other derived
    /// channels' `cleanup` methods.
    pub fn cleanup(&self) {}
}

fn make_record(seq: u64, payload: Value) -> Value {
    let mut map = IndexMap::new();
    map.insert("seq".to_string(), Value::Int(seq as i64));
    map.insert("payload".to_string(), payload);
    Value::Map(map)
}

fn split_record(value: &Value) -> Option<(u64, Value)> {
    let Value::Map(map) = value else { return None };
    let seq = match map.get("seq") {
        Some(Value::Int(i)) => *i as u64,
        _ => return None,
    };
    Some((seq, map.get("payload").cloned().unwrap_or(Value::Null)))
}

fn record_seq(value: &Value) -> Option<u64> {
    split_record(value).map(|(seq, _)| seq)
}
