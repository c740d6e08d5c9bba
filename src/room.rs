//! A thin multiplexer exposing many named rooms, each a `StreamChannel` namespaced under
//! `room/<name>`. There is no central room registry; joining a room is just subscribing to
//! its stream key.

use crate::error::Error;
use crate::pool::SharedPool;
use crate::stream::StreamChannel;
use crate::value::Value;
use crate::watcher::{EventWatcher, SubscriptionId};

pub struct RoomSockets {
    pool: SharedPool,
    watcher: EventWatcher,
}

impl RoomSockets {
    /// Attaches to `pool`'s single shared watcher (see [`SharedPool::watcher`]).
    pub fn open(pool: SharedPool) -> RoomSockets {
        let watcher = pool.watcher();
        RoomSockets { pool, watcher }
    }

    fn stream(&self, room: &str) -> StreamChannel {
        StreamChannel::with_watcher(self.pool.clone(), self.watcher.clone(), room_key(room))
    }

    /// Returns the stream backing `room`, for a caller that wants to both publish and
    /// subscribe through the same handle.
    pub fn connect(&self, room: &str) -> StreamChannel {
        self.stream(room)
    }

    pub fn subscribe(&self, room: &str, cb: impl Fn(Value) + Send + Sync + 'static) -> SubscriptionId {
        self.stream(room).subscribe(cb)
    }

    pub fn send(&self, room: &str, msg: Value) -> Result<u64, Error> {
        self.stream(room).publish(msg)
    }

    pub fn disconnect(&self, room: &str, id: SubscriptionId) -> bool {
        self.stream(room).unsubscribe(id)
    }

    /// Every room with at least one live message, derived from the pool's own key space —
    /// there is no separate room index to keep in sync.
    pub fn list_rooms(&self) -> Result<Vec<String>, Error> {
        Ok(self
            .pool
            .snapshot()?
            .keys()
            .filter_map(|key| key.strip_prefix("room/").map(str::to_string))
            .collect())
    }

    /// No-op: the watcher this multiplexer uses is owned by the pool (see
    /// [`SharedPool::watcher`]), so stopping it is [`SharedPool::cleanup`]'s
    /// responsibility, not this type's.
    pub fn cleanup(&self) {}
}

fn room_key(name: &str) -> String {
    format!("room/{name}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    static NEXT_ID: AtomicU64 = AtomicU64::new(0);

    fn test_pool(tag: &str) -> SharedPool {
        let id = NEXT_ID.fetch_add(1, Ordering::SeqCst);
        let name = format!("room-test-{tag}-{}-{id}", std::process::id());
        SharedPool::open(
            PoolConfig::new(name)
                .poll_interval(Duration::from_millis(10))
                .sweep_interval(Duration::from_millis(50)),
        )
        .unwrap()
    }

    #[test]
    fn rooms_are_isolated_from_each_other() {
        let pool = test_pool("isolation");
        let rooms = RoomSockets::open(pool.clone());

        let lobby_seen = Arc::new(Mutex::new(Vec::new()));
        let lobby_clone = lobby_seen.clone();
        rooms.subscribe("lobby", move |v| lobby_clone.lock().unwrap().push(v));

        rooms.send("lobby", Value::Str("hi".into())).unwrap();
        rooms.send("other", Value::Str("bye".into())).unwrap();
        std::thread::sleep(Duration::from_millis(60));

        assert_eq!(lobby_seen.lock().unwrap().as_slice(), &[Value::Str("hi".into())]);

        rooms.cleanup();
        pool.cleanup().unwrap();
    }

    #[test]
    fn list_rooms_reflects_active_keys() {
        let pool = test_pool("listing");
        let rooms = RoomSockets::open(pool.clone());

        rooms.send("a", Value::Int(1)).unwrap();
        rooms.send("b", Value::Int(2)).unwrap();

        let mut listed = rooms.list_rooms().unwrap();
        listed.sort();
        assert_eq!(listed, vec!["a".to_string(), "b".to_string()]);

        rooms.cleanup();
        pool.cleanup().unwrap();
    }
}
