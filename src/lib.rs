//! A shared-memory key-value pool, mapped by every attached process from the same backing
//! file, with TTL expiry and optional at-rest encryption. Layered on top: a change-watching
//! event dispatcher, and three derived pub/sub conveniences built on it — monotonic streams,
//! named rooms, and an in-memory request/response router.
//!
//! Everything in this crate coordinates purely through the pool's backing file: there is no
//! separate daemon or socket. Any process that opens a pool of the same name sees the same
//! keys, the same versions, and the same change events.

mod config;
mod crypto;
mod error;
mod frame;
mod handle;
mod lock;
mod logging;
mod pool;
mod room;
mod router;
mod stream;
mod time;
mod value;
mod watcher;

pub use config::PoolConfig;
pub use error::{Error, Result};
pub use handle::EventHandle;
pub use logging::{discard as discard_logger, terminal as terminal_logger};
pub use sloggers::types::Severity;
pub use pool::{Entry, SharedPool, Stats};
pub use room::RoomSockets;
pub use router::{HTTPRouter, Request, Response};
pub use stream::StreamChannel;
pub use value::Value;
pub use watcher::{EventWatcher, SubscriptionId};
