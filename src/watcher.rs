//! Snapshot-diff change detection, layered on top of a pool.
//!
//! Two background threads per watcher: a poll thread that diffs successive snapshots and
//! enqueues dispatch events, and a dispatch thread that runs subscriber callbacks. Keeping
//! them separate means a slow or panicking callback never delays change detection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex as StdMutex};
use std::thread::JoinHandle;
use std::time::Duration;

use dashmap::DashMap;

use crate::pool::SharedPool;
use crate::value::Value;

/// Opaque token returned by [`EventWatcher::subscribe`]; pass back to
/// [`EventWatcher::unsubscribe`] to remove that one registration.
pub type SubscriptionId = u64;

type Callback = Arc<dyn Fn(Option<Value>) + Send + Sync>;

/// A background watcher bound to one pool. Cheaply cloneable — all clones share the same
/// subscription registry and background threads.
#[derive(Clone)]
pub struct EventWatcher {
    inner: Arc<WatcherInner>,
}

struct WatcherInner {
    pool: SharedPool,
    subscriptions: DashMap<String, Vec<(SubscriptionId, Callback)>>,
    // Last observed (version, live) per subscribed key; the diff baseline.
    baseline: DashMap<String, (u64, bool)>,
    next_id: AtomicU64,
    poll_handle: StdMutex<Option<PollHandle>>,
    dispatch_handle: StdMutex<Option<DispatchHandle>>,
    logger: slog::Logger,
    stopped: AtomicBool,
}

struct StopSignal {
    lock: StdMutex<bool>,
    condvar: Condvar,
}

struct PollHandle {
    stop: Arc<StopSignal>,
    done: Receiver<()>,
    join: JoinHandle<()>,
}

struct DispatchHandle {
    tx: Sender<DispatchMsg>,
    done: Receiver<()>,
    join: JoinHandle<()>,
}

enum DispatchMsg {
    Event { key: String, payload: Option<Value> },
    Stop,
}

impl EventWatcher {
    /// Starts the poll and dispatch threads for `pool`. Mirrors `SharedPool::open`: cheap
    /// to call repeatedly, but each call spawns its own pair of threads — share one
    /// `EventWatcher` (it is `Clone`) rather than opening several for the same pool.
    pub fn watch(pool: SharedPool) -> EventWatcher {
        let logger = pool.logger();
        let poll_interval = pool.poll_interval();

        let inner = Arc::new(WatcherInner {
            pool,
            subscriptions: DashMap::new(),
            baseline: DashMap::new(),
            next_id: AtomicU64::new(1),
            poll_handle: StdMutex::new(None),
            dispatch_handle: StdMutex::new(None),
            logger,
            stopped: AtomicBool::new(false),
        });

        let (tx, rx) = std::sync::mpsc::channel::<DispatchMsg>();
        let (dispatch_done_tx, dispatch_done_rx) = std::sync::mpsc::channel();

        let dispatch_inner = inner.clone();
        let dispatch_join = std::thread::Builder::new()
            .name("mvent-watcher-dispatch".into())
            .spawn(move || {
                dispatch_loop(&dispatch_inner, rx);
                let _ = dispatch_done_tx.send(());
            })
            .expect("failed to spawn watcher dispatch thread");

        *inner.dispatch_handle.lock().unwrap() = Some(DispatchHandle {
            tx: tx.clone(),
            done: dispatch_done_rx,
            join: dispatch_join,
        });

        let stop = Arc::new(StopSignal {
            lock: StdMutex::new(false),
            condvar: Condvar::new(),
        });
        let (poll_done_tx, poll_done_rx) = std::sync::mpsc::channel();

        let poll_inner = inner.clone();
        let poll_stop = stop.clone();
        let poll_join = std::thread::Builder::new()
            .name("mvent-watcher-poll".into())
            .spawn(move || {
                loop {
                    let should_stop = {
                        let guard = poll_stop.lock.lock().unwrap();
                        let (guard, _) = poll_stop.condvar.wait_timeout(guard, poll_interval).unwrap();
                        *guard
                    };

                    if should_stop {
                        break;
                    }

                    poll_once(&poll_inner, &tx);
                }
                let _ = poll_done_tx.send(());
            })
            .expect("failed to spawn watcher poll thread");

        *inner.poll_handle.lock().unwrap() = Some(PollHandle {
            stop,
            done: poll_done_rx,
            join: poll_join,
        });

        EventWatcher { inner }
    }

    /// Subscribes `cb` to changes on `key`. The value present at subscribe time (if any) is
    /// not delivered — only changes observed from here on are.
    pub fn subscribe(
        &self,
        key: &str,
        cb: impl Fn(Option<Value>) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);

        self.inner
            .subscriptions
            .entry(key.to_string())
            .or_default()
            .push((id, Arc::new(cb)));

        self.inner.baseline.entry(key.to_string()).or_insert_with(|| {
            self.inner
                .pool
                .snapshot_with_liveness()
                .ok()
                .and_then(|snapshot| snapshot.get(key).copied())
                .unwrap_or((0, false))
        });

        id
    }

    /// Removes one subscription. Returns `true` if it was found.
    pub fn unsubscribe(&self, key: &str, id: SubscriptionId) -> bool {
        let Some(mut entry) = self.inner.subscriptions.get_mut(key) else {
            return false;
        };

        let before = entry.len();
        entry.retain(|(sub_id, _)| *sub_id != id);
        let removed = entry.len() != before;
        let now_empty = entry.is_empty();
        drop(entry);

        if now_empty {
            self.inner.subscriptions.remove(key);
            self.inner.baseline.remove(key);
        }

        removed
    }

    /// Signals both background threads to exit at their next wakeup and joins them with a
    /// bounded wait; a thread stuck past the wait is abandoned rather than blocking forever.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(poll) = self.inner.poll_handle.lock().unwrap().take() {
            {
                let mut stopped = poll.stop.lock.lock().unwrap();
                *stopped = true;
                poll.stop.condvar.notify_all();
            }
            match poll.done.recv_timeout(Duration::from_secs(2)) {
                Ok(()) => {
                    let _ = poll.join.join();
                }
                Err(_) => {
                    slog::warn!(self.inner.logger, "watcher poll thread did not stop in time, abandoning");
                }
            }
        }

        if let Some(dispatch) = self.inner.dispatch_handle.lock().unwrap().take() {
            let _ = dispatch.tx.send(DispatchMsg::Stop);
            match dispatch.done.recv_timeout(Duration::from_secs(2)) {
                Ok(()) => {
                    let _ = dispatch.join.join();
                }
                Err(_) => {
                    slog::warn!(self.inner.logger, "watcher dispatch thread did not stop in time, abandoning");
                }
            }
        }
    }
}

fn poll_once(inner: &Arc<WatcherInner>, tx: &Sender<DispatchMsg>) {
    if inner.subscriptions.is_empty() {
        return;
    }

    let snapshot: HashMap<String, (u64, bool)> = match inner.pool.snapshot_with_liveness() {
        Ok(snapshot) => snapshot,
        Err(e) => {
            slog::warn!(inner.logger, "watcher poll failed to snapshot pool"; "error" => %e);
            return;
        }
    };

    let keys: Vec<String> = inner.subscriptions.iter().map(|e| e.key().clone()).collect();

    for key in keys {
        let current = snapshot.get(&key).copied().unwrap_or((0, false));
        let previous = inner.baseline.get(&key).map(|r| *r).unwrap_or((0, false));

        // A change is: a live→absent or absent→live transition, or a version bump while
        // staying live. Two identical-looking absences are not a change.
        let changed = current.1 != previous.1 || (current.1 && current.0 != previous.0);

        if changed {
            let payload = if current.1 {
                inner.pool.get(&key).ok().flatten()
            } else {
                None
            };

            let _ = tx.send(DispatchMsg::Event {
                key: key.clone(),
                payload,
            });
        }

        inner.baseline.insert(key, current);
    }
}

fn dispatch_loop(inner: &Arc<WatcherInner>, rx: Receiver<DispatchMsg>) {
    for msg in rx.iter() {
        let (key, payload) = match msg {
            DispatchMsg::Stop => break,
            DispatchMsg::Event { key, payload } => (key, payload),
        };

        let callbacks: Vec<Callback> = match inner.subscriptions.get(&key) {
            Some(subs) => subs.iter().map(|(_, cb)| cb.clone()).collect(),
            None => continue,
        };

        for cb in callbacks {
            let payload = payload.clone();
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb(payload)));
            if result.is_err() {
                slog::error!(inner.logger, "subscriber callback panicked"; "key" => %key);
            }
        }
    }
}
