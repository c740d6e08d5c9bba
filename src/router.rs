//! An in-memory HTTP-like request/response rendezvous over two pool keys per call: no
//! dedicated transport, just a cooperative protocol that any process attached to the pool
//! can speak.

use std::sync::atomic::Ordering;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Condvar, Mutex as StdMutex};
use std::thread::JoinHandle;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use indexmap::IndexMap;
use uuid::Uuid;

use crate::error::Error;
use crate::pool::SharedPool;
use crate::stream::StreamChannel;
use crate::value::Value;
use crate::watcher::EventWatcher;

#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub data: Value,
}

#[derive(Debug, Clone)]
pub struct Response {
    pub data: Value,
}

type SimpleHandler = Arc<dyn Fn(Request) -> Response + Send + Sync>;
type StreamingHandler = Arc<dyn Fn(Request, &StreamChannel) + Send + Sync>;

/// Registers handlers for paths and sends requests to them, whether the handler lives in
/// this process or another one attached to the same pool.
pub struct HTTPRouter {
    pool: SharedPool,
    watcher: EventWatcher,
    handlers: Arc<DashMap<String, SimpleHandler>>,
    stream_handlers: Arc<DashMap<String, StreamingHandler>>,
    responder: StdMutex<Option<ResponderHandle>>,
    logger: slog::Logger,
}

struct StopSignal {
    lock: StdMutex<bool>,
    condvar: Condvar,
}

struct ResponderHandle {
    stop: Arc<StopSignal>,
    done: Receiver<()>,
    join: JoinHandle<()>,
}

impl HTTPRouter {
    /// Attaches to `pool`'s single shared watcher (see [`SharedPool::watcher`]).
    pub fn open(pool: SharedPool) -> HTTPRouter {
        let watcher = pool.watcher();
        let logger = pool.logger();
        let handlers: Arc<DashMap<String, SimpleHandler>> = Arc::new(DashMap::new());
        let stream_handlers: Arc<DashMap<String, StreamingHandler>> = Arc::new(DashMap::new());

        let responder = spawn_responder(pool.clone(), watcher.clone(), handlers.clone(), stream_handlers.clone());

        HTTPRouter {
            pool,
            watcher,
            handlers,
            stream_handlers,
            responder: StdMutex::new(Some(responder)),
            logger,
        }
    }

    /// Registers a request/response handler for `path` in this process.
    pub fn route(&self, path: &str, handler: impl Fn(Request) -> Response + Send + Sync + 'static) {
        self.handlers.insert(path.to_string(), Arc::new(handler));
    }

    /// Registers a streaming handler for `path`: it is invoked with a `StreamChannel` it
    /// should publish zero or more payloads onto.
    pub fn route_streaming(
        &self,
        path: &str,
        handler: impl Fn(Request, &StreamChannel) + Send + Sync + 'static,
    ) {
        self.stream_handlers.insert(path.to_string(), Arc::new(handler));
    }

    pub fn unroute(&self, path: &str) -> bool {
        self.handlers.remove(path).is_some()
    }

    pub fn unroute_streaming(&self, path: &str) -> bool {
        self.stream_handlers.remove(path).is_some()
    }

    /// Sends a request to `path`. A local handler is preferred and invoked synchronously;
    /// otherwise the request is written to the pool and this call blocks (up to the
    /// pool's configured `call_timeout`) for a remote handler's response.
    pub fn send_request(&self, path: &str, method: &str, data: Value) -> Result<Response, Error> {
        if let Some(handler) = self.handlers.get(path).map(|r| r.value().clone()) {
            return Ok(handler(Request {
                method: method.to_string(),
                data,
            }));
        }

        self.send_remote(path, Request {
            method: method.to_string(),
            data,
        })
    }

    /// Streaming counterpart of `send_request`: returns a `StreamChannel` the caller can
    /// subscribe to for payloads, rather than a single response. Never blocks — a remote
    /// handler picks the request up on its own poll cadence and publishes as it goes.
    pub fn send_request_streaming(
        &self,
        path: &str,
        method: &str,
        data: Value,
    ) -> Result<StreamChannel, Error> {
        let call_id = Uuid::new_v4();
        let stream_key = format!("resp/{path}/{call_id}/stream");

        if let Some(handler) = self.stream_handlers.get(path).map(|r| r.value().clone()) {
            let stream = StreamChannel::with_watcher(self.pool.clone(), self.watcher.clone(), stream_key);
            handler(
                Request {
                    method: method.to_string(),
                    data,
                },
                &stream,
            );
            return Ok(stream);
        }

        let req_key = format!("req/{path}/{call_id}");
        let mut fields = IndexMap::new();
        fields.insert("method".to_string(), Value::Str(method.to_string()));
        fields.insert("data".to_string(), data);
        self.pool
            .set(&req_key, &Value::Map(fields), Some(self.pool.request_ttl()))?;

        Ok(StreamChannel::with_watcher(
            self.pool.clone(),
            self.watcher.clone(),
            stream_key,
        ))
    }

    fn send_remote(&self, path: &str, request: Request) -> Result<Response, Error> {
        let call_id = Uuid::new_v4();
        let req_key = format!("req/{path}/{call_id}");
        let resp_key = format!("resp/{path}/{call_id}");

        let mut fields = IndexMap::new();
        fields.insert("method".to_string(), Value::Str(request.method));
        fields.insert("data".to_string(), request.data);
        self.pool
            .set(&req_key, &Value::Map(fields), Some(self.pool.request_ttl()))?;

        let (tx, rx) = std::sync::mpsc::channel();
        let tx_slot = StdMutex::new(Some(tx));
        let sub_id = self.watcher.subscribe(&resp_key, move |value| {
            if let Some(tx) = tx_slot.lock().unwrap().take() {
                let _ = tx.send(value);
            }
        });

        // Closes the race between writing the request and the subscribe call: if a
        // response landed in between, the watcher's no-replay baseline would otherwise
        // swallow it as pre-existing state rather than delivering it as a change.
        if let Ok(Some(value)) = self.pool.get(&resp_key) {
            self.watcher.unsubscribe(&resp_key, sub_id);
            return Ok(Response { data: value });
        }

        let result = rx.recv_timeout(self.pool.call_timeout());
        self.watcher.unsubscribe(&resp_key, sub_id);

        match result {
            Ok(Some(value)) => Ok(Response { data: value }),
            Ok(None) | Err(_) => Err(Error::CallTimeout),
        }
    }

    /// Stops this router's own request-scanning background thread. The watcher it uses
    /// for response rendezvous is owned by the pool (see [`SharedPool::watcher`]) and is
    /// left running — it stops only when [`SharedPool::cleanup`] does.
    pub fn cleanup(&self) {
        if let Some(handle) = self.responder.lock().unwrap().take() {
            {
                let mut stopped = handle.stop.lock.lock().unwrap();
                *stopped = true;
                handle.stop.condvar.notify_all();
            }
            match handle.done.recv_timeout(Duration::from_secs(2)) {
                Ok(()) => {
                    let _ = handle.join.join();
                }
                Err(_) => {
                    slog::warn!(self.logger, "router responder did not stop in time, abandoning");
                }
            }
        }
    }
}

fn spawn_responder(
    pool: SharedPool,
    watcher: EventWatcher,
    handlers: Arc<DashMap<String, SimpleHandler>>,
    stream_handlers: Arc<DashMap<String, StreamingHandler>>,
) -> ResponderHandle {
    let stop = Arc::new(StopSignal {
        lock: StdMutex::new(false),
        condvar: Condvar::new(),
    });
    let (done_tx, done_rx) = std::sync::mpsc::channel();

    let stop_clone = stop.clone();
    let poll_interval = pool.poll_interval();
    let response_ttl = pool.request_ttl();
    let seen: DashSet<String> = DashSet::new();

    let join = std::thread::Builder::new()
        .name("mvent-router-responder".into())
        .spawn(move || {
            loop {
                let should_stop = {
                    let guard = stop_clone.lock.lock().unwrap();
                    let (guard, _) = stop_clone.condvar.wait_timeout(guard, poll_interval).unwrap();
                    *guard
                };

                if should_stop {
                    break;
                }

                responder_tick(&pool, &watcher, &handlers, &stream_handlers, &seen, response_ttl);
            }
            let _ = done_tx.send(());
        })
        .expect("failed to spawn router responder thread");

    ResponderHandle {
        stop,
        done: done_rx,
        join,
    }
}

fn responder_tick(
    pool: &SharedPool,
    watcher: &EventWatcher,
    handlers: &DashMap<String, SimpleHandler>,
    stream_handlers: &DashMap<String, StreamingHandler>,
    seen: &DashSet<String>,
    response_ttl: Duration,
) {
    if handlers.is_empty() && stream_handlers.is_empty() {
        return;
    }

    let Ok(snapshot) = pool.snapshot() else {
        return;
    };

    let paths: Vec<String> = handlers
        .iter()
        .map(|e| e.key().clone())
        .chain(stream_handlers.iter().map(|e| e.key().clone()))
        .collect();

    for path in paths {
        let prefix = format!("req/{path}/");

        for key in snapshot.keys() {
            if !key.starts_with(&prefix) || seen.contains(key) {
                continue;
            }
            seen.insert(key.clone());

            let Some(call_id) = key.strip_prefix(&prefix) else {
                continue;
            };
            let Ok(Some(Value::Map(fields))) = pool.get(key) else {
                continue;
            };

            let method = match fields.get("method") {
                Some(Value::Str(s)) => s.clone(),
                _ => String::new(),
            };
            let data = fields.get("data").cloned().unwrap_or(Value::Null);
            let request = Request { method, data };

            let simple = handlers.get(&path).map(|r| r.value().clone());
            let streaming = if simple.is_none() {
                stream_handlers.get(&path).map(|r| r.value().clone())
            } else {
                None
            };

            if let Some(f) = simple {
                let response = f(request);
                let resp_key = format!("resp/{path}/{call_id}");
                let _ = pool.set(&resp_key, &response.data, Some(response_ttl));
            } else if let Some(f) = streaming {
                let stream_key = format!("resp/{path}/{call_id}/stream");
                let stream = StreamChannel::with_watcher(pool.clone(), watcher.clone(), stream_key);
                f(request, &stream);
            }
        }
    }

    seen.retain(|key| snapshot.contains_key(key));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use std::sync::atomic::AtomicU64;

    static NEXT_ID: AtomicU64 = AtomicU64::new(0);

    fn test_pool(tag: &str) -> SharedPool {
        let id = NEXT_ID.fetch_add(1, Ordering::SeqCst);
        let name = format!("router-test-{tag}-{}-{id}", std::process::id());
        SharedPool::open(
            PoolConfig::new(name)
                .poll_interval(Duration::from_millis(10))
                .sweep_interval(Duration::from_millis(50))
                .call_timeout(Duration::from_millis(500)),
        )
        .unwrap()
    }

    #[test]
    fn local_handler_answers_synchronously() {
        let pool = test_pool("local");
        let router = HTTPRouter::open(pool.clone());

        router.route("/greet", |req| {
            let name = match req.data {
                Value::Str(s) => s,
                _ => String::new(),
            };
            Response {
                data: Value::Str(format!("hi {name}")),
            }
        });

        let response = router
            .send_request("/greet", "GET", Value::Str("X".into()))
            .unwrap();
        assert_eq!(response.data, Value::Str("hi X".into()));

        router.cleanup();
        pool.cleanup().unwrap();
    }

    #[test]
    fn remote_handler_answers_via_pool_keys() {
        let pool = test_pool("remote");
        let caller = HTTPRouter::open(pool.clone());
        let responder = HTTPRouter::open(pool.clone());

        responder.route("/echo", |req| Response { data: req.data });

        let response = caller
            .send_request("/echo", "POST", Value::Int(42))
            .unwrap();
        assert_eq!(response.data, Value::Int(42));

        caller.cleanup();
        responder.cleanup();
        pool.cleanup().unwrap();
    }

    #[test]
    fn unrouted_path_times_out() {
        let pool = test_pool("timeout");
        let caller = HTTPRouter::open(pool.clone());

        let result = caller.send_request("/nobody-home", "GET", Value::Null);
        assert!(matches!(result, Err(Error::CallTimeout)));

        caller.cleanup();
        pool.cleanup().unwrap();
    }
}
