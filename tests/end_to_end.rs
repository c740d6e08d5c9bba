//! Cross-module and multi-handle scenarios, run at a higher level than each module's own
//! unit tests: two independent `SharedPool` handles opened against the same name stand in
//! for two attached processes, since both sides of every call here only ever go through
//! the public API and the backing file.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use indexmap::IndexMap;
use mvent::{EventHandle, HTTPRouter, PoolConfig, SharedPool, StreamChannel, Value};

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

fn unique_name(tag: &str) -> String {
    let id = NEXT_ID.fetch_add(1, Ordering::SeqCst);
    format!("e2e-{tag}-{}-{id}", std::process::id())
}

fn open(tag: &str) -> SharedPool {
    SharedPool::open(
        PoolConfig::new(unique_name(tag))
            .poll_interval(Duration::from_millis(10))
            .sweep_interval(Duration::from_millis(40))
            .call_timeout(Duration::from_millis(500)),
    )
    .unwrap()
}

fn attach(pool: &SharedPool) -> SharedPool {
    SharedPool::open(
        PoolConfig::new(pool.name().to_string())
            .poll_interval(Duration::from_millis(10))
            .sweep_interval(Duration::from_millis(40)),
    )
    .unwrap()
}

#[test]
fn multi_handler_emit() {
    let pool = open("multi-handler");
    let handle = EventHandle::new(pool.clone());

    let h1 = Arc::new(Mutex::new(0u32));
    let h2 = Arc::new(Mutex::new(0u32));
    let h1_clone = h1.clone();
    let h2_clone = h2.clone();

    handle.on("user", move |_| *h1_clone.lock().unwrap() += 1);
    handle.on("user", move |_| *h2_clone.lock().unwrap() += 1);

    let mut fields = IndexMap::new();
    fields.insert("name".to_string(), Value::Str("Bob".into()));
    handle.emit("user", &Value::Map(fields), None).unwrap();

    std::thread::sleep(Duration::from_millis(80));

    assert_eq!(*h1.lock().unwrap(), 1);
    assert_eq!(*h2.lock().unwrap(), 1);

    handle.cleanup().unwrap();
}

#[test]
fn ttl_autoexpire_delivers_one_tombstone() {
    let pool = open("ttl-autoexpire");
    let handle = EventHandle::new(pool.clone());

    let tombstones = Arc::new(Mutex::new(Vec::new()));
    let tombstones_clone = tombstones.clone();
    handle.on("temp", move |v| tombstones_clone.lock().unwrap().push(v));

    handle
        .emit("temp", &Value::Str("hot".into()), Some(Duration::from_millis(200)))
        .unwrap();

    std::thread::sleep(Duration::from_millis(500));

    assert_eq!(pool.get("temp").unwrap(), None);
    let seen = tombstones.lock().unwrap();
    assert_eq!(seen.as_slice(), &[Some(Value::Str("hot".into())), None]);

    handle.cleanup().unwrap();
}

#[test]
fn cross_process_watch_observes_final_value() {
    let pool_a = open("cross-process");
    let handle_a = EventHandle::new(pool_a.clone());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    handle_a.on("k", move |v| seen_clone.lock().unwrap().push(v));

    let pool_b = attach(&pool_a);
    pool_b.set("k", &Value::Str("v1".into()), None).unwrap();
    pool_b.set("k", &Value::Str("v2".into()), None).unwrap();

    std::thread::sleep(Duration::from_millis(80));

    let final_value = pool_a.get_with_meta("k").unwrap().unwrap();
    assert_eq!(final_value.value, Value::Str("v2".into()));
    assert!(final_value.version >= 2);
    assert_eq!(seen.lock().unwrap().last(), Some(&Some(Value::Str("v2".into()))));

    handle_a.cleanup().unwrap();
    pool_b.cleanup().unwrap();
}

#[test]
fn stream_sequence_delivered_in_order() {
    let pool = open("stream-sequence");
    let stream = StreamChannel::open(pool.clone(), "s");

    let received = Arc::new(Mutex::new(Vec::new()));
    let received_clone = received.clone();
    stream.subscribe(move |payload| received_clone.lock().unwrap().push(payload));

    for letter in ["a", "b", "c"] {
        stream.publish(Value::Str(letter.into())).unwrap();
        std::thread::sleep(Duration::from_millis(25));
    }
    std::thread::sleep(Duration::from_millis(80));

    // Loss is tolerated but reordering is not: whatever arrived must be a contiguous
    // suffix of ["a", "b", "c"].
    let seen = received.lock().unwrap();
    let expected = [
        Value::Str("a".into()),
        Value::Str("b".into()),
        Value::Str("c".into()),
    ];
    assert!(!seen.is_empty());
    assert_eq!(seen.as_slice(), &expected[expected.len() - seen.len()..]);

    stream.cleanup();
    pool.cleanup().unwrap();
}

#[test]
fn http_router_synchronous_round_trip() {
    let pool = open("http-router-sync");
    let router = HTTPRouter::open(pool.clone());

    router.route("/greet", |req| {
        let name = match &req.data {
            Value::Map(fields) => match fields.get("name") {
                Some(Value::Str(s)) => s.clone(),
                _ => String::new(),
            },
            _ => String::new(),
        };
        let mut fields = IndexMap::new();
        fields.insert("g".to_string(), Value::Str(format!("hi {name}")));
        mvent::Response { data: Value::Map(fields) }
    });

    let mut data = IndexMap::new();
    data.insert("name".to_string(), Value::Str("X".into()));
    let response = router.send_request("/greet", "POST", Value::Map(data)).unwrap();

    let Value::Map(fields) = response.data else {
        panic!("expected map response");
    };
    assert_eq!(fields.get("g"), Some(&Value::Str("hi X".into())));

    router.cleanup();
    pool.cleanup().unwrap();
}

#[test]
fn capacity_overflow_leaves_prior_state_intact() {
    let pool = SharedPool::open(
        PoolConfig::new(unique_name("capacity-overflow"))
            .capacity(4096)
            .poll_interval(Duration::from_millis(10))
            .sweep_interval(Duration::from_millis(40)),
    )
    .unwrap();

    pool.set("small", &Value::Str("kept".into()), None).unwrap();
    let before = pool.stats().unwrap();

    let oversized = Value::Bytes(vec![0u8; 10 * 1024]);
    let result = pool.set("big", &oversized, None);
    assert!(matches!(result, Err(mvent::Error::Full)));

    let after = pool.stats().unwrap();
    assert_eq!(before.entry_count, after.entry_count);
    assert_eq!(pool.get("small").unwrap(), Some(Value::Str("kept".into())));
    assert_eq!(pool.get("big").unwrap(), None);

    pool.cleanup().unwrap();
}
