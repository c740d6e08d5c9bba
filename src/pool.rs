//! The shared, persistent, TTL-aware key-value pool. Everything else in this crate is a
//! thin adapter whose state lives entirely in pool keys.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex as StdMutex};
use std::thread::JoinHandle;
use std::time::Duration;

use indexmap::IndexMap;
use memmap2::MmapMut;
use parking_lot::Mutex;

use crate::config::PoolConfig;
use crate::crypto;
use crate::error::Error;
use crate::frame::{self, FileHeader, FrameHeader, FrameKind, FILE_HEADER_SIZE};
use crate::lock;
use crate::time::now_nanos;
use crate::value::{self, Value};
use crate::watcher::EventWatcher;

/// A live pool entry together with its metadata, returned by [`SharedPool::get_with_meta`].
#[derive(Debug, Clone)]
pub struct Entry {
    pub value: Value,
    pub created_nanos: u64,
    pub ttl_nanos: Option<u64>,
    pub version: u64,
}

/// Point-in-time pool statistics; `expired_swept` is a running, pool-lifetime counter.
#[derive(Debug, Clone, Copy)]
pub struct Stats {
    pub entry_count: u32,
    pub bytes_used: u64,
    pub bytes_free: u64,
    pub expired_swept: u64,
}

/// A named, persistent, memory-mapped shared key-value pool.
///
/// Cheaply cloneable: clones share the same backing file mapping, lock and sweeper.
#[derive(Clone)]
pub struct SharedPool {
    inner: Arc<Inner>,
}

struct Inner {
    #[allow(dead_code)]
    name: String,
    file: std::fs::File,
    mmap: Mutex<Option<MmapMut>>,
    key_material: Option<[u8; 32]>,
    config: PoolConfig,
    logger: slog::Logger,
    expired_swept: AtomicU64,
    stopped: AtomicBool,
    sweeper: StdMutex<Option<SweeperHandle>>,
    watcher: StdMutex<Option<EventWatcher>>,
}

struct SweeperHandle {
    stop: Arc<StopSignal>,
    done: std::sync::mpsc::Receiver<()>,
    join: JoinHandle<()>,
}

struct StopSignal {
    lock: StdMutex<bool>,
    condvar: Condvar,
}

impl SharedPool {
    /// Idempotent attach: creates the backing file if absent, otherwise opens the existing
    /// file and ignores the supplied capacity.
    pub fn open(config: PoolConfig) -> Result<SharedPool, Error> {
        let (file, mmap) = open_backing_file(&config)?;
        let logger = config
            .logger
            .clone()
            .unwrap_or_else(crate::logging::discard);

        let inner = Arc::new(Inner {
            name: config.name.clone(),
            file,
            mmap: Mutex::new(Some(mmap)),
            key_material: config.encryption_key,
            logger,
            expired_swept: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
            sweeper: StdMutex::new(None),
            watcher: StdMutex::new(None),
            config,
        });

        spawn_sweeper(&inner);

        Ok(SharedPool { inner })
    }

    pub fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> Result<(), Error> {
        if key.len() > u16::MAX as usize {
            return Err(Error::Encode("key exceeds 65535 bytes".into()));
        }

        let mut raw = value::encode_to_vec(value)?;
        if let Some(material) = &self.inner.key_material {
            raw = crypto::encrypt(&raw, material);
        }
        if raw.len() > u32::MAX as usize {
            return Err(Error::Encode("encoded value exceeds 4 GiB".into()));
        }

        let key_bytes = key.as_bytes();
        let needed = frame::frame_len(key_bytes.len(), raw.len());
        let ttl_nanos = ttl.map(|d| d.as_nanos() as u64).unwrap_or(0);

        self.with_frame_lock(|mmap, header| {
            let scan = scan_log(mmap, header)?;
            let is_new_key = !scan.index.contains_key(key);
            let next_version = scan
                .index
                .get(key)
                .map(|loc| loc.header.version + 1)
                .unwrap_or(1);

            ensure_capacity(mmap, header, needed, &scan)?;

            let frame_header = FrameHeader {
                kind: FrameKind::Live,
                key_len: key_bytes.len() as u16,
                value_len: raw.len() as u32,
                created_nanos: now_nanos(),
                ttl_nanos,
                version: next_version,
            };
            append_frame(mmap, header, &frame_header, key_bytes, &raw);

            if is_new_key {
                header.entry_count += 1;
            }
            header.generation += 1;

            Ok(())
        })?;

        slog::debug!(self.inner.logger, "set"; "key" => key);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>, Error> {
        Ok(self.get_with_meta(key)?.map(|entry| entry.value))
    }

    pub fn get_with_meta(&self, key: &str) -> Result<Option<Entry>, Error> {
        let found = self.with_frame_lock(|mmap, header| {
            let scan = scan_log(mmap, header)?;
            match scan.index.get(key) {
                None => Ok(None),
                Some(loc) => {
                    let slice = &mmap[loc.offset..loc.offset + loc.total_len];
                    let parsed = frame::decode_frame(slice)?
                        .expect("frame located by a successful scan must parse");
                    Ok(Some((parsed.header, parsed.value.to_vec())))
                }
            }
        })?;

        let Some((frame_header, raw_value)) = found else {
            return Ok(None);
        };

        // Expiry is evaluated at read time, not relied on from the sweep.
        if frame_header.ttl_nanos != 0 {
            let now = now_nanos();
            if now.saturating_sub(frame_header.created_nanos) >= frame_header.ttl_nanos {
                return Ok(None);
            }
        }

        let plain = match &self.inner.key_material {
            Some(material) => crypto::decrypt(&raw_value, material)?,
            None => raw_value,
        };
        let value = value::decode(&plain)?;

        Ok(Some(Entry {
            value,
            created_nanos: frame_header.created_nanos,
            ttl_nanos: (frame_header.ttl_nanos != 0).then_some(frame_header.ttl_nanos),
            version: frame_header.version,
        }))
    }

    pub fn delete(&self, key: &str) -> Result<bool, Error> {
        let key_bytes = key.as_bytes();

        self.with_frame_lock(|mmap, header| {
            let scan = scan_log(mmap, header)?;
            let Some(loc) = scan.index.get(key) else {
                return Ok(false);
            };
            let version = loc.header.version;

            let needed = frame::frame_len(key_bytes.len(), 0);
            ensure_capacity(mmap, header, needed, &scan)?;

            let tomb_header = FrameHeader {
                kind: FrameKind::Tomb,
                key_len: key_bytes.len() as u16,
                value_len: 0,
                created_nanos: now_nanos(),
                ttl_nanos: 0,
                version,
            };
            append_frame(mmap, header, &tomb_header, key_bytes, &[]);
            header.entry_count -= 1;
            header.generation += 1;

            Ok(true)
        })
    }

    /// Atomically reads the current live value for `key` (`None` if absent or expired)
    /// and replaces it with `f(current)`, under a single hold of the frame lock. Used by
    /// derived channels that need a read-modify-write (e.g. a monotonic sequence counter)
    /// without the races a separate `get` then `set` would allow.
    pub fn update<F>(&self, key: &str, ttl: Option<Duration>, f: F) -> Result<Value, Error>
    where
        F: FnOnce(Option<Value>) -> Value,
    {
        let key_bytes = key.as_bytes();
        let ttl_nanos = ttl.map(|d| d.as_nanos() as u64).unwrap_or(0);

        self.with_frame_lock(|mmap, header| {
            let scan = scan_log(mmap, header)?;
            let is_new_key = !scan.index.contains_key(key);
            let next_version = scan
                .index
                .get(key)
                .map(|loc| loc.header.version + 1)
                .unwrap_or(1);

            let current = match scan.index.get(key) {
                None => None,
                Some(loc) => {
                    let slice = &mmap[loc.offset..loc.offset + loc.total_len];
                    let parsed = frame::decode_frame(slice)?
                        .expect("frame located by a successful scan must parse");

                    let now = now_nanos();
                    let live = parsed.header.ttl_nanos == 0
                        || now.saturating_sub(parsed.header.created_nanos) < parsed.header.ttl_nanos;

                    if !live {
                        None
                    } else {
                        let plain = match &self.inner.key_material {
                            Some(material) => crypto::decrypt(parsed.value, material)?,
                            None => parsed.value.to_vec(),
                        };
                        Some(value::decode(&plain)?)
                    }
                }
            };

            let new_value = f(current);
            let mut raw = value::encode_to_vec(&new_value)?;
            if let Some(material) = &self.inner.key_material {
                raw = crypto::encrypt(&raw, material);
            }

            let needed = frame::frame_len(key_bytes.len(), raw.len());
            ensure_capacity(mmap, header, needed, &scan)?;

            let frame_header = FrameHeader {
                kind: FrameKind::Live,
                key_len: key_bytes.len() as u16,
                value_len: raw.len() as u32,
                created_nanos: now_nanos(),
                ttl_nanos,
                version: next_version,
            };
            append_frame(mmap, header, &frame_header, key_bytes, &raw);

            if is_new_key {
                header.entry_count += 1;
            }
            header.generation += 1;

            Ok(new_value)
        })
    }

    pub fn clear(&self) -> Result<(), Error> {
        self.with_frame_lock(|_mmap, header| {
            header.write_cursor = 0;
            header.entry_count = 0;
            header.generation += 1;
            Ok(())
        })
    }

    /// A cheap map of key to version, for every currently-live entry. Used by watchers.
    pub fn snapshot(&self) -> Result<HashMap<String, u64>, Error> {
        Ok(self
            .snapshot_with_liveness()?
            .into_iter()
            .filter(|(_, (_, live))| *live)
            .map(|(k, (v, _))| (k, v))
            .collect())
    }

    /// Like [`Self::snapshot`] but reports every key (live or not) with its liveness, so
    /// watchers can detect a live→absent transition as well as a version bump.
    pub(crate) fn snapshot_with_liveness(&self) -> Result<HashMap<String, (u64, bool)>, Error> {
        self.with_frame_lock(|mmap, header| {
            let scan = scan_log(mmap, header)?;
            let now = now_nanos();

            Ok(scan
                .index
                .iter()
                .map(|(key, loc)| {
                    let live = loc.header.ttl_nanos == 0
                        || now.saturating_sub(loc.header.created_nanos) < loc.header.ttl_nanos;
                    (key.clone(), (loc.header.version, live))
                })
                .collect())
        })
    }

    pub fn stats(&self) -> Result<Stats, Error> {
        let expired_swept = self.inner.expired_swept.load(Ordering::SeqCst);

        self.with_frame_lock(|_mmap, header| {
            Ok(Stats {
                entry_count: header.entry_count,
                bytes_used: header.write_cursor,
                bytes_free: header.capacity - header.write_cursor,
                expired_swept,
            })
        })
    }

    /// This pool's single shared watcher, created on first call and cached for the
    /// lifetime of this `SharedPool` handle. `EventHandle`, `StreamChannel`, `RoomSockets`
    /// and `HTTPRouter` all attach to this same watcher by default, so a process hosting
    /// several derived channels against one pool still runs only one poll thread and one
    /// dispatch thread for it — mirroring the at-most-one-sweeper invariant `open` already
    /// enforces for itself.
    pub fn watcher(&self) -> EventWatcher {
        let mut slot = self.inner.watcher.lock().unwrap();
        if let Some(watcher) = slot.as_ref() {
            return watcher.clone();
        }
        let watcher = EventWatcher::watch(self.clone());
        *slot = Some(watcher.clone());
        watcher
    }

    /// Stops this pool's shared watcher (if one was ever created) and its sweeper, then
    /// unmaps the backing file and releases this handle's hold on the file lock. Further
    /// operations on this handle (or clones of it) fail with [`Error::Stopped`].
    pub fn cleanup(&self) -> Result<(), Error> {
        if let Some(watcher) = self.inner.watcher.lock().unwrap().take() {
            watcher.stop();
        }
        stop_sweeper(&self.inner);
        self.inner.stopped.store(true, Ordering::SeqCst);
        *self.inner.mmap.lock() = None;
        Ok(())
    }

    fn with_frame_lock<T>(
        &self,
        op: impl FnOnce(&mut [u8], &mut FileHeader) -> Result<T, Error>,
    ) -> Result<T, Error> {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return Err(Error::Stopped);
        }

        let mut guard = self.inner.mmap.lock();
        let mmap = guard.as_mut().ok_or(Error::Stopped)?;

        lock::with_lock(&self.inner.file, self.inner.config.lock_timeout, || {
            let mut header = FileHeader::read(mmap)?;
            let result = op(mmap, &mut header)?;
            header.write(&mut mmap[..FILE_HEADER_SIZE]);
            mmap.flush().map_err(Error::BackingIo)?;
            Ok(result)
        })
    }

    /// The pool's name, as given to `PoolConfig::new`. Two `SharedPool::open` calls with
    /// the same name attach to the same backing file.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub(crate) fn error_sink(&self) -> Option<Arc<dyn Fn(&Error) + Send + Sync>> {
        self.inner.config.error_sink.clone()
    }

    pub(crate) fn poll_interval(&self) -> Duration {
        self.inner.config.poll_interval
    }

    pub(crate) fn call_timeout(&self) -> Duration {
        self.inner.config.call_timeout
    }

    pub(crate) fn request_ttl(&self) -> Duration {
        self.inner.config.request_ttl
    }

    pub(crate) fn logger(&self) -> slog::Logger {
        self.inner.logger.clone()
    }
}

fn pool_path(name: &str) -> PathBuf {
    std::env::temp_dir().join("mvent").join(format!("{name}.pool"))
}

fn open_backing_file(config: &PoolConfig) -> Result<(std::fs::File, MmapMut), Error> {
    let path = pool_path(&config.name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(&path)?;

    let created = lock::with_lock(&file, config.lock_timeout, || {
        let len = file.metadata()?.len();
        if len == 0 {
            let total_len = FILE_HEADER_SIZE as u64 + config.capacity;
            file.set_len(total_len)?;
            Ok(true)
        } else {
            Ok(false)
        }
    })?;

    let mut mmap = unsafe { MmapMut::map_mut(&file) }.map_err(Error::BackingIo)?;

    if created {
        lock::with_lock(&file, config.lock_timeout, || {
            FileHeader::fresh(config.capacity).write(&mut mmap[..FILE_HEADER_SIZE]);
            mmap.flush().map_err(Error::BackingIo)
        })?;
    } else {
        // Existing capacity wins; this also validates magic/layout version on attach.
        FileHeader::read(&mmap[..])?;
    }

    Ok((file, mmap))
}

/// Location of the latest live frame for a key, found by [`scan_log`].
struct FrameLoc {
    offset: usize,
    total_len: usize,
    header: FrameHeader,
}

struct ScanResult {
    index: IndexMap<String, FrameLoc>,
    /// Total number of frames physically present, live or dead, used for the
    /// tombstone-density compaction trigger.
    total_frames: usize,
}

fn scan_log(mmap: &[u8], header: &FileHeader) -> Result<ScanResult, Error> {
    let mut index = IndexMap::new();
    let mut total_frames = 0usize;
    let mut offset = FILE_HEADER_SIZE;
    let end = FILE_HEADER_SIZE + header.write_cursor as usize;

    while offset < end {
        let Some(parsed) = frame::decode_frame(&mmap[offset..end])? else {
            break;
        };

        let key = String::from_utf8(parsed.key.to_vec())
            .map_err(|e| Error::Decode(format!("non-utf8 key in frame: {e}")))?;
        let total_len = parsed.total_len;
        let parsed_header = parsed.header;

        match parsed_header.kind {
            FrameKind::Live => {
                index.insert(
                    key,
                    FrameLoc {
                        offset,
                        total_len,
                        header: parsed_header,
                    },
                );
            }
            FrameKind::Tomb => {
                index.shift_remove(&key);
            }
        }

        total_frames += 1;
        offset += total_len;
    }

    Ok(ScanResult {
        index,
        total_frames,
    })
}

fn ensure_capacity(
    mmap: &mut [u8],
    header: &mut FileHeader,
    needed: usize,
    scan: &ScanResult,
) -> Result<(), Error> {
    let bytes_free = header.capacity as usize - header.write_cursor as usize;
    let density = if scan.total_frames == 0 {
        0.0
    } else {
        1.0 - (scan.index.len() as f64 / scan.total_frames as f64)
    };

    if bytes_free < needed || density > 0.5 {
        compact(mmap, header, scan);
    }

    let bytes_free = header.capacity as usize - header.write_cursor as usize;
    if bytes_free < needed {
        return Err(Error::Full);
    }

    Ok(())
}

/// Rewrites the log keeping only the latest live frame per key, in their original
/// relative order.
fn compact(mmap: &mut [u8], header: &mut FileHeader, scan: &ScanResult) {
    let mut rewritten = Vec::with_capacity(header.write_cursor as usize);

    for loc in scan.index.values() {
        rewritten.extend_from_slice(&mmap[loc.offset..loc.offset + loc.total_len]);
    }

    mmap[FILE_HEADER_SIZE..FILE_HEADER_SIZE + rewritten.len()].copy_from_slice(&rewritten);

    header.write_cursor = rewritten.len() as u64;
    header.entry_count = scan.index.len() as u32;
    header.generation += 1;
}

fn append_frame(
    mmap: &mut [u8],
    header: &mut FileHeader,
    frame_header: &FrameHeader,
    key: &[u8],
    value: &[u8],
) {
    let encoded = frame::encode_frame(frame_header, key, value);
    let start = FILE_HEADER_SIZE + header.write_cursor as usize;
    mmap[start..start + encoded.len()].copy_from_slice(&encoded);
    header.write_cursor += encoded.len() as u64;
}

fn spawn_sweeper(inner: &Arc<Inner>) {
    let stop = Arc::new(StopSignal {
        lock: StdMutex::new(false),
        condvar: Condvar::new(),
    });
    let (done_tx, done_rx) = std::sync::mpsc::channel();

    let inner_clone = inner.clone();
    let stop_clone = stop.clone();
    let interval = inner.config.sweep_interval;

    let join = std::thread::Builder::new()
        .name("mvent-sweeper".into())
        .spawn(move || {
            loop {
                let should_stop = {
                    let guard = stop_clone.lock.lock().unwrap();
                    let (guard, _) = stop_clone
                        .condvar
                        .wait_timeout(guard, interval)
                        .unwrap();
                    *guard
                };

                if should_stop {
                    break;
                }

                match sweep_once(&inner_clone) {
                    Ok(0) => {}
                    Ok(n) => {
                        slog::debug!(inner_clone.logger, "swept expired entries"; "count" => n);
                    }
                    Err(Error::LockTimeout) | Err(Error::BackingIo(_)) => {
                        // Transient failures are logged and retried at the next tick.
                        slog::warn!(inner_clone.logger, "sweep tick failed, retrying");
                    }
                    Err(e) => {
                        slog::error!(inner_clone.logger, "sweep tick failed permanently"; "error" => %e);
                        if let Some(sink) = &inner_clone.config.error_sink {
                            sink(&e);
                        }
                    }
                }
            }

            let _ = done_tx.send(());
        })
        .expect("failed to spawn sweeper thread");

    *inner.sweeper.lock().unwrap() = Some(SweeperHandle {
        stop,
        done: done_rx,
        join,
    });
}

fn sweep_once(inner: &Arc<Inner>) -> Result<u64, Error> {
    if inner.stopped.load(Ordering::SeqCst) {
        return Ok(0);
    }

    let mut guard = inner.mmap.lock();
    let Some(mmap) = guard.as_mut() else {
        return Ok(0);
    };

    let swept = lock::with_lock(&inner.file, inner.config.lock_timeout, || {
        let mut header = FileHeader::read(mmap)?;
        let scan = scan_log(mmap, &header)?;
        let now = now_nanos();

        let expired: Vec<(String, u64)> = scan
            .index
            .iter()
            .filter(|(_, loc)| {
                loc.header.ttl_nanos != 0
                    && now.saturating_sub(loc.header.created_nanos) >= loc.header.ttl_nanos
            })
            .map(|(key, loc)| (key.clone(), loc.header.version))
            .collect();

        if expired.is_empty() {
            header.write(&mut mmap[..FILE_HEADER_SIZE]);
            return Ok(0u64);
        }

        let needed: usize = expired
            .iter()
            .map(|(key, _)| frame::frame_len(key.len(), 0))
            .sum();
        ensure_capacity(mmap, &mut header, needed, &scan)?;

        for (key, version) in &expired {
            let tomb_header = FrameHeader {
                kind: FrameKind::Tomb,
                key_len: key.len() as u16,
                value_len: 0,
                created_nanos: now_nanos(),
                ttl_nanos: 0,
                version: *version,
            };
            append_frame(mmap, &mut header, &tomb_header, key.as_bytes(), &[]);
            header.entry_count -= 1;
        }
        header.generation += 1;

        header.write(&mut mmap[..FILE_HEADER_SIZE]);
        mmap.flush().map_err(Error::BackingIo)?;
        Ok(expired.len() as u64)
    })?;

    if swept > 0 {
        inner.expired_swept.fetch_add(swept, Ordering::SeqCst);
    }
    Ok(swept)
}

fn stop_sweeper(inner: &Arc<Inner>) {
    let Some(handle) = inner.sweeper.lock().unwrap().take() else {
        return;
    };

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
            slog::warn!(inner.logger, "sweeper did not stop in time, abandoning");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64 as TestCounter;
    use std::time::Duration;

    // Each test gets its own pool name rather than redirecting `TMPDIR`, since the
    // latter is process-global and would race across parallel test threads.
    static NEXT_ID: TestCounter = TestCounter::new(0);

    fn unique_name(tag: &str) -> String {
        let id = NEXT_ID.fetch_add(1, Ordering::SeqCst);
        format!("test-{tag}-{}-{id}", std::process::id())
    }

    fn test_config(tag: &str) -> PoolConfig {
        PoolConfig::new(unique_name(tag))
            .capacity(64 * 1024)
            .sweep_interval(Duration::from_millis(20))
    }

    #[test]
    fn set_then_get_roundtrips() {
        let pool = SharedPool::open(test_config("roundtrip")).unwrap();

        pool.set("k", &Value::Str("v".into()), None).unwrap();
        assert_eq!(pool.get("k").unwrap(), Some(Value::Str("v".into())));

        pool.cleanup().unwrap();
    }

    #[test]
    fn versions_strictly_increase() {
        let pool = SharedPool::open(test_config("versions")).unwrap();

        for i in 0..5 {
            pool.set("k", &Value::Int(i), None).unwrap();
        }

        let entry = pool.get_with_meta("k").unwrap().unwrap();
        assert_eq!(entry.version, 5);

        pool.cleanup().unwrap();
    }

    #[test]
    fn ttl_expires_at_read_time() {
        let pool = SharedPool::open(test_config("ttl")).unwrap();

        pool.set("temp", &Value::Bool(true), Some(Duration::from_millis(20)))
            .unwrap();
        std::thread::sleep(Duration::from_millis(60));

        assert_eq!(pool.get("temp").unwrap(), None);

        pool.cleanup().unwrap();
    }

    #[test]
    fn delete_removes_entry() {
        let pool = SharedPool::open(test_config("delete")).unwrap();

        pool.set("k", &Value::Null, None).unwrap();
        assert!(pool.delete("k").unwrap());
        assert!(!pool.delete("k").unwrap());
        assert_eq!(pool.get("k").unwrap(), None);

        pool.cleanup().unwrap();
    }

    #[test]
    fn clear_removes_everything() {
        let pool = SharedPool::open(test_config("clear")).unwrap();

        pool.set("a", &Value::Int(1), None).unwrap();
        pool.set("b", &Value::Int(2), None).unwrap();
        pool.clear().unwrap();

        assert_eq!(pool.get("a").unwrap(), None);
        assert_eq!(pool.stats().unwrap().entry_count, 0);

        pool.cleanup().unwrap();
    }

    #[test]
    fn capacity_overflow_reports_full_and_preserves_state() {
        let pool = SharedPool::open(
            PoolConfig::new(unique_name("overflow"))
                .capacity(4096)
                .sweep_interval(Duration::from_secs(60)),
        )
        .unwrap();

        pool.set("small", &Value::Int(1), None).unwrap();

        let huge_payload = Value::Bytes(vec![0u8; 10 * 1024]);
        let result = pool.set("big", &huge_payload, None);
        assert!(matches!(result, Err(Error::Full)));

        assert_eq!(pool.get("small").unwrap(), Some(Value::Int(1)));
        assert_eq!(pool.stats().unwrap().entry_count, 1);

        pool.cleanup().unwrap();
    }

    #[test]
    fn compaction_preserves_reads() {
        let pool = SharedPool::open(
            PoolConfig::new(unique_name("compaction"))
                .capacity(8 * 1024)
                .sweep_interval(Duration::from_secs(60)),
        )
        .unwrap();

        for i in 0..200 {
            pool.set("hot", &Value::Int(i), None).unwrap();
        }
        pool.set("cold", &Value::Str("still here".into()), None)
            .unwrap();

        assert_eq!(
            pool.get("cold").unwrap(),
            Some(Value::Str("still here".into()))
        );
        assert_eq!(pool.get("hot").unwrap(), Some(Value::Int(199)));

        pool.cleanup().unwrap();
    }

    #[test]
    fn encryption_roundtrips_and_rejects_wrong_key() {
        let key_a = [1u8; 32];
        let key_b = [2u8; 32];
        let name = unique_name("crypto-shared");

        let writer = SharedPool::open(PoolConfig::new(&name).encryption_key(key_a)).unwrap();
        writer
            .set("secret", &Value::Str("hunter2".into()), None)
            .unwrap();

        let reader_ok = SharedPool::open(PoolConfig::new(&name).encryption_key(key_a)).unwrap();
        assert_eq!(
            reader_ok.get("secret").unwrap(),
            Some(Value::Str("hunter2".into()))
        );

        let reader_bad = SharedPool::open(PoolConfig::new(&name).encryption_key(key_b)).unwrap();
        assert!(matches!(reader_bad.get("secret"), Err(Error::Decrypt)));

        writer.cleanup().unwrap();
        reader_ok.cleanup().unwrap();
        reader_bad.cleanup().unwrap();
    }

    #[test]
    fn update_is_atomic_with_respect_to_readers() {
        let pool = SharedPool::open(test_config("update")).unwrap();

        let result = pool
            .update("counter", None, |current| match current {
                Some(Value::Int(n)) => Value::Int(n + 1),
                _ => Value::Int(1),
            })
            .unwrap();
        assert_eq!(result, Value::Int(1));

        let result = pool
            .update("counter", None, |current| match current {
                Some(Value::Int(n)) => Value::Int(n + 1),
                _ => Value::Int(1),
            })
            .unwrap();
        assert_eq!(result, Value::Int(2));
        assert_eq!(pool.get("counter").unwrap(), Some(Value::Int(2)));

        pool.cleanup().unwrap();
    }

    #[test]
    fn cleanup_stops_further_operations() {
        let pool = SharedPool::open(test_config("cleanup")).unwrap();

        pool.cleanup().unwrap();
        assert!(matches!(pool.get("anything"), Err(Error::Stopped)));
    }
}
