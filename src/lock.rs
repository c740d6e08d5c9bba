//! The cross-process synchronizer: an advisory exclusive lock over the entire backing
//! file, acquired for every mutation and for every read that needs a consistent frame
//! view.
//!
//! Generalizes the in-process `RwCell` guard shape the ancestor's `sync` module used for
//! single-writer/many-reader access to an OS-level, cross-process equivalent backed by
//! `fs2`'s whole-file advisory lock.

use std::fs::File;
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::error::Error;

const POLL_BACKOFF: Duration = Duration::from_millis(5);

/// Acquires an exclusive lock on `file`, blocking (optionally up to `timeout`), runs `op`
/// with the lock held, then releases the lock on every exit path — including `op`
/// returning an error or panicking.
pub fn with_lock<T>(
    file: &File,
    timeout: Option<Duration>,
    op: impl FnOnce() -> Result<T, Error>,
) -> Result<T, Error> {
    let _guard = acquire(file, timeout)?;
    op()
}

struct LockGuard<'a> {
    file: &'a File,
}

impl<'a> Drop for LockGuard<'a> {
    fn drop(&mut self) {
        let _ = FileExt::unlock(self.file);
    }
}

fn acquire(file: &File, timeout: Option<Duration>) -> Result<LockGuard<'_>, Error> {
    match timeout {
        None => {
            FileExt::lock_exclusive(file)?;
            Ok(LockGuard { file })
        }
        Some(timeout) => {
            let deadline = Instant::now() + timeout;

            loop {
                match FileExt::try_lock_exclusive(file) {
                    Ok(()) => return Ok(LockGuard { file }),
                    Err(_) if Instant::now() >= deadline => return Err(Error::LockTimeout),
                    Err(_) => std::thread::sleep(POLL_BACKOFF),
                }
            }
        }
    }
}
