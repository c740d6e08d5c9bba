use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current wall-clock time as UNIX epoch nanoseconds.
///
/// Wall-clock (not monotonic) so that `created_nanos` is comparable across processes that
/// wrote the same pool file; TTL comparisons therefore tolerate clock skew up to the
/// effective sweep interval, as noted in the on-disk format contract.
#[inline]
pub fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_nanos() as u64
}
