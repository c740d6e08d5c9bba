use std::io;

/// Errors surfaced by any `mvent` component.
///
/// Mirrors the error kinds a caller needs to distinguish: I/O failures on the backing file,
/// lock contention, codec failures, capacity exhaustion, and the two request/response
/// timeouts used by the derived channels.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("backing file I/O failed: {0}")]
    BackingIo(#[from] io::Error),

    #[error("file lock not acquired within the configured timeout")]
    LockTimeout,

    #[error("encoded record does not fit in the pool after compaction")]
    Full,

    #[error("value codec failed to encode: {0}")]
    Encode(String),

    #[error("value codec failed to decode: {0}")]
    Decode(String),

    #[error("authenticated decryption failed")]
    Decrypt,

    #[error("timed out waiting for a response")]
    CallTimeout,

    #[error("operation attempted on a component that has been cleaned up")]
    Stopped,
}

pub type Result<T> = std::result::Result<T, Error>;
