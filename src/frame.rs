//! On-disk layout: a fixed header followed by a linear log of frames.
//!
//! A logical view of the pool is produced by scanning frames left-to-right: the latest
//! `Live` frame for a key wins; a later `Tomb` for the same key removes it. This module
//! only knows how to read and write individual frames/the file header; the scan itself
//! (and compaction) lives in `pool`, since it needs to walk the whole log.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::Error;

pub const MAGIC: [u8; 4] = *b"MVNT";
pub const LAYOUT_VERSION: u16 = 1;

/// `magic(4) + layout_version(2) + capacity(8) + write_cursor(8) + entry_count(4) + generation(8)`
pub const FILE_HEADER_SIZE: usize = 4 + 2 + 8 + 8 + 4 + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Live,
    Tomb,
}

impl FrameKind {
    fn to_byte(self) -> u8 {
        match self {
            FrameKind::Live => 1,
            FrameKind::Tomb => 2,
        }
    }

    fn from_byte(byte: u8) -> Result<FrameKind, Error> {
        match byte {
            1 => Ok(FrameKind::Live),
            2 => Ok(FrameKind::Tomb),
            other => Err(Error::Decode(format!("unknown frame kind byte {other}"))),
        }
    }
}

/// The file header. Kept as a plain struct read from / written to the first
/// [`FILE_HEADER_SIZE`] bytes of the mapping on every access — there is no cached copy,
/// since the backing file is shared by other processes under the same advisory lock.
#[derive(Debug, Clone, Copy)]
pub struct FileHeader {
    pub capacity: u64,
    pub write_cursor: u64,
    pub entry_count: u32,
    pub generation: u64,
}

impl FileHeader {
    pub fn fresh(capacity: u64) -> FileHeader {
        FileHeader {
            capacity,
            write_cursor: 0,
            entry_count: 0,
            generation: 0,
        }
    }

    pub fn read(buf: &[u8]) -> Result<FileHeader, Error> {
        if buf.len() < FILE_HEADER_SIZE {
            return Err(Error::Decode("backing file truncated before header".into()));
        }

        if buf[0..4] != MAGIC {
            return Err(Error::Decode("bad magic bytes in backing file".into()));
        }

        let layout_version = LittleEndian::read_u16(&buf[4..6]);
        if layout_version != LAYOUT_VERSION {
            return Err(Error::Decode(format!(
                "unsupported layout version {layout_version}"
            )));
        }

        Ok(FileHeader {
            capacity: LittleEndian::read_u64(&buf[6..14]),
            write_cursor: LittleEndian::read_u64(&buf[14..22]),
            entry_count: LittleEndian::read_u32(&buf[22..26]),
            generation: LittleEndian::read_u64(&buf[26..34]),
        })
    }

    pub fn write(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&MAGIC);
        LittleEndian::write_u16(&mut buf[4..6], LAYOUT_VERSION);
        LittleEndian::write_u64(&mut buf[6..14], self.capacity);
        LittleEndian::write_u64(&mut buf[14..22], self.write_cursor);
        LittleEndian::write_u32(&mut buf[22..26], self.entry_count);
        LittleEndian::write_u64(&mut buf[26..34], self.generation);
    }
}

/// `kind(1) + key_len(2) + value_len(4) + created_nanos(8) + ttl_nanos(8) + version(8)`
const FRAME_PREFIX_SIZE: usize = 1 + 2 + 4 + 8 + 8 + 8;
const CRC_SIZE: usize = 4;

/// Metadata carried by every frame, ahead of its key and value bytes.
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    pub kind: FrameKind,
    pub key_len: u16,
    pub value_len: u32,
    pub created_nanos: u64,
    pub ttl_nanos: u64,
    pub version: u64,
}

/// Total on-disk size of a frame with the given key/value lengths.
pub fn frame_len(key_len: usize, value_len: usize) -> usize {
    FRAME_PREFIX_SIZE + key_len + value_len + CRC_SIZE
}

/// Serializes a full frame (header, key, value, trailing CRC32C) into a fresh buffer.
pub fn encode_frame(header: &FrameHeader, key: &[u8], value: &[u8]) -> Vec<u8> {
    debug_assert_eq!(header.key_len as usize, key.len());
    debug_assert_eq!(header.value_len as usize, value.len());

    let mut buf = Vec::with_capacity(frame_len(key.len(), value.len()));

    buf.push(header.kind.to_byte());
    buf.extend_from_slice(&header.key_len.to_le_bytes());
    buf.extend_from_slice(&header.value_len.to_le_bytes());
    buf.extend_from_slice(&header.created_nanos.to_le_bytes());
    buf.extend_from_slice(&header.ttl_nanos.to_le_bytes());
    buf.extend_from_slice(&header.version.to_le_bytes());
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);

    let crc = crc32c::crc32c(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf
}

/// A frame read back from the log, key/value borrowed from the underlying slice.
pub struct ParsedFrame<'a> {
    pub header: FrameHeader,
    pub key: &'a [u8],
    pub value: &'a [u8],
    /// Total length of this frame on disk, so the scanner can advance past it.
    pub total_len: usize,
}

/// Parses one frame starting at the head of `buf`, verifying its CRC32C.
///
/// Returns `Ok(None)` if `buf` is too short to even hold a frame prefix — the caller
/// should treat that as "end of the written log", not corruption.
pub fn decode_frame(buf: &[u8]) -> Result<Option<ParsedFrame<'_>>, Error> {
    if buf.len() < FRAME_PREFIX_SIZE {
        return Ok(None);
    }

    let kind = FrameKind::from_byte(buf[0])?;
    let key_len = LittleEndian::read_u16(&buf[1..3]);
    let value_len = LittleEndian::read_u32(&buf[3..7]);
    let created_nanos = LittleEndian::read_u64(&buf[7..15]);
    let ttl_nanos = LittleEndian::read_u64(&buf[15..23]);
    let version = LittleEndian::read_u64(&buf[23..31]);

    let total_len = frame_len(key_len as usize, value_len as usize);
    if buf.len() < total_len {
        return Ok(None);
    }

    let key_start = FRAME_PREFIX_SIZE;
    let key_end = key_start + key_len as usize;
    let value_end = key_end + value_len as usize;
    let crc_end = value_end + CRC_SIZE;

    let expected_crc = LittleEndian::read_u32(&buf[value_end..crc_end]);
    let actual_crc = crc32c::crc32c(&buf[0..value_end]);
    if expected_crc != actual_crc {
        return Err(Error::Decode(format!(
            "frame CRC mismatch at offset (expected {expected_crc}, got {actual_crc})"
        )));
    }

    Ok(Some(ParsedFrame {
        header: FrameHeader {
            kind,
            key_len,
            value_len,
            created_nanos,
            ttl_nanos,
            version,
        },
        key: &buf[key_start..key_end],
        value: &buf[key_end..value_end],
        total_len,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_a_frame() {
        let header = FrameHeader {
            kind: FrameKind::Live,
            key_len: 3,
            value_len: 5,
            created_nanos: 111,
            ttl_nanos: 0,
            version: 1,
        };

        let encoded = encode_frame(&header, b"key", b"value");
        let parsed = decode_frame(&encoded).unwrap().unwrap();

        assert_eq!(parsed.key, b"key");
        assert_eq!(parsed.value, b"value");
        assert_eq!(parsed.header.version, 1);
        assert_eq!(parsed.total_len, encoded.len());
    }

    #[test]
    fn detects_corruption() {
        let header = FrameHeader {
            kind: FrameKind::Live,
            key_len: 1,
            value_len: 1,
            created_nanos: 0,
            ttl_nanos: 0,
            version: 1,
        };

        let mut encoded = encode_frame(&header, b"k", b"v");
        let last = encoded.len() - 1;
        encoded[last] ^= 0xff;

        assert!(decode_frame(&encoded).is_err());
    }

    #[test]
    fn reports_incomplete_frame_as_end_of_log() {
        let header = FrameHeader {
            kind: FrameKind::Live,
            key_len: 1,
            value_len: 1,
            created_nanos: 0,
            ttl_nanos: 0,
            version: 1,
        };

        let encoded = encode_frame(&header, b"k", b"v");
        assert!(decode_frame(&encoded[..encoded.len() - 1])
            .unwrap()
            .is_none());
    }

    #[test]
    fn file_header_roundtrips() {
        let header = FileHeader {
            capacity: 4096,
            write_cursor: 128,
            entry_count: 3,
            generation: 9,
        };

        let mut buf = [0u8; FILE_HEADER_SIZE];
        header.write(&mut buf);
        let parsed = FileHeader::read(&buf).unwrap();

        assert_eq!(parsed.capacity, 4096);
        assert_eq!(parsed.write_cursor, 128);
        assert_eq!(parsed.entry_count, 3);
        assert_eq!(parsed.generation, 9);
    }
}
