//! A tagged, self-describing binary codec for the value algebra pool entries can carry:
//! nulls, booleans, integers, floats, byte strings, unicode strings, ordered lists and
//! maps with string keys, including nested combinations.
//!
//! The exact byte format is a private implementation detail of this pool; nothing outside
//! this crate needs to read it directly. It only has to round-trip.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use indexmap::IndexMap;
use std::io::{self, Read, Write};

use crate::error::Error;

/// A pool value. Maps use `IndexMap` so that insertion order survives a round trip even
/// though the algebra only promises "maps with string keys", not ordering.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
    Str(String),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
}

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_BYTES: u8 = 4;
const TAG_STR: u8 = 5;
const TAG_LIST: u8 = 6;
const TAG_MAP: u8 = 7;

/// Encodes `value` into `out`, appending to whatever is already there.
pub fn encode(value: &Value, out: &mut Vec<u8>) -> Result<(), Error> {
    write_value(value, out).map_err(|e| Error::Encode(e.to_string()))
}

/// Encodes `value` into a freshly allocated buffer.
pub fn encode_to_vec(value: &Value) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    encode(value, &mut out)?;
    Ok(out)
}

/// Decodes a single value from `bytes`, requiring the entire slice to be consumed.
pub fn decode(bytes: &[u8]) -> Result<Value, Error> {
    let mut cursor = io::Cursor::new(bytes);
    let value = read_value(&mut cursor).map_err(|e| Error::Decode(e.to_string()))?;

    if (cursor.position() as usize) != bytes.len() {
        return Err(Error::Decode("trailing bytes after value".into()));
    }

    Ok(value)
}

fn write_value<W: Write>(value: &Value, w: &mut W) -> io::Result<()> {
    match value {
        Value::Null => w.write_u8(TAG_NULL),
        Value::Bool(b) => {
            w.write_u8(TAG_BOOL)?;
            w.write_u8(if *b { 1 } else { 0 })
        }
        Value::Int(i) => {
            w.write_u8(TAG_INT)?;
            w.write_i64::<LittleEndian>(*i)
        }
        Value::Float(f) => {
            w.write_u8(TAG_FLOAT)?;
            w.write_f64::<LittleEndian>(*f)
        }
        Value::Bytes(b) => {
            w.write_u8(TAG_BYTES)?;
            w.write_u32::<LittleEndian>(b.len() as u32)?;
            w.write_all(b)
        }
        Value::Str(s) => {
            w.write_u8(TAG_STR)?;
            let bytes = s.as_bytes();
            w.write_u32::<LittleEndian>(bytes.len() as u32)?;
            w.write_all(bytes)
        }
        Value::List(items) => {
            w.write_u8(TAG_LIST)?;
            w.write_u32::<LittleEndian>(items.len() as u32)?;
            for item in items {
                write_value(item, w)?;
            }
            Ok(())
        }
        Value::Map(map) => {
            w.write_u8(TAG_MAP)?;
            w.write_u32::<LittleEndian>(map.len() as u32)?;
            for (key, item) in map {
                let key_bytes = key.as_bytes();
                w.write_u32::<LittleEndian>(key_bytes.len() as u32)?;
                w.write_all(key_bytes)?;
                write_value(item, w)?;
            }
            Ok(())
        }
    }
}

fn read_value<R: Read>(r: &mut R) -> io::Result<Value> {
    match r.read_u8()? {
        TAG_NULL => Ok(Value::Null),
        TAG_BOOL => Ok(Value::Bool(r.read_u8()? != 0)),
        TAG_INT => Ok(Value::Int(r.read_i64::<LittleEndian>()?)),
        TAG_FLOAT => Ok(Value::Float(r.read_f64::<LittleEndian>()?)),
        TAG_BYTES => {
            let len = r.read_u32::<LittleEndian>()? as usize;
            let mut buf = vec![0u8; len];
            r.read_exact(&mut buf)?;
            Ok(Value::Bytes(buf))
        }
        TAG_STR => {
            let len = r.read_u32::<LittleEndian>()? as usize;
            let mut buf = vec![0u8; len];
            r.read_exact(&mut buf)?;
            String::from_utf8(buf)
                .map(Value::Str)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
        }
        TAG_LIST => {
            let len = r.read_u32::<LittleEndian>()? as usize;
            let mut items = Vec::with_capacity(len.min(4096));
            for _ in 0..len {
                items.push(read_value(r)?);
            }
            Ok(Value::List(items))
        }
        TAG_MAP => {
            let len = r.read_u32::<LittleEndian>()? as usize;
            let mut map = IndexMap::with_capacity(len.min(4096));
            for _ in 0..len {
                let key_len = r.read_u32::<LittleEndian>()? as usize;
                let mut key_buf = vec![0u8; key_len];
                r.read_exact(&mut key_buf)?;
                let key = String::from_utf8(key_buf)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                map.insert(key, read_value(r)?);
            }
            Ok(Value::Map(map))
        }
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown value tag {other}"),
        )),
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Value {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Value {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Value {
        Value::Bool(b)
    }
}
