//! Record codec for the on-disk format.
//!
//! A record is a self-delimiting byte sequence, all integers little-endian:
//!
//! ```text
//! u32 size | u32 klen | key | u32 taglen | tag | u32 vlen | value
//! ```
//!
//! `size` counts the whole record including itself. The tag is the literal
//! text `string` or `int64`, making the format self-describing: a reader
//! needs no external schema to interpret a segment.

use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::corrupted;
use crate::error::{Error, Result};

/// Fixed overhead of a record: four u32 length fields.
pub const RECORD_OVERHEAD: usize = 16;

/// A tagged value: the two kinds the format supports.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Str(String),
    Int64(i64),
}

impl Value {
    /// The on-disk type tag.
    pub fn tag(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Int64(_) => "int64",
        }
    }

    fn payload_len(&self) -> usize {
        match self {
            Value::Str(s) => s.len(),
            Value::Int64(_) => 8,
        }
    }
}

/// A single key/value unit as stored in a segment.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub key: String,
    pub value: Value,
}

impl Record {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    /// Encoded length of this record, without encoding it.
    pub fn encoded_len(&self) -> usize {
        self.key.len() + self.value.tag().len() + self.value.payload_len() + RECORD_OVERHEAD
    }

    /// Encodes the record into its on-disk byte sequence.
    pub fn encode(&self) -> Vec<u8> {
        let key = self.key.as_bytes();
        let tag = self.value.tag().as_bytes();
        let size = self.encoded_len();

        let mut buf = Vec::with_capacity(size);
        buf.extend_from_slice(&(size as u32).to_le_bytes());
        buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
        buf.extend_from_slice(key);
        buf.extend_from_slice(&(tag.len() as u32).to_le_bytes());
        buf.extend_from_slice(tag);
        match &self.value {
            Value::Str(s) => {
                buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
                buf.extend_from_slice(s.as_bytes());
            }
            Value::Int64(v) => {
                buf.extend_from_slice(&8u32.to_le_bytes());
                buf.extend_from_slice(&v.to_le_bytes());
            }
        }
        buf
    }

    /// Decodes one record from exactly its encoded bytes.
    ///
    /// Every length field is checked against the declared total size, so a
    /// record whose fields do not add up is rejected rather than misread.
    pub fn decode(bytes: &[u8]) -> Result<Record> {
        let mut reader = bytes;
        let size = reader
            .read_u32::<LittleEndian>()
            .map_err(|_| corrupted!("record too short for size field"))? as usize;
        if size != bytes.len() {
            return Err(corrupted!(
                "declared record size {size} does not match buffer length {}",
                bytes.len()
            ));
        }

        let key = read_field(&mut reader, "key")?;
        let key =
            String::from_utf8(key).map_err(|_| corrupted!("record key is not valid utf-8"))?;
        let tag = read_field(&mut reader, "type tag")?;
        let payload = read_field(&mut reader, "value")?;
        if !reader.is_empty() {
            return Err(corrupted!(
                "record has {} bytes beyond its declared fields",
                reader.len()
            ));
        }

        let value = match tag.as_slice() {
            b"string" => Value::Str(
                String::from_utf8(payload)
                    .map_err(|_| corrupted!("string value is not valid utf-8"))?,
            ),
            b"int64" => {
                if payload.len() != 8 {
                    return Err(corrupted!("int64 value has length {}", payload.len()));
                }
                Value::Int64((&payload[..]).read_i64::<LittleEndian>()?)
            }
            other => {
                return Err(corrupted!(
                    "unknown value type {:?}",
                    String::from_utf8_lossy(other)
                ))
            }
        };

        Ok(Record { key, value })
    }
}

fn read_field(reader: &mut &[u8], what: &str) -> Result<Vec<u8>> {
    let len = reader
        .read_u32::<LittleEndian>()
        .map_err(|_| corrupted!("record truncated reading {what} length"))? as usize;
    if len > reader.len() {
        return Err(corrupted!(
            "{what} length {len} exceeds remaining record size {}",
            reader.len()
        ));
    }
    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .map_err(|_| corrupted!("record truncated reading {what}"))?;
    Ok(buf)
}

/// Reads one record's raw bytes from a reader positioned at a record
/// header, consuming exactly the record and nothing more. The compactor
/// uses this to copy records without interpreting them.
///
/// The body is read through a `take` adapter rather than into a
/// pre-sized buffer, so a corrupt size field cannot demand a huge
/// allocation before the shortfall is noticed.
pub fn read_record<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let mut size_buf = [0u8; 4];
    reader
        .read_exact(&mut size_buf)
        .map_err(|e| truncated_or_io(e, "record size"))?;
    let size = u32::from_le_bytes(size_buf) as usize;
    if size < RECORD_OVERHEAD {
        return Err(corrupted!("record size {size} below minimum"));
    }

    let body = (size - 4) as u64;
    let mut record = size_buf.to_vec();
    let read = reader.by_ref().take(body).read_to_end(&mut record)?;
    if (read as u64) < body {
        return Err(corrupted!("truncated record: read {read} of {body} bytes"));
    }
    Ok(record)
}

/// Reads and decodes the value of exactly one record, discarding the key.
pub fn read_value<R: Read>(reader: &mut R) -> Result<Value> {
    let bytes = read_record(reader)?;
    Ok(Record::decode(&bytes)?.value)
}

fn truncated_or_io(err: std::io::Error, what: &str) -> Error {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        corrupted!("truncated {what}")
    } else {
        err.into()
    }
}
