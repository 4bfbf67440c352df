//! Binary table codec
//!
//! The registry cache is a set of five files written and read together:
//!
//! ```text
//! .table          header, next id, id -> offset index, point name index
//! .mainData       per point: XPT, its EXTs, their element trees (depth 1..2);
//!                 then every orphan extension with its element trees
//! .extraData      point/extension extras and elements of depth >= 3
//! .contributions  module id -> run-length children
//! .orphans        point identifier -> waiting extension ids
//! ```
//!
//! All integers are big-endian. Nullable strings carry a marker byte
//! ([`NULL`] or [`OBJECT`]) followed by a u16 byte length and UTF-8 bytes.
//! Id arrays are an i32 count followed by that many i32 values.

pub mod header;
pub mod reader;
pub mod writer;

pub use header::TableHeader;
pub use reader::{TableIndex, TableReader};
pub use writer::TableWriter;

use crate::core::error::{RegistryError, Result};
use crate::core::model::ObjectId;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

pub const CACHE_VERSION: i32 = 1;

pub const TABLE: &str = ".table";
pub const MAIN: &str = ".mainData";
pub const EXTRA: &str = ".extraData";
pub const CONTRIBUTIONS: &str = ".contributions";
pub const ORPHANS: &str = ".orphans";

/// Marker byte of an absent string
pub const NULL: u8 = 0;
/// Marker byte of a present string
pub const OBJECT: u8 = 1;

const MAX_STRING_BYTES: usize = u16::MAX as usize;

/// Map a short read to a corruption error
pub(crate) fn truncated(err: io::Error) -> RegistryError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        RegistryError::CorruptCache("unexpected end of cache data".to_string())
    } else {
        RegistryError::Io(err)
    }
}

/// String without a marker byte
pub fn write_str<W: Write>(out: &mut W, value: &str) -> Result<()> {
    let bytes = value.as_bytes();
    if bytes.len() > MAX_STRING_BYTES {
        return Err(RegistryError::StringTooLong(bytes.len()));
    }
    out.write_u16::<BigEndian>(bytes.len() as u16)?;
    out.write_all(bytes)?;
    Ok(())
}

pub fn write_str_opt<W: Write>(out: &mut W, value: Option<&str>) -> Result<()> {
    match value {
        None => out.write_u8(NULL)?,
        Some(value) => {
            out.write_u8(OBJECT)?;
            write_str(out, value)?;
        }
    }
    Ok(())
}

pub fn write_ids<W: Write>(out: &mut W, ids: &[ObjectId]) -> Result<()> {
    out.write_i32::<BigEndian>(ids.len() as i32)?;
    for id in ids {
        out.write_i32::<BigEndian>(id.get() as i32)?;
    }
    Ok(())
}

pub fn write_raw<W: Write>(out: &mut W, values: &[u32]) -> Result<()> {
    out.write_i32::<BigEndian>(values.len() as i32)?;
    for value in values {
        out.write_i32::<BigEndian>(*value as i32)?;
    }
    Ok(())
}

pub fn read_str<R: Read>(input: &mut R) -> Result<String> {
    let len = input.read_u16::<BigEndian>().map_err(truncated)? as usize;
    let mut bytes = vec![0u8; len];
    input.read_exact(&mut bytes).map_err(truncated)?;
    String::from_utf8(bytes)
        .map_err(|e| RegistryError::CorruptCache(format!("invalid UTF-8 string: {}", e)))
}

pub fn read_str_opt<R: Read>(input: &mut R) -> Result<Option<String>> {
    match input.read_u8().map_err(truncated)? {
        NULL => Ok(None),
        OBJECT => read_str(input).map(Some),
        marker => Err(RegistryError::CorruptCache(format!(
            "invalid string marker {}",
            marker
        ))),
    }
}

pub fn read_count<R: Read>(input: &mut R) -> Result<usize> {
    let count = input.read_i32::<BigEndian>().map_err(truncated)?;
    usize::try_from(count)
        .map_err(|_| RegistryError::CorruptCache(format!("negative count {}", count)))
}

pub fn read_raw<R: Read>(input: &mut R) -> Result<Vec<u32>> {
    let count = read_count(input)?;
    let mut values = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        values.push(input.read_i32::<BigEndian>().map_err(truncated)? as u32);
    }
    Ok(values)
}

pub fn read_ids<R: Read>(input: &mut R) -> Result<Vec<ObjectId>> {
    Ok(read_raw(input)?.into_iter().map(ObjectId).collect())
}

pub fn read_id<R: Read>(input: &mut R) -> Result<ObjectId> {
    Ok(ObjectId(input.read_i32::<BigEndian>().map_err(truncated)? as u32))
}
