//! Binary codec primitives
//!
//! Every value is little-endian. Strings and byte arrays carry a `u32`
//! length prefix. Timestamps are encoded as `i64` ticks of 100 ns since
//! 0001-01-01T00:00:00Z.
//!
//! Fixed-width numbers go through `byteorder`'s `ReadBytesExt` /
//! `WriteBytesExt`, which are re-exported so record implementations only
//! need this module.

use std::io::{self, Read, Write};

use chrono::{DateTime, Utc};

pub use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// Ticks between 0001-01-01 and the Unix epoch.
pub const TICKS_AT_UNIX_EPOCH: i64 = 621_355_968_000_000_000;

/// Ticks per second (one tick = 100 ns).
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// Upper bound accepted for a length prefix, guards allocations on garbage.
pub const MAX_LENGTH_PREFIX: u32 = 64 * 1024 * 1024;

/// Converts a timestamp to ticks.
pub fn to_ticks(time: DateTime<Utc>) -> i64 {
    TICKS_AT_UNIX_EPOCH
        + time.timestamp() * TICKS_PER_SECOND
        + i64::from(time.timestamp_subsec_nanos() / 100)
}

/// Converts ticks back to a timestamp.
pub fn from_ticks(ticks: i64) -> io::Result<DateTime<Utc>> {
    let relative = ticks - TICKS_AT_UNIX_EPOCH;
    let secs = relative.div_euclid(TICKS_PER_SECOND);
    let nanos = (relative.rem_euclid(TICKS_PER_SECOND) * 100) as u32;

    DateTime::<Utc>::from_timestamp(secs, nanos).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("timestamp out of range: {} ticks", ticks),
        )
    })
}

/// Writes a timestamp as ticks.
pub fn write_time<W: Write + ?Sized>(writer: &mut W, time: DateTime<Utc>) -> io::Result<()> {
    writer.write_i64::<LittleEndian>(to_ticks(time))
}

/// Reads a timestamp encoded as ticks.
pub fn read_time<R: Read + ?Sized>(reader: &mut R) -> io::Result<DateTime<Utc>> {
    let ticks = reader.read_i64::<LittleEndian>()?;
    from_ticks(ticks)
}

/// Writes a length-prefixed byte array.
pub fn write_bytes<W: Write + ?Sized>(writer: &mut W, bytes: &[u8]) -> io::Result<()> {
    let len = u32::try_from(bytes.len())
        .ok()
        .filter(|len| *len <= MAX_LENGTH_PREFIX)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("byte array too long: {}", bytes.len()),
            )
        })?;
    writer.write_u32::<LittleEndian>(len)?;
    writer.write_all(bytes)
}

/// Reads a length-prefixed byte array.
pub fn read_bytes<R: Read + ?Sized>(reader: &mut R) -> io::Result<Vec<u8>> {
    let len = reader.read_u32::<LittleEndian>()?;
    if len > MAX_LENGTH_PREFIX {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("length prefix too large: {}", len),
        ));
    }

    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Writes a length-prefixed UTF-8 string.
pub fn write_string<W: Write + ?Sized>(writer: &mut W, s: &str) -> io::Result<()> {
    write_bytes(writer, s.as_bytes())
}

/// Reads a length-prefixed UTF-8 string.
pub fn read_string<R: Read + ?Sized>(reader: &mut R) -> io::Result<String> {
    let buf = read_bytes(reader)?;
    String::from_utf8(buf)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("Invalid UTF-8: {}", e)))
}

/// Encoded size of a string written with [`write_string`].
pub fn string_len(s: &str) -> usize {
    4 + s.len()
}

/// Writes a fixed-width, zero-padded UTF-8 field of exactly `width` bytes.
///
/// Used by fixed-size records. Fails if `s` does not fit.
pub fn write_fixed_str<W: Write + ?Sized>(writer: &mut W, s: &str, width: usize) -> io::Result<()> {
    let bytes = s.as_bytes();
    if bytes.len() > width {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("string of {} bytes exceeds field width {}", bytes.len(), width),
        ));
    }
    writer.write_all(bytes)?;
    writer.write_all(&vec![0u8; width - bytes.len()])
}

/// Reads a field written by [`write_fixed_str`], trimming the zero padding.
pub fn read_fixed_str<R: Read + ?Sized>(reader: &mut R, width: usize) -> io::Result<String> {
    let mut buf = vec![0u8; width];
    reader.read_exact(&mut buf)?;
    let end = buf.iter().position(|b| *b == 0).unwrap_or(width);
    buf.truncate(end);
    String::from_utf8(buf)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("Invalid UTF-8: {}", e)))
}
