//! Record data model
//!
//! A record carries an immutable, non-zero [`RecordId`] followed by an
//! application-defined body:
//!
//! ```text
//! +------------------+
//! | Record ID        | (u32 LE, never 0)
//! +------------------+
//! | Body             | (record specific)
//! +------------------+
//! ```
//!
//! Tables own the stored bytes; every read hands out a freshly decoded value.

use std::fmt;
use std::io::{self, Read, Write};

use crate::codec::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// Record identifier. `0` is reserved as the null identifier.
pub type RecordId = u32;

/// The null identifier, never stored.
pub const NULL_ID: RecordId = 0;

/// A storable value with an immutable identifier.
pub trait Record: Clone + fmt::Debug + Send + Sync + 'static {
    /// The record identifier, never [`NULL_ID`] for a stored record.
    fn id(&self) -> RecordId;

    /// Writes everything after the identifier.
    fn encode_body(&self, writer: &mut dyn Write) -> io::Result<()>;

    /// Reads everything after the identifier.
    fn decode_body(id: RecordId, reader: &mut dyn Read) -> io::Result<Self>
    where
        Self: Sized;
}

/// A record whose encoding (identifier included) always has the same length.
///
/// Required by the slotted layout, which stores one record per fixed frame.
pub trait FixedSizeRecord: Record {
    /// Encoded length in bytes, including the 4-byte identifier.
    const ENCODED_SIZE: usize;
}

/// Writes `record` (identifier then body).
///
/// # Panics
///
/// Panics if the record carries the null identifier.
pub fn write_record<R: Record>(writer: &mut dyn Write, record: &R) -> io::Result<()> {
    assert_ne!(record.id(), NULL_ID, "cannot store a record with the null id");

    writer.write_u32::<LittleEndian>(record.id())?;
    record.encode_body(writer)
}

/// Reads a record written by [`write_record`].
///
/// A null identifier means the bytes do not hold a record.
pub fn read_record<R: Record>(reader: &mut dyn Read) -> io::Result<R> {
    let id = reader.read_u32::<LittleEndian>()?;
    if id == NULL_ID {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "null record id in stream",
        ));
    }
    R::decode_body(id, reader)
}

/// Encodes a record into a fresh buffer.
pub fn encode_record<R: Record>(record: &R) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    write_record(&mut buf, record)?;
    Ok(buf)
}


#[cfg(test)]
mod tests {
    use super::testing::{Item, Note};
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_fixed_record_roundtrip() {
        let item = Item::new(7, -42, "widget");
        let buf = encode_record(&item).unwrap();
        assert_eq!(buf.len(), Item::ENCODED_SIZE);

        let read: Item = read_record(&mut Cursor::new(buf)).unwrap();
        assert_eq!(read, item);
    }

    #[test]
    fn test_variable_record_roundtrip() {
        let note = Note::new(3, "a longer body of text");
        let buf = encode_record(&note).unwrap();
        let read: Note = read_record(&mut Cursor::new(buf)).unwrap();
        assert_eq!(read, note);
    }

    #[test]
    fn test_null_id_rejected_on_read() {
        let buf = vec![0u8; Item::ENCODED_SIZE];
        let err = read_record::<Item>(&mut Cursor::new(buf)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    #[should_panic(expected = "null id")]
    fn test_null_id_rejected_on_write() {
        let _ = encode_record(&Item::new(NULL_ID, 0, ""));
    }
}
