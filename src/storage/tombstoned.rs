//! Tombstoned layout: append-only tagged records
//!
//! ```text
//! data region: | tag | record | tag | record | ... |
//! tag:         0x00 alive, 0xFF dead
//! ```
//!
//! Deleting writes the dead tag in place; nothing is reclaimed. The header
//! counts every stored pair, dead or alive, so a crash after an append but
//! before the header is flushed leaves the unaccounted bytes beyond the
//! region that is read back, and the next append overwrites them.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;

use super::layout::{invalid_data, Layout, LayoutKind};
use crate::codec::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crate::record::{read_record, write_record, Record};

const ALIVE: u8 = 0x00;
const DEAD: u8 = 0xFF;

/// Tombstoned header fields: `{stored_records i64}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct TombstonedFields {
    pub stored_records: i64,
}

impl TombstonedFields {
    pub const LEN: usize = 8;

    pub fn read(reader: &mut dyn Read) -> io::Result<Self> {
        Ok(Self {
            stored_records: reader.read_i64::<LittleEndian>()?,
        })
    }

    pub fn write(&self, writer: &mut dyn Write) -> io::Result<()> {
        writer.write_i64::<LittleEndian>(self.stored_records)
    }
}

/// Append-only layout for variable-size records.
pub struct TombstonedLayout<R> {
    fields: TombstonedFields,
    /// Byte offset of each live record's tag, in logical order.
    positions: Vec<u64>,
    data_offset: u64,
    append_at: u64,
    /// Offset of the physically last stored pair.
    last_stored: Option<u64>,
    buf: Vec<u8>,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> TombstonedLayout<R> {
    /// Pairs stored in the data region, dead ones included.
    pub fn stored_records(&self) -> u64 {
        self.fields.stored_records as u64
    }

    /// Where the next pair is appended.
    pub fn append_offset(&self) -> u64 {
        self.append_at
    }

    fn encode(&mut self, record: &R) -> io::Result<()> {
        self.buf.clear();
        self.buf.push(ALIVE);
        write_record(&mut self.buf, record)
    }

    fn append(&mut self, file: &mut File) -> io::Result<u64> {
        let offset = self.append_at;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&self.buf)?;

        self.last_stored = Some(offset);
        self.append_at = offset + self.buf.len() as u64;
        self.fields.stored_records += 1;
        Ok(offset)
    }

    fn mark_dead(file: &mut File, offset: u64) -> io::Result<()> {
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&[DEAD])
    }
}

impl<R: Record> Layout<R> for TombstonedLayout<R> {
    const KIND: LayoutKind = LayoutKind::Tombstoned;
    const HEADER_FIELDS_LEN: usize = TombstonedFields::LEN;

    fn empty() -> Self {
        Self {
            fields: TombstonedFields::default(),
            positions: Vec::new(),
            data_offset: 0,
            append_at: 0,
            last_stored: None,
            buf: Vec::new(),
            _record: PhantomData,
        }
    }

    fn read_header_fields(&mut self, reader: &mut dyn Read) -> io::Result<()> {
        let fields = TombstonedFields::read(reader)?;
        if fields.stored_records < 0 {
            return Err(invalid_data(format!(
                "negative stored record count {}",
                fields.stored_records
            )));
        }
        self.fields = fields;
        Ok(())
    }

    fn write_header_fields(&self, writer: &mut dyn Write) -> io::Result<()> {
        self.fields.write(writer)
    }

    fn reset(&mut self, data_offset: u64) {
        self.fields = TombstonedFields::default();
        self.positions.clear();
        self.data_offset = data_offset;
        self.append_at = data_offset;
        self.last_stored = None;
    }

    fn load(&mut self, file: &mut File, data_offset: u64) -> io::Result<()> {
        self.data_offset = data_offset;
        self.positions.clear();
        self.last_stored = None;

        let mut reader = BufReader::new(&mut *file);
        reader.seek(SeekFrom::Start(data_offset))?;

        let mut offset = data_offset;
        for _ in 0..self.stored_records() {
            let tag = reader.read_u8()?;
            if tag != ALIVE && tag != DEAD {
                return Err(invalid_data(format!(
                    "invalid tag {:#04x} at byte offset {}",
                    tag, offset
                )));
            }
            // dead records are decoded too: their length is only known that way
            read_record::<R>(&mut reader)?;

            if tag == ALIVE {
                self.positions.push(offset);
            }
            self.last_stored = Some(offset);
            offset = reader.stream_position()?;
        }

        self.append_at = offset;
        Ok(())
    }

    fn count(&self) -> usize {
        self.positions.len()
    }

    fn get(&mut self, file: &mut File, position: usize) -> io::Result<R> {
        file.seek(SeekFrom::Start(self.positions[position] + 1))?;
        let mut reader = BufReader::with_capacity(256, &mut *file);
        read_record(&mut reader)
    }

    fn insert(&mut self, file: &mut File, record: &R) -> io::Result<usize> {
        self.encode(record)?;
        let offset = self.append(file)?;
        self.positions.push(offset);
        Ok(self.positions.len() - 1)
    }

    fn replace(&mut self, file: &mut File, position: usize, record: &R) -> io::Result<usize> {
        self.encode(record)?;
        let offset = self.positions[position];

        // In place only when nothing, dead or alive, follows the record.
        if position + 1 == self.positions.len() && self.last_stored == Some(offset) {
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&self.buf)?;
            self.append_at = offset + self.buf.len() as u64;
            return Ok(position);
        }

        let moved_to = self.append(file)?;
        Self::mark_dead(file, offset)?;
        self.positions.remove(position);
        self.positions.push(moved_to);
        Ok(self.positions.len() - 1)
    }

    fn delete(&mut self, file: &mut File, position: usize) -> io::Result<()> {
        Self::mark_dead(file, self.positions[position])?;
        self.positions.remove(position);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::testing::Note;

    const DATA_OFFSET: u64 = 55;

    fn layout() -> (File, TombstonedLayout<Note>) {
        let file = tempfile::tempfile().unwrap();
        let mut layout = TombstonedLayout::<Note>::empty();
        layout.reset(DATA_OFFSET);
        (file, layout)
    }

    fn reload(file: &mut File, layout: &TombstonedLayout<Note>) -> TombstonedLayout<Note> {
        let mut header = Vec::new();
        layout.write_header_fields(&mut header).unwrap();
        let mut reloaded = TombstonedLayout::<Note>::empty();
        reloaded.read_header_fields(&mut header.as_slice()).unwrap();
        reloaded.load(file, DATA_OFFSET).unwrap();
        reloaded
    }

    fn texts(file: &mut File, layout: &mut TombstonedLayout<Note>) -> Vec<String> {
        (0..layout.count()).map(|p| layout.get(file, p).unwrap().text).collect()
    }

    #[test]
    fn test_delete_keeps_bytes() {
        let (mut file, mut layout) = layout();
        layout.insert(&mut file, &Note::new(1, "one")).unwrap();
        layout.insert(&mut file, &Note::new(2, "two")).unwrap();
        let end = layout.append_offset();

        layout.delete(&mut file, 0).unwrap();
        assert_eq!(layout.count(), 1);
        assert_eq!(layout.stored_records(), 2);
        assert_eq!(layout.append_offset(), end);

        let mut reloaded = reload(&mut file, &layout);
        assert_eq!(texts(&mut file, &mut reloaded), vec!["two"]);
    }

    #[test]
    fn test_replace_last_in_place() {
        let (mut file, mut layout) = layout();
        layout.insert(&mut file, &Note::new(1, "one")).unwrap();
        layout.insert(&mut file, &Note::new(2, "two")).unwrap();

        assert_eq!(layout.replace(&mut file, 1, &Note::new(2, "a much longer two")).unwrap(), 1);
        assert_eq!(layout.stored_records(), 2);

        let mut reloaded = reload(&mut file, &layout);
        assert_eq!(texts(&mut file, &mut reloaded), vec!["one", "a much longer two"]);
        assert_eq!(reloaded.append_offset(), layout.append_offset());
    }

    #[test]
    fn test_replace_middle_moves_to_end() {
        let (mut file, mut layout) = layout();
        for (id, text) in [(1, "a"), (2, "b"), (3, "c")] {
            layout.insert(&mut file, &Note::new(id, text)).unwrap();
        }

        assert_eq!(layout.replace(&mut file, 0, &Note::new(1, "A")).unwrap(), 2);
        assert_eq!(texts(&mut file, &mut layout), vec!["b", "c", "A"]);
        assert_eq!(layout.stored_records(), 4);

        let mut reloaded = reload(&mut file, &layout);
        assert_eq!(texts(&mut file, &mut reloaded), vec!["b", "c", "A"]);
    }

    #[test]
    fn test_replace_last_live_before_dead_appends() {
        let (mut file, mut layout) = layout();
        layout.insert(&mut file, &Note::new(1, "a")).unwrap();
        layout.insert(&mut file, &Note::new(2, "b")).unwrap();
        layout.delete(&mut file, 1).unwrap();

        // the dead pair after "a" must survive the rewrite
        assert_eq!(layout.replace(&mut file, 0, &Note::new(1, "longer than before")).unwrap(), 0);
        assert_eq!(layout.stored_records(), 3);

        let mut reloaded = reload(&mut file, &layout);
        assert_eq!(texts(&mut file, &mut reloaded), vec!["longer than before"]);
    }

    #[test]
    fn test_bad_tag_is_invalid_data() {
        let (mut file, mut layout) = layout();
        layout.insert(&mut file, &Note::new(1, "a")).unwrap();
        file.seek(SeekFrom::Start(DATA_OFFSET)).unwrap();
        file.write_all(&[0x42]).unwrap();

        let mut header = Vec::new();
        layout.write_header_fields(&mut header).unwrap();
        let mut reloaded = TombstonedLayout::<Note>::empty();
        reloaded.read_header_fields(&mut header.as_slice()).unwrap();

        let err = reloaded.load(&mut file, DATA_OFFSET).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("byte offset 55"));
    }

    #[test]
    fn test_truncated_record_is_eof() {
        let (mut file, mut layout) = layout();
        layout.insert(&mut file, &Note::new(1, "abcdef")).unwrap();
        file.set_len(DATA_OFFSET + 6).unwrap();

        let mut header = Vec::new();
        layout.write_header_fields(&mut header).unwrap();
        let mut reloaded = TombstonedLayout::<Note>::empty();
        reloaded.read_header_fields(&mut header.as_slice()).unwrap();

        let err = reloaded.load(&mut file, DATA_OFFSET).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
