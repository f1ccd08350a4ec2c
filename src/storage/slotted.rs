//! Slotted layout: fixed-size frames with an in-file free list
//!
//! ```text
//! data region: | frame 0 | frame 1 | frame 2 | ... | frame slots_count-1 |
//! live frame:  | encoded record (R::ENCODED_SIZE) | zero padding |
//! free frame:  | next free frame (i64 LE, -1 ends the list) | stale bytes |
//! ```
//!
//! Frame size is `max(R::ENCODED_SIZE, 8)` so a free frame can hold its
//! link. Deleted frames are reused, most recently freed first. The set of
//! free frames is rebuilt on open by walking the list from the header's
//! head, and maps dense positions to frames through an excluded
//! [`PositionSet`].

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;

use super::layout::{invalid_data, Layout, LayoutKind};
use crate::codec::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crate::position::{PositionSet, SetMode};
use crate::record::{read_record, write_record, FixedSizeRecord};

const END_OF_LIST: i64 = -1;

/// Slotted header fields: `{slots_count i32, free_head i32}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlottedFields {
    pub slots_count: i32,
    pub free_head: i32,
}

impl Default for SlottedFields {
    fn default() -> Self {
        Self {
            slots_count: 0,
            free_head: END_OF_LIST as i32,
        }
    }
}

impl SlottedFields {
    pub const LEN: usize = 8;

    pub fn read(reader: &mut dyn Read) -> io::Result<Self> {
        Ok(Self {
            slots_count: reader.read_i32::<LittleEndian>()?,
            free_head: reader.read_i32::<LittleEndian>()?,
        })
    }

    pub fn write(&self, writer: &mut dyn Write) -> io::Result<()> {
        writer.write_i32::<LittleEndian>(self.slots_count)?;
        writer.write_i32::<LittleEndian>(self.free_head)
    }
}

/// Fixed-frame layout with free-list reuse.
pub struct SlottedLayout<R> {
    fields: SlottedFields,
    /// Free frames, sorted.
    free: PositionSet,
    data_offset: u64,
    frame: Vec<u8>,
    _record: PhantomData<fn() -> R>,
}

impl<R: FixedSizeRecord> SlottedLayout<R> {
    pub const FRAME_SIZE: usize = if R::ENCODED_SIZE > 8 { R::ENCODED_SIZE } else { 8 };

    /// Total frames, live and free.
    pub fn slots(&self) -> usize {
        self.fields.slots_count as usize
    }

    /// Free frames, ascending.
    pub fn free_frames(&self) -> &[usize] {
        self.free.as_slice()
    }

    fn frame_offset(&self, frame: usize) -> u64 {
        self.data_offset + (frame * Self::FRAME_SIZE) as u64
    }

    fn read_link(&self, file: &mut File, frame: usize) -> io::Result<i64> {
        file.seek(SeekFrom::Start(self.frame_offset(frame)))?;
        file.read_i64::<LittleEndian>()
    }

    /// Encodes `record` into the frame buffer, padded to the frame size.
    fn encode(&mut self, record: &R) -> io::Result<()> {
        self.frame.clear();
        write_record(&mut self.frame, record)?;
        if self.frame.len() != R::ENCODED_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "record {} encodes to {} bytes, frame holds {}",
                    record.id(),
                    self.frame.len(),
                    R::ENCODED_SIZE
                ),
            ));
        }
        self.frame.resize(Self::FRAME_SIZE, 0);
        Ok(())
    }

    fn write_frame(&self, file: &mut File, frame: usize) -> io::Result<()> {
        file.seek(SeekFrom::Start(self.frame_offset(frame)))?;
        file.write_all(&self.frame)
    }

    fn head_frame(&self) -> io::Result<usize> {
        usize::try_from(self.fields.free_head)
            .map_err(|_| invalid_data(format!("free-list head {} is not a frame", self.fields.free_head)))
    }
}

impl<R: FixedSizeRecord> Layout<R> for SlottedLayout<R> {
    const KIND: LayoutKind = LayoutKind::Slotted;
    const HEADER_FIELDS_LEN: usize = SlottedFields::LEN;

    fn empty() -> Self {
        Self {
            fields: SlottedFields::default(),
            free: PositionSet::new(SetMode::Excluded),
            data_offset: 0,
            frame: Vec::with_capacity(Self::FRAME_SIZE),
            _record: PhantomData,
        }
    }

    fn read_header_fields(&mut self, reader: &mut dyn Read) -> io::Result<()> {
        let fields = SlottedFields::read(reader)?;
        if fields.slots_count < 0 {
            return Err(invalid_data(format!("negative slot count {}", fields.slots_count)));
        }
        self.fields = fields;
        Ok(())
    }

    fn write_header_fields(&self, writer: &mut dyn Write) -> io::Result<()> {
        self.fields.write(writer)
    }

    fn reset(&mut self, data_offset: u64) {
        self.fields = SlottedFields::default();
        self.free.clear();
        self.data_offset = data_offset;
    }

    fn load(&mut self, file: &mut File, data_offset: u64) -> io::Result<()> {
        self.data_offset = data_offset;
        let slots = self.slots();

        let expected = self.frame_offset(slots);
        let actual = file.metadata()?.len();
        if actual < expected {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("data region truncated: file has {} bytes, {} frames need {}", actual, slots, expected),
            ));
        }

        // Every frame is visited at most once; one hop more means a cycle.
        let mut free = Vec::new();
        let mut link = i64::from(self.fields.free_head);
        while link != END_OF_LIST {
            let frame = usize::try_from(link)
                .ok()
                .filter(|f| *f < slots)
                .ok_or_else(|| invalid_data(format!("free-list link {} out of range ({} slots)", link, slots)))?;
            if free.len() == slots {
                return Err(invalid_data(format!("free-list cycle through frame {}", frame)));
            }
            free.push(frame);
            link = self.read_link(file, frame)?;
        }

        self.free = PositionSet::from_unsorted(SetMode::Excluded, free);
        Ok(())
    }

    fn count(&self) -> usize {
        self.slots() - self.free.len()
    }

    fn get(&mut self, file: &mut File, position: usize) -> io::Result<R> {
        let frame = self.free.to_source(position);
        file.seek(SeekFrom::Start(self.frame_offset(frame)))?;

        self.frame.resize(Self::FRAME_SIZE, 0);
        file.read_exact(&mut self.frame)?;
        read_record(&mut &self.frame[..R::ENCODED_SIZE])
    }

    fn insert(&mut self, file: &mut File, record: &R) -> io::Result<usize> {
        self.encode(record)?;

        let frame = if self.free.is_empty() {
            let frame = self.slots();
            let slots_count = self.fields.slots_count.checked_add(1).ok_or_else(|| {
                io::Error::new(io::ErrorKind::Other, "slotted table is full")
            })?;
            self.write_frame(file, frame)?;
            self.fields.slots_count = slots_count;
            frame
        } else {
            let frame = self.head_frame()?;
            let next = if self.free.len() > 1 {
                self.read_link(file, frame)?
            } else {
                END_OF_LIST
            };
            self.write_frame(file, frame)?;
            assert!(self.free.remove(frame), "free-list head {} is not a free frame", frame);
            self.fields.free_head = next as i32;
            frame
        };

        Ok(self.free.to_view(frame))
    }

    fn replace(&mut self, file: &mut File, position: usize, record: &R) -> io::Result<usize> {
        self.encode(record)?;
        let frame = self.free.to_source(position);
        self.write_frame(file, frame)?;
        Ok(self.free.to_view(frame))
    }

    fn delete(&mut self, file: &mut File, position: usize) -> io::Result<()> {
        let frame = self.free.to_source(position);
        file.seek(SeekFrom::Start(self.frame_offset(frame)))?;
        file.write_i64::<LittleEndian>(i64::from(self.fields.free_head))?;

        assert!(self.free.insert(frame), "frame {} is already free", frame);
        self.fields.free_head = frame as i32;
        Ok(())
    }
}
