//! Shared records and helpers for the integration tests

#![allow(dead_code)]

use std::io::{self, Read, Write};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tabledb::codec;
use tabledb::provider::{RecordAccess, RecordSource, TableProvider};
use tabledb::record::{FixedSizeRecord, Record, RecordId};
use tabledb::storage::{SlottedTable, TombstonedTable};
use tempfile::TempDir;

/// Fixed-size record: id + quantity + 12-byte sku = 20 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub id: RecordId,
    pub quantity: i32,
    pub sku: String,
}

impl Part {
    pub fn new(id: RecordId, quantity: i32, sku: &str) -> Self {
        Self {
            id,
            quantity,
            sku: sku.to_string(),
        }
    }
}

impl Record for Part {
    fn id(&self) -> RecordId {
        self.id
    }

    fn encode_body(&self, writer: &mut dyn Write) -> io::Result<()> {
        writer.write_i32::<LittleEndian>(self.quantity)?;
        codec::write_fixed_str(writer, &self.sku, 12)
    }

    fn decode_body(id: RecordId, reader: &mut dyn Read) -> io::Result<Self> {
        let quantity = reader.read_i32::<LittleEndian>()?;
        let sku = codec::read_fixed_str(reader, 12)?;
        Ok(Self { id, quantity, sku })
    }
}

impl FixedSizeRecord for Part {
    const ENCODED_SIZE: usize = 20;
}

/// Variable-size record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Memo {
    pub id: RecordId,
    pub body: String,
}

impl Memo {
    pub fn new(id: RecordId, body: &str) -> Self {
        Self {
            id,
            body: body.to_string(),
        }
    }
}

impl Record for Memo {
    fn id(&self) -> RecordId {
        self.id
    }

    fn encode_body(&self, writer: &mut dyn Write) -> io::Result<()> {
        codec::write_string(writer, &self.body)
    }

    fn decode_body(id: RecordId, reader: &mut dyn Read) -> io::Result<Self> {
        Ok(Self {
            id,
            body: codec::read_string(reader)?,
        })
    }
}

pub fn create_temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp dir")
}

/// Connected provider over a fresh slotted table.
pub fn slotted_provider(temp: &TempDir, name: &str) -> Arc<TableProvider<Part>> {
    let table = SlottedTable::<Part>::open_or_create(1, temp.path().join(name));
    let provider = Arc::new(TableProvider::new(Arc::new(table)));
    provider.connect().expect("connect slotted provider");
    provider
}

/// Connected provider over a fresh tombstoned table.
pub fn tombstoned_provider(temp: &TempDir, name: &str) -> Arc<TableProvider<Memo>> {
    let table = TombstonedTable::<Memo>::open_or_create(2, temp.path().join(name));
    let provider = Arc::new(TableProvider::new(Arc::new(table)));
    provider.connect().expect("connect tombstoned provider");
    provider
}

/// Every record of a source, in position order.
pub fn all_records<R: Record>(source: &dyn RecordSource<R>) -> Vec<R> {
    (0..source.count())
        .map(|p| source.get(p).expect("read record"))
        .collect()
}

pub fn ids<R: Record>(source: &dyn RecordSource<R>) -> Vec<RecordId> {
    all_records(source).iter().map(|r| r.id()).collect()
}
