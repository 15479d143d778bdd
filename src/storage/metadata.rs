//! Versioned headers persisted next to the pages.

use crate::{
    error::{ErrorKind, LineageError},
    types::{LineageResult, Rid, Tid},
    utils::{Decodeable, Encodeable, LineageReader, LineageWriter},
};

const TABLE_MAGIC: u32 = 0x4c54_424c;
const RANGE_MAGIC: u32 = 0x4c52_4e47;
const FORMAT_VERSION: u16 = 1;

fn check_preamble(reader: &mut LineageReader, magic: u32, what: &str) -> LineageResult {
    let found_magic: u32 = reader.read()?;
    let version: u16 = reader.read()?;
    if found_magic != magic || version != FORMAT_VERSION {
        return Err(LineageError::new(
            ErrorKind::CorruptMetadata,
            &format!(
                "bad {} header, magic {:#x}, version {}",
                what, found_magic, version
            ),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableHeader {
    pub num_columns: usize,
    pub key_column: usize,

    /// The next RID to assign, RIDs below it have been handed out.
    pub next_rid: Rid,

    pub num_ranges: usize,

    /// Columns with a secondary index, besides the key column.
    pub indexed_columns: Vec<usize>,
}

impl Encodeable for TableHeader {
    fn encode(&self, writer: &mut LineageWriter) {
        writer.write(&TABLE_MAGIC);
        writer.write(&FORMAT_VERSION);
        writer.write(&(self.num_columns as u32));
        writer.write(&(self.key_column as u32));
        writer.write(&self.next_rid);
        writer.write(&(self.num_ranges as u64));
        writer.write(&(self.indexed_columns.len() as u32));
        for column in &self.indexed_columns {
            writer.write(&(*column as u32));
        }
    }
}

impl Decodeable for TableHeader {
    fn decode_from(reader: &mut LineageReader) -> LineageResult<Self> {
        check_preamble(reader, TABLE_MAGIC, "table")?;

        let num_columns = reader.read::<u32>()? as usize;
        let key_column = reader.read::<u32>()? as usize;
        let next_rid: u64 = reader.read()?;
        let num_ranges = reader.read::<u64>()? as usize;
        let indexed_count: u32 = reader.read()?;
        let mut indexed_columns = Vec::new();
        for _ in 0..indexed_count {
            indexed_columns.push(reader.read::<u32>()? as usize);
        }

        if key_column >= num_columns || next_rid == 0 {
            return Err(LineageError::new(
                ErrorKind::CorruptMetadata,
                &format!(
                    "table header out of bounds, key {} of {} columns, next rid {}",
                    key_column, num_columns, next_rid
                ),
            ));
        }

        Ok(Self {
            num_columns,
            key_column,
            next_rid,
            num_ranges,
            indexed_columns,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RangeHeader {
    pub latest_tid: Tid,
    pub merge_watermark: Tid,
    pub base_pages: usize,
    pub tail_pages: usize,
}

impl Encodeable for RangeHeader {
    fn encode(&self, writer: &mut LineageWriter) {
        writer.write(&RANGE_MAGIC);
        writer.write(&FORMAT_VERSION);
        writer.write(&self.latest_tid);
        writer.write(&self.merge_watermark);
        writer.write(&(self.base_pages as u32));
        writer.write(&(self.tail_pages as u64));
    }
}

impl Decodeable for RangeHeader {
    fn decode_from(reader: &mut LineageReader) -> LineageResult<Self> {
        check_preamble(reader, RANGE_MAGIC, "page range")?;

        let header = Self {
            latest_tid: reader.read()?,
            merge_watermark: reader.read()?,
            base_pages: reader.read::<u32>()? as usize,
            tail_pages: reader.read::<u64>()? as usize,
        };

        if header.merge_watermark > header.latest_tid {
            return Err(LineageError::new(
                ErrorKind::CorruptMetadata,
                &format!(
                    "merge watermark {} is ahead of latest tid {}",
                    header.merge_watermark, header.latest_tid
                ),
            ));
        }
        Ok(header)
    }
}
