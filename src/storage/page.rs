use std::fmt;

use crate::{
    config::{ENTRY_SIZE, METADATA_COLUMNS, PAGE_SIZE},
    error::{ErrorKind, LineageError},
    storage::{addressing::slot_index, page_id::PageKind, physical_page::PhysicalPage},
    types::{LineageResult, Rid, Tid},
    utils::{Encodeable, LineageReader, LineageWriter},
};

pub const INDIRECTION_COLUMN: usize = 0;

/// RID for base pages, TID for tail pages.
pub const ID_COLUMN: usize = 1;

pub const SCHEMA_ENCODING_COLUMN: usize = 2;

/// Written into the RID column of a deleted base record.
pub const TOMBSTONE_RID: i64 = 0;

const PAGE_MAGIC: u32 = 0x4c50_4147;
const PAGE_FORMAT_VERSION: u16 = 1;

/// magic, version, kind, entry size, column count, slot count
pub const PAGE_HEADER_SIZE: usize = 4 + 2 + 1 + 2 + 2 + 4;

/// Where a record's newest version lives.
///
/// Physically stored in one entry: a base reference as the positive
/// RID, a tail reference as the negated TID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Indirection {
    Base(Rid),
    Tail(Tid),
}

impl Indirection {
    pub fn to_entry(&self) -> i64 {
        match self {
            Indirection::Base(rid) => *rid as i64,
            Indirection::Tail(tid) => -(*tid as i64),
        }
    }

    pub fn from_entry(entry: i64) -> LineageResult<Self> {
        if entry > 0 {
            Ok(Indirection::Base(entry as Rid))
        } else if entry < 0 {
            Ok(Indirection::Tail(entry.unsigned_abs() as Tid))
        } else {
            Err(LineageError::new(
                ErrorKind::CorruptMetadata,
                "indirection points nowhere",
            ))
        }
    }
}

impl fmt::Display for Indirection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Indirection::Base(rid) => write!(f, "base_{}", rid),
            Indirection::Tail(tid) => write!(f, "tail_{}", tid),
        }
    }
}

/// One page of records: three metadata columns followed by one column
/// per data column, each backed by a physical page.
///
/// Base and tail pages share the layout, `kind` only tells what the id
/// column holds.
#[derive(Clone)]
pub struct Page {
    kind: PageKind,
    columns: Vec<PhysicalPage>,
}

impl Page {
    pub fn new(kind: PageKind, num_columns: usize) -> Self {
        Self {
            kind,
            columns: vec![PhysicalPage::new(); METADATA_COLUMNS + num_columns],
        }
    }

    pub fn kind(&self) -> PageKind {
        self.kind
    }

    /// Number of data columns.
    pub fn num_columns(&self) -> usize {
        self.columns.len() - METADATA_COLUMNS
    }

    pub fn num_records(&self) -> usize {
        self.columns[ID_COLUMN].num_records()
    }

    pub fn has_capacity(&self) -> bool {
        self.columns[ID_COLUMN].has_capacity()
    }

    /// Write a whole record into the slot of `id`.
    ///
    /// For a new base record the indirection points to the record
    /// itself and the schema encoding is zero, whatever is passed in.
    ///
    /// Nothing is written when the record doesn't fit.
    pub fn insert(
        &mut self,
        id: u64,
        columns: &[i64],
        indirection: Indirection,
        schema_encoding: u64,
        is_new_base: bool,
    ) -> LineageResult {
        if columns.len() != self.num_columns() {
            return Err(LineageError::new(
                ErrorKind::InvalidArgument,
                &format!(
                    "expect {} columns, got {}",
                    self.num_columns(),
                    columns.len()
                ),
            ));
        }

        let slot = slot_index(id);
        if slot >= PhysicalPage::capacity() {
            return Err(LineageError::new(
                ErrorKind::CapacityExceeded,
                &format!("no room for record {}", id),
            ));
        }

        let (indirection, schema_encoding) = if is_new_base {
            (Indirection::Base(id), 0)
        } else {
            (indirection, schema_encoding)
        };

        self.columns[INDIRECTION_COLUMN].write(slot, indirection.to_entry())?;
        self.columns[ID_COLUMN].write(slot, id as i64)?;
        self.columns[SCHEMA_ENCODING_COLUMN].write(slot, schema_encoding as i64)?;
        for (i, value) in columns.iter().enumerate() {
            self.columns[METADATA_COLUMNS + i].write(slot, *value)?;
        }
        Ok(())
    }

    pub fn get_indirection(&self, id: u64) -> LineageResult<Indirection> {
        let entry = self.columns[INDIRECTION_COLUMN].read(slot_index(id))?;
        Indirection::from_entry(entry)
    }

    pub fn set_indirection(&mut self, id: u64, indirection: Indirection) -> LineageResult {
        self.columns[INDIRECTION_COLUMN].write(slot_index(id), indirection.to_entry())
    }

    pub fn get_schema_encoding(&self, id: u64) -> LineageResult<u64> {
        let entry = self.columns[SCHEMA_ENCODING_COLUMN].read(slot_index(id))?;
        Ok(entry as u64)
    }

    pub fn set_schema_encoding(&mut self, id: u64, mask: u64) -> LineageResult {
        self.columns[SCHEMA_ENCODING_COLUMN].write(slot_index(id), mask as i64)
    }

    /// Write the schema encoding and the indirection of a base slot
    /// together. Callers hold the page's write latch, so readers see
    /// either both old values or both new ones.
    pub fn set_base_pointer(
        &mut self,
        rid: Rid,
        schema_encoding: u64,
        indirection: Indirection,
    ) -> LineageResult {
        let slot = slot_index(rid);
        // validate before writing anything
        self.columns[INDIRECTION_COLUMN].read(slot)?;

        self.columns[SCHEMA_ENCODING_COLUMN].write(slot, schema_encoding as i64)?;
        self.columns[INDIRECTION_COLUMN].write(slot, indirection.to_entry())
    }

    /// Raw content of the id column, `TOMBSTONE_RID` for deleted base
    /// records.
    pub fn get_id(&self, id: u64) -> LineageResult<i64> {
        self.columns[ID_COLUMN].read(slot_index(id))
    }

    pub fn set_id(&mut self, id: u64, value: i64) -> LineageResult {
        self.columns[ID_COLUMN].write(slot_index(id), value)
    }

    pub fn read_column(&self, id: u64, column: usize) -> LineageResult<i64> {
        self.check_column(column)?;
        self.columns[METADATA_COLUMNS + column].read(slot_index(id))
    }

    /// Overwrite one data column of an existing slot.
    pub fn write_column(&mut self, id: u64, column: usize, value: i64) -> LineageResult {
        self.check_column(column)?;
        let slot = slot_index(id);
        // update mode, the slot must exist already
        self.columns[ID_COLUMN].read(slot)?;
        self.columns[METADATA_COLUMNS + column].write(slot, value)
    }

    pub fn read_columns(&self, id: u64) -> LineageResult<Vec<i64>> {
        let slot = slot_index(id);
        self.columns[METADATA_COLUMNS..]
            .iter()
            .map(|c| c.read(slot))
            .collect()
    }

    fn check_column(&self, column: usize) -> LineageResult {
        if column >= self.num_columns() {
            return Err(LineageError::new(
                ErrorKind::InvalidArgument,
                &format!("column {} out of {} columns", column, self.num_columns()),
            ));
        }
        Ok(())
    }

    pub fn from_bytes(bytes: &[u8]) -> LineageResult<Self> {
        let mut reader = LineageReader::new(bytes);

        let magic: u32 = reader.read()?;
        let version: u16 = reader.read()?;
        if magic != PAGE_MAGIC || version != PAGE_FORMAT_VERSION {
            return Err(LineageError::new(
                ErrorKind::CorruptMetadata,
                &format!("bad page header, magic {:#x}, version {}", magic, version),
            ));
        }

        let kind = PageKind::from_u8(reader.read()?)?;
        let entry_size: u16 = reader.read()?;
        if entry_size as usize != ENTRY_SIZE {
            return Err(LineageError::new(
                ErrorKind::CorruptMetadata,
                &format!("unsupported entry size {}", entry_size),
            ));
        }
        let num_columns: u16 = reader.read()?;
        let num_records: u32 = reader.read()?;

        let mut columns = Vec::with_capacity(METADATA_COLUMNS + num_columns as usize);
        for _ in 0..METADATA_COLUMNS + num_columns as usize {
            let data = reader.read_exact(PAGE_SIZE)?;
            columns.push(PhysicalPage::from_bytes(data, num_records as usize)?);
        }

        Ok(Self { kind, columns })
    }
}

impl Encodeable for Page {
    fn encode(&self, writer: &mut LineageWriter) {
        writer.write(&PAGE_MAGIC);
        writer.write(&PAGE_FORMAT_VERSION);
        writer.write(&self.kind.to_u8());
        writer.write(&(ENTRY_SIZE as u16));
        writer.write(&(self.num_columns() as u16));
        writer.write(&(self.num_records() as u32));
        for column in &self.columns {
            writer.write_bytes(column.as_bytes());
        }
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<Page {:?}, columns: {}, records: {}>",
            self.kind,
            self.num_columns(),
            self.num_records()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_base_record_points_to_itself() {
        let mut page = Page::new(PageKind::Base, 3);
        page.insert(1, &[10, 20, 30], Indirection::Tail(9), 0b111, true)
            .unwrap();

        assert_eq!(page.get_indirection(1).unwrap(), Indirection::Base(1));
        assert_eq!(page.get_schema_encoding(1).unwrap(), 0);
        assert_eq!(page.get_id(1).unwrap(), 1);
        assert_eq!(page.read_columns(1).unwrap(), vec![10, 20, 30]);
        assert_eq!(page.num_records(), 1);
    }

    #[test]
    fn test_base_pointer_and_columns() {
        let mut page = Page::new(PageKind::Base, 2);
        page.insert(1, &[1, 2], Indirection::Base(1), 0, true).unwrap();

        page.set_base_pointer(1, 0b10, Indirection::Tail(4)).unwrap();
        assert_eq!(page.get_schema_encoding(1).unwrap(), 0b10);
        assert_eq!(page.get_indirection(1).unwrap(), Indirection::Tail(4));

        page.write_column(1, 1, 99).unwrap();
        assert_eq!(page.read_column(1, 1).unwrap(), 99);
        assert_eq!(page.num_records(), 1);

        assert_eq!(
            page.write_column(2, 0, 1).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            page.read_column(1, 2).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
    }

    #[test]
    fn test_insert_rejects_wrong_arity() {
        let mut page = Page::new(PageKind::Tail, 2);
        let err = page
            .insert(1, &[1], Indirection::Base(1), 0, false)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(page.num_records(), 0);
    }

    #[test]
    fn test_indirection_entry() {
        assert_eq!(Indirection::Base(5).to_entry(), 5);
        assert_eq!(Indirection::Tail(5).to_entry(), -5);
        assert_eq!(Indirection::from_entry(-5).unwrap(), Indirection::Tail(5));
        assert_eq!(
            Indirection::from_entry(0).unwrap_err().kind(),
            ErrorKind::CorruptMetadata
        );
    }

    #[test]
    fn test_bytes() {
        let mut page = Page::new(PageKind::Tail, 2);
        page.insert(1, &[7, 8], Indirection::Base(3), 0b01, false)
            .unwrap();
        page.insert(2, &[9, 10], Indirection::Tail(1), 0b11, false)
            .unwrap();

        let bytes = page.to_bytes();
        assert_eq!(bytes.len(), PAGE_HEADER_SIZE + 5 * PAGE_SIZE);

        let decoded = Page::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.kind(), PageKind::Tail);
        assert_eq!(decoded.num_records(), 2);
        assert_eq!(decoded.get_indirection(2).unwrap(), Indirection::Tail(1));
        assert_eq!(decoded.read_columns(2).unwrap(), vec![9, 10]);

        let mut corrupted = bytes.clone();
        corrupted[0] ^= 0xff;
        assert_eq!(
            Page::from_bytes(&corrupted).unwrap_err().kind(),
            ErrorKind::CorruptMetadata
        );
    }
}
