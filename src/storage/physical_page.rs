use crate::{
    config::{ENTRY_SIZE, PAGE_SIZE},
    error::{ErrorKind, LineageError},
    types::LineageResult,
};

/// A fixed-size buffer of fixed-width entries, backing one column of
/// one page.
///
/// Slot `i` lives at bytes `[i * ENTRY_SIZE, (i + 1) * ENTRY_SIZE)` as a
/// big-endian i64.
#[derive(Clone)]
pub struct PhysicalPage {
    data: Vec<u8>,

    /// Number of slots written so far. Slots are written in order, so
    /// this is also the index of the next new slot.
    num_records: usize,
}

impl PhysicalPage {
    pub fn new() -> Self {
        Self {
            data: vec![0; PAGE_SIZE],
            num_records: 0,
        }
    }

    pub fn from_bytes(bytes: &[u8], num_records: usize) -> LineageResult<Self> {
        if bytes.len() != PAGE_SIZE || num_records > Self::capacity() {
            return Err(LineageError::new(
                ErrorKind::CorruptMetadata,
                &format!(
                    "bad physical page, {} bytes with {} records",
                    bytes.len(),
                    num_records
                ),
            ));
        }

        Ok(Self {
            data: bytes.to_vec(),
            num_records,
        })
    }

    pub fn capacity() -> usize {
        PAGE_SIZE / ENTRY_SIZE
    }

    pub fn num_records(&self) -> usize {
        self.num_records
    }

    pub fn has_capacity(&self) -> bool {
        self.num_records < Self::capacity()
    }

    /// Write `value` into `slot`. Overwriting an existing slot never
    /// counts against the capacity, writing past the last slot extends
    /// the page.
    pub fn write(&mut self, slot: usize, value: i64) -> LineageResult {
        if slot >= Self::capacity() {
            return Err(LineageError::new(
                ErrorKind::CapacityExceeded,
                &format!("slot {} is out of a {}-slot page", slot, Self::capacity()),
            ));
        }

        let offset = slot * ENTRY_SIZE;
        self.data[offset..offset + ENTRY_SIZE].copy_from_slice(&value.to_be_bytes());

        if slot >= self.num_records {
            self.num_records = slot + 1;
        }
        Ok(())
    }

    /// Write `value` into the next new slot and return the slot.
    pub fn append(&mut self, value: i64) -> LineageResult<usize> {
        let slot = self.num_records;
        self.write(slot, value)?;
        Ok(slot)
    }

    pub fn read(&self, slot: usize) -> LineageResult<i64> {
        if slot >= self.num_records {
            return Err(LineageError::new(
                ErrorKind::InvalidArgument,
                &format!(
                    "read unwritten slot {}, page has {} records",
                    slot, self.num_records
                ),
            ));
        }

        let offset = slot * ENTRY_SIZE;
        let mut buf = [0u8; ENTRY_SIZE];
        buf.copy_from_slice(&self.data[offset..offset + ENTRY_SIZE]);
        Ok(i64::from_be_bytes(buf))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl Default for PhysicalPage {
    fn default() -> Self {
        Self::new()
    }
}
