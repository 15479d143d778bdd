//! Map a RID/TID to its physical location.
//!
//! Pure arithmetic on the id and the layout constants, no lookup table
//! is involved. The buffer pool and the page ranges key their caches on
//! the derived indices, so these functions must stay bit-for-bit stable.

use std::fmt;

use crate::{
    config::{BASE_PAGES_PER_RANGE, RECORDS_PER_PAGE, RECORDS_PER_RANGE},
    types::{Rid, Tid},
};

pub fn page_range_index(rid: Rid) -> usize {
    ((rid - 1) / RECORDS_PER_RANGE as u64) as usize
}

pub fn base_page_index(rid: Rid) -> usize {
    (((rid - 1) / RECORDS_PER_PAGE as u64) % BASE_PAGES_PER_RANGE as u64) as usize
}

/// Slot of an id inside its page. Works for both RIDs and TIDs.
pub fn slot_index(id: u64) -> usize {
    ((id - 1) % RECORDS_PER_PAGE as u64) as usize
}

/// Tail pages are not partitioned by range count, a TID only maps to a
/// page inside the tail-page list of its own range.
pub fn tail_page_index(tid: Tid) -> usize {
    ((tid - 1) / RECORDS_PER_PAGE as u64) as usize
}

/// The first RID stored in the given page range.
pub fn first_rid_of_range(range_index: usize) -> Rid {
    (range_index * RECORDS_PER_RANGE) as Rid + 1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordLocation {
    pub range_index: usize,
    pub page_index: usize,
    pub slot: usize,
}

impl RecordLocation {
    pub fn of_rid(rid: Rid) -> Self {
        Self {
            range_index: page_range_index(rid),
            page_index: base_page_index(rid),
            slot: slot_index(rid),
        }
    }
}

impl fmt::Display for RecordLocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "range_{}/page_{}/slot_{}", self.range_index, self.page_index, self.slot)
    }
}
