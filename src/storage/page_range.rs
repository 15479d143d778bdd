use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use log::{debug, info};

use crate::{
    config::{BASE_PAGES_PER_RANGE, RECORDS_PER_PAGE},
    error::{ErrorKind, LineageError},
    storage::{
        addressing::{base_page_index, first_rid_of_range, page_range_index, slot_index, tail_page_index},
        buffer_pool::{BufferPool, PageGuard},
        metadata::RangeHeader,
        page::{Indirection, Page, TOMBSTONE_RID},
        page_id::{PageId, PageKind},
    },
    types::{LineageResult, Rid, Tid},
    utils::HandyMutex,
};

struct RangeState {
    base_pages: usize,
    tail_pages: usize,

    /// The last TID handed out, 0 if there is no tail record yet.
    latest_tid: Tid,

    /// Every tail record with a TID up to this one has been folded into
    /// the base pages.
    merge_watermark: Tid,

    updates_since_merge: usize,

    /// Owning base RID of every tail record, `tail_owners[tid - 1]`.
    /// 0 for a tail record no chain reaches.
    tail_owners: Vec<Rid>,
}

/// Cells collected by the first phase of a merge.
pub struct MergePlan {
    /// The `latest_tid` seen when the merge started, TIDs after it are
    /// left for the next merge.
    snapshot_tid: Tid,

    updates_counted: usize,

    /// (base rid, column, value), newest value per cell only
    cells: Vec<(Rid, usize, i64)>,
}

impl MergePlan {
    pub fn snapshot_tid(&self) -> Tid {
        self.snapshot_tid
    }

    pub fn cells_count(&self) -> usize {
        self.cells.len()
    }
}

/// The base pages of one contiguous RID range together with the tail
/// pages holding their update history.
///
/// A page range does no locking of its own beyond the latches of its
/// pages and its counters: callers hold the range's read lock for
/// reads and its write lock for everything else.
pub struct PageRange {
    index: usize,
    num_columns: usize,
    pool: Arc<BufferPool>,
    state: Mutex<RangeState>,
    merging: AtomicBool,
}

impl PageRange {
    pub fn new(index: usize, num_columns: usize, pool: Arc<BufferPool>) -> Self {
        Self {
            index,
            num_columns,
            pool,
            state: Mutex::new(RangeState {
                base_pages: 0,
                tail_pages: 0,
                latest_tid: 0,
                merge_watermark: 0,
                updates_since_merge: 0,
                tail_owners: Vec::new(),
            }),
            merging: AtomicBool::new(false),
        }
    }

    /// Restore a page range from its persisted header. The owners of
    /// the tail records are recovered by walking the chain of every base
    /// record.
    pub fn open(
        index: usize,
        num_columns: usize,
        pool: Arc<BufferPool>,
        header: &RangeHeader,
    ) -> LineageResult<Self> {
        let tail_capacity = header.tail_pages.saturating_mul(RECORDS_PER_PAGE);
        if header.latest_tid as usize > tail_capacity || header.base_pages > BASE_PAGES_PER_RANGE {
            return Err(LineageError::new(
                ErrorKind::CorruptMetadata,
                &format!(
                    "range {} header out of bounds: {} base pages, latest tid {} in {} tail pages",
                    index, header.base_pages, header.latest_tid, header.tail_pages
                ),
            ));
        }

        let range = Self::new(index, num_columns, pool);
        let mut owners = vec![0; header.latest_tid as usize];

        for page_index in 0..header.base_pages {
            let guard = range.pool.fetch_guard(&PageId::base(index, page_index))?;
            let page = guard.read();
            let first_rid = first_rid_of_range(index) + (page_index * RECORDS_PER_PAGE) as Rid;
            for slot in 0..page.num_records() {
                let rid = first_rid + slot as Rid;
                let mut indirection = page.get_indirection(rid)?;
                while let Indirection::Tail(tid) = indirection {
                    if tid == 0 || tid > header.latest_tid {
                        return Err(LineageError::new(
                            ErrorKind::CorruptMetadata,
                            &format!(
                                "record {} reaches tid {} beyond latest tid {}",
                                rid, tid, header.latest_tid
                            ),
                        ));
                    }
                    owners[tid as usize - 1] = rid;
                    indirection = range.tail_guard(tid)?.read().get_indirection(tid)?;
                }
            }
        }

        {
            let mut state = range.state.ml();
            state.base_pages = header.base_pages;
            state.tail_pages = header.tail_pages;
            state.latest_tid = header.latest_tid;
            state.merge_watermark = header.merge_watermark;
            state.tail_owners = owners;
        }

        debug!(
            "page range {} opened, {} base pages, {} tail pages",
            index, header.base_pages, header.tail_pages
        );
        Ok(range)
    }

    pub fn header(&self) -> RangeHeader {
        let state = self.state.ml();
        RangeHeader {
            latest_tid: state.latest_tid,
            merge_watermark: state.merge_watermark,
            base_pages: state.base_pages,
            tail_pages: state.tail_pages,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn num_columns(&self) -> usize {
        self.num_columns
    }

    pub fn latest_tid(&self) -> Tid {
        self.state.ml().latest_tid
    }

    pub fn merge_watermark(&self) -> Tid {
        self.state.ml().merge_watermark
    }

    pub fn base_pages_count(&self) -> usize {
        self.state.ml().base_pages
    }

    pub fn tail_pages_count(&self) -> usize {
        self.state.ml().tail_pages
    }

    pub fn updates_since_merge(&self) -> usize {
        self.state.ml().updates_since_merge
    }

    pub fn needs_merge(&self, threshold: usize) -> bool {
        threshold > 0 && self.updates_since_merge() >= threshold
    }

    /// Claim the right to run a merge on this range, false if another
    /// merge is in flight.
    pub fn try_begin_merge(&self) -> bool {
        self.merging
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn end_merge(&self) {
        self.merging.store(false, Ordering::Release);
    }

    fn base_guard(&self, rid: Rid) -> LineageResult<PageGuard<'_>> {
        self.pool.fetch_guard(&PageId::base(self.index, base_page_index(rid)))
    }

    fn tail_guard(&self, tid: Tid) -> LineageResult<PageGuard<'_>> {
        self.pool.fetch_guard(&PageId::tail(self.index, tail_page_index(tid)))
    }

    fn check_owned(&self, rid: Rid) -> LineageResult {
        if rid == 0 || page_range_index(rid) != self.index {
            return Err(LineageError::new(
                ErrorKind::InvalidArgument,
                &format!("record {} doesn't belong to page range {}", rid, self.index),
            ));
        }
        Ok(())
    }

    fn check_columns(&self, len: usize) -> LineageResult {
        if len != self.num_columns {
            return Err(LineageError::new(
                ErrorKind::InvalidArgument,
                &format!("expect {} columns, got {}", self.num_columns, len),
            ));
        }
        Ok(())
    }

    /// Write a new base record. A record past the last RID of the range
    /// is `RangeFull`, the table opens the next range for it.
    pub fn insert_record(&self, rid: Rid, columns: &[i64]) -> LineageResult {
        self.check_columns(columns.len())?;
        if rid > 0 && page_range_index(rid) > self.index {
            return Err(LineageError::new(
                ErrorKind::RangeFull,
                &format!("page range {} is full", self.index),
            ));
        }
        self.check_owned(rid)?;

        let page_index = base_page_index(rid);
        let guard = {
            let mut state = self.state.ml();
            if page_index < state.base_pages {
                self.pool.fetch_guard(&PageId::base(self.index, page_index))?
            } else if page_index == state.base_pages && page_index < BASE_PAGES_PER_RANGE {
                let guard = self.pool.create_page(
                    &PageId::base(self.index, page_index),
                    Page::new(PageKind::Base, self.num_columns),
                )?;
                state.base_pages += 1;
                debug!("page range {} allocates base page {}", self.index, page_index);
                guard
            } else {
                return Err(LineageError::new(
                    ErrorKind::InvalidArgument,
                    &format!(
                        "record {} skips base pages, range {} has {}",
                        rid, self.index, state.base_pages
                    ),
                ));
            }
        };

        let mut page = guard.write();
        if slot_index(rid) < page.num_records() {
            return Err(LineageError::new(
                ErrorKind::InvalidArgument,
                &format!("record {} exists already", rid),
            ));
        }
        page.insert(rid, columns, Indirection::Base(rid), 0, true)
    }

    pub fn is_deleted(&self, rid: Rid) -> LineageResult<bool> {
        self.check_owned(rid)?;
        let guard = self.base_guard(rid)?;
        let id = guard.read().get_id(rid)?;
        Ok(id == TOMBSTONE_RID)
    }

    /// Reconstruct the columns of a record.
    ///
    /// `version_offset` is 0 for the latest version, -1 for the one
    /// before the latest update, and so on. Going past the first update
    /// yields the state the record was inserted with.
    pub fn get_record_columns(&self, rid: Rid, version_offset: i64) -> LineageResult<Vec<i64>> {
        if version_offset > 0 {
            return Err(LineageError::new(
                ErrorKind::InvalidArgument,
                &format!("version offset must not be positive, got {}", version_offset),
            ));
        }
        self.check_owned(rid)?;
        let watermark = self.merge_watermark();

        let newest = {
            let base = self.base_guard(rid)?;
            let page = base.read();
            if page.get_id(rid)? == TOMBSTONE_RID {
                return Err(LineageError::new(
                    ErrorKind::RecordDeleted,
                    &format!("record {} is deleted", rid),
                ));
            }

            match page.get_indirection(rid)? {
                Indirection::Base(_) => return page.read_columns(rid),
                Indirection::Tail(tid) => {
                    // everything up to the watermark has been folded into
                    // the base page
                    if version_offset == 0 && tid <= watermark {
                        return page.read_columns(rid);
                    }
                    tid
                }
            }
        };

        // walk back along the chain, the walk ends at the snapshot of
        // the base record
        let mut tid = newest;
        for _ in 0..version_offset.unsigned_abs() {
            let previous = self.tail_guard(tid)?.read().get_indirection(tid)?;
            match previous {
                Indirection::Tail(previous) => tid = previous,
                Indirection::Base(_) => break,
            }
        }

        let guard = self.tail_guard(tid)?;
        let columns = guard.read().read_columns(tid)?;
        Ok(columns)
    }

    /// Append a tail record, allocating a new tail page when the current
    /// one is full.
    fn append_tail(
        &self,
        state: &mut RangeState,
        owner: Rid,
        columns: &[i64],
        indirection: Indirection,
        schema_encoding: u64,
    ) -> LineageResult<Tid> {
        let tid = state.latest_tid + 1;
        let page_index = tail_page_index(tid);
        let pid = PageId::tail(self.index, page_index);

        let guard = if page_index < state.tail_pages {
            self.pool.fetch_guard(&pid)?
        } else {
            let guard = self
                .pool
                .create_page(&pid, Page::new(PageKind::Tail, self.num_columns))?;
            state.tail_pages += 1;
            debug!("page range {} allocates tail page {}", self.index, page_index);
            guard
        };

        guard
            .write()
            .insert(tid, columns, indirection, schema_encoding, false)?;

        state.latest_tid = tid;
        state.tail_owners.push(owner);
        Ok(tid)
    }

    /// Append a tail record for an update and point the base record at
    /// it.
    ///
    /// `old_columns` is the latest visible version of the record, `None`
    /// in `new_columns` leaves a column unchanged. The tail record holds
    /// the full image of the new version, so the latest version never
    /// needs a walk along the chain.
    ///
    /// The first update of a record appends a snapshot of the base
    /// record before the update itself, the snapshot keeps the inserted
    /// version readable after merges overwrite the base page.
    pub fn update_record(
        &self,
        rid: Rid,
        old_columns: &[i64],
        new_columns: &[Option<i64>],
    ) -> LineageResult<Tid> {
        self.check_owned(rid)?;
        self.check_columns(old_columns.len())?;
        self.check_columns(new_columns.len())?;

        let base = self.base_guard(rid)?;
        let (indirection, schema_encoding, base_columns) = {
            let page = base.read();
            if page.get_id(rid)? == TOMBSTONE_RID {
                return Err(LineageError::new(
                    ErrorKind::RecordDeleted,
                    &format!("record {} is deleted", rid),
                ));
            }
            let indirection = page.get_indirection(rid)?;
            let base_columns = match indirection {
                Indirection::Base(_) => Some(page.read_columns(rid)?),
                Indirection::Tail(_) => None,
            };
            (indirection, page.get_schema_encoding(rid)?, base_columns)
        };

        let mut diff_mask = 0u64;
        let mut tail_columns = Vec::with_capacity(self.num_columns);
        for (i, (old, new)) in old_columns.iter().zip(new_columns).enumerate() {
            match new {
                Some(v) if v != old => {
                    diff_mask |= 1 << i;
                    tail_columns.push(*v);
                }
                _ => tail_columns.push(*old),
            }
        }
        let new_schema = schema_encoding | diff_mask;

        let tid = {
            let mut state = self.state.ml();

            let previous = match base_columns {
                Some(base_columns) => {
                    let snapshot = self.append_tail(
                        &mut state,
                        rid,
                        &base_columns,
                        Indirection::Base(rid),
                        0,
                    )?;
                    Indirection::Tail(snapshot)
                }
                None => indirection,
            };

            let tid = self.append_tail(&mut state, rid, &tail_columns, previous, new_schema)?;
            state.updates_since_merge += 1;
            tid
        };

        base.write()
            .set_base_pointer(rid, new_schema, Indirection::Tail(tid))?;
        Ok(tid)
    }

    /// Tombstone a base record. The tail chain and the columns are left
    /// in place.
    pub fn delete_record(&self, rid: Rid) -> LineageResult {
        self.check_owned(rid)?;
        let base = self.base_guard(rid)?;
        let mut page = base.write();
        if page.get_id(rid)? == TOMBSTONE_RID {
            return Err(LineageError::new(
                ErrorKind::RecordDeleted,
                &format!("record {} is deleted already", rid),
            ));
        }
        page.set_id(rid, TOMBSTONE_RID)
    }

    /// Bring back a tombstoned record, used to roll back a delete.
    pub fn restore_record(&self, rid: Rid) -> LineageResult {
        self.check_owned(rid)?;
        let base = self.base_guard(rid)?;
        let mut page = base.write();
        if page.get_id(rid)? == TOMBSTONE_RID {
            page.set_id(rid, rid as i64)?;
        }
        Ok(())
    }

    /// Latest version of every live record of the range.
    pub fn scan_base_records(&self) -> LineageResult<Vec<(Rid, Vec<i64>)>> {
        let base_pages = self.base_pages_count();
        let mut records = Vec::new();
        for page_index in 0..base_pages {
            let first_rid = first_rid_of_range(self.index) + (page_index * RECORDS_PER_PAGE) as Rid;
            let live: Vec<Rid> = {
                let guard = self.pool.fetch_guard(&PageId::base(self.index, page_index))?;
                let page = guard.read();
                let mut live = Vec::new();
                for slot in 0..page.num_records() {
                    let rid = first_rid + slot as Rid;
                    if page.get_id(rid)? != TOMBSTONE_RID {
                        live.push(rid);
                    }
                }
                live
            };

            for rid in live {
                records.push((rid, self.get_record_columns(rid, 0)?));
            }
        }
        Ok(records)
    }

    /// First phase of a merge, run under the range's read lock.
    ///
    /// Walks the tail records from the newest TID down to the watermark
    /// and keeps the newest value of every updated cell.
    pub fn collect_merge(&self) -> LineageResult<MergePlan> {
        let (snapshot_tid, watermark, updates_counted, owners) = {
            let state = self.state.ml();
            let from = state.merge_watermark as usize;
            let to = state.latest_tid as usize;
            (
                state.latest_tid,
                state.merge_watermark,
                state.updates_since_merge,
                state.tail_owners[from..to].to_vec(),
            )
        };

        let mut seen: HashSet<(Rid, usize)> = HashSet::new();
        let mut cells = Vec::new();
        let mut current: Option<PageGuard> = None;

        for tid in (watermark + 1..=snapshot_tid).rev() {
            let owner = owners[(tid - watermark - 1) as usize];
            if owner == 0 {
                continue;
            }

            let page_index = tail_page_index(tid);
            let reuse = matches!(&current, Some(g) if g.pid().page_index == page_index);
            if !reuse {
                // release the previous page before pinning the next one
                current.take();
                current = Some(self.pool.fetch_guard(&PageId::tail(self.index, page_index))?);
            }
            let guard = match &current {
                Some(guard) => guard,
                None => continue,
            };
            let page = guard.read();

            // snapshots hold the inserted version, nothing to fold
            if let Indirection::Base(_) = page.get_indirection(tid)? {
                continue;
            }

            let schema_encoding = page.get_schema_encoding(tid)?;
            for column in 0..self.num_columns {
                if schema_encoding & (1 << column) == 0 {
                    continue;
                }
                if seen.insert((owner, column)) {
                    cells.push((owner, column, page.read_column(tid, column)?));
                }
            }
        }

        Ok(MergePlan {
            snapshot_tid,
            updates_counted,
            cells,
        })
    }

    /// Second phase of a merge, run under the range's write lock.
    /// Returns the number of cells written into the base pages.
    pub fn apply_merge(&self, plan: MergePlan) -> LineageResult<usize> {
        if plan.snapshot_tid <= self.merge_watermark() {
            return Ok(0);
        }

        let mut cells = plan.cells;
        cells.sort_by_key(|(rid, column, _)| (*rid, *column));

        let mut written = 0;
        let mut current: Option<PageGuard> = None;
        for (rid, column, value) in cells {
            let pid = PageId::base(self.index, base_page_index(rid));
            if current.as_ref().map(|g| g.pid()) != Some(pid) {
                current.take();
                current = Some(self.pool.fetch_guard(&pid)?);
            }
            if let Some(guard) = &current {
                guard.write().write_column(rid, column, value)?;
                written += 1;
            }
        }
        drop(current);

        let mut state = self.state.ml();
        state.merge_watermark = plan.snapshot_tid;
        state.updates_since_merge = state.updates_since_merge.saturating_sub(plan.updates_counted);

        info!(
            "page range {} merged up to tid {}, {} cells",
            self.index, plan.snapshot_tid, written
        );
        Ok(written)
    }
}
