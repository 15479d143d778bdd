use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex, RwLock},
};

use log::{debug, error, info};

use crate::{
    config::{Config, MAX_COLUMNS},
    error::{ErrorKind, LineageError},
    index::Index,
    merge::{merge_range, MergeScheduler},
    record::Record,
    storage::{
        addressing::page_range_index,
        metadata::{RangeHeader, TableHeader},
        BufferPool, DiskManager, MemoryDisk, PageRange,
    },
    transaction::LockManager,
    types::{LineageResult, Rid},
    utils::{Decodeable, Encodeable, HandyMutex, HandyRwLock},
};

/// One column written by an update, with the value it replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnChange {
    pub column: usize,
    pub old: i64,
    pub new: i64,
}

impl ColumnChange {
    /// Columns of `update` that differ from `previous`.
    fn between(previous: &[i64], update: &[Option<i64>]) -> Vec<Self> {
        previous
            .iter()
            .zip(update)
            .enumerate()
            .filter_map(|(column, (old, new))| match new {
                Some(new) if new != old => Some(Self {
                    column,
                    old: *old,
                    new: *new,
                }),
                _ => None,
            })
            .collect()
    }
}

/// A table of `num_columns` i64 columns, one of which is the primary
/// key.
///
/// Locks are always taken in this order: the allocation mutex
/// (`next_rid`), the lock of one page range, the index. The page range
/// directory (`ranges`) is only held long enough to clone a range out of
/// it.
pub struct Table {
    num_columns: usize,
    key_column: usize,
    config: Config,

    pool: Arc<BufferPool>,
    ranges: RwLock<Vec<Arc<PageRange>>>,

    /// The next RID to hand out, held for the whole insert.
    next_rid: Mutex<Rid>,

    index: RwLock<Index>,
    locks: Arc<LockManager>,
    merger: Mutex<Option<MergeScheduler>>,
}

impl Table {
    /// Create an empty table on the given disk.
    pub fn create(
        num_columns: usize,
        key_column: usize,
        config: Config,
        disk: Arc<dyn DiskManager>,
    ) -> LineageResult<Self> {
        Self::check_schema(num_columns, key_column)?;
        let pool = Arc::new(BufferPool::new(disk, config.bufferpool_size));
        let table = Self::new(
            num_columns,
            key_column,
            config,
            pool,
            Vec::new(),
            1,
            Index::new(num_columns, key_column),
        )?;
        info!(
            "table created, {} columns, key column {}",
            num_columns, key_column
        );
        Ok(table)
    }

    pub fn create_in_memory(
        num_columns: usize,
        key_column: usize,
        config: Config,
    ) -> LineageResult<Self> {
        Self::create(num_columns, key_column, config, Arc::new(MemoryDisk::new()))
    }

    /// Reopen a table persisted by `close`. The index is rebuilt from the
    /// base records.
    pub fn open(disk: Arc<dyn DiskManager>, config: Config) -> LineageResult<Self> {
        let bytes = disk.load_table_header()?.ok_or_else(|| {
            LineageError::new(ErrorKind::CorruptMetadata, "table header is missing")
        })?;
        let header = TableHeader::from_bytes(&bytes)?;
        Self::check_schema(header.num_columns, header.key_column).map_err(|e| {
            LineageError::new(ErrorKind::CorruptMetadata, e.details())
        })?;

        let pool = Arc::new(BufferPool::new(Arc::clone(&disk), config.bufferpool_size));
        let mut ranges = Vec::with_capacity(header.num_ranges);
        for range_index in 0..header.num_ranges {
            let bytes = disk.load_range_header(range_index)?.ok_or_else(|| {
                LineageError::new(
                    ErrorKind::CorruptMetadata,
                    &format!("header of page range {} is missing", range_index),
                )
            })?;
            let range_header = RangeHeader::from_bytes(&bytes)?;
            ranges.push(Arc::new(PageRange::open(
                range_index,
                header.num_columns,
                Arc::clone(&pool),
                &range_header,
            )?));
        }

        if header.next_rid > 1 && page_range_index(header.next_rid - 1) >= header.num_ranges {
            return Err(LineageError::new(
                ErrorKind::CorruptMetadata,
                &format!(
                    "rid {} was handed out but there are only {} page ranges",
                    header.next_rid - 1,
                    header.num_ranges
                ),
            ));
        }

        let mut index = Index::new(header.num_columns, header.key_column);
        let mut records = Vec::new();
        for range in &ranges {
            records.extend(range.scan_base_records()?);
        }
        for (rid, columns) in &records {
            index.insert_record(columns, *rid);
        }
        for column in &header.indexed_columns {
            index.create_index(
                *column,
                records.iter().map(|(rid, columns)| (*rid, columns.as_slice())),
            )?;
        }

        let table = Self::new(
            header.num_columns,
            header.key_column,
            config,
            pool,
            ranges,
            header.next_rid,
            index,
        )?;

        info!(
            "table opened, {} records in {} page ranges, next rid {}",
            records.len(),
            header.num_ranges,
            header.next_rid
        );
        Ok(table)
    }

    fn new(
        num_columns: usize,
        key_column: usize,
        config: Config,
        pool: Arc<BufferPool>,
        ranges: Vec<Arc<PageRange>>,
        next_rid: Rid,
        index: Index,
    ) -> LineageResult<Self> {
        let table = Self {
            num_columns,
            key_column,
            config,
            pool,
            ranges: RwLock::new(ranges),
            next_rid: Mutex::new(next_rid),
            index: RwLock::new(index),
            locks: Arc::new(LockManager::new()),
            merger: Mutex::new(None),
        };
        table.start_merger()?;
        Ok(table)
    }

    fn start_merger(&self) -> LineageResult {
        if self.config.background_merge {
            *self.merger.ml() = Some(MergeScheduler::start(Arc::clone(&self.locks))?);
        }
        Ok(())
    }

    fn check_schema(num_columns: usize, key_column: usize) -> LineageResult {
        if num_columns == 0 || num_columns > MAX_COLUMNS || key_column >= num_columns {
            return Err(LineageError::new(
                ErrorKind::InvalidArgument,
                &format!(
                    "a table has 1 to {} columns, got {} columns with key column {}",
                    MAX_COLUMNS, num_columns, key_column
                ),
            ));
        }
        Ok(())
    }

    pub fn num_columns(&self) -> usize {
        self.num_columns
    }

    pub fn key_column(&self) -> usize {
        self.key_column
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub fn num_ranges(&self) -> usize {
        self.ranges.rl().len()
    }

    pub fn range(&self, range_index: usize) -> Option<Arc<PageRange>> {
        self.ranges.rl().get(range_index).cloned()
    }

    /// The RID the next insert will get.
    pub fn next_rid(&self) -> Rid {
        *self.next_rid.ml()
    }

    pub fn has_index(&self, column: usize) -> bool {
        self.index.rl().has_index(column)
    }

    fn check_column(&self, column: usize) -> LineageResult {
        if column >= self.num_columns {
            return Err(LineageError::new(
                ErrorKind::InvalidArgument,
                &format!("column {} out of {} columns", column, self.num_columns),
            ));
        }
        Ok(())
    }

    fn check_width(&self, len: usize) -> LineageResult {
        if len != self.num_columns {
            return Err(LineageError::new(
                ErrorKind::InvalidArgument,
                &format!("expect {} columns, got {}", self.num_columns, len),
            ));
        }
        Ok(())
    }

    fn range_of(&self, rid: Rid) -> LineageResult<Arc<PageRange>> {
        let range_index = page_range_index(rid);
        self.range(range_index).ok_or_else(|| {
            LineageError::new(
                ErrorKind::InvalidArgument,
                &format!("record {} is in page range {} which doesn't exist", rid, range_index),
            )
        })
    }

    fn last_range(&self) -> Arc<PageRange> {
        if let Some(range) = self.ranges.rl().last() {
            return Arc::clone(range);
        }
        self.append_range()
    }

    fn append_range(&self) -> Arc<PageRange> {
        let mut ranges = self.ranges.wl();
        let range = Arc::new(PageRange::new(
            ranges.len(),
            self.num_columns,
            Arc::clone(&self.pool),
        ));
        ranges.push(Arc::clone(&range));
        info!("page range {} opened", range.index());
        range
    }

    fn locate_key(&self, key: i64) -> LineageResult<Rid> {
        let rids = self.index.rl().locate(key, self.key_column).unwrap_or_default();
        rids.into_iter().next().ok_or_else(|| {
            LineageError::new(ErrorKind::KeyNotFound, &format!("key {} not found", key))
        })
    }

    fn check_key(&self, rid: Rid, columns: &[i64], key: i64) -> LineageResult {
        // the key was changed between the index lookup and the range lock
        if columns[self.key_column] != key {
            return Err(LineageError::new(
                ErrorKind::KeyNotFound,
                &format!("key {} of record {} was changed", key, rid),
            ));
        }
        Ok(())
    }

    /// Insert a record, returning its RID.
    pub fn insert(&self, columns: &[i64]) -> LineageResult<Rid> {
        self.check_width(columns.len())?;

        let mut next_rid = self.next_rid.ml();
        let rid = *next_rid;

        let range = self.last_range();
        match self.insert_into(&range, rid, columns) {
            Err(e) if e.kind() == ErrorKind::RangeFull => {
                let range = self.append_range();
                self.insert_into(&range, rid, columns)?;
            }
            result => result?,
        }

        *next_rid += 1;
        debug!("record {} inserted with key {}", rid, columns[self.key_column]);
        Ok(rid)
    }

    fn insert_into(&self, range: &PageRange, rid: Rid, columns: &[i64]) -> LineageResult {
        let _guard = self.locks.acquire_write(range.index());
        let mut index = self.index.wl();

        let key = columns[self.key_column];
        if index.contains_key(key) {
            return Err(LineageError::new(
                ErrorKind::DuplicateKey,
                &format!("key {} exists already", key),
            ));
        }

        range.insert_record(rid, columns)?;
        index.insert_record(columns, rid);
        Ok(())
    }

    /// Latest version of a record, `None` if it has been deleted.
    fn read_record(&self, rid: Rid, version_offset: i64) -> LineageResult<Option<Vec<i64>>> {
        let range = self.range_of(rid)?;
        let _guard = self.locks.acquire_read(range.index());
        match range.get_record_columns(rid, version_offset) {
            Ok(columns) => Ok(Some(columns)),
            Err(e) if e.kind() == ErrorKind::RecordDeleted => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// RIDs of the live records whose `column` equals `value`. A column
    /// without an index is matched by scanning every page range.
    fn matching_rids(&self, value: i64, column: usize) -> LineageResult<BTreeSet<Rid>> {
        if let Some(rids) = self.index.rl().locate(value, column) {
            return Ok(rids);
        }

        debug!("column {} has no index, scan all records", column);
        let ranges: Vec<Arc<PageRange>> = self.ranges.rl().clone();
        let mut rids = BTreeSet::new();
        for range in ranges {
            let _guard = self.locks.acquire_read(range.index());
            for (rid, columns) in range.scan_base_records()? {
                if columns[column] == value {
                    rids.insert(rid);
                }
            }
        }
        Ok(rids)
    }

    pub fn select(
        &self,
        value: i64,
        column: usize,
        projection: &[bool],
    ) -> LineageResult<Vec<Record>> {
        self.select_version(value, column, projection, 0)
    }

    /// Records whose latest `column` value is `value`, as they were
    /// `version_offset` updates ago.
    pub fn select_version(
        &self,
        value: i64,
        column: usize,
        projection: &[bool],
        version_offset: i64,
    ) -> LineageResult<Vec<Record>> {
        self.check_column(column)?;
        self.check_width(projection.len())?;

        let mut records = Vec::new();
        for rid in self.matching_rids(value, column)? {
            if let Some(columns) = self.read_record(rid, version_offset)? {
                records.push(Record::project(rid, self.key_column, &columns, projection));
            }
        }
        Ok(records)
    }

    pub fn sum(&self, lo: i64, hi: i64, column: usize) -> LineageResult<Option<i64>> {
        self.sum_version(lo, hi, column, 0)
    }

    /// Sum of `column` over the records with a key in `[lo, hi]`, `None`
    /// if there is no such record.
    pub fn sum_version(
        &self,
        lo: i64,
        hi: i64,
        column: usize,
        version_offset: i64,
    ) -> LineageResult<Option<i64>> {
        self.check_column(column)?;
        let rids = self
            .index
            .rl()
            .locate_range(lo, hi, self.key_column)
            .unwrap_or_default();

        let mut sum = None;
        for rid in rids {
            if let Some(columns) = self.read_record(rid, version_offset)? {
                let total = sum.unwrap_or(0i64).checked_add(columns[column]).ok_or_else(|| {
                    LineageError::new(
                        ErrorKind::InvalidArgument,
                        &format!("sum of column {} over [{}, {}] overflows", column, lo, hi),
                    )
                })?;
                sum = Some(total);
            }
        }
        Ok(sum)
    }

    /// Update the record with the given key. `None` leaves a column
    /// unchanged. Returns the RID and the columns the update changed.
    pub fn update(
        &self,
        key: i64,
        columns: &[Option<i64>],
    ) -> LineageResult<(Rid, Vec<ColumnChange>)> {
        self.check_width(columns.len())?;
        self.update_with(key, |_| Ok(columns.to_vec()))
    }

    /// Add 1 to one column of the record with the given key.
    pub fn increment(&self, key: i64, column: usize) -> LineageResult<(Rid, Vec<ColumnChange>)> {
        self.check_column(column)?;
        self.update_with(key, self.add_to_column(column, 1))
    }

    /// Builds the update adding `delta` to one column, overflow is an
    /// invalid argument.
    fn add_to_column(
        &self,
        column: usize,
        delta: i64,
    ) -> impl FnOnce(&[i64]) -> LineageResult<Vec<Option<i64>>> {
        let num_columns = self.num_columns;
        move |current: &[i64]| {
            let value = current[column].checked_add(delta).ok_or_else(|| {
                LineageError::new(
                    ErrorKind::InvalidArgument,
                    &format!("column {} overflows adding {} to {}", column, delta, current[column]),
                )
            })?;
            let mut columns = vec![None; num_columns];
            columns[column] = Some(value);
            Ok(columns)
        }
    }

    fn update_with<F>(&self, key: i64, new_columns: F) -> LineageResult<(Rid, Vec<ColumnChange>)>
    where
        F: FnOnce(&[i64]) -> LineageResult<Vec<Option<i64>>>,
    {
        let rid = self.locate_key(key)?;
        let changes = self.update_at(rid, Some(key), new_columns)?;
        Ok((rid, changes))
    }

    /// Read-modify-write of one record under its range's write lock.
    /// With a key, the record must still carry it.
    fn update_at<F>(
        &self,
        rid: Rid,
        key: Option<i64>,
        new_columns: F,
    ) -> LineageResult<Vec<ColumnChange>>
    where
        F: FnOnce(&[i64]) -> LineageResult<Vec<Option<i64>>>,
    {
        let range = self.range_of(rid)?;

        let changes = {
            let _guard = self.locks.acquire_write(range.index());
            let previous = range.get_record_columns(rid, 0)?;
            if let Some(key) = key {
                self.check_key(rid, &previous, key)?;
            }

            let columns = new_columns(&previous)?;
            self.apply_update(&range, rid, &previous, &columns)?;
            ColumnChange::between(&previous, &columns)
        };

        self.maybe_merge(&range);
        Ok(changes)
    }

    /// Write an update and keep the index in step. The caller holds the
    /// range's write lock.
    fn apply_update(
        &self,
        range: &PageRange,
        rid: Rid,
        previous: &[i64],
        columns: &[Option<i64>],
    ) -> LineageResult {
        let mut index = self.index.wl();
        if let Some(new_key) = columns[self.key_column] {
            if new_key != previous[self.key_column] && index.contains_key(new_key) {
                return Err(LineageError::new(
                    ErrorKind::DuplicateKey,
                    &format!("key {} exists already", new_key),
                ));
            }
        }

        range.update_record(rid, previous, columns)?;
        for (column, value) in columns.iter().enumerate() {
            if let Some(value) = value {
                index.update_entry(previous[column], *value, rid, column);
            }
        }
        Ok(())
    }

    /// Delete the record with the given key. Returns the RID and the
    /// columns the record had.
    pub fn delete(&self, key: i64) -> LineageResult<(Rid, Vec<i64>)> {
        let rid = self.locate_key(key)?;
        let range = self.range_of(rid)?;

        let _guard = self.locks.acquire_write(range.index());
        let columns = range.get_record_columns(rid, 0)?;
        self.check_key(rid, &columns, key)?;

        range.delete_record(rid)?;
        self.index.wl().delete_record(&columns, rid);
        debug!("record {} deleted", rid);
        Ok((rid, columns))
    }

    /// Roll back an insert: the record is deleted, its RID stays retired.
    pub fn undo_insert(&self, rid: Rid) -> LineageResult {
        let range = self.range_of(rid)?;
        let _guard = self.locks.acquire_write(range.index());
        let columns = range.get_record_columns(rid, 0)?;
        range.delete_record(rid)?;
        self.index.wl().delete_record(&columns, rid);
        debug!("insert of record {} rolled back", rid);
        Ok(())
    }

    /// Roll back a delete. If the key was inserted again since, the
    /// record stays deleted and `DuplicateKey` is returned.
    pub fn undo_delete(&self, rid: Rid) -> LineageResult {
        let range = self.range_of(rid)?;
        let _guard = self.locks.acquire_write(range.index());
        range.restore_record(rid)?;
        let columns = range.get_record_columns(rid, 0)?;

        let mut index = self.index.wl();
        let key = columns[self.key_column];
        if index.contains_key(key) {
            range.delete_record(rid)?;
            return Err(LineageError::new(
                ErrorKind::DuplicateKey,
                &format!("key {} was inserted again, record {} stays deleted", key, rid),
            ));
        }
        index.insert_record(&columns, rid);
        debug!("delete of record {} rolled back", rid);
        Ok(())
    }

    /// Roll back an update by appending a compensating update. A column
    /// is only restored while it still holds the value the update wrote,
    /// later writes to it are kept.
    pub fn undo_update(&self, rid: Rid, changes: &[ColumnChange]) -> LineageResult {
        let range = self.range_of(rid)?;

        {
            let _guard = self.locks.acquire_write(range.index());
            let current = range.get_record_columns(rid, 0)?;
            let mut columns = vec![None; self.num_columns];
            for change in changes {
                self.check_column(change.column)?;
                if current[change.column] == change.new {
                    columns[change.column] = Some(change.old);
                } else {
                    debug!(
                        "column {} of record {} was written again, not rolled back",
                        change.column, rid
                    );
                }
            }
            if columns.iter().all(Option::is_none) {
                return Ok(());
            }
            self.apply_update(&range, rid, &current, &columns)?;
        }

        debug!("update of record {} rolled back", rid);
        self.maybe_merge(&range);
        Ok(())
    }

    /// Roll back an increment by taking 1 off the column again, which
    /// keeps the increments made since.
    pub fn undo_increment(&self, rid: Rid, column: usize) -> LineageResult {
        self.check_column(column)?;
        self.update_at(rid, None, self.add_to_column(column, -1))?;
        debug!("increment of record {} rolled back", rid);
        Ok(())
    }

    /// Build an index on a column from the current records. Inserts are
    /// held off while the index is built.
    pub fn create_index(&self, column: usize) -> LineageResult {
        self.check_column(column)?;
        let _alloc = self.next_rid.ml();

        let ranges: Vec<Arc<PageRange>> = self.ranges.rl().clone();
        let mut records = Vec::new();
        for range in ranges {
            let _guard = self.locks.acquire_read(range.index());
            records.extend(range.scan_base_records()?);
        }

        self.index.wl().create_index(
            column,
            records.iter().map(|(rid, columns)| (*rid, columns.as_slice())),
        )
    }

    pub fn drop_index(&self, column: usize) -> LineageResult {
        self.index.wl().drop_index(column)
    }

    fn maybe_merge(&self, range: &Arc<PageRange>) {
        if !range.needs_merge(self.config.merge_threshold) {
            return;
        }

        let merger = self.merger.ml();
        match &*merger {
            Some(scheduler) => scheduler.schedule(range),
            None => {
                if self.config.background_merge {
                    // the merge thread is stopped, the table is closing
                    return;
                }
                if let Err(e) = merge_range(&self.locks, range) {
                    error!("merge of range {} failed: {}", range.index(), e);
                    e.show_backtrace();
                }
            }
        }
    }

    /// Merge every page range now. Returns the number of cells folded.
    pub fn merge_all(&self) -> LineageResult<usize> {
        let ranges: Vec<Arc<PageRange>> = self.ranges.rl().clone();
        let mut cells = 0;
        for range in ranges {
            cells += merge_range(&self.locks, &range)?;
        }
        Ok(cells)
    }

    /// Make the given page ranges durable: their dirty pages, their
    /// headers and the table header.
    pub fn flush_ranges(&self, range_indices: &BTreeSet<usize>) -> LineageResult {
        for range_index in range_indices {
            let range = match self.range(*range_index) {
                Some(range) => range,
                None => continue,
            };
            self.pool.flush_range(*range_index)?;
            self.pool
                .disk()
                .flush_range_header(*range_index, &range.header().to_bytes())?;
        }
        self.flush_table_header()
    }

    fn flush_table_header(&self) -> LineageResult {
        let next_rid = self.next_rid();
        let header = TableHeader {
            num_columns: self.num_columns,
            key_column: self.key_column,
            next_rid,
            num_ranges: self.num_ranges(),
            indexed_columns: self.index.rl().secondary_columns(),
        };
        self.pool.disk().flush_table_header(&header.to_bytes())
    }

    /// Wait for the background merges, then write every dirty page and
    /// all the headers to the disk. Scheduled merges stop for good.
    pub fn close(&self) -> LineageResult {
        let scheduler = self.merger.ml().take();
        if let Some(mut scheduler) = scheduler {
            scheduler.stop();
        }

        self.pool.flush_all()?;
        let ranges: Vec<Arc<PageRange>> = self.ranges.rl().clone();
        for range in &ranges {
            self.pool
                .disk()
                .flush_range_header(range.index(), &range.header().to_bytes())?;
        }
        self.flush_table_header()?;

        info!("table closed, {} page ranges", ranges.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RECORDS_PER_RANGE;

    fn new_table(num_columns: usize) -> Table {
        Table::create_in_memory(
            num_columns,
            0,
            Config::default().with_background_merge(false),
        )
        .unwrap()
    }

    #[test]
    fn test_schema_checks() {
        let config = Config::default().with_background_merge(false);
        assert!(Table::create_in_memory(0, 0, config.clone()).is_err());
        assert!(Table::create_in_memory(65, 0, config.clone()).is_err());
        assert!(Table::create_in_memory(3, 3, config).is_err());
    }

    #[test]
    fn test_duplicate_key() {
        let table = new_table(2);
        assert_eq!(table.insert(&[1, 1]).unwrap(), 1);
        assert_eq!(
            table.insert(&[1, 2]).unwrap_err().kind(),
            ErrorKind::DuplicateKey
        );
        // the failed insert consumes no rid
        assert_eq!(table.insert(&[2, 2]).unwrap(), 2);
    }

    #[test]
    fn test_key_change() {
        let table = new_table(2);
        table.insert(&[1, 0]).unwrap();
        table.insert(&[2, 0]).unwrap();

        assert_eq!(
            table.update(1, &[Some(2), None]).unwrap_err().kind(),
            ErrorKind::DuplicateKey
        );
        table.update(1, &[Some(3), Some(7)]).unwrap();

        let all = [true, true];
        assert!(table.select(1, 0, &all).unwrap().is_empty());
        let records = table.select(3, 0, &all).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].columns, vec![Some(3), Some(7)]);
    }

    #[test]
    fn test_scan_fallback_and_secondary_index() {
        let table = new_table(2);
        for key in 0..10 {
            table.insert(&[key, key % 3]).unwrap();
        }

        let projection = [true, false];
        assert_eq!(table.select(0, 1, &projection).unwrap().len(), 4);

        table.create_index(1).unwrap();
        assert!(table.has_index(1));
        table.update(0, &[None, Some(1)]).unwrap();
        assert_eq!(table.select(0, 1, &projection).unwrap().len(), 3);
        assert_eq!(table.select(1, 1, &projection).unwrap().len(), 4);

        table.drop_index(1).unwrap();
        assert_eq!(table.select(1, 1, &projection).unwrap().len(), 4);
    }

    #[test]
    fn test_second_range() {
        let table = new_table(1);
        for key in 0..(RECORDS_PER_RANGE as i64 + 1) {
            table.insert(&[key]).unwrap();
        }
        assert_eq!(table.num_ranges(), 2);
        let records = table.select(RECORDS_PER_RANGE as i64, 0, &[true]).unwrap();
        assert_eq!(records[0].rid, RECORDS_PER_RANGE as Rid + 1);
    }

    #[test]
    fn test_undo() {
        let table = new_table(2);
        let rid = table.insert(&[1, 10]).unwrap();

        let (_, changes) = table.update(1, &[None, Some(20)]).unwrap();
        assert_eq!(
            changes,
            vec![ColumnChange {
                column: 1,
                old: 10,
                new: 20
            }]
        );
        table.undo_update(rid, &changes).unwrap();
        assert_eq!(table.sum(1, 1, 1).unwrap(), Some(10));

        table.delete(1).unwrap();
        assert_eq!(table.sum(1, 1, 1).unwrap(), None);
        table.undo_delete(rid).unwrap();
        assert_eq!(table.sum(1, 1, 1).unwrap(), Some(10));

        table.undo_insert(rid).unwrap();
        assert!(table.select(1, 0, &[true, true]).unwrap().is_empty());
    }

    #[test]
    fn test_synchronous_merge() {
        let config = Config::default()
            .with_background_merge(false)
            .with_merge_threshold(2);
        let table = Table::create_in_memory(2, 0, config).unwrap();
        table.insert(&[1, 0]).unwrap();
        table.increment(1, 1).unwrap();
        table.increment(1, 1).unwrap();

        let range = table.range(0).unwrap();
        assert_eq!(range.merge_watermark(), range.latest_tid());
        assert_eq!(table.sum(1, 1, 1).unwrap(), Some(2));
        assert_eq!(table.sum_version(1, 1, 1, -1).unwrap(), Some(1));
    }

    #[test]
    fn test_undo_update_keeps_later_writes() {
        let table = new_table(3);
        let rid = table.insert(&[1, 0, 0]).unwrap();

        let (_, first) = table.update(1, &[None, Some(11), Some(5)]).unwrap();
        table.update(1, &[None, None, Some(22)]).unwrap();
        table.undo_update(rid, &first).unwrap();

        let records = table.select(1, 0, &[true, true, true]).unwrap();
        assert_eq!(records[0].columns, vec![Some(1), Some(0), Some(22)]);
    }

    #[test]
    fn test_undo_increment_keeps_later_increments() {
        let table = new_table(2);
        let rid = table.insert(&[1, 5]).unwrap();

        table.increment(1, 1).unwrap();
        table.increment(1, 1).unwrap();
        table.undo_increment(rid, 1).unwrap();
        assert_eq!(table.sum(1, 1, 1).unwrap(), Some(6));
    }

    #[test]
    fn test_undo_delete_of_reinserted_key() {
        let table = new_table(2);
        let rid = table.insert(&[1, 0]).unwrap();
        table.delete(1).unwrap();
        table.insert(&[1, 5]).unwrap();

        assert_eq!(
            table.undo_delete(rid).unwrap_err().kind(),
            ErrorKind::DuplicateKey
        );
        let records = table.select(1, 0, &[true, true]).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].columns, vec![Some(1), Some(5)]);
        assert!(table.range(0).unwrap().is_deleted(rid).unwrap());
    }

    #[test]
    fn test_overflow() {
        let table = new_table(2);
        table.insert(&[1, i64::MAX]).unwrap();
        table.insert(&[2, 1]).unwrap();

        assert_eq!(
            table.increment(1, 1).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(table.sum(1, 1, 1).unwrap(), Some(i64::MAX));
        assert_eq!(
            table.sum(1, 2, 1).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
    }
}
