use core::fmt;
use std::{collections::BTreeSet, sync::Arc};

use log::{debug, error};

use crate::{
    query::{Query, QueryOp},
    storage::addressing::page_range_index,
    table::{ColumnChange, Table},
    types::{LineageResult, Rid},
};

pub type TransactionID = u64;

/// How to roll back one write.
#[derive(Debug, Clone, PartialEq)]
pub enum UndoEntry {
    Insert(Rid),
    Delete(Rid),

    /// The columns the update changed.
    Update { rid: Rid, changes: Vec<ColumnChange> },

    Increment { rid: Rid, column: usize },
}

impl UndoEntry {
    fn rid(&self) -> Rid {
        match self {
            UndoEntry::Insert(rid) | UndoEntry::Delete(rid) => *rid,
            UndoEntry::Update { rid, .. } | UndoEntry::Increment { rid, .. } => *rid,
        }
    }
}

/// The writes of a running transaction, in execution order.
#[derive(Default)]
pub struct UndoLog {
    entries: Vec<(Arc<Table>, UndoEntry)>,
}

impl UndoLog {
    pub fn record(&mut self, table: &Arc<Table>, entry: UndoEntry) {
        self.entries.push((Arc::clone(table), entry));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Page ranges written, grouped by table.
    fn touched_ranges(&self) -> Vec<(Arc<Table>, BTreeSet<usize>)> {
        let mut touched: Vec<(Arc<Table>, BTreeSet<usize>)> = Vec::new();
        for (table, entry) in &self.entries {
            let range_index = page_range_index(entry.rid());
            match touched.iter_mut().find(|(t, _)| Arc::ptr_eq(t, table)) {
                Some((_, ranges)) => {
                    ranges.insert(range_index);
                }
                None => {
                    let mut ranges = BTreeSet::new();
                    ranges.insert(range_index);
                    touched.push((Arc::clone(table), ranges));
                }
            }
        }
        touched
    }

    /// Undo every write, newest first. Keeps going after a failed undo
    /// and returns the first error.
    fn rollback(self) -> LineageResult {
        let mut result = Ok(());
        for (table, entry) in self.entries.into_iter().rev() {
            let undo = match &entry {
                UndoEntry::Insert(rid) => table.undo_insert(*rid),
                UndoEntry::Delete(rid) => table.undo_delete(*rid),
                UndoEntry::Update { rid, changes } => table.undo_update(*rid, changes),
                UndoEntry::Increment { rid, column } => table.undo_increment(*rid, *column),
            };
            if let Err(e) = undo {
                error!("failed to undo {:?}: {}", entry, e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }
}

/// An ordered list of query operations which commits or aborts as a
/// whole.
///
/// Writes are visible to other transactions as soon as they are made,
/// an abort takes them back. Atomicity doesn't hold across page ranges
/// against concurrent readers.
pub struct Transaction {
    id: TransactionID,
    ops: Vec<(Query, QueryOp)>,
}

impl Transaction {
    pub(crate) fn new(id: TransactionID) -> Self {
        Self { id, ops: Vec::new() }
    }

    pub fn get_id(&self) -> TransactionID {
        self.id
    }

    pub fn add_query(&mut self, query: &Query, op: QueryOp) {
        self.ops.push((query.clone(), op));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Run the operations in order. The first failure aborts the
    /// transaction. Returns whether it committed.
    pub fn run(&self) -> bool {
        let mut log = UndoLog::default();
        for (i, (query, op)) in self.ops.iter().enumerate() {
            if !query.execute(op, &mut log) {
                debug!("{} aborts at operation {}: {:?}", self, i, op);
                self.abort(log);
                return false;
            }
        }
        self.commit(log)
    }

    fn abort(&self, log: UndoLog) {
        if let Err(e) = log.rollback() {
            error!("{} aborted with an incomplete rollback: {}", self, e);
            e.show_backtrace();
        }
    }

    /// Flush the page ranges the transaction wrote. If they can't be
    /// made durable the transaction is aborted instead.
    fn commit(&self, log: UndoLog) -> bool {
        for (table, ranges) in log.touched_ranges() {
            if let Err(e) = table.flush_ranges(&ranges) {
                error!("{} failed to commit: {}", self, e);
                e.show_backtrace();
                self.abort(log);
                return false;
            }
        }
        debug!("{} committed, {} writes", self, log.len());
        true
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "tx_{}", self.id)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn new_query() -> Query {
        let config = Config::default().with_background_merge(false);
        Query::new(Arc::new(Table::create_in_memory(2, 0, config).unwrap()))
    }

    #[test]
    fn test_commit() {
        let query = new_query();
        let mut tx = Transaction::new(1);
        tx.add_query(&query, QueryOp::Insert(vec![1, 10]));
        tx.add_query(&query, QueryOp::Insert(vec![2, 20]));
        tx.add_query(&query, QueryOp::Increment { key: 1, column: 1 });
        assert_eq!(tx.len(), 3);

        assert!(tx.run());
        assert_eq!(query.sum(1, 2, 1), Some(31));
    }

    #[test]
    fn test_abort_rolls_back_in_reverse() {
        let query = new_query();
        assert!(query.insert(&[1, 10]));
        assert!(query.insert(&[2, 20]));

        let mut tx = Transaction::new(2);
        tx.add_query(&query, QueryOp::Insert(vec![3, 30]));
        tx.add_query(
            &query,
            QueryOp::Update {
                key: 1,
                columns: vec![None, Some(11)],
            },
        );
        tx.add_query(&query, QueryOp::Delete(2));
        // duplicate key
        tx.add_query(&query, QueryOp::Insert(vec![1, 0]));

        assert!(!tx.run());
        assert_eq!(query.sum(1, 3, 1), Some(30));
        assert!(query.select(3, 0, &[true, true]).is_empty());
        assert_eq!(query.select(2, 0, &[true, true]).len(), 1);
    }

    #[test]
    fn test_touched_ranges() {
        let query = new_query();
        let mut log = UndoLog::default();
        log.record(query.table(), UndoEntry::Insert(1));
        log.record(query.table(), UndoEntry::Delete(8193));
        log.record(query.table(), UndoEntry::Insert(2));

        let touched = log.touched_ranges();
        assert_eq!(touched.len(), 1);
        assert_eq!(touched[0].1, [0, 1].iter().copied().collect());
    }

    #[test]
    fn test_rollback_keeps_other_writes() {
        let query = new_query();
        assert!(query.insert(&[1, 0]));
        assert!(query.insert(&[2, 0]));

        let mut log = UndoLog::default();
        assert!(query.execute(
            &QueryOp::Update {
                key: 1,
                columns: vec![None, Some(11)]
            },
            &mut log
        ));
        assert!(query.execute(&QueryOp::Increment { key: 2, column: 1 }, &mut log));

        // another writer between the writes and the abort
        assert!(query.update(1, &[None, Some(22)]));
        assert!(query.increment(2, 1));

        log.rollback().unwrap();
        assert_eq!(query.sum(1, 1, 1), Some(22));
        assert_eq!(query.sum(2, 2, 1), Some(1));
    }
}
