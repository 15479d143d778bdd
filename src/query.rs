use std::sync::Arc;

use log::{debug, error};

use crate::{
    error::LineageError,
    record::Record,
    table::Table,
    transaction::{UndoEntry, UndoLog},
    types::LineageResult,
};

/// A query operation bound to its arguments, the unit a transaction is
/// made of.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOp {
    Insert(Vec<i64>),
    Select {
        key: i64,
        column: usize,
        projection: Vec<bool>,
    },
    SelectVersion {
        key: i64,
        column: usize,
        projection: Vec<bool>,
        version: i64,
    },
    Update {
        key: i64,
        columns: Vec<Option<i64>>,
    },
    Delete(i64),
    Sum {
        lo: i64,
        hi: i64,
        column: usize,
    },
    SumVersion {
        lo: i64,
        hi: i64,
        column: usize,
        version: i64,
    },
    Increment {
        key: i64,
        column: usize,
    },
}

/// The query surface of a table.
///
/// Failures are reported as `false`, an empty result or `None`. Business
/// failures (a duplicate or missing key, a deleted record, a bad
/// argument) are logged at debug level, everything else at error level
/// with a backtrace.
#[derive(Clone)]
pub struct Query {
    table: Arc<Table>,
}

impl Query {
    pub fn new(table: Arc<Table>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    fn report<T>(&self, what: &str, result: LineageResult<T>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                Self::log_failure(what, &e);
                None
            }
        }
    }

    fn log_failure(what: &str, e: &LineageError) {
        if e.is_business_failure() {
            debug!("{} failed: {}", what, e);
        } else {
            error!("{} failed: {}", what, e);
            e.show_backtrace();
        }
    }

    /// A read inside a transaction only fails it on a fault of the
    /// engine, an empty or missing result is an answer.
    fn read_succeeded<T>(what: &str, result: LineageResult<T>) -> bool {
        match result {
            Ok(_) => true,
            Err(e) => {
                Self::log_failure(what, &e);
                e.is_business_failure()
            }
        }
    }

    pub fn insert(&self, columns: &[i64]) -> bool {
        self.insert_logged(columns, None)
    }

    pub fn select(&self, key: i64, column: usize, projection: &[bool]) -> Vec<Record> {
        self.select_version(key, column, projection, 0)
    }

    pub fn select_version(
        &self,
        key: i64,
        column: usize,
        projection: &[bool],
        version: i64,
    ) -> Vec<Record> {
        let result = self
            .table
            .select_version(key, column, projection, version);
        self.report("select", result).unwrap_or_default()
    }

    /// `None` in `columns` leaves a column unchanged.
    pub fn update(&self, key: i64, columns: &[Option<i64>]) -> bool {
        self.update_logged(key, columns, None)
    }

    pub fn delete(&self, key: i64) -> bool {
        self.delete_logged(key, None)
    }

    /// Sum of `column` over the keys in `[lo, hi]`, `None` if no record
    /// falls in the range.
    pub fn sum(&self, lo: i64, hi: i64, column: usize) -> Option<i64> {
        self.sum_version(lo, hi, column, 0)
    }

    pub fn sum_version(&self, lo: i64, hi: i64, column: usize, version: i64) -> Option<i64> {
        let result = self.table.sum_version(lo, hi, column, version);
        self.report("sum", result).flatten()
    }

    pub fn increment(&self, key: i64, column: usize) -> bool {
        self.increment_logged(key, column, None)
    }

    fn insert_logged(&self, columns: &[i64], log: Option<&mut UndoLog>) -> bool {
        match self.report("insert", self.table.insert(columns)) {
            Some(rid) => {
                self.record_undo(log, UndoEntry::Insert(rid));
                true
            }
            None => false,
        }
    }

    fn update_logged(&self, key: i64, columns: &[Option<i64>], log: Option<&mut UndoLog>) -> bool {
        match self.report("update", self.table.update(key, columns)) {
            Some((rid, changes)) => {
                self.record_undo(log, UndoEntry::Update { rid, changes });
                true
            }
            None => false,
        }
    }

    fn increment_logged(&self, key: i64, column: usize, log: Option<&mut UndoLog>) -> bool {
        match self.report("increment", self.table.increment(key, column)) {
            Some((rid, _)) => {
                self.record_undo(log, UndoEntry::Increment { rid, column });
                true
            }
            None => false,
        }
    }

    fn delete_logged(&self, key: i64, log: Option<&mut UndoLog>) -> bool {
        match self.report("delete", self.table.delete(key)) {
            Some((rid, _)) => {
                self.record_undo(log, UndoEntry::Delete(rid));
                true
            }
            None => false,
        }
    }

    fn record_undo(&self, log: Option<&mut UndoLog>, entry: UndoEntry) {
        if let Some(log) = log {
            log.record(&self.table, entry);
        }
    }

    /// Run one operation of a transaction, recording how to undo it.
    pub(crate) fn execute(&self, op: &QueryOp, log: &mut UndoLog) -> bool {
        match op {
            QueryOp::Insert(columns) => self.insert_logged(columns, Some(log)),
            QueryOp::Select {
                key,
                column,
                projection,
            } => Self::read_succeeded(
                "select",
                self.table.select_version(*key, *column, projection, 0),
            ),
            QueryOp::SelectVersion {
                key,
                column,
                projection,
                version,
            } => Self::read_succeeded(
                "select",
                self.table
                    .select_version(*key, *column, projection, *version),
            ),
            QueryOp::Update { key, columns } => self.update_logged(*key, columns, Some(log)),
            QueryOp::Delete(key) => self.delete_logged(*key, Some(log)),
            QueryOp::Sum { lo, hi, column } => {
                Self::read_succeeded("sum", self.table.sum_version(*lo, *hi, *column, 0))
            }
            QueryOp::SumVersion {
                lo,
                hi,
                column,
                version,
            } => Self::read_succeeded(
                "sum",
                self.table.sum_version(*lo, *hi, *column, *version),
            ),
            QueryOp::Increment { key, column } => self.increment_logged(*key, *column, Some(log)),
        }
    }
}
