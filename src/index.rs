use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::{
    error::{ErrorKind, LineageError},
    types::{LineageResult, Rid},
};

type ColumnIndex = BTreeMap<i64, BTreeSet<Rid>>;

/// Ordered value -> RID set index, one optional tree per column.
///
/// The key column is always indexed. The index only knows about live
/// records: deleted records are removed from it.
pub struct Index {
    key_column: usize,
    indices: Vec<Option<ColumnIndex>>,
}

impl Index {
    pub fn new(num_columns: usize, key_column: usize) -> Self {
        let mut indices: Vec<Option<ColumnIndex>> = vec![None; num_columns];
        indices[key_column] = Some(BTreeMap::new());
        Self {
            key_column,
            indices,
        }
    }

    pub fn key_column(&self) -> usize {
        self.key_column
    }

    pub fn has_index(&self, column: usize) -> bool {
        matches!(self.indices.get(column), Some(Some(_)))
    }

    /// Columns with an index, the key column excluded.
    pub fn secondary_columns(&self) -> Vec<usize> {
        (0..self.indices.len())
            .filter(|c| *c != self.key_column && self.has_index(*c))
            .collect()
    }

    /// RIDs of the records whose `column` equals `value`, `None` if the
    /// column is not indexed.
    pub fn locate(&self, value: i64, column: usize) -> Option<BTreeSet<Rid>> {
        let index = self.indices.get(column)?.as_ref()?;
        Some(index.get(&value).cloned().unwrap_or_default())
    }

    /// RIDs of the records whose `column` is in `[lo, hi]`.
    pub fn locate_range(&self, lo: i64, hi: i64, column: usize) -> Option<BTreeSet<Rid>> {
        let index = self.indices.get(column)?.as_ref()?;
        if lo > hi {
            return Some(BTreeSet::new());
        }
        Some(
            index
                .range(lo..=hi)
                .flat_map(|(_, rids)| rids.iter().copied())
                .collect(),
        )
    }

    pub fn contains_key(&self, key: i64) -> bool {
        match &self.indices[self.key_column] {
            Some(index) => index.get(&key).map_or(false, |rids| !rids.is_empty()),
            None => false,
        }
    }

    pub fn insert_record(&mut self, columns: &[i64], rid: Rid) {
        for (column, index) in self.indices.iter_mut().enumerate() {
            if let Some(index) = index {
                index.entry(columns[column]).or_default().insert(rid);
            }
        }
    }

    pub fn delete_record(&mut self, columns: &[i64], rid: Rid) {
        for (column, index) in self.indices.iter_mut().enumerate() {
            if let Some(index) = index {
                Self::remove_entry(index, columns[column], rid);
            }
        }
    }

    pub fn update_entry(&mut self, old_value: i64, new_value: i64, rid: Rid, column: usize) {
        if old_value == new_value {
            return;
        }
        if let Some(Some(index)) = self.indices.get_mut(column) {
            Self::remove_entry(index, old_value, rid);
            index.entry(new_value).or_default().insert(rid);
        }
    }

    fn remove_entry(index: &mut ColumnIndex, value: i64, rid: Rid) {
        if let Some(rids) = index.get_mut(&value) {
            rids.remove(&rid);
            if rids.is_empty() {
                index.remove(&value);
            }
        }
    }

    /// Build an index on `column` from the given live records.
    pub fn create_index<'a, I>(&mut self, column: usize, records: I) -> LineageResult
    where
        I: IntoIterator<Item = (Rid, &'a [i64])>,
    {
        if column >= self.indices.len() {
            return Err(LineageError::new(
                ErrorKind::InvalidArgument,
                &format!("column {} out of {} columns", column, self.indices.len()),
            ));
        }

        let mut index = BTreeMap::new();
        for (rid, columns) in records {
            index
                .entry(columns[column])
                .or_insert_with(BTreeSet::new)
                .insert(rid);
        }
        self.indices[column] = Some(index);
        debug!("index created on column {}", column);
        Ok(())
    }

    /// The key column's index can't be dropped.
    pub fn drop_index(&mut self, column: usize) -> LineageResult {
        if column == self.key_column {
            return Err(LineageError::new(
                ErrorKind::InvalidArgument,
                "the key column index can't be dropped",
            ));
        }
        if let Some(index) = self.indices.get_mut(column) {
            *index = None;
        }
        Ok(())
    }
}
