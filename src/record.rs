use core::fmt;

use itertools::Itertools;

use crate::types::Rid;

/// One version of a record as seen by a reader. Columns left out of the
/// projection are `None`.
#[derive(Clone, PartialEq, Eq)]
pub struct Record {
    pub rid: Rid,
    pub key: i64,
    pub columns: Vec<Option<i64>>,
}

impl Record {
    pub fn new(rid: Rid, key: i64, columns: Vec<Option<i64>>) -> Self {
        Self { rid, key, columns }
    }

    /// Project the full column image of a record.
    pub fn project(rid: Rid, key_column: usize, values: &[i64], projection: &[bool]) -> Self {
        let columns = values
            .iter()
            .zip(projection)
            .map(|(v, keep)| if *keep { Some(*v) } else { None })
            .collect();
        Self::new(rid, values[key_column], columns)
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut cells = self.columns.iter().map(|c| match c {
            Some(v) => v.to_string(),
            None => "_".to_string(),
        });
        write!(f, "{{rid: {}, key: {}, [{}]}}", self.rid, self.key, cells.join(", "))
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_projection() {
        let record = Record::project(7, 0, &[1001, 9, 3], &[true, false, true]);
        assert_eq!(record.key, 1001);
        assert_eq!(record.columns, vec![Some(1001), None, Some(3)]);
        assert_eq!(record.to_string(), "{rid: 7, key: 1001, [1001, _, 3]}");
    }
}
