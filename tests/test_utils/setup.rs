use std::sync::Arc;

use lineage_db::{utils, Config, Query, Table};

/// # Conduct the initialization
///
/// - Setting up log configurations.
pub fn setup() {
    utils::init_log();
}

/// Merges only run when a test asks for them.
pub fn test_config() -> Config {
    Config::default().with_background_merge(false)
}

pub fn new_table(num_columns: usize) -> Arc<Table> {
    Arc::new(Table::create_in_memory(num_columns, 0, test_config()).unwrap())
}

pub fn new_query(num_columns: usize) -> Query {
    Query::new(new_table(num_columns))
}

pub fn all_columns(num_columns: usize) -> Vec<bool> {
    vec![true; num_columns]
}

/// Insert `[key, 0, 0, ...]` for every key.
pub fn insert_keys(query: &Query, keys: impl Iterator<Item = i64>) {
    let num_columns = query.table().num_columns();
    for key in keys {
        let mut columns = vec![0; num_columns];
        columns[0] = key;
        assert!(query.insert(&columns));
    }
}

/// The visible columns of a key, panics if the key doesn't exist.
pub fn get_columns(query: &Query, key: i64, version: i64) -> Vec<i64> {
    let num_columns = query.table().num_columns();
    let records = query.select_version(key, 0, &all_columns(num_columns), version);
    assert_eq!(records.len(), 1, "key {} should have exactly one record", key);
    records[0].columns.iter().map(|c| c.unwrap()).collect()
}
