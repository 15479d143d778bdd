mod test_utils;

use std::{sync::Arc, thread, time::Duration};

use lineage_db::{Config, Query, Table};
use rand::prelude::*;
use test_utils::{get_columns, insert_keys, new_query, setup};

#[test]
fn test_version_depth() {
    setup();

    let query = new_query(3);
    insert_keys(&query, 1..=1);
    for value in 1..=5 {
        assert!(query.update(1, &[None, Some(value), Some(value * 10)]));
    }

    // after k updates, version v shows the state after k + v updates
    for v in 0..=4 {
        let after = 5 - v;
        assert_eq!(get_columns(&query, 1, -v), vec![1, after, after * 10]);
    }
    // beyond the history: the inserted state
    assert_eq!(get_columns(&query, 1, -5), vec![1, 0, 0]);
    assert_eq!(get_columns(&query, 1, -100), vec![1, 0, 0]);

    assert_eq!(query.sum_version(1, 1, 2, -1), Some(40));
    assert_eq!(query.sum_version(1, 1, 2, -9), Some(0));
}

#[test]
fn test_never_updated_record_has_one_version() {
    setup();

    let query = new_query(2);
    assert!(query.insert(&[7, 70]));
    for v in 0..3 {
        assert_eq!(get_columns(&query, 7, -v), vec![7, 70]);
    }
}

/// Every version of every record reads the same before and after a merge.
#[test]
fn test_merge_is_transparent() {
    setup();

    let num_columns = 4;
    let query = new_query(num_columns);
    insert_keys(&query, 0..100);

    let mut rng = rand::thread_rng();
    for _ in 0..600 {
        let key = rng.gen_range(0, 100);
        let column = rng.gen_range(1, num_columns);
        let mut update = vec![None; num_columns];
        update[column] = Some(rng.gen_range(0, 1000));
        assert!(query.update(key, &update));
    }

    let snapshot = |query: &Query| -> Vec<Vec<Vec<i64>>> {
        (0..100)
            .map(|key| (0..8).map(|v| get_columns(query, key, -v)).collect())
            .collect()
    };
    let before = snapshot(&query);
    let sums_before: Vec<Option<i64>> = (0..num_columns)
        .map(|c| query.sum_version(0, 99, c, -2))
        .collect();

    assert!(query.table().merge_all().unwrap() > 0);
    let range = query.table().range(0).unwrap();
    assert_eq!(range.merge_watermark(), range.latest_tid());

    assert_eq!(snapshot(&query), before);
    let sums_after: Vec<Option<i64>> = (0..num_columns)
        .map(|c| query.sum_version(0, 99, c, -2))
        .collect();
    assert_eq!(sums_after, sums_before);

    // updates after the merge chain on top of the merged state
    assert!(query.update(5, &[None, Some(-1), None, None]));
    assert_eq!(get_columns(&query, 5, 0)[1], -1);
    assert_eq!(get_columns(&query, 5, -1), before[5][0]);
}

#[test]
fn test_background_merge() {
    setup();

    let config = Config::default().with_merge_threshold(16);
    let table = Arc::new(Table::create_in_memory(2, 0, config).unwrap());
    let query = Query::new(Arc::clone(&table));
    insert_keys(&query, 0..10);

    for round in 1..=10 {
        for key in 0..10 {
            assert!(query.update(key, &[None, Some(round)]));
        }
    }

    let range = table.range(0).unwrap();
    for _ in 0..100 {
        if range.merge_watermark() > 0 {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert!(range.merge_watermark() > 0);

    for key in 0..10 {
        assert_eq!(get_columns(&query, key, 0), vec![key, 10]);
        assert_eq!(get_columns(&query, key, -3), vec![key, 7]);
    }

    // close waits for the queued merges
    table.close().unwrap();
    assert_eq!(query.sum(0, 9, 1), Some(100));
}
