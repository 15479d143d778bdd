mod test_utils;

use std::{sync::Arc, thread};

use lineage_db::{config::RECORDS_PER_RANGE, Config, Query, Table};
use test_utils::{get_columns, insert_keys, new_query, setup};

/// Writers on distinct keys of the same page range, plus readers which
/// must only ever see whole versions.
#[test]
fn test_concurrent_updates_in_one_range() {
    setup();

    let query = new_query(3);
    insert_keys(&query, 0..8);

    let mut handles = vec![];
    for key in 0..8 {
        let local = query.clone();
        handles.push(thread::spawn(move || {
            for value in 1..=200 {
                // both columns always move together
                assert!(local.update(key, &[None, Some(value), Some(-value)]));
            }
        }));
    }

    let (sender, receiver) = crossbeam::channel::unbounded();
    for _ in 0..4 {
        let local = query.clone();
        let local_receiver = receiver.clone();
        handles.push(thread::spawn(move || loop {
            for key in 0..8 {
                let columns = get_columns(&local, key, 0);
                assert_eq!(columns[1], -columns[2]);
            }
            if local_receiver.try_recv().is_ok() {
                break;
            }
        }));
    }

    let readers = handles.split_off(8);
    for handle in handles {
        handle.join().unwrap();
    }
    for _ in 0..readers.len() {
        sender.send(()).unwrap();
    }
    for handle in readers {
        handle.join().unwrap();
    }

    for key in 0..8 {
        assert_eq!(get_columns(&query, key, 0), vec![key, 200, -200]);
        assert_eq!(get_columns(&query, key, -199), vec![key, 1, -1]);
    }
    assert_eq!(query.sum(0, 7, 1), Some(1600));
}

/// Increments are read-modify-write under the range's write lock, none
/// of them may get lost.
#[test]
fn test_concurrent_increments_across_ranges() {
    setup();

    let config = Config::default().with_merge_threshold(64);
    let table = Arc::new(Table::create_in_memory(2, 0, config).unwrap());
    let query = Query::new(Arc::clone(&table));

    let keys = [0, 1, RECORDS_PER_RANGE as i64 + 1, RECORDS_PER_RANGE as i64 + 2];
    insert_keys(&query, 0..(RECORDS_PER_RANGE as i64 + 3));
    assert_eq!(table.num_ranges(), 2);

    let threads = 8;
    let rounds = 100;
    let mut handles = vec![];
    for _ in 0..threads {
        let local = query.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..rounds {
                for key in keys.iter() {
                    assert!(local.increment(*key, 1));
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for key in keys.iter() {
        assert_eq!(get_columns(&query, *key, 0), vec![*key, threads * rounds]);
    }
    table.close().unwrap();
}

/// Concurrent inserts get distinct, gapless RIDs.
#[test]
fn test_concurrent_inserts() {
    setup();

    let query = new_query(2);
    let mut handles = vec![];
    for t in 0..4 {
        let local = query.clone();
        handles.push(thread::spawn(move || {
            for i in 0..500 {
                assert!(local.insert(&[t * 1000 + i, t]));
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let mut rids: Vec<u64> = (0..4)
        .flat_map(|t| (0..500).map(move |i| t * 1000 + i))
        .map(|key| query.select(key, 0, &[true, true])[0].rid)
        .collect();
    rids.sort();
    assert_eq!(rids, (1..=2000).collect::<Vec<u64>>());
    assert_eq!(query.sum(0, 3999, 1), Some(500 * (1 + 2 + 3)));
}
