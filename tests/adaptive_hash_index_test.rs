// Integration tests for the adaptive hash search index: build, probe,
// invalidation and concurrent maintenance.

use std::sync::Arc;
use std::thread;

use basalt_db::buffer::BufferPool;
use basalt_db::common::Value;
use basalt_db::index::hash_table::{HashTable, RecPtr};
use basalt_db::index::search_info::{BUILD_HASH_AFTER, HASH_SUCCESS_LIMIT};
use basalt_db::index::{AdaptiveSearchSystem, BtrCursor, CancelToken, IndexDef, PageCur};
use basalt_db::record::{FieldType, RecField, Tuple};
use basalt_db::Config;

fn setup() -> (Arc<BufferPool>, AdaptiveSearchSystem, IndexDef) {
    let pool = Arc::new(BufferPool::new());
    let system = AdaptiveSearchSystem::new(Arc::clone(&pool), &Config::default());
    let index = IndexDef::new(42, 0, vec![FieldType::Integer], 1);
    (pool, system, index)
}

fn int_fields(k: i64) -> Vec<RecField> {
    vec![RecField::new(Value::Integer(k))]
}

fn populate(pool: &BufferPool, page_no: u32, keys: &[i64]) {
    let page = pool.create_page(0, page_no, 42);
    let mut guard = page.write();
    for &k in keys {
        guard.append_record(int_fields(k));
    }
}

// Scenario: empty hash table, page with records {5, 7} under a
// one-field prefix; build inserts two nodes, an exact probe hits k=5,
// dropping the page hash removes both nodes and the probe misses again.
#[test]
fn build_probe_invalidate_cycle() {
    let (pool, system, index) = setup();
    populate(&pool, 1, &[5, 7]);

    system.build_page_hash(&index, 0, 1);
    assert_eq!(system.hash_stats().n_nodes, 2);

    let tuple = Tuple::new(vec![Value::Integer(5)]);
    let cursor = system
        .guess_on_hash(&index, &tuple, PageCur::E)
        .expect("probe should hit after build");
    let page = pool.get_page(0, 1).unwrap();
    let hit = page.read().record_by_heap_no(cursor.heap_no).cloned().unwrap();
    assert_eq!(hit.fields[0].value, Value::Integer(5));

    system.drop_page_hash_index(0, 1);
    assert_eq!(system.hash_stats().n_nodes, 0);
    assert!(system.guess_on_hash(&index, &tuple, PageCur::E).is_none());
}

#[test]
fn probe_miss_then_build_then_hit() {
    let (_pool, system, index) = setup();
    populate(&_pool, 3, &[10, 20, 30]);
    let tuple = Tuple::new(vec![Value::Integer(20)]);

    assert!(system.guess_on_hash(&index, &tuple, PageCur::E).is_none());
    system.build_page_hash(&index, 0, 3);
    assert!(system.guess_on_hash(&index, &tuple, PageCur::E).is_some());
}

#[test]
fn modification_never_yields_stale_hit() {
    let (pool, system, index) = setup();
    populate(&pool, 1, &[5, 7, 9]);
    system.build_page_hash(&index, 0, 1);

    let tuple = Tuple::new(vec![Value::Integer(7)]);
    let first = system.guess_on_hash(&index, &tuple, PageCur::E).unwrap();

    // Delete k=7 with the maintenance hook, then mutate the page.
    let cursor = BtrCursor::at(0, 1, first.heap_no);
    system.update_hash_on_delete(&index, &cursor);
    let page = pool.get_page(0, 1).unwrap();
    page.write().delete_record(first.heap_no);

    match system.guess_on_hash(&index, &tuple, PageCur::E) {
        None => {}
        Some(c) => {
            // A hit must point at a live record with the right key.
            let guard = page.read();
            let rec = guard.record_by_heap_no(c.heap_no).expect("live record");
            assert_eq!(rec.fields[0].value, Value::Integer(7));
        }
    }
}

#[test]
fn search_info_drives_build_after_stable_pattern() {
    let (pool, system, index) = setup();
    populate(&pool, 1, &[1, 2, 3, 4, 5]);

    // Repeated positionings with the same geometry: after the analysis
    // threshold plus the success limit, the page hash appears.
    let mut cursor = BtrCursor::at(0, 1, 0);
    cursor.low_match = 1;
    cursor.up_match = 0;
    for _ in 0..(BUILD_HASH_AFTER + HASH_SUCCESS_LIMIT + 2) {
        system.info_update_on_position(&index, &cursor);
    }
    assert!(pool.get_page(0, 1).unwrap().read().is_hashed());
    assert!(system.hash_stats().n_nodes > 0);

    let tuple = Tuple::new(vec![Value::Integer(3)]);
    assert!(system.guess_on_hash(&index, &tuple, PageCur::E).is_some());
}

#[test]
fn page_split_moves_hash_entries() {
    let (pool, system, index) = setup();
    populate(&pool, 1, &[1, 2, 3, 4, 5, 6]);
    system.build_page_hash(&index, 0, 1);

    // Move the upper half to a fresh page, as a split would.
    let old_arc = pool.get_page(0, 1).unwrap();
    let new_arc = pool.create_page(0, 2, 42);
    {
        let mut old = old_arc.write();
        let moved: Vec<_> = old.records()[3..].to_vec();
        for rec in &moved {
            old.delete_record(rec.heap_no);
        }
        let mut new = new_arc.write();
        for rec in moved {
            new.append_record(rec.fields);
        }
    }
    system.move_or_delete_hash_entries(&index, (0, 1), (0, 2));

    assert!(new_arc.read().is_hashed());
    let tuple = Tuple::new(vec![Value::Integer(6)]);
    let hit = system.guess_on_hash(&index, &tuple, PageCur::E).unwrap();
    assert_eq!(hit.page_no, 2);

    // The stale entries for the moved records still point into page 1;
    // rebuilding that page's hash clears them.
    system.drop_page_hash_index(0, 1);
    system.build_page_hash(&index, 0, 1);
    assert!(system.validate(None).unwrap());
}

#[test]
fn freed_page_leaves_no_dangling_nodes() {
    let (pool, system, index) = setup();
    populate(&pool, 1, &[5, 7]);
    populate(&pool, 2, &[8, 9]);
    system.build_page_hash(&index, 0, 1);
    system.build_page_hash(&index, 0, 2);

    system.drop_page_hash_when_freed(0, 1);
    pool.remove_page(0, 1);

    // No node may reference the freed page.
    let mut dangling = false;
    // Probing for the freed page's keys must miss.
    for k in [5, 7] {
        if let Some(c) = system.guess_on_hash(&index, &Tuple::new(vec![Value::Integer(k)]), PageCur::E) {
            dangling |= c.page_no == 1;
        }
    }
    assert!(!dangling);
    assert!(system.validate(None).unwrap());
}

#[test]
fn insert_maintenance_keeps_index_queryable() {
    let (pool, system, index) = setup();
    populate(&pool, 1, &[10, 40]);
    system.build_page_hash(&index, 0, 1);

    let page_arc = pool.get_page(0, 1).unwrap();
    for k in [20, 30] {
        let prev_heap = {
            let guard = page_arc.read();
            guard
                .records()
                .iter()
                .take_while(|r| matches!(r.fields[0].value, Value::Integer(v) if v < k))
                .last()
                .map(|r| r.heap_no)
        };
        let ins_heap = page_arc.write().insert_after(prev_heap, int_fields(k)).unwrap();
        let cursor = BtrCursor::at(0, 1, prev_heap.unwrap_or(0));
        system.update_hash_on_insert(&index, &cursor, ins_heap);
    }

    for k in [10, 20, 30, 40] {
        let tuple = Tuple::new(vec![Value::Integer(k)]);
        let hit = system.guess_on_hash(&index, &tuple, PageCur::E);
        assert!(hit.is_some(), "expected hit for {k}");
    }
    assert!(system.validate(None).unwrap());
}

#[test]
fn le_mode_reports_match_lengths() {
    let (_pool, system, index) = setup();
    populate(&_pool, 1, &[5, 9]);
    system.build_page_hash(&index, 0, 1);

    let cursor = system
        .guess_on_hash(&index, &Tuple::new(vec![Value::Integer(5)]), PageCur::Le)
        .unwrap();
    assert_eq!(cursor.low_match, 1);
    assert_eq!(cursor.up_match, 0);
    assert!(cursor.from_hash);
}

#[test]
fn validation_detects_dangling_pointer_and_disables() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let (pool, system, index) = setup();
    populate(&pool, 1, &[5]);
    system.build_page_hash(&index, 0, 1);
    // Free the page without telling the search system.
    pool.remove_page(0, 1);

    assert!(!system.validate(None).unwrap());
    assert!(!system.is_enabled());
}

#[test]
fn validate_honours_cancellation() {
    let (_pool, system, _index) = setup();
    let token = CancelToken::new();
    token.cancel();
    assert!(system.validate(Some(&token)).is_err());
}

// ----------------------------------------------------------------------------
// Hash table invariants under stress
// ----------------------------------------------------------------------------

#[test]
fn hash_table_concurrent_churn_stays_valid() {
    use rand::Rng;

    let table = Arc::new(HashTable::new(1024, 8));
    let mut handles = Vec::new();
    for t in 0..4u32 {
        let table = Arc::clone(&table);
        handles.push(thread::spawn(move || {
            let mut rng = rand::rng();
            for i in 0..2000u32 {
                let fold = u64::from(rng.random_range(0..500u32) * 7 + t);
                let ptr = RecPtr::new(0, t, i);
                match i % 3 {
                    0 => {
                        let _ = table.insert(fold, ptr);
                    }
                    1 => {
                        table.search_and_delete_if_found(fold, ptr);
                    }
                    _ => {
                        let _ = table.lookup(fold);
                    }
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert!(table.validate(None).unwrap());
}

#[test]
fn hash_table_page_sweep_under_concurrency() {
    let table = Arc::new(HashTable::new(512, 4));
    for i in 0..200u32 {
        table.insert(u64::from(i) * 31, RecPtr::new(0, i % 4, i)).unwrap();
    }
    let sweeper = {
        let table = Arc::clone(&table);
        thread::spawn(move || {
            for i in 0..200u32 {
                table.remove_all_nodes_pointing_to_page(u64::from(i) * 31, 0, 1);
            }
        })
    };
    let inserter = {
        let table = Arc::clone(&table);
        thread::spawn(move || {
            for i in 200..400u32 {
                let _ = table.insert(u64::from(i) * 31, RecPtr::new(0, 2, i));
            }
        })
    };
    sweeper.join().unwrap();
    inserter.join().unwrap();

    let mut on_page_1 = 0;
    table.for_each(|_, ptr| {
        if ptr.in_page(0, 1) {
            on_page_1 += 1;
        }
    });
    assert_eq!(on_page_1, 0);
    assert!(table.validate(None).unwrap());
}

#[test]
fn concurrent_probes_and_page_teardown() {
    let (pool, system, index) = setup();
    for page_no in 1..=4u32 {
        let base = i64::from(page_no) * 100;
        populate(&pool, page_no, &[base + 1, base + 2, base + 3]);
        system.build_page_hash(&index, 0, page_no);
    }

    let system = Arc::new(system);
    let mut handles = Vec::new();
    for _ in 0..3u32 {
        let system = Arc::clone(&system);
        let index = index.clone();
        handles.push(thread::spawn(move || {
            for i in 0..500i64 {
                let page = i % 4 + 1;
                let key = page * 100 + (i % 3 + 1);
                let tuple = Tuple::new(vec![Value::Integer(key)]);
                // Hits and misses are both fine while pages are being
                // unhashed; wrong answers are not.
                if let Some(c) = system.guess_on_hash(&index, &tuple, PageCur::E) {
                    assert_eq!(i64::from(c.page_no), page);
                }
            }
        }));
    }
    let teardown = {
        let system = Arc::clone(&system);
        thread::spawn(move || {
            for page_no in 1..=4u32 {
                system.drop_page_hash_index(0, page_no);
            }
        })
    };
    for handle in handles {
        handle.join().unwrap();
    }
    teardown.join().unwrap();
    assert!(system.validate(None).unwrap());
}

#[test]
fn duplicate_prefixes_resolve_to_one_representative() {
    let (pool, system, index) = setup();
    populate(&pool, 1, &[5, 5, 5, 8]);
    system.build_page_hash(&index, 0, 1);
    // One node per fold: three duplicates and one distinct key.
    assert_eq!(system.hash_stats().n_nodes, 2);
    let tuple = Tuple::new(vec![Value::Integer(5)]);
    let hit = system.guess_on_hash(&index, &tuple, PageCur::E).unwrap();
    let page = pool.get_page(0, 1).unwrap();
    let guard = page.read();
    let rec = guard.record_by_heap_no(hit.heap_no).unwrap();
    assert_eq!(rec.fields[0].value, Value::Integer(5));
}
