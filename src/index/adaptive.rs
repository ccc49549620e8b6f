// The adaptive hash index.
//
// A lazily built in-memory hash from record-prefix fingerprints to the
// page/slot that last satisfied a matching B-tree lookup. Every answer
// is advisory: a probe that misses, or that cannot be verified against
// the page, simply falls back to the B-tree descent.
//
// Latch discipline: `latch` protects the hash table and the record
// bytes reachable through its nodes. It does not protect record
// neighbour offsets or other records on a page. It is acquired after
// page latches; a thread holding it must never block on a page latch,
// which is why probes use try_read on page frames. Page modifications
// on hashed pages take the latch in X mode before touching the table.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::buffer::{BufferPool, HashSide, Page, PageHashState};
use crate::common::{HeapNo, IndexId, PageNo, SpaceId};
use crate::error::Result;
use crate::index::hash_table::{HashTable, HashTableStats, RecPtr};
use crate::index::search_info::SearchInfo;
use crate::index::{BtrCursor, CancelToken, IndexDef, PageCur};
use crate::record::compare::cmp_tuple_record;
use crate::record::fingerprint::{fold_record, fold_tuple, tuple_covers_prefix};
use crate::record::{RecField, Tuple};
use crate::Config;

/// The adaptive search system: one per process, shared by all
/// query-executing threads.
pub struct AdaptiveSearchSystem {
    latch: RwLock<HashTable>,
    enabled: AtomicBool,
    analysis_threshold: u32,
    pool: Arc<BufferPool>,
    infos: DashMap<IndexId, Arc<SearchInfo>>,
    /// Field types per index, so that teardown paths that only see a
    /// page can still fold its records under the right collations.
    indexes: DashMap<IndexId, Vec<crate::record::FieldType>>,
}

impl AdaptiveSearchSystem {
    pub fn new(pool: Arc<BufferPool>, config: &Config) -> Self {
        Self {
            latch: RwLock::new(HashTable::new(config.adaptive_hash_cells, 8)),
            enabled: AtomicBool::new(config.adaptive_hash_index),
            analysis_threshold: config.hash_analysis_threshold,
            pool,
            infos: DashMap::new(),
            indexes: DashMap::new(),
        }
    }

    fn register_index(&self, index: &IndexDef) {
        self.indexes
            .entry(index.id)
            .or_insert_with(|| index.field_types.clone());
    }

    /// Fold a record under a page's hashed-prefix parameters, using the
    /// owning index's declared field types (falling back to binary for
    /// an index never seen by this system).
    fn fold_for_page(&self, fields: &[RecField], state: PageHashState, tree_id: IndexId) -> u64 {
        match self.indexes.get(&tree_id) {
            Some(types) => fold_record(fields, &types, state.n_fields, state.n_bytes, tree_id),
            None => fold_record(
                fields,
                &binary_types(fields.len()),
                state.n_fields,
                state.n_bytes,
                tree_id,
            ),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Disable the adaptive hash process-wide. Used on configuration
    /// change and on detected invariant violations.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    /// Search info for an index, created on first use.
    pub fn search_info(&self, index_id: IndexId) -> Arc<SearchInfo> {
        Arc::clone(
            &self
                .infos
                .entry(index_id)
                .or_insert_with(|| Arc::new(SearchInfo::new())),
        )
    }

    /// Update the search info after a cursor positioning and build the
    /// page hash when the heuristics say it has started paying off.
    pub fn info_update_on_position(&self, index: &IndexDef, cursor: &BtrCursor) {
        if !self.is_enabled() {
            return;
        }
        let info = self.search_info(index.id);
        if info.update_on_position(cursor, index, self.analysis_threshold) {
            self.build_page_hash(index, cursor.space, cursor.page_no);
        }
    }

    // ------------------------------------------------------------------
    // Probing
    // ------------------------------------------------------------------

    /// Try to position a cursor from the hash instead of descending the
    /// B-tree. On a hit the returned cursor carries the page's modify
    /// clock at probe time, and for mode `Le` the exact tuple match
    /// lengths so an insert can skip redundant compares.
    pub fn guess_on_hash(
        &self,
        index: &IndexDef,
        tuple: &Tuple,
        mode: PageCur,
    ) -> Option<BtrCursor> {
        if !self.is_enabled() {
            return None;
        }
        self.register_index(index);
        let info = self.search_info(index.id);
        let prefix = info.get_recommended_prefix();
        if prefix.n_fields == 0 && prefix.n_bytes == 0 {
            return None;
        }
        if !tuple_covers_prefix(tuple, prefix.n_fields, prefix.n_bytes) {
            return None;
        }

        let fold = fold_tuple(
            tuple,
            &index.field_types,
            prefix.n_fields,
            prefix.n_bytes,
            index.id,
        );

        let table = self.latch.read();
        let Some(ptr) = table.lookup(fold) else {
            info.note_hash_failure();
            return None;
        };
        let Some(page_arc) = self.pool.get_page(ptr.space, ptr.page_no) else {
            info.note_hash_failure();
            return None;
        };
        // Never block on a page latch while holding the search latch.
        let Some(page) = page_arc.try_read() else {
            info.note_hash_failure();
            return None;
        };
        if page.index_id != index.id || !page.is_hashed() {
            info.note_hash_failure();
            return None;
        }
        let result = check_guess(&page, ptr.heap_no, tuple, mode, index);
        drop(page);
        drop(table);

        match result {
            Some(cursor) => {
                info.note_hash_success();
                Some(cursor)
            }
            None => {
                info.note_hash_failure();
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Building and tearing down page hashes
    // ------------------------------------------------------------------

    /// Hash every record of the page under the index's currently
    /// recommended prefix. Memory exhaustion quietly leaves the page
    /// unhashed.
    pub fn build_page_hash(&self, index: &IndexDef, space: SpaceId, page_no: PageNo) {
        if !self.is_enabled() {
            return;
        }
        let prefix = self.search_info(index.id).get_recommended_prefix();
        let params = PageHashState {
            n_fields: prefix.n_fields,
            n_bytes: prefix.n_bytes,
            side: prefix.side,
        };
        self.build_page_hash_with_params(index, space, page_no, params);
    }

    fn build_page_hash_with_params(
        &self,
        index: &IndexDef,
        space: SpaceId,
        page_no: PageNo,
        params: PageHashState,
    ) {
        if params.n_fields == 0 && params.n_bytes == 0 {
            return;
        }
        self.register_index(index);
        let Some(page_arc) = self.pool.get_page(space, page_no) else {
            return;
        };

        if page_arc.read().hash_state().is_some_and(|s| s != params) {
            // Hashed under stale parameters; tear that down first.
            self.drop_page_hash_index(space, page_no);
        }

        let mut page = page_arc.write();
        if page.hash_state() == Some(params) {
            return;
        }
        let entries = page_hash_entries(&page, index, params);
        page.set_hash_state(params);
        // Per the latch order, the page latch is released before the
        // search latch is taken; the entries were computed under the
        // page latch and stale ones are caught at probe time.
        drop(page);

        let table = self.latch.write();
        for &(fold, ptr) in &entries {
            if table.insert(fold, ptr).is_err() {
                // Arena exhausted: unhash this page and give up, the
                // operation itself must not fail.
                for &(f, _) in &entries {
                    table.remove_all_nodes_pointing_to_page(f, space, page_no);
                }
                drop(table);
                page_arc.write().clear_hash_state();
                tracing::debug!(space, page_no, "adaptive hash build ran out of memory");
                return;
            }
        }
    }

    /// Drop all hash entries of a page and unmark it.
    pub fn drop_page_hash_index(&self, space: SpaceId, page_no: PageNo) {
        let Some(page_arc) = self.pool.get_page(space, page_no) else {
            return;
        };
        let mut page = page_arc.write();
        let Some(state) = page.hash_state() else {
            return;
        };
        let tree_id = page.index_id;
        let folds: Vec<u64> = page
            .records()
            .iter()
            .map(|rec| self.fold_for_page(rec.fields.as_slice(), state, tree_id))
            .collect();
        // Clear the mark first so concurrent record operations stop
        // producing new entries for this page.
        page.clear_hash_state();
        drop(page);

        let table = self.latch.write();
        for fold in folds {
            table.remove_all_nodes_pointing_to_page(fold, space, page_no);
        }
    }

    /// Called by the segment allocator when a page leaves the buffer
    /// pool for the free list.
    pub fn drop_page_hash_when_freed(&self, space: SpaceId, page_no: PageNo) {
        self.drop_page_hash_index(space, page_no);
    }

    /// After records moved from `old` to `new` (typically a page split):
    /// if `new` is already hashed the old page's hash is stale and is
    /// dropped; otherwise, if `old` was hashed, `new` is hashed under
    /// the same parameters.
    pub fn move_or_delete_hash_entries(
        &self,
        index: &IndexDef,
        old: (SpaceId, PageNo),
        new: (SpaceId, PageNo),
    ) {
        let new_hashed = self
            .pool
            .get_page(new.0, new.1)
            .is_some_and(|p| p.read().is_hashed());
        if new_hashed {
            self.drop_page_hash_index(old.0, old.1);
            return;
        }
        let old_state = self.pool.get_page(old.0, old.1).and_then(|p| p.read().hash_state());
        if let Some(params) = old_state {
            self.build_page_hash_with_params(index, new.0, new.1, params);
        }
    }

    // ------------------------------------------------------------------
    // Incremental maintenance
    // ------------------------------------------------------------------

    /// Update the page hash after a record was inserted next to the
    /// cursor position. Only the folds around the insertion point are
    /// touched.
    pub fn update_hash_on_insert(&self, index: &IndexDef, cursor: &BtrCursor, ins_heap_no: HeapNo) {
        let Some(page_arc) = self.pool.get_page(cursor.space, cursor.page_no) else {
            return;
        };
        let page = page_arc.read();
        let Some(state) = page.hash_state() else {
            return;
        };
        let Some(pos) = page.position_of(ins_heap_no) else {
            return;
        };
        let tree_id = page.index_id;
        debug_assert_eq!(tree_id, index.id);
        let fold_of = |rec: &crate::record::Record| self.fold_for_page(&rec.fields, state, tree_id);
        let ptr_of =
            |rec: &crate::record::Record| RecPtr::new(cursor.space, cursor.page_no, rec.heap_no);

        let ins = &page.records()[pos];
        let ins_fold = fold_of(ins);
        let prev = if pos > 0 { Some(&page.records()[pos - 1]) } else { None };
        let next = page.records().get(pos + 1);
        let left_side = state.side == HashSide::Left;

        let mut inserts: Vec<(u64, RecPtr)> = Vec::new();
        match prev {
            None => {
                if left_side {
                    inserts.push((ins_fold, ptr_of(ins)));
                }
            }
            Some(prev) => {
                let prev_fold = fold_of(prev);
                if prev_fold != ins_fold {
                    if left_side {
                        // The new record starts a run.
                        inserts.push((ins_fold, ptr_of(ins)));
                    } else {
                        // The previous record now closes its run.
                        inserts.push((prev_fold, ptr_of(prev)));
                    }
                }
            }
        }
        match next {
            None => {
                if !left_side {
                    inserts.push((ins_fold, ptr_of(ins)));
                }
            }
            Some(next) => {
                let next_fold = fold_of(next);
                if next_fold != ins_fold {
                    if left_side {
                        inserts.push((next_fold, ptr_of(next)));
                    } else {
                        inserts.push((ins_fold, ptr_of(ins)));
                    }
                }
            }
        }
        drop(page);

        if inserts.is_empty() {
            return;
        }
        let table = self.latch.write();
        for (fold, ptr) in inserts {
            if table.insert(fold, ptr).is_err() {
                // Non-fatal; the stale entry is caught at probe time.
                return;
            }
        }
    }

    /// Cheap variant for an insert that replaces a just-deleted record
    /// at the same position with the same hashed prefix: only the
    /// node's data pointer is rewritten. Falls back to the full
    /// neighbourhood update when the folds differ.
    pub fn update_hash_node_on_insert(
        &self,
        index: &IndexDef,
        cursor: &BtrCursor,
        ins_heap_no: HeapNo,
    ) {
        let Some(page_arc) = self.pool.get_page(cursor.space, cursor.page_no) else {
            return;
        };
        let page = page_arc.read();
        let Some(state) = page.hash_state() else {
            return;
        };
        let tree_id = page.index_id;
        let (Some(cursor_rec), Some(ins_rec)) = (
            page.record_by_heap_no(cursor.heap_no),
            page.record_by_heap_no(ins_heap_no),
        ) else {
            drop(page);
            self.update_hash_on_insert(index, cursor, ins_heap_no);
            return;
        };
        let old_fold = self.fold_for_page(&cursor_rec.fields, state, tree_id);
        let ins_fold = self.fold_for_page(&ins_rec.fields, state, tree_id);
        if old_fold != ins_fold || state.side != HashSide::Right {
            drop(page);
            self.update_hash_on_insert(index, cursor, ins_heap_no);
            return;
        }
        let old_ptr = RecPtr::new(cursor.space, cursor.page_no, cursor.heap_no);
        let new_ptr = RecPtr::new(cursor.space, cursor.page_no, ins_heap_no);
        drop(page);

        let table = self.latch.write();
        if !table.lookup_and_update_if_found(ins_fold, old_ptr, new_ptr) {
            drop(table);
            self.update_hash_on_insert(index, cursor, ins_heap_no);
        }
    }

    /// Remove the hash entry of the record the cursor stands on, ahead
    /// of its deletion from the page.
    pub fn update_hash_on_delete(&self, _index: &IndexDef, cursor: &BtrCursor) {
        let Some(page_arc) = self.pool.get_page(cursor.space, cursor.page_no) else {
            return;
        };
        let page = page_arc.read();
        let Some(state) = page.hash_state() else {
            return;
        };
        let Some(rec) = page.record_by_heap_no(cursor.heap_no) else {
            return;
        };
        let fold = self.fold_for_page(&rec.fields, state, page.index_id);
        let ptr = RecPtr::new(cursor.space, cursor.page_no, cursor.heap_no);
        drop(page);

        let table = self.latch.write();
        table.search_and_delete_if_found(fold, ptr);
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    /// Check that every node's data pointer still refers to a record
    /// whose current prefix hashes to the node's fold. On a violation
    /// the adaptive hash is disabled process-wide.
    pub fn validate(&self, cancel: Option<&CancelToken>) -> Result<bool> {
        {
            let table = self.latch.read();
            if !table.validate(cancel)? {
                tracing::error!("adaptive hash table failed structural validation; disabling");
                self.disable();
                return Ok(false);
            }
        }

        let mut entries: Vec<(u64, RecPtr)> = Vec::new();
        self.latch.read().for_each(|fold, ptr| entries.push((fold, ptr)));

        for (fold, ptr) in entries {
            if let Some(token) = cancel {
                if token.is_cancelled() {
                    return Err(crate::error::DbError::Cancelled(
                        "adaptive hash validation".to_string(),
                    ));
                }
            }
            let ok = self.pool.get_page(ptr.space, ptr.page_no).is_some_and(|page_arc| {
                let page = page_arc.read();
                let Some(state) = page.hash_state() else {
                    return false;
                };
                let Some(rec) = page.record_by_heap_no(ptr.heap_no) else {
                    return false;
                };
                self.fold_for_page(&rec.fields, state, page.index_id) == fold
            });
            if !ok {
                tracing::error!(
                    fold,
                    space = ptr.space,
                    page_no = ptr.page_no,
                    heap_no = ptr.heap_no,
                    "dangling adaptive hash node; disabling adaptive hash"
                );
                self.disable();
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Hash table occupancy, for diagnostics.
    pub fn hash_stats(&self) -> HashTableStats {
        self.latch.read().stats()
    }
}

fn binary_types(n: usize) -> Vec<crate::record::FieldType> {
    vec![crate::record::FieldType::Binary; n]
}

/// Select the hash entries for a page: one per equal-fold run, taking
/// the leftmost or rightmost record per the side parameter. Later
/// upserts on the same fold keep the invariant of one node per fold.
fn page_hash_entries(
    page: &Page,
    index: &IndexDef,
    params: PageHashState,
) -> Vec<(u64, RecPtr)> {
    let mut entries: Vec<(u64, RecPtr)> = Vec::with_capacity(page.n_records());
    let mut last_fold: Option<u64> = None;
    for rec in page.records() {
        let fold = fold_record(
            &rec.fields,
            &index.field_types,
            params.n_fields,
            params.n_bytes,
            index.id,
        );
        let ptr = RecPtr::new(page.space, page.page_no, rec.heap_no);
        match params.side {
            HashSide::Left => {
                if last_fold != Some(fold) {
                    entries.push((fold, ptr));
                }
            }
            HashSide::Right => {
                if last_fold == Some(fold) {
                    // Replace the previous representative of this run.
                    entries.pop();
                }
                entries.push((fold, ptr));
            }
        }
        last_fold = Some(fold);
    }
    entries
}

/// Verify a hash candidate against its page under the caller's search
/// mode. Returns a fully filled cursor on success.
fn check_guess(
    page: &Page,
    heap_no: HeapNo,
    tuple: &Tuple,
    mode: PageCur,
    index: &IndexDef,
) -> Option<BtrCursor> {
    let rec = page.record_by_heap_no(heap_no)?;
    let cmp = cmp_tuple_record(tuple, rec, &index.field_types);
    if cmp.incomparable {
        return None;
    }

    let mut cursor = BtrCursor::at(page.space, page.page_no, heap_no);
    cursor.modify_clock = page.modify_clock();
    cursor.from_hash = true;
    cursor.low_match = cmp.matched_fields;
    cursor.low_bytes = cmp.matched_bytes;

    let neighbour_cmp = |neighbour: Option<&crate::record::Record>| {
        neighbour.map(|n| cmp_tuple_record(tuple, n, &index.field_types))
    };

    match mode {
        PageCur::E => {
            if cmp.ordering != CmpOrdering::Equal {
                return None;
            }
            cursor.up_match = cmp.matched_fields;
            cursor.up_bytes = cmp.matched_bytes;
        }
        PageCur::Le => {
            // rec <= tuple, and the next record must be > tuple. On the
            // page edge the true successor is unknowable: fail.
            if cmp.ordering == CmpOrdering::Less {
                return None;
            }
            let next = neighbour_cmp(page.next_record(heap_no))?;
            if next.incomparable || next.ordering != CmpOrdering::Less {
                return None;
            }
            cursor.up_match = next.matched_fields;
            cursor.up_bytes = next.matched_bytes;
        }
        PageCur::L => {
            // rec < tuple, next >= tuple.
            if cmp.ordering != CmpOrdering::Greater {
                return None;
            }
            let next = neighbour_cmp(page.next_record(heap_no))?;
            if next.incomparable || next.ordering == CmpOrdering::Greater {
                return None;
            }
            cursor.up_match = next.matched_fields;
            cursor.up_bytes = next.matched_bytes;
        }
        PageCur::Ge => {
            // rec >= tuple, previous < tuple.
            if cmp.ordering == CmpOrdering::Greater {
                return None;
            }
            let prev = neighbour_cmp(page.prev_record(heap_no))?;
            if prev.incomparable || prev.ordering != CmpOrdering::Greater {
                return None;
            }
        }
        PageCur::G => {
            // rec > tuple, previous <= tuple.
            if cmp.ordering != CmpOrdering::Less {
                return None;
            }
            let prev = neighbour_cmp(page.prev_record(heap_no))?;
            if prev.incomparable || prev.ordering == CmpOrdering::Less {
                return None;
            }
        }
    }
    Some(cursor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Value;
    use crate::record::FieldType;

    fn setup() -> (Arc<BufferPool>, AdaptiveSearchSystem, IndexDef) {
        let pool = Arc::new(BufferPool::new());
        let config = Config::default();
        let system = AdaptiveSearchSystem::new(Arc::clone(&pool), &config);
        let index = IndexDef::new(7, 0, vec![FieldType::Integer], 1);
        (pool, system, index)
    }

    fn int_fields(k: i64) -> Vec<RecField> {
        vec![RecField::new(Value::Integer(k))]
    }

    fn populate(pool: &BufferPool, page_no: PageNo, keys: &[i64]) {
        let page = pool.create_page(0, page_no, 7);
        let mut guard = page.write();
        for &k in keys {
            guard.append_record(int_fields(k));
        }
    }

    #[test]
    fn test_build_probe_drop_cycle() {
        let (pool, system, index) = setup();
        populate(&pool, 1, &[5, 7]);

        let tuple = Tuple::new(vec![Value::Integer(5)]);
        assert!(system.guess_on_hash(&index, &tuple, PageCur::E).is_none());

        system.build_page_hash(&index, 0, 1);
        let cursor = system.guess_on_hash(&index, &tuple, PageCur::E).unwrap();
        let page = pool.get_page(0, 1).unwrap();
        let rec = page.read().record_by_heap_no(cursor.heap_no).cloned().unwrap();
        assert_eq!(rec.fields[0].value, Value::Integer(5));
        assert!(cursor.from_hash);

        system.drop_page_hash_index(0, 1);
        assert!(system.guess_on_hash(&index, &tuple, PageCur::E).is_none());
        assert_eq!(system.hash_stats().n_nodes, 0);
    }

    #[test]
    fn test_probe_miss_for_absent_key() {
        let (pool, system, index) = setup();
        populate(&pool, 1, &[5, 7]);
        system.build_page_hash(&index, 0, 1);
        let tuple = Tuple::new(vec![Value::Integer(6)]);
        assert!(system.guess_on_hash(&index, &tuple, PageCur::E).is_none());
    }

    #[test]
    fn test_le_mode_fills_match_lengths() {
        let (pool, system, index) = setup();
        populate(&pool, 1, &[5, 7]);
        system.build_page_hash(&index, 0, 1);
        let tuple = Tuple::new(vec![Value::Integer(5)]);
        let cursor = system.guess_on_hash(&index, &tuple, PageCur::Le).unwrap();
        assert_eq!(cursor.low_match, 1);
        assert_eq!(cursor.up_match, 0);
    }

    #[test]
    fn test_page_edge_fails_le_guess() {
        let (pool, system, index) = setup();
        populate(&pool, 1, &[5, 7]);
        system.build_page_hash(&index, 0, 1);
        // k=7 is the last record; its successor may live on another page.
        let tuple = Tuple::new(vec![Value::Integer(7)]);
        assert!(system.guess_on_hash(&index, &tuple, PageCur::Le).is_none());
    }

    #[test]
    fn test_probe_after_page_modification_not_stale() {
        let (pool, system, index) = setup();
        populate(&pool, 1, &[5, 7]);
        system.build_page_hash(&index, 0, 1);
        let tuple = Tuple::new(vec![Value::Integer(5)]);
        let before = system.guess_on_hash(&index, &tuple, PageCur::E).unwrap();

        // Delete k=5 through the maintenance path.
        let page_arc = pool.get_page(0, 1).unwrap();
        let heap_no = before.heap_no;
        let cursor = BtrCursor::at(0, 1, heap_no);
        system.update_hash_on_delete(&index, &cursor);
        page_arc.write().delete_record(heap_no);

        // Never a stale hit: either a miss, or a hit on a live record.
        match system.guess_on_hash(&index, &tuple, PageCur::E) {
            None => {}
            Some(c) => {
                let page = page_arc.read();
                assert!(page.record_by_heap_no(c.heap_no).is_some());
            }
        }
    }

    #[test]
    fn test_update_hash_on_insert_maintains_entries() {
        let (pool, system, index) = setup();
        populate(&pool, 1, &[5, 9]);
        system.build_page_hash(&index, 0, 1);

        let page_arc = pool.get_page(0, 1).unwrap();
        let prev_heap = page_arc.read().records()[0].heap_no;
        let ins_heap = page_arc
            .write()
            .insert_after(Some(prev_heap), int_fields(7))
            .unwrap();
        let cursor = BtrCursor::at(0, 1, prev_heap);
        system.update_hash_on_insert(&index, &cursor, ins_heap);

        let tuple = Tuple::new(vec![Value::Integer(7)]);
        let hit = system.guess_on_hash(&index, &tuple, PageCur::E).unwrap();
        assert_eq!(hit.heap_no, ins_heap);
        assert!(system.validate(None).unwrap());
    }

    #[test]
    fn test_move_entries_on_split() {
        let (pool, system, index) = setup();
        populate(&pool, 1, &[1, 2, 3, 4]);
        system.build_page_hash(&index, 0, 1);

        // Split: move the upper half to page 2.
        let old_arc = pool.get_page(0, 1).unwrap();
        let new_arc = pool.create_page(0, 2, 7);
        {
            let mut old = old_arc.write();
            let moved: Vec<_> = old.records()[2..].to_vec();
            for rec in moved.iter() {
                old.delete_record(rec.heap_no);
            }
            let mut new = new_arc.write();
            for rec in moved {
                new.append_record(rec.fields);
            }
        }
        system.move_or_delete_hash_entries(&index, (0, 1), (0, 2));
        assert!(new_arc.read().is_hashed());

        let tuple = Tuple::new(vec![Value::Integer(4)]);
        let hit = system.guess_on_hash(&index, &tuple, PageCur::E).unwrap();
        assert_eq!(hit.page_no, 2);
    }

    #[test]
    fn test_freed_page_leaves_no_nodes() {
        let (pool, system, index) = setup();
        populate(&pool, 1, &[5, 7]);
        system.build_page_hash(&index, 0, 1);
        assert!(system.hash_stats().n_nodes > 0);
        system.drop_page_hash_when_freed(0, 1);
        pool.remove_page(0, 1);
        assert_eq!(system.hash_stats().n_nodes, 0);
        assert!(system.validate(None).unwrap());
    }

    #[test]
    fn test_validate_detects_dangling_node_and_disables() {
        let (pool, system, index) = setup();
        populate(&pool, 1, &[5, 7]);
        system.build_page_hash(&index, 0, 1);
        // Free the page behind the hash's back.
        pool.remove_page(0, 1);
        assert!(!system.validate(None).unwrap());
        assert!(!system.is_enabled());
        // All probes now short-circuit.
        let tuple = Tuple::new(vec![Value::Integer(5)]);
        assert!(system.guess_on_hash(&index, &tuple, PageCur::E).is_none());
    }

    #[test]
    fn test_disabled_by_config() {
        let pool = Arc::new(BufferPool::new());
        let config = Config {
            adaptive_hash_index: false,
            ..Config::default()
        };
        let system = AdaptiveSearchSystem::new(Arc::clone(&pool), &config);
        let index = IndexDef::new(7, 0, vec![FieldType::Integer], 1);
        populate(&pool, 1, &[5]);
        system.build_page_hash(&index, 0, 1);
        assert_eq!(system.hash_stats().n_nodes, 0);
        let tuple = Tuple::new(vec![Value::Integer(5)]);
        assert!(system.guess_on_hash(&index, &tuple, PageCur::E).is_none());
    }

    #[test]
    fn test_right_side_indexes_run_tail() {
        let (pool, system, index) = setup();
        // Duplicate prefixes under a 1-field hash.
        populate(&pool, 1, &[5, 5, 5, 8]);
        let params = PageHashState {
            n_fields: 1,
            n_bytes: 0,
            side: HashSide::Right,
        };
        system.build_page_hash_with_params(&index, 0, 1, params);
        let page = pool.get_page(0, 1).unwrap();
        let last_dup = page.read().records()[2].heap_no;
        let tuple = Tuple::new(vec![Value::Integer(5)]);
        let hit = system.guess_on_hash(&index, &tuple, PageCur::E).unwrap();
        assert_eq!(hit.heap_no, last_dup);
    }
}
