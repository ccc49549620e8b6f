// Chained hash table with striped mutexes.
//
// Maps a record-prefix fold to the page/slot that last satisfied a
// matching lookup. Chains are external; nodes live in per-stripe arenas
// so allocation is amortised O(1) and a whole table frees en masse. The
// table holds weak record references only: the referent's lifetime is
// guaranteed by the adaptive-search latch discipline, never by the table.

use parking_lot::{Mutex, MutexGuard};

use crate::common::{HeapNo, PageNo, SpaceId};
use crate::error::{DbError, Result};
use crate::index::CancelToken;

/// Weak reference to a record: the page and the stable slot within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecPtr {
    pub space: SpaceId,
    pub page_no: PageNo,
    pub heap_no: HeapNo,
}

impl RecPtr {
    pub fn new(space: SpaceId, page_no: PageNo, heap_no: HeapNo) -> Self {
        Self {
            space,
            page_no,
            heap_no,
        }
    }

    /// True if the referent lies within the given page's extent.
    #[inline]
    pub fn in_page(&self, space: SpaceId, page_no: PageNo) -> bool {
        self.space == space && self.page_no == page_no
    }
}

/// Chain terminator / free-slot marker
const NIL: u32 = u32::MAX;

/// Arena grows in blocks of this many nodes.
const ARENA_BLOCK: usize = 256;

#[derive(Debug, Clone, Copy)]
struct HashNode {
    fold: u64,
    data: RecPtr,
    next: u32,
}

/// One stripe: the cells it owns plus its node arena.
#[derive(Debug)]
struct Stripe {
    /// First node of each owned cell's chain, `NIL` if empty
    cells: Vec<u32>,
    nodes: Vec<HashNode>,
    free: Vec<u32>,
    n_live: usize,
}

impl Stripe {
    fn new(n_cells: usize) -> Self {
        Self {
            cells: vec![NIL; n_cells],
            nodes: Vec::new(),
            free: Vec::new(),
            n_live: 0,
        }
    }

    fn alloc(&mut self, node: HashNode, limit: usize) -> Result<u32> {
        if self.n_live >= limit {
            return Err(DbError::OutOfMemory(
                "hash node arena exhausted".to_string(),
            ));
        }
        self.n_live += 1;
        if let Some(idx) = self.free.pop() {
            self.nodes[idx as usize] = node;
            return Ok(idx);
        }
        if self.nodes.len() == self.nodes.capacity() {
            self.nodes.reserve_exact(ARENA_BLOCK);
        }
        let idx = self.nodes.len() as u32;
        self.nodes.push(node);
        Ok(idx)
    }

    fn release(&mut self, idx: u32) {
        self.nodes[idx as usize].next = NIL;
        self.free.push(idx);
        self.n_live -= 1;
    }
}

/// Aggregate table statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashTableStats {
    pub n_cells: u64,
    pub n_nodes: usize,
    pub used_cells: u64,
    pub longest_chain: usize,
}

/// Striped chained hash table keyed by fold.
#[derive(Debug)]
pub struct HashTable {
    /// Number of cells; a prime slightly above the requested capacity
    n_cells: u64,
    /// Power-of-two stripe count; stripe `i` owns cells `c % M == i`
    stripe_mask: u64,
    stripes: Vec<Mutex<Stripe>>,
    /// Per-stripe node cap standing in for allocator failure
    node_limit: usize,
}

impl HashTable {
    /// Create a table with at least `n` cells, partitioned over
    /// `n_stripes` mutexes (rounded up to a power of two).
    pub fn new(n: usize, n_stripes: usize) -> Self {
        Self::with_node_limit(n, n_stripes, usize::MAX)
    }

    /// As `new`, with a per-stripe cap on live nodes. The cap models
    /// arena allocation failure for testing the out-of-memory path.
    pub fn with_node_limit(n: usize, n_stripes: usize, node_limit: usize) -> Self {
        let n_cells = next_prime(n.max(2) as u64);
        let m = n_stripes.max(1).next_power_of_two() as u64;
        let stripes = (0..m)
            .map(|i| {
                // Cells owned by stripe i: {c < n_cells : c % m == i}.
                let owned = (n_cells.saturating_sub(i) + m - 1) / m;
                Mutex::new(Stripe::new(owned as usize))
            })
            .collect();
        Self {
            n_cells,
            stripe_mask: m - 1,
            stripes,
            node_limit,
        }
    }

    pub fn n_cells(&self) -> u64 {
        self.n_cells
    }

    #[inline]
    fn cell_of(&self, fold: u64) -> u64 {
        fold % self.n_cells
    }

    #[inline]
    fn stripe_of(&self, cell: u64) -> (usize, usize) {
        let stripe = (cell & self.stripe_mask) as usize;
        let local = (cell >> self.stripe_mask.trailing_ones()) as usize;
        (stripe, local)
    }

    fn lock_for(&self, fold: u64) -> (MutexGuard<'_, Stripe>, usize) {
        let cell = self.cell_of(fold);
        let (stripe, local) = self.stripe_of(cell);
        (self.stripes[stripe].lock(), local)
    }

    /// Data pointer of the first chain node with this fold, if any.
    /// Ties are broken by insertion order.
    pub fn lookup(&self, fold: u64) -> Option<RecPtr> {
        let (stripe, local) = self.lock_for(fold);
        let mut cur = stripe.cells[local];
        while cur != NIL {
            let node = &stripe.nodes[cur as usize];
            if node.fold == fold {
                return Some(node.data);
            }
            cur = node.next;
        }
        None
    }

    /// Rewrite the data pointer of the node matching `(fold, old_data)`,
    /// atomically within the stripe. Returns true if found.
    pub fn lookup_and_update_if_found(&self, fold: u64, old_data: RecPtr, new_data: RecPtr) -> bool {
        let (mut stripe, local) = self.lock_for(fold);
        let mut cur = stripe.cells[local];
        while cur != NIL {
            let node = &mut stripe.nodes[cur as usize];
            if node.fold == fold && node.data == old_data {
                node.data = new_data;
                return true;
            }
            cur = node.next;
        }
        false
    }

    /// Insert an entry. If a node with the same fold already exists in
    /// the chain, its data pointer is rewritten and no node is created,
    /// so a chain never carries two nodes for one fold. Fails only if
    /// the node arena cannot be extended.
    pub fn insert(&self, fold: u64, data: RecPtr) -> Result<()> {
        let limit = self.node_limit;
        let (mut stripe, local) = self.lock_for(fold);
        let mut cur = stripe.cells[local];
        while cur != NIL {
            let node = &mut stripe.nodes[cur as usize];
            if node.fold == fold {
                node.data = data;
                return Ok(());
            }
            cur = node.next;
        }
        let head = stripe.cells[local];
        let idx = stripe.alloc(
            HashNode {
                fold,
                data,
                next: NIL,
            },
            limit,
        )?;
        // Append at chain tail to keep insertion-order lookup ties.
        if head == NIL {
            stripe.cells[local] = idx;
        } else {
            let mut tail = head;
            while stripe.nodes[tail as usize].next != NIL {
                tail = stripe.nodes[tail as usize].next;
            }
            stripe.nodes[tail as usize].next = idx;
        }
        Ok(())
    }

    /// Delete the entry matching `(fold, data)`. The entry must exist.
    pub fn delete(&self, fold: u64, data: RecPtr) -> Result<()> {
        if self.search_and_delete_if_found(fold, data) {
            Ok(())
        } else {
            debug_assert!(false, "hash delete of nonexistent node");
            Err(DbError::Internal(format!(
                "hash delete of nonexistent node, fold {fold}"
            )))
        }
    }

    /// Delete the entry matching `(fold, data)` if present.
    pub fn search_and_delete_if_found(&self, fold: u64, data: RecPtr) -> bool {
        let (mut stripe, local) = self.lock_for(fold);
        let mut prev = NIL;
        let mut cur = stripe.cells[local];
        while cur != NIL {
            let node = stripe.nodes[cur as usize];
            if node.fold == fold && node.data == data {
                if prev == NIL {
                    stripe.cells[local] = node.next;
                } else {
                    stripe.nodes[prev as usize].next = node.next;
                }
                stripe.release(cur);
                return true;
            }
            prev = cur;
            cur = node.next;
        }
        false
    }

    /// Excise every node in fold's chain whose data pointer lies within
    /// the given page. A no-op on an empty chain.
    pub fn remove_all_nodes_pointing_to_page(&self, fold: u64, space: SpaceId, page_no: PageNo) {
        let (mut stripe, local) = self.lock_for(fold);
        let mut prev = NIL;
        let mut cur = stripe.cells[local];
        while cur != NIL {
            let node = stripe.nodes[cur as usize];
            if node.data.in_page(space, page_no) {
                if prev == NIL {
                    stripe.cells[local] = node.next;
                } else {
                    stripe.nodes[prev as usize].next = node.next;
                }
                stripe.release(cur);
            } else {
                prev = cur;
            }
            cur = node.next;
        }
    }

    /// Apply `f` to every `(fold, data)` entry. Locks one stripe at a
    /// time.
    pub fn for_each(&self, mut f: impl FnMut(u64, RecPtr)) {
        for stripe in &self.stripes {
            let stripe = stripe.lock();
            for &head in &stripe.cells {
                let mut cur = head;
                while cur != NIL {
                    let node = &stripe.nodes[cur as usize];
                    f(node.fold, node.data);
                    cur = node.next;
                }
            }
        }
    }

    /// Number of live nodes.
    pub fn n_nodes(&self) -> usize {
        self.stripes.iter().map(|s| s.lock().n_live).sum()
    }

    /// Verify chain well-formedness and that every node is reachable via
    /// its own fold. Acquires all stripes in index order. The token is
    /// checked between cells so a long validation can be abandoned.
    pub fn validate(&self, cancel: Option<&CancelToken>) -> Result<bool> {
        let guards: Vec<MutexGuard<'_, Stripe>> =
            self.stripes.iter().map(|s| s.lock()).collect();
        let m = self.stripe_mask + 1;
        for cell in 0..self.n_cells {
            if let Some(token) = cancel {
                if token.is_cancelled() {
                    return Err(DbError::Cancelled("hash table validation".to_string()));
                }
            }
            let stripe_idx = (cell & self.stripe_mask) as usize;
            let local = (cell / m) as usize;
            let stripe = &guards[stripe_idx];
            let mut seen = 0usize;
            let mut cur = stripe.cells[local];
            while cur != NIL {
                let node = &stripe.nodes[cur as usize];
                // Every node must hash to the cell that chains it.
                if self.cell_of(node.fold) != cell {
                    return Ok(false);
                }
                seen += 1;
                if seen > stripe.n_live {
                    // Chain longer than the stripe's live node count:
                    // the chain must contain a cycle.
                    return Ok(false);
                }
                cur = node.next;
            }
        }
        Ok(true)
    }

    /// Occupancy summary, for diagnostics.
    pub fn stats(&self) -> HashTableStats {
        let mut n_nodes = 0usize;
        let mut used_cells = 0u64;
        let mut longest_chain = 0usize;
        for stripe in &self.stripes {
            let stripe = stripe.lock();
            n_nodes += stripe.n_live;
            for &head in &stripe.cells {
                if head == NIL {
                    continue;
                }
                used_cells += 1;
                let mut len = 0usize;
                let mut cur = head;
                while cur != NIL {
                    len += 1;
                    cur = stripe.nodes[cur as usize].next;
                }
                longest_chain = longest_chain.max(len);
            }
        }
        HashTableStats {
            n_cells: self.n_cells,
            n_nodes,
            used_cells,
            longest_chain,
        }
    }
}

/// Smallest prime >= n.
fn next_prime(n: u64) -> u64 {
    fn is_prime(x: u64) -> bool {
        if x < 2 {
            return false;
        }
        if x % 2 == 0 {
            return x == 2;
        }
        let mut d = 3;
        while d * d <= x {
            if x % d == 0 {
                return false;
            }
            d += 2;
        }
        true
    }
    let mut candidate = n;
    while !is_prime(candidate) {
        candidate += 1;
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ptr(page_no: PageNo, heap_no: HeapNo) -> RecPtr {
        RecPtr::new(0, page_no, heap_no)
    }

    #[test]
    fn test_next_prime() {
        assert_eq!(next_prime(2), 2);
        assert_eq!(next_prime(10), 11);
        assert_eq!(next_prime(100), 101);
        assert_eq!(next_prime(4096), 4099);
    }

    #[test]
    fn test_insert_lookup_delete() {
        let table = HashTable::new(64, 4);
        table.insert(17, ptr(1, 0)).unwrap();
        table.insert(42, ptr(1, 1)).unwrap();
        assert_eq!(table.lookup(17), Some(ptr(1, 0)));
        assert_eq!(table.lookup(42), Some(ptr(1, 1)));
        assert_eq!(table.lookup(99), None);
        table.delete(17, ptr(1, 0)).unwrap();
        assert_eq!(table.lookup(17), None);
        assert_eq!(table.n_nodes(), 1);
    }

    #[test]
    fn test_insert_same_fold_upserts() {
        let table = HashTable::new(64, 4);
        table.insert(17, ptr(1, 0)).unwrap();
        table.insert(17, ptr(1, 5)).unwrap();
        assert_eq!(table.lookup(17), Some(ptr(1, 5)));
        assert_eq!(table.n_nodes(), 1);
    }

    #[test]
    fn test_delete_missing_fails_loudly() {
        let table = HashTable::new(64, 4);
        table.insert(17, ptr(1, 0)).unwrap();
        // Wrong data pointer: the precondition does not hold.
        let result =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| table.delete(17, ptr(1, 9))));
        match result {
            Ok(r) => assert!(r.is_err()),
            Err(_) => {} // debug_assert tripped
        }
    }

    #[test]
    fn test_lookup_and_update_if_found() {
        let table = HashTable::new(64, 4);
        table.insert(17, ptr(1, 0)).unwrap();
        assert!(table.lookup_and_update_if_found(17, ptr(1, 0), ptr(2, 3)));
        assert_eq!(table.lookup(17), Some(ptr(2, 3)));
        assert!(!table.lookup_and_update_if_found(17, ptr(1, 0), ptr(2, 4)));
    }

    #[test]
    fn test_remove_all_nodes_pointing_to_page() {
        let table = HashTable::new(4, 2);
        let n_cells = table.n_cells();
        // Two folds in the same cell, pointing at different pages.
        let f1 = 3u64;
        let f2 = 3 + n_cells;
        table.insert(f1, ptr(7, 0)).unwrap();
        table.insert(f2, ptr(8, 0)).unwrap();
        table.remove_all_nodes_pointing_to_page(f1, 0, 7);
        assert_eq!(table.lookup(f1), None);
        assert_eq!(table.lookup(f2), Some(ptr(8, 0)));
        // Empty chain: no-op.
        table.remove_all_nodes_pointing_to_page(f1, 0, 7);
    }

    #[test]
    fn test_validate_after_mutations() {
        let table = HashTable::new(128, 8);
        for i in 0..200u64 {
            table.insert(i * 31, ptr((i % 5) as PageNo, i as HeapNo)).unwrap();
        }
        for i in (0..200u64).step_by(3) {
            table.search_and_delete_if_found(i * 31, ptr((i % 5) as PageNo, i as HeapNo));
        }
        assert!(table.validate(None).unwrap());
    }

    #[test]
    fn test_validate_cancellation() {
        let table = HashTable::new(64, 4);
        let token = CancelToken::new();
        token.cancel();
        assert!(matches!(
            table.validate(Some(&token)),
            Err(DbError::Cancelled(_))
        ));
    }

    #[test]
    fn test_node_limit_out_of_memory() {
        let table = HashTable::with_node_limit(64, 1, 2);
        table.insert(1, ptr(1, 0)).unwrap();
        table.insert(2, ptr(1, 1)).unwrap();
        let err = table.insert(3, ptr(1, 2)).unwrap_err();
        assert!(matches!(err, DbError::OutOfMemory(_)));
        // Upsert of an existing fold still succeeds at the cap.
        table.insert(1, ptr(1, 9)).unwrap();
    }

    #[test]
    fn test_chain_tie_broken_by_insertion_order() {
        let table = HashTable::new(4, 1);
        let n_cells = table.n_cells();
        let f1 = 1u64;
        let f2 = 1 + n_cells; // same cell, different fold
        table.insert(f2, ptr(2, 0)).unwrap();
        table.insert(f1, ptr(1, 0)).unwrap();
        assert_eq!(table.lookup(f1), Some(ptr(1, 0)));
        assert_eq!(table.lookup(f2), Some(ptr(2, 0)));
    }

    #[test]
    fn test_stats() {
        let table = HashTable::new(16, 2);
        for i in 0..10u64 {
            table.insert(i, ptr(1, i as HeapNo)).unwrap();
        }
        let stats = table.stats();
        assert_eq!(stats.n_nodes, 10);
        assert!(stats.used_cells > 0);
        assert!(stats.longest_chain >= 1);
    }
}
