// # Index Module
//
// Storage-side search acceleration: the chained hash table, the
// per-index search info heuristics, and the adaptive hash index that
// ties them to the B-tree.

pub mod adaptive;
pub mod hash_table;
pub mod search_info;

pub use adaptive::AdaptiveSearchSystem;
pub use hash_table::{HashTable, HashTableStats, RecPtr};
pub use search_info::{RecommendedPrefix, SearchInfo};

use std::sync::atomic::{AtomicBool, Ordering};

use crate::common::{HeapNo, IndexId, PageNo, SpaceId};
use crate::record::FieldType;

/// Cooperative cancellation for long-running maintenance operations.
#[derive(Debug, Default)]
pub struct CancelToken {
    cancelled: AtomicBool,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// B-tree index identity as seen by the adaptive search system.
#[derive(Debug, Clone)]
pub struct IndexDef {
    /// Index id; doubles as the fingerprint tree id
    pub id: IndexId,
    pub space: SpaceId,
    /// Declared types of the index fields, in key order
    pub field_types: Vec<FieldType>,
    /// Number of leading fields that uniquely determine a record
    pub n_unique: usize,
}

impl IndexDef {
    pub fn new(id: IndexId, space: SpaceId, field_types: Vec<FieldType>, n_unique: usize) -> Self {
        Self {
            id,
            space,
            field_types,
            n_unique,
        }
    }
}

/// Comparison mode of a cursor positioning, mirroring the page-cursor
/// search modes of the B-tree layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageCur {
    /// Greatest record strictly less than the tuple
    L,
    /// Greatest record less than or equal to the tuple
    Le,
    /// Smallest record strictly greater than the tuple
    G,
    /// Smallest record greater than or equal to the tuple
    Ge,
    /// Exact match only
    E,
}

/// A tree-cursor position produced by a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BtrCursor {
    pub space: SpaceId,
    pub page_no: PageNo,
    pub heap_no: HeapNo,
    /// Fields matched against the record after the position
    pub up_match: usize,
    pub up_bytes: usize,
    /// Fields matched against the record at the position
    pub low_match: usize,
    pub low_bytes: usize,
    /// Page modify clock observed when the position was taken
    pub modify_clock: u64,
    /// True if the position was obtained through the hash index
    pub from_hash: bool,
}

impl BtrCursor {
    pub fn at(space: SpaceId, page_no: PageNo, heap_no: HeapNo) -> Self {
        Self {
            space,
            page_no,
            heap_no,
            up_match: 0,
            up_bytes: 0,
            low_match: 0,
            low_bytes: 0,
            modify_clock: 0,
            from_hash: false,
        }
    }
}
