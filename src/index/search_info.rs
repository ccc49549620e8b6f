// Per-index search info.
//
// Advisory statistics that decide when an index earns a hash and which
// record prefix to hash. None of the fields are latched: they are
// relaxed atomics, torn reads are tolerated, and a wrong value costs at
// most a wasted or missed hash build, never correctness.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use crate::buffer::HashSide;
use crate::common::PageNo;
use crate::index::{BtrCursor, IndexDef};

/// Positionings without hash success before the prefix analysis runs.
pub const BUILD_HASH_AFTER: u32 = 17;

/// Consecutive potential hash successes before a page hash is built.
pub const HASH_SUCCESS_LIMIT: u32 = 3;

/// Consecutive identical search patterns before a pattern shortcut is
/// attempted.
pub const PATTERN_LIMIT: u32 = 3;

const SEARCH_INFO_MAGIC: u32 = 0x0010_fb65;

const NO_ROOT_GUESS: u64 = u64::MAX;

/// The currently recommended hash prefix for an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecommendedPrefix {
    /// Number of complete fields to hash
    pub n_fields: usize,
    /// Bytes of the following field to hash
    pub n_bytes: usize,
    /// Which record of an equal-prefix run to index
    pub side: HashSide,
}

/// Search info attached to one index.
#[derive(Debug)]
pub struct SearchInfo {
    magic: u32,
    /// Best-effort cache of the index root page
    root_guess: AtomicU64,
    /// Positionings since the last analysis or recommendation change
    hash_analysis: AtomicU32,
    /// Whether the last search did, or would have, succeeded on hash
    last_hash_succ: AtomicBool,
    /// Consecutive searches the hash would have answered
    n_hash_potential: AtomicU32,
    n_fields: AtomicUsize,
    n_bytes: AtomicUsize,
    side_right: AtomicBool,
    // Performance counters
    n_hash_succ: AtomicU64,
    n_hash_fail: AtomicU64,
    n_patt_succ: AtomicU64,
    n_searches: AtomicU64,
}

impl Default for SearchInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchInfo {
    pub fn new() -> Self {
        Self {
            magic: SEARCH_INFO_MAGIC,
            root_guess: AtomicU64::new(NO_ROOT_GUESS),
            hash_analysis: AtomicU32::new(0),
            last_hash_succ: AtomicBool::new(false),
            n_hash_potential: AtomicU32::new(0),
            n_fields: AtomicUsize::new(1),
            n_bytes: AtomicUsize::new(0),
            side_right: AtomicBool::new(false),
            n_hash_succ: AtomicU64::new(0),
            n_hash_fail: AtomicU64::new(0),
            n_patt_succ: AtomicU64::new(0),
            n_searches: AtomicU64::new(0),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == SEARCH_INFO_MAGIC
    }

    pub fn root_guess(&self) -> Option<PageNo> {
        match self.root_guess.load(Ordering::Relaxed) {
            NO_ROOT_GUESS => None,
            v => Some(v as PageNo),
        }
    }

    pub fn set_root_guess(&self, page_no: PageNo) {
        self.root_guess.store(page_no as u64, Ordering::Relaxed);
    }

    /// The currently recommended hash prefix. The three loads are
    /// independent, so a concurrent update may be observed half-applied;
    /// callers treat the result as a hint.
    pub fn recommended(&self) -> RecommendedPrefix {
        RecommendedPrefix {
            n_fields: self.n_fields.load(Ordering::Relaxed),
            n_bytes: self.n_bytes.load(Ordering::Relaxed),
            side: if self.side_right.load(Ordering::Relaxed) {
                HashSide::Right
            } else {
                HashSide::Left
            },
        }
    }

    fn set_recommended(&self, prefix: RecommendedPrefix) {
        self.n_fields.store(prefix.n_fields, Ordering::Relaxed);
        self.n_bytes.store(prefix.n_bytes, Ordering::Relaxed);
        self.side_right
            .store(prefix.side == HashSide::Right, Ordering::Relaxed);
    }

    /// Derive a prefix recommendation from the cursor's match geometry.
    /// The prefix must be long enough to separate the searched position
    /// from its neighbours; the side says whether runs of equal prefixes
    /// are entered from the left or the right.
    fn recommend_from_cursor(&self, cursor: &BtrCursor, index: &IndexDef) -> RecommendedPrefix {
        let n_uniq = index.n_unique.max(1);
        if cursor.up_match >= n_uniq || cursor.low_match >= n_uniq {
            return RecommendedPrefix {
                n_fields: n_uniq,
                n_bytes: 0,
                side: HashSide::Left,
            };
        }
        if cursor.up_match > cursor.low_match {
            RecommendedPrefix {
                n_fields: (cursor.up_match + 1).min(n_uniq),
                n_bytes: 0,
                side: HashSide::Right,
            }
        } else if cursor.up_match < cursor.low_match {
            RecommendedPrefix {
                n_fields: (cursor.low_match + 1).min(n_uniq),
                n_bytes: 0,
                side: HashSide::Left,
            }
        } else if cursor.up_bytes != cursor.low_bytes {
            // Same field count but different byte match: discriminate on
            // a byte prefix of the next field.
            RecommendedPrefix {
                n_fields: cursor.up_match,
                n_bytes: cursor.up_bytes.max(cursor.low_bytes) + 1,
                side: HashSide::Left,
            }
        } else {
            RecommendedPrefix {
                n_fields: (cursor.up_match + 1).min(n_uniq),
                n_bytes: 0,
                side: HashSide::Left,
            }
        }
    }

    /// Called on every leaf positioning. Returns true when the caller
    /// should build the hash for the cursor's page: the recommendation
    /// has been stable for `HASH_SUCCESS_LIMIT` consecutive positionings
    /// that the hash could have answered.
    pub fn update_on_position(
        &self,
        cursor: &BtrCursor,
        index: &IndexDef,
        analysis_threshold: u32,
    ) -> bool {
        self.n_searches.fetch_add(1, Ordering::Relaxed);
        let analysis = self.hash_analysis.fetch_add(1, Ordering::Relaxed) + 1;
        if analysis < analysis_threshold {
            return false;
        }

        let new = self.recommend_from_cursor(cursor, index);
        let current = self.recommended();
        if new != current {
            // The access pattern shifted: adopt the new recommendation,
            // reset the analysis clock and start counting afresh.
            self.set_recommended(new);
            self.hash_analysis.store(0, Ordering::Relaxed);
            self.n_hash_potential.store(1, Ordering::Relaxed);
            return false;
        }

        // The position could have been obtained with the recommended
        // prefix; another consecutive potential success.
        let potential = self.n_hash_potential.fetch_add(1, Ordering::Relaxed) + 1;
        potential >= HASH_SUCCESS_LIMIT
    }

    /// §4.3 accessor: the prefix the adaptive hash should use.
    pub fn get_recommended_prefix(&self) -> RecommendedPrefix {
        self.recommended()
    }

    pub fn note_hash_success(&self) {
        self.last_hash_succ.store(true, Ordering::Relaxed);
        self.n_hash_succ.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_hash_failure(&self) {
        self.last_hash_succ.store(false, Ordering::Relaxed);
        self.n_hash_fail.fetch_add(1, Ordering::Relaxed);
        self.n_hash_potential.store(0, Ordering::Relaxed);
    }

    pub fn note_pattern_success(&self) {
        self.n_patt_succ.fetch_add(1, Ordering::Relaxed);
    }

    pub fn last_hash_succ(&self) -> bool {
        self.last_hash_succ.load(Ordering::Relaxed)
    }

    pub fn n_hash_potential(&self) -> u32 {
        self.n_hash_potential.load(Ordering::Relaxed)
    }

    pub fn n_searches(&self) -> u64 {
        self.n_searches.load(Ordering::Relaxed)
    }

    pub fn n_hash_succ(&self) -> u64 {
        self.n_hash_succ.load(Ordering::Relaxed)
    }

    pub fn n_hash_fail(&self) -> u64 {
        self.n_hash_fail.load(Ordering::Relaxed)
    }
}
