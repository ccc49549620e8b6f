// BasaltDB - Access-path planner and adaptive hash search index
// Core library module

pub mod buffer;
pub mod common;
pub mod error;
pub mod index;
pub mod optimizer;
pub mod record;
pub mod storage;

pub use error::{DbError, Result};

/// Engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Enable the adaptive hash index. When off, all AHI probes
    /// short-circuit to a miss and no page hashes are built.
    pub adaptive_hash_index: bool,
    /// Number of cursor positionings without hash success before the
    /// prefix analysis runs again.
    pub hash_analysis_threshold: u32,
    /// Number of hash-table cells requested for the adaptive search system.
    pub adaptive_hash_cells: usize,
    /// Enable the unstructured optimizer trace.
    pub optimizer_trace: bool,
    /// Cap on the unstructured optimizer trace buffer, in bytes.
    pub optimizer_trace_max_mem_size: usize,
    /// Threshold used by the materialisation cost model to pick between
    /// in-memory and on-disk temp-table costs.
    pub max_heap_table_size: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            adaptive_hash_index: true,
            hash_analysis_threshold: index::search_info::BUILD_HASH_AFTER,
            adaptive_hash_cells: 4096,
            optimizer_trace: false,
            optimizer_trace_max_mem_size: 1024 * 1024,
            max_heap_table_size: 16 * 1024 * 1024,
        }
    }
}
