//! # Query Optimizer
//!
//! The physical-plan side of the optimizer: access-path trees, the cost
//! model that scores them, the finalisation pass that turns the chosen
//! plan into an executable one, and the derived-key synthesiser that
//! proposes and prunes keys on materialised derived tables.
//!
//! Join enumeration itself lives elsewhere; it consumes the estimators
//! here and produces trees of [`access_path::AccessPath`] nodes in a
//! per-compilation arena.

pub mod access_path;
pub mod cost_model;
pub mod derived_keys;
pub mod explain;
pub mod expr;
pub mod finalize;
pub mod relational;
pub mod trace;
pub mod walk;

pub use access_path::{AccessPath, AccessPathKind, PathArena, PathId};
pub use expr::{Expr, ReplacementMap};
pub use relational::{JoinKind, JoinPredicate, RelationalExpression};
pub use trace::OptimizerTrace;
pub use walk::{walk, WalkPolicy};

use crate::common::catalog::{Catalog, Table};
use crate::common::{table_map_bit, TableId, TableMap};
use crate::optimizer::access_path::Filesort;
use crate::storage::{HeapEngine, StorageEngine};
use crate::Config;

/// Identity of one query block's join plan. Used by the walker to stay
/// within a block and by stream/materialize operands to say where they
/// belong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JoinId(pub u32);

/// Handle to a filesort registered in the query context.
pub use access_path::FilesortId;

/// Compilation context of one query: the path arena, the catalog view,
/// the trace, and the resources registered for cleanup at query end.
pub struct QueryContext {
    pub config: Config,
    pub arena: PathArena,
    pub catalog: Catalog,
    pub trace: OptimizerTrace,
    pub engine: Box<dyn StorageEngine>,
    /// Temp tables created during finalisation, torn down with the query
    pub temp_tables: Vec<TableId>,
    /// Filesorts created during finalisation, freed with the query
    pub filesorts: Vec<Filesort>,
}

impl QueryContext {
    pub fn new(config: Config, catalog: Catalog) -> Self {
        let trace = OptimizerTrace::new(config.optimizer_trace, config.optimizer_trace_max_mem_size);
        Self {
            config,
            arena: PathArena::new(),
            catalog,
            trace,
            engine: Box::new(HeapEngine::new()),
            temp_tables: Vec::new(),
            filesorts: Vec::new(),
        }
    }

    pub fn table(&self, id: TableId) -> &Table {
        self.catalog.table(id)
    }

    pub fn register_filesort(&mut self, filesort: Filesort) -> FilesortId {
        let id = FilesortId(self.filesorts.len() as u32);
        self.filesorts.push(filesort);
        id
    }

    pub fn register_temp_table(&mut self, table: TableId) {
        self.temp_tables.push(table);
    }
}

/// One query block of the statement being compiled.
#[derive(Debug, Clone)]
pub struct QueryBlock {
    pub join: JoinId,
    /// Root access path once the optimizer picked a plan
    pub root: Option<PathId>,
    /// Base (and derived) tables of this block
    pub tables: Vec<TableId>,
    pub select_list: Vec<Expr>,
    pub group_by: Vec<Expr>,
    /// Value expressions of INSERT ... ON DUPLICATE KEY UPDATE
    pub update_values: Vec<Expr>,
    pub where_clause: Option<Expr>,
    /// Aggregation without GROUP BY (always one output row)
    pub is_implicitly_grouped: bool,
    /// GROUP BY ... WITH ROLLUP
    pub olap_rollup: bool,
    /// True when this block materialises the result of a set operation
    pub is_set_operation: bool,
    /// Cleared by `plan_finalize`; repeat calls are no-ops
    pub needs_finalize: bool,
}

impl QueryBlock {
    pub fn new(join: JoinId) -> Self {
        Self {
            join,
            root: None,
            tables: Vec::new(),
            select_list: Vec::new(),
            group_by: Vec::new(),
            update_values: Vec::new(),
            where_clause: None,
            is_implicitly_grouped: false,
            olap_rollup: false,
            is_set_operation: false,
            needs_finalize: true,
        }
    }

    /// Bitmap of this block's tables.
    pub fn table_map(&self) -> TableMap {
        self.tables.iter().fold(0, |m, &t| m | table_map_bit(t))
    }
}
