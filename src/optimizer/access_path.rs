// Access paths: the nodes of a physical execution plan.
//
// A node is a discriminant plus a per-variant payload and a handful of
// shared cost fields. Nodes live in an arena owned by the query
// compilation and reference each other by index, so a candidate plan is
// replaced by overwriting a slot, with no destructor or refcount work.
// The discriminant stays observable: the cost model and the walker
// dispatch on it.

use crate::common::{TableId, TableMap};
use crate::optimizer::expr::{ColumnRef, Expr};
use crate::optimizer::relational::{JoinKind, JoinPredicate};
use crate::optimizer::JoinId;

/// Sentinel for a row count that has not been estimated yet.
pub const UNKNOWN_ROW_COUNT: f64 = -1.0;

/// Sentinel for a cost that has not been estimated yet.
pub const UNKNOWN_COST: f64 = -1.0;

/// Handle to a node in a `PathArena`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PathId(u32);

impl PathId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index lookup binding: which key is probed and with what terms.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyRef {
    pub table: TableId,
    pub key_idx: usize,
    /// Leading key parts bound by `terms`
    pub key_parts_used: usize,
    /// One equality partner expression per bound key part
    pub terms: Vec<Expr>,
}

/// Why a subtree is known to produce no rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZeroRowsCause(pub String);

/// Opaque descriptor of a set of index ranges
#[derive(Debug, Clone, PartialEq)]
pub struct RangeDescriptor {
    pub key_idx: usize,
    pub n_ranges: u32,
    /// Expected rows across all ranges
    pub expected_rows: f64,
}

/// Opaque per-row range chooser for dynamic range scans
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicRangeChooser {
    pub candidate_keys: Vec<usize>,
}

/// Sort key: expression plus direction
#[derive(Debug, Clone, PartialEq)]
pub struct SortKeyDef {
    pub expr: Expr,
    pub descending: bool,
}

impl SortKeyDef {
    pub fn asc(expr: Expr) -> Self {
        Self {
            expr,
            descending: false,
        }
    }
}

/// Filesort descriptor, registered with the query for cleanup
#[derive(Debug, Clone, PartialEq)]
pub struct Filesort {
    pub keys: Vec<SortKeyDef>,
    pub limit: Option<u64>,
    pub remove_duplicates: bool,
    /// False when some referenced column is missing from the projection
    /// and rows must be refetched by row id instead.
    pub use_addon_fields: bool,
    pub force_sort_rowids: bool,
}

/// Handle to a filesort registered in the query context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilesortId(pub u32);

/// Why a materialisation deduplicates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupReason {
    None,
    ForDistinct,
    ForGroupBy,
    ForUnion,
}

/// One projected expression copied into a temp-table column
#[derive(Debug, Clone, PartialEq)]
pub struct CopyItem {
    pub source: Expr,
    pub target: ColumnRef,
}

/// Temp-table binding of a materialising operator. `table` stays None
/// until the plan finaliser instantiates the table and fills
/// `copy_items`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TempTableParams {
    pub table: Option<TableId>,
    pub copy_items: Vec<CopyItem>,
    pub dedup_reason: DedupReason,
}

impl Default for DedupReason {
    fn default() -> Self {
        DedupReason::None
    }
}

/// One input operand of a materialisation
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializeOperand {
    pub subquery_path: PathId,
    /// Query block the operand belongs to
    pub join: JoinId,
    pub is_recursive_reference: bool,
    pub params: TempTableParams,
}

/// Parameters of a MATERIALIZE path
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializeParams {
    pub operands: Vec<MaterializeOperand>,
    /// Target temp table; None until finalisation
    pub table: Option<TableId>,
    /// Common-table-expression this materialisation implements, if any
    pub cte: Option<u32>,
    /// Paths that invalidate a cached materialisation
    pub invalidators: Vec<PathId>,
    pub limit: Option<u64>,
    pub reject_multiple_rows: bool,
    pub dedup_reason: DedupReason,
}

impl MaterializeParams {
    pub fn single(subquery_path: PathId, join: JoinId) -> Self {
        Self {
            operands: vec![MaterializeOperand {
                subquery_path,
                join,
                is_recursive_reference: false,
                params: TempTableParams::default(),
            }],
            table: None,
            cte: None,
            invalidators: Vec::new(),
            limit: None,
            reject_multiple_rows: false,
            dedup_reason: DedupReason::None,
        }
    }

    pub fn is_dedup(&self) -> bool {
        self.dedup_reason != DedupReason::None
    }
}

/// One appended operand of a UNION ALL
#[derive(Debug, Clone, PartialEq)]
pub struct AppendChild {
    pub path: PathId,
    pub join: JoinId,
}

/// The per-variant payload of an access path.
#[derive(Debug, Clone, PartialEq)]
pub enum AccessPathKind {
    TableScan {
        table: TableId,
    },
    IndexScan {
        table: TableId,
        key_idx: usize,
        use_order: bool,
        reverse: bool,
    },
    Ref {
        key: KeyRef,
        use_order: bool,
        reverse: bool,
    },
    RefOrNull {
        key: KeyRef,
        use_order: bool,
    },
    EqRef {
        key: KeyRef,
        use_order: bool,
    },
    PushedJoinRef {
        key: KeyRef,
        use_order: bool,
        is_unique: bool,
    },
    FullTextSearch {
        key: KeyRef,
        use_order: bool,
    },
    ConstTable {
        key: KeyRef,
    },
    Mrr {
        key: KeyRef,
        cache_condition: Option<Expr>,
        mrr_flags: u32,
        /// Back-link to the enclosing BKA join
        bka_path: Option<PathId>,
    },
    FollowTail {
        table: TableId,
    },
    IndexRangeScan {
        table: TableId,
        ranges: RangeDescriptor,
    },
    DynamicIndexRangeScan {
        table: TableId,
        chooser: DynamicRangeChooser,
    },
    TableValueConstructor,
    FakeSingleRow,
    ZeroRows {
        /// Unused subtree, kept for plan tracing
        child: Option<PathId>,
        cause: ZeroRowsCause,
    },
    ZeroRowsAggregated {
        cause: ZeroRowsCause,
    },
    MaterializedTableFunction {
        table: TableId,
        function_name: String,
        table_path: PathId,
    },
    UnqualifiedCount,
    NestedLoopJoin {
        outer: PathId,
        inner: PathId,
        join_kind: JoinKind,
        pfs_batch_mode: bool,
    },
    NestedLoopSemijoinWithDuplicateRemoval {
        outer: PathId,
        inner: PathId,
        table: TableId,
        key_idx: usize,
        key_len: u32,
    },
    BkaJoin {
        outer: PathId,
        inner: PathId,
        join_kind: JoinKind,
        mrr_length_per_rec: u32,
        store_rowids: bool,
        tables_to_get_rowid_for: TableMap,
    },
    HashJoin {
        /// Build side
        outer: PathId,
        /// Probe side
        inner: PathId,
        join_predicate: JoinPredicate,
        allow_spill_to_disk: bool,
        store_rowids: bool,
        tables_to_get_rowid_for: TableMap,
    },
    Filter {
        child: PathId,
        condition: Expr,
        materialize_subqueries: bool,
    },
    Sort {
        child: PathId,
        order: Vec<SortKeyDef>,
        filesort: Option<FilesortId>,
        tables_to_get_rowid_for: TableMap,
        remove_duplicates: bool,
        force_sort_rowids: bool,
        unwrap_rollup: bool,
        limit: Option<u64>,
    },
    Aggregate {
        child: PathId,
        rollup: bool,
    },
    TemptableAggregate {
        subquery_path: PathId,
        params: TempTableParams,
        table_path: PathId,
        ref_slice: u32,
    },
    LimitOffset {
        child: PathId,
        limit: u64,
        offset: u64,
        count_all_rows: bool,
        reject_multiple_rows: bool,
        send_records_override: Option<bool>,
    },
    Stream {
        child: PathId,
        join: JoinId,
        params: TempTableParams,
        ref_slice: u32,
        provide_rowid: bool,
    },
    Materialize {
        table_path: PathId,
        params: MaterializeParams,
    },
    MaterializeInformationSchemaTable {
        table_path: PathId,
        table: TableId,
        condition: Option<Expr>,
    },
    Append {
        children: Vec<AppendChild>,
    },
    Windowing {
        child: PathId,
        params: TempTableParams,
        ref_slice: u32,
        needs_buffering: bool,
    },
    Weedout {
        child: PathId,
        weedout_table: TableId,
        tables_to_get_rowid_for: TableMap,
    },
    RemoveDuplicates {
        child: PathId,
        table: TableId,
        key_idx: usize,
        loosescan_key_len: u32,
    },
    Alternative {
        child: PathId,
        table_scan_path: PathId,
        used_ref: KeyRef,
    },
    CacheInvalidator {
        child: PathId,
        name: String,
    },
}

/// One plan node: shared estimate fields plus the variant payload.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessPath {
    pub kind: AccessPathKind,
    pub num_output_rows: f64,
    pub cost: f64,
    pub init_cost: f64,
    pub init_once_cost: f64,
    pub count_examined_rows: bool,
    /// Runtime iterator attached to this node, once built
    pub iterator: Option<u32>,
}

impl AccessPath {
    pub fn new(kind: AccessPathKind) -> Self {
        Self {
            kind,
            num_output_rows: UNKNOWN_ROW_COUNT,
            cost: UNKNOWN_COST,
            init_cost: UNKNOWN_COST,
            init_once_cost: UNKNOWN_COST,
            count_examined_rows: false,
            iterator: None,
        }
    }

    pub fn set_estimates(&mut self, num_output_rows: f64, cost: f64) {
        self.num_output_rows = num_output_rows;
        self.cost = cost;
    }
}

/// Arena of access-path nodes for one query compilation.
#[derive(Debug, Default)]
pub struct PathArena {
    nodes: Vec<AccessPath>,
}

impl PathArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, path: AccessPath) -> PathId {
        let id = PathId(self.nodes.len() as u32);
        self.nodes.push(path);
        id
    }

    pub fn add_kind(&mut self, kind: AccessPathKind) -> PathId {
        self.add(AccessPath::new(kind))
    }

    pub fn node(&self, id: PathId) -> &AccessPath {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: PathId) -> &mut AccessPath {
        &mut self.nodes[id.index()]
    }

    /// Overwrite a slot with a different node. Enumeration relies on
    /// this being a plain store.
    pub fn replace(&mut self, id: PathId, path: AccessPath) {
        self.nodes[id.index()] = path;
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    // ------------------------------------------------------------------
    // Factory constructors
    // ------------------------------------------------------------------

    pub fn table_scan(&mut self, table: TableId) -> PathId {
        self.add_kind(AccessPathKind::TableScan { table })
    }

    pub fn index_scan(&mut self, table: TableId, key_idx: usize, use_order: bool, reverse: bool) -> PathId {
        self.add_kind(AccessPathKind::IndexScan {
            table,
            key_idx,
            use_order,
            reverse,
        })
    }

    pub fn ref_access(&mut self, key: KeyRef, use_order: bool, reverse: bool) -> PathId {
        self.add_kind(AccessPathKind::Ref {
            key,
            use_order,
            reverse,
        })
    }

    pub fn ref_or_null(&mut self, key: KeyRef, use_order: bool) -> PathId {
        self.add_kind(AccessPathKind::RefOrNull { key, use_order })
    }

    pub fn eq_ref(&mut self, key: KeyRef, use_order: bool) -> PathId {
        self.add_kind(AccessPathKind::EqRef { key, use_order })
    }

    pub fn pushed_join_ref(&mut self, key: KeyRef, use_order: bool, is_unique: bool) -> PathId {
        self.add_kind(AccessPathKind::PushedJoinRef {
            key,
            use_order,
            is_unique,
        })
    }

    pub fn full_text_search(&mut self, key: KeyRef, use_order: bool) -> PathId {
        self.add_kind(AccessPathKind::FullTextSearch { key, use_order })
    }

    pub fn const_table(&mut self, key: KeyRef) -> PathId {
        let mut path = AccessPath::new(AccessPathKind::ConstTable { key });
        // A const table is read once during optimisation.
        path.num_output_rows = 1.0;
        path.cost = 0.0;
        path.init_cost = 0.0;
        path.init_once_cost = 0.0;
        self.add(path)
    }

    pub fn mrr(&mut self, key: KeyRef, cache_condition: Option<Expr>, mrr_flags: u32) -> PathId {
        self.add_kind(AccessPathKind::Mrr {
            key,
            cache_condition,
            mrr_flags,
            bka_path: None,
        })
    }

    pub fn follow_tail(&mut self, table: TableId) -> PathId {
        self.add_kind(AccessPathKind::FollowTail { table })
    }

    pub fn index_range_scan(&mut self, table: TableId, ranges: RangeDescriptor) -> PathId {
        self.add_kind(AccessPathKind::IndexRangeScan { table, ranges })
    }

    pub fn dynamic_index_range_scan(&mut self, table: TableId, chooser: DynamicRangeChooser) -> PathId {
        self.add_kind(AccessPathKind::DynamicIndexRangeScan { table, chooser })
    }

    pub fn table_value_constructor(&mut self) -> PathId {
        self.add_kind(AccessPathKind::TableValueConstructor)
    }

    pub fn fake_single_row(&mut self) -> PathId {
        let mut path = AccessPath::new(AccessPathKind::FakeSingleRow);
        path.num_output_rows = 1.0;
        path.cost = 0.0;
        path.init_cost = 0.0;
        path.init_once_cost = 0.0;
        self.add(path)
    }

    pub fn zero_rows(&mut self, child: Option<PathId>, cause: impl Into<String>) -> PathId {
        let mut path = AccessPath::new(AccessPathKind::ZeroRows {
            child,
            cause: ZeroRowsCause(cause.into()),
        });
        path.num_output_rows = 0.0;
        path.cost = 0.0;
        path.init_cost = 0.0;
        path.init_once_cost = 0.0;
        self.add(path)
    }

    pub fn zero_rows_aggregated(&mut self, cause: impl Into<String>) -> PathId {
        let mut path = AccessPath::new(AccessPathKind::ZeroRowsAggregated {
            cause: ZeroRowsCause(cause.into()),
        });
        // Implicit aggregation of an empty input still emits one row.
        path.num_output_rows = 1.0;
        path.cost = 0.0;
        path.init_cost = 0.0;
        path.init_once_cost = 0.0;
        self.add(path)
    }

    pub fn materialized_table_function(
        &mut self,
        table: TableId,
        function_name: impl Into<String>,
        table_path: PathId,
    ) -> PathId {
        self.add_kind(AccessPathKind::MaterializedTableFunction {
            table,
            function_name: function_name.into(),
            table_path,
        })
    }

    pub fn unqualified_count(&mut self) -> PathId {
        let mut path = AccessPath::new(AccessPathKind::UnqualifiedCount);
        path.num_output_rows = 1.0;
        self.add(path)
    }

    pub fn nested_loop_join(&mut self, outer: PathId, inner: PathId, join_kind: JoinKind) -> PathId {
        self.add_kind(AccessPathKind::NestedLoopJoin {
            outer,
            inner,
            join_kind,
            pfs_batch_mode: false,
        })
    }

    pub fn nested_loop_semijoin_with_duplicate_removal(
        &mut self,
        outer: PathId,
        inner: PathId,
        table: TableId,
        key_idx: usize,
        key_len: u32,
    ) -> PathId {
        self.add_kind(AccessPathKind::NestedLoopSemijoinWithDuplicateRemoval {
            outer,
            inner,
            table,
            key_idx,
            key_len,
        })
    }

    pub fn bka_join(
        &mut self,
        outer: PathId,
        inner: PathId,
        join_kind: JoinKind,
        mrr_length_per_rec: u32,
        store_rowids: bool,
        tables_to_get_rowid_for: TableMap,
    ) -> PathId {
        self.add_kind(AccessPathKind::BkaJoin {
            outer,
            inner,
            join_kind,
            mrr_length_per_rec,
            store_rowids,
            tables_to_get_rowid_for,
        })
    }

    pub fn hash_join(&mut self, outer: PathId, inner: PathId, join_predicate: JoinPredicate) -> PathId {
        self.add_kind(AccessPathKind::HashJoin {
            outer,
            inner,
            join_predicate,
            allow_spill_to_disk: true,
            store_rowids: false,
            tables_to_get_rowid_for: 0,
        })
    }

    pub fn filter(&mut self, child: PathId, condition: Expr, materialize_subqueries: bool) -> PathId {
        self.add_kind(AccessPathKind::Filter {
            child,
            condition,
            materialize_subqueries,
        })
    }

    pub fn sort(&mut self, child: PathId, order: Vec<SortKeyDef>) -> PathId {
        self.add_kind(AccessPathKind::Sort {
            child,
            order,
            filesort: None,
            tables_to_get_rowid_for: 0,
            remove_duplicates: false,
            force_sort_rowids: false,
            unwrap_rollup: false,
            limit: None,
        })
    }

    pub fn aggregate(&mut self, child: PathId, rollup: bool) -> PathId {
        self.add_kind(AccessPathKind::Aggregate { child, rollup })
    }

    pub fn temptable_aggregate(
        &mut self,
        subquery_path: PathId,
        table_path: PathId,
        ref_slice: u32,
    ) -> PathId {
        self.add_kind(AccessPathKind::TemptableAggregate {
            subquery_path,
            params: TempTableParams {
                dedup_reason: DedupReason::ForGroupBy,
                ..TempTableParams::default()
            },
            table_path,
            ref_slice,
        })
    }

    pub fn limit_offset(&mut self, child: PathId, limit: u64, offset: u64) -> PathId {
        self.add_kind(AccessPathKind::LimitOffset {
            child,
            limit,
            offset,
            count_all_rows: false,
            reject_multiple_rows: false,
            send_records_override: None,
        })
    }

    pub fn stream(&mut self, child: PathId, join: JoinId) -> PathId {
        self.add_kind(AccessPathKind::Stream {
            child,
            join,
            params: TempTableParams::default(),
            ref_slice: 0,
            provide_rowid: false,
        })
    }

    pub fn materialize(&mut self, table_path: PathId, params: MaterializeParams) -> PathId {
        self.add_kind(AccessPathKind::Materialize { table_path, params })
    }

    pub fn materialize_information_schema_table(
        &mut self,
        table_path: PathId,
        table: TableId,
        condition: Option<Expr>,
    ) -> PathId {
        self.add_kind(AccessPathKind::MaterializeInformationSchemaTable {
            table_path,
            table,
            condition,
        })
    }

    pub fn append(&mut self, children: Vec<AppendChild>) -> PathId {
        self.add_kind(AccessPathKind::Append { children })
    }

    pub fn windowing(&mut self, child: PathId, ref_slice: u32, needs_buffering: bool) -> PathId {
        self.add_kind(AccessPathKind::Windowing {
            child,
            params: TempTableParams::default(),
            ref_slice,
            needs_buffering,
        })
    }

    pub fn weedout(&mut self, child: PathId, weedout_table: TableId) -> PathId {
        self.add_kind(AccessPathKind::Weedout {
            child,
            weedout_table,
            tables_to_get_rowid_for: 0,
        })
    }

    pub fn remove_duplicates(
        &mut self,
        child: PathId,
        table: TableId,
        key_idx: usize,
        loosescan_key_len: u32,
    ) -> PathId {
        self.add_kind(AccessPathKind::RemoveDuplicates {
            child,
            table,
            key_idx,
            loosescan_key_len,
        })
    }

    pub fn alternative(&mut self, child: PathId, table_scan_path: PathId, used_ref: KeyRef) -> PathId {
        self.add_kind(AccessPathKind::Alternative {
            child,
            table_scan_path,
            used_ref,
        })
    }

    pub fn cache_invalidator(&mut self, child: PathId, name: impl Into<String>) -> PathId {
        self.add_kind(AccessPathKind::CacheInvalidator {
            child,
            name: name.into(),
        })
    }
}
