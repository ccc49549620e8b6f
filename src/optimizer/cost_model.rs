// Cost model for access paths.
//
// Row-count and cost estimators per path variant, plus the primitives
// they share: row read cost, index height, distinct-row estimation,
// rollup and semijoin fan-out. Every estimator is a pure function of
// the node and its children's already-computed estimates, and writes
// its result into the node in place.
//
// The constants were calibrated against a reference workload on the
// default storage engine; other engines will want a re-calibration
// pass.

use crate::common::catalog::{Catalog, Table};
use crate::common::{table_map_bit, TableId};
use crate::optimizer::access_path::{
    AccessPathKind, PathArena, PathId, RangeDescriptor, SortKeyDef, UNKNOWN_COST,
    UNKNOWN_ROW_COUNT,
};
use crate::optimizer::expr::{ColumnRef, Expr, SubqueryStrategy};
use crate::optimizer::relational::{JoinKind, JoinPredicate};
use crate::optimizer::trace::OptimizerTrace;
use crate::optimizer::{QueryBlock, QueryContext};

// ============================================================================
// Cost Constants
// ============================================================================

pub const READ_ONE_ROW_COST: f64 = 0.1;
pub const READ_ONE_FIELD_COST: f64 = 0.01;
pub const READ_ONE_BYTE_COST: f64 = 0.00025;
pub const APPLY_ONE_FILTER_COST: f64 = 0.05;
pub const MATERIALIZE_ONE_ROW_COST: f64 = 0.1;
pub const AGGREGATE_ONE_ROW_COST: f64 = 0.05;
pub const WINDOW_ONE_ROW_COST: f64 = 0.1;
pub const SORT_ONE_ROW_COST: f64 = 0.1;

/// Index lookups are modelled as a 50/50 blend of a constant-cost model
/// (lookups served from cache or the adaptive hash) and a model linear
/// in the index height (cold lookups).
pub const INDEX_LOOKUP_FIXED_COST: f64 = 1.0;
pub const INDEX_LOOKUP_PAGE_COST: f64 = 1.0;
/// Lookup cost charged when the engine has no primary key to descend.
pub const INDEX_LOOKUP_DEFAULT_COST: f64 = 2.0;

/// Per-row read cost of a temp table, by backing store.
pub const MEMORY_TEMPTABLE_ROW_COST: f64 = 0.1;
pub const DISK_TEMPTABLE_ROW_COST: f64 = 1.0;

pub const MIN_ESTIMATED_BYTES_PER_ROW: u32 = 8;
pub const MAX_ESTIMATED_BYTES_PER_ROW: u32 = 16384;

/// Stand-in row estimate when statistics are absent.
pub const ROW_ESTIMATE_FALLBACK: f64 = 1000.0;

const REF_ACCESS_COST_DISCOUNT: f64 = 0.05;

// ============================================================================
// Row-Size and Lookup Primitives
// ============================================================================

/// Server-side bytes per row, clamped to the calibrated range.
pub fn estimate_bytes_per_row_table(table: &Table) -> u32 {
    table
        .record_buffer_length
        .clamp(MIN_ESTIMATED_BYTES_PER_ROW, MAX_ESTIMATED_BYTES_PER_ROW)
}

/// Bytes per row in a secondary index: the key plus the primary-key
/// image the engine stores alongside it.
pub fn estimate_bytes_per_row_index(table: &Table, key_idx: usize) -> u32 {
    let estimate = table.key_info[key_idx].key_length + table.ref_length;
    estimate.clamp(MIN_ESTIMATED_BYTES_PER_ROW, MAX_ESTIMATED_BYTES_PER_ROW)
}

/// Height of a B-tree index: the smallest positive h such that
/// `records <= (1 + records_per_page)^h`.
pub fn index_height(table: &Table, key_idx: usize) -> i32 {
    const MIN_ESTIMATED_BLOCK_SIZE: u32 = 4096;
    const MAX_ESTIMATED_BLOCK_SIZE: u32 = 65536;
    let block_size = table
        .stats
        .block_size
        .clamp(MIN_ESTIMATED_BLOCK_SIZE, MAX_ESTIMATED_BLOCK_SIZE);
    let bytes_per_row = if table.is_clustered_primary_key(key_idx) {
        estimate_bytes_per_row_table(table)
    } else {
        estimate_bytes_per_row_index(table, key_idx)
    };
    let records_per_page = (f64::from(block_size) / f64::from(bytes_per_row)).max(1.0);

    let mut height = 1;
    let mut reach = 1.0 + records_per_page;
    while reach < table.stats.records {
        reach *= 1.0 + records_per_page;
        height += 1;
    }
    height
}

/// Expected cost of reading `num_rows` rows. Linear, and robust to
/// fractional row estimates.
pub fn row_read_cost(num_rows: f64, fields_read_per_row: f64, bytes_per_row: f64) -> f64 {
    (READ_ONE_ROW_COST
        + READ_ONE_FIELD_COST * fields_read_per_row
        + READ_ONE_BYTE_COST * bytes_per_row)
        * num_rows
}

pub fn row_read_cost_table(table: &Table, num_rows: f64) -> f64 {
    row_read_cost(
        num_rows,
        f64::from(table.read_set_fields),
        f64::from(estimate_bytes_per_row_table(table)),
    )
}

pub fn row_read_cost_index(table: &Table, key_idx: usize, num_rows: f64) -> f64 {
    if table.is_clustered_primary_key(key_idx) {
        return row_read_cost_table(table, num_rows);
    }
    // A non-covering index read touches only the key and the row
    // reference; the real cost is dominated by the primary lookup.
    const DEFAULT_FIELDS_READ_FROM_COVERING_INDEX: f64 = 2.0;
    let fields_read_per_row = if table.is_covering_key(key_idx) {
        f64::from(table.read_set_fields)
    } else {
        DEFAULT_FIELDS_READ_FROM_COVERING_INDEX
    };
    row_read_cost(
        num_rows,
        fields_read_per_row,
        f64::from(estimate_bytes_per_row_index(table, key_idx)),
    )
}

pub fn estimate_table_scan_cost(table: &Table) -> f64 {
    row_read_cost_table(table, table.stats.records)
}

pub fn index_lookup_cost(table: &Table, key_idx: usize) -> f64 {
    debug_assert!(key_idx < table.key_info.len());
    let cost_with_hash = INDEX_LOOKUP_FIXED_COST;
    let cost_without_hash = INDEX_LOOKUP_PAGE_COST * f64::from(index_height(table, key_idx));
    0.5 * (cost_with_hash + cost_without_hash)
}

pub fn estimate_index_range_scan_cost(
    table: &Table,
    key_idx: usize,
    num_ranges: f64,
    num_output_rows: f64,
) -> f64 {
    let mut cost = num_ranges * index_lookup_cost(table, key_idx)
        + row_read_cost_index(table, key_idx, num_output_rows);

    if !table.is_clustered_primary_key(key_idx) && !table.is_covering_key(key_idx) {
        // Non-covering secondary index: one primary lookup per match.
        let lookup_cost = match table.primary_key {
            None => INDEX_LOOKUP_DEFAULT_COST,
            Some(pk) => index_lookup_cost(table, pk),
        };
        cost += num_output_rows * lookup_cost + row_read_cost_table(table, num_output_rows);
    }
    cost
}

pub fn estimate_index_scan_cost(table: &Table, key_idx: usize) -> f64 {
    estimate_index_range_scan_cost(table, key_idx, 1.0, table.stats.records)
}

/// Ref accesses get a small discount so the optimizer prefers unique
/// lookups over range scans on cost ties.
pub fn estimate_ref_access_cost(table: &Table, key_idx: usize, num_output_rows: f64) -> f64 {
    (1.0 - REF_ACCESS_COST_DISCOUNT)
        * estimate_index_range_scan_cost(table, key_idx, 1.0, num_output_rows)
}

// ============================================================================
// Distinct-Row Estimation
// ============================================================================

/// Blend `f_low` below `lower_limit` into `f_high` above `upper_limit`
/// linearly, so composed estimates stay continuous in their argument.
/// Discontinuities would distort cost comparison between plans whose
/// inputs differ only by rounding.
pub fn smooth_transition(
    f_low: impl Fn(f64) -> f64,
    mut f_high: impl FnMut(f64) -> f64,
    lower_limit: f64,
    upper_limit: f64,
    argument: f64,
) -> f64 {
    debug_assert!(upper_limit > lower_limit);
    if argument <= lower_limit {
        f_low(argument)
    } else if argument >= upper_limit {
        f_high(argument)
    } else {
        let high_fraction = (argument - lower_limit) / (upper_limit - lower_limit);
        f_low(argument) * (1.0 - high_fraction) + f_high(argument) * high_fraction
    }
}

/// Finds disjoint subsets of the terms that form prefixes of some
/// non-hash index and estimates their distinct counts from
/// records-per-key metadata.
struct AggregateRowEstimator<'a> {
    catalog: &'a Catalog,
    terms: &'a [Expr],
    consumed: u64,
}

impl<'a> AggregateRowEstimator<'a> {
    fn new(catalog: &'a Catalog, terms: &'a [Expr]) -> Self {
        Self {
            catalog,
            terms,
            consumed: 0,
        }
    }

    fn consumed_terms(&self) -> u64 {
        self.consumed
    }

    fn term_matches(&self, term_idx: usize, table: TableId, field: u32) -> bool {
        if self.consumed & (1 << term_idx) != 0 {
            return false;
        }
        matches!(
            &self.terms[term_idx],
            Expr::Column(c) if c.table == table && c.field == field
        )
    }

    /// Estimate for the longest remaining key prefix, or None when no
    /// index prefix matches any unconsumed terms.
    fn make_next_estimate(&mut self, trace: &mut OptimizerTrace) -> Option<f64> {
        let mut best: Option<(TableId, usize, Vec<usize>)> = None;

        let mut tables_seen = 0u64;
        for term in self.terms {
            let Expr::Column(c) = term else { continue };
            if tables_seen & table_map_bit(c.table) != 0 {
                continue;
            }
            tables_seen |= table_map_bit(c.table);

            let table = self.catalog.table(c.table);
            for (key_idx, key) in table.key_info.iter().enumerate() {
                if key.hash_dedup {
                    continue;
                }
                let mut matched = Vec::new();
                for part in &key.parts {
                    let found = (0..self.terms.len())
                        .find(|&i| self.term_matches(i, c.table, part.field));
                    match found {
                        Some(i) => matched.push(i),
                        None => break,
                    }
                }
                // Usable only as far as the engine kept prefix stats.
                while !matched.is_empty() && key.records_per_prefix(matched.len()).is_none() {
                    matched.pop();
                }
                let best_len = best.as_ref().map_or(0, |(_, _, m)| m.len());
                if matched.len() > best_len {
                    best = Some((c.table, key_idx, matched));
                }
            }
        }

        let (table_id, key_idx, matched) = best?;
        if matched.is_empty() {
            return None;
        }
        for &i in &matched {
            self.consumed |= 1 << i;
        }
        let table = self.catalog.table(table_id);
        let key = &table.key_info[key_idx];
        let rows_per_prefix = key.records_per_prefix(matched.len()).unwrap_or(1.0);
        let distinct = (table.stats.records / rows_per_prefix.max(1.0)).max(1.0);
        if trace.is_started() {
            trace.note(format!(
                "Estimating {distinct:.1} distinct values from prefix of index '{}' on '{}'.",
                key.name, table.name
            ));
        }
        Some(distinct)
    }
}

/// Distinct-combination estimate from index metadata and histograms.
/// Individual estimates for disjoint term subsets are multiplied and
/// then damped, since the terms may be correlated.
pub fn estimate_distinct_rows_from_statistics(
    catalog: &Catalog,
    trace: &mut OptimizerTrace,
    terms: &[Expr],
    child_rows: f64,
) -> f64 {
    let mut output_rows = 1.0;
    let mut estimate_count = 0usize;
    let mut top_estimate = 1.0_f64;

    let mut index_estimator = AggregateRowEstimator::new(catalog, terms);
    while let Some(distinct) = index_estimator.make_next_estimate(trace) {
        top_estimate = top_estimate.max(distinct);
        output_rows *= distinct;
        estimate_count += 1;
    }

    let consumed = index_estimator.consumed_terms();
    let mut remaining_terms = terms.len() - consumed.count_ones() as usize;

    for (i, term) in terms.iter().enumerate() {
        if consumed & (1 << i) != 0 {
            continue;
        }
        let Expr::Column(c) = term else { continue };
        let table = catalog.table(c.table);
        let distinct = match table.histogram(c.field) {
            None => {
                let estimate = table.stats.records.sqrt();
                if trace.is_started() {
                    trace.note(format!(
                        "Estimating {estimate:.1} distinct values for field '{}' from table size.",
                        column_name(table, c.field)
                    ));
                }
                estimate
            }
            Some(histogram) => {
                let mut estimate = histogram.get_num_distinct_values();
                if histogram.get_null_values_fraction() > 0.0 {
                    // NULLs form their own distinct combination.
                    estimate += 1.0;
                }
                if trace.is_started() {
                    trace.note(format!(
                        "Estimating {estimate:.1} distinct values for field '{}' from histogram.",
                        column_name(table, c.field)
                    ));
                }
                estimate
            }
        };
        top_estimate = top_estimate.max(distinct);
        output_rows *= distinct;
        remaining_terms -= 1;
        estimate_count += 1;
    }

    // Damp the product: multiplying estimates over dependent terms
    // yields too many rows.
    output_rows = top_estimate * (output_rows / top_estimate).powf(0.67);

    // Terms that are not simple fields contribute a diminishing share
    // of the input rows each.
    let r = remaining_terms as f64;
    let non_field_values = child_rows.powf(r / (r + 1.0));
    output_rows *= non_field_values;

    if estimate_count > 1 || (estimate_count == 1 && remaining_terms > 0) {
        output_rows = output_rows.min(child_rows.powf(0.9));
    } else {
        output_rows = output_rows.min(child_rows);
    }

    if trace.is_started() {
        trace.note(format!(
            "Estimating {non_field_values:.1} distinct values for {remaining_terms} non-field terms and {output_rows:.1} in total."
        ));
    }
    output_rows
}

fn column_name(table: &Table, field: u32) -> String {
    table
        .columns
        .get(field as usize)
        .map_or_else(|| format!("f{field}"), |c| c.name.clone())
}

/// Number of distinct combinations of `terms` over `child_rows` input
/// rows. Continuous in `child_rows`.
pub fn estimate_distinct_rows(
    catalog: &Catalog,
    trace: &mut OptimizerTrace,
    child_rows: f64,
    terms: &[Expr],
) -> f64 {
    if terms.is_empty() {
        // DISTINCT/GROUP BY on a constant gives at most one row.
        return child_rows.min(1.0);
    }
    if child_rows < 1.0 {
        return child_rows;
    }
    const SIMPLE_LIMIT: f64 = 10.0;
    smooth_transition(
        |input_rows: f64| input_rows.sqrt(),
        |input_rows: f64| estimate_distinct_rows_from_statistics(catalog, trace, terms, input_rows),
        SIMPLE_LIMIT,
        SIMPLE_LIMIT * 1.1,
        child_rows,
    )
}

// ============================================================================
// Rollup and Aggregation
// ============================================================================

/// Cheap rollup estimate for small result sets: assume each of the g
/// terms has k^(1/g) distinct values and sum the geometric series
/// 1 + m + m^2 + ... + m^(g-1) with m = k^(1/g).
pub fn estimate_rollup_rows_primitively(aggregate_rows: f64, grouping_expressions: usize) -> f64 {
    let g = grouping_expressions as f64;
    smooth_transition(
        // Near one input row the series formula divides by zero.
        |input_rows: f64| input_rows * g,
        |input_rows: f64| {
            let multiplier = input_rows.powf(1.0 / g);
            (1.0 - input_rows) / (1.0 - multiplier)
        },
        1.01,
        1.02,
        aggregate_rows,
    )
}

/// Precise rollup estimate for larger sets: sum distinct-row estimates
/// over each strict prefix of the group list.
pub fn estimate_rollup_rows_advanced(
    catalog: &Catalog,
    trace: &mut OptimizerTrace,
    aggregate_rows: f64,
    terms: &[Expr],
) -> f64 {
    let mut rollup_rows = 1.0;
    let mut prefix = terms.len();
    while prefix > 1 {
        prefix -= 1;
        if trace.is_started() {
            trace.note(format!("Estimating row count for ROLLUP on {prefix} terms."));
        }
        rollup_rows +=
            estimate_distinct_rows_from_statistics(catalog, trace, &terms[..prefix], aggregate_rows);
    }
    rollup_rows
}

/// Output rows of an aggregation, including rollup rows when requested.
pub fn estimate_aggregate_rows(
    catalog: &Catalog,
    trace: &mut OptimizerTrace,
    child_rows: f64,
    query_block: &QueryBlock,
    rollup: bool,
) -> f64 {
    if query_block.is_implicitly_grouped {
        return 1.0;
    }
    if child_rows < 1.0 {
        return child_rows;
    }
    let terms: Vec<Expr> = query_block.group_by.iter().map(Expr::unwrap_rollup).collect();
    if trace.is_started() {
        trace.note(format!(
            "Estimating row count for aggregation on {} terms.",
            terms.len()
        ));
    }
    let output_rows = estimate_distinct_rows(catalog, trace, child_rows, &terms);
    if !rollup {
        return output_rows;
    }

    const SIMPLE_ROLLUP_LIMIT: f64 = 50.0;
    output_rows
        + smooth_transition(
            |aggregate_rows: f64| estimate_rollup_rows_primitively(aggregate_rows, terms.len()),
            |aggregate_rows: f64| {
                estimate_rollup_rows_advanced(catalog, trace, aggregate_rows, &terms)
            },
            SIMPLE_ROLLUP_LIMIT,
            SIMPLE_ROLLUP_LIMIT * 1.1,
            output_rows,
        )
}

// ============================================================================
// Filter Cost
// ============================================================================

/// Cost of evaluating a filter once per row, with and without
/// materialising its contained subqueries.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FilterCost {
    /// Cost of the filter with subqueries evaluated per row
    pub cost_if_not_materialized: f64,
    /// Initial cost in the non-materialised case
    pub init_cost_if_not_materialized: f64,
    /// Per-evaluation cost once subqueries are materialised
    pub cost_if_materialized: f64,
    /// One-time cost of materialising the subqueries
    pub cost_to_materialize: f64,
}

/// Estimate the cost of applying `condition` to `num_rows` rows,
/// accounting for contained subqueries by strategy.
pub fn estimate_filter_cost(
    arena: &PathArena,
    max_heap_table_size: u64,
    num_rows: f64,
    condition: &Expr,
) -> FilterCost {
    let mut cost = FilterCost {
        cost_if_not_materialized: num_rows * APPLY_ONE_FILTER_COST,
        cost_if_materialized: num_rows * APPLY_ONE_FILTER_COST,
        ..FilterCost::default()
    };
    condition.for_each_subquery(&mut |subquery| {
        let path = arena.node(subquery.path);
        let subquery_cost = path.cost.max(0.0);
        match subquery.strategy {
            SubqueryStrategy::Materializable => {
                let in_memory =
                    f64::from(subquery.row_width) * num_rows < max_heap_table_size as f64;
                let row_cost = if in_memory {
                    MEMORY_TEMPTABLE_ROW_COST
                } else {
                    DISK_TEMPTABLE_ROW_COST
                };
                cost.cost_if_materialized += num_rows * row_cost;
                cost.cost_to_materialize +=
                    subquery_cost + MATERIALIZE_ONE_ROW_COST * path.num_output_rows.max(0.0);
                cost.cost_if_not_materialized += num_rows * subquery_cost;
            }
            SubqueryStrategy::NonMaterializable => {
                cost.cost_if_not_materialized += num_rows * subquery_cost;
                cost.cost_if_materialized += num_rows * subquery_cost;
            }
            SubqueryStrategy::IndependentSingleRow => {
                cost.cost_if_materialized += subquery_cost;
                cost.cost_if_not_materialized += subquery_cost;
                cost.init_cost_if_not_materialized += subquery_cost;
            }
        }
    });
    cost
}

// ============================================================================
// Per-Variant Estimators
// ============================================================================

/// Clamp a row estimate to be non-negative; external statistics can
/// hand us garbage. The clamp is recorded in the trace.
fn clamp_row_count(rows: f64, trace: &mut OptimizerTrace) -> f64 {
    if rows < 0.0 && rows != UNKNOWN_ROW_COUNT {
        if trace.is_started() {
            trace.note(format!("Clamping negative row estimate {rows:.1} to 0."));
        }
        return 0.0;
    }
    rows
}

pub fn estimate_sort_cost(ctx: &mut QueryContext, path: PathId, distinct_rows_hint: Option<f64>) {
    let (child, order, remove_duplicates, limit) = match &ctx.arena.node(path).kind {
        AccessPathKind::Sort {
            child,
            order,
            remove_duplicates,
            limit,
            ..
        } => (*child, order.clone(), *remove_duplicates, *limit),
        other => {
            debug_assert!(false, "estimate_sort_cost on {other:?}");
            return;
        }
    };
    debug_assert!(remove_duplicates || distinct_rows_hint.is_none());

    let child_node = ctx.arena.node(child);
    let num_input_rows = child_node.num_output_rows;
    let child_cost = child_node.cost.max(0.0);
    let limit_rows = limit.map_or(f64::MAX, |l| l as f64);

    let mut distinct_rows = distinct_rows_hint.unwrap_or(UNKNOWN_ROW_COUNT);
    if remove_duplicates && distinct_rows == UNKNOWN_ROW_COUNT {
        let sort_items: Vec<Expr> = order.iter().map(|k| k.expr.clone()).collect();
        distinct_rows =
            estimate_distinct_rows(&ctx.catalog, &mut ctx.trace, num_input_rows, &sort_items);
    }

    // With duplicate removal the whole input is sorted even under a
    // limit.
    let sort_result_rows = if remove_duplicates {
        num_input_rows
    } else {
        limit_rows.min(num_input_rows)
    };

    let sort_cost = if num_input_rows <= 1.0 {
        // Avoid NaNs from log2().
        SORT_ONE_ROW_COST
    } else {
        // Filesort is O(n + k log k) with a limit and O(n log n)
        // without; n + k log k covers both.
        SORT_ONE_ROW_COST
            * (num_input_rows + sort_result_rows * sort_result_rows.log2().max(1.0))
    };

    let num_output_rows = if remove_duplicates {
        distinct_rows.min(limit_rows)
    } else {
        num_input_rows.min(limit_rows)
    };

    let node = ctx.arena.node_mut(path);
    node.cost = child_cost + sort_cost;
    node.init_cost = node.cost;
    node.init_once_cost = 0.0;
    node.num_output_rows = num_output_rows;
}

pub fn estimate_aggregate_cost(ctx: &mut QueryContext, query_block: &QueryBlock, path: PathId) {
    let (child, rollup) = match &ctx.arena.node(path).kind {
        AccessPathKind::Aggregate { child, rollup } => (*child, *rollup),
        other => {
            debug_assert!(false, "estimate_aggregate_cost on {other:?}");
            return;
        }
    };
    let child_node = ctx.arena.node(child);
    let child_rows = child_node.num_output_rows;
    let child_cost = child_node.cost;
    let child_init = child_node.init_cost;
    let child_init_once = child_node.init_once_cost;

    let num_output_rows = if ctx.arena.node(path).num_output_rows == UNKNOWN_ROW_COUNT {
        estimate_aggregate_rows(&ctx.catalog, &mut ctx.trace, child_rows, query_block, rollup)
    } else {
        ctx.arena.node(path).num_output_rows
    };

    let node = ctx.arena.node_mut(path);
    node.num_output_rows = num_output_rows;
    node.init_cost = child_init;
    node.init_once_cost = child_init_once;
    node.cost = child_cost + AGGREGATE_ONE_ROW_COST * child_rows.max(0.0);
}

pub fn estimate_stream_cost(arena: &mut PathArena, path: PathId) {
    let child = match &arena.node(path).kind {
        AccessPathKind::Stream { child, .. } => *child,
        other => {
            debug_assert!(false, "estimate_stream_cost on {other:?}");
            return;
        }
    };
    let child_node = arena.node(child);
    let (rows, cost, init_cost) = (
        child_node.num_output_rows,
        child_node.cost,
        child_node.init_cost,
    );
    let node = arena.node_mut(path);
    node.num_output_rows = rows;
    node.cost = cost;
    node.init_cost = init_cost;
    // Streaming into another query block is never recoverable across
    // re-executions.
    node.init_once_cost = 0.0;
}

pub fn estimate_limit_offset_cost(arena: &mut PathArena, path: PathId) {
    let (child, limit, offset) = match &arena.node(path).kind {
        AccessPathKind::LimitOffset {
            child,
            limit,
            offset,
            ..
        } => (*child, *limit, *offset),
        other => {
            debug_assert!(false, "estimate_limit_offset_cost on {other:?}");
            return;
        }
    };
    let child_node = arena.node(child);
    let child_rows = child_node.num_output_rows;
    let child_cost = child_node.cost;
    let child_init = child_node.init_cost;

    let num_output_rows = if child_rows >= 0.0 {
        if offset as f64 >= child_rows {
            0.0
        } else {
            child_rows.min(limit as f64) - offset as f64
        }
    } else {
        UNKNOWN_ROW_COUNT
    };

    let node = arena.node_mut(path);
    node.num_output_rows = num_output_rows;
    if child_init < 0.0 {
        // No split into startup and full cost is known for the child.
        node.cost = child_cost;
        node.init_cost = UNKNOWN_COST;
    } else if child_rows < 1e-6 {
        node.cost = child_init;
        node.init_cost = child_init;
    } else {
        let fraction_start_read = (offset as f64 / child_rows).min(1.0);
        let fraction_full_read = (limit as f64 / child_rows).min(1.0);
        node.cost = child_init + fraction_full_read * (child_cost - child_init);
        node.init_cost = child_init + fraction_start_read * (child_cost - child_init);
    }
}

pub fn estimate_window_cost(arena: &mut PathArena, path: PathId) {
    let child = match &arena.node(path).kind {
        AccessPathKind::Windowing { child, .. } => *child,
        other => {
            debug_assert!(false, "estimate_window_cost on {other:?}");
            return;
        }
    };
    let child_node = arena.node(child);
    let (rows, cost, init_cost, init_once) = (
        child_node.num_output_rows,
        child_node.cost,
        child_node.init_cost,
        child_node.init_once_cost,
    );
    let node = arena.node_mut(path);
    node.num_output_rows = rows;
    node.init_cost = init_cost;
    node.init_once_cost = init_once;
    node.cost = cost + WINDOW_ONE_ROW_COST * rows.max(0.0);
}

/// Materialisation: rudimentary, assuming no deduplication (better to
/// overestimate), so downstream estimates are at least not "unknown".
pub fn estimate_materialize_cost(ctx: &mut QueryContext, path: PathId) {
    let (table_path, operand_paths, table) = match &ctx.arena.node(path).kind {
        AccessPathKind::Materialize { table_path, params } => (
            *table_path,
            params
                .operands
                .iter()
                .map(|o| (o.subquery_path, o.is_recursive_reference))
                .collect::<Vec<_>>(),
            params.table,
        ),
        other => {
            debug_assert!(false, "estimate_materialize_cost on {other:?}");
            return;
        }
    };

    let mut num_output_rows = 0.0;
    let mut subquery_cost = 0.0;
    let mut cost_for_cacheable = 0.0;
    for (operand, is_recursive) in operand_paths {
        let operand_node = ctx.arena.node(operand);
        if operand_node.num_output_rows >= 0.0 {
            num_output_rows += operand_node.num_output_rows;
            if operand_node.cost > 0.0 {
                subquery_cost += operand_node.cost;
                if !is_recursive {
                    cost_for_cacheable += operand_node.cost;
                }
            }
        }
    }

    if matches!(ctx.arena.node(table_path).kind, AccessPathKind::TableScan { .. }) {
        // Keep the estimates on the table path so a scan of the temp
        // table carries the full production cost.
        let scan_cost = match table {
            Some(t) => {
                ctx.catalog.table_mut(t).stats.records = num_output_rows;
                ctx.engine
                    .scan_cost(ctx.catalog.table(t))
                    .unwrap_or(num_output_rows * MEMORY_TEMPTABLE_ROW_COST)
            }
            None => num_output_rows * MEMORY_TEMPTABLE_ROW_COST,
        };
        let table_node = ctx.arena.node_mut(table_path);
        table_node.num_output_rows = num_output_rows;
        table_node.init_cost = subquery_cost;
        table_node.init_once_cost = cost_for_cacheable;
        table_node.cost = subquery_cost + scan_cost;

        let node = ctx.arena.node_mut(path);
        node.cost = 0.0;
        node.init_cost = 0.0;
        node.init_once_cost = 0.0;
    } else {
        let node = ctx.arena.node_mut(path);
        node.init_cost = subquery_cost;
        node.init_once_cost = cost_for_cacheable;
        node.cost = subquery_cost;
    }

    let table_node = ctx.arena.node(table_path);
    let (tp_cost, tp_init, tp_init_once) = (
        table_node.cost,
        table_node.init_cost,
        table_node.init_once_cost,
    );
    let node = ctx.arena.node_mut(path);
    node.num_output_rows = num_output_rows;
    node.init_cost += tp_init.max(0.0) + MATERIALIZE_ONE_ROW_COST * num_output_rows;
    node.init_once_cost += tp_init_once.max(0.0);
    node.cost += tp_cost.max(0.0) + MATERIALIZE_ONE_ROW_COST * num_output_rows;
}

pub fn estimate_temptable_aggregate_cost(
    ctx: &mut QueryContext,
    query_block: &QueryBlock,
    path: PathId,
) {
    let (subquery_path, table_path, table) = match &ctx.arena.node(path).kind {
        AccessPathKind::TemptableAggregate {
            subquery_path,
            table_path,
            params,
            ..
        } => (*subquery_path, *table_path, params.table),
        other => {
            debug_assert!(false, "estimate_temptable_aggregate_cost on {other:?}");
            return;
        }
    };
    let subquery_node = ctx.arena.node(subquery_path);
    let input_rows = subquery_node.num_output_rows;
    let input_cost = subquery_node.cost.max(0.0);

    let aggregate_rows = estimate_aggregate_rows(
        &ctx.catalog,
        &mut ctx.trace,
        input_rows,
        query_block,
        false,
    );

    let scan_cost = match table {
        Some(t) => {
            ctx.catalog.table_mut(t).stats.records = aggregate_rows;
            ctx.engine
                .scan_cost(ctx.catalog.table(t))
                .unwrap_or(aggregate_rows * MEMORY_TEMPTABLE_ROW_COST)
        }
        None => aggregate_rows * MEMORY_TEMPTABLE_ROW_COST,
    };

    let table_node = ctx.arena.node_mut(table_path);
    table_node.num_output_rows = aggregate_rows;
    table_node.cost = scan_cost;
    table_node.init_cost = 0.0;
    table_node.init_once_cost = 0.0;

    // Fill the table: read the input and aggregate every row into the
    // temp table, then scan it.
    let fill_cost = input_cost
        + AGGREGATE_ONE_ROW_COST * input_rows.max(0.0)
        + MATERIALIZE_ONE_ROW_COST * aggregate_rows;
    let node = ctx.arena.node_mut(path);
    node.num_output_rows = aggregate_rows;
    node.init_cost = fill_cost;
    node.init_once_cost = 0.0;
    node.cost = fill_cost + scan_cost;
}

// ============================================================================
// Joins
// ============================================================================

/// Fan-out of a semijoin: how many probe rows survive, per left row.
/// Estimated as the distinct count over the right-side fields named by
/// the join predicate, times the predicate's selectivity, and never
/// more than one (the left side is deduplicated).
pub fn estimate_semijoin_fan_out(
    catalog: &Catalog,
    trace: &mut OptimizerTrace,
    right_rows: f64,
    edge: &JoinPredicate,
) -> f64 {
    let mut condition_fields: Vec<Expr> = Vec::new();
    let mut collect = |e: &Expr| {
        e.visit(&mut |sub| {
            if let Expr::Column(c) = sub {
                if edge.right_tables & table_map_bit(c.table) != 0
                    && !condition_fields
                        .iter()
                        .any(|f| matches!(f, Expr::Column(fc) if fc == c))
                {
                    condition_fields.push(Expr::Column(ColumnRef::new(c.table, c.field)));
                }
            }
        });
    };
    for eq in &edge.equijoin_conditions {
        collect(eq);
    }
    for cond in &edge.join_conditions {
        collect(cond);
    }

    let distinct_rows = estimate_distinct_rows(catalog, trace, right_rows, &condition_fields);
    (distinct_rows * edge.selectivity).min(1.0)
}

/// Join output cardinality per the predicate's kind and selectivity.
pub fn find_output_rows_for_join(
    catalog: &Catalog,
    trace: &mut OptimizerTrace,
    left_rows: f64,
    right_rows: f64,
    edge: &JoinPredicate,
) -> f64 {
    let rows = match edge.join_kind {
        JoinKind::Inner | JoinKind::StraightInner | JoinKind::Multi => {
            left_rows * right_rows * edge.selectivity
        }
        // An unmatched left row is still emitted once.
        JoinKind::Left | JoinKind::FullOuter => {
            left_rows * (right_rows * edge.selectivity).max(1.0)
        }
        JoinKind::Semi => {
            left_rows * estimate_semijoin_fan_out(catalog, trace, right_rows, edge)
        }
        JoinKind::Anti => {
            let fan_out = estimate_semijoin_fan_out(catalog, trace, right_rows, edge);
            left_rows * (1.0 - fan_out).max(0.1)
        }
    };
    clamp_row_count(rows, trace)
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Estimate one node, assuming its children are already estimated.
/// Writes `num_output_rows` and `cost` (and the init costs) in place.
pub fn estimate_path_cost(ctx: &mut QueryContext, query_block: &QueryBlock, path: PathId) {
    match ctx.arena.node(path).kind.clone() {
        AccessPathKind::TableScan { table } | AccessPathKind::FollowTail { table } => {
            let t = ctx.catalog.table(table);
            let rows = t.stats.records;
            let cost = estimate_table_scan_cost(t);
            set_scan_estimates(ctx, path, rows, cost);
        }
        AccessPathKind::IndexScan { table, key_idx, .. } => {
            let t = ctx.catalog.table(table);
            let rows = t.stats.records;
            let cost = estimate_index_scan_cost(t, key_idx);
            set_scan_estimates(ctx, path, rows, cost);
        }
        AccessPathKind::Ref { ref key, .. }
        | AccessPathKind::FullTextSearch { ref key, .. }
        | AccessPathKind::Mrr { ref key, .. } => {
            let t = ctx.catalog.table(key.table);
            let rows = ref_fan_out(t, key.key_idx, key.key_parts_used);
            let cost = estimate_ref_access_cost(t, key.key_idx, rows);
            set_scan_estimates(ctx, path, rows, cost);
        }
        AccessPathKind::RefOrNull { ref key, .. } => {
            // One lookup for the value, one for NULL.
            let t = ctx.catalog.table(key.table);
            let per_lookup = ref_fan_out(t, key.key_idx, key.key_parts_used);
            let rows = (2.0 * per_lookup).min(t.stats.records.max(1.0));
            let cost = estimate_index_range_scan_cost(t, key.key_idx, 2.0, rows);
            set_scan_estimates(ctx, path, rows, cost);
        }
        AccessPathKind::EqRef { ref key, .. } => {
            let t = ctx.catalog.table(key.table);
            let cost = estimate_ref_access_cost(t, key.key_idx, 1.0);
            set_scan_estimates(ctx, path, 1.0, cost);
        }
        AccessPathKind::PushedJoinRef { ref key, is_unique, .. } => {
            let t = ctx.catalog.table(key.table);
            let rows = if is_unique {
                1.0
            } else {
                ref_fan_out(t, key.key_idx, key.key_parts_used)
            };
            let cost = estimate_ref_access_cost(t, key.key_idx, rows);
            set_scan_estimates(ctx, path, rows, cost);
        }
        AccessPathKind::IndexRangeScan { table, ranges } => {
            let RangeDescriptor {
                key_idx,
                n_ranges,
                expected_rows,
            } = ranges;
            let rows = clamp_row_count(expected_rows, &mut ctx.trace);
            let t = ctx.catalog.table(table);
            let cost = estimate_index_range_scan_cost(t, key_idx, f64::from(n_ranges), rows);
            set_scan_estimates(ctx, path, rows, cost);
        }
        AccessPathKind::DynamicIndexRangeScan { table, .. } => {
            // Re-planned per outer row; assume a full scan as the
            // conservative envelope.
            let t = ctx.catalog.table(table);
            let rows = t.stats.records;
            let cost = estimate_table_scan_cost(t);
            set_scan_estimates(ctx, path, rows, cost);
        }
        AccessPathKind::MaterializedTableFunction { table, table_path, .. } => {
            let child_cost = ctx.arena.node(table_path).cost.max(0.0);
            let t = ctx.catalog.table(table);
            let rows = if t.stats.records > 0.0 {
                t.stats.records
            } else {
                ROW_ESTIMATE_FALLBACK
            };
            let cost = child_cost + MATERIALIZE_ONE_ROW_COST * rows + rows * MEMORY_TEMPTABLE_ROW_COST;
            set_scan_estimates(ctx, path, rows, cost);
        }
        AccessPathKind::UnqualifiedCount => {
            // Row count answered from storage statistics.
            set_scan_estimates(ctx, path, 1.0, 0.0);
        }
        AccessPathKind::TableValueConstructor
        | AccessPathKind::FakeSingleRow
        | AccessPathKind::ZeroRows { .. }
        | AccessPathKind::ZeroRowsAggregated { .. }
        | AccessPathKind::ConstTable { .. } => {
            // Estimates fixed at construction.
        }
        AccessPathKind::NestedLoopJoin {
            outer,
            inner,
            join_kind,
            ..
        } => {
            let o = ctx.arena.node(outer);
            let i = ctx.arena.node(inner);
            let (o_rows, o_cost, o_init) = (o.num_output_rows.max(0.0), o.cost.max(0.0), o.init_cost);
            let (i_rows, i_cost) = (i.num_output_rows.max(0.0), i.cost.max(0.0));
            let rows = match join_kind {
                JoinKind::Left | JoinKind::FullOuter => o_rows * i_rows.max(1.0),
                _ => o_rows * i_rows,
            };
            let node = ctx.arena.node_mut(path);
            if node.num_output_rows == UNKNOWN_ROW_COUNT {
                node.num_output_rows = rows;
            }
            node.cost = o_cost + o_rows * i_cost;
            node.init_cost = o_init;
        }
        AccessPathKind::NestedLoopSemijoinWithDuplicateRemoval { outer, inner, .. } => {
            let o = ctx.arena.node(outer);
            let i = ctx.arena.node(inner);
            let (o_rows, o_cost) = (o.num_output_rows.max(0.0), o.cost.max(0.0));
            let i_cost = i.cost.max(0.0);
            let node = ctx.arena.node_mut(path);
            if node.num_output_rows == UNKNOWN_ROW_COUNT {
                // Deduplicated on the outer side: at most one match
                // survives per outer row.
                node.num_output_rows = o_rows;
            }
            node.cost = o_cost + o_rows * i_cost;
        }
        AccessPathKind::BkaJoin { outer, inner, .. } => {
            let o = ctx.arena.node(outer);
            let i = ctx.arena.node(inner);
            let (o_rows, o_cost) = (o.num_output_rows.max(0.0), o.cost.max(0.0));
            let (i_rows, i_cost) = (i.num_output_rows.max(0.0), i.cost.max(0.0));
            let rows = o_rows * i_rows;
            let node = ctx.arena.node_mut(path);
            if node.num_output_rows == UNKNOWN_ROW_COUNT {
                node.num_output_rows = rows;
            }
            // Batched keys amortise the inner lookups.
            node.cost = o_cost + i_cost + READ_ONE_ROW_COST * rows;
        }
        AccessPathKind::HashJoin {
            outer,
            inner,
            ref join_predicate,
            ..
        } => {
            let build = ctx.arena.node(outer);
            let probe = ctx.arena.node(inner);
            let (build_rows, build_cost) = (build.num_output_rows.max(0.0), build.cost.max(0.0));
            let (probe_rows, probe_cost, probe_init) =
                (probe.num_output_rows.max(0.0), probe.cost.max(0.0), probe.init_cost.max(0.0));
            // The probe side is the driving (left) input; the build
            // side is the right.
            let rows = find_output_rows_for_join(
                &ctx.catalog,
                &mut ctx.trace,
                probe_rows,
                build_rows,
                join_predicate,
            );
            let node = ctx.arena.node_mut(path);
            if node.num_output_rows == UNKNOWN_ROW_COUNT {
                node.num_output_rows = rows;
            }
            node.cost = build_cost
                + probe_cost
                + MATERIALIZE_ONE_ROW_COST * build_rows
                + READ_ONE_ROW_COST * probe_rows;
            node.init_cost = build_cost + MATERIALIZE_ONE_ROW_COST * build_rows + probe_init;
        }
        AccessPathKind::Filter {
            child,
            ref condition,
            materialize_subqueries,
        } => {
            let filter_cost = estimate_filter_cost(
                &ctx.arena,
                ctx.config.max_heap_table_size,
                ctx.arena.node(child).num_output_rows.max(0.0),
                condition,
            );
            let child_node = ctx.arena.node(child);
            let (child_rows, child_cost, child_init) =
                (child_node.num_output_rows, child_node.cost.max(0.0), child_node.init_cost.max(0.0));
            let node = ctx.arena.node_mut(path);
            if node.num_output_rows == UNKNOWN_ROW_COUNT {
                // Condition selectivity is applied by the enumerator;
                // pass rows through when it has not.
                node.num_output_rows = child_rows;
            }
            if materialize_subqueries {
                node.cost =
                    child_cost + filter_cost.cost_if_materialized + filter_cost.cost_to_materialize;
                node.init_cost = child_init + filter_cost.cost_to_materialize;
            } else {
                node.cost = child_cost + filter_cost.cost_if_not_materialized;
                node.init_cost = child_init + filter_cost.init_cost_if_not_materialized;
            }
        }
        AccessPathKind::Sort { .. } => estimate_sort_cost(ctx, path, None),
        AccessPathKind::Aggregate { .. } => estimate_aggregate_cost(ctx, query_block, path),
        AccessPathKind::TemptableAggregate { .. } => {
            estimate_temptable_aggregate_cost(ctx, query_block, path);
        }
        AccessPathKind::LimitOffset { .. } => estimate_limit_offset_cost(&mut ctx.arena, path),
        AccessPathKind::Stream { .. } => estimate_stream_cost(&mut ctx.arena, path),
        AccessPathKind::Materialize { .. } => estimate_materialize_cost(ctx, path),
        AccessPathKind::MaterializeInformationSchemaTable { table_path, table, .. } => {
            let child_cost = ctx.arena.node(table_path).cost.max(0.0);
            let t = ctx.catalog.table(table);
            let rows = if t.stats.records > 0.0 {
                t.stats.records
            } else {
                ROW_ESTIMATE_FALLBACK
            };
            let node = ctx.arena.node_mut(path);
            node.num_output_rows = rows;
            node.cost = child_cost + MATERIALIZE_ONE_ROW_COST * rows;
        }
        AccessPathKind::Append { ref children } => {
            let mut rows = 0.0;
            let mut cost = 0.0;
            for child in children {
                let n = ctx.arena.node(child.path);
                rows += n.num_output_rows.max(0.0);
                cost += n.cost.max(0.0);
            }
            let node = ctx.arena.node_mut(path);
            node.num_output_rows = rows;
            node.cost = cost;
        }
        AccessPathKind::Windowing { .. } => estimate_window_cost(&mut ctx.arena, path),
        AccessPathKind::Weedout { child, .. } => {
            let child_node = ctx.arena.node(child);
            let (rows, cost) = (child_node.num_output_rows.max(0.0), child_node.cost.max(0.0));
            let node = ctx.arena.node_mut(path);
            if node.num_output_rows == UNKNOWN_ROW_COUNT {
                node.num_output_rows = rows;
            }
            // Row ids of seen rows are kept in a temp table.
            node.cost = cost + MATERIALIZE_ONE_ROW_COST * rows;
        }
        AccessPathKind::RemoveDuplicates {
            child,
            table,
            key_idx,
            ..
        } => {
            let child_node = ctx.arena.node(child);
            let (child_rows, child_cost) =
                (child_node.num_output_rows.max(0.0), child_node.cost.max(0.0));
            let terms: Vec<Expr> = ctx.catalog.table(table).key_info[key_idx]
                .parts
                .iter()
                .map(|p| Expr::column(table, p.field))
                .collect();
            let rows = estimate_distinct_rows(&ctx.catalog, &mut ctx.trace, child_rows, &terms);
            let node = ctx.arena.node_mut(path);
            node.num_output_rows = rows;
            node.cost = child_cost + AGGREGATE_ONE_ROW_COST * child_rows;
        }
        AccessPathKind::Alternative { child, .. } | AccessPathKind::CacheInvalidator { child, .. } => {
            let child_node = ctx.arena.node(child);
            let (rows, cost, init_cost) = (
                child_node.num_output_rows,
                child_node.cost,
                child_node.init_cost,
            );
            let node = ctx.arena.node_mut(path);
            node.num_output_rows = rows;
            node.cost = cost;
            node.init_cost = init_cost;
        }
    }
}

fn set_scan_estimates(ctx: &mut QueryContext, path: PathId, rows: f64, cost: f64) {
    let rows = clamp_row_count(rows, &mut ctx.trace);
    let node = ctx.arena.node_mut(path);
    node.num_output_rows = rows;
    node.cost = cost;
    node.init_cost = 0.0;
    node.init_once_cost = 0.0;
}

/// Expected matches of a ref lookup binding `key_parts_used` parts.
fn ref_fan_out(table: &Table, key_idx: usize, key_parts_used: usize) -> f64 {
    let key = &table.key_info[key_idx];
    if key.unique && key_parts_used == key.parts.len() {
        return 1.0;
    }
    key.records_per_prefix(key_parts_used)
        .unwrap_or_else(|| ROW_ESTIMATE_FALLBACK.min(table.stats.records.max(1.0)))
}

/// Estimate every node below (and including) `root`, children first.
pub fn estimate_plan(ctx: &mut QueryContext, query_block: &QueryBlock, root: PathId) {
    let order = crate::optimizer::walk::collect_post_order(
        &ctx.arena,
        root,
        Some(query_block.join),
        crate::optimizer::walk::WalkPolicy::EntireTree,
    );
    for (id, _) in order {
        estimate_path_cost(ctx, query_block, id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::catalog::{Column, Histogram, KeyInfo, KeyPart, Table, TableStats};
    use crate::optimizer::JoinId;
    use crate::Config;

    fn make_context() -> QueryContext {
        QueryContext::new(Config::default(), Catalog::new())
    }

    fn scenario_a_table() -> Table {
        // 1M rows, 16KB blocks, 160B rows, unique clustered integer PK.
        let mut t = Table::new(0, "t");
        t.stats = TableStats {
            records: 1_000_000.0,
            block_size: 16384,
        };
        t.record_buffer_length = 160;
        t.read_set_fields = 1;
        t.columns = vec![Column::new("id")];
        let mut key = KeyInfo::new("PRIMARY", vec![KeyPart { field: 0, length: 8 }]);
        key.unique = true;
        key.records_per_key = vec![1.0];
        t.key_info.push(key);
        t.primary_key = Some(0);
        t.primary_key_is_clustered = true;
        t
    }

    #[test]
    fn test_index_height_and_lookup_cost() {
        let t = scenario_a_table();
        // records_per_page = 16384 / 160 = 102.4; 103.4^3 > 1e6 > 103.4^2.
        assert_eq!(index_height(&t, 0), 3);
        let lookup = index_lookup_cost(&t, 0);
        assert!((lookup - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_ref_access_cost_scenario() {
        let t = scenario_a_table();
        // row_read_cost(1 row, 1 field, 160 bytes) = 0.1 + 0.01 + 0.04.
        let expected_read = 0.1 + 0.01 + 0.00025 * 160.0;
        let expected = 0.95 * (2.0 + expected_read);
        let actual = estimate_ref_access_cost(&t, 0, 1.0);
        assert!((actual - expected).abs() < 1e-9, "got {actual}");
    }

    #[test]
    fn test_row_read_cost_linear_in_rows() {
        let half = row_read_cost(0.5, 1.0, 100.0);
        let full = row_read_cost(1.0, 1.0, 100.0);
        assert!((2.0 * half - full).abs() < 1e-12);
    }

    #[test]
    fn test_sort_cost_one_row_exact() {
        let mut ctx = make_context();
        let mut t = Table::new(0, "t");
        t.stats.records = 1.0;
        ctx.catalog.add(t);
        let scan = ctx.arena.table_scan(0);
        ctx.arena.node_mut(scan).set_estimates(1.0, 0.0);
        let sort = ctx.arena.sort(scan, vec![SortKeyDef::asc(Expr::column(0, 0))]);
        estimate_sort_cost(&mut ctx, sort, None);
        assert!((ctx.arena.node(sort).cost - SORT_ONE_ROW_COST).abs() < 1e-12);
    }

    #[test]
    fn test_sort_cost_n_log_k() {
        let mut ctx = make_context();
        ctx.catalog.add(Table::new(0, "t"));
        let scan = ctx.arena.table_scan(0);
        ctx.arena.node_mut(scan).set_estimates(1000.0, 0.0);
        let sort = ctx.arena.sort(scan, vec![SortKeyDef::asc(Expr::column(0, 0))]);
        estimate_sort_cost(&mut ctx, sort, None);
        let expected = SORT_ONE_ROW_COST * (1000.0 + 1000.0 * 1000.0_f64.log2());
        assert!((ctx.arena.node(sort).cost - expected).abs() < 1e-9);
        assert_eq!(ctx.arena.node(sort).num_output_rows, 1000.0);
    }

    #[test]
    fn test_distinct_rows_empty_terms() {
        let mut ctx = make_context();
        assert_eq!(
            estimate_distinct_rows(&ctx.catalog, &mut ctx.trace, 100.0, &[]),
            1.0
        );
        assert_eq!(
            estimate_distinct_rows(&ctx.catalog, &mut ctx.trace, 0.5, &[]),
            0.5
        );
    }

    #[test]
    fn test_distinct_rows_small_input_uses_sqrt() {
        let mut ctx = make_context();
        ctx.catalog.add(Table::new(0, "t"));
        let terms = vec![Expr::column(0, 0)];
        let estimate = estimate_distinct_rows(&ctx.catalog, &mut ctx.trace, 9.0, &terms);
        assert!((estimate - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_distinct_rows_histogram() {
        let mut ctx = make_context();
        let mut t = Table::new(0, "t");
        t.stats.records = 10_000.0;
        t.columns = vec![Column::new("a").with_histogram(Histogram::new(50.0, 0.0))];
        ctx.catalog.add(t);
        let terms = vec![Expr::column(0, 0)];
        let estimate = estimate_distinct_rows(&ctx.catalog, &mut ctx.trace, 10_000.0, &terms);
        assert!((estimate - 50.0).abs() < 1e-6, "got {estimate}");
    }

    #[test]
    fn test_semijoin_fanout_scenario() {
        // Right side 10000 rows, histogram reports 50 distinct values,
        // selectivity 0.4: fan-out min(1, 50 * 0.4) = 1.0.
        let mut ctx = make_context();
        ctx.catalog.add(Table::new(0, "l"));
        let mut right = Table::new(1, "r");
        right.stats.records = 10_000.0;
        right.columns = vec![Column::new("a").with_histogram(Histogram::new(50.0, 0.0))];
        ctx.catalog.add(right);

        let edge = JoinPredicate {
            join_kind: JoinKind::Semi,
            equijoin_conditions: vec![Expr::eq(Expr::column(0, 0), Expr::column(1, 0))],
            join_conditions: vec![],
            right_tables: table_map_bit(1),
            selectivity: 0.4,
        };
        let fan_out = estimate_semijoin_fan_out(&ctx.catalog, &mut ctx.trace, 10_000.0, &edge);
        assert!((fan_out - 1.0).abs() < 1e-9);
        // Join cardinality equals the left row count.
        let rows = find_output_rows_for_join(&ctx.catalog, &mut ctx.trace, 500.0, 10_000.0, &edge);
        assert!((rows - 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_rollup_rows_scenario() {
        // Group on 3 fields, 1000 aggregate rows: m = 10, 1+10+100 = 111.
        let rollup = estimate_rollup_rows_primitively(1000.0, 3);
        assert!((rollup - 111.0).abs() < 1e-6, "got {rollup}");
    }

    #[test]
    fn test_limit_offset_beyond_child_rows() {
        let mut ctx = make_context();
        ctx.catalog.add(Table::new(0, "t"));
        let scan = ctx.arena.table_scan(0);
        {
            let node = ctx.arena.node_mut(scan);
            node.set_estimates(10.0, 5.0);
            node.init_cost = 0.0;
        }
        let lim = ctx.arena.limit_offset(scan, 100, 20);
        estimate_limit_offset_cost(&mut ctx.arena, lim);
        assert_eq!(ctx.arena.node(lim).num_output_rows, 0.0);
    }

    #[test]
    fn test_limit_offset_fractional_read() {
        let mut ctx = make_context();
        ctx.catalog.add(Table::new(0, "t"));
        let scan = ctx.arena.table_scan(0);
        {
            let node = ctx.arena.node_mut(scan);
            node.set_estimates(100.0, 10.0);
            node.init_cost = 0.0;
        }
        let lim = ctx.arena.limit_offset(scan, 10, 0);
        estimate_limit_offset_cost(&mut ctx.arena, lim);
        let node = ctx.arena.node(lim);
        assert_eq!(node.num_output_rows, 10.0);
        assert!((node.cost - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_aggregate_cost_implicit_grouping() {
        let mut ctx = make_context();
        ctx.catalog.add(Table::new(0, "t"));
        let mut qb = QueryBlock::new(JoinId(0));
        qb.is_implicitly_grouped = true;
        let scan = ctx.arena.table_scan(0);
        ctx.arena.node_mut(scan).set_estimates(500.0, 50.0);
        let agg = ctx.arena.aggregate(scan, false);
        estimate_aggregate_cost(&mut ctx, &qb, agg);
        let node = ctx.arena.node(agg);
        assert_eq!(node.num_output_rows, 1.0);
        assert!((node.cost - (50.0 + AGGREGATE_ONE_ROW_COST * 500.0)).abs() < 1e-9);
    }

    #[test]
    fn test_negative_row_clamp_traced() {
        let mut ctx = QueryContext::new(
            Config {
                optimizer_trace: true,
                ..Config::default()
            },
            Catalog::new(),
        );
        let mut t = Table::new(0, "t");
        t.stats.records = -5.0;
        ctx.catalog.add(t);
        let scan = ctx.arena.table_scan(0);
        let qb = QueryBlock::new(JoinId(0));
        estimate_path_cost(&mut ctx, &qb, scan);
        assert_eq!(ctx.arena.node(scan).num_output_rows, 0.0);
        assert!(ctx.trace.contents().to_string_lossy().contains("Clamping"));
    }

    #[test]
    fn test_filter_cost_with_materializable_subquery() {
        let mut ctx = make_context();
        ctx.catalog.add(Table::new(0, "t"));
        let sub = ctx.arena.table_scan(0);
        ctx.arena.node_mut(sub).set_estimates(100.0, 10.0);
        let condition = Expr::Subquery(crate::optimizer::expr::ContainedSubquery {
            path: sub,
            row_width: 8,
            strategy: SubqueryStrategy::Materializable,
        });
        let cost = estimate_filter_cost(&ctx.arena, 16 * 1024 * 1024, 1000.0, &condition);
        // Not materialised: the subquery runs per row.
        assert!(cost.cost_if_not_materialized > cost.cost_if_materialized);
        assert!((cost.cost_to_materialize - (10.0 + MATERIALIZE_ONE_ROW_COST * 100.0)).abs() < 1e-9);
    }

    #[test]
    fn test_estimate_plan_bottom_up() {
        let mut ctx = make_context();
        let mut t = Table::new(0, "t");
        t.stats.records = 100.0;
        t.record_buffer_length = 32;
        t.read_set_fields = 2;
        ctx.catalog.add(t);
        let qb = QueryBlock::new(JoinId(0));
        let scan = ctx.arena.table_scan(0);
        let filter = ctx.arena.filter(scan, Expr::eq(Expr::column(0, 0), Expr::int(1)), false);
        let sort = ctx.arena.sort(filter, vec![SortKeyDef::asc(Expr::column(0, 0))]);
        estimate_plan(&mut ctx, &qb, sort);
        assert!(ctx.arena.node(scan).cost > 0.0);
        assert!(ctx.arena.node(filter).cost > ctx.arena.node(scan).cost);
        assert!(ctx.arena.node(sort).cost > ctx.arena.node(filter).cost);
        assert!(ctx.arena.node(sort).num_output_rows >= 0.0);
    }
}
