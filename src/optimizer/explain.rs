// Plan rendering in EXPLAIN-tree form.
//
// One line per access path, children indented, with the row and cost
// estimates when they are known. Used by diagnostics and by tests that
// want to assert on plan shape without pattern-matching the arena.

use std::fmt::Write as _;

use crate::optimizer::access_path::{AccessPath, AccessPathKind, PathArena, PathId};
use crate::optimizer::relational::JoinKind;

/// Render the plan rooted at `root` as indented text.
pub fn explain_path(arena: &PathArena, root: PathId) -> String {
    let mut out = String::new();
    render(arena, root, 0, &mut out);
    out
}

fn render(arena: &PathArena, id: PathId, depth: usize, out: &mut String) {
    let node = arena.node(id);
    let indent = "    ".repeat(depth);
    let _ = write!(out, "{indent}-> {}", describe(node));
    if node.num_output_rows >= 0.0 && node.cost >= 0.0 {
        let _ = write!(out, "  (cost={:.2} rows={:.0})", node.cost, node.num_output_rows);
    }
    out.push('\n');
    for child in direct_children(&node.kind) {
        render(arena, child, depth + 1, out);
    }
}

/// Children in display order. Unlike the walker, this descends through
/// every boundary: an EXPLAIN shows the whole statement.
fn direct_children(kind: &AccessPathKind) -> Vec<PathId> {
    match kind {
        AccessPathKind::NestedLoopJoin { outer, inner, .. }
        | AccessPathKind::NestedLoopSemijoinWithDuplicateRemoval { outer, inner, .. }
        | AccessPathKind::BkaJoin { outer, inner, .. }
        | AccessPathKind::HashJoin { outer, inner, .. } => vec![*outer, *inner],
        AccessPathKind::Filter { child, .. }
        | AccessPathKind::Sort { child, .. }
        | AccessPathKind::Aggregate { child, .. }
        | AccessPathKind::LimitOffset { child, .. }
        | AccessPathKind::Windowing { child, .. }
        | AccessPathKind::Weedout { child, .. }
        | AccessPathKind::RemoveDuplicates { child, .. }
        | AccessPathKind::CacheInvalidator { child, .. }
        | AccessPathKind::Stream { child, .. } => vec![*child],
        AccessPathKind::Alternative {
            child,
            table_scan_path,
            ..
        } => vec![*child, *table_scan_path],
        AccessPathKind::TemptableAggregate {
            subquery_path,
            table_path,
            ..
        } => vec![*subquery_path, *table_path],
        AccessPathKind::Materialize { table_path, params } => {
            let mut children = vec![*table_path];
            children.extend(params.operands.iter().map(|op| op.subquery_path));
            children
        }
        AccessPathKind::MaterializeInformationSchemaTable { table_path, .. }
        | AccessPathKind::MaterializedTableFunction { table_path, .. } => vec![*table_path],
        AccessPathKind::Append { children } => children.iter().map(|c| c.path).collect(),
        AccessPathKind::ZeroRows { child, .. } => child.iter().copied().collect(),
        _ => Vec::new(),
    }
}

fn join_kind_name(kind: JoinKind) -> &'static str {
    match kind {
        JoinKind::Inner => "inner join",
        JoinKind::Left => "left join",
        JoinKind::Semi => "semijoin",
        JoinKind::Anti => "antijoin",
        JoinKind::FullOuter => "full outer join",
        JoinKind::StraightInner => "straight inner join",
        JoinKind::Multi => "multi-way join",
    }
}

fn describe(node: &AccessPath) -> String {
    match &node.kind {
        AccessPathKind::TableScan { table } => format!("Table scan on t{table}"),
        AccessPathKind::IndexScan { table, key_idx, reverse, .. } => {
            if *reverse {
                format!("Index scan on t{table} using key {key_idx} (reverse)")
            } else {
                format!("Index scan on t{table} using key {key_idx}")
            }
        }
        AccessPathKind::Ref { key, .. } => {
            format!("Index lookup on t{} using key {}", key.table, key.key_idx)
        }
        AccessPathKind::RefOrNull { key, .. } => format!(
            "Index lookup on t{} using key {} (+NULL probe)",
            key.table, key.key_idx
        ),
        AccessPathKind::EqRef { key, .. } => format!(
            "Single-row index lookup on t{} using key {}",
            key.table, key.key_idx
        ),
        AccessPathKind::PushedJoinRef { key, .. } => format!(
            "Pushed join index lookup on t{} using key {}",
            key.table, key.key_idx
        ),
        AccessPathKind::FullTextSearch { key, .. } => {
            format!("Full-text search on t{}", key.table)
        }
        AccessPathKind::ConstTable { key } => format!("Constant row from t{}", key.table),
        AccessPathKind::Mrr { key, .. } => {
            format!("Multi-range read on t{} using key {}", key.table, key.key_idx)
        }
        AccessPathKind::FollowTail { table } => format!("Scan new rows on t{table}"),
        AccessPathKind::IndexRangeScan { table, ranges } => format!(
            "Index range scan on t{} using key {} over {} range(s)",
            table, ranges.key_idx, ranges.n_ranges
        ),
        AccessPathKind::DynamicIndexRangeScan { table, .. } => {
            format!("Dynamic index range scan on t{table}")
        }
        AccessPathKind::TableValueConstructor => "Rows fetched before execution".to_string(),
        AccessPathKind::FakeSingleRow => "Single constant row".to_string(),
        AccessPathKind::ZeroRows { cause, .. } => format!("Zero rows ({})", cause.0),
        AccessPathKind::ZeroRowsAggregated { cause } => {
            format!("Zero input rows ({}), aggregated into one row", cause.0)
        }
        AccessPathKind::MaterializedTableFunction { function_name, .. } => {
            format!("Materialize table function {function_name}")
        }
        AccessPathKind::UnqualifiedCount => "Count rows from statistics".to_string(),
        AccessPathKind::NestedLoopJoin { join_kind, .. } => {
            format!("Nested loop {}", join_kind_name(*join_kind))
        }
        AccessPathKind::NestedLoopSemijoinWithDuplicateRemoval { table, .. } => {
            format!("Nested loop semijoin with duplicate removal on t{table}")
        }
        AccessPathKind::BkaJoin { join_kind, .. } => {
            format!("Batched key access {}", join_kind_name(*join_kind))
        }
        AccessPathKind::HashJoin { join_predicate, .. } => {
            let mut text = format!("Hash {}", join_kind_name(join_predicate.join_kind));
            if !join_predicate.equijoin_conditions.is_empty() {
                let conds: Vec<String> = join_predicate
                    .equijoin_conditions
                    .iter()
                    .map(|c| c.to_string())
                    .collect();
                let _ = write!(text, " on {}", conds.join(", "));
            }
            text
        }
        AccessPathKind::Filter { condition, .. } => format!("Filter: {condition}"),
        AccessPathKind::Sort { order, remove_duplicates, .. } => {
            let keys: Vec<String> = order
                .iter()
                .map(|k| {
                    if k.descending {
                        format!("{} DESC", k.expr)
                    } else {
                        k.expr.to_string()
                    }
                })
                .collect();
            if *remove_duplicates {
                format!("Sort with duplicate removal: {}", keys.join(", "))
            } else {
                format!("Sort: {}", keys.join(", "))
            }
        }
        AccessPathKind::Aggregate { rollup, .. } => {
            if *rollup {
                "Group aggregate with rollup".to_string()
            } else {
                "Aggregate".to_string()
            }
        }
        AccessPathKind::TemptableAggregate { .. } => {
            "Aggregate using temporary table".to_string()
        }
        AccessPathKind::LimitOffset { limit, offset, .. } => {
            if *offset > 0 {
                format!("Limit/Offset: {limit}/{offset} row(s)")
            } else {
                format!("Limit: {limit} row(s)")
            }
        }
        AccessPathKind::Stream { .. } => "Stream results".to_string(),
        AccessPathKind::Materialize { params, .. } => {
            if params.is_dedup() {
                "Materialize with deduplication".to_string()
            } else {
                "Materialize".to_string()
            }
        }
        AccessPathKind::MaterializeInformationSchemaTable { table, .. } => {
            format!("Fill information schema table t{table}")
        }
        AccessPathKind::Append { children } => {
            format!("Append ({} branches)", children.len())
        }
        AccessPathKind::Windowing { needs_buffering, .. } => {
            if *needs_buffering {
                "Window aggregate with buffering".to_string()
            } else {
                "Window aggregate".to_string()
            }
        }
        AccessPathKind::Weedout { weedout_table, .. } => {
            format!("Remove duplicate rows using temporary table t{weedout_table}")
        }
        AccessPathKind::RemoveDuplicates { table, key_idx, .. } => {
            format!("Remove duplicates from input sorted on key {key_idx} of t{table}")
        }
        AccessPathKind::Alternative { .. } => "Alternative plans".to_string(),
        AccessPathKind::CacheInvalidator { name, .. } => {
            format!("Invalidate materialized tables (row from {name})")
        }
    }
}
