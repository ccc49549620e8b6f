// Plan finalisation.
//
// The optimizer works on access paths whose materialising operators
// carry no actual temp tables; creating them during enumeration would
// be wasted work for every candidate not chosen. This pass runs once on
// the winning plan: it coalesces adjacent filters, instantiates the
// temp tables, rewrites expression references to the materialised
// columns through an explicit replacement map, builds filesort
// descriptors, and wraps constant condition fragments in one-shot
// caches. It is idempotent; a second call is a no-op.

use crate::common::catalog::Table;
use crate::common::{table_map_bit, TableId, TableMap};
use crate::error::Result;
use crate::optimizer::access_path::{
    AccessPathKind, CopyItem, Filesort, PathId, SortKeyDef, TempTableParams,
};
use crate::optimizer::expr::{cache_constant_subexpressions, rewrite, ColumnRef, Expr, ReplacementMap};
use crate::optimizer::walk::{collect_post_order, WalkPolicy};
use crate::optimizer::{QueryBlock, QueryContext};
use crate::storage::TempTableSpec;

/// Finalise the chosen plan of a query block. Idempotent: the block's
/// `needs_finalize` flag is cleared on success and a repeat call
/// returns immediately.
pub fn plan_finalize(ctx: &mut QueryContext, query_block: &mut QueryBlock) -> Result<()> {
    if !query_block.needs_finalize {
        return Ok(());
    }
    let Some(root) = query_block.root else {
        query_block.needs_finalize = false;
        return Ok(());
    };

    coalesce_filters(ctx, query_block, root);
    let map = instantiate_temp_tables(ctx, query_block, root)?;
    rewrite_remaining_references(ctx, query_block, root, &map);
    build_filesorts(ctx, query_block, root);
    cache_constant_conditions(ctx, query_block, root);

    query_block.needs_finalize = false;
    Ok(())
}

// ============================================================================
// Phase 1: filter coalescing
// ============================================================================

/// Merge every FILTER whose child is another FILTER with the same
/// subquery-materialisation setting into one AND condition.
fn coalesce_filters(ctx: &mut QueryContext, query_block: &QueryBlock, root: PathId) {
    let order = collect_post_order(
        &ctx.arena,
        root,
        Some(query_block.join),
        WalkPolicy::StopAtMaterialization,
    );
    for (id, _) in order {
        loop {
            let AccessPathKind::Filter {
                child,
                condition,
                materialize_subqueries,
            } = &ctx.arena.node(id).kind
            else {
                break;
            };
            let (child, outer_cond, outer_mat) = (*child, condition.clone(), *materialize_subqueries);
            let AccessPathKind::Filter {
                child: grandchild,
                condition: inner_cond,
                materialize_subqueries: inner_mat,
            } = &ctx.arena.node(child).kind
            else {
                break;
            };
            if outer_mat != *inner_mat {
                break;
            }
            let merged = Expr::and(vec![outer_cond, inner_cond.clone()]);
            let grandchild = *grandchild;
            let node = ctx.arena.node_mut(id);
            node.kind = AccessPathKind::Filter {
                child: grandchild,
                condition: merged,
                materialize_subqueries: outer_mat,
            };
        }
    }
}

// ============================================================================
// Phase 2 + 3: temp-table instantiation and reference rewriting
// ============================================================================

/// Create the missing temp tables bottom-up, threading a replacement
/// map so each later materialisation sees already-rewritten sources.
/// Returns the final map for the remaining reference rewrites.
fn instantiate_temp_tables(
    ctx: &mut QueryContext,
    query_block: &mut QueryBlock,
    root: PathId,
) -> Result<ReplacementMap> {
    let order = collect_post_order(&ctx.arena, root, Some(query_block.join), WalkPolicy::EntireTree);
    let mut map = ReplacementMap::new();
    let mut after_aggregation = false;

    for (id, _) in order {
        match &ctx.arena.node(id).kind {
            AccessPathKind::Aggregate { .. } => {
                after_aggregation = true;
                // Aggregation evaluates the rewritten arguments; any
                // rollup wrappers left on the projection are done now.
                for item in &mut query_block.select_list {
                    *item = item.unwrap_rollup();
                }
            }
            AccessPathKind::Filter { .. } => {
                let AccessPathKind::Filter { condition, .. } = &ctx.arena.node(id).kind else {
                    unreachable!()
                };
                let rewritten = rewrite(condition, &map);
                if let AccessPathKind::Filter { condition, .. } = &mut ctx.arena.node_mut(id).kind {
                    *condition = rewritten;
                }
            }
            AccessPathKind::Sort { .. } => {
                let AccessPathKind::Sort { order, .. } = &ctx.arena.node(id).kind else {
                    unreachable!()
                };
                let rewritten: Vec<SortKeyDef> = order
                    .iter()
                    .map(|k| SortKeyDef {
                        expr: rewrite(&k.expr, &map),
                        descending: k.descending,
                    })
                    .collect();
                if let AccessPathKind::Sort { order, .. } = &mut ctx.arena.node_mut(id).kind {
                    *order = rewritten;
                }
            }
            AccessPathKind::HashJoin { .. } => {
                let AccessPathKind::HashJoin { join_predicate, .. } = &ctx.arena.node(id).kind
                else {
                    unreachable!()
                };
                let equijoin: Vec<Expr> = join_predicate
                    .equijoin_conditions
                    .iter()
                    .map(|e| rewrite(e, &map))
                    .collect();
                let residual: Vec<Expr> = join_predicate
                    .join_conditions
                    .iter()
                    .map(|e| rewrite(e, &map))
                    .collect();
                if let AccessPathKind::HashJoin { join_predicate, .. } =
                    &mut ctx.arena.node_mut(id).kind
                {
                    join_predicate.equijoin_conditions = equijoin;
                    join_predicate.join_conditions = residual;
                }
            }
            AccessPathKind::Windowing { params, .. } => {
                if params.table.is_none() {
                    let (table, items) =
                        create_table_from_projection(ctx, query_block, id, "<window temporary>",
                            crate::optimizer::access_path::DedupReason::None, after_aggregation)?;
                    apply_copy_items(query_block, &mut map, &items);
                    if let AccessPathKind::Windowing { params, .. } =
                        &mut ctx.arena.node_mut(id).kind
                    {
                        params.table = Some(table);
                        params.copy_items = items;
                    }
                }
            }
            AccessPathKind::Stream { params, .. } => {
                if params.table.is_none() {
                    let (table, items) =
                        create_table_from_projection(ctx, query_block, id, "<stream temporary>",
                            crate::optimizer::access_path::DedupReason::None, after_aggregation)?;
                    apply_copy_items(query_block, &mut map, &items);
                    if let AccessPathKind::Stream { params, .. } = &mut ctx.arena.node_mut(id).kind {
                        params.table = Some(table);
                        params.copy_items = items;
                    }
                }
            }
            AccessPathKind::TemptableAggregate { params, .. } => {
                after_aggregation = true;
                if params.table.is_none() {
                    let dedup = params.dedup_reason;
                    let (table, items) = create_table_from_projection(
                        ctx,
                        query_block,
                        id,
                        "<group temporary>",
                        dedup,
                        true,
                    )?;
                    apply_copy_items(query_block, &mut map, &items);
                    let mut read_side = None;
                    if let AccessPathKind::TemptableAggregate { params, table_path, .. } =
                        &mut ctx.arena.node_mut(id).kind
                    {
                        params.table = Some(table);
                        params.copy_items = items;
                        read_side = Some(*table_path);
                    }
                    if let Some(table_path) = read_side {
                        retarget_table_path(&mut ctx.arena.node_mut(table_path).kind, table);
                    }
                }
            }
            AccessPathKind::Materialize { params, .. } => {
                if params.table.is_none() {
                    // A materialisation directly above a window reuses
                    // the window's output table, unless it must
                    // deduplicate into a fresh one.
                    let window_table = (!params.is_dedup())
                        .then(|| {
                            params.operands.iter().find_map(|op| {
                                match &ctx.arena.node(op.subquery_path).kind {
                                    AccessPathKind::Windowing { params, .. } => params.table,
                                    _ => None,
                                }
                            })
                        })
                        .flatten();
                    if let Some(table) = window_table {
                        let mut read_side = None;
                        if let AccessPathKind::Materialize { params, table_path, .. } =
                            &mut ctx.arena.node_mut(id).kind
                        {
                            params.table = Some(table);
                            read_side = Some(*table_path);
                        }
                        if let Some(table_path) = read_side {
                            retarget_table_path(&mut ctx.arena.node_mut(table_path).kind, table);
                        }
                    } else {
                        let dedup = params.dedup_reason;
                        let (table, items) = create_table_from_projection(
                            ctx,
                            query_block,
                            id,
                            "<materialized temporary>",
                            dedup,
                            after_aggregation,
                        )?;
                        apply_copy_items(query_block, &mut map, &items);
                        let mut read_side = None;
                        if let AccessPathKind::Materialize { params, table_path } =
                            &mut ctx.arena.node_mut(id).kind
                        {
                            params.table = Some(table);
                            if let Some(first) = params.operands.first_mut() {
                                first.params = TempTableParams {
                                    table: Some(table),
                                    copy_items: items,
                                    dedup_reason: dedup,
                                };
                            }
                            read_side = Some(*table_path);
                        }
                        if let Some(table_path) = read_side {
                            retarget_table_path(&mut ctx.arena.node_mut(table_path).kind, table);
                        }
                    }
                }
            }
            _ => {}
        }
    }
    Ok(map)
}

/// Point a materialisation's read side at the table that now exists.
fn retarget_table_path(kind: &mut AccessPathKind, table: TableId) {
    match kind {
        AccessPathKind::TableScan { table: t } | AccessPathKind::IndexScan { table: t, .. } => {
            *t = table;
        }
        AccessPathKind::Ref { key, .. }
        | AccessPathKind::RefOrNull { key, .. }
        | AccessPathKind::EqRef { key, .. } => key.table = table,
        _ => {}
    }
}

/// Create a temp table shaped like the current projection list and
/// return it with the projection-to-column copy list.
fn create_table_from_projection(
    ctx: &mut QueryContext,
    query_block: &QueryBlock,
    path: PathId,
    name: &str,
    dedup_reason: crate::optimizer::access_path::DedupReason,
    after_aggregation: bool,
) -> Result<(TableId, Vec<CopyItem>)> {
    let estimated_rows = input_rows_of(ctx, path);
    let column_names: Vec<String> = (0..query_block.select_list.len())
        .map(|i| format!("tmp_field_{i}"))
        .collect();
    let spec = TempTableSpec {
        name: name.to_string(),
        column_names,
        dedup_reason,
        estimated_rows,
        row_width: (query_block.select_list.len() as u32 * 8).max(8),
    };
    let table = ctx.engine.create_temp_table(&mut ctx.catalog, &spec)?;
    ctx.register_temp_table(table);

    let items: Vec<CopyItem> = query_block
        .select_list
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let source = if after_aggregation {
                item.unwrap_rollup()
            } else {
                item.clone()
            };
            CopyItem {
                source,
                target: ColumnRef::new(table, i as u32),
            }
        })
        .collect();
    Ok((table, items))
}

/// Register the copy list in the replacement map and retarget the
/// projection itself, so later materialisations copy from this table.
fn apply_copy_items(query_block: &mut QueryBlock, map: &mut ReplacementMap, items: &[CopyItem]) {
    for item in items {
        map.add(item.source.clone(), Expr::Column(item.target));
    }
    for select_item in &mut query_block.select_list {
        *select_item = rewrite(select_item, map);
    }
}

/// First estimated row count at or below the node; used to size temp
/// tables.
fn input_rows_of(ctx: &QueryContext, path: PathId) -> f64 {
    let node = ctx.arena.node(path);
    let rows = match &node.kind {
        AccessPathKind::Windowing { child, .. }
        | AccessPathKind::Stream { child, .. } => ctx.arena.node(*child).num_output_rows,
        AccessPathKind::TemptableAggregate { subquery_path, .. } => {
            ctx.arena.node(*subquery_path).num_output_rows
        }
        AccessPathKind::Materialize { params, .. } => params
            .operands
            .iter()
            .map(|op| ctx.arena.node(op.subquery_path).num_output_rows.max(0.0))
            .sum(),
        _ => node.num_output_rows,
    };
    rows.max(0.0)
}

// ============================================================================
// Remaining reference rewrites
// ============================================================================

/// Rewrites that have to wait for the complete replacement map: the
/// update value list and conditions carried by engine-evaluated paths.
fn rewrite_remaining_references(
    ctx: &mut QueryContext,
    query_block: &mut QueryBlock,
    root: PathId,
    map: &ReplacementMap,
) {
    if map.is_empty() {
        return;
    }
    for value in &mut query_block.update_values {
        *value = rewrite(value, map);
    }
    let order = collect_post_order(&ctx.arena, root, Some(query_block.join), WalkPolicy::EntireTree);
    for (id, _) in order {
        match &ctx.arena.node(id).kind {
            AccessPathKind::Mrr { cache_condition: Some(cond), .. } => {
                let rewritten = rewrite(cond, map);
                if let AccessPathKind::Mrr { cache_condition, .. } =
                    &mut ctx.arena.node_mut(id).kind
                {
                    *cache_condition = Some(rewritten);
                }
            }
            AccessPathKind::MaterializeInformationSchemaTable {
                condition: Some(cond),
                ..
            } => {
                let rewritten = rewrite(cond, map);
                if let AccessPathKind::MaterializeInformationSchemaTable { condition, .. } =
                    &mut ctx.arena.node_mut(id).kind
                {
                    *condition = Some(rewritten);
                }
            }
            _ => {}
        }
    }
}

// ============================================================================
// Phase 4: filesort construction
// ============================================================================

/// Base and temp tables whose rows are available at a node, without
/// crossing materialisation boundaries: a materialised table counts,
/// the tables inside it do not.
fn tables_available_below(ctx: &QueryContext, query_block: &QueryBlock, root: PathId) -> TableMap {
    let mut available: TableMap = 0;
    crate::optimizer::walk::walk(
        &ctx.arena,
        root,
        Some(query_block.join),
        WalkPolicy::StopAtMaterialization,
        false,
        &mut |id, _| {
            match &ctx.arena.node(id).kind {
                AccessPathKind::TableScan { table }
                | AccessPathKind::IndexScan { table, .. }
                | AccessPathKind::FollowTail { table }
                | AccessPathKind::IndexRangeScan { table, .. }
                | AccessPathKind::DynamicIndexRangeScan { table, .. }
                | AccessPathKind::MaterializedTableFunction { table, .. }
                | AccessPathKind::MaterializeInformationSchemaTable { table, .. } => {
                    available |= table_map_bit(*table);
                }
                AccessPathKind::Ref { key, .. }
                | AccessPathKind::RefOrNull { key, .. }
                | AccessPathKind::EqRef { key, .. }
                | AccessPathKind::PushedJoinRef { key, .. }
                | AccessPathKind::FullTextSearch { key, .. }
                | AccessPathKind::ConstTable { key }
                | AccessPathKind::Mrr { key, .. } => {
                    available |= table_map_bit(key.table);
                }
                AccessPathKind::Windowing { params, .. }
                | AccessPathKind::Stream { params, .. }
                | AccessPathKind::TemptableAggregate { params, .. } => {
                    if let Some(t) = params.table {
                        available |= table_map_bit(t);
                    }
                }
                AccessPathKind::Materialize { params, .. } => {
                    if let Some(t) = params.table {
                        available |= table_map_bit(t);
                    }
                }
                _ => {}
            }
            false
        },
    );
    available
}

fn base_tables_below(ctx: &QueryContext, query_block: &QueryBlock, root: PathId) -> Vec<TableId> {
    let mut tables = Vec::new();
    let available = tables_available_below(ctx, query_block, root);
    for t in 0..ctx.catalog.len() as TableId {
        if available & table_map_bit(t) != 0 {
            tables.push(t);
        }
    }
    tables
}

/// Build a filesort descriptor for every SORT node from its rewritten
/// order items. Sorts whose order references columns outside the
/// projection cannot carry addon fields and fall back to row ids.
fn build_filesorts(ctx: &mut QueryContext, query_block: &QueryBlock, root: PathId) {
    let order_list = collect_post_order(
        &ctx.arena,
        root,
        Some(query_block.join),
        WalkPolicy::EntireQueryBlock,
    );
    for (id, _) in order_list {
        let AccessPathKind::Sort {
            child,
            order,
            filesort,
            remove_duplicates,
            force_sort_rowids,
            limit,
            ..
        } = &ctx.arena.node(id).kind
        else {
            continue;
        };
        if filesort.is_some() {
            continue;
        }
        let child = *child;
        let keys: Vec<SortKeyDef> = order.clone();
        let remove_duplicates = *remove_duplicates;
        let force_sort_rowids = *force_sort_rowids;
        let limit = *limit;

        // Sort-order invariant: everything the order refers to must be
        // available below this point; materialised tables count, their
        // insides do not. A violation is a finaliser bug.
        let available = tables_available_below(ctx, query_block, child);
        let referenced: TableMap = keys.iter().fold(0, |m, k| m | k.expr.used_tables());
        if referenced & !available != 0 {
            debug_assert!(
                false,
                "sort order references tables {referenced:b} outside the available set {available:b}"
            );
            // Conservative fallback in release: keep the sort, skip the
            // filesort optimisation.
            tracing::warn!(
                path = id.index(),
                "sort order references unavailable tables; filesort optimisation skipped"
            );
            continue;
        }

        // Addon fields carry the projected values through the sort; if
        // some referenced column is not in the projection, rows must be
        // refetched by row id afterwards.
        let use_addon_fields = keys.iter().all(|k| {
            k.expr.is_constant()
                || query_block.select_list.contains(&k.expr)
                || matches!(&k.expr, Expr::Column(c)
                    if query_block.select_list.contains(&Expr::Column(*c)))
        });

        let mut rowid_tables: TableMap = 0;
        if !use_addon_fields {
            for t in base_tables_below(ctx, query_block, child) {
                ctx.catalog.table_mut(t).force_rowid = true;
                rowid_tables |= table_map_bit(t);
            }
        }

        let filesort_id = ctx.register_filesort(Filesort {
            keys,
            limit,
            remove_duplicates,
            use_addon_fields,
            force_sort_rowids,
        });
        if let AccessPathKind::Sort {
            filesort,
            tables_to_get_rowid_for,
            ..
        } = &mut ctx.arena.node_mut(id).kind
        {
            *filesort = Some(filesort_id);
            *tables_to_get_rowid_for = rowid_tables;
        }
    }
}

// ============================================================================
// Phase 5: constant-condition caching
// ============================================================================

fn cache_constant_conditions(ctx: &mut QueryContext, query_block: &QueryBlock, root: PathId) {
    let order = collect_post_order(&ctx.arena, root, Some(query_block.join), WalkPolicy::EntireTree);
    for (id, _) in order {
        match &ctx.arena.node(id).kind {
            AccessPathKind::Filter { condition, .. } => {
                let cached = cache_constant_subexpressions(condition);
                if let AccessPathKind::Filter { condition, .. } = &mut ctx.arena.node_mut(id).kind {
                    *condition = cached;
                }
            }
            AccessPathKind::HashJoin { join_predicate, .. } => {
                let equijoin: Vec<Expr> = join_predicate
                    .equijoin_conditions
                    .iter()
                    .map(cache_constant_subexpressions)
                    .collect();
                let residual: Vec<Expr> = join_predicate
                    .join_conditions
                    .iter()
                    .map(cache_constant_subexpressions)
                    .collect();
                if let AccessPathKind::HashJoin { join_predicate, .. } =
                    &mut ctx.arena.node_mut(id).kind
                {
                    join_predicate.equijoin_conditions = equijoin;
                    join_predicate.join_conditions = residual;
                }
            }
            _ => {}
        }
    }
}

/// Tables a path reads, across the entire tree. Exposed for invariant
/// checks in tests and debug builds.
pub fn get_used_tables(ctx: &QueryContext, query_block: &QueryBlock, root: PathId) -> TableMap {
    tables_available_below(ctx, query_block, root)
}
