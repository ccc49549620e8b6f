// Derived-table key synthesis.
//
// Before join enumeration, equalities against columns of materialised
// derived tables are turned into candidate keys, so the optimizer can
// plan ref lookups into the materialised result. After planning, every
// candidate no chosen path actually uses is removed again, and the
// remaining keys are compacted with all plan references rewritten to
// the new key positions.

use std::collections::HashMap;

use crate::common::catalog::{Catalog, KeyInfo, KeyPart};
use crate::common::TableId;
use crate::error::Result;
use crate::optimizer::access_path::{AccessPathKind, PathId};
use crate::optimizer::expr::Expr;
use crate::optimizer::walk::{collect_post_order, WalkPolicy};
use crate::optimizer::{QueryBlock, QueryContext};

/// Default stored length of a synthesized key part.
const SYNTH_KEY_PART_LENGTH: u32 = 8;

/// Propose a candidate key over `fields` on a derived table. Returns
/// the key's position, or None when the table cannot take synthesized
/// keys (not derived, or it materialises a set operation, whose output
/// rows cannot be indexed). An identical existing key is reused.
pub fn propose_derived_key(
    catalog: &mut Catalog,
    table_id: TableId,
    fields: &[u32],
) -> Option<usize> {
    if fields.is_empty() {
        return None;
    }
    let table = catalog.table(table_id);
    if !table.is_derived || table.derived_from_set_operation {
        return None;
    }
    if let Some(existing) = table.key_info.iter().position(|key| {
        key.parts.len() == fields.len()
            && key.parts.iter().zip(fields).all(|(p, f)| p.field == *f)
    }) {
        return Some(existing);
    }

    let table = catalog.table_mut(table_id);
    let key_idx = table.key_info.len();
    if key_idx >= 64 {
        return None;
    }
    let parts: Vec<KeyPart> = fields
        .iter()
        .map(|&field| KeyPart {
            field,
            length: SYNTH_KEY_PART_LENGTH,
        })
        .collect();
    let mut key = KeyInfo::new(format!("<auto_key{key_idx}>"), parts);
    key.synthesized = true;
    table.key_info.push(key);
    for &field in fields {
        if let Some(column) = table.columns.get_mut(field as usize) {
            column.part_of_key |= 1 << key_idx;
        }
    }
    Some(key_idx)
}

/// Pre-planning pass: scan the WHERE clause and the given ON clauses
/// for equalities `derived.f = expr` and propose one candidate key per
/// derived table from the matched fields.
pub fn make_derived_keys(
    ctx: &mut QueryContext,
    query_block: &QueryBlock,
    on_conditions: &[Expr],
) -> Result<()> {
    let mut equalities: Vec<(&Expr, &Expr)> = Vec::new();
    if let Some(where_clause) = &query_block.where_clause {
        where_clause.collect_equalities(&mut equalities);
    }
    for condition in on_conditions {
        condition.collect_equalities(&mut equalities);
    }

    // Fields per derived table, in first-seen order.
    let mut proposals: Vec<(TableId, Vec<u32>)> = Vec::new();
    let mut note_field = |table: TableId, field: u32| {
        match proposals.iter_mut().find(|(t, _)| *t == table) {
            Some((_, fields)) => {
                if !fields.contains(&field) {
                    fields.push(field);
                }
            }
            None => proposals.push((table, vec![field])),
        }
    };

    for (left, right) in equalities {
        for (side, partner) in [(left, right), (right, left)] {
            let Expr::Column(c) = side else { continue };
            let table = ctx.catalog.table(c.table);
            if !table.is_derived || table.derived_from_set_operation {
                continue;
            }
            // A self-referencing equality cannot drive a lookup.
            if partner.used_tables() & crate::common::table_map_bit(c.table) != 0 {
                continue;
            }
            note_field(c.table, c.field);
        }
    }

    for (table_id, fields) in proposals {
        if propose_derived_key(&mut ctx.catalog, table_id, &fields).is_some()
            && ctx.trace.is_started()
        {
            let name = ctx.catalog.table(table_id).name.clone();
            ctx.trace.note(format!(
                "Proposed a {}-part candidate key on derived table '{name}'.",
                fields.len()
            ));
        }
    }
    Ok(())
}

/// Key references a path makes, if any: (table, key position).
fn key_reference(kind: &AccessPathKind) -> Option<(TableId, usize)> {
    match kind {
        AccessPathKind::Ref { key, .. }
        | AccessPathKind::RefOrNull { key, .. }
        | AccessPathKind::EqRef { key, .. }
        | AccessPathKind::PushedJoinRef { key, .. }
        | AccessPathKind::FullTextSearch { key, .. }
        | AccessPathKind::ConstTable { key }
        | AccessPathKind::Mrr { key, .. }
        | AccessPathKind::Alternative { used_ref: key, .. } => Some((key.table, key.key_idx)),
        AccessPathKind::IndexScan { table, key_idx, .. }
        | AccessPathKind::RemoveDuplicates { table, key_idx, .. }
        | AccessPathKind::NestedLoopSemijoinWithDuplicateRemoval {
            table, key_idx, ..
        } => Some((*table, *key_idx)),
        AccessPathKind::IndexRangeScan { table, ranges } => Some((*table, ranges.key_idx)),
        _ => None,
    }
}

fn remap_key_references(
    kind: &mut AccessPathKind,
    table_id: TableId,
    remap: &dyn Fn(usize) -> usize,
) {
    match kind {
        AccessPathKind::Ref { key, .. }
        | AccessPathKind::RefOrNull { key, .. }
        | AccessPathKind::EqRef { key, .. }
        | AccessPathKind::PushedJoinRef { key, .. }
        | AccessPathKind::FullTextSearch { key, .. }
        | AccessPathKind::ConstTable { key }
        | AccessPathKind::Mrr { key, .. }
        | AccessPathKind::Alternative { used_ref: key, .. } => {
            if key.table == table_id {
                key.key_idx = remap(key.key_idx);
            }
        }
        AccessPathKind::IndexScan { table, key_idx, .. }
        | AccessPathKind::RemoveDuplicates { table, key_idx, .. }
        | AccessPathKind::NestedLoopSemijoinWithDuplicateRemoval { table, key_idx, .. } => {
            if *table == table_id {
                *key_idx = remap(*key_idx);
            }
        }
        AccessPathKind::IndexRangeScan { table, ranges } => {
            if *table == table_id {
                ranges.key_idx = remap(ranges.key_idx);
            }
        }
        _ => {}
    }
}

/// Post-planning pass: drop every synthesized key the plan does not
/// use, compact the survivors and rewrite all plan references and
/// key-part bitmaps to the new key positions.
pub fn finalize_derived_keys(ctx: &mut QueryContext, query_block: &QueryBlock) {
    let Some(root) = query_block.root else { return };

    // Which keys does the final plan name?
    let mut used: HashMap<TableId, u64> = HashMap::new();
    let nodes: Vec<(PathId, _)> =
        collect_post_order(&ctx.arena, root, Some(query_block.join), WalkPolicy::EntireTree);
    for (id, _) in &nodes {
        if let Some((table, key_idx)) = key_reference(&ctx.arena.node(*id).kind) {
            *used.entry(table).or_insert(0) |= 1 << key_idx;
        }
    }

    for &table_id in &query_block.tables {
        if !ctx.catalog.table(table_id).is_derived {
            continue;
        }
        let used_keys = used.get(&table_id).copied().unwrap_or(0);

        // Decide which keys survive; unique and hash-dedup keys always
        // do, since they carry dedup semantics rather than access paths.
        let table = ctx.catalog.table(table_id);
        let keep: Vec<bool> = table
            .key_info
            .iter()
            .enumerate()
            .map(|(i, key)| {
                !key.synthesized || key.unique || key.hash_dedup || used_keys & (1 << i) != 0
            })
            .collect();
        if keep.iter().all(|&k| k) {
            continue;
        }

        // Old position -> new position for survivors.
        let mut new_idx = vec![usize::MAX; keep.len()];
        let mut next = 0usize;
        for (old, &kept) in keep.iter().enumerate() {
            if kept {
                new_idx[old] = next;
                next += 1;
            }
        }

        let table = ctx.catalog.table_mut(table_id);
        let mut old_keys = std::mem::take(&mut table.key_info);
        let mut kept_keys = Vec::with_capacity(next);
        for (old, key) in old_keys.drain(..).enumerate() {
            if keep[old] {
                kept_keys.push(key);
            }
        }
        table.key_info = kept_keys;
        if let Some(pk) = table.primary_key {
            table.primary_key = if keep[pk] { Some(new_idx[pk]) } else { None };
        }
        for column in &mut table.columns {
            let mut bitmap = 0u64;
            for (old, &kept) in keep.iter().enumerate() {
                if kept && column.part_of_key & (1 << old) != 0 {
                    bitmap |= 1 << new_idx[old];
                }
            }
            column.part_of_key = bitmap;
        }
        let mut covering = 0u64;
        for (old, &kept) in keep.iter().enumerate() {
            if kept && table.covering_keys & (1 << old) != 0 {
                covering |= 1 << new_idx[old];
            }
        }
        table.covering_keys = covering;

        for (id, _) in &nodes {
            remap_key_references(&mut ctx.arena.node_mut(*id).kind, table_id, &|old| {
                debug_assert!(keep[old], "plan references a pruned key");
                new_idx[old]
            });
        }

        if ctx.trace.is_started() {
            let name = ctx.catalog.table(table_id).name.clone();
            let kept = ctx.catalog.table(table_id).key_info.len();
            ctx.trace.note(format!(
                "Kept {kept} key(s) on derived table '{name}' after pruning unused candidates."
            ));
        }
    }
}
