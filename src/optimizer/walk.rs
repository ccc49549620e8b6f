// Access-path traversal.
//
// Walks every path below a root with a policy deciding whether to cross
// materialisation and query-block boundaries. The `join` parameter
// tracks which query block the current path belongs to, since that is
// not implicit from the path itself; it changes when the walk crosses
// into a stream/materialize operand or an appended block.

use smallvec::SmallVec;

use crate::optimizer::access_path::{AccessPathKind, PathArena, PathId};
use crate::optimizer::JoinId;

/// How far a walk may descend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkPolicy {
    /// Descend through everything, including query-block boundaries.
    EntireTree,
    /// Cross materialisation boundaries only when the operand belongs
    /// to the same query block as the walk.
    EntireQueryBlock,
    /// Do not descend through MATERIALIZE, STREAM or APPEND operands.
    StopAtMaterialization,
}

/// Visit every access path below `root`. In pre-order, a visitor
/// returning true prunes the subtree; in post-order the return value is
/// ignored (children were already visited).
pub fn walk(
    arena: &PathArena,
    root: PathId,
    join: Option<JoinId>,
    policy: WalkPolicy,
    post_order: bool,
    visitor: &mut impl FnMut(PathId, Option<JoinId>) -> bool,
) {
    if policy == WalkPolicy::EntireQueryBlock {
        debug_assert!(join.is_some(), "EntireQueryBlock requires a join context");
    }
    if !post_order && visitor(root, join) {
        return;
    }
    for (child, child_join) in children_to_visit(arena, root, join, policy) {
        walk(arena, child, child_join, policy, post_order, visitor);
    }
    if post_order {
        visitor(root, join);
    }
}

/// Post-order id list; convenient when the caller needs to mutate the
/// arena while processing.
pub fn collect_post_order(
    arena: &PathArena,
    root: PathId,
    join: Option<JoinId>,
    policy: WalkPolicy,
) -> Vec<(PathId, Option<JoinId>)> {
    let mut out = Vec::new();
    walk(arena, root, join, policy, true, &mut |id, j| {
        out.push((id, j));
        false
    });
    out
}

type ChildList = SmallVec<[(PathId, Option<JoinId>); 4]>;

fn children_to_visit(
    arena: &PathArena,
    id: PathId,
    join: Option<JoinId>,
    policy: WalkPolicy,
) -> ChildList {
    let mut out = ChildList::new();
    match &arena.node(id).kind {
        // Leaves. ZERO_ROWS keeps its unused subtree only for tracing,
        // and a materialized table function's body is run by its own
        // iterator; neither is walked.
        AccessPathKind::TableScan { .. }
        | AccessPathKind::IndexScan { .. }
        | AccessPathKind::Ref { .. }
        | AccessPathKind::RefOrNull { .. }
        | AccessPathKind::EqRef { .. }
        | AccessPathKind::PushedJoinRef { .. }
        | AccessPathKind::FullTextSearch { .. }
        | AccessPathKind::ConstTable { .. }
        | AccessPathKind::Mrr { .. }
        | AccessPathKind::FollowTail { .. }
        | AccessPathKind::IndexRangeScan { .. }
        | AccessPathKind::DynamicIndexRangeScan { .. }
        | AccessPathKind::TableValueConstructor
        | AccessPathKind::FakeSingleRow
        | AccessPathKind::ZeroRows { .. }
        | AccessPathKind::ZeroRowsAggregated { .. }
        | AccessPathKind::MaterializedTableFunction { .. }
        | AccessPathKind::UnqualifiedCount => {}

        AccessPathKind::NestedLoopJoin { outer, inner, .. }
        | AccessPathKind::NestedLoopSemijoinWithDuplicateRemoval { outer, inner, .. }
        | AccessPathKind::BkaJoin { outer, inner, .. }
        | AccessPathKind::HashJoin { outer, inner, .. } => {
            out.push((*outer, join));
            out.push((*inner, join));
        }

        AccessPathKind::Filter { child, .. }
        | AccessPathKind::Sort { child, .. }
        | AccessPathKind::Aggregate { child, .. }
        | AccessPathKind::LimitOffset { child, .. }
        | AccessPathKind::Windowing { child, .. }
        | AccessPathKind::Weedout { child, .. }
        | AccessPathKind::RemoveDuplicates { child, .. }
        | AccessPathKind::Alternative { child, .. }
        | AccessPathKind::CacheInvalidator { child, .. } => out.push((*child, join)),

        AccessPathKind::TemptableAggregate {
            subquery_path,
            table_path,
            ..
        } => {
            out.push((*subquery_path, join));
            out.push((*table_path, join));
        }

        AccessPathKind::Stream {
            child,
            join: stream_join,
            ..
        } => {
            let descend = match policy {
                WalkPolicy::EntireTree => true,
                WalkPolicy::EntireQueryBlock => Some(*stream_join) == join,
                WalkPolicy::StopAtMaterialization => false,
            };
            if descend {
                out.push((*child, Some(*stream_join)));
            }
        }

        AccessPathKind::Materialize { table_path, params } => {
            // The read side of the temp table belongs to this block and
            // is always walked.
            out.push((*table_path, join));
            for operand in &params.operands {
                let descend = match policy {
                    WalkPolicy::EntireTree => true,
                    WalkPolicy::EntireQueryBlock => Some(operand.join) == join,
                    WalkPolicy::StopAtMaterialization => false,
                };
                if descend {
                    out.push((operand.subquery_path, Some(operand.join)));
                }
            }
        }

        AccessPathKind::MaterializeInformationSchemaTable { table_path, .. } => {
            out.push((*table_path, join));
        }

        AccessPathKind::Append { children } => {
            for child in children {
                let descend = match policy {
                    WalkPolicy::EntireTree => true,
                    WalkPolicy::EntireQueryBlock => Some(child.join) == join,
                    WalkPolicy::StopAtMaterialization => false,
                };
                if descend {
                    out.push((child.path, Some(child.join)));
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::access_path::MaterializeParams;
    use crate::optimizer::expr::Expr;
    use crate::optimizer::relational::JoinKind;

    fn simple_tree(arena: &mut PathArena) -> PathId {
        let scan0 = arena.table_scan(0);
        let scan1 = arena.table_scan(1);
        let join = arena.nested_loop_join(scan0, scan1, JoinKind::Inner);
        arena.filter(join, Expr::eq(Expr::column(0, 0), Expr::int(1)), false)
    }

    #[test]
    fn test_pre_order_visits_parent_first() {
        let mut arena = PathArena::new();
        let root = simple_tree(&mut arena);
        let mut seen = Vec::new();
        walk(&arena, root, None, WalkPolicy::EntireTree, false, &mut |id, _| {
            seen.push(id);
            false
        });
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[0], root);
    }

    #[test]
    fn test_post_order_is_reverse_of_pre_order_here() {
        // For trees where pruning does not apply, post-order visits the
        // same nodes as pre-order.
        let mut arena = PathArena::new();
        let root = simple_tree(&mut arena);
        let mut pre = Vec::new();
        walk(&arena, root, None, WalkPolicy::EntireTree, false, &mut |id, _| {
            pre.push(id);
            false
        });
        let mut post = Vec::new();
        walk(&arena, root, None, WalkPolicy::EntireTree, true, &mut |id, _| {
            post.push(id);
            false
        });
        let mut pre_sorted = pre.clone();
        let mut post_sorted = post.clone();
        pre_sorted.sort_by_key(|p| p.index());
        post_sorted.sort_by_key(|p| p.index());
        assert_eq!(pre_sorted, post_sorted);
        assert_eq!(*post.last().unwrap(), root);
    }

    #[test]
    fn test_pre_order_pruning_skips_subtree() {
        let mut arena = PathArena::new();
        let root = simple_tree(&mut arena);
        let mut seen = Vec::new();
        walk(&arena, root, None, WalkPolicy::EntireTree, false, &mut |id, _| {
            seen.push(id);
            // Prune below the filter.
            matches!(arena.node(id).kind, AccessPathKind::Filter { .. })
        });
        assert_eq!(seen, vec![root]);
    }

    #[test]
    fn test_stop_at_materialization() {
        let mut arena = PathArena::new();
        let inner_scan = arena.table_scan(0);
        let params = MaterializeParams::single(inner_scan, JoinId(1));
        let read_side = arena.table_scan(2);
        let mat = arena.materialize(read_side, params);

        let mut seen = Vec::new();
        walk(
            &arena,
            mat,
            Some(JoinId(0)),
            WalkPolicy::StopAtMaterialization,
            false,
            &mut |id, _| {
                seen.push(id);
                false
            },
        );
        // The materialize node and its table path, not the operand.
        assert!(seen.contains(&mat));
        assert!(seen.contains(&read_side));
        assert!(!seen.contains(&inner_scan));
    }

    #[test]
    fn test_entire_query_block_crosses_matching_join_only() {
        let mut arena = PathArena::new();
        let same_block_child = arena.table_scan(0);
        let other_block_child = arena.table_scan(1);
        let same_stream = arena.stream(same_block_child, JoinId(0));
        let other_stream = arena.stream(other_block_child, JoinId(1));
        let join = arena.nested_loop_join(same_stream, other_stream, JoinKind::Inner);

        let mut seen = Vec::new();
        walk(
            &arena,
            join,
            Some(JoinId(0)),
            WalkPolicy::EntireQueryBlock,
            false,
            &mut |id, _| {
                seen.push(id);
                false
            },
        );
        assert!(seen.contains(&same_block_child));
        assert!(!seen.contains(&other_block_child));
    }

    #[test]
    fn test_entire_tree_descends_everywhere_and_tracks_join() {
        let mut arena = PathArena::new();
        let child = arena.table_scan(0);
        let stream = arena.stream(child, JoinId(3));
        let mut joins = Vec::new();
        walk(&arena, stream, Some(JoinId(0)), WalkPolicy::EntireTree, false, &mut |id, j| {
            joins.push((id, j));
            false
        });
        assert_eq!(joins.len(), 2);
        assert_eq!(joins[1], (child, Some(JoinId(3))));
    }
}
