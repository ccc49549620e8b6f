// Relational expressions: the join structure of a query block before
// join ordering. Leaves are table references; interior nodes are joins
// carrying their conditions, with equijoin conditions split out for
// hash-join probing.

use crate::common::{table_map_bit, TableId, TableMap};
use crate::optimizer::expr::Expr;

/// Join operator kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Semi,
    Anti,
    FullOuter,
    /// Inner join whose sides must not be commuted
    StraightInner,
    /// Flattened n-ary inner join, used during conflict detection
    Multi,
}

/// A join edge as seen by the cost model: the conditions, the side
/// bitmaps and the optimizer's selectivity estimate for the predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinPredicate {
    pub join_kind: JoinKind,
    /// Equalities eligible for hash-join probing
    pub equijoin_conditions: Vec<Expr>,
    /// Residual conditions
    pub join_conditions: Vec<Expr>,
    /// Base tables of the right-hand side
    pub right_tables: TableMap,
    /// Fraction of the Cartesian product passing the predicate
    pub selectivity: f64,
}

impl JoinPredicate {
    pub fn inner(equijoin_conditions: Vec<Expr>, right_tables: TableMap, selectivity: f64) -> Self {
        Self {
            join_kind: JoinKind::Inner,
            equijoin_conditions,
            join_conditions: Vec::new(),
            right_tables,
            selectivity,
        }
    }
}

/// Binary tree of joins over table references.
#[derive(Debug, Clone, PartialEq)]
pub enum RelationalExpression {
    Table {
        table: TableId,
        /// Conditions that may be pushed down to this table
        pushable_conditions: Vec<Expr>,
    },
    Join {
        kind: JoinKind,
        left: Box<RelationalExpression>,
        right: Box<RelationalExpression>,
        join_conditions: Vec<Expr>,
        equijoin_conditions: Vec<Expr>,
    },
}

impl RelationalExpression {
    pub fn table(table: TableId) -> Self {
        RelationalExpression::Table {
            table,
            pushable_conditions: Vec::new(),
        }
    }

    pub fn join(kind: JoinKind, left: RelationalExpression, right: RelationalExpression) -> Self {
        RelationalExpression::Join {
            kind,
            left: Box::new(left),
            right: Box::new(right),
            join_conditions: Vec::new(),
            equijoin_conditions: Vec::new(),
        }
    }

    /// Bitmap of base tables covered by this subtree.
    pub fn tables_in_subtree(&self) -> TableMap {
        match self {
            RelationalExpression::Table { table, .. } => table_map_bit(*table),
            RelationalExpression::Join { left, right, .. } => {
                left.tables_in_subtree() | right.tables_in_subtree()
            }
        }
    }

    /// Check the structural invariant: each join covers exactly the
    /// disjoint union of its children's tables.
    pub fn validate_table_coverage(&self) -> bool {
        match self {
            RelationalExpression::Table { .. } => true,
            RelationalExpression::Join { left, right, .. } => {
                let l = left.tables_in_subtree();
                let r = right.tables_in_subtree();
                l & r == 0 && left.validate_table_coverage() && right.validate_table_coverage()
            }
        }
    }
}
