// Scalar expression model.
//
// A deliberately small item tree: enough structure for the planner to
// track which tables an expression touches, find equalities, locate
// contained subqueries, and rewrite references when results move into
// temp tables. Rewriting is a pure function over an explicit
// replacement map; nothing is mutated in place.

use std::fmt;

use crate::common::{table_map_bit, TableId, TableMap, Value};
use crate::optimizer::access_path::PathId;

/// Reference to one column of a table (base, derived or temp).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnRef {
    pub table: TableId,
    pub field: u32,
}

impl ColumnRef {
    pub fn new(table: TableId, field: u32) -> Self {
        Self { table, field }
    }
}

/// Non-equality comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Ne,
}

/// Aggregate functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

/// How a subquery contained in a condition can be executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubqueryStrategy {
    /// Can be materialised once and probed
    Materializable,
    /// Must be re-evaluated per row
    NonMaterializable,
    /// Independent of the outer row; evaluated once
    IndependentSingleRow,
}

/// A subquery reachable from a condition
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContainedSubquery {
    pub path: PathId,
    /// Estimated bytes per row of the materialised result
    pub row_width: u32,
    pub strategy: SubqueryStrategy,
}

/// Scalar expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(ColumnRef),
    Literal(Value),
    /// Equality; the only join-condition form eligible for hash probing
    Eq(Box<Expr>, Box<Expr>),
    Cmp {
        op: CmpOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Func {
        name: String,
        args: Vec<Expr>,
    },
    Aggregate {
        func: AggFunc,
        arg: Option<Box<Expr>>,
    },
    /// Wrapper placed on group expressions under ROLLUP; unwrapped by
    /// the finaliser above the aggregate.
    RollupGroup {
        level: usize,
        inner: Box<Expr>,
    },
    /// One-shot cache around a constant subexpression
    Cached(Box<Expr>),
    Subquery(ContainedSubquery),
}

impl Expr {
    pub fn column(table: TableId, field: u32) -> Self {
        Expr::Column(ColumnRef::new(table, field))
    }

    pub fn int(v: i64) -> Self {
        Expr::Literal(Value::Integer(v))
    }

    pub fn eq(left: Expr, right: Expr) -> Self {
        Expr::Eq(Box::new(left), Box::new(right))
    }

    /// Conjunction; flattens nested ANDs and collapses trivial cases.
    pub fn and(mut conditions: Vec<Expr>) -> Self {
        let mut flat = Vec::with_capacity(conditions.len());
        for c in conditions.drain(..) {
            match c {
                Expr::And(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        if flat.len() == 1 {
            flat.pop().unwrap()
        } else {
            Expr::And(flat)
        }
    }

    /// Bitmap of tables this expression references. Subqueries count as
    /// closed: their table references stay inside their own block.
    pub fn used_tables(&self) -> TableMap {
        let mut map = 0;
        self.visit(&mut |e| {
            if let Expr::Column(c) = e {
                map |= table_map_bit(c.table);
            }
        });
        map
    }

    /// True if the expression references no column, aggregate or
    /// subquery and therefore evaluates to the same value for every row.
    pub fn is_constant(&self) -> bool {
        let mut constant = true;
        self.visit(&mut |e| {
            if matches!(e, Expr::Column(_) | Expr::Aggregate { .. } | Expr::Subquery(_)) {
                constant = false;
            }
        });
        constant
    }

    pub fn has_aggregate(&self) -> bool {
        let mut found = false;
        self.visit(&mut |e| {
            if matches!(e, Expr::Aggregate { .. }) {
                found = true;
            }
        });
        found
    }

    pub fn has_rollup_group(&self) -> bool {
        let mut found = false;
        self.visit(&mut |e| {
            if matches!(e, Expr::RollupGroup { .. }) {
                found = true;
            }
        });
        found
    }

    /// Pre-order visit of the expression tree.
    pub fn visit(&self, f: &mut impl FnMut(&Expr)) {
        f(self);
        match self {
            Expr::Column(_) | Expr::Literal(_) | Expr::Subquery(_) => {}
            Expr::Eq(l, r) => {
                l.visit(f);
                r.visit(f);
            }
            Expr::Cmp { left, right, .. } => {
                left.visit(f);
                right.visit(f);
            }
            Expr::And(cs) | Expr::Or(cs) => {
                for c in cs {
                    c.visit(f);
                }
            }
            Expr::Func { args, .. } => {
                for a in args {
                    a.visit(f);
                }
            }
            Expr::Aggregate { arg, .. } => {
                if let Some(a) = arg {
                    a.visit(f);
                }
            }
            Expr::RollupGroup { inner, .. } | Expr::Cached(inner) => inner.visit(f),
        }
    }

    /// Apply `f` to every contained subquery.
    pub fn for_each_subquery(&self, f: &mut impl FnMut(&ContainedSubquery)) {
        self.visit(&mut |e| {
            if let Expr::Subquery(s) = e {
                f(s);
            }
        });
    }

    /// Collect the equality conjuncts of a condition. Walks through AND
    /// only; an equality under OR is not usable as a key equality.
    pub fn collect_equalities<'a>(&'a self, out: &mut Vec<(&'a Expr, &'a Expr)>) {
        match self {
            Expr::Eq(l, r) => out.push((l, r)),
            Expr::And(cs) => {
                for c in cs {
                    c.collect_equalities(out);
                }
            }
            _ => {}
        }
    }

    /// Strip rollup-group wrappers, recursively.
    pub fn unwrap_rollup(&self) -> Expr {
        match self {
            Expr::RollupGroup { inner, .. } => inner.unwrap_rollup(),
            Expr::Eq(l, r) => Expr::Eq(Box::new(l.unwrap_rollup()), Box::new(r.unwrap_rollup())),
            Expr::Cmp { op, left, right } => Expr::Cmp {
                op: *op,
                left: Box::new(left.unwrap_rollup()),
                right: Box::new(right.unwrap_rollup()),
            },
            Expr::And(cs) => Expr::And(cs.iter().map(Expr::unwrap_rollup).collect()),
            Expr::Or(cs) => Expr::Or(cs.iter().map(Expr::unwrap_rollup).collect()),
            Expr::Func { name, args } => Expr::Func {
                name: name.clone(),
                args: args.iter().map(Expr::unwrap_rollup).collect(),
            },
            Expr::Aggregate { func, arg } => Expr::Aggregate {
                func: *func,
                arg: arg.as_ref().map(|a| Box::new(a.unwrap_rollup())),
            },
            Expr::Cached(inner) => Expr::Cached(Box::new(inner.unwrap_rollup())),
            other => other.clone(),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(c) => write!(f, "t{}.f{}", c.table, c.field),
            Expr::Literal(v) => match v {
                Value::Null => write!(f, "NULL"),
                Value::Boolean(b) => write!(f, "{b}"),
                Value::Integer(i) => write!(f, "{i}"),
                Value::Float(x) => write!(f, "{x}"),
                Value::String(s) => write!(f, "'{s}'"),
                Value::Bytes(b) => write!(f, "x'{}'", b.len()),
            },
            Expr::Eq(l, r) => write!(f, "({l} = {r})"),
            Expr::Cmp { op, left, right } => {
                let sym = match op {
                    CmpOp::Lt => "<",
                    CmpOp::Le => "<=",
                    CmpOp::Gt => ">",
                    CmpOp::Ge => ">=",
                    CmpOp::Ne => "<>",
                };
                write!(f, "({left} {sym} {right})")
            }
            Expr::And(cs) => {
                write!(f, "(")?;
                for (i, c) in cs.iter().enumerate() {
                    if i > 0 {
                        write!(f, " AND ")?;
                    }
                    write!(f, "{c}")?;
                }
                write!(f, ")")
            }
            Expr::Or(cs) => {
                write!(f, "(")?;
                for (i, c) in cs.iter().enumerate() {
                    if i > 0 {
                        write!(f, " OR ")?;
                    }
                    write!(f, "{c}")?;
                }
                write!(f, ")")
            }
            Expr::Func { name, args } => {
                write!(f, "{name}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
            Expr::Aggregate { func, arg } => {
                let name = match func {
                    AggFunc::Count => "COUNT",
                    AggFunc::Sum => "SUM",
                    AggFunc::Avg => "AVG",
                    AggFunc::Min => "MIN",
                    AggFunc::Max => "MAX",
                };
                match arg {
                    Some(a) => write!(f, "{name}({a})"),
                    None => write!(f, "{name}(*)"),
                }
            }
            Expr::RollupGroup { level, inner } => write!(f, "rollup_group@{level}({inner})"),
            Expr::Cached(inner) => write!(f, "cache({inner})"),
            Expr::Subquery(s) => write!(f, "subquery(path {})", s.path.index()),
        }
    }
}

// ============================================================================
// Rewriting
// ============================================================================

/// Source-to-target expression replacements captured by one or more
/// materialisations. Lookup is structural equality; projection lists are
/// short, so a linear scan beats hashing floats.
#[derive(Debug, Default, Clone)]
pub struct ReplacementMap {
    pairs: Vec<(Expr, Expr)>,
}

impl ReplacementMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a replacement. A later registration for the same source
    /// wins, so chained materialisations resolve to the outermost table.
    pub fn add(&mut self, source: Expr, target: Expr) {
        if let Some(pair) = self.pairs.iter_mut().find(|(s, _)| *s == source) {
            pair.1 = target;
        } else {
            self.pairs.push((source, target));
        }
    }

    pub fn get(&self, source: &Expr) -> Option<&Expr> {
        self.pairs.iter().find(|(s, _)| s == source).map(|(_, t)| t)
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }
}

/// Rewrite an expression through the replacement map. The largest
/// replaceable subtree wins; otherwise children are rewritten
/// recursively. Pure: the input is never mutated.
pub fn rewrite(expr: &Expr, map: &ReplacementMap) -> Expr {
    if let Some(target) = map.get(expr) {
        return target.clone();
    }
    match expr {
        Expr::Column(_) | Expr::Literal(_) | Expr::Subquery(_) => expr.clone(),
        Expr::Eq(l, r) => Expr::Eq(Box::new(rewrite(l, map)), Box::new(rewrite(r, map))),
        Expr::Cmp { op, left, right } => Expr::Cmp {
            op: *op,
            left: Box::new(rewrite(left, map)),
            right: Box::new(rewrite(right, map)),
        },
        Expr::And(cs) => Expr::And(cs.iter().map(|c| rewrite(c, map)).collect()),
        Expr::Or(cs) => Expr::Or(cs.iter().map(|c| rewrite(c, map)).collect()),
        Expr::Func { name, args } => Expr::Func {
            name: name.clone(),
            args: args.iter().map(|a| rewrite(a, map)).collect(),
        },
        Expr::Aggregate { func, arg } => Expr::Aggregate {
            func: *func,
            arg: arg.as_ref().map(|a| Box::new(rewrite(a, map))),
        },
        Expr::RollupGroup { level, inner } => Expr::RollupGroup {
            level: *level,
            inner: Box::new(rewrite(inner, map)),
        },
        Expr::Cached(inner) => Expr::Cached(Box::new(rewrite(inner, map))),
    }
}

/// Wrap the largest constant subexpressions in one-shot caches. Bare
/// literals and existing caches are left alone.
pub fn cache_constant_subexpressions(expr: &Expr) -> Expr {
    if expr.is_constant() && !matches!(expr, Expr::Literal(_) | Expr::Cached(_)) {
        return Expr::Cached(Box::new(expr.clone()));
    }
    match expr {
        Expr::Column(_) | Expr::Literal(_) | Expr::Subquery(_) | Expr::Cached(_) => expr.clone(),
        Expr::Eq(l, r) => Expr::Eq(
            Box::new(cache_constant_subexpressions(l)),
            Box::new(cache_constant_subexpressions(r)),
        ),
        Expr::Cmp { op, left, right } => Expr::Cmp {
            op: *op,
            left: Box::new(cache_constant_subexpressions(left)),
            right: Box::new(cache_constant_subexpressions(right)),
        },
        Expr::And(cs) => Expr::And(cs.iter().map(cache_constant_subexpressions).collect()),
        Expr::Or(cs) => Expr::Or(cs.iter().map(cache_constant_subexpressions).collect()),
        Expr::Func { name, args } => Expr::Func {
            name: name.clone(),
            args: args.iter().map(cache_constant_subexpressions).collect(),
        },
        Expr::Aggregate { func, arg } => Expr::Aggregate {
            func: *func,
            arg: arg.as_ref().map(|a| Box::new(cache_constant_subexpressions(a))),
        },
        Expr::RollupGroup { level, inner } => Expr::RollupGroup {
            level: *level,
            inner: Box::new(cache_constant_subexpressions(inner)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_used_tables() {
        let e = Expr::and(vec![
            Expr::eq(Expr::column(0, 1), Expr::int(5)),
            Expr::eq(Expr::column(2, 0), Expr::column(3, 0)),
        ]);
        assert_eq!(e.used_tables(), 0b1101);
    }

    #[test]
    fn test_and_flattens() {
        let e = Expr::and(vec![
            Expr::And(vec![Expr::int(1), Expr::int(2)]),
            Expr::int(3),
        ]);
        match e {
            Expr::And(cs) => assert_eq!(cs.len(), 3),
            other => panic!("expected And, got {other:?}"),
        }
    }

    #[test]
    fn test_collect_equalities_skips_or() {
        let e = Expr::and(vec![
            Expr::eq(Expr::column(0, 0), Expr::int(1)),
            Expr::Or(vec![
                Expr::eq(Expr::column(0, 1), Expr::int(2)),
                Expr::eq(Expr::column(0, 2), Expr::int(3)),
            ]),
        ]);
        let mut eqs = Vec::new();
        e.collect_equalities(&mut eqs);
        assert_eq!(eqs.len(), 1);
    }

    #[test]
    fn test_rewrite_replaces_largest_subtree() {
        let agg = Expr::Aggregate {
            func: AggFunc::Sum,
            arg: Some(Box::new(Expr::column(0, 1))),
        };
        let mut map = ReplacementMap::new();
        map.add(agg.clone(), Expr::column(9, 0));
        let cond = Expr::Cmp {
            op: CmpOp::Gt,
            left: Box::new(agg),
            right: Box::new(Expr::int(10)),
        };
        let rewritten = rewrite(&cond, &map);
        assert_eq!(
            rewritten,
            Expr::Cmp {
                op: CmpOp::Gt,
                left: Box::new(Expr::column(9, 0)),
                right: Box::new(Expr::int(10)),
            }
        );
        // Pure function: input intact.
        assert!(matches!(cond, Expr::Cmp { .. }));
    }

    #[test]
    fn test_unwrap_rollup() {
        let e = Expr::RollupGroup {
            level: 1,
            inner: Box::new(Expr::column(0, 0)),
        };
        assert_eq!(e.unwrap_rollup(), Expr::column(0, 0));
        assert!(e.has_rollup_group());
        assert!(!e.unwrap_rollup().has_rollup_group());
    }

    #[test]
    fn test_cache_constant_subexpressions() {
        let constant = Expr::Func {
            name: "concat".into(),
            args: vec![Expr::int(1), Expr::int(2)],
        };
        let cond = Expr::eq(Expr::column(0, 0), constant.clone());
        let cached = cache_constant_subexpressions(&cond);
        match cached {
            Expr::Eq(l, r) => {
                assert_eq!(*l, Expr::column(0, 0));
                assert_eq!(*r, Expr::Cached(Box::new(constant)));
            }
            other => panic!("unexpected {other:?}"),
        }
        // Bare literals are not worth caching.
        let lit = Expr::eq(Expr::column(0, 0), Expr::int(5));
        assert_eq!(cache_constant_subexpressions(&lit), lit);
    }

    #[test]
    fn test_is_constant() {
        assert!(Expr::int(5).is_constant());
        assert!(!Expr::column(0, 0).is_constant());
        assert!(!Expr::Aggregate {
            func: AggFunc::Count,
            arg: None
        }
        .is_constant());
    }
}
