use crate::term::Term;
use colcore::Partition;
use colindex::Range;

/// The expression tree (spec §4.4): a tagged variant rather than a
/// polymorphic node with virtual dispatch (spec §9), so every transform is
/// a pattern match producing a new tree instead of mutating shared
/// subtrees in place.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    ContinuousRange { column: String, range: Range },
    DiscreteRange { column: String, values: Vec<f64> },
    StringEq { column: String, value: String },
    StringIn { column: String, values: Vec<String> },
    /// Arithmetic term compared to a range; only resolvable by a scan
    /// unless the term collapses to a single variable plus a constant.
    CompoundRange { term: Term, range: Range },
    RangeJoin { col1: String, col2: String, delta: Term },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Xor(Box<Expr>, Box<Expr>),
    Minus(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    /// Whether this leaf is resolvable directly by a column index
    /// (`ContinuousRange`/`DiscreteRange`) rather than only by a scan.
    /// `reorder`'s caller (the evaluator) consults this to decide whether
    /// reordering is worthwhile at all (spec §4.6: "reorders the
    /// expression if any leaf is non-directEval").
    pub fn is_direct_eval(&self) -> bool {
        match self {
            Expr::ContinuousRange { .. } | Expr::DiscreteRange { .. } => true,
            Expr::StringEq { .. } | Expr::StringIn { .. } => true,
            Expr::CompoundRange { term, .. } => term.as_var_plus_const().is_some(),
            Expr::RangeJoin { .. } => false,
            Expr::And(children) | Expr::Or(children) => children.iter().all(Expr::is_direct_eval),
            Expr::Xor(a, b) | Expr::Minus(a, b) => a.is_direct_eval() && b.is_direct_eval(),
            Expr::Not(a) => a.is_direct_eval(),
        }
    }

    /// Constant-fold, flatten nested AND/OR, push NOT through De Morgan.
    pub fn simplify(&self) -> Expr {
        match self {
            Expr::Not(inner) => match inner.simplify() {
                Expr::Not(doubly) => *doubly,
                Expr::And(children) => Expr::Or(children.into_iter().map(|c| Expr::Not(Box::new(c)).simplify()).collect()),
                Expr::Or(children) => Expr::And(children.into_iter().map(|c| Expr::Not(Box::new(c)).simplify()).collect()),
                other => Expr::Not(Box::new(other)),
            },
            Expr::And(children) => {
                let mut flat = Vec::new();
                for c in children {
                    match c.simplify() {
                        Expr::And(inner) => flat.extend(inner),
                        other => flat.push(other),
                    }
                }
                if flat.len() == 1 {
                    flat.into_iter().next().unwrap()
                } else {
                    Expr::And(flat)
                }
            }
            Expr::Or(children) => {
                let mut flat = Vec::new();
                for c in children {
                    match c.simplify() {
                        Expr::Or(inner) => flat.extend(inner),
                        other => flat.push(other),
                    }
                }
                if flat.len() == 1 {
                    flat.into_iter().next().unwrap()
                } else {
                    Expr::Or(flat)
                }
            }
            Expr::Xor(a, b) => Expr::Xor(Box::new(a.simplify()), Box::new(b.simplify())),
            Expr::Minus(a, b) => Expr::Minus(Box::new(a.simplify()), Box::new(b.simplify())),
            leaf => leaf.clone(),
        }
    }

    /// This node's own value bound, if it constrains a single numeric
    /// range (spec.md §3: `getMinMax`). Composite nodes combine their
    /// children's bounds the way the composition would narrow or widen
    /// the rows that can pass: `And` intersects, `Or` unions. Leaves that
    /// aren't numeric ranges (string predicates, joins) answer `None`.
    pub fn get_min_max(&self) -> Option<(f64, f64)> {
        match self {
            Expr::ContinuousRange { range, .. } => Some((
                range.lo.map(|(_, b)| b).unwrap_or(f64::NEG_INFINITY),
                range.hi.map(|(_, b)| b).unwrap_or(f64::INFINITY),
            )),
            Expr::DiscreteRange { values, .. } => {
                if values.is_empty() {
                    None
                } else {
                    let lo = values.iter().cloned().fold(f64::INFINITY, f64::min);
                    let hi = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                    Some((lo, hi))
                }
            }
            Expr::And(children) => children
                .iter()
                .filter_map(Expr::get_min_max)
                .reduce(|(a_lo, a_hi), (b_lo, b_hi)| (a_lo.max(b_lo), a_hi.min(b_hi))),
            Expr::Or(children) => children
                .iter()
                .filter_map(Expr::get_min_max)
                .reduce(|(a_lo, a_hi), (b_lo, b_hi)| (a_lo.min(b_lo), a_hi.max(b_hi))),
            Expr::Not(a) => a.get_min_max(),
            _ => None,
        }
    }

    /// Look up the `ContinuousRange` this tree already carries for `col`,
    /// if any — the intersection of every matching leaf found by a
    /// depth-first walk through `And`/`Not` nodes (spec.md §3:
    /// `findRange(col)`). Like `add_join_constraints`, this only
    /// descends through conjunction: a range under `Or` doesn't bound
    /// `col` unconditionally, so it isn't a candidate to merge with.
    pub fn find_range(&self, col: &str) -> Option<Range> {
        match self {
            Expr::ContinuousRange { column, range } if column == col => Some(*range),
            Expr::And(children) => children.iter().filter_map(|c| c.find_range(col)).reduce(|a, b| a.intersect(&b)),
            Expr::Not(a) => a.find_range(col),
            _ => None,
        }
    }

    /// Whether this subtree contains a `rangeJoin` leaf anywhere
    /// (spec.md §3: `hasJoin`).
    pub fn has_join(&self) -> bool {
        match self {
            Expr::RangeJoin { .. } => true,
            Expr::And(children) | Expr::Or(children) => children.iter().any(Expr::has_join),
            Expr::Xor(a, b) | Expr::Minus(a, b) => a.has_join() || b.has_join(),
            Expr::Not(a) => a.has_join(),
            _ => false,
        }
    }

    /// Walk the tree, asking each column's index to loosen its leaves'
    /// bounds outward to bin edges (spec §4.4). Non-range leaves and
    /// columns without a cached index are left untouched.
    pub fn expand_range(&self, partition: &Partition) -> Expr {
        self.map_ranges(partition, |idx, range| idx.expand_range(range))
    }

    /// Symmetric tightening pass (spec §4.4).
    pub fn contract_range(&self, partition: &Partition) -> Expr {
        self.map_ranges(partition, |idx, range| idx.contract_range(range))
    }

    fn map_ranges(&self, partition: &Partition, f: impl Fn(&colindex::BinIndex, &Range) -> Range + Copy) -> Expr {
        match self {
            Expr::ContinuousRange { column, range } => {
                let new_range = match partition.column(column) {
                    Some(col) => {
                        let lock = col.index_lock();
                        match lock.get() {
                            Some(idx) => f(idx, range),
                            None => *range,
                        }
                    }
                    None => *range,
                };
                Expr::ContinuousRange { column: column.clone(), range: new_range }
            }
            Expr::And(children) => Expr::And(children.iter().map(|c| c.map_ranges(partition, f)).collect()),
            Expr::Or(children) => Expr::Or(children.iter().map(|c| c.map_ranges(partition, f)).collect()),
            Expr::Xor(a, b) => Expr::Xor(Box::new(a.map_ranges(partition, f)), Box::new(b.map_ranges(partition, f))),
            Expr::Minus(a, b) => Expr::Minus(Box::new(a.map_ranges(partition, f)), Box::new(b.map_ranges(partition, f))),
            Expr::Not(a) => Expr::Not(Box::new(a.map_ranges(partition, f))),
            leaf => leaf.clone(),
        }
    }

    /// For every `rangeJoin(a, b, δ)` AND-connected in the tree, derive
    /// `a ∈ [min(b)-δ, max(b)+δ]` and symmetrically for `b`. A derived
    /// bound is merged into (via `findRange`/`Range::intersect`) any
    /// `ContinuousRange` the tree already carries for that column rather
    /// than ANDed in as an unreconciled second leaf, so two constraints
    /// on the same column always end up as one tightened range. Only
    /// fires under AND (spec's Open Question: behavior under OR is left
    /// undefined and untouched here).
    pub fn add_join_constraints(&self, partition: &Partition) -> Expr {
        if !self.has_join() {
            return self.clone();
        }
        let mut top_level: Vec<Expr> = match self {
            Expr::And(children) => children.clone(),
            other => vec![other.clone()],
        };
        let joins: Vec<(String, String, Term)> = top_level
            .iter()
            .filter_map(|c| match c {
                Expr::RangeJoin { col1, col2, delta } => Some((col1.clone(), col2.clone(), delta.clone())),
                _ => None,
            })
            .collect();

        let mut changed = false;
        for (col1, col2, delta) in joins {
            let Some(d) = delta.as_const() else { continue };
            let (Some(c1), Some(c2)) = (partition.column(&col1), partition.column(&col2)) else { continue };
            let (min1, max1) = c1.compute_min_max();
            let (min2, max2) = c2.compute_min_max();
            let derived1 = Range::between(colindex::LeftOp::Le, min2 - d, colindex::RightOp::Le, max2 + d);
            let derived2 = Range::between(colindex::LeftOp::Le, min1 - d, colindex::RightOp::Le, max1 + d);
            changed |= Self::merge_constraint(&mut top_level, &col1, derived1);
            changed |= Self::merge_constraint(&mut top_level, &col2, derived2);
        }

        if changed {
            Expr::And(top_level)
        } else {
            self.clone()
        }
    }

    /// Merge `derived` into the existing top-level `ContinuousRange` for
    /// `column`, if one is already present (found the same way
    /// `find_range` would look under this AND), otherwise append it as a
    /// new conjunct. Returns whether the tree actually changed.
    fn merge_constraint(top_level: &mut Vec<Expr>, column: &str, derived: Range) -> bool {
        for child in top_level.iter_mut() {
            if let Expr::ContinuousRange { column: c, range } = child {
                if c == column {
                    let merged = range.intersect(&derived);
                    if merged == *range {
                        return false;
                    }
                    *range = merged;
                    return true;
                }
            }
        }
        top_level.push(Expr::ContinuousRange { column: column.to_string(), range: derived });
        true
    }

    /// Reorder AND/OR chains by `weight` (spec §4.4): for AND, cheapest
    /// subtree first; for OR, the reverse.
    pub fn reorder(&self, weight: &impl Fn(&Expr) -> f64) -> Expr {
        match self {
            Expr::And(children) => {
                let mut reordered: Vec<Expr> = children.iter().map(|c| c.reorder(weight)).collect();
                reordered.sort_by(|a, b| weight(a).partial_cmp(&weight(b)).unwrap());
                Expr::And(reordered)
            }
            Expr::Or(children) => {
                let mut reordered: Vec<Expr> = children.iter().map(|c| c.reorder(weight)).collect();
                reordered.sort_by(|a, b| weight(b).partial_cmp(&weight(a)).unwrap());
                Expr::Or(reordered)
            }
            Expr::Xor(a, b) => Expr::Xor(Box::new(a.reorder(weight)), Box::new(b.reorder(weight))),
            Expr::Minus(a, b) => Expr::Minus(Box::new(a.reorder(weight)), Box::new(b.reorder(weight))),
            Expr::Not(a) => Expr::Not(Box::new(a.reorder(weight))),
            leaf => leaf.clone(),
        }
    }
}
