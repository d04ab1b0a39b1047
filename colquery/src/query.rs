use crate::state::QueryState;
use crate::token;
use colbase::{codes, err_code, Result};
use colbase::Rid;
use colbitmap::Bitmap;
use colcore::Partition;
use colexpr::Expr;

/// A query: the state machine described in spec §4.5, owning at most one
/// of a RID list or a predicate, and the bitmaps `estimate`/`evaluate`
/// produce against a given partition.
pub struct Query {
    token: String,
    uid: String,
    partition_name: Option<String>,
    select: Vec<String>,
    rids: Option<Vec<Rid>>,
    predicate: Option<Expr>,
    predicate_text: Option<String>,
    state: QueryState,
    snapshot_timestamp: Option<u64>,
    hits: Option<Bitmap>,
}

impl Query {
    pub fn new(uid: impl Into<String>, hostid: u32) -> Self {
        let uid = uid.into();
        let tok = token::generate(&uid, hostid);
        Query {
            token: tok,
            uid,
            partition_name: None,
            select: Vec::new(),
            rids: None,
            predicate: None,
            predicate_text: None,
            state: QueryState::Uninitialized,
            snapshot_timestamp: None,
            hits: None,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn state(&self) -> QueryState {
        self.state
    }

    pub fn select(&self) -> &[String] {
        &self.select
    }

    pub fn partition_name(&self) -> Option<&str> {
        self.partition_name.as_deref()
    }

    pub fn predicate(&self) -> Option<&Expr> {
        self.predicate.as_ref()
    }

    pub fn predicate_text(&self) -> Option<&str> {
        self.predicate_text.as_deref()
    }

    pub fn rids(&self) -> Option<&[Rid]> {
        self.rids.as_deref()
    }

    pub fn snapshot_timestamp(&self) -> Option<u64> {
        self.snapshot_timestamp
    }

    /// Any setter invalidates a prior estimate/evaluate result (spec §4.5:
    /// "any setter → SPECIFIED, results invalidated").
    fn invalidate(&mut self) {
        if matches!(
            self.state,
            QueryState::QuickEstimate | QueryState::FullEvaluate | QueryState::BundlesTruncated | QueryState::HitsTruncated
        ) {
            self.hits = None;
            self.snapshot_timestamp = None;
            self.state = QueryState::Specified;
        }
    }

    fn try_specify(&mut self) {
        if !self.select.is_empty() && (self.rids.is_some() || self.predicate.is_some()) {
            self.state = QueryState::Specified;
        }
    }

    pub fn set_select_clause(&mut self, columns: Vec<String>) -> Result<()> {
        if columns.is_empty() {
            return Err(err_code("select clause is empty", codes::BAD_SELECT_EMPTY));
        }
        self.invalidate();
        self.select = columns;
        if self.state == QueryState::Uninitialized {
            self.state = QueryState::SetComponents;
        }
        self.try_specify();
        Ok(())
    }

    pub fn set_rids(&mut self, rids: Vec<Rid>) -> Result<()> {
        if rids.is_empty() {
            return Err(err_code("rid list is empty", codes::EMPTY_RIDS));
        }
        self.invalidate();
        self.rids = Some(rids);
        self.predicate = None;
        self.predicate_text = None;
        if self.state == QueryState::Uninitialized {
            self.state = QueryState::SetRids;
        }
        self.try_specify();
        Ok(())
    }

    pub fn set_where_clause(&mut self, expr: Expr) -> Result<()> {
        self.invalidate();
        self.predicate_text = Some(format!("{expr:?}"));
        self.predicate = Some(expr);
        self.rids = None;
        if self.state == QueryState::Uninitialized {
            self.state = QueryState::SetPredicate;
        }
        self.try_specify();
        Ok(())
    }

    /// Bind (or rebind) the partition this query operates against. A
    /// query that has never been bound accepts any partition; rebinding
    /// to a different partition than the one already bound is reported
    /// with the same "nil partition" code the spec reserves for an
    /// absent partition, since from the query's perspective its original
    /// partition is no longer the one in hand.
    fn require_partition(&mut self, partition: &Partition) -> Result<()> {
        match &self.partition_name {
            Some(name) if name != partition.name() => {
                Err(err_code(format!("query bound to partition {name}, not {}", partition.name()), codes::NIL_PARTITION))
            }
            Some(_) => Ok(()),
            None => {
                self.partition_name = Some(partition.name().to_string());
                Ok(())
            }
        }
    }

    fn rids_to_mask(rids: &[Rid], nrows: usize) -> Bitmap {
        let mut positions: Vec<usize> = rids.iter().map(|r| r.event as usize).filter(|&p| p < nrows).collect();
        positions.sort_unstable();
        positions.dedup();
        Bitmap::from_sorted_positions(nrows, &positions)
    }

    /// `estimate` (spec §4.5): `SPECIFIED → QUICK_ESTIMATE`.
    pub fn estimate(&mut self, partition: &Partition) -> Result<(usize, usize)> {
        self.require_partition(partition)?;
        if self.state != QueryState::Specified {
            return Err(err_code("query must be SPECIFIED before estimate", codes::RUNTIME_EXCEPTION));
        }
        let (low, high) = if let Some(expr) = &self.predicate {
            coleval::do_estimate(expr, partition)?
        } else if let Some(rids) = &self.rids {
            let mask = Self::rids_to_mask(rids, partition.nrows());
            (mask.clone(), mask)
        } else {
            return Err(err_code("neither rids nor where clause set", codes::NEITHER_RIDS_NOR_WHERE));
        };
        self.snapshot_timestamp = Some(partition.timestamp());
        self.state = QueryState::QuickEstimate;
        Ok((low.cnt(), high.cnt()))
    }

    /// `evaluate` (spec §4.5): `SPECIFIED/QUICK_ESTIMATE → FULL_EVALUATE`.
    /// If the partition's timestamp has moved since a prior `estimate`,
    /// cached bitmaps are discarded and evaluation starts fresh (the
    /// timestamp guard).
    pub fn evaluate(&mut self, partition: &Partition) -> Result<()> {
        self.require_partition(partition)?;
        if let Some(ts) = self.snapshot_timestamp {
            if ts != partition.timestamp() {
                self.hits = None;
                self.snapshot_timestamp = None;
                self.state = QueryState::Specified;
            }
        }
        if !matches!(self.state, QueryState::Specified | QueryState::QuickEstimate) {
            return Err(err_code("query must be SPECIFIED or QUICK_ESTIMATE before evaluate", codes::RUNTIME_EXCEPTION));
        }
        let hits = if let Some(expr) = &self.predicate {
            coleval::evaluate(partition, expr, &Bitmap::full(partition.nrows()))?
        } else if let Some(rids) = &self.rids {
            Self::rids_to_mask(rids, partition.nrows())
        } else {
            return Err(err_code("neither rids nor where clause set", codes::NEITHER_RIDS_NOR_WHERE));
        };
        self.hits = Some(hits);
        self.snapshot_timestamp = Some(partition.timestamp());
        self.state = QueryState::FullEvaluate;
        Ok(())
    }

    /// The resolved hit set, if fully evaluated (spec §4.5: `-11` if not).
    pub fn hits(&self) -> Result<&Bitmap> {
        if !matches!(self.state, QueryState::FullEvaluate | QueryState::HitsTruncated | QueryState::BundlesTruncated) {
            return Err(err_code("query has not been fully evaluated", codes::NOT_FULLY_EVALUATED));
        }
        self.hits.as_ref().ok_or_else(|| err_code("query has not been fully evaluated", codes::NOT_FULLY_EVALUATED))
    }

    /// `limit` applied to the raw hit set (`FULL_EVALUATE → HITS_TRUNCATED`).
    pub fn truncate_hits(&mut self, n: usize) -> Result<()> {
        let positions: Vec<usize> = self.hits()?.iter_set().take(n).collect();
        let size = self.hits()?.size();
        self.hits = Some(Bitmap::from_sorted_positions(size, &positions));
        self.state = QueryState::HitsTruncated;
        Ok(())
    }

    /// `limit` applied downstream, at bundle materialization
    /// (`FULL_EVALUATE → BUNDLES_TRUNCATED`) — same row selection as
    /// [`Query::truncate_hits`], but the state records that the
    /// truncation happened at the bundle stage rather than the raw-hits
    /// stage, matching the two distinct transitions spec §4.5 lists.
    pub fn truncate_bundles(&mut self, n: usize) -> Result<()> {
        let positions: Vec<usize> = self.hits()?.iter_set().take(n).collect();
        let size = self.hits()?.size();
        self.hits = Some(Bitmap::from_sorted_positions(size, &positions));
        self.state = QueryState::BundlesTruncated;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use colcore::{Column, ColumnData, ColumnType};
    use colindex::{LeftOp, Range, RightOp};
    use test_log::test;

    fn sample_partition() -> Partition {
        let mut p = Partition::new("p", 5);
        p.add_column(Column::new("x", ColumnType::Float64, false, ColumnData::Numeric(vec![1.0, 2.0, 3.0, 4.0, 5.0])));
        p
    }

    #[test]
    fn test_state_machine_happy_path() {
        let p = sample_partition();
        let mut q = Query::new("uid", 0);
        assert_eq!(q.state(), QueryState::Uninitialized);
        q.set_select_clause(vec!["x".into()]).unwrap();
        assert_eq!(q.state(), QueryState::SetComponents);
        q.set_where_clause(Expr::ContinuousRange { column: "x".into(), range: Range::at_least(LeftOp::Le, 3.0) }).unwrap();
        assert_eq!(q.state(), QueryState::Specified);

        let (low, high) = q.estimate(&p).unwrap();
        assert_eq!(q.state(), QueryState::QuickEstimate);
        assert!(low <= high);

        q.evaluate(&p).unwrap();
        assert_eq!(q.state(), QueryState::FullEvaluate);
        assert_eq!(q.hits().unwrap().iter_set().collect::<Vec<_>>(), vec![2, 3, 4]);
    }

    #[test]
    fn test_empty_select_rejected() {
        let mut q = Query::new("uid", 0);
        let err = q.set_select_clause(vec![]).unwrap_err();
        assert_eq!(err.code(), Some(codes::BAD_SELECT_EMPTY));
    }

    #[test]
    fn test_empty_rids_rejected() {
        let mut q = Query::new("uid", 0);
        let err = q.set_rids(vec![]).unwrap_err();
        assert_eq!(err.code(), Some(codes::EMPTY_RIDS));
    }

    #[test]
    fn test_hits_before_evaluate_is_not_fully_evaluated() {
        let mut q = Query::new("uid", 0);
        q.set_select_clause(vec!["x".into()]).unwrap();
        q.set_rids(vec![Rid::new(0, 0)]).unwrap();
        let err = q.hits().unwrap_err();
        assert_eq!(err.code(), Some(codes::NOT_FULLY_EVALUATED));
    }

    #[test]
    fn test_setter_after_evaluate_invalidates() {
        let p = sample_partition();
        let mut q = Query::new("uid", 0);
        q.set_select_clause(vec!["x".into()]).unwrap();
        q.set_rids(vec![Rid::new(0, 1), Rid::new(0, 2)]).unwrap();
        q.evaluate(&p).unwrap();
        assert_eq!(q.state(), QueryState::FullEvaluate);

        q.set_rids(vec![Rid::new(0, 3)]).unwrap();
        assert_eq!(q.state(), QueryState::Specified);
        assert!(q.hits().is_err());
    }

    #[test]
    fn test_timestamp_guard_reverts_to_specified() {
        let p = sample_partition();
        let mut q = Query::new("uid", 0);
        q.set_select_clause(vec!["x".into()]).unwrap();
        q.set_rids(vec![Rid::new(0, 0)]).unwrap();
        q.estimate(&p).unwrap();
        p.bump_timestamp();
        let result = q.evaluate(&p);
        // timestamp moved during the guard check inside evaluate, so this
        // call itself still succeeds (it re-evaluates fresh) but the state
        // reached SPECIFIED internally before moving on to FULL_EVALUATE.
        assert!(result.is_ok());
        assert_eq!(q.state(), QueryState::FullEvaluate);
    }

    #[test]
    fn test_truncate_hits() {
        let p = sample_partition();
        let mut q = Query::new("uid", 0);
        q.set_select_clause(vec!["x".into()]).unwrap();
        q.set_rids(vec![Rid::new(0, 0), Rid::new(0, 1), Rid::new(0, 2)]).unwrap();
        q.evaluate(&p).unwrap();
        q.truncate_hits(2).unwrap();
        assert_eq!(q.state(), QueryState::HitsTruncated);
        assert_eq!(q.hits().unwrap().cnt(), 2);
    }
}
