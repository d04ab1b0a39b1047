/// The query state machine (spec §4.5).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryState {
    Uninitialized,
    SetComponents,
    SetRids,
    SetPredicate,
    Specified,
    QuickEstimate,
    FullEvaluate,
    BundlesTruncated,
    HitsTruncated,
}

impl QueryState {
    pub fn as_str(self) -> &'static str {
        match self {
            QueryState::Uninitialized => "UNINITIALIZED",
            QueryState::SetComponents => "SET_COMPONENTS",
            QueryState::SetRids => "SET_RIDS",
            QueryState::SetPredicate => "SET_PREDICATE",
            QueryState::Specified => "SPECIFIED",
            QueryState::QuickEstimate => "QUICK_ESTIMATE",
            QueryState::FullEvaluate => "FULL_EVALUATE",
            QueryState::BundlesTruncated => "BUNDLES_TRUNCATED",
            QueryState::HitsTruncated => "HITS_TRUNCATED",
        }
    }

    pub fn parse(s: &str) -> Option<QueryState> {
        Some(match s {
            "UNINITIALIZED" => QueryState::Uninitialized,
            "SET_COMPONENTS" => QueryState::SetComponents,
            "SET_RIDS" => QueryState::SetRids,
            "SET_PREDICATE" => QueryState::SetPredicate,
            "SPECIFIED" => QueryState::Specified,
            "QUICK_ESTIMATE" => QueryState::QuickEstimate,
            "FULL_EVALUATE" => QueryState::FullEvaluate,
            "BUNDLES_TRUNCATED" => QueryState::BundlesTruncated,
            "HITS_TRUNCATED" => QueryState::HitsTruncated,
            _ => return None,
        })
    }

    /// The `query` cache file's state line is a plain integer (spec §6), in
    /// the same order the lifecycle progresses through.
    pub fn as_int(self) -> i32 {
        match self {
            QueryState::Uninitialized => 0,
            QueryState::SetComponents => 1,
            QueryState::SetRids => 2,
            QueryState::SetPredicate => 3,
            QueryState::Specified => 4,
            QueryState::QuickEstimate => 5,
            QueryState::FullEvaluate => 6,
            QueryState::BundlesTruncated => 7,
            QueryState::HitsTruncated => 8,
        }
    }

    pub fn from_int(v: i32) -> Option<QueryState> {
        Some(match v {
            0 => QueryState::Uninitialized,
            1 => QueryState::SetComponents,
            2 => QueryState::SetRids,
            3 => QueryState::SetPredicate,
            4 => QueryState::Specified,
            5 => QueryState::QuickEstimate,
            6 => QueryState::FullEvaluate,
            7 => QueryState::BundlesTruncated,
            8 => QueryState::HitsTruncated,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_round_trip_all_states() {
        let all = [
            QueryState::Uninitialized,
            QueryState::SetComponents,
            QueryState::SetRids,
            QueryState::SetPredicate,
            QueryState::Specified,
            QueryState::QuickEstimate,
            QueryState::FullEvaluate,
            QueryState::BundlesTruncated,
            QueryState::HitsTruncated,
        ];
        for s in all {
            assert_eq!(QueryState::parse(s.as_str()), Some(s));
        }
    }

    #[test]
    fn test_round_trip_as_int() {
        let all = [
            QueryState::Uninitialized,
            QueryState::SetComponents,
            QueryState::SetRids,
            QueryState::SetPredicate,
            QueryState::Specified,
            QueryState::QuickEstimate,
            QueryState::FullEvaluate,
            QueryState::BundlesTruncated,
            QueryState::HitsTruncated,
        ];
        for s in all {
            assert_eq!(QueryState::from_int(s.as_int()), Some(s));
        }
        assert_eq!(QueryState::from_int(99), None);
    }
}
