use crate::query::Query;
use crate::state::QueryState;
use colbase::{codes, err, err_code, Rid, Result};
use colbitmap::Bitmap;
use std::path::Path;

const NULL: &str = "<NULL>";

/// Write this query's cache directory: a `query` text file laid out exactly
/// as spec §6 describes it — uid line, partition name line, select list
/// line (or `<NULL>`), state integer line, snapshot timestamp line, where
/// clause line (or `<NULL>`), then zero or more `run event` lines encoding
/// the input RID list — and a sibling `hits` file once the state reaches
/// `FULL_EVALUATE` or later.
pub fn write(dir: &Path, query: &Query) -> Result<()> {
    std::fs::create_dir_all(dir)?;

    let mut text = String::new();
    text.push_str(query.uid());
    text.push('\n');
    text.push_str(query.partition_name().unwrap_or(""));
    text.push('\n');
    if query.select().is_empty() {
        text.push_str(NULL);
    } else {
        text.push_str(&query.select().join(","));
    }
    text.push('\n');
    text.push_str(&query.state().as_int().to_string());
    text.push('\n');
    text.push_str(&query.snapshot_timestamp().unwrap_or(0).to_string());
    text.push('\n');
    match query.predicate_text() {
        Some(where_text) => text.push_str(where_text),
        None => text.push_str(NULL),
    }
    text.push('\n');
    if let Some(rids) = query.rids() {
        for r in rids {
            text.push_str(&format!("{} {}\n", r.run, r.event));
        }
    }
    std::fs::write(dir.join("query"), text)?;

    if matches!(query.state(), QueryState::FullEvaluate | QueryState::HitsTruncated | QueryState::BundlesTruncated) {
        if let Ok(hits) = query.hits() {
            std::fs::write(dir.join("hits"), hits.serialize())?;
        }
    }
    Ok(())
}

/// Recovered fields from a cache directory. A predicate-based query only
/// recovers its debug-formatted `where` text, not a re-parsed `Expr` — spec's
/// Non-goals exclude a predicate text parser, so a recovered predicate query
/// can still report its prior state/hits but cannot be re-`evaluate`d without
/// a fresh `set_where_clause` call.
pub struct Recovered {
    pub uid: String,
    pub partition: String,
    pub select: Vec<String>,
    pub state: QueryState,
    pub snapshot_timestamp: Option<u64>,
    pub rids: Option<Vec<Rid>>,
    pub where_text: Option<String>,
    pub hits: Option<Bitmap>,
}

pub fn read(dir: &Path) -> Result<Recovered> {
    let text = std::fs::read_to_string(dir.join("query")).map_err(|_| err_code("no cache directory", codes::NO_CACHE_DIR))?;
    let mut lines = text.lines();
    let corrupt = || err("corrupt query file");

    let uid = lines.next().ok_or_else(corrupt)?.to_string();
    let partition = lines.next().ok_or_else(corrupt)?.to_string();
    let select_line = lines.next().ok_or_else(corrupt)?;
    let select = if select_line == NULL {
        Vec::new()
    } else {
        select_line.split(',').filter(|s| !s.is_empty()).map(str::to_string).collect()
    };
    let state_line = lines.next().ok_or_else(corrupt)?;
    let state = QueryState::from_int(state_line.parse().map_err(|_| corrupt())?).ok_or_else(corrupt)?;
    let timestamp_line = lines.next().ok_or_else(corrupt)?;
    let snapshot_timestamp = timestamp_line.parse::<u64>().ok();
    let where_line = lines.next().ok_or_else(corrupt)?;
    let where_text = if where_line == NULL { None } else { Some(where_line.to_string()) };

    let mut rid_list = Vec::new();
    for line in lines {
        let (run, event) = line.split_once(' ').ok_or_else(corrupt)?;
        rid_list.push(Rid::new(run.parse().map_err(|_| corrupt())?, event.parse().map_err(|_| corrupt())?));
    }
    let rids = if rid_list.is_empty() { None } else { Some(rid_list) };

    let hits_path = dir.join("hits");
    let hits = if hits_path.exists() { Some(Bitmap::deserialize(&std::fs::read(hits_path)?)?) } else { None };

    Ok(Recovered { uid, partition, select, state, snapshot_timestamp, rids, where_text, hits })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::query::Query;
    use colcore::{Column, ColumnData, ColumnType, Partition};
    use test_log::test;

    #[test]
    fn test_write_then_read_rids_query_round_trips() {
        let mut p = Partition::new("p", 5);
        p.add_column(Column::new("x", ColumnType::Float64, false, ColumnData::Numeric(vec![1.0, 2.0, 3.0, 4.0, 5.0])));
        let mut q = Query::new("uid-1", 7);
        q.set_select_clause(vec!["x".into()]).unwrap();
        q.set_rids(vec![Rid::new(0, 1), Rid::new(0, 3)]).unwrap();
        q.evaluate(&p).unwrap();

        let dir = std::env::temp_dir().join(format!("colquery-test-{}", q.token()));
        write(&dir, &q).unwrap();
        let recovered = read(&dir).unwrap();
        assert_eq!(recovered.uid, "uid-1");
        assert_eq!(recovered.partition, "p");
        assert_eq!(recovered.select, vec!["x".to_string()]);
        assert_eq!(recovered.state, QueryState::FullEvaluate);
        assert_eq!(recovered.rids.unwrap(), vec![Rid::new(0, 1), Rid::new(0, 3)]);
        assert_eq!(recovered.hits.unwrap().iter_set().collect::<Vec<_>>(), vec![1, 3]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_where_query_round_trips_without_rids_file() {
        let mut p = Partition::new("p", 3);
        p.add_column(Column::new("x", ColumnType::Float64, false, ColumnData::Numeric(vec![1.0, 2.0, 3.0])));
        let mut q = Query::new("uid-2", 1);
        q.set_select_clause(vec!["x".into()]).unwrap();
        q.set_where_clause(colexpr::Expr::ContinuousRange {
            column: "x".into(),
            range: colindex::Range::at_least(colindex::LeftOp::Le, 2.0),
        })
        .unwrap();
        q.evaluate(&p).unwrap();

        let dir = std::env::temp_dir().join(format!("colquery-test-{}", q.token()));
        write(&dir, &q).unwrap();
        assert!(!dir.join("rids").exists());
        let recovered = read(&dir).unwrap();
        assert!(recovered.rids.is_none());
        assert!(recovered.where_text.is_some());
        assert_eq!(recovered.state, QueryState::FullEvaluate);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_read_missing_dir_reports_no_cache_dir() {
        let dir = std::env::temp_dir().join("colquery-test-does-not-exist-xyz");
        let err = read(&dir).unwrap_err();
        assert_eq!(err.code(), Some(codes::NO_CACHE_DIR));
    }
}
