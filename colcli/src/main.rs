mod loader;
mod predicate;

use clap::Parser;
use colbase::{Config, Rid};
use colbundle::{Bundle, Value};
use colcore::Partition;
use colquery::Query;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Drives a `colquery::Query` against a partition loaded from a flat
/// data file: a thin harness over `colquery`/`coleval`/`coljoin`, not a
/// server or a SQL front end (spec's Non-goals exclude both).
#[derive(Parser)]
#[command(name = "colcli")]
#[command(about = "Run one query against a partition loaded from a data file")]
struct Args {
    /// Path to the whitespace-delimited data file (header line + rows).
    #[arg(long)]
    data: PathBuf,

    /// Partition name to report in query state.
    #[arg(long, default_value = "default")]
    partition: String,

    /// Comma-separated list of columns to select.
    #[arg(long)]
    select: String,

    /// Literal predicate, e.g. "price >= 10 AND color == red". Mutually
    /// exclusive with --rids.
    #[arg(long)]
    r#where: Option<String>,

    /// Comma-separated row numbers to select directly instead of a predicate.
    #[arg(long)]
    rids: Option<String>,

    /// Only estimate bounds (spec §4.5 QUICK_ESTIMATE), skip full evaluate.
    #[arg(long)]
    estimate_only: bool,

    /// Truncate the hit set to at most this many rows.
    #[arg(long)]
    limit: Option<usize>,

    /// Cache directory to persist the query's state into, if set.
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Tracing log level.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> colbase::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::new();
    let cache_dir = args.cache_dir.or_else(|| config.resolve(None, None, "CacheDirectory").map(PathBuf::from));

    let partition = loader::load_partition(&args.partition, &args.data)?;
    info!(rows = partition.nrows(), "loaded partition");

    let select: Vec<String> = args.select.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect();

    let mut query = Query::new("colcli", 0);
    query.set_select_clause(select)?;

    match (&args.r#where, &args.rids) {
        (Some(_), Some(_)) => return Err(colbase::err("--where and --rids are mutually exclusive")),
        (Some(text), None) => {
            let expr = predicate::parse(text)?;
            query.set_where_clause(expr)?;
        }
        (None, Some(list)) => {
            let rids: Vec<Rid> = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.parse::<u32>().map(|event| Rid::new(0, event)))
                .collect::<Result<_, _>>()
                .map_err(|_| colbase::err("--rids must be a comma-separated list of row numbers"))?;
            query.set_rids(rids)?;
        }
        (None, None) => return Err(colbase::err("one of --where or --rids is required")),
    }

    let (low, high) = query.estimate(&partition)?;
    info!(low, high, "estimate");

    if args.estimate_only {
        println!("estimate: {low}..{high}");
        return Ok(());
    }

    query.evaluate(&partition)?;
    if let Some(n) = args.limit {
        query.truncate_hits(n)?;
    }

    let hits = query.hits()?;
    let rows: Vec<usize> = hits.iter_set().collect();
    println!("token: {}", query.token());
    println!("hits: {}", rows.len());
    for row in &rows {
        println!("{row}");
    }

    if let Some(dir) = cache_dir {
        colquery::write(&dir, &query)?;

        let bundle = project_bundle(&partition, query.select(), &rows)?;
        let rids: Vec<Rid> = rows.iter().map(|&r| Rid::new(0, r as u32)).collect();
        std::fs::write(dir.join("bundles"), bundle.write_bundles())?;
        std::fs::write(dir.join("fids"), colbundle::write_fids(&rids))?;

        info!(dir = %dir.display(), "wrote query cache directory");
    }

    Ok(())
}

/// Project the selected columns of each hit row into a `colbundle::Bundle`
/// (spec §6's `bundles` output), resolving `Category`/`Text` columns back
/// to their source strings rather than their dictionary codes.
fn project_bundle(partition: &Partition, select: &[String], rows: &[usize]) -> colbase::Result<Bundle> {
    let mut bundle = Bundle::new(select.to_vec());
    for &row in rows {
        let mut values = Vec::with_capacity(select.len());
        for name in select {
            let column = partition.get_column(name)?;
            let value = if column.col_type().is_string() {
                Value::Text(column.string_at(row)?)
            } else {
                Value::Float(column.read().as_f64(row))
            };
            values.push(value);
        }
        bundle.push_row(values);
    }
    Ok(bundle)
}

#[cfg(test)]
mod test {
    use super::*;
    use colcore::{Column, ColumnData, ColumnType};
    use test_log::test;

    #[test]
    fn test_project_bundle_resolves_category_strings() {
        let mut p = Partition::new("p", 3);
        p.add_column(Column::new("x", ColumnType::Float64, false, ColumnData::Numeric(vec![1.0, 2.0, 3.0])));
        p.add_column(Column::from_strings("color", ColumnType::Category, &["red", "green", "red"]));

        let bundle = project_bundle(&p, &["x".to_string(), "color".to_string()], &[0, 2]).unwrap();
        assert_eq!(bundle.len(), 2);
        let text = String::from_utf8(bundle.write_bundles()).unwrap();
        assert_eq!(text, "x\tcolor\n1\tred\n3\tred\n");
    }
}
