use colbase::{err, Result};
use colcore::{Column, ColumnData, ColumnType, Partition};
use std::path::Path;

/// Load a partition from a minimal whitespace-delimited table: a header
/// line of column names, then one row per line. A column becomes numeric
/// if every one of its values parses as `f64`, else it becomes a
/// `Category` column. This is deliberately the simplest possible loader —
/// `colcli` is a query/eval/join test harness, not a storage engine.
pub fn load_partition(name: &str, path: &Path) -> Result<Partition> {
    let text = std::fs::read_to_string(path)?;
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let header = lines.next().ok_or_else(|| err("data file has no header line"))?;
    let columns: Vec<&str> = header.split_whitespace().collect();
    if columns.is_empty() {
        return Err(err("data file header is empty"));
    }

    let mut raw: Vec<Vec<&str>> = vec![Vec::new(); columns.len()];
    let mut nrows = 0;
    for line in lines {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != columns.len() {
            return Err(err(format!("row has {} fields, expected {}", fields.len(), columns.len())));
        }
        for (i, f) in fields.into_iter().enumerate() {
            raw[i].push(f);
        }
        nrows += 1;
    }

    let mut partition = Partition::new(name, nrows);
    for (i, &col_name) in columns.iter().enumerate() {
        let values = &raw[i];
        if let Some(numeric) = try_parse_all_f64(values) {
            partition.add_column(Column::new(col_name, ColumnType::Float64, false, ColumnData::Numeric(numeric)));
        } else {
            partition.add_column(Column::from_strings(col_name, ColumnType::Category, values));
        }
    }
    Ok(partition)
}

fn try_parse_all_f64(values: &[&str]) -> Option<Vec<f64>> {
    let mut out = Vec::with_capacity(values.len());
    for v in values {
        out.push(v.parse::<f64>().ok()?);
    }
    Some(out)
}
