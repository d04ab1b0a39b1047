//! Minimal projection/ordering "bundle" writer. Stands in for the spec's
//! declared external collaborator (§1: "the projection/ordering 'bundle'
//! writer... excluded from the core"); `colcli` calls this after a
//! successful `evaluate` to write the `bundles`/`fids` output files named
//! in spec §6. Not part of the core's tested invariants.

use colbase::Rid;

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v}"),
        }
    }
}

/// One projected row per selected hit, in column order.
#[derive(Clone, Debug, Default)]
pub struct Bundle {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Bundle {
    pub fn new(columns: Vec<String>) -> Self {
        Bundle { columns, rows: Vec::new() }
    }

    pub fn push_row(&mut self, row: Vec<Value>) {
        debug_assert_eq!(row.len(), self.columns.len());
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Serialize as the `bundles` file: a header line of column names, then
    /// one tab-separated line per row.
    pub fn write_bundles(&self) -> Vec<u8> {
        let mut out = String::new();
        out.push_str(&self.columns.join("\t"));
        out.push('\n');
        for row in &self.rows {
            let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            out.push_str(&cells.join("\t"));
            out.push('\n');
        }
        out.into_bytes()
    }
}

/// Serialize the `fids` file: one `(run, event)` pair per RID, matching
/// `hits`'s row ordering, as little-endian `u32` pairs.
pub fn write_fids(rids: &[Rid]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rids.len() * 8);
    for rid in rids {
        out.extend_from_slice(&rid.run.to_le_bytes());
        out.extend_from_slice(&rid.event.to_le_bytes());
    }
    out
}
