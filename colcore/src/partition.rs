use crate::column::Column;
use colbase::{err, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard};

/// A scoped read lock on a partition, held for the duration of a query's
/// estimate/evaluate so all its reads see one consistent snapshot (spec §5:
/// "A query observing partition timestamp T sees a consistent snapshot for
/// all its reads of that partition").
pub struct PartitionReadLock<'a> {
    _guard: RwLockReadGuard<'a, ()>,
}

pub struct Partition {
    name: String,
    nrows: usize,
    timestamp: AtomicU64,
    columns: HashMap<String, Column>,
    lock: RwLock<()>,
}

impl Partition {
    pub fn new(name: impl Into<String>, nrows: usize) -> Self {
        Partition {
            name: name.into(),
            nrows,
            timestamp: AtomicU64::new(0),
            columns: HashMap::new(),
            lock: RwLock::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp.load(Ordering::Acquire)
    }

    /// Advance the snapshot timestamp (spec glossary: "Snapshot timestamp").
    /// Any query holding cached bitmaps from before this call must discard
    /// them (spec §4.5's timestamp guard).
    pub fn bump_timestamp(&self) -> u64 {
        self.timestamp.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn add_column(&mut self, column: Column) {
        self.columns.insert(column.name().to_string(), column);
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    pub fn get_column(&self, name: &str) -> Result<&Column> {
        self.column(name).ok_or_else(|| err(format!("unknown column '{name}'")))
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Acquire the partition's read lock for the duration of a query
    /// estimate/evaluate. Acquisition order is always partition -> column
    /// -> column index (spec §4.3/§5); never hold a column lock while
    /// asking another column for its lock.
    pub fn read(&self) -> PartitionReadLock<'_> {
        PartitionReadLock { _guard: self.lock.read().expect("partition lock poisoned") }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::column::{ColumnData, ColumnType};
    use test_log::test;

    #[test]
    fn test_add_and_lookup_column() {
        let mut p = Partition::new("p", 3);
        p.add_column(Column::new("x", ColumnType::Float64, false, ColumnData::Numeric(vec![1.0, 2.0, 3.0])));
        assert!(p.column("x").is_some());
        assert!(p.column("y").is_none());
        assert_eq!(p.get_column("x").unwrap().len(), 3);
    }

    #[test]
    fn test_timestamp_bumps() {
        let p = Partition::new("p", 0);
        assert_eq!(p.timestamp(), 0);
        assert_eq!(p.bump_timestamp(), 1);
        assert_eq!(p.timestamp(), 1);
    }

    #[test]
    fn test_read_lock_is_reentrant_for_readers() {
        let p = Partition::new("p", 0);
        let _a = p.read();
        let _b = p.read();
    }
}
