use crate::lock::{IndexLock, ReadLock, SoftWriteLock, WriteLock};
use colbase::{err, Result};
use colbitmap::Bitmap;
use colcat::Dictionary;
use colindex::{BinIndex, BinOptions, Range};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};
use tracing::{trace, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnType {
    Int64,
    Float64,
    Text,
    Category,
}

impl ColumnType {
    pub fn is_string(self) -> bool {
        matches!(self, ColumnType::Text | ColumnType::Category)
    }
}

/// A column's raw storage: numeric types keep their values directly;
/// text/category types store dictionary codes (looked up in a sibling
/// `colcat::Dictionary`), matching the teacher's dispatch-on-an-enum
/// convention (spec §9: "monomorphized inner loops... dispatched from a
/// single enum-tagged entry point").
#[derive(Clone, Debug)]
pub enum ColumnData {
    Numeric(Vec<f64>),
    Coded(Vec<u32>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Numeric(v) => v.len(),
            ColumnData::Coded(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A uniform f64 view of the column: the raw value for numeric
    /// columns, the dictionary code (as a float) for string columns. This
    /// is what bin construction and range tests operate over.
    pub fn as_f64(&self, row: usize) -> f64 {
        match self {
            ColumnData::Numeric(v) => v[row],
            ColumnData::Coded(v) => v[row] as f64,
        }
    }

    pub fn to_f64_vec(&self) -> Vec<f64> {
        match self {
            ColumnData::Numeric(v) => v.clone(),
            ColumnData::Coded(v) => v.iter().map(|&c| c as f64).collect(),
        }
    }
}

pub struct Column {
    name: String,
    description: String,
    col_type: ColumnType,
    is_sorted: bool,
    pub(crate) data: RwLock<ColumnData>,
    dict: Option<Mutex<Dictionary>>,
    pub(crate) index: RwLock<Option<BinIndex>>,
    index_build_lock: Mutex<()>,
    pub(crate) idxcnt: AtomicUsize,
    min: Mutex<Option<(f64, f64)>>,
}

impl Column {
    pub fn new(name: impl Into<String>, col_type: ColumnType, is_sorted: bool, data: ColumnData) -> Self {
        let dict = if col_type.is_string() { Some(Mutex::new(Dictionary::new())) } else { None };
        Column {
            name: name.into(),
            description: String::new(),
            col_type,
            is_sorted,
            data: RwLock::new(data),
            dict,
            index: RwLock::new(None),
            index_build_lock: Mutex::new(()),
            idxcnt: AtomicUsize::new(0),
            min: Mutex::new(None),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Build a text/category column from string values, interning each one
    /// into a fresh dictionary.
    pub fn from_strings(name: impl Into<String>, col_type: ColumnType, values: &[&str]) -> Self {
        debug_assert!(col_type.is_string());
        let mut dict = Dictionary::new();
        let codes: Vec<u32> = values.iter().map(|s| dict.intern(s)).collect();
        Column {
            name: name.into(),
            description: String::new(),
            col_type,
            is_sorted: false,
            data: RwLock::new(ColumnData::Coded(codes)),
            dict: Some(Mutex::new(dict)),
            index: RwLock::new(None),
            index_build_lock: Mutex::new(()),
            idxcnt: AtomicUsize::new(0),
            min: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn col_type(&self) -> ColumnType {
        self.col_type
    }

    pub fn is_sorted(&self) -> bool {
        self.is_sorted
    }

    pub fn len(&self) -> usize {
        self.data.read().expect("column data lock poisoned").len()
    }

    pub fn read(&self) -> ReadLock<'_> {
        ReadLock { guard: self.data.read().expect("column data lock poisoned") }
    }

    pub fn write(&self) -> WriteLock<'_> {
        WriteLock { guard: self.data.write().expect("column data lock poisoned") }
    }

    pub fn soft_write(&self) -> SoftWriteLock<'_> {
        SoftWriteLock::try_new(self)
    }

    pub fn index_lock(&self) -> IndexLock<'_> {
        IndexLock::new(self)
    }

    /// Scan string values in `code` form against `dict`, returning the
    /// dictionary codes that satisfy `pred` — the input to a cheap integer
    /// comparison during `do_scan_text`.
    fn codes_matching(&self, pred: impl Fn(&str) -> bool) -> Result<Vec<u32>> {
        let dict = self.dict.as_ref().ok_or_else(|| err("column has no dictionary (not a text/category column)"))?;
        dict.lock().expect("dictionary lock poisoned").codes_matching(pred)
    }

    pub fn intern(&self, s: &str) -> Result<u32> {
        let dict = self.dict.as_ref().ok_or_else(|| err("column has no dictionary (not a text/category column)"))?;
        Ok(dict.lock().expect("dictionary lock poisoned").intern(s))
    }

    /// Resolve row `row`'s dictionary code back to its original string, for
    /// `Text`/`Category` columns only — used by bundle projection to print
    /// the source value rather than its code.
    pub fn string_at(&self, row: usize) -> Result<String> {
        let dict = self.dict.as_ref().ok_or_else(|| err("column has no dictionary (not a text/category column)"))?;
        let code = self.read().as_f64(row) as u32;
        Ok(dict.lock().expect("dictionary lock poisoned").get(code)?.to_string())
    }

    /// `doScan(predicate, mask)` for a numeric predicate (spec §4.3).
    pub fn do_scan(&self, mask: &Bitmap, test: impl Fn(f64) -> bool) -> Result<Bitmap> {
        let data = self.read();
        let n = data.len();
        let mut hits = Vec::new();
        for row in mask.iter_set() {
            if row >= n {
                continue;
            }
            if test(data.as_f64(row)) {
                hits.push(row);
            }
        }
        Ok(Bitmap::from_sorted_positions(n, &hits))
    }

    /// `doScan` for a string predicate on a `text`/`category` column:
    /// delegate to the dictionary first so each row only needs an integer
    /// compare (spec §4.3: "For string predicates... delegates to the
    /// category dictionary").
    pub fn do_scan_text(&self, mask: &Bitmap, pred: impl Fn(&str) -> bool) -> Result<Bitmap> {
        let matching_codes = self.codes_matching(pred)?;
        self.do_scan(mask, |code_as_f64| matching_codes.contains(&(code_as_f64 as u32)))
    }

    /// `evaluateRange(range, mask)` with the bin-index-then-scan fallback
    /// path described in spec §4.3.
    pub fn evaluate_range(&self, range: &Range, mask: &Bitmap) -> Result<Bitmap> {
        let idx = self.index_lock();
        match idx.get() {
            None => {
                drop(idx);
                self.do_scan(mask, |v| range.test(v))
            }
            Some(bin_index) => {
                let (low, high) = bin_index.estimate_range(range)?;
                let iffy = high.minus(&low)?;
                drop(idx);
                if iffy.is_empty() {
                    low.and(mask)
                } else {
                    let iffy_masked = iffy.and(mask)?;
                    let scanned = self.do_scan(&iffy_masked, |v| range.test(v))?;
                    low.and(mask)?.or(&scanned)
                }
            }
        }
    }

    /// `selectValues(mask, out, outIdx)`: copy selected values into a
    /// compact array, optionally carrying original row ordinals.
    pub fn select_values(&self, mask: &Bitmap) -> Vec<f64> {
        let data = self.read();
        mask.iter_set().filter(|&r| r < data.len()).map(|r| data.as_f64(r)).collect()
    }

    pub fn select_values_with_rows(&self, mask: &Bitmap) -> Vec<(f64, u32)> {
        let data = self.read();
        mask.iter_set().filter(|&r| r < data.len()).map(|r| (data.as_f64(r), r as u32)).collect()
    }

    /// Scan raw values once to populate the actual observed extrema (spec
    /// SPEC_FULL §3 supplement, from `column.h`'s `computeMinMax`).
    pub fn compute_min_max(&self) -> (f64, f64) {
        if let Some(cached) = *self.min.lock().expect("min/max cache lock poisoned") {
            return cached;
        }
        let data = self.read();
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for row in 0..data.len() {
            let v = data.as_f64(row);
            if v.is_finite() {
                lo = lo.min(v);
                hi = hi.max(v);
            }
        }
        drop(data);
        let result = (lo, hi);
        *self.min.lock().expect("min/max cache lock poisoned") = Some(result);
        result
    }

    /// Build the bin index if absent, serialized under this column's
    /// construction mutex (spec §4.3: "a mutex guards index construction").
    pub fn ensure_index(&self, options: &BinOptions) -> Result<()> {
        let _guard = self.index_build_lock.lock().expect("index build lock poisoned");
        if self.index.read().expect("column index lock poisoned").is_some() {
            return Ok(());
        }
        let values = self.read().to_f64_vec();
        let index = BinIndex::build(&values, options)?;
        trace!(target: "colcore", column = %self.name, "index built");
        *self.index.write().expect("column index lock poisoned") = Some(index);
        Ok(())
    }

    /// Evict the cached index, but only if no reader currently holds an
    /// `IndexLock` on it (spec §4.3: `idxcnt` lets `unloadIndex` race safely
    /// with readers). Returns whether the index was actually dropped.
    pub fn unload_index(&self) -> bool {
        if self.idxcnt.load(Ordering::Acquire) > 0 {
            warn!(target: "colcore", column = %self.name, "unload_index skipped: index in use");
            return false;
        }
        let mut guard = self.index.write().expect("column index lock poisoned");
        let had_index = guard.is_some();
        *guard = None;
        had_index
    }

    /// Size of the index's serialized form, or 0 if none is cached.
    pub fn index_size(&self) -> usize {
        match self.index.read().expect("column index lock poisoned").as_ref() {
            Some(idx) => idx.serialize().len(),
            None => 0,
        }
    }

    /// Delete the cached index unconditionally (diagnostic/maintenance
    /// operation from `column.h`, ported as a thin wrapper since there is
    /// no on-disk index file in this runtime — only the in-memory cache).
    pub fn purge_index_file(&self) {
        *self.index.write().expect("column index lock poisoned") = None;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use colindex::{LeftOp, RightOp};
    use test_log::test;

    fn sample_column() -> Column {
        let values = vec![3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0, 5.0, 3.0];
        Column::new("x", ColumnType::Float64, false, ColumnData::Numeric(values))
    }

    #[test]
    fn test_do_scan_equality() {
        let col = sample_column();
        let mask = Bitmap::full(10);
        let hits = col.do_scan(&mask, |v| v == 5.0).unwrap();
        assert_eq!(hits.iter_set().collect::<Vec<_>>(), vec![4, 8]);
    }

    #[test]
    fn test_evaluate_range_without_index_falls_back_to_scan() {
        let col = sample_column();
        let mask = Bitmap::full(10);
        let range = Range::between(LeftOp::Lt, 1.0, RightOp::Le, 4.0);
        let hits = col.evaluate_range(&range, &mask).unwrap();
        assert_eq!(hits.iter_set().collect::<Vec<_>>(), vec![0, 2, 6, 9]);
    }

    #[test]
    fn test_evaluate_range_with_index_matches_scan() {
        let col = sample_column();
        col.ensure_index(&BinOptions { nbins: 4, ..BinOptions::default() }).unwrap();
        let mask = Bitmap::full(10);
        let range = Range::between(LeftOp::Lt, 1.0, RightOp::Le, 4.0);
        let hits = col.evaluate_range(&range, &mask).unwrap();
        assert_eq!(hits.iter_set().collect::<Vec<_>>(), vec![0, 2, 6, 9]);
    }

    #[test]
    fn test_unload_index_blocked_while_locked() {
        let col = sample_column();
        col.ensure_index(&BinOptions::default()).unwrap();
        let guard = col.index_lock();
        assert!(guard.get().is_some());
        assert!(!col.unload_index());
        drop(guard);
        assert!(col.unload_index());
    }

    #[test]
    fn test_compute_min_max() {
        let col = sample_column();
        assert_eq!(col.compute_min_max(), (1.0, 9.0));
    }

    #[test]
    fn test_string_column_scan() {
        let col = Column::from_strings("color", ColumnType::Category, &["red", "green", "red", "blue"]);
        let mask = Bitmap::full(4);
        let hits = col.do_scan_text(&mask, |s| s == "red").unwrap();
        assert_eq!(hits.iter_set().collect::<Vec<_>>(), vec![0, 2]);
    }
}
