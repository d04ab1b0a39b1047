//! Minimal text/category dictionary. Stands in for the spec's declared
//! external collaborator (§1: "the text/category dictionary... excluded
//! from the core") so `colcore`'s string predicates have somewhere to
//! resolve against; not part of the core's tested invariants.

use colbase::{err, Result};
use std::collections::HashMap;

/// A dedup'd string heap plus a code -> (offset, len) table, in the shape
/// of a dictionary-encoded text/category column. Lookup by code is O(1);
/// interning is dedup'd by scanning the heap (fine for the small alphabets
/// category columns actually have).
#[derive(Clone, Debug, Default)]
pub struct Dictionary {
    heap: Vec<u8>,
    spans: Vec<(u32, u32)>,
    codes: HashMap<String, u32>,
}

impl Dictionary {
    pub fn new() -> Self {
        Dictionary::default()
    }

    /// Intern `s`, returning its stable code. Interning the same string
    /// twice returns the same code.
    pub fn intern(&mut self, s: &str) -> u32 {
        if let Some(&code) = self.codes.get(s) {
            return code;
        }
        let bytes = s.as_bytes();
        let offset = match memchr::memmem::find(&self.heap, bytes) {
            Some(pos) => pos,
            None => {
                let pos = self.heap.len();
                self.heap.extend_from_slice(bytes);
                pos
            }
        };
        let code = self.spans.len() as u32;
        self.spans.push((offset as u32, bytes.len() as u32));
        self.codes.insert(s.to_string(), code);
        code
    }

    pub fn code_of(&self, s: &str) -> Option<u32> {
        self.codes.get(s).copied()
    }

    pub fn get(&self, code: u32) -> Result<&str> {
        let &(offset, len) = self
            .spans
            .get(code as usize)
            .ok_or_else(|| err(format!("dictionary: no entry for code {code}")))?;
        let bytes = &self.heap[offset as usize..offset as usize + len as usize];
        std::str::from_utf8(bytes).map_err(|e| err(format!("dictionary: non-utf8 entry: {e}")))
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Test every interned string against `pred`, returning the set of
    /// codes that match — used to resolve a column's string predicate
    /// into a set of dictionary codes the column scan can then test rows
    /// against cheaply (integer compare instead of a string compare per
    /// row).
    pub fn codes_matching(&self, pred: impl Fn(&str) -> bool) -> Result<Vec<u32>> {
        let mut out = Vec::new();
        for code in 0..self.spans.len() as u32 {
            if pred(self.get(code)?) {
                out.push(code);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn test_intern_dedups() {
        let mut d = Dictionary::new();
        let a = d.intern("red");
        let b = d.intern("blue");
        let c = d.intern("red");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(d.len(), 2);
    }

    #[test]
    fn test_get_round_trip() {
        let mut d = Dictionary::new();
        let code = d.intern("category-a");
        assert_eq!(d.get(code).unwrap(), "category-a");
    }

    #[test]
    fn test_codes_matching() {
        let mut d = Dictionary::new();
        d.intern("red");
        d.intern("green");
        d.intern("blue");
        let mut matches = d.codes_matching(|s| s.starts_with('b') || s.starts_with('g')).unwrap();
        matches.sort();
        let mut names: Vec<&str> = matches.iter().map(|&c| d.get(c).unwrap()).collect();
        names.sort();
        assert_eq!(names, vec!["blue", "green"]);
    }
}
