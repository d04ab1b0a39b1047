//! On-disk bin index layout: magic header, offsets table, per-bin bounds,
//! then one WAH bitmap stream per bin. Byte 7 of the header carries
//! `sizeof(i32)` so a reader on a mismatched-endianness host can tell the
//! file is foreign and treat it as "no index" rather than misparse it.

use colbase::{err, Result};
use colbitmap::Bitmap;

const MAGIC: &[u8; 6] = b"#IBIS\0";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexKind {
    Binning,
    Bak2,
    Relic,
}

impl IndexKind {
    fn to_byte(self) -> u8 {
        match self {
            IndexKind::Binning => 0,
            IndexKind::Bak2 => 1,
            IndexKind::Relic => 2,
        }
    }

    fn from_byte(b: u8) -> Result<IndexKind> {
        match b {
            0 => Ok(IndexKind::Binning),
            1 => Ok(IndexKind::Bak2),
            2 => Ok(IndexKind::Relic),
            other => Err(err(format!("unrecognized bin index kind byte {other}"))),
        }
    }
}

pub struct RawIndex {
    pub kind: IndexKind,
    pub nrows: u32,
    pub bounds: Vec<f64>,
    pub maxval: Vec<f64>,
    pub minval: Vec<f64>,
    pub bits: Vec<Bitmap>,
}

/// Round `n` up to the next multiple of 8.
fn pad8(n: usize) -> usize {
    (n + 7) & !7
}

pub fn write(idx: &RawIndex) -> Vec<u8> {
    let nobs = idx.bits.len();
    let bitmap_bytes: Vec<Vec<u8>> = idx.bits.iter().map(|b| b.serialize()).collect();

    let mut offsets = Vec::with_capacity(nobs + 1);
    let mut acc = 0i32;
    for b in &bitmap_bytes {
        offsets.push(acc);
        acc += b.len() as i32;
    }
    offsets.push(acc);

    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.push(idx.kind.to_byte());
    out.push(std::mem::size_of::<i32>() as u8);
    out.extend_from_slice(&idx.nrows.to_le_bytes());
    out.extend_from_slice(&(nobs as u32).to_le_bytes());
    for o in &offsets {
        out.extend_from_slice(&o.to_le_bytes());
    }
    let padded = pad8(out.len());
    out.resize(padded, 0);

    for v in &idx.bounds {
        out.extend_from_slice(&v.to_le_bytes());
    }
    for v in &idx.maxval {
        out.extend_from_slice(&v.to_le_bytes());
    }
    for v in &idx.minval {
        out.extend_from_slice(&v.to_le_bytes());
    }
    for b in &bitmap_bytes {
        out.extend_from_slice(b);
    }
    out
}

pub fn read(bytes: &[u8]) -> Result<RawIndex> {
    if bytes.len() < 8 || &bytes[0..6] != MAGIC {
        return Err(err("not a bin index file (bad magic)"));
    }
    let kind = IndexKind::from_byte(bytes[6])?;
    if bytes[7] != std::mem::size_of::<i32>() as u8 {
        return Err(err("bin index file word size mismatch (foreign endianness)"));
    }
    let mut p = 8usize;
    let take_u32 = |bytes: &[u8], p: &mut usize| -> Result<u32> {
        if *p + 4 > bytes.len() {
            return Err(err("truncated bin index header"));
        }
        let v = u32::from_le_bytes(bytes[*p..*p + 4].try_into().unwrap());
        *p += 4;
        Ok(v)
    };
    let nrows = take_u32(bytes, &mut p)?;
    let nobs = take_u32(bytes, &mut p)? as usize;

    let mut offsets = Vec::with_capacity(nobs + 1);
    for _ in 0..=nobs {
        if p + 4 > bytes.len() {
            return Err(err("truncated bin index offsets table"));
        }
        offsets.push(i32::from_le_bytes(bytes[p..p + 4].try_into().unwrap()));
        p += 4;
    }
    p = pad8(p);

    let mut read_f64_vec = |p: &mut usize, n: usize| -> Result<Vec<f64>> {
        let mut v = Vec::with_capacity(n);
        for _ in 0..n {
            if *p + 8 > bytes.len() {
                return Err(err("truncated bin index bounds array"));
            }
            v.push(f64::from_le_bytes(bytes[*p..*p + 8].try_into().unwrap()));
            *p += 8;
        }
        Ok(v)
    };
    let bounds = read_f64_vec(&mut p, nobs)?;
    let maxval = read_f64_vec(&mut p, nobs)?;
    let minval = read_f64_vec(&mut p, nobs)?;

    let bitmaps_start = p;
    let mut bits = Vec::with_capacity(nobs);
    for i in 0..nobs {
        let lo = bitmaps_start + offsets[i] as usize;
        let hi = bitmaps_start + offsets[i + 1] as usize;
        if hi > bytes.len() || lo > hi {
            return Err(err("bin index bitmap offset out of range"));
        }
        bits.push(Bitmap::deserialize(&bytes[lo..hi])?);
    }

    Ok(RawIndex { kind, nrows, bounds, maxval, minval, bits })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_round_trip() {
        let idx = RawIndex {
            kind: IndexKind::Binning,
            nrows: 10,
            bounds: vec![2.0, 4.0, f64::INFINITY],
            maxval: vec![1.0, 4.0, 9.0],
            minval: vec![1.0, 3.0, 5.0],
            bits: vec![
                Bitmap::from_sorted_positions(10, &[1, 3]),
                Bitmap::from_sorted_positions(10, &[0, 2, 6, 9]),
                Bitmap::from_sorted_positions(10, &[4, 5, 7, 8]),
            ],
        };
        let bytes = write(&idx);
        let back = read(&bytes).unwrap();
        assert_eq!(back.kind, idx.kind);
        assert_eq!(back.nrows, idx.nrows);
        assert_eq!(back.bounds, idx.bounds);
        assert_eq!(back.maxval, idx.maxval);
        assert_eq!(back.minval, idx.minval);
        for (a, b) in back.bits.iter().zip(idx.bits.iter()) {
            assert_eq!(a.iter_set().collect::<Vec<_>>(), b.iter_set().collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_rejects_bad_magic() {
        let bytes = vec![0u8; 20];
        assert!(read(&bytes).is_err());
    }
}
