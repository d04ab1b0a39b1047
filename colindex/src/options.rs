//! Parser for the bin-construction option string (spec §4.2): a small
//! space-separated `key:value`/`key=value`/bare-flag grammar, with an
//! optional set of parenthesized `(start:.. end:.. nbins:.. scale:..)`
//! region groups.

use colbase::{err, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scale {
    Linear,
    Log,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Region {
    pub start: f64,
    pub end: f64,
    pub nbins: usize,
    pub scale: Scale,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BinOptions {
    pub nbins: usize,
    pub scale: Scale,
    pub equal_weight: bool,
    pub regions: Vec<Region>,
    pub precision: Option<u32>,
    pub bin_file: Option<String>,
    pub reorder: bool,
}

impl Default for BinOptions {
    fn default() -> Self {
        BinOptions {
            nbins: 10_000,
            scale: Scale::Linear,
            equal_weight: false,
            regions: Vec::new(),
            precision: None,
            bin_file: None,
            reorder: false,
        }
    }
}

impl BinOptions {
    pub fn new() -> Self {
        BinOptions::default()
    }

    /// Parse a spec string like `nbins:500 scale:log equal-weight` or
    /// `precision:2 reorder` or `(start:0 end:10 nbins:5)(start:10 end:1000 nbins:20 scale:log)`.
    pub fn parse(spec: &str) -> Result<BinOptions> {
        let mut opts = BinOptions::default();
        let mut rest = spec.trim();
        while let Some(open) = rest.find('(') {
            let before = &rest[..open];
            apply_tokens(before, &mut opts)?;
            let close = rest[open..]
                .find(')')
                .ok_or_else(|| err("bin options: unmatched '(' in region spec"))?;
            let region_body = &rest[open + 1..open + close];
            opts.regions.push(parse_region(region_body)?);
            rest = &rest[open + close + 1..];
        }
        apply_tokens(rest, &mut opts)?;
        Ok(opts)
    }
}

fn parse_region(body: &str) -> Result<Region> {
    let mut start = None;
    let mut end = None;
    let mut nbins = 10_000usize;
    let mut scale = Scale::Linear;
    for tok in body.split_whitespace() {
        let (key, val) = split_kv(tok);
        match key {
            "start" => start = Some(parse_f64(val)?),
            "end" => end = Some(parse_f64(val)?),
            "nbins" | "no" => nbins = parse_usize(val)?,
            "scale" => scale = parse_scale(val)?,
            other => return Err(err(format!("bin options: unknown region key '{other}'"))),
        }
    }
    Ok(Region {
        start: start.ok_or_else(|| err("bin options: region missing 'start'"))?,
        end: end.ok_or_else(|| err("bin options: region missing 'end'"))?,
        nbins,
        scale,
    })
}

fn apply_tokens(text: &str, opts: &mut BinOptions) -> Result<()> {
    for tok in text.split_whitespace() {
        if tok.eq_ignore_ascii_case("equal-weight") || tok.eq_ignore_ascii_case("equal") {
            opts.equal_weight = true;
            continue;
        }
        if tok.eq_ignore_ascii_case("reorder") {
            opts.reorder = true;
            continue;
        }
        let (key, val) = split_kv(tok);
        match key.to_ascii_lowercase().as_str() {
            "nbins" | "no" => opts.nbins = parse_usize(val)?,
            "scale" => opts.scale = parse_scale(val)?,
            "precision" | "prec" => opts.precision = Some(parse_usize(val)? as u32),
            "binfile" => opts.bin_file = Some(val.to_string()),
            other if !other.is_empty() => {
                return Err(err(format!("bin options: unrecognized key '{other}'")))
            }
            _ => {}
        }
    }
    Ok(())
}

fn split_kv(tok: &str) -> (&str, &str) {
    match tok.find([':', '=']) {
        Some(i) => (&tok[..i], &tok[i + 1..]),
        None => (tok, ""),
    }
}

fn parse_f64(v: &str) -> Result<f64> {
    v.parse::<f64>().map_err(|e| err(format!("bin options: bad float '{v}': {e}")))
}

fn parse_usize(v: &str) -> Result<usize> {
    v.parse::<usize>().map_err(|e| err(format!("bin options: bad integer '{v}': {e}")))
}

fn parse_scale(v: &str) -> Result<Scale> {
    match v.to_ascii_lowercase().as_str() {
        "linear" => Ok(Scale::Linear),
        "log" => Ok(Scale::Log),
        other => Err(err(format!("bin options: unknown scale '{other}'"))),
    }
}

/// Parse the `binFile:` boundary list format: one value per line, `#`
/// introduces a trailing comment.
pub fn parse_bin_file(text: &str) -> Result<Vec<f64>> {
    let mut out = Vec::new();
    for line in text.lines() {
        let line = match line.find('#') {
            Some(i) => &line[..i],
            None => line,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        out.push(parse_f64(line)?);
    }
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_simple_flags() {
        let opts = BinOptions::parse("nbins:500 scale:log equal-weight reorder").unwrap();
        assert_eq!(opts.nbins, 500);
        assert_eq!(opts.scale, Scale::Log);
        assert!(opts.equal_weight);
        assert!(opts.reorder);
    }

    #[test]
    fn test_parse_precision() {
        let opts = BinOptions::parse("precision:2").unwrap();
        assert_eq!(opts.precision, Some(2));
    }

    #[test]
    fn test_parse_regions() {
        let opts = BinOptions::parse("(start:0 end:10 nbins:5)(start:10 end:100 nbins:20 scale:log)").unwrap();
        assert_eq!(opts.regions.len(), 2);
        assert_eq!(opts.regions[0].nbins, 5);
        assert_eq!(opts.regions[1].scale, Scale::Log);
    }

    #[test]
    fn test_parse_bin_file() {
        let text = "1.0\n# comment\n2.5\n\n3.0 # trailing\n";
        let vals = parse_bin_file(text).unwrap();
        assert_eq!(vals, vec![1.0, 2.5, 3.0]);
    }
}
