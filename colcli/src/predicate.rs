use colbase::{err, Result};
use colexpr::Expr;
use colindex::{LeftOp, Range, RightOp};

/// A minimal literal predicate grammar: `column op value` terms joined by
/// `AND`/`OR`, e.g. `"price >= 10 AND color == red"`. This is explicitly a
/// test harness for driving `colquery`/`coleval`/`coljoin` end to end, not
/// a general predicate/SQL parser — the spec names that out of scope.
pub fn parse(text: &str) -> Result<Expr> {
    let upper_has_or = text.split_whitespace().any(|tok| tok.eq_ignore_ascii_case("or"));
    let sep = if upper_has_or { "or" } else { "and" };
    let mut clauses = Vec::new();
    for part in split_on_word(text, sep) {
        clauses.push(parse_clause(part.trim())?);
    }
    if clauses.len() == 1 {
        Ok(clauses.into_iter().next().unwrap())
    } else if upper_has_or {
        Ok(Expr::Or(clauses))
    } else {
        Ok(Expr::And(clauses))
    }
}

fn split_on_word(text: &str, word: &str) -> Vec<String> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let mut parts = Vec::new();
    let mut start = 0;
    for (i, tok) in tokens.iter().enumerate() {
        if tok.eq_ignore_ascii_case(word) {
            parts.push(tokens[start..i].join(" "));
            start = i + 1;
        }
    }
    parts.push(tokens[start..].join(" "));
    parts
}

fn parse_clause(clause: &str) -> Result<Expr> {
    let tokens: Vec<&str> = clause.split_whitespace().collect();
    if tokens.len() != 3 {
        return Err(err(format!("cannot parse predicate clause '{clause}'")));
    }
    let (column, op, value) = (tokens[0], tokens[1], tokens[2]);
    if let Ok(num) = value.parse::<f64>() {
        let range = match op {
            "==" | "=" => Range::equals(num),
            ">=" => Range::at_least(LeftOp::Le, num),
            ">" => Range::at_least(LeftOp::Lt, num),
            "<=" => Range::at_most(RightOp::Le, num),
            "<" => Range::at_most(RightOp::Lt, num),
            other => return Err(err(format!("unknown operator '{other}'"))),
        };
        Ok(Expr::ContinuousRange { column: column.to_string(), range })
    } else {
        match op {
            "==" | "=" => Ok(Expr::StringEq { column: column.to_string(), value: value.to_string() }),
            other => Err(err(format!("unsupported string operator '{other}'"))),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn test_single_numeric_clause() {
        let expr = parse("price >= 10").unwrap();
        assert_eq!(expr, Expr::ContinuousRange { column: "price".into(), range: Range::at_least(LeftOp::Le, 10.0) });
    }

    #[test]
    fn test_string_equality_clause() {
        let expr = parse("color == red").unwrap();
        assert_eq!(expr, Expr::StringEq { column: "color".into(), value: "red".into() });
    }

    #[test]
    fn test_and_join() {
        let expr = parse("price >= 10 AND color == red").unwrap();
        match expr {
            Expr::And(children) => assert_eq!(children.len(), 2),
            other => panic!("expected And, got {other:?}"),
        }
    }

    #[test]
    fn test_or_join() {
        let expr = parse("price < 2 OR price > 8").unwrap();
        match expr {
            Expr::Or(children) => assert_eq!(children.len(), 2),
            other => panic!("expected Or, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_clause_errors() {
        assert!(parse("price >=").is_err());
    }
}
