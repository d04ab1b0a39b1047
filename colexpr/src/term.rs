/// A small arithmetic term tree (spec §4.4's "compound range" and
/// `rangeJoin`'s `delta`): a variable reference, a constant, or a binary
/// operator over two subterms.
#[derive(Clone, Debug, PartialEq)]
pub enum Term {
    Var(String),
    Const(f64),
    Add(Box<Term>, Box<Term>),
    Sub(Box<Term>, Box<Term>),
    Mul(Box<Term>, Box<Term>),
}

impl Term {
    pub fn var(name: impl Into<String>) -> Term {
        Term::Var(name.into())
    }

    pub fn add(a: Term, b: Term) -> Term {
        Term::Add(Box::new(a), Box::new(b))
    }

    pub fn sub(a: Term, b: Term) -> Term {
        Term::Sub(Box::new(a), Box::new(b))
    }

    pub fn mul(a: Term, b: Term) -> Term {
        Term::Mul(Box::new(a), Box::new(b))
    }

    /// Evaluate given a single row's column values.
    pub fn eval(&self, lookup: &impl Fn(&str) -> f64) -> f64 {
        match self {
            Term::Var(name) => lookup(name),
            Term::Const(c) => *c,
            Term::Add(a, b) => a.eval(lookup) + b.eval(lookup),
            Term::Sub(a, b) => a.eval(lookup) - b.eval(lookup),
            Term::Mul(a, b) => a.eval(lookup) * b.eval(lookup),
        }
    }

    /// Does this term collapse to a constant (no variable references)?
    pub fn as_const(&self) -> Option<f64> {
        match self {
            Term::Const(c) => Some(*c),
            Term::Var(_) => None,
            Term::Add(a, b) => Some(a.as_const()? + b.as_const()?),
            Term::Sub(a, b) => Some(a.as_const()? - b.as_const()?),
            Term::Mul(a, b) => Some(a.as_const()? * b.as_const()?),
        }
    }

    /// Is this term a single variable reference plus/minus a constant
    /// delta? (spec §4.4: "only resolvable by scan unless it collapses to
    /// a constant delta on a single variable"). Returns `(var, delta)`
    /// such that `term == var + delta`.
    pub fn as_var_plus_const(&self) -> Option<(&str, f64)> {
        match self {
            Term::Var(name) => Some((name, 0.0)),
            Term::Add(a, b) => match (a.as_var_plus_const(), b.as_const()) {
                (Some((name, d)), Some(c)) => Some((name, d + c)),
                _ => match (a.as_const(), b.as_var_plus_const()) {
                    (Some(c), Some((name, d))) => Some((name, c + d)),
                    _ => None,
                },
            },
            Term::Sub(a, b) => match (a.as_var_plus_const(), b.as_const()) {
                (Some((name, d)), Some(c)) => Some((name, d - c)),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn variables(&self, out: &mut Vec<String>) {
        match self {
            Term::Var(name) => {
                if !out.iter().any(|v| v == name) {
                    out.push(name.clone());
                }
            }
            Term::Const(_) => {}
            Term::Add(a, b) | Term::Sub(a, b) | Term::Mul(a, b) => {
                a.variables(out);
                b.variables(out);
            }
        }
    }
}
