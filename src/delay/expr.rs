//! Symbolic delays.
//!
//! A [`DelayExpr`] is a duration in device ticks, possibly in terms of the
//! enclosing function's parameters. Every constructor here returns a
//! simplified expression: sums are kept in a linear normal form (constant
//! plus coefficient-weighted atoms in a canonical order), constants fold,
//! `max` flattens and drops dominated arms, and `Indeterminate` absorbs
//! everything it touches.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum DelayExpr {
    Const(i64),
    /// A parameter of the innermost enclosing function.
    ArgRef(String),
    Add(Box<DelayExpr>, Box<DelayExpr>),
    Sub(Box<DelayExpr>, Box<DelayExpr>),
    Mul(Box<DelayExpr>, Box<DelayExpr>),
    FloorDiv(Box<DelayExpr>, Box<DelayExpr>),
    /// Exact division rounded to the nearest tick, ties away from zero.
    Div(Box<DelayExpr>, Box<DelayExpr>),
    Max(Vec<DelayExpr>),
    Indeterminate(String),
}

impl DelayExpr {
    pub fn zero() -> Self {
        DelayExpr::Const(0)
    }

    pub fn arg(name: impl Into<String>) -> Self {
        DelayExpr::ArgRef(name.into())
    }

    pub fn indeterminate(reason: impl Into<String>) -> Self {
        DelayExpr::Indeterminate(reason.into())
    }

    pub fn add(a: DelayExpr, b: DelayExpr) -> Self {
        DelayExpr::Add(Box::new(a), Box::new(b)).simplify()
    }

    pub fn sub(a: DelayExpr, b: DelayExpr) -> Self {
        DelayExpr::Sub(Box::new(a), Box::new(b)).simplify()
    }

    pub fn mul(a: DelayExpr, b: DelayExpr) -> Self {
        DelayExpr::Mul(Box::new(a), Box::new(b)).simplify()
    }

    pub fn floor_div(a: DelayExpr, b: DelayExpr) -> Self {
        DelayExpr::FloorDiv(Box::new(a), Box::new(b)).simplify()
    }

    pub fn div(a: DelayExpr, b: DelayExpr) -> Self {
        DelayExpr::Div(Box::new(a), Box::new(b)).simplify()
    }

    pub fn max(items: Vec<DelayExpr>) -> Self {
        DelayExpr::Max(items).simplify()
    }

    /// Sum of a sequence; the empty sum is zero.
    pub fn sum<I: IntoIterator<Item = DelayExpr>>(items: I) -> Self {
        items.into_iter().fold(DelayExpr::zero(), DelayExpr::add)
    }

    pub fn as_const(&self) -> Option<i64> {
        match self {
            DelayExpr::Const(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.as_const() == Some(0)
    }

    pub fn is_indeterminate(&self) -> bool {
        matches!(self, DelayExpr::Indeterminate(_))
    }

    /// The reason carried by an indeterminate delay.
    pub fn indeterminate_reason(&self) -> Option<&str> {
        match self {
            DelayExpr::Indeterminate(reason) => Some(reason),
            _ => None,
        }
    }

    /// `a - b` when it simplifies to a constant.
    pub fn const_difference(a: &DelayExpr, b: &DelayExpr) -> Option<i64> {
        DelayExpr::sub(a.clone(), b.clone()).as_const()
    }

    /// Replace parameter references by the given expressions.
    pub fn subst(&self, args: &BTreeMap<String, DelayExpr>) -> DelayExpr {
        self.map_args(&|name| args.get(name).cloned()).simplify()
    }

    fn map_args(&self, f: &dyn Fn(&str) -> Option<DelayExpr>) -> DelayExpr {
        let bin = |a: &DelayExpr, b: &DelayExpr| (Box::new(a.map_args(f)), Box::new(b.map_args(f)));
        match self {
            DelayExpr::ArgRef(name) => f(name).unwrap_or_else(|| self.clone()),
            DelayExpr::Const(_) | DelayExpr::Indeterminate(_) => self.clone(),
            DelayExpr::Add(a, b) => {
                let (a, b) = bin(a, b);
                DelayExpr::Add(a, b)
            }
            DelayExpr::Sub(a, b) => {
                let (a, b) = bin(a, b);
                DelayExpr::Sub(a, b)
            }
            DelayExpr::Mul(a, b) => {
                let (a, b) = bin(a, b);
                DelayExpr::Mul(a, b)
            }
            DelayExpr::FloorDiv(a, b) => {
                let (a, b) = bin(a, b);
                DelayExpr::FloorDiv(a, b)
            }
            DelayExpr::Div(a, b) => {
                let (a, b) = bin(a, b);
                DelayExpr::Div(a, b)
            }
            DelayExpr::Max(items) => DelayExpr::Max(items.iter().map(|e| e.map_args(f)).collect()),
        }
    }

    /// Evaluate with concrete parameter values. `None` when a parameter is
    /// missing, the expression is indeterminate, or arithmetic fails.
    pub fn eval(&self, args: &BTreeMap<String, i64>) -> Option<i64> {
        match self {
            DelayExpr::Const(n) => Some(*n),
            DelayExpr::ArgRef(name) => args.get(name).copied(),
            DelayExpr::Add(a, b) => a.eval(args)?.checked_add(b.eval(args)?),
            DelayExpr::Sub(a, b) => a.eval(args)?.checked_sub(b.eval(args)?),
            DelayExpr::Mul(a, b) => a.eval(args)?.checked_mul(b.eval(args)?),
            DelayExpr::FloorDiv(a, b) => floor_div(a.eval(args)?, b.eval(args)?),
            DelayExpr::Div(a, b) => round_div(a.eval(args)?, b.eval(args)?),
            DelayExpr::Max(items) => {
                let mut best: Option<i64> = None;
                for item in items {
                    let v = item.eval(args)?;
                    best = Some(best.map_or(v, |b| b.max(v)));
                }
                best
            }
            DelayExpr::Indeterminate(_) => None,
        }
    }

    /// Bring the expression to normal form.
    pub fn simplify(&self) -> DelayExpr {
        match linearize(self) {
            Ok(lin) => lin.rebuild(),
            Err(reason) => DelayExpr::Indeterminate(reason),
        }
    }
}

pub(crate) fn floor_div(a: i64, b: i64) -> Option<i64> {
    if b == 0 {
        return None;
    }
    let q = a.checked_div(b)?;
    let r = a.checked_rem(b)?;
    Some(if r != 0 && ((r < 0) != (b < 0)) { q - 1 } else { q })
}

pub(crate) fn round_div(a: i64, b: i64) -> Option<i64> {
    if b == 0 {
        return None;
    }
    let q = a.checked_div(b)?;
    let r = a.checked_rem(b)?;
    if r.unsigned_abs() * 2 >= b.unsigned_abs() {
        Some(if (a < 0) == (b < 0) { q + 1 } else { q - 1 })
    } else {
        Some(q)
    }
}

/// `constant + Σ coef·atom`, atoms keyed by their display form.
#[derive(Debug, Clone, Default)]
struct Linear {
    constant: i64,
    terms: BTreeMap<String, (i64, DelayExpr)>,
}

const OVERFLOW: &str = "delay arithmetic overflows";

impl Linear {
    fn constant(n: i64) -> Self {
        Linear { constant: n, terms: BTreeMap::new() }
    }

    fn atom(e: DelayExpr) -> Self {
        let mut terms = BTreeMap::new();
        terms.insert(e.to_string(), (1, e));
        Linear { constant: 0, terms }
    }

    fn as_const(&self) -> Option<i64> {
        self.terms.is_empty().then_some(self.constant)
    }

    fn plus(mut self, other: Linear, sign: i64) -> Result<Self, String> {
        let scaled = other.scale(sign)?;
        self.constant = self.constant.checked_add(scaled.constant).ok_or(OVERFLOW)?;
        for (key, (coef, atom)) in scaled.terms {
            let entry = self.terms.entry(key).or_insert((0, atom));
            entry.0 = entry.0.checked_add(coef).ok_or(OVERFLOW)?;
        }
        self.terms.retain(|_, (coef, _)| *coef != 0);
        Ok(self)
    }

    fn scale(mut self, k: i64) -> Result<Self, String> {
        if k == 0 {
            return Ok(Linear::constant(0));
        }
        self.constant = self.constant.checked_mul(k).ok_or(OVERFLOW)?;
        for (coef, _) in self.terms.values_mut() {
            *coef = coef.checked_mul(k).ok_or(OVERFLOW)?;
        }
        Ok(self)
    }

    fn rebuild(self) -> DelayExpr {
        let mut acc: Option<DelayExpr> = None;
        for (_, (coef, atom)) in self.terms {
            let scaled = |k: i64| {
                if k == 1 { atom.clone() } else { DelayExpr::Mul(Box::new(DelayExpr::Const(k)), Box::new(atom.clone())) }
            };
            acc = Some(match (acc, coef.checked_neg()) {
                (None, _) => scaled(coef),
                (Some(a), _) if coef > 0 => DelayExpr::Add(Box::new(a), Box::new(scaled(coef))),
                (Some(a), Some(neg)) => DelayExpr::Sub(Box::new(a), Box::new(scaled(neg))),
                // i64::MIN has no positive counterpart.
                (Some(a), None) => DelayExpr::Add(Box::new(a), Box::new(scaled(coef))),
            });
        }
        match (acc, self.constant.checked_neg()) {
            (None, _) => DelayExpr::Const(self.constant),
            (Some(a), _) if self.constant == 0 => a,
            (Some(a), Some(neg)) if self.constant < 0 => DelayExpr::Sub(Box::new(a), Box::new(DelayExpr::Const(neg))),
            (Some(a), _) => DelayExpr::Add(Box::new(a), Box::new(DelayExpr::Const(self.constant))),
        }
    }
}

fn linearize(e: &DelayExpr) -> Result<Linear, String> {
    match e {
        DelayExpr::Const(n) => Ok(Linear::constant(*n)),
        DelayExpr::ArgRef(_) => Ok(Linear::atom(e.clone())),
        DelayExpr::Indeterminate(reason) => Err(reason.clone()),
        DelayExpr::Add(a, b) => linearize(a)?.plus(linearize(b)?, 1),
        DelayExpr::Sub(a, b) => linearize(a)?.plus(linearize(b)?, -1),
        DelayExpr::Mul(a, b) => {
            let (la, lb) = (linearize(a)?, linearize(b)?);
            match (la.as_const(), lb.as_const()) {
                (Some(k), _) => lb.scale(k),
                (_, Some(k)) => la.scale(k),
                _ => {
                    let (mut x, mut y) = (la.rebuild(), lb.rebuild());
                    if x.to_string() > y.to_string() {
                        std::mem::swap(&mut x, &mut y);
                    }
                    Ok(Linear::atom(DelayExpr::Mul(Box::new(x), Box::new(y))))
                }
            }
        }
        DelayExpr::FloorDiv(a, b) | DelayExpr::Div(a, b) => {
            let floor = matches!(e, DelayExpr::FloorDiv(..));
            let (la, lb) = (linearize(a)?, linearize(b)?);
            match (la.as_const(), lb.as_const()) {
                (_, Some(0)) => Err("division by zero".to_string()),
                (Some(x), Some(y)) => {
                    let q = if floor { floor_div(x, y) } else { round_div(x, y) };
                    q.map(Linear::constant).ok_or_else(|| OVERFLOW.to_string())
                }
                (_, Some(1)) => Ok(la),
                _ => {
                    let (x, y) = (Box::new(la.rebuild()), Box::new(lb.rebuild()));
                    Ok(Linear::atom(if floor { DelayExpr::FloorDiv(x, y) } else { DelayExpr::Div(x, y) }))
                }
            }
        }
        DelayExpr::Max(items) => {
            let mut flat: Vec<DelayExpr> = Vec::new();
            for item in items {
                match item.simplify() {
                    DelayExpr::Indeterminate(reason) => return Err(reason),
                    DelayExpr::Max(inner) => flat.extend(inner),
                    other => flat.push(other),
                }
            }
            let mut kept: Vec<DelayExpr> = Vec::new();
            'next: for item in flat {
                let mut i = 0;
                while i < kept.len() {
                    match DelayExpr::const_difference(&item, &kept[i]) {
                        // Dominated by (or equal to) an arm already kept.
                        Some(d) if d <= 0 => continue 'next,
                        Some(_) => {
                            kept.remove(i);
                        }
                        None => i += 1,
                    }
                }
                kept.push(item);
            }
            kept.sort_by_key(|e| e.to_string());
            match kept.len() {
                0 => Ok(Linear::constant(0)),
                1 => linearize(&kept[0]),
                _ => Ok(Linear::atom(DelayExpr::Max(kept))),
            }
        }
    }
}

fn precedence(e: &DelayExpr) -> u8 {
    match e {
        DelayExpr::Add(..) | DelayExpr::Sub(..) => 1,
        DelayExpr::Mul(..) | DelayExpr::FloorDiv(..) | DelayExpr::Div(..) => 2,
        DelayExpr::Const(n) if *n < 0 => 1,
        _ => 3,
    }
}

impl fmt::Display for DelayExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (a, b, op) = match self {
            DelayExpr::Const(n) => return write!(f, "{}", n),
            DelayExpr::ArgRef(name) => return write!(f, "{}", name),
            DelayExpr::Indeterminate(reason) => return write!(f, "indeterminate({})", reason),
            DelayExpr::Max(items) => {
                write!(f, "max(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                return write!(f, ")");
            }
            DelayExpr::Add(a, b) => (a, b, "+"),
            DelayExpr::Sub(a, b) => (a, b, "-"),
            DelayExpr::Mul(a, b) => (a, b, "*"),
            DelayExpr::FloorDiv(a, b) => (a, b, "//"),
            DelayExpr::Div(a, b) => (a, b, "/"),
        };
        let own = precedence(self);
        let left_parens = precedence(a) < own;
        let right_parens = precedence(b) < own || (precedence(b) == own && op != "+" && op != "*");
        if left_parens {
            write!(f, "({})", a)?;
        } else {
            write!(f, "{}", a)?;
        }
        write!(f, " {} ", op)?;
        if right_parens { write!(f, "({})", b) } else { write!(f, "{}", b) }
    }
}
