//! Unification engine.
//!
//! Structural unification over [`Ty`] using `ena`'s union-find table, with an
//! occurs check at bind time. A second table holds the delay variables of
//! function types; it is handed to the scheduler once inference is done.

use ena::unify::{EqUnifyValue, InPlaceUnificationTable, UnifyKey};

use crate::delay::DelayExpr;

use super::errors::{ConstraintOrigin, TypeError};
use super::types::{DelayVar, FnTy, Ty, TyVar};

impl UnifyKey for TyVar {
    type Value = Option<Ty>;

    fn index(&self) -> u32 {
        self.0
    }

    fn from_index(u: u32) -> Self {
        TyVar(u)
    }

    fn tag() -> &'static str {
        "TyVar"
    }
}

impl EqUnifyValue for Ty {}

impl UnifyKey for DelayVar {
    type Value = Option<DelayExpr>;

    fn index(&self) -> u32 {
        self.0
    }

    fn from_index(u: u32) -> Self {
        DelayVar(u)
    }

    fn tag() -> &'static str {
        "DelayVar"
    }
}

impl EqUnifyValue for DelayExpr {}

/// The delay-variable table.
///
/// A variable is fixed at most once per equivalence class; fixing a class
/// that already holds a different expression fails, which is how the
/// "delay already constrained" error surfaces.
pub struct DelayVars {
    table: InPlaceUnificationTable<DelayVar>,
}

impl Default for DelayVars {
    fn default() -> Self {
        Self { table: InPlaceUnificationTable::new() }
    }
}

impl std::fmt::Debug for DelayVars {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayVars").finish_non_exhaustive()
    }
}

impl DelayVars {
    pub fn fresh(&mut self) -> DelayVar {
        self.table.new_key(None)
    }

    /// Merge two variables. Fails when both are fixed to different expressions.
    pub fn union(&mut self, a: DelayVar, b: DelayVar) -> Result<(), (DelayExpr, DelayExpr)> {
        self.table.unify_var_var(a, b)
    }

    /// Fix a variable's class to `expr`. On conflict, returns the expression
    /// the class was already fixed to.
    pub fn fix(&mut self, var: DelayVar, expr: DelayExpr) -> Result<(), DelayExpr> {
        self.table.unify_var_value(var, Some(expr)).map_err(|(existing, _)| existing)
    }

    pub fn probe(&mut self, var: DelayVar) -> Option<DelayExpr> {
        self.table.probe_value(var)
    }

    pub fn root(&mut self, var: DelayVar) -> DelayVar {
        self.table.find(var)
    }
}

/// The inference context: owns the substitution.
pub struct InferCtx {
    table: InPlaceUnificationTable<TyVar>,
    pub delays: DelayVars,
}

impl Default for InferCtx {
    fn default() -> Self {
        Self::new()
    }
}

impl InferCtx {
    pub fn new() -> Self {
        Self { table: InPlaceUnificationTable::new(), delays: DelayVars::default() }
    }

    // ── Variable creation ───────────────────────────────────────────────

    pub fn fresh_var(&mut self) -> Ty {
        Ty::Var(self.table.new_key(None))
    }

    /// An integer of not-yet-known width.
    pub fn fresh_int(&mut self) -> Ty {
        Ty::Int(Box::new(self.fresh_var()))
    }

    pub fn fresh_delay(&mut self) -> DelayVar {
        self.delays.fresh()
    }

    // ── Resolution ──────────────────────────────────────────────────────

    /// Follow the variable chain at the top of a type only.
    pub fn shallow(&mut self, ty: &Ty) -> Ty {
        match ty {
            Ty::Var(v) => match self.table.probe_value(*v) {
                Some(inner) => self.shallow(&inner),
                None => Ty::Var(self.table.find(*v)),
            },
            other => other.clone(),
        }
    }

    /// Resolve a type completely, normalizing unbound variables to their root.
    pub fn resolve(&mut self, ty: &Ty) -> Ty {
        match self.shallow(ty) {
            Ty::Int(w) => Ty::Int(Box::new(self.resolve(&w))),
            Ty::List(elt) => Ty::List(Box::new(self.resolve(&elt))),
            Ty::Tuple(elts) => Ty::Tuple(elts.iter().map(|e| self.resolve(e)).collect()),
            Ty::Array(elt, n) => Ty::Array(Box::new(self.resolve(&elt)), n),
            Ty::Range(elt) => Ty::Range(Box::new(self.resolve(&elt))),
            Ty::Function(f) => Ty::Function(self.resolve_fn(&f)),
            Ty::Method(f, recv) => Ty::Method(Box::new(self.resolve_fn(&f)), Box::new(self.resolve(&recv))),
            other => other,
        }
    }

    pub fn resolve_fn(&mut self, f: &FnTy) -> FnTy {
        FnTy {
            params: f
                .params
                .iter()
                .map(|p| super::types::ParamTy { name: p.name.clone(), ty: self.resolve(&p.ty), has_default: p.has_default })
                .collect(),
            ret: Box::new(self.resolve(&f.ret)),
            delay: self.delays.root(f.delay),
        }
    }

    /// Resolve a type for output: integer widths nothing constrained become
    /// `default_width` (and stay that way for every other use of the variable).
    pub fn finalize(&mut self, ty: &Ty, default_width: u32) -> Ty {
        match self.shallow(ty) {
            Ty::Int(w) => match self.shallow(&w) {
                Ty::Var(v) => {
                    // Cannot fail: `v` is an unbound root.
                    let _ = self.table.unify_var_value(v, Some(Ty::Width(default_width)));
                    Ty::int(default_width)
                }
                other => Ty::Int(Box::new(other)),
            },
            Ty::List(elt) => Ty::List(Box::new(self.finalize(&elt, default_width))),
            Ty::Tuple(elts) => Ty::Tuple(elts.iter().map(|e| self.finalize(e, default_width)).collect()),
            Ty::Array(elt, n) => Ty::Array(Box::new(self.finalize(&elt, default_width)), n),
            Ty::Range(elt) => Ty::Range(Box::new(self.finalize(&elt, default_width))),
            Ty::Function(f) => Ty::Function(self.finalize_fn(&f, default_width)),
            Ty::Method(f, recv) => Ty::Method(
                Box::new(self.finalize_fn(&f, default_width)),
                Box::new(self.finalize(&recv, default_width)),
            ),
            other => other,
        }
    }

    pub fn finalize_fn(&mut self, f: &FnTy, default_width: u32) -> FnTy {
        FnTy {
            params: f
                .params
                .iter()
                .map(|p| super::types::ParamTy {
                    name: p.name.clone(),
                    ty: self.finalize(&p.ty, default_width),
                    has_default: p.has_default,
                })
                .collect(),
            ret: Box::new(self.finalize(&f.ret, default_width)),
            delay: self.delays.root(f.delay),
        }
    }

    // ── Occurs check ────────────────────────────────────────────────────

    pub fn occurs_in(&mut self, var: TyVar, ty: &Ty) -> bool {
        match self.shallow(ty) {
            Ty::Var(v) => self.table.find(var) == v,
            Ty::Int(w) => self.occurs_in(var, &w),
            Ty::List(elt) | Ty::Range(elt) | Ty::Array(elt, _) => self.occurs_in(var, &elt),
            Ty::Tuple(elts) => elts.iter().any(|e| self.occurs_in(var, e)),
            Ty::Function(f) => self.occurs_in_fn(var, &f),
            Ty::Method(f, recv) => self.occurs_in_fn(var, &f) || self.occurs_in(var, &recv),
            _ => false,
        }
    }

    fn occurs_in_fn(&mut self, var: TyVar, f: &FnTy) -> bool {
        f.params.iter().any(|p| self.occurs_in(var, &p.ty)) || self.occurs_in(var, &f.ret)
    }

    // ── Unification ─────────────────────────────────────────────────────

    /// Unify two types. The error carries the resolved pair that clashed.
    pub fn unify(&mut self, a: &Ty, b: &Ty, origin: &ConstraintOrigin) -> Result<(), TypeError> {
        let a = self.shallow(a);
        let b = self.shallow(b);
        match (&a, &b) {
            (Ty::Var(v1), Ty::Var(v2)) if v1 == v2 => Ok(()),
            (Ty::Var(v1), Ty::Var(v2)) => {
                // Both are unbound roots, so merging cannot conflict.
                let _ = self.table.unify_var_var(*v1, *v2);
                Ok(())
            }
            (Ty::Var(v), other) | (other, Ty::Var(v)) => {
                if self.occurs_in(*v, other) {
                    let ty = self.resolve(other);
                    return Err(TypeError::InfiniteType { var: *v, ty, origin: origin.clone() });
                }
                let _ = self.table.unify_var_value(*v, Some(other.clone()));
                Ok(())
            }
            (Ty::Bool, Ty::Bool)
            | (Ty::NoneType, Ty::NoneType)
            | (Ty::Float, Ty::Float)
            | (Ty::Str, Ty::Str)
            | (Ty::Bytes, Ty::Bytes) => Ok(()),
            (Ty::Width(x), Ty::Width(y)) if x == y => Ok(()),
            (Ty::Int(w1), Ty::Int(w2)) => {
                let (w1, w2) = (w1.clone(), w2.clone());
                self.unify(&w1, &w2, origin).map_err(|_| self.mismatch(&a, &b, origin))
            }
            (Ty::List(e1), Ty::List(e2)) | (Ty::Range(e1), Ty::Range(e2)) => {
                let (e1, e2) = (e1.clone(), e2.clone());
                self.unify(&e1, &e2, origin)
            }
            (Ty::Array(e1, n1), Ty::Array(e2, n2)) if n1 == n2 => {
                let (e1, e2) = (e1.clone(), e2.clone());
                self.unify(&e1, &e2, origin)
            }
            (Ty::Tuple(t1), Ty::Tuple(t2)) => {
                if t1.len() != t2.len() {
                    return Err(self.mismatch(&a, &b, origin));
                }
                for (x, y) in t1.clone().iter().zip(t2.clone().iter()) {
                    self.unify(x, y, origin)?;
                }
                Ok(())
            }
            (Ty::Instance(c1), Ty::Instance(c2)) | (Ty::Constructor(c1), Ty::Constructor(c2)) if c1.id == c2.id => {
                Ok(())
            }
            // Exception values share one layout; the kind is a runtime tag.
            (Ty::Exception(_), Ty::Exception(_)) => Ok(()),
            (Ty::Function(f1), Ty::Function(f2)) => {
                let (f1, f2) = (f1.clone(), f2.clone());
                self.unify_fn(&f1, &f2, &a, &b, origin)
            }
            (Ty::Method(f1, r1), Ty::Method(f2, r2)) => {
                let (f1, f2, r1, r2) = (f1.clone(), f2.clone(), r1.clone(), r2.clone());
                self.unify(&r1, &r2, origin)?;
                self.unify_fn(&f1, &f2, &a, &b, origin)
            }
            (Ty::Function(f), Ty::Method(m, _)) | (Ty::Method(m, _), Ty::Function(f)) => {
                let (f, m) = (f.clone(), m.without_self());
                self.unify_fn(&f, &m, &a, &b, origin)
            }
            _ => Err(self.mismatch(&a, &b, origin)),
        }
    }

    fn unify_fn(&mut self, f1: &FnTy, f2: &FnTy, a: &Ty, b: &Ty, origin: &ConstraintOrigin) -> Result<(), TypeError> {
        if f1.params.len() != f2.params.len() {
            return Err(self.mismatch(a, b, origin));
        }
        for (p1, p2) in f1.params.iter().zip(f2.params.iter()) {
            self.unify(&p1.ty, &p2.ty, origin)?;
        }
        self.unify(&f1.ret, &f2.ret, origin)?;
        // Delay variables are all unfixed while inference runs.
        let _ = self.delays.union(f1.delay, f2.delay);
        Ok(())
    }

    fn mismatch(&mut self, a: &Ty, b: &Ty, origin: &ConstraintOrigin) -> TypeError {
        TypeError::Mismatch { expected: self.resolve(a), found: self.resolve(b), origin: origin.clone() }
    }

    /// Hand the delay table over once inference is finished.
    pub fn into_delay_vars(self) -> DelayVars {
        self.delays
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::Span;
    use crate::typeck::types::ParamTy;

    fn origin() -> ConstraintOrigin {
        ConstraintOrigin::Expr { span: Span::dummy() }
    }

    fn func(ctx: &mut InferCtx, params: Vec<Ty>, ret: Ty) -> FnTy {
        FnTy {
            params: params
                .into_iter()
                .enumerate()
                .map(|(i, ty)| ParamTy { name: format!("p{}", i), ty, has_default: false })
                .collect(),
            ret: Box::new(ret),
            delay: ctx.fresh_delay(),
        }
    }

    #[test]
    fn var_binds_to_concrete() {
        let mut ctx = InferCtx::new();
        let v = ctx.fresh_var();
        ctx.unify(&v, &Ty::Float, &origin()).unwrap();
        assert_eq!(ctx.resolve(&v), Ty::Float);
    }

    #[test]
    fn chains_of_vars_resolve_together() {
        let mut ctx = InferCtx::new();
        let a = ctx.fresh_var();
        let b = ctx.fresh_var();
        let c = ctx.fresh_var();
        ctx.unify(&a, &b, &origin()).unwrap();
        ctx.unify(&b, &c, &origin()).unwrap();
        ctx.unify(&c, &Ty::Str, &origin()).unwrap();
        assert_eq!(ctx.resolve(&a), Ty::Str);
    }

    #[test]
    fn int_widths_unify() {
        let mut ctx = InferCtx::new();
        let x = ctx.fresh_int();
        ctx.unify(&x, &Ty::int(64), &origin()).unwrap();
        assert_eq!(ctx.resolve(&x), Ty::int(64));
        let err = ctx.unify(&x, &Ty::int(32), &origin()).unwrap_err();
        assert_eq!(err.into_compile_error().msg(), "cannot unify int64 with int32");
    }

    #[test]
    fn unconstrained_width_defaults_on_finalize() {
        let mut ctx = InferCtx::new();
        let x = ctx.fresh_int();
        let y = ctx.fresh_int();
        ctx.unify(&x, &y, &origin()).unwrap();
        assert_eq!(ctx.finalize(&x, 32), Ty::int(32));
        // The default sticks for every other use of the variable.
        assert_eq!(ctx.resolve(&y), Ty::int(32));
    }

    #[test]
    fn occurs_check_rejects_infinite_type() {
        let mut ctx = InferCtx::new();
        let v = ctx.fresh_var();
        let list = Ty::List(Box::new(v.clone()));
        let err = ctx.unify(&v, &list, &origin()).unwrap_err();
        assert!(matches!(err, TypeError::InfiniteType { .. }));
    }

    #[test]
    fn tuple_arity_mismatch() {
        let mut ctx = InferCtx::new();
        let a = Ty::Tuple(vec![Ty::Bool]);
        let b = Ty::Tuple(vec![Ty::Bool, Ty::Bool]);
        assert!(ctx.unify(&a, &b, &origin()).is_err());
    }

    #[test]
    fn function_unification_merges_delays() {
        let mut ctx = InferCtx::new();
        let f = func(&mut ctx, vec![Ty::int(32)], Ty::NoneType);
        let v = ctx.fresh_var();
        let g = func(&mut ctx, vec![v.clone()], Ty::NoneType);
        ctx.unify(&Ty::Function(f.clone()), &Ty::Function(g.clone()), &origin()).unwrap();
        assert_eq!(ctx.resolve(&v), Ty::int(32));
        assert_eq!(ctx.delays.root(f.delay), ctx.delays.root(g.delay));
    }

    #[test]
    fn method_unifies_with_function_without_receiver() {
        let mut ctx = InferCtx::new();
        let recv = ctx.fresh_var();
        let m = func(&mut ctx, vec![recv.clone(), Ty::Float], Ty::NoneType);
        let arg = ctx.fresh_var();
        let call_shape = func(&mut ctx, vec![arg.clone()], Ty::NoneType);
        ctx.unify(&Ty::Function(call_shape), &Ty::Method(Box::new(m), Box::new(recv)), &origin())
            .unwrap();
        assert_eq!(ctx.resolve(&arg), Ty::Float);
    }

    #[test]
    fn fixing_a_delay_twice_conflicts() {
        let mut vars = DelayVars::default();
        let a = vars.fresh();
        let b = vars.fresh();
        vars.union(a, b).unwrap();
        vars.fix(a, DelayExpr::Const(10)).unwrap();
        vars.fix(b, DelayExpr::Const(10)).unwrap();
        assert_eq!(vars.fix(b, DelayExpr::Const(20)), Err(DelayExpr::Const(10)));
        assert_eq!(vars.probe(b), Some(DelayExpr::Const(10)));
    }
}
