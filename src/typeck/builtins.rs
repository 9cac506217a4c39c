//! The builtin function surface.
//!
//! Builtins are typed by hand here rather than through declared signatures:
//! several are width-polymorphic (`range`, `abs`, `min`) and the conversions
//! `int32`/`int64` pin the width of an otherwise unconstrained literal.

use crate::ast::{Expr, Keyword};
use crate::diagnostics::CompileError;
use crate::span::{Span, Spanned};

use super::errors::ConstraintOrigin;
use super::types::Ty;
use super::Checker;

pub const BUILTIN_NAMES: &[&str] = &[
    "print",
    "len",
    "range",
    "int",
    "int32",
    "int64",
    "float",
    "bool",
    "abs",
    "min",
    "max",
    "delay_mu",
    "delay",
    "now_mu",
    "at_mu",
    "rtio_output",
    "rtio_input_timestamp",
    "sequential",
    "interleave",
    "parallel",
];

const TIMING_MARKERS: &[&str] = &["sequential", "interleave", "parallel"];

pub fn is_builtin(name: &str) -> bool {
    BUILTIN_NAMES.contains(&name)
}

/// `sequential`, `interleave` and `parallel` only make sense as `with` items.
pub fn is_timing_marker(name: &str) -> bool {
    TIMING_MARKERS.contains(&name)
}

fn static_name(name: &str) -> &'static str {
    BUILTIN_NAMES.iter().copied().find(|n| *n == name).unwrap_or("builtin")
}

fn arity(name: &str, args: &[Spanned<Expr>], min: usize, max: usize, span: Span) -> Result<(), CompileError> {
    if args.len() >= min && args.len() <= max {
        return Ok(());
    }
    let expected = if min == max {
        format!("{} argument{}", min, if min == 1 { "" } else { "s" })
    } else if max == usize::MAX {
        format!("at least {} arguments", min)
    } else {
        format!("{} to {} arguments", min, max)
    };
    Err(CompileError::type_err(format!("'{}' expects {}, got {}", name, expected, args.len()), span))
}

impl Checker<'_> {
    /// Type a value use of a builtin name (not a call).
    pub(super) fn builtin_value(&mut self, name: &str, span: Span) -> Result<Ty, CompileError> {
        if is_timing_marker(name) {
            return Err(CompileError::type_err(format!("'{}' can only be used as a `with` block", name), span));
        }
        Err(CompileError::type_err(format!("builtin '{}' can only be called", name), span))
    }

    pub(super) fn infer_builtin_call(
        &mut self,
        name: &str,
        call: Span,
        args: &[Spanned<Expr>],
        keywords: &[Keyword],
    ) -> Result<Ty, CompileError> {
        if is_timing_marker(name) {
            return Err(CompileError::type_err(format!("'{}' can only be used as a `with` block", name), call));
        }
        if name != "print"
            && let Some(kw) = keywords.first()
        {
            return Err(CompileError::type_err(
                format!("'{}' does not take keyword arguments", name),
                kw.name.span,
            ));
        }
        let sname = static_name(name);
        let mut tys = Vec::with_capacity(args.len());
        for arg in args {
            tys.push(self.infer_expr(arg)?);
        }
        let origin = |i: usize| ConstraintOrigin::Builtin { name: sname, arg: args[i].span };

        match name {
            "print" => {
                for kw in keywords {
                    self.infer_expr(&kw.value)?;
                }
                Ok(Ty::NoneType)
            }
            "len" => {
                arity(name, args, 1, 1, call)?;
                let ty = self.icx.shallow(&tys[0]);
                match ty {
                    Ty::List(_) | Ty::Tuple(_) | Ty::Array(..) | Ty::Range(_) | Ty::Str | Ty::Bytes | Ty::Var(_) => {
                        Ok(Ty::int(32))
                    }
                    other => Err(CompileError::type_err(
                        format!("argument of 'len': {} has no length", self.icx.resolve(&other)),
                        args[0].span,
                    )),
                }
            }
            "range" => {
                arity(name, args, 1, 3, call)?;
                let elt = self.icx.fresh_int();
                for i in 0..tys.len() {
                    self.unify(&elt, &tys[i], &origin(i))?;
                }
                Ok(Ty::Range(Box::new(elt)))
            }
            "int" => {
                arity(name, args, 1, 1, call)?;
                self.expect_convertible(&tys[0], args[0].span, sname)?;
                let ty = self.icx.shallow(&tys[0]);
                if ty.is_int() { Ok(ty) } else { Ok(self.icx.fresh_int()) }
            }
            "int32" | "int64" => {
                arity(name, args, 1, 1, call)?;
                let width = if name == "int32" { 32 } else { 64 };
                self.expect_convertible(&tys[0], args[0].span, sname)?;
                // An integer whose width nothing else fixed takes this one.
                if let Ty::Int(w) = self.icx.shallow(&tys[0])
                    && let Ty::Var(_) = self.icx.shallow(&w)
                {
                    self.unify(&w, &Ty::Width(width), &origin(0))?;
                }
                Ok(Ty::int(width))
            }
            "float" => {
                arity(name, args, 1, 1, call)?;
                self.expect_convertible(&tys[0], args[0].span, sname)?;
                Ok(Ty::Float)
            }
            "bool" => {
                arity(name, args, 1, 1, call)?;
                Ok(Ty::Bool)
            }
            "abs" => {
                arity(name, args, 1, 1, call)?;
                self.expect_numeric(&tys[0], args[0].span, sname)?;
                Ok(tys[0].clone())
            }
            "min" | "max" => {
                arity(name, args, 2, usize::MAX, call)?;
                for i in 1..tys.len() {
                    self.unify(&tys[0], &tys[i], &origin(i))?;
                }
                Ok(tys[0].clone())
            }
            "delay_mu" => {
                arity(name, args, 1, 1, call)?;
                self.unify(&Ty::int(64), &tys[0], &origin(0))?;
                Ok(Ty::NoneType)
            }
            "delay" => {
                arity(name, args, 1, 1, call)?;
                self.expect_numeric(&tys[0], args[0].span, sname)?;
                Ok(Ty::NoneType)
            }
            "now_mu" => {
                arity(name, args, 0, 0, call)?;
                Ok(Ty::int(64))
            }
            "at_mu" => {
                arity(name, args, 1, 1, call)?;
                self.unify(&Ty::int(64), &tys[0], &origin(0))?;
                Ok(Ty::NoneType)
            }
            "rtio_output" => {
                arity(name, args, 2, 2, call)?;
                self.unify(&Ty::int(32), &tys[0], &origin(0))?;
                self.unify(&Ty::int(32), &tys[1], &origin(1))?;
                Ok(Ty::NoneType)
            }
            "rtio_input_timestamp" => {
                arity(name, args, 2, 2, call)?;
                self.unify(&Ty::int(64), &tys[0], &origin(0))?;
                self.unify(&Ty::int(32), &tys[1], &origin(1))?;
                Ok(Ty::int(64))
            }
            other => Err(CompileError::type_err(format!("unknown builtin '{}'", other), call)),
        }
    }

    /// Numbers only; a still-unknown type is let through.
    pub(super) fn expect_numeric(&mut self, ty: &Ty, span: Span, name: &str) -> Result<(), CompileError> {
        match self.icx.shallow(ty) {
            Ty::Int(_) | Ty::Float | Ty::Var(_) => Ok(()),
            other => Err(CompileError::type_err(
                format!("argument of '{}': expected a number, found {}", name, self.icx.resolve(&other)),
                span,
            )),
        }
    }

    fn expect_convertible(&mut self, ty: &Ty, span: Span, name: &str) -> Result<(), CompileError> {
        match self.icx.shallow(ty) {
            Ty::Int(_) | Ty::Float | Ty::Bool | Ty::Var(_) => Ok(()),
            other => Err(CompileError::type_err(
                format!("argument of '{}': cannot convert {}", name, self.icx.resolve(&other)),
                span,
            )),
        }
    }
}
