//! Unification errors with provenance.
//!
//! Every constraint carries a [`ConstraintOrigin`] recording which syntax
//! demanded it, so a failed unification can point at both sides.

use crate::ast::BinOp;
use crate::diagnostics::CompileError;
use crate::span::Span;

use super::types::{Ty, TyVar};

/// Where a type constraint came from.
#[derive(Debug, Clone)]
pub enum ConstraintOrigin {
    /// A plain expression whose type was required to be something.
    Expr { span: Span },
    /// Both operands of a binary operator.
    BinOp { op: BinOp, lhs: Span, rhs: Span },
    /// `target = value`.
    Assign { target: Span, value: Span },
    /// An argument passed for a named parameter.
    Arg { call: Span, param: String, arg: Span },
    /// A `return` statement against the function's return type.
    Return { span: Span, function: Span },
    /// Two arms that must agree, e.g. the arms of an `if` expression.
    Arms { first: Span, second: Span },
    /// An element of a list literal against the first element.
    Element { first: Span, elt: Span },
    /// The receiver of a method against its class.
    Receiver { span: Span },
    /// An argument of a builtin.
    Builtin { name: &'static str, arg: Span },
}

impl ConstraintOrigin {
    pub fn span(&self) -> Span {
        match self {
            ConstraintOrigin::Expr { span } => *span,
            ConstraintOrigin::BinOp { lhs, rhs, .. } => lhs.to(*rhs),
            ConstraintOrigin::Assign { value, .. } => *value,
            ConstraintOrigin::Arg { arg, .. } => *arg,
            ConstraintOrigin::Return { span, .. } => *span,
            ConstraintOrigin::Arms { second, .. } => *second,
            ConstraintOrigin::Element { elt, .. } => *elt,
            ConstraintOrigin::Receiver { span } => *span,
            ConstraintOrigin::Builtin { arg, .. } => *arg,
        }
    }
}

#[derive(Debug, Clone)]
pub enum TypeError {
    /// Two types that should be equal are not.
    Mismatch { expected: Ty, found: Ty, origin: ConstraintOrigin },
    /// A variable would have to contain itself.
    InfiniteType { var: TyVar, ty: Ty, origin: ConstraintOrigin },
}

impl TypeError {
    pub fn origin(&self) -> &ConstraintOrigin {
        match self {
            TypeError::Mismatch { origin, .. } | TypeError::InfiniteType { origin, .. } => origin,
        }
    }

    pub fn into_compile_error(self) -> CompileError {
        match self {
            TypeError::Mismatch { expected, found, origin } => {
                let base = format!("cannot unify {} with {}", expected, found);
                match origin {
                    ConstraintOrigin::Expr { span } => CompileError::type_err(base, span),
                    ConstraintOrigin::BinOp { op, lhs, rhs } => CompileError::type_err(
                        format!("{} in operands of `{}`", base, op.symbol()),
                        lhs.to(rhs),
                    )
                    .with_note(format!("left operand has type {}", expected), lhs)
                    .with_note(format!("right operand has type {}", found), rhs),
                    ConstraintOrigin::Assign { target, value } => CompileError::type_err(base, value)
                        .with_note(format!("the target has type {}", expected), target),
                    ConstraintOrigin::Arg { call, param, arg } => {
                        CompileError::type_err(format!("argument '{}': {}", param, base), arg)
                            .with_note("in this call", call)
                    }
                    ConstraintOrigin::Return { span, function } => CompileError::type_err(base, span)
                        .with_note(format!("the function returns {}", expected), function),
                    ConstraintOrigin::Arms { first, second } => CompileError::type_err(base, second)
                        .with_note(format!("the other arm has type {}", expected), first),
                    ConstraintOrigin::Element { first, elt } => CompileError::type_err(base, elt)
                        .with_note(format!("the first element has type {}", expected), first),
                    ConstraintOrigin::Receiver { span } => {
                        CompileError::type_err(format!("receiver: {}", base), span)
                    }
                    ConstraintOrigin::Builtin { name, arg } => {
                        CompileError::type_err(format!("argument of '{}': {}", name, base), arg)
                    }
                }
            }
            TypeError::InfiniteType { var, ty, origin } => CompileError::type_err(
                format!("infinite type: 't{} occurs in {}", var.0, ty),
                origin.span(),
            ),
        }
    }
}
