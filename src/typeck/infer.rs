use crate::ast::*;
use crate::diagnostics::CompileError;
use crate::scope::Resolution;
use crate::span::{NodeId, Span, Spanned};

use super::env::CallTarget;
use super::errors::ConstraintOrigin;
use super::types::{ClassRef, FnTy, ParamTy, Ty};
use super::{CallSite, Checker, PendingAttr};

/// Longest tuple a constant repetition may produce.
const MAX_TUPLE_LEN: usize = 1024;

impl Checker<'_> {
    pub(super) fn infer_expr(&mut self, expr: &Spanned<Expr>) -> Result<Ty, CompileError> {
        let ty = self.infer_expr_inner(expr)?;
        self.exprs.insert(expr.id, ty.clone());
        Ok(ty)
    }

    fn infer_expr_inner(&mut self, expr: &Spanned<Expr>) -> Result<Ty, CompileError> {
        match &expr.node {
            Expr::Int(_) => Ok(self.icx.fresh_int()),
            Expr::Float(_) => Ok(Ty::Float),
            Expr::Bool(_) => Ok(Ty::Bool),
            Expr::Str(_) => Ok(Ty::Str),
            Expr::Bytes(_) => Ok(Ty::Bytes),
            Expr::NoneLit => Ok(Ty::NoneType),
            Expr::Name(name) => self.name_ty(name, expr.span),
            Expr::BinOp { op, lhs, rhs } => {
                let l = self.infer_expr(lhs)?;
                let r = self.infer_expr(rhs)?;
                self.binop_result(*op, l, r, lhs, rhs)
            }
            Expr::UnaryOp { op, operand } => {
                let t = self.infer_expr(operand)?;
                match op {
                    UnaryOp::Not => Ok(Ty::Bool),
                    UnaryOp::Neg | UnaryOp::Pos => match self.icx.shallow(&t) {
                        Ty::Int(_) | Ty::Float | Ty::Var(_) => Ok(t),
                        other => Err(CompileError::type_err(
                            format!(
                                "bad operand type for unary {}: {}",
                                if *op == UnaryOp::Neg { "-" } else { "+" },
                                self.icx.resolve(&other)
                            ),
                            operand.span,
                        )),
                    },
                    UnaryOp::Invert => {
                        let int = self.icx.fresh_int();
                        self.unify(&int, &t, &ConstraintOrigin::Expr { span: operand.span })?;
                        Ok(t)
                    }
                }
            }
            Expr::BoolOp { values, .. } => {
                let Some((first, rest)) = values.split_first() else {
                    return Ok(Ty::Bool);
                };
                let ty = self.infer_expr(first)?;
                for value in rest {
                    let t = self.infer_expr(value)?;
                    self.unify(&ty, &t, &ConstraintOrigin::Arms { first: first.span, second: value.span })?;
                }
                Ok(ty)
            }
            Expr::Compare { lhs, ops } => {
                let mut left = self.infer_expr(lhs)?;
                let mut left_span = lhs.span;
                for (op, rhs) in ops {
                    let right = self.infer_expr(rhs)?;
                    self.compare(*op, &left, left_span, &right, rhs.span)?;
                    left = right;
                    left_span = rhs.span;
                }
                Ok(Ty::Bool)
            }
            Expr::Call { func, args, keywords } => self.infer_call(expr, func, args, keywords),
            Expr::Attribute { value, attr } => {
                let object = self.infer_expr(value)?;
                self.attribute(&object, &attr.node, expr.span)
            }
            Expr::Subscript { value, index } => self.subscript(value, index),
            Expr::IfExp { test, body, orelse } => {
                self.infer_expr(test)?;
                let then_ty = self.infer_expr(body)?;
                let else_ty = self.infer_expr(orelse)?;
                self.unify(&then_ty, &else_ty, &ConstraintOrigin::Arms { first: body.span, second: orelse.span })?;
                Ok(then_ty)
            }
            Expr::List(elts) => {
                let Some((first, rest)) = elts.split_first() else {
                    return Ok(Ty::List(Box::new(self.icx.fresh_var())));
                };
                let elt = self.infer_expr(first)?;
                for e in rest {
                    let t = self.infer_expr(e)?;
                    self.unify(&elt, &t, &ConstraintOrigin::Element { first: first.span, elt: e.span })?;
                }
                Ok(Ty::List(Box::new(elt)))
            }
            Expr::Tuple(elts) => {
                let mut tys = Vec::with_capacity(elts.len());
                for e in elts {
                    tys.push(self.infer_expr(e)?);
                }
                Ok(Ty::Tuple(tys))
            }
            Expr::Lambda { params, .. } => {
                self.check_defaults(expr.id, params)?;
                match self.functions.get(&expr.id) {
                    Some(sig) => Ok(Ty::Function(sig.clone())),
                    None => Err(CompileError::type_err("lambda was not declared", expr.span)),
                }
            }
        }
    }

    fn name_ty(&mut self, name: &str, span: Span) -> Result<Ty, CompileError> {
        match self.scopes.resolve(self.current_fn, self.current_class, name) {
            Resolution::Local(f) => Ok(self.binding(Some(f), name)),
            Resolution::Global => Ok(self.binding(None, name)),
            Resolution::ClassField(c) => {
                let Some(class) = self.classes.get(&c) else {
                    return Ok(self.icx.fresh_var());
                };
                if let Some(ty) = class.field(name) {
                    return Ok(ty.clone());
                }
                match class.method(name).and_then(|m| self.functions.get(&m)) {
                    Some(sig) => Ok(Ty::Function(sig.clone())),
                    None => Ok(self.icx.fresh_var()),
                }
            }
            Resolution::Builtin => self.builtin_value(name, span),
            Resolution::Exception(kind) => Ok(Ty::Exception(kind)),
            // Already reported by name resolution.
            Resolution::Unresolved => Ok(self.icx.fresh_var()),
        }
    }

    /// Infer parameter defaults in the defining scope against the parameter types.
    pub(super) fn check_defaults(&mut self, function: NodeId, params: &[Param]) -> Result<(), CompileError> {
        for (i, param) in params.iter().enumerate() {
            let Some(default) = &param.default else { continue };
            let ty = self.infer_expr(default)?;
            let Some(expected) = self.functions.get(&function).and_then(|f| f.params.get(i)).map(|p| p.ty.clone())
            else {
                continue;
            };
            self.unify(&expected, &ty, &ConstraintOrigin::Assign { target: param.name.span, value: default.span })?;
        }
        Ok(())
    }

    // ── Operators ───────────────────────────────────────────────────────

    pub(super) fn binop_result(
        &mut self,
        op: BinOp,
        l: Ty,
        r: Ty,
        lhs: &Spanned<Expr>,
        rhs: &Spanned<Expr>,
    ) -> Result<Ty, CompileError> {
        let origin = ConstraintOrigin::BinOp { op, lhs: lhs.span, rhs: rhs.span };
        match op {
            BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => {
                let int = self.icx.fresh_int();
                self.unify(&int, &l, &origin)?;
                self.unify(&l, &r, &origin)?;
                return Ok(l);
            }
            BinOp::LShift | BinOp::RShift => {
                let int = self.icx.fresh_int();
                self.unify(&int, &l, &origin)?;
                let amount = self.icx.fresh_int();
                self.unify(&amount, &r, &origin)?;
                return Ok(l);
            }
            _ => {}
        }

        let ls = self.icx.shallow(&l);
        let rs = self.icx.shallow(&r);
        match (op, &ls, &rs) {
            // Mixed int/float promotes; the integer's width stays its own.
            (_, Ty::Float, Ty::Int(_)) | (_, Ty::Int(_), Ty::Float) => return Ok(Ty::Float),
            (BinOp::Add, Ty::Tuple(a), Ty::Tuple(b)) => {
                return Ok(Ty::Tuple(a.iter().chain(b.iter()).cloned().collect()));
            }
            (BinOp::Mul, Ty::List(_) | Ty::Str | Ty::Bytes, Ty::Int(_)) => return Ok(ls.clone()),
            (BinOp::Mul, Ty::Int(_), Ty::List(_) | Ty::Str | Ty::Bytes) => return Ok(rs.clone()),
            (BinOp::Mul, Ty::Tuple(elts), Ty::Int(_)) => {
                let Expr::Int(n) = rhs.node else {
                    return Err(CompileError::type_err("tuple repetition needs a constant count", rhs.span));
                };
                let len = usize::try_from(n.max(0)).ok().and_then(|n| elts.len().checked_mul(n));
                return match len {
                    Some(len) if len <= MAX_TUPLE_LEN => Ok(Ty::Tuple(elts.iter().cloned().cycle().take(len).collect())),
                    _ => Err(CompileError::type_err(
                        format!("tuple repetition longer than {MAX_TUPLE_LEN} elements"),
                        lhs.span.to(rhs.span),
                    )),
                };
            }
            (BinOp::Mod, Ty::Str, _) => return Ok(Ty::Str),
            _ => {}
        }

        self.unify(&l, &r, &origin)?;
        let t = self.icx.shallow(&l);
        match (op, &t) {
            (BinOp::Div, Ty::Int(_) | Ty::Float | Ty::Var(_)) => Ok(Ty::Float),
            (_, Ty::Int(_) | Ty::Float | Ty::Var(_)) => Ok(t),
            (BinOp::Add, Ty::List(_) | Ty::Str | Ty::Bytes) => Ok(t),
            _ => {
                let shown = self.icx.resolve(&t);
                Err(CompileError::type_err(
                    format!("unsupported operand types for `{}`: {} and {}", op.symbol(), shown, shown),
                    lhs.span.to(rhs.span),
                ))
            }
        }
    }

    fn compare(&mut self, op: CmpOp, l: &Ty, l_span: Span, r: &Ty, r_span: Span) -> Result<(), CompileError> {
        let origin = ConstraintOrigin::Arms { first: l_span, second: r_span };
        match op {
            CmpOp::Eq | CmpOp::NotEq | CmpOp::Is | CmpOp::IsNot => Ok(()),
            CmpOp::Lt | CmpOp::LtE | CmpOp::Gt | CmpOp::GtE => {
                let (ls, rs) = (self.icx.shallow(l), self.icx.shallow(r));
                if ls.is_numeric() && rs.is_numeric() && ls.is_int() != rs.is_int() {
                    return Ok(());
                }
                self.unify(l, r, &origin)
            }
            CmpOp::In | CmpOp::NotIn => match self.icx.shallow(r) {
                Ty::List(elt) | Ty::Range(elt) | Ty::Array(elt, _) => self.unify(&elt, l, &origin),
                Ty::Str => self.unify(&Ty::Str, l, &origin),
                Ty::Tuple(_) => Ok(()),
                Ty::Var(_) => self.unify(r, &Ty::List(Box::new(l.clone())), &origin),
                other => Err(CompileError::type_err(
                    format!("argument of type {} is not iterable", self.icx.resolve(&other)),
                    r_span,
                )),
            },
        }
    }

    fn subscript(&mut self, value: &Spanned<Expr>, index: &Spanned<Expr>) -> Result<Ty, CompileError> {
        let container = self.infer_expr(value)?;
        let idx = self.infer_expr(index)?;
        let shallow = self.icx.shallow(&container);
        if let Ty::Tuple(elts) = &shallow {
            let Expr::Int(i) = index.node else {
                return Err(CompileError::type_err("tuple index must be a constant", index.span));
            };
            let len = elts.len() as i64;
            let pos = if i < 0 { len + i } else { i };
            return match usize::try_from(pos).ok().and_then(|p| elts.get(p)) {
                Some(ty) => Ok(ty.clone()),
                None => Err(CompileError::type_err(
                    format!("tuple index {} out of range for {}", i, self.icx.resolve(&shallow)),
                    index.span,
                )),
            };
        }
        let int = self.icx.fresh_int();
        self.unify(&int, &idx, &ConstraintOrigin::Expr { span: index.span })?;
        match shallow {
            Ty::List(elt) => Ok(*elt),
            Ty::Array(elt, 1) => Ok(*elt),
            Ty::Array(elt, n) => Ok(Ty::Array(elt, n - 1)),
            Ty::Str => Ok(Ty::Str),
            Ty::Bytes => Ok(self.icx.fresh_int()),
            Ty::Var(_) => {
                let elt = self.icx.fresh_var();
                self.unify(&container, &Ty::List(Box::new(elt.clone())), &ConstraintOrigin::Expr { span: value.span })?;
                Ok(elt)
            }
            other => Err(CompileError::type_err(
                format!("{} is not subscriptable", self.icx.resolve(&other)),
                value.span,
            )),
        }
    }

    /// The element type `for` binds when iterating over `ty`.
    pub(super) fn iter_element(&mut self, ty: &Ty, span: Span) -> Result<Ty, CompileError> {
        match self.icx.shallow(ty) {
            Ty::List(elt) | Ty::Range(elt) | Ty::Array(elt, 1) => Ok(*elt),
            Ty::Array(elt, n) => Ok(Ty::Array(elt, n - 1)),
            Ty::Str => Ok(Ty::Str),
            Ty::Bytes => Ok(self.icx.fresh_int()),
            Ty::Tuple(elts) => {
                let Some(first) = elts.first() else { return Ok(self.icx.fresh_var()) };
                for e in &elts[1..] {
                    self.unify(first, e, &ConstraintOrigin::Expr { span })?;
                }
                Ok(first.clone())
            }
            Ty::Var(_) => {
                let elt = self.icx.fresh_var();
                self.unify(ty, &Ty::List(Box::new(elt.clone())), &ConstraintOrigin::Expr { span })?;
                Ok(elt)
            }
            other => Err(CompileError::type_err(format!("{} is not iterable", self.icx.resolve(&other)), span)),
        }
    }

    // ── Attributes ──────────────────────────────────────────────────────

    /// Attribute type, deferring the lookup when the object's type is unknown.
    pub(super) fn attribute(&mut self, object: &Ty, attr: &str, span: Span) -> Result<Ty, CompileError> {
        if matches!(self.icx.shallow(object), Ty::Var(_)) {
            let result = self.icx.fresh_var();
            self.pending.push(PendingAttr {
                object: object.clone(),
                attr: attr.to_string(),
                result: result.clone(),
                span,
                function: self.current_fn,
            });
            return Ok(result);
        }
        self.attribute_of(object, attr, span)
    }

    pub(super) fn attribute_of(&mut self, object: &Ty, attr: &str, span: Span) -> Result<Ty, CompileError> {
        let shallow = self.icx.shallow(object);
        let class = match &shallow {
            Ty::Instance(c) | Ty::Constructor(c) => self.classes.get(&c.id),
            _ => None,
        };
        if let Some(class) = class {
            if let Some(ty) = class.field(attr) {
                return Ok(ty.clone());
            }
            if let Some(sig) = class.method(attr).and_then(|m| self.functions.get(&m)) {
                return Ok(match &shallow {
                    Ty::Instance(_) => Ty::Method(Box::new(sig.clone()), Box::new(shallow.clone())),
                    _ => Ty::Function(sig.clone()),
                });
            }
        }
        Err(CompileError::type_err(
            format!("'{}' has no attribute '{}'", self.icx.resolve(&shallow), attr),
            span,
        ))
    }

    // ── Calls ───────────────────────────────────────────────────────────

    fn infer_call(
        &mut self,
        call: &Spanned<Expr>,
        func: &Spanned<Expr>,
        args: &[Spanned<Expr>],
        keywords: &[Keyword],
    ) -> Result<Ty, CompileError> {
        let callee = match &func.node {
            Expr::Name(name) => {
                let res = self.scopes.resolve(self.current_fn, self.current_class, name);
                match res {
                    Resolution::Builtin => {
                        self.calls.insert(call.id, CallSite::Resolved(CallTarget::Builtin(name.clone())));
                        return self.infer_builtin_call(name, call.span, args, keywords);
                    }
                    Resolution::Exception(kind) => {
                        self.exprs.insert(func.id, Ty::Exception(kind.clone()));
                        self.calls.insert(call.id, CallSite::Resolved(CallTarget::Exception(kind.clone())));
                        return self.raise_args(kind, call.span, args, keywords);
                    }
                    _ => {}
                }
                let callee = self.infer_expr(func)?;
                if let Some(def) = self.scopes.static_def(&res, name)
                    && let Some(sig) = self.functions.get(&def).cloned()
                {
                    self.calls.insert(call.id, CallSite::Resolved(CallTarget::Function { def, bound: false }));
                    self.check_args(&sig, call.span, args, keywords)?;
                    return Ok(*sig.ret);
                }
                self.calls.insert(call.id, CallSite::Callee(callee.clone()));
                callee
            }
            Expr::Attribute { value, attr } => {
                let receiver = self.infer_expr(value)?;
                if let Some(ret) = self.method_call(call, func, &receiver, &attr.node, args, keywords)? {
                    return Ok(ret);
                }
                let unknown = matches!(self.icx.shallow(&receiver), Ty::Var(_));
                let callee = self.attribute(&receiver, &attr.node, func.span)?;
                self.exprs.insert(func.id, callee.clone());
                let site = if unknown {
                    CallSite::Method { receiver, name: attr.node.clone(), callee: callee.clone() }
                } else {
                    CallSite::Callee(callee.clone())
                };
                self.calls.insert(call.id, site);
                callee
            }
            _ => {
                let callee = self.infer_expr(func)?;
                self.calls.insert(call.id, CallSite::Callee(callee.clone()));
                callee
            }
        };
        self.call_value(&callee, call, func.span, args, keywords)
    }

    /// `recv.m(...)` where `recv` is an instance or class with method `m`.
    fn method_call(
        &mut self,
        call: &Spanned<Expr>,
        func: &Spanned<Expr>,
        receiver: &Ty,
        name: &str,
        args: &[Spanned<Expr>],
        keywords: &[Keyword],
    ) -> Result<Option<Ty>, CompileError> {
        let (class, bound) = match self.icx.shallow(receiver) {
            Ty::Instance(c) => (c, true),
            Ty::Constructor(c) => (c, false),
            _ => return Ok(None),
        };
        let Some(def) = self.classes.get(&class.id).and_then(|c| c.method(name)) else {
            return Ok(None);
        };
        let Some(sig) = self.functions.get(&def).cloned() else {
            return Ok(None);
        };
        let callee = if bound {
            Ty::Method(Box::new(sig.clone()), Box::new(Ty::Instance(class)))
        } else {
            Ty::Function(sig.clone())
        };
        self.exprs.insert(func.id, callee);
        self.calls.insert(call.id, CallSite::Resolved(CallTarget::Function { def, bound }));
        let sig = if bound { sig.without_self() } else { sig };
        self.check_args(&sig, call.span, args, keywords)?;
        Ok(Some(*sig.ret))
    }

    fn call_value(
        &mut self,
        callee: &Ty,
        call: &Spanned<Expr>,
        func_span: Span,
        args: &[Spanned<Expr>],
        keywords: &[Keyword],
    ) -> Result<Ty, CompileError> {
        match self.icx.shallow(callee) {
            Ty::Function(sig) => {
                self.check_args(&sig, call.span, args, keywords)?;
                Ok(*sig.ret)
            }
            Ty::Method(sig, _) => {
                let sig = sig.without_self();
                self.check_args(&sig, call.span, args, keywords)?;
                Ok(*sig.ret)
            }
            Ty::Constructor(class) => self.construct(class, call, args, keywords),
            Ty::Exception(kind) => self.raise_args(kind, call.span, args, keywords),
            Ty::Var(_) => {
                if let Some(kw) = keywords.first() {
                    return Err(CompileError::type_err("keyword arguments require a known callee", kw.name.span));
                }
                let mut params = Vec::with_capacity(args.len());
                for (i, arg) in args.iter().enumerate() {
                    let ty = self.infer_expr(arg)?;
                    params.push(ParamTy { name: format!("arg{}", i), ty, has_default: false });
                }
                let ret = self.icx.fresh_var();
                let shape = FnTy { params, ret: Box::new(ret.clone()), delay: self.icx.fresh_delay() };
                self.unify(callee, &Ty::Function(shape), &ConstraintOrigin::Expr { span: func_span })?;
                Ok(ret)
            }
            other => Err(CompileError::type_err(
                format!("'{}' is not callable", self.icx.resolve(&other)),
                func_span,
            )),
        }
    }

    fn construct(
        &mut self,
        class: ClassRef,
        call: &Spanned<Expr>,
        args: &[Spanned<Expr>],
        keywords: &[Keyword],
    ) -> Result<Ty, CompileError> {
        let init = self.classes.get(&class.id).and_then(|c| c.method("__init__"));
        self.calls.insert(call.id, CallSite::Resolved(CallTarget::Constructor { class: class.id, init }));
        match init.and_then(|i| self.functions.get(&i)).cloned() {
            Some(sig) => self.check_args(&sig.without_self(), call.span, args, keywords)?,
            None if args.is_empty() && keywords.is_empty() => {}
            None => {
                return Err(CompileError::type_err(format!("'{}' takes no arguments", class.name), call.span));
            }
        }
        Ok(Ty::Instance(class))
    }

    /// `Kind(message?)`.
    fn raise_args(
        &mut self,
        kind: crate::exceptions::ExceptionKind,
        span: Span,
        args: &[Spanned<Expr>],
        keywords: &[Keyword],
    ) -> Result<Ty, CompileError> {
        if args.len() > 1 || !keywords.is_empty() {
            return Err(CompileError::type_err(format!("'{}' takes at most one argument", kind), span));
        }
        for arg in args {
            self.infer_expr(arg)?;
        }
        Ok(Ty::Exception(kind))
    }

    /// Match positional and keyword arguments to parameters.
    fn check_args(
        &mut self,
        sig: &FnTy,
        call: Span,
        args: &[Spanned<Expr>],
        keywords: &[Keyword],
    ) -> Result<(), CompileError> {
        if args.len() > sig.params.len() {
            return Err(CompileError::type_err(
                format!("too many arguments: expected at most {}, got {}", sig.params.len(), args.len()),
                call,
            ));
        }
        let mut filled = vec![false; sig.params.len()];
        for (i, arg) in args.iter().enumerate() {
            let ty = self.infer_expr(arg)?;
            let param = &sig.params[i];
            let origin = ConstraintOrigin::Arg { call, param: param.name.clone(), arg: arg.span };
            self.unify(&param.ty, &ty, &origin)?;
            filled[i] = true;
        }
        for kw in keywords {
            let Some(i) = sig.params.iter().position(|p| p.name == kw.name.node) else {
                return Err(CompileError::type_err(
                    format!("unexpected keyword argument '{}'", kw.name.node),
                    kw.name.span,
                ));
            };
            if filled[i] {
                return Err(CompileError::type_err(
                    format!("multiple values for argument '{}'", kw.name.node),
                    kw.name.span,
                ));
            }
            let ty = self.infer_expr(&kw.value)?;
            let origin = ConstraintOrigin::Arg { call, param: kw.name.node.clone(), arg: kw.value.span };
            self.unify(&sig.params[i].ty, &ty, &origin)?;
            filled[i] = true;
        }
        for (param, done) in sig.params.iter().zip(&filled) {
            if !done && !param.has_default {
                return Err(CompileError::type_err(format!("missing argument '{}'", param.name), call));
            }
        }
        Ok(())
    }
}
