use crate::ast::*;
use crate::diagnostics::CompileError;
use crate::exceptions::ExceptionKind;
use crate::scope::Resolution;
use crate::span::{Span, Spanned};

use super::errors::ConstraintOrigin;
use super::types::{FnTy, Ty};
use super::Checker;

impl Checker<'_> {
    pub(super) fn check_body(&mut self, body: &[Spanned<Stmt>]) -> Result<(), CompileError> {
        for stmt in body {
            self.check_stmt(stmt)?;
        }
        Ok(())
    }

    pub(super) fn check_stmt(&mut self, stmt: &Spanned<Stmt>) -> Result<(), CompileError> {
        match &stmt.node {
            Stmt::Expr(expr) => {
                self.infer_expr(expr)?;
            }
            Stmt::Assign { targets, value } => {
                let ty = self.infer_expr(value)?;
                for target in targets {
                    self.assign_target(target, &ty, value.span)?;
                }
            }
            Stmt::AugAssign { target, op, value } => {
                let current = self.infer_expr(target)?;
                let rhs = self.infer_expr(value)?;
                let result = self.binop_result(*op, current.clone(), rhs, target, value)?;
                self.unify(&current, &result, &ConstraintOrigin::Assign { target: target.span, value: value.span })?;
            }
            Stmt::Pass | Stmt::Break | Stmt::Continue | Stmt::Nonlocal(_) | Stmt::Global(_) => {}
            Stmt::If { test, body, orelse } | Stmt::While { test, body, orelse } => {
                self.infer_expr(test)?;
                self.check_body(body)?;
                self.check_body(orelse)?;
            }
            Stmt::For { target, iter, body, orelse } => {
                let iter_ty = self.infer_expr(iter)?;
                let elt = self.iter_element(&iter_ty, iter.span)?;
                self.assign_target(target, &elt, iter.span)?;
                self.check_body(body)?;
                self.check_body(orelse)?;
            }
            Stmt::Try { body, handlers, orelse, finalbody } => {
                self.check_body(body)?;
                for handler in handlers {
                    self.check_handler(handler)?;
                }
                self.check_body(orelse)?;
                self.check_body(finalbody)?;
            }
            Stmt::With { items, body } => {
                let markers = items.iter().filter(|item| item.timing_block().is_some()).count();
                if markers > 0 && items.len() > 1 {
                    return Err(CompileError::type_err("timing blocks take a single `with` item", stmt.span));
                }
                for item in items {
                    self.check_with_item(item)?;
                }
                self.check_body(body)?;
            }
            Stmt::FunctionDef(def) => self.check_defaults(stmt.id, &def.params)?,
            Stmt::ClassDef(class) => {
                if self.current_fn.is_some() {
                    return Err(CompileError::type_err("classes must be defined at module level", class.name.span));
                }
                if let Some(base) = class.bases.first() {
                    return Err(CompileError::type_err("inheritance is not supported", base.span));
                }
                let prev = self.current_class.replace(stmt.id);
                let result = self.check_body(&class.body);
                self.current_class = prev;
                result?;
            }
            Stmt::Return(value) => {
                let Some(function) = self.current_fn else {
                    return Err(CompileError::type_err("return outside function", stmt.span));
                };
                if let Some(value) = value {
                    let ty = self.infer_expr(value)?;
                    let ret = self.functions.get(&function).map(|f| (*f.ret).clone()).unwrap_or(Ty::NoneType);
                    let function_span = self.scopes.get(function).map(|s| s.span).unwrap_or(stmt.span);
                    self.unify(&ret, &ty, &ConstraintOrigin::Return { span: value.span, function: function_span })?;
                }
            }
            Stmt::Raise(Some(exc)) => {
                let ty = self.infer_expr(exc)?;
                match self.icx.shallow(&ty) {
                    Ty::Exception(_) => {}
                    Ty::Var(_) => {
                        self.unify(&ty, &Ty::Exception(ExceptionKind::Exception), &ConstraintOrigin::Expr {
                            span: exc.span,
                        })?;
                    }
                    other => {
                        return Err(CompileError::type_err(
                            format!("cannot raise a value of type {}", self.icx.resolve(&other)),
                            exc.span,
                        ));
                    }
                }
            }
            Stmt::Raise(None) => {}
        }
        Ok(())
    }

    fn check_handler(&mut self, handler: &Spanned<ExceptHandler>) -> Result<(), CompileError> {
        let kind = match &handler.node.kind {
            None => None,
            Some(expr) => {
                let resolved = match &expr.node {
                    Expr::Name(n) => self.scopes.resolve(self.current_fn, self.current_class, n),
                    _ => Resolution::Unresolved,
                };
                let Resolution::Exception(kind) = resolved else {
                    return Err(CompileError::type_err("except clause must name an exception kind", expr.span));
                };
                self.exprs.insert(expr.id, Ty::Exception(kind.clone()));
                Some(kind)
            }
        };
        self.handlers.insert(handler.id, kind.clone());
        if let Some(name) = &handler.node.name {
            let bound = Ty::Exception(kind.unwrap_or(ExceptionKind::Exception));
            let slot = self.name_slot(&name.node);
            self.unify(&slot, &bound, &ConstraintOrigin::Assign { target: name.span, value: handler.span })?;
        }
        self.check_body(&handler.node.body)
    }

    /// Type a context-manager item: the target gets whatever `__enter__` returns.
    fn check_with_item(&mut self, item: &Spanned<WithItem>) -> Result<(), CompileError> {
        if item.timing_block().is_some() {
            if let Some(target) = &item.node.target {
                return Err(CompileError::type_err("timing blocks do not bind a value", target.span));
            }
            self.exprs.insert(item.node.context.id, Ty::NoneType);
            return Ok(());
        }
        let manager = self.infer_expr(&item.node.context)?;
        let enter = self.attribute(&manager, "__enter__", item.node.context.span)?;
        self.attribute(&manager, "__exit__", item.node.context.span)?;
        let value = match self.icx.shallow(&enter) {
            // Arity is checked when the block is lowered.
            Ty::Method(sig, _) => (*sig.ret).clone(),
            Ty::Function(sig) => (*sig.ret).clone(),
            _ => {
                let ret = self.icx.fresh_var();
                let shape = FnTy { params: Vec::new(), ret: Box::new(ret.clone()), delay: self.icx.fresh_delay() };
                self.unify(&enter, &Ty::Function(shape), &ConstraintOrigin::Expr { span: item.span })?;
                ret
            }
        };
        if let Some(target) = &item.node.target {
            let slot = self.name_slot(&target.node);
            self.unify(&slot, &value, &ConstraintOrigin::Assign { target: target.span, value: item.span })?;
        }
        Ok(())
    }

    /// The type slot a plain name is stored into from the current scope.
    fn name_slot(&mut self, name: &str) -> Ty {
        match self.scopes.resolve(self.current_fn, self.current_class, name) {
            Resolution::Local(f) => self.binding(Some(f), name),
            Resolution::Global => self.binding(None, name),
            Resolution::ClassField(c) => match self.classes.get(&c).and_then(|class| class.field(name)) {
                Some(ty) => ty.clone(),
                None => self.icx.fresh_var(),
            },
            _ => self.icx.fresh_var(),
        }
    }

    fn assign_target(&mut self, target: &Spanned<Expr>, ty: &Ty, value_span: Span) -> Result<(), CompileError> {
        let origin = ConstraintOrigin::Assign { target: target.span, value: value_span };
        match &target.node {
            Expr::Name(name) => {
                let slot = self.name_slot(name);
                self.exprs.insert(target.id, slot.clone());
                self.unify(&slot, ty, &origin)
            }
            Expr::Tuple(elts) | Expr::List(elts) => {
                let parts = match self.icx.shallow(ty) {
                    Ty::Tuple(parts) if parts.len() == elts.len() => parts,
                    Ty::List(elt) => vec![*elt; elts.len()],
                    Ty::Var(_) => {
                        let parts: Vec<Ty> = elts.iter().map(|_| self.icx.fresh_var()).collect();
                        self.unify(ty, &Ty::Tuple(parts.clone()), &origin)?;
                        parts
                    }
                    other => {
                        return Err(CompileError::type_err(
                            format!("cannot unpack {} into {} targets", self.icx.resolve(&other), elts.len()),
                            target.span,
                        ));
                    }
                };
                self.exprs.insert(target.id, Ty::Tuple(parts.clone()));
                for (elt, part) in elts.iter().zip(parts.iter()) {
                    self.assign_target(elt, part, value_span)?;
                }
                Ok(())
            }
            Expr::Attribute { value, attr } => {
                let object = self.infer_expr(value)?;
                let slot = self.attribute(&object, &attr.node, target.span)?;
                self.exprs.insert(target.id, slot.clone());
                self.unify(&slot, ty, &origin)
            }
            Expr::Subscript { .. } => {
                let slot = self.infer_expr(target)?;
                self.unify(&slot, ty, &origin)
            }
            _ => Err(CompileError::type_err("cannot assign to this expression", target.span)),
        }
    }
}
