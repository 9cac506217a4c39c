//! Type inference.
//!
//! Hindley-Milner style inference without let-polymorphism: every binding,
//! parameter and expression gets a type variable, constraints are solved
//! eagerly by [`unify::InferCtx`], and integer widths stay open until
//! finalization picks the configured default.
//!
//! Checking is per function. The first error in a function abandons it (the
//! rest of the module is still checked), and dependent passes skip it.

pub mod builtins;
pub mod env;
pub mod errors;
pub mod types;
pub mod unify;

mod check;
mod infer;

use std::collections::BTreeMap;

use crate::ast::*;
use crate::config::CompilerConfig;
use crate::diagnostics::{CompileError, Diagnostics};
use crate::exceptions::ExceptionKind;
use crate::scope::{function_bodies, FunctionBody, Resolution, Scopes};
use crate::span::{NodeId, Span, Spanned};
use crate::visit::composers::returns_value;

use env::{CallTarget, ClassInfo, FunctionInfo, TypeEnv};
use errors::ConstraintOrigin;
use types::{ClassRef, FnTy, ParamTy, Ty};
use unify::{DelayVars, InferCtx};

/// An attribute read on an object whose type was still unknown. Retried once
/// the rest of the module has been checked.
#[derive(Debug, Clone)]
struct PendingAttr {
    object: Ty,
    attr: String,
    result: Ty,
    span: Span,
    function: Option<NodeId>,
}

/// What a call site invokes, before the types are final.
#[derive(Debug, Clone)]
enum CallSite {
    Resolved(CallTarget),
    /// `recv.name(...)` where the receiver's type was unknown at the call.
    Method { receiver: Ty, name: String, callee: Ty },
    Callee(Ty),
}

pub(crate) struct Checker<'a> {
    scopes: &'a Scopes,
    config: &'a CompilerConfig,
    icx: InferCtx,
    exprs: BTreeMap<NodeId, Ty>,
    /// Keyed by owning function (`None` for module level) and name.
    bindings: BTreeMap<(Option<NodeId>, String), Ty>,
    classes: BTreeMap<NodeId, ClassInfo>,
    functions: BTreeMap<NodeId, FnTy>,
    pending: Vec<PendingAttr>,
    calls: BTreeMap<NodeId, CallSite>,
    handlers: BTreeMap<NodeId, Option<ExceptionKind>>,
    current_fn: Option<NodeId>,
    current_class: Option<NodeId>,
}

/// Infer types for a module. Errors go to `diags`; the environment covers
/// every function, failed or not, and callers drop what they can't use.
pub fn type_check(
    module: &Module,
    scopes: &Scopes,
    config: &CompilerConfig,
    diags: &mut Diagnostics,
) -> (TypeEnv, DelayVars) {
    tracing::debug!(module = %module.name, "type inference");
    let bodies = function_bodies(module);
    let mut checker = Checker {
        scopes,
        config,
        icx: InferCtx::new(),
        exprs: BTreeMap::new(),
        bindings: BTreeMap::new(),
        classes: BTreeMap::new(),
        functions: BTreeMap::new(),
        pending: Vec::new(),
        calls: BTreeMap::new(),
        handlers: BTreeMap::new(),
        current_fn: None,
        current_class: None,
    };

    checker.declare_functions(&bodies);
    checker.declare_classes(module, diags);
    checker.bind_definitions();

    for stmt in &module.body {
        if let Err(err) = checker.check_stmt(stmt) {
            diags.push(None, err);
        }
    }

    for &id in &scopes.order {
        if diags.is_failed(id) {
            continue;
        }
        let Some(body) = bodies.get(&id) else { continue };
        if let Err(err) = checker.check_function(id, *body) {
            diags.push(Some(id), err);
        }
    }

    checker.resolve_pending(diags);
    let env = checker.finalize();
    tracing::debug!(
        functions = env.functions.len(),
        classes = env.classes.len(),
        exprs = env.exprs.len(),
        "type inference done"
    );
    (env, checker.icx.into_delay_vars())
}

impl<'a> Checker<'a> {
    // ── Declarations ────────────────────────────────────────────────────

    fn declare_functions(&mut self, bodies: &BTreeMap<NodeId, FunctionBody<'_>>) {
        let scopes = self.scopes;
        for &id in &scopes.order {
            let (Some(scope), Some(body)) = (scopes.get(id), bodies.get(&id)) else { continue };
            let mut params = Vec::new();
            for param in body.params() {
                let ty = self.binding(Some(id), &param.name.node);
                params.push(ParamTy { name: param.name.node.clone(), ty, has_default: param.default.is_some() });
            }
            let ret = match body {
                FunctionBody::Def(def) if !returns_value(&def.body) => Ty::NoneType,
                _ => self.icx.fresh_var(),
            };
            let delay = self.icx.fresh_delay();
            for name in &scope.bindings {
                self.binding(Some(id), name);
            }
            self.functions.insert(id, FnTy { params, ret: Box::new(ret), delay });
        }
        for name in &scopes.module_bindings {
            self.binding(None, name);
        }
    }

    /// Register every module-level class: fields from the class body and from
    /// `self.<attr> = ...` in its methods, then tie each method's receiver to
    /// the instance type.
    fn declare_classes(&mut self, module: &Module, diags: &mut Diagnostics) {
        for stmt in &module.body {
            let Stmt::ClassDef(class) = &stmt.node else { continue };
            let class_ref = ClassRef { id: stmt.id, name: class.name.node.clone() };
            let mut fields: Vec<(String, Ty)> = Vec::new();
            let mut methods = Vec::new();
            for item in &class.body {
                match &item.node {
                    Stmt::Assign { targets, .. } => {
                        for target in targets {
                            if let Expr::Name(n) = &target.node
                                && !fields.iter().any(|(f, _)| f == n)
                            {
                                fields.push((n.clone(), self.icx.fresh_var()));
                            }
                        }
                    }
                    Stmt::FunctionDef(def) => methods.push((def.name.node.clone(), item.id, def)),
                    _ => {}
                }
            }
            for (_, _, def) in &methods {
                let Some(receiver) = def.params.first() else { continue };
                let mut attrs = Vec::new();
                self_assignments(&def.body, &receiver.name.node, &mut attrs);
                for attr in attrs {
                    let taken = fields.iter().any(|(f, _)| *f == attr) || methods.iter().any(|(m, _, _)| *m == attr);
                    if !taken {
                        fields.push((attr, self.icx.fresh_var()));
                    }
                }
            }
            let instance = Ty::Instance(class_ref.clone());
            for (name, id, def) in &methods {
                let Some(sig) = self.functions.get(id).cloned() else { continue };
                match sig.params.first() {
                    Some(receiver) => {
                        let origin = ConstraintOrigin::Receiver { span: def.name.span };
                        if let Err(err) = self.icx.unify(&receiver.ty, &instance, &origin) {
                            diags.push(Some(*id), err.into_compile_error());
                        }
                    }
                    None => diags.push(
                        Some(*id),
                        CompileError::type_err(format!("method '{}' must take self", name), def.name.span),
                    ),
                }
            }
            self.classes.insert(
                stmt.id,
                ClassInfo {
                    id: stmt.id,
                    name: class_ref.name,
                    fields,
                    methods: methods.into_iter().map(|(n, id, _)| (n, id)).collect(),
                },
            );
        }
    }

    /// Give each `def` name and class name its function or constructor type.
    fn bind_definitions(&mut self) {
        let scopes = self.scopes;
        for &id in &scopes.order {
            let Some(scope) = scopes.get(id) else { continue };
            if scope.class.is_some() || scope.kind == crate::scope::ScopeKind::Lambda {
                continue;
            }
            let Some(sig) = self.functions.get(&id).cloned() else { continue };
            let owner = match scopes.resolve(scope.parent, None, &scope.name) {
                Resolution::Local(f) => Some(f),
                Resolution::Global => None,
                _ => continue,
            };
            let slot = self.binding(owner, &scope.name);
            // A name rebound to a different signature surfaces when the
            // second definition's body is checked against its uses.
            let _ = self.icx.unify(&slot, &Ty::Function(sig), &ConstraintOrigin::Expr { span: scope.span });
        }
        let classes: Vec<_> = self.classes.values().map(|c| ClassRef { id: c.id, name: c.name.clone() }).collect();
        for class in classes {
            if scopes.resolve(None, None, &class.name) == Resolution::Global {
                let slot = self.binding(None, &class.name);
                let _ = self.icx.unify(&slot, &Ty::Constructor(class), &ConstraintOrigin::Expr { span: Span::dummy() });
            }
        }
    }

    fn binding(&mut self, owner: Option<NodeId>, name: &str) -> Ty {
        if let Some(ty) = self.bindings.get(&(owner, name.to_string())) {
            return ty.clone();
        }
        let ty = self.icx.fresh_var();
        self.bindings.insert((owner, name.to_string()), ty.clone());
        ty
    }

    // ── Function bodies ─────────────────────────────────────────────────

    fn check_function(&mut self, id: NodeId, body: FunctionBody<'_>) -> Result<(), CompileError> {
        tracing::trace!(function = %id, "checking function");
        let prev = (self.current_fn.replace(id), self.current_class.take());
        let result = match body {
            FunctionBody::Def(def) => self.check_body(&def.body),
            FunctionBody::Lambda { body, .. } => self.check_lambda_body(id, body),
        };
        (self.current_fn, self.current_class) = prev;
        result
    }

    fn check_lambda_body(&mut self, id: NodeId, body: &Spanned<Expr>) -> Result<(), CompileError> {
        let ty = self.infer_expr(body)?;
        let ret = self.functions.get(&id).map(|f| (*f.ret).clone()).unwrap_or(Ty::NoneType);
        self.unify(&ret, &ty, &ConstraintOrigin::Expr { span: body.span })
    }

    pub(super) fn unify(&mut self, expected: &Ty, found: &Ty, origin: &ConstraintOrigin) -> Result<(), CompileError> {
        self.icx.unify(expected, found, origin).map_err(|e| e.into_compile_error())
    }

    // ── Deferred attributes ─────────────────────────────────────────────

    fn resolve_pending(&mut self, diags: &mut Diagnostics) {
        loop {
            let pending = std::mem::take(&mut self.pending);
            let mut progress = false;
            for p in pending {
                if matches!(self.icx.shallow(&p.object), Ty::Var(_)) {
                    self.pending.push(p);
                    continue;
                }
                progress = true;
                let resolved = self
                    .attribute_of(&p.object, &p.attr, p.span)
                    .and_then(|ty| self.unify(&p.result, &ty, &ConstraintOrigin::Expr { span: p.span }));
                if let Err(err) = resolved {
                    diags.push(p.function, err);
                }
            }
            if !progress {
                break;
            }
        }
        for p in std::mem::take(&mut self.pending) {
            diags.push(
                p.function,
                CompileError::type_err(format!("cannot infer the type of the object in `.{}`", p.attr), p.span),
            );
        }
    }

    // ── Finalization ────────────────────────────────────────────────────

    fn finalize(&mut self) -> TypeEnv {
        let width = self.config.default_int_width;
        let mut env = TypeEnv::default();

        let exprs = std::mem::take(&mut self.exprs);
        for (id, ty) in exprs {
            env.exprs.insert(id, self.icx.finalize(&ty, width));
        }

        let scopes = self.scopes;
        for &id in &scopes.order {
            let (Some(scope), Some(sig)) = (scopes.get(id), self.functions.get(&id).cloned()) else { continue };
            let ty = self.icx.finalize_fn(&sig, width);
            let bindings = scope
                .bindings
                .iter()
                .map(|name| {
                    let ty = self.binding(Some(id), name);
                    (name.clone(), self.icx.finalize(&ty, width))
                })
                .collect();
            env.functions.insert(id, FunctionInfo { name: scope.name.clone(), ty, class: scope.class, bindings });
        }

        for name in &scopes.module_bindings {
            let ty = self.binding(None, name);
            env.globals.insert(name.clone(), self.icx.finalize(&ty, width));
        }

        let classes = std::mem::take(&mut self.classes);
        for (id, mut class) in classes {
            for (_, ty) in class.fields.iter_mut() {
                *ty = self.icx.finalize(ty, width);
            }
            env.classes.insert(id, class);
        }

        let calls = std::mem::take(&mut self.calls);
        for (id, site) in calls {
            let target = self.call_target(site, &env);
            env.calls.insert(id, target);
        }

        env.handlers = std::mem::take(&mut self.handlers);
        env
    }

    fn call_target(&mut self, site: CallSite, env: &TypeEnv) -> CallTarget {
        match site {
            CallSite::Resolved(target) => target,
            CallSite::Method { receiver, name, callee } => {
                let (class, bound) = match self.icx.shallow(&receiver) {
                    Ty::Instance(c) => (c, true),
                    Ty::Constructor(c) => (c, false),
                    _ => return self.dynamic_target(&callee, env),
                };
                match env.classes.get(&class.id).and_then(|c| c.method(&name)) {
                    Some(def) => CallTarget::Function { def, bound },
                    None => self.dynamic_target(&callee, env),
                }
            }
            CallSite::Callee(callee) => self.dynamic_target(&callee, env),
        }
    }

    fn dynamic_target(&mut self, callee: &Ty, env: &TypeEnv) -> CallTarget {
        match self.icx.shallow(callee) {
            Ty::Function(f) => CallTarget::Dynamic { delay: Some(self.icx.delays.root(f.delay)) },
            Ty::Method(f, _) => CallTarget::Dynamic { delay: Some(self.icx.delays.root(f.delay)) },
            Ty::Constructor(c) => CallTarget::Constructor {
                class: c.id,
                init: env.classes.get(&c.id).and_then(|info| info.method("__init__")),
            },
            Ty::Exception(kind) => CallTarget::Exception(kind),
            _ => CallTarget::Dynamic { delay: None },
        }
    }
}

/// `self.<attr> = ...` targets in a method body, in order, not looking into
/// nested functions.
fn self_assignments(body: &[Spanned<Stmt>], receiver: &str, out: &mut Vec<String>) {
    fn target(expr: &Spanned<Expr>, receiver: &str, out: &mut Vec<String>) {
        match &expr.node {
            Expr::Attribute { value, attr } => {
                if matches!(&value.node, Expr::Name(n) if n == receiver) && !out.contains(&attr.node) {
                    out.push(attr.node.clone());
                }
            }
            Expr::Tuple(elts) | Expr::List(elts) => {
                for elt in elts {
                    target(elt, receiver, out);
                }
            }
            _ => {}
        }
    }
    for stmt in body {
        match &stmt.node {
            Stmt::Assign { targets, .. } => {
                for t in targets {
                    target(t, receiver, out);
                }
            }
            Stmt::AugAssign { target: t, .. } | Stmt::For { target: t, .. } => {
                target(t, receiver, out);
                if let Stmt::For { body, orelse, .. } = &stmt.node {
                    self_assignments(body, receiver, out);
                    self_assignments(orelse, receiver, out);
                }
            }
            Stmt::If { body, orelse, .. } | Stmt::While { body, orelse, .. } => {
                self_assignments(body, receiver, out);
                self_assignments(orelse, receiver, out);
            }
            Stmt::Try { body, handlers, orelse, finalbody } => {
                self_assignments(body, receiver, out);
                for h in handlers {
                    self_assignments(&h.node.body, receiver, out);
                }
                self_assignments(orelse, receiver, out);
                self_assignments(finalbody, receiver, out);
            }
            Stmt::With { body, .. } => self_assignments(body, receiver, out),
            _ => {}
        }
    }
}
