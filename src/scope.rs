//! Name resolution.
//!
//! Runs before inference. For every function nest it records parameters,
//! local bindings, `nonlocal`/`global` declarations and the names each body
//! mentions, then checks declarations and reports reads of undefined names.
//! Later passes (inference, closure analysis, initialization checks) read the
//! resulting [`Scopes`] instead of rediscovering bindings themselves.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::ast::*;
use crate::diagnostics::{CompileError, Diagnostics};
use crate::exceptions::{ExceptionKind, ExceptionRegistry};
use crate::span::{NodeId, Span, Spanned};
use crate::typeck::builtins;
use crate::visit::{walk_expr, walk_stmt, Visitor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Function,
    Method,
    Lambda,
}

/// How a name came to be bound in a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Site {
    Def(NodeId),
    Class(NodeId),
    Other,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionScope {
    pub id: NodeId,
    pub name: String,
    pub kind: ScopeKind,
    pub span: Span,
    /// Nearest enclosing function. Class bodies are skipped: a method's parent
    /// is the function (if any) around its class.
    pub parent: Option<NodeId>,
    /// The class a method belongs to.
    pub class: Option<NodeId>,
    pub params: Vec<String>,
    /// Parameters first, then locals in order of first binding. Names declared
    /// `nonlocal` or `global` are excluded.
    pub bindings: Vec<String>,
    pub nonlocals: BTreeSet<String>,
    pub globals: BTreeSet<String>,
    /// Every name the body reads or binds, not counting nested function bodies.
    pub references: BTreeSet<String>,
    pub children: Vec<NodeId>,
    #[serde(skip)]
    sites: BTreeMap<String, Vec<Site>>,
}

impl FunctionScope {
    pub fn binds(&self, name: &str) -> bool {
        self.bindings.iter().any(|b| b == name)
    }

    pub fn is_param(&self, name: &str) -> bool {
        self.params.iter().any(|p| p == name)
    }
}

/// A borrowed function body: a `def` or a `lambda`.
#[derive(Debug, Clone, Copy)]
pub enum FunctionBody<'ast> {
    Def(&'ast FunctionDef),
    Lambda { params: &'ast [Param], body: &'ast Spanned<Expr> },
}

impl<'ast> FunctionBody<'ast> {
    pub fn params(&self) -> &'ast [Param] {
        match self {
            FunctionBody::Def(def) => &def.params,
            FunctionBody::Lambda { params, .. } => params,
        }
    }
}

/// Where a name read resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A binding of the given function.
    Local(NodeId),
    /// A field of the class whose body contains the read.
    ClassField(NodeId),
    Global,
    Builtin,
    Exception(ExceptionKind),
    Unresolved,
}

#[derive(Debug, Clone)]
struct NameUse {
    name: String,
    span: Span,
    function: Option<NodeId>,
    class: Option<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeclKind {
    Nonlocal,
    Global,
}

#[derive(Debug, Clone)]
struct Decl {
    kind: DeclKind,
    name: String,
    span: Span,
    function: NodeId,
}

#[derive(Debug, Clone)]
pub struct Scopes {
    pub functions: BTreeMap<NodeId, FunctionScope>,
    /// Function ids in source order.
    pub order: Vec<NodeId>,
    pub module_bindings: BTreeSet<String>,
    /// Names bound in each class body.
    pub class_fields: BTreeMap<NodeId, BTreeSet<String>>,
    module_sites: BTreeMap<String, Vec<Site>>,
    exceptions: ExceptionRegistry,
}

impl Scopes {
    pub fn get(&self, id: NodeId) -> Option<&FunctionScope> {
        self.functions.get(&id)
    }

    pub fn exceptions(&self) -> &ExceptionRegistry {
        &self.exceptions
    }

    /// Resolve a read of `name` made directly inside `function` (module level
    /// when `None`), optionally inside the body of class `class`.
    pub fn resolve(&self, function: Option<NodeId>, class: Option<NodeId>, name: &str) -> Resolution {
        if let Some(c) = class
            && self.class_fields.get(&c).is_some_and(|f| f.contains(name))
        {
            return Resolution::ClassField(c);
        }
        let mut cur = function;
        while let Some(f) = cur {
            let Some(scope) = self.functions.get(&f) else { break };
            if scope.globals.contains(name) {
                break;
            }
            if !scope.nonlocals.contains(name) && scope.binds(name) {
                return Resolution::Local(f);
            }
            cur = scope.parent;
        }
        if self.module_bindings.contains(name) {
            return Resolution::Global;
        }
        if builtins::is_builtin(name) {
            return Resolution::Builtin;
        }
        match self.exceptions.lookup(name) {
            Some(kind) => Resolution::Exception(kind),
            None => Resolution::Unresolved,
        }
    }

    /// The `def` statement a name is statically bound to: the name is bound
    /// exactly once in its scope, by that `def`.
    pub fn static_def(&self, resolution: &Resolution, name: &str) -> Option<NodeId> {
        match self.sites(resolution, name)? {
            [Site::Def(id)] => Some(*id),
            _ => None,
        }
    }

    /// The class statement a name is statically bound to.
    pub fn static_class(&self, resolution: &Resolution, name: &str) -> Option<NodeId> {
        match self.sites(resolution, name)? {
            [Site::Class(id)] => Some(*id),
            _ => None,
        }
    }

    fn sites(&self, resolution: &Resolution, name: &str) -> Option<&[Site]> {
        let sites = match resolution {
            Resolution::Local(f) => self.functions.get(f)?.sites.get(name)?,
            Resolution::Global => self.module_sites.get(name)?,
            _ => return None,
        };
        Some(sites.as_slice())
    }
}

/// Collect scopes for a module and report name-resolution errors.
pub fn resolve_module(module: &Module, exceptions: &ExceptionRegistry, diags: &mut Diagnostics) -> Scopes {
    tracing::debug!(module = %module.name, "name resolution");
    let mut collector = Collector {
        frames: vec![Frame::Module],
        scopes: Scopes {
            functions: BTreeMap::new(),
            order: Vec::new(),
            module_bindings: BTreeSet::new(),
            class_fields: BTreeMap::new(),
            module_sites: BTreeMap::new(),
            exceptions: exceptions.clone(),
        },
        uses: Vec::new(),
        decls: Vec::new(),
        diags,
    };
    collector.visit_module(module);
    let Collector { mut scopes, uses, decls, diags, .. } = collector;

    check_decls(&mut scopes, &decls, diags);

    for u in &uses {
        if scopes.resolve(u.function, u.class, &u.name) == Resolution::Unresolved {
            diags.push(u.function, CompileError::name(format!("name '{}' is not defined", u.name), u.span));
        }
    }

    tracing::debug!(functions = scopes.functions.len(), "name resolution done");
    scopes
}

fn check_decls(scopes: &mut Scopes, decls: &[Decl], diags: &mut Diagnostics) {
    for decl in decls {
        let Some(scope) = scopes.functions.get(&decl.function) else { continue };
        let name = &decl.name;
        let assigns = scope.sites.contains_key(name);
        match decl.kind {
            DeclKind::Nonlocal => {
                if scope.is_param(name) {
                    diags.push(
                        Some(decl.function),
                        CompileError::name(format!("name '{}' is parameter and nonlocal", name), decl.span),
                    );
                    continue;
                }
                if scope.globals.contains(name) {
                    diags.push(
                        Some(decl.function),
                        CompileError::name(format!("name '{}' is nonlocal and global", name), decl.span),
                    );
                    continue;
                }
                let owner = nonlocal_owner(scopes, scope.parent, name);
                match owner {
                    Some(owner) => {
                        if assigns && let Some(owner_scope) = scopes.functions.get_mut(&owner) {
                            owner_scope.sites.entry(name.clone()).or_default().push(Site::Other);
                        }
                    }
                    None => diags.push(
                        Some(decl.function),
                        CompileError::name(format!("no binding for nonlocal '{}' found", name), decl.span),
                    ),
                }
            }
            DeclKind::Global => {
                if scope.is_param(name) {
                    diags.push(
                        Some(decl.function),
                        CompileError::name(format!("name '{}' is parameter and global", name), decl.span),
                    );
                    continue;
                }
                if assigns {
                    scopes.module_bindings.insert(name.clone());
                    scopes.module_sites.entry(name.clone()).or_default().push(Site::Other);
                } else if !scopes.module_bindings.contains(name) {
                    diags.push(
                        Some(decl.function),
                        CompileError::name(format!("no binding for global '{}' found", name), decl.span),
                    );
                    // Reads of the name would otherwise report again as undefined.
                    scopes.module_bindings.insert(name.clone());
                }
            }
        }
    }
}

fn nonlocal_owner(scopes: &Scopes, mut cur: Option<NodeId>, name: &str) -> Option<NodeId> {
    while let Some(f) = cur {
        let scope = scopes.functions.get(&f)?;
        if scope.globals.contains(name) {
            return None;
        }
        if !scope.nonlocals.contains(name) && scope.binds(name) {
            return Some(f);
        }
        cur = scope.parent;
    }
    None
}

#[derive(Debug, Clone, Copy)]
enum Frame {
    Module,
    Function(NodeId),
    Class(NodeId),
}

struct Collector<'d> {
    frames: Vec<Frame>,
    scopes: Scopes,
    uses: Vec<NameUse>,
    decls: Vec<Decl>,
    diags: &'d mut Diagnostics,
}

impl Collector<'_> {
    fn current(&self) -> Frame {
        self.frames.last().copied().unwrap_or(Frame::Module)
    }

    /// Innermost function frame, skipping class bodies.
    fn current_function(&self) -> Option<NodeId> {
        self.frames.iter().rev().find_map(|f| match f {
            Frame::Function(id) => Some(*id),
            _ => None,
        })
    }

    fn current_class(&self) -> Option<NodeId> {
        match self.current() {
            Frame::Class(id) => Some(id),
            _ => None,
        }
    }

    fn bind(&mut self, name: &str, site: Site) {
        match self.current() {
            Frame::Module => {
                self.scopes.module_bindings.insert(name.to_string());
                self.scopes.module_sites.entry(name.to_string()).or_default().push(site);
            }
            Frame::Class(c) => {
                self.scopes.class_fields.entry(c).or_default().insert(name.to_string());
            }
            Frame::Function(f) => {
                if let Some(scope) = self.scopes.functions.get_mut(&f) {
                    scope.references.insert(name.to_string());
                    scope.sites.entry(name.to_string()).or_default().push(site);
                    let declared = scope.nonlocals.contains(name) || scope.globals.contains(name);
                    if !declared && !scope.binds(name) {
                        scope.bindings.push(name.to_string());
                    }
                }
            }
        }
    }

    fn read(&mut self, name: &str, span: Span) {
        let function = self.current_function();
        if let Frame::Function(f) = self.current()
            && let Some(scope) = self.scopes.functions.get_mut(&f)
        {
            scope.references.insert(name.to_string());
        }
        self.uses.push(NameUse { name: name.to_string(), span, function, class: self.current_class() });
    }

    /// Bind the names of an assignment target; sub-expressions of attribute
    /// and subscript targets are reads.
    fn bind_target(&mut self, target: &Spanned<Expr>) {
        match &target.node {
            Expr::Name(n) => self.bind(n, Site::Other),
            Expr::Tuple(elts) | Expr::List(elts) => {
                for elt in elts {
                    self.bind_target(elt);
                }
            }
            _ => self.visit_expr(target),
        }
    }

    fn enter_function(&mut self, id: NodeId, name: &str, kind: ScopeKind, span: Span, params: &[Param]) {
        let parent = self.current_function();
        let class = self.current_class();
        if let Some(p) = parent
            && let Some(parent_scope) = self.scopes.functions.get_mut(&p)
        {
            parent_scope.children.push(id);
        }
        let mut scope = FunctionScope {
            id,
            name: name.to_string(),
            kind,
            span,
            parent,
            class,
            params: Vec::new(),
            bindings: Vec::new(),
            nonlocals: BTreeSet::new(),
            globals: BTreeSet::new(),
            references: BTreeSet::new(),
            children: Vec::new(),
            sites: BTreeMap::new(),
        };
        let mut first_seen: BTreeMap<&str, Span> = BTreeMap::new();
        for param in params {
            let pname = param.name.node.as_str();
            if let Some(first) = first_seen.get(pname) {
                self.diags.push(
                    Some(id),
                    CompileError::name(format!("duplicate parameter '{}' in '{}'", pname, name), param.name.span)
                        .with_note("first defined here", *first),
                );
                continue;
            }
            first_seen.insert(pname, param.name.span);
            scope.params.push(pname.to_string());
            scope.bindings.push(pname.to_string());
            scope.references.insert(pname.to_string());
            scope.sites.entry(pname.to_string()).or_default().push(Site::Other);
        }
        self.scopes.order.push(id);
        self.scopes.functions.insert(id, scope);
        self.frames.push(Frame::Function(id));
    }

    fn declare(&mut self, kind: DeclKind, names: &[Spanned<String>]) {
        let Frame::Function(f) = self.current() else {
            if kind == DeclKind::Nonlocal {
                for n in names {
                    self.diags.push(
                        None,
                        CompileError::name("nonlocal declaration not allowed at module level", n.span),
                    );
                }
            }
            return;
        };
        let Some(scope) = self.scopes.functions.get_mut(&f) else { return };
        for n in names {
            let name = n.node.clone();
            scope.references.insert(name.clone());
            if !scope.is_param(&name) {
                scope.bindings.retain(|b| b != &name);
            }
            match kind {
                DeclKind::Nonlocal => scope.nonlocals.insert(name.clone()),
                DeclKind::Global => scope.globals.insert(name.clone()),
            };
            self.decls.push(Decl { kind, name, span: n.span, function: f });
        }
    }
}

impl<'ast> Visitor<'ast> for Collector<'_> {
    fn visit_stmt(&mut self, stmt: &'ast Spanned<Stmt>) {
        match &stmt.node {
            Stmt::Assign { targets, value } => {
                self.visit_expr(value);
                for target in targets {
                    self.bind_target(target);
                }
            }
            Stmt::AugAssign { target, value, .. } => {
                if let Expr::Name(n) = &target.node {
                    self.read(n, target.span);
                }
                self.visit_expr(value);
                self.bind_target(target);
            }
            Stmt::For { target, iter, body, orelse } => {
                self.visit_expr(iter);
                self.bind_target(target);
                self.visit_body(body);
                self.visit_body(orelse);
            }
            Stmt::Nonlocal(names) => self.declare(DeclKind::Nonlocal, names),
            Stmt::Global(names) => self.declare(DeclKind::Global, names),
            _ => walk_stmt(self, stmt),
        }
    }

    fn visit_expr(&mut self, expr: &'ast Spanned<Expr>) {
        if let Expr::Name(n) = &expr.node {
            self.read(n, expr.span);
        }
        walk_expr(self, expr);
    }

    fn visit_function(&mut self, id: NodeId, def: &'ast FunctionDef) {
        let kind = if self.current_class().is_some() { ScopeKind::Method } else { ScopeKind::Function };
        for param in &def.params {
            if let Some(default) = &param.default {
                self.visit_expr(default);
            }
        }
        self.bind(&def.name.node, Site::Def(id));
        self.enter_function(id, &def.name.node, kind, def.name.span, &def.params);
        self.visit_body(&def.body);
        self.frames.pop();
    }

    fn visit_lambda(&mut self, id: NodeId, params: &'ast [Param], body: &'ast Spanned<Expr>) {
        for param in params {
            if let Some(default) = &param.default {
                self.visit_expr(default);
            }
        }
        self.enter_function(id, "<lambda>", ScopeKind::Lambda, body.span, params);
        self.visit_expr(body);
        self.frames.pop();
    }

    fn visit_class(&mut self, id: NodeId, class: &'ast ClassDef) {
        for base in &class.bases {
            self.visit_expr(base);
        }
        self.bind(&class.name.node, Site::Class(id));
        self.scopes.class_fields.entry(id).or_default();
        self.frames.push(Frame::Class(id));
        self.visit_body(&class.body);
        self.frames.pop();
    }

    fn visit_handler(&mut self, handler: &'ast Spanned<ExceptHandler>) {
        if let Some(kind) = &handler.node.kind {
            self.visit_expr(kind);
        }
        if let Some(name) = &handler.node.name {
            self.bind(&name.node, Site::Other);
        }
        self.visit_body(&handler.node.body);
    }

    fn visit_with_item(&mut self, item: &'ast Spanned<WithItem>) {
        self.visit_expr(&item.node.context);
        if let Some(target) = &item.node.target {
            self.bind(&target.node, Site::Other);
        }
    }
}

/// Index every function body of a module by id.
pub fn function_bodies(module: &Module) -> BTreeMap<NodeId, FunctionBody<'_>> {
    struct Bodies<'ast> {
        out: BTreeMap<NodeId, FunctionBody<'ast>>,
    }

    impl<'ast> Visitor<'ast> for Bodies<'ast> {
        fn visit_function(&mut self, id: NodeId, def: &'ast FunctionDef) {
            self.out.insert(id, FunctionBody::Def(def));
            crate::visit::walk_function(self, id, def);
        }

        fn visit_lambda(&mut self, id: NodeId, params: &'ast [Param], body: &'ast Spanned<Expr>) {
            self.out.insert(id, FunctionBody::Lambda { params, body });
            crate::visit::walk_lambda(self, id, params, body);
        }
    }

    let mut bodies = Bodies { out: BTreeMap::new() };
    bodies.visit_module(module);
    bodies.out
}
