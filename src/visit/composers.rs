//! Composition utilities for common visitor patterns.
//!
//! Helpers that find, count and index nodes so passes don't each carry
//! their own one-off visitor.

use rustc_hash::FxHashMap;

use crate::ast::*;
use crate::span::{NodeId, Spanned};
use crate::visit::{walk_expr, walk_stmt, Visitor};

// ============================================================================
// Detection / Predicate Helpers
// ============================================================================

/// Check if an expression tree contains any expression matching a predicate.
///
/// Descends into lambda bodies.
pub fn contains_expr<F>(expr: &Spanned<Expr>, predicate: F) -> bool
where
    F: Fn(&Expr) -> bool,
{
    struct Detector<F> {
        predicate: F,
        found: bool,
    }

    impl<'ast, F> Visitor<'ast> for Detector<F>
    where
        F: Fn(&Expr) -> bool,
    {
        fn visit_expr(&mut self, expr: &'ast Spanned<Expr>) {
            if self.found {
                return;
            }
            if (self.predicate)(&expr.node) {
                self.found = true;
                return;
            }
            walk_expr(self, expr);
        }
    }

    let mut detector = Detector { predicate, found: false };
    detector.visit_expr(expr);
    detector.found
}

/// Check if a body contains a statement matching a predicate, without
/// looking inside nested function or class definitions.
pub fn contains_stmt_in_body<F>(body: &[Spanned<Stmt>], predicate: F) -> bool
where
    F: Fn(&Stmt) -> bool,
{
    struct Detector<F> {
        predicate: F,
        found: bool,
    }

    impl<'ast, F> Visitor<'ast> for Detector<F>
    where
        F: Fn(&Stmt) -> bool,
    {
        fn visit_stmt(&mut self, stmt: &'ast Spanned<Stmt>) {
            if self.found {
                return;
            }
            if (self.predicate)(&stmt.node) {
                self.found = true;
                return;
            }
            walk_stmt(self, stmt);
        }

        fn visit_function(&mut self, _id: NodeId, _def: &'ast FunctionDef) {}

        fn visit_class(&mut self, _id: NodeId, _class: &'ast ClassDef) {}

        fn visit_expr(&mut self, _expr: &'ast Spanned<Expr>) {}
    }

    let mut detector = Detector { predicate, found: false };
    detector.visit_body(body);
    detector.found
}

/// Whether a loop body can leave its loop early: a `break` or `continue`
/// that belongs to this loop (not to a loop nested inside it).
pub fn loop_exits_early(body: &[Spanned<Stmt>]) -> bool {
    fn scan(body: &[Spanned<Stmt>]) -> bool {
        body.iter().any(|stmt| match &stmt.node {
            Stmt::Break | Stmt::Continue => true,
            Stmt::If { body, orelse, .. } => scan(body) || scan(orelse),
            Stmt::Try { body, handlers, orelse, finalbody } => {
                scan(body) || handlers.iter().any(|h| scan(&h.node.body)) || scan(orelse) || scan(finalbody)
            }
            Stmt::With { body, .. } => scan(body),
            // A nested loop's own else clause still belongs to the outer loop.
            Stmt::While { orelse, .. } | Stmt::For { orelse, .. } => scan(orelse),
            _ => false,
        })
    }
    scan(body)
}

/// Whether a function body has a `return <value>` of its own.
pub fn returns_value(body: &[Spanned<Stmt>]) -> bool {
    contains_stmt_in_body(body, |s| matches!(s, Stmt::Return(Some(_))))
}

// ============================================================================
// Node index
// ============================================================================

/// Lookup table from [`NodeId`] to the statement or expression carrying it.
///
/// Passes that work on lowered graphs (which reference AST nodes by id) use
/// this to get back to the syntax.
#[derive(Debug, Default)]
pub struct NodeIndex<'ast> {
    stmts: FxHashMap<NodeId, &'ast Spanned<Stmt>>,
    exprs: FxHashMap<NodeId, &'ast Spanned<Expr>>,
    with_items: FxHashMap<NodeId, &'ast Spanned<WithItem>>,
    handlers: FxHashMap<NodeId, &'ast Spanned<ExceptHandler>>,
}

impl<'ast> NodeIndex<'ast> {
    pub fn of_body(body: &'ast [Spanned<Stmt>]) -> Self {
        let mut index = NodeIndex::default();
        index.visit_body(body);
        index
    }

    pub fn of_expr(expr: &'ast Spanned<Expr>) -> Self {
        let mut index = NodeIndex::default();
        index.visit_expr(expr);
        index
    }

    pub fn stmt(&self, id: NodeId) -> Option<&'ast Spanned<Stmt>> {
        self.stmts.get(&id).copied()
    }

    pub fn expr(&self, id: NodeId) -> Option<&'ast Spanned<Expr>> {
        self.exprs.get(&id).copied()
    }

    pub fn with_item(&self, id: NodeId) -> Option<&'ast Spanned<WithItem>> {
        self.with_items.get(&id).copied()
    }

    pub fn handler(&self, id: NodeId) -> Option<&'ast Spanned<ExceptHandler>> {
        self.handlers.get(&id).copied()
    }
}

impl<'ast> Visitor<'ast> for NodeIndex<'ast> {
    fn visit_stmt(&mut self, stmt: &'ast Spanned<Stmt>) {
        self.stmts.insert(stmt.id, stmt);
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &'ast Spanned<Expr>) {
        self.exprs.insert(expr.id, expr);
        walk_expr(self, expr);
    }

    fn visit_handler(&mut self, handler: &'ast Spanned<ExceptHandler>) {
        self.handlers.insert(handler.id, handler);
        crate::visit::walk_handler(self, handler);
    }

    fn visit_with_item(&mut self, item: &'ast Spanned<WithItem>) {
        self.with_items.insert(item.id, item);
        crate::visit::walk_with_item(self, item);
    }
}
