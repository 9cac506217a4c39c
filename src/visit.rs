//! AST visitor infrastructure
//!
//! `Visitor` is a read-only traversal with default implementations that
//! recurse into all children. Override the methods you need and call the
//! matching `walk_*` function to continue the default recursion; omit the
//! call to prune traversal at that node.
//!
//! Use `Visitor` for passes where most match arms would be pure recursion
//! (free-name collection, node indexing). Passes where most arms carry custom
//! logic (inference, delay estimation, lowering) match on the AST directly.

pub mod composers;

use crate::ast::*;
use crate::span::{NodeId, Spanned};

pub trait Visitor<'ast>: Sized {
    fn visit_module(&mut self, module: &'ast Module) {
        walk_module(self, module);
    }

    fn visit_body(&mut self, body: &'ast [Spanned<Stmt>]) {
        walk_body(self, body);
    }

    fn visit_stmt(&mut self, stmt: &'ast Spanned<Stmt>) {
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &'ast Spanned<Expr>) {
        walk_expr(self, expr);
    }

    /// A `def`; `id` is the id of the enclosing `FunctionDef` statement.
    fn visit_function(&mut self, id: NodeId, def: &'ast FunctionDef) {
        walk_function(self, id, def);
    }

    /// A `lambda`; `id` is the id of the lambda expression.
    fn visit_lambda(&mut self, id: NodeId, params: &'ast [Param], body: &'ast Spanned<Expr>) {
        walk_lambda(self, id, params, body);
    }

    fn visit_class(&mut self, id: NodeId, class: &'ast ClassDef) {
        walk_class(self, id, class);
    }

    fn visit_handler(&mut self, handler: &'ast Spanned<ExceptHandler>) {
        walk_handler(self, handler);
    }

    fn visit_with_item(&mut self, item: &'ast Spanned<WithItem>) {
        walk_with_item(self, item);
    }
}

pub fn walk_module<'ast, V: Visitor<'ast>>(v: &mut V, module: &'ast Module) {
    v.visit_body(&module.body);
}

pub fn walk_body<'ast, V: Visitor<'ast>>(v: &mut V, body: &'ast [Spanned<Stmt>]) {
    for stmt in body {
        v.visit_stmt(stmt);
    }
}

pub fn walk_function<'ast, V: Visitor<'ast>>(v: &mut V, _id: NodeId, def: &'ast FunctionDef) {
    for param in &def.params {
        if let Some(default) = &param.default {
            v.visit_expr(default);
        }
    }
    v.visit_body(&def.body);
}

pub fn walk_lambda<'ast, V: Visitor<'ast>>(v: &mut V, _id: NodeId, params: &'ast [Param], body: &'ast Spanned<Expr>) {
    for param in params {
        if let Some(default) = &param.default {
            v.visit_expr(default);
        }
    }
    v.visit_expr(body);
}

pub fn walk_class<'ast, V: Visitor<'ast>>(v: &mut V, _id: NodeId, class: &'ast ClassDef) {
    for base in &class.bases {
        v.visit_expr(base);
    }
    v.visit_body(&class.body);
}

pub fn walk_handler<'ast, V: Visitor<'ast>>(v: &mut V, handler: &'ast Spanned<ExceptHandler>) {
    if let Some(kind) = &handler.node.kind {
        v.visit_expr(kind);
    }
    v.visit_body(&handler.node.body);
}

pub fn walk_with_item<'ast, V: Visitor<'ast>>(v: &mut V, item: &'ast Spanned<WithItem>) {
    v.visit_expr(&item.node.context);
}

pub fn walk_stmt<'ast, V: Visitor<'ast>>(v: &mut V, stmt: &'ast Spanned<Stmt>) {
    match &stmt.node {
        Stmt::Expr(expr) => v.visit_expr(expr),
        Stmt::Assign { targets, value } => {
            v.visit_expr(value);
            for target in targets {
                v.visit_expr(target);
            }
        }
        Stmt::AugAssign { target, value, .. } => {
            v.visit_expr(target);
            v.visit_expr(value);
        }
        Stmt::If { test, body, orelse } | Stmt::While { test, body, orelse } => {
            v.visit_expr(test);
            v.visit_body(body);
            v.visit_body(orelse);
        }
        Stmt::For { target, iter, body, orelse } => {
            v.visit_expr(iter);
            v.visit_expr(target);
            v.visit_body(body);
            v.visit_body(orelse);
        }
        Stmt::Try { body, handlers, orelse, finalbody } => {
            v.visit_body(body);
            for handler in handlers {
                v.visit_handler(handler);
            }
            v.visit_body(orelse);
            v.visit_body(finalbody);
        }
        Stmt::With { items, body } => {
            for item in items {
                v.visit_with_item(item);
            }
            v.visit_body(body);
        }
        Stmt::FunctionDef(def) => v.visit_function(stmt.id, def),
        Stmt::ClassDef(class) => v.visit_class(stmt.id, class),
        Stmt::Return(Some(expr)) | Stmt::Raise(Some(expr)) => v.visit_expr(expr),
        Stmt::Return(None)
        | Stmt::Raise(None)
        | Stmt::Pass
        | Stmt::Break
        | Stmt::Continue
        | Stmt::Nonlocal(_)
        | Stmt::Global(_) => {}
    }
}

pub fn walk_expr<'ast, V: Visitor<'ast>>(v: &mut V, expr: &'ast Spanned<Expr>) {
    match &expr.node {
        Expr::Int(_)
        | Expr::Float(_)
        | Expr::Bool(_)
        | Expr::Str(_)
        | Expr::Bytes(_)
        | Expr::NoneLit
        | Expr::Name(_) => {}
        Expr::BinOp { lhs, rhs, .. } => {
            v.visit_expr(lhs);
            v.visit_expr(rhs);
        }
        Expr::UnaryOp { operand, .. } => v.visit_expr(operand),
        Expr::BoolOp { values, .. } => {
            for value in values {
                v.visit_expr(value);
            }
        }
        Expr::Compare { lhs, ops } => {
            v.visit_expr(lhs);
            for (_, rhs) in ops {
                v.visit_expr(rhs);
            }
        }
        Expr::Call { func, args, keywords } => {
            v.visit_expr(func);
            for arg in args {
                v.visit_expr(arg);
            }
            for kw in keywords {
                v.visit_expr(&kw.value);
            }
        }
        Expr::Attribute { value, .. } => v.visit_expr(value),
        Expr::Subscript { value, index } => {
            v.visit_expr(value);
            v.visit_expr(index);
        }
        Expr::IfExp { test, body, orelse } => {
            v.visit_expr(test);
            v.visit_expr(body);
            v.visit_expr(orelse);
        }
        Expr::List(elts) | Expr::Tuple(elts) => {
            for elt in elts {
                v.visit_expr(elt);
            }
        }
        Expr::Lambda { params, body } => v.visit_lambda(expr.id, params, body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build::AstBuilder;

    struct NameCollector {
        names: Vec<String>,
    }

    impl<'ast> Visitor<'ast> for NameCollector {
        fn visit_expr(&mut self, expr: &'ast Spanned<Expr>) {
            if let Expr::Name(n) = &expr.node {
                self.names.push(n.clone());
            }
            walk_expr(self, expr);
        }
    }

    struct FunctionCounter {
        count: usize,
    }

    impl<'ast> Visitor<'ast> for FunctionCounter {
        fn visit_function(&mut self, id: NodeId, def: &'ast FunctionDef) {
            self.count += 1;
            walk_function(self, id, def);
        }

        fn visit_lambda(&mut self, id: NodeId, params: &'ast [Param], body: &'ast Spanned<Expr>) {
            self.count += 1;
            walk_lambda(self, id, params, body);
        }
    }

    #[test]
    fn collects_names_in_evaluation_order() {
        let mut b = AstBuilder::new();
        let x = b.name("x");
        let y = b.name("y");
        let sum = b.binop(x, BinOp::Add, y);
        let assign = b.assign("z", sum);
        let module = b.module(vec![assign]);
        let mut c = NameCollector { names: Vec::new() };
        c.visit_module(&module);
        assert_eq!(c.names, vec!["x", "y", "z"]);
    }

    #[test]
    fn reaches_nested_functions_and_lambdas() {
        let mut b = AstBuilder::new();
        let one = b.int(1);
        let lam = b.lambda(&["a"], one);
        let assign = b.assign("f", lam);
        let inner = b.def("inner", &[], vec![assign]);
        let outer = b.def("outer", &[], vec![inner]);
        let module = b.module(vec![outer]);
        let mut c = FunctionCounter { count: 0 };
        c.visit_module(&module);
        assert_eq!(c.count, 3);
    }

    #[test]
    fn handler_bodies_are_walked() {
        let mut b = AstBuilder::new();
        let body = b.print("in handler");
        let handler = b.handler(Some("ValueError"), Some("e"), vec![body]);
        let stmt = b.pass();
        let t = b.try_(vec![stmt], vec![handler], vec![], vec![]);
        let module = b.module(vec![t]);
        let mut c = NameCollector { names: Vec::new() };
        c.visit_module(&module);
        assert_eq!(c.names, vec!["ValueError", "print"]);
    }
}
