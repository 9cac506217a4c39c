//! Programmatic AST construction.
//!
//! The builder hands out fresh [`NodeId`]s and synthetic spans in creation
//! order, so two modules built by the same sequence of calls are identical.
//! Tests, benchmarks and tools that generate modules use it instead of a parser.

use crate::span::{NodeId, Span, Spanned};

use super::*;

#[derive(Debug, Default)]
pub struct AstBuilder {
    next: u32,
}

impl AstBuilder {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    fn spanned<T>(&mut self, node: T) -> Spanned<T> {
        let id = self.next;
        self.next += 1;
        let start = id as usize * 10;
        Spanned::new(node, Span::new(start, start + 5), NodeId(id))
    }

    /// The id the next created node will receive.
    pub fn peek_id(&self) -> NodeId {
        NodeId(self.next)
    }

    pub fn ident(&mut self, name: &str) -> Spanned<String> {
        self.spanned(name.to_string())
    }

    // ── Expressions ─────────────────────────────────────────────────────

    pub fn int(&mut self, value: i64) -> Spanned<Expr> {
        self.spanned(Expr::Int(value))
    }

    pub fn float(&mut self, value: f64) -> Spanned<Expr> {
        self.spanned(Expr::Float(value))
    }

    pub fn bool(&mut self, value: bool) -> Spanned<Expr> {
        self.spanned(Expr::Bool(value))
    }

    pub fn str(&mut self, value: &str) -> Spanned<Expr> {
        self.spanned(Expr::Str(value.to_string()))
    }

    pub fn bytes(&mut self, value: &[u8]) -> Spanned<Expr> {
        self.spanned(Expr::Bytes(value.to_vec()))
    }

    pub fn none(&mut self) -> Spanned<Expr> {
        self.spanned(Expr::NoneLit)
    }

    pub fn name(&mut self, name: &str) -> Spanned<Expr> {
        self.spanned(Expr::Name(name.to_string()))
    }

    pub fn binop(&mut self, lhs: Spanned<Expr>, op: BinOp, rhs: Spanned<Expr>) -> Spanned<Expr> {
        self.spanned(Expr::BinOp { op, lhs: Box::new(lhs), rhs: Box::new(rhs) })
    }

    pub fn unary(&mut self, op: UnaryOp, operand: Spanned<Expr>) -> Spanned<Expr> {
        self.spanned(Expr::UnaryOp { op, operand: Box::new(operand) })
    }

    pub fn bool_op(&mut self, op: BoolOp, values: Vec<Spanned<Expr>>) -> Spanned<Expr> {
        self.spanned(Expr::BoolOp { op, values })
    }

    pub fn compare(&mut self, lhs: Spanned<Expr>, op: CmpOp, rhs: Spanned<Expr>) -> Spanned<Expr> {
        self.spanned(Expr::Compare { lhs: Box::new(lhs), ops: vec![(op, rhs)] })
    }

    /// A call whose callee is a plain name.
    pub fn call(&mut self, func: &str, args: Vec<Spanned<Expr>>) -> Spanned<Expr> {
        let callee = self.name(func);
        self.call_expr(callee, args, Vec::new())
    }

    pub fn call_expr(
        &mut self,
        func: Spanned<Expr>,
        args: Vec<Spanned<Expr>>,
        keywords: Vec<Keyword>,
    ) -> Spanned<Expr> {
        self.spanned(Expr::Call { func: Box::new(func), args, keywords })
    }

    pub fn kwarg(&mut self, name: &str, value: Spanned<Expr>) -> Keyword {
        Keyword { name: self.ident(name), value }
    }

    pub fn attr(&mut self, value: Spanned<Expr>, attr: &str) -> Spanned<Expr> {
        let attr = self.ident(attr);
        self.spanned(Expr::Attribute { value: Box::new(value), attr })
    }

    pub fn method_call(&mut self, receiver: Spanned<Expr>, method: &str, args: Vec<Spanned<Expr>>) -> Spanned<Expr> {
        let callee = self.attr(receiver, method);
        self.call_expr(callee, args, Vec::new())
    }

    pub fn subscript(&mut self, value: Spanned<Expr>, index: Spanned<Expr>) -> Spanned<Expr> {
        self.spanned(Expr::Subscript { value: Box::new(value), index: Box::new(index) })
    }

    pub fn if_exp(&mut self, test: Spanned<Expr>, body: Spanned<Expr>, orelse: Spanned<Expr>) -> Spanned<Expr> {
        self.spanned(Expr::IfExp { test: Box::new(test), body: Box::new(body), orelse: Box::new(orelse) })
    }

    pub fn list(&mut self, elts: Vec<Spanned<Expr>>) -> Spanned<Expr> {
        self.spanned(Expr::List(elts))
    }

    pub fn tuple(&mut self, elts: Vec<Spanned<Expr>>) -> Spanned<Expr> {
        self.spanned(Expr::Tuple(elts))
    }

    pub fn lambda(&mut self, params: &[&str], body: Spanned<Expr>) -> Spanned<Expr> {
        let params = params.iter().map(|p| self.param(p)).collect();
        self.spanned(Expr::Lambda { params, body: Box::new(body) })
    }

    // ── Statements ──────────────────────────────────────────────────────

    pub fn expr_stmt(&mut self, expr: Spanned<Expr>) -> Spanned<Stmt> {
        self.spanned(Stmt::Expr(expr))
    }

    /// `func(args...)` as a statement.
    pub fn call_stmt(&mut self, func: &str, args: Vec<Spanned<Expr>>) -> Spanned<Stmt> {
        let call = self.call(func, args);
        self.expr_stmt(call)
    }

    /// `delay_mu(ticks)` as a statement.
    pub fn delay_mu(&mut self, ticks: i64) -> Spanned<Stmt> {
        let arg = self.int(ticks);
        self.call_stmt("delay_mu", vec![arg])
    }

    /// `print("label")` as a statement.
    pub fn print(&mut self, label: &str) -> Spanned<Stmt> {
        let arg = self.str(label);
        self.call_stmt("print", vec![arg])
    }

    pub fn assign(&mut self, target: &str, value: Spanned<Expr>) -> Spanned<Stmt> {
        let target = self.name(target);
        self.assign_to(target, value)
    }

    pub fn assign_to(&mut self, target: Spanned<Expr>, value: Spanned<Expr>) -> Spanned<Stmt> {
        self.spanned(Stmt::Assign { targets: vec![target], value })
    }

    pub fn aug_assign(&mut self, target: &str, op: BinOp, value: Spanned<Expr>) -> Spanned<Stmt> {
        let target = self.name(target);
        self.spanned(Stmt::AugAssign { target, op, value })
    }

    pub fn pass(&mut self) -> Spanned<Stmt> {
        self.spanned(Stmt::Pass)
    }

    pub fn if_(&mut self, test: Spanned<Expr>, body: Body, orelse: Body) -> Spanned<Stmt> {
        self.spanned(Stmt::If { test, body, orelse })
    }

    pub fn while_(&mut self, test: Spanned<Expr>, body: Body, orelse: Body) -> Spanned<Stmt> {
        self.spanned(Stmt::While { test, body, orelse })
    }

    pub fn for_(&mut self, target: &str, iter: Spanned<Expr>, body: Body, orelse: Body) -> Spanned<Stmt> {
        let target = self.name(target);
        self.spanned(Stmt::For { target, iter, body, orelse })
    }

    /// `for target in range(args...)`.
    pub fn for_range(&mut self, target: &str, range_args: Vec<Spanned<Expr>>, body: Body) -> Spanned<Stmt> {
        let iter = self.call("range", range_args);
        self.for_(target, iter, body, Vec::new())
    }

    pub fn try_(
        &mut self,
        body: Body,
        handlers: Vec<Spanned<ExceptHandler>>,
        orelse: Body,
        finalbody: Body,
    ) -> Spanned<Stmt> {
        self.spanned(Stmt::Try { body, handlers, orelse, finalbody })
    }

    pub fn handler(&mut self, kind: Option<&str>, name: Option<&str>, body: Body) -> Spanned<ExceptHandler> {
        let kind = kind.map(|k| self.name(k));
        let name = name.map(|n| self.ident(n));
        self.spanned(ExceptHandler { kind, name, body })
    }

    pub fn with_item(&mut self, context: Spanned<Expr>, target: Option<&str>) -> Spanned<WithItem> {
        let target = target.map(|t| self.ident(t));
        self.spanned(WithItem { context, target })
    }

    pub fn with_(&mut self, items: Vec<Spanned<WithItem>>, body: Body) -> Spanned<Stmt> {
        self.spanned(Stmt::With { items, body })
    }

    fn marker_block(&mut self, marker: &str, body: Body) -> Spanned<Stmt> {
        let context = self.name(marker);
        let item = self.with_item(context, None);
        self.with_(vec![item], body)
    }

    pub fn sequential(&mut self, body: Body) -> Spanned<Stmt> {
        self.marker_block("sequential", body)
    }

    pub fn interleave(&mut self, body: Body) -> Spanned<Stmt> {
        self.marker_block("interleave", body)
    }

    pub fn parallel(&mut self, body: Body) -> Spanned<Stmt> {
        self.marker_block("parallel", body)
    }

    pub fn param(&mut self, name: &str) -> Param {
        Param { name: self.ident(name), default: None }
    }

    pub fn param_default(&mut self, name: &str, default: Spanned<Expr>) -> Param {
        Param { name: self.ident(name), default: Some(default) }
    }

    pub fn def(&mut self, name: &str, params: &[&str], body: Body) -> Spanned<Stmt> {
        let params = params.iter().map(|p| self.param(p)).collect();
        self.def_with(name, params, body)
    }

    pub fn def_with(&mut self, name: &str, params: Vec<Param>, body: Body) -> Spanned<Stmt> {
        let name = self.ident(name);
        self.spanned(Stmt::FunctionDef(FunctionDef { name, params, body }))
    }

    pub fn class(&mut self, name: &str, body: Body) -> Spanned<Stmt> {
        self.class_with_bases(name, Vec::new(), body)
    }

    pub fn class_with_bases(&mut self, name: &str, bases: Vec<Spanned<Expr>>, body: Body) -> Spanned<Stmt> {
        let name = self.ident(name);
        self.spanned(Stmt::ClassDef(ClassDef { name, bases, body }))
    }

    pub fn ret(&mut self, value: Option<Spanned<Expr>>) -> Spanned<Stmt> {
        self.spanned(Stmt::Return(value))
    }

    pub fn ret_value(&mut self, value: Spanned<Expr>) -> Spanned<Stmt> {
        self.ret(Some(value))
    }

    pub fn break_(&mut self) -> Spanned<Stmt> {
        self.spanned(Stmt::Break)
    }

    pub fn continue_(&mut self) -> Spanned<Stmt> {
        self.spanned(Stmt::Continue)
    }

    pub fn raise(&mut self, exc: Option<Spanned<Expr>>) -> Spanned<Stmt> {
        self.spanned(Stmt::Raise(exc))
    }

    /// `raise Kind("message")`.
    pub fn raise_kind(&mut self, kind: &str, message: &str) -> Spanned<Stmt> {
        let msg = self.str(message);
        let exc = self.call(kind, vec![msg]);
        self.raise(Some(exc))
    }

    pub fn nonlocal(&mut self, names: &[&str]) -> Spanned<Stmt> {
        let names = names.iter().map(|n| self.ident(n)).collect();
        self.spanned(Stmt::Nonlocal(names))
    }

    pub fn global(&mut self, names: &[&str]) -> Spanned<Stmt> {
        let names = names.iter().map(|n| self.ident(n)).collect();
        self.spanned(Stmt::Global(names))
    }

    pub fn module(&mut self, body: Body) -> Module {
        Module { name: "main".to_string(), body }
    }
}
