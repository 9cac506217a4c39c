use std::collections::{BTreeMap, BTreeSet};

use crate::ast::*;
use crate::config::CompilerConfig;
use crate::diagnostics::{CompileError, Diagnostics};
use crate::scope::{FunctionBody, Scopes};
use crate::span::{NodeId, Span, Spanned};
use crate::typeck::env::{CallTarget, TypeEnv};
use crate::typeck::unify::DelayVars;
use crate::visit::composers::loop_exits_early;
use crate::visit::{walk_stmt, Visitor};

use super::{DelayExpr, Schedule};

pub(super) struct Scheduler<'a> {
    pub(super) scopes: &'a Scopes,
    pub(super) env: &'a TypeEnv,
    pub(super) config: &'a CompilerConfig,
    bodies: &'a BTreeMap<NodeId, FunctionBody<'a>>,
    delay_vars: &'a mut DelayVars,
    diags: &'a mut Diagnostics,
    memo: BTreeMap<NodeId, DelayExpr>,
    /// Functions whose walk is on the stack; a call back into one of them is
    /// recursion.
    in_progress: Vec<NodeId>,
    pub(super) schedules: BTreeMap<NodeId, Schedule>,
}

impl<'a> Scheduler<'a> {
    pub(super) fn new(
        scopes: &'a Scopes,
        env: &'a TypeEnv,
        config: &'a CompilerConfig,
        bodies: &'a BTreeMap<NodeId, FunctionBody<'a>>,
        delay_vars: &'a mut DelayVars,
        diags: &'a mut Diagnostics,
    ) -> Self {
        Scheduler {
            scopes,
            env,
            config,
            bodies,
            delay_vars,
            diags,
            memo: BTreeMap::new(),
            in_progress: Vec::new(),
            schedules: BTreeMap::new(),
        }
    }

    pub(super) fn is_failed(&self, id: NodeId) -> bool {
        self.diags.is_failed(id)
    }

    pub(super) fn finish(self) -> (BTreeMap<NodeId, DelayExpr>, BTreeMap<NodeId, Schedule>) {
        (self.memo, self.schedules)
    }

    /// The delay of a function, walking its body the first time it is asked
    /// for. The result is fixed on the function type's delay variable.
    pub(super) fn function_delay(&mut self, id: NodeId) -> DelayExpr {
        if let Some(delay) = self.memo.get(&id) {
            return delay.clone();
        }
        if self.in_progress.contains(&id) {
            return DelayExpr::indeterminate("recursive call");
        }
        if self.diags.is_failed(id) {
            return DelayExpr::indeterminate("function has errors");
        }
        let Some(body) = self.bodies.get(&id).copied() else {
            return DelayExpr::indeterminate("unknown function");
        };

        self.in_progress.push(id);
        let result = {
            let mut walk = Walk::new(self, id, body);
            match body {
                FunctionBody::Def(def) => walk.body_delay(&def.body),
                FunctionBody::Lambda { body, .. } => walk.expr_delay(body),
            }
        };
        self.in_progress.pop();

        let delay = match result {
            Ok(delay) => {
                self.fix_delay(id, &delay);
                delay
            }
            Err(err) => {
                self.diags.push(Some(id), err);
                DelayExpr::indeterminate("function has errors")
            }
        };
        tracing::trace!(function = ?id, %delay, "walked function");
        self.memo.insert(id, delay.clone());
        delay
    }

    fn fix_delay(&mut self, id: NodeId, delay: &DelayExpr) {
        let Some(info) = self.env.functions.get(&id) else { return };
        let Err(existing) = self.delay_vars.fix(info.ty.delay, delay.clone()) else { return };
        if existing.is_indeterminate() && delay.is_indeterminate() {
            return;
        }
        let span = self.scopes.get(id).map(|s| s.span).unwrap_or_else(Span::dummy);
        self.diags.push(
            Some(id),
            CompileError::timing(
                format!(
                    "delay already constrained: '{}' takes {} but a function of the same type takes {}",
                    info.name, delay, existing
                ),
                span,
            ),
        );
    }
}

/// Names a body assigns to directly, not counting nested functions.
struct Rebinds {
    names: BTreeSet<String>,
}

impl Rebinds {
    fn collect_target(&mut self, target: &Spanned<Expr>) {
        match &target.node {
            Expr::Name(n) => {
                self.names.insert(n.clone());
            }
            Expr::Tuple(elts) | Expr::List(elts) => elts.iter().for_each(|e| self.collect_target(e)),
            _ => {}
        }
    }
}

impl<'ast> Visitor<'ast> for Rebinds {
    fn visit_stmt(&mut self, stmt: &'ast Spanned<Stmt>) {
        match &stmt.node {
            Stmt::Assign { targets, .. } => targets.iter().for_each(|t| self.collect_target(t)),
            Stmt::AugAssign { target, .. } | Stmt::For { target, .. } => self.collect_target(target),
            Stmt::Nonlocal(names) | Stmt::Global(names) => {
                self.names.extend(names.iter().map(|n| n.node.clone()));
            }
            _ => {}
        }
        walk_stmt(self, stmt);
    }

    fn visit_function(&mut self, _id: NodeId, _def: &'ast FunctionDef) {}

    fn visit_lambda(&mut self, _id: NodeId, _params: &'ast [Param], _body: &'ast Spanned<Expr>) {}

    fn visit_handler(&mut self, handler: &'ast Spanned<ExceptHandler>) {
        if let Some(name) = &handler.node.name {
            self.names.insert(name.node.clone());
        }
        crate::visit::walk_handler(self, handler);
    }

    fn visit_with_item(&mut self, item: &'ast Spanned<WithItem>) {
        if let Some(target) = &item.node.target {
            self.names.insert(target.node.clone());
        }
    }
}

/// The state of one function walk.
pub(super) struct Walk<'s, 'a> {
    pub(super) sched: &'s mut Scheduler<'a>,
    pub(super) function: NodeId,
    /// Parameters a delay may refer to: those the body never rebinds.
    params: BTreeSet<String>,
    /// Nesting depth of interleave regions around the current statement.
    pub(super) region: usize,
    /// Where a `return` was passed on some path through the code walked so far.
    returned_at: Option<Span>,
}

impl<'s, 'a> Walk<'s, 'a> {
    fn new(sched: &'s mut Scheduler<'a>, function: NodeId, body: FunctionBody<'_>) -> Self {
        let mut rebinds = Rebinds { names: BTreeSet::new() };
        if let FunctionBody::Def(def) = body {
            rebinds.visit_body(&def.body);
        }
        let params = body
            .params()
            .iter()
            .map(|p| p.name.node.clone())
            .filter(|p| !rebinds.names.contains(p))
            .collect();
        Walk { sched, function, params, region: 0, returned_at: None }
    }

    pub(super) fn body_delay(&mut self, body: &[Spanned<Stmt>]) -> Result<DelayExpr, CompileError> {
        let mut total = DelayExpr::zero();
        for stmt in body {
            let delay = self.stmt_delay(stmt)?;
            if let Some(ret) = self.returned_at
                && !delay.is_zero()
                && !matches!(stmt.node, Stmt::Return(_))
            {
                return Err(CompileError::timing("return statement followed by code with nonzero delay", stmt.span)
                    .with_note("function may return here", ret));
            }
            total = DelayExpr::add(total, delay);
        }
        Ok(total)
    }

    /// The delay of one statement. Inside an interleave region a statement
    /// whose delay cannot be determined is an error.
    pub(super) fn stmt_delay(&mut self, stmt: &Spanned<Stmt>) -> Result<DelayExpr, CompileError> {
        let delay = self.stmt_delay_inner(stmt)?;
        if self.region > 0
            && let Some(reason) = delay.indeterminate_reason()
        {
            return Err(CompileError::timing(
                format!("cannot determine the delay of this statement: {}", reason),
                stmt.span,
            ));
        }
        Ok(delay)
    }

    fn stmt_delay_inner(&mut self, stmt: &Spanned<Stmt>) -> Result<DelayExpr, CompileError> {
        match &stmt.node {
            Stmt::Expr(e) => self.expr_delay(e),
            Stmt::Assign { targets, value } => {
                let mut total = self.expr_delay(value)?;
                for target in targets {
                    total = DelayExpr::add(total, self.expr_delay(target)?);
                }
                Ok(total)
            }
            Stmt::AugAssign { target, value, .. } => {
                Ok(DelayExpr::add(self.expr_delay(target)?, self.expr_delay(value)?))
            }
            Stmt::Pass
            | Stmt::Break
            | Stmt::Continue
            | Stmt::Nonlocal(_)
            | Stmt::Global(_)
            | Stmt::FunctionDef(_)
            | Stmt::ClassDef(_) => Ok(DelayExpr::zero()),
            Stmt::Return(value) => {
                let delay = match value {
                    Some(v) => self.expr_delay(v)?,
                    None => DelayExpr::zero(),
                };
                self.returned_at.get_or_insert(stmt.span);
                Ok(delay)
            }
            Stmt::Raise(value) => match value {
                Some(v) => self.expr_delay(v),
                None => Ok(DelayExpr::zero()),
            },
            Stmt::If { test, body, orelse } => {
                self.not_interleaved("if statement", stmt.span)?;
                let test = self.expr_delay(test)?;
                let (then, other) = self.arms(body, orelse)?;
                let arms = match DelayExpr::const_difference(&then, &other) {
                    Some(0) => then,
                    _ => DelayExpr::indeterminate("if statement arms have different delays"),
                };
                Ok(DelayExpr::add(test, arms))
            }
            Stmt::While { test, body, orelse } => {
                self.not_interleaved("while statement", stmt.span)?;
                let test = self.expr_delay(test)?;
                let body = self.body_delay(body)?;
                if !test.is_zero() || !body.is_zero() {
                    return Ok(DelayExpr::indeterminate("while loop with nonzero delay"));
                }
                self.body_delay(orelse)
            }
            Stmt::Try { body, handlers, orelse, finalbody } => {
                self.not_interleaved("try statement", stmt.span)?;
                let mut zero = self.body_delay(body)?.is_zero();
                let before = self.returned_at;
                let mut returned = before;
                for handler in handlers {
                    self.returned_at = before;
                    zero &= self.body_delay(&handler.node.body)?.is_zero();
                    returned = returned.or(self.returned_at);
                }
                self.returned_at = returned;
                zero &= self.body_delay(orelse)?.is_zero();
                let finally = self.body_delay(finalbody)?;
                if zero {
                    Ok(finally)
                } else {
                    Ok(DelayExpr::indeterminate("try statement with nonzero delay"))
                }
            }
            Stmt::For { iter, body, orelse, .. } => self.for_delay(iter, body, orelse, stmt.span),
            Stmt::With { items, body } => match stmt.node.timing_block() {
                Some(TimingBlock::Interleave) => self.region_delay(stmt, body),
                Some(TimingBlock::Sequential) => self.body_delay(body),
                None => {
                    let mut total = DelayExpr::zero();
                    for item in items {
                        total = DelayExpr::add(total, self.expr_delay(&item.node.context)?);
                        total = DelayExpr::add(total, self.context_method_delay(item, "__enter__"));
                    }
                    total = DelayExpr::add(total, self.body_delay(body)?);
                    for item in items.iter().rev() {
                        total = DelayExpr::add(total, self.context_method_delay(item, "__exit__"));
                    }
                    Ok(total)
                }
            },
        }
    }

    fn not_interleaved(&self, what: &str, span: Span) -> Result<(), CompileError> {
        if self.region > 0 {
            return Err(CompileError::control_flow(format!("{} cannot be interleaved", what), span));
        }
        Ok(())
    }

    /// Walk the two arms of a branch; a `return` in either counts afterwards.
    fn arms(
        &mut self,
        body: &[Spanned<Stmt>],
        orelse: &[Spanned<Stmt>],
    ) -> Result<(DelayExpr, DelayExpr), CompileError> {
        let before = self.returned_at;
        let then = self.body_delay(body)?;
        let after_then = self.returned_at;
        self.returned_at = before;
        let other = self.body_delay(orelse)?;
        self.returned_at = after_then.or(self.returned_at);
        Ok((then, other))
    }

    fn context_method_delay(&mut self, item: &Spanned<WithItem>, method: &str) -> DelayExpr {
        let env = self.sched.env;
        let Some(crate::typeck::types::Ty::Instance(class)) = env.expr_ty(item.node.context.id) else {
            return DelayExpr::zero();
        };
        match env.classes.get(&class.id).and_then(|c| c.method(method)) {
            Some(def) => self.sched.function_delay(def),
            None => DelayExpr::zero(),
        }
    }

    fn for_delay(
        &mut self,
        iter: &Spanned<Expr>,
        body: &[Spanned<Stmt>],
        orelse: &[Spanned<Stmt>],
        span: Span,
    ) -> Result<DelayExpr, CompileError> {
        let exits_early = loop_exits_early(body);
        if exits_early && self.region > 0 {
            return Err(CompileError::timing("cannot analyze loop trip count", span)
                .with_note("the loop can exit through `break` or `continue`", span));
        }
        let iter_delay = self.expr_delay(iter)?;
        let per_iteration = self.body_delay(body)?;
        let else_delay = self.body_delay(orelse)?;

        let loop_delay = if per_iteration.is_zero() {
            DelayExpr::zero()
        } else if exits_early {
            DelayExpr::indeterminate("loop may exit early")
        } else {
            match self.trip_count(iter) {
                Some(count) => DelayExpr::mul(per_iteration, count),
                None if self.region > 0 => {
                    return Err(CompileError::timing("cannot analyze loop trip count", iter.span));
                }
                None => DelayExpr::indeterminate("cannot analyze loop trip count"),
            }
        };
        Ok(DelayExpr::sum([iter_delay, loop_delay, else_delay]))
    }

    /// Iterations of a `for` over `range(...)` or a literal list/tuple.
    fn trip_count(&mut self, iter: &Spanned<Expr>) -> Option<DelayExpr> {
        match &iter.node {
            Expr::List(elts) | Expr::Tuple(elts) => Some(DelayExpr::Const(elts.len() as i64)),
            Expr::Call { args, keywords, .. }
                if keywords.is_empty()
                    && matches!(self.sched.env.call(iter.id), Some(CallTarget::Builtin(b)) if b == "range") =>
            {
                let operand = |walk: &Self, e: &Spanned<Expr>| {
                    let d = walk.operand(e);
                    (!d.is_indeterminate()).then_some(d)
                };
                let (start, stop, step) = match args.as_slice() {
                    [stop] => (DelayExpr::zero(), operand(self, stop)?, 1),
                    [start, stop] => (operand(self, start)?, operand(self, stop)?, 1),
                    [start, stop, step] => (operand(self, start)?, operand(self, stop)?, operand(self, step)?.as_const()?),
                    _ => return None,
                };
                let span = match step {
                    0 => return None,
                    s if s > 0 => DelayExpr::sub(stop, start),
                    _ => DelayExpr::sub(start, stop),
                };
                let step = DelayExpr::Const(step.abs());
                let rounded_up = DelayExpr::add(span, DelayExpr::sub(step.clone(), DelayExpr::Const(1)));
                Some(DelayExpr::max(vec![DelayExpr::zero(), DelayExpr::floor_div(rounded_up, step)]))
            }
            _ => None,
        }
    }

    /// A delay operand: literals, unmodified parameters of the current
    /// function, and `+ - * // /` over those.
    pub(super) fn operand(&self, expr: &Spanned<Expr>) -> DelayExpr {
        match &expr.node {
            Expr::Int(n) => DelayExpr::Const(*n),
            Expr::Name(n) if self.params.contains(n) => DelayExpr::arg(n.clone()),
            Expr::Name(n) => DelayExpr::indeterminate(format!("'{}' is not a parameter of the function", n)),
            Expr::BinOp { op, lhs, rhs } => {
                let (a, b) = (self.operand(lhs), self.operand(rhs));
                match op {
                    BinOp::Add => DelayExpr::add(a, b),
                    BinOp::Sub => DelayExpr::sub(a, b),
                    BinOp::Mul => DelayExpr::mul(a, b),
                    BinOp::FloorDiv => DelayExpr::floor_div(a, b),
                    BinOp::Div => DelayExpr::div(a, b),
                    other => DelayExpr::indeterminate(format!("operator '{}' in a delay", other.symbol())),
                }
            }
            Expr::UnaryOp { op: UnaryOp::Neg, operand } => DelayExpr::sub(DelayExpr::zero(), self.operand(operand)),
            Expr::UnaryOp { op: UnaryOp::Pos, operand } => self.operand(operand),
            Expr::Call { func, args, .. }
                if args.len() == 1
                    && matches!(&func.node, Expr::Name(n) if n == "int" || n == "int32" || n == "int64")
                    && matches!(self.sched.env.call(expr.id), Some(CallTarget::Builtin(_))) =>
            {
                self.operand(&args[0])
            }
            _ => DelayExpr::indeterminate("delay operand is not a constant or parameter expression"),
        }
    }

    /// The delay of evaluating an expression: the calls it makes, left to
    /// right.
    pub(super) fn expr_delay(&mut self, expr: &Spanned<Expr>) -> Result<DelayExpr, CompileError> {
        match &expr.node {
            Expr::Int(_)
            | Expr::Float(_)
            | Expr::Bool(_)
            | Expr::Str(_)
            | Expr::Bytes(_)
            | Expr::NoneLit
            | Expr::Name(_)
            | Expr::Lambda { .. } => Ok(DelayExpr::zero()),
            Expr::BinOp { lhs, rhs, .. } => Ok(DelayExpr::add(self.expr_delay(lhs)?, self.expr_delay(rhs)?)),
            Expr::UnaryOp { operand, .. } => self.expr_delay(operand),
            Expr::BoolOp { values, .. } | Expr::List(values) | Expr::Tuple(values) => self.sum_delays(values),
            Expr::Compare { lhs, ops } => {
                let mut total = self.expr_delay(lhs)?;
                for (_, rhs) in ops {
                    total = DelayExpr::add(total, self.expr_delay(rhs)?);
                }
                Ok(total)
            }
            Expr::Attribute { value, .. } => self.expr_delay(value),
            Expr::Subscript { value, index } => Ok(DelayExpr::add(self.expr_delay(value)?, self.expr_delay(index)?)),
            Expr::IfExp { test, body, orelse } => {
                self.not_interleaved("if expression", expr.span)?;
                let test = self.expr_delay(test)?;
                let (a, b) = (self.expr_delay(body)?, self.expr_delay(orelse)?);
                let arms = match DelayExpr::const_difference(&a, &b) {
                    Some(0) => a,
                    _ => DelayExpr::indeterminate("if expression arms have different delays"),
                };
                Ok(DelayExpr::add(test, arms))
            }
            Expr::Call { func, args, keywords } => {
                let mut total = self.expr_delay(func)?;
                total = DelayExpr::add(total, self.sum_delays(args)?);
                for kw in keywords {
                    total = DelayExpr::add(total, self.expr_delay(&kw.value)?);
                }
                let call = self.call_delay(expr, args, keywords)?;
                Ok(DelayExpr::add(total, call))
            }
        }
    }

    fn sum_delays(&mut self, exprs: &[Spanned<Expr>]) -> Result<DelayExpr, CompileError> {
        let mut total = DelayExpr::zero();
        for e in exprs {
            total = DelayExpr::add(total, self.expr_delay(e)?);
        }
        Ok(total)
    }

    /// The delay of the call itself, not counting argument evaluation.
    fn call_delay(
        &mut self,
        call: &Spanned<Expr>,
        args: &[Spanned<Expr>],
        keywords: &[Keyword],
    ) -> Result<DelayExpr, CompileError> {
        let Some(target) = self.sched.env.call(call.id).cloned() else {
            return Ok(DelayExpr::zero());
        };
        match target {
            CallTarget::Builtin(name) => self.builtin_delay(&name, call, args),
            CallTarget::Exception(_) => Ok(DelayExpr::zero()),
            CallTarget::Function { def, bound } => self.inline_call(def, bound, args, keywords, call.span),
            CallTarget::Constructor { init: Some(init), .. } => self.inline_call(init, true, args, keywords, call.span),
            CallTarget::Constructor { init: None, .. } => Ok(DelayExpr::zero()),
            CallTarget::Dynamic { delay } => {
                if self.region > 0 {
                    return Err(CompileError::timing(
                        "compiler could not prove the same function would always be called",
                        call.span,
                    ));
                }
                let Some(var) = delay else {
                    return Ok(DelayExpr::indeterminate("dynamic call"));
                };
                let candidates: Vec<NodeId> = self.sched.env.functions_with_delay(var).collect();
                for &candidate in &candidates {
                    self.sched.function_delay(candidate);
                }
                match (self.sched.delay_vars.probe(var), candidates.first()) {
                    (Some(delay), Some(&first)) => {
                        let substitution = self.bind_arguments(first, false, args, keywords);
                        Ok(delay.subst(&substitution))
                    }
                    _ => Ok(DelayExpr::indeterminate("dynamic call")),
                }
            }
        }
    }

    fn builtin_delay(
        &mut self,
        name: &str,
        call: &Spanned<Expr>,
        args: &[Spanned<Expr>],
    ) -> Result<DelayExpr, CompileError> {
        let delay = match (name, args) {
            ("delay_mu", [ticks]) => self.operand(ticks),
            ("delay", [seconds]) => match fold_seconds(&seconds.node) {
                Some(s) => DelayExpr::Const((s * self.sched.config.ticks_per_second as f64).round() as i64),
                None => DelayExpr::indeterminate("delay() argument is not a compile-time constant"),
            },
            ("at_mu", _) => DelayExpr::indeterminate("at_mu() moves the timeline to a runtime value"),
            _ => return Ok(DelayExpr::zero()),
        };
        if let Some(ticks) = delay.as_const()
            && ticks < 0
        {
            return Err(CompileError::timing(format!("negative delay of {} ticks", ticks), call.span));
        }
        Ok(delay)
    }

    /// Inline a static callee's delay with its parameters bound to the
    /// caller's arguments.
    fn inline_call(
        &mut self,
        def: NodeId,
        bound: bool,
        args: &[Spanned<Expr>],
        keywords: &[Keyword],
        span: Span,
    ) -> Result<DelayExpr, CompileError> {
        let callee = self.sched.function_delay(def);
        if self.sched.diags.is_failed(def) {
            let name = self.sched.scopes.get(def).map(|s| s.name.clone()).unwrap_or_default();
            if self.region > 0 {
                return Err(CompileError::timing(
                    format!("cannot schedule a call to '{}', which has errors", name),
                    span,
                ));
            }
            return Ok(DelayExpr::indeterminate(format!("call to '{}', which has errors", name)));
        }
        if callee.as_const().is_some() || callee.is_indeterminate() {
            return Ok(callee);
        }
        let substitution = self.bind_arguments(def, bound, args, keywords);
        Ok(callee.subst(&substitution))
    }

    /// Map the callee's parameters to delay operands of the call's arguments.
    /// Omitted parameters take their defaults.
    fn bind_arguments(
        &self,
        def: NodeId,
        bound: bool,
        args: &[Spanned<Expr>],
        keywords: &[Keyword],
    ) -> BTreeMap<String, DelayExpr> {
        let mut out = BTreeMap::new();
        let Some(body) = self.sched.bodies.get(&def) else { return out };
        let params = body.params();
        let offset = usize::from(bound);
        for (i, param) in params.iter().enumerate() {
            let name = &param.name.node;
            let value = if i >= offset
                && let Some(arg) = args.get(i - offset)
            {
                self.operand(arg)
            } else if let Some(kw) = keywords.iter().find(|k| &k.name.node == name) {
                self.operand(&kw.value)
            } else if let Some(default) = &param.default {
                constant_operand(default)
            } else {
                DelayExpr::indeterminate(format!("no value for parameter '{}'", name))
            };
            out.insert(name.clone(), value);
        }
        out
    }
}

/// A default value as a delay operand; only literal arithmetic qualifies.
fn constant_operand(expr: &Spanned<Expr>) -> DelayExpr {
    match &expr.node {
        Expr::Int(n) => DelayExpr::Const(*n),
        Expr::BinOp { op, lhs, rhs } => {
            let (a, b) = (constant_operand(lhs), constant_operand(rhs));
            match op {
                BinOp::Add => DelayExpr::add(a, b),
                BinOp::Sub => DelayExpr::sub(a, b),
                BinOp::Mul => DelayExpr::mul(a, b),
                BinOp::FloorDiv => DelayExpr::floor_div(a, b),
                BinOp::Div => DelayExpr::div(a, b),
                _ => DelayExpr::indeterminate("default value is not a constant"),
            }
        }
        Expr::UnaryOp { op: UnaryOp::Neg, operand } => DelayExpr::sub(DelayExpr::zero(), constant_operand(operand)),
        _ => DelayExpr::indeterminate("default value is not a constant"),
    }
}

/// Fold a `delay()` operand to seconds.
fn fold_seconds(expr: &Expr) -> Option<f64> {
    match expr {
        Expr::Int(n) => Some(*n as f64),
        Expr::Float(f) => Some(*f),
        Expr::UnaryOp { op: UnaryOp::Neg, operand } => fold_seconds(&operand.node).map(|v| -v),
        Expr::UnaryOp { op: UnaryOp::Pos, operand } => fold_seconds(&operand.node),
        Expr::BinOp { op, lhs, rhs } => {
            let (a, b) = (fold_seconds(&lhs.node)?, fold_seconds(&rhs.node)?);
            match op {
                BinOp::Add => Some(a + b),
                BinOp::Sub => Some(a - b),
                BinOp::Mul => Some(a * b),
                BinOp::Div if b != 0.0 => Some(a / b),
                _ => None,
            }
        }
        _ => None,
    }
}
