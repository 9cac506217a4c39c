use std::collections::{BTreeMap, BTreeSet};

use crate::ast::*;
use crate::delay::Schedule;
use crate::diagnostics::CompileError;
use crate::exceptions::ExceptionKind;
use crate::scope::{FunctionBody, Scopes};
use crate::span::{NodeId, Span, Spanned};
use crate::typeck::env::TypeEnv;
use crate::typeck::types::Ty;
use crate::visit::composers::NodeIndex;

use super::{BasicBlock, BlockId, ControlGraph, Instr, Pending, Terminator};

/// A construct an abrupt transfer has to leave on its way out.
#[derive(Debug, Clone)]
enum Region {
    Loop { stmt: NodeId, break_bb: BlockId, continue_bb: BlockId },
    Finally { try_stmt: NodeId, entry_bb: BlockId, pending: BTreeSet<Pending> },
    Handler(NodeId),
    Context(NodeId),
}

struct PartialBlock {
    instrs: Vec<Instr>,
    term: Option<Terminator>,
    unwind: Option<BlockId>,
}

struct LowerContext<'a> {
    env: &'a TypeEnv,
    scopes: &'a Scopes,
    schedules: &'a BTreeMap<NodeId, Schedule>,
    index: NodeIndex<'a>,
    blocks: Vec<PartialBlock>,
    current: BlockId,
    /// Landing target for blocks created from here on.
    unwind: Option<BlockId>,
    /// Enclosing loops, handlers, context managers and `finally` bodies,
    /// innermost last.
    regions: Vec<Region>,
}

/// Lower one function body.
pub fn lower_function(
    function: NodeId,
    body: FunctionBody<'_>,
    env: &TypeEnv,
    scopes: &Scopes,
    schedules: &BTreeMap<NodeId, Schedule>,
) -> Result<ControlGraph, CompileError> {
    let index = match body {
        FunctionBody::Def(def) => NodeIndex::of_body(&def.body),
        FunctionBody::Lambda { body, .. } => NodeIndex::of_expr(body),
    };
    let mut ctx = LowerContext {
        env,
        scopes,
        schedules,
        index,
        blocks: Vec::new(),
        current: BlockId(0),
        unwind: None,
        regions: Vec::new(),
    };
    let entry = ctx.create_block();
    ctx.switch_to_block(entry);
    match body {
        FunctionBody::Def(def) => {
            ctx.lower_body(&def.body)?;
            if !ctx.terminated() {
                ctx.emit(Instr::SetReturn(None));
                ctx.terminate(Terminator::Return);
            }
        }
        FunctionBody::Lambda { body, .. } => {
            ctx.emit(Instr::SetReturn(Some(body.id)));
            ctx.terminate(Terminator::Return);
        }
    }
    let graph = ctx.finish(function);
    tracing::trace!(function = ?function, blocks = graph.blocks.len(), "lowered function");
    Ok(graph)
}

impl<'a> LowerContext<'a> {
    fn create_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(PartialBlock { instrs: Vec::new(), term: None, unwind: self.unwind });
        id
    }

    fn switch_to_block(&mut self, id: BlockId) {
        self.current = id;
    }

    fn partial(&mut self, id: BlockId) -> &mut PartialBlock {
        &mut self.blocks[id.0 as usize]
    }

    fn terminated(&self) -> bool {
        self.blocks[self.current.0 as usize].term.is_some()
    }

    fn emit(&mut self, instr: Instr) {
        let current = self.current;
        let block = self.partial(current);
        if block.term.is_none() {
            block.instrs.push(instr);
        }
    }

    fn terminate(&mut self, term: Terminator) {
        let current = self.current;
        let block = self.partial(current);
        if block.term.is_none() {
            block.term = Some(term);
        }
    }

    /// Jump to `target` unless the current block already ended.
    fn goto(&mut self, target: BlockId) {
        self.terminate(Terminator::Goto(target));
    }

    fn lower_body(&mut self, body: &'a [Spanned<Stmt>]) -> Result<(), CompileError> {
        for stmt in body {
            if self.terminated() {
                break;
            }
            self.lower_stmt(stmt)?;
        }
        Ok(())
    }

    fn lower_stmt(&mut self, stmt: &'a Spanned<Stmt>) -> Result<(), CompileError> {
        match &stmt.node {
            Stmt::Expr(_)
            | Stmt::Assign { .. }
            | Stmt::AugAssign { .. }
            | Stmt::Pass
            | Stmt::FunctionDef(_)
            | Stmt::ClassDef(_) => self.emit(Instr::Exec(stmt.id)),
            Stmt::Nonlocal(_) | Stmt::Global(_) => {}
            Stmt::If { test, body, orelse } => self.lower_if(test, body, orelse)?,
            Stmt::While { test, body, orelse } => self.lower_while(stmt.id, test, body, orelse)?,
            Stmt::For { body, orelse, .. } => self.lower_for(stmt.id, body, orelse)?,
            Stmt::Return(value) => {
                self.emit(Instr::SetReturn(value.as_ref().map(|v| v.id)));
                self.transfer(Pending::Return);
            }
            Stmt::Break => {
                let target = self.innermost_loop().ok_or_else(|| CompileError::control_flow("'break' outside loop", stmt.span))?;
                self.transfer(Pending::Break(target));
            }
            Stmt::Continue => {
                let target = self
                    .innermost_loop()
                    .ok_or_else(|| CompileError::control_flow("'continue' not properly in loop", stmt.span))?;
                self.transfer(Pending::Continue(target));
            }
            Stmt::Raise(value) => {
                self.terminate(Terminator::Raise { stmt: stmt.id, value: value.as_ref().map(|v| v.id) });
            }
            Stmt::Try { body, handlers, orelse, finalbody } => {
                self.lower_try(stmt.id, body, handlers, orelse, finalbody)?
            }
            Stmt::With { items, body } => match stmt.node.timing_block() {
                Some(TimingBlock::Interleave) => self.lower_region(stmt.id, stmt.span, body)?,
                Some(TimingBlock::Sequential) => self.lower_body(body)?,
                None => {
                    let accepts = items.iter().map(|item| self.exit_accepts_exception(item)).collect::<Result<Vec<_>, _>>()?;
                    self.lower_context(items, &accepts, body)?;
                }
            },
        }
        Ok(())
    }

    fn innermost_loop(&self) -> Option<NodeId> {
        self.regions.iter().rev().find_map(|r| match r {
            Region::Loop { stmt, .. } => Some(*stmt),
            _ => None,
        })
    }

    /// Leave regions from the innermost outward until the transfer lands:
    /// at its loop, at a `finally` that takes it over, or out of the function.
    fn transfer(&mut self, pending: Pending) {
        for i in (0..self.regions.len()).rev() {
            match self.regions[i].clone() {
                Region::Loop { stmt, break_bb, continue_bb } => match &pending {
                    Pending::Break(target) if *target == stmt => return self.goto(break_bb),
                    Pending::Continue(target) if *target == stmt => return self.goto(continue_bb),
                    _ => {}
                },
                Region::Handler(handler) => self.emit(Instr::ExitHandler(handler)),
                Region::Context(item) => self.emit(Instr::ExitContext { item, exception: false }),
                Region::Finally { try_stmt, entry_bb, .. } => {
                    if let Region::Finally { pending: registered, .. } = &mut self.regions[i] {
                        registered.insert(pending.clone());
                    }
                    return self.terminate(Terminator::EnterFinally { try_stmt, entry: entry_bb, pending });
                }
            }
        }
        match pending {
            Pending::Return => self.terminate(Terminator::Return),
            _ => self.terminate(Terminator::Unreachable),
        }
    }

    fn lower_if(
        &mut self,
        test: &'a Spanned<Expr>,
        body: &'a [Spanned<Stmt>],
        orelse: &'a [Spanned<Stmt>],
    ) -> Result<(), CompileError> {
        let then_bb = self.create_block();
        let merge_bb = self.create_block();
        let else_bb = if orelse.is_empty() { merge_bb } else { self.create_block() };
        self.terminate(Terminator::Branch { cond: test.id, then: then_bb, other: else_bb });

        self.switch_to_block(then_bb);
        self.lower_body(body)?;
        self.goto(merge_bb);

        if !orelse.is_empty() {
            self.switch_to_block(else_bb);
            self.lower_body(orelse)?;
            self.goto(merge_bb);
        }
        self.switch_to_block(merge_bb);
        Ok(())
    }

    fn lower_while(
        &mut self,
        stmt: NodeId,
        test: &'a Spanned<Expr>,
        body: &'a [Spanned<Stmt>],
        orelse: &'a [Spanned<Stmt>],
    ) -> Result<(), CompileError> {
        let header_bb = self.create_block();
        let body_bb = self.create_block();
        let exit_bb = self.create_block();
        let else_bb = if orelse.is_empty() { exit_bb } else { self.create_block() };
        self.goto(header_bb);

        self.switch_to_block(header_bb);
        self.terminate(Terminator::Branch { cond: test.id, then: body_bb, other: else_bb });

        self.switch_to_block(body_bb);
        self.regions.push(Region::Loop { stmt, break_bb: exit_bb, continue_bb: header_bb });
        let result = self.lower_body(body);
        self.regions.pop();
        result?;
        self.goto(header_bb);

        // The else clause runs outside the loop: `break` there targets the
        // enclosing loop.
        if !orelse.is_empty() {
            self.switch_to_block(else_bb);
            self.lower_body(orelse)?;
            self.goto(exit_bb);
        }
        self.switch_to_block(exit_bb);
        Ok(())
    }

    fn lower_for(
        &mut self,
        stmt: NodeId,
        body: &'a [Spanned<Stmt>],
        orelse: &'a [Spanned<Stmt>],
    ) -> Result<(), CompileError> {
        self.emit(Instr::IterInit(stmt));
        let header_bb = self.create_block();
        let body_bb = self.create_block();
        let exit_bb = self.create_block();
        let else_bb = if orelse.is_empty() { exit_bb } else { self.create_block() };
        self.goto(header_bb);

        self.switch_to_block(header_bb);
        self.terminate(Terminator::Iterate { stmt, body: body_bb, exhausted: else_bb });

        self.switch_to_block(body_bb);
        self.emit(Instr::BindNext(stmt));
        self.regions.push(Region::Loop { stmt, break_bb: exit_bb, continue_bb: header_bb });
        let result = self.lower_body(body);
        self.regions.pop();
        result?;
        self.goto(header_bb);

        if !orelse.is_empty() {
            self.switch_to_block(else_bb);
            self.lower_body(orelse)?;
            self.goto(exit_bb);
        }
        self.switch_to_block(exit_bb);
        Ok(())
    }

    fn lower_try(
        &mut self,
        try_stmt: NodeId,
        body: &'a [Spanned<Stmt>],
        handlers: &'a [Spanned<ExceptHandler>],
        orelse: &'a [Spanned<Stmt>],
        finalbody: &'a [Spanned<Stmt>],
    ) -> Result<(), CompileError> {
        let outer_unwind = self.unwind;
        let after_bb = self.create_block();
        let finally_bb = (!finalbody.is_empty()).then(|| self.create_block());

        // Where exceptions escaping the handlers or the else clause go.
        let escape = match finally_bb {
            Some(entry) => {
                let raise_bb = self.create_block();
                self.partial(raise_bb).term = Some(Terminator::EnterFinally { try_stmt, entry, pending: Pending::Raise });
                let mut pending = BTreeSet::new();
                pending.insert(Pending::Raise);
                self.regions.push(Region::Finally { try_stmt, entry_bb: entry, pending });
                Some(raise_bb)
            }
            None => outer_unwind,
        };
        let landing_bb = if handlers.is_empty() {
            None
        } else {
            self.unwind = escape;
            Some(self.create_block())
        };

        self.unwind = landing_bb.or(escape);
        let body_bb = self.create_block();
        self.goto(body_bb);
        self.switch_to_block(body_bb);
        let result = self.lower_body(body);
        self.unwind = escape;
        result?;
        if !self.terminated() && !orelse.is_empty() {
            let else_bb = self.create_block();
            self.goto(else_bb);
            self.switch_to_block(else_bb);
            self.lower_body(orelse)?;
        }
        self.leave_try(finally_bb.map(|entry| (try_stmt, entry)), after_bb);

        if let Some(landing) = landing_bb {
            let mut dispatch = Vec::with_capacity(handlers.len());
            for handler in handlers {
                let kind = self.env.handlers.get(&handler.id).cloned().flatten();
                self.unwind = escape;
                let cleanup_bb = self.create_block();
                let cleanup = self.partial(cleanup_bb);
                cleanup.instrs.push(Instr::ExitHandler(handler.id));
                cleanup.term = Some(Terminator::Propagate);

                self.unwind = Some(cleanup_bb);
                let handler_bb = self.create_block();
                self.switch_to_block(handler_bb);
                self.emit(Instr::EnterHandler(handler.id));
                self.regions.push(Region::Handler(handler.id));
                let result = self.lower_body(&handler.node.body);
                self.regions.pop();
                self.unwind = escape;
                result?;
                if !self.terminated() {
                    self.emit(Instr::ExitHandler(handler.id));
                    self.leave_try(finally_bb.map(|entry| (try_stmt, entry)), after_bb);
                }
                dispatch.push((kind, handler_bb));
            }
            // Exact kinds before catch-alls; the sort is stable, so equally
            // specific handlers stay in declaration order.
            dispatch.sort_by_key(|(kind, _)| kind.as_ref().is_none_or(ExceptionKind::is_catch_all));
            self.partial(landing).term = Some(Terminator::Dispatch { try_stmt, handlers: dispatch, unmatched: escape });
        }

        if let Some(entry) = finally_bb {
            let pending = match self.regions.pop() {
                Some(Region::Finally { pending, .. }) => pending,
                _ => BTreeSet::new(),
            };
            self.unwind = outer_unwind;
            self.switch_to_block(entry);
            self.lower_body(finalbody)?;
            if !self.terminated() {
                let from = self.current;
                let mut targets = Vec::with_capacity(pending.len());
                for p in pending {
                    let target = match &p {
                        Pending::FallThrough => after_bb,
                        Pending::Raise => {
                            let bb = self.create_block();
                            self.partial(bb).term = Some(Terminator::Propagate);
                            bb
                        }
                        other => {
                            let bb = self.create_block();
                            self.switch_to_block(bb);
                            self.transfer(other.clone());
                            bb
                        }
                    };
                    targets.push((p, target));
                }
                self.switch_to_block(from);
                self.terminate(Terminator::ResumeAfterFinally { try_stmt, targets });
            }
        }

        self.unwind = outer_unwind;
        self.switch_to_block(after_bb);
        Ok(())
    }

    /// Normal completion of a try body, else clause or handler: through the
    /// `finally` of this `try` when it has one.
    fn leave_try(&mut self, finally: Option<(NodeId, BlockId)>, after_bb: BlockId) {
        if self.terminated() {
            return;
        }
        match finally {
            Some((try_stmt, entry)) => {
                if let Some(Region::Finally { pending, .. }) = self.regions.last_mut() {
                    pending.insert(Pending::FallThrough);
                }
                self.terminate(Terminator::EnterFinally { try_stmt, entry, pending: Pending::FallThrough });
            }
            None => self.goto(after_bb),
        }
    }

    /// `__exit__` takes the exception only when declared with the full
    /// `(self, exc_type, exc_value, traceback)` signature.
    fn exit_accepts_exception(&self, item: &Spanned<WithItem>) -> Result<bool, CompileError> {
        let Some(Ty::Instance(class)) = self.env.expr_ty(item.node.context.id) else {
            return Ok(false);
        };
        let Some(info) = self.env.classes.get(&class.id) else { return Ok(false) };
        let arity = |name: &str| -> Option<(usize, Span)> {
            let def = info.method(name)?;
            let scope = self.scopes.get(def)?;
            Some((scope.params.len(), scope.span))
        };
        if let Some((n, span)) = arity("__enter__")
            && n != 1
        {
            return Err(CompileError::control_flow("__enter__ must take only self", span)
                .with_note("used as a context manager here", item.span));
        }
        match arity("__exit__") {
            Some((1, _)) | None => Ok(false),
            Some((4, _)) => Ok(true),
            Some((_, span)) => Err(CompileError::control_flow(
                "__exit__ must take self or (self, exc_type, exc_value, traceback)",
                span,
            )
            .with_note("used as a context manager here", item.span)),
        }
    }

    /// Nest one context per item; `__exit__` runs on every way out.
    fn lower_context(
        &mut self,
        items: &'a [Spanned<WithItem>],
        accepts: &[bool],
        body: &'a [Spanned<Stmt>],
    ) -> Result<(), CompileError> {
        let (Some((item, rest)), Some((&exception, accepts_rest))) = (items.split_first(), accepts.split_first()) else {
            return self.lower_body(body);
        };
        self.emit(Instr::EnterContext(item.id));
        let outer_unwind = self.unwind;
        let cleanup_bb = self.create_block();
        let cleanup = self.partial(cleanup_bb);
        cleanup.instrs.push(Instr::ExitContext { item: item.id, exception });
        cleanup.term = Some(Terminator::Propagate);

        self.unwind = Some(cleanup_bb);
        let inner_bb = self.create_block();
        self.goto(inner_bb);
        self.switch_to_block(inner_bb);
        self.regions.push(Region::Context(item.id));
        let result = self.lower_context(rest, accepts_rest, body);
        self.regions.pop();
        self.unwind = outer_unwind;
        result?;

        if !self.terminated() {
            let exit_bb = self.create_block();
            self.goto(exit_bb);
            self.switch_to_block(exit_bb);
            self.emit(Instr::ExitContext { item: item.id, exception: false });
        }
        Ok(())
    }

    /// Replay a scheduled interleave region in merged order.
    fn lower_region(&mut self, region: NodeId, span: Span, body: &'a [Spanned<Stmt>]) -> Result<(), CompileError> {
        let Some(schedule) = self.schedules.get(&region) else {
            return self.lower_body(body);
        };
        self.emit(Instr::SaveTime(region));
        for entry in &schedule.entries {
            if self.terminated() {
                break;
            }
            let Some(stmt) = self.index.stmt(entry.stmt) else {
                return Err(CompileError::control_flow(
                    format!("internal error: scheduled statement #{} is not in the function body", entry.stmt.0),
                    span,
                ));
            };
            self.emit(Instr::AtOffset { region, offset: entry.start.clone() });
            self.lower_stmt(stmt)?;
        }
        self.emit(Instr::RestoreTime { region, advance: schedule.delay.clone() });
        Ok(())
    }

    /// Seal every block and drop the ones control never reaches.
    fn finish(self, function: NodeId) -> ControlGraph {
        let raw = ControlGraph {
            function,
            entry: BlockId(0),
            blocks: self
                .blocks
                .into_iter()
                .enumerate()
                .map(|(i, b)| BasicBlock {
                    id: BlockId(i as u32),
                    instrs: b.instrs,
                    term: b.term.unwrap_or(Terminator::Unreachable),
                    unwind: b.unwind,
                })
                .collect(),
        };
        let live = raw.reachable();
        let remap: BTreeMap<BlockId, BlockId> =
            live.iter().enumerate().map(|(new, old)| (*old, BlockId(new as u32))).collect();
        let map = |b: &BlockId| remap.get(b).copied().unwrap_or(*b);
        let blocks = raw
            .blocks
            .into_iter()
            .filter(|b| live.contains(&b.id))
            .map(|b| {
                let term = match b.term {
                    Terminator::Goto(t) => Terminator::Goto(map(&t)),
                    Terminator::Branch { cond, then, other } => Terminator::Branch { cond, then: map(&then), other: map(&other) },
                    Terminator::Iterate { stmt, body, exhausted } => {
                        Terminator::Iterate { stmt, body: map(&body), exhausted: map(&exhausted) }
                    }
                    Terminator::Dispatch { try_stmt, handlers, unmatched } => Terminator::Dispatch {
                        try_stmt,
                        handlers: handlers.into_iter().map(|(k, t)| (k, map(&t))).collect(),
                        unmatched: unmatched.as_ref().map(map),
                    },
                    Terminator::EnterFinally { try_stmt, entry, pending } => {
                        Terminator::EnterFinally { try_stmt, entry: map(&entry), pending }
                    }
                    Terminator::ResumeAfterFinally { try_stmt, targets } => Terminator::ResumeAfterFinally {
                        try_stmt,
                        targets: targets.into_iter().map(|(p, t)| (p, map(&t))).collect(),
                    },
                    other => other,
                };
                BasicBlock {
                    id: map(&b.id),
                    instrs: b.instrs,
                    term,
                    unwind: b.unwind.filter(|u| live.contains(u)).as_ref().map(map),
                }
            })
            .collect();
        ControlGraph { function, entry: BlockId(0), blocks }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build::AstBuilder;
    use crate::config::CompilerConfig;
    use crate::delay::{DelayExpr, ScheduleEntry};
    use crate::diagnostics::Diagnostics;
    use crate::exceptions::ExceptionRegistry;
    use crate::scope::{function_bodies, resolve_module};
    use crate::typeck::type_check;

    #[test]
    fn schedule_naming_a_foreign_statement_is_an_error() {
        // def f():
        //     with interleave:
        //         delay_mu(10)
        let mut b = AstBuilder::new();
        let wait = b.delay_mu(10);
        let region = b.interleave(vec![wait]);
        let region_id = region.id;
        let region_span = region.span;
        let f = b.def("f", &[], vec![region]);
        let f_id = f.id;
        let module = b.module(vec![f]);

        let mut diags = Diagnostics::new();
        let scopes = resolve_module(&module, &ExceptionRegistry::default(), &mut diags);
        let (env, _) = type_check(&module, &scopes, &CompilerConfig::default(), &mut diags);
        assert!(!diags.has_errors(), "{:?}", diags.records());

        let schedule = Schedule {
            region: region_id,
            function: f_id,
            entries: vec![ScheduleEntry {
                stmt: NodeId(9999),
                branch: 0,
                start: DelayExpr::Const(0),
                delay: DelayExpr::Const(10),
            }],
            delay: DelayExpr::Const(10),
        };
        let schedules = BTreeMap::from([(region_id, schedule)]);
        let body = function_bodies(&module)[&f_id];

        let err = lower_function(f_id, body, &env, &scopes, &schedules).unwrap_err();
        assert_eq!(
            err,
            CompileError::control_flow(
                "internal error: scheduled statement #9999 is not in the function body",
                region_span,
            )
        );
    }
}
