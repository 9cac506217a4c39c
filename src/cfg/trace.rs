//! Deterministic execution of a lowered graph.
//!
//! The tracer walks blocks from the entry, asking an [`Oracle`] for branch
//! outcomes, loop trip counts and injected exceptions. It records every
//! instruction it passes and how the function ended. Lowering tests use it to
//! check `finally` and handler semantics without a backend.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::ast::*;
use crate::exceptions::ExceptionKind;
use crate::scope::FunctionBody;
use crate::span::{NodeId, Spanned};
use crate::typeck::env::{CallTarget, TypeEnv};
use crate::typeck::types::Ty;
use crate::visit::composers::NodeIndex;

use super::{BlockId, ControlGraph, Instr, Pending, Terminator};

const STEP_LIMIT: usize = 10_000;

/// Answers the questions the tracer cannot decide from the graph alone.
pub trait Oracle {
    /// Outcome of a branch condition, or `None` when unknown.
    fn condition(&mut self, cond: &Spanned<Expr>) -> Option<bool>;

    /// Number of items a `for` iterable yields.
    fn iterations(&mut self, iter: &Spanned<Expr>) -> Option<usize>;

    /// An exception the instruction raises.
    fn raises(&mut self, _instr: &Instr) -> Option<ExceptionKind> {
        None
    }
}

/// Folds literal conditions and literal iterables. Exceptions can be
/// injected at statements with [`LiteralOracle::raising_at`].
#[derive(Debug, Default, Clone)]
pub struct LiteralOracle {
    raising: BTreeMap<NodeId, ExceptionKind>,
}

impl LiteralOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the statement executed by `Exec(stmt)` raise `kind` every time.
    pub fn raising_at(mut self, stmt: NodeId, kind: ExceptionKind) -> Self {
        self.raising.insert(stmt, kind);
        self
    }
}

impl Oracle for LiteralOracle {
    fn condition(&mut self, cond: &Spanned<Expr>) -> Option<bool> {
        truthiness(&cond.node)
    }

    fn iterations(&mut self, iter: &Spanned<Expr>) -> Option<usize> {
        match &iter.node {
            Expr::List(elts) | Expr::Tuple(elts) => Some(elts.len()),
            Expr::Call { func, args, keywords } if keywords.is_empty() && matches!(&func.node, Expr::Name(n) if n == "range") => {
                let ints = args
                    .iter()
                    .map(|a| match a.node {
                        Expr::Int(n) => Some(n),
                        _ => None,
                    })
                    .collect::<Option<Vec<i64>>>()?;
                let (start, stop, step) = match ints.as_slice() {
                    [stop] => (0, *stop, 1),
                    [start, stop] => (*start, *stop, 1),
                    [start, stop, step] if *step != 0 => (*start, *stop, *step),
                    _ => return None,
                };
                let span = if step > 0 { stop.checked_sub(start)? } else { start.checked_sub(stop)? };
                let step = step.checked_abs()?;
                let count = span.checked_add(step - 1)? / step;
                usize::try_from(count.max(0)).ok()
            }
            _ => None,
        }
    }

    fn raises(&mut self, instr: &Instr) -> Option<ExceptionKind> {
        match instr {
            Instr::Exec(stmt) => self.raising.get(stmt).cloned(),
            _ => None,
        }
    }
}

fn truthiness(expr: &Expr) -> Option<bool> {
    match expr {
        Expr::Bool(b) => Some(*b),
        Expr::Int(n) => Some(*n != 0),
        Expr::NoneLit => Some(false),
        Expr::Str(s) => Some(!s.is_empty()),
        Expr::UnaryOp { op: UnaryOp::Not, operand } => truthiness(&operand.node).map(|b| !b),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Outcome {
    /// Returned; `None` when no value expression was given.
    Returned(Option<NodeId>),
    /// An exception left the function. `origin` is the statement that raised it.
    Uncaught { kind: ExceptionKind, origin: NodeId },
    /// The oracle could not decide a branch, or control reached an
    /// unreachable block.
    Stuck(BlockId),
    StepLimit,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trace {
    pub steps: Vec<Instr>,
    pub outcome: Outcome,
}

impl Trace {
    /// Statements run by `Exec`, in order.
    pub fn executed(&self) -> Vec<NodeId> {
        self.steps
            .iter()
            .filter_map(|i| match i {
                Instr::Exec(id) => Some(*id),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
struct InFlight {
    kind: ExceptionKind,
    origin: NodeId,
}

struct Tracer<'g, 'ast, O> {
    graph: &'g ControlGraph,
    index: NodeIndex<'ast>,
    env: &'g TypeEnv,
    oracle: &'g mut O,
    steps: Vec<Instr>,
    returned: Option<NodeId>,
    /// Remaining items per active `for` statement.
    remaining: BTreeMap<NodeId, usize>,
    /// Exceptions being handled, innermost last.
    handled: Vec<InFlight>,
    in_flight: Option<InFlight>,
    /// Transfer each active `finally` was entered for, with the exception it
    /// is holding back.
    finally: BTreeMap<NodeId, (Pending, Option<InFlight>)>,
}

/// Run `graph` from its entry.
pub fn trace<O: Oracle>(graph: &ControlGraph, body: FunctionBody<'_>, env: &TypeEnv, oracle: &mut O) -> Trace {
    let index = match body {
        FunctionBody::Def(def) => NodeIndex::of_body(&def.body),
        FunctionBody::Lambda { body, .. } => NodeIndex::of_expr(body),
    };
    let mut tracer = Tracer {
        graph,
        index,
        env,
        oracle,
        steps: Vec::new(),
        returned: None,
        remaining: BTreeMap::new(),
        handled: Vec::new(),
        in_flight: None,
        finally: BTreeMap::new(),
    };
    let outcome = tracer.run();
    Trace { steps: tracer.steps, outcome }
}

enum Next {
    Block(BlockId),
    Done(Outcome),
}

impl<O: Oracle> Tracer<'_, '_, O> {
    fn run(&mut self) -> Outcome {
        let mut at = self.graph.entry;
        for _ in 0..STEP_LIMIT {
            match self.step(at) {
                Next::Block(next) => at = next,
                Next::Done(outcome) => return outcome,
            }
        }
        Outcome::StepLimit
    }

    fn step(&mut self, id: BlockId) -> Next {
        let graph = self.graph;
        let Some(block) = graph.block(id) else { return Next::Done(Outcome::Stuck(id)) };
        for instr in &block.instrs {
            self.steps.push(instr.clone());
            match instr {
                Instr::IterInit(stmt) => {
                    self.remaining.remove(stmt);
                }
                Instr::SetReturn(value) => self.returned = *value,
                Instr::EnterHandler(_) => {
                    let caught = self
                        .in_flight
                        .take()
                        .unwrap_or(InFlight { kind: ExceptionKind::Exception, origin: graph.function });
                    self.handled.push(caught);
                }
                Instr::ExitHandler(_) => {
                    self.handled.pop();
                }
                _ => {}
            }
            if let Some(kind) = self.oracle.raises(instr) {
                let origin = match instr {
                    Instr::Exec(stmt) => *stmt,
                    _ => graph.function,
                };
                return self.unwind(block.unwind, InFlight { kind, origin });
            }
        }

        match &block.term {
            Terminator::Goto(next) => Next::Block(*next),
            Terminator::Branch { cond, then, other } => {
                match self.index.expr(*cond).and_then(|e| self.oracle.condition(e)) {
                    Some(true) => Next::Block(*then),
                    Some(false) => Next::Block(*other),
                    None => Next::Done(Outcome::Stuck(id)),
                }
            }
            Terminator::Iterate { stmt, body, exhausted } => {
                let left = match self.remaining.get(stmt) {
                    Some(n) => *n,
                    None => {
                        let iter = match self.index.stmt(*stmt).map(|s| &s.node) {
                            Some(Stmt::For { iter, .. }) => iter,
                            _ => return Next::Done(Outcome::Stuck(id)),
                        };
                        match self.oracle.iterations(iter) {
                            Some(n) => n,
                            None => return Next::Done(Outcome::Stuck(id)),
                        }
                    }
                };
                if left == 0 {
                    self.remaining.remove(stmt);
                    Next::Block(*exhausted)
                } else {
                    self.remaining.insert(*stmt, left - 1);
                    Next::Block(*body)
                }
            }
            Terminator::Return => Next::Done(Outcome::Returned(self.returned)),
            Terminator::Raise { stmt, value } => {
                // A bare `raise` re-raises the caught exception as it was.
                let exc = match value {
                    Some(v) => InFlight { kind: self.raised_kind(*v), origin: *stmt },
                    None => self
                        .handled
                        .last()
                        .cloned()
                        .unwrap_or(InFlight { kind: ExceptionKind::RuntimeError, origin: *stmt }),
                };
                self.unwind(block.unwind, exc)
            }
            Terminator::Propagate => match self.in_flight.take() {
                Some(exc) => self.unwind(block.unwind, exc),
                None => Next::Done(Outcome::Stuck(id)),
            },
            Terminator::Dispatch { handlers, unmatched, .. } => {
                let Some(exc) = &self.in_flight else { return Next::Done(Outcome::Stuck(id)) };
                let hit = handlers.iter().find(|(kind, _)| kind.as_ref().is_none_or(|k| k.catches(&exc.kind)));
                match (hit, unmatched) {
                    (Some((_, handler)), _) => Next::Block(*handler),
                    (None, Some(outer)) => Next::Block(*outer),
                    (None, None) => match self.in_flight.take() {
                        Some(exc) => Next::Done(Outcome::Uncaught { kind: exc.kind, origin: exc.origin }),
                        None => Next::Done(Outcome::Stuck(id)),
                    },
                }
            }
            Terminator::EnterFinally { try_stmt, entry, pending } => {
                let held = if *pending == Pending::Raise { self.in_flight.take() } else { None };
                self.finally.insert(*try_stmt, (pending.clone(), held));
                Next::Block(*entry)
            }
            Terminator::ResumeAfterFinally { try_stmt, targets } => {
                let Some((pending, held)) = self.finally.remove(try_stmt) else {
                    return Next::Done(Outcome::Stuck(id));
                };
                if held.is_some() {
                    self.in_flight = held;
                }
                match targets.iter().find(|(p, _)| *p == pending) {
                    Some((_, target)) => Next::Block(*target),
                    None => Next::Done(Outcome::Stuck(id)),
                }
            }
            Terminator::Unreachable => Next::Done(Outcome::Stuck(id)),
        }
    }

    fn unwind(&mut self, to: Option<BlockId>, exc: InFlight) -> Next {
        match to {
            Some(pad) => {
                self.in_flight = Some(exc);
                Next::Block(pad)
            }
            None => Next::Done(Outcome::Uncaught { kind: exc.kind, origin: exc.origin }),
        }
    }

    fn raised_kind(&self, value: NodeId) -> ExceptionKind {
        if let Some(Ty::Exception(kind)) = self.env.expr_ty(value) {
            return kind.clone();
        }
        match self.env.call(value) {
            Some(CallTarget::Exception(kind)) => kind.clone(),
            _ => ExceptionKind::Exception,
        }
    }
}
