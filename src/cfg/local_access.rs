//! Definite assignment over a lowered graph.
//!
//! A forward dataflow computes, for every block, the locals assigned on
//! every path reaching it. Reading a local outside that set is an error.
//! Parameters are always assigned; reads inside nested functions belong to
//! those functions and are not looked at here.

use std::collections::{BTreeSet, VecDeque};

use crate::ast::*;
use crate::diagnostics::CompileError;
use crate::scope::{FunctionBody, FunctionScope};
use crate::span::{Span, Spanned};
use crate::visit::composers::NodeIndex;
use crate::visit::{walk_expr, Visitor};

use super::{BasicBlock, ControlGraph, EdgeKind, Instr, Terminator};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Effect<'ast> {
    Read(&'ast str, Span),
    Write(&'ast str),
    Kill(&'ast str),
}

type Assigned<'ast> = BTreeSet<&'ast str>;

/// Report the first read of a local that some path leaves unassigned.
pub fn check_initialized(
    graph: &ControlGraph,
    body: FunctionBody<'_>,
    scope: &FunctionScope,
) -> Result<(), CompileError> {
    let index = match body {
        FunctionBody::Def(def) => NodeIndex::of_body(&def.body),
        FunctionBody::Lambda { body, .. } => NodeIndex::of_expr(body),
    };
    let tracked: BTreeSet<&str> =
        scope.bindings.iter().filter(|b| !scope.is_param(b)).map(String::as_str).collect();
    if tracked.is_empty() {
        return Ok(());
    }

    let effects: Vec<Vec<Effect<'_>>> = graph.blocks.iter().map(|b| block_effects(b, &index)).collect();
    let mut ins: Vec<Option<Assigned<'_>>> = vec![None; graph.blocks.len()];
    ins[graph.entry.0 as usize] = Some(BTreeSet::new());
    let mut worklist = VecDeque::from([graph.entry]);

    while let Some(id) = worklist.pop_front() {
        let Some(block) = graph.block(id) else { continue };
        let Some(state) = ins[id.0 as usize].clone() else { continue };
        let (out, weakest) = apply(&effects[id.0 as usize], state);
        for (succ, kind) in graph.successors(block) {
            let flow = match kind {
                // The block may raise before reaching its end.
                EdgeKind::ExceptionUnwind(None) if Some(succ) == block.unwind => &weakest,
                _ => &out,
            };
            let slot = &mut ins[succ.0 as usize];
            let merged = match slot {
                None => flow.clone(),
                Some(old) => old.intersection(flow).copied().collect(),
            };
            if slot.as_ref() != Some(&merged) {
                *slot = Some(merged);
                worklist.push_back(succ);
            }
        }
    }

    for block in &graph.blocks {
        let Some(mut state) = ins[block.id.0 as usize].clone() else { continue };
        for effect in &effects[block.id.0 as usize] {
            match effect {
                Effect::Read(name, span) if tracked.contains(name) && !state.contains(name) => {
                    return Err(CompileError::name(format!("variable '{}' is not always initialized", name), *span));
                }
                Effect::Read(..) => {}
                Effect::Write(name) => {
                    state.insert(*name);
                }
                Effect::Kill(name) => {
                    state.remove(name);
                }
            }
        }
    }
    Ok(())
}

/// The state after the block and the intersection of every state inside it.
fn apply<'ast>(effects: &[Effect<'ast>], mut state: Assigned<'ast>) -> (Assigned<'ast>, Assigned<'ast>) {
    let mut weakest = state.clone();
    for effect in effects {
        match effect {
            Effect::Read(..) => {}
            Effect::Write(name) => {
                state.insert(*name);
            }
            Effect::Kill(name) => {
                state.remove(name);
                weakest.remove(name);
            }
        }
    }
    (state, weakest)
}

fn block_effects<'ast>(block: &BasicBlock, index: &NodeIndex<'ast>) -> Vec<Effect<'ast>> {
    let mut out = Vec::new();
    for instr in &block.instrs {
        match instr {
            Instr::Exec(id) => {
                if let Some(stmt) = index.stmt(*id) {
                    stmt_effects(stmt, &mut out);
                }
            }
            Instr::IterInit(id) => {
                if let Some(Stmt::For { iter, .. }) = index.stmt(*id).map(|s| &s.node) {
                    reads(iter, &mut out);
                }
            }
            Instr::BindNext(id) => {
                if let Some(Stmt::For { target, .. }) = index.stmt(*id).map(|s| &s.node) {
                    target_effects(target, &mut out);
                }
            }
            Instr::SetReturn(Some(id)) => {
                if let Some(expr) = index.expr(*id) {
                    reads(expr, &mut out);
                }
            }
            Instr::EnterContext(id) => {
                if let Some(item) = index.with_item(*id) {
                    reads(&item.node.context, &mut out);
                    if let Some(target) = &item.node.target {
                        out.push(Effect::Write(&target.node));
                    }
                }
            }
            Instr::EnterHandler(id) => {
                if let Some(name) = index.handler(*id).and_then(|h| h.node.name.as_ref()) {
                    out.push(Effect::Write(&name.node));
                }
            }
            Instr::ExitHandler(id) => {
                if let Some(name) = index.handler(*id).and_then(|h| h.node.name.as_ref()) {
                    out.push(Effect::Kill(&name.node));
                }
            }
            Instr::SetReturn(None)
            | Instr::ExitContext { .. }
            | Instr::SaveTime(_)
            | Instr::AtOffset { .. }
            | Instr::RestoreTime { .. } => {}
        }
    }
    match &block.term {
        Terminator::Branch { cond, .. } => {
            if let Some(expr) = index.expr(*cond) {
                reads(expr, &mut out);
            }
        }
        Terminator::Raise { value: Some(value), .. } => {
            if let Some(expr) = index.expr(*value) {
                reads(expr, &mut out);
            }
        }
        _ => {}
    }
    out
}

fn stmt_effects<'ast>(stmt: &'ast Spanned<Stmt>, out: &mut Vec<Effect<'ast>>) {
    match &stmt.node {
        Stmt::Expr(e) => reads(e, out),
        Stmt::Assign { targets, value } => {
            reads(value, out);
            for target in targets {
                target_effects(target, out);
            }
        }
        Stmt::AugAssign { target, value, .. } => {
            reads(target, out);
            reads(value, out);
            target_effects(target, out);
        }
        Stmt::FunctionDef(def) => {
            for param in &def.params {
                if let Some(default) = &param.default {
                    reads(default, out);
                }
            }
            out.push(Effect::Write(&def.name.node));
        }
        Stmt::ClassDef(class) => out.push(Effect::Write(&class.name.node)),
        _ => {}
    }
}

fn target_effects<'ast>(target: &'ast Spanned<Expr>, out: &mut Vec<Effect<'ast>>) {
    match &target.node {
        Expr::Name(n) => out.push(Effect::Write(n)),
        Expr::Tuple(elts) | Expr::List(elts) => elts.iter().for_each(|e| target_effects(e, out)),
        Expr::Attribute { value, .. } => reads(value, out),
        Expr::Subscript { value, index } => {
            reads(value, out);
            reads(index, out);
        }
        _ => reads(target, out),
    }
}

/// Name reads of an expression in evaluation order, not entering lambdas.
fn reads<'ast>(expr: &'ast Spanned<Expr>, out: &mut Vec<Effect<'ast>>) {
    struct Reads<'o, 'ast> {
        out: &'o mut Vec<Effect<'ast>>,
    }

    impl<'ast> Visitor<'ast> for Reads<'_, 'ast> {
        fn visit_expr(&mut self, expr: &'ast Spanned<Expr>) {
            if let Expr::Name(n) = &expr.node {
                self.out.push(Effect::Read(n, expr.span));
            }
            walk_expr(self, expr);
        }

        fn visit_lambda(&mut self, _id: crate::span::NodeId, params: &'ast [Param], _body: &'ast Spanned<Expr>) {
            for param in params {
                if let Some(default) = &param.default {
                    self.visit_expr(default);
                }
            }
        }
    }

    Reads { out }.visit_expr(expr);
}
