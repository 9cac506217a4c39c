//! Lowered control-flow graphs.
//!
//! Each function body becomes a [`ControlGraph`] of basic blocks. Instructions
//! refer back to AST nodes by id; the graph makes control transfer explicit:
//! loops, `try`/`except`/`finally`, context managers and scheduled interleave
//! regions. Every `finally` body is lowered once. Transfers that pass through
//! it (`return`, `break`, `continue`, a propagating exception) enter it with a
//! [`Pending`] marker, and its exit resumes whichever transfer was pending.

pub mod local_access;
pub mod lower;
pub mod trace;

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::delay::DelayExpr;
use crate::exceptions::ExceptionKind;
use crate::span::NodeId;

pub use lower::lower_function;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// The transfer a `finally` body was entered for.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Pending {
    FallThrough,
    Return,
    /// `break` out of the loop statement with this id.
    Break(NodeId),
    Continue(NodeId),
    /// An exception is propagating.
    Raise,
}

impl fmt::Display for Pending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pending::FallThrough => write!(f, "fallthrough"),
            Pending::Return => write!(f, "return"),
            Pending::Break(id) => write!(f, "break #{}", id.0),
            Pending::Continue(id) => write!(f, "continue #{}", id.0),
            Pending::Raise => write!(f, "raise"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum EdgeKind {
    Normal,
    /// `Some(kind)` leaves a landing pad toward the handler for `kind`; `None`
    /// goes toward an outer landing pad without a match.
    ExceptionUnwind(Option<ExceptionKind>),
    /// Entry into a `finally` body with a transfer pending.
    FinallyOverride,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Instr {
    /// Run a simple statement: expression, assignment, `pass`, nested `def`.
    Exec(NodeId),
    /// Evaluate the iterable of the `for` statement.
    IterInit(NodeId),
    /// Assign the next item of the `for` statement to its target.
    BindNext(NodeId),
    /// Store the return value (`None` for a bare `return` or falling off the end).
    SetReturn(Option<NodeId>),
    /// Evaluate a `with` item, call `__enter__` and bind its target.
    EnterContext(NodeId),
    /// Call `__exit__` of a `with` item. `exception` is set when the
    /// propagating exception is passed along.
    ExitContext { item: NodeId, exception: bool },
    /// Start handling the caught exception; binds the handler's name.
    EnterHandler(NodeId),
    /// Leave the handler; its name becomes unbound.
    ExitHandler(NodeId),
    /// Remember the timeline position at the start of an interleave region.
    SaveTime(NodeId),
    /// Move the timeline to the saved position plus `offset`.
    AtOffset { region: NodeId, offset: DelayExpr },
    /// Leave the region: the saved position plus the region's delay.
    RestoreTime { region: NodeId, advance: DelayExpr },
}

impl Instr {
    fn may_raise(&self) -> bool {
        matches!(
            self,
            Instr::Exec(_)
                | Instr::IterInit(_)
                | Instr::BindNext(_)
                | Instr::SetReturn(Some(_))
                | Instr::EnterContext(_)
                | Instr::ExitContext { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Terminator {
    Goto(BlockId),
    Branch { cond: NodeId, then: BlockId, other: BlockId },
    /// Next iteration of the `for` statement, or `exhausted`.
    Iterate { stmt: NodeId, body: BlockId, exhausted: BlockId },
    Return,
    /// `value: None` re-raises the exception being handled.
    Raise { stmt: NodeId, value: Option<NodeId> },
    /// Keep unwinding the exception in flight.
    Propagate,
    /// A landing pad. Handlers are in match order: specific kinds first, then
    /// catch-alls; `None` is a bare `except:`. An unmatched exception goes to
    /// `unmatched`, or out of the function.
    Dispatch { try_stmt: NodeId, handlers: Vec<(Option<ExceptionKind>, BlockId)>, unmatched: Option<BlockId> },
    EnterFinally { try_stmt: NodeId, entry: BlockId, pending: Pending },
    /// End of a `finally` body: continue the transfer it was entered for.
    ResumeAfterFinally { try_stmt: NodeId, targets: Vec<(Pending, BlockId)> },
    Unreachable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BasicBlock {
    pub id: BlockId,
    pub instrs: Vec<Instr>,
    pub term: Terminator,
    /// Where an exception raised in this block goes; `None` leaves the function.
    pub unwind: Option<BlockId>,
}

impl BasicBlock {
    pub fn may_raise(&self) -> bool {
        self.instrs.iter().any(Instr::may_raise)
            || matches!(self.term, Terminator::Branch { .. } | Terminator::Iterate { .. } | Terminator::Raise { .. } | Terminator::Propagate)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlGraph {
    pub function: NodeId,
    pub entry: BlockId,
    pub blocks: Vec<BasicBlock>,
}

impl ControlGraph {
    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(id.0 as usize)
    }

    /// Outgoing edges of a block, unwind edge last.
    pub fn successors(&self, block: &BasicBlock) -> Vec<(BlockId, EdgeKind)> {
        let mut out = match &block.term {
            Terminator::Goto(b) => vec![(*b, EdgeKind::Normal)],
            Terminator::Branch { then, other, .. } => vec![(*then, EdgeKind::Normal), (*other, EdgeKind::Normal)],
            Terminator::Iterate { body, exhausted, .. } => {
                vec![(*body, EdgeKind::Normal), (*exhausted, EdgeKind::Normal)]
            }
            Terminator::Dispatch { handlers, unmatched, .. } => {
                let mut edges: Vec<_> = handlers
                    .iter()
                    .map(|(kind, b)| {
                        let kind = kind.clone().unwrap_or(ExceptionKind::Exception);
                        (*b, EdgeKind::ExceptionUnwind(Some(kind)))
                    })
                    .collect();
                if let Some(b) = unmatched {
                    edges.push((*b, EdgeKind::ExceptionUnwind(None)));
                }
                edges
            }
            Terminator::EnterFinally { entry, pending, .. } => {
                let kind = if *pending == Pending::FallThrough { EdgeKind::Normal } else { EdgeKind::FinallyOverride };
                vec![(*entry, kind)]
            }
            Terminator::ResumeAfterFinally { targets, .. } => {
                targets.iter().map(|(_, b)| (*b, EdgeKind::Normal)).collect()
            }
            Terminator::Return | Terminator::Raise { .. } | Terminator::Propagate | Terminator::Unreachable => Vec::new(),
        };
        if let Some(unwind) = block.unwind
            && block.may_raise()
        {
            out.push((unwind, EdgeKind::ExceptionUnwind(None)));
        }
        out
    }

    pub fn edges(&self) -> Vec<(BlockId, BlockId, EdgeKind)> {
        self.blocks
            .iter()
            .flat_map(|b| self.successors(b).into_iter().map(move |(to, kind)| (b.id, to, kind)))
            .collect()
    }

    pub fn predecessors(&self, id: BlockId) -> Vec<(BlockId, EdgeKind)> {
        self.edges().into_iter().filter(|(_, to, _)| *to == id).map(|(from, _, kind)| (from, kind)).collect()
    }

    pub fn reachable(&self) -> BTreeSet<BlockId> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![self.entry];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(block) = self.block(id) {
                stack.extend(self.successors(block).into_iter().map(|(to, _)| to));
            }
        }
        seen
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Exec(id) => write!(f, "exec #{}", id.0),
            Instr::IterInit(id) => write!(f, "iter #{}", id.0),
            Instr::BindNext(id) => write!(f, "next #{}", id.0),
            Instr::SetReturn(Some(id)) => write!(f, "set_return #{}", id.0),
            Instr::SetReturn(None) => write!(f, "set_return none"),
            Instr::EnterContext(id) => write!(f, "enter #{}", id.0),
            Instr::ExitContext { item, exception: false } => write!(f, "exit #{}", item.0),
            Instr::ExitContext { item, exception: true } => write!(f, "exit #{} with exception", item.0),
            Instr::EnterHandler(id) => write!(f, "catch #{}", id.0),
            Instr::ExitHandler(id) => write!(f, "uncatch #{}", id.0),
            Instr::SaveTime(id) => write!(f, "save_time #{}", id.0),
            Instr::AtOffset { region, offset } => write!(f, "at #{} + {}", region.0, offset),
            Instr::RestoreTime { region, advance } => write!(f, "restore_time #{} + {}", region.0, advance),
        }
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Goto(b) => write!(f, "goto {}", b),
            Terminator::Branch { cond, then, other } => write!(f, "branch #{} ? {} : {}", cond.0, then, other),
            Terminator::Iterate { stmt, body, exhausted } => write!(f, "iterate #{} ? {} : {}", stmt.0, body, exhausted),
            Terminator::Return => write!(f, "return"),
            Terminator::Raise { stmt, value: Some(v) } => write!(f, "raise #{} #{}", stmt.0, v.0),
            Terminator::Raise { stmt, value: None } => write!(f, "reraise #{}", stmt.0),
            Terminator::Propagate => write!(f, "propagate"),
            Terminator::Dispatch { try_stmt, handlers, unmatched } => {
                write!(f, "dispatch #{} [", try_stmt.0)?;
                for (i, (kind, b)) in handlers.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match kind {
                        Some(kind) => write!(f, "{} -> {}", kind, b)?,
                        None => write!(f, "* -> {}", b)?,
                    }
                }
                match unmatched {
                    Some(b) => write!(f, "] else {}", b),
                    None => write!(f, "] else unwind"),
                }
            }
            Terminator::EnterFinally { try_stmt, entry, pending } => {
                write!(f, "finally #{} {} ({})", try_stmt.0, entry, pending)
            }
            Terminator::ResumeAfterFinally { try_stmt, targets } => {
                write!(f, "resume #{} [", try_stmt.0)?;
                for (i, (pending, b)) in targets.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} -> {}", pending, b)?;
                }
                write!(f, "]")
            }
            Terminator::Unreachable => write!(f, "unreachable"),
        }
    }
}

impl fmt::Display for ControlGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for block in &self.blocks {
            write!(f, "{}:", block.id)?;
            if let Some(unwind) = block.unwind
                && block.may_raise()
            {
                write!(f, " (unwind {})", unwind)?;
            }
            writeln!(f)?;
            for instr in &block.instrs {
                writeln!(f, "    {}", instr)?;
            }
            writeln!(f, "    {}", block.term)?;
        }
        Ok(())
    }
}
