//! Merging the branches of an interleave region into one issue order.

use crate::ast::*;
use crate::diagnostics::CompileError;
use crate::span::Spanned;
use crate::typeck::env::CallTarget;

use super::estimate::Walk;
use super::{DelayExpr, Schedule, ScheduleEntry};

#[derive(Debug, Clone)]
struct Timed<'ast> {
    stmt: &'ast Spanned<Stmt>,
    branch: usize,
    start: DelayExpr,
    delay: DelayExpr,
}

impl Walk<'_, '_> {
    /// Schedule a `with interleave:` block and return its delay, the longest
    /// of its branches.
    pub(super) fn region_delay(
        &mut self,
        region: &Spanned<Stmt>,
        body: &[Spanned<Stmt>],
    ) -> Result<DelayExpr, CompileError> {
        self.region += 1;
        let result = self.schedule_region(region, body);
        self.region -= 1;
        result
    }

    fn schedule_region(&mut self, region: &Spanned<Stmt>, body: &[Spanned<Stmt>]) -> Result<DelayExpr, CompileError> {
        let mut branches: Vec<Vec<Timed<'_>>> = Vec::with_capacity(body.len());
        let mut finals = Vec::with_capacity(body.len());
        for (index, branch) in body.iter().enumerate() {
            let stmts: &[Spanned<Stmt>] = match &branch.node {
                Stmt::With { body, .. } if branch.node.timing_block() == Some(TimingBlock::Sequential) => body,
                _ => std::slice::from_ref(branch),
            };
            let mut at = DelayExpr::zero();
            let mut timed = Vec::with_capacity(stmts.len());
            for stmt in stmts {
                let delay = self.stmt_delay(stmt)?;
                timed.push(Timed { stmt, branch: index, start: at.clone(), delay: delay.clone() });
                at = DelayExpr::add(at, delay);
            }
            finals.push(at);
            branches.push(timed);
        }

        let delay = DelayExpr::max(finals);
        let merged = merge(branches)?;
        self.check_conflicts(&merged)?;

        let schedule = Schedule {
            region: region.id,
            function: self.function,
            entries: merged
                .into_iter()
                .map(|t| ScheduleEntry { stmt: t.stmt.id, branch: t.branch, start: t.start, delay: t.delay })
                .collect(),
            delay: delay.clone(),
        };
        tracing::debug!(region = ?region.id, entries = schedule.entries.len(), %delay, "scheduled interleave region");
        self.sched.schedules.insert(region.id, schedule);
        Ok(delay)
    }

    /// Two branches writing the same output at a provably equal time.
    fn check_conflicts(&self, merged: &[Timed<'_>]) -> Result<(), CompileError> {
        let targets: Vec<Option<String>> = merged.iter().map(|t| self.write_target(t.stmt)).collect();
        for (i, first) in merged.iter().enumerate() {
            let Some(target) = &targets[i] else { continue };
            for (j, second) in merged.iter().enumerate().skip(i + 1) {
                if second.branch == first.branch || targets[j].as_ref() != Some(target) {
                    continue;
                }
                if DelayExpr::const_difference(&first.start, &second.start) == Some(0) {
                    return Err(CompileError::timing(
                        format!("conflicting writes to `{}` at the same time", target),
                        second.stmt.span,
                    )
                    .with_note(format!("`{}` is also written here at {}", target, first.start), first.stmt.span));
                }
            }
        }
        Ok(())
    }

    /// The output a statement writes, if it is a direct output call.
    fn write_target(&self, stmt: &Spanned<Stmt>) -> Option<String> {
        let Stmt::Expr(expr) = &stmt.node else { return None };
        let Expr::Call { func, args, .. } = &expr.node else { return None };
        match &func.node {
            Expr::Name(n) if n == "rtio_output" && matches!(self.sched.env.call(expr.id), Some(CallTarget::Builtin(_))) => {
                let channel = match &args.first()?.node {
                    Expr::Int(c) => c.to_string(),
                    other => other.dotted_path()?,
                };
                Some(format!("channel {}", channel))
            }
            Expr::Attribute { value, attr } if self.sched.config.is_output_method(&attr.node) => value.node.dotted_path(),
            _ => None,
        }
    }
}

/// Stable merge by start time. At equal starts the lower branch goes first;
/// statements of one branch keep their order.
fn merge(branches: Vec<Vec<Timed<'_>>>) -> Result<Vec<Timed<'_>>, CompileError> {
    let total = branches.iter().map(Vec::len).sum();
    let mut heads = vec![0usize; branches.len()];
    let mut out = Vec::with_capacity(total);
    while out.len() < total {
        let mut best: Option<usize> = None;
        for (b, branch) in branches.iter().enumerate() {
            let Some(candidate) = branch.get(heads[b]) else { continue };
            let Some(cur) = best else {
                best = Some(b);
                continue;
            };
            let current = &branches[cur][heads[cur]];
            match DelayExpr::const_difference(&candidate.start, &current.start) {
                Some(d) if d < 0 => best = Some(b),
                Some(_) => {}
                None => {
                    return Err(CompileError::timing("cannot order interleaved events statically", candidate.stmt.span)
                        .with_note(format!("this statement starts at {}", current.start), current.stmt.span)
                        .with_note(format!("this statement starts at {}", candidate.start), candidate.stmt.span));
                }
            }
        }
        let Some(b) = best else { break };
        out.push(branches[b][heads[b]].clone());
        heads[b] += 1;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::{NodeId, Span};

    fn stmts(n: u32) -> Vec<Spanned<Stmt>> {
        (1..=n).map(|i| Spanned::new(Stmt::Pass, Span::dummy(), NodeId(i))).collect()
    }

    fn timed(stmt: &Spanned<Stmt>, branch: usize, start: DelayExpr) -> Timed<'_> {
        Timed { stmt, branch, start, delay: DelayExpr::zero() }
    }

    #[test]
    fn ties_go_to_the_earlier_branch() {
        let s = stmts(5);
        let a = vec![timed(&s[0], 0, DelayExpr::Const(0)), timed(&s[1], 0, DelayExpr::Const(2))];
        let b = vec![
            timed(&s[2], 1, DelayExpr::Const(0)),
            timed(&s[3], 1, DelayExpr::Const(2)),
            timed(&s[4], 1, DelayExpr::Const(4)),
        ];
        let order: Vec<u32> = merge(vec![a, b]).unwrap().iter().map(|t| t.stmt.id.0).collect();
        assert_eq!(order, vec![1, 3, 2, 4, 5]);
    }

    #[test]
    fn incomparable_starts_are_rejected() {
        let s = stmts(2);
        let a = vec![timed(&s[0], 0, DelayExpr::arg("n"))];
        let b = vec![timed(&s[1], 1, DelayExpr::arg("m"))];
        let err = merge(vec![a, b]).unwrap_err();
        assert_eq!(err.msg(), "cannot order interleaved events statically");
        assert_eq!(err.notes().len(), 2);
    }
}
