//! Delay analysis and interleave scheduling.
//!
//! Every function gets one symbolic [`DelayExpr`], computed from a single walk
//! of its body after type inference. Calls to statically known functions
//! inline the callee's delay with the arguments substituted for its
//! parameters. Each `with interleave:`/`with parallel:` region is merged into
//! one ordered [`Schedule`] that lowering later replays.

mod estimate;
pub mod expr;
mod interleave;

use std::collections::BTreeMap;

use serde::Serialize;

use crate::ast::Module;
use crate::config::CompilerConfig;
use crate::diagnostics::Diagnostics;
use crate::scope::{function_bodies, Scopes};
use crate::span::NodeId;
use crate::typeck::env::TypeEnv;
use crate::typeck::unify::DelayVars;

pub use expr::DelayExpr;

use estimate::Scheduler;

/// One statement of a merged interleave region.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleEntry {
    pub stmt: NodeId,
    /// Index of the branch (direct sub-statement of the region) it came from.
    pub branch: usize,
    /// Offset from the start of the region.
    pub start: DelayExpr,
    pub delay: DelayExpr,
}

/// The merged form of one interleave region.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Schedule {
    /// The `with` statement that opens the region.
    pub region: NodeId,
    pub function: NodeId,
    /// Statements in issue order.
    pub entries: Vec<ScheduleEntry>,
    /// Maximum over the branch totals.
    pub delay: DelayExpr,
}

impl Schedule {
    pub fn entry(&self, stmt: NodeId) -> Option<&ScheduleEntry> {
        self.entries.iter().find(|e| e.stmt == stmt)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DelayAnalysis {
    pub delays: BTreeMap<NodeId, DelayExpr>,
    /// Keyed by the region's `with` statement.
    pub schedules: BTreeMap<NodeId, Schedule>,
}

impl DelayAnalysis {
    /// Forget every function that failed, along with its regions.
    pub fn drop_functions(&mut self, failed: &std::collections::BTreeSet<NodeId>) {
        self.delays.retain(|id, _| !failed.contains(id));
        self.schedules.retain(|_, s| !failed.contains(&s.function));
    }
}

/// Compute the delay of every function that type-checked and schedule its
/// interleave regions. Errors are recorded against the owning function.
pub fn schedule_module(
    module: &Module,
    scopes: &Scopes,
    env: &TypeEnv,
    delay_vars: &mut DelayVars,
    config: &CompilerConfig,
    diags: &mut Diagnostics,
) -> DelayAnalysis {
    let bodies = function_bodies(module);
    let mut scheduler = Scheduler::new(scopes, env, config, &bodies, delay_vars, diags);
    for &id in env.functions.keys() {
        if scheduler.is_failed(id) {
            continue;
        }
        let delay = scheduler.function_delay(id);
        tracing::debug!(function = %env.functions[&id].name, %delay, "function delay");
    }
    let (delays, schedules) = scheduler.finish();
    let mut analysis = DelayAnalysis { delays, schedules };
    analysis.drop_functions(diags.failed_functions());
    analysis
}
