pub mod ast;
pub mod cfg;
pub mod closures;
pub mod config;
pub mod delay;
pub mod diagnostics;
pub mod exceptions;
pub mod scope;
pub mod span;
pub mod typeck;
pub mod visit;

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use ast::Module;
use cfg::ControlGraph;
use closures::EnvFrame;
use config::{CompilerConfig, DriverError};
use delay::{DelayExpr, Schedule};
use diagnostics::Diagnostics;
use exceptions::ExceptionRegistry;
use span::NodeId;
use typeck::env::TypeEnv;

/// Everything the passes produce for one module. Functions that failed any
/// pass appear only in `diagnostics`.
#[derive(Debug, Clone, Serialize)]
pub struct Compilation {
    pub types: TypeEnv,
    pub delays: BTreeMap<NodeId, DelayExpr>,
    pub schedules: BTreeMap<NodeId, Schedule>,
    pub graphs: BTreeMap<NodeId, ControlGraph>,
    pub frames: BTreeMap<NodeId, EnvFrame>,
    #[serde(skip)]
    pub diagnostics: Diagnostics,
}

impl Compilation {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.has_errors()
    }
}

/// Run every pass over a module (resolve → infer → schedule → lower →
/// initialization check → closure analysis).
///
/// An error in one function abandons that function only; the others keep
/// going through the remaining passes.
pub fn compile_module(module: &Module, config: &CompilerConfig) -> Compilation {
    tracing::debug!(module = %module.name, "compile");
    let mut diags = Diagnostics::new();
    let registry = ExceptionRegistry::new(config.extra_exceptions.iter().cloned());

    let scopes = scope::resolve_module(module, &registry, &mut diags);
    let (mut types, mut delay_vars) = typeck::type_check(module, &scopes, config, &mut diags);
    let analysis = delay::schedule_module(module, &scopes, &types, &mut delay_vars, config, &mut diags);

    let mut graphs = BTreeMap::new();
    for (id, body) in scope::function_bodies(module) {
        if diags.is_failed(id) {
            continue;
        }
        let lowered = cfg::lower_function(id, body, &types, &scopes, &analysis.schedules).and_then(|graph| {
            if let Some(scope) = scopes.get(id) {
                cfg::local_access::check_initialized(&graph, body, scope)?;
            }
            Ok(graph)
        });
        match lowered {
            Ok(graph) => {
                graphs.insert(id, graph);
            }
            Err(err) => diags.push(Some(id), err),
        }
    }

    let mut frames = closures::analyze_closures(&scopes);

    let failed = diags.failed_functions().clone();
    let mut analysis = analysis;
    analysis.drop_functions(&failed);
    types.drop_functions(&failed);
    graphs.retain(|id, _| !failed.contains(id));
    frames.retain(|id, _| !failed.contains(id));
    tracing::debug!(
        functions = scopes.order.len(),
        failed = failed.len(),
        errors = diags.error_count(),
        "compile finished"
    );

    Compilation {
        types,
        delays: analysis.delays,
        schedules: analysis.schedules,
        graphs,
        frames,
        diagnostics: diags,
    }
}

/// Read a module AST from its JSON encoding.
pub fn load_module(path: &Path) -> Result<Module, DriverError> {
    let content =
        std::fs::read_to_string(path).map_err(|source| DriverError::Io { path: path.to_path_buf(), source })?;
    serde_json::from_str(&content).map_err(|source| DriverError::Json { path: path.to_path_buf(), source })
}
