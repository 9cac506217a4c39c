use std::collections::BTreeMap;

use serde::Serialize;

use crate::exceptions::ExceptionKind;
use crate::span::NodeId;

use super::types::{DelayVar, FnTy, Ty};

/// A function or lambda as inference left it.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionInfo {
    pub name: String,
    pub ty: FnTy,
    /// The class a method belongs to.
    pub class: Option<NodeId>,
    /// Parameters and locals, in the order the frame lists them.
    pub bindings: Vec<(String, Ty)>,
}

/// A closed record type: ordered fields plus methods.
#[derive(Debug, Clone, Serialize)]
pub struct ClassInfo {
    pub id: NodeId,
    pub name: String,
    /// Class-body assignments first, then `self.<attr>` assignments in
    /// method order. Field names are unique.
    pub fields: Vec<(String, Ty)>,
    pub methods: Vec<(String, NodeId)>,
}

impl ClassInfo {
    pub fn field(&self, name: &str) -> Option<&Ty> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, ty)| ty)
    }

    pub fn method(&self, name: &str) -> Option<NodeId> {
        self.methods.iter().find(|(n, _)| n == name).map(|(_, id)| *id)
    }
}

/// What a call expression invokes, as far as the type checker could prove.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CallTarget {
    Builtin(String),
    /// A single `def`. `bound` is set for method calls through an instance,
    /// where the receiver fills the first parameter.
    Function { def: NodeId, bound: bool },
    Constructor { class: NodeId, init: Option<NodeId> },
    Exception(ExceptionKind),
    /// A call through a value. The delay variable of the callee's function
    /// type, when it has one.
    Dynamic { delay: Option<DelayVar> },
}

/// The finalized result of inference. Every type in here is fully resolved;
/// integer widths nothing constrained hold the configured default.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TypeEnv {
    pub exprs: BTreeMap<NodeId, Ty>,
    pub functions: BTreeMap<NodeId, FunctionInfo>,
    pub globals: BTreeMap<String, Ty>,
    pub classes: BTreeMap<NodeId, ClassInfo>,
    pub calls: BTreeMap<NodeId, CallTarget>,
    /// The kind each `except` clause matches; `None` for a bare `except:`.
    pub handlers: BTreeMap<NodeId, Option<ExceptionKind>>,
}

impl TypeEnv {
    pub fn expr_ty(&self, id: NodeId) -> Option<&Ty> {
        self.exprs.get(&id)
    }

    pub fn call(&self, id: NodeId) -> Option<&CallTarget> {
        self.calls.get(&id)
    }

    pub fn binding_ty(&self, function: NodeId, name: &str) -> Option<&Ty> {
        self.functions.get(&function)?.bindings.iter().find(|(n, _)| n == name).map(|(_, ty)| ty)
    }

    /// Functions whose delay variable has root `delay`: the bodies a dynamic
    /// call carrying that variable may reach.
    pub fn functions_with_delay(&self, delay: DelayVar) -> impl Iterator<Item = NodeId> + '_ {
        self.functions.iter().filter(move |(_, info)| info.ty.delay == delay).map(|(id, _)| *id)
    }

    /// Remove everything recorded for the given functions.
    pub fn drop_functions(&mut self, failed: &std::collections::BTreeSet<NodeId>) {
        self.functions.retain(|id, _| !failed.contains(id));
    }
}
