//! Closure environment analysis.
//!
//! Decides, for every binding of every function, whether it can live on the
//! stack or has to move into a heap environment shared with nested functions.
//!
//! Two passes over the resolved [`Scopes`]:
//! 1. bottom-up, the free names of each function: names its body (or any of
//!    its nested functions) uses without binding them itself;
//! 2. top-down, a binding is [`Storage::Captured`] when some direct child's
//!    free set contains it. A child that binds the name itself shadows it and
//!    so never lists it as free.
//!
//! Module-level names are not classified: nested functions reach globals
//! through the module namespace.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::scope::Scopes;
use crate::span::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Storage {
    Stack,
    Captured,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvFrame {
    pub function: NodeId,
    pub name: String,
    /// Every binding in declaration order, parameters first.
    pub bindings: Vec<(String, Storage)>,
}

impl EnvFrame {
    pub fn storage(&self, name: &str) -> Option<Storage> {
        self.bindings.iter().find(|(n, _)| n == name).map(|(_, s)| *s)
    }

    pub fn captured(&self) -> impl Iterator<Item = &str> {
        self.bindings.iter().filter(|(_, s)| *s == Storage::Captured).map(|(n, _)| n.as_str())
    }
}

/// Classify the bindings of every function in `scopes`.
pub fn analyze_closures(scopes: &Scopes) -> BTreeMap<NodeId, EnvFrame> {
    let mut free: BTreeMap<NodeId, BTreeSet<String>> = BTreeMap::new();
    // Children come after their parent in source order, so walking it
    // backwards visits every child first.
    for &id in scopes.order.iter().rev() {
        let Some(scope) = scopes.get(id) else { continue };
        let mut names: BTreeSet<String> = scope.references.iter().chain(&scope.nonlocals).cloned().collect();
        for child in &scope.children {
            if let Some(child_free) = free.get(child) {
                names.extend(child_free.iter().cloned());
            }
        }
        names.retain(|n| !scope.binds(n) && !scope.globals.contains(n));
        free.insert(id, names);
    }

    let mut frames = BTreeMap::new();
    for &id in &scopes.order {
        let Some(scope) = scopes.get(id) else { continue };
        let wanted: BTreeSet<&str> = scope
            .children
            .iter()
            .filter_map(|c| free.get(c))
            .flat_map(|names| names.iter().map(String::as_str))
            .collect();
        let bindings: Vec<(String, Storage)> = scope
            .bindings
            .iter()
            .map(|b| {
                let storage = if wanted.contains(b.as_str()) { Storage::Captured } else { Storage::Stack };
                (b.clone(), storage)
            })
            .collect();
        tracing::trace!(
            function = %scope.name,
            captured = bindings.iter().filter(|(_, s)| *s == Storage::Captured).count(),
            "classified bindings"
        );
        frames.insert(id, EnvFrame { function: id, name: scope.name.clone(), bindings });
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build::AstBuilder;
    use crate::ast::{BinOp, Module};
    use crate::diagnostics::Diagnostics;
    use crate::exceptions::ExceptionRegistry;
    use crate::scope::resolve_module;

    fn frames(module: &Module) -> BTreeMap<NodeId, EnvFrame> {
        let mut diags = Diagnostics::new();
        let scopes = resolve_module(module, &ExceptionRegistry::default(), &mut diags);
        assert!(!diags.has_errors(), "{:?}", diags.records());
        analyze_closures(&scopes)
    }

    #[test]
    fn read_by_inner_function_is_captured() {
        // def outer(a):
        //     b = 1
        //     def inner():
        //         return a
        //     return inner
        let mut b = AstBuilder::new();
        let one = b.int(1);
        let set_b = b.assign("b", one);
        let a = b.name("a");
        let ret_a = b.ret_value(a);
        let inner = b.def("inner", &[], vec![ret_a]);
        let inner_id = inner.id;
        let inner_ref = b.name("inner");
        let ret = b.ret_value(inner_ref);
        let outer = b.def("outer", &["a"], vec![set_b, inner, ret]);
        let outer_id = outer.id;
        let module = b.module(vec![outer]);

        let frames = frames(&module);
        let outer = &frames[&outer_id];
        assert_eq!(outer.storage("a"), Some(Storage::Captured));
        assert_eq!(outer.storage("b"), Some(Storage::Stack));
        assert_eq!(outer.storage("inner"), Some(Storage::Stack));
        assert!(frames[&inner_id].bindings.is_empty());
    }

    #[test]
    fn nonlocal_write_captures_through_an_intermediate_function() {
        // def outer():
        //     n = 0
        //     def mid():
        //         def leaf():
        //             nonlocal n
        //             n += 1
        //         leaf()
        //     mid()
        let mut b = AstBuilder::new();
        let zero = b.int(0);
        let set_n = b.assign("n", zero);
        let decl = b.nonlocal(&["n"]);
        let one = b.int(1);
        let bump = b.aug_assign("n", BinOp::Add, one);
        let leaf = b.def("leaf", &[], vec![decl, bump]);
        let call_leaf = b.call_stmt("leaf", vec![]);
        let mid = b.def("mid", &[], vec![leaf, call_leaf]);
        let mid_id = mid.id;
        let call_mid = b.call_stmt("mid", vec![]);
        let outer = b.def("outer", &[], vec![set_n, mid, call_mid]);
        let outer_id = outer.id;
        let module = b.module(vec![outer]);

        let frames = frames(&module);
        assert_eq!(frames[&outer_id].captured().collect::<Vec<_>>(), vec!["n"]);
        assert_eq!(frames[&mid_id].storage("leaf"), Some(Storage::Stack));
    }

    #[test]
    fn shadowing_child_does_not_capture() {
        // def outer():
        //     x = 1
        //     def inner():
        //         x = 2
        //         return x
        let mut b = AstBuilder::new();
        let one = b.int(1);
        let set_outer = b.assign("x", one);
        let two = b.int(2);
        let set_inner = b.assign("x", two);
        let x = b.name("x");
        let ret = b.ret_value(x);
        let inner = b.def("inner", &[], vec![set_inner, ret]);
        let outer = b.def("outer", &[], vec![set_outer, inner]);
        let outer_id = outer.id;
        let module = b.module(vec![outer]);

        assert_eq!(frames(&module)[&outer_id].storage("x"), Some(Storage::Stack));
    }

    #[test]
    fn globals_are_not_classified() {
        // counter = 0
        // def f():
        //     def g():
        //         return counter
        let mut b = AstBuilder::new();
        let zero = b.int(0);
        let set = b.assign("counter", zero);
        let counter = b.name("counter");
        let ret = b.ret_value(counter);
        let g = b.def("g", &[], vec![ret]);
        let f = b.def("f", &[], vec![g]);
        let f_id = f.id;
        let module = b.module(vec![set, f]);

        let frames = frames(&module);
        assert_eq!(frames[&f_id].storage("counter"), None);
        assert_eq!(frames[&f_id].captured().count(), 0);
    }
}
