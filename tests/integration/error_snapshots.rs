//! Snapshot tests for rendered diagnostics.
//!
//! The builder gives node n the span `n*10..n*10+5`, so spans in the
//! snapshots follow from the order nodes are created in.
//! Run `cargo insta review` to review changes.

mod common;

use common::compile;
use insta::assert_snapshot;
use kairos::ast::build::AstBuilder;
use kairos::diagnostics::{render, render_plain};

#[test]
fn while_inside_interleave() {
    let mut b = AstBuilder::new();
    let cond = b.bool(true); // 1
    let pass = b.pass(); // 2
    let lp = b.while_(cond, vec![pass], vec![]); // 3
    let region = b.interleave(vec![lp]);
    let f = b.def("f", &[], vec![region]);
    let module = b.module(vec![f]);

    let c = compile(&module);
    assert_snapshot!(render_plain(c.diagnostics.records()).trim_end(), @"error[control-flow] 30..35: while statement cannot be interleaved");
}

#[test]
fn unordered_interleaved_events() {
    // def f(n, m):
    //     with interleave:
    //         with sequential:
    //             delay_mu(n)
    //             print("a")
    //         with sequential:
    //             delay_mu(m)
    //             print("b")
    let mut b = AstBuilder::new();
    let n = b.name("n");
    let wait_n = b.call_stmt("delay_mu", vec![n]); // 4
    let print_a = b.print("a"); // 8
    let first = b.sequential(vec![wait_n, print_a]);
    let m = b.name("m");
    let wait_m = b.call_stmt("delay_mu", vec![m]); // 15
    let print_b = b.print("b"); // 19
    let second = b.sequential(vec![wait_m, print_b]);
    let region = b.interleave(vec![first, second]);
    let f = b.def("f", &["n", "m"], vec![region]);
    let module = b.module(vec![f]);

    let c = compile(&module);
    assert_snapshot!(render_plain(c.diagnostics.records()).trim_end(), @r"
    error[timing] 150..155: cannot order interleaved events statically
      note 80..85: this statement starts at n
      note 150..155: this statement starts at 0
    ");
}

#[test]
fn read_before_assignment_on_some_path() {
    // def f(t):
    //     if t:
    //         x = 1
    //     return x
    let mut b = AstBuilder::new();
    let t = b.name("t");
    let one = b.int(1);
    let set = b.assign("x", one);
    let branch = b.if_(t, vec![set], vec![]);
    let x = b.name("x"); // 6
    let ret = b.ret_value(x);
    let f = b.def("f", &["t"], vec![branch, ret]);
    let module = b.module(vec![f]);

    let c = compile(&module);
    assert_snapshot!(render_plain(c.diagnostics.records()).trim_end(), @"error[name] 60..65: variable 'x' is not always initialized");
}

#[test]
fn annotated_rendering_names_the_error() {
    let mut b = AstBuilder::new();
    let cond = b.bool(true);
    let pass = b.pass();
    let branch = b.if_(cond, vec![pass], vec![]);
    let region = b.interleave(vec![branch]);
    let f = b.def("f", &[], vec![region]);
    let module = b.module(vec![f]);

    let c = compile(&module);
    let source = " ".repeat(200);
    let rendered = render(&source, c.diagnostics.records());
    assert!(rendered.contains("control-flow error"), "{rendered}");
    assert!(rendered.contains("if statement cannot be interleaved"), "{rendered}");
}
