mod common;

use common::{assert_clean, compile, errors};
use insta::assert_snapshot;
use kairos::ast::build::AstBuilder;
use kairos::ast::Module;
use kairos::cfg::trace::{trace, LiteralOracle, Outcome, Trace};
use kairos::cfg::Instr;
use kairos::exceptions::ExceptionKind;
use kairos::scope::function_bodies;
use kairos::span::NodeId;

fn run(module: &Module, function: NodeId, oracle: &mut LiteralOracle) -> Trace {
    let c = compile(module);
    assert_clean(&c);
    let body = function_bodies(module)[&function];
    trace(&c.graphs[&function], body, &c.types, oracle)
}

#[test]
fn finally_runs_once_when_nothing_catches() {
    // def f():
    //     try:
    //         raise ValueError("boom")
    //     finally:
    //         print("cleanup")
    let mut b = AstBuilder::new();
    let raise = b.raise_kind("ValueError", "boom");
    let raise_id = raise.id;
    let cleanup = b.print("cleanup");
    let cleanup_id = cleanup.id;
    let tr = b.try_(vec![raise], vec![], vec![], vec![cleanup]);
    let f = b.def("f", &[], vec![tr]);
    let f_id = f.id;
    let module = b.module(vec![f]);

    let t = run(&module, f_id, &mut LiteralOracle::new());
    assert_eq!(t.executed(), vec![cleanup_id]);
    assert_eq!(t.outcome, Outcome::Uncaught { kind: ExceptionKind::ValueError, origin: raise_id });
}

#[test]
fn finally_runs_before_the_outer_handler() {
    // try:
    //     try:
    //         raise ValueError("boom")
    //     finally:
    //         print("inner")
    // except ValueError:
    //     print("caught")
    let mut b = AstBuilder::new();
    let raise = b.raise_kind("ValueError", "boom");
    let inner_print = b.print("inner");
    let inner_id = inner_print.id;
    let inner = b.try_(vec![raise], vec![], vec![], vec![inner_print]);
    let caught = b.print("caught");
    let caught_id = caught.id;
    let handler = b.handler(Some("ValueError"), None, vec![caught]);
    let outer = b.try_(vec![inner], vec![handler], vec![], vec![]);
    let f = b.def("f", &[], vec![outer]);
    let f_id = f.id;
    let module = b.module(vec![f]);

    let t = run(&module, f_id, &mut LiteralOracle::new());
    assert_eq!(t.executed(), vec![inner_id, caught_id]);
    assert_eq!(t.outcome, Outcome::Returned(None));
}

#[test]
fn specific_handler_wins_over_an_earlier_catch_all() {
    // try:
    //     raise ValueError("boom")
    // except Exception:
    //     print("general")
    // except ValueError:
    //     print("specific")
    let mut b = AstBuilder::new();
    let raise = b.raise_kind("ValueError", "boom");
    let general = b.print("general");
    let general_handler = b.handler(Some("Exception"), None, vec![general]);
    let specific = b.print("specific");
    let specific_id = specific.id;
    let specific_handler = b.handler(Some("ValueError"), None, vec![specific]);
    let tr = b.try_(vec![raise], vec![general_handler, specific_handler], vec![], vec![]);
    let f = b.def("f", &[], vec![tr]);
    let f_id = f.id;
    let module = b.module(vec![f]);

    let t = run(&module, f_id, &mut LiteralOracle::new());
    assert_eq!(t.executed(), vec![specific_id]);
}

#[test]
fn bare_raise_keeps_where_the_exception_came_from() {
    // try:
    //     raise ValueError("boom")
    // except ValueError:
    //     raise
    let mut b = AstBuilder::new();
    let raise = b.raise_kind("ValueError", "boom");
    let raise_id = raise.id;
    let reraise = b.raise(None);
    let handler = b.handler(Some("ValueError"), None, vec![reraise]);
    let tr = b.try_(vec![raise], vec![handler], vec![], vec![]);
    let f = b.def("f", &[], vec![tr]);
    let f_id = f.id;
    let module = b.module(vec![f]);

    let t = run(&module, f_id, &mut LiteralOracle::new());
    assert_eq!(t.outcome, Outcome::Uncaught { kind: ExceptionKind::ValueError, origin: raise_id });
}

#[test]
fn bare_raise_of_an_injected_exception_keeps_its_statement() {
    // try:
    //     print("work")    # raises KeyError
    // except Exception:
    //     raise
    let mut b = AstBuilder::new();
    let work = b.print("work");
    let work_id = work.id;
    let reraise = b.raise(None);
    let handler = b.handler(Some("Exception"), None, vec![reraise]);
    let tr = b.try_(vec![work], vec![handler], vec![], vec![]);
    let f = b.def("f", &[], vec![tr]);
    let f_id = f.id;
    let module = b.module(vec![f]);

    let mut oracle = LiteralOracle::new().raising_at(work_id, ExceptionKind::KeyError);
    let t = run(&module, f_id, &mut oracle);
    assert_eq!(t.outcome, Outcome::Uncaught { kind: ExceptionKind::KeyError, origin: work_id });
}

#[test]
fn return_value_survives_a_finally_that_completes() {
    // try:
    //     return 1
    // finally:
    //     print("cleanup")
    let mut b = AstBuilder::new();
    let one = b.int(1);
    let one_id = one.id;
    let ret = b.ret_value(one);
    let cleanup = b.print("cleanup");
    let cleanup_id = cleanup.id;
    let tr = b.try_(vec![ret], vec![], vec![], vec![cleanup]);
    let f = b.def("f", &[], vec![tr]);
    let f_id = f.id;
    let module = b.module(vec![f]);

    let t = run(&module, f_id, &mut LiteralOracle::new());
    assert_eq!(t.executed(), vec![cleanup_id]);
    assert_eq!(t.outcome, Outcome::Returned(Some(one_id)));
}

#[test]
fn return_in_finally_discards_the_exception() {
    // try:
    //     raise ValueError("boom")
    // finally:
    //     return 1
    let mut b = AstBuilder::new();
    let raise = b.raise_kind("ValueError", "boom");
    let one = b.int(1);
    let one_id = one.id;
    let ret = b.ret_value(one);
    let tr = b.try_(vec![raise], vec![], vec![], vec![ret]);
    let f = b.def("f", &[], vec![tr]);
    let f_id = f.id;
    let module = b.module(vec![f]);

    let t = run(&module, f_id, &mut LiteralOracle::new());
    assert_eq!(t.outcome, Outcome::Returned(Some(one_id)));
}

#[test]
fn return_in_finally_overrides_an_earlier_return() {
    // try:
    //     return 1
    // finally:
    //     return 2
    let mut b = AstBuilder::new();
    let one = b.int(1);
    let first = b.ret_value(one);
    let two = b.int(2);
    let two_id = two.id;
    let second = b.ret_value(two);
    let tr = b.try_(vec![first], vec![], vec![], vec![second]);
    let f = b.def("f", &[], vec![tr]);
    let f_id = f.id;
    let module = b.module(vec![f]);

    let t = run(&module, f_id, &mut LiteralOracle::new());
    assert_eq!(t.outcome, Outcome::Returned(Some(two_id)));
}

#[test]
fn break_skips_the_else_clause() {
    // for x in [1, 2]:
    //     break
    // else:
    //     print("exhausted")
    // print("after")
    let mut b = AstBuilder::new();
    let one = b.int(1);
    let two = b.int(2);
    let items = b.list(vec![one, two]);
    let brk = b.break_();
    let exhausted = b.print("exhausted");
    let lp = b.for_("x", items, vec![brk], vec![exhausted]);
    let after = b.print("after");
    let after_id = after.id;
    let f = b.def("f", &[], vec![lp, after]);
    let f_id = f.id;
    let module = b.module(vec![f]);

    let t = run(&module, f_id, &mut LiteralOracle::new());
    assert_eq!(t.executed(), vec![after_id]);
}

#[test]
fn exhausted_loop_runs_the_else_clause() {
    let mut b = AstBuilder::new();
    let one = b.int(1);
    let items = b.list(vec![one]);
    let pass = b.pass();
    let pass_id = pass.id;
    let exhausted = b.print("exhausted");
    let exhausted_id = exhausted.id;
    let lp = b.for_("x", items, vec![pass], vec![exhausted]);
    let f = b.def("f", &[], vec![lp]);
    let f_id = f.id;
    let module = b.module(vec![f]);

    let t = run(&module, f_id, &mut LiteralOracle::new());
    assert_eq!(t.executed(), vec![pass_id, exhausted_id]);
}

#[test]
fn break_runs_the_finally_on_its_way_out() {
    // for i in range(3):
    //     try:
    //         break
    //     finally:
    //         print("cleanup")
    // print("after")
    let mut b = AstBuilder::new();
    let brk = b.break_();
    let cleanup = b.print("cleanup");
    let cleanup_id = cleanup.id;
    let tr = b.try_(vec![brk], vec![], vec![], vec![cleanup]);
    let three = b.int(3);
    let lp = b.for_range("i", vec![three], vec![tr]);
    let after = b.print("after");
    let after_id = after.id;
    let f = b.def("f", &[], vec![lp, after]);
    let f_id = f.id;
    let module = b.module(vec![f]);

    let t = run(&module, f_id, &mut LiteralOracle::new());
    assert_eq!(t.executed(), vec![cleanup_id, after_id]);
    assert_eq!(t.outcome, Outcome::Returned(None));
}

#[test]
fn continue_runs_the_finally_on_every_iteration() {
    // for i in range(2):
    //     try:
    //         continue
    //     finally:
    //         print("cleanup")
    // print("after")
    let mut b = AstBuilder::new();
    let cont = b.continue_();
    let cleanup = b.print("cleanup");
    let cleanup_id = cleanup.id;
    let tr = b.try_(vec![cont], vec![], vec![], vec![cleanup]);
    let two = b.int(2);
    let lp = b.for_range("i", vec![two], vec![tr]);
    let after = b.print("after");
    let after_id = after.id;
    let f = b.def("f", &[], vec![lp, after]);
    let f_id = f.id;
    let module = b.module(vec![f]);

    let t = run(&module, f_id, &mut LiteralOracle::new());
    assert_eq!(t.executed(), vec![cleanup_id, cleanup_id, after_id]);
    assert_eq!(t.outcome, Outcome::Returned(None));
}

#[test]
fn exception_inside_with_passes_through_exit() {
    // class Guard:
    //     def __enter__(self): pass
    //     def __exit__(self, kind, value, tb): pass
    // def f():
    //     with Guard():
    //         raise ValueError("boom")
    let mut b = AstBuilder::new();
    let pass = b.pass();
    let enter = b.def("__enter__", &["self"], vec![pass]);
    let pass = b.pass();
    let exit = b.def("__exit__", &["self", "kind", "value", "tb"], vec![pass]);
    let class = b.class("Guard", vec![enter, exit]);
    let guard = b.call("Guard", vec![]);
    let item = b.with_item(guard, None);
    let item_id = item.id;
    let raise = b.raise_kind("ValueError", "boom");
    let with = b.with_(vec![item], vec![raise]);
    let f = b.def("f", &[], vec![with]);
    let f_id = f.id;
    let module = b.module(vec![class, f]);

    let t = run(&module, f_id, &mut LiteralOracle::new());
    assert_eq!(t.steps.first(), Some(&Instr::EnterContext(item_id)));
    assert!(t.steps.contains(&Instr::ExitContext { item: item_id, exception: true }));
    assert!(matches!(t.outcome, Outcome::Uncaught { kind: ExceptionKind::ValueError, .. }));
}

#[test]
fn exit_with_the_wrong_arity_is_rejected() {
    let mut b = AstBuilder::new();
    let pass = b.pass();
    let enter = b.def("__enter__", &["self"], vec![pass]);
    let pass = b.pass();
    let exit = b.def("__exit__", &["self", "kind"], vec![pass]);
    let class = b.class("Guard", vec![enter, exit]);
    let guard = b.call("Guard", vec![]);
    let item = b.with_item(guard, None);
    let pass = b.pass();
    let with = b.with_(vec![item], vec![pass]);
    let f = b.def("f", &[], vec![with]);
    let module = b.module(vec![class, f]);

    assert_eq!(
        errors(&compile(&module)),
        vec!["__exit__ must take self or (self, exc_type, exc_value, traceback)"]
    );
}

#[test]
fn break_outside_a_loop_is_rejected() {
    let mut b = AstBuilder::new();
    let brk = b.break_();
    let f = b.def("f", &[], vec![brk]);
    let f_id = f.id;
    let module = b.module(vec![f]);

    let c = compile(&module);
    assert_eq!(errors(&c), vec!["'break' outside loop"]);
    assert!(!c.graphs.contains_key(&f_id));
}

#[test]
fn if_without_else_lowers_to_a_diamond() {
    // def f(flag):
    //     if flag:
    //         print("a")
    let mut b = AstBuilder::new();
    let flag = b.name("flag"); // 1
    let print = b.print("a"); // 5
    let branch = b.if_(flag, vec![print], vec![]);
    let f = b.def("f", &["flag"], vec![branch]);
    let f_id = f.id;
    let module = b.module(vec![f]);

    let c = compile(&module);
    assert_clean(&c);
    assert_snapshot!(c.graphs[&f_id].to_string().trim_end(), @r"
    bb0:
        branch #1 ? bb1 : bb2
    bb1:
        exec #5
        goto bb2
    bb2:
        set_return none
        return
    ");
}
