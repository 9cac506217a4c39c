mod common;

use common::{assert_clean, compile, compile_with, errors};
use kairos::ast::build::AstBuilder;
use kairos::ast::BinOp;
use kairos::config::CompilerConfig;
use kairos::typeck::env::CallTarget;
use kairos::typeck::types::Ty;

#[test]
fn call_site_fixes_parameter_width() {
    // def scale(x): return x * 2
    // def main(): return scale(int64(5))
    let mut b = AstBuilder::new();
    let x = b.name("x");
    let two = b.int(2);
    let product = b.binop(x, BinOp::Mul, two);
    let ret = b.ret_value(product);
    let scale = b.def("scale", &["x"], vec![ret]);
    let scale_id = scale.id;
    let five = b.int(5);
    let wide = b.call("int64", vec![five]);
    let call = b.call("scale", vec![wide]);
    let call_id = call.id;
    let ret = b.ret_value(call);
    let main = b.def("main", &[], vec![ret]);
    let main_id = main.id;
    let module = b.module(vec![scale, main]);

    let c = compile(&module);
    assert_clean(&c);
    let sig = &c.types.functions[&scale_id].ty;
    assert_eq!(sig.params[0].ty, Ty::int(64));
    assert_eq!(*sig.ret, Ty::int(64));
    assert_eq!(*c.types.functions[&main_id].ty.ret, Ty::int(64));
    assert_eq!(c.types.calls[&call_id], CallTarget::Function { def: scale_id, bound: false });
}

#[test]
fn unconstrained_literals_take_the_configured_width() {
    let mut b = AstBuilder::new();
    let seven = b.int(7);
    let set = b.assign("n", seven);
    let f = b.def("f", &[], vec![set]);
    let f_id = f.id;
    let module = b.module(vec![f]);

    let c = compile(&module);
    assert_eq!(c.types.binding_ty(f_id, "n"), Some(&Ty::int(32)));

    let config = CompilerConfig { default_int_width: 64, ..CompilerConfig::default() };
    let c = compile_with(&module, &config);
    assert_eq!(c.types.binding_ty(f_id, "n"), Some(&Ty::int(64)));
}

#[test]
fn ill_typed_function_is_dropped_and_others_continue() {
    // def bad(): x = 1; x = "s"
    // def good(): delay_mu(10)
    let mut b = AstBuilder::new();
    let one = b.int(1);
    let first = b.assign("x", one);
    let s = b.str("s");
    let second = b.assign("x", s);
    let bad = b.def("bad", &[], vec![first, second]);
    let bad_id = bad.id;
    let wait = b.delay_mu(10);
    let good = b.def("good", &[], vec![wait]);
    let good_id = good.id;
    let module = b.module(vec![bad, good]);

    let c = compile(&module);
    assert_eq!(errors(&c), vec!["cannot unify int with str"]);
    assert!(!c.types.functions.contains_key(&bad_id));
    assert!(!c.graphs.contains_key(&bad_id));
    assert!(!c.frames.contains_key(&bad_id));
    assert!(c.types.functions.contains_key(&good_id));
    assert!(c.graphs.contains_key(&good_id));
    assert_eq!(c.delays[&good_id].to_string(), "10");
}

#[test]
fn inheritance_is_rejected() {
    let mut b = AstBuilder::new();
    let base = b.name("Exception");
    let pass = b.pass();
    let class = b.class_with_bases("Device", vec![base], vec![pass]);
    let module = b.module(vec![class]);

    let c = compile(&module);
    assert_eq!(errors(&c), vec!["inheritance is not supported"]);
}

#[test]
fn method_receiver_is_unified_with_the_instance() {
    // class Ttl:
    //     def __init__(self, channel): self.channel = channel
    //     def pulse(self, t): rtio_output(self.channel, 1); delay_mu(t)
    // def main(): Ttl(4).pulse(100)
    let mut b = AstBuilder::new();
    let slf = b.name("self");
    let field = b.attr(slf, "channel");
    let ch = b.name("channel");
    let store = b.assign_to(field, ch);
    let init = b.def("__init__", &["self", "channel"], vec![store]);
    let slf = b.name("self");
    let field = b.attr(slf, "channel");
    let one = b.int(1);
    let out = b.call_stmt("rtio_output", vec![field, one]);
    let t = b.name("t");
    let wait = b.call_stmt("delay_mu", vec![t]);
    let pulse = b.def("pulse", &["self", "t"], vec![out, wait]);
    let pulse_id = pulse.id;
    let class = b.class("Ttl", vec![init, pulse]);
    let class_id = class.id;
    let four = b.int(4);
    let ttl = b.call("Ttl", vec![four]);
    let hundred = b.int(100);
    let call = b.method_call(ttl, "pulse", vec![hundred]);
    let stmt = b.expr_stmt(call);
    let main = b.def("main", &[], vec![stmt]);
    let main_id = main.id;
    let module = b.module(vec![class, main]);

    let c = compile(&module);
    assert_clean(&c);
    assert_eq!(c.types.classes[&class_id].field("channel"), Some(&Ty::int(32)));
    assert_eq!(c.delays[&pulse_id].to_string(), "t");
    assert_eq!(c.delays[&main_id].to_string(), "100");
}

#[test]
fn exceptions_of_different_kinds_share_a_type() {
    // def f():
    //     e = ValueError("a")
    //     e = RuntimeError("b")
    //     raise e
    let mut b = AstBuilder::new();
    let msg = b.str("a");
    let first = b.call("ValueError", vec![msg]);
    let set_first = b.assign("e", first);
    let msg = b.str("b");
    let second = b.call("RuntimeError", vec![msg]);
    let set_second = b.assign("e", second);
    let e = b.name("e");
    let raise = b.raise(Some(e));
    let f = b.def("f", &[], vec![set_first, set_second, raise]);
    let module = b.module(vec![f]);

    assert_clean(&compile(&module));
}

#[test]
fn tuple_repetition_by_a_literal_count() {
    // def f(): small = (1, 2) * 3; huge = (1, 2) * 4611686018427387903
    let mut b = AstBuilder::new();
    let one = b.int(1);
    let two = b.int(2);
    let pair = b.tuple(vec![one, two]);
    let three = b.int(3);
    let small = b.binop(pair, BinOp::Mul, three);
    let small = b.assign("small", small);
    let f = b.def("f", &[], vec![small]);
    let f_id = f.id;
    let one = b.int(1);
    let two = b.int(2);
    let pair = b.tuple(vec![one, two]);
    let count = b.int(i64::MAX / 2);
    let huge = b.binop(pair, BinOp::Mul, count);
    let huge = b.assign("huge", huge);
    let g = b.def("g", &[], vec![huge]);
    let g_id = g.id;
    let module = b.module(vec![f, g]);

    let c = compile(&module);
    assert_eq!(errors(&c), vec!["tuple repetition longer than 1024 elements"]);
    match c.types.binding_ty(f_id, "small") {
        Some(Ty::Tuple(elts)) => assert_eq!(elts.len(), 6),
        other => panic!("expected a tuple, got {other:?}"),
    }
    assert!(!c.types.functions.contains_key(&g_id));
}
