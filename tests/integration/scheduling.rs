mod common;

use common::{assert_clean, compile, compile_with, errors};
use kairos::ast::build::AstBuilder;
use kairos::ast::BinOp;
use kairos::config::CompilerConfig;
use kairos::delay::DelayExpr;

#[test]
fn sequential_calls_add_their_delays() {
    // def f(): delay_mu(10)
    // def g(n): delay_mu(n)
    // def main(): f(); g(5)
    let mut b = AstBuilder::new();
    let wait = b.delay_mu(10);
    let f = b.def("f", &[], vec![wait]);
    let n = b.name("n");
    let wait_n = b.call_stmt("delay_mu", vec![n]);
    let g = b.def("g", &["n"], vec![wait_n]);
    let g_id = g.id;
    let call_f = b.call_stmt("f", vec![]);
    let five = b.int(5);
    let call_g = b.call_stmt("g", vec![five]);
    let main = b.def("main", &[], vec![call_f, call_g]);
    let main_id = main.id;
    let module = b.module(vec![f, g, main]);

    let c = compile(&module);
    assert_clean(&c);
    assert_eq!(c.delays[&g_id], DelayExpr::arg("n"));
    assert_eq!(c.delays[&main_id], DelayExpr::Const(15));
}

#[test]
fn symbolic_delay_survives_through_callers() {
    // def pulse(n): delay_mu(2 * n + 3)
    // def twice(m): pulse(m); pulse(m)
    let mut b = AstBuilder::new();
    let two = b.int(2);
    let n = b.name("n");
    let scaled = b.binop(two, BinOp::Mul, n);
    let three = b.int(3);
    let total = b.binop(scaled, BinOp::Add, three);
    let wait = b.call_stmt("delay_mu", vec![total]);
    let pulse = b.def("pulse", &["n"], vec![wait]);
    let pulse_id = pulse.id;
    let m = b.name("m");
    let first = b.call_stmt("pulse", vec![m]);
    let m = b.name("m");
    let second = b.call_stmt("pulse", vec![m]);
    let twice = b.def("twice", &["m"], vec![first, second]);
    let twice_id = twice.id;
    let module = b.module(vec![pulse, twice]);

    let c = compile(&module);
    assert_clean(&c);
    assert_eq!(c.delays[&pulse_id].to_string(), "2 * n + 3");
    assert_eq!(c.delays[&twice_id].to_string(), "4 * m + 6");
}

#[test]
fn seconds_are_converted_with_the_tick_rate() {
    let mut b = AstBuilder::new();
    let half = b.float(0.5);
    let wait = b.call_stmt("delay", vec![half]);
    let f = b.def("f", &[], vec![wait]);
    let f_id = f.id;
    let module = b.module(vec![f]);

    let c = compile(&module);
    assert_eq!(c.delays[&f_id], DelayExpr::Const(500_000_000));

    let config = CompilerConfig { ticks_per_second: 1000, ..CompilerConfig::default() };
    let c = compile_with(&module, &config);
    assert_eq!(c.delays[&f_id], DelayExpr::Const(500));
}

#[test]
fn loop_over_literal_list_multiplies() {
    let mut b = AstBuilder::new();
    let items: Vec<_> = (0..4).map(|i| b.int(i)).collect();
    let list = b.list(items);
    let wait = b.delay_mu(25);
    let lp = b.for_("x", list, vec![wait], vec![]);
    let f = b.def("f", &[], vec![lp]);
    let f_id = f.id;
    let module = b.module(vec![f]);

    let c = compile(&module);
    assert_clean(&c);
    assert_eq!(c.delays[&f_id], DelayExpr::Const(100));
}

#[test]
fn unequal_if_arms_are_indeterminate_outside_regions() {
    let mut b = AstBuilder::new();
    let flag = b.name("flag");
    let wait = b.delay_mu(10);
    let branch = b.if_(flag, vec![wait], vec![]);
    let f = b.def("f", &["flag"], vec![branch]);
    let f_id = f.id;
    let module = b.module(vec![f]);

    let c = compile(&module);
    assert_clean(&c);
    assert!(c.delays[&f_id].is_indeterminate());
}

#[test]
fn negative_constant_delay_is_rejected() {
    let mut b = AstBuilder::new();
    let wait = b.delay_mu(-4);
    let f = b.def("f", &[], vec![wait]);
    let module = b.module(vec![f]);

    assert_eq!(errors(&compile(&module)), vec!["negative delay of -4 ticks"]);
}

#[test]
fn functions_sharing_a_type_must_share_a_delay() {
    // def a(): delay_mu(10)
    // def b(): delay_mu(20)
    // def run(cb): cb()
    // def main(): run(a); run(b)
    let mut b = AstBuilder::new();
    let wait = b.delay_mu(10);
    let fa = b.def("a", &[], vec![wait]);
    let a_id = fa.id;
    let wait = b.delay_mu(20);
    let fb = b.def("b", &[], vec![wait]);
    let b_id = fb.id;
    let call = b.call_stmt("cb", vec![]);
    let run = b.def("run", &["cb"], vec![call]);
    let a_ref = b.name("a");
    let first = b.call_stmt("run", vec![a_ref]);
    let b_ref = b.name("b");
    let second = b.call_stmt("run", vec![b_ref]);
    let main = b.def("main", &[], vec![first, second]);
    let module = b.module(vec![fa, fb, run, main]);

    let c = compile(&module);
    assert_eq!(
        errors(&c),
        vec!["delay already constrained: 'b' takes 20 but a function of the same type takes 10"]
    );
    assert!(c.delays.contains_key(&a_id));
    assert!(!c.delays.contains_key(&b_id));
}

#[test]
fn recursion_is_indeterminate() {
    let mut b = AstBuilder::new();
    let wait = b.delay_mu(1);
    let again = b.call_stmt("spin", vec![]);
    let spin = b.def("spin", &[], vec![wait, again]);
    let spin_id = spin.id;
    let module = b.module(vec![spin]);

    let c = compile(&module);
    assert_clean(&c);
    assert_eq!(c.delays[&spin_id], DelayExpr::indeterminate("recursive call"));
}
