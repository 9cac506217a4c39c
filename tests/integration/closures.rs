mod common;

use common::{assert_clean, compile};
use kairos::ast::build::AstBuilder;
use kairos::ast::BinOp;
use kairos::closures::Storage;

#[test]
fn conditionally_defined_reader_captures() {
    // def outer(n):
    //     total = 0
    //     if n:
    //         def read():
    //             return total
    //     return n
    let mut b = AstBuilder::new();
    let zero = b.int(0);
    let init = b.assign("total", zero);
    let total = b.name("total");
    let ret = b.ret_value(total);
    let read = b.def("read", &[], vec![ret]);
    let read_id = read.id;
    let n = b.name("n");
    let branch = b.if_(n, vec![read], vec![]);
    let n = b.name("n");
    let ret = b.ret_value(n);
    let outer = b.def("outer", &["n"], vec![init, branch, ret]);
    let outer_id = outer.id;
    let module = b.module(vec![outer]);

    let c = compile(&module);
    assert_clean(&c);
    let frame = &c.frames[&outer_id];
    assert_eq!(frame.storage("total"), Some(Storage::Captured));
    assert_eq!(frame.storage("n"), Some(Storage::Stack));
    assert_eq!(frame.storage("read"), Some(Storage::Stack));
    assert!(c.frames[&read_id].bindings.is_empty());
}

#[test]
fn nonlocal_counter_lives_in_the_outer_frame() {
    // def counter():
    //     count = 0
    //     def bump():
    //         nonlocal count
    //         count += 1
    //     bump()
    //     return count
    let mut b = AstBuilder::new();
    let zero = b.int(0);
    let init = b.assign("count", zero);
    let decl = b.nonlocal(&["count"]);
    let one = b.int(1);
    let inc = b.aug_assign("count", BinOp::Add, one);
    let bump = b.def("bump", &[], vec![decl, inc]);
    let bump_id = bump.id;
    let call = b.call_stmt("bump", vec![]);
    let count = b.name("count");
    let ret = b.ret_value(count);
    let counter = b.def("counter", &[], vec![init, bump, call, ret]);
    let counter_id = counter.id;
    let module = b.module(vec![counter]);

    let c = compile(&module);
    assert_clean(&c);
    assert_eq!(c.frames[&counter_id].captured().collect::<Vec<_>>(), vec!["count"]);
    assert_eq!(c.frames[&bump_id].storage("count"), None);
}

#[test]
fn lambda_parameters_stay_on_the_stack() {
    // def f(k):
    //     g = lambda x: x + k
    //     return k
    let mut b = AstBuilder::new();
    let x = b.name("x");
    let k = b.name("k");
    let sum = b.binop(x, BinOp::Add, k);
    let lambda = b.lambda(&["x"], sum);
    let lambda_id = lambda.id;
    let set = b.assign("g", lambda);
    let k = b.name("k");
    let ret = b.ret_value(k);
    let f = b.def("f", &["k"], vec![set, ret]);
    let f_id = f.id;
    let module = b.module(vec![f]);

    let c = compile(&module);
    assert_clean(&c);
    assert_eq!(c.frames[&f_id].storage("k"), Some(Storage::Captured));
    assert_eq!(c.frames[&f_id].storage("g"), Some(Storage::Stack));
    assert_eq!(c.frames[&lambda_id].storage("x"), Some(Storage::Stack));
}
