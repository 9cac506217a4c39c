mod common;

use std::collections::BTreeMap;

use common::{assert_clean, compile, errors};
use kairos::ast::build::AstBuilder;
use kairos::cfg::Instr;
use kairos::delay::DelayExpr;
use kairos::span::NodeId;

#[test]
fn merged_order_follows_start_times() {
    // with interleave:
    //     with sequential:
    //         print("A"); delay_mu(2); print("B")
    //     with sequential:
    //         print("C"); delay_mu(2); print("D"); delay_mu(2); print("E")
    let mut b = AstBuilder::new();
    let mut labels: BTreeMap<NodeId, &str> = BTreeMap::new();
    let mut label = |b: &mut AstBuilder, name: &'static str| {
        let stmt = b.print(name);
        labels.insert(stmt.id, name);
        stmt
    };
    let a = label(&mut b, "A");
    let w1 = b.delay_mu(2);
    let bb = label(&mut b, "B");
    let first = b.sequential(vec![a, w1, bb]);
    let c = label(&mut b, "C");
    let w2 = b.delay_mu(2);
    let d = label(&mut b, "D");
    let w3 = b.delay_mu(2);
    let e = label(&mut b, "E");
    let second = b.sequential(vec![c, w2, d, w3, e]);
    let region = b.interleave(vec![first, second]);
    let region_id = region.id;
    let f = b.def("f", &[], vec![region]);
    let f_id = f.id;
    let module = b.module(vec![f]);

    let c = compile(&module);
    assert_clean(&c);
    let schedule = &c.schedules[&region_id];
    let order: Vec<&str> = schedule.entries.iter().filter_map(|e| labels.get(&e.stmt).copied()).collect();
    assert_eq!(order, vec!["A", "C", "B", "D", "E"]);
    assert_eq!(schedule.delay, DelayExpr::Const(4));
    assert_eq!(c.delays[&f_id], DelayExpr::Const(4));
}

#[test]
fn region_delay_is_the_longest_branch() {
    // def f(a, b):
    //     with interleave:
    //         delay_mu(a)
    //         delay_mu(b)
    let mut b = AstBuilder::new();
    let a = b.name("a");
    let wait_a = b.call_stmt("delay_mu", vec![a]);
    let bn = b.name("b");
    let wait_b = b.call_stmt("delay_mu", vec![bn]);
    let region = b.interleave(vec![wait_a, wait_b]);
    let f = b.def("f", &["a", "b"], vec![region]);
    let f_id = f.id;
    let module = b.module(vec![f]);

    let c = compile(&module);
    assert_clean(&c);
    assert_eq!(c.delays[&f_id].to_string(), "max(a, b)");
}

#[test]
fn equal_branches_do_not_add_up() {
    let mut b = AstBuilder::new();
    let first = b.delay_mu(7);
    let second = b.delay_mu(7);
    let region = b.parallel(vec![first, second]);
    let f = b.def("f", &[], vec![region]);
    let f_id = f.id;
    let module = b.module(vec![f]);

    let c = compile(&module);
    assert_clean(&c);
    assert_eq!(c.delays[&f_id], DelayExpr::Const(7));
}

#[test]
fn if_inside_region_is_rejected() {
    let mut b = AstBuilder::new();
    let cond = b.bool(true);
    let wait = b.delay_mu(1);
    let branch = b.if_(cond, vec![wait], vec![]);
    let region = b.interleave(vec![branch]);
    let f = b.def("f", &[], vec![region]);
    let f_id = f.id;
    let module = b.module(vec![f]);

    let c = compile(&module);
    assert_eq!(errors(&c), vec!["if statement cannot be interleaved"]);
    assert!(!c.delays.contains_key(&f_id));
}

#[test]
fn call_through_a_parameter_is_rejected() {
    // def f(cb):
    //     with interleave:
    //         cb()
    let mut b = AstBuilder::new();
    let call = b.call_stmt("cb", vec![]);
    let region = b.interleave(vec![call]);
    let f = b.def("f", &["cb"], vec![region]);
    let module = b.module(vec![f]);

    assert_eq!(
        errors(&compile(&module)),
        vec!["compiler could not prove the same function would always be called"]
    );
}

#[test]
fn same_channel_at_the_same_tick_conflicts() {
    let mut b = AstBuilder::new();
    let ch = b.int(3);
    let one = b.int(1);
    let first = b.call_stmt("rtio_output", vec![ch, one]);
    let ch = b.int(3);
    let zero = b.int(0);
    let second = b.call_stmt("rtio_output", vec![ch, zero]);
    let region = b.interleave(vec![first, second]);
    let f = b.def("f", &[], vec![region]);
    let module = b.module(vec![f]);

    let c = compile(&module);
    assert_eq!(errors(&c), vec!["conflicting writes to `channel 3` at the same time"]);
}

#[test]
fn different_channels_at_the_same_tick_are_fine() {
    let mut b = AstBuilder::new();
    let ch = b.int(3);
    let one = b.int(1);
    let first = b.call_stmt("rtio_output", vec![ch, one]);
    let ch = b.int(4);
    let one = b.int(1);
    let second = b.call_stmt("rtio_output", vec![ch, one]);
    let region = b.interleave(vec![first, second]);
    let f = b.def("f", &[], vec![region]);
    let module = b.module(vec![f]);

    assert_clean(&compile(&module));
}

#[test]
fn lowering_replays_the_merged_order_with_offsets() {
    let mut b = AstBuilder::new();
    let early = b.print("early");
    let early_id = early.id;
    let wait = b.delay_mu(5);
    let late = b.print("late");
    let late_id = late.id;
    let first = b.sequential(vec![wait, late]);
    let region = b.interleave(vec![first, early]);
    let region_id = region.id;
    let f = b.def("f", &[], vec![region]);
    let f_id = f.id;
    let module = b.module(vec![f]);

    let c = compile(&module);
    assert_clean(&c);
    let instrs: Vec<&Instr> = c.graphs[&f_id].blocks.iter().flat_map(|bb| bb.instrs.iter()).collect();
    let timed: Vec<String> = instrs
        .iter()
        .filter_map(|i| match i {
            Instr::AtOffset { offset, .. } => Some(format!("at {}", offset)),
            Instr::Exec(id) if *id == early_id => Some("early".to_string()),
            Instr::Exec(id) if *id == late_id => Some("late".to_string()),
            Instr::RestoreTime { advance, .. } => Some(format!("restore {}", advance)),
            _ => None,
        })
        .collect();
    assert_eq!(timed, vec!["at 0", "at 0", "early", "at 5", "late", "restore 5"]);
    assert!(matches!(instrs.first(), Some(Instr::SaveTime(r)) if *r == region_id));
}
