//! Property-based tests for symbolic delay arithmetic.
//!
//! Every constructor simplifies, so the laws are checked by evaluating both
//! sides at random parameter values.

use std::collections::BTreeMap;

use kairos::delay::DelayExpr;
use proptest::prelude::*;

const PARAMS: [&str; 3] = ["a", "b", "n"];

fn arb_leaf() -> impl Strategy<Value = DelayExpr> {
    prop_oneof![
        (0i64..500).prop_map(DelayExpr::Const),
        prop::sample::select(PARAMS.to_vec()).prop_map(DelayExpr::arg),
    ]
}

/// Unsimplified trees over the parameters in `PARAMS`.
fn arb_tree() -> impl Strategy<Value = DelayExpr> {
    arb_leaf().prop_recursive(4, 24, 3, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(x, y)| DelayExpr::Add(Box::new(x), Box::new(y))),
            (inner.clone(), inner.clone()).prop_map(|(x, y)| DelayExpr::Sub(Box::new(x), Box::new(y))),
            (0i64..8, inner.clone()).prop_map(|(k, x)| DelayExpr::Mul(Box::new(DelayExpr::Const(k)), Box::new(x))),
            (inner.clone(), 1i64..6).prop_map(|(x, k)| DelayExpr::FloorDiv(Box::new(x), Box::new(DelayExpr::Const(k)))),
            prop::collection::vec(inner, 1..4).prop_map(DelayExpr::Max),
        ]
    })
}

fn arb_args() -> impl Strategy<Value = BTreeMap<String, i64>> {
    (0i64..1000, 0i64..1000, 0i64..1000).prop_map(|(a, b, n)| {
        [("a", a), ("b", b), ("n", n)].into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    })
}

proptest! {
    /// Property: simplification never changes the value of an expression
    #[test]
    fn prop_simplify_preserves_value(tree in arb_tree(), args in arb_args()) {
        let simplified = tree.simplify();
        if let Some(expected) = tree.eval(&args) {
            prop_assert!(!simplified.is_indeterminate(), "{} simplified to {}", tree, simplified);
            prop_assert_eq!(simplified.eval(&args), Some(expected), "{} vs {}", tree, simplified);
        }
    }

    /// Property: simplifying twice gives the same expression as once
    #[test]
    fn prop_simplify_is_idempotent(tree in arb_tree()) {
        let once = tree.simplify();
        prop_assert_eq!(once.simplify(), once);
    }

    /// Property: sequential composition adds
    #[test]
    fn prop_add_is_additive(x in arb_tree(), y in arb_tree(), args in arb_args()) {
        if let (Some(vx), Some(vy)) = (x.eval(&args), y.eval(&args)) {
            let sum = DelayExpr::add(x.simplify(), y.simplify());
            prop_assert_eq!(sum.eval(&args), Some(vx + vy));
        }
    }

    /// Property: sequential composition does not depend on order
    #[test]
    fn prop_add_commutes(x in arb_tree(), y in arb_tree()) {
        prop_assert_eq!(DelayExpr::add(x.clone(), y.clone()), DelayExpr::add(y, x));
    }

    /// Property: a parallel region lasts as long as its longest branch
    #[test]
    fn prop_max_is_the_longest_branch(branches in prop::collection::vec(arb_tree(), 1..5), args in arb_args()) {
        let values: Option<Vec<i64>> = branches.iter().map(|b| b.eval(&args)).collect();
        if let Some(values) = values {
            let longest = values.into_iter().max();
            prop_assert_eq!(DelayExpr::max(branches).eval(&args), longest);
        }
    }

    /// Property: a branch equal to another adds nothing to a parallel region
    #[test]
    fn prop_max_of_equal_branches_collapses(x in arb_tree()) {
        let simplified = x.simplify();
        prop_assert_eq!(DelayExpr::max(vec![x.clone(), x]), simplified);
    }

    /// Property: constant offsets are recognised however the sum was built
    #[test]
    fn prop_const_difference_of_shifted_expression(x in arb_tree(), k in -1000i64..1000) {
        let shifted = DelayExpr::add(x.clone(), DelayExpr::Const(k));
        prop_assert_eq!(DelayExpr::const_difference(&shifted, &x), Some(k));
    }
}
