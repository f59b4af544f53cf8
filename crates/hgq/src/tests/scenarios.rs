//! End-to-end allocation cycles over small configurations.

use crate::tests::utils::tree;

#[test]
fn test_single_leaf() {
    let mut t = tree(&[
        ("GROUP_NAMES", "a"),
        ("GROUP_QUOTA_a", "10"),
        ("GROUP_SORT_EXPR", "0"),
    ]);
    t.set_demand("a", 30.0);
    t.run_cycle(100.0);

    assert_eq!(t.allocation("a"), Some(10));
    assert_eq!(t.allocation("<none>"), Some(0));
}

#[test]
fn test_surplus_flows_up() {
    let mut t = tree(&[
        ("GROUP_NAMES", "a, b"),
        ("GROUP_QUOTA_a", "10"),
        ("GROUP_QUOTA_b", "10"),
        ("GROUP_ACCEPT_SURPLUS", "true"),
        ("GROUP_SORT_EXPR", "0"),
    ]);
    t.set_demand("a", 5.0);
    t.set_demand("b", 20.0);
    t.run_cycle(100.0);

    // a's unused 5 slots and the root's residue are both available, so
    // b's whole demand fits
    assert_eq!(t.allocation("a"), Some(5));
    assert_eq!(t.allocation("b"), Some(20));
    assert_eq!(t.allocation("<none>"), Some(0));
}

#[test]
fn test_surplus_refused() {
    let mut t = tree(&[
        ("GROUP_NAMES", "a, b"),
        ("GROUP_QUOTA_a", "10"),
        ("GROUP_QUOTA_b", "10"),
        ("GROUP_ACCEPT_SURPLUS_a", "true"),
        ("GROUP_ACCEPT_SURPLUS_b", "false"),
        ("GROUP_SORT_EXPR", "0"),
    ]);
    t.set_demand("a", 5.0);
    t.set_demand("b", 20.0);
    t.run_cycle(100.0);

    assert_eq!(t.allocation("a"), Some(5));
    assert_eq!(t.allocation("b"), Some(10));
    assert_eq!(t.allocation("<none>"), Some(0));
}

#[test]
fn test_dynamic_rescaling() {
    let mut t = tree(&[
        ("GROUP_NAMES", "a, b"),
        ("GROUP_QUOTA_DYNAMIC_a", "0.6"),
        ("GROUP_QUOTA_DYNAMIC_b", "0.6"),
        ("GROUP_SORT_EXPR", "0"),
    ]);
    t.set_demand("a", 1000.0);
    t.set_demand("b", 1000.0);
    t.run_cycle(100.0);

    // shares sum to 1.2 and are rescaled to 0.5 each
    assert_eq!(t.allocation("a"), Some(50));
    assert_eq!(t.allocation("b"), Some(50));
}

#[test]
fn test_round_robin_tiebreak() {
    let mut t = tree(&[
        ("GROUP_NAMES", "a, b"),
        ("GROUP_QUOTA_a", "0"),
        ("GROUP_QUOTA_b", "0"),
        ("GROUP_ACCEPT_SURPLUS", "true"),
        ("GROUP_SORT_EXPR", "0"),
    ]);
    t.set_demand("a", 10.0);
    t.set_demand("b", 10.0);
    t.set_rr_time("a", 1.0);
    t.set_rr_time("b", 2.0);
    t.run_cycle(5.0);

    // the even split leaves one contested slot, won by the group with the
    // older service time
    assert_eq!(t.allocation("a"), Some(3));
    assert_eq!(t.allocation("b"), Some(2));
    assert!(t.group(t.find("a").unwrap()).rr);
}

#[test]
fn test_missing_parent() {
    let mut t = tree(&[("GROUP_NAMES", "a.b.c"), ("GROUP_SORT_EXPR", "0")]);
    assert_eq!(t.len(), 1);
    assert!(t.find("a.b.c").is_none());

    // the tree still cycles, with nothing to allocate
    t.run_cycle(100.0);
    assert_eq!(t.allocation("<none>"), Some(0));
}

#[test]
fn test_nested_tree_cycle() {
    let mut t = tree(&[
        ("GROUP_NAMES", "eng, eng.build, eng.test, sci"),
        ("GROUP_QUOTA_eng", "40"),
        ("GROUP_QUOTA_eng.build", "25"),
        ("GROUP_QUOTA_eng.test", "15"),
        ("GROUP_QUOTA_sci", "30"),
        ("GROUP_ACCEPT_SURPLUS", "true"),
        ("GROUP_SORT_EXPR", "0"),
    ]);
    t.set_demand("eng.build", 30.0);
    t.set_demand("eng.test", 10.0);
    t.set_demand("sci", 60.0);
    t.run_cycle(100.0);

    // demand total matches the pool: everyone is eventually satisfied
    assert_eq!(t.allocation("eng.build"), Some(30));
    assert_eq!(t.allocation("eng.test"), Some(10));
    assert_eq!(t.allocation("sci"), Some(60));
    assert_eq!(t.allocation("eng"), Some(0));
    assert_eq!(t.allocation("<none>"), Some(0));
}

#[test]
fn test_second_cycle_after_reset() {
    let mut t = tree(&[
        ("GROUP_NAMES", "a, b"),
        ("GROUP_QUOTA_a", "10"),
        ("GROUP_QUOTA_b", "10"),
        ("GROUP_SORT_EXPR", "0"),
    ]);
    t.set_demand("a", 8.0);
    t.run_cycle(100.0);
    assert_eq!(t.allocation("a"), Some(8));

    t.reset_cycle();
    t.set_demand("b", 3.0);
    t.run_cycle(100.0);
    assert_eq!(t.allocation("a"), Some(0));
    assert_eq!(t.allocation("b"), Some(3));
}
