use crate::common::Map;
use crate::QuotaTree;

pub fn config(pairs: &[(&str, &str)]) -> Map<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn tree(pairs: &[(&str, &str)]) -> QuotaTree {
    QuotaTree::from_config(&config(pairs)).unwrap()
}

pub fn assert_feq(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}
