//! Additively mergeable snapshot of a layer's metrics and pass/fail counts,
//! rolled upward through the tree at every heartbeat.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub metrics: BTreeMap<String, i64>,
    pub sub_total: u32,
    pub sub_active: u32,
    pub sub_passed: u32,
    pub sub_failed: u32,
    pub failed_ids: Vec<Vec<String>>,
}

impl Summary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefixes every failed-id path with `context`, for folding a child's
    /// summary into its parent's.
    pub fn contextualise(mut self, context: &str) -> Self {
        for path in &mut self.failed_ids {
            path.insert(0, context.to_string());
        }
        self
    }

    /// Merges `other` into `self` in place. Associative and commutative on
    /// every field: repeated application in any order yields the same totals.
    pub fn merge(&mut self, other: &Summary) {
        for (name, value) in &other.metrics {
            *self.metrics.entry(name.clone()).or_insert(0) += value;
        }
        self.sub_total += other.sub_total;
        self.sub_active += other.sub_active;
        self.sub_passed += other.sub_passed;
        self.sub_failed += other.sub_failed;
        self.failed_ids.extend(other.failed_ids.iter().cloned());
    }

    pub fn merged(summaries: impl IntoIterator<Item = Summary>) -> Summary {
        let mut base = Summary::new();
        for s in summaries {
            base.merge(&s);
        }
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with(total: u32, passed: u32) -> Summary {
        Summary {
            sub_total: total,
            sub_passed: passed,
            ..Default::default()
        }
    }

    #[test]
    fn merge_is_commutative() {
        let mut a = with(1, 1);
        let b = with(2, 0);
        let mut a_then_b = a.clone();
        a_then_b.merge(&b);
        let mut b_then_a = b.clone();
        b_then_a.merge(&a);
        assert_eq!(a_then_b, b_then_a);
        a.merge(&b);
        assert_eq!(a.sub_total, 3);
    }

    #[test]
    fn merge_is_associative() {
        let a = with(1, 0);
        let b = with(2, 1);
        let c = with(3, 0);

        let mut ab_c = a.clone();
        ab_c.merge(&b);
        ab_c.merge(&c);

        let mut bc = b.clone();
        bc.merge(&c);
        let mut a_bc = a.clone();
        a_bc.merge(&bc);

        assert_eq!(ab_c, a_bc);
    }

    #[test]
    fn contextualise_prefixes_failed_ids() {
        let mut s = Summary::new();
        s.failed_ids.push(vec!["x".to_string()]);
        let s = s.contextualise("parent");
        assert_eq!(
            s.failed_ids,
            vec![vec!["parent".to_string(), "x".to_string()]]
        );
    }

    #[test]
    fn unseen_metric_adopted_at_zero_base() {
        let mut base = Summary::new();
        let mut child = Summary::new();
        child.metrics.insert("new_metric".to_string(), 5);
        base.merge(&child);
        assert_eq!(base.metrics.get("new_metric"), Some(&5));
    }
}
