//! Two-scope (OWN / GROUP) metrics table for a single layer. OWN metrics are
//! set locally; GROUP metrics are recomputed from children at every
//! heartbeat. Dirty-tracked so only changed values are synced to the store.

use std::collections::BTreeMap;

use crate::store::Store;
use crate::types::MetricScope;

#[derive(Debug, Default)]
pub struct MetricsRegister {
    own: BTreeMap<String, i64>,
    group: BTreeMap<String, i64>,
    dirty: bool,
}

impl MetricsRegister {
    pub fn new() -> MetricsRegister {
        MetricsRegister::default()
    }

    pub fn set_own(&mut self, name: impl Into<String>, value: i64) {
        let name = name.into();
        if self.own.get(&name) != Some(&value) {
            self.dirty = true;
        }
        self.own.insert(name, value);
    }

    pub fn incr_own(&mut self, name: &str, delta: i64) {
        let entry = self.own.entry(name.to_string()).or_insert(0);
        *entry += delta;
        self.dirty = true;
    }

    /// Recomputes GROUP metrics as the sum of the same-named OWN metric
    /// across every child's reported metrics.
    pub fn recompute_group<'a>(
        &mut self,
        child_metrics: impl IntoIterator<Item = &'a BTreeMap<String, i64>>,
    ) {
        let mut totals = BTreeMap::new();
        for metrics in child_metrics {
            for (name, value) in metrics {
                *totals.entry(name.clone()).or_insert(0) += value;
            }
        }
        if totals != self.group {
            self.dirty = true;
        }
        self.group = totals;
    }

    pub fn own(&self) -> &BTreeMap<String, i64> {
        &self.own
    }

    pub fn group(&self) -> &BTreeMap<String, i64> {
        &self.group
    }

    /// All metrics merged for reporting upward: OWN and GROUP summed
    /// per-name, matching the additive Summary semantics.
    pub fn combined(&self) -> BTreeMap<String, i64> {
        let mut out = self.own.clone();
        for (name, value) in &self.group {
            *out.entry(name.clone()).or_insert(0) += value;
        }
        out
    }

    pub fn sync_to_store(&mut self, store: &Store) -> anyhow::Result<()> {
        if !self.dirty {
            return Ok(());
        }
        for (name, value) in &self.own {
            store.set_metric(MetricScope::Own, name, *value)?;
        }
        for (name, value) in &self.group {
            store.set_metric(MetricScope::Group, name, *value)?;
        }
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_metrics_sum_across_children() {
        let mut reg = MetricsRegister::new();
        let mut a = BTreeMap::new();
        a.insert("messages".to_string(), 2);
        let mut b = BTreeMap::new();
        b.insert("messages".to_string(), 3);
        reg.recompute_group([&a, &b]);
        assert_eq!(reg.group().get("messages"), Some(&5));
    }

    #[test]
    fn combined_sums_own_and_group() {
        let mut reg = MetricsRegister::new();
        reg.set_own("messages", 1);
        let mut child = BTreeMap::new();
        child.insert("messages".to_string(), 4);
        reg.recompute_group([&child]);
        assert_eq!(reg.combined().get("messages"), Some(&5));
    }
}
