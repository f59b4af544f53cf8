use serde::{Deserialize, Serialize};

use crate::entry::{GroupId, QuotaTree};
use crate::expr::{Value, ATTR_GROUP_QUOTA, ATTR_GROUP_RESOURCES_IN_USE};

/// Final per-group result of an allocation cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupAllocation {
    pub name: String,
    /// Whole slots granted to this group alone.
    pub allocated: u64,
    /// True when any part of the allocation came from round-robin.
    pub rr: bool,
    /// Demand as injected at the start of the cycle.
    pub currently_requested: f64,
}

impl QuotaTree {
    /// Inject demand for one group. Returns false (with a warning) when the
    /// group is unknown; cycles themselves never fail.
    pub fn set_demand(&mut self, name: &str, requested: f64) -> bool {
        match self.find(name) {
            Some(id) => {
                let entry = &mut self.groups[id];
                entry.requested = requested;
                entry.currently_requested = requested;
                true
            }
            None => {
                log::warn!("demand injected for unknown group \"{name}\", ignoring");
                false
            }
        }
    }

    /// Record the last round-robin service time for one group; older times
    /// are served first.
    pub fn set_rr_time(&mut self, name: &str, rr_time: f64) -> bool {
        match self.find(name) {
            Some(id) => {
                self.groups[id].rr_time = rr_time;
                true
            }
            None => {
                log::warn!("rr time injected for unknown group \"{name}\", ignoring");
                false
            }
        }
    }

    /// Record observed usage for one group; consumed by sort expressions.
    pub fn set_usage(&mut self, name: &str, usage: f64) -> bool {
        match self.find(name) {
            Some(id) => {
                self.groups[id].usage = usage;
                true
            }
            None => {
                log::warn!("usage injected for unknown group \"{name}\", ignoring");
                false
            }
        }
    }

    /// Run one full allocation cycle against the given pool size: quota
    /// assignment, fairshare with surplus cascading, then round-robin
    /// remainder recovery. Demand must have been injected beforehand;
    /// afterwards every `allocated` value is a whole number of slots.
    pub fn run_cycle(&mut self, pool: f64) {
        self.assign_quotas(pool);
        let surplus = self.fairshare();
        log::debug!("fairshare left surplus = {surplus}");
        let surplus = self.recover_remainders();
        log::debug!("cycle complete, unallocated surplus = {surplus}");
    }

    /// Whole slots granted to the named group in the last cycle.
    pub fn allocation(&self, name: &str) -> Option<u64> {
        let id = self.find(name)?;
        let allocated = self.groups[id].allocated;
        debug_assert!(allocated >= 0.0 && allocated.fract() == 0.0);
        Some(allocated as u64)
    }

    /// Final allocations for all groups, parents before children.
    pub fn allocations(&self) -> Vec<GroupAllocation> {
        self.bfs_order
            .iter()
            .map(|&id| {
                let entry = &self.groups[id];
                GroupAllocation {
                    name: entry.name.clone(),
                    allocated: entry.allocated as u64,
                    rr: entry.rr,
                    currently_requested: entry.currently_requested,
                }
            })
            .collect()
    }

    /// Evaluate every group's sort expression against its ad and store the
    /// numeric result in `sort_key`. Groups whose expression does not yield
    /// a number sort last.
    pub fn evaluate_sort_keys(&mut self) {
        for entry in self.groups.iter_mut() {
            entry
                .sort_ad
                .assign(ATTR_GROUP_QUOTA, Value::Number(entry.quota));
            entry
                .sort_ad
                .assign(ATTR_GROUP_RESOURCES_IN_USE, Value::Number(entry.usage));
            entry.sort_key = match entry.sort_ad.evaluate() {
                Value::Number(key) => key,
                other => {
                    log::debug!(
                        "sort expression for group {} evaluated to {other:?}, sorting last",
                        entry.name
                    );
                    f64::MAX
                }
            };
        }
    }

    /// Group ids ordered by ascending `sort_key`; ties keep breadth-first
    /// order. Callers run `evaluate_sort_keys` first.
    pub fn groups_by_sort_key(&self) -> Vec<GroupId> {
        let mut ids = self.bfs_order.clone();
        ids.sort_by(|&a, &b| self.groups[a].sort_key.total_cmp(&self.groups[b].sort_key));
        ids
    }
}

#[cfg(test)]
mod tests {
    use crate::tests::utils::tree;

    #[test]
    fn test_single_leaf_cycle() {
        let mut t = tree(&[
            ("GROUP_NAMES", "a"),
            ("GROUP_QUOTA_a", "10"),
            ("GROUP_SORT_EXPR", "0"),
        ]);
        t.set_demand("a", 30.0);
        t.run_cycle(100.0);

        assert_eq!(t.allocation("a"), Some(10));
        assert_eq!(t.allocation("<none>"), Some(0));
        assert_eq!(t.allocation("nosuch"), None);
    }

    #[test]
    fn test_unknown_group_injection_ignored() {
        let mut t = tree(&[("GROUP_NAMES", "a"), ("GROUP_SORT_EXPR", "0")]);
        assert!(!t.set_demand("ghost", 5.0));
        assert!(!t.set_rr_time("ghost", 1.0));
        assert!(!t.set_usage("ghost", 1.0));
        assert!(t.set_demand("A", 5.0));
    }

    #[test]
    fn test_allocations_snapshot() {
        let mut t = tree(&[
            ("GROUP_NAMES", "a, b"),
            ("GROUP_QUOTA_a", "10"),
            ("GROUP_QUOTA_b", "10"),
            ("GROUP_SORT_EXPR", "0"),
        ]);
        t.set_demand("a", 4.0);
        t.set_demand("b", 12.0);
        t.run_cycle(100.0);

        let report = t.allocations();
        assert_eq!(report.len(), 3);
        assert_eq!(report[0].name, "<none>");
        let a = report.iter().find(|g| g.name == "a").unwrap();
        assert_eq!(a.allocated, 4);
        assert_eq!(a.currently_requested, 4.0);
        let b = report.iter().find(|g| g.name == "b").unwrap();
        assert_eq!(b.allocated, 10);
        assert_eq!(b.currently_requested, 12.0);
    }

    #[test]
    fn test_sort_keys() {
        let mut t = tree(&[
            ("GROUP_NAMES", "busy, idle"),
            ("GROUP_QUOTA_busy", "10"),
            ("GROUP_QUOTA_idle", "10"),
            (
                "GROUP_SORT_EXPR",
                "ifThenElse(AccountingGroup =?= \"<none>\", 3.4e+38, \
                 divide(GroupResourcesInUse, GroupQuota))",
            ),
        ]);
        t.set_usage("busy", 8.0);
        t.set_usage("idle", 2.0);
        t.assign_quotas(100.0);
        t.evaluate_sort_keys();

        let busy = t.group(t.find("busy").unwrap());
        let idle = t.group(t.find("idle").unwrap());
        assert_eq!(busy.sort_key, 0.8);
        assert_eq!(idle.sort_key, 0.2);
        assert_eq!(t.group(t.root()).sort_key, 3.4e38);

        let order = t.groups_by_sort_key();
        assert_eq!(order[0], t.find("idle").unwrap());
        assert_eq!(order[1], t.find("busy").unwrap());
        assert_eq!(order[2], t.root());
    }

    #[test]
    fn test_sort_key_undefined_sorts_last() {
        let mut t = tree(&[
            ("GROUP_NAMES", "a, zero"),
            ("GROUP_QUOTA_a", "10"),
            ("GROUP_QUOTA_zero", "0"),
            ("GROUP_SORT_EXPR", "divide(GroupResourcesInUse, GroupQuota)"),
        ]);
        t.set_usage("a", 5.0);
        t.set_usage("zero", 5.0);
        t.assign_quotas(100.0);
        t.evaluate_sort_keys();

        // division by a zero quota is undefined, pushing the group last
        assert_eq!(t.group(t.find("zero").unwrap()).sort_key, f64::MAX);
        let order = t.groups_by_sort_key();
        assert_eq!(*order.last().unwrap(), t.find("zero").unwrap());
    }
}
