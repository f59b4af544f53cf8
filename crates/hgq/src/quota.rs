use crate::entry::{GroupId, QuotaTree};

impl QuotaTree {
    /// Distribute the pool's total quota down the tree.
    ///
    /// Static quotas get first claim on the budget at each level; dynamic
    /// quotas share whatever remains, rescaled when their shares sum above
    /// one. Each node keeps the residue its children did not claim, except
    /// under oversubscription where a node may keep the full subtree
    /// budget. The root always keeps only the residue so that surplus is
    /// not double-counted at the top.
    pub fn assign_quotas(&mut self, pool: f64) {
        let oversub = self.allow_quota_oversub;
        self.assign_subtree_quota(self.root(), pool, oversub);
    }

    fn assign_subtree_quota(&mut self, id: GroupId, quota: f64, oversub: bool) {
        log::debug!("subtree {} receiving quota = {quota}", self.groups[id].name);

        // zero quota: leave the whole subtree at its reset defaults
        if quota <= 0.0 {
            return;
        }

        self.groups[id].subtree_quota = quota;

        let children = self.groups[id].children.clone();
        let mut sqsum = 0.0;
        let mut dqsum = 0.0;
        for &child in &children {
            if self.groups[child].static_quota {
                sqsum += self.groups[child].config_quota;
            } else {
                dqsum += self.groups[child].config_quota;
            }
        }

        // static quotas are bounded by the budget coming from above unless
        // oversubscription is allowed
        let sqa = if oversub { sqsum } else { sqsum.min(quota) };
        let dqa = (quota - sqa).max(0.0);

        log::debug!(
            "group {}: allocated {sqa} for static children, {dqa} for dynamic children",
            self.groups[id].name
        );

        // prevent 0/0 when all static quotas are zero
        let zs = if sqsum > 0.0 { sqsum } else { 1.0 };
        // dynamic shares summing above 1 are rescaled to sum to 1
        let zd = dqsum.max(1.0);

        let mut chq = 0.0;
        for &child in &children {
            let entry = &self.groups[child];
            let q = if entry.static_quota {
                entry.config_quota * (sqa / zs)
            } else {
                entry.config_quota * (dqa / zd)
            };
            let q = q.max(0.0);

            if entry.static_quota && q < entry.config_quota {
                log::warn!(
                    "static quota for group {} rescaled from {} to {q}",
                    entry.name,
                    entry.config_quota
                );
            } else if !entry.static_quota && zd - 1.0 > 0.0001 {
                log::warn!(
                    "dynamic quota for group {} rescaled from {} to {}",
                    entry.name,
                    entry.config_quota,
                    entry.config_quota / zd
                );
            }

            self.assign_subtree_quota(child, q, oversub);
            chq += q;
        }

        let entry = &mut self.groups[id];
        entry.quota = if oversub { quota } else { quota - chq };

        // The root's quota cannot be configured; it acts as the usage limit
        // at exactly the root node. Leaving it at the whole pool would
        // double-count surplus, so the root always keeps only the residue.
        if entry.parent.is_none() {
            entry.quota = quota - chq;
        }

        if entry.quota < 0.0 {
            entry.quota = 0.0;
        }
        log::debug!("group {} assigned quota = {}", entry.name, entry.quota);
    }
}
