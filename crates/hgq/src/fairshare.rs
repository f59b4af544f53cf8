use smallvec::{smallvec, SmallVec};

use crate::entry::{GroupId, QuotaTree};
use crate::PRECISION_EPS;

type IdVec = SmallVec<[GroupId; 8]>;
type NumVec = SmallVec<[f64; 8]>;

impl QuotaTree {
    /// Match demand against quota bottom-up, cascading unused quota up the
    /// tree and redistributing it across subtrees that accept surplus.
    /// Returns the surplus left unallocated by the whole tree.
    ///
    /// Allocations are fractional after this phase; `recover_remainders`
    /// turns them into whole slots.
    pub fn fairshare(&mut self) -> f64 {
        self.fairshare_group(self.root())
    }

    fn fairshare_group(&mut self, id: GroupId) -> f64 {
        let entry = &mut self.groups[id];
        log::debug!(
            "fairshare (1): group = {} quota = {} requested = {}",
            entry.name,
            entry.quota,
            entry.requested
        );

        // allocate whichever is smaller, the requested slots or the quota
        entry.allocated = entry.requested.min(entry.quota);
        entry.requested -= entry.allocated;
        entry.subtree_requested = entry.requested;
        let mut surplus = entry.quota - entry.allocated;

        log::debug!(
            "fairshare (2): group = {} quota = {} allocated = {} requested = {}",
            entry.name,
            entry.quota,
            entry.allocated,
            entry.requested
        );

        if entry.children.is_empty() {
            return surplus;
        }

        let children = entry.children.clone();
        for &child in &children {
            surplus += self.fairshare_group(child);
            if self.groups[child].accept_surplus {
                let child_requested = self.groups[child].subtree_requested;
                self.groups[id].subtree_requested += child_requested;
            }
        }

        let surplus = self.allocate_surplus(id, surplus);

        log::debug!(
            "fairshare (3): group = {} surplus = {surplus} subtree_requested = {}",
            self.groups[id].name,
            self.groups[id].subtree_requested
        );

        surplus
    }

    /// Redistribute `surplus` across this group and its children. The
    /// group itself competes with its children on equal footing: it is
    /// spliced in as the last participant with `accept_surplus` forced on
    /// and its own quota and demand standing in for the subtree values.
    /// All transient mutations are reverted before returning.
    fn allocate_surplus(&mut self, id: GroupId, mut surplus: f64) -> f64 {
        log::debug!(
            "allocate-surplus (1): group = {} surplus = {surplus} subtree-requested = {}",
            self.groups[id].name,
            self.groups[id].subtree_requested
        );

        if surplus <= 0.0 {
            return 0.0;
        }
        if self.groups[id].subtree_requested <= 0.0 {
            return surplus;
        }

        let mut participants: IdVec = self.groups[id].children.iter().copied().collect();
        participants.push(id);
        let n = participants.len();
        let mut allocated: NumVec = smallvec![0.0; n];

        let entry = &mut self.groups[id];
        let save_accept_surplus = entry.accept_surplus;
        entry.accept_surplus = true;
        let save_subtree_quota = entry.subtree_quota;
        entry.subtree_quota = entry.quota;
        let mut requested = entry.subtree_requested;
        entry.subtree_requested = entry.requested;

        if surplus >= requested {
            // enough surplus to satisfy every request
            log::debug!(
                "allocate-surplus (2a): direct allocation, group = {} requested = {requested} surplus = {surplus}",
                self.groups[id].name
            );

            for (j, &gid) in participants.iter().enumerate() {
                let grp = &self.groups[gid];
                if grp.accept_surplus && grp.subtree_requested > 0.0 {
                    allocated[j] = grp.subtree_requested;
                }
            }
            surplus -= requested;
            requested = 0.0;
        } else {
            // more demand than surplus: groups compete on their quotas
            log::debug!(
                "allocate-surplus (2b): quota-based allocation, group = {} requested = {requested} surplus = {surplus}",
                self.groups[id].name
            );

            let mut subtree_requested: NumVec = smallvec![0.0; n];
            for (j, &gid) in participants.iter().enumerate() {
                let grp = &self.groups[gid];
                if grp.accept_surplus && grp.subtree_requested > 0.0 {
                    subtree_requested[j] = grp.subtree_requested;
                }
            }

            // first groups with quota compete, then any leftover is spread
            // uniformly over zero-quota groups
            self.allocate_surplus_pass(
                true,
                &participants,
                &mut allocated,
                &mut subtree_requested,
                &mut surplus,
                &mut requested,
            );
            self.allocate_surplus_pass(
                false,
                &participants,
                &mut allocated,
                &mut subtree_requested,
                &mut surplus,
                &mut requested,
            );

            if surplus > PRECISION_EPS {
                log::warn!(
                    "allocate-surplus: nonzero surplus {surplus} after allocation in group {}",
                    self.groups[id].name
                );
            }
        }

        // allocations were only cached so far; children receive theirs
        // through recursion, the spliced parent slot is folded in directly
        for j in 0..n - 1 {
            if allocated[j] > 0.0 {
                let s = self.allocate_surplus(participants[j], allocated[j]);
                if s.abs() > PRECISION_EPS {
                    log::warn!(
                        "allocate-surplus (3): surplus = {s} returned from group {}",
                        self.groups[participants[j]].name
                    );
                }
            }
        }

        let entry = &mut self.groups[id];
        entry.allocated += allocated[n - 1];
        entry.requested -= allocated[n - 1];

        log::debug!(
            "allocate-surplus (4): group {} allocated surplus = {} allocated = {} requested = {}",
            entry.name,
            allocated[n - 1],
            entry.allocated,
            entry.requested
        );

        entry.subtree_requested = requested;
        entry.accept_surplus = save_accept_surplus;
        entry.subtree_quota = save_subtree_quota;

        surplus
    }

    fn allocate_surplus_pass(
        &self,
        by_quota: bool,
        participants: &[GroupId],
        allocated: &mut [f64],
        subtree_requested: &mut [f64],
        surplus: &mut f64,
        requested: &mut f64,
    ) {
        let mut iter = 0;
        while *surplus > 0.0 {
            iter += 1;
            log::debug!(
                "allocate-surplus-loop: by_quota = {by_quota} iteration = {iter} requested = {requested} surplus = {surplus}"
            );

            let mut z = 0.0;
            for (j, &gid) in participants.iter().enumerate() {
                if subtree_requested[j] > 0.0 {
                    z += if by_quota {
                        self.groups[gid].subtree_quota
                    } else {
                        1.0
                    };
                }
            }
            if z <= 0.0 {
                log::debug!(
                    "allocate-surplus-loop: no further outstanding groups at iteration {iter}, halting"
                );
                break;
            }

            let mut never_gt = true;
            let mut sumalloc = 0.0;
            for (j, &gid) in participants.iter().enumerate() {
                if subtree_requested[j] > 0.0 {
                    let weight = if by_quota {
                        self.groups[gid].subtree_quota
                    } else {
                        1.0
                    };
                    let mut a = *surplus * (weight / z);
                    if a > subtree_requested[j] {
                        a = subtree_requested[j];
                        never_gt = false;
                    }
                    allocated[j] += a;
                    subtree_requested[j] -= a;
                    sumalloc += a;
                }
            }

            *surplus -= sumalloc;
            *requested -= sumalloc;

            // Convergence: either nothing was clipped and all surplus went
            // out, or at least one participant's demand dropped to zero and
            // Z shrinks next iteration. In by-quota mode Z can reach zero
            // with surplus remaining; zero-quota groups then get their
            // chance in the uniform pass.
            if never_gt || *surplus < 0.0 {
                if surplus.abs() > PRECISION_EPS {
                    log::warn!("allocate-surplus-loop: rounding surplus = {surplus} to zero");
                }
                *surplus = 0.0;
            }
        }
    }
}
