use smallvec::{smallvec, SmallVec};

use crate::entry::{GroupId, QuotaTree};
use crate::PRECISION_EPS;

type IdVec = SmallVec<[GroupId; 8]>;
type NumVec = SmallVec<[f64; 8]>;

/// Round to the nearest integer, warning when the adjustment is larger
/// than accumulated precision error should ever produce.
fn round_for_precision(x: f64) -> f64 {
    let rounded = (0.5 + x).floor();
    let err = (rounded - x).abs();
    if err > PRECISION_EPS {
        log::warn!("encountered precision error of {err}");
    }
    rounded
}

impl QuotaTree {
    /// Strip the fractional remainders the fairshare phase left behind and
    /// re-dole them as whole slots in round-robin order. After this phase
    /// every `allocated` value is a nonnegative integer. Returns the
    /// surplus the whole tree could not place.
    pub fn recover_remainders(&mut self) -> f64 {
        self.recover_group_remainders(self.root())
    }

    fn recover_group_remainders(&mut self, id: GroupId) -> f64 {
        let entry = &mut self.groups[id];
        log::debug!(
            "recover-remainders (1): group = {} allocated = {} requested = {}",
            entry.name,
            entry.allocated,
            entry.requested
        );

        // the fractional remainder becomes surplus and outstanding demand
        let mut surplus = entry.allocated - entry.allocated.floor();
        entry.allocated -= surplus;
        entry.requested += surplus;

        // integer values are expected now; correct any precision drift
        entry.allocated = round_for_precision(entry.allocated);
        entry.requested = round_for_precision(entry.requested);

        entry.subtree_requested = entry.requested;
        entry.subtree_rr_time = if entry.requested > 0.0 {
            entry.rr_time
        } else {
            f64::MAX
        };

        log::debug!(
            "recover-remainders (2): group = {} allocated = {} requested = {} surplus = {surplus}",
            entry.name,
            entry.allocated,
            entry.requested
        );

        if entry.children.is_empty() {
            return surplus;
        }

        let children = entry.children.clone();
        for &child in &children {
            surplus += self.recover_group_remainders(child);
            if self.groups[child].accept_surplus {
                let child_requested = self.groups[child].subtree_requested;
                let child_rr_time = self.groups[child].subtree_rr_time;
                let entry = &mut self.groups[id];
                entry.subtree_requested += child_requested;
                if child_requested > 0.0 {
                    entry.subtree_rr_time = entry.subtree_rr_time.min(child_rr_time);
                }
            }
        }

        let surplus = self.round_robin(id, surplus);

        log::debug!(
            "recover-remainders (3): group = {} surplus = {surplus} subtree_requested = {}",
            self.groups[id].name,
            self.groups[id].subtree_requested
        );

        surplus
    }

    /// Hand out whole slots to this group and its children, oldest
    /// round-robin service time first. The group itself is spliced in as
    /// the last participant, as in surplus allocation, with its own
    /// `rr_time` standing in for the subtree value.
    fn round_robin(&mut self, id: GroupId, mut surplus: f64) -> f64 {
        log::debug!(
            "round-robin (1): group = {} surplus = {surplus} subtree-requested = {}",
            self.groups[id].name,
            self.groups[id].subtree_requested
        );

        let entry = &mut self.groups[id];
        if entry.subtree_requested - entry.subtree_requested.floor() > PRECISION_EPS {
            log::warn!(
                "forcing group {} requested = {} to integer value {}",
                entry.name,
                entry.subtree_requested,
                entry.subtree_requested.floor()
            );
        }
        entry.subtree_requested = entry.subtree_requested.floor();

        if entry.subtree_requested <= 0.0 {
            return surplus;
        }
        // nothing to do without at least one whole slot
        if surplus < 1.0 {
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
        let save_subtree_rr_time = entry.subtree_rr_time;
        entry.subtree_rr_time = entry.rr_time;
        let mut requested = entry.subtree_requested;
        entry.subtree_requested = entry.requested;

        let mut outstanding = 0u32;
        let mut subtree_requested: NumVec = smallvec![0.0; n];
        for (j, &gid) in participants.iter().enumerate() {
            let grp = &self.groups[gid];
            if grp.accept_surplus && grp.subtree_requested > 0.0 {
                subtree_requested[j] = grp.subtree_requested;
                outstanding += 1;
            }
        }

        // oldest service time goes first; the stable sort keeps ties in
        // participant order
        let mut idx: SmallVec<[usize; 8]> = (0..n).collect();
        idx.sort_by(|&a, &b| {
            self.groups[participants[a]]
                .subtree_rr_time
                .total_cmp(&self.groups[participants[b]].subtree_rr_time)
        });

        while surplus >= 1.0 && requested > 0.0 {
            // the most we can fairly allocate per group this round
            let amax = (surplus / f64::from(outstanding.max(1))).floor().max(1.0);

            log::debug!(
                "round-robin (2): pass: surplus = {surplus} requested = {requested} outstanding = {outstanding} amax = {amax}"
            );

            outstanding = 0;
            let mut sumalloc = 0.0;
            for &j in &idx {
                let gid = participants[j];
                if self.groups[gid].accept_surplus && subtree_requested[j] > 0.0 {
                    let a = subtree_requested[j].min(amax);
                    allocated[j] += a;
                    subtree_requested[j] -= a;
                    sumalloc += a;
                    surplus -= a;
                    requested -= a;
                    self.groups[gid].rr = true;
                    if subtree_requested[j] > 0.0 {
                        outstanding += 1;
                    }
                    if surplus < amax {
                        break;
                    }
                }
            }

            // should not be possible, but avoid spinning on pathological
            // arithmetic
            if sumalloc < 1.0 {
                log::warn!("round-robin failed to allocate at least one slot this round, halting");
                break;
            }
        }

        // children receive their slots through recursion; every requested
        // slot fits by construction, so the recursion should consume all
        for j in 0..n - 1 {
            if allocated[j] > 0.0 {
                let s = self.round_robin(participants[j], allocated[j]);
                if s > 0.0 {
                    log::warn!(
                        "round-robin (4): nonzero surplus {s} returned from group {}",
                        self.groups[participants[j]].name
                    );
                }
            }
        }

        let entry = &mut self.groups[id];
        entry.allocated += allocated[n - 1];
        entry.requested -= allocated[n - 1];

        log::debug!(
            "round-robin (5): group {} allocated surplus = {} allocated = {} requested = {}",
            entry.name,
            allocated[n - 1],
            entry.allocated,
            entry.requested
        );

        entry.subtree_requested = requested;
        entry.accept_surplus = save_accept_surplus;
        entry.subtree_quota = save_subtree_quota;
        entry.subtree_rr_time = save_subtree_rr_time;

        surplus
    }
}
