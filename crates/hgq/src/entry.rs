use crate::common::index::GroupVec;
use crate::common::Map;
use crate::expr::SortAd;

pub use crate::common::index::GroupId;

/// Reserved name of the synthetic root group. Forbidden (case-insensitively)
/// as a user group name.
pub const ROOT_GROUP_NAME: &str = "<none>";

/// One accounting group in the quota tree.
///
/// Configuration fields are fixed at construction; the remaining fields are
/// per-cycle state cleared by [`QuotaTree::reset_cycle`], except for the
/// externally injected `rr_time` and `usage` which persist until their next
/// injection.
#[derive(Debug)]
pub struct GroupEntry {
    /// Full dotted path, e.g. `"physics.chem"`; the root carries the
    /// reserved name.
    pub name: String,
    pub(crate) parent: Option<GroupId>,
    pub(crate) children: Vec<GroupId>,
    /// Lower-cased child short name -> position in `children`.
    pub(crate) child_index: Map<String, usize>,

    pub config_quota: f64,
    pub static_quota: bool,
    pub accept_surplus: bool,
    pub autoregroup: bool,

    pub requested: f64,
    pub currently_requested: f64,
    pub subtree_requested: f64,
    pub quota: f64,
    pub subtree_quota: f64,
    pub allocated: f64,
    pub usage: f64,
    pub rr: bool,
    pub rr_time: f64,
    pub subtree_rr_time: f64,
    pub sort_ad: SortAd,
    pub sort_key: f64,
}

impl GroupEntry {
    pub(crate) fn new(name: String, parent: Option<GroupId>) -> Self {
        GroupEntry {
            name,
            parent,
            children: Vec::new(),
            child_index: Map::new(),
            config_quota: 0.0,
            static_quota: false,
            accept_surplus: false,
            autoregroup: false,
            requested: 0.0,
            currently_requested: 0.0,
            subtree_requested: 0.0,
            quota: 0.0,
            subtree_quota: 0.0,
            allocated: 0.0,
            usage: 0.0,
            rr: false,
            rr_time: 0.0,
            subtree_rr_time: 0.0,
            sort_ad: SortAd::default(),
            sort_key: 0.0,
        }
    }

    /// Last component of the dotted path.
    pub fn short_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// The whole state of the allocator: an arena of group entries rooted at
/// the synthetic `"<none>"` group (always id 0).
#[derive(Debug)]
pub struct QuotaTree {
    pub(crate) groups: GroupVec<GroupEntry>,
    /// Lower-cased dotted path -> id.
    pub(crate) name_map: Map<String, GroupId>,
    /// All groups, parents before children.
    pub(crate) bfs_order: Vec<GroupId>,
    pub(crate) allow_quota_oversub: bool,
    pub(crate) global_accept_surplus: bool,
    pub(crate) global_autoregroup: bool,
}

impl QuotaTree {
    #[inline]
    pub fn root(&self) -> GroupId {
        GroupId::new(0)
    }

    #[inline]
    pub fn group(&self, id: GroupId) -> &GroupEntry {
        &self.groups[id]
    }

    #[inline]
    pub fn group_mut(&mut self, id: GroupId) -> &mut GroupEntry {
        &mut self.groups[id]
    }

    /// Case-insensitive lookup by full dotted path.
    pub fn find(&self, name: &str) -> Option<GroupId> {
        self.name_map.get(&name.to_lowercase()).copied()
    }

    pub fn parent(&self, id: GroupId) -> Option<GroupId> {
        self.groups[id].parent
    }

    pub fn children(&self, id: GroupId) -> &[GroupId] {
        &self.groups[id].children
    }

    /// Breadth-first order; guarantees a parent appears before any of its
    /// children.
    pub fn bfs_order(&self) -> &[GroupId] {
        &self.bfs_order
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// True iff the pool-wide default was set or any group accepts surplus.
    pub fn global_accept_surplus(&self) -> bool {
        self.global_accept_surplus
    }

    /// True iff the pool-wide default was set or any group autoregroups.
    pub fn global_autoregroup(&self) -> bool {
        self.global_autoregroup
    }

    pub fn allow_quota_oversubscription(&self) -> bool {
        self.allow_quota_oversub
    }

    /// Clear derived per-cycle state, keeping structure and configuration.
    /// `rr_time` and `usage` are inputs owned by the caller and survive.
    pub fn reset_cycle(&mut self) {
        for entry in self.groups.iter_mut() {
            entry.requested = 0.0;
            entry.currently_requested = 0.0;
            entry.subtree_requested = 0.0;
            entry.quota = 0.0;
            entry.subtree_quota = 0.0;
            entry.allocated = 0.0;
            entry.rr = false;
            entry.subtree_rr_time = 0.0;
            entry.sort_key = 0.0;
        }
    }
}

#[cfg(test)]
impl QuotaTree {
    /// Structural invariants: `children`/`child_index` bijection and
    /// parent back-links.
    pub(crate) fn assert_integrity(&self) {
        assert_eq!(self.groups.len(), self.bfs_order.len());
        assert_eq!(self.groups.len(), self.name_map.len());
        for (j, entry) in self.groups.iter().enumerate() {
            let id = GroupId::new(j as u32);
            assert_eq!(entry.child_index.len(), entry.children.len());
            for (pos, &child) in entry.children.iter().enumerate() {
                let short = self.groups[child].short_name().to_lowercase();
                assert_eq!(entry.child_index.get(&short), Some(&pos));
                assert_eq!(self.groups[child].parent, Some(id));
            }
            if id == self.root() {
                assert!(entry.parent.is_none());
                assert_eq!(entry.name, ROOT_GROUP_NAME);
            } else {
                assert!(entry.parent.is_some());
            }
            assert_eq!(self.find(&entry.name), Some(id));
        }
        assert_eq!(self.bfs_order[0], self.root());
    }
}

#[cfg(test)]
mod tests {
    use crate::tests::utils::tree;

    #[test]
    fn test_tree_structure() {
        let t = tree(&[
            ("GROUP_NAMES", "a, a.b, a.b.c, a.x, other"),
            ("GROUP_QUOTA_a", "10"),
            ("GROUP_SORT_EXPR", "0"),
        ]);
        t.assert_integrity();
        assert_eq!(t.len(), 6);

        let a = t.find("a").unwrap();
        let ab = t.find("A.B").unwrap();
        assert_eq!(t.parent(ab), Some(a));
        assert_eq!(t.group(ab).short_name(), "b");
        assert_eq!(t.children(a).len(), 2);
        assert!(t.group(t.find("a.b.c").unwrap()).is_leaf());
        assert!(t.find("nosuch").is_none());
    }

    #[test]
    fn test_bfs_order_parents_first() {
        let t = tree(&[
            ("GROUP_NAMES", "a, b, a.x, b.y, a.x.deep"),
            ("GROUP_SORT_EXPR", "0"),
        ]);
        let order = t.bfs_order();
        assert_eq!(order[0], t.root());
        let position = |name: &str| {
            order
                .iter()
                .position(|&id| id == t.find(name).unwrap())
                .unwrap()
        };
        assert!(position("a") < position("a.x"));
        assert!(position("b") < position("b.y"));
        assert!(position("a.x") < position("a.x.deep"));
        // breadth first: both top-level groups precede any second level
        assert!(position("b") < position("a.x"));
    }

    #[test]
    fn test_reset_cycle_preserves_config() {
        let mut t = tree(&[
            ("GROUP_NAMES", "a"),
            ("GROUP_QUOTA_a", "10"),
            ("GROUP_ACCEPT_SURPLUS_a", "true"),
            ("GROUP_SORT_EXPR", "0"),
        ]);
        let a = t.find("a").unwrap();
        t.set_demand("a", 5.0);
        t.set_rr_time("a", 7.0);
        t.set_usage("a", 3.0);
        t.run_cycle(100.0);
        assert!(t.group(a).allocated > 0.0);

        t.reset_cycle();
        let entry = t.group(a);
        assert_eq!(entry.allocated, 0.0);
        assert_eq!(entry.requested, 0.0);
        assert_eq!(entry.currently_requested, 0.0);
        assert_eq!(entry.quota, 0.0);
        assert_eq!(entry.subtree_quota, 0.0);
        assert!(!entry.rr);
        // configuration and injected inputs survive
        assert_eq!(entry.config_quota, 10.0);
        assert!(entry.static_quota);
        assert!(entry.accept_surplus);
        assert_eq!(entry.rr_time, 7.0);
        assert_eq!(entry.usage, 3.0);
    }
}
