use std::collections::VecDeque;

use crate::common::index::GroupVec;
use crate::common::Map;
use crate::config::ConfigSource;
use crate::entry::{GroupEntry, GroupId, QuotaTree, ROOT_GROUP_NAME};
use crate::expr::{self, SortAd, Value, ATTR_ACCOUNTING_GROUP};
use crate::HgqError;

impl QuotaTree {
    /// Build the quota tree from the configuration store.
    ///
    /// Group names are dotted paths; a parent group must be configured for
    /// its children to be accepted. Per-group anomalies (reserved name,
    /// missing parent, duplicate, unusable quota) are logged and skipped.
    /// Only a missing or unparseable `GROUP_SORT_EXPR` is fatal.
    pub fn from_config(config: &dyn ConfigSource) -> crate::Result<QuotaTree> {
        let mut names: Vec<String> = match config.lookup("GROUP_NAMES") {
            Some(raw) => raw
                .split(|c: char| c.is_whitespace() || c == ',')
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect(),
            None => Vec::new(),
        };
        names.retain(|name| {
            if name.eq_ignore_ascii_case(ROOT_GROUP_NAME) {
                log::warn!("group name \"{name}\" is reserved for the root group, ignoring it");
                false
            } else {
                true
            }
        });

        // Case-insensitive sort guarantees a parent path appears before any
        // of its children.
        names.sort_by(|a, b| a.to_lowercase().cmp(&b.to_lowercase()));

        let mut root = GroupEntry::new(ROOT_GROUP_NAME.to_string(), None);
        root.accept_surplus = true;

        let mut groups: Vec<GroupEntry> = vec![root];
        let mut name_map = Map::new();
        name_map.insert(ROOT_GROUP_NAME.to_lowercase(), GroupId::new(0));

        let default_accept_surplus = config.param_bool("GROUP_ACCEPT_SURPLUS", false);
        let default_autoregroup = config.param_bool("GROUP_AUTOREGROUP", false);
        let mut global_accept_surplus = default_accept_surplus;
        let mut global_autoregroup = default_autoregroup;

        for name in &names {
            let path: Vec<&str> = name.split('.').collect();

            let mut parent = 0usize;
            let mut missing_parent = false;
            for component in &path[..path.len() - 1] {
                match groups[parent].child_index.get(&component.to_lowercase()) {
                    Some(&pos) => parent = groups[parent].children[pos].as_num() as usize,
                    None => {
                        log::warn!(
                            "ignoring group name {name} with missing parent {component}"
                        );
                        missing_parent = true;
                        break;
                    }
                }
            }
            if missing_parent {
                continue;
            }

            let short = path.last().unwrap().to_lowercase();
            if groups[parent].child_index.contains_key(&short) {
                log::warn!("ignoring duplicate group name {name}");
                continue;
            }

            let id = GroupId::new(groups.len() as u32);
            let mut entry = GroupEntry::new(name.clone(), Some(GroupId::new(parent as u32)));

            // Static quota gets first consideration; otherwise a dynamic
            // share in [0, 1]; otherwise zero.
            let key = format!("GROUP_QUOTA_{name}");
            if let Some(quota) = config.param_f64_in_range(&key, 0.0, i32::MAX as f64) {
                entry.config_quota = quota;
                entry.static_quota = true;
            } else {
                let key = format!("GROUP_QUOTA_DYNAMIC_{name}");
                if let Some(quota) = config.param_f64_in_range(&key, 0.0, 1.0) {
                    entry.config_quota = quota;
                    entry.static_quota = false;
                } else {
                    log::warn!("no quota specified for group \"{name}\", defaulting to zero");
                    entry.config_quota = 0.0;
                    entry.static_quota = false;
                }
            }

            if entry.config_quota < 0.0 {
                log::warn!(
                    "negative quota ({}) for group \"{name}\", defaulting to zero",
                    entry.config_quota
                );
                entry.config_quota = 0.0;
            }

            let key = format!("GROUP_ACCEPT_SURPLUS_{name}");
            entry.accept_surplus = config.param_bool(&key, default_accept_surplus);
            let key = format!("GROUP_AUTOREGROUP_{name}");
            entry.autoregroup = config.param_bool(&key, default_autoregroup);
            if entry.accept_surplus {
                global_accept_surplus = true;
            }
            if entry.autoregroup {
                global_autoregroup = true;
            }

            let pos = groups[parent].children.len();
            groups[parent].children.push(id);
            groups[parent].child_index.insert(short, pos);
            name_map.insert(name.to_lowercase(), id);
            groups.push(entry);
        }

        // The root mirrors the effective global autoregroup value so that
        // downstream accounting sees a coherent setting at the root.
        groups[0].autoregroup = global_autoregroup;

        let mut bfs_order = Vec::with_capacity(groups.len());
        let mut queue = VecDeque::new();
        queue.push_back(GroupId::new(0));
        while let Some(id) = queue.pop_front() {
            bfs_order.push(id);
            for &child in &groups[id.as_num() as usize].children {
                queue.push_back(child);
            }
        }

        let expr_source = config
            .lookup("GROUP_SORT_EXPR")
            .ok_or(HgqError::MissingSortExpr)?
            .to_string();
        let sort_expr =
            expr::parse_sort_expr(&expr_source).map_err(|source| HgqError::InvalidSortExpr {
                expr: expr_source.clone(),
                source,
            })?;
        for entry in &mut groups {
            let mut ad = SortAd::new(sort_expr.clone(), expr_source.clone());
            ad.assign(ATTR_ACCOUNTING_GROUP, Value::Str(entry.name.clone()));
            entry.sort_ad = ad;
        }

        let allow_quota_oversub =
            config.param_bool("NEGOTIATOR_ALLOW_QUOTA_OVERSUBSCRIPTION", false);

        log::debug!(
            "constructed quota tree with {} groups ({} configured names)",
            groups.len(),
            names.len()
        );

        Ok(QuotaTree {
            groups: GroupVec::from(groups),
            name_map,
            bfs_order,
            allow_quota_oversub,
            global_accept_surplus,
            global_autoregroup,
        })
    }
}
