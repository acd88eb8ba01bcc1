//! Property storage and the regular/entry/wc-cache partition (spec §9
//! "Property kinds").

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One incoming property change. An empty `value` denotes deletion, per
/// spec §3 `PropChange`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropChange {
    /// The property name.
    pub name: String,
    /// The new value, or `None` to delete the property.
    pub value: Option<Vec<u8>>,
}

impl PropChange {
    /// Whether this change deletes the property.
    pub fn is_deletion(&self) -> bool {
        self.value.is_none()
    }
}

/// Which partition a property name belongs to. Always categorize before
/// acting on a `PropChange` list (spec §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropKind {
    /// Merged into the working copy via the merge service; versioned.
    Regular,
    /// Installed into the entry itself via the log (e.g. `svn:entry:*`
    /// equivalents: lock tokens, last-changed-date).
    Entry,
    /// Installed into the repository cache ("wc-prop"/"dav-cache"); not
    /// versioned, never shown to the user as a regular property.
    WcCache,
}

/// Partition an incoming property-change list into its three kinds.
pub fn categorize(changes: &[PropChange]) -> (Vec<PropChange>, Vec<PropChange>, Vec<PropChange>) {
    let mut regular = Vec::new();
    let mut entry = Vec::new();
    let mut wc_cache = Vec::new();
    for change in changes {
        match classify_one(&change.name) {
            PropKind::Regular => regular.push(change.clone()),
            PropKind::Entry => entry.push(change.clone()),
            PropKind::WcCache => wc_cache.push(change.clone()),
        }
    }
    (regular, entry, wc_cache)
}

fn classify_one(name: &str) -> PropKind {
    if name.starts_with("svn:entry:") {
        PropKind::Entry
    } else if name.starts_with("svn:wc:") {
        PropKind::WcCache
    } else {
        PropKind::Regular
    }
}

/// Well-known entry-prop names the dispatcher writes directly (spec §4.5
/// step 2, §4.2 `deleted=true` stub).
pub mod entry_prop {
    /// Entry-prop carrying the last-changed-date used for timestamp recovery.
    pub const LAST_CHANGED_DATE: &str = "svn:entry:committed-date";
    /// Entry-prop carrying a lock token.
    pub const LOCK_TOKEN: &str = "svn:entry:lock-token";
}

/// The three property sets tracked per node: `base` (last-known-server
/// value), `working` (local edits on top of base), `revert` (pre-replace
/// snapshot). See spec §6 "Pristine store" / "Property files".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropSet {
    /// Last-known-server value.
    pub base: BTreeMap<String, Vec<u8>>,
    /// Local edits layered on top of `base`.
    pub working: BTreeMap<String, Vec<u8>>,
    /// Pre-replace snapshot.
    pub revert: BTreeMap<String, Vec<u8>>,
}

/// Outcome of merging incoming regular property changes into the working
/// set, returned per-property so a resolver callback can react to
/// conflicting edits individually (spec §6 "Merge service").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropMergeOutcome {
    /// The change applied without conflict.
    Merged,
    /// The incoming change and a local edit diverged.
    Conflicted { name: String },
}

/// Three-way merge of regular property changes against a possibly locally
/// modified working set. A property is in conflict only when both the
/// incoming change and the local value diverge from `base` and from each
/// other; otherwise the incoming value (or the local edit, if the
/// incoming side didn't touch it) wins.
pub fn merge_regular_props(
    props: &mut PropSet,
    regular_changes: &[PropChange],
) -> Vec<PropMergeOutcome> {
    let mut outcomes = Vec::new();
    for change in regular_changes {
        let base_val = props.base.get(&change.name).cloned();
        let working_val = props.working.get(&change.name).cloned();
        let locally_modified = working_val != base_val;

        match (&change.value, locally_modified) {
            (incoming, false) => {
                apply_value(&mut props.working, &change.name, incoming.clone());
                outcomes.push(PropMergeOutcome::Merged);
            }
            (incoming, true) if working_val == *incoming => {
                // Already converged; not a conflict.
                outcomes.push(PropMergeOutcome::Merged);
            }
            (_, true) => {
                outcomes.push(PropMergeOutcome::Conflicted {
                    name: change.name.clone(),
                });
            }
        }

        apply_value(&mut props.base, &change.name, change.value.clone());
    }
    outcomes
}

fn apply_value(map: &mut BTreeMap<String, Vec<u8>>, name: &str, value: Option<Vec<u8>>) {
    match value {
        Some(v) => {
            map.insert(name.to_string(), v);
        }
        None => {
            map.remove(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorize_partitions_by_prefix() {
        let changes = vec![
            PropChange {
                name: "svn:externals".into(),
                value: Some(b"x".to_vec()),
            },
            PropChange {
                name: "svn:entry:committed-date".into(),
                value: Some(b"2024".to_vec()),
            },
            PropChange {
                name: "svn:wc:ra_dav:version-url".into(),
                value: Some(b"/u".to_vec()),
            },
        ];
        let (regular, entry, wc) = categorize(&changes);
        assert_eq!(regular.len(), 1);
        assert_eq!(entry.len(), 1);
        assert_eq!(wc.len(), 1);
    }

    #[test]
    fn merge_clean_when_no_local_mod() {
        let mut props = PropSet::default();
        props.base.insert("color".into(), b"red".to_vec());
        props.working.insert("color".into(), b"red".to_vec());

        let outcomes = merge_regular_props(
            &mut props,
            &[PropChange {
                name: "color".into(),
                value: Some(b"blue".to_vec()),
            }],
        );
        assert_eq!(outcomes, vec![PropMergeOutcome::Merged]);
        assert_eq!(props.working.get("color").unwrap(), b"blue");
    }

    #[test]
    fn merge_conflicts_on_divergent_edit() {
        let mut props = PropSet::default();
        props.base.insert("color".into(), b"red".to_vec());
        props.working.insert("color".into(), b"green".to_vec());

        let outcomes = merge_regular_props(
            &mut props,
            &[PropChange {
                name: "color".into(),
                value: Some(b"blue".to_vec()),
            }],
        );
        assert_eq!(
            outcomes,
            vec![PropMergeOutcome::Conflicted {
                name: "color".into()
            }]
        );
        // Local edit is preserved; only base advances.
        assert_eq!(props.working.get("color").unwrap(), b"green");
        assert_eq!(props.base.get("color").unwrap(), b"blue");
    }
}
