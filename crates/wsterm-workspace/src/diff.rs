use std::collections::BTreeSet;

use wsterm_protocol::{DirEntry, FileEntry, SnapshotTree};

/// `diff(local, remote)`: keys present only in `local` carry their local
/// payload; keys present only in `remote` carry the removed sentinel;
/// keys present in both with differing payloads carry the local payload
/// (recursing into sub-trees for directories). Equal payloads produce no
/// entry at all, so `diff(X, X) == {}` and empty sub-trees are pruned.
pub fn diff(local: &SnapshotTree, remote: &SnapshotTree) -> SnapshotTree {
    let mut dirs = std::collections::BTreeMap::new();
    for key in all_keys(local.dirs.keys(), remote.dirs.keys()) {
        match (local.dirs.get(&key), remote.dirs.get(&key)) {
            (Some(l), Some(r)) => {
                if let Some(entry) = diff_dir_entry(l, r) {
                    dirs.insert(key, entry);
                }
            }
            (Some(l), None) => {
                dirs.insert(key, l.clone());
            }
            (None, Some(_)) => {
                dirs.insert(key, DirEntry::removed());
            }
            (None, None) => unreachable!("key came from the union of both maps"),
        }
    }

    let mut files = std::collections::BTreeMap::new();
    for key in all_keys(local.files.keys(), remote.files.keys()) {
        match (local.files.get(&key), remote.files.get(&key)) {
            (Some(l), Some(r)) => {
                if l != r {
                    files.insert(key, l.clone());
                }
            }
            (Some(l), None) => {
                files.insert(key, l.clone());
            }
            (None, Some(_)) => {
                files.insert(key, FileEntry::removed());
            }
            (None, None) => unreachable!("key came from the union of both maps"),
        }
    }

    SnapshotTree { dirs, files }
}

fn diff_dir_entry(local: &DirEntry, remote: &DirEntry) -> Option<DirEntry> {
    match (local, remote) {
        (DirEntry::Tree(l), DirEntry::Tree(r)) => {
            let sub = diff(l, r);
            if sub.is_empty() {
                None
            } else {
                Some(DirEntry::Tree(sub))
            }
        }
        _ if local == remote => None,
        _ => Some(local.clone()),
    }
}

fn all_keys<'a>(
    a: impl Iterator<Item = &'a String>,
    b: impl Iterator<Item = &'a String>,
) -> BTreeSet<String> {
    a.chain(b).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn tree(files: &[(&str, &str)]) -> SnapshotTree {
        let mut t = SnapshotTree::default();
        for (name, hash) in files {
            t.files.insert(name.to_string(), FileEntry::Hash(hash.to_string()));
        }
        t
    }

    #[test]
    fn identical_trees_diff_to_empty() {
        let a = tree(&[("x", "h1")]);
        assert!(diff(&a, &a).is_empty());
    }

    #[test]
    fn example_from_spec_file_diff() {
        let local = tree(&[("a", "H1")]);
        let remote = tree(&[("a", "H2"), ("b", "H3")]);
        let d = diff(&local, &remote);
        assert_eq!(d.files.get("a").unwrap().as_hash(), Some("H1"));
        assert!(d.files.get("b").unwrap().is_removed());
    }

    #[test]
    fn nested_directory_diffs_prune_when_subtree_is_unchanged() {
        let mut local = SnapshotTree::default();
        let mut remote = SnapshotTree::default();
        let shared_sub = tree(&[("same", "H")]);
        local.dirs.insert("sub".into(), DirEntry::Tree(shared_sub.clone()));
        remote.dirs.insert("sub".into(), DirEntry::Tree(shared_sub));
        let d = diff(&local, &remote);
        assert!(!d.dirs.contains_key("sub"));
    }

    #[test]
    fn directory_removed_on_remote_side_is_marked_removed() {
        let mut local = SnapshotTree::default();
        let mut remote = SnapshotTree::default();
        remote.dirs.insert("gone".into(), DirEntry::Tree(SnapshotTree::default()));
        let d = diff(&local, &remote);
        assert!(d.dirs.get("gone").unwrap().is_removed());
    }

    #[test]
    fn roundtrip_property_replaying_diff_onto_remote_state_yields_local() {
        // Sanity check of the algebra without a real filesystem: applying
        // diff(local, remote) to `remote`'s key set should reproduce
        // `local`'s key set for files.
        let local = tree(&[("a", "H1"), ("c", "H4")]);
        let remote = tree(&[("a", "H2"), ("b", "H3")]);
        let d = diff(&local, &remote);

        let mut replayed: BTreeMap<String, FileEntry> = remote.files.clone();
        for (name, entry) in &d.files {
            if entry.is_removed() {
                replayed.remove(name);
            } else {
                replayed.insert(name.clone(), entry.clone());
            }
        }
        assert_eq!(replayed, local.files);
    }
}
