use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use wsterm_protocol::{DirEntry, FileEntry, SnapshotTree};

use crate::error::WorkspaceError;
use crate::ignore::IgnoreSet;

/// A directory tree on disk, plus the ignore rules computed once at
/// construction (spec.md §4.2).
pub struct Workspace {
    root: PathBuf,
    ignore: IgnoreSet,
}

impl Workspace {
    /// Creates `root` if missing, canonicalizes it, and builds the ignore
    /// set from the built-in patterns merged with `<root>/.gitignore`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, WorkspaceError> {
        let root = root.as_ref();
        if !root.exists() {
            fs::create_dir_all(root).map_err(|e| WorkspaceError::io(root, e))?;
        }
        let root = root
            .canonicalize()
            .map_err(|e| WorkspaceError::io(root, e))?;

        let gitignore_path = root.join(".gitignore");
        let contents = match fs::read_to_string(&gitignore_path) {
            Ok(c) => Some(c),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(WorkspaceError::io(gitignore_path, e)),
        };

        Ok(Workspace {
            root,
            ignore: IgnoreSet::new(contents.as_deref()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ignore(&self) -> &IgnoreSet {
        &self.ignore
    }

    /// Converts a `/`-separated wire-relative path into a local,
    /// root-joined path. Rejects `..` components and absolute paths,
    /// matching the wire convention in spec.md §6.
    pub fn resolve(&self, wire_rel: &str) -> Result<PathBuf, WorkspaceError> {
        if wire_rel.starts_with('/') {
            return Err(WorkspaceError::PathEscapesRoot(wire_rel.to_string()));
        }
        let mut out = self.root.clone();
        for part in wire_rel.split('/') {
            if part.is_empty() || part == "." {
                continue;
            }
            if part == ".." {
                return Err(WorkspaceError::PathEscapesRoot(wire_rel.to_string()));
            }
            out.push(part);
        }
        Ok(out)
    }

    /// Recursively snapshots the whole tree rooted at `self.root`.
    pub fn snapshot(&self) -> Result<SnapshotTree, WorkspaceError> {
        Ok(snapshot_dir(&self.root, "", &self.ignore)?.unwrap_or_default())
    }
}

/// Snapshots one directory. `rel` is the `/`-separated path of `dir`
/// relative to the workspace root (empty string for the root itself).
/// Returns `None` if this directory should not be tracked at all (its own
/// basename is `.git`, or an ignore rule matches it).
fn snapshot_dir(
    dir: &Path,
    rel: &str,
    ignore: &IgnoreSet,
) -> Result<Option<SnapshotTree>, WorkspaceError> {
    if dir
        .file_name()
        .map(|n| n == ".git")
        .unwrap_or(false)
    {
        return Ok(None);
    }
    if !rel.is_empty() && ignore.is_ignored(rel, true) {
        return Ok(None);
    }

    let mut tree = SnapshotTree::default();
    let entries = fs::read_dir(dir).map_err(|e| WorkspaceError::io(dir, e))?;
    let mut children: Vec<(String, PathBuf, fs::FileType)> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| WorkspaceError::io(dir, e))?;
        let file_type = entry.file_type().map_err(|e| WorkspaceError::io(entry.path(), e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        children.push((name, entry.path(), file_type));
    }
    // Deterministic order so `snapshot()` depends only on names/contents,
    // not on directory-read ordering (§8 snapshot determinism).
    children.sort_by(|a, b| a.0.cmp(&b.0));

    for (name, path, file_type) in children {
        let child_rel = if rel.is_empty() {
            name.clone()
        } else {
            format!("{rel}/{name}")
        };

        if file_type.is_symlink() {
            continue;
        }

        if file_type.is_dir() {
            if let Some(sub) = snapshot_dir(&path, &child_rel, ignore)? {
                tree.dirs.insert(name, DirEntry::Tree(sub));
            }
            continue;
        }

        if file_type.is_file() {
            if ignore.is_ignored(&child_rel, false) {
                continue;
            }
            let hash = hash_file(&path)?;
            tree.files.insert(name, FileEntry::Hash(hash));
        }
    }

    Ok(Some(tree))
}

fn hash_file(path: &Path) -> Result<String, WorkspaceError> {
    let bytes = fs::read(path).map_err(|e| WorkspaceError::io(path, e))?;
    let mut hasher = Md5::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn hashes_known_content_to_the_documented_vector() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("xxx.txt"), b"1234567890").unwrap();
        let ws = Workspace::open(dir.path()).unwrap();
        let snap = ws.snapshot().unwrap();
        let hash = snap.files.get("xxx.txt").unwrap().as_hash().unwrap();
        assert_eq!(hash, "e807f1fcf82d132f9bb018ca6738a19f");
    }

    #[test]
    fn skips_git_directory_entirely() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git").join("HEAD"), b"ref: refs/heads/main").unwrap();
        fs::write(dir.path().join("a.txt"), b"hi").unwrap();
        let ws = Workspace::open(dir.path()).unwrap();
        let snap = ws.snapshot().unwrap();
        assert!(!snap.dirs.contains_key(".git"));
        assert!(snap.files.contains_key("a.txt"));
    }

    #[test]
    fn empty_tracked_directory_is_present_but_empty() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("empty")).unwrap();
        let ws = Workspace::open(dir.path()).unwrap();
        let snap = ws.snapshot().unwrap();
        let sub = snap.dirs.get("empty").unwrap().as_tree().unwrap();
        assert!(sub.is_empty());
    }

    #[test]
    fn snapshot_is_deterministic_across_runs() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"one").unwrap();
        fs::write(dir.path().join("b.txt"), b"two").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("c.txt"), b"three").unwrap();

        let ws = Workspace::open(dir.path()).unwrap();
        let first = ws.snapshot().unwrap();
        let second = ws.snapshot().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn resolve_rejects_parent_escapes() {
        let dir = tempdir().unwrap();
        let ws = Workspace::open(dir.path()).unwrap();
        assert!(ws.resolve("../etc/passwd").is_err());
        assert!(ws.resolve("a/../../b").is_err());
        assert!(ws.resolve("a/b/c").is_ok());
    }
}
