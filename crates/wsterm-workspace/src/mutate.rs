use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use tracing::warn;

use crate::error::WorkspaceError;
use crate::workspace::Workspace;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

impl Workspace {
    /// `mkdir -p`-equivalent; no error if the directory already exists.
    pub fn create_directory(&self, rel: &str) -> Result<(), WorkspaceError> {
        let path = self.resolve(rel)?;
        fs::create_dir_all(&path).map_err(|e| WorkspaceError::io(path, e))
    }

    /// Recursively deletes the directory if present; a no-op otherwise.
    pub fn remove_directory(&self, rel: &str) -> Result<(), WorkspaceError> {
        let path = self.resolve(rel)?;
        match fs::remove_dir_all(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WorkspaceError::io(path, e)),
        }
    }

    /// Writes a fragment of `data` to `rel`, creating parent directories
    /// first. `overwrite` truncates (first fragment of a stream);
    /// subsequent fragments append, per spec.md §4.3's streaming convention.
    pub fn write_file(&self, rel: &str, data: &[u8], overwrite: bool) -> Result<(), WorkspaceError> {
        let path = self.resolve(rel)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| WorkspaceError::io(parent, e))?;
        }
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(overwrite)
            .append(!overwrite)
            .open(&path)
            .map_err(|e| WorkspaceError::io(&path, e))?;
        file.write_all(data).map_err(|e| WorkspaceError::io(&path, e))
    }

    /// Unlinks `rel`; a no-op if it is already absent.
    pub fn remove_file(&self, rel: &str) -> Result<(), WorkspaceError> {
        let path = self.resolve(rel)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WorkspaceError::io(path, e)),
        }
    }

    /// Renames `src_rel` to `dst_rel`. Warns (rather than erroring) if the
    /// source is absent, matching spec.md §4.2's "warns if src absent".
    pub fn move_item(&self, src_rel: &str, dst_rel: &str) -> Result<(), WorkspaceError> {
        let src = self.resolve(src_rel)?;
        let dst = self.resolve(dst_rel)?;
        if !src.exists() {
            warn!(src = %src.display(), "move-item: source path does not exist");
            return Ok(());
        }
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).map_err(|e| WorkspaceError::io(parent, e))?;
        }
        fs::rename(&src, &dst).map_err(|e| WorkspaceError::io(src, e))
    }

    /// Sets the low 9 permission bits on POSIX; a no-op on Windows (spec
    /// §4.2: "ignored on Windows").
    pub fn set_perm(&self, rel: &str, mode: u32) -> Result<(), WorkspaceError> {
        let path = self.resolve(rel)?;
        set_perm_bits(&path, mode).map_err(|e| WorkspaceError::io(path, e))
    }
}

#[cfg(unix)]
fn set_perm_bits(path: &Path, mode: u32) -> std::io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(mode & 0o777);
    fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn set_perm_bits(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_file_overwrite_then_append_streams_a_fragment_sequence() {
        let dir = tempdir().unwrap();
        let ws = Workspace::open(dir.path()).unwrap();
        ws.write_file("a/b.txt", b"hello ", true).unwrap();
        ws.write_file("a/b.txt", b"world", false).unwrap();
        let contents = fs::read_to_string(dir.path().join("a/b.txt")).unwrap();
        assert_eq!(contents, "hello world");
    }

    #[test]
    fn remove_file_is_a_noop_when_absent() {
        let dir = tempdir().unwrap();
        let ws = Workspace::open(dir.path()).unwrap();
        assert!(ws.remove_file("missing.txt").is_ok());
    }

    #[test]
    fn move_item_warns_instead_of_erroring_on_missing_source() {
        let dir = tempdir().unwrap();
        let ws = Workspace::open(dir.path()).unwrap();
        assert!(ws.move_item("missing.txt", "also-missing.txt").is_ok());
    }

    #[test]
    fn create_and_remove_directory_round_trip() {
        let dir = tempdir().unwrap();
        let ws = Workspace::open(dir.path()).unwrap();
        ws.create_directory("a/b/c").unwrap();
        assert!(dir.path().join("a/b/c").is_dir());
        ws.remove_directory("a").unwrap();
        assert!(!dir.path().join("a").exists());
    }
}
