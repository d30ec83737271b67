//! Workspace identity (spec.md §4.3): `"<basename>-<short_sha1>@<hostname>"`,
//! letting one server serve many client machines and paths distinctly. New
//! logic (the teacher has no multi-client workspace concept); the hashing
//! idiom — SHA-1, truncate to 8 hex chars — is the same shape as other
//! content-addressing in this codebase (MD5 truncated-to-full-hex file
//! hashes in `wsterm-workspace`), just a different digest.

use std::path::Path;

use sha1::{Digest, Sha1};

pub fn workspace_identity(local_path: &Path) -> String {
    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string());

    let basename = local_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "workspace".to_string());

    let mut hasher = Sha1::new();
    hasher.update(hostname.as_bytes());
    hasher.update(local_path.to_string_lossy().as_bytes());
    let digest = hasher.finalize();
    let short = digest.iter().take(4).map(|b| format!("{b:02x}")).collect::<String>();

    format!("{basename}-{short}@{hostname}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_embeds_basename_and_hostname() {
        let id = workspace_identity(Path::new("/home/user/project"));
        assert!(id.starts_with("project-"));
        assert!(id.contains('@'));
        // 8 hex chars between the dash and the '@'.
        let hash_part = id.split('-').nth(1).unwrap().split('@').next().unwrap();
        assert_eq!(hash_part.len(), 8);
    }

    #[test]
    fn identity_is_deterministic() {
        let a = workspace_identity(Path::new("/tmp/x"));
        let b = workspace_identity(Path::new("/tmp/x"));
        assert_eq!(a, b);
    }
}
