//! Allowed-base-paths gate for the filesystem tools (§4.6.1 redesign note:
//! the reference `read_file` tool had no gating at all; this is the new
//! security primitive that fixes it, applied consistently to `read_file`,
//! `list_files`, and `search_files`).

use std::path::{Path, PathBuf};

/// Canonicalizes `path` and checks it falls under one of `allowed_roots`.
/// Each root is canonicalized too, so symlinked or relative roots in config
/// behave the same as the requested path.
pub struct FsPolicy {
    allowed_roots: Vec<PathBuf>,
}

impl FsPolicy {
    pub fn new(allowed_roots: Vec<String>) -> Self {
        let allowed_roots = allowed_roots
            .into_iter()
            .filter_map(|r| std::fs::canonicalize(&r).ok().or_else(|| Some(PathBuf::from(r))))
            .collect();
        Self { allowed_roots }
    }

    /// Returns the canonicalized path if it resolves under an allowed root.
    pub fn check(&self, requested: &str) -> Result<PathBuf, String> {
        let candidate = Path::new(requested);
        let resolved = std::fs::canonicalize(candidate).unwrap_or_else(|_| candidate.to_path_buf());

        if self.allowed_roots.iter().any(|root| resolved.starts_with(root)) {
            Ok(resolved)
        } else {
            Err(format!(
                "path '{requested}' is outside the allowed workspace roots"
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn allows_path_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, "hi").unwrap();

        let policy = FsPolicy::new(vec![dir.path().to_string_lossy().to_string()]);
        assert!(policy.check(file.to_str().unwrap()).is_ok());
    }

    #[test]
    fn rejects_path_outside_roots() {
        let dir = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let file = other.path().join("secret.txt");
        fs::write(&file, "nope").unwrap();

        let policy = FsPolicy::new(vec![dir.path().to_string_lossy().to_string()]);
        assert!(policy.check(file.to_str().unwrap()).is_err());
    }
}
