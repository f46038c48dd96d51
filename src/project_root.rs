//! The project root is the security perimeter: nothing is read or written outside it.
//!
//! Containment is always decided on canonical paths (symlinks and `..` resolved), never by
//! comparing strings, and it is recomputed on every call because the filesystem may change
//! between a check and the use that follows it.

use path_clean::PathClean;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RootError {
    #[error("project root {} is not a directory", .0.display())]
    NotADirectory(PathBuf),
    #[error("failed to resolve project root {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRoot {
    path: PathBuf,
}

impl ProjectRoot {
    /// Canonicalizes `path` and checks that it is an existing directory
    pub fn new(path: impl AsRef<Path>) -> Result<Self, RootError> {
        let path = path.as_ref();
        let canonical = fs::canonicalize(path).map_err(|source| RootError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if !canonical.is_dir() {
            return Err(RootError::NotADirectory(canonical));
        }
        Ok(Self { path: canonical })
    }

    /// The canonical root directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Joins a relative path onto the root and cleans it lexically.
    ///
    /// An absolute `relative` replaces the root entirely, exactly like `Path::join`; callers
    /// must still run [`ProjectRoot::contains`] on the result.
    pub fn join(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.path.join(relative).clean()
    }

    /// True when the canonical form of `candidate` lies inside the canonical root.
    ///
    /// The candidate does not have to exist yet; see [`resolve_lenient`].
    pub fn contains(&self, candidate: &Path) -> bool {
        let Ok(root) = fs::canonicalize(&self.path) else {
            return false;
        };
        let absolute = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            root.join(candidate)
        };
        match resolve_lenient(&absolute) {
            Ok(resolved) => resolved.starts_with(&root),
            Err(_) => false,
        }
    }

    /// Path of `candidate` relative to the root, with forward slashes, if it is inside
    pub fn relative_display(&self, candidate: &Path) -> Option<String> {
        let resolved = resolve_lenient(candidate).ok()?;
        let relative = resolved.strip_prefix(&self.path).ok()?;
        Some(relative.to_string_lossy().replace('\\', "/"))
    }
}

/// Resolves a path that may not exist yet.
///
/// The deepest existing ancestor is canonicalized (following symlinks) and the missing tail
/// is appended and cleaned lexically. A missing tail cannot contain symlinks, so the result
/// is where the OS would create the file.
pub fn resolve_lenient(path: &Path) -> io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut existing = absolute.as_path();
    let mut tail = Vec::new();
    loop {
        if fs::symlink_metadata(existing).is_ok() {
            break;
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                existing = parent;
            }
            (Some(parent), None) => {
                // trailing `..` component: keep it for the lexical clean below
                tail.push("..".into());
                existing = parent;
            }
            (None, _) => break,
        }
    }

    let mut resolved = fs::canonicalize(existing)?;
    for part in tail.iter().rev() {
        resolved.push(part);
    }
    Ok(resolved.clean())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn rejects_missing_root() {
        let dir = TempDir::new().unwrap();
        let err = ProjectRoot::new(dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, RootError::Io { .. }));
    }

    #[test]
    fn contains_new_files_and_rejects_traversal() {
        let dir = TempDir::new().unwrap();
        let root = ProjectRoot::new(dir.path()).unwrap();

        assert!(root.contains(&root.path().join("src/main/java/New.java")));
        assert!(root.contains(Path::new("relative/new.txt")));
        assert!(!root.contains(&root.path().join("../outside.txt")));
        assert!(!root.contains(&root.path().join("a/b/../../../outside.txt")));
        assert!(!root.contains(Path::new("/etc/passwd")));
    }

    #[test]
    fn sibling_with_common_prefix_is_outside() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("app")).unwrap();
        fs::create_dir(dir.path().join("app-evil")).unwrap();
        let root = ProjectRoot::new(dir.path().join("app")).unwrap();
        assert!(!root.contains(&dir.path().join("app-evil/x.txt")));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escaping_the_root_is_outside() {
        let outside = TempDir::new().unwrap();
        let dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        let root = ProjectRoot::new(dir.path()).unwrap();
        assert!(!root.contains(&root.path().join("link/evil.txt")));
    }

    #[test]
    fn relative_display_uses_forward_slashes() {
        let dir = TempDir::new().unwrap();
        let root = ProjectRoot::new(dir.path()).unwrap();
        let path = root.join("src/main/java/A.java");
        assert_eq!(
            root.relative_display(&path).as_deref(),
            Some("src/main/java/A.java")
        );
    }
}
