use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::data::{FileCategory, SourceLayout};
use crate::project_root::ProjectRoot;

/// Locates existing files inside the project, using the source layout to search for bare names.
pub struct PathResolver<'a> {
    root: &'a ProjectRoot,
    layout: &'a SourceLayout,
}

impl<'a> PathResolver<'a> {
    pub fn new(root: &'a ProjectRoot, layout: &'a SourceLayout) -> Self {
        Self { root, layout }
    }

    /// Finds an existing file for a name or path. First match wins:
    ///
    /// 1. an absolute path inside the root
    /// 2. a path relative to the root
    /// 3. (reject leaf names carrying `..` or separators)
    /// 4. a recursive search of the convention directories for the category
    /// 5. a last direct join for names with a known extension, after slash normalisation
    pub fn locate(&self, name_or_path: &str) -> Option<PathBuf> {
        let name_or_path = name_or_path.trim();
        if name_or_path.is_empty() {
            return None;
        }
        let target = Path::new(name_or_path);

        if target.is_absolute() {
            if target.is_file() && self.root.contains(target) {
                return Some(target.to_path_buf());
            }
        } else {
            let relative = self.root.path().join(target);
            if relative.is_file() && self.root.contains(&relative) {
                return Some(relative);
            }
        }

        let file_name = target.file_name().and_then(|n| n.to_str())?;
        if file_name.contains("..") || file_name.contains('/') || file_name.contains('\\') {
            warn!("Skipping potentially unsafe filename for search: {}", file_name);
            return None;
        }

        let has_extension = target.extension().is_some();
        if let Some(category) = self.layout.classify_for_search(file_name) {
            let mut candidates = vec![file_name.to_string()];
            if !has_extension && category == FileCategory::JavaSource {
                candidates.push(format!("{}.java", file_name));
            }
            for dir in self.layout.search_dirs(category) {
                if let Some(found) = self.search_dir(dir, &candidates) {
                    return Some(found);
                }
            }
        }

        if has_extension {
            let normalized = name_or_path.replace('\\', "/");
            let potential = self.root.path().join(normalized.trim_start_matches('/'));
            if potential.is_file() && self.root.contains(&potential) {
                return Some(potential);
            }
        }

        debug!("No project file matches '{}'", name_or_path);
        None
    }

    /// Reads a file after re-checking that it is still inside the root
    pub fn read(&self, path: &Path) -> io::Result<String> {
        if !self.root.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("refusing to read outside project root: {}", path.display()),
            ));
        }
        fs::read_to_string(path)
    }

    fn search_dir(&self, dir: &str, candidates: &[String]) -> Option<PathBuf> {
        let base = self.root.path().join(dir);
        if !base.is_dir() || !self.root.contains(&base) {
            return None;
        }
        let base_canonical = fs::canonicalize(&base).ok()?;

        for candidate in candidates {
            let found = WalkDir::new(&base)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .filter(|entry| entry.file_name().to_str() == Some(candidate.as_str()))
                .map(|entry| entry.into_path())
                .find(|path| {
                    fs::canonicalize(path)
                        .map(|resolved| resolved.starts_with(&base_canonical))
                        .unwrap_or(false)
                        && self.root.contains(path)
                });
            if let Some(path) = found {
                debug!("Found '{}' under {}", candidate, dir);
                return Some(path);
            }
        }
        None
    }
}
