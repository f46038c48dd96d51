use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::data::FileProposal;
use crate::project_root::ProjectRoot;

/// What the write did to the target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    Overwritten,
}

impl WriteOutcome {
    pub fn verb(self) -> &'static str {
        match self {
            WriteOutcome::Created => "Created",
            WriteOutcome::Overwritten => "Updated",
        }
    }
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("refusing to write outside the project root: {}", .0.display())]
    PathEscapesRoot(PathBuf),
    #[error("proposal has no resolved path (declared as '{0}')")]
    Unlocated(String),
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Writes complete file bodies inside the project root.
///
/// Containment is checked again on every call, whatever the caller already verified.
pub struct FileWriter<'a> {
    root: &'a ProjectRoot,
}

impl<'a> FileWriter<'a> {
    pub fn new(root: &'a ProjectRoot) -> Self {
        Self { root }
    }

    /// Replaces (or creates) `path` with `content`, creating missing parent directories.
    pub fn apply(&self, path: &Path, content: &str) -> Result<WriteOutcome, WriteError> {
        if !self.root.contains(path) {
            return Err(WriteError::PathEscapesRoot(path.to_path_buf()));
        }
        let parent = path
            .parent()
            .ok_or_else(|| WriteError::PathEscapesRoot(path.to_path_buf()))?;
        if !self.root.contains(parent) {
            return Err(WriteError::PathEscapesRoot(parent.to_path_buf()));
        }

        fs::create_dir_all(parent).map_err(|source| WriteError::Io {
            path: parent.to_path_buf(),
            source,
        })?;

        // parent creation may have followed a freshly planted link
        if !self.root.contains(path) {
            return Err(WriteError::PathEscapesRoot(path.to_path_buf()));
        }

        let existed = path.exists();
        fs::write(path, content).map_err(|source| WriteError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let outcome = if existed {
            WriteOutcome::Overwritten
        } else {
            WriteOutcome::Created
        };
        info!("{} {}", outcome.verb(), path.display());
        Ok(outcome)
    }

    /// Writes a parsed proposal. Unlocated proposals are refused outright.
    pub fn apply_proposal(&self, proposal: &FileProposal) -> Result<WriteOutcome, WriteError> {
        let Some(path) = proposal.resolved_path() else {
            debug!("Refusing unlocated proposal '{}'", proposal.declared_path());
            return Err(WriteError::Unlocated(proposal.declared_path().to_string()));
        };
        self.apply(path, proposal.content())
    }
}
