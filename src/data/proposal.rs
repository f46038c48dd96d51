use std::fmt;
use std::path::{Path, PathBuf};

/// Declared path given to a code block that was not wrapped in file markers.
pub const UNLOCATED_PATH: &str = "Unknown (AI response format error)";

/// One candidate file change extracted from a model reply.
///
/// Proposals are only built by the response parser and never change afterwards. When
/// `resolved_path` is present it has already passed a canonical containment check against
/// the project root; writers still re-check it before touching the disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileProposal {
    declared_path: String,
    resolved_path: Option<PathBuf>,
    language: String,
    content: String,
}

impl FileProposal {
    pub(crate) fn located(
        declared_path: String,
        resolved_path: PathBuf,
        language: String,
        content: String,
    ) -> Self {
        Self {
            declared_path,
            resolved_path: Some(resolved_path),
            language,
            content,
        }
    }

    pub(crate) fn unlocated(language: String, content: String) -> Self {
        Self {
            declared_path: UNLOCATED_PATH.to_string(),
            resolved_path: None,
            language,
            content,
        }
    }

    /// The path as the model wrote it, with forward slashes
    pub fn declared_path(&self) -> &str {
        &self.declared_path
    }

    /// Absolute target inside the project root, or `None` when the location is unknown
    pub fn resolved_path(&self) -> Option<&Path> {
        self.resolved_path.as_deref()
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    /// Complete file body, trimmed of surrounding whitespace
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Whether the proposal can be handed to the file writer at all
    pub fn is_applicable(&self) -> bool {
        self.resolved_path.is_some()
    }
}

/// Category of a non-fatal problem noticed while parsing a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// A path was rejected because it could leave the project root
    SecurityViolation,
    /// The reply did not follow the expected format and a best-effort guess was made
    ParseAmbiguity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn security(message: impl Into<String>) -> Self {
        Self {
            kind: DiagnosticKind::SecurityViolation,
            message: message.into(),
        }
    }

    pub fn ambiguity(message: impl Into<String>) -> Self {
        Self {
            kind: DiagnosticKind::ParseAmbiguity,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            DiagnosticKind::SecurityViolation => write!(f, "security: {}", self.message),
            DiagnosticKind::ParseAmbiguity => write!(f, "warning: {}", self.message),
        }
    }
}
