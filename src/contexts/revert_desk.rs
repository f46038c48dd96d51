use thiserror::Error;
use tracing::{info, warn};

use super::pipeline_runner::Vcs;
use crate::action_log::ActionLog;
use crate::config::Config;

/// How far back `revert` looks for a commit matching the given prefix
pub const REVERT_SEARCH_DEPTH: usize = 20;
const MIN_COMMIT_ID_LEN: usize = 6;
const FIELD_SEPARATOR: char = '\u{1f}';

#[derive(Debug, Error)]
pub enum RevertError {
    #[error("'{0}' is not a commit id (expected at least 6 hex characters)")]
    InvalidCommitId(String),
    #[error("commit `{id}` not found in the last {depth} commits")]
    CommitNotFound { id: String, depth: usize },
    #[error("'{0}' is not a valid tag name")]
    InvalidTag(String),
    #[error("git {step} failed:\n{output}")]
    Git { step: String, output: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSummary {
    pub sha: String,
    pub subject: String,
    pub author: String,
    pub date: String,
}

impl CommitSummary {
    pub fn short_sha(&self) -> &str {
        &self.sha[..self.sha.len().min(7)]
    }

    pub fn render(&self) -> String {
        format!(
            "🔸 `{}` - {} by *{}* on {}",
            self.short_sha(),
            self.subject,
            self.author,
            self.date
        )
    }
}

/// First whitespace-separated token of at least six hex digits
pub fn extract_commit_id(text: &str) -> Option<&str> {
    text.split_whitespace()
        .find(|word| word.len() >= MIN_COMMIT_ID_LEN && word.chars().all(|c| c.is_ascii_hexdigit()))
}

/// A tag name git would accept as a ref and never read as an option.
fn is_valid_tag_name(tag: &str) -> bool {
    !tag.is_empty()
        && !tag.starts_with(['-', '.', '/'])
        && !tag.ends_with(['.', '/'])
        && !tag.ends_with(".lock")
        && tag != "@"
        && !tag.contains("..")
        && !tag.contains("@{")
        && !tag.contains("//")
        && !tag
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || "~^:?*[\\".contains(c))
}

/// Lists recent commits and reverts one of them, recording every outcome in the action log.
pub struct RevertDesk<'a, V: Vcs> {
    config: &'a Config,
    vcs: V,
    log: &'a ActionLog,
}

impl<'a, V: Vcs> RevertDesk<'a, V> {
    pub fn new(config: &'a Config, vcs: V, log: &'a ActionLog) -> Self {
        Self { config, vcs, log }
    }

    pub fn recent_commits(&mut self, count: usize) -> Result<Vec<CommitSummary>, RevertError> {
        let count = count.to_string();
        let args = [
            "log",
            self.config.pipeline.branch.as_str(),
            "-n",
            count.as_str(),
            "--pretty=format:%H%x1f%s%x1f%an%x1f%ad",
            "--date=format:%Y-%m-%d %H:%M:%S",
        ];
        let result = self.vcs.run(&args);
        if !result.success {
            return Err(RevertError::Git {
                step: "log".to_string(),
                output: result.output,
            });
        }
        Ok(result.output.lines().filter_map(parse_commit_line).collect())
    }

    /// Reverts the commit whose sha starts with `id`, optionally tags it, and pushes.
    ///
    /// Returns the user-facing result line that was also written to the action log.
    pub fn revert(&mut self, id: &str, tag: Option<&str>) -> Result<String, RevertError> {
        let id = id.trim().to_ascii_lowercase();
        if extract_commit_id(&id) != Some(id.as_str()) {
            return Err(RevertError::InvalidCommitId(id));
        }
        if let Some(tag) = tag.filter(|tag| !is_valid_tag_name(tag)) {
            return Err(RevertError::InvalidTag(tag.to_string()));
        }

        let commits = self.recent_commits(REVERT_SEARCH_DEPTH)?;
        let Some(target) = commits.iter().find(|c| c.sha.starts_with(&id)) else {
            let err = RevertError::CommitNotFound {
                id,
                depth: REVERT_SEARCH_DEPTH,
            };
            self.record(&format!("❌ {}", err));
            return Err(err);
        };

        let remote = self.config.pipeline.remote.clone();
        let branch = self.config.pipeline.branch.clone();
        self.git("revert", &["revert", "--no-edit", target.sha.as_str()])?;
        let mut result = format!("✅ Reverted commit {}", target.short_sha());

        if let Some(tag) = tag {
            self.git("tag", &["tag", tag])?;
            result.push_str(&format!("\n🏷️ Tagged as {}", tag));
        }
        self.git("push", &["push", remote.as_str(), branch.as_str()])?;
        if let Some(tag) = tag {
            self.git("push tag", &["push", remote.as_str(), tag])?;
        }

        info!("{}", result);
        self.record(&result);
        Ok(result)
    }

    fn git(&mut self, step: &str, args: &[&str]) -> Result<(), RevertError> {
        let result = self.vcs.run(args);
        if result.success {
            return Ok(());
        }
        let err = RevertError::Git {
            step: step.to_string(),
            output: result.output,
        };
        self.record(&format!("❌ Revert error: {}", err));
        Err(err)
    }

    fn record(&self, message: &str) {
        if let Err(e) = self.log.append(message) {
            warn!("Failed to write action log {}: {}", self.log.path().display(), e);
        }
    }
}

fn parse_commit_line(line: &str) -> Option<CommitSummary> {
    let mut fields = line.split(FIELD_SEPARATOR);
    let sha = fields.next()?.trim();
    if sha.is_empty() {
        return None;
    }
    Some(CommitSummary {
        sha: sha.to_string(),
        subject: fields.next().unwrap_or_default().to_string(),
        author: fields.next().unwrap_or_default().to_string(),
        date: fields.next().unwrap_or_default().to_string(),
    })
}
