use std::io;
use std::path::PathBuf;
use std::process::Command;
use tracing::debug;

use crate::contexts::{CommandOutput, Vcs};

/// Runs `git` in a fixed directory. A missing binary is a failed output, never a panic.
pub struct GitCli {
    repo: PathBuf,
}

impl GitCli {
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self { repo: repo.into() }
    }
}

impl Vcs for GitCli {
    fn run(&mut self, args: &[&str]) -> CommandOutput {
        debug!("> git {}", args.join(" "));
        if !self.repo.is_dir() {
            return CommandOutput::failed(format!(
                "Repository directory {} does not exist",
                self.repo.display()
            ));
        }
        match Command::new("git").args(args).current_dir(&self.repo).output() {
            Ok(out) => {
                let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
                output.push_str(&String::from_utf8_lossy(&out.stderr));
                CommandOutput {
                    success: out.status.success(),
                    output,
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => CommandOutput::failed(
                "Error: 'git' command not found. Is Git installed and in PATH?",
            ),
            Err(e) => CommandOutput::failed(format!("Failed to run git: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn failures_come_back_as_output() {
        let dir = TempDir::new().unwrap();
        let mut git = GitCli::new(dir.path().join("not-a-directory"));
        let result = git.run(&["status"]);
        assert!(!result.success);
        assert!(result.output.contains("does not exist"));
    }
}
