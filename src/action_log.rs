//! Append-only record of pipeline runs, applied files and reverts.
//!
//! Plain text, one `[YYYY-MM-DD HH:MM:SS] message` line per action. Only read back for display.

use chrono::{DateTime, Local};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone)]
pub struct ActionLog {
    path: PathBuf,
}

impl ActionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one timestamped line; multi-line messages are folded onto it.
    pub fn append(&self, message: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(format_entry(Local::now(), message).as_bytes())?;
        debug!("Logged action to {}", self.path.display());
        Ok(())
    }

    /// The last `n` lines, oldest first. A missing log reads as empty.
    pub fn tail(&self, n: usize) -> io::Result<Vec<String>> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let text = String::from_utf8_lossy(&raw);
        let lines: Vec<String> = text.lines().map(str::to_string).collect();
        let skip = lines.len().saturating_sub(n);
        Ok(lines.into_iter().skip(skip).collect())
    }
}

fn format_entry(timestamp: DateTime<Local>, message: &str) -> String {
    let folded = message
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" | ");
    format!("[{}] {}\n", timestamp.format(TIMESTAMP_FORMAT), folded)
}
