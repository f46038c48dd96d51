//! Startup configuration.
//!
//! Built-in defaults are overlaid by an optional `autodev.yml` (or `--config`), then by CLI
//! flags. The resulting [`Config`] is immutable and passed by reference everywhere.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::data::SourceLayout;
use crate::project_root::ProjectRoot;

pub const DEFAULT_CONFIG_FILE: &str = "autodev.yml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub name: String,
    /// Environment variable holding the API key; the key itself is never stored here
    pub api_key_env: String,
    pub endpoint: String,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
    pub safety_threshold: String,
    pub request_timeout_secs: u64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            name: "gemini-1.5-pro-latest".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            temperature: 0.7,
            top_p: 1.0,
            top_k: 1,
            max_output_tokens: 8192,
            safety_threshold: "BLOCK_MEDIUM_AND_ABOVE".to_string(),
            request_timeout_secs: 300,
        }
    }
}

impl ModelSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContextSettings {
    pub max_files: usize,
    pub max_file_chars: usize,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            max_files: 3,
            max_file_chars: 5000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub launch_command: Vec<String>,
    pub host: String,
    pub port: u16,
    pub port_attempts: u32,
    pub port_delay_ms: u64,
    pub connect_timeout_ms: u64,
    pub test_command: String,
    /// Suite location relative to the project root. Unset or empty skips tests and publishing.
    pub test_suite: Option<PathBuf>,
    pub test_timeout_secs: u64,
    pub terminate_grace_ms: u64,
    pub remote: String,
    pub branch: String,
    pub commit_message: String,
    pub deploy_command: Option<Vec<String>>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            launch_command: vec![
                "mvn".to_string(),
                "spring-boot:run".to_string(),
                "-Dserver.port=8081".to_string(),
            ],
            host: "127.0.0.1".to_string(),
            port: 8081,
            port_attempts: 30,
            port_delay_ms: 2000,
            connect_timeout_ms: 1000,
            test_command: "robot".to_string(),
            test_suite: Some(PathBuf::from(SourceLayout::maven().robot_tests)),
            test_timeout_secs: 300,
            terminate_grace_ms: 500,
            remote: "origin".to_string(),
            branch: "main".to_string(),
            commit_message: "feat: AI-assisted code changes and test updates".to_string(),
            deploy_command: None,
        }
    }
}

impl PipelineSettings {
    pub fn port_delay(&self) -> Duration {
        Duration::from_millis(self.port_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout_secs)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }
}

/// Shape of `autodev.yml`. Every field is optional.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub project_root: Option<PathBuf>,
    pub model: ModelSettings,
    pub context: ContextSettings,
    pub pipeline: PipelineSettings,
    /// Relative to the project root
    pub action_log: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            project_root: None,
            model: ModelSettings::default(),
            context: ContextSettings::default(),
            pipeline: PipelineSettings::default(),
            action_log: PathBuf::from(".autodev/actions.log"),
        }
    }
}

impl Settings {
    /// Loads an explicit file, or `autodev.yml` from the working directory when present.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.is_file() {
                    debug!("No {} found, using built-in defaults", DEFAULT_CONFIG_FILE);
                    return Ok(Self::default());
                }
                default
            }
        };
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }
}

/// Process-wide configuration, fixed for the lifetime of the process
#[derive(Debug, Clone)]
pub struct Config {
    pub project_root: ProjectRoot,
    pub layout: SourceLayout,
    pub model: ModelSettings,
    pub context: ContextSettings,
    pub pipeline: PipelineSettings,
    pub action_log: PathBuf,
    pub verbose: bool,
    pub dry_run: bool,
}

impl Config {
    /// Resolves the project root (flag, then file, then working directory) and freezes settings.
    pub fn build(
        settings: Settings,
        root_override: Option<PathBuf>,
        verbose: bool,
        dry_run: bool,
    ) -> Result<Self> {
        let root_path = match root_override.or(settings.project_root.clone()) {
            Some(path) => path,
            None => std::env::current_dir().context("Failed to resolve current directory")?,
        };
        let project_root = ProjectRoot::new(&root_path)
            .with_context(|| format!("Invalid project root {}", root_path.display()))?;
        let action_log = project_root.join(&settings.action_log);

        Ok(Self {
            project_root,
            layout: SourceLayout::maven(),
            model: settings.model,
            context: settings.context,
            pipeline: settings.pipeline,
            action_log,
            verbose,
            dry_run,
        })
    }

    /// Defaults for an already validated root
    pub fn for_root(project_root: ProjectRoot) -> Self {
        let settings = Settings::default();
        let action_log = project_root.join(&settings.action_log);
        Self {
            project_root,
            layout: SourceLayout::maven(),
            model: settings.model,
            context: settings.context,
            pipeline: settings.pipeline,
            action_log,
            verbose: false,
            dry_run: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let yaml = r#"
model:
  name: gemini-2.0-flash
pipeline:
  port: 9090
  deploy_command: ["./deploy.sh"]
"#;
        let settings = Settings::from_yaml(yaml).unwrap();
        assert_eq!(settings.model.name, "gemini-2.0-flash");
        assert_eq!(settings.model.api_key_env, "GEMINI_API_KEY");
        assert_eq!(settings.pipeline.port, 9090);
        assert_eq!(settings.pipeline.port_attempts, 30);
        assert_eq!(
            settings.pipeline.deploy_command,
            Some(vec!["./deploy.sh".to_string()])
        );
        assert_eq!(settings.context.max_files, 3);
    }

    #[test]
    fn empty_yaml_is_default() {
        let settings = Settings::from_yaml("  \n").unwrap();
        assert_eq!(settings.pipeline.branch, "main");
    }

    #[test]
    fn null_suite_clears_the_default() {
        let settings = Settings::from_yaml("pipeline:\n  test_suite: ~\n").unwrap();
        assert_eq!(settings.pipeline.test_suite, None);
        assert!(Settings::default().pipeline.test_suite.is_some());
    }

    #[test]
    fn root_flag_overrides_file() {
        let from_file = TempDir::new().unwrap();
        let from_flag = TempDir::new().unwrap();
        let settings = Settings {
            project_root: Some(from_file.path().to_path_buf()),
            ..Settings::default()
        };

        let config =
            Config::build(settings, Some(from_flag.path().to_path_buf()), false, true).unwrap();
        assert_eq!(
            config.project_root.path(),
            fs::canonicalize(from_flag.path()).unwrap()
        );
        assert!(config.action_log.starts_with(config.project_root.path()));
        assert!(config.dry_run);
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = TempDir::new().unwrap();
        let result = Config::build(
            Settings::default(),
            Some(dir.path().join("missing")),
            false,
            false,
        );
        assert!(result.is_err());
    }
}
