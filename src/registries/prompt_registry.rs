use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

pub const ASSISTANT_PROMPT: &str = "assistant";

const BUILTIN_ASSISTANT_TEMPLATE: &str = r#"You are an expert AI developer assistant skilled in Java/Spring Boot, HTML, CSS, JavaScript, Robot Framework, XML, and general project structure for a project typically using Maven.

Standard Source Directories (use these relative paths in your output):
- Java Source: {{input.layout.java_main}} (Main), {{input.layout.java_test}} (Test)
- Static Web Assets (HTML/CSS/JS): {{input.layout.static_assets}}
- Robot Tests: {{input.layout.robot_tests}}
- Resources: {{input.layout.main_resources}}, {{input.layout.test_resources}}
- Maven Config: pom.xml at the root

User Request:
{{input.request}}

{{input.context?}}

Instructions:
1. Work out whether the user wants to analyze, modify, create, or explain code.
2. When modifying or creating files:
   a. Provide the complete content of every file you change.
   b. Use a path relative to the project root that follows the directories above, unless the user gave a valid relative path.
   c. Format every file EXACTLY like this:
      --- START FILE: path/relative/to/project/root/FileName.ext ---
      ```language_tag
      complete file content
      ```
      --- END FILE: path/relative/to/project/root/FileName.ext ---
   d. Use a language tag such as java, html, css, javascript, robotframework, xml, properties or md.
3. For conceptual questions answer directly, without file markers.
"#;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("required placeholder '{0}' could not be resolved")]
    MissingPlaceholder(String),
    #[error("invalid path '{0}' in placeholder")]
    InvalidPlaceholderPath(String),
    #[error("prompt specification {} is invalid: {details}", path.display())]
    InvalidSpecification { path: PathBuf, details: String },
    #[error("prompt input could not be serialized: {0}")]
    Input(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct PromptSpec {
    system_prompt: String,
}

/// A prompt with `{{input.x}}` (required) and `{{input.x?}}` (optional) placeholders.
///
/// Dotted paths reach into nested input values: `{{input.layout.java_main}}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    text: String,
}

impl PromptTemplate {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn builtin_assistant() -> Self {
        Self::new(BUILTIN_ASSISTANT_TEMPLATE)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn render<T: Serialize>(&self, input: &T) -> Result<String, PromptError> {
        let input = serde_json::to_value(input)?;
        let mut result = self.text.clone();
        let mut offset = 0;

        while let Some(found) = result[offset..].find("{{") {
            let start = offset + found;
            let Some(len) = result[start..].find("}}") else {
                break;
            };
            let end = start + len;
            let placeholder = result[start + 2..end].trim().to_string();
            let (path, optional) = match placeholder.strip_suffix('?') {
                Some(path) => (path, true),
                None => (placeholder.as_str(), false),
            };

            let replacement = match lookup(&input, path)? {
                Some(value) => value_to_string(value)?,
                None if optional => String::new(),
                None => return Err(PromptError::MissingPlaceholder(path.to_string())),
            };
            result.replace_range(start..end + 2, &replacement);
            offset = start + replacement.len();
        }

        Ok(result)
    }
}

fn lookup<'v>(
    input: &'v serde_json::Value,
    path: &str,
) -> Result<Option<&'v serde_json::Value>, PromptError> {
    let mut parts = path.split('.');
    if parts.next() != Some("input") {
        return Err(PromptError::InvalidPlaceholderPath(path.to_string()));
    }
    let mut current = input;
    for part in parts {
        match current.get(part) {
            Some(value) => current = value,
            None => return Ok(None),
        }
    }
    // null counts as absent so optional sections disappear cleanly
    Ok((!current.is_null()).then_some(current))
}

fn value_to_string(value: &serde_json::Value) -> Result<String, PromptError> {
    Ok(match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => String::new(),
        other => serde_json::to_string(other)?,
    })
}

/// Loads prompt templates from `<dir>/<name>.yml` files with a `system_prompt` key
#[derive(Debug, Clone)]
pub struct PromptRegistry {
    prompts_dir: PathBuf,
}

impl PromptRegistry {
    pub fn new(prompts_dir: impl Into<PathBuf>) -> Self {
        Self {
            prompts_dir: prompts_dir.into(),
        }
    }

    /// Returns the named template, or `None` if no file exists for it.
    pub fn get(&self, name: &str) -> Result<Option<PromptTemplate>, PromptError> {
        let path = self.prompts_dir.join(format!("{}.yml", name));
        if !path.is_file() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(|e| PromptError::InvalidSpecification {
            path: path.clone(),
            details: e.to_string(),
        })?;
        let spec: PromptSpec =
            serde_yaml::from_str(&content).map_err(|e| PromptError::InvalidSpecification {
                path: path.clone(),
                details: e.to_string(),
            })?;
        debug!("Loaded prompt '{}' from {}", name, path.display());
        Ok(Some(PromptTemplate::new(spec.system_prompt)))
    }

    /// The assistant prompt, falling back to the built-in one
    pub fn assistant(&self) -> Result<PromptTemplate, PromptError> {
        Ok(self
            .get(ASSISTANT_PROMPT)?
            .unwrap_or_else(PromptTemplate::builtin_assistant))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn renders_required_optional_and_nested() {
        let template = PromptTemplate::new("{{input.name}} in {{input.where.city}}{{input.note?}}!");
        let rendered = template
            .render(&json!({"name": "Alice", "where": {"city": "Aarhus"}}))
            .unwrap();
        assert_eq!(rendered, "Alice in Aarhus!");
    }

    #[test]
    fn null_optional_values_render_empty() {
        let template = PromptTemplate::new("[{{input.context?}}]");
        assert_eq!(template.render(&json!({"context": null})).unwrap(), "[]");
    }

    #[test]
    fn missing_required_placeholder_fails() {
        let template = PromptTemplate::new("{{input.request}}");
        match template.render(&json!({})) {
            Err(PromptError::MissingPlaceholder(path)) => assert_eq!(path, "input.request"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn placeholders_must_start_with_input() {
        let template = PromptTemplate::new("{{output.x}}");
        assert!(matches!(
            template.render(&json!({})),
            Err(PromptError::InvalidPlaceholderPath(_))
        ));
    }

    #[test]
    fn replacement_text_is_not_rescanned() {
        let template = PromptTemplate::new("{{input.request}} done");
        let rendered = template
            .render(&json!({"request": "use {{input.secret}}"}))
            .unwrap();
        assert_eq!(rendered, "use {{input.secret}} done");
    }

    #[test]
    fn registry_prefers_file_and_falls_back_to_builtin() {
        let dir = TempDir::new().unwrap();
        let registry = PromptRegistry::new(dir.path());
        assert_eq!(
            registry.assistant().unwrap(),
            PromptTemplate::builtin_assistant()
        );

        fs::write(
            dir.path().join("assistant.yml"),
            "name: assistant\nsystem_prompt: |\n  Custom {{input.request}}\n",
        )
        .unwrap();
        assert_eq!(registry.assistant().unwrap().text(), "Custom {{input.request}}\n");
    }

    #[test]
    fn registry_rejects_spec_without_prompt() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("assistant.yml"), "name: assistant\n").unwrap();
        let registry = PromptRegistry::new(dir.path());
        assert!(matches!(
            registry.assistant(),
            Err(PromptError::InvalidSpecification { .. })
        ));
    }
}
