//! Streaming client for the Gemini `streamGenerateContent` endpoint.

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader};
use tracing::{debug, warn};

use crate::config::ModelSettings;
use crate::contexts::{ModelClient, ModelError, ModelReply};

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];
const SAFETY_FINISH_REASON: &str = "SAFETY";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Content {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<Part>,
}

impl Content {
    fn new(role: &str, text: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            parts: vec![Part { text: text.into() }],
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
struct SafetySetting<'a> {
    category: &'a str,
    threshold: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: &'a [Content],
    generation_config: GenerationConfig,
    safety_settings: Vec<SafetySetting<'a>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl StreamChunk {
    fn text(&self) -> String {
        self.candidates
            .iter()
            .filter_map(|c| c.content.as_ref())
            .flat_map(|content| content.parts.iter())
            .map(|part| part.text.as_str())
            .collect()
    }

    fn block_reason(&self) -> Option<String> {
        if let Some(reason) = self
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.clone())
        {
            return Some(reason);
        }
        self.candidates
            .iter()
            .filter_map(|c| c.finish_reason.as_deref())
            .find(|reason| *reason == SAFETY_FINISH_REASON)
            .map(str::to_string)
    }
}

/// Parses one SSE line. Non-data lines (comments, blank keep-alives) yield `None`.
fn parse_sse_line(line: &str) -> Option<Result<StreamChunk, ModelError>> {
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    Some(
        serde_json::from_str(data)
            .map_err(|e| ModelError::Protocol(format!("invalid stream chunk: {}", e))),
    )
}

/// Keeps the whole conversation so each call continues the same chat.
pub struct GeminiClient {
    http: Client,
    settings: ModelSettings,
    api_key: String,
    contents: Vec<Content>,
}

impl GeminiClient {
    /// Reads the API key from the environment variable named in the settings.
    pub fn from_settings(settings: &ModelSettings) -> Result<Self, ModelError> {
        let api_key = std::env::var(&settings.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ModelError::MissingApiKey(settings.api_key_env.clone()))?;
        Self::with_api_key(settings, api_key)
    }

    pub fn with_api_key(settings: &ModelSettings, api_key: String) -> Result<Self, ModelError> {
        let http = Client::builder()
            .timeout(settings.request_timeout())
            .build()?;
        Ok(Self {
            http,
            settings: settings.clone(),
            api_key,
            contents: Vec::new(),
        })
    }

    fn stream_url(&self) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.settings.endpoint.trim_end_matches('/'),
            self.settings.name
        )
    }

    fn request_body(&self) -> GenerateRequest<'_> {
        GenerateRequest {
            contents: &self.contents,
            generation_config: GenerationConfig {
                temperature: self.settings.temperature,
                top_p: self.settings.top_p,
                top_k: self.settings.top_k,
                max_output_tokens: self.settings.max_output_tokens,
            },
            safety_settings: HARM_CATEGORIES
                .iter()
                .map(|&category| SafetySetting {
                    category,
                    threshold: &self.settings.safety_threshold,
                })
                .collect(),
        }
    }

    fn stream(&self, on_chunk: &mut dyn FnMut(&str)) -> Result<ModelReply, ModelError> {
        debug!("POST {}", self.stream_url());
        let response = self
            .http
            .post(self.stream_url())
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request_body())
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().unwrap_or_default();
            return Err(ModelError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let mut full = String::new();
        for line in BufReader::new(response).lines() {
            let line = line.map_err(|e| ModelError::Protocol(format!("stream interrupted: {}", e)))?;
            let Some(chunk) = parse_sse_line(&line) else {
                continue;
            };
            let chunk = chunk?;
            if let Some(reason) = chunk.block_reason() {
                return Ok(ModelReply::Blocked { reason });
            }
            let text = chunk.text();
            if !text.is_empty() {
                on_chunk(&text);
                full.push_str(&text);
            }
        }

        if full.is_empty() {
            return Err(ModelError::Protocol("the model returned no text".to_string()));
        }
        Ok(ModelReply::Text(full))
    }
}

impl ModelClient for GeminiClient {
    fn send_prompt(
        &mut self,
        prompt: &str,
        on_chunk: &mut dyn FnMut(&str),
    ) -> Result<ModelReply, ModelError> {
        self.contents.push(Content::new("user", prompt));
        let result = self.stream(on_chunk);
        match &result {
            Ok(ModelReply::Text(text)) => self.contents.push(Content::new("model", text.clone())),
            Ok(ModelReply::Blocked { reason }) => {
                warn!("Prompt blocked by the model: {}", reason);
                self.contents.pop();
            }
            Err(_) => {
                self.contents.pop();
            }
        }
        result
    }
}
