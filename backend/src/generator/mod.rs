//! Task generation: natural-language instruction to regex tasks.
//!
//! The workflow only depends on the [`TaskGenerator`] trait. [`AiClient`]
//! implements it on top of the Anthropic messages API.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use regexflow::generator::{AiClient, TaskGenerator};
//!
//! let client = AiClient::from_env()?;
//! let specs = client.generate("redact all emails", &columns).await?;
//! ```

pub mod prompt;

use async_trait::async_trait;
use serde::Deserialize;
use std::env;
use tracing::{debug, warn};

use crate::api::logs::{log_info_indent, log_warning};
use crate::error::{GeneratorError, GeneratorResult};
use crate::task::TaskSpec;

pub use prompt::{build_messages, system_prompt, user_prompt};

/// Turns an instruction into task specs for a table with `columns`.
#[async_trait]
pub trait TaskGenerator: Send + Sync {
    async fn generate(
        &self,
        description: &str,
        columns: &[String],
    ) -> GeneratorResult<Vec<TaskSpec>>;
}

/// Generator used when no API key is configured. Always fails.
#[derive(Debug, Clone, Default)]
pub struct DisabledGenerator;

#[async_trait]
impl TaskGenerator for DisabledGenerator {
    async fn generate(
        &self,
        _description: &str,
        _columns: &[String],
    ) -> GeneratorResult<Vec<TaskSpec>> {
        Err(GeneratorError::MissingApiKey(
            "ANTHROPIC_API_KEY not set; task generation is disabled".to_string(),
        ))
    }
}

// =============================================================================
// Anthropic client
// =============================================================================

/// Default model
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Anthropic API client
#[derive(Clone)]
pub struct AiClient {
    api_key: String,
    model: String,
    max_tokens: u32,
    max_retries: u32,
}

/// Anthropic API response structure
#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: String,
}

/// Anthropic API error response
#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Shape the model is asked to return
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TaskListResponse {
    Wrapped { tasks: Vec<TaskSpec> },
    Bare(Vec<TaskSpec>),
}

/// Default number of retries
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Delay between retries in milliseconds
const RETRY_DELAY_MS: u64 = 1000;

impl AiClient {
    /// Create a new client with explicit API key
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 1024,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Create a client from ANTHROPIC_API_KEY (and REGEXFLOW_MODEL if set)
    pub fn from_env() -> GeneratorResult<Self> {
        let _ = dotenvy::dotenv();

        let api_key = env::var("ANTHROPIC_API_KEY")
            .map_err(|_| GeneratorError::MissingApiKey("ANTHROPIC_API_KEY not set".to_string()))?;

        let client = Self::new(api_key);
        Ok(match env::var("REGEXFLOW_MODEL") {
            Ok(model) if !model.trim().is_empty() => client.with_model(model.trim()),
            _ => client,
        })
    }

    /// Set the model to use
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Single attempt
    async fn try_generate(
        &self,
        description: &str,
        columns: &[String],
    ) -> GeneratorResult<Vec<TaskSpec>> {
        let response = self.call_api(description, columns).await?;
        parse_tasks_from_response(&response)
    }

    /// Call Anthropic API
    async fn call_api(&self, description: &str, columns: &[String]) -> GeneratorResult<String> {
        debug!(
            model = %self.model,
            max_tokens = self.max_tokens,
            columns = columns.len(),
            "calling Anthropic API"
        );
        log_info_indent(format!("Calling {} ...", self.model), 1);

        let client = reqwest::Client::new();

        let request_body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": 0,
            "system": system_prompt(),
            "messages": build_messages(description, columns)
        });

        let response = client
            .post("https://api.anthropic.com/v1/messages")
            .header("Content-Type", "application/json")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&request_body)
            .send()
            .await
            .map_err(|e| GeneratorError::RequestFailed(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GeneratorError::RequestFailed(e.to_string()))?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<AnthropicError>(&body) {
                return Err(GeneratorError::ApiError(error.error.message));
            }
            return Err(GeneratorError::ApiError(format!("HTTP {}: {}", status, body)));
        }

        let response: AnthropicResponse = serde_json::from_str(&body)
            .map_err(|e| GeneratorError::InvalidResponse(e.to_string()))?;

        let text = response
            .content
            .iter()
            .filter(|c| c.content_type == "text")
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("");

        if text.is_empty() {
            return Err(GeneratorError::InvalidResponse("Empty response".to_string()));
        }

        debug!(bytes = text.len(), "received response");
        Ok(text)
    }
}

#[async_trait]
impl TaskGenerator for AiClient {
    /// Generate tasks, retrying transient failures.
    async fn generate(
        &self,
        description: &str,
        columns: &[String],
    ) -> GeneratorResult<Vec<TaskSpec>> {
        let description = description.trim();
        if description.is_empty() {
            return Err(GeneratorError::InvalidInstruction("description is empty".to_string()));
        }

        let mut last_error = None;

        for attempt in 1..=self.max_retries {
            match self.try_generate(description, columns).await {
                Ok(tasks) => return Ok(tasks),
                Err(e) => {
                    warn!(attempt, max = self.max_retries, error = %e, "generation attempt failed");
                    log_warning(format!("Attempt {}/{} failed: {}", attempt, self.max_retries, e));
                    last_error = Some(e);

                    if attempt < self.max_retries {
                        let delay = tokio::time::Duration::from_millis(RETRY_DELAY_MS);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| GeneratorError::ApiError("Unknown error".to_string())))
    }
}

/// Parse task specs from a model response
fn parse_tasks_from_response(response: &str) -> GeneratorResult<Vec<TaskSpec>> {
    let json_str = extract_json(response);

    let parsed: TaskListResponse = serde_json::from_str(&json_str).map_err(|e| {
        GeneratorError::InvalidResponse(format!(
            "Failed to parse tasks: {}. Response was: {}",
            e,
            response.chars().take(500).collect::<String>()
        ))
    })?;

    Ok(match parsed {
        TaskListResponse::Wrapped { tasks } => tasks,
        TaskListResponse::Bare(tasks) => tasks,
    })
}

/// Extract JSON from a response that may contain markdown code blocks
fn extract_json(text: &str) -> String {
    // Fenced ```json block
    if let Some(start) = text.find("```json") {
        let json_start = start + 7;
        if let Some(end) = text[json_start..].find("```") {
            return text[json_start..json_start + end].trim().to_string();
        }
    }

    // Generic fenced block, language tag skipped
    if let Some(start) = text.find("```") {
        let after_start = start + 3;
        let content_start = text[after_start..]
            .find('\n')
            .map(|i| after_start + i + 1)
            .unwrap_or(after_start);

        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim().to_string();
        }
    }

    // Raw object or array, whichever opens first
    let open = text.find(|c: char| c == '{' || c == '[');
    if let Some(start) = open {
        let close = if text[start..].starts_with('{') { '}' } else { ']' };
        if let Some(end) = text.rfind(close) {
            if start < end {
                return text[start..=end].to_string();
            }
        }
    }

    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_from_code_block() {
        let response = r#"Here are the tasks:

```json
{
  "tasks": [{"target": "column Email", "regex": "@", "replacement": " at "}]
}
```

Done!"#;

        let json = extract_json(response);
        assert!(json.starts_with('{'));
        assert!(json.contains("\"tasks\""));
    }

    #[test]
    fn test_extract_raw_json() {
        let response = r#"{"tasks": []}"#;
        assert_eq!(extract_json(response), response);
    }

    #[test]
    fn test_extract_json_with_prose() {
        let response =
            r#"Sure: [{"target": "all", "regex": "x", "replacement": "y"}] hope this helps"#;
        assert_eq!(
            extract_json(response),
            r#"[{"target": "all", "regex": "x", "replacement": "y"}]"#
        );
    }

    #[test]
    fn test_parse_wrapped_and_bare() {
        let wrapped = parse_tasks_from_response(
            r#"{"tasks": [{"target": "column Email", "regex": "@", "replacement": " at "}]}"#,
        )
        .unwrap();
        assert_eq!(wrapped, vec![TaskSpec::new("column Email", "@", " at ")]);

        // Missing replacement defaults to deletion
        let bare = parse_tasks_from_response(r#"[{"target": "all", "regex": "\\s+"}]"#).unwrap();
        assert_eq!(bare, vec![TaskSpec::new("all", r"\s+", "")]);
    }

    #[test]
    fn test_parse_empty_task_list() {
        assert!(parse_tasks_from_response(r#"{"tasks": []}"#).unwrap().is_empty());
    }

    #[test]
    fn test_parse_garbage_fails() {
        assert!(matches!(
            parse_tasks_from_response("I cannot help with that."),
            Err(GeneratorError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_description_rejected_before_network() {
        let client = AiClient::new("test-key".to_string());
        let err = client.generate("   ", &[]).await.unwrap_err();
        assert!(matches!(err, GeneratorError::InvalidInstruction(_)));
    }

    #[tokio::test]
    async fn test_disabled_generator() {
        let err = DisabledGenerator.generate("anything", &[]).await.unwrap_err();
        assert!(matches!(err, GeneratorError::MissingApiKey(_)));
    }
}
