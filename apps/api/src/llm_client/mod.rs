/// LLM Client — the single point of entry for all Claude API calls in the ranker.
///
/// ARCHITECTURAL RULE: No other module may call the Anthropic API directly.
/// The classifier and the enricher both go through this module.
///
/// Models are hardcoded per call site to prevent drift: a low-cost model for
/// binary qualification, a stronger model with web search for enrichment.
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub mod prompts;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
/// Low-cost model used by the standard qualifier.
pub const CLASSIFIER_MODEL: &str = "claude-haiku-4-5";
/// Web-grounded model used for Phase 2 enrichment.
pub const ENRICHMENT_MODEL: &str = "claude-sonnet-4-5";
const MAX_TOKENS: u32 = 4096;
const MAX_RETRIES: u32 = 3;
/// Upper bound on web searches per enrichment call; bounds per-call spend.
const MAX_WEB_SEARCHES: u32 = 3;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Rate limited after {retries} retries")]
    RateLimited { retries: u32 },

    #[error("LLM returned empty content")]
    EmptyContent,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolSpec>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ToolSpec {
    #[serde(rename = "type")]
    tool_type: &'static str,
    name: &'static str,
    max_uses: u32,
}

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub content: Vec<ContentBlock>,
    pub usage: Usage,
}

#[derive(Debug, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl LlmResponse {
    /// Extracts the text content from the first text block.
    pub fn text(&self) -> Option<&str> {
        self.content
            .iter()
            .find(|b| b.block_type == "text")
            .and_then(|b| b.text.as_deref())
    }

    /// Extracts the last text block. With server-side tools the model narrates
    /// between searches and puts the final answer last.
    pub fn final_text(&self) -> Option<&str> {
        self.content
            .iter()
            .rev()
            .find(|b| b.block_type == "text")
            .and_then(|b| b.text.as_deref())
    }
}

enum Attempt {
    Done(LlmResponse),
    Retry(LlmError),
    Fatal(LlmError),
}

/// 1s, 2s, 4s, ...
fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt - 1).min(5))
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorBody,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    message: String,
}

/// The single LLM client used by all services in the ranker.
/// Wraps the Anthropic Messages API with retry logic and structured output helpers.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_key: String,
}

impl LlmClient {
    pub fn new(api_key: String) -> Result<Self, LlmError> {
        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(120))
                .build()?,
            api_key,
        })
    }

    /// Makes a raw call to the Claude API, returning the full response object.
    /// Retries on 429 (rate limit) and 5xx errors with exponential backoff.
    pub async fn call(
        &self,
        model: &str,
        prompt: &str,
        system: &str,
        web_search: bool,
    ) -> Result<LlmResponse, LlmError> {
        let tools = if web_search {
            vec![ToolSpec {
                tool_type: "web_search_20250305",
                name: "web_search",
                max_uses: MAX_WEB_SEARCHES,
            }]
        } else {
            Vec::new()
        };
        let request_body = AnthropicRequest {
            model,
            max_tokens: MAX_TOKENS,
            system,
            messages: vec![AnthropicMessage {
                role: "user",
                content: prompt,
            }],
            tools,
        };

        let mut last_error = LlmError::RateLimited {
            retries: MAX_RETRIES,
        };
        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = backoff(attempt);
                warn!(attempt, delay_ms = delay.as_millis() as u64, error = %last_error, "Retrying LLM call");
                tokio::time::sleep(delay).await;
            }
            match self.send_once(&request_body).await {
                Attempt::Done(response) => {
                    debug!(
                        model,
                        input_tokens = response.usage.input_tokens,
                        output_tokens = response.usage.output_tokens,
                        "LLM call succeeded"
                    );
                    return Ok(response);
                }
                Attempt::Retry(e) => last_error = e,
                Attempt::Fatal(e) => return Err(e),
            }
        }
        Err(last_error)
    }

    async fn send_once(&self, body: &AnthropicRequest<'_>) -> Attempt {
        let response = match self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return Attempt::Retry(LlmError::Http(e)),
        };

        let status = response.status();
        if status.is_success() {
            return match response.json::<LlmResponse>().await {
                Ok(parsed) => Attempt::Done(parsed),
                Err(e) => Attempt::Fatal(LlmError::Http(e)),
            };
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<AnthropicError>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);
        let err = LlmError::Api {
            status: status.as_u16(),
            message,
        };
        // 429 and 529 (overloaded) are both worth another attempt.
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Attempt::Retry(err)
        } else {
            Attempt::Fatal(err)
        }
    }

    /// Calls the LLM and deserializes the text response as JSON.
    /// The prompt must instruct the model to return valid JSON.
    pub async fn call_json<T: DeserializeOwned>(
        &self,
        model: &str,
        prompt: &str,
        system: &str,
    ) -> Result<T, LlmError> {
        let response = self.call(model, prompt, system, false).await?;
        let text = response.text().ok_or(LlmError::EmptyContent)?;
        parse_json_text(text)
    }

    /// Like `call_json`, with the web search tool enabled. Reads the final
    /// text block, which follows any search results.
    pub async fn call_json_with_search<T: DeserializeOwned>(
        &self,
        model: &str,
        prompt: &str,
        system: &str,
    ) -> Result<T, LlmError> {
        let response = self.call(model, prompt, system, true).await?;
        let text = response.final_text().ok_or(LlmError::EmptyContent)?;
        parse_json_text(text)
    }
}

fn parse_json_text<T: DeserializeOwned>(text: &str) -> Result<T, LlmError> {
    serde_json::from_str(strip_json_fences(text)).map_err(LlmError::Parse)
}

/// Models sometimes wrap JSON in ```json fences despite instructions.
fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest).trim_start();
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_json_fences_with_json_tag() {
        let input = "```json\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_strip_json_fences_without_tag() {
        let input = "```\n[1, 2]\n```";
        assert_eq!(strip_json_fences(input), "[1, 2]");
    }

    #[test]
    fn test_strip_json_fences_no_fences() {
        let input = "{\"key\": \"value\"}";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_final_text_skips_search_narration() {
        let response: LlmResponse = serde_json::from_str(
            r#"{
                "content": [
                    {"type": "text", "text": "Let me look that up."},
                    {"type": "server_tool_use"},
                    {"type": "web_search_tool_result"},
                    {"type": "text", "text": "[{\"id\": \"x\"}]"}
                ],
                "usage": {"input_tokens": 10, "output_tokens": 5}
            }"#,
        )
        .unwrap();
        assert_eq!(response.text(), Some("Let me look that up."));
        assert_eq!(response.final_text(), Some("[{\"id\": \"x\"}]"));
    }

    #[test]
    fn test_request_omits_tools_when_search_disabled() {
        let body = AnthropicRequest {
            model: CLASSIFIER_MODEL,
            max_tokens: 10,
            system: "s",
            messages: vec![],
            tools: vec![],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("tools").is_none());
    }

    #[test]
    fn test_backoff_doubles() {
        assert_eq!(backoff(1), Duration::from_secs(1));
        assert_eq!(backoff(3), Duration::from_secs(4));
    }

    #[test]
    fn test_parse_json_text_handles_fenced_array() {
        let parsed: Vec<u32> = parse_json_text("```json\n[1,2,3]\n```").unwrap();
        assert_eq!(parsed, vec![1, 2, 3]);
    }
}
