use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::history::ChatMessage;

/// Why a chat-completion call failed.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API key is not configured")]
    MissingApiKey,

    #[error("Authentication failed ({status}): {message}")]
    Auth { status: u16, message: String },

    #[error("Rate limited: {message}")]
    RateLimit {
        retry_after_secs: Option<u64>,
        message: String,
    },

    #[error("Model or endpoint not found: {message}")]
    NotFound { message: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request failed ({status}): {message}")]
    Other { status: u16, message: String },
}

impl LlmError {
    pub fn from_status(status: u16, retry_after_header: Option<u64>, body: &str) -> Self {
        let message = truncate_body(body);
        match status {
            401 | 403 => LlmError::Auth { status, message },
            404 => LlmError::NotFound { message },
            408 => LlmError::Timeout,
            429 => LlmError::RateLimit {
                retry_after_secs: retry_after_header.or_else(|| extract_retry_after(body)),
                message,
            },
            500..=599 => LlmError::Server { status, message },
            _ => LlmError::Other { status, message },
        }
    }

    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }

    /// One line for the person at the terminal.
    pub fn user_notice(&self) -> String {
        match self {
            LlmError::MissingApiKey => {
                "No API key configured. Run `relio settings set api-key <KEY>` or set RELIO_API_KEY.".to_string()
            }
            LlmError::Auth { .. } => "Authentication failed. Check the API key.".to_string(),
            LlmError::RateLimit { retry_after_secs: Some(secs), .. } => {
                format!("Rate limited by the provider. Try again in {}s.", secs)
            }
            LlmError::RateLimit { .. } => "Rate limited by the provider. Try again shortly.".to_string(),
            LlmError::NotFound { .. } => "Model or endpoint not found. Check the base URL and model name.".to_string(),
            LlmError::Timeout => "The request timed out. Try again.".to_string(),
            LlmError::Network(_) => "Cannot reach the API endpoint. Check the network and base URL.".to_string(),
            LlmError::Server { .. } => "The provider is having problems. Try again later.".to_string(),
            LlmError::InvalidResponse(_) => "The provider returned a response that could not be read.".to_string(),
            LlmError::Other { status, .. } => format!("The request failed with status {}.", status),
        }
    }
}

fn extract_retry_after(body: &str) -> Option<u64> {
    let v: serde_json::Value = serde_json::from_str(body).ok()?;
    let field = if v["error"]["retry_after"].is_null() {
        &v["retry_after"]
    } else {
        &v["error"]["retry_after"]
    };
    field.as_u64().or_else(|| field.as_f64().map(|f| f.ceil() as u64))
}

fn truncate_body(body: &str) -> String {
    const LIMIT: usize = 300;
    match body.char_indices().nth(LIMIT) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}

/// Sampling parameters for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatOptions {
    pub model: String,
    pub temperature: f64,
    pub top_p: f64,
    pub frequency_penalty: f64,
    pub max_tokens: u32,
}

impl ChatOptions {
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage], options: &ChatOptions) -> Result<String, LlmError>;
}

/// Client for any `/chat/completions` endpoint that speaks the OpenAI format.
pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompatibleClient {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Network(e.to_string()))?;

        Ok(OpenAiCompatibleClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatibleClient {
    async fn complete(&self, messages: &[ChatMessage], options: &ChatOptions) -> Result<String, LlmError> {
        let api_key = self.api_key.as_ref().ok_or(LlmError::MissingApiKey)?;

        let request_body = serde_json::json!({
            "model": options.model,
            "messages": messages,
            "temperature": options.temperature,
            "top_p": options.top_p,
            "frequency_penalty": options.frequency_penalty,
            "max_tokens": options.max_tokens,
            "stream": false,
        });

        tracing::debug!(model = %options.model, messages = messages.len(), "sending chat completion");

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| LlmError::from_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            let err = LlmError::from_status(status.as_u16(), retry_after, &body);
            tracing::warn!(error = %err, "chat completion failed");
            return Err(err);
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        completion_text(&response_json)
    }
}

/// Pulls the assistant text out of a completion body.
pub fn completion_text(response_json: &serde_json::Value) -> Result<String, LlmError> {
    response_json["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| LlmError::InvalidResponse("missing choices[0].message.content".to_string()))
}

#[cfg(test)]
pub mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Replays canned answers and records every request.
    #[derive(Default)]
    pub struct ScriptedModel {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        pub requests: Mutex<Vec<(Vec<ChatMessage>, ChatOptions)>>,
    }

    impl ScriptedModel {
        pub fn new(replies: Vec<Result<String, LlmError>>) -> Self {
            ScriptedModel {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn replying(text: &str) -> Self {
            Self::new(vec![Ok(text.to_string())])
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn complete(&self, messages: &[ChatMessage], options: &ChatOptions) -> Result<String, LlmError> {
            self.requests
                .lock()
                .unwrap()
                .push((messages.to_vec(), options.clone()));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::InvalidResponse("no scripted reply left".to_string())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> ChatOptions {
        ChatOptions {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            top_p: 0.7,
            frequency_penalty: 0.5,
            max_tokens: 512,
        }
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(LlmError::from_status(401, None, ""), LlmError::Auth { .. }));
        assert!(matches!(LlmError::from_status(404, None, ""), LlmError::NotFound { .. }));
        assert!(matches!(LlmError::from_status(503, None, ""), LlmError::Server { status: 503, .. }));
        assert!(matches!(LlmError::from_status(418, None, ""), LlmError::Other { status: 418, .. }));
    }

    #[test]
    fn test_rate_limit_retry_after() {
        let from_body = LlmError::from_status(429, None, r#"{"error": {"retry_after": 2.5}}"#);
        assert!(matches!(from_body, LlmError::RateLimit { retry_after_secs: Some(3), .. }));

        let from_header = LlmError::from_status(429, Some(7), r#"{"retry_after": 1}"#);
        assert!(matches!(from_header, LlmError::RateLimit { retry_after_secs: Some(7), .. }));
        assert!(from_header.user_notice().contains("7s"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let body = "你".repeat(400);
        let message = truncate_body(&body);
        assert!(message.ends_with("..."));
        assert_eq!(message.chars().count(), 303);
    }

    #[test]
    fn test_completion_text() {
        let body = serde_json::json!({"choices": [{"message": {"role": "assistant", "content": "hi"}}]});
        assert_eq!(completion_text(&body).unwrap(), "hi");

        let empty = serde_json::json!({"choices": []});
        assert!(matches!(completion_text(&empty), Err(LlmError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_network() {
        let client = OpenAiCompatibleClient::new("http://127.0.0.1:9/v1/", Some("  ".to_string()), Duration::from_secs(1)).unwrap();
        assert_eq!(client.endpoint(), "http://127.0.0.1:9/v1/chat/completions");

        let err = client.complete(&[ChatMessage::user("hi")], &options()).await.unwrap_err();
        assert!(matches!(err, LlmError::MissingApiKey));
    }

    #[test]
    fn test_messages_serialize_with_lowercase_roles() {
        let value = serde_json::to_value(ChatMessage::system("rules")).unwrap();
        assert_eq!(value, serde_json::json!({"role": "system", "content": "rules"}));
    }
}
