//! Model transport abstraction and the OpenAI-compatible HTTP client.
//!
//! The [`ModelClient`] trait decouples the cycle engine from the actual LLM
//! backend. Tests use scripted clients that return predetermined responses
//! without touching the network.

use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::core::budget::TokenWindow;
use crate::io::config::Settings;

/// Parameters for one model invocation.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub prompt: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// Ask the backend to frame the response as a JSON object.
    pub response_is_json: bool,
    /// Hard per-request timeout.
    pub timeout: Duration,
}

/// Typed transport failure classes.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model request timed out after {0:?}")]
    Timeout(Duration),
    #[error("model transport failed: {0}")]
    Transport(String),
    #[error("model api error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("model returned an empty response")]
    EmptyResponse,
}

impl ModelError {
    /// Whether a retry could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ModelError::Timeout(_) | ModelError::Transport(_) => true,
            ModelError::Api { status, .. } => *status == 429 || *status >= 500,
            ModelError::EmptyResponse => true,
        }
    }

    /// Transient network-side failures, as opposed to bad model output.
    pub fn is_transport(&self) -> bool {
        matches!(self, ModelError::Timeout(_) | ModelError::Transport(_))
    }
}

/// Abstraction over LLM backends: one prompt in, one raw text response out.
pub trait ModelClient {
    fn call(&self, request: &ModelRequest) -> Result<String, ModelError>;
}

// ── OpenAI-compatible wire types ─────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    total_tokens: Option<u64>,
}

// ── HTTP client ──────────────────────────────────────────────────────────────

/// Blocking chat-completions client with a per-minute token window.
pub struct HttpModelClient {
    http: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
    model: String,
    window: Mutex<TokenWindow>,
}

impl HttpModelClient {
    /// Client for the primary transport configured in `settings`.
    pub fn primary(settings: &Settings) -> Result<Self, ModelError> {
        Self::build(
            settings.api_base_url.clone(),
            settings.api_key.clone(),
            settings.model.clone(),
            settings.tokens_per_minute,
        )
    }

    /// Client for the secondary transport (`--alt-provider`).
    pub fn alternate(settings: &Settings) -> Result<Self, ModelError> {
        let api_key = settings.alt_api_key.clone().ok_or_else(|| {
            ModelError::Transport("REFACTOR_ALT_API_KEY is not configured".to_string())
        })?;
        let model = settings.alt_model.clone().ok_or_else(|| {
            ModelError::Transport("REFACTOR_ALT_MODEL is not configured".to_string())
        })?;
        let base_url = settings
            .alt_base_url
            .clone()
            .unwrap_or_else(|| settings.api_base_url.clone());
        Self::build(base_url, api_key, model, settings.tokens_per_minute)
    }

    fn build(
        base_url: String,
        api_key: String,
        model: String,
        tokens_per_minute: u64,
    ) -> Result<Self, ModelError> {
        let http = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| ModelError::Transport(err.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            window: Mutex::new(TokenWindow::new(tokens_per_minute)),
        })
    }

    /// Sleep until a call estimated at `estimate` tokens fits in the window.
    fn throttle(&self, estimate: u64) {
        loop {
            let wait = match self.window.lock() {
                Ok(mut window) => window.wait_before(estimate, Instant::now()),
                Err(_) => None,
            };
            match wait {
                Some(delay) if !delay.is_zero() => {
                    warn!(
                        delay_secs = delay.as_secs(),
                        "token ceiling reached, waiting for window"
                    );
                    thread::sleep(delay);
                }
                _ => return,
            }
        }
    }

    fn record_usage(&self, tokens: u64) {
        if let Ok(mut window) = self.window.lock() {
            window.record(tokens, Instant::now());
        }
    }
}

/// Rough chars-per-token divisor for usage estimates.
const CHARS_PER_TOKEN: usize = 4;

impl ModelClient for HttpModelClient {
    #[instrument(skip_all, fields(model = %self.model, json = request.response_is_json))]
    fn call(&self, request: &ModelRequest) -> Result<String, ModelError> {
        let estimate =
            (request.prompt.len() / CHARS_PER_TOKEN) as u64 + u64::from(request.max_output_tokens);
        self.throttle(estimate);

        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            temperature: request.temperature,
            max_tokens: request.max_output_tokens,
            response_format: request
                .response_is_json
                .then_some(ResponseFormat { kind: "json_object" }),
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .map_err(|err| {
                if err.is_timeout() {
                    ModelError::Timeout(request.timeout)
                } else {
                    ModelError::Transport(err.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().unwrap_or_default();
            let message: String = message.chars().take(300).collect();
            return Err(ModelError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|err| ModelError::Transport(format!("decode response: {err}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(ModelError::EmptyResponse);
        }

        let used = parsed
            .usage
            .and_then(|usage| usage.total_tokens)
            .unwrap_or_else(|| {
                ((request.prompt.len() + content.len()) / CHARS_PER_TOKEN) as u64
            });
        self.record_usage(used);
        debug!(tokens = used, chars = content.len(), "model call complete");
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_and_transport_are_retryable() {
        assert!(ModelError::Timeout(Duration::from_secs(300)).is_retryable());
        assert!(ModelError::Transport("reset".to_string()).is_retryable());
        assert!(ModelError::Timeout(Duration::from_secs(1)).is_transport());
    }

    #[test]
    fn api_errors_retry_only_on_throttle_or_server_fault() {
        let throttled = ModelError::Api {
            status: 429,
            message: "slow down".to_string(),
        };
        let server = ModelError::Api {
            status: 503,
            message: "overloaded".to_string(),
        };
        let client_fault = ModelError::Api {
            status: 400,
            message: "bad request".to_string(),
        };
        assert!(throttled.is_retryable());
        assert!(server.is_retryable());
        assert!(!client_fault.is_retryable());
        assert!(!client_fault.is_transport());
    }

    #[test]
    fn alternate_requires_configuration() {
        let settings = crate::io::config::base_settings();
        let err = HttpModelClient::alternate(&settings).unwrap_err();
        assert!(err.to_string().contains("REFACTOR_ALT_API_KEY"));
    }
}
