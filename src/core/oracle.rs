//! Oracle client — blocking chat-completion round trips against an
//! OpenAI-compatible endpoint, with bounded retry and context trimming.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle request failed: {0}")]
    Request(String),
    #[error("oracle unavailable after {attempts} attempts")]
    Unavailable { attempts: u32 },
    #[error("malformed oracle response: {0}")]
    MalformedResponse(String),
}

/// Role tag for a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged message in an oracle conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// The generation/classification/judgment service behind the engine.
/// Every call is one blocking round trip returning a single completion.
pub trait Oracle {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String, OracleError>;
}

impl<T: Oracle + ?Sized> Oracle for Box<T> {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String, OracleError> {
        (**self).complete(messages)
    }
}

impl<T: Oracle + ?Sized> Oracle for std::rc::Rc<T> {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String, OracleError> {
        (**self).complete(messages)
    }
}

impl<T: Oracle + ?Sized> Oracle for std::sync::Arc<T> {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String, OracleError> {
        (**self).complete(messages)
    }
}

/// Default endpoint when `ORACLE_BASE_URL` is not set.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Default model when `ORACLE_MODEL` is not set.
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo-0125";

/// Process-lifetime oracle configuration, injected at client
/// construction rather than read from ambient globals.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    /// Stop sequences applied to every generation call.
    pub stop: Vec<String>,
    /// Total attempts before giving up.
    pub max_retries: u32,
    /// Base delay between attempts.
    pub retry_delay: Duration,
    /// Jitter factor (0.0..1.0) applied to the delay.
    pub jitter_factor: f64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            temperature: 1.0,
            stop: vec!["\n".to_string(), "(".to_string()],
            max_retries: 50,
            retry_delay: Duration::from_secs(2),
            jitter_factor: 0.2,
        }
    }
}

impl OracleConfig {
    /// Read `ORACLE_BASE_URL`, `ORACLE_API_KEY` and `ORACLE_MODEL`,
    /// falling back to defaults when unset.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(base_url) = std::env::var("ORACLE_BASE_URL") {
            config.base_url = base_url;
        }
        config.api_key = std::env::var("ORACLE_API_KEY").ok();
        if let Ok(model) = std::env::var("ORACLE_MODEL") {
            config.model = model;
        }
        config
    }
}

/// Blocking client for an OpenAI-compatible chat-completions API.
pub struct HttpOracle {
    client: reqwest::blocking::Client,
    config: OracleConfig,
}

impl HttpOracle {
    pub fn new(config: OracleConfig) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());
        Self { client, config }
    }

    pub fn from_env() -> Self {
        Self::new(OracleConfig::from_env())
    }

    fn delay_with_jitter(&self) -> Duration {
        let base = self.config.retry_delay.as_millis() as i64;
        let jitter_range = (base as f64 * self.config.jitter_factor) as i64;
        if jitter_range > 0 {
            let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
            Duration::from_millis((base + jitter).max(0) as u64)
        } else {
            self.config.retry_delay
        }
    }

    fn send(&self, messages: &[ChatMessage]) -> Result<String, SendFailure> {
        let request = ChatRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
            stop: &self.config.stop,
        };
        let mut builder = self
            .client
            .post(format!(
                "{}/v1/chat/completions",
                self.config.base_url.trim_end_matches('/')
            ))
            .json(&request);
        if let Some(ref key) = self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .map_err(|e| SendFailure::Transient(e.to_string()))?;

        if !response.status().is_success() {
            let body = response.text().unwrap_or_default();
            if is_context_overflow(&body) {
                return Err(SendFailure::ContextOverflow);
            }
            return Err(SendFailure::Transient(body));
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|e| SendFailure::Malformed(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.is_empty())
            .ok_or_else(|| SendFailure::Malformed("response carried no content".to_string()))
    }
}

impl Oracle for HttpOracle {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String, OracleError> {
        let mut window: Vec<ChatMessage> = messages.to_vec();
        let mut attempts = 0u32;
        while attempts < self.config.max_retries {
            match self.send(&window) {
                Ok(content) => return Ok(content),
                Err(SendFailure::Malformed(detail)) => {
                    return Err(OracleError::MalformedResponse(detail));
                }
                Err(SendFailure::ContextOverflow) => {
                    attempts += 1;
                    if !trim_context(&mut window) {
                        warn!(attempts, "context overflow with nothing left to trim");
                        return Err(OracleError::Unavailable { attempts });
                    }
                    debug!(remaining = window.len(), "trimmed context after overflow");
                }
                Err(SendFailure::Transient(detail)) => {
                    attempts += 1;
                    debug!(attempts, %detail, "oracle attempt failed");
                    std::thread::sleep(self.delay_with_jitter());
                }
            }
        }
        Err(OracleError::Unavailable { attempts })
    }
}

enum SendFailure {
    Transient(String),
    ContextOverflow,
    Malformed(String),
}

fn is_context_overflow(body: &str) -> bool {
    body.contains("maximum context length") || body.contains("context_length_exceeded")
}

/// Drop the oldest non-system messages after a context-length overflow:
/// the leading system message survives, as do the most recent turns.
/// Returns false when the window is already too small to shrink.
fn trim_context(messages: &mut Vec<ChatMessage>) -> bool {
    if messages.len() <= 3 {
        return false;
    }
    if messages[0].role == Role::System {
        messages.drain(1..3);
    } else {
        messages.drain(0..2);
    }
    true
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "slice_is_empty")]
    stop: &'a [String],
}

fn slice_is_empty(slice: &&[String]) -> bool {
    slice.is_empty()
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}
