//! Text generation: the request composed for each turn and the backends that
//! answer it.
//!
//! A [`GenerationBackend`] is an opaque collaborator that turns a
//! [`GenerationRequest`] into raw text. The OpenAI-compatible backend speaks
//! the chat-completions API used by OpenAI, Ollama, vLLM and LM Studio.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{LazyLock, Mutex};

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::GenerationError;

/// Sampling parameters sent with every request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 2000,
            temperature: 0.7,
            top_p: 0.9,
        }
    }
}

impl From<&LlmConfig> for GenerationParams {
    fn from(config: &LlmConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
        }
    }
}

/// Everything the backend needs to answer one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub system: String,
    /// Tool-calling instructions, present when tools are enabled.
    pub protocol_fragment: Option<String>,
    /// Rendered turn memory; empty when there is none or it is excluded.
    pub history: String,
    /// Snippets retrieved from the long-term store.
    pub context: Vec<String>,
    pub user_text: String,
    pub params: GenerationParams,
}

impl GenerationRequest {
    pub fn new(user_text: impl Into<String>) -> Self {
        Self {
            system: String::new(),
            protocol_fragment: None,
            history: String::new(),
            context: Vec::new(),
            user_text: user_text.into(),
            params: GenerationParams::default(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = system.into();
        self
    }

    pub fn with_protocol(mut self, fragment: impl Into<String>) -> Self {
        self.protocol_fragment = Some(fragment.into());
        self
    }

    pub fn with_history(mut self, history: impl Into<String>) -> Self {
        self.history = history.into();
        self
    }

    pub fn with_context(mut self, context: Vec<String>) -> Self {
        self.context = context;
        self
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    /// System instructions followed by the protocol fragment, if any.
    pub fn system_prompt(&self) -> String {
        match &self.protocol_fragment {
            Some(fragment) if self.system.is_empty() => fragment.clone(),
            Some(fragment) => format!("{}\n\n{}", self.system, fragment),
            None => self.system.clone(),
        }
    }

    /// The user message: retrieved context, conversation history, then the
    /// question itself.
    pub fn user_prompt(&self) -> String {
        let mut prompt = String::from("Context:\n");
        for snippet in &self.context {
            prompt.push_str("- ");
            prompt.push_str(snippet);
            prompt.push('\n');
        }
        if !self.history.is_empty() {
            prompt.push_str("\nConversation History:\n");
            prompt.push_str(&self.history);
            prompt.push('\n');
        }
        prompt.push_str("\nQuestion:\n");
        prompt.push_str(&self.user_text);
        prompt
    }
}

/// A text-generation collaborator.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;

    fn model_name(&self) -> &str;
}

static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<think>.*?</think>").expect("valid regex"));
static THINK_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</?think>").expect("valid regex"));

/// Remove reasoning blocks and stray reasoning tags from generated text.
pub fn strip_think_tags(text: &str) -> String {
    let without_blocks = THINK_BLOCK.replace_all(text, "");
    THINK_TAG.replace_all(&without_blocks, "").trim().to_string()
}

/// A backend that returns scripted responses, for tests and offline use.
///
/// Queued responses are returned in order; once the queue is empty the
/// default response is repeated.
pub struct MockGenerationBackend {
    responses: Mutex<VecDeque<Result<String, GenerationError>>>,
    default_response: String,
    requests: Mutex<Vec<GenerationRequest>>,
    call_count: AtomicUsize,
}

impl MockGenerationBackend {
    pub fn new() -> Self {
        Self::with_response("This is a mock response.")
    }

    /// A mock that always answers with `text`.
    pub fn with_response(text: &str) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            default_response: text.to_string(),
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn queue_response(&self, text: impl Into<String>) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push_back(Ok(text.into()));
        }
    }

    pub fn queue_error(&self, error: GenerationError) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push_back(Err(error));
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.requests.lock().ok().and_then(|r| r.last().cloned())
    }
}

impl Default for MockGenerationBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GenerationBackend for MockGenerationBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let queued = self
            .responses
            .lock()
            .ok()
            .and_then(|mut responses| responses.pop_front());
        queued.unwrap_or_else(|| Ok(self.default_response.clone()))
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }
}

/// Backend for any endpoint that follows the OpenAI chat-completions format.
pub struct OpenAiCompatibleBackend {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatibleBackend {
    /// Create a backend, reading the API key from the configured environment
    /// variable. Local endpoints work without a key.
    pub fn new(config: &LlmConfig) -> Result<Self, GenerationError> {
        let is_local = config
            .base_url
            .as_ref()
            .is_some_and(|u| u.contains("localhost") || u.contains("127.0.0.1"));

        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .or_else(|| {
                if is_local {
                    debug!("No API key set for local backend; using dummy bearer token");
                    Some("local".to_string())
                } else {
                    None
                }
            })
            .ok_or_else(|| GenerationError::AuthFailed {
                backend: format!("OpenAI-compatible: env var '{}' not set", config.api_key_env),
            })?;
        Ok(Self::new_with_key(config, api_key))
    }

    pub fn new_with_key(config: &LlmConfig, api_key: String) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
        }
    }

    fn request_body(&self, request: &GenerationRequest) -> Value {
        let mut messages = Vec::new();
        let system = request.system_prompt();
        if !system.is_empty() {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.user_prompt()}));

        json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": request.params.max_tokens,
            "temperature": request.params.temperature,
            "top_p": request.params.top_p,
            "stream": false,
        })
    }

    fn parse_response(json: &Value) -> Result<String, GenerationError> {
        let content = json
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .ok_or_else(|| GenerationError::ResponseParse {
                message: "missing choices[0].message.content".to_string(),
            })?;
        match content.as_str() {
            Some(text) if !text.trim().is_empty() => Ok(text.to_string()),
            Some(_) | None => Err(GenerationError::EmptyResponse),
        }
    }

    fn map_http_error(status: reqwest::StatusCode, body: &str) -> GenerationError {
        match status.as_u16() {
            401 | 403 => {
                debug!(body = %body, "Authentication failed");
                GenerationError::AuthFailed {
                    backend: "OpenAI-compatible".to_string(),
                }
            }
            429 => {
                let retry_secs = serde_json::from_str::<Value>(body)
                    .ok()
                    .and_then(|v| {
                        v.get("error")?
                            .get("message")?
                            .as_str()
                            .map(|s| s.to_string())
                    })
                    .and_then(|msg| {
                        // "Rate limit reached ... try again in 20s"
                        msg.split("in ")
                            .last()
                            .and_then(|s| s.trim_end_matches('s').parse::<u64>().ok())
                    })
                    .unwrap_or(5);
                GenerationError::RateLimited {
                    retry_after_secs: retry_secs,
                }
            }
            503 => GenerationError::Unavailable {
                message: body.to_string(),
            },
            status if status >= 500 => GenerationError::ApiRequest {
                message: format!("Server error ({status}): {body}"),
            },
            _ => GenerationError::ApiRequest {
                message: format!("HTTP {status}: {body}"),
            },
        }
    }
}

#[async_trait]
impl GenerationBackend for OpenAiCompatibleBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(request);
        debug!(url = %url, model = %self.model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::ApiRequest {
                message: format!("Request failed: {e}"),
            })?;

        let status = response.status();
        let response_body = response
            .text()
            .await
            .map_err(|e| GenerationError::ApiRequest {
                message: format!("Failed to read response body: {e}"),
            })?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, &response_body));
        }

        let json: Value =
            serde_json::from_str(&response_body).map_err(|e| GenerationError::ResponseParse {
                message: format!("Invalid JSON: {e}"),
            })?;
        Self::parse_response(&json)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_strip_think_tags() {
        assert_eq!(strip_think_tags("<think>hmm</think>Paris."), "Paris.");
        assert_eq!(strip_think_tags("<THINK>\nlong\n</THINK>\nOk"), "Ok");
        assert_eq!(strip_think_tags("</think> The answer"), "The answer");
        assert_eq!(strip_think_tags("plain"), "plain");
    }

    #[test]
    fn test_user_prompt_layout() {
        let request = GenerationRequest::new("what is 2+2")
            .with_context(vec!["likes tea".into(), "lives in Oslo".into()])
            .with_history("User: hi\nAssistant: hello");
        assert_eq!(
            request.user_prompt(),
            "Context:\n- likes tea\n- lives in Oslo\n\nConversation History:\nUser: hi\nAssistant: hello\n\nQuestion:\nwhat is 2+2"
        );
    }

    #[test]
    fn test_user_prompt_without_history() {
        let request = GenerationRequest::new("hello");
        assert_eq!(request.user_prompt(), "Context:\n\nQuestion:\nhello");
    }

    #[test]
    fn test_system_prompt_with_fragment() {
        let request = GenerationRequest::new("x")
            .with_system("Be brief.")
            .with_protocol("AVAILABLE TOOLS:");
        assert_eq!(request.system_prompt(), "Be brief.\n\nAVAILABLE TOOLS:");
        assert_eq!(
            GenerationRequest::new("x").with_protocol("T").system_prompt(),
            "T"
        );
    }

    #[tokio::test]
    async fn test_mock_backend_queue_then_default() {
        let backend = MockGenerationBackend::with_response("default");
        backend.queue_response("first");
        backend.queue_error(GenerationError::EmptyResponse);

        let request = GenerationRequest::new("q");
        assert_eq!(backend.generate(&request).await.unwrap(), "first");
        assert!(backend.generate(&request).await.is_err());
        assert_eq!(backend.generate(&request).await.unwrap(), "default");
        assert_eq!(backend.call_count(), 3);
        assert_eq!(backend.requests().len(), 3);
        assert_eq!(backend.last_request().unwrap().user_text, "q");
    }

    #[test]
    fn test_request_body() {
        let backend = OpenAiCompatibleBackend::new_with_key(&LlmConfig::default(), "k".into());
        let request = GenerationRequest::new("hi").with_system("sys");
        let body = backend.request_body(&request);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["max_tokens"], 2000);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
    }

    #[test]
    fn test_parse_response() {
        let ok = json!({"choices": [{"message": {"role": "assistant", "content": "Hello"}}]});
        assert_eq!(OpenAiCompatibleBackend::parse_response(&ok).unwrap(), "Hello");

        let empty = json!({"choices": [{"message": {"content": "  "}}]});
        assert!(matches!(
            OpenAiCompatibleBackend::parse_response(&empty),
            Err(GenerationError::EmptyResponse)
        ));

        assert!(matches!(
            OpenAiCompatibleBackend::parse_response(&json!({})),
            Err(GenerationError::ResponseParse { .. })
        ));
    }

    #[test]
    fn test_http_error_mapping() {
        assert!(matches!(
            OpenAiCompatibleBackend::map_http_error(reqwest::StatusCode::UNAUTHORIZED, ""),
            GenerationError::AuthFailed { .. }
        ));
        let body = r#"{"error":{"message":"Rate limit reached, try again in 20s"}}"#;
        assert!(matches!(
            OpenAiCompatibleBackend::map_http_error(reqwest::StatusCode::TOO_MANY_REQUESTS, body),
            GenerationError::RateLimited {
                retry_after_secs: 20
            }
        ));
        assert!(matches!(
            OpenAiCompatibleBackend::map_http_error(
                reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                "oops"
            ),
            GenerationError::ApiRequest { .. }
        ));
    }
}
