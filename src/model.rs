//! External classification model.
//!
//! Responses are untrusted: callers get the raw text and extract a JSON
//! object with [`extract_json_object`], validating every field themselves.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::client::{HttpRequest, RetryingClient};
use crate::config::ModelConfig;
use crate::error::{Error, Result};
use crate::{clog_debug, clog_trace};

/// One completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    /// Ask the provider for structured JSON output.
    pub json: bool,
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, request: &ModelRequest) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

/// Client for any provider exposing an OpenAI-style `/chat/completions`.
pub struct OpenAiCompatibleModel {
    client: RetryingClient,
    endpoint: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiCompatibleModel {
    pub fn new(config: &ModelConfig, client: RetryingClient) -> Self {
        Self {
            client,
            endpoint: format!("{}/chat/completions", config.api_base.trim_end_matches('/')),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        }
    }

    fn body(&self, request: &ModelRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "temperature": request.temperature,
            "max_tokens": self.max_tokens,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
        });
        if request.json {
            body["response_format"] = json!({ "type": "json_object" });
        }
        body
    }
}

#[async_trait]
impl ModelClient for OpenAiCompatibleModel {
    async fn complete(&self, request: &ModelRequest) -> Result<String> {
        clog_debug!("model request to {} ({})", self.endpoint, self.model);
        let req = HttpRequest::post(&self.endpoint).json(self.body(request));
        let response: ChatResponse = self.client.call(&req).await?.json()?;
        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::Classifier("model returned no content".to_string()))?;
        clog_trace!("model response: {}", content);
        Ok(content)
    }
}

/// Replays canned responses in order. Used by tests and offline runs.
#[derive(Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<String>>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, text: &str) -> Self {
        self.push(Ok(text.to_string()));
        self
    }

    pub fn fail(self, error: Error) -> Self {
        self.push(Err(error));
        self
    }

    fn push(&self, response: Result<String>) {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(response);
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn complete(&self, request: &ModelRequest) -> Result<String> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| Err(Error::Classifier("no scripted response left".to_string())))
    }
}

/// Parse `raw` as a JSON object, falling back to the first balanced
/// `{...}` span. Braces inside string literals are ignored.
pub fn extract_json_object(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    let mut search_from = 0;
    while let Some(offset) = trimmed[search_from..].find('{') {
        let start = search_from + offset;
        if let Some(end) = balanced_end(&trimmed[start..]) {
            if let Ok(value @ Value::Object(_)) =
                serde_json::from_str::<Value>(&trimmed[start..start + end])
            {
                return Some(value);
            }
        }
        search_from = start + 1;
    }
    None
}

/// Byte length of the balanced `{...}` prefix of `s`, if it closes.
fn balanced_end(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, ch) in s.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}
