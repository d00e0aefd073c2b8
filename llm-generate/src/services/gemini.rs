//! Gemini `generateContent` client.
//!
//! Request contents and generation config are forwarded as opaque JSON; only
//! the first candidate's text and the upstream error message are read back.

use axum::http::StatusCode;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::Serialize;
use serde_json::Value;

use crate::error::ProxyError;

/// Gemini API base URL.
pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1";

/// Model every request is sent to.
pub const MODEL: &str = "gemini-2.0-flash";

const UPSTREAM_ERROR: &str = "Upstream error";

/// Body sent to `generateContent`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamPayload {
    pub contents: Vec<Value>,
    pub generation_config: Value,
}

/// Raw upstream answer: HTTP status plus parsed JSON body.
#[derive(Debug, Clone)]
pub struct UpstreamReply {
    pub status: StatusCode,
    pub body: Value,
}

impl UpstreamReply {
    /// Map the reply to the caller-facing result: the generated text on
    /// success, the upstream status and message otherwise.
    pub fn into_text(self) -> Result<String, ProxyError> {
        if !self.status.is_success() {
            return Err(ProxyError::Upstream {
                status: self.status,
                message: error_message(&self.body),
            });
        }

        Ok(candidate_text(&self.body))
    }
}

/// `candidates[0].content.parts[0].text`, or `""` when any step is missing.
pub fn candidate_text(body: &Value) -> String {
    body.get("candidates")
        .and_then(|candidates| candidates.get(0))
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(|parts| parts.get(0))
        .and_then(|part| part.get("text"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// `error.message` from an upstream failure body.
pub fn error_message(body: &Value) -> String {
    body.get("error")
        .and_then(|error| error.get("message"))
        .and_then(Value::as_str)
        .filter(|message| !message.is_empty())
        .unwrap_or(UPSTREAM_ERROR)
        .to_string()
}

/// Gemini API client. No client-side timeout: the server's invocation
/// timeout bounds the call.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    base_url: String,
}

impl Default for GeminiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GeminiClient {
    pub fn new() -> Self {
        Self::with_base_url(GEMINI_API_BASE)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Build the API URL for the fixed model. The key is added as a query
    /// parameter at send time.
    pub fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, MODEL)
    }

    pub async fn generate_content(
        &self,
        api_key: &Secret<String>,
        payload: &UpstreamPayload,
    ) -> Result<UpstreamReply, ProxyError> {
        tracing::debug!(
            model = MODEL,
            contents = payload.contents.len(),
            "Sending request to Gemini API"
        );

        let response = self
            .client
            .post(self.endpoint())
            .query(&[("key", api_key.expose_secret().as_str())])
            .json(payload)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(transport_error)?;

        let body = serde_json::from_slice(&bytes).map_err(|e| {
            ProxyError::internal(format!("Invalid JSON in upstream response: {}", e))
        })?;

        Ok(UpstreamReply { status, body })
    }
}

/// The request URL carries the API key, so it is stripped from the message.
fn transport_error(err: reqwest::Error) -> ProxyError {
    ProxyError::internal(err.without_url().to_string())
}
