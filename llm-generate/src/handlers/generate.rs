use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, Method},
    Json,
};
use serde::{Deserialize, Serialize};
use http_body_util::LengthLimitError;
use serde_json::{Map, Value};
use std::time::Instant;
use validator::Validate;

use crate::error::ProxyError;
use crate::services::gemini::{UpstreamPayload, MODEL};
use crate::services::verifier::VerifyError;
use crate::startup::{AppState, MAX_BODY_BYTES};

const BEARER_PREFIX: &str = "Bearer ";

/// Inbound generation request.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    #[serde(default)]
    #[validate(length(min = 1))]
    pub contents: Vec<Value>,

    #[serde(default)]
    pub generation_config: Option<Value>,

    /// Accepted but not used; requests always go to [`MODEL`].
    #[serde(default)]
    pub model: Option<Value>,
}

impl GenerateRequest {
    /// Parse a raw body. Anything that is not a JSON object with a non-empty
    /// `contents` array is rejected.
    pub fn parse(body: &[u8]) -> Result<Self, ProxyError> {
        let value: Value = serde_json::from_slice(body).unwrap_or(Value::Null);
        if !value.is_object() {
            return Err(ProxyError::InvalidPayload);
        }

        let request: GenerateRequest =
            serde_json::from_value(value).map_err(|_| ProxyError::InvalidPayload)?;
        request.validate().map_err(|_| ProxyError::InvalidPayload)?;

        Ok(request)
    }

    pub fn into_payload(self) -> UpstreamPayload {
        let generation_config = match self.generation_config {
            Some(config) if is_truthy(&config) => config,
            _ => Value::Object(Map::new()),
        };

        UpstreamPayload {
            contents: self.contents,
            generation_config,
        }
    }
}

/// `null`, `false`, `0` and `""` stand for "no generation config".
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub text: String,
}

/// Authenticated generation endpoint. CORS and `OPTIONS` are handled by
/// [`crate::middleware::cors_middleware`] before this runs.
pub async fn llm_generate(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<GenerateResponse>, ProxyError> {
    let result = generate(&state, &method, &headers, body).await;

    if let Err(err) = &result {
        let status = err.status().as_u16();
        if err.status().is_server_error() {
            tracing::error!(status, error = %err, "Generation request failed");
        } else {
            tracing::warn!(status, error = %err, "Generation request rejected");
        }
    }

    result.map(|text| Json(GenerateResponse { text }))
}

async fn generate(
    state: &AppState,
    method: &Method,
    headers: &HeaderMap,
    body: Body,
) -> Result<String, ProxyError> {
    if method != Method::POST {
        return Err(ProxyError::MethodNotAllowed);
    }

    // Checked before authentication so a misconfigured deployment fails the
    // same way for every caller.
    let api_key = state
        .api_key
        .as_ref()
        .ok_or(ProxyError::ServerMisconfigured)?;

    let token = bearer_token(headers)?;
    let claims = state
        .verifier
        .verify(token)
        .await
        .map_err(|e| {
            tracing::debug!(error = %e, "ID token verification failed");
            ProxyError::InvalidToken(e)
        })?;
    tracing::debug!(uid = %claims.sub, "ID token verified");

    let body = read_body(body).await?;
    let request = GenerateRequest::parse(&body)?;
    if let Some(requested) = &request.model {
        tracing::debug!(requested = %requested, model = MODEL, "Ignoring requested model");
    }
    let payload = request.into_payload();

    let started = Instant::now();
    let reply = state.gemini.generate_content(api_key, &payload).await?;
    tracing::info!(
        upstream_status = reply.status.as_u16(),
        latency_ms = started.elapsed().as_millis() as u64,
        contents = payload.contents.len(),
        "Gemini API responded"
    );

    reply.into_text()
}

/// Buffer the request body, only once the caller is authenticated.
async fn read_body(body: Body) -> Result<Bytes, ProxyError> {
    axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|err| {
            let err = err.into_inner();
            if err.downcast_ref::<LengthLimitError>().is_some() {
                ProxyError::PayloadTooLarge
            } else {
                ProxyError::internal(err.to_string())
            }
        })
}

/// The prefix is matched on raw bytes; a token that is not UTF-8 is
/// presented but invalid.
fn bearer_token(headers: &HeaderMap) -> Result<&str, ProxyError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.as_bytes().strip_prefix(BEARER_PREFIX.as_bytes()))
        .ok_or(ProxyError::MissingToken)?;

    std::str::from_utf8(token).map_err(|_| ProxyError::InvalidToken(VerifyError::NotUtf8))
}
