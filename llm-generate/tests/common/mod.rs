//! Test helpers for llm-generate integration tests.
//!
//! Builds the full router with a fake ID token verifier and a wiremock server
//! standing in for the Gemini API.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{HeaderMap, Method, Request, StatusCode},
    Router,
};
use llm_generate::services::{GeminiClient, IdentityClaims, TokenVerifier, VerifyError};
use llm_generate::{build_router, AppState};
use secrecy::Secret;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::util::ServiceExt;
use wiremock::MockServer;

pub const TEST_API_KEY: &str = "test-api-key";
pub const VALID_TOKEN: &str = "valid-id-token";
/// Makes the fake verifier panic, to exercise the panic boundary.
pub const PANIC_TOKEN: &str = "panic-id-token";
pub const UPSTREAM_PATH: &str = "/models/gemini-2.0-flash:generateContent";

/// Accepts only [`VALID_TOKEN`].
pub struct FakeVerifier;

#[async_trait]
impl TokenVerifier for FakeVerifier {
    async fn verify(&self, token: &str) -> Result<IdentityClaims, VerifyError> {
        match token {
            VALID_TOKEN => Ok(IdentityClaims {
                sub: "user-123".to_string(),
                aud: "demo-project".to_string(),
                iss: "https://securetoken.google.com/demo-project".to_string(),
                exp: i64::MAX,
                iat: 0,
                auth_time: None,
                email: Some("user@example.com".to_string()),
            }),
            PANIC_TOKEN => panic!("verifier exploded"),
            other => Err(VerifyError::UnknownKeyId(other.to_string())),
        }
    }
}

pub struct TestApp {
    pub router: Router,
    pub upstream: MockServer,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::with_api_key(Some(TEST_API_KEY)).await
    }

    pub async fn with_api_key(api_key: Option<&str>) -> Self {
        let upstream = MockServer::start().await;
        let gemini = GeminiClient::with_base_url(upstream.uri());
        Self::with_gemini(api_key, gemini, upstream)
    }

    /// Point the Gemini client at an address nothing listens on.
    pub async fn with_unreachable_upstream() -> Self {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let gemini = GeminiClient::with_base_url(format!("http://127.0.0.1:{}", port));
        Self::with_gemini(Some(TEST_API_KEY), gemini, MockServer::start().await)
    }

    fn with_gemini(api_key: Option<&str>, gemini: GeminiClient, upstream: MockServer) -> Self {
        let state = AppState {
            api_key: api_key.map(|key| Secret::new(key.to_string())),
            verifier: Arc::new(FakeVerifier),
            gemini,
        };

        Self {
            router: build_router(state, 10),
            upstream,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec();

        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// POST a JSON body with an optional raw `Authorization` header value.
    pub async fn post(&self, authorization: Option<&str>, body: &Value) -> TestResponse {
        self.send(request(Method::POST, authorization, body.to_string()))
            .await
    }

    /// POST with a valid bearer token.
    pub async fn post_authorized(&self, body: &Value) -> TestResponse {
        self.post(Some(&bearer(VALID_TOKEN)), body).await
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("response body is not JSON")
    }

    pub fn error(&self) -> String {
        self.json()["error"]
            .as_str()
            .expect("response has no error field")
            .to_string()
    }

    pub fn assert_cors_headers(&self) {
        assert_eq!(self.headers["access-control-allow-origin"], "*");
        assert_eq!(self.headers["access-control-allow-methods"], "POST, OPTIONS");
        assert_eq!(
            self.headers["access-control-allow-headers"],
            "Content-Type, Authorization"
        );
    }
}

pub fn request(method: Method, authorization: Option<&str>, body: impl Into<Body>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri("/")
        .header("content-type", "application/json");
    if let Some(value) = authorization {
        builder = builder.header("authorization", value);
    }
    builder.body(body.into()).unwrap()
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

pub fn valid_body() -> Value {
    json!({
        "contents": [
            { "role": "user", "parts": [{ "text": "Say hello" }] }
        ]
    })
}

pub fn gemini_text_response(text: &str) -> Value {
    json!({
        "candidates": [
            {
                "content": { "role": "model", "parts": [{ "text": text }] },
                "finishReason": "STOP"
            }
        ],
        "usageMetadata": { "promptTokenCount": 3, "candidatesTokenCount": 1 }
    })
}
