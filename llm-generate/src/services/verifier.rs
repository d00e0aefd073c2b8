//! Identity token verification.
//!
//! Callers authenticate with an ID token issued by Firebase Authentication.
//! Tokens are RS256 JWTs signed by Google's `securetoken` service account;
//! the signing keys are published as a JWK set and rotate regularly, so they
//! are cached for as long as the key endpoint's `Cache-Control` allows.

use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, jwk::JwkSet, Algorithm, DecodingKey, Validation};
use reqwest::{header::CACHE_CONTROL, Client};
use serde::Deserialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;

/// Public keys for Firebase ID tokens, in JWK form.
pub const FIREBASE_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

const ISSUER_PREFIX: &str = "https://securetoken.google.com/";

/// Used when the key endpoint sends no usable `max-age`.
const DEFAULT_KEY_TTL: Duration = Duration::from_secs(3600);

const MAX_SUBJECT_LEN: usize = 128;

/// Claims of a verified ID token.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityClaims {
    /// Firebase user id.
    pub sub: String,
    pub aud: String,
    pub iss: String,
    pub exp: i64,
    pub iat: i64,
    #[serde(default)]
    pub auth_time: Option<i64>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("project id is not configured")]
    ProjectIdMissing,

    #[error("token is not valid UTF-8")]
    NotUtf8,

    #[error("malformed token: {0}")]
    Malformed(#[source] jsonwebtoken::errors::Error),

    #[error("unexpected signing algorithm {0:?}")]
    UnexpectedAlgorithm(Algorithm),

    #[error("token header has no key id")]
    MissingKeyId,

    #[error("no public key matches key id {0}")]
    UnknownKeyId(String),

    #[error("failed to load public keys: {0}")]
    KeyFetch(String),

    #[error("token rejected: {0}")]
    Rejected(#[source] jsonwebtoken::errors::Error),

    #[error("subject claim must be 1 to 128 characters")]
    InvalidSubject,
}

/// Checks a bearer token presented by a caller.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<IdentityClaims, VerifyError>;
}

struct CachedKeys {
    set: JwkSet,
    expires_at: Instant,
}

impl CachedKeys {
    fn is_fresh(&self) -> bool {
        self.expires_at > Instant::now()
    }
}

/// Verifies Firebase ID tokens against Google's published signing keys.
pub struct FirebaseTokenVerifier {
    project_id: Option<String>,
    jwks_url: String,
    client: Client,
    keys: RwLock<Option<CachedKeys>>,
}

impl FirebaseTokenVerifier {
    pub fn new(project_id: Option<String>) -> Self {
        Self::with_jwks_url(project_id, FIREBASE_JWKS_URL)
    }

    pub fn with_jwks_url(project_id: Option<String>, jwks_url: impl Into<String>) -> Self {
        Self {
            project_id,
            jwks_url: jwks_url.into(),
            client: Client::new(),
            keys: RwLock::new(None),
        }
    }

    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, VerifyError> {
        {
            let cached = self.keys.read().await;
            if let Some(keys) = cached.as_ref().filter(|keys| keys.is_fresh()) {
                return find_key(&keys.set, kid);
            }
        }

        let mut cached = self.keys.write().await;
        // Another request may have refreshed the keys while we waited.
        if let Some(keys) = cached.as_ref().filter(|keys| keys.is_fresh()) {
            return find_key(&keys.set, kid);
        }

        let fresh = self.fetch_keys().await?;
        let key = find_key(&fresh.set, kid);
        *cached = Some(fresh);
        key
    }

    async fn fetch_keys(&self) -> Result<CachedKeys, VerifyError> {
        let response = self
            .client
            .get(&self.jwks_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| VerifyError::KeyFetch(e.to_string()))?;

        let ttl = response
            .headers()
            .get(CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_max_age)
            .unwrap_or(DEFAULT_KEY_TTL);

        let set: JwkSet = response
            .json()
            .await
            .map_err(|e| VerifyError::KeyFetch(e.to_string()))?;

        tracing::debug!(
            keys = set.keys.len(),
            ttl_secs = ttl.as_secs(),
            "Refreshed ID token signing keys"
        );

        Ok(CachedKeys {
            set,
            expires_at: Instant::now() + ttl,
        })
    }
}

#[async_trait]
impl TokenVerifier for FirebaseTokenVerifier {
    async fn verify(&self, token: &str) -> Result<IdentityClaims, VerifyError> {
        let project_id = self
            .project_id
            .as_deref()
            .ok_or(VerifyError::ProjectIdMissing)?;

        let header = decode_header(token).map_err(VerifyError::Malformed)?;
        if header.alg != Algorithm::RS256 {
            return Err(VerifyError::UnexpectedAlgorithm(header.alg));
        }
        let kid = header.kid.ok_or(VerifyError::MissingKeyId)?;

        let key = self.decoding_key(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[project_id]);
        validation.set_issuer(&[format!("{ISSUER_PREFIX}{project_id}")]);
        validation.set_required_spec_claims(&["exp", "aud", "iss", "sub"]);

        let claims = decode::<IdentityClaims>(token, &key, &validation)
            .map_err(VerifyError::Rejected)?
            .claims;

        if claims.sub.is_empty() || claims.sub.len() > MAX_SUBJECT_LEN {
            return Err(VerifyError::InvalidSubject);
        }

        Ok(claims)
    }
}

fn find_key(set: &JwkSet, kid: &str) -> Result<DecodingKey, VerifyError> {
    let jwk = set
        .find(kid)
        .ok_or_else(|| VerifyError::UnknownKeyId(kid.to_string()))?;
    DecodingKey::from_jwk(jwk).map_err(|e| VerifyError::KeyFetch(e.to_string()))
}

/// Extract `max-age` from a `Cache-Control` header value.
fn parse_max_age(value: &str) -> Option<Duration> {
    value
        .split(',')
        .map(str::trim)
        .find_map(|directive| directive.strip_prefix("max-age="))
        .and_then(|secs| secs.trim_matches('"').parse::<u64>().ok())
        .map(Duration::from_secs)
}
