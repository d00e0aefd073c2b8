pub mod gemini;
pub mod verifier;

pub use gemini::{GeminiClient, UpstreamPayload, UpstreamReply};
pub use verifier::{FirebaseTokenVerifier, IdentityClaims, TokenVerifier, VerifyError};
