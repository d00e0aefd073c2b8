pub mod generate;
pub mod health;

pub use generate::{llm_generate, GenerateRequest, GenerateResponse};
pub use health::health_check;
