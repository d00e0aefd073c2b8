use config::{Config as Cfg, ConfigError, File, FileFormat};
use secrecy::Secret;
use serde::Deserialize;
use service_core::config as core_config;
use std::env;

/// Environment variable holding the Gemini API key.
pub const GEMINI_KEY_VAR: &str = "GEMINI_KEY";

/// Runtime config written by the functions emulator / `functions:config:get`.
const RUNTIME_CONFIG_FILE: &str = ".runtimeconfig.json";

/// Variable the functions runtime uses to hand over runtime config, either
/// inline JSON or a path to a JSON file.
const RUNTIME_CONFIG_VAR: &str = "CLOUD_RUNTIME_CONFIG";

const PROJECT_ID_VARS: [&str; 2] = ["GOOGLE_CLOUD_PROJECT", "GCLOUD_PROJECT"];

const FIREBASE_CONFIG_VAR: &str = "FIREBASE_CONFIG";

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub common: core_config::Config,
    /// `None` keeps the server up but fails every generation request.
    pub api_key: Option<Secret<String>>,
    /// Firebase project the ID tokens must be issued for.
    pub project_id: Option<String>,
}

impl ProxyConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let common = core_config::Config::load()?;
        let runtime = RuntimeConfig::load()?;

        Ok(ProxyConfig {
            common,
            api_key: resolve_api_key(env::var(GEMINI_KEY_VAR).ok(), &runtime),
            project_id: resolve_project_id(|key| env::var(key).ok()),
        })
    }
}

/// Legacy key-value config of the functions platform. Only `gemini.key` is
/// read.
#[derive(Debug, Default, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub gemini: GeminiRuntimeConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct GeminiRuntimeConfig {
    #[serde(default)]
    pub key: Option<String>,
}

impl RuntimeConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let builder = Cfg::builder()
            .add_source(File::new(RUNTIME_CONFIG_FILE, FileFormat::Json).required(false));

        let builder = match env::var(RUNTIME_CONFIG_VAR) {
            Ok(raw) if raw.trim_start().starts_with('{') => {
                builder.add_source(File::from_str(&raw, FileFormat::Json))
            }
            Ok(path) if !path.trim().is_empty() => {
                builder.add_source(File::new(path.trim(), FileFormat::Json))
            }
            _ => builder,
        };

        builder.build()?.try_deserialize()
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Cfg::builder()
            .add_source(File::from_str(raw, FileFormat::Json))
            .build()?
            .try_deserialize()
    }
}

/// The environment variable wins; an empty value counts as unset.
pub fn resolve_api_key(
    env_value: Option<String>,
    runtime: &RuntimeConfig,
) -> Option<Secret<String>> {
    env_value
        .filter(|key| !key.is_empty())
        .or_else(|| runtime.gemini.key.clone().filter(|key| !key.is_empty()))
        .map(Secret::new)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FirebaseConfigEnv {
    project_id: Option<String>,
}

pub fn resolve_project_id(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    PROJECT_ID_VARS
        .iter()
        .find_map(|var| lookup(var).filter(|value| !value.is_empty()))
        .or_else(|| {
            lookup(FIREBASE_CONFIG_VAR)
                .and_then(|raw| serde_json::from_str::<FirebaseConfigEnv>(&raw).ok())
                .and_then(|config| config.project_id)
                .filter(|value| !value.is_empty())
        })
}
