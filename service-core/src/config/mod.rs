use config::{Config as Cfg, ConfigError, Environment, File};
use serde::Deserialize;

/// Server settings shared by every service binary.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound on requests processed at the same time.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_concurrency() -> usize {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = Cfg::builder()
            .add_source(File::with_name("configuration").required(false))
            .add_source(Environment::with_prefix("APP").separator("__"))
            // Container platforms hand the listening port over in PORT.
            .set_override_option("port", std::env::var("PORT").ok())?
            .build()?;

        config.try_deserialize()
    }

    /// Socket address string suitable for `TcpListener::bind`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
