use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::llm::GeminiSettings;

const ENV_PREFIX: &str = "CHAT_GUARD";
const CWD_CONFIG: &str = "config.yaml";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Address to bind
    #[arg(long, env = "HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Secret shared with the token issuer
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: Option<String>,

    /// Enable per-origin admission control
    #[arg(long, env = "ADMISSION_ENABLED")]
    pub admission_enabled: Option<bool>,

    /// Concurrent requests allowed per origin
    #[arg(long, env = "MAX_CONCURRENT_REQUESTS")]
    pub max_in_flight: Option<usize>,

    /// Disable timeout middleware
    #[arg(long, env = "TIMEOUT_DISABLED")]
    pub timeout_disabled: Option<bool>,

    /// Durable store provider (`memory` or `rest`)
    #[arg(long, env = "STORE_PROVIDER")]
    pub store_provider: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Source(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub security: SecurityConfig,
    pub admission: AdmissionConfig,
    pub single_flight: SingleFlightConfig,
    pub cache: CacheConfig,
    pub store: StoreConfig,
    pub generation: GenerationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    /// Key admission by the first `X-Forwarded-For` hop. Enable only behind a trusted proxy.
    pub trust_forwarded_for: bool,
    pub cors_origins: Vec<String>,
    pub request_timeout_secs: u64,
    pub timeout_disabled: bool,
}

#[derive(Deserialize, Clone)]
pub struct SecurityConfig {
    pub jwt_secret: String,
    /// Required `aud` claim. Unset accepts any audience.
    #[serde(default)]
    pub jwt_audience: Option<String>,
}

impl SecurityConfig {
    /// The configured audience; blank counts as unset.
    pub fn audience(&self) -> Option<&str> {
        self.jwt_audience
            .as_deref()
            .map(str::trim)
            .filter(|aud| !aud.is_empty())
    }
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("jwt_secret", &"<redacted>")
            .field("jwt_audience", &self.jwt_audience)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AdmissionConfig {
    pub enabled: bool,
    pub max_in_flight_per_origin: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SingleFlightConfig {
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreProvider {
    Memory,
    Rest,
}

#[derive(Deserialize, Clone)]
pub struct StoreConfig {
    pub provider: StoreProvider,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("provider", &self.provider)
            .field("url", &self.url)
            .field("timeout_secs", &self.timeout_secs)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    pub base_url: String,
    pub api_version: String,
    pub model: String,
    pub timeout_secs: u64,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl SingleFlightConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn gemini_settings(&self) -> GeminiSettings {
        GeminiSettings {
            base_url: self.base_url.clone(),
            api_version: self.api_version.clone(),
            model: self.model.clone(),
            timeout: self.timeout(),
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: self.top_k,
            max_output_tokens: self.max_output_tokens,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| ConfigError::Invalid(e.to_string()))?;

        let mut builder = Config::builder();

        // 1. Defaults
        builder = builder
            .set_default("server.port", 5000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.trust_forwarded_for", false)?
            .set_default(
                "server.cors_origins",
                vec![
                    "http://localhost:3000",
                    "http://localhost:3001",
                    "http://localhost:3002",
                    "http://localhost:3003",
                ],
            )?
            .set_default("server.request_timeout_secs", 60)?
            .set_default("server.timeout_disabled", false)?
            .set_default("security.jwt_secret", "")?
            .set_default("admission.enabled", true)?
            .set_default("admission.max_in_flight_per_origin", 100)?
            .set_default("single_flight.idle_timeout_secs", 30 * 60)?
            .set_default("single_flight.sweep_interval_secs", 5 * 60)?
            .set_default("cache.ttl_secs", 300)?
            .set_default("cache.sweep_interval_secs", 60)?
            .set_default("store.provider", "memory")?
            .set_default("store.timeout_secs", 5)?
            .set_default(
                "generation.base_url",
                "https://generativelanguage.googleapis.com",
            )?
            .set_default("generation.api_version", "v1beta")?
            .set_default("generation.model", "gemini-2.0-flash")?
            .set_default("generation.timeout_secs", 30)?
            .set_default("generation.temperature", 0.7)?
            .set_default("generation.top_p", 0.8)?
            .set_default("generation.top_k", 40)?
            .set_default("generation.max_output_tokens", 2048)?;

        // 2. Config file: explicit path, else ./config.yaml when present
        if let Some(path) = &cli.config {
            builder = builder.add_source(File::with_name(path).required(true));
        } else if Path::new(CWD_CONFIG).exists() {
            builder = builder.add_source(File::with_name(CWD_CONFIG).required(false));
        }

        // 3. Environment, e.g. CHAT_GUARD_SERVER__PORT=8000
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("server.cors_origins")
                .try_parsing(true),
        );

        // 4. CLI flags (and their plain env aliases) win over everything
        if let Some(host) = cli.host {
            builder = builder.set_override("server.host", host)?;
        }
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(secret) = cli.jwt_secret {
            builder = builder.set_override("security.jwt_secret", secret)?;
        }
        if let Some(enabled) = cli.admission_enabled {
            builder = builder.set_override("admission.enabled", enabled)?;
        }
        if let Some(max) = cli.max_in_flight {
            let max = u64::try_from(max).unwrap_or(u64::MAX);
            builder = builder.set_override("admission.max_in_flight_per_origin", max)?;
        }
        if let Some(td) = cli.timeout_disabled {
            builder = builder.set_override("server.timeout_disabled", td)?;
        }
        if let Some(provider) = cli.store_provider {
            builder = builder.set_override("store.provider", provider)?;
        }

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the runtime cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.security.jwt_secret.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "security.jwt_secret must be set".to_string(),
            ));
        }
        if self.admission.max_in_flight_per_origin == 0 {
            return Err(ConfigError::Invalid(
                "admission.max_in_flight_per_origin must be at least 1".to_string(),
            ));
        }
        let intervals = [
            ("single_flight.idle_timeout_secs", self.single_flight.idle_timeout_secs),
            ("single_flight.sweep_interval_secs", self.single_flight.sweep_interval_secs),
            ("cache.ttl_secs", self.cache.ttl_secs),
            ("cache.sweep_interval_secs", self.cache.sweep_interval_secs),
            ("store.timeout_secs", self.store.timeout_secs),
            ("generation.timeout_secs", self.generation.timeout_secs),
        ];
        if let Some((key, _)) = intervals.iter().find(|(_, secs)| *secs == 0) {
            return Err(ConfigError::Invalid(format!("{key} must be greater than 0")));
        }
        if self.store.provider == StoreProvider::Rest
            && self.store.url.as_deref().is_none_or(|u| u.trim().is_empty())
        {
            return Err(ConfigError::Invalid(
                "store.url is required for the rest provider".to_string(),
            ));
        }
        Ok(())
    }
}
