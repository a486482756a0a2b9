use std::env;

#[derive(Debug, Clone)]
pub enum Deployment {
    Local,
    Dev,
    Stage,
    Prod,
}

impl Deployment {
    #[must_use]
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Self::Dev,
            "stage" | "staging" => Self::Stage,
            "prod" | "production" => Self::Prod,
            _ => Self::Local,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // History source
    pub history_base_url: String,
    pub history_token: String,
    pub history_skip_tls_verify: bool,
    pub history_timeout_seconds: u64,

    // Chart
    pub chart_config_path: String,
    pub state_poll_interval_seconds: u64,

    // API settings
    pub api_host: String,
    pub api_port: u16,

    // Caching
    pub cache_dir: String,
    pub cache_max_bytes: u64,

    // Application metadata
    pub deployment: Deployment,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if required environment variables are not set.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Self {
            // History source
            history_base_url: env::var("HISTORY_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8123/api".to_string()),
            history_token: env::var("HISTORY_TOKEN")
                .map_err(|_| ConfigError::Missing("HISTORY_TOKEN"))?,
            history_skip_tls_verify: env::var("HISTORY_SKIP_TLS_VERIFY")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
            history_timeout_seconds: env::var("HISTORY_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .unwrap_or(60),

            // Chart
            chart_config_path: env::var("CHART_CONFIG_PATH")
                .map_err(|_| ConfigError::Missing("CHART_CONFIG_PATH"))?,
            state_poll_interval_seconds: env::var("STATE_POLL_INTERVAL_SECONDS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(30),

            // API settings
            api_host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            api_port: env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .unwrap_or(3000),

            // Caching
            cache_dir: env::var("CACHE_DIR").unwrap_or_else(|_| "./cache".to_string()),
            cache_max_bytes: env::var("CACHE_MAX_BYTES")
                .unwrap_or_else(|_| "52428800".to_string())
                .parse()
                .unwrap_or(52_428_800), // 50MB default

            // Application metadata
            deployment: Deployment::from_str(
                &env::var("DEPLOYMENT").unwrap_or_else(|_| "local".to_string()),
            ),
        })
    }

    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("'{path}': {reason}")]
    Invalid { path: String, reason: String },
}

impl ConfigError {
    pub fn invalid(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
