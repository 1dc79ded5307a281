use std::time::Duration;

pub const ENV_PREFIX: &str = "BYOMPROXY_";

const DEFAULT_UPSTREAM_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_LISTEN: &str = "0.0.0.0:8000";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;
const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 10;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid {name} value: {value}")]
    InvalidInteger { name: String, value: String },
    #[error("{name} must be a positive integer")]
    NotPositive { name: String },
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub listen: String,
    pub upstream_endpoint: String,
    pub request_timeout: Duration,
    /// Proxy-facing secret. `None` means callers send only the upstream token.
    pub access_token: Option<String>,
    pub log_request: bool,
    /// How long the relay waits on the upstream before sending another heartbeat.
    pub heartbeat_interval: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            upstream_endpoint: DEFAULT_UPSTREAM_ENDPOINT.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            access_token: None,
            log_request: false,
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.trim().is_empty())
        };
        let mut config = Self::default();

        if let Some(listen) = var("LISTEN") {
            config.listen = listen;
        }
        if let Some(endpoint) = var("UPSTREAM_ENDPOINT") {
            config.upstream_endpoint = endpoint;
        }
        if let Some(raw) = var("REQUEST_TIMEOUT") {
            config.request_timeout = parse_positive_secs("REQUEST_TIMEOUT", &raw)?;
        }
        if let Some(raw) = var("HEARTBEAT_INTERVAL") {
            config.heartbeat_interval = parse_positive_secs("HEARTBEAT_INTERVAL", &raw)?;
        }
        config.access_token = var("ACCESS_TOKEN");
        config.log_request = var("LOG_REQUEST")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "yes" | "1" | "true"))
            .unwrap_or(false);

        Ok(config)
    }
}

fn parse_positive_secs(name: &str, raw: &str) -> Result<Duration, ConfigError> {
    let name = format!("{ENV_PREFIX}{name}");
    let secs: i64 = raw
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidInteger {
            name: name.clone(),
            value: raw.to_string(),
        })?;
    if secs <= 0 {
        return Err(ConfigError::NotPositive { name });
    }
    Ok(Duration::from_secs(secs as u64))
}
