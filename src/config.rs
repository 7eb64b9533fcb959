use crate::algorithms::AlgorithmId;
use crate::error::{ThrottleError, ThrottleResult};
use crate::throttle_config::{FailurePolicy, ThrottleConfig, ThrottleSettings};
use clap::{ArgAction, Parser};
use std::net::SocketAddr;
use std::time::Duration;

/// Service configuration, read from the command line or the environment.
#[derive(Debug, Clone, Parser)]
#[command(name = "throttle-gate", version, about)]
pub struct Config {
    /// Server bind address
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// Redis connection URL; counters stay in process memory when unset
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Rate such as `100/m`; limiting is off when unset
    #[arg(long, env = "THROTTLE_RATE")]
    pub rate: Option<String>,

    #[arg(long, env = "THROTTLE_PREFIX", default_value = "throttle_")]
    pub prefix: String,

    /// Comma separated HTTP methods subject to limiting
    #[arg(long, env = "THROTTLE_METHODS", value_delimiter = ',', default_value = "GET,HEAD")]
    pub methods: Vec<String>,

    #[arg(long, env = "THROTTLE_ALGORITHM", default_value = "fixed_window")]
    pub algorithm: AlgorithmId,

    /// `open` admits and `closed` refuses requests when the store fails
    #[arg(long, env = "THROTTLE_FAILURE_POLICY", default_value = "closed")]
    pub failure_policy: FailurePolicy,

    #[arg(long, env = "THROTTLE_STORE_TIMEOUT", default_value = "500ms", value_parser = humantime::parse_duration)]
    pub store_timeout: Duration,

    #[arg(long, env = "THROTTLE_FAIL_TEXT", default_value = "Too Many Requests")]
    pub fail_text: String,

    #[arg(long, env = "THROTTLE_SHOW_HEADERS", default_value_t = true, action = ArgAction::Set)]
    pub show_headers: bool,

    /// Trust X-Forwarded-For / X-Real-IP from the proxy in front
    #[arg(long, env = "TRUST_PROXY", default_value_t = false, action = ArgAction::Set)]
    pub trust_proxy: bool,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Parse from the process arguments and environment
    pub fn from_env() -> Self {
        Config::parse()
    }

    pub fn throttle_settings(&self) -> ThrottleSettings {
        ThrottleSettings {
            prefix: self.prefix.clone(),
            methods: self.methods.clone(),
            rate: self.rate.clone(),
            show_headers: self.show_headers,
            fail_text: self.fail_text.clone(),
            algorithm: self.algorithm,
            failure_policy: self.failure_policy,
            store_timeout: self.store_timeout,
            trust_proxy: self.trust_proxy,
            ..ThrottleSettings::default()
        }
    }

    /// Validated throttle configuration
    pub fn throttle_config(&self) -> ThrottleResult<ThrottleConfig> {
        if let Some(url) = &self.redis_url {
            validate_redis_url(url)?;
        }
        self.throttle_settings().into_config()
    }
}

/// Validates a Redis URL
pub fn validate_redis_url(url: &str) -> ThrottleResult<()> {
    if url.is_empty() {
        return Err(ThrottleError::InvalidConfig(
            "Redis URL cannot be empty".to_string(),
        ));
    }

    if !url.starts_with("redis://") && !url.starts_with("rediss://") {
        return Err(ThrottleError::InvalidConfig(
            "Redis URL must start with 'redis://' or 'rediss://'".to_string(),
        ));
    }

    Ok(())
}
