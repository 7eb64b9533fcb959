use crate::algorithms::{AlgorithmId, DecisionResult};
use crate::error::{ThrottleError, ThrottleResult};
use crate::key_generator::KeyStrategy;
use crate::rate_spec::RateSpec;
use axum::http::request::Parts;
use axum::http::{Method, StatusCode};
use axum::response::Response;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use validator::Validate;

/// Placeholder in the failure text replaced with the wait time in seconds.
pub const WAIT_PLACEHOLDER: &str = "__WAIT__";

/// Builds the response for a rejected request. `None` is a configuration
/// error and surfaces as `InvalidResponder`.
pub type FailResponder = Arc<dyn Fn(&LimitContext<'_>, &Parts) -> Option<Response> + Send + Sync>;

/// What a fail responder gets to see about the rejection.
#[derive(Debug, Clone, Copy)]
pub struct LimitContext<'a> {
    pub config: &'a ThrottleConfig,
    pub decision: &'a DecisionResult,
}

impl LimitContext<'_> {
    pub fn wait_seconds(&self) -> u64 {
        self.decision.wait_seconds
    }
}

/// Behaviour when the counter store cannot answer in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Admit the request without rate headers.
    Open,
    /// Refuse the request with 503.
    #[default]
    Closed,
}

impl FromStr for FailurePolicy {
    type Err = ThrottleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(FailurePolicy::Open),
            "closed" => Ok(FailurePolicy::Closed),
            other => Err(ThrottleError::InvalidConfig(format!(
                "failure policy must be 'open' or 'closed', got '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::Open => f.write_str("open"),
            FailurePolicy::Closed => f.write_str("closed"),
        }
    }
}

/// Configuration of one throttle instance
#[derive(Clone)]
pub struct ThrottleConfig {
    /// Namespace mixed into every decision key
    pub prefix: String,
    pub key: KeyStrategy,
    pub limited_methods: HashSet<Method>,
    /// `None` turns the limiter into a no-op
    pub rate: Option<String>,
    pub show_headers: bool,
    pub fail_status: StatusCode,
    pub fail_text: String,
    pub fail_responder: Option<FailResponder>,
    pub algorithm: AlgorithmId,
    pub failure_policy: FailurePolicy,
    pub store_timeout: Duration,
    pub max_cas_retries: u32,
    pub trust_proxy: bool,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            prefix: "throttle_".to_string(),
            key: KeyStrategy::ClientAddress,
            limited_methods: [Method::GET, Method::HEAD].into_iter().collect(),
            rate: None,
            show_headers: true,
            fail_status: StatusCode::TOO_MANY_REQUESTS,
            fail_text: "Too Many Requests".to_string(),
            fail_responder: None,
            algorithm: AlgorithmId::FixedWindow,
            failure_policy: FailurePolicy::Closed,
            store_timeout: Duration::from_millis(500),
            max_cas_retries: 8,
            trust_proxy: false,
        }
    }
}

impl fmt::Debug for ThrottleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThrottleConfig")
            .field("prefix", &self.prefix)
            .field("key", &self.key)
            .field("limited_methods", &self.limited_methods)
            .field("rate", &self.rate)
            .field("show_headers", &self.show_headers)
            .field("fail_status", &self.fail_status)
            .field("fail_text", &self.fail_text)
            .field("fail_responder", &self.fail_responder.as_ref().map(|_| ".."))
            .field("algorithm", &self.algorithm)
            .field("failure_policy", &self.failure_policy)
            .field("store_timeout", &self.store_timeout)
            .field("max_cas_retries", &self.max_cas_retries)
            .field("trust_proxy", &self.trust_proxy)
            .finish()
    }
}

impl ThrottleConfig {
    pub fn is_limited_method(&self, method: &Method) -> bool {
        self.limited_methods.contains(method)
    }

    /// Shallow merge: every field set in `overrides` wins.
    pub fn merged<'a>(&'a self, overrides: &ThrottleOverrides) -> Cow<'a, ThrottleConfig> {
        if overrides.is_empty() {
            return Cow::Borrowed(self);
        }

        let mut config = self.clone();
        if let Some(prefix) = &overrides.prefix {
            config.prefix = prefix.clone();
        }
        if let Some(key) = &overrides.key {
            config.key = key.clone();
        }
        if let Some(methods) = &overrides.limited_methods {
            config.limited_methods = methods.clone();
        }
        if let Some(rate) = &overrides.rate {
            config.rate = rate.clone();
        }
        if let Some(show_headers) = overrides.show_headers {
            config.show_headers = show_headers;
        }
        if let Some(status) = overrides.fail_status {
            config.fail_status = status;
        }
        if let Some(text) = &overrides.fail_text {
            config.fail_text = text.clone();
        }
        if let Some(responder) = &overrides.fail_responder {
            config.fail_responder = responder.clone();
        }
        if let Some(policy) = overrides.failure_policy {
            config.failure_policy = policy;
        }
        if let Some(trust_proxy) = overrides.trust_proxy {
            config.trust_proxy = trust_proxy;
        }
        Cow::Owned(config)
    }

    /// Failure body with the wait placeholder substituted.
    pub fn fail_message(&self, wait_seconds: u64) -> String {
        self.fail_text.replace(WAIT_PLACEHOLDER, &wait_seconds.to_string())
    }
}

/// Per-route overrides merged onto the engine configuration.
///
/// The algorithm and store are fixed when the engine is built and cannot
/// be overridden here.
#[derive(Clone, Default)]
pub struct ThrottleOverrides {
    pub prefix: Option<String>,
    pub key: Option<KeyStrategy>,
    pub limited_methods: Option<HashSet<Method>>,
    /// `Some(None)` disables limiting for the route.
    pub rate: Option<Option<String>>,
    pub show_headers: Option<bool>,
    pub fail_status: Option<StatusCode>,
    pub fail_text: Option<String>,
    pub fail_responder: Option<Option<FailResponder>>,
    pub failure_policy: Option<FailurePolicy>,
    pub trust_proxy: Option<bool>,
}

impl ThrottleOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rate(mut self, rate: impl Into<String>) -> Self {
        self.rate = Some(Some(rate.into()));
        self
    }

    pub fn unlimited(mut self) -> Self {
        self.rate = Some(None);
        self
    }

    pub fn key(mut self, key: KeyStrategy) -> Self {
        self.key = Some(key);
        self
    }

    pub fn methods<I: IntoIterator<Item = Method>>(mut self, methods: I) -> Self {
        self.limited_methods = Some(methods.into_iter().collect());
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn show_headers(mut self, show: bool) -> Self {
        self.show_headers = Some(show);
        self
    }

    pub fn fail_status(mut self, status: StatusCode) -> Self {
        self.fail_status = Some(status);
        self
    }

    pub fn fail_text(mut self, text: impl Into<String>) -> Self {
        self.fail_text = Some(text.into());
        self
    }

    pub fn fail_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&LimitContext<'_>, &Parts) -> Option<Response> + Send + Sync + 'static,
    {
        self.fail_responder = Some(Some(Arc::new(responder)));
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = Some(policy);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.prefix.is_none()
            && self.key.is_none()
            && self.limited_methods.is_none()
            && self.rate.is_none()
            && self.show_headers.is_none()
            && self.fail_status.is_none()
            && self.fail_text.is_none()
            && self.fail_responder.is_none()
            && self.failure_policy.is_none()
            && self.trust_proxy.is_none()
    }
}

/// Serializable subset of [`ThrottleConfig`]. Closures and the store handle
/// are injected through the builder instead.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ThrottleSettings {
    #[validate(length(min = 1, message = "prefix cannot be empty"))]
    pub prefix: String,
    /// `true` limits per client address; `false` or `null` disables limiting
    pub key: Option<bool>,
    #[serde(alias = "visit_method")]
    pub methods: Vec<String>,
    #[serde(alias = "visit_rate")]
    pub rate: Option<String>,
    #[serde(alias = "visit_enable_show_rate_limit")]
    pub show_headers: bool,
    #[serde(alias = "visit_fail_code")]
    #[validate(range(min = 400, max = 599, message = "fail code must be a 4xx or 5xx status"))]
    pub fail_code: u16,
    #[serde(alias = "visit_fail_text")]
    pub fail_text: String,
    #[serde(alias = "driver_name")]
    pub algorithm: AlgorithmId,
    pub failure_policy: FailurePolicy,
    #[serde(with = "humantime_serde")]
    pub store_timeout: Duration,
    #[validate(range(min = 1, max = 1000))]
    pub max_cas_retries: u32,
    pub trust_proxy: bool,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        let config = ThrottleConfig::default();
        Self {
            prefix: config.prefix,
            key: Some(true),
            methods: vec!["GET".to_string(), "HEAD".to_string()],
            rate: None,
            show_headers: config.show_headers,
            fail_code: config.fail_status.as_u16(),
            fail_text: config.fail_text,
            algorithm: config.algorithm,
            failure_policy: config.failure_policy,
            store_timeout: config.store_timeout,
            max_cas_retries: config.max_cas_retries,
            trust_proxy: config.trust_proxy,
        }
    }
}

impl ThrottleSettings {
    /// Validate and convert. A malformed rate fails here rather than
    /// silently disabling limiting.
    pub fn into_config(self) -> ThrottleResult<ThrottleConfig> {
        self.validate()
            .map_err(|e| ThrottleError::InvalidConfig(e.to_string()))?;

        if let Some(rate) = &self.rate {
            RateSpec::parse(rate)?;
        }

        let limited_methods = self
            .methods
            .iter()
            .map(|m| {
                Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes()).map_err(|_| {
                    ThrottleError::InvalidConfig(format!("invalid HTTP method '{}'", m))
                })
            })
            .collect::<ThrottleResult<HashSet<_>>>()?;

        let fail_status = StatusCode::from_u16(self.fail_code)
            .map_err(|e| ThrottleError::InvalidConfig(format!("invalid fail code: {}", e)))?;

        Ok(ThrottleConfig {
            prefix: self.prefix,
            key: self.key.map(KeyStrategy::from).unwrap_or(KeyStrategy::Disabled),
            limited_methods,
            rate: self.rate,
            show_headers: self.show_headers,
            fail_status,
            fail_text: self.fail_text,
            fail_responder: None,
            algorithm: self.algorithm,
            failure_policy: self.failure_policy,
            store_timeout: self.store_timeout,
            max_cas_retries: self.max_cas_retries,
            trust_proxy: self.trust_proxy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ThrottleConfig::default();
        assert_eq!(config.prefix, "throttle_");
        assert!(config.is_limited_method(&Method::GET));
        assert!(config.is_limited_method(&Method::HEAD));
        assert!(!config.is_limited_method(&Method::POST));
        assert!(config.rate.is_none());
        assert_eq!(config.fail_status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(config.failure_policy, FailurePolicy::Closed);
    }

    #[test]
    fn test_empty_overrides_borrow() {
        let config = ThrottleConfig::default();
        assert!(matches!(config.merged(&ThrottleOverrides::new()), Cow::Borrowed(_)));
    }

    #[test]
    fn test_overrides_win() {
        let config = ThrottleConfig {
            rate: Some("10/m".to_string()),
            ..ThrottleConfig::default()
        };
        let overrides = ThrottleOverrides::new()
            .rate("3/s")
            .methods([Method::POST])
            .fail_text("slow down")
            .show_headers(false);

        let merged = config.merged(&overrides);
        assert_eq!(merged.rate.as_deref(), Some("3/s"));
        assert!(merged.is_limited_method(&Method::POST));
        assert!(!merged.is_limited_method(&Method::GET));
        assert_eq!(merged.fail_text, "slow down");
        assert!(!merged.show_headers);
        // untouched fields come from the base config
        assert_eq!(merged.prefix, "throttle_");
    }

    #[test]
    fn test_unlimited_override_clears_rate() {
        let config = ThrottleConfig {
            rate: Some("10/m".to_string()),
            ..ThrottleConfig::default()
        };
        let merged = config.merged(&ThrottleOverrides::new().unlimited());
        assert!(merged.rate.is_none());
    }

    #[test]
    fn test_fail_message_substitutes_wait() {
        let config = ThrottleConfig {
            fail_text: "retry in __WAIT__s".to_string(),
            ..ThrottleConfig::default()
        };
        assert_eq!(config.fail_message(42), "retry in 42s");
    }

    #[test]
    fn test_settings_accept_legacy_option_names() {
        let settings: ThrottleSettings = serde_json::from_value(serde_json::json!({
            "prefix": "api_",
            "visit_method": ["get", "POST"],
            "visit_rate": "100/m",
            "visit_enable_show_rate_limit": false,
            "visit_fail_code": 503,
            "visit_fail_text": "wait __WAIT__",
            "driver_name": "fixed_window",
            "store_timeout": "250ms"
        }))
        .unwrap();

        let config = settings.into_config().unwrap();
        assert_eq!(config.prefix, "api_");
        assert!(config.is_limited_method(&Method::GET));
        assert!(config.is_limited_method(&Method::POST));
        assert_eq!(config.rate.as_deref(), Some("100/m"));
        assert!(!config.show_headers);
        assert_eq!(config.fail_status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(config.store_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_settings_null_key_disables_limiting() {
        let settings: ThrottleSettings = serde_json::from_value(serde_json::json!({
            "key": null,
            "visit_rate": "10/m"
        }))
        .unwrap();
        assert_eq!(settings.key, None);
        let config = settings.into_config().unwrap();
        assert!(matches!(config.key, KeyStrategy::Disabled));

        let settings: ThrottleSettings =
            serde_json::from_value(serde_json::json!({ "visit_rate": "10/m" })).unwrap();
        assert_eq!(settings.key, Some(true));
        assert!(matches!(settings.into_config().unwrap().key, KeyStrategy::ClientAddress));

        let settings: ThrottleSettings =
            serde_json::from_value(serde_json::json!({ "key": false, "visit_rate": "10/m" })).unwrap();
        assert!(matches!(settings.into_config().unwrap().key, KeyStrategy::Disabled));
    }

    #[test]
    fn test_settings_reject_bad_values() {
        let bad_rate = ThrottleSettings {
            rate: Some("10/fortnight".to_string()),
            ..ThrottleSettings::default()
        };
        assert!(matches!(
            bad_rate.into_config(),
            Err(ThrottleError::InvalidRateSpec { .. })
        ));

        let bad_code = ThrottleSettings {
            fail_code: 200,
            ..ThrottleSettings::default()
        };
        assert!(matches!(bad_code.into_config(), Err(ThrottleError::InvalidConfig(_))));

        let bad_prefix = ThrottleSettings {
            prefix: String::new(),
            ..ThrottleSettings::default()
        };
        assert!(matches!(bad_prefix.into_config(), Err(ThrottleError::InvalidConfig(_))));
    }

    #[test]
    fn test_failure_policy_parsing() {
        assert_eq!("OPEN".parse::<FailurePolicy>().unwrap(), FailurePolicy::Open);
        assert_eq!("closed".parse::<FailurePolicy>().unwrap(), FailurePolicy::Closed);
        assert!("maybe".parse::<FailurePolicy>().is_err());
    }
}
