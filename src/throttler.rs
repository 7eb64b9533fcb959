use crate::algorithms::{AlgorithmId, DecisionResult, ThrottleAlgorithm};
use crate::clock::{Clock, SystemClock};
use crate::error::{ThrottleError, ThrottleResult};
use crate::key_generator::{KeyGenerator, KeyStrategy};
use crate::middleware::{ThrottleLayer, ThrottleState};
use crate::rate_spec::RateSpec;
use crate::store::{CounterStore, MemoryStore};
use crate::throttle_config::{
    FailResponder, FailurePolicy, LimitContext, ThrottleConfig, ThrottleOverrides,
};
use axum::extract::Request;
use axum::http::header::RETRY_AFTER;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

pub const X_RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-rate-limit-limit");
pub const X_RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-rate-limit-remaining");
pub const X_RATE_LIMIT_RESET: HeaderName = HeaderName::from_static("x-rate-limit-reset");

/// What the engine decided for one request
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Not subject to limiting (method, key or rate says so)
    Bypass,
    /// Store failed and the failure policy is open
    FailedOpen,
    /// Admitted; `now` is the whole epoch second of the decision
    Allowed { result: DecisionResult, now: u64 },
    /// Over the limit
    Limited(DecisionResult),
}

/// Rate limit headers for an admitted request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitHeaders {
    pub limit: u64,
    pub remaining: u64,
    pub reset: u64,
}

impl RateLimitHeaders {
    pub fn new(result: &DecisionResult, now: u64) -> Self {
        Self {
            limit: result.max_requests,
            remaining: result.remaining(),
            reset: now.saturating_add(result.window_seconds),
        }
    }

    pub fn apply(&self, headers: &mut HeaderMap) {
        headers.insert(X_RATE_LIMIT_LIMIT, HeaderValue::from(self.limit));
        headers.insert(X_RATE_LIMIT_REMAINING, HeaderValue::from(self.remaining));
        headers.insert(X_RATE_LIMIT_RESET, HeaderValue::from(self.reset));
    }
}

/// Admission control engine.
///
/// Cheap to clone; all clones share the store, the algorithm and the parsed
/// rate cache. Nothing else is shared between requests.
#[derive(Clone)]
pub struct Throttle {
    config: Arc<ThrottleConfig>,
    algorithm: Arc<dyn ThrottleAlgorithm>,
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    rate_cache: Arc<RwLock<HashMap<String, RateSpec>>>,
}

impl Throttle {
    pub fn builder() -> ThrottleBuilder {
        ThrottleBuilder::new()
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    pub fn algorithm_name(&self) -> &str {
        self.algorithm.name()
    }

    /// Tower layer limiting with this engine's configuration.
    pub fn layer(&self) -> ThrottleLayer {
        ThrottleLayer::new(ThrottleState::new(self.clone()))
    }

    /// Tower layer for one route, with `overrides` merged over the base
    /// configuration. Counters are shared with every other layer of this engine.
    pub fn layer_with(&self, overrides: ThrottleOverrides) -> ThrottleLayer {
        ThrottleLayer::new(ThrottleState::with_overrides(self.clone(), overrides))
    }

    /// Parsed rate, cached per distinct rate string.
    pub fn rate_spec(&self, rate: &str) -> ThrottleResult<RateSpec> {
        if let Ok(cache) = self.rate_cache.read() {
            if let Some(spec) = cache.get(rate) {
                return Ok(*spec);
            }
        }

        let spec = RateSpec::parse(rate)?;
        if let Ok(mut cache) = self.rate_cache.write() {
            cache.insert(rate.to_string(), spec);
        }
        Ok(spec)
    }

    /// Decide for a request without calling anything downstream.
    pub async fn decide(
        &self,
        parts: &Parts,
        overrides: &ThrottleOverrides,
    ) -> ThrottleResult<Decision> {
        let config = self.config.merged(overrides);
        self.decide_with(&config, parts).await
    }

    async fn decide_with(&self, config: &ThrottleConfig, parts: &Parts) -> ThrottleResult<Decision> {
        if !config.is_limited_method(&parts.method) {
            return Ok(Decision::Bypass);
        }

        let Some(key) = KeyGenerator::derive(config, parts, self.algorithm.name()) else {
            return Ok(Decision::Bypass);
        };
        let Some(rate) = config.rate.as_deref() else {
            return Ok(Decision::Bypass);
        };
        let spec = self.rate_spec(rate)?;

        let now = self.clock.now_secs();
        let evaluation = tokio::time::timeout(
            config.store_timeout,
            self.algorithm.evaluate(
                &key,
                now,
                spec.max_requests,
                spec.window_seconds,
                self.store.as_ref(),
            ),
        )
        .await;

        let result = match evaluation {
            Ok(Ok(result)) => result,
            Ok(Err(err)) if err.is_store_failure() => return self.on_store_failure(config, err),
            Ok(Err(err)) => return Err(err),
            Err(_) => {
                let err = ThrottleError::StoreUnavailable(format!(
                    "{} store did not answer within {:?}",
                    self.store.name(),
                    config.store_timeout
                ));
                return self.on_store_failure(config, err);
            }
        };

        debug!(
            key = %key,
            allowed = result.allowed,
            count = result.current_count,
            limit = result.max_requests,
            "throttle decision"
        );

        if result.allowed {
            Ok(Decision::Allowed {
                result,
                now: now.floor() as u64,
            })
        } else {
            Ok(Decision::Limited(result))
        }
    }

    fn on_store_failure(&self, config: &ThrottleConfig, err: ThrottleError) -> ThrottleResult<Decision> {
        match config.failure_policy {
            FailurePolicy::Open => {
                warn!(store = self.store.name(), error = %err, "counter store failed, admitting request");
                Ok(Decision::FailedOpen)
            }
            FailurePolicy::Closed => {
                warn!(store = self.store.name(), error = %err, "counter store failed, refusing request");
                Err(err)
            }
        }
    }

    /// Run the request through the limiter, calling `next` only when admitted.
    pub async fn handle<F, Fut>(
        &self,
        request: Request,
        next: F,
        overrides: &ThrottleOverrides,
    ) -> ThrottleResult<Response>
    where
        F: FnOnce(Request) -> Fut,
        Fut: Future<Output = Response>,
    {
        let config = self.config.merged(overrides);
        let (parts, body) = request.into_parts();

        match self.decide_with(&config, &parts).await? {
            Decision::Bypass | Decision::FailedOpen => Ok(next(Request::from_parts(parts, body)).await),
            Decision::Allowed { result, now } => {
                let mut response = next(Request::from_parts(parts, body)).await;
                if config.show_headers && response.status().is_success() {
                    RateLimitHeaders::new(&result, now).apply(response.headers_mut());
                }
                Ok(response)
            }
            Decision::Limited(result) => {
                warn!(
                    method = %parts.method,
                    uri = %parts.uri,
                    wait_seconds = result.wait_seconds,
                    "request rate limited"
                );
                self.limited_response(&config, &parts, &result)
            }
        }
    }

    fn limited_response(
        &self,
        config: &ThrottleConfig,
        parts: &Parts,
        result: &DecisionResult,
    ) -> ThrottleResult<Response> {
        let mut response = match &config.fail_responder {
            Some(responder) => {
                let context = LimitContext {
                    config,
                    decision: result,
                };
                responder(&context, parts).ok_or_else(|| {
                    ThrottleError::InvalidResponder("fail responder returned no response".to_string())
                })?
            }
            None => (config.fail_status, config.fail_message(result.wait_seconds)).into_response(),
        };

        if config.show_headers {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(result.wait_seconds));
        }
        Ok(response)
    }
}

/// Builder wiring a [`Throttle`] to its store, algorithm and clock.
pub struct ThrottleBuilder {
    config: ThrottleConfig,
    store: Option<Arc<dyn CounterStore>>,
    algorithm: Option<Arc<dyn ThrottleAlgorithm>>,
    clock: Arc<dyn Clock>,
}

impl Default for ThrottleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ThrottleBuilder {
    pub fn new() -> Self {
        Self {
            config: ThrottleConfig::default(),
            store: None,
            algorithm: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn config(mut self, config: ThrottleConfig) -> Self {
        self.config = config;
        self
    }

    pub fn rate(mut self, rate: impl Into<String>) -> Self {
        self.config.rate = Some(rate.into());
        self
    }

    pub fn key(mut self, key: KeyStrategy) -> Self {
        self.config.key = key;
        self
    }

    pub fn fail_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&LimitContext<'_>, &Parts) -> Option<Response> + Send + Sync + 'static,
    {
        let responder: FailResponder = Arc::new(responder);
        self.config.fail_responder = Some(responder);
        self
    }

    pub fn store<S: CounterStore + 'static>(mut self, store: S) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    pub fn shared_store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn algorithm(mut self, algorithm: AlgorithmId) -> Self {
        self.config.algorithm = algorithm;
        self.algorithm = None;
        self
    }

    /// Use a caller supplied algorithm instead of resolving the configured id.
    pub fn algorithm_impl(mut self, algorithm: Arc<dyn ThrottleAlgorithm>) -> Self {
        self.algorithm = Some(algorithm);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> ThrottleResult<Throttle> {
        let algorithm = match self.algorithm {
            Some(algorithm) => algorithm,
            None => self.config.algorithm.build(self.config.max_cas_retries)?,
        };

        let mut rate_cache = HashMap::new();
        if let Some(rate) = &self.config.rate {
            rate_cache.insert(rate.clone(), RateSpec::parse(rate)?);
        }

        let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        debug!(
            algorithm = algorithm.name(),
            store = store.name(),
            rate = ?self.config.rate,
            "throttle built"
        );

        Ok(Throttle {
            config: Arc::new(self.config),
            algorithm,
            store,
            clock: self.clock,
            rate_cache: Arc::new(RwLock::new(rate_cache)),
        })
    }
}
