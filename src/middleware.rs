use crate::error::ThrottleError;
use crate::throttle_config::ThrottleOverrides;
use crate::throttler::Throttle;
use axum::extract::{Request, State};
use axum::http::{HeaderValue, Method, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::{error, info, Instrument};
use uuid::Uuid;

/// State for [`throttle_middleware`]: the engine plus per-route overrides.
#[derive(Clone)]
pub struct ThrottleState {
    pub throttle: Throttle,
    pub overrides: Arc<ThrottleOverrides>,
}

impl ThrottleState {
    pub fn new(throttle: Throttle) -> Self {
        Self {
            throttle,
            overrides: Arc::new(ThrottleOverrides::default()),
        }
    }

    pub fn with_overrides(throttle: Throttle, overrides: ThrottleOverrides) -> Self {
        Self {
            throttle,
            overrides: Arc::new(overrides),
        }
    }
}

impl From<Throttle> for ThrottleState {
    fn from(throttle: Throttle) -> Self {
        Self::new(throttle)
    }
}

/// Admission control middleware, for use with `axum::middleware::from_fn_with_state`.
///
/// Configuration errors answer 500 and store failures under a closed policy
/// answer 503, so neither can be mistaken for a rate limit rejection.
pub async fn throttle_middleware(
    State(state): State<ThrottleState>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    match state
        .throttle
        .handle(request, |request| next.run(request), &state.overrides)
        .await
    {
        Ok(response) => response,
        Err(err) => error_response(&method, &uri, err),
    }
}

fn error_response(method: &Method, uri: &Uri, err: ThrottleError) -> Response {
    error!(
        target: "throttle_gate::middleware",
        method = %method,
        uri = %uri,
        error = %err,
        "throttle failed"
    );
    err.into_response()
}

/// Tower layer form of [`throttle_middleware`], built by
/// [`Throttle::layer`] and [`Throttle::layer_with`].
#[derive(Clone)]
pub struct ThrottleLayer {
    state: ThrottleState,
}

impl ThrottleLayer {
    pub fn new(state: ThrottleState) -> Self {
        Self { state }
    }
}

impl<S> Layer<S> for ThrottleLayer {
    type Service = ThrottleService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ThrottleService {
            inner,
            state: self.state.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ThrottleService<S> {
    inner: S,
    state: ThrottleState,
}

impl<S> Service<Request> for ThrottleService<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        // The ready service handles this request; the clone waits for the next.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let state = self.state.clone();

        Box::pin(async move {
            let method = request.method().clone();
            let uri = request.uri().clone();
            let next = |request: Request| async move {
                match inner.call(request).await {
                    Ok(response) => response,
                    Err(never) => match never {},
                }
            };

            Ok(match state.throttle.handle(request, next, &state.overrides).await {
                Ok(response) => response,
                Err(err) => error_response(&method, &uri, err),
            })
        })
    }
}

/// Logging middleware for request/response tracking
pub async fn logging_middleware(mut request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let request_id = Uuid::new_v4().to_string();

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        request.headers_mut().insert("x-request-id", value);
    }

    let span = tracing::info_span!("request", request_id = %request_id);
    async move {
        info!(
            target: "throttle_gate::middleware",
            method = %method,
            uri = %uri,
            "Incoming request"
        );

        let mut response = next.run(request).await;

        info!(
            target: "throttle_gate::middleware",
            method = %method,
            uri = %uri,
            status = %response.status(),
            "Request completed"
        );

        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert("x-request-id", value);
        }
        response
    }
    .instrument(span)
    .await
}
