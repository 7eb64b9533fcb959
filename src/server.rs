use crate::config::Config;
use crate::error::ThrottleResult;
use crate::handlers::{health_check, index, login, AppState, SharedState};
use crate::middleware::{logging_middleware, throttle_middleware, ThrottleState};
use crate::store::{CounterStore, MemoryStore, RedisStore};
use crate::throttle_config::ThrottleOverrides;
use crate::throttler::Throttle;
use axum::http::Method;
use axum::routing::{get, post};
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

const MEMORY_SWEEP_PERIOD: Duration = Duration::from_secs(60);

/// Build the router. `/health` sits outside the limiter; `/login` is limited
/// only by its own stricter override for POST.
pub fn create_app(throttle: Throttle) -> Router {
    let login_limit = ThrottleOverrides::new()
        .prefix(format!("{}login_", throttle.config().prefix))
        .methods([Method::POST])
        .rate("5/m");

    let limited = Router::new()
        .route("/", get(index))
        .route_layer(middleware::from_fn_with_state(
            ThrottleState::new(throttle.clone()),
            throttle_middleware,
        ));

    let login_route = Router::new().route(
        "/login",
        post(login).route_layer(throttle.layer_with(login_limit)),
    );

    let shared_state: SharedState = Arc::new(AppState { throttle });

    Router::new()
        .merge(limited)
        .merge(login_route)
        .route("/health", get(health_check))
        .with_state(shared_state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(logging_middleware)),
        )
}

pub struct Server {
    app: Router,
    bind_addr: SocketAddr,
}

impl Server {
    pub async fn new(config: Config) -> ThrottleResult<Self> {
        let throttle_config = config.throttle_config()?;

        let store: Arc<dyn CounterStore> = match &config.redis_url {
            Some(url) => {
                let store = RedisStore::new(url)?;
                if let Err(err) = store.connect().await {
                    // Requests still go through the failure policy until Redis is back.
                    tracing::warn!(error = %err, "Redis not reachable at startup");
                }
                Arc::new(store)
            }
            None => {
                tracing::info!("No REDIS_URL configured, counting in process memory");
                let store = MemoryStore::new();
                store.spawn_sweeper(MEMORY_SWEEP_PERIOD);
                Arc::new(store)
            }
        };

        let throttle = Throttle::builder()
            .config(throttle_config)
            .shared_store(store)
            .build()?;

        Ok(Self {
            app: create_app(throttle),
            bind_addr: config.bind_addr,
        })
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;

        tracing::info!("Throttle gate listening on {}", self.bind_addr);
        tracing::info!("Health check available at /health");

        // Run server with graceful shutdown
        axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
