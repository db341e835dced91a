//! HTTP API Server
//!
//! Builds the router and runs the axum server until shutdown.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use http::HeaderValue;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use qs_core::{ApiConfig, QueryService, ReprocessQueue};
use qs_schedule::MonitoringScheduler;

use crate::oauth::OAuthStates;
use crate::routes::routes;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub query: QueryService,
    pub queue: ReprocessQueue,
    pub scheduler: Arc<MonitoringScheduler>,
    pub api: Arc<ApiConfig>,
    /// Outstanding OAuth `state` values, consumed by the callback
    pub oauth_states: Arc<OAuthStates>,
}

impl AppState {
    pub fn new(
        query: QueryService,
        queue: ReprocessQueue,
        scheduler: Arc<MonitoringScheduler>,
        api: ApiConfig,
    ) -> Self {
        Self {
            query,
            queue,
            scheduler,
            api: Arc::new(api),
            oauth_states: Arc::new(OAuthStates::default()),
        }
    }
}

/// Build the application router with CORS and request tracing
pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.api);
    Router::new()
        .merge(routes(state.clone()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(api: &ApiConfig) -> CorsLayer {
    let Some(origins) = &api.allowed_origins else {
        return CorsLayer::permissive();
    };

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Start the HTTP API server; returns once `shutdown` resolves and in-flight
/// requests have drained
pub async fn start_server(
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], state.api.port));
    let app = router(state);

    info!("HTTP API listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
