//! Router assembly and HTTP serving.

use anyhow::Context;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::Method;
use axum::routing::{get, patch};
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::AccessGuard;
use crate::drinks::{handler, DrinkStore};
use crate::error::ApiError;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub guard: Arc<AccessGuard>,
    pub store: Arc<DrinkStore>,
}

impl AppState {
    pub fn new(guard: AccessGuard, store: DrinkStore) -> Self {
        Self {
            guard: Arc::new(guard),
            store: Arc::new(store),
        }
    }
}

/// Assemble the full application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/drinks",
            get(handler::list_drinks).post(handler::create_drink),
        )
        .route("/drinks-detail", get(handler::list_drinks_detail))
        .route(
            "/drinks/{id}",
            patch(handler::update_drink).delete(handler::delete_drink),
        )
        .fallback(not_found)
        .method_not_allowed_fallback(method_not_allowed)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .with_state(state)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
}

async fn not_found() -> ApiError {
    ApiError::NotFound
}

async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

/// Serve until Ctrl-C.
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    let addr = listener.local_addr().context("Failed to read listener address")?;
    info!(%addr, "Drinks API listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            warn!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
