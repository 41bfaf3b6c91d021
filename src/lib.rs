//! NetWatch Device Inventory Backend
//!
//! Central server for a network device inventory dashboard.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        NETWATCH                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐  ┌───────────────┐  ┌─────────────────────┐ │
//! │  │  API      │  │  Threat-Aware │  │  Activity Log       │ │
//! │  │  Gateway  │  │  Intake       │  │  (append-only)      │ │
//! │  │  (Axum)   │  │               │  │                     │ │
//! │  └─────┬─────┘  └───────┬───────┘  └──────────┬──────────┘ │
//! │        └────────────────┼─────────────────────┘            │
//! │                         ▼                                  │
//! │                  ┌─────────────┐        ┌───────────────┐  │
//! │                  │ PostgreSQL  │◀──polls│  logwatch     │  │
//! │                  └─────────────┘  HTTP  │  (feed client)│  │
//! │                                         └───────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod db;
pub mod models;
pub mod handlers;
pub mod middleware;
pub mod error;
pub mod feed;

use axum::{
    Router,
    routing::{get, post, put, delete},
    middleware as axum_middleware,
};
use tower_http::{
    cors::{CorsLayer, Any},
    trace::TraceLayer,
    compression::CompressionLayer,
};

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: sqlx::PgPool,
    pub config: config::Config,
}

/// Create the main router with all routes
pub fn create_router(state: AppState) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(handlers::health::check));

    // Inventory routes (verified bearer token)
    let inventory_routes = Router::new()
        // Devices
        .route("/api/v1/devices", get(handlers::devices::list))
        .route("/api/v1/devices", post(handlers::devices::create))
        .route("/api/v1/devices/import", post(handlers::import::import))
        .route("/api/v1/devices/:id", get(handlers::devices::get))
        .route("/api/v1/devices/:id", put(handlers::devices::update))
        .route("/api/v1/devices/:id", delete(handlers::devices::delete))

        // Activity log (polling feed)
        .route("/api/v1/logs", get(handlers::logs::list))

        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_auth,
        ));

    // Combine all routes
    Router::new()
        .merge(public_routes)
        .merge(inventory_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
