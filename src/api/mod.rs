//! HTTP surface: router, shared state, extractors and handlers.

mod activities;
mod admin;
pub mod auth;
mod dashboard;
mod mobile;
mod route_plans;
mod session;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, patch, post, put},
    Router,
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::request_log::record_request;

pub use state::AppState;

/// Build the application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        // Public
        .route("/health", get(session::health))
        .route("/auth/login", post(session::admin_login))
        .route("/mobile/login", post(session::promoter_login))
        // Any authenticated principal
        .route("/auth/logout", post(session::logout))
        .route("/me", get(session::me))
        // Promoter ingestion
        .route("/mobile/activities", post(mobile::submit))
        .route("/mobile/activities/bulk", post(mobile::submit_bulk))
        // Activities
        .route(
            "/activities",
            get(activities::index).post(activities::store),
        )
        .route("/activities/bulk", post(activities::store_bulk))
        .route(
            "/activities/:id",
            get(activities::show).delete(activities::destroy),
        )
        .route("/activities/:id/status", patch(activities::update_status))
        .route("/photos", get(activities::photos))
        // Route plans
        .route(
            "/route-plans",
            get(route_plans::index).post(route_plans::store),
        )
        .route("/route-plans/matching", get(route_plans::matching))
        .route(
            "/route-plans/:id",
            get(route_plans::show)
                .put(route_plans::update)
                .delete(route_plans::destroy),
        )
        // Dashboard
        .route("/dashboard/analytics", get(dashboard::analytics))
        // RBAC
        .route("/roles", get(admin::list_roles).post(admin::create_role))
        .route("/roles/:id", delete(admin::delete_role))
        .route("/roles/:id/permissions", put(admin::sync_role_permissions))
        .route(
            "/permissions",
            get(admin::list_permissions).post(admin::create_permission),
        )
        .route("/users", post(admin::create_user))
        .route("/users/:id/roles", put(admin::sync_user_roles))
        .route("/users/:id/permissions", put(admin::sync_user_permissions))
        .route("/users/:id/states", put(admin::sync_user_states))
        // Promoters
        .route(
            "/promoters",
            get(admin::list_promoters).post(admin::create_promoter),
        )
        .route("/promoters/:id", delete(admin::delete_promoter))
        .route("/promoters/:id/status", patch(admin::set_promoter_status))
        .with_state(state.clone());

    router = router
        .layer(middleware::from_fn_with_state(
            state.request_log.clone(),
            record_request,
        ))
        .layer(TraceLayer::new_for_http());

    if state.config.cors_enabled {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router
}

/// Bind and serve until Ctrl-C.
pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %addr,
        cors = state.config.cors_enabled,
        "FieldOps API listening"
    );
    let router = build_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
        })
        .await
}
