//! Login, logout, `/me` and health.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::error::AppError;
use crate::services::auth::{
    self, AdminLoginRequest, LoginResponse, MeResponse, PromoterLoginRequest,
};

use super::auth::Authenticated;
use super::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    tracing::debug!("health check requested");
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

pub async fn admin_login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AdminLoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let response = state.with_db(move |db| auth::login_admin(db, &req)).await?;
    Ok(Json(response))
}

pub async fn promoter_login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PromoterLoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let response = state
        .with_db(move |db| auth::login_promoter(db, &req))
        .await?;
    Ok(Json(response))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    Authenticated(session): Authenticated,
) -> Result<Json<MessageResponse>, AppError> {
    state.with_db(move |db| auth::logout(db, &session)).await?;
    Ok(Json(MessageResponse {
        message: "Logged out successfully",
    }))
}

pub async fn me(
    State(state): State<Arc<AppState>>,
    Authenticated(session): Authenticated,
) -> Result<Json<MeResponse>, AppError> {
    let response = state
        .with_db(move |db| auth::me(db, &session.principal))
        .await?;
    Ok(Json(response))
}
