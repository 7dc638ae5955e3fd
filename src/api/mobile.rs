//! Promoter-facing ingestion endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::Value;

use crate::error::AppError;
use crate::services::ingestion::{self, BulkResult, ItemOutcome};

use super::auth::PromoterAuth;
use super::state::AppState;

pub(crate) fn status_of(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// 201 on create, 200 on update, 422 on validation, 500 on store failure.
pub async fn submit(
    State(state): State<Arc<AppState>>,
    PromoterAuth(promoter): PromoterAuth,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<ItemOutcome>), AppError> {
    let outcome = state
        .with_db(move |db| Ok(ingestion::submit_single(db, &promoter, &payload)))
        .await?;
    Ok((status_of(outcome.http_status()), Json(outcome)))
}

/// Up to 50 items. 200 all saved, 207 mixed, 422 none saved.
pub async fn submit_bulk(
    State(state): State<Arc<AppState>>,
    PromoterAuth(promoter): PromoterAuth,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<BulkResult>), AppError> {
    let result = state
        .with_db(move |db| ingestion::submit_bulk(db, &promoter, &body))
        .await?;
    Ok((status_of(result.http_status()), Json(result)))
}
