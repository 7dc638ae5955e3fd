//! Admin activity endpoints: listing, review, deletion, admin ingestion and photos.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use crate::access::permissions::names;
use crate::access::authorize;
use crate::db::activities::DbReccePhotos;
use crate::error::AppError;
use crate::services::activities::{
    self, ActivityListQuery, Paginated, PhotoQuery, RecceRecord,
};
use crate::services::ingestion::{self, BulkResult, ItemOutcome};

use super::auth::AdminAuth;
use super::mobile::status_of;
use super::state::AppState;

pub async fn index(
    State(state): State<Arc<AppState>>,
    AdminAuth(principal): AdminAuth,
    Query(query): Query<ActivityListQuery>,
) -> Result<Json<Paginated<RecceRecord>>, AppError> {
    let mut page = state
        .with_db(move |db| {
            authorize(db, &principal, names::ACTIVITY_VIEW)?;
            activities::list_activities(db, &principal, &query)
        })
        .await?;
    let storage = &state.config.storage;
    page.data = page
        .data
        .into_iter()
        .map(|r| r.with_public_photos(storage))
        .collect();
    Ok(Json(page))
}

pub async fn show(
    State(state): State<Arc<AppState>>,
    AdminAuth(principal): AdminAuth,
    Path(id): Path<i64>,
) -> Result<Json<RecceRecord>, AppError> {
    let record = state
        .with_db(move |db| {
            authorize(db, &principal, names::ACTIVITY_VIEW)?;
            activities::show_activity(db, &principal, id)
        })
        .await?;
    Ok(Json(record.with_public_photos(&state.config.storage)))
}

pub async fn store(
    State(state): State<Arc<AppState>>,
    AdminAuth(principal): AdminAuth,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<ItemOutcome>), AppError> {
    let outcome = state
        .with_db(move |db| {
            authorize(db, &principal, names::ACTIVITY_CREATE)?;
            Ok(ingestion::submit_admin_single(db, &payload))
        })
        .await?;
    Ok((status_of(outcome.http_status()), Json(outcome)))
}

pub async fn store_bulk(
    State(state): State<Arc<AppState>>,
    AdminAuth(principal): AdminAuth,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<BulkResult>), AppError> {
    let result = state
        .with_db(move |db| {
            authorize(db, &principal, names::ACTIVITY_CREATE)?;
            ingestion::submit_admin_bulk(db, &body)
        })
        .await?;
    Ok((status_of(result.http_status()), Json(result)))
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: Option<String>,
    pub remarks: Option<String>,
}

/// Approve/reject needs `activity_recce.approve`; other transitions need update.
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    AdminAuth(principal): AdminAuth,
    Path(id): Path<i64>,
    Json(req): Json<StatusUpdateRequest>,
) -> Result<Json<RecceRecord>, AppError> {
    let record = state
        .with_db(move |db| {
            let raw = req
                .status
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| AppError::validation("status", "The status field is required."))?;
            let status = activities::parse_status(raw)?;
            authorize(db, &principal, activities::status_permission(status))?;
            activities::update_status(db, &principal, id, status, req.remarks.as_deref())
        })
        .await?;
    Ok(Json(record.with_public_photos(&state.config.storage)))
}

pub async fn destroy(
    State(state): State<Arc<AppState>>,
    AdminAuth(principal): AdminAuth,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state
        .with_db(move |db| {
            authorize(db, &principal, names::ACTIVITY_DELETE)?;
            activities::delete_activity(db, &principal, id)
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn photos(
    State(state): State<Arc<AppState>>,
    AdminAuth(principal): AdminAuth,
    Query(query): Query<PhotoQuery>,
) -> Result<Json<Vec<DbReccePhotos>>, AppError> {
    let storage = state.config.storage.clone();
    let rows = state
        .with_db(move |db| {
            authorize(db, &principal, names::ACTIVITY_VIEW)?;
            activities::list_photos(db, &principal, &storage, &query)
        })
        .await?;
    Ok(Json(rows))
}
