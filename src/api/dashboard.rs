//! Dashboard analytics endpoint.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use crate::access::authorize;
use crate::access::permissions::names;
use crate::error::AppError;
use crate::services::dashboard::{compute_stats, CacheKey, DateRange, StatsBundle};

use super::auth::AdminAuth;
use super::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct AnalyticsQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

/// Scoped stats, cached per (range, principal) for the configured TTL.
pub async fn analytics(
    State(state): State<Arc<AppState>>,
    AdminAuth(principal): AdminAuth,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<StatsBundle>, AppError> {
    let today = chrono::Utc::now().date_naive();
    let range = DateRange::resolve(
        query.start_date.as_deref(),
        query.end_date.as_deref(),
        today,
    )?;
    let shared = Arc::clone(&state);
    let stats = state
        .with_db(move |db| {
            authorize(db, &principal, names::DASHBOARD_VIEW)?;
            let key = CacheKey {
                range,
                principal: principal.cache_key(),
            };
            shared
                .dashboard_cache
                .get_or_compute(key, || compute_stats(db, &range, &principal))
        })
        .await?;
    Ok(Json(stats.as_ref().clone()))
}
