//! Route plan endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::access::authorize;
use crate::access::permissions::names;
use crate::db::DbRoutePlan;
use crate::error::AppError;
use crate::services::activities::Paginated;
use crate::services::route_plans::{self, RoutePlanInput, RoutePlanListQuery};

use super::auth::AdminAuth;
use super::state::AppState;

pub async fn index(
    State(state): State<Arc<AppState>>,
    AdminAuth(principal): AdminAuth,
    Query(query): Query<RoutePlanListQuery>,
) -> Result<Json<Paginated<DbRoutePlan>>, AppError> {
    let page = state
        .with_db(move |db| {
            authorize(db, &principal, names::ROUTE_PLAN_VIEW)?;
            route_plans::list_route_plans(db, &principal, &query)
        })
        .await?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
pub struct MatchingQuery {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub district: String,
}

pub async fn matching(
    State(state): State<Arc<AppState>>,
    AdminAuth(principal): AdminAuth,
    Query(query): Query<MatchingQuery>,
) -> Result<Json<Vec<DbRoutePlan>>, AppError> {
    let plans = state
        .with_db(move |db| {
            authorize(db, &principal, names::ROUTE_PLAN_VIEW)?;
            route_plans::matching_route_plans(db, &principal, &query.state, &query.district)
        })
        .await?;
    Ok(Json(plans))
}

pub async fn show(
    State(state): State<Arc<AppState>>,
    AdminAuth(principal): AdminAuth,
    Path(id): Path<i64>,
) -> Result<Json<DbRoutePlan>, AppError> {
    let plan = state
        .with_db(move |db| {
            authorize(db, &principal, names::ROUTE_PLAN_VIEW)?;
            route_plans::show_route_plan(db, &principal, id)
        })
        .await?;
    Ok(Json(plan))
}

pub async fn store(
    State(state): State<Arc<AppState>>,
    AdminAuth(principal): AdminAuth,
    Json(input): Json<RoutePlanInput>,
) -> Result<(StatusCode, Json<DbRoutePlan>), AppError> {
    let plan = state
        .with_db(move |db| {
            authorize(db, &principal, names::ROUTE_PLAN_CREATE)?;
            route_plans::create_route_plan(db, &principal, &input)
        })
        .await?;
    Ok((StatusCode::CREATED, Json(plan)))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    AdminAuth(principal): AdminAuth,
    Path(id): Path<i64>,
    Json(input): Json<RoutePlanInput>,
) -> Result<Json<DbRoutePlan>, AppError> {
    let plan = state
        .with_db(move |db| {
            authorize(db, &principal, names::ROUTE_PLAN_UPDATE)?;
            route_plans::update_route_plan(db, &principal, id, &input)
        })
        .await?;
    Ok(Json(plan))
}

pub async fn destroy(
    State(state): State<Arc<AppState>>,
    AdminAuth(principal): AdminAuth,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state
        .with_db(move |db| {
            authorize(db, &principal, names::ROUTE_PLAN_DELETE)?;
            route_plans::delete_route_plan(db, &principal, id)
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
