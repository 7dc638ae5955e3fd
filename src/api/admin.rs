//! Role, permission, user and promoter administration endpoints.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::access::authorize;
use crate::access::permissions::names;
use crate::db::{DbPermission, DbPromoter};
use crate::error::AppError;
use crate::principal::AdminUser;
use crate::services::promoters::{self, PromoterInput, PromoterListQuery};
use crate::services::rbac::{
    self, NameList, PermissionInput, RoleInput, RoleWithPermissions, UserInput, UserPermissions,
};

use super::auth::AdminAuth;
use super::state::AppState;

// =============================================================================
// Roles
// =============================================================================

pub async fn list_roles(
    State(state): State<Arc<AppState>>,
    AdminAuth(principal): AdminAuth,
) -> Result<Json<Vec<RoleWithPermissions>>, AppError> {
    let roles = state
        .with_db(move |db| {
            authorize(db, &principal, names::ROLE_VIEW)?;
            rbac::list_roles(db)
        })
        .await?;
    Ok(Json(roles))
}

pub async fn create_role(
    State(state): State<Arc<AppState>>,
    AdminAuth(principal): AdminAuth,
    Json(input): Json<RoleInput>,
) -> Result<(StatusCode, Json<RoleWithPermissions>), AppError> {
    let role = state
        .with_db(move |db| {
            authorize(db, &principal, names::ROLE_CREATE)?;
            rbac::create_role(db, &principal, &input)
        })
        .await?;
    Ok((StatusCode::CREATED, Json(role)))
}

pub async fn sync_role_permissions(
    State(state): State<Arc<AppState>>,
    AdminAuth(principal): AdminAuth,
    Path(id): Path<i64>,
    Json(body): Json<NameList>,
) -> Result<Json<RoleWithPermissions>, AppError> {
    let role = state
        .with_db(move |db| {
            authorize(db, &principal, names::ROLE_UPDATE)?;
            rbac::sync_role_permissions(db, &principal, id, &body.names)
        })
        .await?;
    Ok(Json(role))
}

pub async fn delete_role(
    State(state): State<Arc<AppState>>,
    AdminAuth(principal): AdminAuth,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state
        .with_db(move |db| {
            authorize(db, &principal, names::ROLE_DELETE)?;
            rbac::delete_role(db, &principal, id)
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Permissions
// =============================================================================

pub async fn list_permissions(
    State(state): State<Arc<AppState>>,
    AdminAuth(principal): AdminAuth,
) -> Result<Json<BTreeMap<String, Vec<DbPermission>>>, AppError> {
    let grouped = state
        .with_db(move |db| {
            authorize(db, &principal, names::PERMISSION_VIEW)?;
            rbac::permissions_by_module(db)
        })
        .await?;
    Ok(Json(grouped))
}

pub async fn create_permission(
    State(state): State<Arc<AppState>>,
    AdminAuth(principal): AdminAuth,
    Json(input): Json<PermissionInput>,
) -> Result<(StatusCode, Json<DbPermission>), AppError> {
    let permission = state
        .with_db(move |db| {
            authorize(db, &principal, names::PERMISSION_CREATE)?;
            rbac::create_permission(db, &principal, &input)
        })
        .await?;
    Ok((StatusCode::CREATED, Json(permission)))
}

// =============================================================================
// Users
// =============================================================================

pub async fn create_user(
    State(state): State<Arc<AppState>>,
    AdminAuth(principal): AdminAuth,
    Json(input): Json<UserInput>,
) -> Result<(StatusCode, Json<AdminUser>), AppError> {
    let user = state
        .with_db(move |db| {
            authorize(db, &principal, names::USER_CREATE)?;
            rbac::create_user(db, &principal, &input)
        })
        .await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn sync_user_roles(
    State(state): State<Arc<AppState>>,
    AdminAuth(principal): AdminAuth,
    Path(id): Path<i64>,
    Json(body): Json<NameList>,
) -> Result<Json<AdminUser>, AppError> {
    let user = state
        .with_db(move |db| {
            authorize(db, &principal, names::USER_UPDATE)?;
            rbac::sync_user_roles(db, &principal, id, &body.names)
        })
        .await?;
    Ok(Json(user))
}

pub async fn sync_user_permissions(
    State(state): State<Arc<AppState>>,
    AdminAuth(principal): AdminAuth,
    Path(id): Path<i64>,
    Json(body): Json<NameList>,
) -> Result<Json<UserPermissions>, AppError> {
    let permissions = state
        .with_db(move |db| {
            authorize(db, &principal, names::USER_UPDATE)?;
            rbac::sync_user_permissions(db, &principal, id, &body.names)
        })
        .await?;
    Ok(Json(permissions))
}

pub async fn sync_user_states(
    State(state): State<Arc<AppState>>,
    AdminAuth(principal): AdminAuth,
    Path(id): Path<i64>,
    Json(body): Json<NameList>,
) -> Result<Json<AdminUser>, AppError> {
    let user = state
        .with_db(move |db| {
            authorize(db, &principal, names::USER_UPDATE)?;
            rbac::sync_user_states(db, &principal, id, &body.names)
        })
        .await?;
    Ok(Json(user))
}

// =============================================================================
// Promoters
// =============================================================================

pub async fn list_promoters(
    State(state): State<Arc<AppState>>,
    AdminAuth(principal): AdminAuth,
    Query(query): Query<PromoterListQuery>,
) -> Result<Json<Vec<DbPromoter>>, AppError> {
    let rows = state
        .with_db(move |db| {
            authorize(db, &principal, names::PROMOTER_VIEW)?;
            promoters::list_promoters(db, &principal, &query)
        })
        .await?;
    Ok(Json(rows))
}

pub async fn create_promoter(
    State(state): State<Arc<AppState>>,
    AdminAuth(principal): AdminAuth,
    Json(input): Json<PromoterInput>,
) -> Result<(StatusCode, Json<DbPromoter>), AppError> {
    let promoter = state
        .with_db(move |db| {
            authorize(db, &principal, names::PROMOTER_CREATE)?;
            promoters::create_promoter(db, &principal, &input)
        })
        .await?;
    Ok((StatusCode::CREATED, Json(promoter)))
}

#[derive(Debug, Deserialize)]
pub struct PromoterStatusRequest {
    pub status: Option<String>,
}

pub async fn set_promoter_status(
    State(state): State<Arc<AppState>>,
    AdminAuth(principal): AdminAuth,
    Path(id): Path<i64>,
    Json(req): Json<PromoterStatusRequest>,
) -> Result<Json<DbPromoter>, AppError> {
    let promoter = state
        .with_db(move |db| {
            authorize(db, &principal, names::PROMOTER_UPDATE)?;
            promoters::set_promoter_status(db, &principal, id, req.status.as_deref())
        })
        .await?;
    Ok(Json(promoter))
}

pub async fn delete_promoter(
    State(state): State<Arc<AppState>>,
    AdminAuth(principal): AdminAuth,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state
        .with_db(move |db| {
            authorize(db, &principal, names::PROMOTER_DELETE)?;
            promoters::delete_promoter(db, &principal, id)
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
