//! Permission evaluation.
//!
//! Grants are additive: a direct grant, a grant through any held role, or
//! `super_admin` membership. Nothing subtracts. Promoters hold no permissions.

use crate::db::{DbError, FieldDb};
use crate::error::AppError;
use crate::principal::Principal;

/// Role that implicitly holds every permission in the catalogue.
pub const SUPER_ADMIN_ROLE: &str = "super_admin";
/// Built-in role with unrestricted state access.
pub const ADMIN_ROLE: &str = "admin";

/// Permission names checked by the HTTP layer.
pub mod names {
    pub const ACTIVITY_VIEW: &str = "activity_recce.view";
    pub const ACTIVITY_CREATE: &str = "activity_recce.create";
    pub const ACTIVITY_UPDATE: &str = "activity_recce.update";
    pub const ACTIVITY_APPROVE: &str = "activity_recce.approve";
    pub const ACTIVITY_DELETE: &str = "activity_recce.delete";
    pub const ROUTE_PLAN_VIEW: &str = "route_plan.view";
    pub const ROUTE_PLAN_CREATE: &str = "route_plan.create";
    pub const ROUTE_PLAN_UPDATE: &str = "route_plan.update";
    pub const ROUTE_PLAN_DELETE: &str = "route_plan.delete";
    pub const DASHBOARD_VIEW: &str = "dashboard.view";
    pub const USER_CREATE: &str = "user.create";
    pub const USER_UPDATE: &str = "user.update";
    pub const PROMOTER_VIEW: &str = "promoter.view";
    pub const PROMOTER_CREATE: &str = "promoter.create";
    pub const PROMOTER_UPDATE: &str = "promoter.update";
    pub const PROMOTER_DELETE: &str = "promoter.delete";
    pub const ROLE_VIEW: &str = "role.view";
    pub const ROLE_CREATE: &str = "role.create";
    pub const ROLE_UPDATE: &str = "role.update";
    pub const ROLE_DELETE: &str = "role.delete";
    pub const PERMISSION_VIEW: &str = "permission.view";
    pub const PERMISSION_CREATE: &str = "permission.create";
    pub const SETTINGS_VIEW: &str = "settings.view";
    pub const SETTINGS_UPDATE: &str = "settings.update";
}

/// True iff `principal` holds `permission`. Unknown names are never granted.
pub fn has_permission(
    db: &FieldDb,
    principal: &Principal,
    permission: &str,
) -> Result<bool, DbError> {
    match principal {
        Principal::Admin(admin) => db.user_has_permission(admin.user.id, permission),
        Principal::Promoter(_) => Ok(false),
    }
}

/// Whether `principal` sees every state.
///
/// Admins: `super_admin` or `admin` role, or no state assignment rows at all.
/// A user whose rows are all inactive does NOT qualify. Promoters: no state set.
pub fn has_all_state_access(principal: &Principal) -> bool {
    match principal {
        Principal::Admin(admin) => {
            admin.has_role(SUPER_ADMIN_ROLE)
                || admin.has_role(ADMIN_ROLE)
                || admin.states.is_empty()
        }
        Principal::Promoter(promoter) => promoter.state().is_none(),
    }
}

/// Require `permission`, failing closed: a store error denies.
pub fn authorize(db: &FieldDb, principal: &Principal, permission: &str) -> Result<(), AppError> {
    match has_permission(db, principal, permission) {
        Ok(true) => Ok(()),
        Ok(false) => {
            tracing::debug!(
                principal = %principal.cache_key(),
                permission,
                "Permission denied"
            );
            Err(AppError::Forbidden)
        }
        Err(e) => {
            tracing::warn!(
                principal = %principal.cache_key(),
                permission,
                error = %e,
                "Permission check failed, denying"
            );
            Err(AppError::Forbidden)
        }
    }
}
