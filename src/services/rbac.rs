// Roles, permissions and user administration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::access::permissions::SUPER_ADMIN_ROLE;
use crate::db::{DbError, DbPermission, DbRole, DbUser, FieldDb};
use crate::error::{AppError, ValidationErrors};
use crate::principal::{AdminUser, Principal};
use crate::types::PrincipalStatus;

use super::auth::{hash_password, MIN_PASSWORD_LEN};

fn clean(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn unique_conflict(field: &'static str, message: &'static str) -> impl Fn(DbError) -> AppError {
    move |err| {
        if err.is_unique_violation() {
            AppError::conflict(field, message)
        } else {
            err.into()
        }
    }
}

// =============================================================================
// Roles
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct RoleWithPermissions {
    #[serde(flatten)]
    pub role: DbRole,
    pub permissions: Vec<String>,
}

pub fn list_roles(db: &FieldDb) -> Result<Vec<RoleWithPermissions>, AppError> {
    let roles = db.list_roles()?;
    let mut out = Vec::with_capacity(roles.len());
    for role in roles {
        out.push(RoleWithPermissions {
            permissions: db.role_permission_names(role.id)?,
            role,
        });
    }
    Ok(out)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoleInput {
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

pub fn create_role(
    db: &FieldDb,
    principal: &Principal,
    input: &RoleInput,
) -> Result<RoleWithPermissions, AppError> {
    let name = clean(&input.name)
        .ok_or_else(|| AppError::validation("name", "The name field is required."))?;
    let role_id = db.with_transaction(|tx| -> Result<i64, AppError> {
        if tx.get_role_by_name(&name)?.is_some() {
            return Err(AppError::conflict("name", "The name has already been taken."));
        }
        let permission_ids = resolve_permission_ids(tx, &input.permissions)?;
        let id = tx
            .create_role(
                &name,
                clean(&input.display_name).as_deref(),
                clean(&input.description).as_deref(),
            )
            .map_err(unique_conflict("name", "The name has already been taken."))?;
        tx.sync_role_permissions(id, &permission_ids)?;
        Ok(id)
    })?;
    tracing::info!(role_id, role = %name, by = %principal.cache_key(), "Role created");
    role_with_permissions(db, role_id)
}

fn role_with_permissions(db: &FieldDb, role_id: i64) -> Result<RoleWithPermissions, AppError> {
    let role = db.get_role(role_id)?.ok_or_else(|| AppError::not_found("Role"))?;
    Ok(RoleWithPermissions {
        permissions: db.role_permission_names(role.id)?,
        role,
    })
}

/// Map permission names to ids. Every unknown name is reported.
fn resolve_permission_ids(db: &FieldDb, names: &[String]) -> Result<Vec<i64>, AppError> {
    let mut errors = ValidationErrors::new();
    let mut ids = Vec::with_capacity(names.len());
    for name in names {
        match db.get_permission_by_name(name.trim())? {
            Some(p) => ids.push(p.id),
            None => errors.add("permissions", format!("Unknown permission '{}'.", name.trim())),
        }
    }
    errors.into_result(ids)
}

fn resolve_role_ids(db: &FieldDb, names: &[String]) -> Result<Vec<i64>, AppError> {
    let mut errors = ValidationErrors::new();
    let mut ids = Vec::with_capacity(names.len());
    for name in names {
        match db.get_role_by_name(name.trim())? {
            Some(r) => ids.push(r.id),
            None => errors.add("roles", format!("Unknown role '{}'.", name.trim())),
        }
    }
    errors.into_result(ids)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NameList {
    #[serde(default, alias = "permissions", alias = "roles", alias = "states")]
    pub names: Vec<String>,
}

pub fn sync_role_permissions(
    db: &FieldDb,
    principal: &Principal,
    role_id: i64,
    permissions: &[String],
) -> Result<RoleWithPermissions, AppError> {
    db.with_transaction(|tx| {
        tx.get_role(role_id)?.ok_or_else(|| AppError::not_found("Role"))?;
        let ids = resolve_permission_ids(tx, permissions)?;
        tx.sync_role_permissions(role_id, &ids)?;
        Ok::<_, AppError>(())
    })?;
    tracing::info!(role_id, count = permissions.len(), by = %principal.cache_key(), "Role permissions synced");
    role_with_permissions(db, role_id)
}

pub fn delete_role(db: &FieldDb, principal: &Principal, role_id: i64) -> Result<(), AppError> {
    let role = db.get_role(role_id)?.ok_or_else(|| AppError::not_found("Role"))?;
    if role.name == SUPER_ADMIN_ROLE {
        return Err(AppError::validation(
            "role",
            "The super_admin role cannot be deleted.",
        ));
    }
    db.delete_role(role_id)?;
    tracing::info!(role_id, role = %role.name, by = %principal.cache_key(), "Role deleted");
    Ok(())
}

// =============================================================================
// Permissions
// =============================================================================

/// `module -> permissions`, modules in name order.
pub fn permissions_by_module(db: &FieldDb) -> Result<BTreeMap<String, Vec<DbPermission>>, AppError> {
    let mut grouped: BTreeMap<String, Vec<DbPermission>> = BTreeMap::new();
    for permission in db.list_permissions()? {
        grouped
            .entry(permission.module.clone())
            .or_default()
            .push(permission);
    }
    Ok(grouped)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PermissionInput {
    pub name: Option<String>,
    pub module: Option<String>,
    pub description: Option<String>,
}

/// Names are `module.action`. The module defaults to the prefix before the first dot.
pub fn create_permission(
    db: &FieldDb,
    principal: &Principal,
    input: &PermissionInput,
) -> Result<DbPermission, AppError> {
    let name = clean(&input.name)
        .ok_or_else(|| AppError::validation("name", "The name field is required."))?;
    let Some((prefix, action)) = name.split_once('.') else {
        return Err(AppError::validation(
            "name",
            "The name must have the form module.action.",
        ));
    };
    if prefix.is_empty() || action.is_empty() {
        return Err(AppError::validation(
            "name",
            "The name must have the form module.action.",
        ));
    }
    let module = clean(&input.module).unwrap_or_else(|| prefix.to_string());
    if db.get_permission_by_name(&name)?.is_some() {
        return Err(AppError::conflict("name", "The name has already been taken."));
    }
    db.create_permission(&name, &module, clean(&input.description).as_deref())
        .map_err(unique_conflict("name", "The name has already been taken."))?;
    tracing::info!(permission = %name, by = %principal.cache_key(), "Permission created");
    db.get_permission_by_name(&name)?
        .ok_or_else(|| AppError::not_found("Permission"))
}

// =============================================================================
// Users
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserInput {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub states: Vec<String>,
}

impl UserInput {
    fn validate(&self) -> Result<(String, String, String, PrincipalStatus), AppError> {
        let mut errors = ValidationErrors::new();
        let name = clean(&self.name);
        let email = clean(&self.email).map(|e| e.to_lowercase());
        let password = self.password.clone().unwrap_or_default();
        if name.is_none() {
            errors.add("name", "The name field is required.");
        }
        match &email {
            None => errors.add("email", "The email field is required."),
            Some(e) if !is_plausible_email(e) => {
                errors.add("email", "The email must be a valid email address.")
            }
            Some(_) => {}
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            errors.add(
                "password",
                format!("The password must be at least {MIN_PASSWORD_LEN} characters."),
            );
        }
        let status = match clean(&self.status) {
            None => PrincipalStatus::Active,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                errors.add("status", "The selected status is invalid.");
                PrincipalStatus::Active
            }),
        };
        errors.into_result((
            name.unwrap_or_default(),
            email.unwrap_or_default(),
            password,
            status,
        ))
    }
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    }
}

fn email_conflict(field: &'static str) -> AppError {
    AppError::conflict(field, "The email has already been taken.")
}

pub fn create_user(db: &FieldDb, principal: &Principal, input: &UserInput) -> Result<AdminUser, AppError> {
    let user_id = insert_user(db, input)?;
    tracing::info!(user_id, by = %principal.cache_key(), "User created");
    load_admin(db, user_id)
}

/// Validate and insert with roles and states attached. Shared with the console.
pub(crate) fn insert_user(db: &FieldDb, input: &UserInput) -> Result<i64, AppError> {
    let (name, email, password, status) = input.validate()?;
    let hash = hash_password(&password)?;
    let user_id = db.with_transaction(|tx| -> Result<i64, AppError> {
        if tx.get_user_by_email(&email)?.is_some() {
            return Err(email_conflict("email"));
        }
        let role_ids = resolve_role_ids(tx, &input.roles)?;
        let id = tx
            .create_user(&name, &email, &hash, status.as_str())
            .map_err(|e| {
                if e.is_unique_violation() {
                    email_conflict("email")
                } else {
                    e.into()
                }
            })?;
        tx.sync_user_roles(id, &role_ids)?;
        tx.sync_user_states(id, &trimmed(&input.states))?;
        Ok(id)
    })?;
    Ok(user_id)
}

fn trimmed(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

fn load_admin(db: &FieldDb, user_id: i64) -> Result<AdminUser, AppError> {
    AdminUser::load(db, user_id)?.ok_or_else(|| AppError::not_found("User"))
}

fn require_user(db: &FieldDb, user_id: i64) -> Result<DbUser, AppError> {
    db.get_user(user_id)?.ok_or_else(|| AppError::not_found("User"))
}

pub fn sync_user_roles(
    db: &FieldDb,
    principal: &Principal,
    user_id: i64,
    roles: &[String],
) -> Result<AdminUser, AppError> {
    db.with_transaction(|tx| {
        require_user(tx, user_id)?;
        let ids = resolve_role_ids(tx, roles)?;
        tx.sync_user_roles(user_id, &ids)?;
        Ok::<_, AppError>(())
    })?;
    tracing::info!(user_id, by = %principal.cache_key(), "User roles synced");
    load_admin(db, user_id)
}

#[derive(Debug, Clone, Serialize)]
pub struct UserPermissions {
    pub user_id: i64,
    pub direct: Vec<String>,
    pub effective: Vec<String>,
}

pub fn sync_user_permissions(
    db: &FieldDb,
    principal: &Principal,
    user_id: i64,
    permissions: &[String],
) -> Result<UserPermissions, AppError> {
    db.with_transaction(|tx| {
        require_user(tx, user_id)?;
        let ids = resolve_permission_ids(tx, permissions)?;
        tx.sync_user_permissions(user_id, &ids)?;
        Ok::<_, AppError>(())
    })?;
    tracing::info!(user_id, by = %principal.cache_key(), "User permissions synced");
    Ok(UserPermissions {
        user_id,
        direct: db.user_direct_permission_names(user_id)?,
        effective: db.user_effective_permissions(user_id)?,
    })
}

/// Replace the user's state assignments. States left out are removed.
pub fn sync_user_states(
    db: &FieldDb,
    principal: &Principal,
    user_id: i64,
    states: &[String],
) -> Result<AdminUser, AppError> {
    db.with_transaction(|tx| {
        require_user(tx, user_id)?;
        tx.sync_user_states(user_id, &trimmed(states))?;
        Ok::<_, AppError>(())
    })?;
    tracing::info!(user_id, by = %principal.cache_key(), "User states synced");
    load_admin(db, user_id)
}
