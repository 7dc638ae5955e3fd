// Promoter administration, scoped by the promoter's state.

use rusqlite::types::Value;
use serde::Deserialize;

use crate::access::StateScope;
use crate::db::filter::normalize_key;
use crate::db::identity::NewPromoter;
use crate::db::{DbPromoter, FieldDb};
use crate::error::{AppError, ValidationErrors};
use crate::principal::Principal;
use crate::types::PrincipalStatus;

use super::auth::{hash_password, MIN_PASSWORD_LEN};

const USERNAME_TAKEN: &str = "The username has already been taken.";

fn clean(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PromoterInput {
    pub name: Option<String>,
    pub username: Option<String>,
    pub phone: Option<String>,
    pub password: Option<String>,
    pub state: Option<String>,
    pub district: Option<String>,
    pub status: Option<String>,
}

pub fn create_promoter(
    db: &FieldDb,
    principal: &Principal,
    input: &PromoterInput,
) -> Result<DbPromoter, AppError> {
    let scope = StateScope::for_principal(principal);
    let mut errors = ValidationErrors::new();
    let name = clean(&input.name);
    let username = clean(&input.username);
    let state = clean(&input.state);
    let password = input.password.clone().unwrap_or_default();
    if name.is_none() {
        errors.add("name", "The name field is required.");
    }
    match &username {
        None => errors.add("username", "The username field is required."),
        Some(u) if u.chars().any(char::is_whitespace) => {
            errors.add("username", "The username may not contain spaces.")
        }
        Some(_) => {}
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        errors.add(
            "password",
            format!("The password must be at least {MIN_PASSWORD_LEN} characters."),
        );
    }
    if !scope.allows(state.as_deref()) {
        errors.add("state", "The selected state is not assigned to you.");
    }
    let status = match clean(&input.status) {
        None => PrincipalStatus::Active,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            errors.add("status", "The selected status is invalid.");
            PrincipalStatus::Active
        }),
    };
    errors.into_result(())?;

    let username = username.unwrap_or_default();
    let hash = hash_password(&password)?;
    let phone = clean(&input.phone);
    let district = clean(&input.district);
    let id = db.with_transaction(|tx| -> Result<i64, AppError> {
        if tx.get_promoter_by_username(&username)?.is_some() {
            return Err(AppError::conflict("username", USERNAME_TAKEN));
        }
        tx.create_promoter(&NewPromoter {
            name: name.as_deref().unwrap_or_default(),
            username: &username,
            phone: phone.as_deref(),
            password_hash: &hash,
            state: state.as_deref(),
            district: district.as_deref(),
            status: status.as_str(),
        })
        .map_err(|e| {
            if e.is_unique_violation() {
                AppError::conflict("username", USERNAME_TAKEN)
            } else {
                e.into()
            }
        })
    })?;
    tracing::info!(promoter_id = id, by = %principal.cache_key(), "Promoter created");
    db.get_promoter(id)?
        .ok_or_else(|| AppError::not_found("Promoter"))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PromoterListQuery {
    pub status: Option<String>,
    pub state: Option<String>,
    pub search: Option<String>,
}

pub fn list_promoters(
    db: &FieldDb,
    principal: &Principal,
    query: &PromoterListQuery,
) -> Result<Vec<DbPromoter>, AppError> {
    let mut filter = StateScope::for_principal(principal).filter("state");
    if let Some(status) = clean(&query.status) {
        let status: PrincipalStatus = status
            .parse()
            .map_err(|_| AppError::validation("status", "The selected status is invalid."))?;
        filter.push("status = ?", [Value::Text(status.as_str().to_string())]);
    }
    if let Some(state) = clean(&query.state) {
        filter.push("LOWER(TRIM(state)) = ?", [Value::Text(normalize_key(&state))]);
    }
    if let Some(search) = clean(&query.search) {
        let like = format!("%{}%", search.to_lowercase());
        filter.push(
            "(LOWER(name) LIKE ? OR LOWER(username) LIKE ?)",
            [Value::Text(like.clone()), Value::Text(like)],
        );
    }
    Ok(db.list_promoters(&filter)?)
}

/// Load a promoter the caller may see. Out-of-scope promoters read as missing.
fn scoped_promoter(db: &FieldDb, principal: &Principal, id: i64) -> Result<DbPromoter, AppError> {
    let promoter = db
        .get_promoter(id)?
        .ok_or_else(|| AppError::not_found("Promoter"))?;
    if StateScope::for_principal(principal).allows(promoter.state.as_deref()) {
        Ok(promoter)
    } else {
        Err(AppError::not_found("Promoter"))
    }
}

pub fn set_promoter_status(
    db: &FieldDb,
    principal: &Principal,
    id: i64,
    status: Option<&str>,
) -> Result<DbPromoter, AppError> {
    let status: PrincipalStatus = status
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::validation("status", "The status field is required."))?
        .parse()
        .map_err(|_| AppError::validation("status", "The selected status is invalid."))?;
    scoped_promoter(db, principal, id)?;
    db.set_promoter_status(id, status.as_str())?;
    tracing::info!(promoter_id = id, status = %status, by = %principal.cache_key(), "Promoter status changed");
    scoped_promoter(db, principal, id)
}

/// Delete a promoter that has never submitted a recce. Referenced promoters are kept.
pub fn delete_promoter(db: &FieldDb, principal: &Principal, id: i64) -> Result<(), AppError> {
    scoped_promoter(db, principal, id)?;
    db.with_transaction(|tx| -> Result<(), AppError> {
        if tx.count_recces_for_promoter(id)? > 0 {
            return Err(promoter_in_use());
        }
        tx.delete_promoter(id).map_err(|e| {
            if e.is_foreign_key_violation() {
                promoter_in_use()
            } else {
                e.into()
            }
        })?;
        Ok(())
    })?;
    tracing::info!(promoter_id = id, by = %principal.cache_key(), "Promoter deleted");
    Ok(())
}

fn promoter_in_use() -> AppError {
    AppError::conflict(
        "promoter",
        "The promoter has submitted activities and cannot be deleted.",
    )
}
