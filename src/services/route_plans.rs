// Route plan service: scoped CRUD and the state+district soft join.

use rusqlite::types::Value;
use serde::Deserialize;

use crate::access::StateScope;
use crate::db::filter::normalize_key;
use crate::db::route_plans::RoutePlanWrite;
use crate::db::{DbRoutePlan, FieldDb};
use crate::error::{AppError, ValidationErrors};
use crate::principal::Principal;
use crate::types::RoutePlanStatus;

use super::activities::{PageRequest, Paginated};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoutePlanInput {
    pub state: Option<String>,
    pub district: Option<String>,
    pub sub_district: Option<String>,
    pub village: Option<String>,
    pub village_code: Option<String>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub wall_count: Option<i64>,
    pub status: Option<String>,
}

fn clean(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl RoutePlanInput {
    /// Validate into a write. Area is always derived from width × height.
    pub fn validate(&self, scope: &StateScope) -> Result<RoutePlanWrite, AppError> {
        let mut errors = ValidationErrors::new();
        let state = clean(&self.state);
        let district = clean(&self.district);
        if state.is_none() {
            errors.add("state", "The state field is required.");
        } else if !scope.allows(state.as_deref()) {
            errors.add("state", "The selected state is not assigned to you.");
        }
        if district.is_none() {
            errors.add("district", "The district field is required.");
        }
        for (field, value) in [("width", self.width), ("height", self.height)] {
            if value.is_some_and(|v| !v.is_finite() || v < 0.0) {
                errors.add(field, format!("The {field} must be at least 0."));
            }
        }
        let wall_count = self.wall_count.unwrap_or(0);
        if wall_count < 0 {
            errors.add("wall_count", "The wall_count must be at least 0.");
        }
        let status = match self.status.as_deref().filter(|s| !s.trim().is_empty()) {
            None => RoutePlanStatus::Pending,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                errors.add("status", "The selected status is invalid.");
                RoutePlanStatus::Pending
            }),
        };

        errors.into_result(RoutePlanWrite {
            state: state.unwrap_or_default(),
            district: district.unwrap_or_default(),
            sub_district: clean(&self.sub_district),
            village: clean(&self.village),
            village_code: clean(&self.village_code),
            width: self.width,
            height: self.height,
            wall_count,
            status: status.as_str().to_string(),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoutePlanListQuery {
    pub state: Option<String>,
    pub district: Option<String>,
    pub status: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

pub fn list_route_plans(
    db: &FieldDb,
    principal: &Principal,
    query: &RoutePlanListQuery,
) -> Result<Paginated<DbRoutePlan>, AppError> {
    let mut filter = StateScope::for_principal(principal).filter("state");
    for (column, value) in [("state", &query.state), ("district", &query.district)] {
        if let Some(v) = clean(value) {
            filter.push(
                format!("LOWER(TRIM({column})) = ?"),
                [Value::Text(normalize_key(&v))],
            );
        }
    }
    if let Some(status) = clean(&query.status) {
        let status: RoutePlanStatus = status
            .parse()
            .map_err(|_| AppError::validation("status", "The selected status is invalid."))?;
        filter.push("status = ?", [Value::Text(status.as_str().to_string())]);
    }
    let page = PageRequest::new(query.page, query.per_page);
    let total = db.count_route_plans(&filter)?;
    let data = db.list_route_plans(&filter, page.per_page, page.offset())?;
    Ok(Paginated::new(data, total, &page))
}

pub fn show_route_plan(db: &FieldDb, principal: &Principal, id: i64) -> Result<DbRoutePlan, AppError> {
    let scope = StateScope::for_principal(principal);
    db.get_route_plan_filtered(id, &scope.filter("state"))?
        .ok_or_else(|| AppError::not_found("Route plan"))
}

/// Plans whose state and district match the given values (trimmed, case-insensitive).
pub fn matching_route_plans(
    db: &FieldDb,
    principal: &Principal,
    state: &str,
    district: &str,
) -> Result<Vec<DbRoutePlan>, AppError> {
    let mut errors = ValidationErrors::new();
    if state.trim().is_empty() {
        errors.add("state", "The state field is required.");
    }
    if district.trim().is_empty() {
        errors.add("district", "The district field is required.");
    }
    errors.into_result(())?;
    let scope = StateScope::for_principal(principal);
    Ok(db.find_route_plans_matching(state, district, &scope.filter("state"))?)
}

fn ensure_village_code_free(
    db: &FieldDb,
    village_code: Option<&str>,
    own_id: Option<i64>,
) -> Result<(), AppError> {
    if let Some(code) = village_code {
        if let Some(existing) = db.get_route_plan_by_village_code(code)? {
            if Some(existing.id) != own_id {
                return Err(AppError::conflict(
                    "village_code",
                    "The village_code has already been taken.",
                ));
            }
        }
    }
    Ok(())
}

/// Map a store unique violation on the village code index to a Conflict.
fn village_code_conflict(err: crate::db::DbError) -> AppError {
    if err.is_unique_violation() {
        AppError::conflict("village_code", "The village_code has already been taken.")
    } else {
        err.into()
    }
}

pub fn create_route_plan(
    db: &FieldDb,
    principal: &Principal,
    input: &RoutePlanInput,
) -> Result<DbRoutePlan, AppError> {
    let scope = StateScope::for_principal(principal);
    let write = input.validate(&scope)?;
    let id = db.with_transaction(|tx| {
        ensure_village_code_free(tx, write.village_code.as_deref(), None)?;
        tx.create_route_plan(&write).map_err(village_code_conflict)
    })?;
    tracing::info!(route_plan_id = id, by = %principal.cache_key(), "Route plan created");
    db.get_route_plan(id)?
        .ok_or_else(|| AppError::not_found("Route plan"))
}

pub fn update_route_plan(
    db: &FieldDb,
    principal: &Principal,
    id: i64,
    input: &RoutePlanInput,
) -> Result<DbRoutePlan, AppError> {
    let scope = StateScope::for_principal(principal);
    show_route_plan(db, principal, id)?;
    let write = input.validate(&scope)?;
    db.with_transaction(|tx| {
        ensure_village_code_free(tx, write.village_code.as_deref(), Some(id))?;
        tx.update_route_plan(id, &write).map_err(village_code_conflict)
    })?;
    db.get_route_plan(id)?
        .ok_or_else(|| AppError::not_found("Route plan"))
}

pub fn delete_route_plan(db: &FieldDb, principal: &Principal, id: i64) -> Result<(), AppError> {
    show_route_plan(db, principal, id)?;
    db.delete_route_plan(id)?;
    tracing::info!(route_plan_id = id, by = %principal.cache_key(), "Route plan deleted");
    Ok(())
}
