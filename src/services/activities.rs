// Activity recce service: admin listing, review and deletion, plus the record
// shape shared with mobile ingestion.

use std::collections::HashMap;

use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

use crate::access::permissions::names;
use crate::access::StateScope;
use crate::config::StorageConfig;
use crate::db::activities::DbReccePhotos;
use crate::db::filter::normalize_key;
use crate::db::{DbActivityRecce, DbError, DbPromoter, DbRoutePlan, FieldDb, SqlFilter};
use crate::error::AppError;
use crate::principal::Principal;
use crate::types::ActivityStatus;

pub const DEFAULT_PER_PAGE: i64 = 15;
pub const MAX_PER_PAGE: i64 = 100;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PromoterSummary {
    pub id: i64,
    pub name: String,
    pub username: String,
}

impl From<&DbPromoter> for PromoterSummary {
    fn from(p: &DbPromoter) -> Self {
        Self {
            id: p.id,
            name: p.name.clone(),
            username: p.username.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RoutePlanSummary {
    pub id: i64,
    pub village_code: Option<String>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub wall_count: i64,
    pub status: String,
}

impl From<&DbRoutePlan> for RoutePlanSummary {
    fn from(p: &DbRoutePlan) -> Self {
        Self {
            id: p.id,
            village_code: p.village_code.clone(),
            width: p.width,
            height: p.height,
            wall_count: p.wall_count,
            status: p.status.clone(),
        }
    }
}

/// A persisted recce with its promoter and route plan summaries.
#[derive(Debug, Clone, Serialize)]
pub struct RecceRecord {
    #[serde(flatten)]
    pub recce: DbActivityRecce,
    pub promoter: Option<PromoterSummary>,
    pub route_plan: Option<RoutePlanSummary>,
}

impl RecceRecord {
    /// Rewrite stored photo paths as public URLs.
    pub fn with_public_photos(mut self, storage: &StorageConfig) -> Self {
        self.recce.photos = self
            .recce
            .photos
            .iter()
            .map(|p| storage.public_url(p))
            .collect();
        self
    }
}

/// Attach summaries to a recce row. `plan_id = 0` never has a plan.
pub fn build_record(db: &FieldDb, recce: DbActivityRecce) -> Result<RecceRecord, DbError> {
    let promoter = db.get_promoter(recce.promoter_id)?;
    let route_plan = if recce.plan_id > 0 {
        db.get_route_plan(recce.plan_id)?
    } else {
        None
    };
    Ok(RecceRecord {
        promoter: promoter.as_ref().map(PromoterSummary::from),
        route_plan: route_plan.as_ref().map(RoutePlanSummary::from),
        recce,
    })
}

/// Load a recce by id with its summaries.
pub fn load_record(db: &FieldDb, id: i64) -> Result<Option<RecceRecord>, DbError> {
    match db.get_recce(id)? {
        Some(recce) => Ok(Some(build_record(db, recce)?)),
        None => Ok(None),
    }
}

/// One page of results.
#[derive(Debug, Clone, Serialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub last_page: i64,
}

impl<T> Paginated<T> {
    pub fn new(data: Vec<T>, total: i64, page: &PageRequest) -> Self {
        let last_page = if total == 0 {
            1
        } else {
            (total + page.per_page - 1) / page.per_page
        };
        Self {
            data,
            total,
            page: page.page,
            per_page: page.per_page,
            last_page,
        }
    }
}

/// Normalized `page`/`per_page` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub per_page: i64,
}

impl PageRequest {
    pub fn new(page: Option<i64>, per_page: Option<i64>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE),
        }
    }

    /// Saturates instead of overflowing on absurd page numbers.
    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.per_page)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActivityListQuery {
    pub status: Option<String>,
    pub state: Option<String>,
    pub district: Option<String>,
    pub promoter_id: Option<i64>,
    pub plan_id: Option<i64>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// Build the WHERE clause for an activity listing. Scope is always applied first.
pub fn activity_filter(scope: &StateScope, query: &ActivityListQuery) -> Result<SqlFilter, AppError> {
    let mut filter = scope.filter("state");

    if let Some(status) = query.status.as_deref().filter(|s| !s.trim().is_empty()) {
        let status: ActivityStatus = status
            .parse()
            .map_err(|_| AppError::validation("status", "The selected status is invalid."))?;
        filter.push("status = ?", [Value::Text(status.as_str().to_string())]);
    }
    for (column, value) in [("state", &query.state), ("district", &query.district)] {
        if let Some(v) = value.as_deref().filter(|v| !v.trim().is_empty()) {
            filter.push(
                format!("LOWER(TRIM({column})) = ?"),
                [Value::Text(normalize_key(v))],
            );
        }
    }
    if let Some(promoter_id) = query.promoter_id {
        filter.push("promoter_id = ?", [Value::Integer(promoter_id)]);
    }
    if let Some(plan_id) = query.plan_id {
        filter.push("plan_id = ?", [Value::Integer(plan_id)]);
    }
    if let Some(start) = query.start_date.as_deref().filter(|s| !s.trim().is_empty()) {
        let day = parse_day("start_date", start)?;
        filter.push("visit_date >= ?", [Value::Text(format!("{day} 00:00:00"))]);
    }
    if let Some(end) = query.end_date.as_deref().filter(|s| !s.trim().is_empty()) {
        let day = parse_day("end_date", end)?;
        filter.push("visit_date <= ?", [Value::Text(format!("{day} 23:59:59"))]);
    }
    if let Some(term) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let like = format!("%{}%", term);
        filter.push(
            "(location LIKE ? OR village LIKE ? OR village_code LIKE ? OR wall_code LIKE ? OR landmark LIKE ?)",
            std::iter::repeat(Value::Text(like)).take(5),
        );
    }
    Ok(filter)
}

pub(crate) fn parse_day(field: &str, raw: &str) -> Result<chrono::NaiveDate, AppError> {
    chrono::NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::validation(field, format!("The {field} must be a date (YYYY-MM-DD).")))
}

pub fn list_activities(
    db: &FieldDb,
    principal: &Principal,
    query: &ActivityListQuery,
) -> Result<Paginated<RecceRecord>, AppError> {
    let scope = StateScope::for_principal(principal);
    let filter = activity_filter(&scope, query)?;
    let page = PageRequest::new(query.page, query.per_page);

    let total = db.count_recces(&filter)?;
    let rows = db.list_recces(&filter, page.per_page, page.offset())?;

    // Promoters and plans repeat heavily within a page.
    let mut promoters: HashMap<i64, Option<PromoterSummary>> = HashMap::new();
    let mut plans: HashMap<i64, Option<RoutePlanSummary>> = HashMap::new();
    let mut data = Vec::with_capacity(rows.len());
    for recce in rows {
        let promoter = match promoters.get(&recce.promoter_id) {
            Some(cached) => cached.clone(),
            None => {
                let summary = db.get_promoter(recce.promoter_id)?.as_ref().map(PromoterSummary::from);
                promoters.insert(recce.promoter_id, summary.clone());
                summary
            }
        };
        let route_plan = if recce.plan_id > 0 {
            match plans.get(&recce.plan_id) {
                Some(cached) => cached.clone(),
                None => {
                    let summary = db.get_route_plan(recce.plan_id)?.as_ref().map(RoutePlanSummary::from);
                    plans.insert(recce.plan_id, summary.clone());
                    summary
                }
            }
        } else {
            None
        };
        data.push(RecceRecord {
            recce,
            promoter,
            route_plan,
        });
    }
    Ok(Paginated::new(data, total, &page))
}

/// Fetch one recce inside the principal's scope. Out-of-scope rows are NotFound.
pub fn show_activity(db: &FieldDb, principal: &Principal, id: i64) -> Result<RecceRecord, AppError> {
    let scope = StateScope::for_principal(principal);
    let recce = db
        .get_recce_filtered(id, &scope.filter("state"))?
        .ok_or_else(|| AppError::not_found("Activity"))?;
    Ok(build_record(db, recce)?)
}

/// Permission needed to move a recce into `status`.
pub fn status_permission(status: ActivityStatus) -> &'static str {
    if status.is_review_decision() {
        names::ACTIVITY_APPROVE
    } else {
        names::ACTIVITY_UPDATE
    }
}

pub fn parse_status(raw: &str) -> Result<ActivityStatus, AppError> {
    raw.parse()
        .map_err(|_| AppError::validation("status", "The selected status is invalid."))
}

pub fn update_status(
    db: &FieldDb,
    principal: &Principal,
    id: i64,
    status: ActivityStatus,
    remarks: Option<&str>,
) -> Result<RecceRecord, AppError> {
    let scope = StateScope::for_principal(principal);
    if db.get_recce_filtered(id, &scope.filter("state"))?.is_none() {
        return Err(AppError::not_found("Activity"));
    }
    let remarks = remarks.map(str::trim).filter(|r| !r.is_empty());
    db.update_recce_status(id, status.as_str(), remarks)?;
    tracing::info!(
        activity_id = id,
        status = status.as_str(),
        by = %principal.cache_key(),
        "Activity status updated"
    );
    load_record(db, id)?.ok_or_else(|| AppError::not_found("Activity"))
}

pub fn delete_activity(db: &FieldDb, principal: &Principal, id: i64) -> Result<(), AppError> {
    let scope = StateScope::for_principal(principal);
    if db.get_recce_filtered(id, &scope.filter("state"))?.is_none() {
        return Err(AppError::not_found("Activity"));
    }
    db.delete_recce(id)?;
    tracing::info!(activity_id = id, by = %principal.cache_key(), "Activity deleted");
    Ok(())
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PhotoQuery {
    pub state: Option<String>,
    pub district: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// Photo gallery over the principal's scoped recces.
pub fn list_photos(
    db: &FieldDb,
    principal: &Principal,
    storage: &StorageConfig,
    query: &PhotoQuery,
) -> Result<Vec<DbReccePhotos>, AppError> {
    let scope = StateScope::for_principal(principal);
    let filter = activity_filter(
        &scope,
        &ActivityListQuery {
            state: query.state.clone(),
            district: query.district.clone(),
            ..Default::default()
        },
    )?;
    let page = PageRequest::new(query.page, query.per_page);
    let mut rows = db.list_recce_photos(&filter, page.per_page, page.offset())?;
    for row in &mut rows {
        row.photos = row.photos.iter().map(|p| storage.public_url(p)).collect();
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rust_decimal::Decimal;

    use super::*;
    use crate::db::identity::NewPromoter;
    use crate::db::test_utils::test_db;
    use crate::db::ActivityRecceWrite;
    use crate::principal::fixtures::admin;

    fn seed(db: &FieldDb) -> (i64, i64, i64) {
        let pid = db
            .create_promoter(&NewPromoter {
                name: "Asha",
                username: "asha",
                phone: None,
                password_hash: "x",
                state: None,
                district: None,
                status: "active",
            })
            .unwrap();
        let mut ids = Vec::new();
        for (state, loc) in [("Karnataka", "MG Road"), ("Goa", "Panjim Market")] {
            ids.push(
                db.insert_recce(&ActivityRecceWrite {
                    promoter_id: pid,
                    plan_id: 0,
                    visit_date: "2025-03-01 10:00:00".into(),
                    latitude: Decimal::from_str("15.5").unwrap(),
                    longitude: Decimal::from_str("73.8").unwrap(),
                    location: loc.into(),
                    landmark: None,
                    state: Some(state.into()),
                    district: Some("Central".into()),
                    sub_district: None,
                    village: None,
                    village_code: None,
                    product_type: None,
                    width: 8.0,
                    height: 5.0,
                    photos: vec!["recce/1.jpg".into()],
                    remarks: None,
                    local_id: None,
                    device_id: None,
                })
                .unwrap(),
            );
        }
        (pid, ids[0], ids[1])
    }

    #[test]
    fn test_page_offset_saturates() {
        assert_eq!(PageRequest::new(None, None).offset(), 0);
        assert_eq!(PageRequest::new(Some(3), Some(20)).offset(), 40);
        assert_eq!(PageRequest::new(Some(-5), Some(0)).page, 1);
        let huge = PageRequest::new(Some(i64::MAX), Some(100));
        assert_eq!(huge.offset(), i64::MAX);
    }

    #[test]
    fn test_listing_is_state_scoped() {
        let db = test_db();
        seed(&db);
        let karnataka_only = admin(1, &[], &[("Karnataka", true)]);
        let page = list_activities(&db, &karnataka_only, &ActivityListQuery::default()).unwrap();
        assert_eq!(page.total, 1);
        assert!(page
            .data
            .iter()
            .all(|r| r.recce.state.as_deref() == Some("Karnataka")));

        // Other filters cannot widen the scope.
        let goa = ActivityListQuery {
            state: Some("Goa".into()),
            ..Default::default()
        };
        assert_eq!(list_activities(&db, &karnataka_only, &goa).unwrap().total, 0);

        let unrestricted = admin(2, &["admin"], &[]);
        let page = list_activities(&db, &unrestricted, &ActivityListQuery::default()).unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.data[0].promoter.as_ref().unwrap().username, "asha");
    }

    #[test]
    fn test_out_of_scope_record_is_not_found() {
        let db = test_db();
        let (_, _, goa_id) = seed(&db);
        let karnataka_only = admin(1, &[], &[("Karnataka", true)]);
        assert!(matches!(
            show_activity(&db, &karnataka_only, goa_id),
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            delete_activity(&db, &karnataka_only, goa_id),
            Err(AppError::NotFound(_))
        ));
        assert!(db.get_recce(goa_id).unwrap().is_some());
    }

    #[test]
    fn test_status_update_and_permission_mapping() {
        let db = test_db();
        let (_, ka_id, _) = seed(&db);
        let p = admin(1, &["admin"], &[]);
        let record =
            update_status(&db, &p, ka_id, ActivityStatus::Approved, Some("Looks good")).unwrap();
        assert_eq!(record.recce.status, "approved");
        assert_eq!(record.recce.remarks.as_deref(), Some("Looks good"));

        assert_eq!(status_permission(ActivityStatus::Rejected), names::ACTIVITY_APPROVE);
        assert_eq!(status_permission(ActivityStatus::InProgress), names::ACTIVITY_UPDATE);
        assert!(parse_status("archived").is_err());
    }

    #[test]
    fn test_filters_and_pagination() {
        let db = test_db();
        seed(&db);
        let p = admin(1, &["admin"], &[]);
        let query = ActivityListQuery {
            search: Some("panjim".into()),
            ..Default::default()
        };
        assert_eq!(list_activities(&db, &p, &query).unwrap().total, 1);

        let query = ActivityListQuery {
            per_page: Some(1),
            page: Some(2),
            ..Default::default()
        };
        let page = list_activities(&db, &p, &query).unwrap();
        assert_eq!(page.data.len(), 1);
        assert_eq!(page.last_page, 2);

        let bad = ActivityListQuery {
            start_date: Some("03/01/2025".into()),
            ..Default::default()
        };
        assert!(matches!(
            list_activities(&db, &p, &bad),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_photo_gallery_resolves_urls() {
        let db = test_db();
        seed(&db);
        let storage = StorageConfig {
            url: Some("https://cdn.example.com".into()),
            ..Default::default()
        };
        let p = admin(1, &[], &[("Goa", true)]);
        let photos = list_photos(&db, &p, &storage, &PhotoQuery::default()).unwrap();
        assert_eq!(photos.len(), 1);
        assert_eq!(photos[0].photos, vec!["https://cdn.example.com/recce/1.jpg"]);
    }
}
