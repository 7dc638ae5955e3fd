//! Activity-recce ingestion.
//!
//! Mobile clients submit recces one at a time or in batches, and resubmit on
//! network timeouts. Every item goes through the same path:
//!
//! 1. Parse the JSON payload leniently (numbers may arrive as strings) into
//!    field-keyed validation errors.
//! 2. Resolve width/height from the referenced route plan, defaulting to 8×5.
//! 3. Inside one `BEGIN IMMEDIATE` transaction: dedup by `(promoter_id, local_id)`,
//!    then by `(promoter_id, visit_date, location, latitude, longitude)`,
//!    else insert as `pending`. Then derive the wall code from the row id.
//!
//! The client's `local_id` is echoed on every outcome so offline records can be
//! reconciled whether the item succeeded or not.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::db::activities::MAX_PHOTOS;
use crate::db::{ActivityRecceWrite, DbError, FieldDb};
use crate::error::{AppError, ValidationErrors};
use crate::principal::FieldPromoter;

use super::activities::{build_record, RecceRecord};

/// Per-call item cap on the mobile bulk endpoint.
pub const MOBILE_BULK_LIMIT: usize = 50;
/// Per-call item cap on the admin bulk endpoint.
pub const ADMIN_BULK_LIMIT: usize = 100;

pub const DEFAULT_WIDTH: f64 = 8.0;
pub const DEFAULT_HEIGHT: f64 = 5.0;

const VISIT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const MAX_TEXT_LEN: usize = 255;
const WALL_CODE_PREFIX: &str = "LI";
const VILLAGE_CODE_OTHER_PREFIX: &str = "Oth_";

pub const INVALID_MESSAGE: &str = "The given data was invalid.";
pub const PERSIST_FAILED_MESSAGE: &str = "Failed to save activity. Please try again.";

// =============================================================================
// Payload parsing
// =============================================================================

/// A validated submission.
#[derive(Debug, Clone, PartialEq)]
pub struct RecceSubmission {
    pub plan_id: i64,
    pub visit_date: String,
    pub latitude: Decimal,
    pub longitude: Decimal,
    pub location: String,
    pub landmark: Option<String>,
    pub state: Option<String>,
    pub district: Option<String>,
    pub sub_district: Option<String>,
    pub village: Option<String>,
    pub village_code: Option<String>,
    pub product_type: Option<String>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub photos: Vec<String>,
    pub remarks: Option<String>,
    pub local_id: Option<String>,
    pub device_id: Option<String>,
}

/// Read `local_id` without validating anything else, so it can be echoed even
/// when the rest of the payload is rejected.
pub fn extract_local_id(payload: &Value) -> Option<String> {
    match payload.get("local_id")? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Field reader that records problems instead of stopping at the first one.
struct FieldReader<'a> {
    obj: &'a Map<String, Value>,
    errors: ValidationErrors,
}

impl<'a> FieldReader<'a> {
    fn present(&self, field: &str) -> Option<&'a Value> {
        match self.obj.get(field) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(v) => Some(v),
        }
    }

    fn text(&mut self, field: &str) -> Option<String> {
        let value = match self.present(field)? {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => {
                self.errors.add(field, format!("The {field} must be a string."));
                return None;
            }
        };
        if value.chars().count() > MAX_TEXT_LEN {
            self.errors.add(
                field,
                format!("The {field} may not be greater than {MAX_TEXT_LEN} characters."),
            );
            return None;
        }
        Some(value)
    }

    fn required_text(&mut self, field: &str) -> Option<String> {
        if self.present(field).is_none() {
            self.errors.add(field, format!("The {field} field is required."));
            return None;
        }
        self.text(field)
    }

    fn integer(&mut self, field: &str) -> Option<i64> {
        let parsed = match self.present(field)? {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        };
        if parsed.is_none() {
            self.errors.add(field, format!("The {field} must be an integer."));
        }
        parsed
    }

    fn decimal(&mut self, field: &str) -> Option<Decimal> {
        let raw = match self.present(field)? {
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.trim().to_string(),
            _ => String::new(),
        };
        let parsed = Decimal::from_str(&raw)
            .or_else(|_| Decimal::from_scientific(&raw))
            .ok();
        if parsed.is_none() {
            self.errors.add(field, format!("The {field} must be a number."));
        }
        parsed
    }

    fn positive_number(&mut self, field: &str) -> Option<f64> {
        let value = self.decimal(field)?;
        let as_f64 = value.to_f64().filter(|v| *v > 0.0);
        if as_f64.is_none() {
            self.errors.add(field, format!("The {field} must be greater than 0."));
        }
        as_f64
    }

    fn coordinate(&mut self, field: &str, bound: i64) -> Option<Decimal> {
        if self.present(field).is_none() {
            self.errors.add(field, format!("The {field} field is required."));
            return None;
        }
        let value = self.decimal(field)?;
        let limit = Decimal::from(bound);
        if value < -limit || value > limit {
            self.errors.add(
                field,
                format!("The {field} must be between -{bound} and {bound}."),
            );
            return None;
        }
        Some(value.round_dp(7))
    }

    fn visit_date(&mut self) -> Option<String> {
        let field = "visit_date";
        let raw = match self.present(field) {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(_) => {
                self.errors.add(field, "The visit_date is not a valid date.");
                return None;
            }
            None => {
                self.errors.add(field, "The visit_date field is required.");
                return None;
            }
        };
        match normalize_visit_date(&raw) {
            Some(normalized) => Some(normalized),
            None => {
                self.errors.add(field, "The visit_date is not a valid date.");
                None
            }
        }
    }

    /// `photos` array, or the legacy `photo_1`..`photo_4` keys.
    fn photos(&mut self) -> Vec<String> {
        let field = "photos";
        let collected: Vec<String> = match self.present(field) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            Some(Value::String(s)) => vec![s.trim().to_string()],
            Some(_) => {
                self.errors.add(field, "The photos must be an array.");
                return Vec::new();
            }
            None => (1..=MAX_PHOTOS)
                .filter_map(|i| self.text(&format!("photo_{i}")))
                .collect(),
        };
        if collected.len() > MAX_PHOTOS {
            self.errors.add(
                field,
                format!("The photos may not have more than {MAX_PHOTOS} items."),
            );
        }
        collected
    }
}

/// Accepts `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS` and RFC 3339.
/// RFC 3339 values keep the wall-clock time the device reported.
pub fn normalize_visit_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local().format(VISIT_DATE_FORMAT).to_string());
    }
    for fmt in [VISIT_DATE_FORMAT, "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.format(VISIT_DATE_FORMAT).to_string());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.format(VISIT_DATE_FORMAT).to_string())
}

/// Validate a raw submission.
pub fn parse_submission(payload: &Value) -> Result<RecceSubmission, ValidationErrors> {
    let Some(obj) = payload.as_object() else {
        return Err(ValidationErrors::single(
            "payload",
            "The activity must be a JSON object.",
        ));
    };
    let mut r = FieldReader {
        obj,
        errors: ValidationErrors::new(),
    };

    // plan_id: absent means 0 ("no plan"); 0 itself is valid.
    let plan_id = r.integer("plan_id").unwrap_or(0);
    if plan_id < 0 {
        r.errors.add("plan_id", "The plan_id must be at least 0.");
    }

    let submission = RecceSubmission {
        plan_id,
        visit_date: r.visit_date().unwrap_or_default(),
        latitude: r.coordinate("latitude", 90).unwrap_or_default(),
        longitude: r.coordinate("longitude", 180).unwrap_or_default(),
        location: r.required_text("location").unwrap_or_default(),
        landmark: r.text("landmark"),
        state: r.text("state"),
        district: r.text("district"),
        sub_district: r.text("sub_district"),
        village: r.text("village"),
        village_code: r.text("village_code"),
        product_type: r.text("product_type"),
        width: r.positive_number("width"),
        height: r.positive_number("height"),
        photos: r.photos(),
        remarks: r.text("remarks"),
        local_id: r.text("local_id"),
        device_id: r.text("device_id"),
    };

    if r.errors.is_empty() {
        Ok(submission)
    } else {
        Err(r.errors)
    }
}

// =============================================================================
// Dimensions and wall codes
// =============================================================================

/// Width/height lookups memoized per `plan_id` for the life of one call.
#[derive(Debug, Default)]
pub struct DimensionCache {
    resolved: HashMap<i64, (f64, f64)>,
    lookups: usize,
}

impl DimensionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of store lookups performed (cache misses for plan ids > 0).
    pub fn lookups(&self) -> usize {
        self.lookups
    }

    /// Plan dimensions, or 8×5 when there is no plan, the plan is missing, its
    /// own values are null, or the lookup fails. Never an error.
    pub fn resolve(&mut self, db: &FieldDb, plan_id: i64) -> (f64, f64) {
        if plan_id <= 0 {
            return (DEFAULT_WIDTH, DEFAULT_HEIGHT);
        }
        if let Some(dims) = self.resolved.get(&plan_id) {
            return *dims;
        }
        self.lookups += 1;
        let dims = match db.get_route_plan(plan_id) {
            Ok(Some(plan)) => (
                plan.width.unwrap_or(DEFAULT_WIDTH),
                plan.height.unwrap_or(DEFAULT_HEIGHT),
            ),
            Ok(None) => (DEFAULT_WIDTH, DEFAULT_HEIGHT),
            Err(e) => {
                tracing::warn!(plan_id, error = %e, "Route plan lookup failed, using default dimensions");
                (DEFAULT_WIDTH, DEFAULT_HEIGHT)
            }
        };
        self.resolved.insert(plan_id, dims);
        dims
    }
}

/// `"LI" + village_code (without a leading "Oth_") + id`, or `None` for a blank code.
pub fn derive_wall_code(village_code: Option<&str>, id: i64) -> Option<String> {
    let code = village_code.map(str::trim).filter(|c| !c.is_empty())?;
    let code = code.strip_prefix(VILLAGE_CODE_OTHER_PREFIX).unwrap_or(code);
    Some(format!("{WALL_CODE_PREFIX}{code}{id}"))
}

// =============================================================================
// Outcomes
// =============================================================================

/// Result of one submitted item. Never propagated as an error.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemOutcome {
    Success {
        is_update: bool,
        local_id: Option<String>,
        data: Box<RecceRecord>,
    },
    ValidationError {
        local_id: Option<String>,
        message: String,
        errors: ValidationErrors,
    },
    Error {
        local_id: Option<String>,
        message: String,
    },
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ItemOutcome::Success { .. })
    }

    pub fn local_id(&self) -> Option<&str> {
        match self {
            ItemOutcome::Success { local_id, .. }
            | ItemOutcome::ValidationError { local_id, .. }
            | ItemOutcome::Error { local_id, .. } => local_id.as_deref(),
        }
    }

    /// HTTP status for a single submission.
    pub fn http_status(&self) -> u16 {
        match self {
            ItemOutcome::Success { is_update: true, .. } => 200,
            ItemOutcome::Success { is_update: false, .. } => 201,
            ItemOutcome::ValidationError { .. } => 422,
            ItemOutcome::Error { .. } => 500,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkStatus {
    Success,
    Mixed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkItemResult {
    pub index: usize,
    #[serde(flatten)]
    pub outcome: ItemOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkResult {
    pub status: BulkStatus,
    pub success_count: usize,
    pub error_count: usize,
    pub results: Vec<BulkItemResult>,
}

impl BulkResult {
    fn from_results(results: Vec<BulkItemResult>) -> Self {
        let success_count = results.iter().filter(|r| r.outcome.is_success()).count();
        let error_count = results.len() - success_count;
        let status = match (success_count, error_count) {
            (_, 0) => BulkStatus::Success,
            (0, _) => BulkStatus::Failed,
            _ => BulkStatus::Mixed,
        };
        Self {
            status,
            success_count,
            error_count,
            results,
        }
    }

    /// 200 all succeeded, 207 mixed, 422 none succeeded.
    pub fn http_status(&self) -> u16 {
        match self.status {
            BulkStatus::Success => 200,
            BulkStatus::Mixed => 207,
            BulkStatus::Failed => 422,
        }
    }
}

// =============================================================================
// Persistence
// =============================================================================

/// Dedup, write and derive the wall code atomically. Returns `(id, is_update)`.
fn persist(db: &FieldDb, write: &ActivityRecceWrite) -> Result<(i64, bool), DbError> {
    db.with_transaction(|tx| {
        let by_local_id = match write.local_id.as_deref() {
            Some(local_id) => tx.find_recce_id_by_local_id(write.promoter_id, local_id)?,
            None => None,
        };

        let (id, is_update) = if by_local_id.is_some() {
            (tx.upsert_recce_by_local_id(write)?, true)
        } else if let Some(id) = tx.find_recce_id_by_secondary_key(
            write.promoter_id,
            &write.visit_date,
            &write.location,
            write.latitude,
            write.longitude,
        )? {
            tx.update_recce(id, write)?;
            (id, true)
        } else if write.local_id.is_some() {
            // Still an upsert: a concurrent retry that won the race becomes an update.
            (tx.upsert_recce_by_local_id(write)?, false)
        } else {
            (tx.insert_recce(write)?, false)
        };

        let wall_code = derive_wall_code(write.village_code.as_deref(), id);
        tx.set_recce_wall_code(id, wall_code.as_deref())?;
        Ok((id, is_update))
    })
}

fn process_item(
    db: &FieldDb,
    promoter_id: i64,
    payload: &Value,
    dimensions: &mut DimensionCache,
) -> ItemOutcome {
    let local_id = extract_local_id(payload);
    let submission = match parse_submission(payload) {
        Ok(s) => s,
        Err(errors) => {
            return ItemOutcome::ValidationError {
                local_id,
                message: INVALID_MESSAGE.to_string(),
                errors,
            }
        }
    };

    let (width, height) = match (submission.width, submission.height) {
        (Some(w), Some(h)) => (w, h),
        (w, h) => {
            let (plan_w, plan_h) = dimensions.resolve(db, submission.plan_id);
            (w.unwrap_or(plan_w), h.unwrap_or(plan_h))
        }
    };

    let write = ActivityRecceWrite {
        promoter_id,
        plan_id: submission.plan_id,
        visit_date: submission.visit_date,
        latitude: submission.latitude,
        longitude: submission.longitude,
        location: submission.location,
        landmark: submission.landmark,
        state: submission.state,
        district: submission.district,
        sub_district: submission.sub_district,
        village: submission.village,
        village_code: submission.village_code,
        product_type: submission.product_type,
        width,
        height,
        photos: submission.photos,
        remarks: submission.remarks,
        local_id: submission.local_id,
        device_id: submission.device_id,
    };

    let saved = persist(db, &write).and_then(|(id, is_update)| {
        let recce = db
            .get_recce(id)?
            .ok_or(DbError::Sqlite(rusqlite::Error::QueryReturnedNoRows))?;
        Ok((build_record(db, recce)?, is_update))
    });

    match saved {
        Ok((record, is_update)) => {
            tracing::debug!(
                promoter_id,
                activity_id = record.recce.id,
                is_update,
                local_id = local_id.as_deref().unwrap_or(""),
                "Activity saved"
            );
            ItemOutcome::Success {
                is_update,
                local_id,
                data: Box::new(record),
            }
        }
        Err(e) => {
            tracing::error!(
                promoter_id,
                local_id = local_id.as_deref().unwrap_or(""),
                error = %e,
                "Failed to persist activity"
            );
            ItemOutcome::Error {
                local_id,
                message: PERSIST_FAILED_MESSAGE.to_string(),
            }
        }
    }
}

// =============================================================================
// Entry points
// =============================================================================

/// Submit one recce on behalf of a promoter.
pub fn submit_single(db: &FieldDb, promoter: &FieldPromoter, payload: &Value) -> ItemOutcome {
    process_item(db, promoter.promoter.id, payload, &mut DimensionCache::new())
}

/// Pull the `activities` array out of a bulk body and enforce the 1..=`max` cap.
pub fn batch_items(body: &Value, max: usize) -> Result<&[Value], AppError> {
    let items = body
        .get("activities")
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::validation("activities", "The activities field is required."))?;
    if items.is_empty() {
        return Err(AppError::validation(
            "activities",
            "The activities must have at least 1 items.",
        ));
    }
    if items.len() > max {
        return Err(AppError::validation(
            "activities",
            format!("The activities may not have more than {max} items."),
        ));
    }
    Ok(items)
}

/// Mobile bulk submission: items in input order, each isolated, dimensions
/// memoized per plan id across the batch.
pub fn submit_bulk(
    db: &FieldDb,
    promoter: &FieldPromoter,
    body: &Value,
) -> Result<BulkResult, AppError> {
    let items = batch_items(body, MOBILE_BULK_LIMIT)?;
    let mut dimensions = DimensionCache::new();
    let results = items
        .iter()
        .enumerate()
        .map(|(index, item)| BulkItemResult {
            index,
            outcome: process_item(db, promoter.promoter.id, item, &mut dimensions),
        })
        .collect();
    let result = BulkResult::from_results(results);
    tracing::info!(
        promoter_id = promoter.promoter.id,
        success = result.success_count,
        errors = result.error_count,
        "Bulk activity submission processed"
    );
    Ok(result)
}

/// Admin bulk submission. Each item names its own `promoter_id`, which must exist.
pub fn submit_admin_bulk(db: &FieldDb, body: &Value) -> Result<BulkResult, AppError> {
    let items = batch_items(body, ADMIN_BULK_LIMIT)?;
    let mut dimensions = DimensionCache::new();
    let mut known_promoters: HashMap<i64, bool> = HashMap::new();

    let mut results = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let outcome = match admin_item_promoter(db, item, &mut known_promoters) {
            Ok(promoter_id) => process_item(db, promoter_id, item, &mut dimensions),
            Err(outcome) => outcome,
        };
        results.push(BulkItemResult { index, outcome });
    }
    let result = BulkResult::from_results(results);
    tracing::info!(
        success = result.success_count,
        errors = result.error_count,
        "Admin bulk activity submission processed"
    );
    Ok(result)
}

/// Admin single submission, same item shape as one entry of the admin bulk body.
pub fn submit_admin_single(db: &FieldDb, item: &Value) -> ItemOutcome {
    match admin_item_promoter(db, item, &mut HashMap::new()) {
        Ok(promoter_id) => process_item(db, promoter_id, item, &mut DimensionCache::new()),
        Err(outcome) => outcome,
    }
}

fn admin_item_promoter(
    db: &FieldDb,
    item: &Value,
    known: &mut HashMap<i64, bool>,
) -> Result<i64, ItemOutcome> {
    let local_id = extract_local_id(item);
    let invalid = |msg: &str| ItemOutcome::ValidationError {
        local_id: local_id.clone(),
        message: INVALID_MESSAGE.to_string(),
        errors: ValidationErrors::single("promoter_id", msg),
    };

    let promoter_id = match item.get("promoter_id") {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => return Err(invalid("The promoter_id field is required.")),
    }
    .ok_or_else(|| invalid("The promoter_id must be an integer."))?;

    let exists = match known.get(&promoter_id) {
        Some(exists) => *exists,
        None => {
            let exists = match db.get_promoter(promoter_id) {
                Ok(p) => p.is_some(),
                Err(e) => {
                    tracing::error!(promoter_id, error = %e, "Promoter lookup failed");
                    return Err(ItemOutcome::Error {
                        local_id,
                        message: PERSIST_FAILED_MESSAGE.to_string(),
                    });
                }
            };
            known.insert(promoter_id, exists);
            exists
        }
    };
    if exists {
        Ok(promoter_id)
    } else {
        Err(invalid("The selected promoter_id is invalid."))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tracing_test::traced_test;

    use super::*;
    use crate::db::identity::NewPromoter;
    use crate::db::route_plans::RoutePlanWrite;
    use crate::db::test_utils::test_db;
    use crate::db::SqlFilter;

    fn promoter(db: &FieldDb) -> FieldPromoter {
        let id = db
            .create_promoter(&NewPromoter {
                name: "Ravi",
                username: "ravi",
                phone: None,
                password_hash: "x",
                state: Some("Karnataka"),
                district: None,
                status: "active",
            })
            .unwrap();
        FieldPromoter::load(db, id).unwrap().unwrap()
    }

    fn payload(local_id: Option<&str>) -> Value {
        let mut p = json!({
            "plan_id": 0,
            "visit_date": "2025-03-01",
            "latitude": "12.9716",
            "longitude": 77.5946,
            "location": "MG Road",
            "state": "Karnataka",
            "district": "Bengaluru",
            "photos": ["recce/a.jpg"],
        });
        if let Some(l) = local_id {
            p["local_id"] = json!(l);
        }
        p
    }

    fn row_count(db: &FieldDb) -> i64 {
        db.count_recces(&SqlFilter::new()).unwrap()
    }

    fn success(outcome: &ItemOutcome) -> (bool, &RecceRecord) {
        match outcome {
            ItemOutcome::Success { is_update, data, .. } => (*is_update, data.as_ref()),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn test_resubmission_with_local_id_is_idempotent() {
        let db = test_db();
        let p = promoter(&db);

        let first = submit_single(&db, &p, &payload(Some("abc")));
        let (is_update, record) = success(&first);
        assert!(!is_update);
        assert_eq!(record.recce.status, "pending");
        let id = record.recce.id;

        let mut second_payload = payload(Some("abc"));
        second_payload["location"] = json!("Brigade Road");
        let second = submit_single(&db, &p, &second_payload);
        let (is_update, record) = success(&second);
        assert!(is_update);
        assert_eq!(record.recce.id, id);
        assert_eq!(record.recce.location, "Brigade Road");
        assert_eq!(second.local_id(), Some("abc"));
        assert_eq!(row_count(&db), 1);
    }

    #[test]
    fn test_secondary_key_fallback_without_local_id() {
        let db = test_db();
        let p = promoter(&db);

        let (is_update, _) = success(&submit_single(&db, &p, &payload(None)));
        assert!(!is_update);

        // Same coordinate spelled differently still matches at 7 decimals.
        let mut again = payload(None);
        again["latitude"] = json!(12.97160000);
        again["visit_date"] = json!("2025-03-01 00:00:00");
        let (is_update, _) = success(&submit_single(&db, &p, &again));
        assert!(is_update);
        assert_eq!(row_count(&db), 1);
    }

    #[test]
    fn test_keyless_resubmission_keeps_local_id_for_later_retries() {
        let db = test_db();
        let p = promoter(&db);
        let first = submit_single(&db, &p, &payload(Some("abc")));
        let (_, record) = success(&first);
        let id = record.recce.id;

        let keyless = submit_single(&db, &p, &payload(None));
        let (is_update, record) = success(&keyless);
        assert!(is_update);
        assert_eq!(record.recce.local_id.as_deref(), Some("abc"));

        let mut retry = payload(Some("abc"));
        retry["location"] = json!("Brigade Road");
        let retried = submit_single(&db, &p, &retry);
        let (is_update, record) = success(&retried);
        assert!(is_update);
        assert_eq!(record.recce.id, id);
        assert_eq!(row_count(&db), 1);
    }

    #[test]
    fn test_plan_id_zero_uses_default_dimensions() {
        let db = test_db();
        let p = promoter(&db);
        let outcome = submit_single(&db, &p, &payload(Some("z0")));
        let (_, record) = success(&outcome);
        assert_eq!(record.recce.plan_id, 0);
        assert_eq!((record.recce.width, record.recce.height), (8.0, 5.0));
        assert_eq!(record.recce.area, 40.0);
        assert!(record.route_plan.is_none());
    }

    #[test]
    fn test_missing_plan_id_means_zero_and_negative_is_rejected() {
        let db = test_db();
        let p = promoter(&db);

        let mut no_plan = payload(Some("np"));
        no_plan.as_object_mut().unwrap().remove("plan_id");
        let outcome = submit_single(&db, &p, &no_plan);
        let (_, record) = success(&outcome);
        assert_eq!(record.recce.plan_id, 0);

        let mut negative = payload(Some("neg"));
        negative["plan_id"] = json!(-1);
        match submit_single(&db, &p, &negative) {
            ItemOutcome::ValidationError { errors, local_id, .. } => {
                assert!(errors.has("plan_id"));
                assert_eq!(local_id.as_deref(), Some("neg"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_plan_dimensions_and_missing_plan_fallback() {
        let db = test_db();
        let p = promoter(&db);
        let plan_id = db
            .create_route_plan(&RoutePlanWrite {
                state: "Karnataka".into(),
                district: "Bengaluru".into(),
                width: Some(12.0),
                height: Some(6.0),
                wall_count: 2,
                status: "active".into(),
                ..Default::default()
            })
            .unwrap();
        let null_dims = db
            .create_route_plan(&RoutePlanWrite {
                state: "Karnataka".into(),
                district: "Mysuru".into(),
                status: "active".into(),
                ..Default::default()
            })
            .unwrap();

        let mut with_plan = payload(Some("p1"));
        with_plan["plan_id"] = json!(plan_id.to_string());
        let outcome = submit_single(&db, &p, &with_plan);
        let (_, record) = success(&outcome);
        assert_eq!((record.recce.width, record.recce.height), (12.0, 6.0));
        assert_eq!(record.route_plan.as_ref().unwrap().id, plan_id);

        let mut null_plan = payload(Some("p2"));
        null_plan["plan_id"] = json!(null_dims);
        let outcome = submit_single(&db, &p, &null_plan);
        let (_, record) = success(&outcome);
        assert_eq!((record.recce.width, record.recce.height), (8.0, 5.0));

        let mut ghost = payload(Some("p3"));
        ghost["plan_id"] = json!(9999);
        let outcome = submit_single(&db, &p, &ghost);
        let (_, record) = success(&outcome);
        assert_eq!((record.recce.width, record.recce.height), (8.0, 5.0));
        assert_eq!(record.recce.plan_id, 9999);

        let mut explicit = payload(Some("p4"));
        explicit["plan_id"] = json!(plan_id);
        explicit["width"] = json!("3.5");
        let outcome = submit_single(&db, &p, &explicit);
        let (_, record) = success(&outcome);
        assert_eq!((record.recce.width, record.recce.height), (3.5, 6.0));
    }

    #[test]
    fn test_wall_code_derivation() {
        assert_eq!(
            derive_wall_code(Some("Oth_MH001"), 42).as_deref(),
            Some("LIMH00142")
        );
        assert_eq!(derive_wall_code(Some("KA77"), 5).as_deref(), Some("LIKA775"));
        assert_eq!(derive_wall_code(Some("  "), 5), None);
        assert_eq!(derive_wall_code(None, 5), None);
    }

    #[test]
    fn test_wall_code_written_after_insert() {
        let db = test_db();
        let p = promoter(&db);
        let mut item = payload(Some("w1"));
        item["village_code"] = json!("Oth_MH001");
        let outcome = submit_single(&db, &p, &item);
        let (_, record) = success(&outcome);
        let expected = format!("LIMH001{}", record.recce.id);
        assert_eq!(record.recce.wall_code.as_deref(), Some(expected.as_str()));
    }

    #[test]
    fn test_validation_reports_every_field_and_echoes_local_id() {
        let db = test_db();
        let p = promoter(&db);
        let bad = json!({
            "local_id": 77,
            "latitude": 91,
            "longitude": "east",
            "visit_date": "yesterday",
            "photos": ["1", "2", "3", "4", "5"],
        });
        match submit_single(&db, &p, &bad) {
            ItemOutcome::ValidationError { errors, local_id, .. } => {
                assert_eq!(local_id.as_deref(), Some("77"));
                for field in ["latitude", "longitude", "visit_date", "location", "photos"] {
                    assert!(errors.has(field), "missing error for {field}");
                }
            }
            other => panic!("expected validation error, got {other:?}"),
        }
        assert_eq!(row_count(&db), 0);
    }

    #[test]
    fn test_coordinates_rounded_to_seven_places() {
        let db = test_db();
        let p = promoter(&db);
        let mut item = payload(Some("r7"));
        item["latitude"] = json!("12.97160004");
        let outcome = submit_single(&db, &p, &item);
        let (_, record) = success(&outcome);
        assert_eq!(record.recce.latitude.to_string(), "12.9716000");
    }

    #[test]
    fn test_visit_date_normalization() {
        assert_eq!(
            normalize_visit_date("2025-03-01").as_deref(),
            Some("2025-03-01 00:00:00")
        );
        assert_eq!(
            normalize_visit_date("2025-03-01T09:30:00+05:30").as_deref(),
            Some("2025-03-01 09:30:00")
        );
        assert_eq!(normalize_visit_date("01/03/2025"), None);
    }

    #[test]
    fn test_bulk_partial_failure_is_mixed() {
        let db = test_db();
        let p = promoter(&db);
        let mut items: Vec<Value> = (0..5)
            .map(|i| {
                let mut item = payload(Some(&format!("b{i}")));
                item["location"] = json!(format!("Stop {i}"));
                item
            })
            .collect();
        items[2]["latitude"] = json!(120);

        let result = submit_bulk(&db, &p, &json!({ "activities": items })).unwrap();
        assert_eq!(result.success_count, 4);
        assert_eq!(result.error_count, 1);
        assert_eq!(result.status, BulkStatus::Mixed);
        assert_eq!(result.http_status(), 207);
        assert_eq!(result.results[2].outcome.local_id(), Some("b2"));
        assert!(!result.results[2].outcome.is_success());
        assert_eq!(row_count(&db), 4);
    }

    #[test]
    fn test_bulk_limits_are_distinct() {
        let db = test_db();
        let p = promoter(&db);
        let items: Vec<Value> = (0..51).map(|i| payload(Some(&format!("l{i}")))).collect();
        assert!(matches!(
            submit_bulk(&db, &p, &json!({ "activities": items })),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            submit_bulk(&db, &p, &json!({ "activities": [] })),
            Err(AppError::Validation(_))
        ));

        let admin_items: Vec<Value> = (0..51)
            .map(|i| {
                let mut item = payload(Some(&format!("a{i}")));
                item["promoter_id"] = json!(p.promoter.id);
                item["location"] = json!(format!("Admin stop {i}"));
                item
            })
            .collect();
        let result = submit_admin_bulk(&db, &json!({ "activities": admin_items })).unwrap();
        assert_eq!(result.success_count, 51);
        assert_eq!(result.status, BulkStatus::Success);

        let too_many: Vec<Value> = (0..101).map(|_| json!({})).collect();
        assert!(submit_admin_bulk(&db, &json!({ "activities": too_many })).is_err());
    }

    #[test]
    fn test_bulk_memoizes_dimensions_per_plan() {
        let db = test_db();
        let plan_id = db
            .create_route_plan(&RoutePlanWrite {
                state: "Karnataka".into(),
                district: "Bengaluru".into(),
                width: Some(10.0),
                height: Some(2.0),
                status: "active".into(),
                ..Default::default()
            })
            .unwrap();
        let mut cache = DimensionCache::new();
        for _ in 0..3 {
            assert_eq!(cache.resolve(&db, plan_id), (10.0, 2.0));
            assert_eq!(cache.resolve(&db, 0), (DEFAULT_WIDTH, DEFAULT_HEIGHT));
        }
        assert_eq!(cache.lookups(), 1);
    }

    #[test]
    fn test_duplicate_local_id_within_batch_updates_first_row() {
        let db = test_db();
        let p = promoter(&db);
        let first = payload(Some("abc"));
        let mut second = payload(Some("abc"));
        second["visit_date"] = json!("2025-03-02");

        let result = submit_bulk(&db, &p, &json!({ "activities": [first, second] })).unwrap();
        assert_eq!(result.success_count, 2);
        let (first_update, first_rec) = success(&result.results[0].outcome);
        let (second_update, second_rec) = success(&result.results[1].outcome);
        assert!(!first_update);
        assert!(second_update);
        assert_eq!(first_rec.recce.id, second_rec.recce.id);
        assert_eq!(second_rec.recce.visit_date, "2025-03-02 00:00:00");
        assert_eq!(row_count(&db), 1);
    }

    #[test]
    fn test_admin_bulk_requires_known_promoter() {
        let db = test_db();
        let item = {
            let mut item = payload(Some("x"));
            item["promoter_id"] = json!(4242);
            item
        };
        let result = submit_admin_bulk(&db, &json!({ "activities": [item] })).unwrap();
        assert_eq!(result.status, BulkStatus::Failed);
        assert_eq!(result.http_status(), 422);
        match &result.results[0].outcome {
            ItemOutcome::ValidationError { errors, local_id, .. } => {
                assert!(errors.has("promoter_id"));
                assert_eq!(local_id.as_deref(), Some("x"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[traced_test]
    #[test]
    fn test_persistence_failure_is_logged_and_generic() {
        let db = test_db();
        let p = promoter(&db);
        db.conn_ref()
            .execute_batch("DROP TABLE activity_recces;")
            .unwrap();

        let outcome = submit_single(&db, &p, &payload(Some("lost")));
        match &outcome {
            ItemOutcome::Error { local_id, message } => {
                assert_eq!(local_id.as_deref(), Some("lost"));
                assert_eq!(message, PERSIST_FAILED_MESSAGE);
                assert!(!message.contains("activity_recces"));
            }
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(outcome.http_status(), 500);
        assert!(logs_contain("Failed to persist activity"));
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let outcome = ItemOutcome::Error {
            local_id: Some("k".into()),
            message: PERSIST_FAILED_MESSAGE.into(),
        };
        let json = serde_json::to_value(BulkItemResult { index: 3, outcome }).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["index"], 3);
        assert_eq!(json["local_id"], "k");
    }
}
