// Dashboard service: scoped aggregates over recces and route plans, with a
// short-lived per-principal cache.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Datelike, Days, Months, NaiveDate};
use dashmap::DashMap;
use rusqlite::types::Value;
use serde::Serialize;

use crate::access::StateScope;
use crate::db::filter::normalize_key;
use crate::db::{FieldDb, SqlFilter};
use crate::error::AppError;
use crate::principal::Principal;
use crate::types::ActivityStatus;

use super::activities::parse_day;

pub const DEFAULT_RANGE_DAYS: u64 = 30;
const DAILY_MAX_SPAN: i64 = 31;
const WEEKLY_MAX_SPAN: i64 = 365;

/// Inclusive calendar range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DateRange {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl DateRange {
    /// Missing bounds default to the 30 days ending `today`.
    pub fn resolve(
        start: Option<&str>,
        end: Option<&str>,
        today: NaiveDate,
    ) -> Result<Self, AppError> {
        fn blank(v: Option<&str>) -> Option<&str> {
            v.map(str::trim).filter(|s| !s.is_empty())
        }
        let end_date = match blank(end) {
            Some(raw) => parse_day("end_date", raw)?,
            None => today,
        };
        let start_date = match blank(start) {
            Some(raw) => parse_day("start_date", raw)?,
            None => end_date
                .checked_sub_days(Days::new(DEFAULT_RANGE_DAYS))
                .unwrap_or(end_date),
        };
        if start_date > end_date {
            return Err(AppError::validation(
                "start_date",
                "The start_date must be a date before or equal to end_date.",
            ));
        }
        Ok(Self {
            start_date,
            end_date,
        })
    }

    /// Days covered, counting both ends.
    pub fn span_days(&self) -> i64 {
        (self.end_date - self.start_date).num_days() + 1
    }

    pub fn granularity(&self) -> Granularity {
        match self.span_days() {
            n if n <= DAILY_MAX_SPAN => Granularity::Daily,
            n if n <= WEEKLY_MAX_SPAN => Granularity::Weekly,
            _ => Granularity::Monthly,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Daily,
    Weekly,
    Monthly,
}

impl Granularity {
    /// First day of the bucket containing `day`. Weeks start on Monday.
    fn bucket_start(self, day: NaiveDate) -> NaiveDate {
        match self {
            Granularity::Daily => day,
            Granularity::Weekly => day
                .checked_sub_days(Days::new(u64::from(day.weekday().num_days_from_monday())))
                .unwrap_or(day),
            Granularity::Monthly => day.with_day(1).unwrap_or(day),
        }
    }

    fn next(self, bucket: NaiveDate) -> Option<NaiveDate> {
        match self {
            Granularity::Daily => bucket.checked_add_days(Days::new(1)),
            Granularity::Weekly => bucket.checked_add_days(Days::new(7)),
            Granularity::Monthly => bucket.checked_add_months(Months::new(1)),
        }
    }

    fn label(self, bucket: NaiveDate) -> String {
        match self {
            Granularity::Daily | Granularity::Weekly => bucket.format("%Y-%m-%d").to_string(),
            Granularity::Monthly => bucket.format("%Y-%m").to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusTotals {
    pub total: i64,
    pub approved: i64,
    pub pending: i64,
    pub rejected: i64,
    pub in_progress: i64,
    pub completed: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateProgress {
    pub state: String,
    pub planned: i64,
    pub actual: i64,
    pub approved: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelinePoint {
    pub period: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsBundle {
    pub range: DateRange,
    pub granularity: Granularity,
    pub totals: StatusTotals,
    pub planned_walls: i64,
    /// approved / planned walls, 0 when nothing is planned.
    pub wall_completion_rate: f64,
    pub state_wise: Vec<StateProgress>,
    pub timeline: Vec<TimelinePoint>,
}

fn recce_range_filter(scope: &StateScope, range: &DateRange) -> SqlFilter {
    let mut filter = scope.filter("state");
    filter.push(
        "visit_date >= ? AND visit_date <= ?",
        [
            Value::Text(format!("{} 00:00:00", range.start_date)),
            Value::Text(format!("{} 23:59:59", range.end_date)),
        ],
    );
    filter
}

pub fn compute_stats(
    db: &FieldDb,
    range: &DateRange,
    principal: &Principal,
) -> Result<StatsBundle, AppError> {
    let scope = StateScope::for_principal(principal);
    let recces = recce_range_filter(&scope, range);
    let plans = scope.filter("state");

    let by_status = db.recce_status_counts(&recces)?;
    let count = |status: ActivityStatus| by_status.get(status.as_str()).copied().unwrap_or(0);
    let totals = StatusTotals {
        total: by_status.values().sum(),
        approved: count(ActivityStatus::Approved),
        pending: count(ActivityStatus::Pending),
        rejected: count(ActivityStatus::Rejected),
        in_progress: count(ActivityStatus::InProgress),
        completed: count(ActivityStatus::Completed),
    };

    let planned_walls = db.planned_wall_total(&plans)?;
    let wall_completion_rate = if planned_walls > 0 {
        totals.approved as f64 / planned_walls as f64
    } else {
        0.0
    };

    let mut approved_filter = recces.clone();
    approved_filter.push(
        "status = ?",
        [Value::Text(ActivityStatus::Approved.as_str().to_string())],
    );
    let state_wise = merge_state_counts(
        db.planned_walls_by_state(&plans)?,
        db.recces_by_state(&recces)?,
        db.recces_by_state(&approved_filter)?,
    );

    let daily = db.daily_recce_counts(&recces)?;
    let granularity = range.granularity();
    let timeline = bucket_timeline(range, granularity, &daily);

    Ok(StatsBundle {
        range: *range,
        granularity,
        totals,
        planned_walls,
        wall_completion_rate,
        state_wise,
        timeline,
    })
}

/// Join the three per-state series on the normalized state name.
fn merge_state_counts(
    planned: Vec<crate::db::stats::StateCount>,
    actual: Vec<crate::db::stats::StateCount>,
    approved: Vec<crate::db::stats::StateCount>,
) -> Vec<StateProgress> {
    let mut merged: BTreeMap<String, StateProgress> = BTreeMap::new();
    let mut slot = |state: &str| -> String {
        let key = normalize_key(state);
        merged.entry(key.clone()).or_insert_with(|| StateProgress {
            state: state.trim().to_string(),
            planned: 0,
            actual: 0,
            approved: 0,
        });
        key
    };
    let planned: Vec<_> = planned.into_iter().map(|c| (slot(&c.state), c.count)).collect();
    let actual: Vec<_> = actual.into_iter().map(|c| (slot(&c.state), c.count)).collect();
    let approved: Vec<_> = approved.into_iter().map(|c| (slot(&c.state), c.count)).collect();
    for (key, n) in planned {
        if let Some(row) = merged.get_mut(&key) {
            row.planned = n;
        }
    }
    for (key, n) in actual {
        if let Some(row) = merged.get_mut(&key) {
            row.actual = n;
        }
    }
    for (key, n) in approved {
        if let Some(row) = merged.get_mut(&key) {
            row.approved = n;
        }
    }
    merged.into_values().collect()
}

/// Continuous, zero-filled buckets covering the whole range.
fn bucket_timeline(
    range: &DateRange,
    granularity: Granularity,
    daily: &[(String, i64)],
) -> Vec<TimelinePoint> {
    let mut buckets: BTreeMap<NaiveDate, i64> = BTreeMap::new();
    let mut cursor = Some(granularity.bucket_start(range.start_date));
    while let Some(bucket) = cursor.filter(|b| *b <= range.end_date) {
        buckets.insert(bucket, 0);
        cursor = granularity.next(bucket);
    }
    for (day, n) in daily {
        match NaiveDate::parse_from_str(day, "%Y-%m-%d") {
            Ok(date) => {
                if let Some(slot) = buckets.get_mut(&granularity.bucket_start(date)) {
                    *slot += n;
                }
            }
            Err(_) => tracing::warn!(day = %day, "Skipping unparseable visit date in timeline"),
        }
    }
    buckets
        .into_iter()
        .map(|(bucket, count)| TimelinePoint {
            period: granularity.label(bucket),
            count,
        })
        .collect()
}

// =============================================================================
// Cache
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub range: DateRange,
    /// `Principal::cache_key`, so users and promoters never share an entry.
    pub principal: String,
}

struct CachedStats {
    stored_at: Instant,
    stats: Arc<StatsBundle>,
}

/// TTL cache for dashboard bundles. Entries are replaced lazily on read.
pub struct DashboardCache {
    entries: DashMap<CacheKey, CachedStats>,
    ttl: Duration,
}

impl DashboardCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<StatsBundle>> {
        let entry = self.entries.get(key)?;
        if entry.stored_at.elapsed() < self.ttl {
            Some(Arc::clone(&entry.stats))
        } else {
            None
        }
    }

    pub fn get_or_compute<F>(&self, key: CacheKey, compute: F) -> Result<Arc<StatsBundle>, AppError>
    where
        F: FnOnce() -> Result<StatsBundle, AppError>,
    {
        if let Some(hit) = self.get(&key) {
            tracing::debug!(principal = %key.principal, "Dashboard cache hit");
            return Ok(hit);
        }
        let stats = Arc::new(compute()?);
        self.entries.insert(
            key,
            CachedStats {
                stored_at: Instant::now(),
                stats: Arc::clone(&stats),
            },
        );
        Ok(stats)
    }

    /// Drop expired entries.
    pub fn purge_expired(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, cached| cached.stored_at.elapsed() < ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
