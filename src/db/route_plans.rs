use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension};

use super::filter::normalize_key;
use super::*;

/// Columns written when creating or updating a route plan.
#[derive(Debug, Clone, Default)]
pub struct RoutePlanWrite {
    pub state: String,
    pub district: String,
    pub sub_district: Option<String>,
    pub village: Option<String>,
    pub village_code: Option<String>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub wall_count: i64,
    pub status: String,
}

impl RoutePlanWrite {
    /// Area is derived, never supplied.
    pub fn area(&self) -> Option<f64> {
        match (self.width, self.height) {
            (Some(w), Some(h)) => Some(w * h),
            _ => None,
        }
    }
}

const ROUTE_PLAN_COLUMNS: &str = "id, state, district, sub_district, village, village_code,
    width, height, area, wall_count, status, created_at, updated_at";

impl FieldDb {
    pub fn create_route_plan(&self, plan: &RoutePlanWrite) -> Result<i64, DbError> {
        let now = now_rfc3339();
        self.conn.execute(
            "INSERT INTO route_plans
                (state, district, sub_district, village, village_code, width, height, area,
                 wall_count, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
            params![
                plan.state,
                plan.district,
                plan.sub_district,
                plan.village,
                plan.village_code,
                plan.width,
                plan.height,
                plan.area(),
                plan.wall_count,
                plan.status,
                now,
            ],
        )?;
        Ok(self.last_insert_id())
    }

    pub fn update_route_plan(&self, id: i64, plan: &RoutePlanWrite) -> Result<bool, DbError> {
        let changed = self.conn.execute(
            "UPDATE route_plans SET
                state = ?2, district = ?3, sub_district = ?4, village = ?5, village_code = ?6,
                width = ?7, height = ?8, area = ?9, wall_count = ?10, status = ?11,
                updated_at = ?12
             WHERE id = ?1",
            params![
                id,
                plan.state,
                plan.district,
                plan.sub_district,
                plan.village,
                plan.village_code,
                plan.width,
                plan.height,
                plan.area(),
                plan.wall_count,
                plan.status,
                now_rfc3339(),
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn get_route_plan(&self, id: i64) -> Result<Option<DbRoutePlan>, DbError> {
        let sql = format!("SELECT {ROUTE_PLAN_COLUMNS} FROM route_plans WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![id], Self::map_route_plan_row)
            .optional()?)
    }

    /// Fetch a plan by id, restricted by `filter` (state scope).
    pub fn get_route_plan_filtered(
        &self,
        id: i64,
        filter: &SqlFilter,
    ) -> Result<Option<DbRoutePlan>, DbError> {
        let mut scoped = filter.clone();
        scoped.push("id = ?", [Value::Integer(id)]);
        let sql = format!(
            "SELECT {ROUTE_PLAN_COLUMNS} FROM route_plans{}",
            scoped.where_sql()
        );
        Ok(self
            .conn
            .query_row(&sql, params_from_iter(scoped.params()), Self::map_route_plan_row)
            .optional()?)
    }

    pub fn get_route_plan_by_village_code(
        &self,
        village_code: &str,
    ) -> Result<Option<DbRoutePlan>, DbError> {
        let sql = format!("SELECT {ROUTE_PLAN_COLUMNS} FROM route_plans WHERE village_code = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![village_code], Self::map_route_plan_row)
            .optional()?)
    }

    /// Page through route plans matching `filter`, newest first.
    pub fn list_route_plans(
        &self,
        filter: &SqlFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DbRoutePlan>, DbError> {
        let sql = format!(
            "SELECT {ROUTE_PLAN_COLUMNS} FROM route_plans{} ORDER BY id DESC LIMIT ? OFFSET ?",
            filter.where_sql()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params_from_iter(filter.params_with([Value::Integer(limit), Value::Integer(offset)])),
            Self::map_route_plan_row,
        )?;
        collect_rows(rows)
    }

    pub fn count_route_plans(&self, filter: &SqlFilter) -> Result<i64, DbError> {
        let sql = format!("SELECT COUNT(*) FROM route_plans{}", filter.where_sql());
        Ok(self
            .conn
            .query_row(&sql, params_from_iter(filter.params()), |row| row.get(0))?)
    }

    /// Route plans that belong to an activity by geography. The relation is a
    /// value match on state + district, not a foreign key; both sides are
    /// trimmed and lowercased before comparison.
    pub fn find_route_plans_matching(
        &self,
        state: &str,
        district: &str,
        filter: &SqlFilter,
    ) -> Result<Vec<DbRoutePlan>, DbError> {
        let mut scoped = filter.clone();
        scoped.push(
            "LOWER(TRIM(state)) = ? AND LOWER(TRIM(district)) = ?",
            [
                Value::Text(normalize_key(state)),
                Value::Text(normalize_key(district)),
            ],
        );
        let sql = format!(
            "SELECT {ROUTE_PLAN_COLUMNS} FROM route_plans{} ORDER BY id",
            scoped.where_sql()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(scoped.params()), Self::map_route_plan_row)?;
        collect_rows(rows)
    }

    pub fn delete_route_plan(&self, id: i64) -> Result<bool, DbError> {
        let changed = self
            .conn
            .execute("DELETE FROM route_plans WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    fn map_route_plan_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbRoutePlan> {
        Ok(DbRoutePlan {
            id: row.get(0)?,
            state: row.get(1)?,
            district: row.get(2)?,
            sub_district: row.get(3)?,
            village: row.get(4)?,
            village_code: row.get(5)?,
            width: row.get(6)?,
            height: row.get(7)?,
            area: row.get(8)?,
            wall_count: row.get(9)?,
            status: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }
}
