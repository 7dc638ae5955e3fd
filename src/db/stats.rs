//! Aggregate queries behind the dashboard. Every method takes the caller's
//! filter so state scoping is applied before anything is counted.

use std::collections::HashMap;

use rusqlite::params_from_iter;

use super::*;

/// Per-state aggregate keyed by the normalized state name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateCount {
    pub state: String,
    pub count: i64,
}

impl FieldDb {
    /// `status -> count` over recces matching `filter`.
    pub fn recce_status_counts(&self, filter: &SqlFilter) -> Result<HashMap<String, i64>, DbError> {
        let sql = format!(
            "SELECT status, COUNT(*) FROM activity_recces{} GROUP BY status",
            filter.where_sql()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(filter.params()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        Ok(collect_rows(rows)?.into_iter().collect())
    }

    /// Sum of planned `wall_count` over route plans matching `filter`.
    pub fn planned_wall_total(&self, filter: &SqlFilter) -> Result<i64, DbError> {
        let sql = format!(
            "SELECT COALESCE(SUM(wall_count), 0) FROM route_plans{}",
            filter.where_sql()
        );
        Ok(self
            .conn
            .query_row(&sql, params_from_iter(filter.params()), |row| row.get(0))?)
    }

    /// Planned walls per state (route plans). States are grouped case- and
    /// whitespace-insensitively; the first spelling seen is reported.
    pub fn planned_walls_by_state(&self, filter: &SqlFilter) -> Result<Vec<StateCount>, DbError> {
        let sql = format!(
            "SELECT MIN(TRIM(state)), COALESCE(SUM(wall_count), 0) FROM route_plans{}
             GROUP BY LOWER(TRIM(state)) ORDER BY LOWER(TRIM(state))",
            filter.where_sql()
        );
        self.state_counts(&sql, filter)
    }

    /// Recce count per state, optionally restricted to one status by the caller's filter.
    pub fn recces_by_state(&self, filter: &SqlFilter) -> Result<Vec<StateCount>, DbError> {
        let mut scoped = filter.clone();
        scoped.push("state IS NOT NULL AND TRIM(state) <> ''", std::iter::empty());
        let sql = format!(
            "SELECT MIN(TRIM(state)), COUNT(*) FROM activity_recces{}
             GROUP BY LOWER(TRIM(state)) ORDER BY LOWER(TRIM(state))",
            scoped.where_sql()
        );
        self.state_counts(&sql, &scoped)
    }

    /// Recce count per calendar day (`YYYY-MM-DD`).
    pub fn daily_recce_counts(&self, filter: &SqlFilter) -> Result<Vec<(String, i64)>, DbError> {
        let sql = format!(
            "SELECT substr(visit_date, 1, 10) AS day, COUNT(*) FROM activity_recces{}
             GROUP BY day ORDER BY day",
            filter.where_sql()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(filter.params()), |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
        collect_rows(rows)
    }

    fn state_counts(&self, sql: &str, filter: &SqlFilter) -> Result<Vec<StateCount>, DbError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(filter.params()), |row| {
            Ok(StateCount {
                state: row.get(0)?,
                count: row.get(1)?,
            })
        })?;
        collect_rows(rows)
    }
}
