//! One-off data repair queries used by the maintenance CLI.

use rusqlite::params;

use super::*;

/// Spreadsheet sentinel that leaked into geography codes on import.
pub const NA_SENTINEL: &str = "#N/A";

/// Rows carrying the sentinel, per column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct NaCounts {
    pub recce_village_codes: usize,
    pub recce_wall_codes: usize,
    pub route_plan_village_codes: usize,
}

impl NaCounts {
    pub fn total(&self) -> usize {
        self.recce_village_codes + self.recce_wall_codes + self.route_plan_village_codes
    }
}

impl FieldDb {
    pub fn count_na_values(&self) -> Result<NaCounts, DbError> {
        let count = |sql: &str| -> Result<usize, DbError> {
            let n: i64 = self.conn.query_row(sql, params![NA_SENTINEL], |row| row.get(0))?;
            Ok(n as usize)
        };
        Ok(NaCounts {
            recce_village_codes: count(
                "SELECT COUNT(*) FROM activity_recces WHERE TRIM(village_code) = ?1",
            )?,
            recce_wall_codes: count(
                "SELECT COUNT(*) FROM activity_recces WHERE TRIM(wall_code) = ?1",
            )?,
            route_plan_village_codes: count(
                "SELECT COUNT(*) FROM route_plans WHERE TRIM(village_code) = ?1",
            )?,
        })
    }

    /// Null out every sentinel value. Returns the number of rows changed per column.
    pub fn clear_na_values(&self) -> Result<NaCounts, DbError> {
        let now = now_rfc3339();
        let recce_village_codes = self.conn.execute(
            "UPDATE activity_recces SET village_code = NULL, updated_at = ?2
             WHERE TRIM(village_code) = ?1",
            params![NA_SENTINEL, now],
        )?;
        let recce_wall_codes = self.conn.execute(
            "UPDATE activity_recces SET wall_code = NULL, updated_at = ?2
             WHERE TRIM(wall_code) = ?1",
            params![NA_SENTINEL, now],
        )?;
        let route_plan_village_codes = self.conn.execute(
            "UPDATE route_plans SET village_code = NULL, updated_at = ?2
             WHERE TRIM(village_code) = ?1",
            params![NA_SENTINEL, now],
        )?;
        Ok(NaCounts {
            recce_village_codes,
            recce_wall_codes,
            route_plan_village_codes,
        })
    }

    /// Recces with a usable village code but no usable wall code.
    pub fn recces_missing_wall_code(&self) -> Result<Vec<(i64, String)>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, village_code FROM activity_recces
             WHERE village_code IS NOT NULL AND TRIM(village_code) NOT IN ('', ?1)
               AND (wall_code IS NULL OR TRIM(wall_code) IN ('', ?1))
             ORDER BY id",
        )?;
        let rows = stmt.query_map(params![NA_SENTINEL], |row| Ok((row.get(0)?, row.get(1)?)))?;
        collect_rows(rows)
    }
}
