//! Shared type definitions for the database layer.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),
}

impl DbError {
    /// True when the underlying SQLite error is a UNIQUE/PRIMARY KEY violation.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            DbError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => {
                err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
            }
            _ => false,
        }
    }

    /// True when a foreign key blocked the write (e.g. deleting a referenced promoter).
    ///
    /// `ON DELETE RESTRICT` surfaces as `SQLITE_CONSTRAINT_TRIGGER`, deferred and
    /// immediate checks as `SQLITE_CONSTRAINT_FOREIGNKEY`.
    pub fn is_foreign_key_violation(&self) -> bool {
        match self {
            DbError::Sqlite(rusqlite::Error::SqliteFailure(err, msg)) => {
                err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY
                    || (err.code == rusqlite::ErrorCode::ConstraintViolation
                        && msg
                            .as_deref()
                            .is_some_and(|m| m.contains("FOREIGN KEY constraint failed")))
            }
            _ => false,
        }
    }
}

/// A row from the `users` table (administrators).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbUser {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

/// A row from the `promoters` table (field agents).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbPromoter {
    pub id: i64,
    pub name: String,
    pub username: String,
    pub phone: Option<String>,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub state: Option<String>,
    pub district: Option<String>,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

/// A row from the `roles` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbRole {
    pub id: i64,
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub created_at: String,
}

/// A row from the `permissions` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbPermission {
    pub id: i64,
    pub name: String,
    pub module: String,
    pub description: Option<String>,
}

/// A row from `user_states`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbUserState {
    pub id: i64,
    pub user_id: i64,
    pub state: String,
    pub is_active: bool,
}

/// A row from the `route_plans` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbRoutePlan {
    pub id: i64,
    pub state: String,
    pub district: String,
    pub sub_district: Option<String>,
    pub village: Option<String>,
    pub village_code: Option<String>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub area: Option<f64>,
    pub wall_count: i64,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

/// A row from the `activity_recces` table.
///
/// Coordinates are fixed-point with 7 decimal places; they are stored as
/// canonical text so repeated resubmissions compare exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbActivityRecce {
    pub id: i64,
    pub promoter_id: i64,
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
    pub wall_code: Option<String>,
    pub product_type: Option<String>,
    pub width: f64,
    pub height: f64,
    pub area: f64,
    pub photos: Vec<String>,
    pub remarks: Option<String>,
    pub status: String,
    pub local_id: Option<String>,
    pub device_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Columns written by an ingestion upsert. Everything the mobile payload can
/// carry, already validated and normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityRecceWrite {
    pub promoter_id: i64,
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
    pub width: f64,
    pub height: f64,
    pub photos: Vec<String>,
    pub remarks: Option<String>,
    pub local_id: Option<String>,
    pub device_id: Option<String>,
}

/// Read a canonical decimal text column.
pub(crate) fn decimal_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Canonical storage text for a coordinate: always exactly 7 decimal places.
pub fn coordinate_text(value: Decimal) -> String {
    let mut rounded = value.round_dp(7);
    rounded.rescale(7);
    rounded.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_text_is_fixed_scale() {
        assert_eq!(coordinate_text(Decimal::from_str("12.9716").unwrap()), "12.9716000");
        assert_eq!(
            coordinate_text(Decimal::from_str("77.594566312").unwrap()),
            "77.5945663"
        );
        assert_eq!(coordinate_text(Decimal::from_str("-8").unwrap()), "-8.0000000");
    }
}
