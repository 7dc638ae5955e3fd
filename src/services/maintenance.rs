// Maintenance operations behind the CLI subcommands.

use serde::Serialize;

use crate::access::permissions::{names, SUPER_ADMIN_ROLE};
use crate::db::maintenance::NaCounts;
use crate::db::{DbError, FieldDb};
use crate::error::AppError;
use crate::principal::AdminUser;

use super::ingestion::derive_wall_code;
use super::rbac::{insert_user, UserInput};

const SETTINGS_PERMISSIONS: [(&str, &str); 2] = [
    (names::SETTINGS_VIEW, "View application settings"),
    (names::SETTINGS_UPDATE, "Update application settings"),
];

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SettingsPermissionsReport {
    pub permissions: Vec<String>,
    /// Pivot rows newly created on `super_admin`.
    pub newly_attached: usize,
}

/// Upsert the settings permissions and attach them to `super_admin`. Idempotent.
pub fn add_settings_permissions(db: &FieldDb) -> Result<SettingsPermissionsReport, AppError> {
    let report = db.with_transaction(|tx| -> Result<_, AppError> {
        let role = tx
            .get_role_by_name(SUPER_ADMIN_ROLE)?
            .ok_or_else(|| AppError::not_found("Role super_admin"))?;
        let mut newly_attached = 0;
        let mut permissions = Vec::new();
        for (name, description) in SETTINGS_PERMISSIONS {
            let id = tx.upsert_permission(name, "settings", Some(description))?;
            if tx.attach_permission_to_role(role.id, id)? {
                newly_attached += 1;
            }
            permissions.push(name.to_string());
        }
        Ok(SettingsPermissionsReport {
            permissions,
            newly_attached,
        })
    })?;
    log::info!(
        "Settings permissions ensured ({} newly attached to {})",
        report.newly_attached,
        SUPER_ADMIN_ROLE
    );
    Ok(report)
}

/// `user:create`: same validation as the admin endpoint, no acting principal.
pub fn create_console_user(db: &FieldDb, input: &UserInput) -> Result<AdminUser, AppError> {
    let user_id = insert_user(db, input)?;
    log::info!("Created user {} from the console", user_id);
    AdminUser::load(db, user_id)?.ok_or_else(|| AppError::not_found("User"))
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssignOutcome {
    Assigned,
    AlreadyAssigned,
}

/// Give the account with `email` the `super_admin` role.
pub fn assign_super_admin(db: &FieldDb, email: &str) -> Result<AssignOutcome, AppError> {
    let user = db
        .get_user_by_email(email)?
        .ok_or_else(|| AppError::not_found(format!("User {}", email.trim())))?;
    let role = db
        .get_role_by_name(SUPER_ADMIN_ROLE)?
        .ok_or_else(|| AppError::not_found("Role super_admin"))?;
    let outcome = if db.attach_role_to_user(user.id, role.id)? {
        AssignOutcome::Assigned
    } else {
        AssignOutcome::AlreadyAssigned
    };
    log::info!("super_admin for {}: {:?}", user.email, outcome);
    Ok(outcome)
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NaFixReport {
    pub dry_run: bool,
    pub found: NaCounts,
    /// Rows nulled. Zero on a dry run.
    pub cleared: NaCounts,
    /// Recces whose wall code was rebuilt from a valid village code.
    pub wall_codes_rebuilt: usize,
}

/// Null out `#N/A` geography codes and rebuild wall codes. All or nothing.
pub fn fix_na_values(db: &FieldDb, dry_run: bool) -> Result<NaFixReport, AppError> {
    if dry_run {
        let found = db.count_na_values()?;
        return Ok(NaFixReport {
            dry_run,
            found,
            cleared: NaCounts::default(),
            wall_codes_rebuilt: 0,
        });
    }
    let report = db.with_transaction(|tx| -> Result<_, DbError> {
        let found = tx.count_na_values()?;
        let cleared = tx.clear_na_values()?;
        let mut wall_codes_rebuilt = 0;
        for (id, village_code) in tx.recces_missing_wall_code()? {
            if let Some(code) = derive_wall_code(Some(&village_code), id) {
                tx.set_recce_wall_code(id, Some(&code))?;
                wall_codes_rebuilt += 1;
            }
        }
        Ok(NaFixReport {
            dry_run,
            found,
            cleared,
            wall_codes_rebuilt,
        })
    })?;
    log::info!(
        "Cleared {} #N/A values, rebuilt {} wall codes",
        report.cleared.total(),
        report.wall_codes_rebuilt
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::identity::NewPromoter;
    use crate::db::test_utils::test_db;

    fn seed_recce(db: &FieldDb, promoter_id: i64, village_code: &str, wall_code: Option<&str>) -> i64 {
        db.conn_ref()
            .execute(
                "INSERT INTO activity_recces
                    (promoter_id, plan_id, visit_date, latitude, longitude, location,
                     village_code, wall_code, width, height, area, status, created_at, updated_at)
                 VALUES (?1, 0, '2025-01-01 09:00:00', '0.0000000', '0.0000000', 'x',
                         ?2, ?3, 8, 5, 40, 'pending', '2025-01-01', '2025-01-01')",
                rusqlite::params![promoter_id, village_code, wall_code],
            )
            .unwrap();
        db.conn_ref().last_insert_rowid()
    }

    #[test]
    fn test_settings_permissions_are_idempotent() {
        let db = test_db();
        let first = add_settings_permissions(&db).unwrap();
        assert_eq!(first.newly_attached, 2);
        let second = add_settings_permissions(&db).unwrap();
        assert_eq!(second.newly_attached, 0);

        let role = db.get_role_by_name(SUPER_ADMIN_ROLE).unwrap().unwrap();
        let held = db.role_permission_names(role.id).unwrap();
        assert!(held.contains(&names::SETTINGS_VIEW.to_string()));
        assert!(held.contains(&names::SETTINGS_UPDATE.to_string()));
    }

    #[test]
    fn test_console_user_then_assign() {
        let db = test_db();
        let input = UserInput {
            name: Some("Ops Lead".into()),
            email: Some("Lead@Example.com".into()),
            password: Some("correct-horse".into()),
            ..Default::default()
        };
        let user = create_console_user(&db, &input).unwrap();
        assert_eq!(user.user.email, "lead@example.com");
        assert_eq!(
            assign_super_admin(&db, "lead@example.com").unwrap(),
            AssignOutcome::Assigned
        );

        let short = UserInput {
            password: Some("short".into()),
            ..input
        };
        assert!(matches!(
            create_console_user(&db, &short),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_assign_super_admin() {
        let db = test_db();
        assert!(matches!(
            assign_super_admin(&db, "missing@example.com"),
            Err(AppError::NotFound(_))
        ));
        db.create_user("Root", "root@example.com", "x", "active").unwrap();
        assert_eq!(
            assign_super_admin(&db, "ROOT@example.com").unwrap(),
            AssignOutcome::Assigned
        );
        assert_eq!(
            assign_super_admin(&db, "root@example.com").unwrap(),
            AssignOutcome::AlreadyAssigned
        );
    }

    #[test]
    fn test_fix_na_values_dry_run_then_apply() {
        let db = test_db();
        let pid = db
            .create_promoter(&NewPromoter {
                name: "P",
                username: "p",
                phone: None,
                password_hash: "x",
                state: None,
                district: None,
                status: "active",
            })
            .unwrap();
        let na_village = seed_recce(&db, pid, "#N/A", Some("#N/A"));
        let good_village = seed_recce(&db, pid, "KA123", Some("#N/A"));

        let dry = fix_na_values(&db, true).unwrap();
        assert_eq!(dry.found.recce_village_codes, 1);
        assert_eq!(dry.found.recce_wall_codes, 2);
        assert_eq!(dry.cleared.total(), 0);
        assert_eq!(db.count_na_values().unwrap().total(), 3);

        let applied = fix_na_values(&db, false).unwrap();
        assert_eq!(applied.cleared.total(), 3);
        assert_eq!(applied.wall_codes_rebuilt, 1);
        assert_eq!(db.count_na_values().unwrap().total(), 0);

        let rebuilt = db.get_recce(good_village).unwrap().unwrap();
        assert_eq!(rebuilt.wall_code, derive_wall_code(Some("KA123"), good_village));
        let nulled = db.get_recce(na_village).unwrap().unwrap();
        assert_eq!(nulled.village_code, None);
        assert_eq!(nulled.wall_code, None);
    }
}
