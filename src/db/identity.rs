use rusqlite::{params, params_from_iter, OptionalExtension};

use super::*;

/// Owner kind recorded on an access token.
pub const TOKEN_OWNER_USER: &str = "user";
pub const TOKEN_OWNER_PROMOTER: &str = "promoter";

/// Fields for a new promoter row.
#[derive(Debug, Clone)]
pub struct NewPromoter<'a> {
    pub name: &'a str,
    pub username: &'a str,
    pub phone: Option<&'a str>,
    pub password_hash: &'a str,
    pub state: Option<&'a str>,
    pub district: Option<&'a str>,
    pub status: &'a str,
}

/// A resolved bearer token row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbAccessToken {
    pub id: i64,
    pub owner_kind: String,
    pub owner_id: i64,
}

const USER_COLUMNS: &str = "id, name, email, password_hash, status, created_at, updated_at";
const PROMOTER_COLUMNS: &str =
    "id, name, username, phone, password_hash, state, district, status, created_at, updated_at";

impl FieldDb {
    // =========================================================================
    // Users
    // =========================================================================

    pub fn create_user(
        &self,
        name: &str,
        email: &str,
        password_hash: &str,
        status: &str,
    ) -> Result<i64, DbError> {
        let now = now_rfc3339();
        self.conn.execute(
            "INSERT INTO users (name, email, password_hash, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![name, email, password_hash, status, now],
        )?;
        Ok(self.last_insert_id())
    }

    pub fn get_user(&self, id: i64) -> Result<Option<DbUser>, DbError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![id], Self::map_user_row)
            .optional()?)
    }

    /// Get a user by email (case-insensitive).
    pub fn get_user_by_email(&self, email: &str) -> Result<Option<DbUser>, DbError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE LOWER(email) = LOWER(?1)");
        Ok(self
            .conn
            .query_row(&sql, params![email.trim()], Self::map_user_row)
            .optional()?)
    }

    pub fn list_users(&self) -> Result<Vec<DbUser>, DbError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY name");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], Self::map_user_row)?;
        collect_rows(rows)
    }

    fn map_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbUser> {
        Ok(DbUser {
            id: row.get(0)?,
            name: row.get(1)?,
            email: row.get(2)?,
            password_hash: row.get(3)?,
            status: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    /// Role names held by a user, alphabetically.
    pub fn user_role_names(&self, user_id: i64) -> Result<Vec<String>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT r.name FROM roles r
             JOIN user_roles ur ON ur.role_id = r.id
             WHERE ur.user_id = ?1
             ORDER BY r.name",
        )?;
        let rows = stmt.query_map(params![user_id], |row| row.get(0))?;
        collect_rows(rows)
    }

    /// Attach a role to a user. Returns `true` if a new pivot row was created.
    pub fn attach_role_to_user(&self, user_id: i64, role_id: i64) -> Result<bool, DbError> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO user_roles (user_id, role_id) VALUES (?1, ?2)",
            params![user_id, role_id],
        )?;
        Ok(changed > 0)
    }

    /// Replace the user's roles with exactly `role_ids`.
    pub fn sync_user_roles(&self, user_id: i64, role_ids: &[i64]) -> Result<(), DbError> {
        self.conn
            .execute("DELETE FROM user_roles WHERE user_id = ?1", params![user_id])?;
        for role_id in role_ids {
            self.attach_role_to_user(user_id, *role_id)?;
        }
        Ok(())
    }

    /// Replace the user's direct permission grants with exactly `permission_ids`.
    pub fn sync_user_permissions(
        &self,
        user_id: i64,
        permission_ids: &[i64],
    ) -> Result<(), DbError> {
        self.conn.execute(
            "DELETE FROM user_permissions WHERE user_id = ?1",
            params![user_id],
        )?;
        for permission_id in permission_ids {
            self.conn.execute(
                "INSERT OR IGNORE INTO user_permissions (user_id, permission_id) VALUES (?1, ?2)",
                params![user_id, permission_id],
            )?;
        }
        Ok(())
    }

    /// Names of the permissions granted directly to a user (not through roles).
    pub fn user_direct_permission_names(&self, user_id: i64) -> Result<Vec<String>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT p.name FROM permissions p
             JOIN user_permissions up ON up.permission_id = p.id
             WHERE up.user_id = ?1
             ORDER BY p.name",
        )?;
        let rows = stmt.query_map(params![user_id], |row| row.get(0))?;
        collect_rows(rows)
    }

    /// Additive permission check: a direct grant, a grant through any held role,
    /// or `super_admin` membership. A permission name absent from the catalogue
    /// never matches.
    pub fn user_has_permission(&self, user_id: i64, permission: &str) -> Result<bool, DbError> {
        let allowed: bool = self.conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM permissions p
                WHERE p.name = ?2 AND (
                    EXISTS(SELECT 1 FROM user_permissions up
                           WHERE up.user_id = ?1 AND up.permission_id = p.id)
                    OR EXISTS(SELECT 1 FROM user_roles ur
                              JOIN role_permissions rp ON rp.role_id = ur.role_id
                              WHERE ur.user_id = ?1 AND rp.permission_id = p.id)
                    OR EXISTS(SELECT 1 FROM user_roles ur
                              JOIN roles r ON r.id = ur.role_id
                              WHERE ur.user_id = ?1 AND r.name = 'super_admin')
                )
            )",
            params![user_id, permission],
            |row| row.get(0),
        )?;
        Ok(allowed)
    }

    /// Every permission name the user effectively holds.
    pub fn user_effective_permissions(&self, user_id: i64) -> Result<Vec<String>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT p.name FROM permissions p
             WHERE EXISTS(SELECT 1 FROM user_permissions up
                          WHERE up.user_id = ?1 AND up.permission_id = p.id)
                OR EXISTS(SELECT 1 FROM user_roles ur
                          JOIN role_permissions rp ON rp.role_id = ur.role_id
                          WHERE ur.user_id = ?1 AND rp.permission_id = p.id)
                OR EXISTS(SELECT 1 FROM user_roles ur
                          JOIN roles r ON r.id = ur.role_id
                          WHERE ur.user_id = ?1 AND r.name = 'super_admin')
             ORDER BY p.name",
        )?;
        let rows = stmt.query_map(params![user_id], |row| row.get(0))?;
        collect_rows(rows)
    }

    // =========================================================================
    // User states
    // =========================================================================

    pub fn user_states(&self, user_id: i64) -> Result<Vec<DbUserState>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, state, is_active FROM user_states
             WHERE user_id = ?1 ORDER BY state",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok(DbUserState {
                id: row.get(0)?,
                user_id: row.get(1)?,
                state: row.get(2)?,
                is_active: row.get::<_, i32>(3)? != 0,
            })
        })?;
        collect_rows(rows)
    }

    /// Replace a user's state assignments. Listed states become active rows;
    /// states no longer listed are removed.
    pub fn sync_user_states(&self, user_id: i64, states: &[String]) -> Result<(), DbError> {
        let now = now_rfc3339();
        let keep: Vec<String> = states
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let existing = self.user_states(user_id)?;
        for row in existing {
            if !keep.iter().any(|s| s.eq_ignore_ascii_case(row.state.trim())) {
                self.conn
                    .execute("DELETE FROM user_states WHERE id = ?1", params![row.id])?;
            }
        }
        for state in &keep {
            // Reactivate a case-variant row instead of inserting a near-duplicate.
            if self.set_user_state_active(user_id, state, true)? {
                continue;
            }
            self.conn.execute(
                "INSERT INTO user_states (user_id, state, is_active, created_at)
                 VALUES (?1, ?2, 1, ?3)",
                params![user_id, state, now],
            )?;
        }
        Ok(())
    }

    /// Toggle one assignment without removing it.
    pub fn set_user_state_active(
        &self,
        user_id: i64,
        state: &str,
        active: bool,
    ) -> Result<bool, DbError> {
        let changed = self.conn.execute(
            "UPDATE user_states SET is_active = ?3
             WHERE user_id = ?1 AND LOWER(TRIM(state)) = LOWER(TRIM(?2))",
            params![user_id, state, active as i32],
        )?;
        Ok(changed > 0)
    }

    // =========================================================================
    // Promoters
    // =========================================================================

    pub fn create_promoter(&self, promoter: &NewPromoter<'_>) -> Result<i64, DbError> {
        let now = now_rfc3339();
        self.conn.execute(
            "INSERT INTO promoters
                (name, username, phone, password_hash, state, district, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                promoter.name,
                promoter.username,
                promoter.phone,
                promoter.password_hash,
                promoter.state,
                promoter.district,
                promoter.status,
                now,
            ],
        )?;
        Ok(self.last_insert_id())
    }

    pub fn get_promoter(&self, id: i64) -> Result<Option<DbPromoter>, DbError> {
        let sql = format!("SELECT {PROMOTER_COLUMNS} FROM promoters WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![id], Self::map_promoter_row)
            .optional()?)
    }

    pub fn get_promoter_by_username(&self, username: &str) -> Result<Option<DbPromoter>, DbError> {
        let sql = format!("SELECT {PROMOTER_COLUMNS} FROM promoters WHERE username = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![username.trim()], Self::map_promoter_row)
            .optional()?)
    }

    /// List promoters matching `filter` (typically a state scope), by name.
    pub fn list_promoters(&self, filter: &SqlFilter) -> Result<Vec<DbPromoter>, DbError> {
        let sql = format!(
            "SELECT {PROMOTER_COLUMNS} FROM promoters{} ORDER BY name",
            filter.where_sql()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(filter.params()), Self::map_promoter_row)?;
        collect_rows(rows)
    }

    pub fn set_promoter_status(&self, id: i64, status: &str) -> Result<bool, DbError> {
        let changed = self.conn.execute(
            "UPDATE promoters SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status, now_rfc3339()],
        )?;
        Ok(changed > 0)
    }

    /// Number of recce rows referencing a promoter.
    pub fn count_recces_for_promoter(&self, promoter_id: i64) -> Result<i64, DbError> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM activity_recces WHERE promoter_id = ?1",
            params![promoter_id],
            |row| row.get(0),
        )?)
    }

    pub fn delete_promoter(&self, id: i64) -> Result<bool, DbError> {
        self.conn.execute(
            "DELETE FROM access_tokens WHERE owner_kind = ?1 AND owner_id = ?2",
            params![TOKEN_OWNER_PROMOTER, id],
        )?;
        let changed = self
            .conn
            .execute("DELETE FROM promoters WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    fn map_promoter_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbPromoter> {
        Ok(DbPromoter {
            id: row.get(0)?,
            name: row.get(1)?,
            username: row.get(2)?,
            phone: row.get(3)?,
            password_hash: row.get(4)?,
            state: row.get(5)?,
            district: row.get(6)?,
            status: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    // =========================================================================
    // Roles
    // =========================================================================

    pub fn list_roles(&self) -> Result<Vec<DbRole>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, display_name, description, created_at FROM roles ORDER BY name",
        )?;
        let rows = stmt.query_map([], Self::map_role_row)?;
        collect_rows(rows)
    }

    pub fn get_role(&self, id: i64) -> Result<Option<DbRole>, DbError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, display_name, description, created_at FROM roles WHERE id = ?1",
                params![id],
                Self::map_role_row,
            )
            .optional()?)
    }

    pub fn get_role_by_name(&self, name: &str) -> Result<Option<DbRole>, DbError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, display_name, description, created_at FROM roles WHERE name = ?1",
                params![name],
                Self::map_role_row,
            )
            .optional()?)
    }

    pub fn create_role(
        &self,
        name: &str,
        display_name: Option<&str>,
        description: Option<&str>,
    ) -> Result<i64, DbError> {
        self.conn.execute(
            "INSERT INTO roles (name, display_name, description, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![name, display_name, description, now_rfc3339()],
        )?;
        Ok(self.last_insert_id())
    }

    /// Delete a role row. Callers enforce the `super_admin` guard.
    pub fn delete_role(&self, id: i64) -> Result<bool, DbError> {
        let changed = self
            .conn
            .execute("DELETE FROM roles WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    fn map_role_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbRole> {
        Ok(DbRole {
            id: row.get(0)?,
            name: row.get(1)?,
            display_name: row.get(2)?,
            description: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    pub fn role_permission_names(&self, role_id: i64) -> Result<Vec<String>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT p.name FROM permissions p
             JOIN role_permissions rp ON rp.permission_id = p.id
             WHERE rp.role_id = ?1
             ORDER BY p.name",
        )?;
        let rows = stmt.query_map(params![role_id], |row| row.get(0))?;
        collect_rows(rows)
    }

    /// Attach a permission to a role. Returns `true` if a new pivot row was created.
    pub fn attach_permission_to_role(
        &self,
        role_id: i64,
        permission_id: i64,
    ) -> Result<bool, DbError> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO role_permissions (role_id, permission_id) VALUES (?1, ?2)",
            params![role_id, permission_id],
        )?;
        Ok(changed > 0)
    }

    /// Replace the role's permissions with exactly `permission_ids`.
    pub fn sync_role_permissions(
        &self,
        role_id: i64,
        permission_ids: &[i64],
    ) -> Result<(), DbError> {
        self.conn.execute(
            "DELETE FROM role_permissions WHERE role_id = ?1",
            params![role_id],
        )?;
        for permission_id in permission_ids {
            self.attach_permission_to_role(role_id, *permission_id)?;
        }
        Ok(())
    }

    // =========================================================================
    // Permissions
    // =========================================================================

    pub fn list_permissions(&self) -> Result<Vec<DbPermission>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, module, description FROM permissions ORDER BY module, name",
        )?;
        let rows = stmt.query_map([], Self::map_permission_row)?;
        collect_rows(rows)
    }

    pub fn get_permission_by_name(&self, name: &str) -> Result<Option<DbPermission>, DbError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, module, description FROM permissions WHERE name = ?1",
                params![name],
                Self::map_permission_row,
            )
            .optional()?)
    }

    /// Insert a permission; a duplicate name surfaces as a unique violation.
    pub fn create_permission(
        &self,
        name: &str,
        module: &str,
        description: Option<&str>,
    ) -> Result<i64, DbError> {
        self.conn.execute(
            "INSERT INTO permissions (name, module, description, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![name, module, description, now_rfc3339()],
        )?;
        Ok(self.last_insert_id())
    }

    /// Insert or refresh a permission by name, returning its id.
    pub fn upsert_permission(
        &self,
        name: &str,
        module: &str,
        description: Option<&str>,
    ) -> Result<i64, DbError> {
        let id = self.conn.query_row(
            "INSERT INTO permissions (name, module, description, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name) DO UPDATE SET
                module = excluded.module,
                description = COALESCE(excluded.description, permissions.description)
             RETURNING id",
            params![name, module, description, now_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn map_permission_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbPermission> {
        Ok(DbPermission {
            id: row.get(0)?,
            name: row.get(1)?,
            module: row.get(2)?,
            description: row.get(3)?,
        })
    }

    // =========================================================================
    // Access tokens
    // =========================================================================

    pub fn insert_access_token(
        &self,
        owner_kind: &str,
        owner_id: i64,
        name: &str,
        token_hash: &str,
    ) -> Result<i64, DbError> {
        self.conn.execute(
            "INSERT INTO access_tokens (owner_kind, owner_id, name, token_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![owner_kind, owner_id, name, token_hash, now_rfc3339()],
        )?;
        Ok(self.last_insert_id())
    }

    /// Resolve a token digest and stamp `last_used_at`.
    pub fn find_access_token(&self, token_hash: &str) -> Result<Option<DbAccessToken>, DbError> {
        let token = self
            .conn
            .query_row(
                "SELECT id, owner_kind, owner_id FROM access_tokens WHERE token_hash = ?1",
                params![token_hash],
                |row| {
                    Ok(DbAccessToken {
                        id: row.get(0)?,
                        owner_kind: row.get(1)?,
                        owner_id: row.get(2)?,
                    })
                },
            )
            .optional()?;
        if let Some(ref token) = token {
            self.conn.execute(
                "UPDATE access_tokens SET last_used_at = ?2 WHERE id = ?1",
                params![token.id, now_rfc3339()],
            )?;
        }
        Ok(token)
    }

    pub fn delete_access_token(&self, token_hash: &str) -> Result<bool, DbError> {
        let changed = self.conn.execute(
            "DELETE FROM access_tokens WHERE token_hash = ?1",
            params![token_hash],
        )?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::test_db;
    use super::*;

    fn user(db: &FieldDb, email: &str) -> i64 {
        db.create_user("Test", email, "hash", "active").expect("create user")
    }

    #[test]
    fn test_direct_grant_is_additive_and_revocable() {
        let db = test_db();
        let uid = user(&db, "ops@example.com");
        let perm = db
            .get_permission_by_name("dashboard.view")
            .unwrap()
            .expect("seeded permission");

        assert!(!db.user_has_permission(uid, "dashboard.view").unwrap());

        db.sync_user_permissions(uid, &[perm.id]).unwrap();
        assert!(db.user_has_permission(uid, "dashboard.view").unwrap());

        db.sync_user_permissions(uid, &[]).unwrap();
        assert!(!db.user_has_permission(uid, "dashboard.view").unwrap());
    }

    #[test]
    fn test_role_grant_and_unknown_permission() {
        let db = test_db();
        let uid = user(&db, "viewer@example.com");
        let role_id = db.create_role("viewer", None, None).unwrap();
        let perm = db.get_permission_by_name("route_plan.view").unwrap().unwrap();
        db.attach_permission_to_role(role_id, perm.id).unwrap();
        db.attach_role_to_user(uid, role_id).unwrap();

        assert!(db.user_has_permission(uid, "route_plan.view").unwrap());
        assert!(!db.user_has_permission(uid, "route_plan.delete").unwrap());
        assert!(!db.user_has_permission(uid, "does.not_exist").unwrap());
    }

    #[test]
    fn test_super_admin_holds_every_existing_permission() {
        let db = test_db();
        let uid = user(&db, "root@example.com");
        let role = db.get_role_by_name("super_admin").unwrap().unwrap();
        db.attach_role_to_user(uid, role.id).unwrap();
        let new_perm = db.create_permission("report.build", "report", None).unwrap();
        assert!(new_perm > 0);

        assert!(db.user_has_permission(uid, "report.build").unwrap());
        assert!(!db.user_has_permission(uid, "never.created").unwrap());
    }

    #[test]
    fn test_duplicate_permission_is_unique_violation() {
        let db = test_db();
        let err = db
            .create_permission("dashboard.view", "dashboard", None)
            .unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[test]
    fn test_upsert_permission_is_idempotent() {
        let db = test_db();
        let first = db.upsert_permission("settings.view", "settings", None).unwrap();
        let second = db
            .upsert_permission("settings.view", "settings", Some("View settings"))
            .unwrap();
        assert_eq!(first, second);
        let perm = db.get_permission_by_name("settings.view").unwrap().unwrap();
        assert_eq!(perm.description.as_deref(), Some("View settings"));
    }

    #[test]
    fn test_sync_user_states_replaces_assignments() {
        let db = test_db();
        let uid = user(&db, "north@example.com");
        db.sync_user_states(uid, &["Karnataka".into(), "Goa".into()])
            .unwrap();
        db.sync_user_states(uid, &["Karnataka".into(), " Kerala ".into()])
            .unwrap();

        let states: Vec<String> = db
            .user_states(uid)
            .unwrap()
            .into_iter()
            .map(|s| s.state)
            .collect();
        assert_eq!(states, vec!["Karnataka".to_string(), "Kerala".to_string()]);

        assert!(db.set_user_state_active(uid, "karnataka", false).unwrap());
        let karnataka = db
            .user_states(uid)
            .unwrap()
            .into_iter()
            .find(|s| s.state == "Karnataka")
            .unwrap();
        assert!(!karnataka.is_active);
    }

    #[test]
    fn test_access_token_roundtrip() {
        let db = test_db();
        let uid = user(&db, "token@example.com");
        db.insert_access_token(TOKEN_OWNER_USER, uid, "web", "digest")
            .unwrap();

        let token = db.find_access_token("digest").unwrap().expect("token");
        assert_eq!(token.owner_kind, TOKEN_OWNER_USER);
        assert_eq!(token.owner_id, uid);

        assert!(db.delete_access_token("digest").unwrap());
        assert!(db.find_access_token("digest").unwrap().is_none());
    }
}
