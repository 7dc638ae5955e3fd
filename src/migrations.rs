//! Schema migration framework.
//!
//! Numbered SQL migrations are embedded at compile time via `include_str!`.
//! Each migration runs exactly once, tracked by the `schema_version` table.
//!
//! Databases imported from the legacy admin panel already carry the baseline
//! tables. The bootstrap step detects them and marks migration 001 as applied
//! so the baseline SQL never runs against an already-populated database.

use rusqlite::Connection;

struct Migration {
    version: i32,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: include_str!("migrations/001_baseline.sql"),
    },
    Migration {
        version: 2,
        sql: include_str!("migrations/002_seed_rbac.sql"),
    },
];

/// Create the `schema_version` table if it doesn't exist.
fn ensure_schema_version_table(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("Failed to create schema_version table: {}", e))
}

/// Return the highest applied migration version, or 0 if none.
fn current_version(conn: &Connection) -> Result<i32, String> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .map_err(|e| format!("Failed to read schema version: {}", e))
}

/// Detect a pre-framework database and mark the baseline as applied.
///
/// If `activity_recces` exists but `schema_version` is empty, the tables were
/// created by an import. Only the baseline is skipped; the RBAC seed still runs
/// because it is written with `INSERT OR IGNORE`.
fn bootstrap_existing_db(conn: &Connection) -> Result<bool, String> {
    let version = current_version(conn)?;
    if version > 0 {
        return Ok(false);
    }

    let has_recces: bool = conn
        .prepare("SELECT 1 FROM activity_recces LIMIT 1")
        .and_then(|mut stmt| stmt.exists([]))
        .unwrap_or(false);

    if has_recces {
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
            [1],
        )
        .map_err(|e| format!("Failed to bootstrap schema version: {}", e))?;
        log::info!("Migration bootstrap: marked v1 (baseline) as applied for existing database");
        return Ok(true);
    }

    Ok(false)
}

/// Back up the database before applying migrations.
///
/// Uses SQLite's online backup API to create a hot copy at
/// `<db_path>.pre-migration.bak`. Only called when there are pending migrations.
fn backup_before_migration(conn: &Connection) -> Result<(), String> {
    let db_path: String = conn
        .query_row("PRAGMA database_list", [], |row| row.get(2))
        .map_err(|e| format!("Failed to get database path: {}", e))?;

    if db_path.is_empty() || db_path == ":memory:" {
        return Ok(());
    }

    let backup_path = format!("{}.pre-migration.bak", db_path);
    let mut backup_conn = rusqlite::Connection::open(&backup_path)
        .map_err(|e| format!("Failed to open backup file: {}", e))?;

    let backup = rusqlite::backup::Backup::new(conn, &mut backup_conn)
        .map_err(|e| format!("Failed to initialize pre-migration backup: {}", e))?;

    backup
        .step(-1)
        .map_err(|e| format!("Pre-migration backup failed: {}", e))?;

    log::info!("Pre-migration backup created at {}", backup_path);
    Ok(())
}

/// Run all pending migrations.
///
/// Returns the number of migrations applied (0 if already up-to-date).
///
/// Forward-compat guard: if the database has a higher version than the highest
/// known migration, returns an error telling the operator to upgrade.
pub fn run_migrations(conn: &Connection) -> Result<usize, String> {
    ensure_schema_version_table(conn)?;
    bootstrap_existing_db(conn)?;

    let current = current_version(conn)?;
    let max_known = MIGRATIONS.last().map(|m| m.version).unwrap_or(0);

    if current > max_known {
        return Err(format!(
            "Database schema version ({}) is newer than this build of fieldops supports ({}). \
             Upgrade the binary before serving this database.",
            current, max_known
        ));
    }

    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();

    if pending.is_empty() {
        return Ok(0);
    }

    backup_before_migration(conn)?;

    for migration in &pending {
        conn.execute_batch(migration.sql)
            .map_err(|e| format!("Migration v{} failed: {}", migration.version, e))?;

        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [migration.version],
        )
        .map_err(|e| {
            format!(
                "Failed to record migration v{}: {}",
                migration.version, e
            )
        })?;

        log::info!("Applied migration v{}", migration.version);
    }

    Ok(pending.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn mem_db() -> Connection {
        Connection::open_in_memory().expect("in-memory db")
    }

    #[test]
    fn test_fresh_db_applies_all_migrations() {
        let conn = mem_db();
        let applied = run_migrations(&conn).expect("migrations should succeed");
        assert_eq!(applied, 2);

        let version = current_version(&conn).expect("version query");
        assert_eq!(version, 2);

        let count: i32 = conn
            .query_row("SELECT COUNT(*) FROM activity_recces", [], |row| row.get(0))
            .expect("activity_recces table should exist");
        assert_eq!(count, 0);

        // Seeded roles hold the whole catalogue.
        let super_admin_perms: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM role_permissions rp
                 JOIN roles r ON r.id = rp.role_id
                 WHERE r.name = 'super_admin'",
                [],
                |row| row.get(0),
            )
            .expect("seeded role permissions");
        let all_perms: i64 = conn
            .query_row("SELECT COUNT(*) FROM permissions", [], |row| row.get(0))
            .expect("seeded permissions");
        assert!(all_perms > 0);
        assert_eq!(super_admin_perms, all_perms);
    }

    #[test]
    fn test_local_id_unique_per_promoter() {
        let conn = mem_db();
        run_migrations(&conn).expect("migrations");
        conn.execute_batch(
            "INSERT INTO promoters (name, username, password_hash, created_at, updated_at)
             VALUES ('P', 'p1', 'x', '2025-01-01', '2025-01-01');",
        )
        .unwrap();
        let insert = "INSERT INTO activity_recces
            (promoter_id, visit_date, latitude, longitude, location, width, height, area,
             local_id, created_at, updated_at)
            VALUES (1, '2025-01-01 00:00:00', '1.0000000', '2.0000000', 'x', 8, 5, 40, ?1,
                    '2025-01-01', '2025-01-01')";

        conn.execute(insert, ["abc"]).expect("first insert");
        assert!(conn.execute(insert, ["abc"]).is_err(), "duplicate local_id must fail");

        // NULL local_ids never collide.
        conn.execute(insert, [None::<String>]).expect("null local_id");
        conn.execute(insert, [None::<String>]).expect("second null local_id");
    }

    #[test]
    fn test_bootstrap_existing_db() {
        let conn = mem_db();

        conn.execute_batch(
            "CREATE TABLE activity_recces (
                id INTEGER PRIMARY KEY,
                location TEXT NOT NULL
            );
            INSERT INTO activity_recces (id, location) VALUES (1, 'Legacy wall');",
        )
        .expect("seed existing db");

        // Bootstrap marks v1 and then only the seed migration needs tables it creates
        // itself, so prepare the ones it touches.
        conn.execute_batch(
            "CREATE TABLE permissions (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL UNIQUE,
                module TEXT NOT NULL, description TEXT, created_at TEXT NOT NULL);
             CREATE TABLE roles (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL UNIQUE,
                display_name TEXT, description TEXT, created_at TEXT NOT NULL);
             CREATE TABLE role_permissions (role_id INTEGER NOT NULL, permission_id INTEGER NOT NULL,
                PRIMARY KEY (role_id, permission_id));",
        )
        .expect("seed rbac tables");

        let applied = run_migrations(&conn).expect("migrations should succeed");
        assert_eq!(applied, 1, "bootstrap should skip the baseline and run the seed");

        let location: String = conn
            .query_row(
                "SELECT location FROM activity_recces WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .expect("existing data should be preserved");
        assert_eq!(location, "Legacy wall");
    }

    #[test]
    fn test_forward_compat_guard() {
        let conn = mem_db();

        ensure_schema_version_table(&conn).unwrap();
        conn.execute("INSERT INTO schema_version (version) VALUES (999)", [])
            .unwrap();

        let err = run_migrations(&conn).unwrap_err();
        assert!(
            err.contains("newer than this build"),
            "error should mention version mismatch: {}",
            err
        );
    }

    #[test]
    fn test_idempotency() {
        let conn = mem_db();

        let first = run_migrations(&conn).expect("first run");
        assert_eq!(first, 2);

        let second = run_migrations(&conn).expect("second run");
        assert_eq!(second, 0, "second run should apply no migrations");
    }

    #[test]
    fn test_pre_migration_backup_created() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("test_backup.db");

        let conn = Connection::open(&db_path).expect("open db");
        conn.execute_batch("PRAGMA journal_mode=WAL;").unwrap();

        run_migrations(&conn).expect("migrations should succeed");

        let backup_path = dir.path().join("test_backup.db.pre-migration.bak");
        assert!(
            backup_path.exists(),
            "pre-migration backup should be created at {}",
            backup_path.display()
        );
    }
}
