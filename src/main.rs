//! `fieldops` binary: the HTTP server plus the maintenance console.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use fieldops_lib::api::{self, AppState};
use fieldops_lib::config::{Config, ConfigError};
use fieldops_lib::db::{DbError, FieldDb};
use fieldops_lib::error::AppError;
use fieldops_lib::migrations::run_migrations;
use fieldops_lib::request_log::{self, RequestLog, RequestLogError};
use fieldops_lib::services::maintenance::{self, AssignOutcome};
use fieldops_lib::services::rbac::UserInput;

/// FieldOps admin platform
#[derive(Parser, Debug)]
#[command(name = "fieldops", version)]
#[command(about = "Field operations API server and maintenance console")]
struct Cli {
    /// Config file (defaults to ~/.fieldops/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API
    Serve {
        /// Listen address, overrides the configured bind
        #[arg(long)]
        bind: Option<SocketAddr>,
    },

    /// Apply pending schema migrations
    Migrate,

    /// Create an admin user
    #[command(name = "user:create")]
    UserCreate {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        /// Role to attach (repeatable)
        #[arg(long = "role")]
        roles: Vec<String>,
        /// State to grant (repeatable)
        #[arg(long = "state")]
        states: Vec<String>,
    },

    /// Ensure settings.view / settings.update exist on super_admin
    #[command(name = "settings:add-permissions")]
    SettingsAddPermissions,

    /// Give an account the super_admin role
    #[command(name = "admin:assign-role")]
    AdminAssignRole {
        /// Account email (defaults to the configured admin email)
        #[arg(long)]
        email: Option<String>,
    },

    /// Null out "#N/A" geography codes and rebuild wall codes
    #[command(name = "fix:na-values")]
    FixNaValues {
        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Inspect or prune the daily request logs
    #[command(name = "api:logs")]
    ApiLogs {
        /// Only the last N matching lines
        #[arg(long)]
        tail: Option<usize>,
        /// Case-insensitive substring filter
        #[arg(long)]
        filter: Option<String>,
        /// Day to read, YYYY-MM-DD (defaults to today, UTC)
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Delete log files older than the retention window
        #[arg(long)]
        clear: bool,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    App(#[from] AppError),

    #[error(transparent)]
    RequestLog(#[from] RequestLogError),

    #[error("Invalid bind address '{0}'")]
    Bind(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            if let CliError::App(AppError::Validation(errors)) = &e {
                if let Ok(detail) = serde_json::to_string_pretty(errors) {
                    eprintln!("{detail}");
                }
            }
            ExitCode::FAILURE
        }
    }
}

/// Compact human logs, filtered by `RUST_LOG` (default `info`).
/// `log` records from the storage layer are bridged by the subscriber.
fn init_logging() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .compact()
        .with_env_filter(filter)
        .try_init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    match cli.command {
        Command::Serve { bind } => serve(config, bind).await,
        Command::Migrate => migrate(&config.resolved_db_path()?),
        Command::UserCreate {
            name,
            email,
            password,
            roles,
            states,
        } => {
            let db = FieldDb::open_at(config.resolved_db_path()?)?;
            let input = UserInput {
                name: Some(name),
                email: Some(email),
                password: Some(password),
                status: None,
                roles,
                states,
            };
            let user = maintenance::create_console_user(&db, &input)?;
            println!("Created user #{} <{}>", user.user.id, user.user.email);
            Ok(())
        }
        Command::SettingsAddPermissions => {
            let db = FieldDb::open_at(config.resolved_db_path()?)?;
            let report = maintenance::add_settings_permissions(&db)?;
            println!(
                "Ensured {} ({} newly attached to super_admin)",
                report.permissions.join(", "),
                report.newly_attached
            );
            Ok(())
        }
        Command::AdminAssignRole { email } => {
            let db = FieldDb::open_at(config.resolved_db_path()?)?;
            let email = email.unwrap_or_else(|| config.admin_email.clone());
            match maintenance::assign_super_admin(&db, &email)? {
                AssignOutcome::Assigned => println!("Assigned super_admin to {email}"),
                AssignOutcome::AlreadyAssigned => println!("{email} already has super_admin"),
            }
            Ok(())
        }
        Command::FixNaValues { dry_run } => {
            let db = FieldDb::open_at(config.resolved_db_path()?)?;
            let report = maintenance::fix_na_values(&db, dry_run)?;
            let found = &report.found;
            println!(
                "Found #N/A: {} recce village codes, {} recce wall codes, {} route plan village codes",
                found.recce_village_codes, found.recce_wall_codes, found.route_plan_village_codes
            );
            if report.dry_run {
                println!("Dry run, nothing changed");
            } else {
                println!(
                    "Cleared {} values, rebuilt {} wall codes",
                    report.cleared.total(),
                    report.wall_codes_rebuilt
                );
            }
            Ok(())
        }
        Command::ApiLogs {
            tail,
            filter,
            date,
            clear,
        } => {
            let dir = config.resolved_log_dir()?;
            let today = chrono::Utc::now().date_naive();
            if clear {
                let pruned = request_log::prune_old_logs(&dir, today)?;
                println!("Removed {pruned} log files");
                return Ok(());
            }
            let date = date.unwrap_or(today);
            let lines = request_log::read_entries(&dir, date, filter.as_deref(), tail)?;
            if lines.is_empty() {
                println!("No entries for {date}");
            }
            for line in lines {
                println!("{line}");
            }
            Ok(())
        }
    }
}

async fn serve(config: Config, bind: Option<SocketAddr>) -> Result<(), CliError> {
    let addr = match bind {
        Some(addr) => addr,
        None => config
            .bind
            .parse()
            .map_err(|_| CliError::Bind(config.bind.clone()))?,
    };
    let db_path = config.resolved_db_path()?;
    let log_dir = config.resolved_log_dir()?;
    let db = FieldDb::open_at(&db_path)?;
    tracing::info!(db = %db_path.display(), logs = %log_dir.display(), "Store opened");

    match request_log::prune_old_logs(&log_dir, chrono::Utc::now().date_naive()) {
        Ok(n) if n > 0 => tracing::info!(pruned = n, "Old request logs removed"),
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "Request log pruning failed"),
    }

    let state = Arc::new(AppState::new(db, config, RequestLog::new(log_dir)));
    api::serve(state, addr).await?;
    Ok(())
}

fn migrate(path: &Path) -> Result<(), CliError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = rusqlite::Connection::open(path).map_err(DbError::from)?;
    let applied = run_migrations(&conn).map_err(CliError::Migration)?;
    if applied == 0 {
        println!("Schema is up to date");
    } else {
        println!("Applied {applied} migrations to {}", path.display());
    }
    Ok(())
}
