//! Shared application state for the HTTP server.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::Config;
use crate::db::FieldDb;
use crate::error::AppError;
use crate::request_log::RequestLog;
use crate::services::dashboard::DashboardCache;

pub struct AppState {
    /// The single SQLite connection. Only touched from blocking threads.
    pub db: Arc<Mutex<FieldDb>>,
    pub config: Config,
    pub dashboard_cache: DashboardCache,
    pub request_log: Arc<RequestLog>,
}

impl AppState {
    pub fn new(db: FieldDb, config: Config, request_log: RequestLog) -> Self {
        let ttl = Duration::from_secs(config.dashboard_cache_ttl_secs);
        Self {
            db: Arc::new(Mutex::new(db)),
            config,
            dashboard_cache: DashboardCache::new(ttl),
            request_log: Arc::new(request_log),
        }
    }

    /// Run `f` against the store on the blocking pool.
    pub async fn with_db<F, T>(&self, f: F) -> Result<T, AppError>
    where
        F: FnOnce(&FieldDb) -> Result<T, AppError> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let guard = db.lock();
            f(&guard)
        })
        .await
        .map_err(|e| AppError::Persistence(format!("Blocking task failed: {e}")))?
    }
}
