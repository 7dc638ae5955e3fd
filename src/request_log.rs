//! Per-request API log.
//!
//! Every HTTP request is appended as one JSON line to
//! `{log_dir}/api-YYYY-MM-DD.log` (UTC date). `api:logs` reads these files back
//! and prunes the ones past the retention window, judged by the date in the
//! file name.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// How many days of request logs `api:logs --clear` keeps.
pub const REQUEST_LOG_RETENTION_DAYS: u64 = 30;

const FILE_PREFIX: &str = "api-";
const FILE_SUFFIX: &str = ".log";

#[derive(Debug, thiserror::Error)]
pub enum RequestLogError {
    #[error("Request log I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to encode request log entry: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestLogEntry {
    pub timestamp: String,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub duration_ms: u64,
}

/// File name for one day's log.
pub fn log_file_name(date: NaiveDate) -> String {
    format!("{FILE_PREFIX}{}{FILE_SUFFIX}", date.format("%Y-%m-%d"))
}

/// Date encoded in a log file name, if it is one of ours.
fn file_date(name: &str) -> Option<NaiveDate> {
    let stem = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
    NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()
}

/// Appends entries to the daily file. Writes are serialized so lines never interleave.
pub struct RequestLog {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl RequestLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn append(&self, date: NaiveDate, entry: &RequestLogEntry) -> Result<(), RequestLogError> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let _guard = self.write_lock.lock();
        if !self.dir.exists() {
            std::fs::create_dir_all(&self.dir)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(log_file_name(date)))?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

/// Axum middleware recording method, path, status and latency of every request.
pub async fn record_request(
    State(log): State<Arc<RequestLog>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    let now = Utc::now();
    let entry = RequestLogEntry {
        timestamp: now.to_rfc3339(),
        method,
        path,
        status: response.status().as_u16(),
        duration_ms: started.elapsed().as_millis() as u64,
    };
    let date = now.date_naive();
    tokio::task::spawn_blocking(move || {
        if let Err(e) = log.append(date, &entry) {
            tracing::warn!(error = %e, "Failed to write request log entry");
        }
    });
    response
}

/// Lines of one day's log, optionally filtered (case-insensitive substring) and
/// limited to the last `tail` matches. A missing file reads as empty.
pub fn read_entries(
    dir: &Path,
    date: NaiveDate,
    filter: Option<&str>,
    tail: Option<usize>,
) -> Result<Vec<String>, RequestLogError> {
    let path = dir.join(log_file_name(date));
    if !path.exists() {
        return Ok(Vec::new());
    }
    let needle = filter
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_lowercase);
    let reader = BufReader::new(std::fs::File::open(&path)?);
    let mut lines = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if needle
            .as_deref()
            .map_or(true, |n| line.to_lowercase().contains(n))
        {
            lines.push(line);
        }
    }
    if let Some(n) = tail {
        let skip = lines.len().saturating_sub(n);
        lines.drain(..skip);
    }
    Ok(lines)
}

/// Delete log files dated more than the retention window before `today`.
///
/// Returns the number of files pruned.
pub fn prune_old_logs(dir: &Path, today: NaiveDate) -> Result<usize, RequestLogError> {
    if !dir.exists() {
        return Ok(0);
    }
    let cutoff = today
        .checked_sub_days(chrono::Days::new(REQUEST_LOG_RETENTION_DAYS))
        .unwrap_or(today);

    let mut pruned = 0;
    for entry in std::fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(date) = path.file_name().and_then(|n| n.to_str()).and_then(file_date) else {
            continue;
        };
        if date < cutoff {
            std::fs::remove_file(&path)?;
            pruned += 1;
        }
    }
    if pruned > 0 {
        log::info!("Pruned {} request log files older than {}", pruned, cutoff);
    }
    Ok(pruned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn entry(path: &str, status: u16) -> RequestLogEntry {
        RequestLogEntry {
            timestamp: "2025-03-01T10:00:00+00:00".into(),
            method: "GET".into(),
            path: path.into(),
            status,
            duration_ms: 3,
        }
    }

    #[test]
    fn test_append_and_read_with_filter_and_tail() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = RequestLog::new(dir.path().join("logs"));
        let d = day("2025-03-01");
        for (path, status) in [("/health", 200), ("/activities", 200), ("/activities/9", 404)] {
            log.append(d, &entry(path, status)).unwrap();
        }

        let all = read_entries(log.dir(), d, None, None).unwrap();
        assert_eq!(all.len(), 3);
        let parsed: RequestLogEntry = serde_json::from_str(&all[2]).unwrap();
        assert_eq!(parsed.status, 404);

        let filtered = read_entries(log.dir(), d, Some("ACTIVITIES"), None).unwrap();
        assert_eq!(filtered.len(), 2);

        let tail = read_entries(log.dir(), d, None, Some(1)).unwrap();
        assert_eq!(tail.len(), 1);
        assert!(tail[0].contains("/activities/9"));

        assert!(read_entries(log.dir(), day("2025-03-02"), None, None)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_prune_uses_file_name_date() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = RequestLog::new(dir.path());
        let today = day("2025-03-31");
        log.append(day("2025-02-01"), &entry("/old", 200)).unwrap();
        log.append(day("2025-03-01"), &entry("/edge", 200)).unwrap();
        log.append(today, &entry("/new", 200)).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "keep").unwrap();

        assert_eq!(prune_old_logs(dir.path(), today).unwrap(), 1);
        assert!(!dir.path().join(log_file_name(day("2025-02-01"))).exists());
        assert!(dir.path().join(log_file_name(day("2025-03-01"))).exists());
        assert!(dir.path().join("notes.txt").exists());
    }
}
