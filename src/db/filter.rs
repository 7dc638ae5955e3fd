//! Small WHERE-clause builder shared by listing queries.
//!
//! Clauses use positional `?` placeholders; parameters are collected in the same
//! order so the final statement can bind them with `params_from_iter`.

use rusqlite::types::Value;

#[derive(Debug, Default, Clone)]
pub struct SqlFilter {
    clauses: Vec<String>,
    params: Vec<Value>,
}

impl SqlFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a clause with its bound values. The number of `?` in `clause` must
    /// match `values.len()`.
    pub fn push(&mut self, clause: impl Into<String>, values: impl IntoIterator<Item = Value>) {
        self.clauses.push(clause.into());
        self.params.extend(values);
    }

    /// Add `column = ?` when `value` is present and non-blank.
    pub fn eq_opt(&mut self, column: &str, value: Option<&str>) {
        if let Some(v) = value.map(str::trim).filter(|v| !v.is_empty()) {
            self.push(format!("{column} = ?"), [Value::Text(v.to_string())]);
        }
    }

    /// Add a case/whitespace-insensitive `column IN (...)` clause.
    ///
    /// An empty list produces `1 = 0` rather than being dropped: an empty allow-list
    /// never widens a query.
    pub fn in_normalized(&mut self, column: &str, values: &[String]) {
        if values.is_empty() {
            self.push("1 = 0", std::iter::empty());
            return;
        }
        let placeholders = vec!["?"; values.len()].join(", ");
        self.push(
            format!("LOWER(TRIM({column})) IN ({placeholders})"),
            values.iter().map(|v| Value::Text(normalize_key(v))),
        );
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// ` WHERE a AND b` (leading space), or an empty string when unfiltered.
    pub fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// Bound parameters followed by `extra` (for trailing LIMIT/OFFSET).
    pub fn params_with(&self, extra: impl IntoIterator<Item = Value>) -> Vec<Value> {
        let mut all = self.params.clone();
        all.extend(extra);
        all
    }
}

/// Normalization applied to both sides of every geography comparison.
pub fn normalize_key(value: &str) -> String {
    value.trim().to_lowercase()
}
