//! Error types at the operation boundary.
//!
//! Errors are classified by who has to act:
//! - Client: Validation, Conflict, NotFound, Unauthorized, Forbidden
//! - Server: Persistence (details are logged, never returned)

use std::collections::BTreeMap;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::db::DbError;

/// Generic message returned in place of any store failure.
pub const GENERIC_SERVER_MESSAGE: &str = "Server error. Please try again later.";

/// Field-keyed validation messages, rendered as `{"field": ["msg", ...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-field shortcut.
    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    /// `Ok(value)` when nothing was recorded, otherwise a Validation error.
    pub fn into_result<T>(self, value: T) -> Result<T, AppError> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(AppError::Validation(self))
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("The given data was invalid")]
    Validation(ValidationErrors),

    /// A uniqueness or referential rule blocked the write.
    #[error("{message}")]
    Conflict { field: String, message: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("Unauthenticated")]
    Unauthorized,

    #[error("This action is unauthorized")]
    Forbidden,

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl AppError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation(ValidationErrors::single(field, message))
    }

    pub fn conflict(field: &str, message: impl Into<String>) -> Self {
        AppError::Conflict {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        AppError::NotFound(what.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::Conflict { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Field errors for the response body, if this error carries any.
    pub fn field_errors(&self) -> Option<ValidationErrors> {
        match self {
            AppError::Validation(errors) => Some(errors.clone()),
            AppError::Conflict { field, message } => Some(ValidationErrors::single(field, message)),
            _ => None,
        }
    }

    /// Message safe to show a client.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Persistence(_) => GENERIC_SERVER_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }
}

impl From<DbError> for AppError {
    fn from(err: DbError) -> Self {
        AppError::Persistence(err.to_string())
    }
}

/// JSON error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<ValidationErrors>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::Persistence(ref detail) = self {
            tracing::error!(error = %detail, "Request failed in the store");
        }
        let body = ErrorResponse {
            message: self.public_message(),
            errors: self.field_errors(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::validation("location", "required").status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AppError::conflict("name", "taken").status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(AppError::not_found("Activity").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::Forbidden.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_persistence_detail_is_hidden() {
        let err = AppError::Persistence("no such table: activity_recces".into());
        assert_eq!(err.public_message(), GENERIC_SERVER_MESSAGE);
        assert!(err.field_errors().is_none());
    }

    #[test]
    fn test_validation_errors_group_by_field() {
        let mut errors = ValidationErrors::new();
        errors.add("latitude", "out of range");
        errors.add("latitude", "must be numeric");
        errors.add("location", "required");
        let json = serde_json::to_value(&errors).unwrap();
        assert_eq!(json["latitude"].as_array().unwrap().len(), 2);
        assert_eq!(json["location"][0], "required");
        assert!(errors.into_result(()).is_err());
    }
}
