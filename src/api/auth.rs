//! Bearer token extractors.
//!
//! `Authenticated` accepts any active principal. `AdminAuth` and `PromoterAuth`
//! additionally require the principal kind, answering 403 for the other one.

use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::{HeaderMap, AUTHORIZATION};
use axum::http::request::Parts;

use crate::error::AppError;
use crate::principal::{FieldPromoter, Principal};
use crate::services::auth::{authenticate, Session};

use super::state::AppState;

/// Token from an `Authorization: Bearer <token>` header.
pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let auth = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let auth_lower = auth.to_ascii_lowercase();
    if auth_lower.starts_with("bearer ") {
        Some(auth[7..].trim().to_string()).filter(|t| !t.is_empty())
    } else {
        None
    }
}

#[derive(Debug, Clone)]
pub struct Authenticated(pub Session);

impl Authenticated {
    pub fn principal(&self) -> &Principal {
        &self.0.principal
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Authenticated {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(&parts.headers).ok_or_else(|| {
            tracing::debug!("Request missing Bearer token");
            AppError::Unauthorized
        })?;
        let session = state
            .with_db(move |db| Ok(authenticate(db, &token)?))
            .await?
            .ok_or(AppError::Unauthorized)?;
        Ok(Authenticated(session))
    }
}

/// An authenticated administrator.
#[derive(Debug, Clone)]
pub struct AdminAuth(pub Principal);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Authenticated(session) = Authenticated::from_request_parts(parts, state).await?;
        match session.principal {
            principal @ Principal::Admin(_) => Ok(AdminAuth(principal)),
            Principal::Promoter(_) => Err(AppError::Forbidden),
        }
    }
}

/// An authenticated field promoter.
#[derive(Debug, Clone)]
pub struct PromoterAuth(pub FieldPromoter);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for PromoterAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Authenticated(session) = Authenticated::from_request_parts(parts, state).await?;
        match session.principal {
            Principal::Promoter(promoter) => Ok(PromoterAuth(promoter)),
            Principal::Admin(_) => Err(AppError::Forbidden),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_extract_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer  abc123 "));
        assert_eq!(extract_bearer_token(&headers), Some("abc123".to_string()));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(extract_bearer_token(&headers), None);
    }
}
