// Authentication: password hashing, bearer token issue/resolve, login and /me.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::db::identity::{TOKEN_OWNER_PROMOTER, TOKEN_OWNER_USER};
use crate::db::{DbError, FieldDb};
use crate::error::AppError;
use crate::principal::{AdminUser, FieldPromoter, Principal};
use crate::types::PrincipalStatus;

#[cfg(not(test))]
const BCRYPT_COST: u32 = bcrypt::DEFAULT_COST;
#[cfg(test)]
const BCRYPT_COST: u32 = 4;

pub const MIN_PASSWORD_LEN: usize = 8;
const BAD_CREDENTIALS: &str = "These credentials do not match our records.";
const INACTIVE_ACCOUNT: &str = "This account is not active.";

pub fn hash_password(password: &str) -> Result<String, AppError> {
    bcrypt::hash(password, BCRYPT_COST)
        .map_err(|e| AppError::Persistence(format!("Password hashing failed: {e}")))
}

/// Compare against a stored bcrypt hash. Malformed hashes never verify.
pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

/// SHA-256 hex digest stored in place of the plaintext token.
pub fn token_digest(plaintext: &str) -> String {
    hex::encode(Sha256::digest(plaintext.as_bytes()))
}

/// Create a token for `owner_id` and return the plaintext. It is not recoverable later.
pub fn issue_token(
    db: &FieldDb,
    owner_kind: &str,
    owner_id: i64,
    name: &str,
) -> Result<String, DbError> {
    let plaintext = format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    );
    db.insert_access_token(owner_kind, owner_id, name, &token_digest(&plaintext))?;
    Ok(plaintext)
}

/// A principal resolved from a bearer token, with the digest needed to revoke it.
#[derive(Debug, Clone)]
pub struct Session {
    pub principal: Principal,
    pub token_hash: String,
}

/// Resolve a plaintext bearer token. Unknown tokens and inactive owners yield `None`.
pub fn authenticate(db: &FieldDb, plaintext: &str) -> Result<Option<Session>, DbError> {
    let token_hash = token_digest(plaintext.trim());
    let Some(token) = db.find_access_token(&token_hash)? else {
        return Ok(None);
    };
    let Some(principal) = Principal::for_token(db, &token)? else {
        return Ok(None);
    };
    if !principal.status().can_authenticate() {
        tracing::debug!(principal = %principal.cache_key(), "Token owner is not active");
        return Ok(None);
    }
    Ok(Some(Session {
        principal,
        token_hash,
    }))
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdminLoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub device_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromoterLoginRequest {
    pub username: Option<String>,
    pub password: Option<String>,
    pub device_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub token_type: &'static str,
    pub principal: Principal,
}

fn required<'a>(field: &str, value: &'a Option<String>) -> Result<&'a str, AppError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::validation(field, format!("The {field} field is required.")))
}

fn check_status(field: &str, raw: &str) -> Result<(), AppError> {
    let status: PrincipalStatus = raw.parse().unwrap_or(PrincipalStatus::Pending);
    if status.can_authenticate() {
        Ok(())
    } else {
        Err(AppError::validation(field, INACTIVE_ACCOUNT))
    }
}

pub fn login_admin(db: &FieldDb, req: &AdminLoginRequest) -> Result<LoginResponse, AppError> {
    let email = required("email", &req.email)?;
    let password = required("password", &req.password)?;
    let user = db
        .get_user_by_email(email)?
        .filter(|u| verify_password(password, &u.password_hash))
        .ok_or_else(|| AppError::validation("email", BAD_CREDENTIALS))?;
    check_status("email", &user.status)?;

    let device = req.device_name.as_deref().unwrap_or("web");
    let token = issue_token(db, TOKEN_OWNER_USER, user.id, device)?;
    let admin = AdminUser::load(db, user.id)?.ok_or_else(|| AppError::not_found("User"))?;
    tracing::info!(user_id = user.id, "Admin logged in");
    Ok(LoginResponse {
        token,
        token_type: "Bearer",
        principal: Principal::Admin(admin),
    })
}

pub fn login_promoter(db: &FieldDb, req: &PromoterLoginRequest) -> Result<LoginResponse, AppError> {
    let username = required("username", &req.username)?;
    let password = required("password", &req.password)?;
    let promoter = db
        .get_promoter_by_username(username)?
        .filter(|p| verify_password(password, &p.password_hash))
        .ok_or_else(|| AppError::validation("username", BAD_CREDENTIALS))?;
    check_status("username", &promoter.status)?;

    let device = req.device_name.as_deref().unwrap_or("mobile");
    let token = issue_token(db, TOKEN_OWNER_PROMOTER, promoter.id, device)?;
    tracing::info!(promoter_id = promoter.id, "Promoter logged in");
    Ok(LoginResponse {
        token,
        token_type: "Bearer",
        principal: Principal::Promoter(FieldPromoter { promoter }),
    })
}

pub fn logout(db: &FieldDb, session: &Session) -> Result<(), AppError> {
    db.delete_access_token(&session.token_hash)?;
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct MeResponse {
    pub principal: Principal,
    pub permissions: Vec<String>,
    pub states: Vec<String>,
    pub all_states: bool,
}

pub fn me(db: &FieldDb, principal: &Principal) -> Result<MeResponse, AppError> {
    let permissions = match principal {
        Principal::Admin(a) => db.user_effective_permissions(a.user.id)?,
        Principal::Promoter(_) => Vec::new(),
    };
    Ok(MeResponse {
        permissions,
        states: principal.assigned_states(),
        all_states: crate::access::has_all_state_access(principal),
        principal: principal.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::identity::NewPromoter;
    use crate::db::test_utils::test_db;

    #[test]
    fn test_password_roundtrip() {
        let hash = hash_password("s3cret-pass").unwrap();
        assert!(verify_password("s3cret-pass", &hash));
        assert!(!verify_password("wrong", &hash));
        assert!(!verify_password("anything", "not-a-hash"));
    }

    #[test]
    fn test_token_digest_is_stable_hex() {
        let d = token_digest("abc");
        assert_eq!(d.len(), 64);
        assert_eq!(d, token_digest("abc"));
        assert_ne!(d, token_digest("abd"));
    }

    #[test]
    fn test_admin_login_and_authenticate() {
        let db = test_db();
        let hash = hash_password("password1").unwrap();
        db.create_user("Ops", "ops@example.com", &hash, "active").unwrap();

        let bad = login_admin(
            &db,
            &AdminLoginRequest {
                email: Some("ops@example.com".into()),
                password: Some("nope".into()),
                device_name: None,
            },
        );
        assert!(matches!(bad, Err(AppError::Validation(_))));

        let ok = login_admin(
            &db,
            &AdminLoginRequest {
                email: Some("OPS@example.com".into()),
                password: Some("password1".into()),
                device_name: None,
            },
        )
        .unwrap();
        let session = authenticate(&db, &ok.token).unwrap().expect("session");
        assert_eq!(session.principal.kind(), TOKEN_OWNER_USER);

        logout(&db, &session).unwrap();
        assert!(authenticate(&db, &ok.token).unwrap().is_none());
    }

    #[test]
    fn test_suspended_promoter_cannot_login_or_use_token() {
        let db = test_db();
        let hash = hash_password("password1").unwrap();
        let id = db
            .create_promoter(&NewPromoter {
                name: "Ravi",
                username: "ravi",
                phone: None,
                password_hash: &hash,
                state: None,
                district: None,
                status: "active",
            })
            .unwrap();
        let req = PromoterLoginRequest {
            username: Some("ravi".into()),
            password: Some("password1".into()),
            device_name: Some("pixel".into()),
        };
        let login = login_promoter(&db, &req).unwrap();
        assert!(authenticate(&db, &login.token).unwrap().is_some());

        db.set_promoter_status(id, "suspended").unwrap();
        assert!(authenticate(&db, &login.token).unwrap().is_none());
        match login_promoter(&db, &req) {
            Err(AppError::Validation(errors)) => assert!(errors.has("username")),
            other => panic!("expected validation error, got {other:?}"),
        }
    }
}
