//! Authenticated identities.
//!
//! A principal is either an administrator (`users` table) or a field promoter
//! (`promoters` table). Admins carry their role names and state assignments so
//! scope checks never need a second round-trip.

use serde::Serialize;

use crate::db::identity::{DbAccessToken, TOKEN_OWNER_PROMOTER, TOKEN_OWNER_USER};
use crate::db::{DbError, DbPromoter, DbUser, DbUserState, FieldDb};
use crate::types::PrincipalStatus;

#[derive(Debug, Clone, Serialize)]
pub struct AdminUser {
    #[serde(flatten)]
    pub user: DbUser,
    pub roles: Vec<String>,
    pub states: Vec<DbUserState>,
}

impl AdminUser {
    pub fn load(db: &FieldDb, user_id: i64) -> Result<Option<Self>, DbError> {
        let Some(user) = db.get_user(user_id)? else {
            return Ok(None);
        };
        Ok(Some(Self {
            roles: db.user_role_names(user.id)?,
            states: db.user_states(user.id)?,
            user,
        }))
    }

    pub fn has_role(&self, name: &str) -> bool {
        self.roles.iter().any(|r| r == name)
    }

    /// Active state assignments, trimmed.
    pub fn active_states(&self) -> Vec<String> {
        self.states
            .iter()
            .filter(|s| s.is_active)
            .map(|s| s.state.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldPromoter {
    #[serde(flatten)]
    pub promoter: DbPromoter,
}

impl FieldPromoter {
    pub fn load(db: &FieldDb, promoter_id: i64) -> Result<Option<Self>, DbError> {
        Ok(db
            .get_promoter(promoter_id)?
            .map(|promoter| Self { promoter }))
    }

    /// The single assigned state, if any.
    pub fn state(&self) -> Option<&str> {
        self.promoter
            .state
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Principal {
    Admin(AdminUser),
    Promoter(FieldPromoter),
}

impl Principal {
    /// Resolve the owner of a bearer token.
    pub fn for_token(db: &FieldDb, token: &DbAccessToken) -> Result<Option<Self>, DbError> {
        match token.owner_kind.as_str() {
            TOKEN_OWNER_USER => Ok(AdminUser::load(db, token.owner_id)?.map(Principal::Admin)),
            TOKEN_OWNER_PROMOTER => {
                Ok(FieldPromoter::load(db, token.owner_id)?.map(Principal::Promoter))
            }
            other => {
                log::warn!("Access token {} has unknown owner kind '{}'", token.id, other);
                Ok(None)
            }
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Principal::Admin(a) => a.user.id,
            Principal::Promoter(p) => p.promoter.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Principal::Admin(a) => &a.user.name,
            Principal::Promoter(p) => &p.promoter.name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Principal::Admin(_) => TOKEN_OWNER_USER,
            Principal::Promoter(_) => TOKEN_OWNER_PROMOTER,
        }
    }

    /// Unparseable stored statuses count as `pending`, which cannot authenticate.
    pub fn status(&self) -> PrincipalStatus {
        let raw = match self {
            Principal::Admin(a) => &a.user.status,
            Principal::Promoter(p) => &p.promoter.status,
        };
        raw.parse().unwrap_or(PrincipalStatus::Pending)
    }

    /// Stable key that never collides between a user and a promoter with the same id.
    pub fn cache_key(&self) -> String {
        format!("{}:{}", self.kind(), self.id())
    }

    /// States this principal is assigned to (active ones only, for admins).
    pub fn assigned_states(&self) -> Vec<String> {
        match self {
            Principal::Admin(a) => a.active_states(),
            Principal::Promoter(p) => p.state().map(|s| vec![s.to_string()]).unwrap_or_default(),
        }
    }

    pub fn as_admin(&self) -> Option<&AdminUser> {
        match self {
            Principal::Admin(a) => Some(a),
            Principal::Promoter(_) => None,
        }
    }

    pub fn as_promoter(&self) -> Option<&FieldPromoter> {
        match self {
            Principal::Promoter(p) => Some(p),
            Principal::Admin(_) => None,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn admin(id: i64, roles: &[&str], states: &[(&str, bool)]) -> Principal {
        Principal::Admin(AdminUser {
            user: DbUser {
                id,
                name: format!("Admin {id}"),
                email: format!("admin{id}@example.com"),
                password_hash: String::new(),
                status: "active".into(),
                created_at: String::new(),
                updated_at: String::new(),
            },
            roles: roles.iter().map(|r| r.to_string()).collect(),
            states: states
                .iter()
                .enumerate()
                .map(|(i, (state, active))| DbUserState {
                    id: i as i64 + 1,
                    user_id: id,
                    state: state.to_string(),
                    is_active: *active,
                })
                .collect(),
        })
    }

    pub fn promoter(id: i64, state: Option<&str>) -> Principal {
        Principal::Promoter(FieldPromoter {
            promoter: DbPromoter {
                id,
                name: format!("Promoter {id}"),
                username: format!("promoter{id}"),
                phone: None,
                password_hash: String::new(),
                state: state.map(Into::into),
                district: None,
                status: "active".into(),
                created_at: String::new(),
                updated_at: String::new(),
            },
        })
    }
}
