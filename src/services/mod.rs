//! Operation layer. Each function takes the store and the calling principal,
//! enforces state scope, and returns `AppError` on failure. Permission checks
//! happen one level up, in the HTTP handlers.

pub mod activities;
pub mod auth;
pub mod dashboard;
pub mod ingestion;
pub mod maintenance;
pub mod promoters;
pub mod rbac;
pub mod route_plans;
