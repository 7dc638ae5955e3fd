//! FieldOps: admin and mobile API for outdoor-advertising field operations.
//!
//! Promoters submit activity recces from the field; admins review them, plan
//! routes and read state-scoped dashboards. The binary in `main.rs` wraps the
//! HTTP server and the maintenance console around this library.

pub mod access;
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod migrations;
pub mod principal;
pub mod request_log;
pub mod services;
pub mod types;
