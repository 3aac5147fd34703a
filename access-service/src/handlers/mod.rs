//! HTTP handlers for access-service.

pub mod admin;
pub mod auth;
pub mod metrics;
