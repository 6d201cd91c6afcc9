//! Feed synchronization and query-cache coordination for a social-feed client.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
