//! Application services: feed reads, enrichment, saved index and mutations.

pub mod client;
pub mod enrich;
pub mod error;
pub mod feed;
pub mod mutations;
pub mod records;
pub mod repos;
pub mod saved;
