//! gpusched-api: REST API server for gpusched
//!
//! This crate provides the operator API:
//! - Health and scheduler status
//! - Cached GPU state
//! - Dry-run placement queries

pub mod rest;

pub use rest::create_router;
