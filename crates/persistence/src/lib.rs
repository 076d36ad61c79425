//! Persistence layer for the ride-dispatch backend.
//!
//! This crate contains:
//! - Database connection management
//! - Entity definitions (database row mappings)
//! - Repository implementations over PostgreSQL/PostGIS

pub mod db;
pub mod entities;
pub mod metrics;
pub mod repositories;
