//! Shared utilities and common types for the ride-dispatch backend.
//!
//! This crate provides common functionality used across all other crates:
//! - JWT token utilities (bearer credentials for drivers and dispatchers)
//! - Common validation logic
//! - Pagination helpers

pub mod jwt;
pub mod pagination;
pub mod validation;
