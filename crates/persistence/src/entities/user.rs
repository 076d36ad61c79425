//! User entity (database row mapping).
//!
//! Users are owned by the authentication subsystem; the core reads them
//! to authorize socket connections and resolve account state.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Database row mapping for the users table.
#[derive(Debug, Clone, FromRow)]
pub struct UserEntity {
    pub id: Uuid,
    pub phone: String,
    pub full_name: String,
    pub user_type: String,
    pub is_active: bool,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl UserEntity {
    /// Whether this account may hold a live connection.
    pub fn connectable(&self) -> bool {
        self.is_active && self.status != "deleted"
    }
}
