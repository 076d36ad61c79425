//! Vehicle domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A driver's registered vehicle. Class-based matching uses the driver's
/// active vehicle; a driver has at most one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    pub id: Uuid,
    pub driver_id: Uuid,
    pub class_id: i32,
    pub make: String,
    pub model: String,
    pub year: i32,
    pub color: String,
    pub plate: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Vehicle {
    /// Short human-readable description, e.g. "White Toyota Vitz (A12345)".
    pub fn describe(&self) -> String {
        format!("{} {} {} ({})", self.color, self.make, self.model, self.plate)
    }
}
