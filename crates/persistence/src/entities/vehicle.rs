//! Vehicle entity (database row mapping).

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Database row mapping for the vehicles table.
#[derive(Debug, Clone, FromRow)]
pub struct VehicleEntity {
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

impl VehicleEntity {
    /// Convert to domain model.
    pub fn into_domain(self) -> domain::models::Vehicle {
        domain::models::Vehicle {
            id: self.id,
            driver_id: self.driver_id,
            class_id: self.class_id,
            make: self.make,
            model: self.model,
            year: self.year,
            color: self.color,
            plate: self.plate,
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl From<VehicleEntity> for domain::models::Vehicle {
    fn from(entity: VehicleEntity) -> Self {
        entity.into_domain()
    }
}
