//! Driver pickup entity (database row mapping).

use chrono::{DateTime, Utc};
use domain::models::PickupStatus;
use sqlx::FromRow;
use uuid::Uuid;

/// Database row mapping for the driver_pickups table.
#[derive(Debug, Clone, FromRow)]
pub struct DriverPickupEntity {
    pub id: Uuid,
    pub driver_id: Uuid,
    pub trip_id: Uuid,
    pub pickup_address: String,
    pub dropoff_address: String,
    pub pickup_lat: f64,
    pub pickup_lng: f64,
    pub dropoff_lat: f64,
    pub dropoff_lng: f64,
    pub fare_estimate_cents: i64,
    pub status: String,
    pub decline_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DriverPickupEntity {
    /// Convert to domain model.
    pub fn into_domain(self) -> domain::models::DriverPickup {
        let status = self.status.parse::<PickupStatus>().unwrap_or(PickupStatus::Created);

        domain::models::DriverPickup {
            id: self.id,
            driver_id: self.driver_id,
            trip_id: self.trip_id,
            pickup_address: self.pickup_address,
            dropoff_address: self.dropoff_address,
            pickup_lat: self.pickup_lat,
            pickup_lng: self.pickup_lng,
            dropoff_lat: self.dropoff_lat,
            dropoff_lng: self.dropoff_lng,
            fare_estimate_cents: self.fare_estimate_cents,
            status,
            decline_reason: self.decline_reason,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl From<DriverPickupEntity> for domain::models::DriverPickup {
    fn from(entity: DriverPickupEntity) -> Self {
        entity.into_domain()
    }
}
