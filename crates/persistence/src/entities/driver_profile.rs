//! Driver profile entity (database row mapping).

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Database row mapping for the driver_profiles table.
///
/// last_known_location is PostGIS GEOGRAPHY; queries read it back as
/// separate latitude/longitude values via ST_Y and ST_X aliases.
#[derive(Debug, Clone, FromRow)]
pub struct DriverProfileEntity {
    pub id: Uuid,
    pub user_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub rating: f64,
    pub total_trips: i64,
    pub total_earnings_cents: i64,
    pub is_online: bool,
    pub is_available: bool,
    pub last_known_lat: Option<f64>,
    pub last_known_lng: Option<f64>,
    pub last_location_update: Option<DateTime<Utc>>,
    pub current_trip_id: Option<Uuid>,
    pub socket_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Column list shared by driver profile SELECT/RETURNING clauses.
pub const DRIVER_PROFILE_COLUMNS: &str = r#"
    id, user_id, first_name, last_name, phone, rating, total_trips,
    total_earnings_cents, is_online, is_available,
    CASE WHEN last_known_location IS NULL THEN NULL
         ELSE ST_Y(last_known_location::geometry) END as last_known_lat,
    CASE WHEN last_known_location IS NULL THEN NULL
         ELSE ST_X(last_known_location::geometry) END as last_known_lng,
    last_location_update, current_trip_id, socket_id, created_at, updated_at
"#;

impl DriverProfileEntity {
    /// Convert to domain model.
    pub fn into_domain(self) -> domain::models::DriverProfile {
        domain::models::DriverProfile {
            id: self.id,
            user_id: self.user_id,
            first_name: self.first_name,
            last_name: self.last_name,
            phone: self.phone,
            rating: self.rating,
            total_trips: self.total_trips,
            total_earnings_cents: self.total_earnings_cents,
            is_online: self.is_online,
            is_available: self.is_available,
            last_known_lat: self.last_known_lat,
            last_known_lng: self.last_known_lng,
            last_location_update: self.last_location_update,
            current_trip_id: self.current_trip_id,
            socket_id: self.socket_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl From<DriverProfileEntity> for domain::models::DriverProfile {
    fn from(entity: DriverProfileEntity) -> Self {
        entity.into_domain()
    }
}
