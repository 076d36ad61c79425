//! Trip entity (database row mapping).

use chrono::{DateTime, Utc};
use domain::models::trip::{TripKind, TripPoint, TripStatus};
use sqlx::FromRow;
use uuid::Uuid;

/// Database row mapping for the trips table.
///
/// The pickup_point and dropoff_point columns use PostGIS GEOGRAPHY and are
/// written alongside the numeric lat/lng pairs; reads use the numeric
/// columns directly.
#[derive(Debug, Clone, FromRow)]
pub struct TripEntity {
    pub id: Uuid,
    pub reference: String,
    pub passenger_id: Option<Uuid>,
    pub passenger_name: Option<String>,
    pub passenger_phone: Option<String>,
    pub driver_id: Option<Uuid>,
    pub vehicle_id: Option<Uuid>,
    pub vehicle_class_id: Option<i32>,
    pub status: String,
    pub pickup_address: String,
    pub pickup_lat: f64,
    pub pickup_lng: f64,
    pub dropoff_address: String,
    pub dropoff_lat: f64,
    pub dropoff_lng: f64,
    pub estimated_distance_km: Option<f64>,
    pub estimated_duration_minutes: Option<i32>,
    pub estimated_fare_cents: Option<i64>,
    pub trip_kind: String,
    pub payment_method: Option<String>,
    pub payment_status: Option<String>,
    pub instructions: Option<String>,
    pub recipient_name: Option<String>,
    pub package_description: Option<String>,
    pub dispatcher_id: Option<Uuid>,
    pub requested_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub canceled_by_user_id: Option<Uuid>,
    pub final_fare_cents: Option<i64>,
    pub actual_distance_km: Option<f64>,
    pub actual_duration_minutes: Option<i32>,
    pub driver_earnings_cents: Option<i64>,
    pub commission_cents: Option<i64>,
    pub is_new_passenger: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Column list shared by every trip SELECT/RETURNING clause.
pub const TRIP_COLUMNS: &str = r#"
    id, reference, passenger_id, passenger_name, passenger_phone, driver_id,
    vehicle_id, vehicle_class_id, status, pickup_address, pickup_lat,
    pickup_lng, dropoff_address, dropoff_lat, dropoff_lng,
    estimated_distance_km, estimated_duration_minutes, estimated_fare_cents,
    trip_kind, payment_method, payment_status, instructions, recipient_name,
    package_description, dispatcher_id, requested_at, accepted_at,
    started_at, completed_at, canceled_at, cancel_reason,
    canceled_by_user_id, final_fare_cents, actual_distance_km,
    actual_duration_minutes, driver_earnings_cents, commission_cents,
    is_new_passenger, created_at, updated_at
"#;

impl TripEntity {
    /// Parsed trip status.
    pub fn trip_status(&self) -> TripStatus {
        self.status.parse().unwrap_or(TripStatus::Requested)
    }

    /// Convert to domain model.
    pub fn into_domain(self) -> domain::models::Trip {
        let status = self.status.parse::<TripStatus>().unwrap_or(TripStatus::Requested);
        let trip_kind = self.trip_kind.parse::<TripKind>().unwrap_or(TripKind::Standard);

        domain::models::Trip {
            id: self.id,
            reference: self.reference,
            passenger_id: self.passenger_id,
            passenger_name: self.passenger_name,
            passenger_phone: self.passenger_phone,
            driver_id: self.driver_id,
            vehicle_id: self.vehicle_id,
            vehicle_class_id: self.vehicle_class_id,
            status,
            pickup: TripPoint {
                address: self.pickup_address,
                lat: self.pickup_lat,
                lng: self.pickup_lng,
            },
            dropoff: TripPoint {
                address: self.dropoff_address,
                lat: self.dropoff_lat,
                lng: self.dropoff_lng,
            },
            estimated_distance_km: self.estimated_distance_km,
            estimated_duration_minutes: self.estimated_duration_minutes,
            estimated_fare_cents: self.estimated_fare_cents,
            trip_kind,
            payment_method: self.payment_method,
            payment_status: self.payment_status,
            instructions: self.instructions,
            recipient_name: self.recipient_name,
            package_description: self.package_description,
            dispatcher_id: self.dispatcher_id,
            requested_at: self.requested_at,
            accepted_at: self.accepted_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            canceled_at: self.canceled_at,
            cancel_reason: self.cancel_reason,
            canceled_by_user_id: self.canceled_by_user_id,
            final_fare_cents: self.final_fare_cents,
            actual_distance_km: self.actual_distance_km,
            actual_duration_minutes: self.actual_duration_minutes,
            driver_earnings_cents: self.driver_earnings_cents,
            commission_cents: self.commission_cents,
            is_new_passenger: self.is_new_passenger,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl From<TripEntity> for domain::models::Trip {
    fn from(entity: TripEntity) -> Self {
        entity.into_domain()
    }
}
