//! Offer wire payloads.
//!
//! The offer payload duplicates every multi-word field under both
//! snake_case and camelCase keys, and the endpoint objects carry both
//! `lat`/`latitude` spellings. Mixed generations of driver clients read
//! different shapes; the duplicated keys are emitted literally, not
//! aliased, until the fleet converges.

use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde::Deserialize;
use uuid::Uuid;

use domain::models::trip::{Trip, TripKind, TripStatus};

/// The dispatch-relevant view of a trip, captured when the broadcast
/// starts and carried through the offer protocol.
#[derive(Debug, Clone)]
pub struct TripSnapshot {
    pub id: Uuid,
    pub reference: String,
    pub trip_kind: TripKind,
    pub pickup_address: String,
    pub pickup_lat: f64,
    pub pickup_lng: f64,
    pub dropoff_address: String,
    pub dropoff_lat: f64,
    pub dropoff_lng: f64,
    pub fare_estimate_cents: i64,
    pub distance_km: Option<f64>,
    pub duration_minutes: Option<i32>,
    pub vehicle_class_id: Option<i32>,
    pub passenger_phone: Option<String>,
    pub passenger_name: Option<String>,
    pub package_description: Option<String>,
    pub instructions: Option<String>,
    pub dispatcher_id: Option<Uuid>,
}

impl TripSnapshot {
    /// Capture the dispatch view of a trip. The display name already
    /// resolves to the recipient for deliveries.
    pub fn from_trip(trip: &Trip) -> Self {
        Self {
            id: trip.id,
            reference: trip.reference.clone(),
            trip_kind: trip.trip_kind,
            pickup_address: trip.pickup.address.clone(),
            pickup_lat: trip.pickup.lat,
            pickup_lng: trip.pickup.lng,
            dropoff_address: trip.dropoff.address.clone(),
            dropoff_lat: trip.dropoff.lat,
            dropoff_lng: trip.dropoff.lng,
            fare_estimate_cents: trip.estimated_fare_cents.unwrap_or(0),
            distance_km: trip.estimated_distance_km,
            duration_minutes: trip.estimated_duration_minutes,
            vehicle_class_id: trip.vehicle_class_id,
            passenger_phone: trip.passenger_phone.clone(),
            passenger_name: trip.display_name().map(|s| s.to_string()),
            package_description: trip.package_description.clone(),
            instructions: trip.instructions.clone(),
            dispatcher_id: trip.dispatcher_id,
        }
    }
}

/// One trip endpoint as sent inside an offer, carrying both coordinate
/// spellings.
#[derive(Debug, Clone)]
pub struct OfferPoint {
    pub address: String,
    pub lat: f64,
    pub lng: f64,
}

impl Serialize for OfferPoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(5))?;
        map.serialize_entry("address", &self.address)?;
        map.serialize_entry("lat", &self.lat)?;
        map.serialize_entry("latitude", &self.lat)?;
        map.serialize_entry("lng", &self.lng)?;
        map.serialize_entry("longitude", &self.lng)?;
        map.end()
    }
}

/// The `trip_offer` event body.
#[derive(Debug, Clone)]
pub struct TripOfferPayload {
    pub trip: TripSnapshot,
    pub expires_at: DateTime<Utc>,
}

impl TripOfferPayload {
    pub fn new(trip: &TripSnapshot, expires_at: DateTime<Utc>) -> Self {
        Self {
            trip: trip.clone(),
            expires_at,
        }
    }

    /// Fare estimate in currency units for display.
    pub fn fare_estimate(&self) -> f64 {
        self.trip.fare_estimate_cents as f64 / 100.0
    }
}

impl Serialize for TripOfferPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let trip = &self.trip;
        let mut map = serializer.serialize_map(None)?;

        map.serialize_entry("trip_id", &trip.id)?;
        map.serialize_entry("tripId", &trip.id)?;
        map.serialize_entry("reference", &trip.reference)?;
        map.serialize_entry("trip_kind", trip.trip_kind.as_str())?;
        map.serialize_entry("tripKind", trip.trip_kind.as_str())?;

        map.serialize_entry(
            "pickup",
            &OfferPoint {
                address: trip.pickup_address.clone(),
                lat: trip.pickup_lat,
                lng: trip.pickup_lng,
            },
        )?;
        map.serialize_entry(
            "dropoff",
            &OfferPoint {
                address: trip.dropoff_address.clone(),
                lat: trip.dropoff_lat,
                lng: trip.dropoff_lng,
            },
        )?;

        let fare = self.fare_estimate();
        map.serialize_entry("fare_estimate", &fare)?;
        map.serialize_entry("fareEstimate", &fare)?;

        if let Some(distance_km) = trip.distance_km {
            map.serialize_entry("distance_km", &distance_km)?;
            map.serialize_entry("distanceKm", &distance_km)?;
        }
        if let Some(duration_minutes) = trip.duration_minutes {
            map.serialize_entry("duration_minutes", &duration_minutes)?;
            map.serialize_entry("durationMinutes", &duration_minutes)?;
        }
        if let Some(ref phone) = trip.passenger_phone {
            map.serialize_entry("passenger_phone", phone)?;
            map.serialize_entry("passengerPhone", phone)?;
        }
        if let Some(ref name) = trip.passenger_name {
            map.serialize_entry("passenger_name", name)?;
            map.serialize_entry("passengerName", name)?;
        }
        if let Some(ref description) = trip.package_description {
            map.serialize_entry("package_description", description)?;
            map.serialize_entry("packageDescription", description)?;
        }
        if let Some(ref instructions) = trip.instructions {
            map.serialize_entry("instructions", instructions)?;
        }

        map.serialize_entry("expires_at", &self.expires_at)?;
        map.serialize_entry("expiresAt", &self.expires_at)?;

        map.end()
    }
}

/// The `trip_status_changed` event body.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripStatusChanged {
    pub trip_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub status: TripStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn sample_snapshot() -> TripSnapshot {
        TripSnapshot {
            id: Uuid::new_v4(),
            reference: "TR-AB12CD34".to_string(),
            trip_kind: TripKind::Standard,
            pickup_address: "Meskel Square".to_string(),
            pickup_lat: 8.9806,
            pickup_lng: 38.7578,
            dropoff_address: "Bole Airport".to_string(),
            dropoff_lat: 8.9778,
            dropoff_lng: 38.7993,
            fare_estimate_cents: 12000,
            distance_km: Some(5.6),
            duration_minutes: Some(18),
            vehicle_class_id: Some(3),
            passenger_phone: Some("+251911234567".to_string()),
            passenger_name: Some("Abebe Kebede".to_string()),
            package_description: None,
            instructions: None,
            dispatcher_id: Some(Uuid::new_v4()),
        }
    }

    #[test]
    fn test_offer_emits_both_casings() {
        let snapshot = sample_snapshot();
        let payload = TripOfferPayload::new(&snapshot, Utc::now() + chrono::Duration::minutes(5));
        let value: Value = serde_json::to_value(&payload).unwrap();

        assert_eq!(value["trip_id"], value["tripId"]);
        assert_eq!(value["trip_kind"], "standard");
        assert_eq!(value["tripKind"], "standard");
        assert_eq!(value["fare_estimate"], 120.0);
        assert_eq!(value["fareEstimate"], 120.0);
        assert_eq!(value["distance_km"], value["distanceKm"]);
        assert_eq!(value["duration_minutes"], 18);
        assert_eq!(value["durationMinutes"], 18);
        assert_eq!(value["passenger_phone"], "+251911234567");
        assert_eq!(value["passengerPhone"], "+251911234567");
        assert_eq!(value["expires_at"], value["expiresAt"]);
    }

    #[test]
    fn test_offer_points_carry_both_coordinate_keys() {
        let snapshot = sample_snapshot();
        let payload = TripOfferPayload::new(&snapshot, Utc::now());
        let value: Value = serde_json::to_value(&payload).unwrap();

        assert_eq!(value["pickup"]["lat"], 8.9806);
        assert_eq!(value["pickup"]["latitude"], 8.9806);
        assert_eq!(value["pickup"]["lng"], 38.7578);
        assert_eq!(value["pickup"]["longitude"], 38.7578);
        assert_eq!(value["dropoff"]["address"], "Bole Airport");
        assert_eq!(value["dropoff"]["latitude"], value["dropoff"]["lat"]);
    }

    #[test]
    fn test_offer_omits_absent_delivery_fields() {
        let snapshot = sample_snapshot();
        let payload = TripOfferPayload::new(&snapshot, Utc::now());
        let value: Value = serde_json::to_value(&payload).unwrap();

        assert!(value.get("package_description").is_none());
        assert!(value.get("packageDescription").is_none());
        assert!(value.get("instructions").is_none());
    }

    #[test]
    fn test_delivery_offer_uses_recipient_as_display_name() {
        let mut snapshot = sample_snapshot();
        snapshot.trip_kind = TripKind::Delivery;
        snapshot.passenger_name = Some("Sara Tesfaye".to_string());
        snapshot.package_description = Some("Documents".to_string());

        let payload = TripOfferPayload::new(&snapshot, Utc::now());
        let value: Value = serde_json::to_value(&payload).unwrap();

        assert_eq!(value["passengerName"], "Sara Tesfaye");
        assert_eq!(value["package_description"], "Documents");
        assert_eq!(value["packageDescription"], "Documents");
    }

    #[test]
    fn test_status_changed_serializes_camel_case() {
        let update = TripStatusChanged {
            trip_id: Uuid::new_v4(),
            driver_id: Some(Uuid::new_v4()),
            status: TripStatus::Accepted,
        };
        let value: Value = serde_json::to_value(&update).unwrap();
        assert!(value.get("tripId").is_some());
        assert!(value.get("driverId").is_some());
        assert_eq!(value["status"], "accepted");
    }

    #[test]
    fn test_snapshot_from_trip_resolves_display_name() {
        use domain::models::trip::TripPoint;

        let trip = Trip {
            id: Uuid::new_v4(),
            reference: "TR-XY98ZW76".to_string(),
            passenger_id: None,
            passenger_name: Some("Abebe Kebede".to_string()),
            passenger_phone: Some("+251911234567".to_string()),
            driver_id: None,
            vehicle_id: None,
            vehicle_class_id: None,
            status: TripStatus::Requested,
            pickup: TripPoint {
                address: "Piassa".to_string(),
                lat: 9.0333,
                lng: 38.75,
            },
            dropoff: TripPoint {
                address: "Kazanchis".to_string(),
                lat: 9.0145,
                lng: 38.7691,
            },
            estimated_distance_km: None,
            estimated_duration_minutes: None,
            estimated_fare_cents: Some(9900),
            trip_kind: TripKind::Delivery,
            payment_method: None,
            payment_status: None,
            instructions: None,
            recipient_name: Some("Sara Tesfaye".to_string()),
            package_description: Some("Spare parts".to_string()),
            dispatcher_id: None,
            requested_at: Utc::now(),
            accepted_at: None,
            started_at: None,
            completed_at: None,
            canceled_at: None,
            cancel_reason: None,
            canceled_by_user_id: None,
            final_fare_cents: None,
            actual_distance_km: None,
            actual_duration_minutes: None,
            driver_earnings_cents: None,
            commission_cents: None,
            is_new_passenger: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let snapshot = TripSnapshot::from_trip(&trip);
        assert_eq!(snapshot.passenger_name.as_deref(), Some("Sara Tesfaye"));
        assert_eq!(snapshot.fare_estimate_cents, 9900);
    }
}
