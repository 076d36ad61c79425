//! Driver profile domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Ceiling for the lifetime earnings accumulator. Increments saturate here
/// rather than overflowing the 64-bit signed column.
pub const EARNINGS_CAP_CENTS: i64 = 9_000_000_000_000_000_000;

/// Represents a driver profile record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverProfile {
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
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_known_lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_known_lng: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_location_update: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_trip_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DriverProfile {
    /// Full display name.
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Whether this driver may receive trip offers right now.
    ///
    /// Offline drivers are treated as unavailable regardless of the
    /// persisted flag.
    pub fn dispatchable(&self) -> bool {
        self.is_online && self.is_available && self.current_trip_id.is_none()
    }

    /// Applies an earnings increment, saturating at the documented cap.
    pub fn add_earnings(total_earnings_cents: i64, increment_cents: i64) -> i64 {
        total_earnings_cents
            .saturating_add(increment_cents.max(0))
            .min(EARNINGS_CAP_CENTS)
    }
}

// ============================================================================
// Socket message DTOs
// ============================================================================

/// `location_update` client message body.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdate {
    #[validate(custom(function = "shared::validation::validate_latitude"))]
    pub lat: f64,

    #[validate(custom(function = "shared::validation::validate_longitude"))]
    pub lng: f64,

    #[validate(custom(function = "validate_optional_accuracy"))]
    pub accuracy: Option<f64>,
}

/// `set_availability` client message body.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityUpdate {
    pub available: bool,

    #[validate(nested)]
    pub location: Option<LocationUpdate>,
}

fn validate_optional_accuracy(accuracy: f64) -> Result<(), validator::ValidationError> {
    shared::validation::validate_accuracy(accuracy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fake::faker::name::en::{FirstName, LastName};
    use fake::faker::phone_number::en::PhoneNumber;
    use fake::Fake;

    fn sample_profile() -> DriverProfile {
        DriverProfile {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            first_name: FirstName().fake(),
            last_name: LastName().fake(),
            phone: PhoneNumber().fake(),
            rating: 4.8,
            total_trips: 120,
            total_earnings_cents: 4_500_000,
            is_online: true,
            is_available: true,
            last_known_lat: Some(8.9806),
            last_known_lng: Some(38.7578),
            last_location_update: Some(Utc::now()),
            current_trip_id: None,
            socket_id: Some("c0ffee".to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_dispatchable_requires_online_and_available() {
        let mut profile = sample_profile();
        assert!(profile.dispatchable());

        profile.is_online = false;
        assert!(!profile.dispatchable());

        profile.is_online = true;
        profile.is_available = false;
        assert!(!profile.dispatchable());
    }

    #[test]
    fn test_dispatchable_excludes_assigned_driver() {
        let mut profile = sample_profile();
        profile.current_trip_id = Some(Uuid::new_v4());
        assert!(!profile.dispatchable());
    }

    #[test]
    fn test_add_earnings_accumulates() {
        assert_eq!(DriverProfile::add_earnings(1000, 16915), 17915);
    }

    #[test]
    fn test_add_earnings_saturates_at_cap() {
        assert_eq!(
            DriverProfile::add_earnings(EARNINGS_CAP_CENTS - 5, 100),
            EARNINGS_CAP_CENTS
        );
        assert_eq!(
            DriverProfile::add_earnings(i64::MAX - 1, i64::MAX),
            EARNINGS_CAP_CENTS
        );
    }

    #[test]
    fn test_add_earnings_ignores_negative_increment() {
        assert_eq!(DriverProfile::add_earnings(1000, -500), 1000);
    }

    #[test]
    fn test_location_update_validation() {
        let update = LocationUpdate {
            lat: 8.9806,
            lng: 38.7578,
            accuracy: Some(10.0),
        };
        assert!(update.validate().is_ok());

        let bad = LocationUpdate {
            lat: 120.0,
            lng: 38.7578,
            accuracy: None,
        };
        assert!(bad.validate().is_err());

        let bad_accuracy = LocationUpdate {
            lat: 8.9806,
            lng: 38.7578,
            accuracy: Some(-3.0),
        };
        assert!(bad_accuracy.validate().is_err());
    }

    #[test]
    fn test_availability_update_with_inline_location() {
        let json = r#"{"available": true, "location": {"lat": 9.01, "lng": 38.76}}"#;
        let update: AvailabilityUpdate = serde_json::from_str(json).unwrap();
        assert!(update.validate().is_ok());
        assert!(update.available);
        assert!(update.location.is_some());
    }
}
