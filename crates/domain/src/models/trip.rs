//! Trip domain model.

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use validator::Validate;

// ============================================================================
// Trip Status Enum
// ============================================================================

/// Status of a trip in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    Requested,
    Accepted,
    InProgress,
    Completed,
    Canceled,
}

impl TripStatus {
    /// Returns the string representation for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Requested => "requested",
            TripStatus::Accepted => "accepted",
            TripStatus::InProgress => "in_progress",
            TripStatus::Completed => "completed",
            TripStatus::Canceled => "canceled",
        }
    }

    /// Check if transition to target status is valid.
    ///
    /// Forward progress is monotonic; any pre-terminal status may move
    /// to `canceled`. `completed` and `canceled` are terminal.
    pub fn can_transition_to(&self, target: TripStatus) -> bool {
        match (self, target) {
            (TripStatus::Requested, TripStatus::Accepted) => true,
            (TripStatus::Accepted, TripStatus::InProgress) => true,
            (TripStatus::InProgress, TripStatus::Completed) => true,
            (TripStatus::Requested, TripStatus::Canceled) => true,
            (TripStatus::Accepted, TripStatus::Canceled) => true,
            (TripStatus::InProgress, TripStatus::Canceled) => true,
            _ => false,
        }
    }

    /// Whether this status admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TripStatus::Completed | TripStatus::Canceled)
    }
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TripStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requested" => Ok(TripStatus::Requested),
            "accepted" => Ok(TripStatus::Accepted),
            "in_progress" => Ok(TripStatus::InProgress),
            "completed" => Ok(TripStatus::Completed),
            "canceled" => Ok(TripStatus::Canceled),
            _ => Err(format!(
                "Invalid trip status: {}. Must be one of: requested, accepted, in_progress, completed, canceled",
                s
            )),
        }
    }
}

// ============================================================================
// Trip Kind Enum
// ============================================================================

/// Kind of trip: a passenger ride or a package delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TripKind {
    #[default]
    Standard,
    Delivery,
}

impl TripKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripKind::Standard => "standard",
            TripKind::Delivery => "delivery",
        }
    }
}

impl fmt::Display for TripKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TripKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(TripKind::Standard),
            "delivery" => Ok(TripKind::Delivery),
            _ => Err(format!(
                "Invalid trip kind: {}. Must be one of: standard, delivery",
                s
            )),
        }
    }
}

// ============================================================================
// Core Model
// ============================================================================

/// A geographic endpoint of a trip.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TripPoint {
    #[validate(length(min = 1, max = 255, message = "address must be 1-255 characters"))]
    pub address: String,

    #[validate(custom(function = "shared::validation::validate_latitude"))]
    pub lat: f64,

    #[validate(custom(function = "shared::validation::validate_longitude"))]
    pub lng: f64,
}

/// Represents a trip record in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trip {
    pub id: Uuid,
    pub reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passenger_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passenger_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passenger_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vehicle_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vehicle_class_id: Option<i32>,
    pub status: TripStatus,
    pub pickup: TripPoint,
    pub dropoff: TripPoint,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_distance_km: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_duration_minutes: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_fare_cents: Option<i64>,
    pub trip_kind: TripKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatcher_id: Option<Uuid>,
    pub requested_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canceled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canceled_by_user_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_fare_cents: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_distance_km: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_duration_minutes: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_earnings_cents: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commission_cents: Option<i64>,
    pub is_new_passenger: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Trip {
    /// Generates a human-readable trip reference, e.g. `TR-9F3KX2QA`.
    pub fn generate_reference() -> String {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(|c| (c as char).to_ascii_uppercase())
            .collect();
        format!("TR-{}", suffix)
    }

    /// Display name shown to the offered driver: the recipient for
    /// deliveries, the passenger otherwise.
    pub fn display_name(&self) -> Option<&str> {
        match self.trip_kind {
            TripKind::Delivery => self
                .recipient_name
                .as_deref()
                .or(self.passenger_name.as_deref()),
            TripKind::Standard => self.passenger_name.as_deref(),
        }
    }
}

// ============================================================================
// Request DTOs
// ============================================================================

/// Request payload for a dispatcher-created trip (enters dispatch).
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DispatcherTripRequest {
    #[validate(nested)]
    pub pickup: TripPoint,

    #[validate(nested)]
    pub dropoff: TripPoint,

    #[validate(length(min = 1, max = 100, message = "passengerName must be 1-100 characters"))]
    pub passenger_name: String,

    #[validate(length(min = 7, max = 20, message = "passengerPhone must be 7-20 characters"))]
    pub passenger_phone: String,

    pub passenger_id: Option<Uuid>,

    /// Preferred vehicle class; absence broadcasts to all classes.
    pub vehicle_class_id: Option<i32>,

    #[serde(default)]
    pub trip_kind: TripKind,

    #[validate(custom(function = "validate_optional_distance"))]
    pub estimated_distance_km: Option<f64>,

    #[validate(range(min = 0, message = "estimatedDurationMinutes must be non-negative"))]
    pub estimated_duration_minutes: Option<i32>,

    #[validate(range(min = 0, message = "estimatedFareCents must be non-negative"))]
    pub estimated_fare_cents: Option<i64>,

    pub payment_method: Option<String>,

    #[validate(length(max = 500, message = "instructions must be at most 500 characters"))]
    pub instructions: Option<String>,

    #[validate(length(max = 100, message = "recipientName must be at most 100 characters"))]
    pub recipient_name: Option<String>,

    #[validate(length(max = 500, message = "packageDescription must be at most 500 characters"))]
    pub package_description: Option<String>,

    #[serde(default)]
    pub is_new_passenger: bool,
}

/// Request payload for a driver-initiated trip (immediately in progress,
/// never broadcast).
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DriverTripRequest {
    #[validate(nested)]
    pub pickup: TripPoint,

    #[validate(nested)]
    pub dropoff: TripPoint,

    #[validate(length(min = 1, max = 100, message = "passengerName must be 1-100 characters"))]
    pub passenger_name: Option<String>,

    #[validate(length(min = 7, max = 20, message = "passengerPhone must be 7-20 characters"))]
    pub passenger_phone: Option<String>,

    #[serde(default)]
    pub trip_kind: TripKind,

    #[validate(custom(function = "validate_optional_distance"))]
    pub estimated_distance_km: Option<f64>,

    #[validate(range(min = 0, message = "estimatedDurationMinutes must be non-negative"))]
    pub estimated_duration_minutes: Option<i32>,

    #[validate(range(min = 0, message = "estimatedFareCents must be non-negative"))]
    pub estimated_fare_cents: Option<i64>,

    pub payment_method: Option<String>,
}

/// Request payload for canceling a trip.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CancelTripRequest {
    #[validate(length(min = 1, max = 255, message = "reason must be 1-255 characters"))]
    pub reason: String,
}

/// Request payload for completing a trip. All fields optional; omitted
/// fare values are derived from the fare schedule.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CompleteTripRequest {
    #[validate(custom(function = "validate_optional_distance"))]
    pub actual_distance_km: Option<f64>,

    #[validate(range(min = 0, message = "actualDurationMinutes must be non-negative"))]
    pub actual_duration_minutes: Option<i32>,

    /// Final fare in currency units; converted to cents on persistence.
    #[validate(range(min = 0.0, message = "finalFare must be non-negative"))]
    pub final_fare: Option<f64>,
}

fn validate_optional_distance(distance: f64) -> Result<(), validator::ValidationError> {
    shared::validation::validate_distance_km(distance)
}

/// Query parameters for the driver history endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TripHistoryQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

/// Query parameters for the driver statistics endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TripStatisticsQuery {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

// ============================================================================
// Response DTOs
// ============================================================================

/// A synthesized trip lifecycle event for the detail timeline.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TripEvent {
    pub event: String,
    pub timestamp: DateTime<Utc>,
}

/// Detail response: the trip plus its event timeline.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TripDetailResponse {
    #[serde(flatten)]
    pub trip: Trip,
    pub timeline: Vec<TripEvent>,
}

impl TripDetailResponse {
    /// Builds the timeline from the trip's stamped transitions,
    /// sorted by timestamp.
    pub fn from_trip(trip: Trip) -> Self {
        let mut timeline = vec![TripEvent {
            event: "requested".to_string(),
            timestamp: trip.requested_at,
        }];
        if let Some(at) = trip.accepted_at {
            timeline.push(TripEvent {
                event: "accepted".to_string(),
                timestamp: at,
            });
        }
        if let Some(at) = trip.started_at {
            timeline.push(TripEvent {
                event: "started".to_string(),
                timestamp: at,
            });
        }
        if let Some(at) = trip.completed_at {
            timeline.push(TripEvent {
                event: "completed".to_string(),
                timestamp: at,
            });
        }
        if let Some(at) = trip.canceled_at {
            timeline.push(TripEvent {
                event: "canceled".to_string(),
                timestamp: at,
            });
        }
        timeline.sort_by_key(|e| e.timestamp);
        Self { trip, timeline }
    }
}

/// Aggregate trip counters for one reporting window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TripAggregates {
    pub total_trips: i64,
    pub completed_trips: i64,
    pub canceled_trips: i64,
    pub total_earnings_cents: i64,
    pub total_distance_km: f64,
    pub total_duration_minutes: i64,
}

/// Response for the driver statistics endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TripStatisticsResponse {
    pub range: TripAggregates,
    pub this_week: TripAggregates,
    pub this_month: TripAggregates,
}

/// Paginated history response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TripHistoryResponse {
    pub trips: Vec<Trip>,
    pub pagination: shared::pagination::PageInfo,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_point(lat: f64, lng: f64) -> TripPoint {
        TripPoint {
            address: "Bole Road".to_string(),
            lat,
            lng,
        }
    }

    fn sample_trip() -> Trip {
        Trip {
            id: Uuid::new_v4(),
            reference: Trip::generate_reference(),
            passenger_id: None,
            passenger_name: Some("Abebe Kebede".to_string()),
            passenger_phone: Some("+251911234567".to_string()),
            driver_id: None,
            vehicle_id: None,
            vehicle_class_id: Some(3),
            status: TripStatus::Requested,
            pickup: sample_point(8.9806, 38.7578),
            dropoff: sample_point(9.0092, 38.7612),
            estimated_distance_km: Some(4.2),
            estimated_duration_minutes: Some(14),
            estimated_fare_cents: Some(12000),
            trip_kind: TripKind::Standard,
            payment_method: Some("cash".to_string()),
            payment_status: None,
            instructions: None,
            recipient_name: None,
            package_description: None,
            dispatcher_id: Some(Uuid::new_v4()),
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
        }
    }

    // =========================================================================
    // TripStatus Tests
    // =========================================================================

    #[test]
    fn test_trip_status_as_str() {
        assert_eq!(TripStatus::Requested.as_str(), "requested");
        assert_eq!(TripStatus::InProgress.as_str(), "in_progress");
        assert_eq!(TripStatus::Canceled.as_str(), "canceled");
    }

    #[test]
    fn test_trip_status_from_str() {
        assert_eq!(
            "requested".parse::<TripStatus>().unwrap(),
            TripStatus::Requested
        );
        assert_eq!(
            "in_progress".parse::<TripStatus>().unwrap(),
            TripStatus::InProgress
        );
        assert!("REQUESTED".parse::<TripStatus>().is_err());
        assert!("cancelled".parse::<TripStatus>().is_err());
    }

    #[test]
    fn test_trip_status_transitions_forward() {
        assert!(TripStatus::Requested.can_transition_to(TripStatus::Accepted));
        assert!(TripStatus::Accepted.can_transition_to(TripStatus::InProgress));
        assert!(TripStatus::InProgress.can_transition_to(TripStatus::Completed));
    }

    #[test]
    fn test_trip_status_any_pre_terminal_may_cancel() {
        assert!(TripStatus::Requested.can_transition_to(TripStatus::Canceled));
        assert!(TripStatus::Accepted.can_transition_to(TripStatus::Canceled));
        assert!(TripStatus::InProgress.can_transition_to(TripStatus::Canceled));
    }

    #[test]
    fn test_trip_status_terminal_states_frozen() {
        for target in [
            TripStatus::Requested,
            TripStatus::Accepted,
            TripStatus::InProgress,
            TripStatus::Completed,
            TripStatus::Canceled,
        ] {
            assert!(!TripStatus::Completed.can_transition_to(target));
            assert!(!TripStatus::Canceled.can_transition_to(target));
        }
        assert!(TripStatus::Completed.is_terminal());
        assert!(TripStatus::Canceled.is_terminal());
        assert!(!TripStatus::Requested.is_terminal());
    }

    #[test]
    fn test_trip_status_no_skipping() {
        assert!(!TripStatus::Requested.can_transition_to(TripStatus::InProgress));
        assert!(!TripStatus::Requested.can_transition_to(TripStatus::Completed));
        assert!(!TripStatus::Accepted.can_transition_to(TripStatus::Completed));
    }

    #[test]
    fn test_trip_status_serde() {
        assert_eq!(
            serde_json::to_string(&TripStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        let parsed: TripStatus = serde_json::from_str("\"canceled\"").unwrap();
        assert_eq!(parsed, TripStatus::Canceled);
    }

    // =========================================================================
    // TripKind Tests
    // =========================================================================

    #[test]
    fn test_trip_kind_round_trip() {
        assert_eq!("standard".parse::<TripKind>().unwrap(), TripKind::Standard);
        assert_eq!("delivery".parse::<TripKind>().unwrap(), TripKind::Delivery);
        assert!("parcel".parse::<TripKind>().is_err());
        assert_eq!(TripKind::default(), TripKind::Standard);
    }

    #[test]
    fn test_display_name_prefers_recipient_for_delivery() {
        let mut trip = sample_trip();
        trip.trip_kind = TripKind::Delivery;
        trip.recipient_name = Some("Sara Tesfaye".to_string());
        assert_eq!(trip.display_name(), Some("Sara Tesfaye"));

        trip.recipient_name = None;
        assert_eq!(trip.display_name(), Some("Abebe Kebede"));

        trip.trip_kind = TripKind::Standard;
        trip.recipient_name = Some("Sara Tesfaye".to_string());
        assert_eq!(trip.display_name(), Some("Abebe Kebede"));
    }

    // =========================================================================
    // Reference Tests
    // =========================================================================

    #[test]
    fn test_generate_reference_shape() {
        let reference = Trip::generate_reference();
        assert!(reference.starts_with("TR-"));
        assert_eq!(reference.len(), 11);
        assert!(reference[3..]
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    // =========================================================================
    // Request Validation Tests
    // =========================================================================

    #[test]
    fn test_dispatcher_trip_request_valid() {
        let json = r#"{
            "pickup": {"address": "Meskel Square", "lat": 8.9806, "lng": 38.7578},
            "dropoff": {"address": "Bole Airport", "lat": 8.9778, "lng": 38.7993},
            "passengerName": "Abebe Kebede",
            "passengerPhone": "+251911234567",
            "vehicleClassId": 3,
            "estimatedFareCents": 12000
        }"#;

        let request: DispatcherTripRequest = serde_json::from_str(json).unwrap();
        assert!(request.validate().is_ok());
        assert_eq!(request.vehicle_class_id, Some(3));
        assert_eq!(request.trip_kind, TripKind::Standard);
        assert!(!request.is_new_passenger);
    }

    #[test]
    fn test_dispatcher_trip_request_invalid_latitude() {
        let json = r#"{
            "pickup": {"address": "Nowhere", "lat": 95.0, "lng": 38.7578},
            "dropoff": {"address": "Bole Airport", "lat": 8.9778, "lng": 38.7993},
            "passengerName": "Abebe Kebede",
            "passengerPhone": "+251911234567"
        }"#;

        let request: DispatcherTripRequest = serde_json::from_str(json).unwrap();
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_dispatcher_trip_request_short_phone() {
        let json = r#"{
            "pickup": {"address": "Meskel Square", "lat": 8.9806, "lng": 38.7578},
            "dropoff": {"address": "Bole Airport", "lat": 8.9778, "lng": 38.7993},
            "passengerName": "Abebe Kebede",
            "passengerPhone": "123"
        }"#;

        let request: DispatcherTripRequest = serde_json::from_str(json).unwrap();
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_driver_trip_request_minimal() {
        let json = r#"{
            "pickup": {"address": "Piassa", "lat": 9.0333, "lng": 38.7500},
            "dropoff": {"address": "Kazanchis", "lat": 9.0145, "lng": 38.7691}
        }"#;

        let request: DriverTripRequest = serde_json::from_str(json).unwrap();
        assert!(request.validate().is_ok());
        assert!(request.passenger_name.is_none());
    }

    #[test]
    fn test_complete_trip_request_negative_distance() {
        let request = CompleteTripRequest {
            actual_distance_km: Some(-1.0),
            actual_duration_minutes: None,
            final_fare: None,
        };
        assert!(request.validate().is_err());
    }

    // =========================================================================
    // Timeline Tests
    // =========================================================================

    #[test]
    fn test_timeline_requested_only() {
        let trip = sample_trip();
        let detail = TripDetailResponse::from_trip(trip);
        assert_eq!(detail.timeline.len(), 1);
        assert_eq!(detail.timeline[0].event, "requested");
    }

    #[test]
    fn test_timeline_sorted_through_completion() {
        let mut trip = sample_trip();
        let base = trip.requested_at;
        trip.accepted_at = Some(base + chrono::Duration::seconds(30));
        trip.started_at = Some(base + chrono::Duration::seconds(120));
        trip.completed_at = Some(base + chrono::Duration::seconds(1500));
        trip.status = TripStatus::Completed;

        let detail = TripDetailResponse::from_trip(trip);
        let events: Vec<&str> = detail.timeline.iter().map(|e| e.event.as_str()).collect();
        assert_eq!(events, vec!["requested", "accepted", "started", "completed"]);
        assert!(detail
            .timeline
            .windows(2)
            .all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_trip_serializes_camel_case() {
        let trip = sample_trip();
        let json = serde_json::to_string(&trip).unwrap();
        assert!(json.contains("\"vehicleClassId\":3"));
        assert!(json.contains("\"isNewPassenger\":false"));
        assert!(json.contains("\"requestedAt\""));
        // Unset optionals are omitted entirely.
        assert!(!json.contains("finalFareCents"));
    }
}
