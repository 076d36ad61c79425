//! Per-offer operational log (driver pickup) model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Status of a driver pickup row. Mirrors the trip's driver-visible states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PickupStatus {
    Created,
    Accepted,
    Completed,
    Canceled,
}

impl PickupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PickupStatus::Created => "created",
            PickupStatus::Accepted => "accepted",
            PickupStatus::Completed => "completed",
            PickupStatus::Canceled => "canceled",
        }
    }

    /// Valid lifecycle: created → accepted → completed, with canceled
    /// reachable from any non-terminal status.
    pub fn can_transition_to(&self, target: PickupStatus) -> bool {
        match (self, target) {
            (PickupStatus::Created, PickupStatus::Accepted) => true,
            (PickupStatus::Accepted, PickupStatus::Completed) => true,
            (PickupStatus::Created, PickupStatus::Canceled) => true,
            (PickupStatus::Accepted, PickupStatus::Canceled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PickupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PickupStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(PickupStatus::Created),
            "accepted" => Ok(PickupStatus::Accepted),
            "completed" => Ok(PickupStatus::Completed),
            "canceled" => Ok(PickupStatus::Canceled),
            _ => Err(format!(
                "Invalid pickup status: {}. Must be one of: created, accepted, completed, canceled",
                s
            )),
        }
    }
}

/// One offer/acceptance context for a driver on a trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverPickup {
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
    pub status: PickupStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decline_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
