//! Dispatch event seam.
//!
//! The presence hub reports driver replies through this trait rather than
//! calling the dispatch controller directly, so the hub and the controller
//! can be wired once at boot without a dependency cycle.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// Error surfaced when an event cannot be applied.
#[derive(Debug, Error)]
pub enum DispatchEventError {
    #[error("storage failure: {0}")]
    Storage(String),
}

/// Result of a driver's accept attempt, resolved transactionally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// The trip was assigned to this driver.
    Accepted {
        trip_id: Uuid,
        driver_profile_id: Uuid,
    },
    /// Another driver won the race, or the trip left `requested`.
    NoLongerAvailable,
    /// No such trip, or the caller has no driver profile.
    NotFound,
}

/// Driver replies and connection transitions relevant to an open dispatch.
#[async_trait]
pub trait DispatchEvents: Send + Sync {
    /// A driver pressed accept. Returns the transactionally resolved
    /// outcome so the hub can answer the driver.
    async fn driver_accepted(
        &self,
        trip_id: Uuid,
        driver_user_id: Uuid,
    ) -> Result<AcceptOutcome, DispatchEventError>;

    /// A driver declined an offer.
    async fn driver_declined(&self, trip_id: Uuid, driver_user_id: Uuid, reason: Option<String>);

    /// A driver's connection dropped. Any trip currently offering to this
    /// driver treats it as an immediate decline.
    async fn driver_disconnected(&self, driver_user_id: Uuid);
}

/// Event sink that records nothing and accepts nothing; connection
/// handling can be exercised without a live dispatcher.
#[derive(Debug, Clone, Default)]
pub struct NullDispatchEvents;

#[async_trait]
impl DispatchEvents for NullDispatchEvents {
    async fn driver_accepted(
        &self,
        _trip_id: Uuid,
        _driver_user_id: Uuid,
    ) -> Result<AcceptOutcome, DispatchEventError> {
        Ok(AcceptOutcome::NotFound)
    }

    async fn driver_declined(&self, _trip_id: Uuid, _driver_user_id: Uuid, _reason: Option<String>) {}

    async fn driver_disconnected(&self, _driver_user_id: Uuid) {}
}
