//! Bridge between the presence hub and dispatch.
//!
//! The hub reports driver replies through the `DispatchEvents` trait;
//! this implementation resolves accepts through the lifecycle service
//! and forwards the verdict to the running broadcast. Wired once at boot,
//! which keeps the hub free of a direct controller dependency.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;
use uuid::Uuid;

use crate::services::dispatch::DispatchController;
use crate::services::lifecycle::{LifecycleError, TripLifecycle};
use domain::services::{AcceptOutcome, DispatchEventError, DispatchEvents};

pub struct DispatchEventBridge {
    lifecycle: Arc<TripLifecycle>,
    controller: Arc<DispatchController>,
}

impl DispatchEventBridge {
    pub fn new(lifecycle: Arc<TripLifecycle>, controller: Arc<DispatchController>) -> Self {
        Self {
            lifecycle,
            controller,
        }
    }
}

#[async_trait]
impl DispatchEvents for DispatchEventBridge {
    async fn driver_accepted(
        &self,
        trip_id: Uuid,
        driver_user_id: Uuid,
    ) -> Result<AcceptOutcome, DispatchEventError> {
        match self.lifecycle.accept(trip_id, driver_user_id).await {
            Ok((trip, driver_profile_id)) => {
                self.controller
                    .signal_accepted(trip_id, driver_user_id, driver_profile_id);
                Ok(AcceptOutcome::Accepted {
                    trip_id: trip.id,
                    driver_profile_id,
                })
            }
            Err(LifecycleError::NoLongerAvailable) => Ok(AcceptOutcome::NoLongerAvailable),
            Err(LifecycleError::NotFound(_)) => Ok(AcceptOutcome::NotFound),
            Err(e) => Err(DispatchEventError::Storage(e.to_string())),
        }
    }

    async fn driver_declined(&self, trip_id: Uuid, driver_user_id: Uuid, reason: Option<String>) {
        if let Err(e) = self
            .lifecycle
            .record_decline(trip_id, driver_user_id, reason)
            .await
        {
            warn!(
                trip_id = %trip_id,
                driver = %driver_user_id,
                error = %e,
                "Could not record decline"
            );
        }
        self.controller.signal_declined(trip_id, driver_user_id);
    }

    async fn driver_disconnected(&self, driver_user_id: Uuid) {
        self.controller.signal_disconnected(driver_user_id);
    }
}
