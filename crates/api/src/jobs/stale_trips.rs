//! Stale-trip reconciliation job.
//!
//! A live broadcast auto-cancels its trip at exactly the dispatch
//! ceiling; a trip still `requested` well past that point lost its
//! broadcast to a process restart. This sweep cancels those trips with
//! the standard auto-cancel reason and notifies their dispatchers.

use std::sync::Arc;

use sqlx::PgPool;

use crate::jobs::scheduler::{Job, JobFrequency};
use crate::services::dispatch::AUTO_CANCEL_REASON;
use crate::services::notify::Notifier;
use domain::models::notification::NotificationDraft;
use persistence::repositories::{DriverPickupRepository, TripRepository};

/// Grace period past the dispatch ceiling before a `requested` trip is
/// considered orphaned.
const ORPHAN_GRACE_SECS: i64 = 60;

pub struct StaleTripsJob {
    trips: TripRepository,
    pickups: DriverPickupRepository,
    notifier: Arc<dyn Notifier>,
    auto_cancel_secs: i64,
}

impl StaleTripsJob {
    pub fn new(pool: PgPool, notifier: Arc<dyn Notifier>, auto_cancel_secs: u64) -> Self {
        Self {
            trips: TripRepository::new(pool.clone()),
            pickups: DriverPickupRepository::new(pool),
            notifier,
            auto_cancel_secs: auto_cancel_secs as i64,
        }
    }
}

#[async_trait::async_trait]
impl Job for StaleTripsJob {
    fn name(&self) -> &'static str {
        "stale_trips"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Minutes(1)
    }

    async fn execute(&self) -> Result<(), String> {
        let cutoff_secs = self.auto_cancel_secs + ORPHAN_GRACE_SECS;

        let canceled = self
            .trips
            .cancel_stale_requested(cutoff_secs, AUTO_CANCEL_REASON)
            .await
            .map_err(|e| e.to_string())?;

        if canceled.is_empty() {
            return Ok(());
        }

        tracing::warn!(count = canceled.len(), "Canceled orphaned requested trips");

        for trip in canceled {
            if let Err(e) = self
                .pickups
                .close_open_for_trip(trip.id, "canceled", None)
                .await
            {
                tracing::warn!(trip_id = %trip.id, error = %e, "Could not close open pickups");
            }
            if let Some(dispatcher_id) = trip.dispatcher_id {
                self.notifier
                    .notify(NotificationDraft::trip_auto_canceled(
                        dispatcher_id,
                        trip.id,
                        &trip.reference,
                        AUTO_CANCEL_REASON,
                    ))
                    .await;
            }
        }

        Ok(())
    }
}
