//! Spatial driver index.
//!
//! A query view over the driver profiles table: "the k nearest online,
//! available drivers with a fresh location inside radius R, optionally in
//! vehicle class C". Candidate filtering only; widening the class filter
//! is the dispatch controller's decision.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::config::DispatchPolicyConfig;
use persistence::repositories::DriverProfileRepository;

/// Nearest-eligible-driver lookup used by the dispatch controller.
#[async_trait]
pub trait SpatialIndex: Send + Sync {
    /// Ordered driver user-ids, nearest first, capped by policy.
    async fn find_nearby(
        &self,
        lat: f64,
        lng: f64,
        radius_km: f64,
        class_id: Option<i32>,
    ) -> Vec<Uuid>;
}

/// Database-backed index over driver_profiles.
pub struct DriverIndex {
    drivers: DriverProfileRepository,
    freshness_secs: i64,
    max_candidates: i64,
}

impl DriverIndex {
    pub fn new(pool: PgPool, policy: &DispatchPolicyConfig) -> Self {
        Self {
            drivers: DriverProfileRepository::new(pool),
            freshness_secs: policy.location_freshness_secs,
            max_candidates: policy.max_candidates,
        }
    }
}

#[async_trait]
impl SpatialIndex for DriverIndex {
    async fn find_nearby(
        &self,
        lat: f64,
        lng: f64,
        radius_km: f64,
        class_id: Option<i32>,
    ) -> Vec<Uuid> {
        match self
            .drivers
            .find_nearby(
                lat,
                lng,
                radius_km,
                class_id,
                self.freshness_secs,
                self.max_candidates,
            )
            .await
        {
            Ok(drivers) => drivers,
            Err(e) => {
                // Recoverable: dispatch treats an empty result as "no
                // drivers found" and keeps its own timers running.
                warn!(error = %e, class_id = ?class_id, "Nearby-driver query failed");
                Vec::new()
            }
        }
    }
}
