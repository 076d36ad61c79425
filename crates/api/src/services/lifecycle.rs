//! Trip lifecycle service.
//!
//! Applies trip state transitions with invariant checks, keeps the
//! driver profile's assignment flags coupled to them, settles fares on
//! completion and emits driver events and dispatcher notifications.

use std::sync::Arc;

use chrono::{Datelike, Duration, TimeZone, Utc};
use geo::{point, HaversineDistance};
use sqlx::PgPool;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::services::dispatch::OfferOutbox;
use crate::services::notify::Notifier;
use crate::services::offer::TripStatusChanged;
use domain::models::notification::NotificationDraft;
use domain::models::trip::{
    CancelTripRequest, CompleteTripRequest, DispatcherTripRequest, DriverTripRequest, Trip,
    TripDetailResponse, TripHistoryQuery, TripHistoryResponse, TripPoint, TripStatisticsQuery,
    TripStatisticsResponse, TripStatus,
};
use domain::services::FareSchedule;
use persistence::entities::DriverProfileEntity;
use persistence::repositories::{
    AssignOutcome, CompletionInput, DriverPickupRepository, DriverProfileRepository, NewTrip,
    TripRepository, VehicleRepository,
};
use shared::pagination::{Page, PageInfo};

/// Typed lifecycle failures; the HTTP boundary maps these to status codes.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    /// The requested transition conflicts with the trip's current status.
    #[error("{message} (current status: {observed})")]
    InvalidTransition { observed: String, message: String },

    /// Another driver won the accept race.
    #[error("trip no longer available")]
    NoLongerAvailable,

    #[error("{0}")]
    Validation(String),

    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),
}

pub struct TripLifecycle {
    trips: TripRepository,
    drivers: DriverProfileRepository,
    vehicles: VehicleRepository,
    pickups: DriverPickupRepository,
    outbox: Arc<dyn OfferOutbox>,
    notifier: Arc<dyn Notifier>,
    fares: FareSchedule,
}

impl TripLifecycle {
    pub fn new(
        pool: PgPool,
        outbox: Arc<dyn OfferOutbox>,
        notifier: Arc<dyn Notifier>,
        fares: FareSchedule,
    ) -> Self {
        Self {
            trips: TripRepository::new(pool.clone()),
            drivers: DriverProfileRepository::new(pool.clone()),
            vehicles: VehicleRepository::new(pool.clone()),
            pickups: DriverPickupRepository::new(pool),
            outbox,
            notifier,
            fares,
        }
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Dispatcher-created trip: starts `requested` and enters dispatch.
    pub async fn create_dispatcher_trip(
        &self,
        dispatcher_id: Uuid,
        request: DispatcherTripRequest,
    ) -> Result<Trip, LifecycleError> {
        let estimated_distance_km = request
            .estimated_distance_km
            .or_else(|| Some(straight_line_km(&request.pickup, &request.dropoff)));

        let entity = self
            .trips
            .insert(NewTrip {
                reference: Trip::generate_reference(),
                passenger_id: request.passenger_id,
                passenger_name: Some(request.passenger_name),
                passenger_phone: Some(request.passenger_phone),
                driver_id: None,
                vehicle_id: None,
                vehicle_class_id: request.vehicle_class_id,
                status: TripStatus::Requested.as_str().to_string(),
                pickup_address: request.pickup.address,
                pickup_lat: request.pickup.lat,
                pickup_lng: request.pickup.lng,
                dropoff_address: request.dropoff.address,
                dropoff_lat: request.dropoff.lat,
                dropoff_lng: request.dropoff.lng,
                estimated_distance_km,
                estimated_duration_minutes: request.estimated_duration_minutes,
                estimated_fare_cents: request.estimated_fare_cents,
                trip_kind: request.trip_kind.as_str().to_string(),
                payment_method: request.payment_method,
                instructions: request.instructions,
                recipient_name: request.recipient_name,
                package_description: request.package_description,
                dispatcher_id: Some(dispatcher_id),
                started_at: None,
                is_new_passenger: request.is_new_passenger,
            })
            .await?;

        info!(
            trip_id = %entity.id,
            reference = %entity.reference,
            dispatcher_id = %dispatcher_id,
            vehicle_class = ?entity.vehicle_class_id,
            "Dispatcher trip created"
        );

        self.notifier
            .notify(NotificationDraft::trip_created(
                dispatcher_id,
                entity.id,
                &entity.reference,
            ))
            .await;

        Ok(entity.into_domain())
    }

    /// Driver-initiated trip: immediately `in_progress`, never dispatched.
    pub async fn create_driver_trip(
        &self,
        driver_user_id: Uuid,
        request: DriverTripRequest,
    ) -> Result<Trip, LifecycleError> {
        let profile = self.require_profile(driver_user_id).await?;

        if let Some(current_trip_id) = profile.current_trip_id {
            return Err(LifecycleError::InvalidTransition {
                observed: "in_progress".to_string(),
                message: format!("Driver already has an active trip ({})", current_trip_id),
            });
        }

        let vehicle = self
            .vehicles
            .find_active_for_driver(profile.id)
            .await?
            .into_iter()
            .next();

        let estimated_distance_km = request
            .estimated_distance_km
            .or_else(|| Some(straight_line_km(&request.pickup, &request.dropoff)));

        let entity = self
            .trips
            .insert(NewTrip {
                reference: Trip::generate_reference(),
                passenger_id: None,
                passenger_name: request.passenger_name,
                passenger_phone: request.passenger_phone,
                driver_id: Some(profile.id),
                vehicle_id: vehicle.as_ref().map(|v| v.id),
                vehicle_class_id: vehicle.as_ref().map(|v| v.class_id),
                status: TripStatus::InProgress.as_str().to_string(),
                pickup_address: request.pickup.address.clone(),
                pickup_lat: request.pickup.lat,
                pickup_lng: request.pickup.lng,
                dropoff_address: request.dropoff.address.clone(),
                dropoff_lat: request.dropoff.lat,
                dropoff_lng: request.dropoff.lng,
                estimated_distance_km,
                estimated_duration_minutes: request.estimated_duration_minutes,
                estimated_fare_cents: request.estimated_fare_cents,
                trip_kind: request.trip_kind.as_str().to_string(),
                payment_method: request.payment_method,
                instructions: None,
                recipient_name: None,
                package_description: None,
                dispatcher_id: None,
                started_at: Some(Utc::now()),
                is_new_passenger: false,
            })
            .await?;

        self.drivers
            .patch(
                profile.id,
                persistence::repositories::DriverProfilePatch {
                    current_trip_id: Some(Some(entity.id)),
                    is_available: Some(false),
                    ..Default::default()
                },
            )
            .await?;

        // The operational log row starts accepted: there was no offer.
        let pickup = self
            .pickups
            .insert(persistence::repositories::NewDriverPickup {
                driver_id: profile.id,
                trip_id: entity.id,
                pickup_address: entity.pickup_address.clone(),
                dropoff_address: entity.dropoff_address.clone(),
                pickup_lat: entity.pickup_lat,
                pickup_lng: entity.pickup_lng,
                dropoff_lat: entity.dropoff_lat,
                dropoff_lng: entity.dropoff_lng,
                fare_estimate_cents: entity.estimated_fare_cents.unwrap_or(0),
            })
            .await?;
        self.pickups
            .advance(entity.id, profile.id, "created", "accepted")
            .await?;

        info!(
            trip_id = %entity.id,
            reference = %entity.reference,
            driver_id = %profile.id,
            pickup_id = %pickup.id,
            "Driver-initiated trip created"
        );

        Ok(entity.into_domain())
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    /// Accept: resolves the race under row locks. On success the winner's
    /// profile points at the trip and the dispatcher is notified.
    pub async fn accept(
        &self,
        trip_id: Uuid,
        driver_user_id: Uuid,
    ) -> Result<(Trip, Uuid), LifecycleError> {
        match self.trips.try_assign_driver(trip_id, driver_user_id).await? {
            AssignOutcome::Assigned {
                trip,
                driver_profile_id,
            } => {
                // Offers to the losing drivers are now dead letters.
                self.pickups
                    .close_open_for_trip(trip.id, "canceled", Some(driver_profile_id))
                    .await?;

                if let Some(dispatcher_id) = trip.dispatcher_id {
                    let driver_name = self
                        .drivers
                        .find_by_id(driver_profile_id)
                        .await?
                        .map(|p| format!("{} {}", p.first_name, p.last_name))
                        .unwrap_or_else(|| "a driver".to_string());
                    self.notifier
                        .notify(NotificationDraft::trip_accepted(
                            dispatcher_id,
                            trip.id,
                            &trip.reference,
                            &driver_name,
                        ))
                        .await;
                }

                self.emit_status(driver_user_id, trip.id, Some(driver_profile_id), TripStatus::Accepted)
                    .await;

                info!(
                    trip_id = %trip.id,
                    driver_id = %driver_profile_id,
                    "Trip accepted"
                );

                Ok((trip.into_domain(), driver_profile_id))
            }
            AssignOutcome::NotAvailable { status } => {
                info!(trip_id = %trip_id, observed = %status, "Accept lost the race");
                Err(LifecycleError::NoLongerAvailable)
            }
            AssignOutcome::TripNotFound => {
                Err(LifecycleError::NotFound("Trip not found".to_string()))
            }
            AssignOutcome::DriverNotFound => Err(LifecycleError::NotFound(
                "Driver profile not found".to_string(),
            )),
        }
    }

    /// Start: the assigned driver begins the trip. Re-sending start while
    /// already `in_progress` is idempotent.
    pub async fn start(
        &self,
        trip_id: Uuid,
        driver_user_id: Uuid,
    ) -> Result<Trip, LifecycleError> {
        let profile = self.require_profile(driver_user_id).await?;
        let trip = self.require_trip(trip_id).await?;

        if trip.driver_id != Some(profile.id) {
            return Err(LifecycleError::NotFound(
                "Trip not found for this driver".to_string(),
            ));
        }

        let status = trip.trip_status();
        if !matches!(status, TripStatus::Accepted | TripStatus::InProgress) {
            return Err(LifecycleError::InvalidTransition {
                observed: status.to_string(),
                message: "Trip cannot be started".to_string(),
            });
        }

        let updated = self
            .trips
            .start(trip_id, profile.id)
            .await?
            .ok_or(LifecycleError::NoLongerAvailable)?;

        self.pickups
            .advance(trip_id, profile.id, "created", "accepted")
            .await?;

        self.emit_status(driver_user_id, trip_id, Some(profile.id), TripStatus::InProgress)
            .await;

        info!(trip_id = %trip_id, driver_id = %profile.id, "Trip started");
        Ok(updated.into_domain())
    }

    /// Cancel a pre-terminal trip. The caller's eligibility was resolved
    /// at the boundary; `acting_driver` carries ownership enforcement.
    pub async fn cancel(
        &self,
        trip_id: Uuid,
        actor_user_id: Uuid,
        acting_driver: bool,
        request: CancelTripRequest,
    ) -> Result<Trip, LifecycleError> {
        let trip = self.require_trip(trip_id).await?;
        let status = trip.trip_status();

        if status.is_terminal() {
            return Err(LifecycleError::InvalidTransition {
                observed: status.to_string(),
                message: "Trip cannot be canceled".to_string(),
            });
        }

        if acting_driver {
            let profile = self.require_profile(actor_user_id).await?;
            if trip.driver_id != Some(profile.id) {
                return Err(LifecycleError::NotFound(
                    "Trip not found for this driver".to_string(),
                ));
            }
        }

        let updated = self
            .trips
            .cancel(trip_id, &request.reason, Some(actor_user_id))
            .await?
            .ok_or(LifecycleError::NoLongerAvailable)?;

        self.pickups
            .close_open_for_trip(trip_id, "canceled", None)
            .await?;

        // Release the assigned driver, if any.
        if let Some(driver_profile_id) = updated.driver_id {
            self.drivers.clear_assignment(driver_profile_id).await?;
            if let Some(driver) = self.drivers.find_by_id(driver_profile_id).await? {
                self.emit_status(
                    driver.user_id,
                    trip_id,
                    Some(driver_profile_id),
                    TripStatus::Canceled,
                )
                .await;
            }
        }

        info!(
            trip_id = %trip_id,
            actor = %actor_user_id,
            reason = %request.reason,
            "Trip canceled"
        );
        Ok(updated.into_domain())
    }

    /// Complete: requires `in_progress` and driver ownership. Fare values
    /// omitted by the client are derived from the fare schedule.
    pub async fn complete(
        &self,
        trip_id: Uuid,
        driver_user_id: Uuid,
        request: CompleteTripRequest,
    ) -> Result<Trip, LifecycleError> {
        let profile = self.require_profile(driver_user_id).await?;
        let trip = self.require_trip(trip_id).await?;

        if trip.driver_id != Some(profile.id) {
            return Err(LifecycleError::NotFound(
                "Trip not found for this driver".to_string(),
            ));
        }

        let status = trip.trip_status();
        if status != TripStatus::InProgress {
            return Err(LifecycleError::InvalidTransition {
                observed: status.to_string(),
                message: "Trip cannot be completed".to_string(),
            });
        }

        let distance_km = request
            .actual_distance_km
            .or(trip.estimated_distance_km)
            .unwrap_or(0.0);
        let duration_minutes = request
            .actual_duration_minutes
            .or(trip.estimated_duration_minutes)
            .unwrap_or(0);

        let breakdown = match request.final_fare {
            Some(fare) => self.fares.split(fare),
            None => self.fares.quote(distance_km, duration_minutes),
        };
        let (final_fare_cents, driver_earnings_cents, commission_cents) = breakdown.as_cents();

        let updated = self
            .trips
            .complete(
                trip_id,
                profile.id,
                CompletionInput {
                    final_fare_cents,
                    driver_earnings_cents,
                    commission_cents,
                    actual_distance_km: request.actual_distance_km,
                    actual_duration_minutes: request.actual_duration_minutes,
                },
            )
            .await?
            .ok_or(LifecycleError::NoLongerAvailable)?;

        self.pickups
            .advance(trip_id, profile.id, "accepted", "completed")
            .await?;

        self.drivers
            .record_completion(profile.id, driver_earnings_cents)
            .await?;

        self.emit_status(driver_user_id, trip_id, Some(profile.id), TripStatus::Completed)
            .await;

        if let Some(dispatcher_id) = updated.dispatcher_id {
            self.notifier
                .notify(NotificationDraft::trip_completed(
                    dispatcher_id,
                    trip_id,
                    &updated.reference,
                ))
                .await;
        }

        info!(
            trip_id = %trip_id,
            driver_id = %profile.id,
            final_fare_cents,
            driver_earnings_cents,
            commission_cents,
            "Trip completed"
        );
        Ok(updated.into_domain())
    }

    /// Record a driver's decline against the operational log.
    pub async fn record_decline(
        &self,
        trip_id: Uuid,
        driver_user_id: Uuid,
        reason: Option<String>,
    ) -> Result<(), LifecycleError> {
        let profile = self.require_profile(driver_user_id).await?;
        self.pickups
            .decline(trip_id, profile.id, reason.as_deref())
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// The driver's currently assigned non-terminal trip, if any.
    pub async fn active_trip(&self, driver_user_id: Uuid) -> Result<Option<Trip>, LifecycleError> {
        let profile = self.require_profile(driver_user_id).await?;
        Ok(self
            .trips
            .find_active_for_driver(profile.id)
            .await?
            .map(|entity| entity.into_domain()))
    }

    /// Paginated trip history for a driver.
    pub async fn history(
        &self,
        driver_user_id: Uuid,
        query: TripHistoryQuery,
    ) -> Result<TripHistoryResponse, LifecycleError> {
        let profile = self.require_profile(driver_user_id).await?;
        let page = Page::from_query(query.page, query.limit);

        // An unknown status filter matches nothing by definition; reject
        // it instead of silently returning an empty page.
        if let Some(ref status) = query.status {
            status
                .parse::<TripStatus>()
                .map_err(LifecycleError::Validation)?;
        }

        let (entities, total) = self
            .trips
            .history(
                profile.id,
                query.status.as_deref(),
                query.start_date,
                query.end_date,
                page.limit,
                page.offset(),
            )
            .await?;

        Ok(TripHistoryResponse {
            trips: entities.into_iter().map(|e| e.into_domain()).collect(),
            pagination: PageInfo::new(page, total),
        })
    }

    /// Aggregate statistics over the requested window plus rolling
    /// this-week and this-month aggregates.
    pub async fn statistics(
        &self,
        driver_user_id: Uuid,
        query: TripStatisticsQuery,
    ) -> Result<TripStatisticsResponse, LifecycleError> {
        let profile = self.require_profile(driver_user_id).await?;
        let now = Utc::now();

        let range = self
            .trips
            .aggregates(profile.id, query.start_date, query.end_date)
            .await?
            .into_domain();
        let this_week = self
            .trips
            .aggregates(profile.id, Some(start_of_week(now)), None)
            .await?
            .into_domain();
        let this_month = self
            .trips
            .aggregates(profile.id, Some(start_of_month(now)), None)
            .await?
            .into_domain();

        Ok(TripStatisticsResponse {
            range,
            this_week,
            this_month,
        })
    }

    /// Trip detail with the synthesized event timeline. Visible to the
    /// assigned driver and to the filing dispatcher.
    pub async fn detail(
        &self,
        trip_id: Uuid,
        caller_user_id: Uuid,
    ) -> Result<TripDetailResponse, LifecycleError> {
        let trip = self.require_trip(trip_id).await?;

        let mut allowed = trip.dispatcher_id == Some(caller_user_id);
        if !allowed {
            if let Some(profile) = self.drivers.find_by_user_id(caller_user_id).await? {
                allowed = trip.driver_id == Some(profile.id);
            }
        }
        if !allowed {
            return Err(LifecycleError::NotFound("Trip not found".to_string()));
        }

        Ok(TripDetailResponse::from_trip(trip.into_domain()))
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn require_profile(
        &self,
        driver_user_id: Uuid,
    ) -> Result<DriverProfileEntity, LifecycleError> {
        self.drivers
            .find_by_user_id(driver_user_id)
            .await?
            .ok_or_else(|| LifecycleError::NotFound("Driver profile not found".to_string()))
    }

    async fn require_trip(
        &self,
        trip_id: Uuid,
    ) -> Result<persistence::entities::TripEntity, LifecycleError> {
        self.trips
            .find_by_id(trip_id)
            .await?
            .ok_or_else(|| LifecycleError::NotFound("Trip not found".to_string()))
    }

    async fn emit_status(
        &self,
        driver_user_id: Uuid,
        trip_id: Uuid,
        driver_profile_id: Option<Uuid>,
        status: TripStatus,
    ) {
        let update = TripStatusChanged {
            trip_id,
            driver_id: driver_profile_id,
            status,
        };
        if let Err(e) = self.outbox.send_status_changed(driver_user_id, &update).await {
            warn!(
                trip_id = %trip_id,
                driver = %driver_user_id,
                status = %status,
                error = %e,
                "Could not deliver trip_status_changed"
            );
        }
    }
}

/// Great-circle distance between two trip endpoints, in kilometers. Used
/// as the estimate when the client supplies none.
pub fn straight_line_km(pickup: &TripPoint, dropoff: &TripPoint) -> f64 {
    let from = point!(x: pickup.lng, y: pickup.lat);
    let to = point!(x: dropoff.lng, y: dropoff.lat);
    from.haversine_distance(&to) / 1000.0
}

/// Midnight UTC on the Monday of the current week.
fn start_of_week(now: chrono::DateTime<Utc>) -> chrono::DateTime<Utc> {
    let date = now.date_naive() - Duration::days(now.weekday().num_days_from_monday() as i64);
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("valid midnight"))
}

/// Midnight UTC on the first of the current month.
fn start_of_month(now: chrono::DateTime<Utc>) -> chrono::DateTime<Utc> {
    let date = now
        .date_naive()
        .with_day(1)
        .expect("every month has a first day");
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("valid midnight"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn utc(y: i32, m: u32, d: u32, h: u32) -> chrono::DateTime<Utc> {
        Utc.from_utc_datetime(
            &NaiveDate::from_ymd_opt(y, m, d)
                .unwrap()
                .and_hms_opt(h, 0, 0)
                .unwrap(),
        )
    }

    #[test]
    fn test_start_of_week_is_monday_midnight() {
        // 2026-07-30 is a Thursday.
        let thursday = utc(2026, 7, 30, 15);
        let start = start_of_week(thursday);
        assert_eq!(start, utc(2026, 7, 27, 0));

        // A Monday maps to itself at midnight.
        let monday = utc(2026, 7, 27, 9);
        assert_eq!(start_of_week(monday), utc(2026, 7, 27, 0));
    }

    #[test]
    fn test_start_of_month() {
        let mid = utc(2026, 7, 30, 23);
        assert_eq!(start_of_month(mid), utc(2026, 7, 1, 0));
    }

    #[test]
    fn test_straight_line_km_addis_ababa() {
        // Meskel Square to Bole Airport is roughly 4.6 km as the crow
        // flies.
        let pickup = TripPoint {
            address: "Meskel Square".to_string(),
            lat: 8.9806,
            lng: 38.7578,
        };
        let dropoff = TripPoint {
            address: "Bole Airport".to_string(),
            lat: 8.9778,
            lng: 38.7993,
        };
        let km = straight_line_km(&pickup, &dropoff);
        assert!(km > 4.0 && km < 5.2, "unexpected distance: {}", km);
    }

    #[test]
    fn test_straight_line_km_zero_for_same_point() {
        let point = TripPoint {
            address: "Piassa".to_string(),
            lat: 9.0333,
            lng: 38.75,
        };
        assert!(straight_line_km(&point, &point) < 1e-9);
    }
}
