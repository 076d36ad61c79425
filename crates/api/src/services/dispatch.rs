//! Dispatch controller.
//!
//! Consumes a freshly inserted `requested` trip and drives the offer
//! protocol: find nearby candidates, offer to the head of the list, arm
//! the per-offer timer, rotate on decline/timeout/disconnect, widen the
//! vehicle-class filter after a minute, poll for an empty class pool, and
//! auto-cancel when the three-minute ceiling passes without an accept.
//!
//! Each broadcast runs on its own tokio task that exclusively owns the
//! trip's `BroadcastState`; accept/decline/disconnect arrive as signals
//! on the trip's mailbox, so all per-trip mutations are serialized.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::DispatchPolicyConfig;
use crate::middleware::metrics::{
    record_dispatch_outcome, record_dispatch_started, record_offer_sent,
};
use crate::services::notify::Notifier;
use crate::services::offer::{TripOfferPayload, TripSnapshot, TripStatusChanged};
use crate::services::spatial::SpatialIndex;
use domain::models::notification::NotificationDraft;
use domain::models::trip::TripStatus;
use persistence::repositories::{
    DriverPickupRepository, DriverProfileRepository, NewDriverPickup, TripRepository,
};

/// Cancel reason stamped by the auto-cancel ceiling.
pub const AUTO_CANCEL_REASON: &str =
    "no drivers in the selected place please wait and try again";

// ============================================================================
// Seams
// ============================================================================

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("driver not connected")]
    NotConnected,

    #[error("send failed: {0}")]
    SendFailed(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage failure: {0}")]
    Storage(String),
}

/// Offer delivery surface of the presence hub, as seen by dispatch.
#[async_trait]
pub trait OfferOutbox: Send + Sync {
    async fn is_connected(&self, driver_user_id: Uuid) -> bool;

    async fn send_offer(
        &self,
        driver_user_id: Uuid,
        offer: &TripOfferPayload,
    ) -> Result<(), OutboxError>;

    async fn send_status_changed(
        &self,
        driver_user_id: Uuid,
        update: &TripStatusChanged,
    ) -> Result<(), OutboxError>;
}

/// A trip auto-canceled by the ceiling, for dispatcher notification.
#[derive(Debug, Clone)]
pub struct AutoCanceledTrip {
    pub trip_id: Uuid,
    pub reference: String,
    pub dispatcher_id: Option<Uuid>,
}

/// Persistence surface of the dispatch protocol.
#[async_trait]
pub trait DispatchStore: Send + Sync {
    /// Record an extended offer in the operational log.
    async fn record_offer(
        &self,
        trip: &TripSnapshot,
        driver_user_id: Uuid,
    ) -> Result<(), StoreError>;

    /// Conditionally cancel the trip: only while it is still `requested`
    /// with no driver. Returns None when an accept won the race.
    async fn auto_cancel(
        &self,
        trip_id: Uuid,
        reason: &str,
    ) -> Result<Option<AutoCanceledTrip>, StoreError>;
}

// ============================================================================
// Configuration and state
// ============================================================================

/// Runtime timing knobs for a broadcast.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub search_radius_km: f64,
    pub max_candidates: usize,
    pub offer_timeout: Duration,
    pub class_expansion_after: Duration,
    pub class_poll_interval: Duration,
    pub class_poll_attempts: u32,
    pub auto_cancel_after: Duration,
}

impl DispatchConfig {
    pub fn from_policy(policy: &DispatchPolicyConfig) -> Self {
        Self {
            search_radius_km: policy.search_radius_km,
            max_candidates: policy.max_candidates.max(1) as usize,
            offer_timeout: Duration::from_secs(policy.offer_timeout_secs),
            class_expansion_after: Duration::from_secs(policy.class_expansion_secs),
            class_poll_interval: Duration::from_secs(policy.class_poll_interval_secs),
            class_poll_attempts: policy.class_poll_attempts,
            auto_cancel_after: Duration::from_secs(policy.auto_cancel_secs),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self::from_policy(&DispatchPolicyConfig::default())
    }
}

/// In-memory record of one ongoing broadcast. Owned exclusively by the
/// trip's dispatch task; never persisted.
#[derive(Debug)]
pub struct BroadcastState {
    candidates: Vec<Uuid>,
    current_index: usize,
    cap: usize,
    pub has_expanded_to_all_classes: bool,
    pub is_polling_for_class: bool,
}

impl BroadcastState {
    pub fn new(cap: usize) -> Self {
        Self {
            candidates: Vec::new(),
            current_index: 0,
            cap,
            has_expanded_to_all_classes: false,
            is_polling_for_class: false,
        }
    }

    /// Append candidates, deduplicating by user id and preserving the
    /// order of drivers already in the list. Respects the candidate cap.
    /// Returns how many entries were added.
    pub fn extend(&mut self, found: Vec<Uuid>) -> usize {
        let mut added = 0;
        for driver in found {
            if self.candidates.len() >= self.cap {
                break;
            }
            if !self.candidates.contains(&driver) {
                self.candidates.push(driver);
                added += 1;
            }
        }
        added
    }

    /// The driver currently at the head of the rotation.
    pub fn current(&self) -> Option<Uuid> {
        self.candidates.get(self.current_index).copied()
    }

    /// Move past the current driver.
    pub fn advance(&mut self) {
        self.current_index += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }
}

/// Signals delivered to a broadcast task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchSignal {
    Accepted {
        driver_user_id: Uuid,
        driver_profile_id: Uuid,
    },
    Declined {
        driver_user_id: Uuid,
    },
    Disconnected {
        driver_user_id: Uuid,
    },
    /// The trip was canceled while still `requested`; tear down.
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriveOutcome {
    Accepted {
        winner_user: Uuid,
        winner_profile: Uuid,
    },
    TimedOut,
    Aborted,
}

// ============================================================================
// Controller
// ============================================================================

/// Owns every live broadcast. Cleared on process shutdown; the stale-trip
/// reconciliation job covers broadcasts lost to a restart.
pub struct DispatchController {
    index: Arc<dyn SpatialIndex>,
    outbox: Arc<dyn OfferOutbox>,
    store: Arc<dyn DispatchStore>,
    notifier: Arc<dyn Notifier>,
    config: DispatchConfig,
    active: Mutex<HashMap<Uuid, mpsc::UnboundedSender<DispatchSignal>>>,
}

impl DispatchController {
    pub fn new(
        index: Arc<dyn SpatialIndex>,
        outbox: Arc<dyn OfferOutbox>,
        store: Arc<dyn DispatchStore>,
        notifier: Arc<dyn Notifier>,
        config: DispatchConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            index,
            outbox,
            store,
            notifier,
            config,
            active: Mutex::new(HashMap::new()),
        })
    }

    /// Start broadcasting a dispatcher-created `requested` trip.
    pub fn dispatch(self: &Arc<Self>, trip: TripSnapshot) {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut active = self.active.lock().unwrap();
            if active.contains_key(&trip.id) {
                warn!(trip_id = %trip.id, "Trip is already being dispatched");
                return;
            }
            active.insert(trip.id, tx);
        }
        record_dispatch_started();
        info!(trip_id = %trip.id, reference = %trip.reference, "Dispatch started");

        let controller = Arc::clone(self);
        tokio::spawn(async move {
            controller.run_broadcast(trip, rx).await;
        });
    }

    /// A driver won the accept race (already committed in the store).
    pub fn signal_accepted(&self, trip_id: Uuid, driver_user_id: Uuid, driver_profile_id: Uuid) {
        self.signal(
            trip_id,
            DispatchSignal::Accepted {
                driver_user_id,
                driver_profile_id,
            },
        );
    }

    /// A driver declined the offer.
    pub fn signal_declined(&self, trip_id: Uuid, driver_user_id: Uuid) {
        self.signal(trip_id, DispatchSignal::Declined { driver_user_id });
    }

    /// A driver's connection dropped: every broadcast currently offering
    /// to this driver treats it as an immediate decline.
    pub fn signal_disconnected(&self, driver_user_id: Uuid) {
        let active = self.active.lock().unwrap();
        for tx in active.values() {
            let _ = tx.send(DispatchSignal::Disconnected { driver_user_id });
        }
    }

    /// The trip left `requested` through an explicit cancel.
    pub fn abort(&self, trip_id: Uuid) {
        self.signal(trip_id, DispatchSignal::Aborted);
    }

    /// Whether a broadcast is live for this trip.
    pub fn is_dispatching(&self, trip_id: Uuid) -> bool {
        self.active.lock().unwrap().contains_key(&trip_id)
    }

    /// Drop all broadcast mailboxes; running tasks tear down.
    pub fn shutdown(&self) {
        self.active.lock().unwrap().clear();
    }

    fn signal(&self, trip_id: Uuid, signal: DispatchSignal) {
        let active = self.active.lock().unwrap();
        if let Some(tx) = active.get(&trip_id) {
            let _ = tx.send(signal);
        }
    }

    async fn run_broadcast(
        self: Arc<Self>,
        trip: TripSnapshot,
        mut rx: mpsc::UnboundedReceiver<DispatchSignal>,
    ) {
        let started = Instant::now();
        let cancel_at = started + self.config.auto_cancel_after;
        let widen_at = started + self.config.class_expansion_after;
        let mut state = BroadcastState::new(self.config.max_candidates);

        let outcome = self
            .drive(&trip, &mut state, &mut rx, cancel_at, widen_at)
            .await;

        match outcome {
            DriveOutcome::Accepted {
                winner_user,
                winner_profile,
            } => {
                record_dispatch_outcome("accepted");
                info!(trip_id = %trip.id, driver = %winner_user, "Dispatch accepted");

                // Withdraw the still-open offer from the losing offeree.
                if let Some(pending) = state.current() {
                    if pending != winner_user {
                        let update = TripStatusChanged {
                            trip_id: trip.id,
                            driver_id: Some(winner_profile),
                            status: TripStatus::Accepted,
                        };
                        if let Err(e) = self.outbox.send_status_changed(pending, &update).await {
                            debug!(trip_id = %trip.id, driver = %pending, error = %e,
                                "Could not withdraw stale offer");
                        }
                    }
                }
            }
            DriveOutcome::TimedOut => {
                self.finish_timed_out(&trip).await;
            }
            DriveOutcome::Aborted => {
                record_dispatch_outcome("aborted");
                debug!(trip_id = %trip.id, "Dispatch aborted");
            }
        }

        self.active.lock().unwrap().remove(&trip.id);
    }

    async fn finish_timed_out(&self, trip: &TripSnapshot) {
        match self.store.auto_cancel(trip.id, AUTO_CANCEL_REASON).await {
            Ok(Some(canceled)) => {
                record_dispatch_outcome("auto_canceled");
                info!(trip_id = %trip.id, reference = %canceled.reference, "Trip auto-canceled");
                if let Some(dispatcher_id) = canceled.dispatcher_id {
                    self.notifier
                        .notify(NotificationDraft::trip_auto_canceled(
                            dispatcher_id,
                            trip.id,
                            &canceled.reference,
                            AUTO_CANCEL_REASON,
                        ))
                        .await;
                }
            }
            Ok(None) => {
                // An accept committed between the ceiling and this update.
                record_dispatch_outcome("accepted");
                debug!(trip_id = %trip.id, "Auto-cancel lost to an accept");
            }
            Err(e) => {
                record_dispatch_outcome("auto_cancel_failed");
                error!(trip_id = %trip.id, error = %e, "Auto-cancel update failed");
            }
        }
    }

    async fn drive(
        &self,
        trip: &TripSnapshot,
        state: &mut BroadcastState,
        rx: &mut mpsc::UnboundedReceiver<DispatchSignal>,
        cancel_at: Instant,
        widen_at: Instant,
    ) -> DriveOutcome {
        // Candidate discovery.
        match trip.vehicle_class_id {
            Some(class_id) => {
                let found = self.find_candidates(trip, Some(class_id)).await;
                if found.is_empty() {
                    state.is_polling_for_class = true;
                    if let Some(outcome) =
                        self.poll_for_class(trip, state, rx, cancel_at, class_id).await
                    {
                        return outcome;
                    }
                    state.is_polling_for_class = false;
                    if state.is_empty() {
                        // Polling exhausted without a class match.
                        self.widen(trip, state).await;
                    }
                } else {
                    state.extend(found);
                }
            }
            None => {
                let found = self.find_candidates(trip, None).await;
                state.extend(found);
                state.has_expanded_to_all_classes = true;
            }
        }

        // Sequential offer rotation.
        loop {
            if Instant::now() >= cancel_at {
                return DriveOutcome::TimedOut;
            }

            let Some(driver) = state.current() else {
                if !state.has_expanded_to_all_classes {
                    // List exhausted before the class-expansion mark:
                    // hold until widening unlocks more candidates.
                    tokio::select! {
                        biased;
                        signal = rx.recv() => {
                            if let Some(outcome) = Self::terminal_signal(signal) {
                                return outcome;
                            }
                        }
                        _ = time::sleep_until(cancel_at) => return DriveOutcome::TimedOut,
                        _ = time::sleep_until(widen_at) => {
                            self.widen(trip, state).await;
                        }
                    }
                } else {
                    // Fully exhausted: wait out the auto-cancel ceiling.
                    // A late accept from an earlier offeree can still land.
                    tokio::select! {
                        biased;
                        signal = rx.recv() => {
                            if let Some(outcome) = Self::terminal_signal(signal) {
                                return outcome;
                            }
                        }
                        _ = time::sleep_until(cancel_at) => return DriveOutcome::TimedOut,
                    }
                }
                continue;
            };

            // Skip drivers with no live connection without arming a timer.
            if !self.outbox.is_connected(driver).await {
                debug!(trip_id = %trip.id, driver = %driver, "Skipping offline candidate");
                state.advance();
                continue;
            }

            let expires_at = Utc::now()
                + chrono::Duration::from_std(self.config.offer_timeout)
                    .unwrap_or_else(|_| chrono::Duration::minutes(5));
            let payload = TripOfferPayload::new(trip, expires_at);

            if let Err(e) = self.store.record_offer(trip, driver).await {
                warn!(trip_id = %trip.id, driver = %driver, error = %e,
                    "Could not record offer");
            }

            if let Err(e) = self.outbox.send_offer(driver, &payload).await {
                // A failed send advances the rotation, never the trip.
                warn!(trip_id = %trip.id, driver = %driver, error = %e, "Offer send failed");
                state.advance();
                continue;
            }

            record_offer_sent();
            info!(trip_id = %trip.id, driver = %driver, "Trip offered");

            let offer_deadline = Instant::now() + self.config.offer_timeout;
            if let Some(outcome) = self
                .await_reply(trip, state, rx, driver, offer_deadline, cancel_at, widen_at)
                .await
            {
                return outcome;
            }
        }
    }

    /// Wait for the current offeree's reply. Returns Some on a terminal
    /// outcome, None when the rotation should continue.
    #[allow(clippy::too_many_arguments)]
    async fn await_reply(
        &self,
        trip: &TripSnapshot,
        state: &mut BroadcastState,
        rx: &mut mpsc::UnboundedReceiver<DispatchSignal>,
        offeree: Uuid,
        offer_deadline: Instant,
        cancel_at: Instant,
        widen_at: Instant,
    ) -> Option<DriveOutcome> {
        loop {
            tokio::select! {
                biased;
                signal = rx.recv() => {
                    match signal {
                        None | Some(DispatchSignal::Aborted) => {
                            return Some(DriveOutcome::Aborted);
                        }
                        Some(DispatchSignal::Accepted { driver_user_id, driver_profile_id }) => {
                            return Some(DriveOutcome::Accepted {
                                winner_user: driver_user_id,
                                winner_profile: driver_profile_id,
                            });
                        }
                        Some(DispatchSignal::Declined { driver_user_id }) => {
                            if driver_user_id == offeree {
                                debug!(trip_id = %trip.id, driver = %offeree, "Offer declined");
                                state.advance();
                                return None;
                            }
                            // Stale decline from an earlier offeree.
                        }
                        Some(DispatchSignal::Disconnected { driver_user_id }) => {
                            if driver_user_id == offeree {
                                debug!(trip_id = %trip.id, driver = %offeree,
                                    "Offeree disconnected; treating as decline");
                                state.advance();
                                return None;
                            }
                        }
                    }
                }
                _ = time::sleep_until(cancel_at) => {
                    return Some(DriveOutcome::TimedOut);
                }
                _ = time::sleep_until(offer_deadline) => {
                    debug!(trip_id = %trip.id, driver = %offeree, "Offer timed out");
                    state.advance();
                    return None;
                }
                _ = time::sleep_until(widen_at),
                        if trip.vehicle_class_id.is_some() && !state.has_expanded_to_all_classes => {
                    // Widening extends the tail without disturbing the
                    // pending offer.
                    self.widen(trip, state).await;
                }
            }
        }
    }

    /// Poll the class pool every few seconds until a candidate appears,
    /// the attempts run out, or the broadcast ends. Returns Some on a
    /// terminal outcome.
    async fn poll_for_class(
        &self,
        trip: &TripSnapshot,
        state: &mut BroadcastState,
        rx: &mut mpsc::UnboundedReceiver<DispatchSignal>,
        cancel_at: Instant,
        class_id: i32,
    ) -> Option<DriveOutcome> {
        let mut attempts = 0;
        while attempts < self.config.class_poll_attempts {
            tokio::select! {
                biased;
                signal = rx.recv() => {
                    if let Some(outcome) = Self::terminal_signal(signal) {
                        return Some(outcome);
                    }
                }
                _ = time::sleep_until(cancel_at) => {
                    return Some(DriveOutcome::TimedOut);
                }
                _ = time::sleep(self.config.class_poll_interval) => {
                    attempts += 1;
                    let found = self.find_candidates(trip, Some(class_id)).await;
                    if !found.is_empty() {
                        debug!(trip_id = %trip.id, attempt = attempts, "Class poll matched");
                        state.extend(found);
                        return None;
                    }
                }
            }
        }
        debug!(trip_id = %trip.id, class_id, "Class polling exhausted");
        None
    }

    /// One-time relaxation of the vehicle-class filter.
    async fn widen(&self, trip: &TripSnapshot, state: &mut BroadcastState) {
        let found = self.find_candidates(trip, None).await;
        let added = state.extend(found);
        state.has_expanded_to_all_classes = true;
        info!(trip_id = %trip.id, added, "Widened dispatch to all vehicle classes");
    }

    async fn find_candidates(&self, trip: &TripSnapshot, class_id: Option<i32>) -> Vec<Uuid> {
        self.index
            .find_nearby(
                trip.pickup_lat,
                trip.pickup_lng,
                self.config.search_radius_km,
                class_id,
            )
            .await
    }

    /// Signals that end a broadcast regardless of phase.
    fn terminal_signal(signal: Option<DispatchSignal>) -> Option<DriveOutcome> {
        match signal {
            None | Some(DispatchSignal::Aborted) => Some(DriveOutcome::Aborted),
            Some(DispatchSignal::Accepted {
                driver_user_id,
                driver_profile_id,
            }) => Some(DriveOutcome::Accepted {
                winner_user: driver_user_id,
                winner_profile: driver_profile_id,
            }),
            Some(DispatchSignal::Declined { .. }) | Some(DispatchSignal::Disconnected { .. }) => {
                None
            }
        }
    }
}

// ============================================================================
// Production store
// ============================================================================

/// Dispatch store over the trip, driver and pickup repositories.
pub struct PgDispatchStore {
    trips: TripRepository,
    drivers: DriverProfileRepository,
    pickups: DriverPickupRepository,
}

impl PgDispatchStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self {
            trips: TripRepository::new(pool.clone()),
            drivers: DriverProfileRepository::new(pool.clone()),
            pickups: DriverPickupRepository::new(pool),
        }
    }
}

#[async_trait]
impl DispatchStore for PgDispatchStore {
    async fn record_offer(
        &self,
        trip: &TripSnapshot,
        driver_user_id: Uuid,
    ) -> Result<(), StoreError> {
        let profile = self
            .drivers
            .find_by_user_id(driver_user_id)
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?
            .ok_or_else(|| StoreError::Storage("driver profile not found".to_string()))?;

        self.pickups
            .insert(NewDriverPickup {
                driver_id: profile.id,
                trip_id: trip.id,
                pickup_address: trip.pickup_address.clone(),
                dropoff_address: trip.dropoff_address.clone(),
                pickup_lat: trip.pickup_lat,
                pickup_lng: trip.pickup_lng,
                dropoff_lat: trip.dropoff_lat,
                dropoff_lng: trip.dropoff_lng,
                fare_estimate_cents: trip.fare_estimate_cents,
            })
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn auto_cancel(
        &self,
        trip_id: Uuid,
        reason: &str,
    ) -> Result<Option<AutoCanceledTrip>, StoreError> {
        let canceled = self
            .trips
            .auto_cancel(trip_id, reason)
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        let Some(entity) = canceled else {
            return Ok(None);
        };

        if let Err(e) = self.pickups.close_open_for_trip(trip_id, "canceled", None).await {
            warn!(trip_id = %trip_id, error = %e, "Could not close open pickups");
        }

        Ok(Some(AutoCanceledTrip {
            trip_id: entity.id,
            reference: entity.reference,
            dispatcher_id: entity.dispatcher_id,
        }))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use domain::models::trip::TripKind;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn snapshot(class_id: Option<i32>) -> TripSnapshot {
        TripSnapshot {
            id: Uuid::new_v4(),
            reference: "TR-TEST0001".to_string(),
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
            vehicle_class_id: class_id,
            passenger_phone: Some("+251911234567".to_string()),
            passenger_name: Some("Abebe Kebede".to_string()),
            package_description: None,
            instructions: None,
            dispatcher_id: Some(Uuid::new_v4()),
        }
    }

    #[derive(Default)]
    struct MockIndex {
        by_class: Mutex<HashMap<i32, Vec<Uuid>>>,
        all_classes: Mutex<Vec<Uuid>>,
        class_queries: AtomicUsize,
        all_queries: AtomicUsize,
        /// Class queries start answering after this many attempts.
        class_visible_after: AtomicUsize,
    }

    impl MockIndex {
        fn set_class(&self, class_id: i32, drivers: Vec<Uuid>) {
            self.by_class.lock().unwrap().insert(class_id, drivers);
        }

        fn set_all(&self, drivers: Vec<Uuid>) {
            *self.all_classes.lock().unwrap() = drivers;
        }
    }

    #[async_trait]
    impl SpatialIndex for MockIndex {
        async fn find_nearby(
            &self,
            _lat: f64,
            _lng: f64,
            _radius_km: f64,
            class_id: Option<i32>,
        ) -> Vec<Uuid> {
            match class_id {
                Some(class_id) => {
                    let count = self.class_queries.fetch_add(1, Ordering::SeqCst) + 1;
                    if count <= self.class_visible_after.load(Ordering::SeqCst) {
                        return Vec::new();
                    }
                    self.by_class
                        .lock()
                        .unwrap()
                        .get(&class_id)
                        .cloned()
                        .unwrap_or_default()
                }
                None => {
                    self.all_queries.fetch_add(1, Ordering::SeqCst);
                    self.all_classes.lock().unwrap().clone()
                }
            }
        }
    }

    #[derive(Default)]
    struct MockOutbox {
        connected: Mutex<HashSet<Uuid>>,
        offers: Mutex<Vec<Uuid>>,
        statuses: Mutex<Vec<(Uuid, TripStatusChanged)>>,
    }

    impl MockOutbox {
        fn connect(&self, driver: Uuid) {
            self.connected.lock().unwrap().insert(driver);
        }

        fn offers(&self) -> Vec<Uuid> {
            self.offers.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl OfferOutbox for MockOutbox {
        async fn is_connected(&self, driver_user_id: Uuid) -> bool {
            self.connected.lock().unwrap().contains(&driver_user_id)
        }

        async fn send_offer(
            &self,
            driver_user_id: Uuid,
            _offer: &TripOfferPayload,
        ) -> Result<(), OutboxError> {
            if !self.connected.lock().unwrap().contains(&driver_user_id) {
                return Err(OutboxError::NotConnected);
            }
            self.offers.lock().unwrap().push(driver_user_id);
            Ok(())
        }

        async fn send_status_changed(
            &self,
            driver_user_id: Uuid,
            update: &TripStatusChanged,
        ) -> Result<(), OutboxError> {
            self.statuses
                .lock()
                .unwrap()
                .push((driver_user_id, update.clone()));
            Ok(())
        }
    }

    struct MockStore {
        offers: Mutex<Vec<Uuid>>,
        auto_canceled: Mutex<Vec<String>>,
        dispatcher_id: Option<Uuid>,
        still_requested: AtomicBool,
    }

    impl MockStore {
        fn new(dispatcher_id: Option<Uuid>) -> Self {
            Self {
                offers: Mutex::new(Vec::new()),
                auto_canceled: Mutex::new(Vec::new()),
                dispatcher_id,
                still_requested: AtomicBool::new(true),
            }
        }

        fn mark_assigned(&self) {
            self.still_requested.store(false, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl DispatchStore for MockStore {
        async fn record_offer(
            &self,
            _trip: &TripSnapshot,
            driver_user_id: Uuid,
        ) -> Result<(), StoreError> {
            self.offers.lock().unwrap().push(driver_user_id);
            Ok(())
        }

        async fn auto_cancel(
            &self,
            trip_id: Uuid,
            reason: &str,
        ) -> Result<Option<AutoCanceledTrip>, StoreError> {
            if !self.still_requested.load(Ordering::SeqCst) {
                return Ok(None);
            }
            self.auto_canceled.lock().unwrap().push(reason.to_string());
            Ok(Some(AutoCanceledTrip {
                trip_id,
                reference: "TR-TEST0001".to_string(),
                dispatcher_id: self.dispatcher_id,
            }))
        }
    }

    #[derive(Default)]
    struct MockNotifier {
        drafts: Mutex<Vec<NotificationDraft>>,
    }

    #[async_trait]
    impl Notifier for MockNotifier {
        async fn notify(&self, draft: NotificationDraft) {
            self.drafts.lock().unwrap().push(draft);
        }
    }

    struct Harness {
        index: Arc<MockIndex>,
        outbox: Arc<MockOutbox>,
        store: Arc<MockStore>,
        notifier: Arc<MockNotifier>,
        controller: Arc<DispatchController>,
    }

    fn harness(config: DispatchConfig, dispatcher_id: Option<Uuid>) -> Harness {
        let index = Arc::new(MockIndex::default());
        let outbox = Arc::new(MockOutbox::default());
        let store = Arc::new(MockStore::new(dispatcher_id));
        let notifier = Arc::new(MockNotifier::default());
        let controller = DispatchController::new(
            index.clone(),
            outbox.clone(),
            store.clone(),
            notifier.clone(),
            config,
        );
        Harness {
            index,
            outbox,
            store,
            notifier,
            controller,
        }
    }

    /// Let spawned broadcast tasks run without advancing the clock.
    async fn drain() {
        for _ in 0..32 {
            tokio::task::yield_now().await;
        }
    }

    /// Advance the paused clock in one-second steps so interval-armed
    /// timers fire on their real cadence instead of collapsing into one
    /// jump.
    async fn advance(duration: Duration) {
        let step = Duration::from_secs(1);
        let mut remaining = duration;
        while remaining > Duration::ZERO {
            let chunk = remaining.min(step);
            time::advance(chunk).await;
            drain().await;
            remaining -= chunk;
        }
    }

    // ------------------------------------------------------------------
    // BroadcastState
    // ------------------------------------------------------------------

    #[test]
    fn test_state_extend_dedupes_and_preserves_order() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut state = BroadcastState::new(20);

        assert_eq!(state.extend(vec![a, b]), 2);
        assert_eq!(state.extend(vec![b, c, a]), 1);
        assert_eq!(state.len(), 3);
        assert_eq!(state.current(), Some(a));
        state.advance();
        assert_eq!(state.current(), Some(b));
        state.advance();
        assert_eq!(state.current(), Some(c));
        state.advance();
        assert_eq!(state.current(), None);
    }

    #[test]
    fn test_state_respects_candidate_cap() {
        let mut state = BroadcastState::new(20);
        let first: Vec<Uuid> = (0..20).map(|_| Uuid::new_v4()).collect();
        assert_eq!(state.extend(first), 20);
        assert_eq!(state.extend(vec![Uuid::new_v4(), Uuid::new_v4()]), 0);
        assert_eq!(state.len(), 20);
    }

    // ------------------------------------------------------------------
    // Scenarios
    // ------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_class_match_first_driver_accepts() {
        let h = harness(DispatchConfig::default(), None);
        let d1 = Uuid::new_v4();
        let d1_profile = Uuid::new_v4();
        let d2 = Uuid::new_v4();
        h.index.set_class(3, vec![d1]);
        h.index.set_all(vec![d1, d2]);
        h.outbox.connect(d1);
        h.outbox.connect(d2);

        let trip = snapshot(Some(3));
        h.controller.dispatch(trip.clone());
        drain().await;

        // Only the class-3 driver is offered.
        assert_eq!(h.outbox.offers(), vec![d1]);
        assert_eq!(h.store.offers.lock().unwrap().clone(), vec![d1]);

        h.controller.signal_accepted(trip.id, d1, d1_profile);
        drain().await;

        assert!(!h.controller.is_dispatching(trip.id));
        assert!(h.store.auto_canceled.lock().unwrap().is_empty());
        assert_eq!(h.outbox.offers().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_decline_rotates_to_next_candidate() {
        let h = harness(DispatchConfig::default(), None);
        let (d1, d3) = (Uuid::new_v4(), Uuid::new_v4());
        h.index.set_class(3, vec![d1, d3]);
        h.outbox.connect(d1);
        h.outbox.connect(d3);

        let trip = snapshot(Some(3));
        h.controller.dispatch(trip.clone());
        drain().await;
        assert_eq!(h.outbox.offers(), vec![d1]);

        h.controller.signal_declined(trip.id, d1);
        drain().await;
        assert_eq!(h.outbox.offers(), vec![d1, d3]);

        advance(Duration::from_secs(12)).await;
        h.controller.signal_accepted(trip.id, d3, Uuid::new_v4());
        drain().await;

        assert!(!h.controller.is_dispatching(trip.id));
        assert!(h.store.auto_canceled.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_offer_timeout_rotates() {
        let config = DispatchConfig {
            offer_timeout: Duration::from_secs(30),
            ..DispatchConfig::default()
        };
        let h = harness(config, None);
        let (d1, d2) = (Uuid::new_v4(), Uuid::new_v4());
        h.index.set_all(vec![d1, d2]);
        h.outbox.connect(d1);
        h.outbox.connect(d2);

        let trip = snapshot(None);
        h.controller.dispatch(trip.clone());
        drain().await;
        assert_eq!(h.outbox.offers(), vec![d1]);

        // No reply within the per-offer window.
        advance(Duration::from_secs(30)).await;
        assert_eq!(h.outbox.offers(), vec![d1, d2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_candidate_skipped_without_timer() {
        let h = harness(DispatchConfig::default(), None);
        let (d1, d2) = (Uuid::new_v4(), Uuid::new_v4());
        h.index.set_all(vec![d1, d2]);
        // d1 has no live connection.
        h.outbox.connect(d2);

        let trip = snapshot(None);
        h.controller.dispatch(trip.clone());
        drain().await;

        // The offline head is passed over immediately.
        assert_eq!(h.outbox.offers(), vec![d2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_of_offeree_is_immediate_decline() {
        let h = harness(DispatchConfig::default(), None);
        let (d1, d2) = (Uuid::new_v4(), Uuid::new_v4());
        h.index.set_all(vec![d1, d2]);
        h.outbox.connect(d1);
        h.outbox.connect(d2);

        let trip = snapshot(None);
        h.controller.dispatch(trip.clone());
        drain().await;
        assert_eq!(h.outbox.offers(), vec![d1]);

        h.controller.signal_disconnected(d1);
        drain().await;
        assert_eq!(h.outbox.offers(), vec![d1, d2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_decline_does_not_rotate() {
        let h = harness(DispatchConfig::default(), None);
        let (d1, d2, stranger) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        h.index.set_all(vec![d1, d2]);
        h.outbox.connect(d1);
        h.outbox.connect(d2);

        let trip = snapshot(None);
        h.controller.dispatch(trip.clone());
        drain().await;

        h.controller.signal_declined(trip.id, stranger);
        drain().await;
        // Still waiting on d1.
        assert_eq!(h.outbox.offers(), vec![d1]);

        h.controller.signal_declined(trip.id, d1);
        drain().await;
        assert_eq!(h.outbox.offers(), vec![d1, d2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_widening_after_one_minute_appends_and_resumes() {
        let h = harness(DispatchConfig::default(), None);
        let d1 = Uuid::new_v4();
        let d2 = Uuid::new_v4();
        h.index.set_class(3, vec![d1]);
        h.index.set_all(vec![d1, d2]);
        h.outbox.connect(d1);
        h.outbox.connect(d2);

        let trip = snapshot(Some(3));
        h.controller.dispatch(trip.clone());
        drain().await;
        assert_eq!(h.outbox.offers(), vec![d1]);

        // Exhaust the class-filtered list before the one-minute mark.
        h.controller.signal_declined(trip.id, d1);
        drain().await;
        assert_eq!(h.outbox.offers(), vec![d1]);
        assert_eq!(h.index.all_queries.load(Ordering::SeqCst), 0);

        // At t=60s the filter relaxes; the next offer goes to the first
        // appended driver.
        advance(Duration::from_secs(60)).await;
        assert_eq!(h.index.all_queries.load(Ordering::SeqCst), 1);
        assert_eq!(h.outbox.offers(), vec![d1, d2]);

        h.controller.signal_accepted(trip.id, d2, Uuid::new_v4());
        drain().await;
        assert!(!h.controller.is_dispatching(trip.id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_widening_happens_exactly_once() {
        let h = harness(DispatchConfig::default(), None);
        let d1 = Uuid::new_v4();
        h.index.set_class(3, vec![d1]);
        h.index.set_all(vec![d1]);
        h.outbox.connect(d1);

        let trip = snapshot(Some(3));
        h.controller.dispatch(trip.clone());
        drain().await;

        // Ride out the full window without any reply.
        advance(Duration::from_secs(181)).await;
        assert_eq!(h.index.all_queries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_class_polling_picks_up_late_arrival() {
        let h = harness(DispatchConfig::default(), None);
        let d7 = Uuid::new_v4();
        h.index.set_class(7, vec![d7]);
        // Initial query plus the first 7 polls come back empty; the 8th
        // poll (t = 40 s) sees the driver come online.
        h.index.class_visible_after.store(8, Ordering::SeqCst);
        h.outbox.connect(d7);

        let trip = snapshot(Some(7));
        h.controller.dispatch(trip.clone());
        drain().await;
        assert!(h.outbox.offers().is_empty());

        advance(Duration::from_secs(35)).await;
        assert!(h.outbox.offers().is_empty());

        advance(Duration::from_secs(5)).await;
        assert_eq!(h.outbox.offers(), vec![d7]);
        // The class filter never widened.
        assert_eq!(h.index.all_queries.load(Ordering::SeqCst), 0);

        h.controller.signal_accepted(trip.id, d7, Uuid::new_v4());
        drain().await;
        assert!(!h.controller.is_dispatching(trip.id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_class_polling_exhausts_then_widens() {
        let h = harness(DispatchConfig::default(), None);
        let d2 = Uuid::new_v4();
        // Class 7 never materializes; a class-2 driver is nearby.
        h.index.set_all(vec![d2]);
        h.outbox.connect(d2);

        let trip = snapshot(Some(7));
        h.controller.dispatch(trip.clone());
        drain().await;
        assert!(h.outbox.offers().is_empty());

        // 12 polls x 5 s = 60 s, then the filter widens.
        advance(Duration::from_secs(60)).await;
        assert_eq!(h.index.class_queries.load(Ordering::SeqCst), 13);
        assert_eq!(h.index.all_queries.load(Ordering::SeqCst), 1);
        assert_eq!(h.outbox.offers(), vec![d2]);

        h.controller.signal_accepted(trip.id, d2, Uuid::new_v4());
        drain().await;
        assert!(!h.controller.is_dispatching(trip.id));
        assert!(h.store.auto_canceled.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_cancel_fires_at_three_minutes() {
        let dispatcher_id = Uuid::new_v4();
        let h = harness(DispatchConfig::default(), Some(dispatcher_id));
        // No drivers anywhere.
        let trip = snapshot(None);
        h.controller.dispatch(trip.clone());
        drain().await;

        advance(Duration::from_secs(179)).await;
        assert!(h.store.auto_canceled.lock().unwrap().is_empty());

        advance(Duration::from_secs(1)).await;
        let canceled = h.store.auto_canceled.lock().unwrap().clone();
        assert_eq!(canceled, vec![AUTO_CANCEL_REASON.to_string()]);
        assert!(!h.controller.is_dispatching(trip.id));

        let drafts = h.notifier.drafts.lock().unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].user_id, dispatcher_id);
        assert_eq!(drafts[0].reference_id, trip.id);
        assert!(drafts[0].body.contains(AUTO_CANCEL_REASON));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_offer_still_auto_cancels_at_ceiling() {
        let h = harness(DispatchConfig::default(), None);
        let d1 = Uuid::new_v4();
        h.index.set_all(vec![d1]);
        h.outbox.connect(d1);

        let trip = snapshot(None);
        h.controller.dispatch(trip.clone());
        drain().await;
        assert_eq!(h.outbox.offers(), vec![d1]);

        // The 5-minute offer timer is still pending when the 3-minute
        // ceiling passes.
        advance(Duration::from_secs(180)).await;
        assert_eq!(h.store.auto_canceled.lock().unwrap().len(), 1);
        assert!(!h.controller.is_dispatching(trip.id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_accept_just_before_ceiling_beats_auto_cancel() {
        let h = harness(DispatchConfig::default(), None);
        let d1 = Uuid::new_v4();
        h.index.set_all(vec![d1]);
        h.outbox.connect(d1);

        let trip = snapshot(None);
        h.controller.dispatch(trip.clone());
        drain().await;

        advance(Duration::from_millis(179_999)).await;
        h.store.mark_assigned();
        h.controller.signal_accepted(trip.id, d1, Uuid::new_v4());
        drain().await;

        advance(Duration::from_secs(2)).await;
        assert!(h.store.auto_canceled.lock().unwrap().is_empty());
        assert!(!h.controller.is_dispatching(trip.id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_accept_withdraws_offer_from_pending_offeree() {
        let h = harness(DispatchConfig::default(), None);
        let (d1, d2) = (Uuid::new_v4(), Uuid::new_v4());
        let winner_profile = Uuid::new_v4();
        h.index.set_all(vec![d1, d2]);
        h.outbox.connect(d1);
        h.outbox.connect(d2);

        let trip = snapshot(None);
        h.controller.dispatch(trip.clone());
        drain().await;

        h.controller.signal_declined(trip.id, d1);
        drain().await;
        assert_eq!(h.outbox.offers(), vec![d1, d2]);

        // d1 accepts late while d2's offer is pending: d2 learns the
        // trip is gone.
        h.controller.signal_accepted(trip.id, d1, winner_profile);
        drain().await;

        let statuses = h.outbox.statuses.lock().unwrap();
        assert_eq!(statuses.len(), 1);
        let (withdrawn_driver, update) = &statuses[0];
        assert_eq!(*withdrawn_driver, d2);
        assert_eq!(update.status, TripStatus::Accepted);
        assert_eq!(update.driver_id, Some(winner_profile));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_tears_down_without_cancel() {
        let h = harness(DispatchConfig::default(), None);
        let d1 = Uuid::new_v4();
        h.index.set_all(vec![d1]);
        h.outbox.connect(d1);

        let trip = snapshot(None);
        h.controller.dispatch(trip.clone());
        drain().await;
        assert!(h.controller.is_dispatching(trip.id));

        h.controller.abort(trip.id);
        drain().await;
        assert!(!h.controller.is_dispatching(trip.id));

        advance(Duration::from_secs(300)).await;
        assert!(h.store.auto_canceled.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_dispatch_is_rejected() {
        let h = harness(DispatchConfig::default(), None);
        let d1 = Uuid::new_v4();
        h.index.set_all(vec![d1]);
        h.outbox.connect(d1);

        let trip = snapshot(None);
        h.controller.dispatch(trip.clone());
        drain().await;
        h.controller.dispatch(trip.clone());
        drain().await;

        assert_eq!(h.outbox.offers(), vec![d1]);
    }
}
