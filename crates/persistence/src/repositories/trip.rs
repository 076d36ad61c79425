//! Trip repository for database operations.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::entities::trip::{TripEntity, TRIP_COLUMNS};
use crate::metrics::QueryTimer;

/// Input data for inserting a trip record.
#[derive(Debug, Clone)]
pub struct NewTrip {
    pub reference: String,
    pub passenger_id: Option<Uuid>,
    pub passenger_name: Option<String>,
    pub passenger_phone: Option<String>,
    pub driver_id: Option<Uuid>,
    pub vehicle_id: Option<Uuid>,
    pub vehicle_class_id: Option<i32>,
    pub status: String,
    pub pickup_address: String,
    pub pickup_lat: f64,
    pub pickup_lng: f64,
    pub dropoff_address: String,
    pub dropoff_lat: f64,
    pub dropoff_lng: f64,
    pub estimated_distance_km: Option<f64>,
    pub estimated_duration_minutes: Option<i32>,
    pub estimated_fare_cents: Option<i64>,
    pub trip_kind: String,
    pub payment_method: Option<String>,
    pub instructions: Option<String>,
    pub recipient_name: Option<String>,
    pub package_description: Option<String>,
    pub dispatcher_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub is_new_passenger: bool,
}

/// Input data for settling a completed trip.
#[derive(Debug, Clone)]
pub struct CompletionInput {
    pub final_fare_cents: i64,
    pub driver_earnings_cents: i64,
    pub commission_cents: i64,
    pub actual_distance_km: Option<f64>,
    pub actual_duration_minutes: Option<i32>,
}

/// Result of an accept attempt, resolved under row locks.
#[derive(Debug)]
pub enum AssignOutcome {
    /// Trip assigned; carries the updated row and the winning profile id.
    Assigned {
        trip: TripEntity,
        driver_profile_id: Uuid,
    },
    /// Trip already left `requested` or has a driver.
    NotAvailable { status: String },
    /// No trip with this id.
    TripNotFound,
    /// The accepting user has no driver profile.
    DriverNotFound,
}

/// Aggregate row for the statistics endpoint.
#[derive(Debug, Clone, Default, FromRow)]
pub struct TripAggregatesRow {
    pub total_trips: i64,
    pub completed_trips: i64,
    pub canceled_trips: i64,
    pub total_earnings_cents: i64,
    pub total_distance_km: f64,
    pub total_duration_minutes: i64,
}

impl TripAggregatesRow {
    /// Convert to the domain aggregate DTO.
    pub fn into_domain(self) -> domain::models::trip::TripAggregates {
        domain::models::trip::TripAggregates {
            total_trips: self.total_trips,
            completed_trips: self.completed_trips,
            canceled_trips: self.canceled_trips,
            total_earnings_cents: self.total_earnings_cents,
            total_distance_km: self.total_distance_km,
            total_duration_minutes: self.total_duration_minutes,
        }
    }
}

/// Repository for trip database operations.
#[derive(Clone)]
pub struct TripRepository {
    pool: PgPool,
}

impl TripRepository {
    /// Creates a new TripRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert a new trip, constructing the spatial points from lat/lng.
    pub async fn insert(&self, input: NewTrip) -> Result<TripEntity, sqlx::Error> {
        let timer = QueryTimer::new("insert_trip");

        let sql = format!(
            r#"
            INSERT INTO trips (
                reference, passenger_id, passenger_name, passenger_phone,
                driver_id, vehicle_id, vehicle_class_id, status,
                pickup_address, pickup_lat, pickup_lng, pickup_point,
                dropoff_address, dropoff_lat, dropoff_lng, dropoff_point,
                estimated_distance_km, estimated_duration_minutes,
                estimated_fare_cents, trip_kind, payment_method, instructions,
                recipient_name, package_description, dispatcher_id,
                started_at, is_new_passenger
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8,
                $9, $10, $11, ST_SetSRID(ST_MakePoint($11, $10), 4326)::geography,
                $12, $13, $14, ST_SetSRID(ST_MakePoint($14, $13), 4326)::geography,
                $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25
            )
            RETURNING {TRIP_COLUMNS}
            "#
        );

        let result = sqlx::query_as::<_, TripEntity>(&sql)
            .bind(&input.reference)
            .bind(input.passenger_id)
            .bind(&input.passenger_name)
            .bind(&input.passenger_phone)
            .bind(input.driver_id)
            .bind(input.vehicle_id)
            .bind(input.vehicle_class_id)
            .bind(&input.status)
            .bind(&input.pickup_address)
            .bind(input.pickup_lat)
            .bind(input.pickup_lng)
            .bind(&input.dropoff_address)
            .bind(input.dropoff_lat)
            .bind(input.dropoff_lng)
            .bind(input.estimated_distance_km)
            .bind(input.estimated_duration_minutes)
            .bind(input.estimated_fare_cents)
            .bind(&input.trip_kind)
            .bind(&input.payment_method)
            .bind(&input.instructions)
            .bind(&input.recipient_name)
            .bind(&input.package_description)
            .bind(input.dispatcher_id)
            .bind(input.started_at)
            .bind(input.is_new_passenger)
            .fetch_one(&self.pool)
            .await;

        timer.record();
        result
    }

    /// Find trip by ID.
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<TripEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_trip_by_id");

        let sql = format!("SELECT {TRIP_COLUMNS} FROM trips WHERE id = $1");
        let result = sqlx::query_as::<_, TripEntity>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await;

        timer.record();
        result
    }

    /// Find the driver's current non-terminal assigned trip, if any.
    pub async fn find_active_for_driver(
        &self,
        driver_profile_id: Uuid,
    ) -> Result<Option<TripEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_active_trip_for_driver");

        let sql = format!(
            r#"
            SELECT {TRIP_COLUMNS}
            FROM trips
            WHERE driver_id = $1 AND status IN ('accepted', 'in_progress')
            ORDER BY requested_at DESC
            LIMIT 1
            "#
        );
        let result = sqlx::query_as::<_, TripEntity>(&sql)
            .bind(driver_profile_id)
            .fetch_optional(&self.pool)
            .await;

        timer.record();
        result
    }

    /// Attempt to assign the trip to the accepting driver.
    ///
    /// Serializes concurrent accepts: the trip row is locked with
    /// `SELECT ... FOR UPDATE` and the assignment only proceeds while the
    /// status is still `requested` with no driver. The winning driver's
    /// profile is locked and patched in the same transaction.
    pub async fn try_assign_driver(
        &self,
        trip_id: Uuid,
        driver_user_id: Uuid,
    ) -> Result<AssignOutcome, sqlx::Error> {
        let timer = QueryTimer::new("try_assign_driver");

        let mut tx = self.pool.begin().await?;

        let select_sql = format!("SELECT {TRIP_COLUMNS} FROM trips WHERE id = $1 FOR UPDATE");
        let trip = sqlx::query_as::<_, TripEntity>(&select_sql)
            .bind(trip_id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(trip) = trip else {
            tx.rollback().await?;
            timer.record();
            return Ok(AssignOutcome::TripNotFound);
        };

        if trip.status != "requested" || trip.driver_id.is_some() {
            let status = trip.status;
            tx.rollback().await?;
            timer.record();
            return Ok(AssignOutcome::NotAvailable { status });
        }

        let driver_profile_id: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM driver_profiles WHERE user_id = $1 FOR UPDATE")
                .bind(driver_user_id)
                .fetch_optional(&mut *tx)
                .await?;

        let Some(driver_profile_id) = driver_profile_id else {
            tx.rollback().await?;
            timer.record();
            return Ok(AssignOutcome::DriverNotFound);
        };

        let update_sql = format!(
            r#"
            UPDATE trips
            SET status = 'accepted',
                driver_id = $2,
                vehicle_id = (
                    SELECT v.id FROM vehicles v
                    WHERE v.driver_id = $2 AND v.is_active
                    LIMIT 1
                ),
                accepted_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {TRIP_COLUMNS}
            "#
        );
        let updated = sqlx::query_as::<_, TripEntity>(&update_sql)
            .bind(trip_id)
            .bind(driver_profile_id)
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            UPDATE driver_profiles
            SET current_trip_id = $2, is_available = FALSE, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(driver_profile_id)
        .bind(trip_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        timer.record();

        Ok(AssignOutcome::Assigned {
            trip: updated,
            driver_profile_id,
        })
    }

    /// Move the trip to `in_progress` for its assigned driver.
    ///
    /// Conditional on ownership and on status `accepted` or `in_progress`
    /// (re-sending start is idempotent); started_at is stamped only once.
    pub async fn start(
        &self,
        trip_id: Uuid,
        driver_profile_id: Uuid,
    ) -> Result<Option<TripEntity>, sqlx::Error> {
        let timer = QueryTimer::new("start_trip");

        let sql = format!(
            r#"
            UPDATE trips
            SET status = 'in_progress',
                started_at = COALESCE(started_at, NOW()),
                updated_at = NOW()
            WHERE id = $1
              AND driver_id = $2
              AND status IN ('accepted', 'in_progress')
            RETURNING {TRIP_COLUMNS}
            "#
        );
        let result = sqlx::query_as::<_, TripEntity>(&sql)
            .bind(trip_id)
            .bind(driver_profile_id)
            .fetch_optional(&self.pool)
            .await;

        timer.record();
        result
    }

    /// Cancel a pre-terminal trip.
    pub async fn cancel(
        &self,
        trip_id: Uuid,
        reason: &str,
        canceled_by_user_id: Option<Uuid>,
    ) -> Result<Option<TripEntity>, sqlx::Error> {
        let timer = QueryTimer::new("cancel_trip");

        let sql = format!(
            r#"
            UPDATE trips
            SET status = 'canceled',
                canceled_at = NOW(),
                cancel_reason = $2,
                canceled_by_user_id = $3,
                updated_at = NOW()
            WHERE id = $1
              AND status IN ('requested', 'accepted', 'in_progress')
            RETURNING {TRIP_COLUMNS}
            "#
        );
        let result = sqlx::query_as::<_, TripEntity>(&sql)
            .bind(trip_id)
            .bind(reason)
            .bind(canceled_by_user_id)
            .fetch_optional(&self.pool)
            .await;

        timer.record();
        result
    }

    /// Auto-cancel: fires only while the trip is still unassigned and
    /// `requested`. Returns None when an accept won the race.
    pub async fn auto_cancel(
        &self,
        trip_id: Uuid,
        reason: &str,
    ) -> Result<Option<TripEntity>, sqlx::Error> {
        let timer = QueryTimer::new("auto_cancel_trip");

        let sql = format!(
            r#"
            UPDATE trips
            SET status = 'canceled',
                canceled_at = NOW(),
                cancel_reason = $2,
                updated_at = NOW()
            WHERE id = $1
              AND status = 'requested'
              AND driver_id IS NULL
            RETURNING {TRIP_COLUMNS}
            "#
        );
        let result = sqlx::query_as::<_, TripEntity>(&sql)
            .bind(trip_id)
            .bind(reason)
            .fetch_optional(&self.pool)
            .await;

        timer.record();
        result
    }

    /// Reconciliation sweep: cancel `requested` trips older than the
    /// dispatch window. Covers broadcasts lost to a process restart.
    pub async fn cancel_stale_requested(
        &self,
        older_than_secs: i64,
        reason: &str,
    ) -> Result<Vec<TripEntity>, sqlx::Error> {
        let timer = QueryTimer::new("cancel_stale_requested");

        let sql = format!(
            r#"
            UPDATE trips
            SET status = 'canceled',
                canceled_at = NOW(),
                cancel_reason = $2,
                updated_at = NOW()
            WHERE status = 'requested'
              AND driver_id IS NULL
              AND requested_at < NOW() - make_interval(secs => $1)
            RETURNING {TRIP_COLUMNS}
            "#
        );
        let result = sqlx::query_as::<_, TripEntity>(&sql)
            .bind(older_than_secs as f64)
            .bind(reason)
            .fetch_all(&self.pool)
            .await;

        timer.record();
        result
    }

    /// Settle a trip the assigned driver finished.
    pub async fn complete(
        &self,
        trip_id: Uuid,
        driver_profile_id: Uuid,
        input: CompletionInput,
    ) -> Result<Option<TripEntity>, sqlx::Error> {
        let timer = QueryTimer::new("complete_trip");

        let sql = format!(
            r#"
            UPDATE trips
            SET status = 'completed',
                completed_at = NOW(),
                payment_status = 'completed',
                final_fare_cents = $3,
                driver_earnings_cents = $4,
                commission_cents = $5,
                actual_distance_km = $6,
                actual_duration_minutes = $7,
                updated_at = NOW()
            WHERE id = $1
              AND driver_id = $2
              AND status = 'in_progress'
            RETURNING {TRIP_COLUMNS}
            "#
        );
        let result = sqlx::query_as::<_, TripEntity>(&sql)
            .bind(trip_id)
            .bind(driver_profile_id)
            .bind(input.final_fare_cents)
            .bind(input.driver_earnings_cents)
            .bind(input.commission_cents)
            .bind(input.actual_distance_km)
            .bind(input.actual_duration_minutes)
            .fetch_optional(&self.pool)
            .await;

        timer.record();
        result
    }

    /// Paginated driver history with optional status and date filters.
    pub async fn history(
        &self,
        driver_profile_id: Uuid,
        status: Option<&str>,
        start_date: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<TripEntity>, i64), sqlx::Error> {
        let timer = QueryTimer::new("trip_history");

        let sql = format!(
            r#"
            SELECT {TRIP_COLUMNS}
            FROM trips
            WHERE driver_id = $1
              AND ($2::text IS NULL OR status = $2)
              AND ($3::timestamptz IS NULL OR requested_at >= $3)
              AND ($4::timestamptz IS NULL OR requested_at <= $4)
            ORDER BY requested_at DESC
            LIMIT $5 OFFSET $6
            "#
        );
        let trips = sqlx::query_as::<_, TripEntity>(&sql)
            .bind(driver_profile_id)
            .bind(status)
            .bind(start_date)
            .bind(end_date)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM trips
            WHERE driver_id = $1
              AND ($2::text IS NULL OR status = $2)
              AND ($3::timestamptz IS NULL OR requested_at >= $3)
              AND ($4::timestamptz IS NULL OR requested_at <= $4)
            "#,
        )
        .bind(driver_profile_id)
        .bind(status)
        .bind(start_date)
        .bind(end_date)
        .fetch_one(&self.pool)
        .await?;

        timer.record();
        Ok((trips, total))
    }

    /// Aggregate counters over a driver's trips in a window.
    pub async fn aggregates(
        &self,
        driver_profile_id: Uuid,
        start_date: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
    ) -> Result<TripAggregatesRow, sqlx::Error> {
        let timer = QueryTimer::new("trip_aggregates");

        let result = sqlx::query_as::<_, TripAggregatesRow>(
            r#"
            SELECT
                COUNT(*) AS total_trips,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed_trips,
                COUNT(*) FILTER (WHERE status = 'canceled') AS canceled_trips,
                COALESCE(SUM(driver_earnings_cents) FILTER (WHERE status = 'completed'), 0)::bigint
                    AS total_earnings_cents,
                COALESCE(SUM(actual_distance_km) FILTER (WHERE status = 'completed'), 0)::float8
                    AS total_distance_km,
                COALESCE(SUM(actual_duration_minutes) FILTER (WHERE status = 'completed'), 0)::bigint
                    AS total_duration_minutes
            FROM trips
            WHERE driver_id = $1
              AND ($2::timestamptz IS NULL OR requested_at >= $2)
              AND ($3::timestamptz IS NULL OR requested_at <= $3)
            "#,
        )
        .bind(driver_profile_id)
        .bind(start_date)
        .bind(end_date)
        .fetch_one(&self.pool)
        .await;

        timer.record();
        result
    }
}
