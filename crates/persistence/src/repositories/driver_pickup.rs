//! Driver pickup repository for database operations.

use sqlx::PgPool;
use uuid::Uuid;

use crate::entities::DriverPickupEntity;
use crate::metrics::QueryTimer;

/// Column list shared by driver pickup SELECT/RETURNING clauses.
const PICKUP_COLUMNS: &str = r#"
    id, driver_id, trip_id, pickup_address, dropoff_address, pickup_lat,
    pickup_lng, dropoff_lat, dropoff_lng, fare_estimate_cents, status,
    decline_reason, created_at, updated_at
"#;

/// Input data for recording one offer.
#[derive(Debug, Clone)]
pub struct NewDriverPickup {
    pub driver_id: Uuid,
    pub trip_id: Uuid,
    pub pickup_address: String,
    pub dropoff_address: String,
    pub pickup_lat: f64,
    pub pickup_lng: f64,
    pub dropoff_lat: f64,
    pub dropoff_lng: f64,
    pub fare_estimate_cents: i64,
}

/// Repository for driver pickup database operations.
#[derive(Clone)]
pub struct DriverPickupRepository {
    pool: PgPool,
}

impl DriverPickupRepository {
    /// Creates a new DriverPickupRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record an offer extended to a driver.
    pub async fn insert(&self, input: NewDriverPickup) -> Result<DriverPickupEntity, sqlx::Error> {
        let timer = QueryTimer::new("insert_driver_pickup");

        let sql = format!(
            r#"
            INSERT INTO driver_pickups (
                driver_id, trip_id, pickup_address, dropoff_address,
                pickup_lat, pickup_lng, dropoff_lat, dropoff_lng,
                fare_estimate_cents, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'created')
            RETURNING {PICKUP_COLUMNS}
            "#
        );
        let result = sqlx::query_as::<_, DriverPickupEntity>(&sql)
            .bind(input.driver_id)
            .bind(input.trip_id)
            .bind(&input.pickup_address)
            .bind(&input.dropoff_address)
            .bind(input.pickup_lat)
            .bind(input.pickup_lng)
            .bind(input.dropoff_lat)
            .bind(input.dropoff_lng)
            .bind(input.fare_estimate_cents)
            .fetch_one(&self.pool)
            .await;

        timer.record();
        result
    }

    /// Advance a driver's pickup row for a trip between lifecycle states.
    pub async fn advance(
        &self,
        trip_id: Uuid,
        driver_id: Uuid,
        from_status: &str,
        to_status: &str,
    ) -> Result<u64, sqlx::Error> {
        let timer = QueryTimer::new("advance_driver_pickup");

        let result = sqlx::query(
            r#"
            UPDATE driver_pickups
            SET status = $4, updated_at = NOW()
            WHERE trip_id = $1 AND driver_id = $2 AND status = $3
            "#,
        )
        .bind(trip_id)
        .bind(driver_id)
        .bind(from_status)
        .bind(to_status)
        .execute(&self.pool)
        .await
        .map(|r| r.rows_affected());

        timer.record();
        result
    }

    /// A driver declined the offer; optionally records the stated reason.
    pub async fn decline(
        &self,
        trip_id: Uuid,
        driver_id: Uuid,
        reason: Option<&str>,
    ) -> Result<u64, sqlx::Error> {
        let timer = QueryTimer::new("decline_driver_pickup");

        let result = sqlx::query(
            r#"
            UPDATE driver_pickups
            SET status = 'canceled', decline_reason = $3, updated_at = NOW()
            WHERE trip_id = $1 AND driver_id = $2 AND status = 'created'
            "#,
        )
        .bind(trip_id)
        .bind(driver_id)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map(|r| r.rows_affected());

        timer.record();
        result
    }

    /// Close every still-open pickup for a trip (terminal transitions).
    /// `except_driver_id` spares the winning driver's row on accept.
    pub async fn close_open_for_trip(
        &self,
        trip_id: Uuid,
        to_status: &str,
        except_driver_id: Option<Uuid>,
    ) -> Result<u64, sqlx::Error> {
        let timer = QueryTimer::new("close_open_pickups");

        let result = sqlx::query(
            r#"
            UPDATE driver_pickups
            SET status = $2, updated_at = NOW()
            WHERE trip_id = $1
              AND status IN ('created', 'accepted')
              AND ($3::uuid IS NULL OR driver_id <> $3)
            "#,
        )
        .bind(trip_id)
        .bind(to_status)
        .bind(except_driver_id)
        .execute(&self.pool)
        .await
        .map(|r| r.rows_affected());

        timer.record();
        result
    }
}
