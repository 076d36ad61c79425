//! Driver profile repository for database operations.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::entities::driver_profile::{DriverProfileEntity, DRIVER_PROFILE_COLUMNS};
use crate::metrics::QueryTimer;
use domain::models::driver::EARNINGS_CAP_CENTS;

/// Partial update for a driver profile. `None` leaves the column alone;
/// the nested `Option` on nullable columns writes NULL.
#[derive(Debug, Clone, Default)]
pub struct DriverProfilePatch {
    pub is_online: Option<bool>,
    pub is_available: Option<bool>,
    pub socket_id: Option<Option<String>>,
    pub current_trip_id: Option<Option<Uuid>>,
    pub rating: Option<f64>,
}

/// Repository for driver profile database operations.
#[derive(Clone)]
pub struct DriverProfileRepository {
    pool: PgPool,
}

impl DriverProfileRepository {
    /// Creates a new DriverProfileRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find driver profile by its backing user id.
    pub async fn find_by_user_id(
        &self,
        user_id: Uuid,
    ) -> Result<Option<DriverProfileEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_driver_by_user_id");

        let sql = format!(
            "SELECT {DRIVER_PROFILE_COLUMNS} FROM driver_profiles WHERE user_id = $1"
        );
        let result = sqlx::query_as::<_, DriverProfileEntity>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await;

        timer.record();
        result
    }

    /// Find driver profile by id.
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<DriverProfileEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_driver_by_id");

        let sql = format!("SELECT {DRIVER_PROFILE_COLUMNS} FROM driver_profiles WHERE id = $1");
        let result = sqlx::query_as::<_, DriverProfileEntity>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await;

        timer.record();
        result
    }

    /// Apply a partial patch. `updated_at` is always written.
    pub async fn patch(
        &self,
        id: Uuid,
        patch: DriverProfilePatch,
    ) -> Result<Option<DriverProfileEntity>, sqlx::Error> {
        let timer = QueryTimer::new("patch_driver_profile");

        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("UPDATE driver_profiles SET updated_at = NOW()");

        if let Some(is_online) = patch.is_online {
            builder.push(", is_online = ").push_bind(is_online);
        }
        if let Some(is_available) = patch.is_available {
            builder.push(", is_available = ").push_bind(is_available);
        }
        if let Some(socket_id) = patch.socket_id {
            builder.push(", socket_id = ").push_bind(socket_id);
        }
        if let Some(current_trip_id) = patch.current_trip_id {
            builder.push(", current_trip_id = ").push_bind(current_trip_id);
        }
        if let Some(rating) = patch.rating {
            builder.push(", rating = ").push_bind(rating);
        }

        builder.push(" WHERE id = ").push_bind(id);
        builder.push(format!(" RETURNING {DRIVER_PROFILE_COLUMNS}"));

        let result = builder
            .build_query_as::<DriverProfileEntity>()
            .fetch_optional(&self.pool)
            .await;

        timer.record();
        result
    }

    /// Connection established: driver is online under a fresh socket id.
    pub async fn mark_connected(
        &self,
        user_id: Uuid,
        socket_id: &str,
    ) -> Result<Option<DriverProfileEntity>, sqlx::Error> {
        let timer = QueryTimer::new("mark_driver_connected");

        let sql = format!(
            r#"
            UPDATE driver_profiles
            SET is_online = TRUE, socket_id = $2, updated_at = NOW()
            WHERE user_id = $1
            RETURNING {DRIVER_PROFILE_COLUMNS}
            "#
        );
        let result = sqlx::query_as::<_, DriverProfileEntity>(&sql)
            .bind(user_id)
            .bind(socket_id)
            .fetch_optional(&self.pool)
            .await;

        timer.record();
        result
    }

    /// Connection lost: offline drivers receive no offers.
    pub async fn mark_disconnected(&self, user_id: Uuid) -> Result<u64, sqlx::Error> {
        let timer = QueryTimer::new("mark_driver_disconnected");

        let result = sqlx::query(
            r#"
            UPDATE driver_profiles
            SET is_online = FALSE, is_available = FALSE, socket_id = NULL,
                updated_at = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map(|r| r.rows_affected());

        timer.record();
        result
    }

    /// Toggle availability, returning the resulting row.
    pub async fn set_availability(
        &self,
        user_id: Uuid,
        available: bool,
    ) -> Result<Option<DriverProfileEntity>, sqlx::Error> {
        let timer = QueryTimer::new("set_driver_availability");

        let sql = format!(
            r#"
            UPDATE driver_profiles
            SET is_available = $2, updated_at = NOW()
            WHERE user_id = $1
            RETURNING {DRIVER_PROFILE_COLUMNS}
            "#
        );
        let result = sqlx::query_as::<_, DriverProfileEntity>(&sql)
            .bind(user_id)
            .bind(available)
            .fetch_optional(&self.pool)
            .await;

        timer.record();
        result
    }

    /// Persist a location sample. Writes NOW() to last_location_update,
    /// keeping it monotonic under last-write-wins.
    pub async fn update_location(
        &self,
        user_id: Uuid,
        lat: f64,
        lng: f64,
    ) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
        let timer = QueryTimer::new("update_driver_location");

        let result = sqlx::query_scalar(
            r#"
            UPDATE driver_profiles
            SET last_known_location = ST_SetSRID(ST_MakePoint($3, $2), 4326)::geography,
                last_location_update = NOW(),
                updated_at = NOW()
            WHERE user_id = $1
            RETURNING last_location_update
            "#,
        )
        .bind(user_id)
        .bind(lat)
        .bind(lng)
        .fetch_optional(&self.pool)
        .await;

        timer.record();
        result
    }

    /// Nearest online, available, fresh drivers within the radius,
    /// optionally restricted to a vehicle class.
    ///
    /// Ordered by great-circle distance, then by fresher location, then by
    /// profile id for a stable tiebreak. Returns driver *user* ids.
    pub async fn find_nearby(
        &self,
        lat: f64,
        lng: f64,
        radius_km: f64,
        class_id: Option<i32>,
        freshness_secs: i64,
        limit: i64,
    ) -> Result<Vec<Uuid>, sqlx::Error> {
        let timer = QueryTimer::new("find_nearby_drivers");

        let result = sqlx::query_scalar(
            r#"
            SELECT dp.user_id
            FROM driver_profiles dp
            WHERE dp.is_online = TRUE
              AND dp.is_available = TRUE
              AND dp.last_known_location IS NOT NULL
              AND dp.last_location_update > NOW() - make_interval(secs => $4)
              AND ST_DWithin(
                    dp.last_known_location,
                    ST_SetSRID(ST_MakePoint($2, $1), 4326)::geography,
                    $3
                  )
              AND ($5::int IS NULL OR EXISTS (
                    SELECT 1 FROM vehicles v
                    WHERE v.driver_id = dp.id
                      AND v.is_active
                      AND v.class_id = $5
                  ))
            ORDER BY ST_Distance(
                         dp.last_known_location,
                         ST_SetSRID(ST_MakePoint($2, $1), 4326)::geography
                     ) ASC,
                     dp.last_location_update DESC,
                     dp.id ASC
            LIMIT $6
            "#,
        )
        .bind(lat)
        .bind(lng)
        .bind(radius_km * 1000.0)
        .bind(freshness_secs as f64)
        .bind(class_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await;

        timer.record();
        result
    }

    /// Clear the trip assignment, making the driver offerable again.
    pub async fn clear_assignment(&self, driver_profile_id: Uuid) -> Result<u64, sqlx::Error> {
        let timer = QueryTimer::new("clear_driver_assignment");

        let result = sqlx::query(
            r#"
            UPDATE driver_profiles
            SET current_trip_id = NULL, is_available = TRUE, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(driver_profile_id)
        .execute(&self.pool)
        .await
        .map(|r| r.rows_affected());

        timer.record();
        result
    }

    /// Trip completed: bump the trip counter, add earnings saturating at
    /// the accumulator cap, and release the driver.
    pub async fn record_completion(
        &self,
        driver_profile_id: Uuid,
        earnings_cents: i64,
    ) -> Result<u64, sqlx::Error> {
        let timer = QueryTimer::new("record_driver_completion");

        let result = sqlx::query(
            r#"
            UPDATE driver_profiles
            SET total_trips = total_trips + 1,
                total_earnings_cents = LEAST(total_earnings_cents + $2, $3),
                current_trip_id = NULL,
                is_available = TRUE,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(driver_profile_id)
        .bind(earnings_cents.max(0))
        .bind(EARNINGS_CAP_CENTS)
        .execute(&self.pool)
        .await
        .map(|r| r.rows_affected());

        timer.record();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_default_is_empty() {
        let patch = DriverProfilePatch::default();
        assert!(patch.is_online.is_none());
        assert!(patch.is_available.is_none());
        assert!(patch.socket_id.is_none());
        assert!(patch.current_trip_id.is_none());
        assert!(patch.rating.is_none());
    }

    #[test]
    fn test_patch_nullable_columns_distinguish_unset_from_null() {
        let clear_socket = DriverProfilePatch {
            socket_id: Some(None),
            ..Default::default()
        };
        assert_eq!(clear_socket.socket_id, Some(None));

        let set_socket = DriverProfilePatch {
            socket_id: Some(Some("abc".to_string())),
            ..Default::default()
        };
        assert_eq!(set_socket.socket_id, Some(Some("abc".to_string())));
    }
}
