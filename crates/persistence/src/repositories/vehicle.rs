//! Vehicle repository for database operations.

use sqlx::PgPool;
use uuid::Uuid;

use crate::entities::VehicleEntity;
use crate::metrics::QueryTimer;

/// Repository for vehicle database operations.
#[derive(Clone)]
pub struct VehicleRepository {
    pool: PgPool,
}

impl VehicleRepository {
    /// Creates a new VehicleRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Active vehicles for a driver profile. At most one is expected; the
    /// first (by creation) is the one used for class matching.
    pub async fn find_active_for_driver(
        &self,
        driver_profile_id: Uuid,
    ) -> Result<Vec<VehicleEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_active_vehicles");

        let result = sqlx::query_as::<_, VehicleEntity>(
            r#"
            SELECT id, driver_id, class_id, make, model, year, color, plate,
                   is_active, created_at, updated_at
            FROM vehicles
            WHERE driver_id = $1 AND is_active
            ORDER BY created_at ASC
            "#,
        )
        .bind(driver_profile_id)
        .fetch_all(&self.pool)
        .await;

        timer.record();
        result
    }
}
