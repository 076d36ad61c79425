//! Notification repository for database operations.

use sqlx::PgPool;

use crate::entities::NotificationEntity;
use crate::metrics::QueryTimer;
use domain::models::notification::NotificationDraft;

/// Repository for notification persistence.
#[derive(Clone)]
pub struct NotificationRepository {
    pool: PgPool,
}

impl NotificationRepository {
    /// Creates a new NotificationRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Persist a notification record.
    pub async fn insert(&self, draft: &NotificationDraft) -> Result<NotificationEntity, sqlx::Error> {
        let timer = QueryTimer::new("insert_notification");

        let result = sqlx::query_as::<_, NotificationEntity>(
            r#"
            INSERT INTO notifications (
                user_id, title, body, category, reference_id, priority, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, user_id, title, body, category, reference_id,
                      priority, metadata, created_at
            "#,
        )
        .bind(draft.user_id)
        .bind(&draft.title)
        .bind(&draft.body)
        .bind(draft.category.as_str())
        .bind(draft.reference_id)
        .bind(draft.priority.as_str())
        .bind(&draft.metadata)
        .fetch_one(&self.pool)
        .await;

        timer.record();
        result
    }
}
