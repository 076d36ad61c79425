//! Dispatcher notification sink.
//!
//! The core persists notification records; delivery beyond persistence is
//! the notification subsystem's concern.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, warn};

use domain::models::notification::NotificationDraft;
use persistence::repositories::NotificationRepository;

/// Sink for dispatcher-facing lifecycle notifications. Best-effort: a
/// failed write is logged, never propagated into the calling flow.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, draft: NotificationDraft);
}

/// Notifier that persists records to the notifications table.
pub struct PersistingNotifier {
    notifications: NotificationRepository,
}

impl PersistingNotifier {
    pub fn new(pool: PgPool) -> Self {
        Self {
            notifications: NotificationRepository::new(pool),
        }
    }
}

#[async_trait]
impl Notifier for PersistingNotifier {
    async fn notify(&self, draft: NotificationDraft) {
        match self.notifications.insert(&draft).await {
            Ok(record) => {
                debug!(
                    notification_id = %record.id,
                    user_id = %draft.user_id,
                    category = %draft.category,
                    "Notification persisted"
                );
            }
            Err(e) => {
                warn!(
                    user_id = %draft.user_id,
                    category = %draft.category,
                    error = %e,
                    "Failed to persist notification"
                );
            }
        }
    }
}
