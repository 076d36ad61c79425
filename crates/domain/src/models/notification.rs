//! Dispatcher notification model.
//!
//! The core only produces notification records; storage and delivery
//! beyond persistence belong to the notification subsystem.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Category of a dispatcher-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    TripCreated,
    TripAccepted,
    TripAutoCanceled,
    TripCompleted,
}

impl NotificationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationCategory::TripCreated => "trip_created",
            NotificationCategory::TripAccepted => "trip_accepted",
            NotificationCategory::TripAutoCanceled => "trip_auto_canceled",
            NotificationCategory::TripCompleted => "trip_completed",
        }
    }
}

impl std::fmt::Display for NotificationCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Delivery priority hint for the notification subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    Low,
    #[default]
    Normal,
    High,
}

impl NotificationPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationPriority::Low => "low",
            NotificationPriority::Normal => "normal",
            NotificationPriority::High => "high",
        }
    }
}

/// A persisted notification record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub body: String,
    pub category: NotificationCategory,
    pub reference_id: Uuid,
    pub priority: NotificationPriority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// A notification not yet persisted (no id or timestamp).
#[derive(Debug, Clone)]
pub struct NotificationDraft {
    pub user_id: Uuid,
    pub title: String,
    pub body: String,
    pub category: NotificationCategory,
    pub reference_id: Uuid,
    pub priority: NotificationPriority,
    pub metadata: Option<serde_json::Value>,
}

impl NotificationDraft {
    /// Trip-created acknowledgment to the filing dispatcher.
    pub fn trip_created(dispatcher_id: Uuid, trip_id: Uuid, reference: &str) -> Self {
        Self {
            user_id: dispatcher_id,
            title: "Trip created".to_string(),
            body: format!("Trip {} was created and is being dispatched", reference),
            category: NotificationCategory::TripCreated,
            reference_id: trip_id,
            priority: NotificationPriority::Normal,
            metadata: None,
        }
    }

    /// A driver accepted the dispatcher's trip.
    pub fn trip_accepted(
        dispatcher_id: Uuid,
        trip_id: Uuid,
        reference: &str,
        driver_name: &str,
    ) -> Self {
        Self {
            user_id: dispatcher_id,
            title: "Trip accepted".to_string(),
            body: format!("Trip {} was accepted by {}", reference, driver_name),
            category: NotificationCategory::TripAccepted,
            reference_id: trip_id,
            priority: NotificationPriority::High,
            metadata: Some(serde_json::json!({ "driverName": driver_name })),
        }
    }

    /// Dispatch exhausted the auto-cancel window with no acceptance.
    pub fn trip_auto_canceled(dispatcher_id: Uuid, trip_id: Uuid, reference: &str, reason: &str) -> Self {
        Self {
            user_id: dispatcher_id,
            title: "Trip canceled".to_string(),
            body: format!("Trip {}: {}", reference, reason),
            category: NotificationCategory::TripAutoCanceled,
            reference_id: trip_id,
            priority: NotificationPriority::High,
            metadata: Some(serde_json::json!({ "reason": reason })),
        }
    }

    /// The assigned driver completed the trip.
    pub fn trip_completed(dispatcher_id: Uuid, trip_id: Uuid, reference: &str) -> Self {
        Self {
            user_id: dispatcher_id,
            title: "Trip completed".to_string(),
            body: format!("Trip {} was completed", reference),
            category: NotificationCategory::TripCompleted,
            reference_id: trip_id,
            priority: NotificationPriority::Normal,
            metadata: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_as_str() {
        assert_eq!(
            NotificationCategory::TripAutoCanceled.as_str(),
            "trip_auto_canceled"
        );
        assert_eq!(NotificationCategory::TripCreated.to_string(), "trip_created");
    }

    #[test]
    fn test_auto_canceled_draft_carries_reason_and_reference() {
        let dispatcher_id = Uuid::new_v4();
        let trip_id = Uuid::new_v4();
        let reason = "no drivers in the selected place please wait and try again";

        let draft =
            NotificationDraft::trip_auto_canceled(dispatcher_id, trip_id, "TR-9F3KX2QA", reason);
        assert_eq!(draft.user_id, dispatcher_id);
        assert_eq!(draft.reference_id, trip_id);
        assert_eq!(draft.category, NotificationCategory::TripAutoCanceled);
        assert!(draft.body.contains("TR-9F3KX2QA"));
        assert!(draft.body.contains(reason));
    }

    #[test]
    fn test_accepted_draft_names_driver() {
        let draft = NotificationDraft::trip_accepted(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "TR-AB12CD34",
            "Abebe Kebede",
        );
        assert!(draft.body.contains("Abebe Kebede"));
        assert_eq!(draft.priority, NotificationPriority::High);
        assert!(draft.metadata.is_some());
    }

    #[test]
    fn test_priority_serde() {
        assert_eq!(
            serde_json::to_string(&NotificationPriority::High).unwrap(),
            "\"high\""
        );
        assert_eq!(NotificationPriority::default(), NotificationPriority::Normal);
    }
}
