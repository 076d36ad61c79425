//! Presence hub: the server side of the driver socket channel.
//!
//! Owns the table of live driver connections. Each connection is a
//! per-driver mpsc sender draining into the WebSocket sink, so fan-out
//! writes are best-effort and never block dispatch.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::middleware::metrics::record_driver_connections;
use crate::services::dispatch::{OfferOutbox, OutboxError};
use crate::services::offer::{TripOfferPayload, TripStatusChanged};
use domain::models::driver::{AvailabilityUpdate, LocationUpdate};
use shared::jwt::UserType;

// ============================================================================
// Wire messages
// ============================================================================

/// Server-to-client events on the driver channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Connected { user_id: Uuid, user_type: UserType },
    TripOffer(TripOfferPayload),
    TripStatusChanged(TripStatusChanged),
    LocationAck { timestamp: DateTime<Utc> },
    #[serde(rename_all = "camelCase")]
    AvailabilityAck {
        available: bool,
        timestamp: DateTime<Utc>,
    },
    Error { message: String },
}

/// Client-to-server events on the driver channel.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    LocationUpdate(LocationUpdate),
    SetAvailability(AvailabilityUpdate),
    #[serde(rename_all = "camelCase")]
    TripAccept { trip_id: Uuid },
    #[serde(rename_all = "camelCase")]
    TripDecline {
        trip_id: Uuid,
        reason: Option<String>,
    },
}

// ============================================================================
// Connection registry
// ============================================================================

#[derive(Debug, Error)]
pub enum PresenceError {
    #[error("driver has no live connection")]
    NotConnected,

    #[error("connection channel closed")]
    ChannelClosed,
}

#[derive(Debug)]
struct DriverConnection {
    socket_id: String,
    tx: mpsc::UnboundedSender<ServerMessage>,
}

/// Registry of live driver connections. Mutated only on connect and
/// disconnect; sends take the read lock.
#[derive(Debug, Default)]
pub struct PresenceHub {
    connections: RwLock<HashMap<Uuid, DriverConnection>>,
}

impl PresenceHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a driver to a fresh connection. A newer connection replaces an
    /// older one (last connection wins).
    pub async fn register(
        &self,
        user_id: Uuid,
        socket_id: String,
        tx: mpsc::UnboundedSender<ServerMessage>,
    ) {
        let mut connections = self.connections.write().await;
        connections.insert(user_id, DriverConnection { socket_id, tx });
        record_driver_connections(connections.len());
    }

    /// Remove the binding, but only while the given socket still owns it;
    /// a stale disconnect must not evict a newer connection.
    pub async fn unregister(&self, user_id: Uuid, socket_id: &str) -> bool {
        let mut connections = self.connections.write().await;
        let owned = connections
            .get(&user_id)
            .map(|c| c.socket_id == socket_id)
            .unwrap_or(false);
        if owned {
            connections.remove(&user_id);
        }
        record_driver_connections(connections.len());
        owned
    }

    /// Queue a message onto the driver's connection.
    pub async fn send(&self, user_id: Uuid, message: ServerMessage) -> Result<(), PresenceError> {
        let connections = self.connections.read().await;
        let connection = connections.get(&user_id).ok_or(PresenceError::NotConnected)?;
        connection
            .tx
            .send(message)
            .map_err(|_| PresenceError::ChannelClosed)
    }

    /// Whether the driver currently holds a live connection.
    pub async fn is_connected(&self, user_id: Uuid) -> bool {
        self.connections.read().await.contains_key(&user_id)
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

#[async_trait]
impl OfferOutbox for PresenceHub {
    async fn is_connected(&self, driver_user_id: Uuid) -> bool {
        PresenceHub::is_connected(self, driver_user_id).await
    }

    async fn send_offer(
        &self,
        driver_user_id: Uuid,
        offer: &TripOfferPayload,
    ) -> Result<(), OutboxError> {
        self.send(driver_user_id, ServerMessage::TripOffer(offer.clone()))
            .await
            .map_err(|e| match e {
                PresenceError::NotConnected => OutboxError::NotConnected,
                PresenceError::ChannelClosed => OutboxError::SendFailed(e.to_string()),
            })
    }

    async fn send_status_changed(
        &self,
        driver_user_id: Uuid,
        update: &TripStatusChanged,
    ) -> Result<(), OutboxError> {
        self.send(
            driver_user_id,
            ServerMessage::TripStatusChanged(update.clone()),
        )
        .await
        .map_err(|e| match e {
            PresenceError::NotConnected => OutboxError::NotConnected,
            PresenceError::ChannelClosed => OutboxError::SendFailed(e.to_string()),
        })
    }
}
