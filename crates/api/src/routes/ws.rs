//! Driver socket channel.
//!
//! `GET /ws/drivers` upgrades to a WebSocket carrying the driver
//! presence protocol: the client streams `location_update` /
//! `set_availability` / `trip_accept` / `trip_decline`, the server
//! delivers `connected`, `trip_offer`, `trip_status_changed` and errors.
//! The bearer credential rides in the Authorization header or the
//! `?token=` query parameter of the upgrade request.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::Response,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::app::AppState;
use crate::error::ApiError;
use crate::services::presence::{ClientMessage, ServerMessage};
use domain::services::AcceptOutcome;
use persistence::repositories::{DriverProfileRepository, UserRepository};
use shared::jwt::UserType;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// Upgrade handler: authenticates the driver before accepting the socket.
pub async fn driver_socket(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let token = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.to_string())
        .or(query.token)
        .ok_or_else(|| ApiError::Unauthorized("Missing bearer credential".to_string()))?;

    let claims = state
        .jwt
        .validate_access_token(&token)
        .map_err(|_| ApiError::Unauthorized("Invalid or expired token".to_string()))?;

    if claims.user_type != UserType::Driver {
        return Err(ApiError::Unauthorized(
            "Driver account required".to_string(),
        ));
    }

    let user_id = claims
        .user_id()
        .map_err(|_| ApiError::Unauthorized("Invalid token subject".to_string()))?;

    let users = UserRepository::new(state.pool.clone());
    let user = users
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Unknown user".to_string()))?;
    if !user.connectable() {
        return Err(ApiError::Unauthorized(
            "Account is deactivated or deleted".to_string(),
        ));
    }

    let drivers = DriverProfileRepository::new(state.pool.clone());
    drivers
        .find_by_user_id(user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Driver profile not found".to_string()))?;

    Ok(ws.on_upgrade(move |socket| handle_driver_socket(state, socket, user_id)))
}

async fn handle_driver_socket(state: AppState, socket: WebSocket, user_id: Uuid) {
    let socket_id = Uuid::new_v4().to_string();
    let drivers = DriverProfileRepository::new(state.pool.clone());

    if let Err(e) = drivers.mark_connected(user_id, &socket_id).await {
        error!(driver = %user_id, error = %e, "Could not mark driver online");
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    state.hub.register(user_id, socket_id.clone(), tx).await;
    info!(driver = %user_id, socket_id = %socket_id, "Driver connected");

    let _ = state
        .hub
        .send(
            user_id,
            ServerMessage::Connected {
                user_id,
                user_type: UserType::Driver,
            },
        )
        .await;

    let (mut sink, mut stream) = socket.split();

    // Outbound pump: drains the hub mailbox into the socket.
    let send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    error!(error = %e, "Could not serialize server message");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // Inbound loop: client messages processed in arrival order.
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                handle_client_message(&state, user_id, &text).await;
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {} // pings are answered by the transport
        }
    }

    send_task.abort();

    // Connection loss is authoritative only while this socket still owns
    // the binding; a reconnect may already have replaced it.
    if state.hub.unregister(user_id, &socket_id).await {
        if let Err(e) = drivers.mark_disconnected(user_id).await {
            warn!(driver = %user_id, error = %e, "Could not mark driver offline");
        }
        state.events.driver_disconnected(user_id).await;
        info!(driver = %user_id, socket_id = %socket_id, "Driver disconnected");
    } else {
        debug!(driver = %user_id, socket_id = %socket_id, "Stale socket closed");
    }
}

async fn handle_client_message(state: &AppState, user_id: Uuid, text: &str) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            debug!(driver = %user_id, error = %e, "Unparseable client message");
            let _ = state
                .hub
                .send(
                    user_id,
                    ServerMessage::Error {
                        message: "Unrecognized message".to_string(),
                    },
                )
                .await;
            return;
        }
    };

    let drivers = DriverProfileRepository::new(state.pool.clone());

    match message {
        ClientMessage::LocationUpdate(update) => {
            if let Err(e) = update.validate() {
                let _ = state
                    .hub
                    .send(
                        user_id,
                        ServerMessage::Error {
                            message: format!("Invalid location update: {}", e),
                        },
                    )
                    .await;
                return;
            }
            match drivers.update_location(user_id, update.lat, update.lng).await {
                Ok(Some(timestamp)) => {
                    let _ = state
                        .hub
                        .send(user_id, ServerMessage::LocationAck { timestamp })
                        .await;
                }
                Ok(None) => {
                    warn!(driver = %user_id, "Location update for missing profile");
                }
                Err(e) => {
                    error!(driver = %user_id, error = %e, "Location update failed");
                }
            }
        }
        ClientMessage::SetAvailability(update) => {
            if let Err(e) = update.validate() {
                let _ = state
                    .hub
                    .send(
                        user_id,
                        ServerMessage::Error {
                            message: format!("Invalid availability update: {}", e),
                        },
                    )
                    .await;
                return;
            }
            if let Some(ref location) = update.location {
                if let Err(e) = drivers
                    .update_location(user_id, location.lat, location.lng)
                    .await
                {
                    error!(driver = %user_id, error = %e, "Inline location update failed");
                }
            }
            match drivers.set_availability(user_id, update.available).await {
                Ok(Some(profile)) => {
                    let _ = state
                        .hub
                        .send(
                            user_id,
                            ServerMessage::AvailabilityAck {
                                available: profile.is_available,
                                timestamp: Utc::now(),
                            },
                        )
                        .await;
                }
                Ok(None) => {
                    warn!(driver = %user_id, "Availability update for missing profile");
                }
                Err(e) => {
                    error!(driver = %user_id, error = %e, "Availability update failed");
                }
            }
        }
        ClientMessage::TripAccept { trip_id } => {
            match state.events.driver_accepted(trip_id, user_id).await {
                Ok(AcceptOutcome::Accepted { .. }) => {
                    // The lifecycle already emitted trip_status_changed.
                }
                Ok(AcceptOutcome::NoLongerAvailable) => {
                    let _ = state
                        .hub
                        .send(
                            user_id,
                            ServerMessage::Error {
                                message: "Trip no longer available".to_string(),
                            },
                        )
                        .await;
                }
                Ok(AcceptOutcome::NotFound) => {
                    let _ = state
                        .hub
                        .send(
                            user_id,
                            ServerMessage::Error {
                                message: "Trip not found".to_string(),
                            },
                        )
                        .await;
                }
                Err(e) => {
                    error!(trip_id = %trip_id, driver = %user_id, error = %e, "Accept failed");
                    let _ = state
                        .hub
                        .send(
                            user_id,
                            ServerMessage::Error {
                                message: "Could not process accept".to_string(),
                            },
                        )
                        .await;
                }
            }
        }
        ClientMessage::TripDecline { trip_id, reason } => {
            state.events.driver_declined(trip_id, user_id, reason).await;
        }
    }
}
