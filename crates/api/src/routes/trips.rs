//! Trip endpoint handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::app::AppState;
use crate::error::ApiError;
use crate::services::offer::TripSnapshot;
use domain::models::trip::{
    CancelTripRequest, CompleteTripRequest, DispatcherTripRequest, DriverTripRequest, Trip,
    TripDetailResponse, TripHistoryQuery, TripHistoryResponse, TripStatisticsQuery,
    TripStatisticsResponse,
};

use crate::extractors::{DispatcherAuth, DriverAuth};

/// Parse a path id, enforcing the UUID v1-5 shape (400 otherwise).
fn parse_trip_id(raw: &str) -> Result<Uuid, ApiError> {
    shared::validation::parse_uuid_param(raw)
        .map_err(|_| ApiError::Validation("Trip id must be a valid UUID".to_string()))
}

/// Create a driver-initiated trip.
///
/// POST /api/v1/trips
///
/// The trip is created directly in `in_progress` for the calling driver;
/// it is never broadcast and no auto-cancel is armed.
pub async fn create_driver_trip(
    State(state): State<AppState>,
    DriverAuth(driver): DriverAuth,
    Json(request): Json<DriverTripRequest>,
) -> Result<(StatusCode, Json<Trip>), ApiError> {
    request.validate()?;

    let trip = state
        .lifecycle
        .create_driver_trip(driver.user_id, request)
        .await?;

    info!(
        trip_id = %trip.id,
        reference = %trip.reference,
        driver_user = %driver.user_id,
        "Driver trip created"
    );
    Ok((StatusCode::CREATED, Json(trip)))
}

/// Create a dispatcher trip and start dispatching it.
///
/// POST /api/v1/trips/dispatcher
pub async fn create_dispatcher_trip(
    State(state): State<AppState>,
    DispatcherAuth(dispatcher): DispatcherAuth,
    Json(request): Json<DispatcherTripRequest>,
) -> Result<(StatusCode, Json<Trip>), ApiError> {
    request.validate()?;

    let trip = state
        .lifecycle
        .create_dispatcher_trip(dispatcher.user_id, request)
        .await?;

    state.dispatcher.dispatch(TripSnapshot::from_trip(&trip));

    info!(
        trip_id = %trip.id,
        reference = %trip.reference,
        dispatcher = %dispatcher.user_id,
        "Dispatcher trip created and broadcast started"
    );
    Ok((StatusCode::CREATED, Json(trip)))
}

/// The driver's current non-terminal trip, or null.
///
/// GET /api/v1/trips/active
pub async fn get_active_trip(
    State(state): State<AppState>,
    DriverAuth(driver): DriverAuth,
) -> Result<Json<Option<Trip>>, ApiError> {
    let trip = state.lifecycle.active_trip(driver.user_id).await?;
    Ok(Json(trip))
}

/// Paginated driver trip history.
///
/// GET /api/v1/trips/history?page&limit&status&start_date&end_date
pub async fn get_trip_history(
    State(state): State<AppState>,
    DriverAuth(driver): DriverAuth,
    Query(query): Query<TripHistoryQuery>,
) -> Result<Json<TripHistoryResponse>, ApiError> {
    let history = state.lifecycle.history(driver.user_id, query).await?;
    Ok(Json(history))
}

/// Aggregate driver statistics.
///
/// GET /api/v1/trips/statistics?start_date&end_date
pub async fn get_trip_statistics(
    State(state): State<AppState>,
    DriverAuth(driver): DriverAuth,
    Query(query): Query<TripStatisticsQuery>,
) -> Result<Json<TripStatisticsResponse>, ApiError> {
    let statistics = state.lifecycle.statistics(driver.user_id, query).await?;
    Ok(Json(statistics))
}

/// Trip detail with the synthesized event timeline.
///
/// GET /api/v1/trips/:id
pub async fn get_trip(
    State(state): State<AppState>,
    auth: crate::extractors::AuthUser,
    Path(id): Path<String>,
) -> Result<Json<TripDetailResponse>, ApiError> {
    let trip_id = parse_trip_id(&id)?;
    let detail = state.lifecycle.detail(trip_id, auth.user_id).await?;
    Ok(Json(detail))
}

/// Driver starts the assigned trip.
///
/// PUT /api/v1/trips/:id/start
pub async fn start_trip(
    State(state): State<AppState>,
    DriverAuth(driver): DriverAuth,
    Path(id): Path<String>,
) -> Result<Json<Trip>, ApiError> {
    let trip_id = parse_trip_id(&id)?;
    let trip = state.lifecycle.start(trip_id, driver.user_id).await?;
    Ok(Json(trip))
}

/// Cancel a pre-terminal trip.
///
/// PUT /api/v1/trips/:id/cancel
pub async fn cancel_trip(
    State(state): State<AppState>,
    auth: crate::extractors::AuthUser,
    Path(id): Path<String>,
    Json(request): Json<CancelTripRequest>,
) -> Result<Json<Trip>, ApiError> {
    request.validate()?;
    let trip_id = parse_trip_id(&id)?;

    let acting_driver = auth.user_type == shared::jwt::UserType::Driver;
    let trip = state
        .lifecycle
        .cancel(trip_id, auth.user_id, acting_driver, request)
        .await?;

    // A broadcast may still be live when a `requested` trip is canceled.
    state.dispatcher.abort(trip_id);

    Ok(Json(trip))
}

/// Driver completes the trip; omitted fare values are derived.
///
/// PUT /api/v1/trips/:id/complete
pub async fn complete_trip(
    State(state): State<AppState>,
    DriverAuth(driver): DriverAuth,
    Path(id): Path<String>,
    Json(request): Json<CompleteTripRequest>,
) -> Result<Json<Trip>, ApiError> {
    request.validate()?;
    let trip_id = parse_trip_id(&id)?;
    let trip = state
        .lifecycle
        .complete(trip_id, driver.user_id, request)
        .await?;
    Ok(Json(trip))
}
