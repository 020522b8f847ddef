//! Tracking log handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use shared::{PageRequest, PaginatedResponse};

use crate::error::AppResult;
use crate::middleware::{permissions, CurrentUser};
use crate::services::tracking::{AddTrackingEventInput, TrackingEvent, TrackingEventOutcome};
use crate::services::TrackingService;
use crate::AppState;

fn service(state: &AppState) -> TrackingService {
    TrackingService::new(state.db.clone(), state.config.delivery.transition_policy())
}

/// Append a tracking event; the order status follows the event type
pub async fn add_tracking_event(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(order_id): Path<Uuid>,
    Json(input): Json<AddTrackingEventInput>,
) -> AppResult<(StatusCode, Json<TrackingEventOutcome>)> {
    current_user.require(permissions::DELIVERY_WRITE)?;
    let outcome = service(&state)
        .add_tracking_event(order_id, input, current_user.user_id())
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

pub async fn list_tracking_events(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(order_id): Path<Uuid>,
    Query(page): Query<PageRequest>,
) -> AppResult<Json<PaginatedResponse<TrackingEvent>>> {
    current_user.require(permissions::DELIVERY_READ)?;
    Ok(Json(service(&state).list_events(order_id, &page).await?))
}
