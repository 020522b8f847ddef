//! Delivery order HTTP handlers

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use shared::PaginatedResponse;

use super::optional_json;
use crate::error::AppResult;
use crate::middleware::{permissions, CurrentUser};
use crate::services::delivery_order::{
    CancelDeliveryOrderInput, CreateDeliveryOrderInput, DeliveryOrder, DeliveryOrderDetail,
    DeliveryOrderFilter, UpdateDeliveryOrderInput,
};
use crate::services::DeliveryOrderService;
use crate::AppState;

fn service(state: &AppState) -> DeliveryOrderService {
    DeliveryOrderService::new(state.db.clone(), &state.config.delivery)
}

/// Create a delivery order from approved items
pub async fn create_delivery_order(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<CreateDeliveryOrderInput>,
) -> AppResult<(StatusCode, Json<DeliveryOrderDetail>)> {
    current_user.require(permissions::DELIVERY_WRITE)?;
    let order = service(&state)
        .create_order(input, current_user.user_id())
        .await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn list_delivery_orders(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(filter): Query<DeliveryOrderFilter>,
) -> AppResult<Json<PaginatedResponse<DeliveryOrder>>> {
    current_user.require(permissions::DELIVERY_READ)?;
    Ok(Json(service(&state).list_orders(&filter).await?))
}

pub async fn get_delivery_order(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<DeliveryOrderDetail>> {
    current_user.require(permissions::DELIVERY_READ)?;
    Ok(Json(service(&state).get_order(order_id).await?))
}

pub async fn update_delivery_order(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(order_id): Path<Uuid>,
    Json(input): Json<UpdateDeliveryOrderInput>,
) -> AppResult<Json<DeliveryOrderDetail>> {
    current_user.require(permissions::DELIVERY_WRITE)?;
    let order = service(&state)
        .update_order(order_id, input, current_user.user_id())
        .await?;
    Ok(Json(order))
}

/// Cancel an order; the body is optional
pub async fn cancel_delivery_order(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(order_id): Path<Uuid>,
    body: Bytes,
) -> AppResult<Json<DeliveryOrderDetail>> {
    current_user.require(permissions::DELIVERY_WRITE)?;
    let input: CancelDeliveryOrderInput = optional_json(&body)?;
    let order = service(&state)
        .cancel_order(order_id, input, current_user.user_id())
        .await?;
    Ok(Json(order))
}
