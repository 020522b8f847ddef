//! Reference data handlers: approved items, addresses, carriers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::{permissions, CurrentUser};
use crate::services::address::{CreateAddressInput, DeliveryAddress};
use crate::services::approved_items::EligibleApprovedItem;
use crate::services::carrier::{Carrier, CarrierFilter};
use crate::services::{AddressService, ApprovedItemGateway, CarrierService};
use crate::AppState;

/// Approved items of a project that can still be shipped
pub async fn list_eligible_approved_items(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(project_id): Path<Uuid>,
) -> AppResult<Json<Vec<EligibleApprovedItem>>> {
    current_user.require(permissions::DELIVERY_READ)?;
    let gateway = ApprovedItemGateway::new(state.db.clone());
    Ok(Json(gateway.list_eligible(project_id).await?))
}

pub async fn list_addresses(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(project_id): Path<Uuid>,
) -> AppResult<Json<Vec<DeliveryAddress>>> {
    current_user.require(permissions::DELIVERY_READ)?;
    let service = AddressService::new(state.db.clone());
    Ok(Json(service.list_addresses(project_id).await?))
}

pub async fn create_address(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(project_id): Path<Uuid>,
    Json(input): Json<CreateAddressInput>,
) -> AppResult<(StatusCode, Json<DeliveryAddress>)> {
    current_user.require(permissions::DELIVERY_WRITE)?;
    let service = AddressService::new(state.db.clone());
    let address = service
        .create_address(project_id, current_user.user_id(), input)
        .await?;
    Ok((StatusCode::CREATED, Json(address)))
}

/// Make an address the project's default delivery address
pub async fn set_default_address(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path((project_id, address_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<DeliveryAddress>> {
    current_user.require(permissions::DELIVERY_WRITE)?;
    let service = AddressService::new(state.db.clone());
    Ok(Json(service.set_default_address(project_id, address_id).await?))
}

pub async fn list_carriers(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(filter): Query<CarrierFilter>,
) -> AppResult<Json<Vec<Carrier>>> {
    current_user.require(permissions::DELIVERY_READ)?;
    let service = CarrierService::new(state.db.clone());
    Ok(Json(service.list_carriers(&filter).await?))
}

pub async fn get_carrier(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(carrier_id): Path<Uuid>,
) -> AppResult<Json<Carrier>> {
    current_user.require(permissions::DELIVERY_READ)?;
    let service = CarrierService::new(state.db.clone());
    Ok(Json(service.get_carrier(carrier_id).await?))
}
