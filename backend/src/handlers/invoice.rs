//! Invoice HTTP handlers

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
use crate::services::invoice::{CreateInvoiceInput, Invoice, InvoiceDetail, InvoiceFilter};
use crate::services::InvoiceService;
use crate::AppState;

fn service(state: &AppState) -> InvoiceService {
    InvoiceService::new(state.db.clone(), &state.config.invoicing)
}

/// Invoice a delivered order; every body field is optional
pub async fn create_invoice_from_order(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(order_id): Path<Uuid>,
    body: Bytes,
) -> AppResult<(StatusCode, Json<InvoiceDetail>)> {
    current_user.require(permissions::INVOICE_WRITE)?;
    let input: CreateInvoiceInput = optional_json(&body)?;
    let invoice = service(&state)
        .create_invoice_from_order(order_id, input, current_user.user_id())
        .await?;
    Ok((StatusCode::CREATED, Json(invoice)))
}

pub async fn list_invoices(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(filter): Query<InvoiceFilter>,
) -> AppResult<Json<PaginatedResponse<Invoice>>> {
    current_user.require(permissions::INVOICE_READ)?;
    Ok(Json(service(&state).list_invoices(&filter).await?))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(invoice_id): Path<Uuid>,
) -> AppResult<Json<InvoiceDetail>> {
    current_user.require(permissions::INVOICE_READ)?;
    Ok(Json(service(&state).get_invoice(invoice_id).await?))
}
