//! Invoice status and payment handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::{permissions, CurrentUser};
use crate::services::invoice::Invoice;
use crate::services::payment::{PaymentReceipt, RecordPaymentInput, UpdateInvoiceStatusInput};
use crate::services::PaymentService;
use crate::AppState;

/// Change an invoice status; marking it paid requires payment permission
pub async fn update_invoice_status(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(invoice_id): Path<Uuid>,
    Json(input): Json<UpdateInvoiceStatusInput>,
) -> AppResult<Json<Invoice>> {
    current_user.require(permissions::INVOICE_WRITE)?;
    if input.status == shared::InvoiceStatus::Paid {
        current_user.require(permissions::PAYMENT_WRITE)?;
    }

    let service = PaymentService::new(state.db.clone());
    let invoice = service
        .update_status(invoice_id, input, current_user.user_id())
        .await?;
    Ok(Json(invoice))
}

pub async fn record_payment(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(invoice_id): Path<Uuid>,
    Json(input): Json<RecordPaymentInput>,
) -> AppResult<(StatusCode, Json<PaymentReceipt>)> {
    current_user.require(permissions::PAYMENT_WRITE)?;
    let service = PaymentService::new(state.db.clone());
    let receipt = service
        .record_payment(invoice_id, input, current_user.user_id())
        .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}
