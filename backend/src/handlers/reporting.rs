//! Delivery and invoice metrics handlers

use axum::{
    extract::{Query, State},
    Json,
};

use shared::{DeliveryMetrics, InvoiceMetrics};

use crate::error::AppResult;
use crate::middleware::{permissions, CurrentUser};
use crate::services::payment::InvoiceMetricsFilter;
use crate::services::reporting::MetricsFilter;
use crate::services::{PaymentService, ReportingService};
use crate::AppState;

/// Delivery performance, optionally per project and creation date range
pub async fn get_delivery_metrics(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(filter): Query<MetricsFilter>,
) -> AppResult<Json<DeliveryMetrics>> {
    current_user.require(permissions::DELIVERY_READ)?;
    let service = ReportingService::new(state.db.clone());
    Ok(Json(service.get_delivery_metrics(&filter).await?))
}

/// Invoice totals and payment performance over invoice dates
pub async fn get_invoice_metrics(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(filter): Query<InvoiceMetricsFilter>,
) -> AppResult<Json<InvoiceMetrics>> {
    current_user.require(permissions::INVOICE_READ)?;
    let service = PaymentService::new(state.db.clone());
    Ok(Json(service.get_invoice_metrics(&filter).await?))
}
