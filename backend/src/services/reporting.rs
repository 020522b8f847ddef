//! Delivery performance reporting
//! Read-only aggregation over delivery orders; nothing is cached

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use shared::{DateRange, DeliveryMetrics, DeliveryStatus, OrderMetricSample};

use crate::error::{AppResult, StorageResultExt};

/// Reporting service
#[derive(Clone)]
pub struct ReportingService {
    db: PgPool,
}

/// Metrics filter; the date range applies to the order creation date
#[derive(Debug, Default, Deserialize)]
pub struct MetricsFilter {
    pub project_id: Option<Uuid>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, sqlx::FromRow)]
struct OrderMetricRow {
    #[sqlx(try_from = "String")]
    status: DeliveryStatus,
    requested_delivery_date: Option<NaiveDate>,
    actual_delivery_date: Option<DateTime<Utc>>,
    total_delivery_cost: Decimal,
}

impl From<OrderMetricRow> for OrderMetricSample {
    fn from(row: OrderMetricRow) -> Self {
        Self {
            status: row.status,
            requested_delivery_date: row.requested_delivery_date,
            actual_delivery_date: row.actual_delivery_date,
            total_delivery_cost: row.total_delivery_cost,
        }
    }
}

impl ReportingService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Delivery performance for a project, or across all projects
    pub async fn get_delivery_metrics(&self, filter: &MetricsFilter) -> AppResult<DeliveryMetrics> {
        DateRange::from_bounds(filter.start_date, filter.end_date)?;

        let rows = sqlx::query_as::<_, OrderMetricRow>(
            r#"
            SELECT status, requested_delivery_date, actual_delivery_date, total_delivery_cost
            FROM delivery_orders
            WHERE ($1::uuid IS NULL OR project_id = $1)
              AND ($2::date IS NULL OR created_at::date >= $2)
              AND ($3::date IS NULL OR created_at::date <= $3)
            "#,
        )
        .bind(filter.project_id)
        .bind(filter.start_date)
        .bind(filter.end_date)
        .fetch_all(&self.db)
        .await
        .storage_context("delivery_metrics", "all")?;

        let samples: Vec<OrderMetricSample> = rows.into_iter().map(Into::into).collect();

        Ok(DeliveryMetrics::from_samples(&samples))
    }
}
