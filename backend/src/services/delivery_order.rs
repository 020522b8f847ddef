//! Delivery order service
//!
//! Builds orders from approved items in a single transaction and applies
//! field updates, cancellation and the tracking events they imply.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;
use validator::Validate;

use shared::{
    check_transition, delivered_at, ensure_order_mutable, ensure_unique_approved_items, event_types,
    format_order_number, validate_delivery_quantity, DeliveryCosts, DeliveryPriority,
    DeliveryStatus, DomainError, PageRequest, PaginatedResponse, Pagination, SortDirection,
    TransitionPolicy,
};

use crate::config::DeliveryConfig;
use crate::error::{is_unique_violation, AppError, AppResult, StorageResultExt};
use crate::services::address::{find_address, project_address, DeliveryAddress};
use crate::services::approved_items::lock_for_order;
use crate::services::carrier::{assignable_carrier, find_carrier, Carrier};
use crate::services::tracking::{
    append_event, cancellation_event, event_page, NewTrackingEvent, TrackingEvent,
};

/// Delivery order service
#[derive(Clone)]
pub struct DeliveryOrderService {
    db: PgPool,
    policy: TransitionPolicy,
    tracking_page_size: u32,
}

/// Delivery order header
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DeliveryOrder {
    pub id: Uuid,
    pub order_number: String,
    pub project_id: Uuid,
    pub delivery_address_id: Uuid,
    pub billing_address_id: Option<Uuid>,
    pub carrier_id: Option<Uuid>,
    #[sqlx(try_from = "String")]
    pub status: DeliveryStatus,
    #[sqlx(try_from = "String")]
    pub priority: DeliveryPriority,
    pub requested_delivery_date: Option<NaiveDate>,
    pub estimated_delivery_date: Option<NaiveDate>,
    pub actual_delivery_date: Option<DateTime<Utc>>,
    pub package_count: i32,
    pub delivery_cost: Decimal,
    pub insurance_cost: Decimal,
    pub handling_cost: Decimal,
    pub total_delivery_cost: Decimal,
    pub tracking_number: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Uuid,
    pub updated_by: Uuid,
}

impl DeliveryOrder {
    pub fn costs(&self) -> DeliveryCosts {
        DeliveryCosts {
            delivery_cost: self.delivery_cost,
            insurance_cost: self.insurance_cost,
            handling_cost: self.handling_cost,
        }
    }
}

/// Line item of a delivery order, enriched with its BOM part
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DeliveryItem {
    pub id: Uuid,
    pub delivery_order_id: Uuid,
    pub quality_approved_item_id: Uuid,
    pub bom_item_id: Uuid,
    pub approved_quantity: Decimal,
    pub delivery_quantity: Decimal,
    pub weight_kg: Option<Decimal>,
    pub length_cm: Option<Decimal>,
    pub width_cm: Option<Decimal>,
    pub height_cm: Option<Decimal>,
    pub packaging_type: Option<String>,
    pub serial_numbers: Vec<String>,
    pub unit_value: Option<Decimal>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub part_number: Option<String>,
    pub part_description: Option<String>,
}

/// Fully hydrated delivery order
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryOrderDetail {
    #[serde(flatten)]
    pub order: DeliveryOrder,
    pub delivery_address: Option<DeliveryAddress>,
    pub billing_address: Option<DeliveryAddress>,
    pub carrier: Option<Carrier>,
    pub tracking_url: Option<String>,
    pub items: Vec<DeliveryItem>,
    pub tracking_events: Vec<TrackingEvent>,
    pub tracking_event_count: u64,
}

/// Input for creating a delivery order
#[derive(Debug, Deserialize, Validate)]
pub struct CreateDeliveryOrderInput {
    pub project_id: Uuid,
    pub delivery_address_id: Uuid,
    pub billing_address_id: Option<Uuid>,
    pub carrier_id: Option<Uuid>,
    /// Initial status, one of the pre-transit states (default draft)
    pub status: Option<DeliveryStatus>,
    pub priority: Option<DeliveryPriority>,
    pub requested_delivery_date: Option<NaiveDate>,
    pub estimated_delivery_date: Option<NaiveDate>,
    #[validate(range(min = 0, max = 10000, message = "Package count must be between 0 and 10000"))]
    pub package_count: Option<i32>,
    pub delivery_cost: Option<Decimal>,
    pub insurance_cost: Option<Decimal>,
    pub handling_cost: Option<Decimal>,
    #[validate(custom = "crate::validation::tracking_number")]
    pub tracking_number: Option<String>,
    #[validate(length(max = 4000))]
    pub notes: Option<String>,
    #[validate]
    pub items: Vec<CreateDeliveryItemInput>,
}

/// Line item of a new delivery order
#[derive(Debug, Deserialize, Validate)]
pub struct CreateDeliveryItemInput {
    pub quality_approved_item_id: Uuid,
    pub delivery_quantity: Decimal,
    pub weight_kg: Option<Decimal>,
    pub length_cm: Option<Decimal>,
    pub width_cm: Option<Decimal>,
    pub height_cm: Option<Decimal>,
    #[validate(length(max = 50))]
    pub packaging_type: Option<String>,
    pub serial_numbers: Option<Vec<String>>,
    pub unit_value: Option<Decimal>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

impl CreateDeliveryItemInput {
    fn validate_measures(&self) -> AppResult<()> {
        for (field, value) in [
            ("weight_kg", self.weight_kg),
            ("length_cm", self.length_cm),
            ("width_cm", self.width_cm),
            ("height_cm", self.height_cm),
            ("unit_value", self.unit_value),
        ] {
            if value.is_some_and(|v| v < Decimal::ZERO) {
                return Err(AppError::validation(field, format!("{} cannot be negative", field)));
            }
        }
        Ok(())
    }
}

/// Input for updating a delivery order; absent fields are left unchanged
#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateDeliveryOrderInput {
    pub carrier_id: Option<Uuid>,
    pub billing_address_id: Option<Uuid>,
    pub status: Option<DeliveryStatus>,
    pub priority: Option<DeliveryPriority>,
    pub requested_delivery_date: Option<NaiveDate>,
    pub estimated_delivery_date: Option<NaiveDate>,
    pub actual_delivery_date: Option<DateTime<Utc>>,
    #[validate(range(min = 0, max = 10000, message = "Package count must be between 0 and 10000"))]
    pub package_count: Option<i32>,
    pub delivery_cost: Option<Decimal>,
    pub insurance_cost: Option<Decimal>,
    pub handling_cost: Option<Decimal>,
    #[validate(custom = "crate::validation::tracking_number")]
    pub tracking_number: Option<String>,
    #[validate(length(max = 4000))]
    pub notes: Option<String>,
}

impl UpdateDeliveryOrderInput {
    /// Whether the update touches anything besides the status
    pub fn changes_fields(&self) -> bool {
        self.carrier_id.is_some()
            || self.billing_address_id.is_some()
            || self.priority.is_some()
            || self.requested_delivery_date.is_some()
            || self.estimated_delivery_date.is_some()
            || self.actual_delivery_date.is_some()
            || self.package_count.is_some()
            || self.delivery_cost.is_some()
            || self.insurance_cost.is_some()
            || self.handling_cost.is_some()
            || self.tracking_number.is_some()
            || self.notes.is_some()
    }
}

/// Input for cancelling a delivery order
#[derive(Debug, Default, Deserialize, Validate)]
pub struct CancelDeliveryOrderInput {
    #[validate(length(max = 1000))]
    pub reason: Option<String>,
}

/// Sortable columns of the order list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSortField {
    #[default]
    CreatedAt,
    RequestedDeliveryDate,
    OrderNumber,
    Priority,
    Status,
    TotalDeliveryCost,
}

impl OrderSortField {
    fn as_sql(&self) -> String {
        match self {
            OrderSortField::CreatedAt => "created_at".to_string(),
            OrderSortField::RequestedDeliveryDate => "requested_delivery_date".to_string(),
            OrderSortField::OrderNumber => "order_number".to_string(),
            OrderSortField::Priority => priority_rank_sql(),
            OrderSortField::Status => "status".to_string(),
            OrderSortField::TotalDeliveryCost => "total_delivery_cost".to_string(),
        }
    }
}

/// SQL expression ranking the priority column by `DeliveryPriority::rank`
fn priority_rank_sql() -> String {
    let arms: String = DeliveryPriority::ALL
        .iter()
        .map(|p| format!(" WHEN '{}' THEN {}", p.as_str(), p.rank()))
        .collect();
    format!("CASE priority{} END", arms)
}

/// Delivery order list filter
#[derive(Debug, Default, Deserialize)]
pub struct DeliveryOrderFilter {
    pub project_id: Option<Uuid>,
    pub status: Option<DeliveryStatus>,
    pub priority: Option<DeliveryPriority>,
    pub carrier_id: Option<Uuid>,
    pub requested_from: Option<NaiveDate>,
    pub requested_to: Option<NaiveDate>,
    pub search: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub sort_by: Option<OrderSortField>,
    pub sort_dir: Option<SortDirection>,
}

impl DeliveryOrderFilter {
    fn pagination(&self) -> Pagination {
        PageRequest {
            page: self.page,
            limit: self.limit,
        }
        .normalize()
    }

    fn push_conditions(&self, builder: &mut QueryBuilder<'_, Postgres>) {
        builder.push(" WHERE TRUE");
        if let Some(project_id) = self.project_id {
            builder.push(" AND project_id = ").push_bind(project_id);
        }
        if let Some(status) = self.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(priority) = self.priority {
            builder.push(" AND priority = ").push_bind(priority.as_str());
        }
        if let Some(carrier_id) = self.carrier_id {
            builder.push(" AND carrier_id = ").push_bind(carrier_id);
        }
        if let Some(from) = self.requested_from {
            builder.push(" AND requested_delivery_date >= ").push_bind(from);
        }
        if let Some(to) = self.requested_to {
            builder.push(" AND requested_delivery_date <= ").push_bind(to);
        }
        if let Some(pattern) = self.search.as_deref().and_then(like_pattern) {
            builder
                .push(" AND (order_number ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR tracking_number ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR notes ILIKE ")
                .push_bind(pattern)
                .push(")");
        }
    }

    fn order_by_sql(&self) -> String {
        let field = self.sort_by.unwrap_or_default();
        let direction = self.sort_dir.unwrap_or_default();
        format!(" ORDER BY {} {} NULLS LAST, id", field.as_sql(), direction.as_sql())
    }
}

/// Substring pattern for ILIKE with wildcards in the term escaped
pub(crate) fn like_pattern(term: &str) -> Option<String> {
    let term = term.trim();
    if term.is_empty() {
        return None;
    }
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    Some(format!("%{}%", escaped))
}

const ORDER_COLUMNS: &str = "id, order_number, project_id, delivery_address_id, billing_address_id, \
     carrier_id, status, priority, requested_delivery_date, estimated_delivery_date, \
     actual_delivery_date, package_count, delivery_cost, insurance_cost, handling_cost, \
     total_delivery_cost, tracking_number, notes, created_at, updated_at, created_by, updated_by";

impl DeliveryOrderService {
    pub fn new(db: PgPool, config: &DeliveryConfig) -> Self {
        Self {
            db,
            policy: config.transition_policy(),
            tracking_page_size: config.tracking_page_size,
        }
    }

    /// Create an order and its items from approved items in one transaction
    #[tracing::instrument(skip_all, fields(project_id = %input.project_id, items = input.items.len()))]
    pub async fn create_order(
        &self,
        input: CreateDeliveryOrderInput,
        actor: Uuid,
    ) -> AppResult<DeliveryOrderDetail> {
        input.validate()?;

        if input.items.is_empty() {
            return Err(AppError::validation("items", "At least one item is required"));
        }
        let approved_ids: Vec<Uuid> = input.items.iter().map(|i| i.quality_approved_item_id).collect();
        ensure_unique_approved_items(&approved_ids)?;
        for item in &input.items {
            item.validate_measures()?;
        }

        let status = input.status.unwrap_or(DeliveryStatus::Draft);
        if !status.is_pre_transit() {
            return Err(AppError::validation(
                "status",
                format!("Orders cannot be created in status {}", status),
            ));
        }

        let costs = DeliveryCosts::from_optional(
            input.delivery_cost,
            input.insurance_cost,
            input.handling_cost,
        );
        costs.validate()?;

        let mut tx = self
            .db
            .begin()
            .await
            .storage_context("create_delivery_order", input.project_id)?;

        project_address(&mut *tx, input.project_id, input.delivery_address_id, "delivery_address_id")
            .await?;
        if let Some(billing_id) = input.billing_address_id {
            project_address(&mut *tx, input.project_id, billing_id, "billing_address_id").await?;
        }
        if let Some(carrier_id) = input.carrier_id {
            assignable_carrier(&mut *tx, carrier_id).await?;
        }

        let approved = lock_for_order(&mut *tx, &approved_ids).await?;
        for item in &input.items {
            let source = approved
                .iter()
                .find(|a| a.id == item.quality_approved_item_id)
                .ok_or_else(|| AppError::NotFound(format!("Approved item {}", item.quality_approved_item_id)))?;
            source.ensure_eligible(input.project_id)?;
            validate_delivery_quantity(item.delivery_quantity, source.approved_quantity)?;
        }

        let sequence: i64 = sqlx::query_scalar("SELECT nextval('delivery_order_number_seq')")
            .fetch_one(&mut *tx)
            .await
            .storage_context("next_order_number", input.project_id)?;
        let order_number = format_order_number(Utc::now().year(), sequence);

        let order_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO delivery_orders
                (order_number, project_id, delivery_address_id, billing_address_id, carrier_id,
                 status, priority, requested_delivery_date, estimated_delivery_date, package_count,
                 delivery_cost, insurance_cost, handling_cost, total_delivery_cost,
                 tracking_number, notes, created_by, updated_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $17)
            RETURNING id
            "#,
        )
        .bind(&order_number)
        .bind(input.project_id)
        .bind(input.delivery_address_id)
        .bind(input.billing_address_id)
        .bind(input.carrier_id)
        .bind(status.as_str())
        .bind(input.priority.unwrap_or_default().as_str())
        .bind(input.requested_delivery_date)
        .bind(input.estimated_delivery_date)
        .bind(input.package_count.unwrap_or(1))
        .bind(costs.delivery_cost)
        .bind(costs.insurance_cost)
        .bind(costs.handling_cost)
        .bind(costs.total())
        .bind(input.tracking_number.as_deref().map(str::trim))
        .bind(&input.notes)
        .bind(actor)
        .fetch_one(&mut *tx)
        .await
        .storage_context("create_delivery_order", &order_number)?;

        for item in &input.items {
            let Some(source) = approved.iter().find(|a| a.id == item.quality_approved_item_id) else {
                continue;
            };
            sqlx::query(
                r#"
                INSERT INTO delivery_items
                    (delivery_order_id, quality_approved_item_id, bom_item_id, approved_quantity,
                     delivery_quantity, weight_kg, length_cm, width_cm, height_cm, packaging_type,
                     serial_numbers, unit_value, notes)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                "#,
            )
            .bind(order_id)
            .bind(source.id)
            .bind(source.bom_item_id)
            .bind(source.approved_quantity)
            .bind(item.delivery_quantity)
            .bind(item.weight_kg)
            .bind(item.length_cm)
            .bind(item.width_cm)
            .bind(item.height_cm)
            .bind(&item.packaging_type)
            .bind(item.serial_numbers.clone().unwrap_or_default())
            .bind(item.unit_value)
            .bind(&item.notes)
            .execute(&mut *tx)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    tracing::warn!(approved_item_id = %source.id, "Approved item consumed concurrently");
                    AppError::from(DomainError::ApprovedItemConsumed(source.id))
                } else {
                    AppError::infrastructure("create_delivery_item", order_id, err)
                }
            })?;
        }

        tx.commit().await.storage_context("create_delivery_order", order_id)?;

        tracing::info!(%order_id, %order_number, "Delivery order created");

        self.get_order(order_id).await
    }

    /// List orders with filters, sorting and pagination
    pub async fn list_orders(
        &self,
        filter: &DeliveryOrderFilter,
    ) -> AppResult<PaginatedResponse<DeliveryOrder>> {
        let pagination = filter.pagination();

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM delivery_orders");
        filter.push_conditions(&mut count);
        let total: i64 = count
            .build_query_scalar::<i64>()
            .fetch_one(&self.db)
            .await
            .storage_context("count_delivery_orders", "list")?;

        let mut select = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM delivery_orders", ORDER_COLUMNS));
        filter.push_conditions(&mut select);
        select.push(filter.order_by_sql());
        select
            .push(" LIMIT ")
            .push_bind(pagination.limit())
            .push(" OFFSET ")
            .push_bind(pagination.offset());

        let orders = select
            .build_query_as::<DeliveryOrder>()
            .fetch_all(&self.db)
            .await
            .storage_context("list_delivery_orders", "list")?;

        Ok(PaginatedResponse::new(
            orders,
            pagination,
            u64::try_from(total).unwrap_or_default(),
        ))
    }

    /// Get a hydrated order; missing optional joins come back as null
    pub async fn get_order(&self, order_id: Uuid) -> AppResult<DeliveryOrderDetail> {
        let mut conn = self
            .db
            .acquire()
            .await
            .storage_context("get_delivery_order", order_id)?;

        let order = find_order(&mut *conn, order_id, false)
            .await?
            .ok_or_else(|| AppError::NotFound("Delivery order".to_string()))?;

        let delivery_address = find_address(&mut *conn, order.delivery_address_id).await?;
        let billing_address = match order.billing_address_id {
            Some(id) => find_address(&mut *conn, id).await?,
            None => None,
        };
        let carrier = match order.carrier_id {
            Some(id) => find_carrier(&mut *conn, id).await?,
            None => None,
        };
        let tracking_url = match (&carrier, &order.tracking_number) {
            (Some(carrier), Some(number)) => carrier.tracking_url(number),
            _ => None,
        };

        let items = sqlx::query_as::<_, DeliveryItem>(
            r#"
            SELECT di.id, di.delivery_order_id, di.quality_approved_item_id, di.bom_item_id,
                   di.approved_quantity, di.delivery_quantity, di.weight_kg, di.length_cm,
                   di.width_cm, di.height_cm, di.packaging_type, di.serial_numbers,
                   di.unit_value, di.notes, di.created_at,
                   b.part_number, b.description AS part_description
            FROM delivery_items di
            LEFT JOIN bom_items b ON b.id = di.bom_item_id
            WHERE di.delivery_order_id = $1
            ORDER BY di.created_at, di.id
            "#,
        )
        .bind(order_id)
        .fetch_all(&mut *conn)
        .await
        .storage_context("list_delivery_items", order_id)?;

        let first_page = PageRequest {
            page: Some(1),
            limit: Some(self.tracking_page_size),
        }
        .normalize();
        let (tracking_events, tracking_event_count) =
            event_page(&mut *conn, order_id, first_page).await?;

        Ok(DeliveryOrderDetail {
            order,
            delivery_address,
            billing_address,
            carrier,
            tracking_url,
            items,
            tracking_events,
            tracking_event_count,
        })
    }

    /// Update non-tracking fields, recording the changes as tracking events
    #[tracing::instrument(skip_all, fields(order_id = %order_id))]
    pub async fn update_order(
        &self,
        order_id: Uuid,
        input: UpdateDeliveryOrderInput,
        actor: Uuid,
    ) -> AppResult<DeliveryOrderDetail> {
        input.validate()?;

        let mut tx = self
            .db
            .begin()
            .await
            .storage_context("update_delivery_order", order_id)?;
        let current = locked_order(&mut *tx, order_id).await?;
        self.apply_update(&mut *tx, current, &input, actor, None).await?;
        tx.commit().await.storage_context("update_delivery_order", order_id)?;

        self.get_order(order_id).await
    }

    /// Cancel an order and log the reason
    #[tracing::instrument(skip_all, fields(order_id = %order_id))]
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        input: CancelDeliveryOrderInput,
        actor: Uuid,
    ) -> AppResult<DeliveryOrderDetail> {
        input.validate()?;

        let reason = input.reason.as_deref().map(str::trim).filter(|r| !r.is_empty());
        let update = UpdateDeliveryOrderInput {
            status: Some(DeliveryStatus::Cancelled),
            ..Default::default()
        };

        let mut tx = self
            .db
            .begin()
            .await
            .storage_context("cancel_delivery_order", order_id)?;
        let current = locked_order(&mut *tx, order_id).await?;
        if current.status == DeliveryStatus::Cancelled {
            return Err(AppError::validation("status", "Delivery order is already cancelled"));
        }
        let previous = self
            .apply_update(&mut *tx, current, &update, actor, Some(cancellation_event(reason)))
            .await?;
        tx.commit().await.storage_context("cancel_delivery_order", order_id)?;

        tracing::info!(from = %previous, reason = reason.unwrap_or(""), "Delivery order cancelled");

        self.get_order(order_id).await
    }

    /// Apply an update to an order locked by the caller's transaction.
    ///
    /// `status_event` replaces the synthesized `status_changed` event when the
    /// status changes. Returns the status the order had before the update.
    async fn apply_update(
        &self,
        conn: &mut PgConnection,
        current: DeliveryOrder,
        input: &UpdateDeliveryOrderInput,
        actor: Uuid,
        status_event: Option<NewTrackingEvent>,
    ) -> AppResult<DeliveryStatus> {
        let order_id = current.id;

        if let Err(err) =
            ensure_order_mutable(current.status, input.status, input.changes_fields())
        {
            tracing::warn!(status = %current.status, "Update rejected on locked order");
            return Err(err.into());
        }

        let next_status = input.status.unwrap_or(current.status);
        check_transition(current.status, next_status, self.policy)?;
        let status_changed = next_status != current.status;

        let carrier_changed = input.carrier_id.is_some() && input.carrier_id != current.carrier_id;
        if let Some(carrier_id) = input.carrier_id.filter(|_| carrier_changed) {
            assignable_carrier(&mut *conn, carrier_id).await?;
        }
        if let Some(billing_id) = input.billing_address_id {
            project_address(&mut *conn, current.project_id, billing_id, "billing_address_id").await?;
        }

        let costs = current
            .costs()
            .with_updates(input.delivery_cost, input.insurance_cost, input.handling_cost);
        costs.validate()?;

        let tracking_number = input.tracking_number.as_deref().map(str::trim);
        let tracking_changed =
            tracking_number.is_some() && tracking_number != current.tracking_number.as_deref();

        let actual_delivery_date = input
            .actual_delivery_date
            .or_else(|| status_changed.then(|| delivered_at(next_status, Utc::now())).flatten());

        sqlx::query(
            r#"
            UPDATE delivery_orders
            SET carrier_id = COALESCE($2, carrier_id),
                billing_address_id = COALESCE($3, billing_address_id),
                status = $4,
                priority = COALESCE($5, priority),
                requested_delivery_date = COALESCE($6, requested_delivery_date),
                estimated_delivery_date = COALESCE($7, estimated_delivery_date),
                actual_delivery_date = COALESCE($8, actual_delivery_date),
                package_count = COALESCE($9, package_count),
                delivery_cost = $10,
                insurance_cost = $11,
                handling_cost = $12,
                total_delivery_cost = $13,
                tracking_number = COALESCE($14, tracking_number),
                notes = COALESCE($15, notes),
                updated_by = $16,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(order_id)
        .bind(input.carrier_id)
        .bind(input.billing_address_id)
        .bind(next_status.as_str())
        .bind(input.priority.map(|p| p.as_str()))
        .bind(input.requested_delivery_date)
        .bind(input.estimated_delivery_date)
        .bind(actual_delivery_date)
        .bind(input.package_count)
        .bind(costs.delivery_cost)
        .bind(costs.insurance_cost)
        .bind(costs.handling_cost)
        .bind(costs.total())
        .bind(tracking_number)
        .bind(&input.notes)
        .bind(actor)
        .execute(&mut *conn)
        .await
        .storage_context("update_delivery_order", order_id)?;

        let events = synthesized_events(
            &current,
            next_status,
            tracking_number.filter(|_| tracking_changed),
            input.carrier_id.filter(|_| carrier_changed),
            status_event,
        );
        for event in &events {
            append_event(&mut *conn, order_id, event, actor).await?;
        }

        if status_changed {
            tracing::info!(from = %current.status, to = %next_status, "Delivery order status changed");
        }

        Ok(current.status)
    }
}

/// Tracking events implied by an order update
fn synthesized_events(
    current: &DeliveryOrder,
    next_status: DeliveryStatus,
    new_tracking_number: Option<&str>,
    new_carrier: Option<Uuid>,
    status_event: Option<NewTrackingEvent>,
) -> Vec<NewTrackingEvent> {
    let mut events = Vec::new();

    if next_status != current.status {
        events.push(status_event.unwrap_or_else(|| {
            NewTrackingEvent::synthesized(
                event_types::STATUS_CHANGED,
                format!("Status changed from {} to {}", current.status, next_status),
            )
        }));
    }
    if let Some(number) = new_tracking_number {
        events.push(NewTrackingEvent::synthesized(
            event_types::TRACKING_ASSIGNED,
            format!("Tracking number {} assigned", number),
        ));
    }
    if let Some(carrier_id) = new_carrier {
        events.push(NewTrackingEvent::synthesized(
            event_types::CARRIER_ASSIGNED,
            format!("Carrier {} assigned", carrier_id),
        ));
    }

    events
}

/// Load an order with a row lock for the rest of the transaction
async fn locked_order(conn: &mut PgConnection, order_id: Uuid) -> AppResult<DeliveryOrder> {
    find_order(conn, order_id, true)
        .await?
        .ok_or_else(|| AppError::NotFound("Delivery order".to_string()))
}

pub(crate) async fn find_order(
    conn: &mut PgConnection,
    order_id: Uuid,
    for_update: bool,
) -> AppResult<Option<DeliveryOrder>> {
    let lock = if for_update { " FOR UPDATE" } else { "" };
    let order = sqlx::query_as::<_, DeliveryOrder>(&format!(
        "SELECT {} FROM delivery_orders WHERE id = $1{}",
        ORDER_COLUMNS, lock
    ))
    .bind(order_id)
    .fetch_optional(conn)
    .await
    .storage_context("find_delivery_order", order_id)?;

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(status: DeliveryStatus) -> DeliveryOrder {
        DeliveryOrder {
            id: Uuid::new_v4(),
            order_number: "DO-2024-000001".to_string(),
            project_id: Uuid::new_v4(),
            delivery_address_id: Uuid::new_v4(),
            billing_address_id: None,
            carrier_id: None,
            status,
            priority: DeliveryPriority::Normal,
            requested_delivery_date: None,
            estimated_delivery_date: None,
            actual_delivery_date: None,
            package_count: 1,
            delivery_cost: Decimal::from(40),
            insurance_cost: Decimal::from(5),
            handling_cost: Decimal::from(5),
            total_delivery_cost: Decimal::from(50),
            tracking_number: None,
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            created_by: Uuid::new_v4(),
            updated_by: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("  DO-2024 ").as_deref(), Some("%DO-2024%"));
        assert_eq!(like_pattern("50%_off").as_deref(), Some("%50\\%\\_off%"));
        assert!(like_pattern("   ").is_none());
    }

    #[test]
    fn test_sort_defaults_to_newest_first() {
        let filter = DeliveryOrderFilter::default();
        assert_eq!(filter.order_by_sql(), " ORDER BY created_at DESC NULLS LAST, id");
    }

    #[test]
    fn test_priority_sort_uses_rank() {
        let filter = DeliveryOrderFilter {
            sort_by: Some(OrderSortField::Priority),
            sort_dir: Some(SortDirection::Asc),
            ..Default::default()
        };
        assert!(filter.order_by_sql().contains("CASE priority WHEN 'low' THEN 0"));
        assert!(filter.order_by_sql().contains("ASC"));
    }

    #[test]
    fn test_priority_rank_sql_follows_rank() {
        assert_eq!(
            priority_rank_sql(),
            "CASE priority WHEN 'low' THEN 0 WHEN 'normal' THEN 1 WHEN 'high' THEN 2 WHEN 'urgent' THEN 3 END"
        );
    }

    #[test]
    fn test_status_only_update_changes_no_fields() {
        let cancel = UpdateDeliveryOrderInput {
            status: Some(DeliveryStatus::Cancelled),
            ..Default::default()
        };
        assert!(!cancel.changes_fields());

        let with_notes = UpdateDeliveryOrderInput {
            status: Some(DeliveryStatus::Cancelled),
            notes: Some("late edit".to_string()),
            ..Default::default()
        };
        assert!(with_notes.changes_fields());
    }

    #[test]
    fn test_filter_binds_conditions() {
        let filter = DeliveryOrderFilter {
            project_id: Some(Uuid::new_v4()),
            status: Some(DeliveryStatus::InTransit),
            search: Some("DO-2024".to_string()),
            ..Default::default()
        };
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM delivery_orders");
        filter.push_conditions(&mut builder);
        let sql = builder.sql();
        assert!(sql.contains("project_id = $1"));
        assert!(sql.contains("status = $2"));
        assert!(sql.contains("order_number ILIKE $3"));
        assert!(sql.contains("notes ILIKE $5"));
    }

    #[test]
    fn test_pagination_capped() {
        let filter = DeliveryOrderFilter {
            page: Some(2),
            limit: Some(1000),
            ..Default::default()
        };
        let pagination = filter.pagination();
        assert_eq!(pagination.per_page, shared::MAX_PAGE_SIZE);
        assert_eq!(pagination.offset(), i64::from(shared::MAX_PAGE_SIZE));
    }

    #[test]
    fn test_status_change_synthesizes_event() {
        let current = order(DeliveryStatus::Approved);
        let events = synthesized_events(&current, DeliveryStatus::InTransit, None, None, None);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, event_types::STATUS_CHANGED);
        assert_eq!(
            events[0].description.as_deref(),
            Some("Status changed from approved to in_transit")
        );
    }

    #[test]
    fn test_tracking_and_carrier_changes_synthesize_events() {
        let current = order(DeliveryStatus::Approved);
        let events = synthesized_events(
            &current,
            DeliveryStatus::Approved,
            Some("1Z999AA1"),
            Some(Uuid::new_v4()),
            None,
        );
        let types: Vec<_> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec![event_types::TRACKING_ASSIGNED, event_types::CARRIER_ASSIGNED]);
    }

    #[test]
    fn test_cancel_event_replaces_status_changed() {
        let current = order(DeliveryStatus::InTransit);
        let events = synthesized_events(
            &current,
            DeliveryStatus::Cancelled,
            None,
            None,
            Some(cancellation_event(Some("damaged"))),
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, event_types::CANCELLED);
    }

    #[test]
    fn test_unchanged_update_synthesizes_nothing() {
        let current = order(DeliveryStatus::Draft);
        assert!(synthesized_events(&current, DeliveryStatus::Draft, None, None, None).is_empty());
    }

    #[test]
    fn test_cost_update_recomputes_total() {
        let current = order(DeliveryStatus::Draft);
        let costs = current.costs().with_updates(Some(Decimal::from(100)), None, None);
        assert_eq!(costs.total(), Decimal::from(110));
    }
}
