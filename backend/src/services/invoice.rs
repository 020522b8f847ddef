//! Invoice generator
//!
//! Prices a delivered order's items into an invoice snapshot. Header and
//! lines are written in one transaction.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;
use validator::Validate;

use shared::{
    format_invoice_number, outstanding_amount, price_line, validate_due_date, validate_tax_rate,
    DeliveryStatus, InvoiceStatus, InvoiceTotals, LineAmounts, PageRequest, PaginatedResponse,
    Pagination,
};

use crate::config::InvoicingConfig;
use crate::error::{is_unique_violation, AppError, AppResult, StorageResultExt};
use crate::services::address::find_address;
use crate::services::delivery_order::{find_order, like_pattern};

/// Invoice service
#[derive(Clone)]
pub struct InvoiceService {
    db: PgPool,
    default_tax_rate: Decimal,
    payment_terms_days: u32,
}

/// Invoice header.
///
/// `status` is the effective status: unpaid invoices past their due date
/// read as overdue.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Invoice {
    pub id: Uuid,
    pub invoice_number: String,
    pub delivery_order_id: Uuid,
    pub project_id: Uuid,
    pub invoice_date: NaiveDate,
    pub due_date: NaiveDate,
    #[sqlx(try_from = "String")]
    pub status: InvoiceStatus,
    pub subtotal: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub delivery_charges: Decimal,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub payment_date: Option<NaiveDate>,
    pub payment_reference: Option<String>,
    pub payment_method: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub billing_name: Option<String>,
    pub billing_address: Option<String>,
    pub billing_tax_id: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Uuid,
    pub updated_by: Uuid,
    #[sqlx(skip)]
    pub outstanding_amount: Decimal,
}

impl Invoice {
    /// Fill in the fields derived at read time
    pub fn with_derived(mut self, today: NaiveDate) -> Self {
        self.status = self.status.effective(self.due_date, today);
        self.outstanding_amount = outstanding_amount(self.total_amount, self.paid_amount);
        self
    }
}

/// Invoice line, a snapshot of a delivery item
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct InvoiceLineItem {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub delivery_item_id: Uuid,
    pub bom_item_id: Uuid,
    pub description: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub line_number: i32,
    pub created_at: DateTime<Utc>,
    pub part_number: Option<String>,
}

/// Invoice with its lines
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceDetail {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub order_number: Option<String>,
    pub line_items: Vec<InvoiceLineItem>,
}

/// Input for invoicing a delivered order; every field is optional
#[derive(Debug, Default, Deserialize, Validate)]
pub struct CreateInvoiceInput {
    /// Defaults to today
    pub invoice_date: Option<NaiveDate>,
    /// Defaults to the invoice date plus the configured payment terms
    pub due_date: Option<NaiveDate>,
    pub tax_rate: Option<Decimal>,
    /// Overrides the order's total delivery cost
    pub delivery_charges: Option<Decimal>,
    #[validate(length(max = 200))]
    pub billing_name: Option<String>,
    #[validate(length(max = 1000))]
    pub billing_address: Option<String>,
    #[validate(length(max = 50))]
    pub billing_tax_id: Option<String>,
    #[validate(length(max = 4000))]
    pub notes: Option<String>,
}

/// Invoice list filter
#[derive(Debug, Default, Deserialize)]
pub struct InvoiceFilter {
    pub project_id: Option<Uuid>,
    /// Effective status, `overdue` included
    pub status: Option<InvoiceStatus>,
    pub delivery_order_id: Option<Uuid>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub search: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl InvoiceFilter {
    fn pagination(&self) -> Pagination {
        PageRequest {
            page: self.page,
            limit: self.limit,
        }
        .normalize()
    }

    fn push_conditions(&self, builder: &mut QueryBuilder<'_, Postgres>, today: NaiveDate) {
        builder.push(" WHERE TRUE");
        if let Some(project_id) = self.project_id {
            builder.push(" AND project_id = ").push_bind(project_id);
        }
        if let Some(order_id) = self.delivery_order_id {
            builder.push(" AND delivery_order_id = ").push_bind(order_id);
        }
        if let Some(from) = self.from {
            builder.push(" AND invoice_date >= ").push_bind(from);
        }
        if let Some(to) = self.to {
            builder.push(" AND invoice_date <= ").push_bind(to);
        }
        if let Some(status) = self.status {
            push_status_condition(builder, status, today);
        }
        if let Some(pattern) = self.search.as_deref().and_then(like_pattern) {
            builder
                .push(" AND (invoice_number ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR billing_name ILIKE ")
                .push_bind(pattern)
                .push(")");
        }
    }
}

/// Filter on the effective status, which folds the due date into open statuses
fn push_status_condition(builder: &mut QueryBuilder<'_, Postgres>, status: InvoiceStatus, today: NaiveDate) {
    match status {
        InvoiceStatus::Overdue => {
            builder
                .push(" AND status NOT IN ('paid', 'cancelled') AND due_date < ")
                .push_bind(today);
        }
        InvoiceStatus::Paid | InvoiceStatus::Cancelled => {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        InvoiceStatus::Draft | InvoiceStatus::Pending | InvoiceStatus::Sent => {
            builder
                .push(" AND status = ")
                .push_bind(status.as_str())
                .push(" AND due_date >= ")
                .push_bind(today);
        }
    }
}

pub(crate) const INVOICE_COLUMNS: &str = "id, invoice_number, delivery_order_id, project_id, \
     invoice_date, due_date, status, subtotal, tax_rate, tax_amount, delivery_charges, total_amount, \
     paid_amount, payment_date, payment_reference, payment_method, sent_at, paid_at, billing_name, \
     billing_address, billing_tax_id, notes, created_at, updated_at, created_by, updated_by";

/// Delivery item joined with its catalog price
#[derive(Debug, sqlx::FromRow)]
struct BillableItem {
    id: Uuid,
    bom_item_id: Uuid,
    delivery_quantity: Decimal,
    unit_value: Option<Decimal>,
    unit_cost: Option<Decimal>,
    part_number: Option<String>,
    description: Option<String>,
}

impl BillableItem {
    fn line_description(&self) -> Option<String> {
        match (&self.part_number, &self.description) {
            (Some(part), Some(desc)) => Some(format!("{} {}", part, desc)),
            (Some(part), None) => Some(part.clone()),
            (None, desc) => desc.clone(),
        }
    }
}

impl InvoiceService {
    pub fn new(db: PgPool, config: &InvoicingConfig) -> Self {
        Self {
            db,
            default_tax_rate: config.default_tax_rate,
            payment_terms_days: config.payment_terms_days,
        }
    }

    /// Invoice a delivered order
    #[tracing::instrument(skip_all, fields(order_id = %order_id))]
    pub async fn create_invoice_from_order(
        &self,
        order_id: Uuid,
        input: CreateInvoiceInput,
        actor: Uuid,
    ) -> AppResult<InvoiceDetail> {
        input.validate()?;

        let tax_rate = input.tax_rate.unwrap_or(self.default_tax_rate);
        validate_tax_rate(tax_rate)?;
        if input.delivery_charges.is_some_and(|c| c < Decimal::ZERO) {
            return Err(AppError::validation("delivery_charges", "Delivery charges cannot be negative"));
        }

        let invoice_date = input.invoice_date.unwrap_or_else(|| Utc::now().date_naive());
        let due_date = input
            .due_date
            .unwrap_or(invoice_date + Duration::days(i64::from(self.payment_terms_days)));
        validate_due_date(invoice_date, due_date).map_err(|msg| AppError::validation("due_date", msg))?;

        let mut tx = self.db.begin().await.storage_context("create_invoice", order_id)?;

        let order = find_order(&mut *tx, order_id, true)
            .await?
            .ok_or_else(|| AppError::NotFound("Delivery order".to_string()))?;

        if order.status != DeliveryStatus::Delivered {
            tracing::warn!(status = %order.status, "Invoice requested for undelivered order");
            return Err(AppError::validation(
                "status",
                format!("Only delivered orders can be invoiced, order is {}", order.status),
            ));
        }

        let already_invoiced: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM invoices WHERE delivery_order_id = $1)")
                .bind(order_id)
                .fetch_one(&mut *tx)
                .await
                .storage_context("find_order_invoice", order_id)?;
        if already_invoiced {
            return Err(duplicate_invoice());
        }

        let items = sqlx::query_as::<_, BillableItem>(
            r#"
            SELECT di.id, di.bom_item_id, di.delivery_quantity, di.unit_value,
                   b.unit_cost, b.part_number, b.description
            FROM delivery_items di
            LEFT JOIN bom_items b ON b.id = di.bom_item_id
            WHERE di.delivery_order_id = $1
            ORDER BY di.created_at, di.id
            "#,
        )
        .bind(order_id)
        .fetch_all(&mut *tx)
        .await
        .storage_context("list_billable_items", order_id)?;

        if items.is_empty() {
            return Err(AppError::validation("items", "Delivery order has no items to invoice"));
        }

        let lines = items
            .iter()
            .map(|item| price_line(item.unit_value, item.unit_cost, item.delivery_quantity, tax_rate))
            .collect::<Result<Vec<LineAmounts>, _>>()?;
        let totals = InvoiceTotals::from_lines(
            &lines,
            input.delivery_charges.unwrap_or(order.total_delivery_cost),
        );
        if totals.total_amount <= Decimal::ZERO {
            return Err(AppError::validation("total_amount", "Invoice total must be positive"));
        }

        let billing_address = match input.billing_address {
            Some(address) => Some(address),
            None => default_billing_address(&mut *tx, order.billing_address_id, order.delivery_address_id)
                .await?,
        };

        let sequence: i64 = sqlx::query_scalar("SELECT nextval('invoice_number_seq')")
            .fetch_one(&mut *tx)
            .await
            .storage_context("next_invoice_number", order_id)?;
        let invoice_number = format_invoice_number(invoice_date.year(), sequence);

        let invoice_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO invoices
                (invoice_number, delivery_order_id, project_id, invoice_date, due_date, status,
                 subtotal, tax_rate, tax_amount, delivery_charges, total_amount, paid_amount,
                 billing_name, billing_address, billing_tax_id, notes, created_by, updated_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 0, $12, $13, $14, $15, $16, $16)
            RETURNING id
            "#,
        )
        .bind(&invoice_number)
        .bind(order_id)
        .bind(order.project_id)
        .bind(invoice_date)
        .bind(due_date)
        .bind(InvoiceStatus::Draft.as_str())
        .bind(totals.subtotal)
        .bind(tax_rate)
        .bind(totals.tax_amount)
        .bind(totals.delivery_charges)
        .bind(totals.total_amount)
        .bind(&input.billing_name)
        .bind(&billing_address)
        .bind(&input.billing_tax_id)
        .bind(&input.notes)
        .bind(actor)
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                duplicate_invoice()
            } else {
                AppError::infrastructure("create_invoice", order_id, err)
            }
        })?;

        for (index, (item, line)) in items.iter().zip(&lines).enumerate() {
            sqlx::query(
                r#"
                INSERT INTO invoice_line_items
                    (invoice_id, delivery_item_id, bom_item_id, description, quantity, unit_price,
                     line_total, tax_rate, tax_amount, line_number)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(invoice_id)
            .bind(item.id)
            .bind(item.bom_item_id)
            .bind(item.line_description())
            .bind(line.quantity)
            .bind(line.unit_price)
            .bind(line.line_total)
            .bind(tax_rate)
            .bind(line.tax_amount)
            .bind(i32::try_from(index + 1).unwrap_or(i32::MAX))
            .execute(&mut *tx)
            .await
            .storage_context("create_invoice_line", invoice_id)?;
        }

        tx.commit().await.storage_context("create_invoice", invoice_id)?;

        tracing::info!(
            %invoice_id,
            %invoice_number,
            total_amount = %totals.total_amount,
            "Invoice created"
        );

        self.get_invoice(invoice_id).await
    }

    /// List invoices, newest first
    pub async fn list_invoices(&self, filter: &InvoiceFilter) -> AppResult<PaginatedResponse<Invoice>> {
        let today = Utc::now().date_naive();
        let pagination = filter.pagination();

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM invoices");
        filter.push_conditions(&mut count, today);
        let total: i64 = count
            .build_query_scalar::<i64>()
            .fetch_one(&self.db)
            .await
            .storage_context("count_invoices", "list")?;

        let mut select = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM invoices", INVOICE_COLUMNS));
        filter.push_conditions(&mut select, today);
        select
            .push(" ORDER BY invoice_date DESC, created_at DESC LIMIT ")
            .push_bind(pagination.limit())
            .push(" OFFSET ")
            .push_bind(pagination.offset());

        let invoices = select
            .build_query_as::<Invoice>()
            .fetch_all(&self.db)
            .await
            .storage_context("list_invoices", "list")?
            .into_iter()
            .map(|invoice| invoice.with_derived(today))
            .collect();

        Ok(PaginatedResponse::new(
            invoices,
            pagination,
            u64::try_from(total).unwrap_or_default(),
        ))
    }

    /// Get an invoice with its lines
    pub async fn get_invoice(&self, invoice_id: Uuid) -> AppResult<InvoiceDetail> {
        let mut conn = self.db.acquire().await.storage_context("get_invoice", invoice_id)?;

        let invoice = find_invoice(&mut *conn, invoice_id, false)
            .await?
            .ok_or_else(|| AppError::NotFound("Invoice".to_string()))?;

        let order_number: Option<String> =
            sqlx::query_scalar("SELECT order_number FROM delivery_orders WHERE id = $1")
                .bind(invoice.delivery_order_id)
                .fetch_optional(&mut *conn)
                .await
                .storage_context("find_delivery_order", invoice.delivery_order_id)?;

        let line_items = sqlx::query_as::<_, InvoiceLineItem>(
            r#"
            SELECT li.id, li.invoice_id, li.delivery_item_id, li.bom_item_id, li.description,
                   li.quantity, li.unit_price, li.line_total, li.tax_rate, li.tax_amount,
                   li.line_number, li.created_at, b.part_number
            FROM invoice_line_items li
            LEFT JOIN bom_items b ON b.id = li.bom_item_id
            WHERE li.invoice_id = $1
            ORDER BY li.line_number
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&mut *conn)
        .await
        .storage_context("list_invoice_lines", invoice_id)?;

        Ok(InvoiceDetail {
            invoice: invoice.with_derived(Utc::now().date_naive()),
            order_number,
            line_items,
        })
    }
}

fn duplicate_invoice() -> AppError {
    AppError::validation(
        "delivery_order_id",
        "An invoice already exists for this delivery order",
    )
}

async fn default_billing_address(
    conn: &mut PgConnection,
    billing_address_id: Option<Uuid>,
    delivery_address_id: Uuid,
) -> AppResult<Option<String>> {
    let address = find_address(conn, billing_address_id.unwrap_or(delivery_address_id)).await?;
    Ok(address.map(|a| a.formatted()))
}

/// Invoice header as stored, without derived fields
pub(crate) async fn find_invoice(
    conn: &mut PgConnection,
    invoice_id: Uuid,
    for_update: bool,
) -> AppResult<Option<Invoice>> {
    let lock = if for_update { " FOR UPDATE" } else { "" };
    let invoice = sqlx::query_as::<_, Invoice>(&format!(
        "SELECT {} FROM invoices WHERE id = $1{}",
        INVOICE_COLUMNS, lock
    ))
    .bind(invoice_id)
    .fetch_optional(conn)
    .await
    .storage_context("find_invoice", invoice_id)?;

    Ok(invoice)
}
