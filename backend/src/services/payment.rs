//! Payment ledger
//!
//! Invoice status changes and payments. `paid` always means the balance is
//! settled: marking an invoice paid settles it, and a payment that covers the
//! balance marks it paid.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

use shared::{
    apply_payment, check_invoice_status_change, outstanding_amount, validate_payment_amount,
    DateRange, DomainError, InvoiceMetricSample, InvoiceMetrics, InvoiceStatus, PaymentMethod,
};

use crate::error::{AppError, AppResult, StorageResultExt};
use crate::services::invoice::{find_invoice, Invoice, INVOICE_COLUMNS};

/// Payment service
#[derive(Clone)]
pub struct PaymentService {
    db: PgPool,
}

/// Input for changing an invoice status
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateInvoiceStatusInput {
    pub status: InvoiceStatus,
    /// Only with `paid`; must equal the outstanding balance
    pub amount: Option<Decimal>,
    pub payment_date: Option<NaiveDate>,
    #[validate(custom = "crate::validation::payment_reference")]
    pub payment_reference: Option<String>,
    pub payment_method: Option<PaymentMethod>,
}

/// Input for recording a payment
#[derive(Debug, Deserialize, Validate)]
pub struct RecordPaymentInput {
    pub amount: Decimal,
    /// Defaults to today
    pub payment_date: Option<NaiveDate>,
    #[validate(custom = "crate::validation::payment_reference")]
    pub payment_reference: Option<String>,
    pub payment_method: Option<PaymentMethod>,
}

/// Result of recording a payment
#[derive(Debug, Clone, Serialize)]
pub struct PaymentReceipt {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub amount: Decimal,
    pub paid_amount: Decimal,
    pub outstanding_amount: Decimal,
    pub status: InvoiceStatus,
    pub settled: bool,
    pub invoice: Invoice,
}

/// Invoice metrics filter
#[derive(Debug, Default, Deserialize)]
pub struct InvoiceMetricsFilter {
    pub project_id: Option<Uuid>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, sqlx::FromRow)]
struct InvoiceMetricRow {
    #[sqlx(try_from = "String")]
    status: InvoiceStatus,
    invoice_date: NaiveDate,
    due_date: NaiveDate,
    total_amount: Decimal,
    paid_amount: Decimal,
    payment_date: Option<NaiveDate>,
}

impl From<InvoiceMetricRow> for InvoiceMetricSample {
    fn from(row: InvoiceMetricRow) -> Self {
        Self {
            status: row.status,
            invoice_date: row.invoice_date,
            due_date: row.due_date,
            total_amount: row.total_amount,
            paid_amount: row.paid_amount,
            payment_date: row.payment_date,
        }
    }
}

impl PaymentService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Change an invoice status
    #[tracing::instrument(skip_all, fields(invoice_id = %invoice_id, status = %input.status))]
    pub async fn update_status(
        &self,
        invoice_id: Uuid,
        input: UpdateInvoiceStatusInput,
        actor: Uuid,
    ) -> AppResult<Invoice> {
        input.validate()?;
        if input.status != InvoiceStatus::Paid && input.amount.is_some() {
            return Err(AppError::validation(
                "amount",
                "An amount can only be supplied when marking an invoice paid",
            ));
        }

        let mut tx = self
            .db
            .begin()
            .await
            .storage_context("update_invoice_status", invoice_id)?;

        let invoice = find_invoice(&mut *tx, invoice_id, true)
            .await?
            .ok_or_else(|| AppError::NotFound("Invoice".to_string()))?;

        if let Err(err) = check_invoice_status_change(invoice.status, input.status) {
            tracing::warn!(from = %invoice.status, "Invoice status change rejected");
            return Err(err.into());
        }

        let today = Utc::now().date_naive();

        let updated = match input.status {
            InvoiceStatus::Paid if invoice.status == InvoiceStatus::Paid => {
                tx.rollback().await.storage_context("update_invoice_status", invoice_id)?;
                return Ok(invoice.with_derived(today));
            }
            InvoiceStatus::Paid => {
                let outstanding = outstanding_amount(invoice.total_amount, invoice.paid_amount);
                if let Some(amount) = input.amount {
                    validate_payment_amount(amount)?;
                    if amount != outstanding {
                        return Err(AppError::validation(
                            "amount",
                            format!("Amount must equal the outstanding balance {}", outstanding),
                        ));
                    }
                }

                sqlx::query_as::<_, Invoice>(&format!(
                    r#"
                    UPDATE invoices
                    SET status = 'paid',
                        paid_amount = total_amount,
                        paid_at = NOW(),
                        payment_date = COALESCE($2, CURRENT_DATE),
                        payment_reference = COALESCE($3, payment_reference),
                        payment_method = COALESCE($4, payment_method),
                        updated_by = $5,
                        updated_at = NOW()
                    WHERE id = $1
                    RETURNING {}
                    "#,
                    INVOICE_COLUMNS
                ))
                .bind(invoice_id)
                .bind(input.payment_date)
                .bind(&input.payment_reference)
                .bind(input.payment_method.map(|m| m.as_str()))
                .bind(actor)
                .fetch_one(&mut *tx)
                .await
                .storage_context("settle_invoice", invoice_id)?
            }
            status => sqlx::query_as::<_, Invoice>(&format!(
                r#"
                UPDATE invoices
                SET status = $2,
                    sent_at = CASE WHEN $3 THEN COALESCE(sent_at, NOW()) ELSE sent_at END,
                    updated_by = $4,
                    updated_at = NOW()
                WHERE id = $1
                RETURNING {}
                "#,
                INVOICE_COLUMNS
            ))
            .bind(invoice_id)
            .bind(status.as_str())
            .bind(status == InvoiceStatus::Sent)
            .bind(actor)
            .fetch_one(&mut *tx)
            .await
            .storage_context("update_invoice_status", invoice_id)?,
        };

        tx.commit().await.storage_context("update_invoice_status", invoice_id)?;

        tracing::info!(from = %invoice.status, to = %updated.status, "Invoice status changed");

        Ok(updated.with_derived(today))
    }

    /// Record a payment against an invoice.
    ///
    /// Applied as one conditional update, so concurrent payments cannot push
    /// the paid amount past the total.
    #[tracing::instrument(skip_all, fields(invoice_id = %invoice_id, amount = %input.amount))]
    pub async fn record_payment(
        &self,
        invoice_id: Uuid,
        input: RecordPaymentInput,
        actor: Uuid,
    ) -> AppResult<PaymentReceipt> {
        input.validate()?;
        validate_payment_amount(input.amount)?;

        let updated = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE invoices
            SET paid_amount = paid_amount + $2,
                status = CASE WHEN paid_amount + $2 >= total_amount THEN 'paid' ELSE status END,
                paid_at = NOW(),
                payment_date = COALESCE($3, CURRENT_DATE),
                payment_reference = COALESCE($4, payment_reference),
                payment_method = COALESCE($5, payment_method),
                updated_by = $6,
                updated_at = NOW()
            WHERE id = $1
              AND status NOT IN ('paid', 'cancelled')
              AND paid_amount + $2 <= total_amount
            RETURNING {}
            "#,
            INVOICE_COLUMNS
        ))
        .bind(invoice_id)
        .bind(input.amount)
        .bind(input.payment_date)
        .bind(&input.payment_reference)
        .bind(input.payment_method.map(|m| m.as_str()))
        .bind(actor)
        .fetch_optional(&self.db)
        .await
        .storage_context("record_payment", invoice_id)?;

        let Some(invoice) = updated else {
            return Err(self.rejected_payment(invoice_id, input.amount).await);
        };

        let invoice = invoice.with_derived(Utc::now().date_naive());
        let settled = invoice.status == InvoiceStatus::Paid;

        tracing::info!(
            invoice_number = %invoice.invoice_number,
            paid_amount = %invoice.paid_amount,
            settled,
            "Payment recorded"
        );

        Ok(PaymentReceipt {
            invoice_id,
            invoice_number: invoice.invoice_number.clone(),
            amount: input.amount,
            paid_amount: invoice.paid_amount,
            outstanding_amount: invoice.outstanding_amount,
            status: invoice.status,
            settled,
            invoice,
        })
    }

    /// Work out why the conditional payment update matched no row
    async fn rejected_payment(&self, invoice_id: Uuid, amount: Decimal) -> AppError {
        let mut conn = match self.db.acquire().await {
            Ok(conn) => conn,
            Err(err) => return AppError::infrastructure("record_payment", invoice_id, err),
        };

        let invoice = match find_invoice(&mut *conn, invoice_id, false).await {
            Ok(Some(invoice)) => invoice,
            Ok(None) => return AppError::NotFound("Invoice".to_string()),
            Err(err) => return err,
        };

        if invoice.status.is_closed() {
            tracing::warn!(status = %invoice.status, "Payment on closed invoice rejected");
            return DomainError::InvoiceClosed(invoice.status).into();
        }

        match apply_payment(invoice.paid_amount, invoice.total_amount, amount) {
            Err(err) => {
                tracing::warn!(%err, "Payment rejected");
                err.into()
            }
            // Balance moved between the update and this read
            Ok(_) => AppError::InvalidStateTransition(
                "Invoice balance changed concurrently, retry the payment".to_string(),
            ),
        }
    }

    /// Invoice metrics over invoice dates
    pub async fn get_invoice_metrics(&self, filter: &InvoiceMetricsFilter) -> AppResult<InvoiceMetrics> {
        DateRange::from_bounds(filter.start_date, filter.end_date)?;

        let rows = sqlx::query_as::<_, InvoiceMetricRow>(
            r#"
            SELECT status, invoice_date, due_date, total_amount, paid_amount, payment_date
            FROM invoices
            WHERE ($1::uuid IS NULL OR project_id = $1)
              AND ($2::date IS NULL OR invoice_date >= $2)
              AND ($3::date IS NULL OR invoice_date <= $3)
            "#,
        )
        .bind(filter.project_id)
        .bind(filter.start_date)
        .bind(filter.end_date)
        .fetch_all(&self.db)
        .await
        .storage_context("invoice_metrics", "all")?;

        let samples: Vec<InvoiceMetricSample> = rows.into_iter().map(Into::into).collect();

        Ok(InvoiceMetrics::from_samples(&samples, Utc::now().date_naive()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_input_rejects_long_reference() {
        let input = RecordPaymentInput {
            amount: Decimal::from(100),
            payment_date: None,
            payment_reference: Some("R".repeat(101)),
            payment_method: Some(PaymentMethod::BankTransfer),
        };
        assert!(input.validate().is_err());
    }

    #[test]
    fn test_status_input_deserializes_method() {
        let input: UpdateInvoiceStatusInput = serde_json::from_str(
            r#"{"status":"paid","amount":"1348.00","payment_method":"bank_transfer"}"#,
        )
        .unwrap();
        assert_eq!(input.status, InvoiceStatus::Paid);
        assert_eq!(input.payment_method, Some(PaymentMethod::BankTransfer));
    }
}
