//! Delivery and invoice performance metrics

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{DeliveryStatus, InvoiceStatus};
use crate::types::{ratio, round_money};

/// The fields of an order that delivery metrics look at
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderMetricSample {
    pub status: DeliveryStatus,
    pub requested_delivery_date: Option<NaiveDate>,
    pub actual_delivery_date: Option<DateTime<Utc>>,
    pub total_delivery_cost: Decimal,
}

impl OrderMetricSample {
    /// Days between the requested and actual delivery; negative when early
    pub fn delay_days(&self) -> Option<i64> {
        if self.status != DeliveryStatus::Delivered {
            return None;
        }
        match (self.requested_delivery_date, self.actual_delivery_date) {
            (Some(requested), Some(actual)) => Some((actual.date_naive() - requested).num_days()),
            _ => None,
        }
    }
}

/// Delivery performance snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryMetrics {
    pub total_orders: i64,
    pub delivered_orders: i64,
    pub on_time_deliveries: i64,
    pub in_progress_orders: i64,
    pub failed_orders: i64,
    pub cancelled_orders: i64,
    /// delivered / total
    pub success_rate: Decimal,
    /// on time / delivered
    pub on_time_rate: Decimal,
    pub average_delivery_cost: Decimal,
    pub average_delay_days: Option<Decimal>,
}

impl DeliveryMetrics {
    pub fn from_samples(samples: &[OrderMetricSample]) -> Self {
        let total_orders = samples.len() as i64;
        let mut delivered_orders = 0;
        let mut in_progress_orders = 0;
        let mut failed_orders = 0;
        let mut cancelled_orders = 0;
        let mut on_time_deliveries = 0;
        let mut delay_sum = 0i64;
        let mut delay_count = 0i64;
        let mut cost_sum = Decimal::ZERO;

        for sample in samples {
            cost_sum += sample.total_delivery_cost;
            match sample.status {
                DeliveryStatus::Delivered => delivered_orders += 1,
                DeliveryStatus::Cancelled => cancelled_orders += 1,
                DeliveryStatus::FailedDelivery | DeliveryStatus::Returned => failed_orders += 1,
                _ => {}
            }
            if !sample.status.is_terminal() {
                in_progress_orders += 1;
            }
            if let Some(delay) = sample.delay_days() {
                delay_sum += delay;
                delay_count += 1;
                if delay <= 0 {
                    on_time_deliveries += 1;
                }
            }
        }

        let average_delivery_cost = if total_orders == 0 {
            Decimal::ZERO
        } else {
            round_money(cost_sum / Decimal::from(total_orders))
        };
        let average_delay_days = (delay_count > 0)
            .then(|| round_money(Decimal::from(delay_sum) / Decimal::from(delay_count)));

        Self {
            total_orders,
            delivered_orders,
            on_time_deliveries,
            in_progress_orders,
            failed_orders,
            cancelled_orders,
            success_rate: ratio(delivered_orders, total_orders),
            on_time_rate: ratio(on_time_deliveries, delivered_orders),
            average_delivery_cost,
            average_delay_days,
        }
    }
}

/// The fields of an invoice that invoice metrics look at
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceMetricSample {
    /// Stored status (never `Overdue`)
    pub status: InvoiceStatus,
    pub invoice_date: NaiveDate,
    pub due_date: NaiveDate,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub payment_date: Option<NaiveDate>,
}

/// Invoice counts keyed by effective status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceStatusCounts {
    pub draft: i64,
    pub pending: i64,
    pub sent: i64,
    pub paid: i64,
    pub overdue: i64,
    pub cancelled: i64,
}

impl InvoiceStatusCounts {
    fn increment(&mut self, status: InvoiceStatus) {
        let slot = match status {
            InvoiceStatus::Draft => &mut self.draft,
            InvoiceStatus::Pending => &mut self.pending,
            InvoiceStatus::Sent => &mut self.sent,
            InvoiceStatus::Paid => &mut self.paid,
            InvoiceStatus::Overdue => &mut self.overdue,
            InvoiceStatus::Cancelled => &mut self.cancelled,
        };
        *slot += 1;
    }
}

/// Receivables snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceMetrics {
    pub total_invoices: i64,
    pub by_status: InvoiceStatusCounts,
    pub overdue_count: i64,
    /// Sum of totals over invoices that are not cancelled
    pub total_invoiced: Decimal,
    pub total_paid: Decimal,
    pub outstanding: Decimal,
    pub average_invoice_amount: Decimal,
    pub average_days_to_payment: Option<Decimal>,
}

impl InvoiceMetrics {
    pub fn from_samples(samples: &[InvoiceMetricSample], today: NaiveDate) -> Self {
        let mut by_status = InvoiceStatusCounts::default();
        let mut billable = 0i64;
        let mut total_invoiced = Decimal::ZERO;
        let mut total_paid = Decimal::ZERO;
        let mut days_sum = 0i64;
        let mut days_count = 0i64;

        for sample in samples {
            by_status.increment(sample.status.effective(sample.due_date, today));

            if sample.status == InvoiceStatus::Cancelled {
                continue;
            }
            billable += 1;
            total_invoiced += sample.total_amount;
            total_paid += sample.paid_amount;

            if sample.status == InvoiceStatus::Paid {
                if let Some(paid_on) = sample.payment_date {
                    days_sum += (paid_on - sample.invoice_date).num_days();
                    days_count += 1;
                }
            }
        }

        let average_invoice_amount = if billable == 0 {
            Decimal::ZERO
        } else {
            round_money(total_invoiced / Decimal::from(billable))
        };
        let average_days_to_payment = (days_count > 0)
            .then(|| round_money(Decimal::from(days_sum) / Decimal::from(days_count)));

        Self {
            total_invoices: samples.len() as i64,
            overdue_count: by_status.overdue,
            by_status,
            total_invoiced,
            total_paid,
            outstanding: total_invoiced - total_paid,
            average_invoice_amount,
            average_days_to_payment,
        }
    }
}
