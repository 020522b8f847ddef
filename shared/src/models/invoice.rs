//! Invoice models, line pricing and payment application

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DomainError;
use crate::types::round_money;

/// Tax rate applied when an invoice request does not carry one (18%)
pub fn default_tax_rate() -> Decimal {
    Decimal::new(18, 2)
}

/// Invoice status.
///
/// `Overdue` is never stored; it is derived from the due date at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Pending,
    Sent,
    Paid,
    Overdue,
    Cancelled,
}

impl InvoiceStatus {
    pub const ALL: [InvoiceStatus; 6] = [
        InvoiceStatus::Draft,
        InvoiceStatus::Pending,
        InvoiceStatus::Sent,
        InvoiceStatus::Paid,
        InvoiceStatus::Overdue,
        InvoiceStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    /// Whether the status is closed for overdue purposes
    pub fn is_closed(&self) -> bool {
        matches!(self, InvoiceStatus::Paid | InvoiceStatus::Cancelled)
    }

    /// Status as seen by readers on `today`
    pub fn effective(&self, due_date: NaiveDate, today: NaiveDate) -> InvoiceStatus {
        if !self.is_closed() && due_date < today {
            InvoiceStatus::Overdue
        } else {
            *self
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InvoiceStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::UnknownValue {
                kind: "status",
                value: s.to_string(),
            })
    }
}

impl TryFrom<String> for InvoiceStatus {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// How a payment was made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    BankTransfer,
    Cheque,
    Cash,
    Card,
    Other,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Cheque => "cheque",
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::Other => "other",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bank_transfer" => Ok(PaymentMethod::BankTransfer),
            "cheque" => Ok(PaymentMethod::Cheque),
            "cash" => Ok(PaymentMethod::Cash),
            "card" => Ok(PaymentMethod::Card),
            "other" => Ok(PaymentMethod::Other),
            _ => Err(DomainError::UnknownValue {
                kind: "payment_method",
                value: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for PaymentMethod {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Amounts for one invoice line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAmounts {
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub tax_amount: Decimal,
}

/// Price one delivered item.
///
/// The item's recorded unit value wins over the catalog unit cost. An item
/// with neither cannot be invoiced.
pub fn price_line(
    unit_value: Option<Decimal>,
    catalog_unit_cost: Option<Decimal>,
    quantity: Decimal,
    tax_rate: Decimal,
) -> Result<LineAmounts, DomainError> {
    let unit_price = unit_value.or(catalog_unit_cost).ok_or_else(|| {
        DomainError::invalid("unit_price", "Delivery item has no unit value or catalog cost")
    })?;
    if unit_price < Decimal::ZERO {
        return Err(DomainError::invalid("unit_price", "Unit price cannot be negative"));
    }

    let line_total = round_money(unit_price * quantity);
    let tax_amount = round_money(line_total * tax_rate);

    Ok(LineAmounts {
        quantity,
        unit_price,
        line_total,
        tax_amount,
    })
}

/// Header totals of an invoice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceTotals {
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub delivery_charges: Decimal,
    pub total_amount: Decimal,
}

impl InvoiceTotals {
    pub fn from_lines(lines: &[LineAmounts], delivery_charges: Decimal) -> Self {
        let subtotal: Decimal = lines.iter().map(|l| l.line_total).sum();
        let tax_amount: Decimal = lines.iter().map(|l| l.tax_amount).sum();
        let delivery_charges = round_money(delivery_charges);

        Self {
            subtotal,
            tax_amount,
            delivery_charges,
            total_amount: subtotal + tax_amount + delivery_charges,
        }
    }
}

/// Validate a tax rate expressed as a fraction (0.18 = 18%)
pub fn validate_tax_rate(rate: Decimal) -> Result<(), DomainError> {
    if rate < Decimal::ZERO || rate > Decimal::ONE {
        return Err(DomainError::invalid("tax_rate", "Tax rate must be between 0 and 1"));
    }
    Ok(())
}

/// Remaining balance of an invoice
pub fn outstanding_amount(total_amount: Decimal, paid_amount: Decimal) -> Decimal {
    (total_amount - paid_amount).max(Decimal::ZERO)
}

/// Result of applying a payment to an invoice balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentOutcome {
    pub paid_amount: Decimal,
    pub outstanding: Decimal,
    pub settled: bool,
}

/// A payment must be positive with at most two decimals
pub fn validate_payment_amount(amount: Decimal) -> Result<(), DomainError> {
    if amount <= Decimal::ZERO {
        return Err(DomainError::invalid("amount", "Payment amount must be positive"));
    }
    if round_money(amount) != amount {
        return Err(DomainError::invalid(
            "amount",
            "Payment amount cannot have more than two decimals",
        ));
    }
    Ok(())
}

/// Apply a payment to the current balance, rejecting overpayment
pub fn apply_payment(
    paid_amount: Decimal,
    total_amount: Decimal,
    amount: Decimal,
) -> Result<PaymentOutcome, DomainError> {
    validate_payment_amount(amount)?;

    let new_paid = paid_amount + amount;
    if new_paid > total_amount {
        return Err(DomainError::Overpayment {
            amount,
            outstanding: outstanding_amount(total_amount, paid_amount),
        });
    }

    Ok(PaymentOutcome {
        paid_amount: new_paid,
        outstanding: total_amount - new_paid,
        settled: new_paid >= total_amount,
    })
}

/// Check a requested status change on an invoice
pub fn check_invoice_status_change(
    current: InvoiceStatus,
    next: InvoiceStatus,
) -> Result<(), DomainError> {
    if next == InvoiceStatus::Overdue {
        return Err(DomainError::invalid(
            "status",
            "Overdue is derived from the due date and cannot be set",
        ));
    }
    if current == InvoiceStatus::Cancelled {
        return Err(DomainError::InvoiceClosed(current));
    }
    if current == InvoiceStatus::Paid && next != InvoiceStatus::Paid {
        return Err(DomainError::InvalidInvoiceTransition {
            from: current,
            to: next,
        });
    }
    Ok(())
}

/// Generate an invoice number: INV-YYYY-NNNNNN
pub fn format_invoice_number(year: i32, sequence: i64) -> String {
    format!("INV-{}-{:06}", year, sequence)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_overdue_is_derived() {
        let due = date(2024, 3, 1);
        assert_eq!(InvoiceStatus::Sent.effective(due, date(2024, 3, 2)), InvoiceStatus::Overdue);
        assert_eq!(InvoiceStatus::Sent.effective(due, date(2024, 3, 1)), InvoiceStatus::Sent);
        assert_eq!(InvoiceStatus::Paid.effective(due, date(2024, 4, 1)), InvoiceStatus::Paid);
        assert_eq!(
            InvoiceStatus::Cancelled.effective(due, date(2024, 4, 1)),
            InvoiceStatus::Cancelled
        );
    }

    #[test]
    fn test_unit_value_preferred_over_catalog() {
        let line = price_line(Some(Decimal::from(10)), Some(Decimal::from(99)), Decimal::from(2), Decimal::ZERO)
            .unwrap();
        assert_eq!(line.unit_price, Decimal::from(10));
        assert_eq!(line.line_total, Decimal::from(20));
    }

    #[test]
    fn test_missing_price_is_rejected() {
        assert!(price_line(None, None, Decimal::ONE, default_tax_rate()).is_err());
    }

    #[test]
    fn test_overdue_cannot_be_set() {
        assert!(check_invoice_status_change(InvoiceStatus::Sent, InvoiceStatus::Overdue).is_err());
        assert!(check_invoice_status_change(InvoiceStatus::Draft, InvoiceStatus::Sent).is_ok());
    }
}
