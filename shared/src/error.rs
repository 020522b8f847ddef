//! Business rule violations raised by the pure domain layer

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{DeliveryStatus, InvoiceStatus};

/// A rule in the delivery or invoicing domain was violated.
///
/// The backend maps every variant onto a client error; none of them are
/// retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("Unknown {kind}: {value}")]
    UnknownValue { kind: &'static str, value: String },

    #[error("{message}")]
    Invalid { field: &'static str, message: String },

    #[error("Delivery quantity {requested} exceeds approved quantity {approved}")]
    QuantityExceedsApproved { requested: Decimal, approved: Decimal },

    #[error("Approved item {0} is already assigned to a delivery order")]
    ApprovedItemConsumed(Uuid),

    #[error("Approved item {0} is listed more than once")]
    DuplicateApprovedItem(Uuid),

    #[error("Cannot move delivery order from {from} to {to}")]
    InvalidTransition { from: DeliveryStatus, to: DeliveryStatus },

    #[error("Delivery order is {0} and can no longer be modified")]
    OrderLocked(DeliveryStatus),

    #[error("Payment of {amount} exceeds the outstanding balance {outstanding}")]
    Overpayment { amount: Decimal, outstanding: Decimal },

    #[error("Invoice is {0} and no longer accepts changes")]
    InvoiceClosed(InvoiceStatus),

    #[error("Cannot move invoice from {from} to {to}")]
    InvalidInvoiceTransition { from: InvoiceStatus, to: InvoiceStatus },
}

impl DomainError {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        DomainError::Invalid {
            field,
            message: message.into(),
        }
    }

    /// Name of the offending input field, when one applies
    pub fn field(&self) -> Option<&'static str> {
        match self {
            DomainError::UnknownValue { kind, .. } => Some(*kind),
            DomainError::Invalid { field, .. } => Some(*field),
            DomainError::QuantityExceedsApproved { .. } => Some("delivery_quantity"),
            DomainError::ApprovedItemConsumed(_) | DomainError::DuplicateApprovedItem(_) => {
                Some("quality_approved_item_id")
            }
            DomainError::Overpayment { .. } => Some("amount"),
            DomainError::InvalidTransition { .. } | DomainError::InvalidInvoiceTransition { .. } => {
                Some("status")
            }
            DomainError::OrderLocked(_) | DomainError::InvoiceClosed(_) => None,
        }
    }
}
