//! Delivery order models, tracking event mapping and the status machine

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::DomainError;
use crate::types::round_money;

/// Lifecycle status of a delivery order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Draft,
    PendingApproval,
    Approved,
    InTransit,
    OutForDelivery,
    Delivered,
    FailedDelivery,
    Returned,
    Cancelled,
}

impl DeliveryStatus {
    pub const ALL: [DeliveryStatus; 9] = [
        DeliveryStatus::Draft,
        DeliveryStatus::PendingApproval,
        DeliveryStatus::Approved,
        DeliveryStatus::InTransit,
        DeliveryStatus::OutForDelivery,
        DeliveryStatus::Delivered,
        DeliveryStatus::FailedDelivery,
        DeliveryStatus::Returned,
        DeliveryStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Draft => "draft",
            DeliveryStatus::PendingApproval => "pending_approval",
            DeliveryStatus::Approved => "approved",
            DeliveryStatus::InTransit => "in_transit",
            DeliveryStatus::OutForDelivery => "out_for_delivery",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::FailedDelivery => "failed_delivery",
            DeliveryStatus::Returned => "returned",
            DeliveryStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal states end the lifecycle of an order
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::Delivered | DeliveryStatus::Cancelled | DeliveryStatus::Returned
        )
    }

    /// States an order may be created in
    pub fn is_pre_transit(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::Draft | DeliveryStatus::PendingApproval | DeliveryStatus::Approved
        )
    }

    /// Orders in these states reject field updates other than cancellation
    pub fn is_locked(&self) -> bool {
        matches!(self, DeliveryStatus::Delivered | DeliveryStatus::Cancelled)
    }

    /// Forward transitions accepted when strict transition checking is on
    pub fn allowed_transitions(&self) -> &'static [DeliveryStatus] {
        use DeliveryStatus::*;
        match self {
            Draft => &[PendingApproval, Approved, Cancelled],
            PendingApproval => &[Approved, Draft, Cancelled],
            Approved => &[InTransit, Cancelled],
            InTransit => &[OutForDelivery, Delivered, FailedDelivery, Returned, Cancelled],
            OutForDelivery => &[Delivered, FailedDelivery, Returned, Cancelled],
            FailedDelivery => &[InTransit, OutForDelivery, Returned, Cancelled],
            Delivered => &[Cancelled],
            Returned | Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: DeliveryStatus) -> bool {
        *self == next || self.allowed_transitions().contains(&next)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeliveryStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::UnknownValue {
                kind: "status",
                value: s.to_string(),
            })
    }
}

impl TryFrom<String> for DeliveryStatus {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Delivery priority
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl DeliveryPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryPriority::Low => "low",
            DeliveryPriority::Normal => "normal",
            DeliveryPriority::High => "high",
            DeliveryPriority::Urgent => "urgent",
        }
    }

    pub const ALL: [DeliveryPriority; 4] = [
        DeliveryPriority::Low,
        DeliveryPriority::Normal,
        DeliveryPriority::High,
        DeliveryPriority::Urgent,
    ];

    /// Numeric rank used when sorting by priority
    pub fn rank(&self) -> i16 {
        match self {
            DeliveryPriority::Low => 0,
            DeliveryPriority::Normal => 1,
            DeliveryPriority::High => 2,
            DeliveryPriority::Urgent => 3,
        }
    }
}

impl fmt::Display for DeliveryPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryPriority {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(DeliveryPriority::Low),
            "normal" => Ok(DeliveryPriority::Normal),
            "high" => Ok(DeliveryPriority::High),
            "urgent" => Ok(DeliveryPriority::Urgent),
            _ => Err(DomainError::UnknownValue {
                kind: "priority",
                value: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for DeliveryPriority {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Well-known tracking event types
pub mod event_types {
    pub const PICKED_UP: &str = "picked_up";
    pub const OUT_FOR_DELIVERY: &str = "out_for_delivery";
    pub const DELIVERED: &str = "delivered";
    pub const DELIVERY_FAILED: &str = "delivery_failed";
    pub const RETURNED: &str = "returned";
    pub const CANCELLED: &str = "cancelled";

    /// Synthesized when an update changes the order status
    pub const STATUS_CHANGED: &str = "status_changed";
    /// Synthesized when a tracking number is assigned or replaced
    pub const TRACKING_ASSIGNED: &str = "tracking_assigned";
    /// Synthesized when the carrier changes
    pub const CARRIER_ASSIGNED: &str = "carrier_assigned";
}

/// Status an event type drives the order into, if any
pub fn status_for_event(event_type: &str) -> Option<DeliveryStatus> {
    match event_type {
        event_types::PICKED_UP => Some(DeliveryStatus::InTransit),
        event_types::OUT_FOR_DELIVERY => Some(DeliveryStatus::OutForDelivery),
        event_types::DELIVERED => Some(DeliveryStatus::Delivered),
        event_types::DELIVERY_FAILED => Some(DeliveryStatus::FailedDelivery),
        event_types::RETURNED => Some(DeliveryStatus::Returned),
        event_types::CANCELLED => Some(DeliveryStatus::Cancelled),
        _ => None,
    }
}

/// How status changes are checked against the transition table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPolicy {
    /// Overwrite the status unconditionally
    #[default]
    Permissive,
    /// Only accept transitions listed by `DeliveryStatus::allowed_transitions`
    Strict,
}

impl TransitionPolicy {
    pub fn from_strict_flag(strict: bool) -> Self {
        if strict {
            TransitionPolicy::Strict
        } else {
            TransitionPolicy::Permissive
        }
    }
}

/// Check a status change under the given policy
pub fn check_transition(
    current: DeliveryStatus,
    next: DeliveryStatus,
    policy: TransitionPolicy,
) -> Result<(), DomainError> {
    match policy {
        TransitionPolicy::Permissive => Ok(()),
        TransitionPolicy::Strict if current.can_transition_to(next) => Ok(()),
        TransitionPolicy::Strict => Err(DomainError::InvalidTransition {
            from: current,
            to: next,
        }),
    }
}

/// Resolve the status a tracking event moves an order to.
///
/// Returns `None` when the event type does not drive a status change.
pub fn resolve_event_transition(
    current: DeliveryStatus,
    event_type: &str,
    policy: TransitionPolicy,
) -> Result<Option<DeliveryStatus>, DomainError> {
    match status_for_event(event_type) {
        Some(next) => {
            check_transition(current, next, policy)?;
            Ok(Some(next))
        }
        None => Ok(None),
    }
}

/// Gate for order updates.
///
/// A delivered order accepts one more change: a status-only move to
/// cancelled. A cancelled order accepts nothing.
pub fn ensure_order_mutable(
    current: DeliveryStatus,
    requested_status: Option<DeliveryStatus>,
    fields_changed: bool,
) -> Result<(), DomainError> {
    if !current.is_locked() {
        return Ok(());
    }
    let cancelling = current != DeliveryStatus::Cancelled
        && requested_status == Some(DeliveryStatus::Cancelled);
    if cancelling && !fields_changed {
        return Ok(());
    }
    Err(DomainError::OrderLocked(current))
}

/// Delivery time to stamp when an order moves into `next` at `at`
pub fn delivered_at(next: DeliveryStatus, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    (next == DeliveryStatus::Delivered).then_some(at)
}

/// Total delivery cost; the only place the three components are combined
pub fn total_delivery_cost(delivery: Decimal, insurance: Decimal, handling: Decimal) -> Decimal {
    round_money(delivery + insurance + handling)
}

/// Cost components of a delivery order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryCosts {
    pub delivery_cost: Decimal,
    pub insurance_cost: Decimal,
    pub handling_cost: Decimal,
}

impl DeliveryCosts {
    pub fn new(delivery_cost: Decimal, insurance_cost: Decimal, handling_cost: Decimal) -> Self {
        Self {
            delivery_cost: round_money(delivery_cost),
            insurance_cost: round_money(insurance_cost),
            handling_cost: round_money(handling_cost),
        }
    }

    /// Costs from optional inputs, missing components count as zero
    pub fn from_optional(
        delivery_cost: Option<Decimal>,
        insurance_cost: Option<Decimal>,
        handling_cost: Option<Decimal>,
    ) -> Self {
        Self::new(
            delivery_cost.unwrap_or_default(),
            insurance_cost.unwrap_or_default(),
            handling_cost.unwrap_or_default(),
        )
    }

    /// Apply a partial update, keeping components that are not supplied
    pub fn with_updates(
        &self,
        delivery_cost: Option<Decimal>,
        insurance_cost: Option<Decimal>,
        handling_cost: Option<Decimal>,
    ) -> Self {
        Self::new(
            delivery_cost.unwrap_or(self.delivery_cost),
            insurance_cost.unwrap_or(self.insurance_cost),
            handling_cost.unwrap_or(self.handling_cost),
        )
    }

    pub fn total(&self) -> Decimal {
        total_delivery_cost(self.delivery_cost, self.insurance_cost, self.handling_cost)
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        for (field, value) in [
            ("delivery_cost", self.delivery_cost),
            ("insurance_cost", self.insurance_cost),
            ("handling_cost", self.handling_cost),
        ] {
            if value < Decimal::ZERO {
                return Err(DomainError::invalid(field, format!("{} cannot be negative", field)));
            }
        }
        Ok(())
    }
}

/// Check a requested delivery quantity against the approved quantity
pub fn validate_delivery_quantity(requested: Decimal, approved: Decimal) -> Result<(), DomainError> {
    if requested <= Decimal::ZERO {
        return Err(DomainError::invalid(
            "delivery_quantity",
            "Delivery quantity must be positive",
        ));
    }
    if requested > approved {
        return Err(DomainError::QuantityExceedsApproved { requested, approved });
    }
    Ok(())
}

/// Reject a request that lists the same approved item twice
pub fn ensure_unique_approved_items(ids: &[Uuid]) -> Result<(), DomainError> {
    let mut seen = std::collections::HashSet::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(*id) {
            return Err(DomainError::DuplicateApprovedItem(*id));
        }
    }
    Ok(())
}

/// Generate a delivery order number: DO-YYYY-NNNNNN
pub fn format_order_number(year: i32, sequence: i64) -> String {
    format!("DO-{}-{:06}", year, sequence)
}
