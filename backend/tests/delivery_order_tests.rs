//! Delivery order tests
//!
//! Order building rules:
//! - delivery quantity never exceeds the approved quantity
//! - total delivery cost is always the sum of its components
//! - an approved item can only be listed once
//! - delivered orders only accept a status-only cancellation
//! - cancelled orders accept nothing

use proptest::prelude::*;
use rust_decimal::Decimal;
use shared::{
    check_transition, ensure_order_mutable, ensure_unique_approved_items, format_order_number,
    total_delivery_cost, validate_delivery_quantity, DeliveryCosts, DeliveryStatus, DomainError,
    TransitionPolicy,
};
use std::str::FromStr;
use uuid::Uuid;

// Helper to create Decimal from string
fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_quantity_within_approved_accepted() {
        assert!(validate_delivery_quantity(dec("5"), dec("10")).is_ok());
        assert!(validate_delivery_quantity(dec("10"), dec("10")).is_ok());
    }

    #[test]
    fn test_quantity_above_approved_rejected() {
        let err = validate_delivery_quantity(dec("10.5"), dec("10")).unwrap_err();
        assert_eq!(
            err,
            DomainError::QuantityExceedsApproved {
                requested: dec("10.5"),
                approved: dec("10"),
            }
        );
    }

    #[test]
    fn test_zero_quantity_rejected() {
        assert!(validate_delivery_quantity(Decimal::ZERO, dec("10")).is_err());
        assert!(validate_delivery_quantity(dec("-1"), dec("10")).is_err());
    }

    #[test]
    fn test_total_cost_sums_components() {
        assert_eq!(total_delivery_cost(dec("150"), dec("25.50"), dec("10")), dec("185.50"));
    }

    #[test]
    fn test_cost_update_keeps_missing_components() {
        let costs = DeliveryCosts::new(dec("100"), dec("20"), dec("5"));
        let updated = costs.with_updates(None, Some(dec("30")), None);
        assert_eq!(updated.delivery_cost, dec("100"));
        assert_eq!(updated.insurance_cost, dec("30"));
        assert_eq!(updated.total(), dec("135"));
    }

    #[test]
    fn test_negative_cost_rejected() {
        let costs = DeliveryCosts::from_optional(Some(dec("-1")), None, None);
        assert!(costs.validate().is_err());
        assert_eq!(DeliveryCosts::from_optional(None, None, None).total(), Decimal::ZERO);
    }

    #[test]
    fn test_duplicate_approved_item_rejected() {
        let id = Uuid::new_v4();
        let err = ensure_unique_approved_items(&[id, Uuid::new_v4(), id]).unwrap_err();
        assert_eq!(err, DomainError::DuplicateApprovedItem(id));
        assert!(ensure_unique_approved_items(&[Uuid::new_v4(), Uuid::new_v4()]).is_ok());
    }

    #[test]
    fn test_locked_orders_reject_field_updates() {
        for status in [DeliveryStatus::Delivered, DeliveryStatus::Cancelled] {
            assert_eq!(
                ensure_order_mutable(status, None, true),
                Err(DomainError::OrderLocked(status))
            );
            assert!(ensure_order_mutable(status, Some(DeliveryStatus::InTransit), false).is_err());
        }
    }

    #[test]
    fn test_delivered_order_accepts_status_only_cancellation() {
        let cancel = Some(DeliveryStatus::Cancelled);
        assert!(ensure_order_mutable(DeliveryStatus::Delivered, cancel, false).is_ok());
        assert_eq!(
            ensure_order_mutable(DeliveryStatus::Delivered, cancel, true),
            Err(DomainError::OrderLocked(DeliveryStatus::Delivered))
        );
        assert!(check_transition(
            DeliveryStatus::Delivered,
            DeliveryStatus::Cancelled,
            TransitionPolicy::Strict
        )
        .is_ok());
    }

    #[test]
    fn test_cancelled_order_stays_locked_when_cancelled_again() {
        let cancel = Some(DeliveryStatus::Cancelled);
        for fields_changed in [false, true] {
            assert_eq!(
                ensure_order_mutable(DeliveryStatus::Cancelled, cancel, fields_changed),
                Err(DomainError::OrderLocked(DeliveryStatus::Cancelled))
            );
        }
    }

    #[test]
    fn test_open_orders_accept_updates() {
        assert!(ensure_order_mutable(DeliveryStatus::Draft, None, true).is_ok());
        assert!(
            ensure_order_mutable(DeliveryStatus::InTransit, Some(DeliveryStatus::Delivered), true)
                .is_ok()
        );
        assert!(
            ensure_order_mutable(DeliveryStatus::Approved, Some(DeliveryStatus::Cancelled), true)
                .is_ok()
        );
    }

    #[test]
    fn test_creation_states() {
        assert!(DeliveryStatus::Draft.is_pre_transit());
        assert!(DeliveryStatus::Approved.is_pre_transit());
        assert!(!DeliveryStatus::InTransit.is_pre_transit());
    }

    #[test]
    fn test_order_number_format() {
        assert_eq!(format_order_number(2024, 42), "DO-2024-000042");
    }
}

// ============================================================================
// Property Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    fn money_strategy() -> impl Strategy<Value = Decimal> {
        (0i64..10_000_000).prop_map(|cents| Decimal::new(cents, 2))
    }

    fn quantity_strategy() -> impl Strategy<Value = Decimal> {
        (1i64..1_000_000).prop_map(|thousandths| Decimal::new(thousandths, 3))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// An accepted delivery quantity never exceeds the approved quantity
        #[test]
        fn prop_accepted_quantity_within_approved(
            requested in quantity_strategy(),
            approved in quantity_strategy(),
        ) {
            let result = validate_delivery_quantity(requested, approved);
            prop_assert_eq!(result.is_ok(), requested <= approved);
        }

        /// Total cost equals the sum of components after any partial update
        #[test]
        fn prop_total_cost_after_update(
            delivery in money_strategy(),
            insurance in money_strategy(),
            handling in money_strategy(),
            new_delivery in proptest::option::of(money_strategy()),
            new_insurance in proptest::option::of(money_strategy()),
            new_handling in proptest::option::of(money_strategy()),
        ) {
            let costs = DeliveryCosts::new(delivery, insurance, handling)
                .with_updates(new_delivery, new_insurance, new_handling);
            prop_assert_eq!(
                costs.total(),
                costs.delivery_cost + costs.insurance_cost + costs.handling_cost
            );
        }

        /// Listing any id twice is rejected
        #[test]
        fn prop_duplicates_always_detected(count in 1usize..20, dup_index in 0usize..20) {
            let mut ids: Vec<Uuid> = (0..count).map(|_| Uuid::new_v4()).collect();
            prop_assert!(ensure_unique_approved_items(&ids).is_ok());
            ids.push(ids[dup_index % count]);
            prop_assert!(ensure_unique_approved_items(&ids).is_err());
        }
    }
}
