//! Payment ledger tests
//!
//! Payments against an invoice balance:
//! - 0 <= paid_amount <= total_amount at all times
//! - a payment that would overpay is rejected and changes nothing
//! - paid means settled, and a settled balance means paid
//! - cancelled invoices accept nothing, overdue is never written

use proptest::prelude::*;
use rust_decimal::Decimal;
use shared::{
    apply_payment, check_invoice_status_change, outstanding_amount, validate_payment_amount,
    validate_payment_reference, DomainError, InvoiceStatus, PaymentMethod,
};
use std::str::FromStr;

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
    fn test_full_payment_settles_invoice() {
        let outcome = apply_payment(Decimal::ZERO, dec("1348"), dec("1348")).unwrap();
        assert_eq!(outcome.paid_amount, dec("1348"));
        assert_eq!(outcome.outstanding, Decimal::ZERO);
        assert!(outcome.settled);
    }

    #[test]
    fn test_overpayment_rejected() {
        let err = apply_payment(Decimal::ZERO, dec("1348"), dec("1400")).unwrap_err();
        assert_eq!(
            err,
            DomainError::Overpayment {
                amount: dec("1400"),
                outstanding: dec("1348"),
            }
        );
    }

    #[test]
    fn test_partial_payments_accumulate() {
        let first = apply_payment(Decimal::ZERO, dec("1348"), dec("500")).unwrap();
        assert!(!first.settled);
        assert_eq!(first.outstanding, dec("848"));

        let second = apply_payment(first.paid_amount, dec("1348"), dec("848")).unwrap();
        assert!(second.settled);
        assert_eq!(second.paid_amount, dec("1348"));
    }

    #[test]
    fn test_payment_amount_rules() {
        assert!(validate_payment_amount(dec("0.01")).is_ok());
        assert!(validate_payment_amount(Decimal::ZERO).is_err());
        assert!(validate_payment_amount(dec("-10")).is_err());
        assert!(validate_payment_amount(dec("10.005")).is_err());
    }

    #[test]
    fn test_outstanding_never_negative() {
        assert_eq!(outstanding_amount(dec("100"), dec("40")), dec("60"));
        assert_eq!(outstanding_amount(dec("100"), dec("120")), Decimal::ZERO);
    }

    #[test]
    fn test_overdue_cannot_be_written() {
        assert!(check_invoice_status_change(InvoiceStatus::Sent, InvoiceStatus::Overdue).is_err());
    }

    #[test]
    fn test_cancelled_invoice_is_closed() {
        assert_eq!(
            check_invoice_status_change(InvoiceStatus::Cancelled, InvoiceStatus::Sent),
            Err(DomainError::InvoiceClosed(InvoiceStatus::Cancelled))
        );
    }

    #[test]
    fn test_paid_invoice_cannot_reopen() {
        assert!(check_invoice_status_change(InvoiceStatus::Paid, InvoiceStatus::Sent).is_err());
        assert!(check_invoice_status_change(InvoiceStatus::Paid, InvoiceStatus::Cancelled).is_err());
        assert!(check_invoice_status_change(InvoiceStatus::Paid, InvoiceStatus::Paid).is_ok());
    }

    #[test]
    fn test_open_invoice_moves_freely() {
        assert!(check_invoice_status_change(InvoiceStatus::Draft, InvoiceStatus::Sent).is_ok());
        assert!(check_invoice_status_change(InvoiceStatus::Sent, InvoiceStatus::Paid).is_ok());
        assert!(check_invoice_status_change(InvoiceStatus::Pending, InvoiceStatus::Cancelled).is_ok());
    }

    #[test]
    fn test_payment_method_parsing() {
        assert_eq!("bank_transfer".parse::<PaymentMethod>().unwrap(), PaymentMethod::BankTransfer);
        assert!("bitcoin".parse::<PaymentMethod>().is_err());
    }

    #[test]
    fn test_payment_reference_length() {
        assert!(validate_payment_reference("TRX-2024-0001").is_ok());
        assert!(validate_payment_reference(&"R".repeat(101)).is_err());
        assert!(validate_payment_reference("   ").is_err());
    }
}

// ============================================================================
// Property Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    fn cents_strategy(max: i64) -> impl Strategy<Value = Decimal> {
        (1i64..max).prop_map(|cents| Decimal::new(cents, 2))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Any sequence of payments keeps 0 <= paid <= total, and settled iff paid == total
        #[test]
        fn prop_paid_amount_bounded(
            total in cents_strategy(10_000_000),
            payments in proptest::collection::vec(cents_strategy(5_000_000), 1..20),
        ) {
            let mut paid = Decimal::ZERO;
            for amount in payments {
                match apply_payment(paid, total, amount) {
                    Ok(outcome) => {
                        prop_assert!(outcome.paid_amount <= total);
                        prop_assert_eq!(outcome.settled, outcome.paid_amount >= total);
                        prop_assert_eq!(outcome.outstanding, total - outcome.paid_amount);
                        paid = outcome.paid_amount;
                    }
                    Err(DomainError::Overpayment { outstanding, .. }) => {
                        prop_assert!(paid + amount > total);
                        prop_assert_eq!(outstanding, total - paid);
                    }
                    Err(other) => prop_assert!(false, "unexpected error {:?}", other),
                }
                prop_assert!(paid >= Decimal::ZERO && paid <= total);
            }
        }

        /// Paying exactly the outstanding balance always settles
        #[test]
        fn prop_exact_balance_settles(total in cents_strategy(10_000_000), share in 0u32..100) {
            let paid = (total * Decimal::new(i64::from(share), 2)).round_dp(2);
            prop_assume!(paid < total);
            let outcome = apply_payment(paid, total, outstanding_amount(total, paid)).unwrap();
            prop_assert!(outcome.settled);
            prop_assert_eq!(outcome.paid_amount, total);
        }
    }
}
