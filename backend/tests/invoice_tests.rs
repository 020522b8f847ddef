//! Invoice generation tests
//!
//! Pricing delivered items into an invoice:
//! - unit price comes from the item's unit value, else the catalog cost
//! - lines are rounded to two decimals before summing
//! - total = subtotal + tax + delivery charges
//! - overdue is derived from the due date at read time

use chrono::NaiveDate;
use proptest::prelude::*;
use rust_decimal::Decimal;
use shared::{
    default_tax_rate, format_invoice_number, price_line, round_money, validate_due_date,
    validate_tax_rate, InvoiceStatus, InvoiceTotals, LineAmounts,
};
use std::str::FromStr;

// Helper to create Decimal from string
fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    /// 5 @ 100 and 3 @ 200 at 18% with 50 delivery charges
    #[test]
    fn test_reference_invoice_totals() {
        let lines = vec![
            price_line(Some(dec("100")), None, dec("5"), dec("0.18")).unwrap(),
            price_line(Some(dec("200")), None, dec("3"), dec("0.18")).unwrap(),
        ];
        let totals = InvoiceTotals::from_lines(&lines, dec("50"));

        assert_eq!(totals.subtotal, dec("1100"));
        assert_eq!(totals.tax_amount, dec("198"));
        assert_eq!(totals.delivery_charges, dec("50"));
        assert_eq!(totals.total_amount, dec("1348"));
    }

    #[test]
    fn test_unit_value_wins_over_catalog_cost() {
        let line = price_line(Some(dec("120")), Some(dec("80")), dec("2"), Decimal::ZERO).unwrap();
        assert_eq!(line.unit_price, dec("120"));
        assert_eq!(line.line_total, dec("240"));
    }

    #[test]
    fn test_catalog_cost_used_without_unit_value() {
        let line = price_line(None, Some(dec("80")), dec("2"), dec("0.18")).unwrap();
        assert_eq!(line.unit_price, dec("80"));
        assert_eq!(line.line_total, dec("160"));
        assert_eq!(line.tax_amount, dec("28.80"));
    }

    #[test]
    fn test_unpriced_item_rejected() {
        assert!(price_line(None, None, dec("2"), dec("0.18")).is_err());
        assert!(price_line(Some(dec("-1")), None, dec("2"), dec("0.18")).is_err());
    }

    #[test]
    fn test_line_amounts_rounded_half_away_from_zero() {
        // 3 x 0.335 = 1.005
        let line = price_line(Some(dec("0.335")), None, dec("3"), dec("0.10")).unwrap();
        assert_eq!(line.line_total, dec("1.01"));
        assert_eq!(line.tax_amount, dec("0.10"));
    }

    #[test]
    fn test_tax_rate_bounds() {
        assert!(validate_tax_rate(Decimal::ZERO).is_ok());
        assert!(validate_tax_rate(Decimal::ONE).is_ok());
        assert!(validate_tax_rate(dec("1.01")).is_err());
        assert!(validate_tax_rate(dec("-0.01")).is_err());
        assert_eq!(default_tax_rate(), dec("0.18"));
    }

    #[test]
    fn test_due_date_not_before_invoice_date() {
        assert!(validate_due_date(date(2024, 5, 1), date(2024, 5, 31)).is_ok());
        assert!(validate_due_date(date(2024, 5, 1), date(2024, 5, 1)).is_ok());
        assert!(validate_due_date(date(2024, 5, 1), date(2024, 4, 30)).is_err());
    }

    #[test]
    fn test_invoice_number_format() {
        assert_eq!(format_invoice_number(2024, 7), "INV-2024-000007");
    }

    #[test]
    fn test_overdue_derived_for_open_invoices() {
        let due = date(2024, 5, 31);
        let today = date(2024, 6, 1);
        assert_eq!(InvoiceStatus::Sent.effective(due, today), InvoiceStatus::Overdue);
        assert_eq!(InvoiceStatus::Draft.effective(due, today), InvoiceStatus::Overdue);
        assert_eq!(InvoiceStatus::Paid.effective(due, today), InvoiceStatus::Paid);
        assert_eq!(InvoiceStatus::Cancelled.effective(due, today), InvoiceStatus::Cancelled);
    }

    #[test]
    fn test_not_overdue_on_due_date() {
        let due = date(2024, 5, 31);
        assert_eq!(InvoiceStatus::Sent.effective(due, due), InvoiceStatus::Sent);
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("sent".parse::<InvoiceStatus>().unwrap(), InvoiceStatus::Sent);
        assert!("settled".parse::<InvoiceStatus>().is_err());
    }
}

// ============================================================================
// Property Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    fn price_strategy() -> impl Strategy<Value = Decimal> {
        (1i64..10_000_000).prop_map(|cents| Decimal::new(cents, 2))
    }

    fn quantity_strategy() -> impl Strategy<Value = Decimal> {
        (1i64..100_000).prop_map(|hundredths| Decimal::new(hundredths, 2))
    }

    fn tax_strategy() -> impl Strategy<Value = Decimal> {
        (0i64..=100).prop_map(|percent| Decimal::new(percent, 2))
    }

    fn lines_strategy() -> impl Strategy<Value = Vec<LineAmounts>> {
        (
            proptest::collection::vec((price_strategy(), quantity_strategy()), 1..20),
            tax_strategy(),
        )
            .prop_map(|(items, tax)| {
                items
                    .into_iter()
                    .map(|(price, qty)| price_line(Some(price), None, qty, tax).unwrap())
                    .collect()
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Header total is always the sum of its parts
        #[test]
        fn prop_total_is_sum_of_parts(lines in lines_strategy(), charges in price_strategy()) {
            let totals = InvoiceTotals::from_lines(&lines, charges);
            prop_assert_eq!(
                totals.total_amount,
                totals.subtotal + totals.tax_amount + totals.delivery_charges
            );
            let line_sum: Decimal = lines.iter().map(|l| l.line_total).sum();
            prop_assert_eq!(totals.subtotal, line_sum);
        }

        /// Every line amount carries at most two decimals
        #[test]
        fn prop_line_amounts_are_money(
            price in price_strategy(),
            qty in quantity_strategy(),
            tax in tax_strategy(),
        ) {
            let line = price_line(Some(price), None, qty, tax).unwrap();
            prop_assert_eq!(round_money(line.line_total), line.line_total);
            prop_assert_eq!(round_money(line.tax_amount), line.tax_amount);
            prop_assert!(line.tax_amount <= line.line_total);
        }

        /// Closed invoices never read as overdue
        #[test]
        fn prop_closed_never_overdue(days_late in 0i64..3650) {
            let due = date(2024, 1, 1);
            let today = due + chrono::Duration::days(days_late);
            prop_assert_eq!(InvoiceStatus::Paid.effective(due, today), InvoiceStatus::Paid);
            prop_assert_eq!(
                InvoiceStatus::Cancelled.effective(due, today),
                InvoiceStatus::Cancelled
            );
        }
    }
}
