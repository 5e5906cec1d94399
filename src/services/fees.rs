//! Platform fee split and consumption tax estimation. Pure functions, no I/O.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Marketplace cut of each sale, in percent.
pub const DEFAULT_PLATFORM_FEE_PERCENT: Decimal = dec!(7.5);

/// Standard consumption tax rate applied when the destination state is
/// unrecognized or missing.
pub const STANDARD_TAX_RATE: Decimal = dec!(0.17);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSplit {
    pub partner_amount: Decimal,
    pub platform_fee: Decimal,
}

/// Splits a line total between the partner and the marketplace.
///
/// Each component is rounded half-up to 2 decimal places independently, so
/// the pair may drift from `line_total` by up to one cent. That drift is the
/// long-observed settlement behavior and is kept for compatibility; callers
/// must not assume exact reconciliation.
pub fn split_amount(line_total: Decimal, fee_rate_percent: Decimal) -> FeeSplit {
    let hundred = dec!(100);
    let platform_fee = (line_total * fee_rate_percent / hundred)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let partner_amount = (line_total * (hundred - fee_rate_percent) / hundred)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);

    FeeSplit {
        partner_amount,
        platform_fee,
    }
}

/// Splits a line total at the default platform rate.
pub fn split_default(line_total: Decimal) -> FeeSplit {
    split_amount(line_total, DEFAULT_PLATFORM_FEE_PERCENT)
}

/// Consumption tax rate for a destination state code.
pub fn tax_rate_for_state(state: &str) -> Decimal {
    match state.trim().to_ascii_uppercase().as_str() {
        "SP" | "MG" | "PR" => dec!(0.18),
        "RJ" => dec!(0.20),
        "RS" | "SC" => dec!(0.17),
        "BA" | "PE" | "CE" | "MA" | "PB" | "PI" | "RN" | "SE" | "AL" => dec!(0.19),
        "AM" | "PA" | "RO" | "RR" | "AP" | "AC" | "TO" => dec!(0.19),
        "DF" | "GO" | "MT" | "MS" | "ES" => dec!(0.17),
        _ => STANDARD_TAX_RATE,
    }
}

/// Estimated consumption tax for an amount shipped to a state.
pub fn estimate_tax(amount: Decimal, state: &str) -> Decimal {
    (amount * tax_rate_for_state(state))
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test]
    fn splits_the_reference_sale() {
        let split = split_default(dec!(100.00));
        assert_eq!(split.partner_amount, dec!(92.50));
        assert_eq!(split.platform_fee, dec!(7.50));
    }

    #[test]
    fn rounding_may_drift_one_cent_from_the_total() {
        // 10.01 * 7.5% = 0.75075 -> 0.75; 10.01 * 92.5% = 9.25925 -> 9.26
        let split = split_default(dec!(10.01));
        assert_eq!(split.platform_fee, dec!(0.75));
        assert_eq!(split.partner_amount, dec!(9.26));
        // components exceed the line total by exactly zero here; drift cases
        // are covered by the property below
        assert!((split.partner_amount + split.platform_fee - dec!(10.01)).abs() <= dec!(0.01));
    }

    #[test]
    fn zero_total_splits_to_zero() {
        let split = split_default(Decimal::ZERO);
        assert_eq!(split.partner_amount, Decimal::ZERO);
        assert_eq!(split.platform_fee, Decimal::ZERO);
    }

    #[test_case("SP", dec!(0.18); "sao paulo")]
    #[test_case("rj", dec!(0.20); "rio, lowercase input")]
    #[test_case(" BA ", dec!(0.19); "bahia with whitespace")]
    #[test_case("XX", STANDARD_TAX_RATE; "unknown code")]
    #[test_case("", STANDARD_TAX_RATE; "missing code")]
    fn tax_table_lookup(state: &str, expected: Decimal) {
        assert_eq!(tax_rate_for_state(state), expected);
    }

    #[test]
    fn tax_estimate_rounds_to_cents() {
        assert_eq!(estimate_tax(dec!(10.01), "SP"), dec!(1.80));
    }

    proptest! {
        #[test]
        fn split_components_round_independently_with_bounded_drift(
            cents in 0i64..100_000_000,
            rate_tenths in 0u32..=1000,
        ) {
            let total = Decimal::new(cents, 2);
            let rate = Decimal::new(rate_tenths as i64, 1);

            let split = split_amount(total, rate);

            // each side is a 2dp rounding of its exact share
            let exact_fee = total * rate / dec!(100);
            let exact_partner = total * (dec!(100) - rate) / dec!(100);
            prop_assert!((split.platform_fee - exact_fee).abs() <= dec!(0.005));
            prop_assert!((split.partner_amount - exact_partner).abs() <= dec!(0.005));

            // combined drift from the line total never exceeds one cent
            let drift = (split.partner_amount + split.platform_fee - total).abs();
            prop_assert!(drift <= dec!(0.01));
        }
    }
}
