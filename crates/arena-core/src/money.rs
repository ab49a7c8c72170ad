//! Fixed-precision point arithmetic.
//!
//! Every monetary value is rounded to [`POINT_SCALE`] fractional digits before
//! it is compared or stored, so drift cannot build up across long ledgers.

use rust_decimal::{Decimal, RoundingStrategy};

/// Number of fractional digits kept for point balances.
pub const POINT_SCALE: u32 = 6;

/// Tolerance used when comparing a balance against a required amount.
pub const POINT_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, POINT_SCALE);

/// Round a point value to the ledger precision.
pub fn round_points(value: Decimal) -> Decimal {
    value
        .round_dp_with_strategy(POINT_SCALE, RoundingStrategy::MidpointAwayFromZero)
        .normalize()
}

/// True when `available` covers `required` within [`POINT_EPSILON`].
pub fn covers(available: Decimal, required: Decimal) -> bool {
    round_points(available) + POINT_EPSILON >= round_points(required)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_points_truncates_to_six_digits() {
        assert_eq!(round_points(dec!(1.0000004)), dec!(1));
        assert_eq!(round_points(dec!(1.0000005)), dec!(1.000001));
        assert_eq!(round_points(dec!(-2.1234565)), dec!(-2.123457));
    }

    #[test]
    fn test_repeated_small_credits_do_not_drift() {
        let mut balance = Decimal::ZERO;
        for _ in 0..10_000 {
            balance = round_points(balance + dec!(0.1));
        }
        assert_eq!(balance, dec!(1000));
    }

    #[test]
    fn test_covers_absorbs_rounding_noise_only() {
        assert!(covers(dec!(9.9999995), dec!(10)));
        assert!(covers(dec!(10), dec!(10)));
        assert!(!covers(dec!(9.99), dec!(10)));
    }
}
