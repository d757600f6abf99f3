use anyhow::{anyhow, Result};
use rust_decimal::prelude::*;
use rust_decimal::{Decimal, RoundingStrategy};

/// Breakdown of a native-asset trade amount into the commission leg and the
/// amount forwarded to the swap instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeAmounts {
    pub total: Decimal,
    pub commission_rate: Decimal,
    pub commission: Decimal,
    pub adjusted: Decimal,
}

/// Commission is charged on the native leg only: when buying it is deducted
/// from the input before it reaches the swap instruction, when selling it is
/// taken from the computed native output. Callers pick which side to apply
/// this to; the arithmetic is the same.
pub fn split_commission(total: Decimal, rate: Decimal) -> TradeAmounts {
    let commission = total * rate;
    TradeAmounts {
        total,
        commission_rate: rate,
        commission,
        adjusted: total - commission,
    }
}

/// Convert a display amount into the chain's smallest unit. This is the only
/// place rounding happens: half-up, once, at the final integer conversion.
pub fn to_atomic(amount: Decimal, decimals: u32) -> Result<u64> {
    let factor = Decimal::from_u128(10u128.pow(decimals))
        .ok_or_else(|| anyhow!("unsupported decimal count: {decimals}"))?;
    let scaled = (amount * factor).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    scaled
        .to_u64()
        .ok_or_else(|| anyhow!("amount {amount} does not fit in {decimals}-decimal atomic units"))
}

pub fn from_atomic(raw: u64, decimals: u32) -> Decimal {
    Decimal::from_i128_with_scale(raw as i128, decimals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn ten_sol_with_commission() {
        let amounts = split_commission(dec!(10), dec!(0.01));

        assert_eq!(amounts.total, dec!(10));
        assert_eq!(amounts.commission_rate, dec!(0.01));
        assert_eq!(amounts.commission, dec!(0.1));
        assert_eq!(amounts.adjusted, dec!(9.9));
    }

    #[test]
    fn commission_of_zero_rate_is_zero() {
        let amounts = split_commission(dec!(3.5), Decimal::ZERO);
        assert_eq!(amounts.commission, Decimal::ZERO);
        assert_eq!(amounts.adjusted, dec!(3.5));
    }

    #[test]
    fn atomic_conversion_rounds_half_up_once() {
        // 1.5 lamports rounds up, 1.4 rounds down
        assert_eq!(to_atomic(dec!(0.0000000015), 9).unwrap(), 2);
        assert_eq!(to_atomic(dec!(0.0000000014), 9).unwrap(), 1);
        // commission on a 9.9 SOL leg lands exactly
        assert_eq!(to_atomic(dec!(9.9), 9).unwrap(), 9_900_000_000);
    }

    #[test]
    fn atomic_round_trip_is_exact_for_all_supported_decimals() {
        for decimals in 0..=18u32 {
            for raw in [0u64, 1, 7, 999, 123_456_789, 10u64.pow(12) + 3] {
                let display = from_atomic(raw, decimals);
                assert_eq!(
                    to_atomic(display, decimals).unwrap(),
                    raw,
                    "round trip failed for raw={raw} decimals={decimals}"
                );
            }
        }
    }

    #[test]
    fn rejects_amounts_that_overflow_atomic_units() {
        assert!(to_atomic(dec!(20000000000), 18).is_err());
    }
}
