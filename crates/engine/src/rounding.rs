//! Quantity quantization to a fixed number of decimal places.
//!
//! Execution quantities always use [`RoundingMode::Down`]: a floored quantity
//! is accepted by the exchange and never spends more than is held.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundingMode {
    /// Toward negative infinity.
    Down,
    /// Toward positive infinity.
    Up,
    /// Half to even (banker's rounding).
    Even,
}

impl RoundingMode {
    const fn strategy(self) -> RoundingStrategy {
        match self {
            Self::Down => RoundingStrategy::ToNegativeInfinity,
            Self::Up => RoundingStrategy::ToPositiveInfinity,
            Self::Even => RoundingStrategy::MidpointNearestEven,
        }
    }
}

#[must_use]
pub fn round_quantity(value: Decimal, decimals: u32, mode: RoundingMode) -> Decimal {
    value.round_dp_with_strategy(decimals, mode.strategy())
}

#[must_use]
pub fn round_down(value: Decimal, decimals: u32) -> Decimal {
    round_quantity(value, decimals, RoundingMode::Down)
}

#[must_use]
pub fn round_up(value: Decimal, decimals: u32) -> Decimal {
    round_quantity(value, decimals, RoundingMode::Up)
}

#[must_use]
pub fn round_even(value: Decimal, decimals: u32) -> Decimal {
    round_quantity(value, decimals, RoundingMode::Even)
}
