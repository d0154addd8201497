//! Price-impact walk through order-book levels.
//!
//! [`walk_book`] consumes levels best-to-worst until the requested amount is
//! covered. The amount is either a base quantity (selling into bids, or
//! valuing a holding) or a quote amount to spend (buying from asks).

use crate::error::EngineError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spot_arb_core::{PriceLevel, Side};

/// Unit the walked amount is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Denomination {
    /// Amount is a base-asset quantity.
    Base,
    /// Amount is quote asset to spend.
    Quote,
}

/// Result of walking a book for one amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookWalk {
    /// Consumed levels as (price, base quantity), best first. The last one may be partial.
    pub fills: Vec<PriceLevel>,
    pub denomination: Denomination,
    /// Base quantity consumed.
    pub base_amount: Decimal,
    /// Quote value of the consumed quantity.
    pub quote_amount: Decimal,
}

impl BookWalk {
    /// Quantity-weighted average price, quote per base.
    #[must_use]
    pub fn average_price(&self) -> Decimal {
        if self.base_amount.is_zero() {
            return Decimal::ZERO;
        }
        self.quote_amount / self.base_amount
    }

    /// Conversion rate for the walked amount.
    ///
    /// Quote per base for a base-denominated walk. Base per quote for a
    /// quote-denominated walk, so `amount * price()` is always the amount
    /// received on the other side.
    #[must_use]
    pub fn price(&self) -> Decimal {
        match self.denomination {
            Denomination::Base => self.average_price(),
            Denomination::Quote if self.quote_amount.is_zero() => Decimal::ZERO,
            Denomination::Quote => self.base_amount / self.quote_amount,
        }
    }

    /// Most conservative consumed price for a taker on `side`.
    ///
    /// Highest for a buy, lowest for a sell. A limit order at this price
    /// crosses every consumed level.
    #[must_use]
    pub fn limit_price(&self, side: Side) -> Decimal {
        let prices = self.fills.iter().map(|level| level.price);
        match side {
            Side::Buy => prices.max(),
            Side::Sell => prices.min(),
        }
        .unwrap_or(Decimal::ZERO)
    }
}

/// Walks `levels` (best first) until `amount` is covered.
///
/// Levels with a non-positive price or quantity are skipped.
///
/// # Errors
///
/// - [`EngineError::InvalidAmount`] if `amount` is not positive.
/// - [`EngineError::InsufficientDepth`] if the levels cannot cover `amount`.
pub fn walk_book(
    levels: &[PriceLevel],
    amount: Decimal,
    denomination: Denomination,
) -> Result<BookWalk, EngineError> {
    if amount <= Decimal::ZERO {
        return Err(EngineError::InvalidAmount(amount));
    }

    let mut remaining = amount;
    let mut fills = Vec::new();
    let mut base_amount = Decimal::ZERO;
    let mut quote_amount = Decimal::ZERO;

    for level in levels {
        if level.price <= Decimal::ZERO || level.quantity <= Decimal::ZERO {
            continue;
        }

        let capacity = match denomination {
            Denomination::Base => level.quantity,
            Denomination::Quote => level.quantity * level.price,
        };

        if capacity >= remaining {
            let quantity = match denomination {
                Denomination::Base => remaining,
                Denomination::Quote => remaining / level.price,
            };
            fills.push(PriceLevel::new(level.price, quantity));
            base_amount += quantity;
            quote_amount += quantity * level.price;
            return Ok(BookWalk {
                fills,
                denomination,
                base_amount,
                quote_amount,
            });
        }

        fills.push(*level);
        base_amount += level.quantity;
        quote_amount += level.quantity * level.price;
        remaining -= capacity;
    }

    Err(EngineError::InsufficientDepth {
        requested: amount,
        available: amount - remaining,
    })
}
