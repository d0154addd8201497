//! Market, book and order types shared by the engine and exchange adapters.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ===== Sides and Levels =====

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One price level. Wire format is a `[price, quantity]` pair of strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(Decimal, Decimal)", into = "(Decimal, Decimal)")]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

impl PriceLevel {
    #[must_use]
    pub const fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }
}

impl From<(Decimal, Decimal)> for PriceLevel {
    fn from((price, quantity): (Decimal, Decimal)) -> Self {
        Self { price, quantity }
    }
}

impl From<PriceLevel> for (Decimal, Decimal) {
    fn from(level: PriceLevel) -> Self {
        (level.price, level.quantity)
    }
}

/// Depth snapshot for one symbol.
///
/// Bids are sorted descending and asks ascending, as delivered by the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBook {
    pub symbol: String,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub update_id: u64,
    pub received_at: DateTime<Utc>,
}

impl OrderBook {
    #[must_use]
    pub fn new(symbol: impl Into<String>, bids: Vec<PriceLevel>, asks: Vec<PriceLevel>) -> Self {
        Self {
            symbol: symbol.into(),
            bids,
            asks,
            update_id: 0,
            received_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    #[must_use]
    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }

    /// Levels a taker on `side` consumes: asks for a buy, bids for a sell.
    #[must_use]
    pub fn levels_for(&self, side: Side) -> &[PriceLevel] {
        match side {
            Side::Buy => &self.asks,
            Side::Sell => &self.bids,
        }
    }
}

// ===== Markets =====

/// A tradeable pair as declared by a plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Market {
    pub symbol: String,
    pub base: String,
    pub quote: String,
    /// Quantity precision in decimal places.
    pub decimals: u32,
    #[serde(default = "default_exchange")]
    pub exchange: String,
}

fn default_exchange() -> String {
    "binance".to_string()
}

impl Market {
    #[must_use]
    pub fn new(base: &str, quote: &str, decimals: u32) -> Self {
        Self {
            symbol: format!("{base}{quote}"),
            base: base.to_string(),
            quote: quote.to_string(),
            decimals,
            exchange: default_exchange(),
        }
    }

    /// Returns true if the market trades `a` against `b` in either orientation.
    #[must_use]
    pub fn connects(&self, a: &str, b: &str) -> bool {
        (self.base == a && self.quote == b) || (self.base == b && self.quote == a)
    }
}

/// Trading rules the exchange publishes for a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketRules {
    pub base: String,
    pub quote: String,
    /// Minimum quantity increment (lot size step).
    pub step_size: Decimal,
}

impl MarketRules {
    #[must_use]
    pub fn new(base: &str, quote: &str, step_size: Decimal) -> Self {
        Self {
            base: base.to_string(),
            quote: quote.to_string(),
            step_size,
        }
    }

    /// Decimal places implied by the step size.
    ///
    /// Returns `None` unless the step is a power of ten no greater than one
    /// (`1`, `0.1`, `0.01`, ...).
    #[must_use]
    pub fn decimals(&self) -> Option<u32> {
        decimals_from_step(self.step_size)
    }

    /// Rounds `quantity` down to a whole number of steps.
    #[must_use]
    pub fn round_to_step(&self, quantity: Decimal) -> Decimal {
        if self.step_size <= Decimal::ZERO {
            return quantity;
        }
        (quantity / self.step_size).floor() * self.step_size
    }
}

/// Decimal places of a power-of-ten step size, or `None` for any other step.
#[must_use]
pub fn decimals_from_step(step: Decimal) -> Option<u32> {
    let step = step.normalize();
    if step <= Decimal::ZERO || step > Decimal::ONE || step.mantissa() != 1 {
        return None;
    }
    Some(step.scale())
}

// ===== Orders =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Limit,
    Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    /// Immediate-or-cancel: fill what crosses now, cancel the rest.
    Ioc,
    Fok,
    Gtc,
}

/// Order as submitted to an exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    /// Base-asset quantity.
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub time_in_force: Option<TimeInForce>,
}

impl OrderRequest {
    /// Limit IOC order at `price`.
    #[must_use]
    pub fn limit_ioc(symbol: impl Into<String>, side: Side, quantity: Decimal, price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            quantity,
            price: Some(price),
            time_in_force: Some(TimeInForce::Ioc),
        }
    }

    #[must_use]
    pub fn market(symbol: impl Into<String>, side: Side, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            time_in_force: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Expired,
    Rejected,
}

/// A single execution against the book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    pub price: Decimal,
    pub quantity: Decimal,
    pub commission: Decimal,
    pub commission_asset: String,
}

/// Exchange acknowledgement of a submitted order, with its fills.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFill {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub status: OrderStatus,
    pub requested_quantity: Decimal,
    pub executed_quantity: Decimal,
    pub fills: Vec<Fill>,
    pub transact_time: DateTime<Utc>,
}

impl OrderFill {
    /// Quote amount exchanged across all fills.
    #[must_use]
    pub fn quote_amount(&self) -> Decimal {
        self.fills.iter().map(|f| f.price * f.quantity).sum()
    }

    /// Executed over requested quantity, in `[0, 1]`.
    #[must_use]
    pub fn fill_ratio(&self) -> Decimal {
        if self.requested_quantity.is_zero() {
            return Decimal::ZERO;
        }
        self.executed_quantity / self.requested_quantity
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.executed_quantity >= self.requested_quantity && !self.requested_quantity.is_zero()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.executed_quantity.is_zero()
    }
}
