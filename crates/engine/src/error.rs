use rust_decimal::Decimal;
use spot_arb_core::{ExchangeError, OrderFill};
use thiserror::Error;

/// Failures inside the engine's own computations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// The supplied levels cannot cover the requested amount.
    #[error("insufficient depth: requested {requested}, levels cover {available}")]
    InsufficientDepth { requested: Decimal, available: Decimal },

    /// Plan does not form a closed loop over its home asset.
    #[error("invalid chain: {0}")]
    InvalidChain(String),

    /// No market directly pairs the two assets.
    #[error("no direct market between {from} and {to}")]
    MissingMarket { from: String, to: String },

    /// Symbol is not listed in the exchange rules.
    #[error("unknown symbol {0}")]
    UnknownSymbol(String),

    /// Step size is not a power of ten.
    #[error("step size {step} of {symbol} is not a power of ten")]
    InvalidStep { symbol: String, step: Decimal },

    /// Snapshot lacks a book the computation needs.
    #[error("no order book for {0}")]
    MissingBook(String),

    /// Plan disagrees with exchange rules or carries an unusable amount.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// Walk requested for a non-positive amount.
    #[error("amount must be positive, got {0}")]
    InvalidAmount(Decimal),
}

impl EngineError {
    pub fn missing_market(from: &str, to: &str) -> Self {
        Self::MissingMarket {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn invalid_chain(reason: impl Into<String>) -> Self {
        Self::InvalidChain(reason.into())
    }

    pub fn invalid_plan(reason: impl Into<String>) -> Self {
        Self::InvalidPlan(reason.into())
    }
}

/// Failures that end an execution attempt as a whole.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionError {
    /// The exchange throttled a leg. Trading must stop.
    #[error("rate limited while submitting {symbol}: {source}")]
    RateLimited {
        symbol: String,
        #[source]
        source: ExchangeError,
        /// Fills of legs that traded before the halt.
        fills: Vec<OrderFill>,
    },
}

impl ExecutionError {
    /// Fills that reached the exchange despite the failure.
    #[must_use]
    pub fn fills(&self) -> &[OrderFill] {
        match self {
            Self::RateLimited { fills, .. } => fills,
        }
    }
}
