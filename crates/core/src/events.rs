//! Inbound stream events.
//!
//! The feed delivers raw JSON frames. They are decoded once at the boundary
//! into [`StreamEvent`] so the rest of the system only sees typed values.

use crate::error::ExchangeError;
use crate::market::{OrderBook, PriceLevel};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Decoded message from the market/account stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamEvent {
    BookUpdate(BookUpdate),
    ErrorEvent { message: String },
    AccountUpdate(AccountUpdate),
}

/// Partial depth snapshot for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookUpdate {
    pub symbol: String,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub update_id: u64,
    pub received_at: DateTime<Utc>,
}

impl BookUpdate {
    #[must_use]
    pub fn into_book(self) -> OrderBook {
        OrderBook {
            symbol: self.symbol,
            bids: self.bids,
            asks: self.asks,
            update_id: self.update_id,
            received_at: self.received_at,
        }
    }
}

/// Free balances after an account change. Zero balances are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountUpdate {
    pub balances: HashMap<String, Decimal>,
    pub received_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawEnvelope {
    stream: String,
    data: RawDepth,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDepth {
    #[serde(default)]
    last_update_id: u64,
    bids: Vec<PriceLevel>,
    asks: Vec<PriceLevel>,
}

#[derive(Deserialize)]
struct RawAccount {
    #[serde(rename = "B")]
    balances: Vec<RawBalance>,
}

#[derive(Deserialize)]
struct RawBalance {
    #[serde(rename = "a")]
    asset: String,
    #[serde(rename = "f")]
    free: Decimal,
}

impl StreamEvent {
    /// Decodes one raw stream frame.
    ///
    /// Accepted shapes:
    /// - `{"e":"error","m":"..."}`
    /// - `{"e":"outboundAccountInfo","B":[{"a":"ETH","f":"1.0"}]}`
    /// - `{"stream":"ethusdt@depth10@100ms","data":{"lastUpdateId":1,"bids":[..],"asks":[..]}}`
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError::Decode`] for anything else.
    pub fn decode(raw: &str) -> Result<Self, ExchangeError> {
        let value: Value = serde_json::from_str(raw)?;

        match value.get("e").and_then(Value::as_str) {
            Some("error") => {
                let message = value
                    .get("m")
                    .and_then(Value::as_str)
                    .map_or_else(|| value.to_string(), str::to_string);
                return Ok(Self::ErrorEvent { message });
            }
            Some("outboundAccountInfo" | "outboundAccountPosition") => {
                let account: RawAccount = serde_json::from_value(value)?;
                let balances = account
                    .balances
                    .into_iter()
                    .filter(|b| b.free > Decimal::ZERO)
                    .map(|b| (b.asset, b.free))
                    .collect();
                return Ok(Self::AccountUpdate(AccountUpdate {
                    balances,
                    received_at: Utc::now(),
                }));
            }
            Some(other) => {
                return Err(ExchangeError::decode(format!("unsupported event type '{other}'")));
            }
            None => {}
        }

        let envelope: RawEnvelope = serde_json::from_value(value)?;
        let symbol = envelope
            .stream
            .split('@')
            .next()
            .unwrap_or_default()
            .to_uppercase();
        if symbol.is_empty() {
            return Err(ExchangeError::decode(format!(
                "stream name '{}' carries no symbol",
                envelope.stream
            )));
        }

        Ok(Self::BookUpdate(BookUpdate {
            symbol,
            bids: envelope.data.bids,
            asks: envelope.data.asks,
            update_id: envelope.data.last_update_id,
            received_at: Utc::now(),
        }))
    }

    /// Symbol of a book update, if this is one.
    #[must_use]
    pub fn symbol(&self) -> Option<&str> {
        match self {
            Self::BookUpdate(update) => Some(&update.symbol),
            _ => None,
        }
    }
}
