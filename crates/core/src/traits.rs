use crate::error::ExchangeError;
use crate::market::{MarketRules, OrderBook, OrderFill, OrderRequest};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Request/response side of a spot exchange.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn fetch_order_book(&self, symbol: &str, limit: usize) -> Result<OrderBook, ExchangeError>;

    /// Submits an order and waits for its terminal response.
    async fn submit_order(&self, order: OrderRequest) -> Result<OrderFill, ExchangeError>;

    /// Trading rules keyed by symbol.
    async fn fetch_exchange_rules(&self) -> Result<HashMap<String, MarketRules>, ExchangeError>;

    /// Free balances keyed by asset. Zero balances may be omitted.
    async fn fetch_balances(&self) -> Result<HashMap<String, Decimal>, ExchangeError>;

    /// Last traded price keyed by symbol.
    async fn fetch_prices(&self) -> Result<HashMap<String, Decimal>, ExchangeError>;
}

/// Push side of the exchange: raw frames for the subscribed book streams.
///
/// Frames are decoded with [`crate::events::StreamEvent::decode`]. The channel
/// closes when the connection drops.
#[async_trait]
pub trait BookStream: Send + Sync {
    async fn subscribe(&self, symbols: &[String]) -> Result<mpsc::Receiver<String>, ExchangeError>;
}
