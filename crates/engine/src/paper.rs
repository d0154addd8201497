//! Paper exchange for dry runs, replays and tests.
//!
//! [`PaperExchange`] implements [`ExchangeClient`] against books and balances
//! it holds in memory. Orders fill deterministically against the stored book
//! up to their limit price; balances are debited and credited like a real
//! spot account, with commission taken from the received asset.
//!
//! # Example
//!
//! ```
//! use spot_arb_engine::paper::{PaperExchange, PaperExchangeConfig};
//! use spot_arb_core::{MarketRules, OrderBook, PriceLevel};
//! use rust_decimal_macros::dec;
//!
//! let exchange = PaperExchange::new(PaperExchangeConfig::fee_free());
//! exchange.add_market("ETHUSDT", MarketRules::new("ETH", "USDT", dec!(0.0001)));
//! exchange.set_book(OrderBook::new(
//!     "ETHUSDT",
//!     vec![PriceLevel::new(dec!(199), dec!(5))],
//!     vec![PriceLevel::new(dec!(200), dec!(5))],
//! ));
//! exchange.set_balance("USDT", dec!(1000));
//! assert_eq!(exchange.balance("USDT"), dec!(1000));
//! ```

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use spot_arb_core::{
    ExchangeClient, ExchangeError, Fill, MarketRules, OrderBook, OrderFill, OrderRequest,
    OrderStatus, Side,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Exchange code for an unknown symbol.
const INVALID_SYMBOL_CODE: i64 = -1121;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperExchangeConfig {
    /// Commission rate charged on the received asset.
    pub commission_rate: Decimal,

    /// Simulated latency per request in milliseconds.
    pub simulate_latency_ms: u64,

    /// Refuse orders the paper account cannot cover.
    pub enforce_balances: bool,
}

impl Default for PaperExchangeConfig {
    fn default() -> Self {
        Self {
            commission_rate: dec!(0.00075),
            simulate_latency_ms: 0,
            enforce_balances: true,
        }
    }
}

impl PaperExchangeConfig {
    #[must_use]
    pub fn fee_free() -> Self {
        Self {
            commission_rate: Decimal::ZERO,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn latency_ms(mut self, ms: u64) -> Self {
        self.simulate_latency_ms = ms;
        self
    }

    /// Fill regardless of balances.
    #[must_use]
    pub fn unlimited_balances(mut self) -> Self {
        self.enforce_balances = false;
        self
    }
}

// =============================================================================
// Internal State
// =============================================================================

#[derive(Debug, Default)]
struct PaperState {
    books: HashMap<String, OrderBook>,
    rules: HashMap<String, MarketRules>,
    balances: HashMap<String, Decimal>,
    prices: HashMap<String, Decimal>,
    /// Errors returned instead of filling, per symbol, oldest first.
    scripted_failures: HashMap<String, VecDeque<ExchangeError>>,
    submitted: Vec<OrderRequest>,
    fills: Vec<OrderFill>,
}

// =============================================================================
// Paper Exchange
// =============================================================================

#[derive(Debug, Clone)]
pub struct PaperExchange {
    config: PaperExchangeConfig,
    state: Arc<RwLock<PaperState>>,
}

impl Default for PaperExchange {
    fn default() -> Self {
        Self::new(PaperExchangeConfig::default())
    }
}

impl PaperExchange {
    #[must_use]
    pub fn new(config: PaperExchangeConfig) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(PaperState::default())),
        }
    }

    #[must_use]
    pub fn config(&self) -> &PaperExchangeConfig {
        &self.config
    }

    pub fn add_market(&self, symbol: &str, rules: MarketRules) {
        self.state.write().rules.insert(symbol.to_string(), rules);
    }

    /// Replaces the stored book for the book's symbol.
    pub fn set_book(&self, book: OrderBook) {
        self.state.write().books.insert(book.symbol.clone(), book);
    }

    pub fn set_balance(&self, asset: &str, amount: Decimal) {
        self.state.write().balances.insert(asset.to_string(), amount);
    }

    pub fn set_balances(&self, balances: HashMap<String, Decimal>) {
        self.state.write().balances = balances;
    }

    /// Overrides the last price of a symbol. Otherwise prices are book mids.
    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.state.write().prices.insert(symbol.to_string(), price);
    }

    /// Makes the next order on `symbol` fail with `error`.
    pub fn fail_next(&self, symbol: &str, error: ExchangeError) {
        self.state
            .write()
            .scripted_failures
            .entry(symbol.to_string())
            .or_default()
            .push_back(error);
    }

    #[must_use]
    pub fn balance(&self, asset: &str) -> Decimal {
        self.state.read().balances.get(asset).copied().unwrap_or_default()
    }

    /// Every order received, including refused ones.
    #[must_use]
    pub fn submitted_orders(&self) -> Vec<OrderRequest> {
        self.state.read().submitted.clone()
    }

    #[must_use]
    pub fn orders_for(&self, symbol: &str) -> usize {
        self.state
            .read()
            .submitted
            .iter()
            .filter(|o| o.symbol == symbol)
            .count()
    }

    #[must_use]
    pub fn fill_history(&self) -> Vec<OrderFill> {
        self.state.read().fills.clone()
    }

    async fn simulate_latency(&self) {
        if self.config.simulate_latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.simulate_latency_ms)).await;
        }
    }

    fn process_order(&self, order: OrderRequest) -> Result<OrderFill, ExchangeError> {
        let mut state = self.state.write();
        state.submitted.push(order.clone());

        if let Some(error) = state
            .scripted_failures
            .get_mut(&order.symbol)
            .and_then(VecDeque::pop_front)
        {
            debug!(symbol = %order.symbol, error = %error, "Paper order failed as scripted");
            return Err(error);
        }

        let rules = state
            .rules
            .get(&order.symbol)
            .cloned()
            .ok_or_else(|| ExchangeError::rejected(INVALID_SYMBOL_CODE, "Invalid symbol."))?;
        let book = state
            .books
            .get(&order.symbol)
            .ok_or_else(|| ExchangeError::rejected(INVALID_SYMBOL_CODE, "Invalid symbol."))?;

        let mut remaining = order.quantity;
        let mut matched = Vec::new();
        for level in book.levels_for(order.side) {
            if remaining <= Decimal::ZERO {
                break;
            }
            let crosses = match (order.side, order.price) {
                (_, None) => true,
                (Side::Buy, Some(limit)) => level.price <= limit,
                (Side::Sell, Some(limit)) => level.price >= limit,
            };
            if !crosses {
                break;
            }
            let quantity = level.quantity.min(remaining);
            matched.push((level.price, quantity));
            remaining -= quantity;
        }

        let executed: Decimal = matched.iter().map(|(_, q)| *q).sum();
        let quote: Decimal = matched.iter().map(|(p, q)| p * q).sum();

        if self.config.enforce_balances {
            let (asset, needed) = match order.side {
                Side::Buy => (&rules.quote, quote),
                Side::Sell => (&rules.base, executed),
            };
            let available = state.balances.get(asset).copied().unwrap_or_default();
            if needed > available {
                return Err(ExchangeError::insufficient_balance(
                    "Account has insufficient balance for requested action.",
                ));
            }
        }

        let rate = self.config.commission_rate;
        let fills: Vec<Fill> = matched
            .iter()
            .map(|&(price, quantity)| match order.side {
                Side::Buy => Fill {
                    price,
                    quantity,
                    commission: quantity * rate,
                    commission_asset: rules.base.clone(),
                },
                Side::Sell => Fill {
                    price,
                    quantity,
                    commission: price * quantity * rate,
                    commission_asset: rules.quote.clone(),
                },
            })
            .collect();
        let commission: Decimal = fills.iter().map(|f| f.commission).sum();

        let (spent_asset, spent, received_asset, received) = match order.side {
            Side::Buy => (&rules.quote, quote, &rules.base, executed),
            Side::Sell => (&rules.base, executed, &rules.quote, quote),
        };
        *state.balances.entry(spent_asset.clone()).or_default() -= spent;
        *state.balances.entry(received_asset.clone()).or_default() += received - commission;

        let status = if executed.is_zero() {
            OrderStatus::Expired
        } else if executed < order.quantity {
            OrderStatus::PartiallyFilled
        } else {
            OrderStatus::Filled
        };

        let fill = OrderFill {
            order_id: format!("paper-{}", Uuid::new_v4()),
            symbol: order.symbol.clone(),
            side: order.side,
            status,
            requested_quantity: order.quantity,
            executed_quantity: executed,
            fills,
            transact_time: Utc::now(),
        };
        debug!(
            symbol = %fill.symbol,
            side = %fill.side,
            executed = %fill.executed_quantity,
            status = ?fill.status,
            "Paper order processed"
        );
        state.fills.push(fill.clone());
        Ok(fill)
    }
}

#[async_trait]
impl ExchangeClient for PaperExchange {
    async fn fetch_order_book(&self, symbol: &str, limit: usize) -> Result<OrderBook, ExchangeError> {
        self.simulate_latency().await;
        let state = self.state.read();
        let mut book = state
            .books
            .get(symbol)
            .cloned()
            .ok_or_else(|| ExchangeError::rejected(INVALID_SYMBOL_CODE, "Invalid symbol."))?;
        book.bids.truncate(limit);
        book.asks.truncate(limit);
        Ok(book)
    }

    async fn submit_order(&self, order: OrderRequest) -> Result<OrderFill, ExchangeError> {
        self.simulate_latency().await;
        self.process_order(order)
    }

    async fn fetch_exchange_rules(&self) -> Result<HashMap<String, MarketRules>, ExchangeError> {
        Ok(self.state.read().rules.clone())
    }

    async fn fetch_balances(&self) -> Result<HashMap<String, Decimal>, ExchangeError> {
        self.simulate_latency().await;
        Ok(self
            .state
            .read()
            .balances
            .iter()
            .filter(|(_, amount)| **amount > Decimal::ZERO)
            .map(|(asset, amount)| (asset.clone(), *amount))
            .collect())
    }

    async fn fetch_prices(&self) -> Result<HashMap<String, Decimal>, ExchangeError> {
        let state = self.state.read();
        let mut prices: HashMap<String, Decimal> = state
            .books
            .values()
            .filter_map(|book| {
                let bid = book.best_bid()?.price;
                let ask = book.best_ask()?.price;
                Some((book.symbol.clone(), (bid + ask) / dec!(2)))
            })
            .collect();
        prices.extend(state.prices.iter().map(|(s, p)| (s.clone(), *p)));
        Ok(prices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spot_arb_core::PriceLevel;

    fn exchange(config: PaperExchangeConfig) -> PaperExchange {
        let exchange = PaperExchange::new(config);
        exchange.add_market("ETHUSDT", MarketRules::new("ETH", "USDT", dec!(0.0001)));
        exchange.set_book(OrderBook::new(
            "ETHUSDT",
            vec![PriceLevel::new(dec!(199), dec!(1)), PriceLevel::new(dec!(198), dec!(5))],
            vec![PriceLevel::new(dec!(200), dec!(1)), PriceLevel::new(dec!(201), dec!(5))],
        ));
        exchange.set_balance("USDT", dec!(1000));
        exchange
    }

    // ==================== Fill Tests ====================

    #[tokio::test]
    async fn test_limit_buy_stops_at_limit() {
        let exchange = exchange(PaperExchangeConfig::fee_free());
        let fill = exchange
            .submit_order(OrderRequest::limit_ioc("ETHUSDT", Side::Buy, dec!(3), dec!(200)))
            .await
            .unwrap();

        assert_eq!(fill.executed_quantity, dec!(1));
        assert_eq!(fill.status, OrderStatus::PartiallyFilled);
        assert_eq!(exchange.balance("USDT"), dec!(800));
        assert_eq!(exchange.balance("ETH"), dec!(1));
    }

    #[tokio::test]
    async fn test_commission_on_received_asset() {
        let exchange = exchange(PaperExchangeConfig::default());
        exchange.set_balance("ETH", dec!(2));
        let fill = exchange
            .submit_order(OrderRequest::limit_ioc("ETHUSDT", Side::Sell, dec!(1), dec!(199)))
            .await
            .unwrap();

        assert_eq!(fill.status, OrderStatus::Filled);
        assert_eq!(fill.fills[0].commission_asset, "USDT");
        assert_eq!(exchange.balance("USDT"), dec!(1000) + dec!(199) - dec!(0.14925));
        assert_eq!(exchange.balance("ETH"), dec!(1));
    }

    #[tokio::test]
    async fn test_limit_outside_book_expires() {
        let exchange = exchange(PaperExchangeConfig::fee_free());
        let fill = exchange
            .submit_order(OrderRequest::limit_ioc("ETHUSDT", Side::Buy, dec!(1), dec!(150)))
            .await
            .unwrap();
        assert!(fill.is_empty());
        assert_eq!(fill.status, OrderStatus::Expired);
    }

    // ==================== Failure Tests ====================

    #[tokio::test]
    async fn test_insufficient_balance() {
        let exchange = exchange(PaperExchangeConfig::fee_free());
        let err = exchange
            .submit_order(OrderRequest::market("ETHUSDT", Side::Sell, dec!(1)))
            .await
            .unwrap_err();
        assert!(err.is_insufficient_balance());
        assert_eq!(exchange.submitted_orders().len(), 1);
        assert!(exchange.fill_history().is_empty());
    }

    #[tokio::test]
    async fn test_scripted_failure_is_consumed_once() {
        let exchange = exchange(PaperExchangeConfig::fee_free());
        exchange.fail_next("ETHUSDT", ExchangeError::RateLimited { status_code: 429 });

        let order = OrderRequest::limit_ioc("ETHUSDT", Side::Buy, dec!(1), dec!(200));
        assert!(exchange.submit_order(order.clone()).await.unwrap_err().is_fatal());
        assert!(exchange.submit_order(order).await.is_ok());
        assert_eq!(exchange.orders_for("ETHUSDT"), 2);
    }

    #[tokio::test]
    async fn test_unknown_symbol_rejected() {
        let exchange = exchange(PaperExchangeConfig::fee_free());
        let err = exchange
            .submit_order(OrderRequest::market("XRPUSDT", Side::Buy, dec!(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Rejected { code: -1121, .. }));
    }

    // ==================== Query Tests ====================

    #[tokio::test]
    async fn test_prices_default_to_mid() {
        let exchange = exchange(PaperExchangeConfig::fee_free());
        let prices = exchange.fetch_prices().await.unwrap();
        assert_eq!(prices["ETHUSDT"], dec!(199.5));

        exchange.set_price("ETHUSDT", dec!(250));
        assert_eq!(exchange.fetch_prices().await.unwrap()["ETHUSDT"], dec!(250));
    }

    #[tokio::test]
    async fn test_fetch_exchange_rules() {
        let exchange = exchange(PaperExchangeConfig::fee_free());
        let rules = exchange.fetch_exchange_rules().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules["ETHUSDT"].decimals(), Some(4));
    }

    #[tokio::test]
    async fn test_fetch_order_book_truncates() {
        let exchange = exchange(PaperExchangeConfig::fee_free());
        let book = exchange.fetch_order_book("ETHUSDT", 1).await.unwrap();
        assert_eq!(book.bids.len(), 1);
        assert_eq!(book.asks.len(), 1);
    }
}
