use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub rebalance: RebalanceConfig,
    pub feed: FeedConfig,
    pub plans: PlansConfig,
}

/// Evaluation and execution policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Taker fee rate charged on the received side of each leg.
    pub taker_fee: Decimal,
    /// Submit orders for profitable opportunities. Off means evaluate and log only.
    pub execute: bool,
    /// Treat the last plan of every pass as profitable. Needs `execute` to submit.
    pub test_it: bool,
    /// Release the busy gate after each pass. Off stops after the first pass.
    pub loop_mode: bool,
    /// Upper bound on concurrently submitted legs of one opportunity. Above
    /// one, a balance refusal cannot hold back legs already sent.
    pub max_in_flight_legs: usize,
    /// Depth requested per book.
    pub book_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            taker_fee: Decimal::new(75, 5),
            execute: false,
            test_it: false,
            loop_mode: true,
            max_in_flight_legs: 1,
            book_depth: 10,
        }
    }
}

/// Greedy capital redistribution policy. Amounts are in `reference_asset` units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RebalanceConfig {
    pub reference_asset: String,
    /// Minimum capital an asset must keep to stay tradeable.
    pub bottom_limit: Decimal,
    pub min_trade_size: Decimal,
    /// Assets that share a direct market.
    pub connections: BTreeMap<String, Vec<String>>,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        let assets = ["BNB", "BTC", "ETH", "EUR", "RUB", "USDT", "XRP"];
        let connections = assets
            .iter()
            .map(|asset| {
                let peers = assets
                    .iter()
                    .filter(|peer| *peer != asset)
                    .map(|peer| (*peer).to_string())
                    .collect();
                ((*asset).to_string(), peers)
            })
            .collect();

        Self {
            reference_asset: "BTC".to_string(),
            bottom_limit: Decimal::new(396, 4),
            min_trade_size: Decimal::new(11, 4),
            connections,
        }
    }
}

/// Stream supervision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Seconds without a book update before the feed counts as stale.
    pub stale_after_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self { stale_after_secs: 60 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlansConfig {
    /// Plan source document (JSON).
    pub path: String,
}

impl Default for PlansConfig {
    fn default() -> Self {
        Self {
            path: "config/plans.json".to_string(),
        }
    }
}
