//! Greedy capital redistribution across assets.
//!
//! Balances are valued in a reference asset. Assets below the bottom limit
//! ("red") receive from assets holding more than the limit plus one minimum
//! trade ("green"). Reds that are hardest to help, then those with the
//! smallest deficit, are served first; each is fed from the green asset with
//! the largest remaining surplus until the deficit is met or the next
//! transfer would not exceed the minimum trade size.
//!
//! The result is advisory. Nothing here submits orders.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spot_arb_core::{MarketRules, RebalanceConfig, Side};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use crate::error::EngineError;

// =============================================================================
// Price Book
// =============================================================================

/// A symbol with its last price and trading rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedMarket {
    pub symbol: String,
    pub price: Decimal,
    pub rules: MarketRules,
}

/// Last prices joined with exchange rules.
#[derive(Debug, Clone, Default)]
pub struct PriceBook {
    markets: BTreeMap<String, PricedMarket>,
}

impl PriceBook {
    /// Joins prices with rules. Symbols missing from either side, or with a
    /// non-positive price, are left out.
    #[must_use]
    pub fn new(prices: &HashMap<String, Decimal>, rules: &HashMap<String, MarketRules>) -> Self {
        let markets = prices
            .iter()
            .filter(|(_, price)| **price > Decimal::ZERO)
            .filter_map(|(symbol, price)| {
                let rules = rules.get(symbol)?.clone();
                Some((
                    symbol.clone(),
                    PricedMarket {
                        symbol: symbol.clone(),
                        price: *price,
                        rules,
                    },
                ))
            })
            .collect();
        Self { markets }
    }

    /// Market trading `a` against `b` directly, in either orientation.
    #[must_use]
    pub fn between(&self, a: &str, b: &str) -> Option<&PricedMarket> {
        self.markets.values().find(|m| {
            (m.rules.base == a && m.rules.quote == b) || (m.rules.base == b && m.rules.quote == a)
        })
    }

    /// Value of one unit of `from` in `to`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MissingMarket`] if no market pairs them directly.
    pub fn rate(&self, from: &str, to: &str) -> Result<Decimal, EngineError> {
        if from == to {
            return Ok(Decimal::ONE);
        }
        let market = self
            .between(from, to)
            .ok_or_else(|| EngineError::missing_market(from, to))?;
        Ok(if market.rules.base == from {
            market.price
        } else {
            Decimal::ONE / market.price
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.markets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }
}

// =============================================================================
// Rebalance Plan
// =============================================================================

/// Value to move between two assets, in reference-asset units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub sell_asset: String,
    pub buy_asset: String,
    pub amount: Decimal,
}

/// A transfer expressed as a market order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalanceOrder {
    pub symbol: String,
    pub side: Side,
    /// Base quantity, floored to the market's step.
    pub quantity: Decimal,
    pub transfer: Transfer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalancePlan {
    pub reference_asset: String,
    /// Balances valued in the reference asset.
    pub normalized: BTreeMap<String, Decimal>,
    pub transfers: Vec<Transfer>,
    pub orders: Vec<RebalanceOrder>,
}

impl RebalancePlan {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// One line per order, e.g. `SELL - 0.2 ------- ETHBTC`.
    #[must_use]
    pub fn render(&self) -> String {
        self.orders
            .iter()
            .map(|order| {
                let quantity = order
                    .quantity
                    .round_sf(4)
                    .unwrap_or(order.quantity)
                    .normalize();
                format!(
                    "{:-<6} {:-<11} {}",
                    format!("{} ", order.side),
                    format!("{quantity} "),
                    order.symbol
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// =============================================================================
// Rebalance Engine
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct RebalanceEngine {
    config: RebalanceConfig,
}

impl RebalanceEngine {
    #[must_use]
    pub fn new(config: RebalanceConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &RebalanceConfig {
        &self.config
    }

    /// Values `balances` in the reference asset.
    ///
    /// Zero balances and assets outside the connection map are left out.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MissingMarket`] for a managed asset with no
    /// direct market to the reference asset.
    pub fn normalize(
        &self,
        balances: &HashMap<String, Decimal>,
        prices: &PriceBook,
    ) -> Result<BTreeMap<String, Decimal>, EngineError> {
        let mut normalized = BTreeMap::new();
        for (asset, amount) in balances {
            if amount.is_zero() {
                continue;
            }
            if !self.config.connections.contains_key(asset) {
                debug!(asset = %asset, "Asset outside connection map, not rebalanced");
                continue;
            }
            let value = *amount * prices.rate(asset, &self.config.reference_asset)?;
            normalized.insert(asset.clone(), value);
        }
        Ok(normalized)
    }

    /// Greedy transfers that lift red assets toward the bottom limit.
    #[must_use]
    pub fn plan_transfers(&self, normalized: &BTreeMap<String, Decimal>) -> Vec<Transfer> {
        let limit = self.config.bottom_limit;
        let min_trade = self.config.min_trade_size;

        let reach = |asset: &str| -> Decimal {
            self.config
                .connections
                .get(asset)
                .map(|peers| {
                    peers
                        .iter()
                        .filter_map(|peer| normalized.get(peer))
                        .filter(|balance| **balance > limit + min_trade)
                        .map(|balance| *balance - limit)
                        .sum()
                })
                .unwrap_or_default()
        };

        // (asset, reach, deficit)
        let mut reds: Vec<(&String, Decimal, Decimal)> = normalized
            .iter()
            .filter(|(_, balance)| **balance < limit)
            .map(|(asset, balance)| (asset, reach(asset), limit - *balance))
            .collect();
        reds.sort_by(|a, b| (a.1, a.2).cmp(&(b.1, b.2)));

        // (asset, surplus)
        let mut greens: Vec<(&String, Decimal)> = normalized
            .iter()
            .filter(|(_, balance)| **balance > limit + min_trade)
            .map(|(asset, balance)| (asset, *balance - limit))
            .collect();

        let mut transfers = Vec::new();
        for (red, _, deficit) in reds {
            let mut remaining = deficit;
            while remaining > min_trade {
                let Some(donor) = greens
                    .iter_mut()
                    .reduce(|best, candidate| if candidate.1 > best.1 { candidate } else { best })
                else {
                    break;
                };
                let giving = donor.1.min(remaining);
                if giving <= min_trade {
                    break;
                }
                donor.1 -= giving;
                remaining -= giving;
                transfers.push(Transfer {
                    sell_asset: donor.0.clone(),
                    buy_asset: red.clone(),
                    amount: giving,
                });
            }
        }
        transfers
    }

    /// Converts transfers into direct-market orders.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MissingMarket`] if a transfer has no direct market.
    pub fn to_orders(
        &self,
        transfers: &[Transfer],
        prices: &PriceBook,
    ) -> Result<Vec<RebalanceOrder>, EngineError> {
        transfers
            .iter()
            .map(|transfer| {
                let market = prices
                    .between(&transfer.sell_asset, &transfer.buy_asset)
                    .ok_or_else(|| {
                        EngineError::missing_market(&transfer.sell_asset, &transfer.buy_asset)
                    })?;
                let sell_units =
                    transfer.amount / prices.rate(&transfer.sell_asset, &self.config.reference_asset)?;

                let (side, quantity) = if market.rules.base == transfer.sell_asset {
                    (Side::Sell, sell_units)
                } else {
                    (Side::Buy, sell_units / market.price)
                };

                Ok(RebalanceOrder {
                    symbol: market.symbol.clone(),
                    side,
                    quantity: market.rules.round_to_step(quantity),
                    transfer: transfer.clone(),
                })
            })
            .collect()
    }

    /// Full advisory pass: normalize, plan, convert.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MissingMarket`] from normalization or conversion.
    pub fn advise(
        &self,
        balances: &HashMap<String, Decimal>,
        prices: &PriceBook,
    ) -> Result<RebalancePlan, EngineError> {
        let normalized = self.normalize(balances, prices)?;
        let transfers = self.plan_transfers(&normalized);
        let orders = self.to_orders(&transfers, prices)?;

        info!(
            reference = %self.config.reference_asset,
            assets = normalized.len(),
            transfers = transfers.len(),
            "Rebalance computed"
        );

        Ok(RebalancePlan {
            reference_asset: self.config.reference_asset.clone(),
            normalized,
            transfers,
            orders,
        })
    }
}
