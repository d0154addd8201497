//! Trading plans and the catalog they are admitted into.
//!
//! A [`Plan`] is a closed loop of market actions over a home asset. Chains
//! are validated once, when the plan is built, so evaluation never sees a
//! plan that fails to close.

use crate::error::EngineError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spot_arb_core::{Market, MarketRules, Side};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, info, warn};

// =============================================================================
// Plan Source
// =============================================================================

/// Plan document as deployed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSource {
    pub instance_id: String,
    #[serde(default)]
    pub plans: Vec<PlanSpec>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlanStrategy {
    #[default]
    Arbitrage,
    Test,
}

/// One plan entry of a [`PlanSource`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSpec {
    pub markets: Vec<Market>,
    #[serde(alias = "startCurrency")]
    pub start_currency: String,
    #[serde(alias = "startAmount")]
    pub start_amount: Decimal,
    #[serde(alias = "feeAsset")]
    pub fee_asset: String,
    #[serde(alias = "profitAsset")]
    pub profit_asset: String,
    #[serde(default)]
    pub strategy: PlanStrategy,
    #[serde(default)]
    pub plan_no: Option<usize>,
}

impl PlanSpec {
    /// Plan document that reports fees and profit in the start currency.
    #[must_use]
    pub fn new(markets: Vec<Market>, start_currency: &str, start_amount: Decimal) -> Self {
        Self {
            markets,
            start_currency: start_currency.to_string(),
            start_amount,
            fee_asset: start_currency.to_string(),
            profit_asset: start_currency.to_string(),
            strategy: PlanStrategy::Arbitrage,
            plan_no: None,
        }
    }
}

// =============================================================================
// Plan
// =============================================================================

/// One leg of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub symbol: String,
    pub side: Side,
    pub base: String,
    pub quote: String,
    pub decimals: u32,
    pub exchange: String,
}

impl Action {
    /// Asset given up by this leg.
    #[must_use]
    pub fn spends(&self) -> &str {
        match self.side {
            Side::Buy => &self.quote,
            Side::Sell => &self.base,
        }
    }

    /// Asset received by this leg.
    #[must_use]
    pub fn receives(&self) -> &str {
        match self.side {
            Side::Buy => &self.base,
            Side::Sell => &self.quote,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: usize,
    pub instance_id: String,
    pub home_asset: String,
    pub start_amount: Decimal,
    pub fee_asset: String,
    pub profit_asset: String,
    pub strategy: PlanStrategy,
    pub actions: Vec<Action>,
}

impl Plan {
    /// Builds a plan, resolving each market into a buy or sell leg.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidChain`] if a market does not trade the
    /// asset currently held, the home asset is reached before the last leg,
    /// or the chain does not end in the home asset.
    pub fn new(id: usize, instance_id: &str, spec: &PlanSpec) -> Result<Self, EngineError> {
        if spec.markets.is_empty() {
            return Err(EngineError::invalid_chain("plan has no markets"));
        }

        let home = &spec.start_currency;
        let mut current = home.clone();
        let mut actions = Vec::with_capacity(spec.markets.len());

        for (index, market) in spec.markets.iter().enumerate() {
            let buy = market.quote == current;
            let sell = market.base == current;
            let side = match (buy, sell) {
                (true, false) => Side::Buy,
                (false, true) => Side::Sell,
                _ => {
                    return Err(EngineError::invalid_chain(format!(
                        "{} does not trade held asset {current}",
                        market.symbol
                    )))
                }
            };

            current = if buy {
                market.base.clone()
            } else {
                market.quote.clone()
            };
            if current == *home && index + 1 < spec.markets.len() {
                return Err(EngineError::invalid_chain(format!(
                    "home asset {home} reached at leg {} of {}",
                    index + 1,
                    spec.markets.len()
                )));
            }

            actions.push(Action {
                symbol: market.symbol.clone(),
                side,
                base: market.base.clone(),
                quote: market.quote.clone(),
                decimals: market.decimals,
                exchange: market.exchange.clone(),
            });
        }

        if current != *home {
            return Err(EngineError::invalid_chain(format!(
                "chain ends in {current}, expected {home}"
            )));
        }

        Ok(Self {
            id,
            instance_id: instance_id.to_string(),
            home_asset: home.clone(),
            start_amount: spec.start_amount,
            fee_asset: spec.fee_asset.clone(),
            profit_asset: spec.profit_asset.clone(),
            strategy: spec.strategy,
            actions,
        })
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.actions.iter().map(|a| a.symbol.as_str())
    }

    #[must_use]
    pub fn touches(&self, symbol: &str) -> bool {
        self.actions.iter().any(|a| a.symbol == symbol)
    }

    /// Path label, e.g. `ETHUSDT>ETHEUR>EURUSDT`.
    #[must_use]
    pub fn label(&self) -> String {
        self.symbols().collect::<Vec<_>>().join(">")
    }
}

// =============================================================================
// Market Directory
// =============================================================================

/// Markets known to the catalog, keyed by symbol.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarketDirectory {
    markets: BTreeMap<String, Market>,
}

impl MarketDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, market: Market) {
        self.markets.insert(market.symbol.clone(), market);
    }

    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<&Market> {
        self.markets.get(symbol)
    }

    /// Market pairing `a` and `b` directly, in either orientation.
    #[must_use]
    pub fn find_direct(&self, a: &str, b: &str) -> Option<&Market> {
        self.get(&format!("{a}{b}"))
            .or_else(|| self.get(&format!("{b}{a}")))
            .filter(|m| m.connects(a, b))
            .or_else(|| self.markets.values().find(|m| m.connects(a, b)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Market> {
        self.markets.values()
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

impl FromIterator<Market> for MarketDirectory {
    fn from_iter<I: IntoIterator<Item = Market>>(iter: I) -> Self {
        let mut directory = Self::new();
        for market in iter {
            directory.insert(market);
        }
        directory
    }
}

// =============================================================================
// Plan Catalog
// =============================================================================

/// A plan entry refused at admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub plan_no: usize,
    pub error: EngineError,
}

/// Admitted plans plus the symbols and markets they reference.
#[derive(Debug, Clone, Default)]
pub struct PlanCatalog {
    plans: Vec<Plan>,
    symbols: BTreeSet<String>,
    markets: MarketDirectory,
}

impl PlanCatalog {
    #[must_use]
    pub fn new(plans: Vec<Plan>) -> Self {
        let markets: MarketDirectory = plans
            .iter()
            .flat_map(|plan| plan.actions.iter())
            .map(|action| Market {
                symbol: action.symbol.clone(),
                base: action.base.clone(),
                quote: action.quote.clone(),
                decimals: action.decimals,
                exchange: action.exchange.clone(),
            })
            .collect();
        let symbols = markets.iter().map(|m| m.symbol.clone()).collect();

        Self {
            plans,
            symbols,
            markets,
        }
    }

    /// Validates every plan of `source` against exchange rules. Fails on the first bad plan.
    ///
    /// # Errors
    ///
    /// Returns the first validation error encountered.
    pub fn from_source(
        source: &PlanSource,
        rules: &HashMap<String, MarketRules>,
    ) -> Result<Self, EngineError> {
        let mut plans = Vec::with_capacity(source.plans.len());
        for (index, spec) in source.plans.iter().enumerate() {
            plans.push(Self::build(index, &source.instance_id, spec, rules)?);
        }
        info!(
            instance_id = %source.instance_id,
            plans = plans.len(),
            "Plan catalog loaded"
        );
        Ok(Self::new(plans))
    }

    /// Admits every valid plan of `source` and reports the rest.
    #[must_use]
    pub fn admit(
        source: &PlanSource,
        rules: &HashMap<String, MarketRules>,
    ) -> (Self, Vec<Rejection>) {
        let mut plans = Vec::new();
        let mut rejected = Vec::new();

        for (index, spec) in source.plans.iter().enumerate() {
            match Self::build(index, &source.instance_id, spec, rules) {
                Ok(plan) => plans.push(plan),
                Err(error) => {
                    let plan_no = spec.plan_no.unwrap_or(index);
                    warn!(plan_no, error = %error, "Plan rejected");
                    rejected.push(Rejection { plan_no, error });
                }
            }
        }

        (Self::new(plans), rejected)
    }

    fn build(
        index: usize,
        instance_id: &str,
        spec: &PlanSpec,
        rules: &HashMap<String, MarketRules>,
    ) -> Result<Plan, EngineError> {
        validate_against_rules(spec, rules)?;
        let plan = Plan::new(spec.plan_no.unwrap_or(index), instance_id, spec)?;
        debug!(plan_id = plan.id, path = %plan.label(), "Plan admitted");
        Ok(plan)
    }

    #[must_use]
    pub fn plans(&self) -> &[Plan] {
        &self.plans
    }

    /// Plans with a leg on `symbol`, in catalog order.
    pub fn plans_for<'a>(&'a self, symbol: &'a str) -> impl Iterator<Item = &'a Plan> + 'a {
        self.plans.iter().filter(move |plan| plan.touches(symbol))
    }

    /// Every symbol referenced by any plan.
    #[must_use]
    pub fn symbols(&self) -> &BTreeSet<String> {
        &self.symbols
    }

    #[must_use]
    pub fn markets(&self) -> &MarketDirectory {
        &self.markets
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.plans.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}

/// Checks a plan entry against the exchange's published rules.
///
/// # Errors
///
/// - [`EngineError::UnknownSymbol`] for a symbol the exchange does not list.
/// - [`EngineError::InvalidStep`] for a step size that is not a power of ten.
/// - [`EngineError::InvalidPlan`] for mismatched assets, decimals or amounts.
pub fn validate_against_rules(
    spec: &PlanSpec,
    rules: &HashMap<String, MarketRules>,
) -> Result<(), EngineError> {
    if spec.start_amount <= Decimal::ZERO {
        return Err(EngineError::invalid_plan(format!(
            "start amount {} is not positive",
            spec.start_amount
        )));
    }

    let listed_assets: HashSet<&str> = rules
        .values()
        .flat_map(|r| [r.base.as_str(), r.quote.as_str()])
        .collect();
    for (role, asset) in [
        ("start currency", &spec.start_currency),
        ("fee asset", &spec.fee_asset),
        ("profit asset", &spec.profit_asset),
    ] {
        if !listed_assets.contains(asset.as_str()) {
            return Err(EngineError::invalid_plan(format!("{role} {asset} is not listed")));
        }
    }

    for market in &spec.markets {
        let rule = rules
            .get(&market.symbol)
            .ok_or_else(|| EngineError::UnknownSymbol(market.symbol.clone()))?;

        if market.base != rule.base || market.quote != rule.quote {
            return Err(EngineError::invalid_plan(format!(
                "{} declared as {}/{}, exchange lists {}/{}",
                market.symbol, market.base, market.quote, rule.base, rule.quote
            )));
        }
        if format!("{}{}", market.base, market.quote) != market.symbol {
            return Err(EngineError::invalid_plan(format!(
                "{} is not {}{}",
                market.symbol, market.base, market.quote
            )));
        }

        let decimals = rule.decimals().ok_or_else(|| EngineError::InvalidStep {
            symbol: market.symbol.clone(),
            step: rule.step_size,
        })?;
        if decimals != market.decimals {
            return Err(EngineError::invalid_plan(format!(
                "{} declares {} decimals, step size {} implies {decimals}",
                market.symbol, market.decimals, rule.step_size
            )));
        }
    }

    Ok(())
}
