//! Loop simulation against a book snapshot.
//!
//! The evaluator walks every leg of a [`Plan`] through the snapshot, carrying
//! the received amount into the next leg, and prices the result in the home
//! asset. Quantities are floored to each pair's step before they feed the
//! next leg, so the simulation never assumes more than an order can get.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use spot_arb_core::{OrderRequest, Side};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

use crate::book_walker::{walk_book, Denomination};
use crate::error::EngineError;
use crate::plan::{MarketDirectory, Plan};
use crate::rounding::round_down;
use crate::wallet::{normalize_wallet, Books, Wallet};

// =============================================================================
// Evaluator Configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    /// Fee rate charged on the received amount of every leg.
    pub taker_fee: Decimal,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            taker_fee: dec!(0.00075),
        }
    }
}

impl EvaluatorConfig {
    /// Zero fees, for what-if runs.
    #[must_use]
    pub fn fee_free() -> Self {
        Self {
            taker_fee: Decimal::ZERO,
        }
    }

    #[must_use]
    pub fn with_taker_fee(mut self, fee: Decimal) -> Self {
        self.taker_fee = fee;
        self
    }
}

// =============================================================================
// Opportunity
// =============================================================================

/// Outcome of executing an opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    NotExecuted,
    /// Every leg filled completely.
    Pass,
    /// Every leg traded, at least one only partially.
    Partial,
    /// At least one leg was skipped, refused, or traded nothing.
    Missed,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::NotExecuted => "NOT_EXECUTED",
            Self::Pass => "PASS",
            Self::Partial => "PARTIAL",
            Self::Missed => "MISSED",
        })
    }
}

/// Concrete order for one leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub symbol: String,
    pub side: Side,
    /// Base quantity, floored to the pair's step.
    pub quantity: Decimal,
    /// Worst consumed price. Used as the limit.
    pub price: Decimal,
}

impl Instruction {
    /// Immediate-or-cancel limit order for this leg.
    #[must_use]
    pub fn to_order(&self) -> OrderRequest {
        OrderRequest::limit_ioc(self.symbol.clone(), self.side, self.quantity, self.price)
    }
}

/// One evaluation of a plan against one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: String,
    pub plan_id: usize,
    pub path: String,
    pub home_asset: String,
    pub start_amount: Decimal,
    pub instructions: Vec<Instruction>,
    /// Simulated balances after every leg.
    pub wallet: Wallet,
    /// Simulated fees keyed by the asset they are charged in.
    pub fees: Wallet,
    /// Simulated wallet valued in the home asset.
    pub final_balance: Decimal,
    /// Simulated fees valued in the home asset.
    pub fee_estimate: Decimal,
    pub estimated_profit: Decimal,
    pub status: ExecutionStatus,
    pub realized_profit: Option<Decimal>,
    pub execution_message: Option<String>,
    pub execution_time_ms: Option<u64>,
    pub found_at: DateTime<Utc>,
}

impl Opportunity {
    #[must_use]
    pub fn is_profitable(&self) -> bool {
        self.estimated_profit > Decimal::ZERO
    }

    /// Estimated profit relative to the start amount, in percent.
    #[must_use]
    pub fn profit_pct(&self) -> Decimal {
        if self.start_amount.is_zero() {
            return Decimal::ZERO;
        }
        self.estimated_profit / self.start_amount * dec!(100)
    }
}

/// Time-ordered opportunity ids: `{unix millis}-{sequence}`.
#[derive(Debug, Default)]
pub struct OpportunityIdGenerator {
    sequence: AtomicU64,
}

impl OpportunityIdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> String {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{}-{sequence:06}", Utc::now().timestamp_millis())
    }
}

// =============================================================================
// Opportunity Evaluator
// =============================================================================

struct Simulation {
    instructions: Vec<Instruction>,
    wallet: Wallet,
    fees: Wallet,
}

#[derive(Debug, Default)]
pub struct OpportunityEvaluator {
    config: EvaluatorConfig,
    ids: OpportunityIdGenerator,
}

impl OpportunityEvaluator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(config: EvaluatorConfig) -> Self {
        Self {
            config,
            ids: OpportunityIdGenerator::new(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Simulates `plan` against `books` and prices the outcome.
    ///
    /// # Errors
    ///
    /// Any walk or normalization failure aborts this evaluation:
    /// [`EngineError::MissingBook`], [`EngineError::InsufficientDepth`],
    /// [`EngineError::InvalidAmount`] or [`EngineError::MissingMarket`].
    pub fn evaluate(
        &self,
        plan: &Plan,
        books: &Books,
        markets: &MarketDirectory,
    ) -> Result<Opportunity, EngineError> {
        let simulation = self.simulate(plan, books)?;

        let final_balance = normalize_wallet(&simulation.wallet, &plan.home_asset, markets, books)?.total();
        let fee_estimate = normalize_wallet(&simulation.fees, &plan.home_asset, markets, books)?.total();
        let estimated_profit = final_balance - plan.start_amount - fee_estimate;

        let opportunity = Opportunity {
            id: self.ids.next_id(),
            plan_id: plan.id,
            path: plan.label(),
            home_asset: plan.home_asset.clone(),
            start_amount: plan.start_amount,
            instructions: simulation.instructions,
            wallet: simulation.wallet,
            fees: simulation.fees,
            final_balance,
            fee_estimate,
            estimated_profit,
            status: ExecutionStatus::NotExecuted,
            realized_profit: None,
            execution_message: None,
            execution_time_ms: None,
            found_at: Utc::now(),
        };

        debug!(
            plan_id = plan.id,
            path = %opportunity.path,
            profit = %opportunity.estimated_profit,
            fees = %opportunity.fee_estimate,
            "Plan evaluated"
        );
        Ok(opportunity)
    }

    fn simulate(&self, plan: &Plan, books: &Books) -> Result<Simulation, EngineError> {
        let mut wallet = Wallet::new().with_balance(&plan.home_asset, plan.start_amount);
        let mut fees = Wallet::new();
        let mut instructions = Vec::with_capacity(plan.actions.len());
        let mut holding = plan.start_amount;

        for action in &plan.actions {
            let book = books
                .get(&action.symbol)
                .ok_or_else(|| EngineError::MissingBook(action.symbol.clone()))?;

            let (quantity, spent, received, walk) = match action.side {
                Side::Buy => {
                    let walk = walk_book(&book.asks, holding, Denomination::Quote)?;
                    let bought = round_down(walk.base_amount, action.decimals);
                    // cost of the floored quantity, not of the whole spend
                    let cost = walk_book(&book.asks, bought, Denomination::Base)?.quote_amount;
                    (bought, cost, bought, walk)
                }
                Side::Sell => {
                    let walk = walk_book(&book.bids, holding, Denomination::Base)?;
                    let sold = round_down(holding, action.decimals);
                    (sold, sold, sold * walk.average_price(), walk)
                }
            };

            wallet.debit(action.spends(), spent);
            wallet.credit(action.receives(), received);
            fees.credit(action.receives(), received * self.config.taker_fee);

            let price = walk.limit_price(action.side);
            trace!(
                symbol = %action.symbol,
                side = %action.side,
                quantity = %quantity,
                price = %price,
                received = %received,
                "Leg simulated"
            );

            instructions.push(Instruction {
                symbol: action.symbol.clone(),
                side: action.side,
                quantity,
                price,
            });
            holding = received;
        }

        Ok(Simulation {
            instructions,
            wallet,
            fees,
        })
    }
}
