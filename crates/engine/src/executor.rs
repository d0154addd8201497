//! Bounded fan-out of an opportunity's legs.
//!
//! Every instruction becomes an immediate-or-cancel limit order at the
//! instruction's worst-level price. Legs are submitted in plan order with at
//! most [`ExecutorConfig::max_in_flight_legs`] awaiting a response, and all
//! of them are awaited before the report is built.
//!
//! The default keeps one leg in flight, so a refusal on leg N means no later
//! leg reaches the exchange. With a wider window, legs already sent when the
//! refusal arrives still trade.
//!
//! # Failure handling
//!
//! - Insufficient balance: later legs that have not been sent yet are
//!   skipped, and the report asks for an advisory rebalance.
//! - Rate limiting: later legs are skipped and [`ExecutionError::RateLimited`]
//!   is returned with the fills of legs that traded. The caller must stop
//!   trading.
//! - Anything else: logged and reported. Sibling legs are unaffected.
//!
//! No leg is ever retried.

use futures_util::stream::{self, StreamExt};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use spot_arb_core::{ExchangeClient, ExchangeError, OrderFill};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::ExecutionError;
use crate::evaluator::{ExecutionStatus, Instruction, Opportunity};

// =============================================================================
// Executor Configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Maximum legs awaiting a response at once.
    pub max_in_flight_legs: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::sequential()
    }
}

impl ExecutorConfig {
    /// One leg at a time, in plan order.
    #[must_use]
    pub fn sequential() -> Self {
        Self {
            max_in_flight_legs: 1,
        }
    }

    /// Every leg of a three-leg loop in flight at once.
    ///
    /// Requires inventory of each leg's spend asset up front. A balance
    /// refusal cannot hold back legs that were already sent.
    #[must_use]
    pub fn concurrent() -> Self {
        Self {
            max_in_flight_legs: 3,
        }
    }

    #[must_use]
    pub fn with_max_in_flight_legs(mut self, legs: usize) -> Self {
        self.max_in_flight_legs = legs.max(1);
        self
    }
}

// =============================================================================
// Execution Report
// =============================================================================

/// Terminal outcome of one leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LegOutcome {
    /// The exchange answered with a fill report, possibly empty.
    Filled { fill: OrderFill },
    /// Not submitted because an earlier leg failed.
    Skipped,
    /// Refused for lack of funds.
    InsufficientBalance { reason: String },
    /// Refused or failed for any other reason.
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegReport {
    pub index: usize,
    pub instruction: Instruction,
    pub outcome: LegOutcome,
}

impl LegReport {
    #[must_use]
    pub fn fill(&self) -> Option<&OrderFill> {
        match &self.outcome {
            LegOutcome::Filled { fill } => Some(fill),
            _ => None,
        }
    }

    #[must_use]
    pub fn executed_quantity(&self) -> Decimal {
        self.fill().map_or(Decimal::ZERO, |f| f.executed_quantity)
    }

    /// Share of the instructed quantity that traded.
    #[must_use]
    pub fn fill_ratio(&self) -> Decimal {
        if self.instruction.quantity.is_zero() {
            return Decimal::ZERO;
        }
        self.executed_quantity() / self.instruction.quantity
    }

    /// Traded a non-zero quantity.
    #[must_use]
    pub fn traded(&self) -> bool {
        self.executed_quantity() > Decimal::ZERO
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.fill().is_some_and(|f| f.executed_quantity >= self.instruction.quantity)
    }

    /// Missed: skipped, refused for balance, or nothing traded.
    #[must_use]
    pub fn is_missed(&self) -> bool {
        matches!(
            self.outcome,
            LegOutcome::Skipped | LegOutcome::InsufficientBalance { .. }
        ) || !self.traded()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub opportunity_id: String,
    pub legs: Vec<LegReport>,
    pub status: ExecutionStatus,
    /// (legs attempted - legs failed) / legs attempted. A skipped leg counts as failed.
    pub success_ratio: Decimal,
    /// An insufficient-balance refusal occurred.
    pub needs_rebalance: bool,
    /// Per-leg fill summary, e.g. `ETHUSDT 100% | ETHEUR 0%`.
    pub message: String,
    pub elapsed_ms: u64,
}

impl ExecutionReport {
    fn from_legs(opportunity_id: &str, legs: Vec<LegReport>, elapsed_ms: u64) -> Self {
        let attempted = legs.len();
        let failed = legs.iter().filter(|leg| !leg.traded()).count();
        let success_ratio = if attempted == 0 {
            Decimal::ZERO
        } else {
            Decimal::from(attempted - failed) / Decimal::from(attempted)
        };

        let status = if !legs.is_empty() && legs.iter().all(LegReport::is_complete) {
            ExecutionStatus::Pass
        } else if legs.is_empty() || legs.iter().any(LegReport::is_missed) {
            ExecutionStatus::Missed
        } else {
            ExecutionStatus::Partial
        };

        let needs_rebalance = legs
            .iter()
            .any(|leg| matches!(leg.outcome, LegOutcome::InsufficientBalance { .. }));

        let message = legs
            .iter()
            .map(|leg| {
                let pct = (leg.fill_ratio() * dec!(100)).round_dp(0);
                format!("{} {pct}%", leg.instruction.symbol)
            })
            .collect::<Vec<_>>()
            .join(" | ");

        Self {
            opportunity_id: opportunity_id.to_string(),
            legs,
            status,
            success_ratio,
            needs_rebalance,
            message,
            elapsed_ms,
        }
    }

    /// Fill reports of every leg that reached the exchange.
    #[must_use]
    pub fn fills(&self) -> Vec<OrderFill> {
        self.legs.iter().filter_map(LegReport::fill).cloned().collect()
    }

    /// Copies status, message and timing onto the opportunity.
    pub fn apply_to(&self, opportunity: &mut Opportunity) {
        opportunity.status = self.status;
        opportunity.execution_message = Some(self.message.clone());
        opportunity.execution_time_ms = Some(self.elapsed_ms);
    }
}

// =============================================================================
// Execution Coordinator
// =============================================================================

enum LegResult {
    Done(LegOutcome),
    RateLimited(ExchangeError),
}

pub struct ExecutionCoordinator {
    exchange: Arc<dyn ExchangeClient>,
    config: ExecutorConfig,
}

impl std::fmt::Debug for ExecutionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionCoordinator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ExecutionCoordinator {
    #[must_use]
    pub fn new(exchange: Arc<dyn ExchangeClient>, config: ExecutorConfig) -> Self {
        Self { exchange, config }
    }

    #[must_use]
    pub const fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Submits every instruction of `opportunity` and waits for all of them.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::RateLimited`] if any leg was throttled.
    pub async fn execute(&self, opportunity: &Opportunity) -> Result<ExecutionReport, ExecutionError> {
        info!(
            opportunity_id = %opportunity.id,
            path = %opportunity.path,
            legs = opportunity.instructions.len(),
            expected_profit = %opportunity.estimated_profit,
            "Executing opportunity"
        );

        let started = Instant::now();
        let halt = AtomicBool::new(false);
        let halt = &halt;

        let submissions: Vec<_> = opportunity
            .instructions
            .iter()
            .map(|instruction| self.submit_leg(instruction, halt))
            .collect();
        let results: Vec<LegResult> = stream::iter(submissions)
            .buffered(self.config.max_in_flight_legs.max(1))
            .collect()
            .await;

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let mut legs = Vec::with_capacity(results.len());
        let mut throttled = None;
        for (index, (instruction, result)) in opportunity.instructions.iter().zip(results).enumerate() {
            let outcome = match result {
                LegResult::Done(outcome) => outcome,
                LegResult::RateLimited(source) => {
                    let outcome = LegOutcome::Failed {
                        reason: source.to_string(),
                    };
                    throttled.get_or_insert((instruction.symbol.clone(), source));
                    outcome
                }
            };
            legs.push(LegReport {
                index,
                instruction: instruction.clone(),
                outcome,
            });
        }

        if let Some((symbol, source)) = throttled {
            let fills: Vec<OrderFill> = legs.iter().filter_map(LegReport::fill).cloned().collect();
            error!(
                opportunity_id = %opportunity.id,
                symbol = %symbol,
                traded_legs = fills.len(),
                "Rate limited, trading must stop"
            );
            return Err(ExecutionError::RateLimited { symbol, source, fills });
        }

        let report = ExecutionReport::from_legs(&opportunity.id, legs, elapsed_ms);
        info!(
            opportunity_id = %opportunity.id,
            status = %report.status,
            success_ratio = %report.success_ratio,
            fills = %report.message,
            elapsed_ms,
            "Execution finished"
        );
        Ok(report)
    }

    async fn submit_leg(&self, instruction: &Instruction, halt: &AtomicBool) -> LegResult {
        if halt.load(Ordering::SeqCst) {
            debug!(symbol = %instruction.symbol, "Leg skipped after earlier failure");
            return LegResult::Done(LegOutcome::Skipped);
        }

        match self.exchange.submit_order(instruction.to_order()).await {
            Ok(fill) => LegResult::Done(LegOutcome::Filled { fill }),
            Err(err) if err.is_fatal() => {
                halt.store(true, Ordering::SeqCst);
                LegResult::RateLimited(err)
            }
            Err(err) if err.is_insufficient_balance() => {
                halt.store(true, Ordering::SeqCst);
                warn!(symbol = %instruction.symbol, error = %err, "Leg refused for balance");
                LegResult::Done(LegOutcome::InsufficientBalance {
                    reason: err.to_string(),
                })
            }
            Err(err) => {
                warn!(symbol = %instruction.symbol, error = %err, "Leg failed");
                LegResult::Done(LegOutcome::Failed {
                    reason: err.to_string(),
                })
            }
        }
    }
}
