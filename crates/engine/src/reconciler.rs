//! Realized profit from actual fills.
//!
//! The reconciler rebuilds the wallet delta from the exchange's fill reports
//! rather than the pre-trade simulation, prices it in the home asset and
//! compares it with the estimate.
//!
//! Fees are not rebuilt from per-fill commissions. The opportunity's fee
//! estimate is scaled by the execution's success ratio instead.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spot_arb_core::Side;
use tracing::info;

use crate::error::EngineError;
use crate::evaluator::Opportunity;
use crate::executor::ExecutionReport;
use crate::plan::{MarketDirectory, Plan};
use crate::wallet::{normalize_wallet, Books, Wallet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub opportunity_id: String,
    pub home_asset: String,
    /// Per-asset change caused by the fills.
    pub wallet_delta: Wallet,
    /// The delta valued in the home asset.
    pub normalized_delta: Wallet,
    /// Fee estimate scaled by the success ratio.
    pub fees: Decimal,
    pub success_ratio: Decimal,
    pub realized_profit: Decimal,
    pub estimated_profit: Decimal,
    /// Realized minus estimated profit.
    pub drift: Decimal,
}

impl Reconciliation {
    /// Realized profit as a share of the estimate, when the estimate is non-zero.
    #[must_use]
    pub fn capture_ratio(&self) -> Option<Decimal> {
        if self.estimated_profit.is_zero() {
            None
        } else {
            Some(self.realized_profit / self.estimated_profit)
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReconciliationEngine;

impl ReconciliationEngine {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Per-asset change implied by the fills of `report`.
    ///
    /// A buy receives the executed base quantity and spends the quote value
    /// of its fills. A sell is the mirror image.
    #[must_use]
    pub fn wallet_delta(plan: &Plan, report: &ExecutionReport) -> Wallet {
        let mut delta = Wallet::new();
        for leg in &report.legs {
            let (Some(fill), Some(action)) = (leg.fill(), plan.actions.get(leg.index)) else {
                continue;
            };
            if fill.executed_quantity.is_zero() {
                continue;
            }
            match action.side {
                Side::Buy => {
                    delta.credit(&action.base, fill.executed_quantity);
                    delta.debit(&action.quote, fill.quote_amount());
                }
                Side::Sell => {
                    delta.debit(&action.base, fill.executed_quantity);
                    delta.credit(&action.quote, fill.quote_amount());
                }
            }
        }
        delta
    }

    /// Computes realized profit of an executed opportunity.
    ///
    /// `books` should be the snapshot the opportunity was evaluated against.
    ///
    /// # Errors
    ///
    /// Propagates normalization failures such as [`EngineError::MissingMarket`].
    pub fn reconcile(
        &self,
        plan: &Plan,
        opportunity: &Opportunity,
        report: &ExecutionReport,
        markets: &MarketDirectory,
        books: &Books,
    ) -> Result<Reconciliation, EngineError> {
        let wallet_delta = Self::wallet_delta(plan, report);
        let normalized_delta = normalize_wallet(&wallet_delta, &plan.home_asset, markets, books)?;
        let fees = opportunity.fee_estimate * report.success_ratio;
        let realized_profit = normalized_delta.total() - fees;
        let drift = realized_profit - opportunity.estimated_profit;

        info!(
            opportunity_id = %opportunity.id,
            realized = %realized_profit,
            estimated = %opportunity.estimated_profit,
            drift = %drift,
            "Execution reconciled"
        );

        Ok(Reconciliation {
            opportunity_id: opportunity.id.clone(),
            home_asset: plan.home_asset.clone(),
            wallet_delta,
            normalized_delta,
            fees,
            success_ratio: report.success_ratio,
            realized_profit,
            estimated_profit: opportunity.estimated_profit,
            drift,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::{ExecutionStatus, Instruction};
    use crate::executor::{LegOutcome, LegReport};
    use crate::plan::{PlanCatalog, PlanSpec};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use spot_arb_core::{Fill, Market, OrderBook, OrderFill, OrderStatus, PriceLevel};

    fn catalog() -> PlanCatalog {
        let spec = PlanSpec::new(
            vec![
                Market::new("ETH", "USDT", 4),
                Market::new("ETH", "EUR", 4),
                Market::new("EUR", "USDT", 2),
            ],
            "USDT",
            dec!(200),
        );
        PlanCatalog::new(vec![Plan::new(0, "test", &spec).unwrap()])
    }

    fn books() -> Books {
        [
            ("ETHUSDT", dec!(199), dec!(200)),
            ("ETHEUR", dec!(180), dec!(181)),
            ("EURUSDT", dec!(1.1), dec!(1.11)),
        ]
        .into_iter()
        .map(|(symbol, bid, ask)| {
            (
                symbol.to_string(),
                OrderBook::new(
                    symbol,
                    vec![PriceLevel::new(bid, dec!(10000))],
                    vec![PriceLevel::new(ask, dec!(10000))],
                ),
            )
        })
        .collect()
    }

    fn filled(index: usize, symbol: &str, side: Side, fills: &[(Decimal, Decimal)]) -> LegReport {
        let executed: Decimal = fills.iter().map(|(_, q)| *q).sum();
        LegReport {
            index,
            instruction: Instruction {
                symbol: symbol.to_string(),
                side,
                quantity: executed,
                price: fills[0].0,
            },
            outcome: LegOutcome::Filled {
                fill: OrderFill {
                    order_id: format!("o-{index}"),
                    symbol: symbol.to_string(),
                    side,
                    status: OrderStatus::Filled,
                    requested_quantity: executed,
                    executed_quantity: executed,
                    fills: fills
                        .iter()
                        .map(|&(price, quantity)| Fill {
                            price,
                            quantity,
                            commission: Decimal::ZERO,
                            commission_asset: "BNB".to_string(),
                        })
                        .collect(),
                    transact_time: Utc::now(),
                },
            },
        }
    }

    fn skipped(index: usize, symbol: &str, side: Side, outcome: LegOutcome) -> LegReport {
        LegReport {
            index,
            instruction: Instruction {
                symbol: symbol.to_string(),
                side,
                quantity: dec!(1),
                price: dec!(1),
            },
            outcome,
        }
    }

    fn opportunity(fee_estimate: Decimal, estimated_profit: Decimal) -> Opportunity {
        Opportunity {
            id: "1-000000".to_string(),
            plan_id: 0,
            path: "ETHUSDT>ETHEUR>EURUSDT".to_string(),
            home_asset: "USDT".to_string(),
            start_amount: dec!(200),
            instructions: Vec::new(),
            wallet: Wallet::new(),
            fees: Wallet::new(),
            final_balance: dec!(200) + estimated_profit + fee_estimate,
            fee_estimate,
            estimated_profit,
            status: ExecutionStatus::Pass,
            realized_profit: None,
            execution_message: None,
            execution_time_ms: None,
            found_at: Utc::now(),
        }
    }

    fn report(legs: Vec<LegReport>, success_ratio: Decimal) -> ExecutionReport {
        ExecutionReport {
            opportunity_id: "1-000000".to_string(),
            legs,
            status: ExecutionStatus::Pass,
            success_ratio,
            needs_rebalance: false,
            message: String::new(),
            elapsed_ms: 5,
        }
    }

    #[test]
    fn test_full_loop_from_fills() {
        let catalog = catalog();
        let plan = &catalog.plans()[0];
        let report = report(
            vec![
                filled(0, "ETHUSDT", Side::Buy, &[(dec!(200), dec!(0.5)), (dec!(201), dec!(0.5))]),
                filled(1, "ETHEUR", Side::Sell, &[(dec!(181), dec!(1))]),
                filled(2, "EURUSDT", Side::Sell, &[(dec!(1.12), dec!(181))]),
            ],
            Decimal::ONE,
        );

        let delta = ReconciliationEngine::wallet_delta(plan, &report);
        assert_eq!(delta.get("ETH"), Decimal::ZERO);
        assert_eq!(delta.get("EUR"), Decimal::ZERO);
        assert_eq!(delta.get("USDT"), dec!(202.72) - dec!(200.5));

        let rec = ReconciliationEngine::new()
            .reconcile(plan, &opportunity(dec!(0.5), dec!(1)), &report, catalog.markets(), &books())
            .unwrap();
        assert_eq!(rec.realized_profit, dec!(2.22) - dec!(0.5));
        assert_eq!(rec.drift, dec!(0.72));
        assert_eq!(rec.capture_ratio(), Some(dec!(1.72)));
    }

    #[test]
    fn test_partial_execution_keeps_filled_leg() {
        let catalog = catalog();
        let plan = &catalog.plans()[0];
        let report = report(
            vec![
                filled(0, "ETHUSDT", Side::Buy, &[(dec!(200), dec!(1))]),
                skipped(
                    1,
                    "ETHEUR",
                    Side::Sell,
                    LegOutcome::InsufficientBalance {
                        reason: "ETH".to_string(),
                    },
                ),
                skipped(2, "EURUSDT", Side::Sell, LegOutcome::Skipped),
            ],
            Decimal::ONE / dec!(3),
        );

        let rec = ReconciliationEngine::new()
            .reconcile(plan, &opportunity(dec!(0.3), dec!(2)), &report, catalog.markets(), &books())
            .unwrap();

        assert_eq!(rec.wallet_delta.get("ETH"), dec!(1));
        assert_eq!(rec.wallet_delta.get("USDT"), dec!(-200));
        // 1 ETH valued at the 199 bid
        assert_eq!(rec.normalized_delta.total(), dec!(-1));
        assert_eq!(rec.fees, dec!(0.3) * (Decimal::ONE / dec!(3)));
        assert_eq!(rec.realized_profit, dec!(-1) - rec.fees);
    }

    #[test]
    fn test_nothing_filled() {
        let catalog = catalog();
        let plan = &catalog.plans()[0];
        let report = report(
            vec![skipped(
                0,
                "ETHUSDT",
                Side::Buy,
                LegOutcome::Failed {
                    reason: "timeout".to_string(),
                },
            )],
            Decimal::ZERO,
        );

        let rec = ReconciliationEngine::new()
            .reconcile(plan, &opportunity(dec!(0.3), Decimal::ZERO), &report, catalog.markets(), &books())
            .unwrap();
        assert!(rec.wallet_delta.is_empty());
        assert_eq!(rec.realized_profit, Decimal::ZERO);
        assert_eq!(rec.capture_ratio(), None);
    }
}
