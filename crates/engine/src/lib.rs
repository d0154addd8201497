//! Single-exchange multi-leg spot arbitrage.
//!
//! A plan is a closed loop of markets that starts and ends in a home asset.
//! Each book update refreshes a live store; complete snapshots are priced by
//! walking the book for every leg, and profitable loops are submitted as
//! immediate-or-cancel orders.
//!
//! ```text
//! BUY  ETHUSDT   200 USDT -> 1 ETH      (walk asks)
//! SELL ETHEUR    1 ETH    -> 180 EUR    (walk bids)
//! SELL EURUSDT   180 EUR  -> 198 USDT   (walk bids)
//!                            profit: -2 USDT
//! ```
//!
//! # Modules
//!
//! - [`book_walker`]: price impact of an amount against book levels
//! - [`plan`]: plan construction, validation and the catalog
//! - [`evaluator`]: loop simulation and opportunity pricing
//! - [`executor`]: bounded leg fan-out with partial-failure handling
//! - [`reconciler`]: realized profit from fills
//! - [`rebalance`]: greedy capital redistribution
//! - [`controller`]: stream ingestion and the evaluation gate
//! - [`notify`]: published records and sinks
//! - [`paper`]: in-memory exchange

pub mod book_walker;
pub mod controller;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod notify;
pub mod paper;
pub mod plan;
pub mod rebalance;
pub mod reconciler;
pub mod rounding;
pub mod wallet;

// Re-export main types
pub use book_walker::{walk_book, BookWalk, Denomination};
pub use controller::{BotController, ControllerConfig, PassStats, RebalanceAdvisor};
pub use error::{EngineError, ExecutionError};
pub use evaluator::{
    EvaluatorConfig, ExecutionStatus, Instruction, Opportunity, OpportunityEvaluator,
};
pub use executor::{ExecutionCoordinator, ExecutionReport, ExecutorConfig, LegOutcome, LegReport};
pub use notify::{ChannelSink, NotificationSink, Record, TracingSink};
pub use paper::{PaperExchange, PaperExchangeConfig};
pub use plan::{
    validate_against_rules, Action, MarketDirectory, Plan, PlanCatalog, PlanSource, PlanSpec,
    PlanStrategy, Rejection,
};
pub use rebalance::{PriceBook, RebalanceEngine, RebalanceOrder, RebalancePlan, Transfer};
pub use reconciler::{Reconciliation, ReconciliationEngine};
pub use rounding::{round_down, round_even, round_quantity, round_up, RoundingMode};
pub use wallet::{convert, normalize_wallet, Books, Wallet};
