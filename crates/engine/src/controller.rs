//! Stream ingestion and the evaluation gate.
//!
//! [`BotController`] owns the live book store. Every tracked book update
//! overwrites its symbol's entry. Once every catalog symbol has a book and no
//! pass is running, the controller copies the store and evaluates the plans
//! touching the updated symbol against that copy on a spawned task, so
//! ingestion never waits on evaluation or order submission.
//!
//! The `busy` flag is a gate, not a queue. Updates that arrive while a pass
//! runs only refresh the live store, and the next pass sees the freshest
//! books. In single-shot mode the gate is never released after the first
//! pass.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spot_arb_core::{
    BookUpdate, EngineConfig, ExchangeClient, ExchangeError, MarketRules, StreamEvent,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::ExecutionError;
use crate::evaluator::{EvaluatorConfig, Opportunity, OpportunityEvaluator};
use crate::executor::{ExecutionCoordinator, ExecutorConfig};
use crate::notify::{NotificationSink, Record};
use crate::plan::{Plan, PlanCatalog};
use crate::rebalance::{PriceBook, RebalanceEngine, RebalancePlan};
use crate::reconciler::ReconciliationEngine;
use crate::wallet::Books;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Submit orders for profitable opportunities.
    pub execute: bool,
    /// Treat the last plan of every pass as profitable. Orders still go out
    /// only when `execute` is set.
    pub test_it: bool,
    /// Release the gate after each pass. Off means stop after the first one.
    pub loop_mode: bool,
    pub evaluator: EvaluatorConfig,
    pub executor: ExecutorConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for ControllerConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            execute: config.execute,
            test_it: config.test_it,
            loop_mode: config.loop_mode,
            evaluator: EvaluatorConfig::default().with_taker_fee(config.taker_fee),
            executor: ExecutorConfig::default().with_max_in_flight_legs(config.max_in_flight_legs),
        }
    }
}

/// Rebalance engine plus the exchange rules it converts transfers with.
#[derive(Debug, Clone)]
pub struct RebalanceAdvisor {
    pub engine: RebalanceEngine,
    pub rules: HashMap<String, MarketRules>,
}

impl RebalanceAdvisor {
    #[must_use]
    pub fn new(engine: RebalanceEngine, rules: HashMap<String, MarketRules>) -> Self {
        Self { engine, rules }
    }
}

/// Counters describing evaluation passes so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassStats {
    pub started: u64,
    pub completed: u64,
    /// Highest number of passes observed running at once.
    pub max_concurrent: usize,
}

// =============================================================================
// Controller
// =============================================================================

/// Initial book requests allowed per second.
const SEED_REQUESTS_PER_SECOND: usize = 5;

struct Inner {
    catalog: PlanCatalog,
    exchange: Arc<dyn ExchangeClient>,
    sink: Arc<dyn NotificationSink>,
    config: ControllerConfig,
    evaluator: OpportunityEvaluator,
    executor: ExecutionCoordinator,
    reconciler: ReconciliationEngine,
    advisor: Option<RebalanceAdvisor>,

    books: RwLock<Books>,
    busy: AtomicBool,
    exceptions: Mutex<Vec<String>>,
    last_book_update: RwLock<Option<DateTime<Utc>>>,
    balances: RwLock<Option<HashMap<String, Decimal>>>,

    active_passes: AtomicUsize,
    max_active_passes: AtomicUsize,
    passes_started: AtomicU64,
    passes_completed: AtomicU64,

    shutdown: watch::Sender<bool>,
}

/// Releases the gate when a pass ends, including by panic.
struct PassGuard<'a> {
    inner: &'a Inner,
    release: bool,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.inner.active_passes.fetch_sub(1, Ordering::SeqCst);
        self.inner.passes_completed.fetch_add(1, Ordering::SeqCst);
        if self.release {
            self.inner.busy.store(false, Ordering::SeqCst);
        }
    }
}

#[derive(Clone)]
pub struct BotController {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for BotController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotController")
            .field("config", &self.inner.config)
            .field("plans", &self.inner.catalog.len())
            .field("busy", &self.is_busy())
            .finish_non_exhaustive()
    }
}

impl BotController {
    #[must_use]
    pub fn new(
        catalog: PlanCatalog,
        exchange: Arc<dyn ExchangeClient>,
        sink: Arc<dyn NotificationSink>,
        config: ControllerConfig,
        advisor: Option<RebalanceAdvisor>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let evaluator = OpportunityEvaluator::with_config(config.evaluator.clone());
        let executor = ExecutionCoordinator::new(Arc::clone(&exchange), config.executor.clone());

        info!(
            plans = catalog.len(),
            symbols = catalog.symbols().len(),
            execute = config.execute,
            loop_mode = config.loop_mode,
            "Controller ready"
        );

        Self {
            inner: Arc::new(Inner {
                catalog,
                exchange,
                sink,
                config,
                evaluator,
                executor,
                reconciler: ReconciliationEngine::new(),
                advisor,
                books: RwLock::new(Books::new()),
                busy: AtomicBool::new(false),
                exceptions: Mutex::new(Vec::new()),
                last_book_update: RwLock::new(None),
                balances: RwLock::new(None),
                active_passes: AtomicUsize::new(0),
                max_active_passes: AtomicUsize::new(0),
                passes_started: AtomicU64::new(0),
                passes_completed: AtomicU64::new(0),
                shutdown,
            }),
        }
    }

    /// Applies one decoded stream event.
    ///
    /// Returns the handle of the evaluation pass this event dispatched, if any.
    /// Must be called from within a tokio runtime.
    pub fn handle_event(&self, event: StreamEvent) -> Option<JoinHandle<()>> {
        self.drain_exceptions();

        match event {
            StreamEvent::BookUpdate(update) => self.on_book_update(update),
            StreamEvent::ErrorEvent { message } => {
                warn!(message = %message, "Stream reported an error");
                self.inner
                    .sink
                    .publish(Record::alert(format!("stream error: {message}")));
                None
            }
            StreamEvent::AccountUpdate(update) => {
                debug!(assets = update.balances.len(), "Account snapshot updated");
                *self.inner.balances.write() = Some(update.balances);
                None
            }
        }
    }

    /// Fills the live store with a REST snapshot of every catalog symbol.
    ///
    /// Meant to run before subscribing. Requests are paced to five per
    /// second. Seeding never dispatches a pass.
    ///
    /// # Errors
    ///
    /// Returns the first failed fetch. Books fetched before it stay in the store.
    pub async fn seed_books(&self, depth: usize) -> Result<usize, ExchangeError> {
        let symbols: Vec<String> = self.inner.catalog.symbols().iter().cloned().collect();
        info!(symbols = symbols.len(), depth, "Fetching initial books");

        let mut window = Instant::now();
        for (fetched, symbol) in symbols.iter().enumerate() {
            if fetched > 0 && fetched % SEED_REQUESTS_PER_SECOND == 0 {
                let elapsed = window.elapsed();
                if elapsed < Duration::from_secs(1) {
                    tokio::time::sleep(Duration::from_secs(1) - elapsed).await;
                }
                window = Instant::now();
            }

            let book = self.inner.exchange.fetch_order_book(symbol, depth).await?;
            debug!(symbol = %symbol, levels = book.bids.len() + book.asks.len(), "Initial book fetched");
            self.inner.books.write().insert(symbol.clone(), book);
            *self.inner.last_book_update.write() = Some(Utc::now());
        }

        Ok(symbols.len())
    }

    /// Decodes and applies raw frames until the channel closes or shutdown is
    /// signalled, then waits for outstanding passes.
    pub async fn run(&self, mut frames: mpsc::Receiver<String>) -> PassStats {
        let mut shutdown = self.shutdown_signal();
        let mut pending: Vec<JoinHandle<()>> = Vec::new();

        loop {
            if *shutdown.borrow() {
                warn!("Shutdown signalled, ingestion stopped");
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                frame = frames.recv() => {
                    let Some(raw) = frame else {
                        info!("Stream closed");
                        break;
                    };
                    match StreamEvent::decode(&raw) {
                        Ok(event) => pending.extend(self.handle_event(event)),
                        Err(e) => warn!(error = %e, "Undecodable stream frame"),
                    }
                }
            }
            pending.retain(|handle| !handle.is_finished());
        }

        for handle in pending {
            if let Err(e) = handle.await {
                error!(error = %e, "Evaluation pass aborted");
            }
        }
        self.pass_stats()
    }

    /// Computes, publishes and returns an advisory rebalance.
    ///
    /// Uses the latest account snapshot from the stream, or fetches balances
    /// when none has arrived. Returns `None` without an advisor or on failure;
    /// failures are recorded as exceptions.
    pub async fn advise_rebalance(&self, opportunity_id: Option<&str>) -> Option<RebalancePlan> {
        self.inner.advise_rebalance(opportunity_id).await
    }

    /// Time of the most recent tracked book update.
    #[must_use]
    pub fn last_book_update(&self) -> Option<DateTime<Utc>> {
        *self.inner.last_book_update.read()
    }

    /// Flips to `true` when trading must stop.
    #[must_use]
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.inner.shutdown.subscribe()
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn pass_stats(&self) -> PassStats {
        PassStats {
            started: self.inner.passes_started.load(Ordering::SeqCst),
            completed: self.inner.passes_completed.load(Ordering::SeqCst),
            max_concurrent: self.inner.max_active_passes.load(Ordering::SeqCst),
        }
    }

    #[must_use]
    pub fn catalog(&self) -> &PlanCatalog {
        &self.inner.catalog
    }

    /// Symbols currently held in the live store.
    #[must_use]
    pub fn tracked_books(&self) -> usize {
        self.inner.books.read().len()
    }

    fn on_book_update(&self, update: BookUpdate) -> Option<JoinHandle<()>> {
        let symbols = self.inner.catalog.symbols();
        if !symbols.contains(&update.symbol) {
            debug!(symbol = %update.symbol, "Untracked symbol ignored");
            return None;
        }

        let trigger = update.symbol.clone();
        let snapshot = {
            let mut books = self.inner.books.write();
            books.insert(update.symbol.clone(), update.into_book());
            *self.inner.last_book_update.write() = Some(Utc::now());

            if !symbols.iter().all(|symbol| books.contains_key(symbol)) {
                return None;
            }
            if self
                .inner
                .busy
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return None;
            }
            books.clone()
        };

        let inner = Arc::clone(&self.inner);
        Some(tokio::spawn(async move {
            inner.run_pass(&trigger, snapshot).await;
        }))
    }

    fn drain_exceptions(&self) {
        let drained = std::mem::take(&mut *self.inner.exceptions.lock());
        if !drained.is_empty() {
            warn!(count = drained.len(), "Reporting evaluation exceptions");
            self.inner.sink.publish(Record::alert(drained.join("\n")));
        }
    }
}

impl Inner {
    async fn run_pass(&self, trigger: &str, books: Books) {
        let pass = self.passes_started.fetch_add(1, Ordering::SeqCst) + 1;
        let active = self.active_passes.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_passes.fetch_max(active, Ordering::SeqCst);
        let mut guard = PassGuard {
            inner: self,
            release: self.config.loop_mode,
        };

        debug!(pass, trigger, "Evaluation pass started");

        let plans: Vec<&Plan> = self.catalog.plans_for(trigger).collect();
        let last = plans.len().saturating_sub(1);
        for (position, plan) in plans.into_iter().enumerate() {
            let mut opportunity = match self.evaluator.evaluate(plan, &books, self.catalog.markets()) {
                Ok(opportunity) => opportunity,
                Err(e) => {
                    debug!(plan = plan.id, error = %e, "Evaluation failed");
                    self.record_exception(format!("plan {} ({}): {e}", plan.id, plan.label()));
                    continue;
                }
            };

            let forced = self.config.test_it && position == last;
            if self.config.execute && (opportunity.is_profitable() || forced) {
                if let Err(e) = self.execute(plan, &mut opportunity, &books).await {
                    error!(opportunity_id = %opportunity.id, error = %e, "Trading halted");
                    guard.release = false;
                    self.shutdown.send_replace(true);
                    if !e.fills().is_empty() {
                        self.sink.publish(Record::Fills {
                            opportunity_id: opportunity.id.clone(),
                            fills: e.fills().to_vec(),
                        });
                    }
                    self.publish_opportunity(plan, opportunity, &books);
                    self.sink.publish(Record::alert(format!("trading halted: {e}")));
                    return;
                }
            }

            self.publish_opportunity(plan, opportunity, &books);
        }

        debug!(pass, "Evaluation pass finished");
    }

    async fn execute(
        &self,
        plan: &Plan,
        opportunity: &mut Opportunity,
        books: &Books,
    ) -> Result<(), ExecutionError> {
        let report = self.executor.execute(opportunity).await?;
        report.apply_to(opportunity);

        self.sink.publish(Record::Fills {
            opportunity_id: opportunity.id.clone(),
            fills: report.fills(),
        });

        match self
            .reconciler
            .reconcile(plan, opportunity, &report, self.catalog.markets(), books)
        {
            Ok(reconciliation) => {
                opportunity.realized_profit = Some(reconciliation.realized_profit);
                self.sink.publish(Record::Reconciliation(reconciliation));
            }
            Err(e) => self.record_exception(format!("reconcile {}: {e}", opportunity.id)),
        }

        if report.needs_rebalance {
            self.advise_rebalance(Some(&opportunity.id)).await;
        }
        Ok(())
    }

    async fn advise_rebalance(&self, opportunity_id: Option<&str>) -> Option<RebalancePlan> {
        let advisor = self.advisor.as_ref()?;

        let cached = self.balances.read().clone();
        let balances = match cached {
            Some(balances) => balances,
            None => match self.exchange.fetch_balances().await {
                Ok(balances) => balances,
                Err(e) => {
                    self.record_exception(format!("rebalance balances: {e}"));
                    return None;
                }
            },
        };
        let prices = match self.exchange.fetch_prices().await {
            Ok(prices) => PriceBook::new(&prices, &advisor.rules),
            Err(e) => {
                self.record_exception(format!("rebalance prices: {e}"));
                return None;
            }
        };

        match advisor.engine.advise(&balances, &prices) {
            Ok(plan) => {
                if !plan.is_empty() {
                    info!(orders = plan.orders.len(), "Rebalance advised:\n{}", plan.render());
                }
                self.sink.publish(Record::Rebalance {
                    opportunity_id: opportunity_id.map(str::to_string),
                    plan: plan.clone(),
                });
                Some(plan)
            }
            Err(e) => {
                self.record_exception(format!("rebalance: {e}"));
                None
            }
        }
    }

    fn publish_opportunity(&self, plan: &Plan, opportunity: Opportunity, books: &Books) {
        info!(
            opportunity_id = %opportunity.id,
            path = %opportunity.path,
            profit = %opportunity.estimated_profit,
            status = %opportunity.status,
            "Opportunity evaluated"
        );
        let books = plan
            .symbols()
            .filter_map(|symbol| books.get(symbol).cloned())
            .collect();
        self.sink.publish(Record::Opportunity { opportunity, books });
    }

    fn record_exception(&self, message: String) {
        self.exceptions.lock().push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::ExecutionStatus;
    use crate::notify::ChannelSink;
    use crate::paper::{PaperExchange, PaperExchangeConfig};
    use crate::plan::PlanSpec;
    use rust_decimal_macros::dec;
    use spot_arb_core::{ExchangeError, Market, OrderBook, PriceLevel, RebalanceConfig, Side};
    use tokio::sync::mpsc::UnboundedReceiver;

    const TRIANGLE: [(&str, &str, &str); 3] = [
        ("ETHUSDT", "ETH", "USDT"),
        ("ETHEUR", "ETH", "EUR"),
        ("EURUSDT", "EUR", "USDT"),
    ];

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

    /// Bid/ask per triangle symbol. `eur_bid` 1.2 makes the loop profitable.
    fn quotes(eur_bid: Decimal) -> [(Decimal, Decimal); 3] {
        [
            (dec!(199), dec!(200)),
            (dec!(180), dec!(181)),
            (eur_bid, eur_bid + dec!(0.01)),
        ]
    }

    fn book(symbol: &str, bid: Decimal, ask: Decimal, depth: Decimal) -> OrderBook {
        OrderBook::new(
            symbol,
            vec![PriceLevel::new(bid, depth)],
            vec![PriceLevel::new(ask, depth)],
        )
    }

    fn events(eur_bid: Decimal, depth: Decimal) -> Vec<StreamEvent> {
        TRIANGLE
            .iter()
            .zip(quotes(eur_bid))
            .map(|((symbol, _, _), (bid, ask))| {
                let book = book(symbol, bid, ask, depth);
                StreamEvent::BookUpdate(BookUpdate {
                    symbol: book.symbol,
                    bids: book.bids,
                    asks: book.asks,
                    update_id: 1,
                    received_at: Utc::now(),
                })
            })
            .collect()
    }

    fn paper(eur_bid: Decimal, latency_ms: u64) -> PaperExchange {
        let exchange = PaperExchange::new(PaperExchangeConfig::fee_free().latency_ms(latency_ms));
        for ((symbol, base, quote), (bid, ask)) in TRIANGLE.iter().zip(quotes(eur_bid)) {
            exchange.add_market(symbol, MarketRules::new(base, quote, dec!(0.0001)));
            exchange.set_book(book(symbol, bid, ask, dec!(10000)));
        }
        exchange.set_balance("USDT", dec!(100000));
        exchange
    }

    fn config(execute: bool, loop_mode: bool) -> ControllerConfig {
        ControllerConfig {
            execute,
            test_it: false,
            loop_mode,
            evaluator: EvaluatorConfig::fee_free(),
            executor: ExecutorConfig::sequential(),
        }
    }

    fn controller(
        exchange: &PaperExchange,
        config: ControllerConfig,
        advisor: Option<RebalanceAdvisor>,
    ) -> (BotController, UnboundedReceiver<Record>) {
        let (sink, rx) = ChannelSink::new();
        let controller = BotController::new(
            catalog(),
            Arc::new(exchange.clone()),
            Arc::new(sink),
            config,
            advisor,
        );
        (controller, rx)
    }

    fn feed(controller: &BotController, events: Vec<StreamEvent>) -> Vec<JoinHandle<()>> {
        events
            .into_iter()
            .filter_map(|event| controller.handle_event(event))
            .collect()
    }

    fn drain(rx: &mut UnboundedReceiver<Record>) -> Vec<Record> {
        let mut records = Vec::new();
        while let Ok(record) = rx.try_recv() {
            records.push(record);
        }
        records
    }

    // ==================== Gate Tests ====================

    #[tokio::test]
    async fn test_waits_for_every_symbol() {
        let exchange = paper(dec!(1.1), 0);
        let (controller, _rx) = controller(&exchange, config(false, true), None);
        let mut events = events(dec!(1.1), dec!(1000));
        let last = events.pop().unwrap();

        assert!(feed(&controller, events).is_empty());
        assert!(controller
            .handle_event(StreamEvent::BookUpdate(BookUpdate {
                symbol: "BNBUSDT".to_string(),
                bids: Vec::new(),
                asks: Vec::new(),
                update_id: 1,
                received_at: Utc::now(),
            }))
            .is_none());
        assert_eq!(controller.tracked_books(), 2);

        let handle = controller.handle_event(last).unwrap();
        handle.await.unwrap();
        assert_eq!(controller.pass_stats().completed, 1);
        assert!(!controller.is_busy());
        assert!(controller.last_book_update().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_at_most_one_pass_in_flight() {
        let exchange = paper(dec!(1.2), 2);
        let (controller, _rx) = controller(&exchange, config(true, true), None);

        let producers: Vec<_> = (0..4)
            .map(|_| {
                let controller = controller.clone();
                tokio::spawn(async move {
                    let mut handles = Vec::new();
                    for _ in 0..50 {
                        handles.extend(feed(&controller, events(dec!(1.2), dec!(1000))));
                        tokio::task::yield_now().await;
                    }
                    handles
                })
            })
            .collect();

        for producer in producers {
            for handle in producer.await.unwrap() {
                handle.await.unwrap();
            }
        }

        let stats = controller.pass_stats();
        assert!(stats.started >= 1);
        assert_eq!(stats.started, stats.completed);
        assert_eq!(stats.max_concurrent, 1);
        assert!(!controller.is_busy());
    }

    #[tokio::test]
    async fn test_single_shot_keeps_gate_closed() {
        let exchange = paper(dec!(1.1), 0);
        let (controller, mut rx) = controller(&exchange, config(false, false), None);

        let handles = feed(&controller, events(dec!(1.1), dec!(1000)));
        assert_eq!(handles.len(), 1);
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(controller.is_busy());
        assert!(feed(&controller, events(dec!(1.2), dec!(1000))).is_empty());
        assert_eq!(controller.pass_stats().started, 1);

        let records = drain(&mut rx);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind(), "opportunity");
    }

    // ==================== Pass Tests ====================

    #[tokio::test]
    async fn test_exceptions_reported_on_next_event() {
        let exchange = paper(dec!(1.1), 0);
        let (controller, mut rx) = controller(&exchange, config(false, true), None);

        // 0.1 ETH of depth cannot absorb 200 USDT
        for handle in feed(&controller, events(dec!(1.1), dec!(0.1))) {
            handle.await.unwrap();
        }
        assert!(drain(&mut rx).is_empty());
        assert!(!controller.is_busy());

        assert!(controller
            .handle_event(StreamEvent::ErrorEvent {
                message: "socket closed".to_string(),
            })
            .is_none());

        let records = drain(&mut rx);
        assert_eq!(records.len(), 2);
        let Record::Alert { message, .. } = &records[0] else {
            panic!("expected alert, got {}", records[0].kind());
        };
        assert!(message.contains("ETHUSDT>ETHEUR>EURUSDT"));
        let Record::Alert { message, .. } = &records[1] else {
            panic!("expected alert, got {}", records[1].kind());
        };
        assert_eq!(message, "stream error: socket closed");
    }

    #[tokio::test]
    async fn test_profitable_loop_executed_and_reconciled() {
        let exchange = paper(dec!(1.2), 0);
        let (controller, mut rx) = controller(&exchange, config(true, true), None);

        for handle in feed(&controller, events(dec!(1.2), dec!(1000))) {
            handle.await.unwrap();
        }

        let kinds: Vec<&str> = drain(&mut rx).iter().map(Record::kind).collect();
        assert_eq!(kinds, vec!["fills", "reconciliation", "opportunity"]);
        assert_eq!(exchange.balance("USDT"), dec!(100016));
    }

    #[tokio::test]
    async fn test_unprofitable_loop_not_executed() {
        let exchange = paper(dec!(1.1), 0);
        let (controller, mut rx) = controller(&exchange, config(true, true), None);

        for handle in feed(&controller, events(dec!(1.1), dec!(1000))) {
            handle.await.unwrap();
        }

        assert!(exchange.submitted_orders().is_empty());
        let records = drain(&mut rx);
        let Record::Opportunity { opportunity, books } = &records[0] else {
            panic!("expected opportunity");
        };
        assert_eq!(opportunity.estimated_profit, dec!(-2));
        assert_eq!(opportunity.status, ExecutionStatus::NotExecuted);
        assert_eq!(books.len(), 3);
    }

    #[tokio::test]
    async fn test_it_forces_last_plan() {
        let exchange = paper(dec!(1.1), 0);
        let mut config = config(true, true);
        config.test_it = true;
        let (controller, _rx) = controller(&exchange, config, None);

        for handle in feed(&controller, events(dec!(1.1), dec!(1000))) {
            handle.await.unwrap();
        }

        assert_eq!(exchange.orders_for("ETHUSDT"), 1);
        assert_eq!(exchange.balance("USDT"), dec!(99998));
    }

    #[tokio::test]
    async fn test_it_without_execute_submits_nothing() {
        let exchange = paper(dec!(1.1), 0);
        let mut config = config(false, true);
        config.test_it = true;
        let (controller, mut rx) = controller(&exchange, config, None);

        for handle in feed(&controller, events(dec!(1.1), dec!(1000))) {
            handle.await.unwrap();
        }

        assert!(exchange.submitted_orders().is_empty());
        assert_eq!(exchange.balance("USDT"), dec!(100000));
        let kinds: Vec<&str> = drain(&mut rx).iter().map(Record::kind).collect();
        assert_eq!(kinds, vec!["opportunity"]);
    }

    #[tokio::test]
    async fn test_rate_limit_stops_trading() {
        let exchange = paper(dec!(1.2), 0);
        exchange.fail_next("ETHUSDT", ExchangeError::RateLimited { status_code: 429 });
        let (controller, mut rx) = controller(&exchange, config(true, true), None);
        let shutdown = controller.shutdown_signal();

        for handle in feed(&controller, events(dec!(1.2), dec!(1000))) {
            handle.await.unwrap();
        }

        assert!(*shutdown.borrow());
        assert!(controller.is_shut_down());
        assert!(controller.is_busy());
        assert!(feed(&controller, events(dec!(1.2), dec!(1000))).is_empty());

        let kinds: Vec<&str> = drain(&mut rx).iter().map(Record::kind).collect();
        assert_eq!(kinds, vec!["opportunity", "alert"]);
    }

    #[tokio::test]
    async fn test_rate_limit_publishes_earlier_fills() {
        let exchange = paper(dec!(1.2), 0);
        exchange.fail_next("ETHEUR", ExchangeError::RateLimited { status_code: 429 });
        let (controller, mut rx) = controller(&exchange, config(true, true), None);

        for handle in feed(&controller, events(dec!(1.2), dec!(1000))) {
            handle.await.unwrap();
        }

        assert!(controller.is_shut_down());
        let records = drain(&mut rx);
        let kinds: Vec<&str> = records.iter().map(Record::kind).collect();
        assert_eq!(kinds, vec!["fills", "opportunity", "alert"]);

        let Record::Fills { fills, .. } = &records[0] else {
            panic!("expected fills");
        };
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].symbol, "ETHUSDT");
        assert_eq!(exchange.orders_for("EURUSDT"), 0);
    }

    // ==================== Seeding Tests ====================

    #[tokio::test]
    async fn test_seed_books_fills_store_without_pass() {
        let exchange = paper(dec!(1.1), 0);
        let (controller, mut rx) = controller(&exchange, config(false, true), None);

        assert_eq!(controller.seed_books(10).await.unwrap(), 3);
        assert_eq!(controller.tracked_books(), 3);
        assert!(controller.last_book_update().is_some());
        assert_eq!(controller.pass_stats().started, 0);
        assert!(drain(&mut rx).is_empty());

        // a single stream update now completes the set
        let mut events = events(dec!(1.1), dec!(1000));
        let handle = controller.handle_event(events.remove(0)).unwrap();
        handle.await.unwrap();
        assert_eq!(controller.pass_stats().completed, 1);
    }

    #[tokio::test]
    async fn test_seed_books_reports_unknown_symbol() {
        let exchange = PaperExchange::new(PaperExchangeConfig::fee_free());
        let (controller, _rx) = controller(&exchange, config(false, true), None);

        let err = controller.seed_books(10).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Rejected { .. }));
        assert_eq!(controller.tracked_books(), 0);
        assert!(controller.last_book_update().is_none());
    }

    #[tokio::test]
    async fn test_insufficient_balance_triggers_rebalance_advice() {
        let exchange = paper(dec!(1.2), 0);
        exchange.set_balance("USDT", dec!(800));
        exchange.fail_next("ETHEUR", ExchangeError::insufficient_balance("ETH"));

        let rules: HashMap<String, MarketRules> = TRIANGLE
            .iter()
            .map(|(symbol, base, quote)| {
                ((*symbol).to_string(), MarketRules::new(base, quote, dec!(0.0001)))
            })
            .collect();
        let engine = RebalanceEngine::new(RebalanceConfig {
            reference_asset: "USDT".to_string(),
            bottom_limit: dec!(250),
            min_trade_size: dec!(1),
            ..RebalanceConfig::default()
        });
        let (controller, mut rx) = controller(
            &exchange,
            config(true, true),
            Some(RebalanceAdvisor::new(engine, rules)),
        );

        for handle in feed(&controller, events(dec!(1.2), dec!(1000))) {
            handle.await.unwrap();
        }

        let records = drain(&mut rx);
        let kinds: Vec<&str> = records.iter().map(Record::kind).collect();
        assert_eq!(kinds, vec!["fills", "reconciliation", "rebalance", "opportunity"]);

        let Record::Rebalance { opportunity_id, plan } = &records[2] else {
            panic!("expected rebalance");
        };
        assert!(opportunity_id.is_some());
        assert_eq!(plan.orders.len(), 1);
        assert_eq!(plan.orders[0].symbol, "ETHUSDT");
        assert_eq!(plan.orders[0].side, Side::Buy);

        let Record::Opportunity { opportunity, .. } = &records[3] else {
            panic!("expected opportunity");
        };
        assert_eq!(opportunity.status, ExecutionStatus::Missed);
        assert!(!controller.is_busy());
    }

    #[tokio::test]
    async fn test_account_update_feeds_rebalance() {
        let exchange = paper(dec!(1.1), 0);
        let rules: HashMap<String, MarketRules> = TRIANGLE
            .iter()
            .map(|(symbol, base, quote)| {
                ((*symbol).to_string(), MarketRules::new(base, quote, dec!(0.0001)))
            })
            .collect();
        let engine = RebalanceEngine::new(RebalanceConfig {
            reference_asset: "USDT".to_string(),
            bottom_limit: dec!(100),
            min_trade_size: dec!(1),
            ..RebalanceConfig::default()
        });
        let (controller, _rx) = controller(
            &exchange,
            config(false, true),
            Some(RebalanceAdvisor::new(engine, rules)),
        );

        controller.handle_event(StreamEvent::AccountUpdate(spot_arb_core::AccountUpdate {
            balances: [("USDT".to_string(), dec!(50)), ("ETH".to_string(), dec!(2))]
                .into_iter()
                .collect(),
            received_at: Utc::now(),
        }));

        let plan = controller.advise_rebalance(None).await.unwrap();
        // ETH 2 at the 199.5 mid funds the USDT deficit
        assert_eq!(plan.transfers.len(), 1);
        assert_eq!(plan.transfers[0].sell_asset, "ETH");
        assert_eq!(plan.transfers[0].amount, dec!(50));
        assert_eq!(plan.orders[0].side, Side::Sell);
    }
}
