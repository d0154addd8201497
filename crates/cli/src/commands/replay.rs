//! Replay recorded stream frames through the engine.
//!
//! Frames are read from a JSONL file (one raw stream message per line) and fed
//! to the controller exactly as a live connection would deliver them. Book
//! frames are mirrored into a paper exchange so that executed opportunities
//! fill against the same depth they were priced on.
//!
//! An optional snapshot file, in the same frame format, preloads the paper
//! exchange's depth. The controller then seeds its store from it through
//! the exchange's order book endpoint before the stream starts.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use clap::Args;
use rust_decimal::Decimal;
use spot_arb_core::{AppConfig, BookStream, ExchangeClient, ExchangeError, MarketRules, StreamEvent};
use spot_arb_engine::{
    BotController, ChannelSink, ControllerConfig, ExecutionStatus, PaperExchange,
    PaperExchangeConfig, PlanCatalog, PlanSource, RebalanceAdvisor, RebalanceEngine, Record,
};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::load_json;

/// Arguments for the replay command.
#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Recorded stream frames (JSONL).
    #[arg(long)]
    pub events: String,

    /// Starting paper balances (JSON object asset -> amount).
    #[arg(long)]
    pub balances: String,

    /// Exchange rules (JSON object keyed by symbol).
    #[arg(long, default_value = "config/rules.json")]
    pub rules: String,

    /// Plan source (JSON). Defaults to `plans.path` from the config.
    #[arg(long)]
    pub plans: Option<String>,

    /// Depth frames (JSONL) served as the initial order book snapshot.
    #[arg(long)]
    pub snapshot: Option<String>,

    /// Execute profitable opportunities on the paper exchange.
    #[arg(long)]
    pub execute: bool,

    /// Stop after the first evaluation pass.
    #[arg(long)]
    pub single_shot: bool,

    /// Pause between frames in milliseconds.
    #[arg(long, default_value = "0")]
    pub frame_delay_ms: u64,

    /// Write every published record to this JSONL file.
    #[arg(long)]
    pub output: Option<String>,
}

// =============================================================================
// Replay Stream
// =============================================================================

/// [`BookStream`] over a JSONL recording.
#[derive(Debug, Clone)]
pub struct ReplayStream {
    path: PathBuf,
    paper: PaperExchange,
    frame_delay: Duration,
}

impl ReplayStream {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, paper: PaperExchange, frame_delay: Duration) -> Self {
        Self {
            path: path.into(),
            paper,
            frame_delay,
        }
    }
}

#[async_trait]
impl BookStream for ReplayStream {
    async fn subscribe(&self, symbols: &[String]) -> Result<mpsc::Receiver<String>, ExchangeError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ExchangeError::network(format!("{}: {e}", self.path.display())))?;
        let frames: Vec<String> = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        info!(path = %self.path.display(), frames = frames.len(), "Replaying recorded frames");

        let (tx, rx) = mpsc::channel(256);
        let paper = self.paper.clone();
        let tracked: Vec<String> = symbols.to_vec();
        let delay = self.frame_delay;

        tokio::spawn(async move {
            for frame in frames {
                if let Ok(StreamEvent::BookUpdate(update)) = StreamEvent::decode(&frame) {
                    if tracked.contains(&update.symbol) {
                        paper.set_book(update.into_book());
                    }
                }
                if tx.send(frame).await.is_err() {
                    debug!("Replay consumer gone");
                    break;
                }
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        });

        Ok(rx)
    }
}

/// Loads every depth frame of `path` into the paper exchange's books.
async fn load_snapshot(path: &str, paper: &PaperExchange) -> Result<usize> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {path}"))?;

    let mut loaded = 0;
    for line in raw.lines().map(str::trim).filter(|line| !line.is_empty()) {
        match StreamEvent::decode(line) {
            Ok(StreamEvent::BookUpdate(update)) => {
                paper.set_book(update.into_book());
                loaded += 1;
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Undecodable snapshot frame"),
        }
    }
    Ok(loaded)
}

/// Warns whenever the last book update is older than `stale_after`.
fn spawn_staleness_watchdog(controller: BotController, stale_after: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(stale_after / 2);
        loop {
            ticker.tick().await;
            let Some(last) = controller.last_book_update() else {
                continue;
            };
            let age = Utc::now() - last;
            if age.num_seconds() > i64::try_from(stale_after.as_secs()).unwrap_or(i64::MAX) {
                warn!(age_secs = age.num_seconds(), "Book feed stale");
            }
        }
    })
}

// =============================================================================
// Summary
// =============================================================================

#[derive(Debug, Default, PartialEq, Eq)]
struct ReplaySummary {
    opportunities: usize,
    profitable: usize,
    executed: BTreeMap<String, usize>,
    realized_profit: BTreeMap<String, Decimal>,
    alerts: usize,
    rebalances: usize,
}

fn summarize(records: &[Record]) -> ReplaySummary {
    let mut summary = ReplaySummary::default();
    for record in records {
        match record {
            Record::Opportunity { opportunity, .. } => {
                summary.opportunities += 1;
                if opportunity.is_profitable() {
                    summary.profitable += 1;
                }
                if opportunity.status != ExecutionStatus::NotExecuted {
                    *summary
                        .executed
                        .entry(opportunity.status.to_string())
                        .or_default() += 1;
                }
            }
            Record::Reconciliation(reconciliation) => {
                *summary
                    .realized_profit
                    .entry(reconciliation.home_asset.clone())
                    .or_default() += reconciliation.realized_profit;
            }
            Record::Alert { .. } => summary.alerts += 1,
            Record::Rebalance { .. } => summary.rebalances += 1,
            Record::Fills { .. } => {}
        }
    }
    summary
}

fn write_records(path: &str, records: &[Record]) -> Result<()> {
    let mut file = std::fs::File::create(path).with_context(|| format!("Failed to create {path}"))?;
    for record in records {
        serde_json::to_writer(&mut file, record)?;
        file.write_all(b"\n")?;
    }
    Ok(())
}

// =============================================================================
// Command
// =============================================================================

/// Runs the replay.
pub async fn run_replay(args: ReplayArgs, config: &AppConfig) -> Result<()> {
    let plans_path = args.plans.as_deref().unwrap_or(&config.plans.path);
    let source: PlanSource = load_json(plans_path)?;
    let rules: HashMap<String, MarketRules> = load_json(&args.rules)?;
    let balances: HashMap<String, Decimal> = load_json(&args.balances)?;

    let (catalog, rejected) = PlanCatalog::admit(&source, &rules);
    for rejection in &rejected {
        warn!(plan_no = rejection.plan_no, error = %rejection.error, "Plan not admitted");
    }
    if catalog.is_empty() {
        anyhow::bail!("No admissible plans in {plans_path}");
    }
    let symbols: Vec<String> = catalog.symbols().iter().cloned().collect();

    let paper = PaperExchange::new(PaperExchangeConfig {
        commission_rate: config.engine.taker_fee,
        ..PaperExchangeConfig::default()
    });
    for (symbol, rule) in &rules {
        paper.add_market(symbol, rule.clone());
    }
    paper.set_balances(balances);

    let mut controller_config = ControllerConfig::from(&config.engine);
    controller_config.execute |= args.execute;
    controller_config.loop_mode &= !args.single_shot;

    let (sink, mut records_rx) = ChannelSink::new();
    let advisor = RebalanceAdvisor::new(RebalanceEngine::new(config.rebalance.clone()), rules);
    let controller = BotController::new(
        catalog,
        Arc::new(paper.clone()),
        Arc::new(sink),
        controller_config,
        Some(advisor),
    );

    if let Some(snapshot) = &args.snapshot {
        let loaded = load_snapshot(snapshot, &paper).await?;
        let seeded = controller
            .seed_books(config.engine.book_depth)
            .await
            .with_context(|| format!("Initial books missing from {snapshot} ({loaded} loaded)"))?;
        info!(seeded, "Initial books seeded");
    }

    let stream = ReplayStream::new(&args.events, paper.clone(), Duration::from_millis(args.frame_delay_ms));
    let frames = stream
        .subscribe(&symbols)
        .await
        .with_context(|| format!("Failed to open {}", args.events))?;

    let watchdog = spawn_staleness_watchdog(
        controller.clone(),
        Duration::from_secs(config.feed.stale_after_secs.max(1)),
    );
    let stats = controller.run(frames).await;
    watchdog.abort();

    let mut records = Vec::new();
    while let Ok(record) = records_rx.try_recv() {
        records.push(record);
    }
    if let Some(output) = &args.output {
        write_records(output, &records)?;
        info!(path = %output, records = records.len(), "Records written");
    }

    let summary = summarize(&records);
    println!("\n=== Replay Summary ===\n");
    println!("  Passes:         {}", stats.started);
    println!("  Opportunities:  {} ({} profitable)", summary.opportunities, summary.profitable);
    for (status, count) in &summary.executed {
        println!("  Executed {status:<8} {count}");
    }
    for (asset, profit) in &summary.realized_profit {
        println!("  Realized:       {profit} {asset}");
    }
    println!("  Alerts:         {}", summary.alerts);
    println!("  Rebalances:     {}", summary.rebalances);
    if controller.is_shut_down() {
        println!("  Trading halted by rate limit");
    }

    println!("\n=== Paper Balances ===\n");
    let balances: BTreeMap<String, Decimal> = paper.fetch_balances().await?.into_iter().collect();
    for (asset, amount) in balances.iter().filter(|(_, amount)| !amount.is_zero()) {
        println!("  {asset:<6} {amount}");
    }
    println!();

    Ok(())
}
