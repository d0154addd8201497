//! Advisory rebalance for a balance snapshot.

use anyhow::{Context, Result};
use clap::Args;
use rust_decimal::Decimal;
use spot_arb_core::{AppConfig, MarketRules};
use spot_arb_engine::{PriceBook, RebalanceEngine};
use std::collections::HashMap;

use super::load_json;

/// Arguments for the rebalance command.
#[derive(Args, Debug)]
pub struct RebalanceArgs {
    /// Free balances (JSON object asset -> amount).
    #[arg(long)]
    pub balances: String,

    /// Last prices (JSON object symbol -> price).
    #[arg(long)]
    pub prices: String,

    /// Exchange rules (JSON object keyed by symbol).
    #[arg(long, default_value = "config/rules.json")]
    pub rules: String,

    /// Reference asset override.
    #[arg(long)]
    pub reference: Option<String>,
}

/// Prints normalized balances, transfers and orders.
pub fn run_rebalance(args: RebalanceArgs, config: &AppConfig) -> Result<()> {
    let balances: HashMap<String, Decimal> = load_json(&args.balances)?;
    let prices: HashMap<String, Decimal> = load_json(&args.prices)?;
    let rules: HashMap<String, MarketRules> = load_json(&args.rules)?;

    let mut rebalance = config.rebalance.clone();
    if let Some(reference) = args.reference {
        rebalance.reference_asset = reference;
    }

    let prices = PriceBook::new(&prices, &rules);
    let plan = RebalanceEngine::new(rebalance)
        .advise(&balances, &prices)
        .context("Rebalance failed")?;

    println!("\n=== Balances in {} ===\n", plan.reference_asset);
    for (asset, value) in &plan.normalized {
        println!("  {asset:<6} {}", value.round_dp(8));
    }

    if plan.transfers.is_empty() {
        println!("\nNo transfers needed.\n");
        return Ok(());
    }

    println!("\n=== Transfers ===\n");
    for transfer in &plan.transfers {
        println!(
            "  {:<6} -> {:<6} {}",
            transfer.sell_asset,
            transfer.buy_asset,
            transfer.amount.round_dp(8)
        );
    }

    println!("\n=== Orders ===\n");
    println!("{}\n", plan.render());
    Ok(())
}
