//! Plan admission check.
//!
//! Validates every plan of a plan source against exchange rules and prints
//! the admitted loops followed by the rejected plans and their reasons.

use anyhow::Result;
use clap::Args;
use spot_arb_core::{AppConfig, MarketRules};
use spot_arb_engine::{PlanCatalog, PlanSource};
use std::collections::HashMap;

use super::load_json;

/// Arguments for the validate-plans command.
#[derive(Args, Debug)]
pub struct ValidatePlansArgs {
    /// Plan source (JSON). Defaults to `plans.path` from the config.
    #[arg(long)]
    pub plans: Option<String>,

    /// Exchange rules (JSON object keyed by symbol).
    #[arg(long)]
    pub rules: String,

    /// Fail if any plan is rejected.
    #[arg(long)]
    pub strict: bool,
}

/// Runs plan validation.
pub fn run_validate_plans(args: ValidatePlansArgs, config: &AppConfig) -> Result<()> {
    let plans_path = args.plans.as_deref().unwrap_or(&config.plans.path);
    let source: PlanSource = load_json(plans_path)?;
    let rules: HashMap<String, MarketRules> = load_json(&args.rules)?;

    let (catalog, rejected) = PlanCatalog::admit(&source, &rules);

    println!("\n=== Plan Validation: {} ===\n", source.instance_id);
    for plan in catalog.plans() {
        println!(
            "  OK       #{:<3} {:<32} start {} {}",
            plan.id,
            plan.label(),
            plan.start_amount,
            plan.home_asset
        );
    }
    for rejection in &rejected {
        println!("  REJECTED #{:<3} {}", rejection.plan_no, rejection.error);
    }
    println!(
        "\n{} admitted, {} rejected, {} symbols tracked\n",
        catalog.len(),
        rejected.len(),
        catalog.symbols().len()
    );

    if args.strict && !rejected.is_empty() {
        anyhow::bail!("{} plan(s) rejected", rejected.len());
    }
    Ok(())
}
