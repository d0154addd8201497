use clap::{Parser, Subcommand};

mod commands;

use commands::{RebalanceArgs, ReplayArgs, ValidatePlansArgs};

#[derive(Parser)]
#[command(name = "spot-arb")]
#[command(about = "Single-exchange loop arbitrage: replay, plan validation and rebalancing", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, global = true, default_value = "config/Config.toml")]
    config: String,

    /// Config profile; `<config stem>.{profile}.toml` beside the config file overrides it
    #[arg(long, global = true, env = "ARB_PROFILE")]
    profile: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive the engine with recorded stream frames against the paper exchange
    Replay(ReplayArgs),
    /// Admit a plan source against exchange rules and report rejected plans
    ValidatePlans(ValidatePlansArgs),
    /// Print the rebalance orders for a balance snapshot
    Rebalance(RebalanceArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match &cli.profile {
        Some(profile) => spot_arb_core::ConfigLoader::load_from_with_profile(&cli.config, profile)?,
        None => spot_arb_core::ConfigLoader::load_from(&cli.config)?,
    };

    match cli.command {
        Commands::Replay(args) => commands::run_replay(args, &config).await?,
        Commands::ValidatePlans(args) => commands::run_validate_plans(args, &config)?,
        Commands::Rebalance(args) => commands::run_rebalance(args, &config)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_replay_arguments() {
        let cli = Cli::try_parse_from([
            "spot-arb",
            "replay",
            "--events",
            "frames.jsonl",
            "--balances",
            "balances.json",
            "--single-shot",
        ])
        .unwrap();

        assert_eq!(cli.config, "config/Config.toml");
        let Commands::Replay(args) = cli.command else {
            panic!("expected replay");
        };
        assert_eq!(args.events, "frames.jsonl");
        assert!(args.single_shot);
        assert!(!args.execute);
        assert!(args.snapshot.is_none());
    }

    #[test]
    fn test_profile_with_explicit_config() {
        let cli = Cli::try_parse_from([
            "spot-arb",
            "--config",
            "live/Bot.toml",
            "--profile",
            "paper",
            "validate-plans",
            "--rules",
            "rules.json",
        ])
        .unwrap();

        assert_eq!(cli.config, "live/Bot.toml");
        assert_eq!(cli.profile.as_deref(), Some("paper"));
    }

    #[test]
    fn test_rebalance_requires_prices() {
        assert!(Cli::try_parse_from(["spot-arb", "rebalance", "--balances", "b.json"]).is_err());
    }
}
