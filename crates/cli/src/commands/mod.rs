//! CLI commands for the spot arbitrage engine.

pub mod rebalance;
pub mod replay;
pub mod validate_plans;

pub use rebalance::{run_rebalance, RebalanceArgs};
pub use replay::{run_replay, ReplayArgs};
pub use validate_plans::{run_validate_plans, ValidatePlansArgs};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::path::Path;

/// Reads and parses a JSON document.
pub fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}
