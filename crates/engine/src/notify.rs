//! Records published by the controller.
//!
//! The controller never waits on a consumer. Sinks receive owned records and
//! must return promptly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spot_arb_core::{OrderBook, OrderFill};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::evaluator::Opportunity;
use crate::rebalance::RebalancePlan;
use crate::reconciler::Reconciliation;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Record {
    /// Evaluated opportunity with the books it was priced against
    Opportunity {
        opportunity: Opportunity,
        books: Vec<OrderBook>,
    },

    /// Exchange fill reports of one execution
    Fills {
        opportunity_id: String,
        fills: Vec<OrderFill>,
    },

    Reconciliation(Reconciliation),

    /// Advisory rebalance computed after an execution
    Rebalance {
        opportunity_id: Option<String>,
        plan: RebalancePlan,
    },

    /// Stream errors and accumulated evaluation exceptions
    Alert {
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl Record {
    #[must_use]
    pub fn alert(message: impl Into<String>) -> Self {
        Self::Alert {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Opportunity { .. } => "opportunity",
            Self::Fills { .. } => "fills",
            Self::Reconciliation(_) => "reconciliation",
            Self::Rebalance { .. } => "rebalance",
            Self::Alert { .. } => "alert",
        }
    }
}

/// Destination for published records.
pub trait NotificationSink: Send + Sync {
    fn publish(&self, record: Record);
}

/// Logs each record as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn publish(&self, record: Record) {
        match serde_json::to_string(&record) {
            Ok(json) => info!(kind = record.kind(), record = %json, "Record published"),
            Err(e) => warn!(kind = record.kind(), error = %e, "Failed to serialize record"),
        }
    }
}

/// Forwards records to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Record>,
}

impl ChannelSink {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Record>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn publish(&self, record: Record) {
        if self.tx.send(record).is_err() {
            warn!("Record receiver dropped");
        }
    }
}
