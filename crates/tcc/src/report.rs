//! Post-mortem view of a finished global transaction.

use std::time::Duration;

use chrono::{DateTime, Utc};
use common::TransactionId;
use serde::{Deserialize, Serialize};

use crate::error::TransactionError;
use crate::state::{BranchState, TransactionOutcome};

/// Final progress of one branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchReport {
    /// Branch name.
    pub name: String,
    /// Flags recorded while the transaction ran.
    pub state: BranchState,
}

/// Everything recorded about one global transaction.
#[derive(Debug)]
pub struct TransactionReport {
    transaction_id: TransactionId,
    outcome: TransactionOutcome,
    branches: Vec<BranchReport>,
    started_at: DateTime<Utc>,
    duration: Duration,
    error: Option<TransactionError>,
}

impl TransactionReport {
    pub(crate) fn new(
        transaction_id: TransactionId,
        outcome: TransactionOutcome,
        branches: Vec<BranchReport>,
        started_at: DateTime<Utc>,
        duration: Duration,
        error: Option<TransactionError>,
    ) -> Self {
        Self {
            transaction_id,
            outcome,
            branches,
            started_at,
            duration,
            error,
        }
    }

    /// Returns the transaction ID shared by all branches.
    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    /// Returns how the transaction ended.
    pub fn outcome(&self) -> TransactionOutcome {
        self.outcome
    }

    /// Returns the per-branch progress, in the order the branches were given.
    pub fn branches(&self) -> &[BranchReport] {
        &self.branches
    }

    /// Returns the progress of the first branch called `name`.
    pub fn branch(&self, name: &str) -> Option<&BranchState> {
        self.branches
            .iter()
            .find(|b| b.name == name)
            .map(|b| &b.state)
    }

    /// Returns when the transaction started.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Returns how long the protocol took to settle.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Returns the error, if the transaction failed.
    pub fn error(&self) -> Option<&TransactionError> {
        self.error.as_ref()
    }

    /// Returns true if every branch confirmed.
    pub fn is_confirmed(&self) -> bool {
        self.outcome == TransactionOutcome::Confirmed
    }

    /// Converts the report into the result of the transaction.
    pub fn into_result(self) -> Result<(), TransactionError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Renders the report as JSON for logging.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "transaction_id": self.transaction_id,
            "outcome": self.outcome,
            "started_at": self.started_at,
            "duration_ms": self.duration.as_millis() as u64,
            "branches": self.branches,
            "error": self.error.as_ref().map(|e| serde_json::json!({
                "phase": e.phase(),
                "service_name": e.service_name(),
                "message": e.to_string(),
            })),
        })
    }
}
