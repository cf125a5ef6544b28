//! TCC error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned by a branch operation.
pub type BranchError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The phase in which a global transaction failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailedPhase {
    /// A branch's Try operation returned an error.
    TryFailed,

    /// A branch's Confirm operation kept failing after all retries.
    ConfirmFailed,

    /// A branch's Cancel operation kept failing after all retries.
    CancelFailed,
}

impl FailedPhase {
    /// Returns the phase name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailedPhase::TryFailed => "try failed",
            FailedPhase::ConfirmFailed => "confirm failed",
            FailedPhase::CancelFailed => "cancel failed",
        }
    }

    /// Returns a short label suitable for metric dimensions.
    pub fn label(&self) -> &'static str {
        match self {
            FailedPhase::TryFailed => "try",
            FailedPhase::ConfirmFailed => "confirm",
            FailedPhase::CancelFailed => "cancel",
        }
    }
}

impl std::fmt::Display for FailedPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Failure of one global transaction.
///
/// Names the phase that failed and the branch it failed in. The error the
/// branch returned is available through [`TransactionError::cause`] and
/// [`std::error::Error::source`].
#[derive(Debug, Error)]
#[error("{phase} in branch '{service_name}': {cause}")]
pub struct TransactionError {
    phase: FailedPhase,
    service_name: String,
    #[source]
    cause: BranchError,
}

impl TransactionError {
    /// Creates a new transaction error.
    pub fn new(phase: FailedPhase, service_name: impl Into<String>, cause: BranchError) -> Self {
        Self {
            phase,
            service_name: service_name.into(),
            cause,
        }
    }

    /// Returns the phase that failed.
    pub fn phase(&self) -> FailedPhase {
        self.phase
    }

    /// Returns the name of the branch that failed.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Returns the error reported by the branch.
    pub fn cause(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.cause.as_ref()
    }
}

/// Failures raised by the coordinator itself rather than by a branch.
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// Confirm was requested for a branch whose Try did not succeed.
    #[error("try did not succeed")]
    TryNotSucceeded,

    /// The task driving a branch panicked.
    #[error("branch task panicked: {0}")]
    TaskPanicked(String),
}

/// Result of one phase, fed by the join loop as branch tasks finish.
///
/// Only the first recorded error is kept.
#[derive(Debug, Default)]
pub(crate) struct FirstError(Option<TransactionError>);

impl FirstError {
    /// Records `error` unless another error was recorded first.
    ///
    /// Returns the error back when the slot was already taken.
    pub(crate) fn record(&mut self, error: TransactionError) -> Option<TransactionError> {
        if self.0.is_some() {
            return Some(error);
        }
        self.0 = Some(error);
        None
    }

    pub(crate) fn into_result(self) -> Result<(), TransactionError> {
        match self.0 {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
