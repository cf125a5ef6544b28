//! In-memory branch for tests and demos.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;

use crate::branch::BranchOperations;
use crate::error::BranchError;

/// Errors produced by [`InMemoryBranch`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InMemoryBranchError {
    /// Try was configured to fail.
    #[error("reservation rejected")]
    TryRejected,

    /// Confirm was configured to fail.
    #[error("confirm unavailable")]
    ConfirmUnavailable,

    /// Cancel was configured to fail.
    #[error("cancel unavailable")]
    CancelUnavailable,
}

#[derive(Debug, Clone, Copy, Default)]
enum FailureMode {
    #[default]
    Never,
    Times(u32),
    Always,
}

impl FailureMode {
    /// Consumes one failure, returning true when the call should fail.
    fn trip(&mut self) -> bool {
        match self {
            FailureMode::Never => false,
            FailureMode::Always => true,
            FailureMode::Times(0) => {
                *self = FailureMode::Never;
                false
            }
            FailureMode::Times(n) => {
                *n -= 1;
                true
            }
        }
    }
}

#[derive(Debug, Default)]
struct InMemoryBranchState {
    reserved: u32,
    committed: u32,
    try_calls: u32,
    confirm_calls: u32,
    cancel_calls: u32,
    fail_on_try: bool,
    confirm_failures: FailureMode,
    cancel_failures: FailureMode,
}

/// A branch that reserves and commits abstract units in memory.
///
/// Every successful `try` holds one unit. `confirm` moves a held unit to the
/// committed count and `cancel` releases it. Both are no-ops when nothing is
/// held, which keeps them idempotent under retries.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBranch {
    state: Arc<RwLock<InMemoryBranchState>>,
}

impl InMemoryBranch {
    /// Creates a new in-memory branch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the branch to fail every try call.
    pub fn set_fail_on_try(&self, fail: bool) {
        self.state.write().unwrap().fail_on_try = fail;
    }

    /// Configures the branch to fail every confirm call.
    pub fn set_fail_on_confirm(&self, fail: bool) {
        self.state.write().unwrap().confirm_failures = if fail {
            FailureMode::Always
        } else {
            FailureMode::Never
        };
    }

    /// Configures the branch to fail the next `times` confirm calls.
    pub fn fail_confirm_times(&self, times: u32) {
        self.state.write().unwrap().confirm_failures = FailureMode::Times(times);
    }

    /// Configures the branch to fail every cancel call.
    pub fn set_fail_on_cancel(&self, fail: bool) {
        self.state.write().unwrap().cancel_failures = if fail {
            FailureMode::Always
        } else {
            FailureMode::Never
        };
    }

    /// Configures the branch to fail the next `times` cancel calls.
    pub fn fail_cancel_times(&self, times: u32) {
        self.state.write().unwrap().cancel_failures = FailureMode::Times(times);
    }

    /// Returns the number of units currently held by a try.
    pub fn reserved(&self) -> u32 {
        self.state.read().unwrap().reserved
    }

    /// Returns the number of confirmed units.
    pub fn committed(&self) -> u32 {
        self.state.read().unwrap().committed
    }

    /// Returns how many times try was invoked.
    pub fn try_calls(&self) -> u32 {
        self.state.read().unwrap().try_calls
    }

    /// Returns how many times confirm was invoked.
    pub fn confirm_calls(&self) -> u32 {
        self.state.read().unwrap().confirm_calls
    }

    /// Returns how many times cancel was invoked.
    pub fn cancel_calls(&self) -> u32 {
        self.state.read().unwrap().cancel_calls
    }
}

#[async_trait]
impl BranchOperations for InMemoryBranch {
    async fn r#try(&self) -> Result<(), BranchError> {
        let mut state = self.state.write().unwrap();
        state.try_calls += 1;

        if state.fail_on_try {
            return Err(InMemoryBranchError::TryRejected.into());
        }

        state.reserved += 1;
        Ok(())
    }

    async fn confirm(&self) -> Result<(), BranchError> {
        let mut state = self.state.write().unwrap();
        state.confirm_calls += 1;

        if state.confirm_failures.trip() {
            return Err(InMemoryBranchError::ConfirmUnavailable.into());
        }

        if state.reserved > 0 {
            state.reserved -= 1;
            state.committed += 1;
        }
        Ok(())
    }

    async fn cancel(&self) -> Result<(), BranchError> {
        let mut state = self.state.write().unwrap();
        state.cancel_calls += 1;

        if state.cancel_failures.trip() {
            return Err(InMemoryBranchError::CancelUnavailable.into());
        }

        state.reserved = state.reserved.saturating_sub(1);
        Ok(())
    }
}
