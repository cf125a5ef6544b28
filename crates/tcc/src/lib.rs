//! Try-Confirm-Cancel transaction coordination.
//!
//! This crate drives a set of independently owned branches through the
//! TCC protocol to approximate atomicity across services that do not share
//! a transaction manager:
//! 1. Try every branch concurrently
//! 2. If every try succeeded, confirm every branch
//! 3. Otherwise, cancel every branch whose try succeeded
//!
//! Confirm and cancel are retried with exponential backoff. A run settles
//! completely before [`Director::direct`] returns.

pub mod branch;
pub mod config;
pub mod director;
pub mod error;
pub mod report;
pub mod retry;
pub mod state;

pub use branch::{BranchOperations, BranchService, FnBranch, InMemoryBranch, InMemoryBranchError};
pub use common::TransactionId;
pub use config::{DEFAULT_MAX_RETRIES, DirectorConfig, DirectorOption, RetryConfig};
pub use director::Director;
pub use error::{BranchError, CoordinationError, FailedPhase, TransactionError};
pub use report::{BranchReport, TransactionReport};
pub use retry::{
    Backoff, ExponentialBackoff, ExponentialRetryPolicy, RetryOutcome, RetryPolicy,
    WithMaxRetries, retry,
};
pub use state::{BranchState, DirectorState, TransactionOutcome};
