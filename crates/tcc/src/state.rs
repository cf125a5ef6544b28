//! Coordinator state machine and per-branch progress.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

/// The state of one global transaction.
///
/// State transitions:
/// ```text
/// Init ──► Trying ──┬──► Confirming ──► Done
///                   └──► Canceling  ──► Done
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DirectorState {
    /// Transaction ID generated, branch records created.
    #[default]
    Init,

    /// Try is running on every branch.
    Trying,

    /// Every try succeeded; confirm is running.
    Confirming,

    /// At least one try failed; cancel is running.
    Canceling,

    /// The protocol has settled (terminal state).
    Done,
}

impl DirectorState {
    /// Returns true if the transition from `self` to `next` is allowed.
    pub fn can_transition_to(&self, next: DirectorState) -> bool {
        matches!(
            (self, next),
            (DirectorState::Init, DirectorState::Trying)
                | (DirectorState::Trying, DirectorState::Confirming)
                | (DirectorState::Trying, DirectorState::Canceling)
                | (DirectorState::Confirming, DirectorState::Done)
                | (DirectorState::Canceling, DirectorState::Done)
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            DirectorState::Init => "Init",
            DirectorState::Trying => "Trying",
            DirectorState::Confirming => "Confirming",
            DirectorState::Canceling => "Canceling",
            DirectorState::Done => "Done",
        }
    }
}

impl std::fmt::Display for DirectorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a global transaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionOutcome {
    /// Every branch confirmed.
    Confirmed,

    /// A try failed and every reserved branch was canceled.
    Canceled,

    /// Every try succeeded but a confirm kept failing.
    ConfirmFailed,

    /// A try failed and a cancel kept failing.
    CancelFailed,
}

impl TransactionOutcome {
    /// Returns true if the branches were left in a consistent state.
    pub fn is_consistent(&self) -> bool {
        matches!(
            self,
            TransactionOutcome::Confirmed | TransactionOutcome::Canceled
        )
    }

    /// Returns the outcome name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionOutcome::Confirmed => "Confirmed",
            TransactionOutcome::Canceled => "Canceled",
            TransactionOutcome::ConfirmFailed => "ConfirmFailed",
            TransactionOutcome::CancelFailed => "CancelFailed",
        }
    }
}

impl std::fmt::Display for TransactionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Progress of one branch during one global transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BranchState {
    /// Try was invoked.
    pub tried: bool,
    /// Try returned success.
    pub try_succeeded: bool,
    /// Confirm was requested.
    pub confirmed: bool,
    /// Confirm eventually succeeded.
    pub confirm_succeeded: bool,
    /// Cancel was invoked.
    pub canceled: bool,
    /// Cancel eventually succeeded.
    pub cancel_succeeded: bool,
}

/// Live progress flags of one branch.
///
/// Each phase writes a branch's flags from a single task.
#[derive(Debug, Default)]
pub(crate) struct BranchFlags {
    pub(crate) tried: AtomicBool,
    pub(crate) try_succeeded: AtomicBool,
    pub(crate) confirmed: AtomicBool,
    pub(crate) confirm_succeeded: AtomicBool,
    pub(crate) canceled: AtomicBool,
    pub(crate) cancel_succeeded: AtomicBool,
}

impl BranchFlags {
    pub(crate) fn mark(flag: &AtomicBool) {
        flag.store(true, Ordering::Release);
    }

    pub(crate) fn is_set(flag: &AtomicBool) -> bool {
        flag.load(Ordering::Acquire)
    }

    pub(crate) fn snapshot(&self) -> BranchState {
        BranchState {
            tried: Self::is_set(&self.tried),
            try_succeeded: Self::is_set(&self.try_succeeded),
            confirmed: Self::is_set(&self.confirmed),
            confirm_succeeded: Self::is_set(&self.confirm_succeeded),
            canceled: Self::is_set(&self.canceled),
            cancel_succeeded: Self::is_set(&self.cancel_succeeded),
        }
    }
}
