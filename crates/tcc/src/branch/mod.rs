//! Branch services taking part in a global transaction.

pub mod in_memory;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BranchError;

pub use in_memory::{InMemoryBranch, InMemoryBranchError};

/// The three operations a participant exposes to the coordinator.
///
/// `confirm` and `cancel` may be invoked more than once for the same
/// reservation because the coordinator retries them, so implementations must
/// be idempotent. `try` must record whatever side effect `cancel` needs to
/// undo.
#[async_trait]
pub trait BranchOperations: Send + Sync {
    /// Tentatively reserves the branch's resources.
    async fn r#try(&self) -> Result<(), BranchError>;

    /// Commits a reservation made by a successful `try`.
    async fn confirm(&self) -> Result<(), BranchError>;

    /// Releases a reservation made by a successful `try`.
    async fn cancel(&self) -> Result<(), BranchError>;
}

/// A named participant in a global transaction.
///
/// The service is an immutable definition: progress flags for a run live in
/// the coordinator, so one service can be handed to many runs.
#[derive(Clone)]
pub struct BranchService {
    name: Arc<str>,
    operations: Arc<dyn BranchOperations>,
}

impl BranchService {
    /// Creates a branch service from an implementation of [`BranchOperations`].
    pub fn new(name: impl Into<String>, operations: impl BranchOperations + 'static) -> Self {
        Self::from_arc(name, Arc::new(operations))
    }

    /// Creates a branch service sharing an existing operations object.
    pub fn from_arc(name: impl Into<String>, operations: Arc<dyn BranchOperations>) -> Self {
        let name: String = name.into();
        Self {
            name: Arc::from(name),
            operations,
        }
    }

    /// Creates a branch service from three async closures.
    pub fn from_fns<T, C, X, TF, CF, XF>(
        name: impl Into<String>,
        try_fn: T,
        confirm_fn: C,
        cancel_fn: X,
    ) -> Self
    where
        T: Fn() -> TF + Send + Sync + 'static,
        C: Fn() -> CF + Send + Sync + 'static,
        X: Fn() -> XF + Send + Sync + 'static,
        TF: Future<Output = Result<(), BranchError>> + Send + 'static,
        CF: Future<Output = Result<(), BranchError>> + Send + 'static,
        XF: Future<Output = Result<(), BranchError>> + Send + 'static,
    {
        Self::new(
            name,
            FnBranch {
                try_fn,
                confirm_fn,
                cancel_fn,
            },
        )
    }

    /// Returns the branch name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    pub(crate) fn operations(&self) -> &Arc<dyn BranchOperations> {
        &self.operations
    }
}

impl std::fmt::Debug for BranchService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BranchService")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Adapts three closures into [`BranchOperations`].
pub struct FnBranch<T, C, X> {
    try_fn: T,
    confirm_fn: C,
    cancel_fn: X,
}

#[async_trait]
impl<T, C, X, TF, CF, XF> BranchOperations for FnBranch<T, C, X>
where
    T: Fn() -> TF + Send + Sync,
    C: Fn() -> CF + Send + Sync,
    X: Fn() -> XF + Send + Sync,
    TF: Future<Output = Result<(), BranchError>> + Send,
    CF: Future<Output = Result<(), BranchError>> + Send,
    XF: Future<Output = Result<(), BranchError>> + Send,
{
    async fn r#try(&self) -> Result<(), BranchError> {
        (self.try_fn)().await
    }

    async fn confirm(&self) -> Result<(), BranchError> {
        (self.confirm_fn)().await
    }

    async fn cancel(&self) -> Result<(), BranchError> {
        (self.cancel_fn)().await
    }
}
