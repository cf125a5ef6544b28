//! Director for orchestrating Try-Confirm-Cancel transactions.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use common::TransactionId;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::Instrument;

use crate::branch::{BranchOperations, BranchService};
use crate::config::{DirectorConfig, DirectorOption};
use crate::error::{BranchError, CoordinationError, FailedPhase, FirstError, TransactionError};
use crate::report::{BranchReport, TransactionReport};
use crate::retry::{ExponentialRetryPolicy, RetryPolicy, retry};
use crate::state::{BranchFlags, DirectorState, TransactionOutcome};

/// Drives a fixed set of branches through the Try-Confirm-Cancel protocol.
///
/// Try runs concurrently on every branch. If all of them succeed, Confirm
/// runs on every branch; otherwise Cancel runs on every branch whose Try
/// succeeded. Confirm and Cancel are retried with backoff and pass through a
/// coordinator-wide gate that admits `retry_concurrency` calls at a time
/// (one by default, which serializes them across branches).
///
/// Progress flags live in records created for each run, so a director and
/// its services can be reused, including by overlapping runs.
pub struct Director {
    services: Vec<BranchService>,
    config: DirectorConfig,
    retry_policy: Arc<dyn RetryPolicy>,
    retry_gate: Arc<Semaphore>,
}

impl Director {
    /// Creates a director from the default configuration adjusted by `options`.
    pub fn new(
        services: Vec<BranchService>,
        options: impl IntoIterator<Item = DirectorOption>,
    ) -> Self {
        Self::from_config(services, DirectorConfig::from_options(options))
    }

    /// Creates a director from an explicit configuration.
    pub fn from_config(services: Vec<BranchService>, config: DirectorConfig) -> Self {
        let retry_policy = Arc::new(ExponentialRetryPolicy::new(config.retry.clone()));
        let retry_gate = Arc::new(Semaphore::new(
            config.retry_concurrency.clamp(1, Semaphore::MAX_PERMITS),
        ));
        Self {
            services,
            config,
            retry_policy,
            retry_gate,
        }
    }

    /// Replaces the backoff policy used for confirm and cancel.
    pub fn with_retry_policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.retry_policy = Arc::new(policy);
        self
    }

    /// Returns the branches this director coordinates.
    pub fn services(&self) -> &[BranchService] {
        &self.services
    }

    /// Returns the configuration.
    pub fn config(&self) -> &DirectorConfig {
        &self.config
    }

    /// Runs one global transaction and returns its error, if any.
    ///
    /// When several branches fail in the same phase, the error of whichever
    /// failure is observed first is returned. If cancel fails after a try
    /// failure, the cancel error is returned instead of the try error.
    pub async fn direct(&self) -> Result<(), TransactionError> {
        self.execute().await.into_result()
    }

    /// Runs one global transaction and returns everything recorded about it.
    pub async fn execute(&self) -> TransactionReport {
        self.run(TransactionId::new()).await
    }

    #[tracing::instrument(
        skip(self, transaction_id),
        fields(transaction_id = %transaction_id, branches = self.services.len())
    )]
    async fn run(&self, transaction_id: TransactionId) -> TransactionReport {
        metrics::counter!("tcc_transactions_total").increment(1);
        let started_at = Utc::now();
        let start = Instant::now();

        let participants: Vec<Participant> =
            self.services.iter().cloned().map(Participant::new).collect();
        let mut state = DirectorState::Init;
        tracing::info!("transaction started");

        transition(&mut state, DirectorState::Trying);
        let (outcome, result) = match self.try_all(&participants).await {
            Ok(()) => {
                transition(&mut state, DirectorState::Confirming);
                match self.confirm_all(&participants).await {
                    Ok(()) => (TransactionOutcome::Confirmed, Ok(())),
                    Err(err) => (TransactionOutcome::ConfirmFailed, Err(err)),
                }
            }
            Err(try_err) => {
                transition(&mut state, DirectorState::Canceling);
                match self.cancel_all(&participants).await {
                    Ok(()) => (TransactionOutcome::Canceled, Err(try_err)),
                    Err(cancel_err) => {
                        tracing::error!(superseded = %try_err, "cancel failed after try failure");
                        (TransactionOutcome::CancelFailed, Err(cancel_err))
                    }
                }
            }
        };
        transition(&mut state, DirectorState::Done);

        let duration = start.elapsed();
        metrics::histogram!("tcc_transaction_duration_seconds").record(duration.as_secs_f64());
        match &result {
            Ok(()) => {
                metrics::counter!("tcc_transactions_confirmed").increment(1);
                tracing::info!(?duration, "transaction confirmed");
            }
            Err(err) => {
                if outcome == TransactionOutcome::Canceled {
                    metrics::counter!("tcc_transactions_canceled").increment(1);
                }
                metrics::counter!("tcc_transactions_failed", "phase" => err.phase().label())
                    .increment(1);
                tracing::warn!(%outcome, error = %err, ?duration, "transaction failed");
            }
        }

        let branches = participants
            .iter()
            .map(|p| BranchReport {
                name: p.service.name().to_string(),
                state: p.flags.snapshot(),
            })
            .collect();

        TransactionReport::new(
            transaction_id,
            outcome,
            branches,
            started_at,
            duration,
            result.err(),
        )
    }

    async fn try_all(&self, participants: &[Participant]) -> Result<(), TransactionError> {
        run_phase(FailedPhase::TryFailed, participants, Participant::try_branch).await
    }

    async fn confirm_all(&self, participants: &[Participant]) -> Result<(), TransactionError> {
        let gate = self.retry_gate();
        run_phase(FailedPhase::ConfirmFailed, participants, |p| {
            p.confirm_branch(gate.clone())
        })
        .await
    }

    async fn cancel_all(&self, participants: &[Participant]) -> Result<(), TransactionError> {
        let gate = self.retry_gate();
        run_phase(FailedPhase::CancelFailed, participants, |p| {
            p.cancel_branch(gate.clone())
        })
        .await
    }

    fn retry_gate(&self) -> RetryGate {
        RetryGate {
            policy: Arc::clone(&self.retry_policy),
            permits: Arc::clone(&self.retry_gate),
        }
    }
}

impl std::fmt::Debug for Director {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Director")
            .field("services", &self.services)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn transition(state: &mut DirectorState, next: DirectorState) {
    debug_assert!(state.can_transition_to(next), "{state} -> {next}");
    tracing::debug!(from = %state, to = %next, "state transition");
    *state = next;
}

/// Spawns one task per participant and waits for all of them.
async fn run_phase<F, Fut>(
    phase: FailedPhase,
    participants: &[Participant],
    task: F,
) -> Result<(), TransactionError>
where
    F: Fn(Participant) -> Fut,
    Fut: Future<Output = Result<(), TransactionError>> + Send + 'static,
{
    let mut tasks = JoinSet::new();
    let mut names = HashMap::with_capacity(participants.len());

    for participant in participants {
        let name = participant.service.shared_name();
        let span = tracing::debug_span!("branch", phase = phase.label(), branch = %name);
        let handle = tasks.spawn(task(participant.clone()).instrument(span));
        names.insert(handle.id(), name);
    }

    let mut first_error = FirstError::default();
    while let Some(joined) = tasks.join_next().await {
        let error = match joined {
            Ok(Ok(())) => continue,
            Ok(Err(err)) => err,
            Err(join_error) => {
                let name = names
                    .get(&join_error.id())
                    .map(|n| n.to_string())
                    .unwrap_or_default();
                let cause = CoordinationError::TaskPanicked(describe(join_error));
                TransactionError::new(phase, name, cause.into())
            }
        };
        if let Some(dropped) = first_error.record(error) {
            tracing::debug!(error = %dropped, "additional failure in phase");
        }
    }

    first_error.into_result()
}

fn describe(join_error: JoinError) -> String {
    if join_error.is_cancelled() {
        return "task cancelled".to_string();
    }
    let payload = join_error.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Backoff policy and permits shared by the retry-guarded calls of a phase.
#[derive(Clone)]
struct RetryGate {
    policy: Arc<dyn RetryPolicy>,
    permits: Arc<Semaphore>,
}

impl RetryGate {
    /// Runs `operation` with retries while holding a permit.
    async fn run<F, Fut>(
        &self,
        phase: FailedPhase,
        name: &str,
        operation: F,
    ) -> Result<(), TransactionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), BranchError>>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|err| TransactionError::new(phase, name, err.into()))?;

        let mut backoff = self.policy.backoff();
        let outcome = retry(operation, backoff.as_mut()).await;
        if outcome.attempts > 1 {
            metrics::counter!("tcc_branch_retries_total", "phase" => phase.label())
                .increment(u64::from(outcome.attempts - 1));
        }

        outcome
            .result
            .map_err(|cause| TransactionError::new(phase, name, cause))
    }
}

/// One branch together with its flags for the current run.
#[derive(Clone)]
struct Participant {
    service: BranchService,
    flags: Arc<BranchFlags>,
}

impl Participant {
    fn new(service: BranchService) -> Self {
        Self {
            service,
            flags: Arc::new(BranchFlags::default()),
        }
    }

    fn operations(&self) -> &dyn BranchOperations {
        self.service.operations().as_ref()
    }

    async fn try_branch(self) -> Result<(), TransactionError> {
        BranchFlags::mark(&self.flags.tried);
        match self.operations().r#try().await {
            Ok(()) => {
                BranchFlags::mark(&self.flags.try_succeeded);
                tracing::debug!("try succeeded");
                Ok(())
            }
            Err(cause) => {
                tracing::warn!(error = %cause, "try failed");
                Err(TransactionError::new(
                    FailedPhase::TryFailed,
                    self.service.name(),
                    cause,
                ))
            }
        }
    }

    async fn confirm_branch(self, gate: RetryGate) -> Result<(), TransactionError> {
        BranchFlags::mark(&self.flags.confirmed);
        if !BranchFlags::is_set(&self.flags.try_succeeded) {
            return Err(TransactionError::new(
                FailedPhase::ConfirmFailed,
                self.service.name(),
                CoordinationError::TryNotSucceeded.into(),
            ));
        }

        let operations = Arc::clone(self.service.operations());
        gate.run(FailedPhase::ConfirmFailed, self.service.name(), move || {
            let operations = Arc::clone(&operations);
            async move { operations.confirm().await }
        })
        .await?;

        BranchFlags::mark(&self.flags.confirm_succeeded);
        tracing::debug!("confirm succeeded");
        Ok(())
    }

    async fn cancel_branch(self, gate: RetryGate) -> Result<(), TransactionError> {
        if !BranchFlags::is_set(&self.flags.try_succeeded) {
            tracing::debug!("try did not succeed, nothing to cancel");
            return Ok(());
        }
        BranchFlags::mark(&self.flags.canceled);

        let operations = Arc::clone(self.service.operations());
        gate.run(FailedPhase::CancelFailed, self.service.name(), move || {
            let operations = Arc::clone(&operations);
            async move { operations.cancel().await }
        })
        .await?;

        BranchFlags::mark(&self.flags.cancel_succeeded);
        tracing::debug!("cancel succeeded");
        Ok(())
    }
}
