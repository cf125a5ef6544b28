//! Integration tests for the TCC director.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tcc::{
    Backoff, BranchError, BranchOperations, BranchService, Director, DirectorOption,
    ExponentialBackoff, FailedPhase, InMemoryBranch, RetryConfig, RetryPolicy,
    TransactionOutcome, WithMaxRetries,
};

fn fast_options(max_retries: u64) -> Vec<DirectorOption> {
    vec![
        DirectorOption::MaxRetries(max_retries),
        DirectorOption::InitialInterval(Duration::from_millis(1)),
        DirectorOption::MaxInterval(Duration::from_millis(2)),
        DirectorOption::RandomizationFactor(0.0),
    ]
}

struct TestHarness {
    a: InMemoryBranch,
    b: InMemoryBranch,
}

impl TestHarness {
    fn new() -> Self {
        Self {
            a: InMemoryBranch::new(),
            b: InMemoryBranch::new(),
        }
    }

    fn services(&self) -> Vec<BranchService> {
        vec![
            BranchService::new("A", self.a.clone()),
            BranchService::new("B", self.b.clone()),
        ]
    }

    fn director(&self, max_retries: u64) -> Director {
        Director::new(self.services(), fast_options(max_retries))
    }
}

/// Branch whose confirm and cancel record how many calls overlap.
struct OverlapTracker {
    in_flight: Arc<AtomicUsize>,
    max_seen: Arc<AtomicUsize>,
}

#[async_trait]
impl BranchOperations for OverlapTracker {
    async fn r#try(&self) -> Result<(), BranchError> {
        Ok(())
    }

    async fn confirm(&self) -> Result<(), BranchError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    async fn cancel(&self) -> Result<(), BranchError> {
        Ok(())
    }
}

fn trackers(count: usize) -> (Vec<BranchService>, Arc<AtomicUsize>) {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));
    let services = (0..count)
        .map(|i| {
            BranchService::new(
                format!("tracked-{i}"),
                OverlapTracker {
                    in_flight: in_flight.clone(),
                    max_seen: max_seen.clone(),
                },
            )
        })
        .collect();
    (services, max_seen)
}

#[tokio::test]
async fn test_all_tries_succeed_confirms_every_branch() {
    let h = TestHarness::new();

    let report = h.director(1).execute().await;

    assert_eq!(report.outcome(), TransactionOutcome::Confirmed);
    assert!(report.error().is_none());
    for name in ["A", "B"] {
        let state = report.branch(name).unwrap();
        assert!(state.tried && state.try_succeeded);
        assert!(state.confirmed && state.confirm_succeeded);
        assert!(!state.canceled && !state.cancel_succeeded);
    }

    assert_eq!(h.a.confirm_calls(), 1);
    assert_eq!(h.b.confirm_calls(), 1);
    assert_eq!(h.a.cancel_calls(), 0);
    assert_eq!(h.b.cancel_calls(), 0);
    assert_eq!(h.a.committed(), 1);
    assert_eq!(h.b.committed(), 1);
}

#[tokio::test]
async fn test_try_failure_cancels_only_reserved_branches() {
    let h = TestHarness::new();
    h.b.set_fail_on_try(true);

    let report = h.director(1).execute().await;

    assert_eq!(report.outcome(), TransactionOutcome::Canceled);
    let err = report.error().unwrap();
    assert_eq!(err.phase(), FailedPhase::TryFailed);
    assert_eq!(err.service_name(), "B");
    assert_eq!(err.cause().to_string(), "reservation rejected");

    let a = report.branch("A").unwrap();
    assert!(a.try_succeeded && a.canceled && a.cancel_succeeded);
    assert!(!a.confirmed);

    let b = report.branch("B").unwrap();
    assert!(b.tried && !b.try_succeeded);
    assert!(!b.canceled && !b.confirmed);

    assert_eq!(h.b.cancel_calls(), 0);
    assert_eq!(h.a.confirm_calls(), 0);
    assert_eq!(h.b.confirm_calls(), 0);
    assert_eq!(h.a.reserved(), 0);
}

#[tokio::test]
async fn test_confirm_failure_exhausts_retries() {
    let h = TestHarness::new();
    h.b.set_fail_on_confirm(true);

    let err = h.director(1).direct().await.unwrap_err();

    assert_eq!(err.phase(), FailedPhase::ConfirmFailed);
    assert_eq!(err.service_name(), "B");
    assert_eq!(err.cause().to_string(), "confirm unavailable");
    assert_eq!(h.b.confirm_calls(), 2);
    assert_eq!(h.a.confirm_calls(), 1);
    assert_eq!(h.a.committed(), 1);
    assert_eq!(h.a.cancel_calls(), 0);
    assert_eq!(h.b.cancel_calls(), 0);
}

#[tokio::test]
async fn test_cancel_failure_supersedes_try_failure() {
    let h = TestHarness::new();
    h.b.set_fail_on_try(true);
    h.a.set_fail_on_cancel(true);

    let report = h.director(2).execute().await;

    assert_eq!(report.outcome(), TransactionOutcome::CancelFailed);
    let err = report.error().unwrap();
    assert_eq!(err.phase(), FailedPhase::CancelFailed);
    assert_eq!(err.service_name(), "A");
    assert_eq!(h.a.cancel_calls(), 3);

    let a = report.branch("A").unwrap();
    assert!(a.canceled && !a.cancel_succeeded);
    assert_eq!(h.a.reserved(), 1);
}

#[tokio::test]
async fn test_retry_bound_is_max_retries_plus_one() {
    for max_retries in [0, 1, 4] {
        let h = TestHarness::new();
        h.a.set_fail_on_confirm(true);

        let err = h.director(max_retries).direct().await.unwrap_err();

        assert_eq!(err.phase(), FailedPhase::ConfirmFailed);
        assert_eq!(u64::from(h.a.confirm_calls()), max_retries + 1);
    }
}

#[tokio::test]
async fn test_transient_confirm_failure_recovers() {
    let h = TestHarness::new();
    h.a.fail_confirm_times(2);

    h.director(5).direct().await.unwrap();

    assert_eq!(h.a.confirm_calls(), 3);
    assert_eq!(h.a.committed(), 1);
}

#[tokio::test]
async fn test_transient_cancel_failure_recovers() {
    let h = TestHarness::new();
    h.b.set_fail_on_try(true);
    h.a.fail_cancel_times(1);

    let err = h.director(3).direct().await.unwrap_err();

    assert_eq!(err.phase(), FailedPhase::TryFailed);
    assert_eq!(h.a.cancel_calls(), 2);
    assert_eq!(h.a.reserved(), 0);
}

#[tokio::test]
async fn test_repeated_runs_produce_same_outcome() {
    let h = TestHarness::new();
    h.b.set_fail_on_try(true);
    let director = h.director(1);

    for run in 1..=2 {
        let report = director.execute().await;
        assert_eq!(report.outcome(), TransactionOutcome::Canceled);
        assert_eq!(report.error().unwrap().service_name(), "B");
        assert!(report.branch("A").unwrap().cancel_succeeded);
        assert!(!report.branch("B").unwrap().try_succeeded);
        assert_eq!(h.a.cancel_calls(), run);
    }
    assert_eq!(h.b.cancel_calls(), 0);
}

#[tokio::test]
async fn test_flags_are_fresh_for_each_run() {
    let h = TestHarness::new();
    let director = h.director(1);

    h.b.set_fail_on_try(true);
    let first = director.execute().await;
    assert_eq!(first.outcome(), TransactionOutcome::Canceled);

    h.b.set_fail_on_try(false);
    let second = director.execute().await;
    assert_eq!(second.outcome(), TransactionOutcome::Confirmed);
    assert_ne!(first.transaction_id(), second.transaction_id());

    let a = second.branch("A").unwrap();
    assert!(a.confirm_succeeded);
    assert!(!a.canceled && !a.cancel_succeeded);
    assert_eq!(h.a.committed(), 1);
    assert_eq!(h.b.committed(), 1);
}

#[tokio::test]
async fn test_simultaneous_try_failures_report_one_of_them() {
    let a = InMemoryBranch::new();
    let b = InMemoryBranch::new();
    let c = InMemoryBranch::new();
    b.set_fail_on_try(true);
    c.set_fail_on_try(true);
    let director = Director::new(
        vec![
            BranchService::new("A", a.clone()),
            BranchService::new("B", b),
            BranchService::new("C", c),
        ],
        fast_options(1),
    );

    let err = director.direct().await.unwrap_err();

    assert_eq!(err.phase(), FailedPhase::TryFailed);
    assert!(["B", "C"].contains(&err.service_name()));
    assert_eq!(a.cancel_calls(), 1);
}

#[tokio::test]
async fn test_empty_transaction_confirms() {
    let director = Director::new(Vec::new(), fast_options(1));
    let report = director.execute().await;
    assert_eq!(report.outcome(), TransactionOutcome::Confirmed);
    assert!(report.branches().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_confirm_calls_are_serialized_by_default() {
    let (services, max_seen) = trackers(3);
    let director = Director::new(services, fast_options(0));

    director.direct().await.unwrap();

    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_retry_concurrency_allows_overlap() {
    let (services, max_seen) = trackers(3);
    let mut options = fast_options(0);
    options.push(DirectorOption::RetryConcurrency(3));
    let director = Director::new(services, options);

    director.direct().await.unwrap();

    assert_eq!(max_seen.load(Ordering::SeqCst), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_runs_keep_separate_flags() {
    let slow = InMemoryBranch::new();
    let slow_service = BranchService::from_fns(
        "slow",
        {
            let slow = slow.clone();
            move || {
                let slow = slow.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    slow.r#try().await
                }
            }
        },
        {
            let slow = slow.clone();
            move || {
                let slow = slow.clone();
                async move { slow.confirm().await }
            }
        },
        {
            let slow = slow.clone();
            move || {
                let slow = slow.clone();
                async move { slow.cancel().await }
            }
        },
    );
    let other = InMemoryBranch::new();
    let director = Arc::new(Director::new(
        vec![slow_service, BranchService::new("other", other.clone())],
        fast_options(1),
    ));

    let first = tokio::spawn({
        let director = director.clone();
        async move { director.execute().await }
    });
    let second = tokio::spawn({
        let director = director.clone();
        async move { director.execute().await }
    });
    let (first, second) = (first.await.unwrap(), second.await.unwrap());

    for report in [&first, &second] {
        assert_eq!(report.outcome(), TransactionOutcome::Confirmed);
        let state = report.branch("slow").unwrap();
        assert!(state.try_succeeded && state.confirm_succeeded);
        assert!(!state.canceled);
    }
    assert_ne!(first.transaction_id(), second.transaction_id());
    assert_eq!(slow.committed(), 2);
    assert_eq!(other.committed(), 2);
}

/// Policy that never retries and counts the schedules it hands out.
#[derive(Default)]
struct CountingPolicy {
    issued: AtomicU32,
}

impl RetryPolicy for CountingPolicy {
    fn backoff(&self) -> Box<dyn Backoff> {
        self.issued.fetch_add(1, Ordering::SeqCst);
        Box::new(WithMaxRetries::new(
            ExponentialBackoff::new(&RetryConfig::default()),
            0,
        ))
    }
}

#[tokio::test]
async fn test_custom_retry_policy_is_used_for_every_guarded_call() {
    let h = TestHarness::new();
    h.a.set_fail_on_confirm(true);
    let policy = Arc::new(CountingPolicy::default());

    struct Shared(Arc<CountingPolicy>);
    impl RetryPolicy for Shared {
        fn backoff(&self) -> Box<dyn Backoff> {
            self.0.backoff()
        }
    }

    let director = h.director(10).with_retry_policy(Shared(policy.clone()));
    let err = director.direct().await.unwrap_err();

    assert_eq!(err.phase(), FailedPhase::ConfirmFailed);
    assert_eq!(h.a.confirm_calls(), 1);
    assert_eq!(policy.issued.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_report_serializes_to_json() {
    let h = TestHarness::new();
    h.b.set_fail_on_try(true);

    let report = h.director(1).execute().await;
    let json = report.to_json();

    assert_eq!(json["outcome"], "Canceled");
    assert_eq!(json["error"]["phase"], "TryFailed");
    assert_eq!(json["error"]["service_name"], "B");
    assert_eq!(json["branches"][0]["state"]["cancel_succeeded"], true);
}
