//! Attempt tracker tests.

use super::counter::{CounterStore, FailureCount, MemoryCounterStore};
use super::notify::warning_message;
use super::outbox::{MemoryMessageOutbox, MessageOutbox, PendingMessage};
use super::resolver::{IdentityResolver, ResolutionFailure, ResolveError};
use super::{AttemptConfig, AttemptTracker, ResolutionOutcome};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

/// Resolver double that records every lookup.
struct FakeResolver {
    answer: Result<String, ResolutionFailure>,
    calls: Mutex<Vec<String>>,
}

impl FakeResolver {
    fn resolving(id: &str) -> Self {
        Self {
            answer: Ok(id.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn failing(kind: ResolutionFailure) -> Self {
        Self {
            answer: Err(kind),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl IdentityResolver for FakeResolver {
    async fn resolve(&self, account_key: &str) -> Result<String, ResolveError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(account_key.to_string());
        }
        match &self.answer {
            Ok(id) => Ok(id.clone()),
            Err(ResolutionFailure::NonSuccessStatus) => {
                Err(ResolveError::Status(StatusCode::INTERNAL_SERVER_ERROR))
            }
            Err(ResolutionFailure::TransportError) => {
                Err(ResolveError::Transport("connection refused".to_string()))
            }
            Err(ResolutionFailure::MalformedResponse) => {
                Err(ResolveError::Malformed("expected value".to_string()))
            }
            Err(ResolutionFailure::MissingIdentifierField) => Err(ResolveError::MissingIdentifier),
        }
    }
}

struct BrokenOutbox;

#[async_trait]
impl MessageOutbox for BrokenOutbox {
    async fn put(&self, _recipient_id: &str, _body: &str) -> Result<()> {
        Err(anyhow!("outbox unavailable"))
    }

    async fn take_once(&self, _recipient_id: &str) -> Result<Option<PendingMessage>> {
        Err(anyhow!("outbox unavailable"))
    }
}

struct BrokenCounters;

#[async_trait]
impl CounterStore for BrokenCounters {
    async fn increment(&self, _key: &str) -> Result<u32> {
        Err(anyhow!("counter store unavailable"))
    }

    async fn reset(&self, _key: &str) -> Result<()> {
        Err(anyhow!("counter store unavailable"))
    }

    async fn record_failure(&self, _key: &str, _threshold: u32) -> Result<FailureCount> {
        Err(anyhow!("counter store unavailable"))
    }
}

/// Memory counters that take a network round trip to answer.
struct SlowCounters(MemoryCounterStore);

#[async_trait]
impl CounterStore for SlowCounters {
    async fn increment(&self, key: &str) -> Result<u32> {
        let count = self.0.increment(key).await?;
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(count)
    }

    async fn reset(&self, key: &str) -> Result<()> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.0.reset(key).await
    }

    async fn record_failure(&self, key: &str, threshold: u32) -> Result<FailureCount> {
        let count = self.0.record_failure(key, threshold).await?;
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(count)
    }
}

struct PanickingResolver;

#[async_trait]
impl IdentityResolver for PanickingResolver {
    async fn resolve(&self, _account_key: &str) -> Result<String, ResolveError> {
        panic!("lookup client bug");
    }
}

struct Harness {
    tracker: AttemptTracker,
    counters: Arc<MemoryCounterStore>,
    outbox: Arc<MemoryMessageOutbox>,
    resolver: Arc<FakeResolver>,
}

fn harness(threshold: u32, resolver: FakeResolver) -> Harness {
    let counters = Arc::new(MemoryCounterStore::new());
    let outbox = Arc::new(MemoryMessageOutbox::new());
    let resolver = Arc::new(resolver);
    let tracker = AttemptTracker::new(
        AttemptConfig::new().with_threshold(threshold),
        counters.clone(),
        outbox.clone(),
        resolver.clone(),
    );
    Harness {
        tracker,
        counters,
        outbox,
        resolver,
    }
}

#[test]
fn attempt_config_defaults_and_overrides() {
    assert_eq!(AttemptConfig::default().threshold(), 3);
    assert_eq!(AttemptConfig::new().with_threshold(5).threshold(), 5);
    assert_eq!(AttemptConfig::new().with_threshold(0).threshold(), 1);
}

#[test]
fn normalize_account_key_trims_and_lowercases() {
    assert_eq!(super::normalize_account_key(" A@X.com "), "a@x.com");
}

#[tokio::test]
async fn failures_below_threshold_count_up() -> Result<()> {
    let h = harness(5, FakeResolver::resolving("u42"));

    for expected in 1..5 {
        let report = h.tracker.record_failure("a@x.com").await?;
        assert_eq!(report.attempts_so_far, expected);
        assert!(!report.triggered);
        assert!(report.resolution.is_none());
        assert!(!report.notify_sent);
    }

    assert!(h.resolver.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn threshold_scenario_end_to_end() -> Result<()> {
    let h = harness(3, FakeResolver::resolving("u42"));

    let first = h.tracker.record_failure("a@x.com").await?;
    let second = h.tracker.record_failure("a@x.com").await?;
    assert_eq!((first.attempts_so_far, first.triggered), (1, false));
    assert_eq!((second.attempts_so_far, second.triggered), (2, false));

    let third = h.tracker.record_failure("a@x.com").await?;
    assert_eq!(third.attempts_so_far, 3);
    assert!(third.triggered);
    assert_eq!(
        third.resolution,
        Some(ResolutionOutcome::Resolved("u42".to_string()))
    );
    assert!(third.notify_sent);
    assert_eq!(third.notify_error, None);
    assert_eq!(h.resolver.calls(), vec!["a@x.com".to_string()]);
    assert_eq!(h.counters.get("a@x.com").await, 0);

    let message = h.tracker.consume_message("u42").await?;
    assert_eq!(message.map(|m| m.body), Some(warning_message(3)));
    assert_eq!(h.tracker.consume_message("u42").await?, None);
    Ok(())
}

#[tokio::test]
async fn failure_after_trigger_starts_over() -> Result<()> {
    let h = harness(3, FakeResolver::resolving("u42"));

    for _ in 0..3 {
        h.tracker.record_failure("a@x.com").await?;
    }
    let report = h.tracker.record_failure("a@x.com").await?;

    assert_eq!(report.attempts_so_far, 1);
    assert!(!report.triggered);
    Ok(())
}

#[tokio::test]
async fn success_resets_counter() -> Result<()> {
    let h = harness(3, FakeResolver::resolving("u42"));

    h.tracker.record_failure("a@x.com").await?;
    h.tracker.record_failure("a@x.com").await?;
    h.tracker.record_success("a@x.com").await?;

    let report = h.tracker.record_failure("a@x.com").await?;
    assert_eq!(report.attempts_so_far, 1);
    Ok(())
}

#[tokio::test]
async fn success_without_failures_is_noop() -> Result<()> {
    let h = harness(3, FakeResolver::resolving("u42"));

    h.tracker.record_success("new@x.com").await?;
    assert_eq!(h.counters.get("new@x.com").await, 0);
    Ok(())
}

#[tokio::test]
async fn account_keys_are_case_insensitive() -> Result<()> {
    let h = harness(3, FakeResolver::resolving("u42"));

    h.tracker.record_failure("A@X.com").await?;
    let report = h.tracker.record_failure("a@x.COM").await?;
    assert_eq!(report.attempts_so_far, 2);

    let report = h.tracker.record_failure(" a@x.com ").await?;
    assert!(report.triggered);
    assert_eq!(h.resolver.calls(), vec!["a@x.com".to_string()]);
    Ok(())
}

#[tokio::test]
async fn missing_identifier_still_resets_counter() -> Result<()> {
    let h = harness(
        3,
        FakeResolver::failing(ResolutionFailure::MissingIdentifierField),
    );

    for _ in 0..2 {
        h.tracker.record_failure("a@x.com").await?;
    }
    let report = h.tracker.record_failure("a@x.com").await?;

    assert!(report.triggered);
    assert!(!report.notify_sent);
    assert!(matches!(
        report.resolution,
        Some(ResolutionOutcome::Failed {
            kind: ResolutionFailure::MissingIdentifierField,
            ..
        })
    ));
    assert_eq!(h.counters.get("a@x.com").await, 0);
    assert!(h.outbox.is_empty().await);
    Ok(())
}

#[tokio::test]
async fn unreachable_resolver_is_reported_not_raised() -> Result<()> {
    let h = harness(1, FakeResolver::failing(ResolutionFailure::TransportError));

    let report = h.tracker.record_failure("a@x.com").await?;

    assert!(report.triggered);
    assert_eq!(
        report
            .resolution
            .as_ref()
            .and_then(|r| match r {
                ResolutionOutcome::Failed { kind, .. } => Some(*kind),
                ResolutionOutcome::Resolved(_) => None,
            }),
        Some(ResolutionFailure::TransportError)
    );
    assert_eq!(h.counters.get("a@x.com").await, 0);
    Ok(())
}

#[tokio::test]
async fn dispatch_failure_does_not_undo_reset() -> Result<()> {
    let counters = Arc::new(MemoryCounterStore::new());
    let tracker = AttemptTracker::new(
        AttemptConfig::new().with_threshold(2),
        counters.clone(),
        Arc::new(BrokenOutbox),
        Arc::new(FakeResolver::resolving("u42")),
    );

    tracker.record_failure("a@x.com").await?;
    let report = tracker.record_failure("a@x.com").await?;

    assert!(report.triggered);
    assert_eq!(
        report.resolution.as_ref().and_then(ResolutionOutcome::recipient_id),
        Some("u42")
    );
    assert!(!report.notify_sent);
    assert_eq!(report.notify_error, Some("outbox unavailable".to_string()));
    assert_eq!(counters.get("a@x.com").await, 0);
    Ok(())
}

#[tokio::test]
async fn counter_storage_failure_is_fatal() {
    let tracker = AttemptTracker::new(
        AttemptConfig::new(),
        Arc::new(BrokenCounters),
        Arc::new(MemoryMessageOutbox::new()),
        Arc::new(FakeResolver::resolving("u42")),
    );

    assert!(tracker.record_failure("a@x.com").await.is_err());
    assert!(tracker.record_success("a@x.com").await.is_err());
}

#[tokio::test]
async fn outbox_storage_failure_is_fatal_on_consume() {
    let tracker = AttemptTracker::new(
        AttemptConfig::new(),
        Arc::new(MemoryCounterStore::new()),
        Arc::new(BrokenOutbox),
        Arc::new(FakeResolver::resolving("u42")),
    );

    assert!(tracker.consume_message("u42").await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_failures_trigger_and_reset() -> Result<()> {
    let h = harness(10, FakeResolver::resolving("u42"));
    let tracker = Arc::new(h.tracker);

    let mut handles = Vec::new();
    for _ in 0..9 {
        let tracker = Arc::clone(&tracker);
        handles.push(tokio::spawn(async move {
            tracker.record_failure("a@x.com").await
        }));
    }
    for handle in handles {
        assert!(!handle.await??.triggered);
    }
    assert_eq!(h.counters.get("a@x.com").await, 9);

    let report = tracker.record_failure("a@x.com").await?;
    assert!(report.triggered);
    assert_eq!(h.counters.get("a@x.com").await, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_failures_across_threshold_trigger_once() -> Result<()> {
    let counters = Arc::new(SlowCounters(MemoryCounterStore::new()));
    let tracker = Arc::new(AttemptTracker::new(
        AttemptConfig::new().with_threshold(3),
        counters.clone(),
        Arc::new(MemoryMessageOutbox::new()),
        Arc::new(FakeResolver::resolving("u42")),
    ));

    tracker.record_failure("a@x.com").await?;
    tracker.record_failure("a@x.com").await?;

    let third = tokio::spawn({
        let tracker = Arc::clone(&tracker);
        async move { tracker.record_failure("a@x.com").await }
    });
    let fourth = tokio::spawn({
        let tracker = Arc::clone(&tracker);
        async move { tracker.record_failure("a@x.com").await }
    });
    let reports = [third.await??, fourth.await??];

    let triggers = reports.iter().filter(|r| r.triggered).count();
    assert_eq!(triggers, 1);

    let mut attempts: Vec<u32> = reports.iter().map(|r| r.attempts_so_far).collect();
    attempts.sort_unstable();
    assert_eq!(attempts, vec![1, 3]);

    // the failure after the trigger belongs to the next cycle
    assert_eq!(counters.0.get("a@x.com").await, 1);
    Ok(())
}

#[tokio::test]
async fn failed_warning_task_is_reported_on_its_own() -> Result<()> {
    let counters = Arc::new(MemoryCounterStore::new());
    let tracker = AttemptTracker::new(
        AttemptConfig::new().with_threshold(1),
        counters.clone(),
        Arc::new(MemoryMessageOutbox::new()),
        Arc::new(PanickingResolver),
    );

    let report = tracker.record_failure("a@x.com").await?;

    assert!(report.triggered);
    assert_eq!(report.warning_error, Some("warning task panicked".to_string()));
    assert_eq!(report.resolution, None);
    assert!(!report.notify_sent);
    assert_eq!(report.notify_error, None);
    assert_eq!(counters.get("a@x.com").await, 0);
    Ok(())
}
