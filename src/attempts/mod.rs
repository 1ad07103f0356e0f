//! Failed-attempt tracking and the threshold warning pipeline.
//!
//! Each account key moves between two states implied by its counter:
//!
//! - below threshold: a failure increments the counter;
//! - triggering: the increment reached the threshold, so the counter is reset
//!   to 0 first, then the recipient id is resolved and a warning is dispatched.
//!
//! A successful login resets the counter from any state. Resolution and
//! dispatch are best effort. Their outcome is reported in [`FailureReport`] and
//! the reset is never rolled back, so a warning can be lost while the attempt
//! cycle still restarts.
//!
//! ### Concurrency
//!
//! Counting a failure and the threshold reset are one atomic step per key
//! (see [`counter::CounterStore::record_failure`]). Concurrent failures are
//! never undercounted, and only the failure that crosses the threshold
//! triggers. The ones that follow start the next cycle.

pub mod counter;
pub mod notify;
pub mod outbox;
pub mod resolver;

#[cfg(test)]
mod tests;

use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn, Instrument, Span};

use self::{
    counter::CounterStore,
    notify::{DispatchOutcome, Notifier},
    outbox::{MessageOutbox, PendingMessage},
    resolver::{IdentityResolver, ResolutionFailure},
};

pub const DEFAULT_THRESHOLD: u32 = 3;

#[derive(Clone, Copy, Debug)]
pub struct AttemptConfig {
    threshold: u32,
}

impl AttemptConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }

    /// Threshold of consecutive failures; values below 1 are raised to 1.
    #[must_use]
    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold.max(1);
        self
    }

    #[must_use]
    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}

impl Default for AttemptConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolutionOutcome {
    Resolved(String),
    Failed {
        kind: ResolutionFailure,
        detail: String,
    },
}

impl ResolutionOutcome {
    #[must_use]
    pub fn recipient_id(&self) -> Option<&str> {
        match self {
            Self::Resolved(id) => Some(id),
            Self::Failed { .. } => None,
        }
    }
}

/// What happened on one failed login.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailureReport {
    pub attempts_so_far: u32,
    pub triggered: bool,
    /// Set when `triggered`, unless `warning_error` is.
    pub resolution: Option<ResolutionOutcome>,
    pub notify_sent: bool,
    pub notify_error: Option<String>,
    /// The resolve and dispatch task died before reporting, so neither
    /// outcome is known.
    pub warning_error: Option<String>,
}

impl FailureReport {
    fn below_threshold(attempts_so_far: u32) -> Self {
        Self {
            attempts_so_far,
            triggered: false,
            resolution: None,
            notify_sent: false,
            notify_error: None,
            warning_error: None,
        }
    }
}

/// Normalize an email into the counter key (trimmed, lowercase).
#[must_use]
pub fn normalize_account_key(account_key: &str) -> String {
    account_key.trim().to_lowercase()
}

pub struct AttemptTracker {
    config: AttemptConfig,
    counters: Arc<dyn CounterStore>,
    outbox: Arc<dyn MessageOutbox>,
    resolver: Arc<dyn IdentityResolver>,
    notifier: Notifier,
}

impl AttemptTracker {
    pub fn new(
        config: AttemptConfig,
        counters: Arc<dyn CounterStore>,
        outbox: Arc<dyn MessageOutbox>,
        resolver: Arc<dyn IdentityResolver>,
    ) -> Self {
        let notifier = Notifier::new(Arc::clone(&outbox), config.threshold());
        Self {
            config,
            counters,
            outbox,
            resolver,
            notifier,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AttemptConfig {
        &self.config
    }

    #[must_use]
    pub fn warning_message(&self) -> String {
        self.notifier.message()
    }

    /// Count a failed verification and, at the threshold, warn the owner.
    ///
    /// # Errors
    /// Only counter storage errors are returned; resolution and dispatch
    /// failures are reported in the [`FailureReport`].
    #[instrument(skip(self))]
    pub async fn record_failure(&self, account_key: &str) -> Result<FailureReport> {
        let key = normalize_account_key(account_key);

        // The counter is already back at 0 when this returns triggered, so the
        // cycle restarts no matter what happens to the warning.
        let count = self
            .counters
            .record_failure(&key, self.config.threshold())
            .await?;
        let attempts = count.attempts;

        if !count.triggered {
            debug!(attempts, "failed login recorded");

            return Ok(FailureReport::below_threshold(attempts));
        }

        warn!(attempts, "failed login threshold reached");

        // Run on its own task so a dropped request cannot cancel the warning
        // after the reset is already committed.
        let resolver = Arc::clone(&self.resolver);
        let notifier = self.notifier.clone();
        let task = tokio::spawn(
            async move { warn_owner(resolver.as_ref(), &notifier, &key).await }
                .instrument(Span::current()),
        );

        let (resolution, dispatch, warning_error) = match task.await {
            Ok((resolution, dispatch)) => (resolution, dispatch, None),
            Err(e) => {
                error!("Warning task failed: {}", e);

                let reason = if e.is_panic() {
                    "warning task panicked".to_string()
                } else {
                    "warning task was cancelled".to_string()
                };
                (None, None, Some(reason))
            }
        };

        let (notify_sent, notify_error) = match dispatch {
            Some(DispatchOutcome::Delivered) => (true, None),
            Some(DispatchOutcome::Failed(reason)) => (false, Some(reason)),
            None => (false, None),
        };

        Ok(FailureReport {
            attempts_so_far: attempts,
            triggered: true,
            resolution,
            notify_sent,
            notify_error,
            warning_error,
        })
    }

    /// A successful verification restarts the count.
    ///
    /// # Errors
    /// Returns an error if the counter cannot be written.
    #[instrument(skip(self))]
    pub async fn record_success(&self, account_key: &str) -> Result<()> {
        let key = normalize_account_key(account_key);
        self.counters.reset(&key).await
    }

    /// Hand out the pending warning for `recipient_id` at most once.
    ///
    /// # Errors
    /// Returns an error if the outbox cannot be read.
    #[instrument(skip(self))]
    pub async fn consume_message(&self, recipient_id: &str) -> Result<Option<PendingMessage>> {
        self.outbox.take_once(recipient_id).await
    }
}

async fn warn_owner(
    resolver: &dyn IdentityResolver,
    notifier: &Notifier,
    account_key: &str,
) -> (Option<ResolutionOutcome>, Option<DispatchOutcome>) {
    match resolver.resolve(account_key).await {
        Ok(recipient_id) => {
            let dispatch = notifier.dispatch(&recipient_id).await;

            (Some(ResolutionOutcome::Resolved(recipient_id)), Some(dispatch))
        }

        Err(e) => {
            warn!(failure = %e.kind(), "Could not resolve recipient: {}", e);

            let resolution = ResolutionOutcome::Failed {
                kind: e.kind(),
                detail: e.to_string(),
            };
            (Some(resolution), None)
        }
    }
}
