//! Formats the threshold warning and leaves it in the outbox.

use super::outbox::MessageOutbox;
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Warning text shown to the account owner once the threshold is hit.
#[must_use]
pub fn warning_message(threshold: u32) -> String {
    format!("WARNING: {threshold} wrong login attempts detected for your account!")
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    Failed(String),
}

impl DispatchOutcome {
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// Best effort: a failed write is reported, never raised.
#[derive(Clone)]
pub struct Notifier {
    outbox: Arc<dyn MessageOutbox>,
    threshold: u32,
}

impl Notifier {
    pub fn new(outbox: Arc<dyn MessageOutbox>, threshold: u32) -> Self {
        Self { outbox, threshold }
    }

    #[must_use]
    pub fn message(&self) -> String {
        warning_message(self.threshold)
    }

    #[instrument(skip(self))]
    pub async fn dispatch(&self, recipient_id: &str) -> DispatchOutcome {
        match self.outbox.put(recipient_id, &self.message()).await {
            Ok(()) => {
                info!("warning queued for recipient");

                DispatchOutcome::Delivered
            }

            Err(e) => {
                error!("Error storing warning message: {:#}", e);

                DispatchOutcome::Failed(format!("{e:#}"))
            }
        }
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}
