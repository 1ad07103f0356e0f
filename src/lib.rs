//! # Vigil (failed login tracking and account warnings)
//!
//! `vigil` verifies email/password logins and counts consecutive failures per
//! account. When an account reaches the configured threshold the counter is
//! reset, the account's canonical recipient id is looked up in an external
//! identity service, and a one-time in-app warning is left in the message
//! outbox for that recipient.
//!
//! ## Layout
//!
//! - [`attempts`]: counter store, message outbox, identity resolver, notifier
//!   and the [`attempts::AttemptTracker`] that sequences them.
//! - [`credentials`]: password verification against stored argon2 hashes.
//! - [`api`]: the axum request-handling layer (`/login`, `/messages/{id}`, `/health`).
//! - [`cli`]: command line, configuration and telemetry.
//!
//! ## Failure model
//!
//! Only counter/outbox storage errors fail a request. Resolution and dispatch
//! problems at the threshold are reported back as data and never undo the
//! counter reset.

pub mod api;
pub mod attempts;
pub mod cli;
pub mod credentials;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
