//! Identity lookup: maps an account key (email) to the canonical recipient id
//! used to address in-app messages.
//!
//! The lookup service's response schema is not pinned down, so the id is
//! found by probing an ordered list of [`FieldPath`]s (`id`, `userId`,
//! `user.id`, `data.id`, `result.id` by default). The list is configuration,
//! not code.
//!
//! Requests use a long timeout because the downstream service may be waking
//! up from suspension. Non-success statuses and transport errors are retried
//! `retry_count` times; shape problems are not retried.

use crate::APP_USER_AGENT;
use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::{fmt, str::FromStr, time::Duration};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, instrument, warn};
use url::Url;
use utoipa::ToSchema;

pub const DEFAULT_TIMEOUT_SECONDS: u64 = 120;
pub const DEFAULT_RETRY_COUNT: u32 = 1;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;
pub const DEFAULT_FIELD_PATHS: &str = "id,userId,user.id,data.id,result.id";

/// Failure classes reported to callers for observability.
#[derive(ToSchema, Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionFailure {
    NonSuccessStatus,
    MalformedResponse,
    MissingIdentifierField,
    TransportError,
}

impl ResolutionFailure {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NonSuccessStatus => "non_success_status",
            Self::MalformedResponse => "malformed_response",
            Self::MissingIdentifierField => "missing_identifier_field",
            Self::TransportError => "transport_error",
        }
    }
}

impl fmt::Display for ResolutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("lookup returned status {0}")]
    Status(StatusCode),
    #[error("lookup request failed: {0}")]
    Transport(String),
    #[error("lookup response is not a JSON object: {0}")]
    Malformed(String),
    #[error("lookup response has none of the configured id fields")]
    MissingIdentifier,
}

impl ResolveError {
    #[must_use]
    pub const fn kind(&self) -> ResolutionFailure {
        match self {
            Self::Status(_) => ResolutionFailure::NonSuccessStatus,
            Self::Transport(_) => ResolutionFailure::TransportError,
            Self::Malformed(_) => ResolutionFailure::MalformedResponse,
            Self::MissingIdentifier => ResolutionFailure::MissingIdentifierField,
        }
    }

    /// Only "didn't get an answer" failures are worth another attempt.
    const fn is_retryable(&self) -> bool {
        matches!(self, Self::Status(_) | Self::Transport(_))
    }
}

/// Location of a candidate id: a top-level field or a field one object deep.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldPath {
    container: Option<String>,
    field: String,
}

impl FieldPath {
    #[must_use]
    pub fn top_level(field: &str) -> Self {
        Self {
            container: None,
            field: field.to_string(),
        }
    }

    #[must_use]
    pub fn nested(container: &str, field: &str) -> Self {
        Self {
            container: Some(container.to_string()),
            field: field.to_string(),
        }
    }

    /// Return the value at this path if it is a non-empty string or a number.
    #[must_use]
    pub fn extract(&self, body: &Value) -> Option<String> {
        let scope = match &self.container {
            Some(container) => body.get(container)?,
            None => body,
        };

        match scope.get(&self.field)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl FromStr for FieldPath {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parts: Vec<&str> = s.split('.').map(str::trim).collect();
        match parts.as_slice() {
            [field] if !field.is_empty() => Ok(Self::top_level(field)),
            [container, field] if !container.is_empty() && !field.is_empty() => {
                Ok(Self::nested(container, field))
            }
            _ => Err(format!("invalid field path: '{s}'")),
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.container {
            Some(container) => write!(f, "{container}.{}", self.field),
            None => f.write_str(&self.field),
        }
    }
}

/// Parse a comma separated list such as `id,userId,user.id`.
///
/// # Errors
/// Returns an error if the list is empty or any entry is not `field` or `container.field`.
pub fn parse_field_paths(list: &str) -> Result<Vec<FieldPath>, String> {
    let paths = list
        .split(',')
        .filter(|entry| !entry.trim().is_empty())
        .map(FieldPath::from_str)
        .collect::<Result<Vec<_>, _>>()?;

    if paths.is_empty() {
        return Err("at least one field path is required".to_string());
    }

    Ok(paths)
}

#[must_use]
pub fn default_field_paths() -> Vec<FieldPath> {
    vec![
        FieldPath::top_level("id"),
        FieldPath::top_level("userId"),
        FieldPath::nested("user", "id"),
        FieldPath::nested("data", "id"),
        FieldPath::nested("result", "id"),
    ]
}

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Resolve `account_key` to a canonical recipient id.
    async fn resolve(&self, account_key: &str) -> Result<String, ResolveError>;
}

#[derive(Clone, Debug)]
pub struct ResolverConfig {
    base_url: Url,
    timeout: Duration,
    retry_count: u32,
    retry_backoff: Duration,
    field_paths: Vec<FieldPath>,
}

impl ResolverConfig {
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
            retry_count: DEFAULT_RETRY_COUNT,
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            field_paths: default_field_paths(),
        }
    }

    #[must_use]
    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    #[must_use]
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_field_paths(mut self, field_paths: Vec<FieldPath>) -> Self {
        if !field_paths.is_empty() {
            self.field_paths = field_paths;
        }
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    #[must_use]
    pub fn field_paths(&self) -> &[FieldPath] {
        &self.field_paths
    }
}

/// Pull the first configured id out of a lookup response body.
///
/// # Errors
/// `Malformed` if the body is not a JSON object, `MissingIdentifier` if no path matches.
pub fn extract_identifier(body: &[u8], field_paths: &[FieldPath]) -> Result<String, ResolveError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| ResolveError::Malformed(e.to_string()))?;

    if !value.is_object() {
        return Err(ResolveError::Malformed("expected an object".to_string()));
    }

    field_paths
        .iter()
        .find_map(|path| {
            path.extract(&value).inspect(|_| {
                debug!(field_path = %path, "lookup id found");
            })
        })
        .ok_or(ResolveError::MissingIdentifier)
}

#[derive(Clone, Debug)]
pub struct HttpIdentityResolver {
    client: Client,
    config: ResolverConfig,
}

impl HttpIdentityResolver {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: ResolverConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(config.timeout)
            .build()?;

        Ok(Self { client, config })
    }

    async fn fetch(&self, account_key: &str) -> Result<Vec<u8>, ResolveError> {
        let response = self
            .client
            .get(self.config.base_url.clone())
            .query(&[("email", account_key)])
            .send()
            .await
            .map_err(|e| ResolveError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::Status(status));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ResolveError::Transport(e.to_string()))?;

        Ok(body.to_vec())
    }

    fn backoff(&self) -> Duration {
        if self.config.retry_backoff.is_zero() {
            return Duration::ZERO;
        }
        let jitter = rand::thread_rng().gen_range(0.5..1.0);
        self.config.retry_backoff.mul_f64(jitter)
    }
}

#[async_trait]
impl IdentityResolver for HttpIdentityResolver {
    #[instrument(skip(self))]
    async fn resolve(&self, account_key: &str) -> Result<String, ResolveError> {
        let attempts = self.config.retry_count.saturating_add(1);

        let mut attempt = 1;
        loop {
            match self.fetch(account_key).await {
                Ok(body) => return extract_identifier(&body, &self.config.field_paths),

                Err(e) if e.is_retryable() && attempt < attempts => {
                    let backoff = self.backoff();
                    warn!(
                        attempt,
                        lookup_url = %self.config.base_url,
                        backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                        "identity lookup failed, retrying: {e}"
                    );
                    sleep(backoff).await;
                    attempt += 1;
                }

                Err(e) => return Err(e),
            }
        }
    }
}
