use crate::{
    api::{self, ServerConfig},
    attempts::{resolver::ResolverConfig, AttemptConfig},
};
use anyhow::Result;
use secrecy::SecretString;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: SecretString,
    pub db_max_connections: u32,
    pub attempt_threshold: u32,
    pub lookup_url: Url,
    pub lookup_timeout_seconds: u64,
    pub lookup_retry_count: u32,
    pub lookup_retry_backoff_ms: u64,
    pub lookup_field_paths: Vec<crate::attempts::resolver::FieldPath>,
}

impl Args {
    fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig::new(self.lookup_url.clone())
            .with_timeout_seconds(self.lookup_timeout_seconds)
            .with_retry_count(self.lookup_retry_count)
            .with_retry_backoff(Duration::from_millis(self.lookup_retry_backoff_ms))
            .with_field_paths(self.lookup_field_paths.clone())
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    debug!("Server args: {:?}", args);

    let resolver = args.resolver_config();
    let attempts = AttemptConfig::new().with_threshold(args.attempt_threshold);

    info!(
        threshold = attempts.threshold(),
        lookup_url = %resolver.base_url(),
        lookup_timeout_seconds = resolver.timeout().as_secs(),
        lookup_retry_count = resolver.retry_count(),
        "starting vigil"
    );

    api::new(ServerConfig {
        port: args.port,
        dsn: args.dsn,
        db_max_connections: args.db_max_connections,
        attempts,
        resolver,
    })
    .await
}
