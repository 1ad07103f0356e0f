//! Map validated CLI matches to the action to run.

use crate::cli::actions::{hash_password, server, Action};
use crate::cli::commands::{
    lookup, ARG_ATTEMPT_THRESHOLD, ARG_DB_MAX_CONNECTIONS, ARG_DSN, ARG_PASSWORD, ARG_PORT,
    CMD_HASH_PASSWORD,
};
use anyhow::{Context, Result};
use secrecy::SecretString;

/// Map validated CLI matches to an action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    if let Some(sub_m) = matches.subcommand_matches(CMD_HASH_PASSWORD) {
        return Ok(Action::HashPassword(hash_password::Args {
            password: sub_m
                .get_one::<String>(ARG_PASSWORD)
                .map(|p| SecretString::from(p.clone())),
        }));
    }

    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .filter(|dsn| !dsn.trim().is_empty())
        .cloned()
        .context("missing required argument: --dsn")?;

    let lookup_opts = lookup::Options::parse(matches)?;

    Ok(Action::Server(server::Args {
        port,
        dsn: SecretString::from(dsn),
        db_max_connections: matches
            .get_one::<u32>(ARG_DB_MAX_CONNECTIONS)
            .copied()
            .unwrap_or(5),
        attempt_threshold: matches
            .get_one::<u32>(ARG_ATTEMPT_THRESHOLD)
            .copied()
            .unwrap_or(crate::attempts::DEFAULT_THRESHOLD),
        lookup_url: lookup_opts.url,
        lookup_timeout_seconds: lookup_opts.timeout_seconds,
        lookup_retry_count: lookup_opts.retry_count,
        lookup_retry_backoff_ms: lookup_opts.retry_backoff_ms,
        lookup_field_paths: lookup_opts.field_paths,
    }))
}
