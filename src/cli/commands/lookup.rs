use crate::attempts::resolver::{
    parse_field_paths, FieldPath, DEFAULT_FIELD_PATHS, DEFAULT_RETRY_BACKOFF_MS,
    DEFAULT_RETRY_COUNT, DEFAULT_TIMEOUT_SECONDS,
};
use anyhow::Context;
use clap::{builder::ValueParser, Arg, ArgMatches, Command};
use url::Url;

pub const ARG_LOOKUP_URL: &str = "lookup-url";
pub const ARG_LOOKUP_TIMEOUT_SECONDS: &str = "lookup-timeout-seconds";
pub const ARG_LOOKUP_RETRY_COUNT: &str = "lookup-retry-count";
pub const ARG_LOOKUP_RETRY_BACKOFF_MS: &str = "lookup-retry-backoff-ms";
pub const ARG_LOOKUP_FIELD_PATHS: &str = "lookup-field-paths";

#[derive(Debug, Clone)]
pub struct Options {
    pub url: Url,
    pub timeout_seconds: u64,
    pub retry_count: u32,
    pub retry_backoff_ms: u64,
    pub field_paths: Vec<FieldPath>,
}

impl Options {
    /// Parse identity lookup arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the lookup URL is missing or invalid.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let url = match matches.get_one::<String>(ARG_LOOKUP_URL) {
            Some(value) if !value.trim().is_empty() => value,
            _ => anyhow::bail!("missing required argument: --{ARG_LOOKUP_URL}"),
        };
        let url = Url::parse(url.trim()).with_context(|| format!("invalid --{ARG_LOOKUP_URL}"))?;

        Ok(Self {
            url,
            timeout_seconds: matches
                .get_one::<u64>(ARG_LOOKUP_TIMEOUT_SECONDS)
                .copied()
                .unwrap_or(DEFAULT_TIMEOUT_SECONDS),
            retry_count: matches
                .get_one::<u32>(ARG_LOOKUP_RETRY_COUNT)
                .copied()
                .unwrap_or(DEFAULT_RETRY_COUNT),
            retry_backoff_ms: matches
                .get_one::<u64>(ARG_LOOKUP_RETRY_BACKOFF_MS)
                .copied()
                .unwrap_or(DEFAULT_RETRY_BACKOFF_MS),
            field_paths: matches
                .get_one::<Vec<FieldPath>>(ARG_LOOKUP_FIELD_PATHS)
                .cloned()
                .unwrap_or_default(),
        })
    }
}

fn validator_field_paths() -> ValueParser {
    ValueParser::from(parse_field_paths)
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_LOOKUP_URL)
                .long(ARG_LOOKUP_URL)
                .help("Identity lookup endpoint, called as GET <url>?email=<account>")
                .env("VIGIL_LOOKUP_URL")
                .required(true),
        )
        .arg(
            Arg::new(ARG_LOOKUP_TIMEOUT_SECONDS)
                .long(ARG_LOOKUP_TIMEOUT_SECONDS)
                .help("Per-request timeout for the identity lookup")
                .long_help(
                    "Per-request timeout for the identity lookup in seconds.\n\nKept long so a suspended lookup service has time to start.",
                )
                .env("VIGIL_LOOKUP_TIMEOUT_SECONDS")
                .default_value("120")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_LOOKUP_RETRY_COUNT)
                .long(ARG_LOOKUP_RETRY_COUNT)
                .help("Extra attempts after a failed status or transport error")
                .env("VIGIL_LOOKUP_RETRY_COUNT")
                .default_value("1")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_LOOKUP_RETRY_BACKOFF_MS)
                .long(ARG_LOOKUP_RETRY_BACKOFF_MS)
                .help("Delay before a lookup retry in milliseconds (jittered)")
                .env("VIGIL_LOOKUP_RETRY_BACKOFF_MS")
                .default_value("500")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_LOOKUP_FIELD_PATHS)
                .long(ARG_LOOKUP_FIELD_PATHS)
                .help("Ordered, comma separated id fields to probe in the lookup response")
                .env("VIGIL_LOOKUP_FIELD_PATHS")
                .default_value(DEFAULT_FIELD_PATHS)
                .value_parser(validator_field_paths()),
        )
}
