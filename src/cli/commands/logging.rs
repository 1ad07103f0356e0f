//! Log verbosity: repeated `-v` flags or `VIGIL_LOG_LEVEL`.
//!
//! Both forms resolve to a count where 0 keeps the subscriber's default
//! (errors only) and each step enables one more level.

use clap::{Arg, ArgAction, ArgMatches, Command};
use tracing::Level;

pub const ARG_VERBOSITY: &str = "verbosity";

const LEVEL_NAMES: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Accept a level name (`info`) or its position in [`LEVEL_NAMES`] (`2`).
fn parse_level(value: &str) -> Result<u8, String> {
    let value = value.trim().to_ascii_lowercase();

    let position = LEVEL_NAMES.iter().position(|name| *name == value).or_else(|| {
        value
            .parse::<usize>()
            .ok()
            .filter(|index| *index < LEVEL_NAMES.len())
    });

    position
        .and_then(|index| u8::try_from(index).ok())
        .ok_or_else(|| {
            format!(
                "invalid log level '{value}', expected one of {} or 0-4",
                LEVEL_NAMES.join(", ")
            )
        })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
            .env("VIGIL_LOG_LEVEL")
            .global(true)
            .action(ArgAction::Count)
            .value_parser(parse_level),
    )
}

/// Level to install, `None` when no verbosity was asked for.
#[must_use]
pub fn level(matches: &ArgMatches) -> Option<Level> {
    match matches.get_one::<u8>(ARG_VERBOSITY).copied().unwrap_or(0) {
        0 => None,
        1 => Some(Level::WARN),
        2 => Some(Level::INFO),
        3 => Some(Level::DEBUG),
        _ => Some(Level::TRACE),
    }
}
