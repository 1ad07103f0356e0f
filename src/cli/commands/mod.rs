pub mod logging;
pub mod lookup;

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ColorChoice, Command,
};

pub const ARG_PORT: &str = "port";
pub const ARG_DSN: &str = "dsn";
pub const ARG_DB_MAX_CONNECTIONS: &str = "db-max-connections";
pub const ARG_ATTEMPT_THRESHOLD: &str = "attempt-threshold";

pub const CMD_HASH_PASSWORD: &str = "hash-password";
pub const ARG_PASSWORD: &str = "password";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("vigil")
        .about("Failed login tracking and account warnings")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .subcommand_negates_reqs(true)
        .subcommand(
            Command::new(CMD_HASH_PASSWORD)
                .about("Print an argon2 hash for seeding the users table")
                .arg(
                    Arg::new(ARG_PASSWORD)
                        .help("Password to hash (read from stdin when omitted)"),
                ),
        )
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("VIGIL_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long(ARG_DSN)
                .help("Database connection string")
                .long_help(
                    "Postgres connection string. The database holds users, login_attempts and pending_messages (see sql/schema.sql).",
                )
                .env("VIGIL_DSN")
                .required(true),
        )
        .arg(
            Arg::new(ARG_DB_MAX_CONNECTIONS)
                .long(ARG_DB_MAX_CONNECTIONS)
                .help("Maximum database pool size")
                .env("VIGIL_DB_MAX_CONNECTIONS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_ATTEMPT_THRESHOLD)
                .long(ARG_ATTEMPT_THRESHOLD)
                .help("Consecutive failed logins that trigger an account warning")
                .env("VIGIL_ATTEMPT_THRESHOLD")
                .default_value("3")
                .value_parser(clap::value_parser!(u32).range(1..)),
        );

    let command = lookup::with_args(command);
    logging::with_args(command)
}
