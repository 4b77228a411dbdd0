pub mod auth;

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ColorChoice, Command,
};
use tracing::level_filters::LevelFilter;

pub const ARG_PORT: &str = "port";
pub const ARG_DSN: &str = "dsn";
pub const ARG_CORS_ORIGIN: &str = "cors-origin";
pub const ARG_LOG_LEVEL: &str = "log-level";

/// Accepts `off`, `error`, `warn`, `info`, `debug` or `trace` in any case.
fn parse_log_level(value: &str) -> Result<LevelFilter, String> {
    value
        .parse::<LevelFilter>()
        .map_err(|_| format!("invalid log level: {value}"))
}

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

    let command = Command::new("authcore")
        .about("Authentication and session lifecycle service")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("AUTHCORE_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long(ARG_DSN)
                .help("Database connection string")
                .env("AUTHCORE_DSN")
                .required(true),
        )
        .arg(
            Arg::new(ARG_CORS_ORIGIN)
                .long(ARG_CORS_ORIGIN)
                .help("Browser origin allowed to call the API (CORS)")
                .env("AUTHCORE_CORS_ORIGIN"),
        )
        .arg(
            Arg::new(ARG_LOG_LEVEL)
                .short('l')
                .long(ARG_LOG_LEVEL)
                .help("Default log level; RUST_LOG directives take precedence")
                .env("AUTHCORE_LOG_LEVEL")
                .default_value("error")
                .global(true)
                .value_parser(parse_log_level),
        );

    auth::with_args(command)
}
