use crate::auth::{AuthConfig, HashCost};
use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_JWT_SECRET: &str = "jwt-secret";
pub const ARG_JWT_ISSUER: &str = "jwt-issuer";
pub const ARG_JWT_AUDIENCE: &str = "jwt-audience";
pub const ARG_ACCESS_TTL: &str = "access-token-ttl-seconds";
pub const ARG_REFRESH_TTL: &str = "refresh-token-ttl-seconds";
pub const ARG_LOCKOUT_THRESHOLD: &str = "lockout-threshold";
pub const ARG_LOCKOUT_SECONDS: &str = "lockout-seconds";
pub const ARG_ARGON2_MEMORY: &str = "argon2-memory-kib";
pub const ARG_ARGON2_ITERATIONS: &str = "argon2-iterations";
pub const ARG_ARGON2_PARALLELISM: &str = "argon2-parallelism";
pub const ARG_SESSION_PURGE: &str = "session-purge-seconds";
pub const ARG_ACTION_TOKEN_TTL: &str = "action-token-ttl-seconds";

pub fn with_args(command: Command) -> Command {
    let command = with_token_args(command);
    let command = with_lockout_args(command);
    with_hash_args(command)
}

fn with_token_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_JWT_SECRET)
                .long(ARG_JWT_SECRET)
                .help("HMAC secret used to sign tokens (at least 32 bytes)")
                .env("AUTHCORE_JWT_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_JWT_ISSUER)
                .long(ARG_JWT_ISSUER)
                .help("Token issuer (iss claim)")
                .env("AUTHCORE_JWT_ISSUER")
                .default_value("authcore"),
        )
        .arg(
            Arg::new(ARG_JWT_AUDIENCE)
                .long(ARG_JWT_AUDIENCE)
                .help("Token audience (aud claim)")
                .env("AUTHCORE_JWT_AUDIENCE")
                .default_value("authcore-clients"),
        )
        .arg(
            Arg::new(ARG_ACCESS_TTL)
                .long(ARG_ACCESS_TTL)
                .help("Access token lifetime in seconds")
                .env("AUTHCORE_ACCESS_TOKEN_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TTL)
                .long(ARG_REFRESH_TTL)
                .help("Refresh token and session lifetime in seconds")
                .env("AUTHCORE_REFRESH_TOKEN_TTL_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_SESSION_PURGE)
                .long(ARG_SESSION_PURGE)
                .help("Interval of the expired-session sweep in seconds (0 disables)")
                .env("AUTHCORE_SESSION_PURGE_SECONDS")
                .default_value("600")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_ACTION_TOKEN_TTL)
                .long(ARG_ACTION_TOKEN_TTL)
                .help("Lifetime of password reset and email verification tokens in seconds")
                .env("AUTHCORE_ACTION_TOKEN_TTL_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}

fn with_lockout_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_LOCKOUT_THRESHOLD)
                .long(ARG_LOCKOUT_THRESHOLD)
                .help("Consecutive failed logins before the account locks")
                .env("AUTHCORE_LOCKOUT_THRESHOLD")
                .default_value("5")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_LOCKOUT_SECONDS)
                .long(ARG_LOCKOUT_SECONDS)
                .help("How long a locked account stays locked, in seconds")
                .env("AUTHCORE_LOCKOUT_SECONDS")
                .default_value("180")
                .value_parser(clap::value_parser!(u64)),
        )
}

fn with_hash_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ARGON2_MEMORY)
                .long(ARG_ARGON2_MEMORY)
                .help("Argon2id memory cost in KiB")
                .env("AUTHCORE_ARGON2_MEMORY_KIB")
                .default_value("19456")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_ARGON2_ITERATIONS)
                .long(ARG_ARGON2_ITERATIONS)
                .help("Argon2id iteration count")
                .env("AUTHCORE_ARGON2_ITERATIONS")
                .default_value("2")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_ARGON2_PARALLELISM)
                .long(ARG_ARGON2_PARALLELISM)
                .help("Argon2id lanes")
                .env("AUTHCORE_ARGON2_PARALLELISM")
                .default_value("1")
                .value_parser(clap::value_parser!(u32)),
        )
}

/// Fold the parsed auth options into one `AuthConfig`.
///
/// # Errors
/// Returns an error if the signing secret is missing.
pub fn config_from_matches(matches: &ArgMatches) -> Result<AuthConfig> {
    let secret = matches
        .get_one::<String>(ARG_JWT_SECRET)
        .cloned()
        .context("missing required argument: --jwt-secret")?;

    let u64_arg = |name: &str, default: u64| matches.get_one::<u64>(name).copied().unwrap_or(default);
    let u32_arg = |name: &str, default: u32| matches.get_one::<u32>(name).copied().unwrap_or(default);

    let mut config = AuthConfig::new(SecretString::from(secret))
        .with_access_token_ttl_seconds(u64_arg(ARG_ACCESS_TTL, 900))
        .with_refresh_token_ttl_seconds(u64_arg(ARG_REFRESH_TTL, 604_800))
        .with_lockout_threshold(u32_arg(ARG_LOCKOUT_THRESHOLD, 5))
        .with_lockout_seconds(u64_arg(ARG_LOCKOUT_SECONDS, 180))
        .with_session_purge_seconds(u64_arg(ARG_SESSION_PURGE, 600))
        .with_action_token_ttl_seconds(u64_arg(ARG_ACTION_TOKEN_TTL, 86_400))
        .with_hash_cost(HashCost {
            memory_kib: u32_arg(ARG_ARGON2_MEMORY, 19_456),
            iterations: u32_arg(ARG_ARGON2_ITERATIONS, 2),
            parallelism: u32_arg(ARG_ARGON2_PARALLELISM, 1),
        });

    if let Some(issuer) = matches.get_one::<String>(ARG_JWT_ISSUER) {
        config = config.with_issuer(issuer.clone());
    }
    if let Some(audience) = matches.get_one::<String>(ARG_JWT_AUDIENCE) {
        config = config.with_audience(audience.clone());
    }

    Ok(config)
}
