//! # Authcore
//!
//! Authentication and session lifecycle core: credential verification,
//! brute-force lockout, short-lived access tokens paired with rotating refresh
//! tokens, and server-side session records that make every token revocable.
//!
//! `auth` holds the core and its storage seams, `api` exposes it over HTTP and
//! `cli` wires configuration, telemetry and the server together.

pub mod api;
pub mod auth;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
