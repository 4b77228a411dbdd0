use crate::cli::{actions::Action, commands, dispatch, telemetry};
use anyhow::Result;
use tracing::level_filters::LevelFilter;

/// Parse arguments, install logging, and resolve the action to run.
///
/// # Errors
///
/// Returns an error if argument parsing, telemetry initialization, or action dispatch fails
pub fn start() -> Result<Action> {
    let matches = commands::new().get_matches();

    let level = matches
        .get_one::<LevelFilter>(commands::ARG_LOG_LEVEL)
        .copied()
        .unwrap_or(LevelFilter::ERROR);
    telemetry::init(level)?;

    dispatch::handler(&matches)
}
