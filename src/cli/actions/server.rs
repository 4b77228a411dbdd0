use crate::{api, auth::AuthConfig, cli::telemetry};
use anyhow::Result;
use tracing::debug;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub config: AuthConfig,
    pub cors_origin: Option<String>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    debug!("Auth config: {:?}", args.config);

    let result = api::new(args.port, args.dsn, args.config, args.cors_origin).await;

    telemetry::shutdown_tracer();

    result
}
