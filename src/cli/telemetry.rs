//! Log and trace output for the `authcore` server.
//!
//! Console logs always go to stdout. `--log-level` (or `AUTHCORE_LOG_LEVEL`)
//! sets the default level; any `RUST_LOG` directives are layered on top, so
//! `RUST_LOG=authcore::auth=debug` narrows debugging to the auth core. The
//! HTTP stack, the SQL driver and the OTLP SDK stay capped at `QUIET_TARGETS`.
//!
//! Spans are exported over OTLP/gRPC only when `OTEL_EXPORTER_OTLP_ENDPOINT`
//! is set. Replicas report `OTEL_SERVICE_INSTANCE_ID`, or a fresh ULID.

use anyhow::Result;
use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry::{global, trace::TracerProvider as _, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    propagation::{BaggagePropagator, TraceContextPropagator},
    trace::{SdkTracerProvider, Tracer},
    Resource,
};
use std::{env::var, sync::OnceLock, time::Duration};
use tracing::{debug, level_filters::LevelFilter};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};
use ulid::Ulid;

static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

const QUIET_TARGETS: [&str; 4] = [
    "hyper=error",
    "tokio=error",
    "sqlx=warn",
    "opentelemetry_sdk=warn",
];

fn normalize_endpoint(ep: String) -> String {
    if ep.starts_with("http://") || ep.starts_with("https://") {
        ep
    } else {
        format!("http://{}", ep.trim_end_matches('/'))
    }
}

fn init_tracer(endpoint: String) -> Result<Tracer> {
    let endpoint = normalize_endpoint(endpoint);

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&endpoint)
        .with_timeout(Duration::from_secs(3))
        .build()?;

    let instance_id = instance_id(var("OTEL_SERVICE_INSTANCE_ID").ok());

    let trace_provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(
            Resource::builder_empty()
                .with_attributes(vec![
                    KeyValue::new("service.name", env!("CARGO_PKG_NAME")),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                    KeyValue::new("service.instance.id", instance_id),
                ])
                .build(),
        )
        .build();

    let _ = TRACER_PROVIDER.set(trace_provider.clone());

    global::set_tracer_provider(trace_provider.clone());
    global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(BaggagePropagator::new()),
    ]));

    Ok(trace_provider.tracer(env!("CARGO_PKG_NAME")))
}

fn instance_id(configured: Option<String>) -> String {
    configured
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Ulid::new().to_string())
}

/// Build the console filter from the configured level and raw `RUST_LOG`
/// directives. Unparseable directives are dropped.
///
/// # Errors
///
/// Returns an error if a built-in target cap fails to parse
fn log_filter(level: LevelFilter, rust_log: Option<&str>) -> Result<EnvFilter> {
    let mut filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .parse_lossy(rust_log.unwrap_or_default());
    for target in QUIET_TARGETS {
        filter = filter.add_directive(target.parse()?);
    }
    Ok(filter)
}

/// Install the global subscriber at `level`, exporting spans when an OTLP
/// endpoint is configured.
///
/// # Errors
///
/// Returns an error if the exporter cannot be built or a subscriber is already installed
pub fn init(level: LevelFilter) -> Result<()> {
    let fmt_layer = fmt::layer()
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_target(false);

    let filter = log_filter(level, var(EnvFilter::DEFAULT_ENV).ok().as_deref())?;

    if let Ok(endpoint) = var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        let tracer = init_tracer(endpoint)?;
        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

        let subscriber = Registry::default()
            .with(fmt_layer)
            .with(otel_layer)
            .with(filter);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = Registry::default().with(fmt_layer).with(filter);
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}

/// Flush and stop the trace exporter (noop if it was never started).
pub fn shutdown_tracer() {
    if let Some(tp) = TRACER_PROVIDER.get() {
        debug!("shutting down tracer provider");
        let _ = tp.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_keeps_scheme() {
        assert_eq!(
            normalize_endpoint("https://otel.authcore.dev:4317".to_string()),
            "https://otel.authcore.dev:4317"
        );
    }

    #[test]
    fn endpoint_without_scheme_defaults_to_http() {
        assert_eq!(
            normalize_endpoint("localhost:4317/".to_string()),
            "http://localhost:4317"
        );
    }

    #[test]
    fn configured_level_is_the_default() -> Result<()> {
        let filter = log_filter(LevelFilter::INFO, None)?;
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::INFO));
        Ok(())
    }

    #[test]
    fn rust_log_raises_a_single_target() -> Result<()> {
        let filter = log_filter(LevelFilter::ERROR, Some("authcore::auth=debug"))?;
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));
        Ok(())
    }

    #[test]
    fn garbage_rust_log_falls_back_to_level() -> Result<()> {
        let filter = log_filter(LevelFilter::WARN, Some("authcore=loud"))?;
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::WARN));
        Ok(())
    }

    #[test]
    fn instance_id_prefers_configured_value() {
        assert_eq!(instance_id(Some(" api-1 ".to_string())), "api-1");
        assert_eq!(instance_id(Some(String::new())).len(), 26);
        assert_eq!(instance_id(None).len(), 26);
    }

    #[test]
    fn shutdown_without_provider_is_noop() {
        shutdown_tracer();
    }
}
