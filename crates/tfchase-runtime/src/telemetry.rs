//! Tracing pipeline for the pursuit node.
//!
//! Call [`init_tracing`] once at process startup.  Spans created with
//! `#[instrument]` (controller ticks, broadcaster samples) are exported over
//! OTLP when a collector endpoint is configured; log lines always go to
//! stdout.
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP/HTTP collector base URL. Enables span export. |
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `TFCHASE_LOG_FORMAT=json` | Emit newline-delimited JSON logs. |
//!
//! ```rust,no_run
//! let _guard = tfchase_runtime::telemetry::init_tracing("tfchase").unwrap();
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tfchase_types::ChaseError;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Output settings, normally read from the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TelemetryOptions {
    pub otlp_endpoint: Option<String>,
    pub json_logs: bool,
    /// Filter directive used when `RUST_LOG` is unset.
    pub default_filter: Option<String>,
}

impl TelemetryOptions {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            otlp_endpoint: lookup("OTEL_EXPORTER_OTLP_ENDPOINT").filter(|e| !e.trim().is_empty()),
            json_logs: lookup("TFCHASE_LOG_FORMAT").as_deref() == Some("json"),
            default_filter: lookup("RUST_LOG"),
        }
    }
}

/// Install the global subscriber using [`TelemetryOptions::from_env`].
///
/// The returned guard must be held until shutdown; dropping it flushes any
/// spans still queued for export.
///
/// # Errors
///
/// [`ChaseError::Config`] if a global subscriber is already installed.
pub fn init_tracing(service_name: &str) -> Result<TracerProviderGuard, ChaseError> {
    init_tracing_with(service_name, &TelemetryOptions::from_env())
}

pub fn init_tracing_with(
    service_name: &str,
    options: &TelemetryOptions,
) -> Result<TracerProviderGuard, ChaseError> {
    let directive = options.default_filter.as_deref().unwrap_or("info");
    let env_filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("info"));

    let provider = build_provider(service_name, options);
    let otel_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("tfchase")));
    let json_layer = options.json_logs.then(|| tracing_subscriber::fmt::layer().json());
    let compact_layer = (!options.json_logs).then(|| tracing_subscriber::fmt::layer().compact());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_layer)
        .with(json_layer)
        .with(compact_layer)
        .try_init()
        .map_err(|e| ChaseError::Config(format!("tracing already initialised: {e}")))?;

    Ok(TracerProviderGuard(provider))
}

/// Shuts the OTel [`SdkTracerProvider`] down on drop.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl TracerProviderGuard {
    /// `true` when spans are being exported.
    pub fn is_exporting(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("[tfchase] OpenTelemetry provider shutdown error: {e}");
            }
        }
    }
}

/// `None` when no endpoint is configured or the exporter cannot be built;
/// the caller then logs to stdout only.
fn build_provider(service_name: &str, options: &TelemetryOptions) -> Option<SdkTracerProvider> {
    let endpoint = options.otlp_endpoint.clone()?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[tfchase] OTLP exporter init failed: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            // Synchronous export: init may run before any Tokio runtime exists.
            .with_simple_exporter(exporter)
            .build(),
    )
}
