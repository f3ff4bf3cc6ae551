//! Logging and trace export for the bridge process.
//!
//! Call [`init_tracing`] once at startup and keep the returned guard alive
//! until exit.
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `FOXBRIDGE_LOG_FORMAT=json` | Newline-delimited JSON logs instead of the compact formatter. |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP/HTTP collector base URL.  When set, spans (including the registry's `reconcile` and `collect_tick`) are exported. |
//!
//! # Example
//!
//! ```rust,no_run
//! let _guard = foxbridge_runtime::telemetry::init_tracing("foxbridge");
//! tracing::info!("bridge starting");
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt};

const FORMAT_VAR: &str = "FOXBRIDGE_LOG_FORMAT";
const OTLP_VAR: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// Console log formatter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl LogFormat {
    /// `"json"` (any case) selects [`LogFormat::Json`]; anything else is compact.
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Compact,
        }
    }

    fn from_env() -> Self {
        Self::parse(std::env::var(FORMAT_VAR).ok().as_deref())
    }

    fn layer(self) -> Box<dyn Layer<Registry> + Send + Sync> {
        match self {
            Self::Compact => tracing_subscriber::fmt::layer().compact().boxed(),
            Self::Json => tracing_subscriber::fmt::layer().json().boxed(),
        }
    }
}

/// Install the global subscriber: env filter, console formatter and, when
/// an OTLP endpoint is configured, a span exporter.  A failing exporter is
/// reported on stderr and skipped.
pub fn init_tracing(service_name: &str) -> TracerProviderGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let provider = std::env::var(OTLP_VAR)
        .ok()
        .and_then(|endpoint| build_provider(service_name, endpoint));

    let mut layers = vec![LogFormat::from_env().layer()];
    if let Some(provider) = &provider {
        let tracer = provider.tracer("foxbridge");
        layers.push(tracing_opentelemetry::layer().with_tracer(tracer).boxed());
    }

    if let Err(e) = tracing_subscriber::registry().with(layers).with(filter).try_init() {
        eprintln!("[foxbridge] tracing already initialised: {e}");
    }
    TracerProviderGuard(provider)
}

/// Shuts the OTel provider down on drop, flushing pending spans.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl TracerProviderGuard {
    /// `true` when spans are being exported.
    pub fn is_exporting(&self) -> bool {
        self.0.is_some()
    }

    /// Flush and shut the provider down now.  Later calls, and the drop, do
    /// nothing.
    pub fn shutdown(&mut self) {
        if let Some(provider) = self.0.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("[foxbridge] OpenTelemetry shutdown error: {e}");
            }
        }
    }
}

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn build_provider(service_name: &str, endpoint: String) -> Option<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[foxbridge] OTLP exporter init failed: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    // Simple exporter: the CLI builds its Tokio runtime after this runs.
    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            .with_simple_exporter(exporter)
            .build(),
    )
}
