//! Logging infrastructure
//!
//! - JSON file logging (daily rolling, in the data directory)
//! - Console logging (human-readable, verbose mode only)
//! - OpenTelemetry export (Jaeger, Honeycomb, etc.) when an endpoint is given

use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SERVICE_NAME: &str = "skillforge";
const LOG_FILE_PREFIX: &str = "skillforge.log";

/// Keeps the log writers alive; drop flushes them
pub struct Logging {
    log_dir: PathBuf,
    _file_guard: WorkerGuard,
    otel_provider: Option<SdkTracerProvider>,
}

fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug,hyper=info,reqwest=info,h2=info,rustls=info")
        } else {
            EnvFilter::new("info,hyper=warn,reqwest=warn,h2=warn,rustls=warn")
        }
    })
}

impl Logging {
    /// Install the global subscriber. A second call keeps the first
    /// subscriber but still returns a usable guard.
    pub fn init(log_dir: &Path, verbose: bool, otel_endpoint: Option<&str>) -> anyhow::Result<Self> {
        std::fs::create_dir_all(log_dir)?;

        let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
        let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);

        let otel_provider = match otel_endpoint {
            Some(endpoint) => {
                let exporter = opentelemetry_otlp::SpanExporter::builder()
                    .with_http()
                    .with_endpoint(endpoint)
                    .with_protocol(opentelemetry_otlp::Protocol::HttpBinary)
                    .build()?;

                Some(
                    SdkTracerProvider::builder()
                        .with_batch_exporter(exporter)
                        .with_resource(Resource::builder().with_service_name(SERVICE_NAME).build())
                        .build(),
                )
            }
            None => None,
        };
        let otel_layer = otel_provider
            .as_ref()
            .map(|provider| tracing_opentelemetry::layer().with_tracer(provider.tracer(SERVICE_NAME)));

        // Console output goes to stderr so it never mixes with answers on stdout
        let console_layer = verbose.then(|| {
            fmt::layer()
                .with_target(false)
                .compact()
                .with_writer(std::io::stderr)
        });

        tracing_subscriber::registry()
            .with(env_filter(verbose))
            .with(fmt::layer().json().with_writer(non_blocking))
            .with(console_layer)
            .with(otel_layer)
            .try_init()
            .ok();

        tracing::info!(
            log_dir = %log_dir.display(),
            otel_enabled = otel_endpoint.is_some(),
            "logging initialized"
        );

        Ok(Self {
            log_dir: log_dir.to_path_buf(),
            _file_guard: file_guard,
            otel_provider,
        })
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }
}

impl Drop for Logging {
    fn drop(&mut self) {
        if let Some(provider) = self.otel_provider.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("failed to flush OpenTelemetry spans: {}", e);
            }
        }
    }
}

/// Default data directory: `$XDG_DATA_HOME/skillforge`, else `~/.skillforge`
pub fn default_data_dir() -> PathBuf {
    if let Some(data) = std::env::var_os("XDG_DATA_HOME") {
        PathBuf::from(data).join(SERVICE_NAME)
    } else if let Some(home) = dirs::home_dir() {
        home.join(".skillforge")
    } else {
        PathBuf::from(".skillforge")
    }
}
