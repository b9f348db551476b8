//! Shared tracing/logging initialization.
//!
//! Sets up `tracing_subscriber` with an env-filter and optional JSON output,
//! and, with the `metrics` feature, an OTLP export pipeline.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn env_filter(default_filter: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    )
}

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not set
///   (e.g. `"telestream_collector=info"`).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let env_filter = env_filter(default_filter);
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Guard returned by [`init_tracing_with_metrics`].
///
/// Holds the OTLP pipeline (if one was started) so it lives as long as the
/// process; call [`TelemetryGuard::shutdown`] to flush before exit.
#[derive(Default)]
pub struct TelemetryGuard {
    #[cfg(feature = "metrics")]
    metrics: Option<crate::metrics::MetricsGuard>,
}

impl TelemetryGuard {
    /// Whether an OTLP pipeline is active.
    pub const fn exporting(&self) -> bool {
        #[cfg(feature = "metrics")]
        {
            self.metrics.is_some()
        }
        #[cfg(not(feature = "metrics"))]
        {
            false
        }
    }

    /// Flush and stop the OTLP pipeline, logging instead of failing.
    pub fn shutdown(self) {
        #[cfg(feature = "metrics")]
        if let Some(guard) = self.metrics
            && let Err(e) = guard.shutdown()
        {
            tracing::warn!(error = %e, "Failed to flush OpenTelemetry pipeline");
        }
    }
}

/// Initialise tracing and, when an endpoint is given and the `metrics`
/// feature is compiled in, the `OpenTelemetry` OTLP pipeline.
///
/// A pipeline that fails to build is logged and skipped; logging itself is
/// always installed.
pub fn init_tracing_with_metrics(
    default_filter: &str,
    log_json: bool,
    metrics_endpoint: Option<&str>,
) -> TelemetryGuard {
    #[cfg(feature = "metrics")]
    if let Some(endpoint) = metrics_endpoint {
        match crate::metrics::init_metrics(endpoint) {
            Ok(guard) => {
                let otel_layer = tracing_opentelemetry::layer()
                    .with_tracer(opentelemetry::trace::TracerProvider::tracer(
                        guard.tracer_provider(),
                        "telestream",
                    ));
                let registry = tracing_subscriber::registry()
                    .with(env_filter(default_filter))
                    .with(otel_layer);
                if log_json {
                    registry
                        .with(tracing_subscriber::fmt::layer().json())
                        .init();
                } else {
                    registry.with(tracing_subscriber::fmt::layer()).init();
                }
                tracing::info!(endpoint, "OpenTelemetry export enabled");
                return TelemetryGuard {
                    metrics: Some(guard),
                };
            }
            Err(e) => {
                init_tracing(default_filter, log_json);
                tracing::warn!(error = %e, endpoint, "OpenTelemetry export disabled");
                return TelemetryGuard::default();
            }
        }
    }
    #[cfg(not(feature = "metrics"))]
    if metrics_endpoint.is_some() {
        init_tracing(default_filter, log_json);
        tracing::warn!("metrics endpoint ignored: built without the `metrics` feature");
        return TelemetryGuard::default();
    }

    init_tracing(default_filter, log_json);
    TelemetryGuard::default()
}
