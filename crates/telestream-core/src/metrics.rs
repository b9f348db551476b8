//! `OpenTelemetry` export of traces and session counters.
//!
//! Only compiled with the `metrics` Cargo feature. Spans and the counters in
//! [`SessionMeters`] are pushed over OTLP/gRPC to a configurable endpoint
//! (e.g. an `OpenTelemetry` Collector).

use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;

/// Errors that can occur while building or stopping the OTLP pipeline.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("failed to build OTLP exporter: {0}")]
    ExporterBuild(#[from] opentelemetry_otlp::ExporterBuildError),

    #[error("OpenTelemetry SDK error: {0}")]
    Sdk(#[from] opentelemetry_sdk::error::OTelSdkError),
}

/// Keeps the tracer and meter providers alive.
///
/// Dropping the guard does not flush; call [`MetricsGuard::shutdown`].
pub struct MetricsGuard {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

impl MetricsGuard {
    /// The tracer provider backing the `tracing` bridge layer.
    pub const fn tracer_provider(&self) -> &SdkTracerProvider {
        &self.tracer_provider
    }

    /// Flush buffered spans and metrics, then stop both providers.
    pub fn shutdown(self) -> Result<(), MetricsError> {
        self.tracer_provider.shutdown()?;
        self.meter_provider.shutdown()?;
        Ok(())
    }
}

/// Start OTLP export of traces and metrics to `endpoint`
/// (e.g. `"http://localhost:4317"`), installing both providers globally.
pub fn init_metrics(endpoint: &str) -> Result<MetricsGuard, MetricsError> {
    let span_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(span_exporter)
        .build();
    global::set_tracer_provider(tracer_provider.clone());

    let metric_exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let meter_provider = SdkMeterProvider::builder()
        .with_periodic_exporter(metric_exporter)
        .build();
    global::set_meter_provider(meter_provider.clone());

    Ok(MetricsGuard {
        tracer_provider,
        meter_provider,
    })
}

/// Counters describing session lifecycle and stream volume.
///
/// Built from the global meter, so they are no-ops until [`init_metrics`]
/// has installed a provider.
#[derive(Clone)]
pub struct SessionMeters {
    sessions: Counter<u64>,
    packets: Counter<u64>,
}

impl SessionMeters {
    pub fn new() -> Self {
        let meter = global::meter("telestream");
        Self {
            sessions: meter
                .u64_counter("telestream.sessions")
                .with_description("Session lifecycle transitions by state")
                .build(),
            packets: meter
                .u64_counter("telestream.packets")
                .with_description("Telemetry packets received")
                .build(),
        }
    }

    /// Count a lifecycle transition (`started`, `stopped`, `failed`, `completed`).
    pub fn session(&self, state: &'static str, vendor: &str) {
        self.sessions.add(
            1,
            &[
                KeyValue::new("state", state),
                KeyValue::new("vendor", vendor.to_owned()),
            ],
        );
    }

    /// Count one received packet for `device`.
    pub fn packet(&self, device: &str) {
        self.packets
            .add(1, &[KeyValue::new("device", device.to_owned())]);
    }
}

impl Default for SessionMeters {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn pipeline_builds_against_unreachable_endpoint() {
        // Exporters only fail at send time.
        let guard = init_metrics("http://localhost:4317").unwrap();
        let meters = SessionMeters::new();
        meters.session("started", "juniper-junos");
        meters.packet("r1:32767");
        // Flushing to a missing collector may report an export error.
        let _ = guard.shutdown();
    }
}
