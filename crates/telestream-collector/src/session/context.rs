//! Read-mostly state shared between a session and its vendor protocol.

use std::sync::Arc;

use tokio::sync::watch;

use super::config::SessionConfig;
use super::state::SessionState;
use crate::packet::PacketSink;
use crate::stats::{CollectorStats, StreamStats};

/// What a vendor protocol sees of the session it runs in.
pub struct SessionContext {
    unit: String,
    vendor: String,
    device: String,
    config: Arc<SessionConfig>,
    sink: Arc<dyn PacketSink>,
    stream_stats: Option<Arc<StreamStats>>,
    collector: Arc<CollectorStats>,
    state: watch::Sender<SessionState>,
}

impl SessionContext {
    pub fn new(
        unit: String,
        vendor: String,
        config: Arc<SessionConfig>,
        sink: Arc<dyn PacketSink>,
        collector: Arc<CollectorStats>,
        state: watch::Sender<SessionState>,
    ) -> Self {
        let stream_stats = config
            .transport
            .stats_handler
            .then(|| Arc::new(StreamStats::default()));
        Self {
            unit,
            vendor,
            device: config.device.device(),
            config,
            sink,
            stream_stats,
            collector,
            state,
        }
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    /// `host:port` of the device.
    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn sink(&self) -> &Arc<dyn PacketSink> {
        &self.sink
    }

    /// Present only when the stats handler is enabled.
    pub const fn stream_stats(&self) -> Option<&Arc<StreamStats>> {
        self.stream_stats.as_ref()
    }

    pub fn collector(&self) -> &CollectorStats {
        &self.collector
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Publish a lifecycle transition. Terminal states are sticky.
    pub fn set_state(&self, next: SessionState) {
        self.state.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("unit", &self.unit)
            .field("vendor", &self.vendor)
            .field("device", &self.device)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
