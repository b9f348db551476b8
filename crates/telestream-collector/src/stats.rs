//! Operational counters.
//!
//! [`StreamStats`] is the per-session stats handler enabled by
//! `--stats-handler`; [`CollectorStats`] counts session lifecycle events for
//! the whole process and mirrors them to `OpenTelemetry` when the `metrics`
//! feature is on.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

use crate::session::SessionState;

/// RPC and stream volume for one session.
#[derive(Debug, Default)]
pub struct StreamStats {
    rpcs: AtomicU64,
    messages: AtomicU64,
    bytes: AtomicU64,
}

impl StreamStats {
    pub fn record_rpc(&self) {
        self.rpcs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message(&self, bytes: usize) {
        self.messages.fetch_add(1, Ordering::Relaxed);
        self.bytes
            .fetch_add(u64::try_from(bytes).unwrap_or(u64::MAX), Ordering::Relaxed);
    }

    pub fn rpcs(&self) -> u64 {
        self.rpcs.load(Ordering::Relaxed)
    }

    pub fn messages(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

/// Snapshot of [`CollectorStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectorSummary {
    pub started: u64,
    pub stopped: u64,
    pub failed: u64,
    pub completed: u64,
    pub packets: u64,
}

/// Process-wide session counters.
#[derive(Default)]
pub struct CollectorStats {
    started: AtomicU64,
    stopped: AtomicU64,
    failed: AtomicU64,
    completed: AtomicU64,
    packets: AtomicU64,
    #[cfg(feature = "metrics")]
    meters: telestream_core::metrics::SessionMeters,
}

impl CollectorStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// A session left `AWAITING_START` and began dialing.
    pub fn session_started(&self, vendor: &str) {
        self.started.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        self.meters.session("started", vendor);
        #[cfg(not(feature = "metrics"))]
        let _ = vendor;
    }

    /// A session reached `state`; non-terminal states are ignored.
    pub fn session_ended(&self, state: SessionState, vendor: &str) {
        let counter = match state {
            SessionState::Stopped => &self.stopped,
            SessionState::Failed => &self.failed,
            SessionState::Completed => &self.completed,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        self.meters.session(state.as_str(), vendor);
        #[cfg(not(feature = "metrics"))]
        let _ = vendor;
    }

    pub fn packet(&self, device: &str) {
        self.packets.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        self.meters.packet(device);
        #[cfg(not(feature = "metrics"))]
        let _ = device;
    }

    pub fn summary(&self) -> CollectorSummary {
        CollectorSummary {
            started: self.started.load(Ordering::Relaxed),
            stopped: self.stopped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            packets: self.packets.load(Ordering::Relaxed),
        }
    }

    pub fn log_summary(&self) {
        let s = self.summary();
        info!(
            started = s.started,
            stopped = s.stopped,
            failed = s.failed,
            completed = s.completed,
            packets = s.packets,
            "Session summary"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_stats_accumulate() {
        let stats = StreamStats::default();
        stats.record_rpc();
        stats.record_message(100);
        stats.record_message(28);
        assert_eq!(stats.rpcs(), 1);
        assert_eq!(stats.messages(), 2);
        assert_eq!(stats.bytes(), 128);
    }

    #[test]
    fn collector_counts_terminal_states_only() {
        let stats = CollectorStats::new();
        stats.session_started("juniper-junos");
        stats.session_ended(SessionState::Streaming, "juniper-junos");
        stats.session_ended(SessionState::Stopped, "juniper-junos");
        stats.session_ended(SessionState::Failed, "cisco-iosxr");
        stats.packet("r1:32767");
        assert_eq!(
            stats.summary(),
            CollectorSummary {
                started: 1,
                stopped: 1,
                failed: 1,
                completed: 0,
                packets: 1,
            }
        );
    }
}
