//! Telestream Collector Library
//!
//! Concurrent streaming-telemetry sessions against network devices:
//! - Vendor registry (Juniper JUNOS, Cisco IOS-XR, external protocols)
//! - Per-device sessions with a start/stop control channel
//! - Supervisor with two-phase launch and reload diffs
//! - Max-run and signal lifecycle monitors
//! - Completion barrier gating process exit

pub mod barrier;
pub mod lifecycle;
pub mod packet;
pub mod session;
pub mod stats;
pub mod supervisor;
pub mod vendor;
