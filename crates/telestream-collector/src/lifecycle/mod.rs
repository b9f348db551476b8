//! Lifecycle monitors.
//!
//! Two independent tasks layered over the supervisor's handle map: the
//! max-run timer and the external-signal monitor. Neither owns session
//! internals; both only send stop requests and reload diffs.

mod max_run;
mod signals;

pub use max_run::spawn_max_run;
pub use signals::{LifecycleSignal, SignalMonitor, forward_os_signals};
