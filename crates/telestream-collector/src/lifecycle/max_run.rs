//! Max-run monitor.
//!
//! Stops every session once the configured run time has elapsed.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::supervisor::Supervisor;

/// Stop every session once `max_run` has elapsed.
///
/// A zero duration means run forever; no task is spawned.
pub fn spawn_max_run(supervisor: Arc<Supervisor>, max_run: Duration) -> Option<JoinHandle<()>> {
    if max_run.is_zero() {
        return None;
    }
    Some(tokio::spawn(async move {
        tokio::time::sleep(max_run).await;
        info!(max_run_secs = max_run.as_secs(), "Max run time reached, stopping sessions");
        supervisor.stop_all_with_grace().await;
    }))
}
