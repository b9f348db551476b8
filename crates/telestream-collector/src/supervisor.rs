//! Session supervisor.
//!
//! [`Supervisor::launch_all`] constructs a session for every config unit,
//! registers each with the completion barrier and publishes the whole batch
//! in the handle map. Only then does it release the start fan-out, so no
//! session touches the network while siblings are still being built.
//!
//! The handle map is also what the lifecycle monitors operate on: stop
//! fan-out, force-close after a grace period, and reload diffs.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::barrier::CompletionBarrier;
use crate::packet::{LogSink, PacketSink};
use crate::session::{
    Connector, Session, SessionConfig, SessionContext, SessionControlHandle, SessionError,
    SessionOptions, TonicConnector,
};
use crate::stats::CollectorStats;
use crate::vendor::VendorRegistry;

/// How long stopped sessions get before they are force-closed.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(10);

/// One config unit: an opaque identity plus its parsed configuration, or the
/// reason it could not be parsed.
#[derive(Debug)]
pub struct ConfigUnit {
    pub id: String,
    pub config: Result<SessionConfig, SessionError>,
}

impl ConfigUnit {
    pub const fn new(id: String, config: SessionConfig) -> Self {
        Self {
            id,
            config: Ok(config),
        }
    }

    /// Read the device file named by `id`.
    pub fn load(id: String, options: &SessionOptions) -> Self {
        let config = SessionConfig::load(Path::new(&id), options).map_err(SessionError::from);
        Self { id, config }
    }
}

/// What a reload changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadSummary {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub restarted: Vec<String>,
}

impl ReloadSummary {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.restarted.is_empty()
    }
}

/// Owns the handle map and launches sessions.
pub struct Supervisor {
    registry: VendorRegistry,
    connector: Arc<dyn Connector>,
    sink: Arc<dyn PacketSink>,
    options: SessionOptions,
    grace: Duration,
    barrier: CompletionBarrier,
    stats: Arc<CollectorStats>,
    handles: RwLock<HashMap<String, Arc<SessionControlHandle>>>,
}

impl Supervisor {
    /// A supervisor dialing over TCP and logging packets.
    pub fn new(registry: VendorRegistry, options: SessionOptions) -> Self {
        Self {
            registry,
            connector: Arc::new(TonicConnector),
            sink: Arc::new(LogSink),
            options,
            grace: DEFAULT_STOP_GRACE,
            barrier: CompletionBarrier::new(),
            stats: Arc::new(CollectorStats::new()),
            handles: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn PacketSink>) -> Self {
        self.sink = sink;
        self
    }

    #[must_use]
    pub const fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub const fn barrier(&self) -> &CompletionBarrier {
        &self.barrier
    }

    pub fn stats(&self) -> &CollectorStats {
        &self.stats
    }

    pub const fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Load each device file and launch the batch.
    pub async fn launch_paths(
        &self,
        paths: &[String],
    ) -> HashMap<String, Arc<SessionControlHandle>> {
        let units = paths
            .iter()
            .map(|p| ConfigUnit::load(p.clone(), &self.options))
            .collect();
        self.launch_all(units).await
    }

    /// Construct every unit, then start every unit that constructed cleanly.
    ///
    /// Returns the handles of this batch. Construction failures are included
    /// with their error set and are never started.
    pub async fn launch_all(
        &self,
        units: Vec<ConfigUnit>,
    ) -> HashMap<String, Arc<SessionControlHandle>> {
        let _hold = self.barrier.hold();
        let mut batch = HashMap::with_capacity(units.len());
        let mut sessions = Vec::new();
        for unit in units {
            let (handle, session) = self.construct(unit);
            if let Some(session) = session {
                sessions.push((Arc::clone(&handle), session));
            }
            batch.insert(handle.unit().to_owned(), handle);
        }

        {
            let mut handles = self.handles.write().await;
            for (id, handle) in &batch {
                if let Some(previous) = handles.insert(id.clone(), Arc::clone(handle))
                    && previous.stop()
                {
                    warn!(unit = %id, "Replaced a running session");
                }
            }
        }

        for (handle, session) in sessions {
            let task = tokio::spawn(session.run());
            handle.attach_task(task.abort_handle());
        }

        let mut started = 0usize;
        for handle in batch.values() {
            if handle.error().is_none() && handle.start() {
                started += 1;
            }
        }
        info!(
            units = batch.len(),
            started,
            not_started = batch.len() - started,
            "Launched session batch"
        );
        batch
    }

    fn construct(&self, unit: ConfigUnit) -> (Arc<SessionControlHandle>, Option<Session>) {
        let ConfigUnit { id, config } = unit;
        let token = self.barrier.register();

        let config = match config {
            Ok(config) => Arc::new(config),
            Err(e) => {
                self.construction_failed(&id, "", "", &e);
                let handle =
                    SessionControlHandle::failed(id, String::new(), String::new(), None, e);
                return (Arc::new(handle), None);
            }
        };

        let vendor = match self.registry.resolve(config.vendor_name()) {
            Ok(vendor) => vendor,
            Err(e) => {
                let e = SessionError::from(e);
                let device = config.device.device();
                self.construction_failed(&id, config.vendor_name(), &device, &e);
                let handle = SessionControlHandle::failed(
                    id,
                    config.vendor_name().to_owned(),
                    device,
                    Some(config),
                    e,
                );
                return (Arc::new(handle), None);
            }
        };

        let (handle, stop, state) =
            SessionControlHandle::new(id.clone(), vendor.name().to_owned(), Arc::clone(&config));
        let ctx = Arc::new(SessionContext::new(
            id,
            vendor.name().to_owned(),
            config,
            Arc::clone(&self.sink),
            Arc::clone(&self.stats),
            state,
        ));
        let session = Session::new(ctx, vendor, Arc::clone(&self.connector), stop, token);
        (Arc::new(handle), Some(session))
    }

    /// Log and count a unit that never became a session.
    fn construction_failed(&self, unit: &str, vendor: &str, device: &str, err: &SessionError) {
        error!(
            unit,
            vendor,
            device,
            state = %crate::session::SessionState::Failed,
            error = %err,
            "Session construction failed"
        );
        self.stats
            .session_ended(crate::session::SessionState::Failed, vendor);
    }

    /// Snapshot of the handle map.
    pub async fn handles(&self) -> HashMap<String, Arc<SessionControlHandle>> {
        self.handles.read().await.clone()
    }

    pub async fn handle(&self, unit: &str) -> Option<Arc<SessionControlHandle>> {
        self.handles.read().await.get(unit).cloned()
    }

    /// Ask one session to stop.
    pub async fn stop(&self, unit: &str) -> bool {
        self.handle(unit).await.is_some_and(|h| h.stop())
    }

    /// Ask every active session to stop. Returns how many stop tokens were queued.
    pub async fn stop_all(&self) -> usize {
        let handles = self.handles().await;
        handles.values().filter(|h| h.stop()).count()
    }

    /// Stop every active session and force-close whichever is still running
    /// after the grace period. Returns how many were force-closed.
    pub async fn stop_all_with_grace(&self) -> usize {
        let active: Vec<_> = self
            .handles()
            .await
            .into_values()
            .filter(|h| h.is_active())
            .collect();
        self.stop_with_grace(&active).await
    }

    async fn stop_with_grace(&self, handles: &[Arc<SessionControlHandle>]) -> usize {
        for handle in handles {
            handle.stop();
        }
        let all_terminal = async {
            for handle in handles {
                handle.wait_terminal().await;
            }
        };
        if tokio::time::timeout(self.grace, all_terminal).await.is_ok() {
            return 0;
        }
        let forced = handles.iter().filter(|h| h.force_close()).count();
        warn!(
            forced,
            grace_ms = u64::try_from(self.grace.as_millis()).unwrap_or(u64::MAX),
            "Sessions ignored stop"
        );
        forced
    }

    /// Apply a new set of config units against the running ones.
    ///
    /// Units no longer listed are stopped and dropped from the map, new units
    /// are launched, and units whose configuration changed are stopped and
    /// relaunched. A listed unit whose device file no longer loads keeps its
    /// current session.
    pub async fn reload(&self, units: Vec<String>) -> ReloadSummary {
        // Stopping every running unit must not release the barrier before
        // the replacements are registered.
        let _hold = self.barrier.hold();
        let current = self.handles().await;
        let wanted: HashSet<&str> = units.iter().map(String::as_str).collect();
        let mut summary = ReloadSummary::default();

        let mut removed = Vec::new();
        for (id, handle) in &current {
            if !wanted.contains(id.as_str()) {
                summary.removed.push(id.clone());
                removed.push(Arc::clone(handle));
            }
        }

        let mut launch = Vec::new();
        let mut restart = Vec::new();
        for id in units {
            let unit = ConfigUnit::load(id.clone(), &self.options);
            match current.get(&id) {
                None => {
                    summary.added.push(id);
                    launch.push(unit);
                }
                Some(existing) => match &unit.config {
                    Ok(config) if existing.config() == Some(config) => {}
                    Ok(_) => {
                        summary.restarted.push(id);
                        restart.push(Arc::clone(existing));
                        launch.push(unit);
                    }
                    Err(e) => {
                        warn!(
                            unit = %id,
                            error = %e,
                            "Reloaded config is invalid, keeping current session"
                        );
                    }
                },
            }
        }

        if !removed.is_empty() {
            let mut handles = self.handles.write().await;
            for handle in &removed {
                handles.remove(handle.unit());
            }
        }
        removed.extend(restart);
        self.stop_with_grace(&removed).await;

        if !launch.is_empty() {
            self.launch_all(launch).await;
        }

        summary.added.sort();
        summary.removed.sort();
        summary.restarted.sort();
        info!(
            added = ?summary.added,
            removed = ?summary.removed,
            restarted = ?summary.restarted,
            "Configuration reloaded"
        );
        summary
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("registry", &self.registry)
            .field("options", &self.options)
            .field("grace", &self.grace)
            .field("barrier", &self.barrier)
            .finish_non_exhaustive()
    }
}
