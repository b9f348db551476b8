//! External-signal monitor.
//!
//! OS signals are translated into [`LifecycleSignal`]s by
//! [`forward_os_signals`] and consumed by [`SignalMonitor::run`]. Keeping the
//! two apart lets the monitor be driven from a plain channel.
//!
//! **Unix:** `SIGINT`, `SIGTERM` and `SIGQUIT` stop every session, `SIGHUP`
//! reloads the config-file-list.
//! **Other platforms:** Ctrl-C stops every session.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use telestream_core::ConfigFileList;

use crate::supervisor::Supervisor;

/// What an external signal asks the collector to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// Stop every session.
    Terminate,
    /// Re-read the config-file-list and apply the difference.
    Reload,
}

/// Translate OS signals into [`LifecycleSignal`]s until the receiver is dropped.
///
/// Returns `Err` if signal registration fails.
#[cfg(unix)]
pub async fn forward_os_signals(tx: mpsc::Sender<LifecycleSignal>) -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;
    let mut sighup = signal(SignalKind::hangup())?;

    loop {
        let (name, event) = tokio::select! {
            _ = sigint.recv() => ("SIGINT", LifecycleSignal::Terminate),
            _ = sigterm.recv() => ("SIGTERM", LifecycleSignal::Terminate),
            _ = sigquit.recv() => ("SIGQUIT", LifecycleSignal::Terminate),
            _ = sighup.recv() => ("SIGHUP", LifecycleSignal::Reload),
        };
        info!(signal = name, "Received signal");
        if tx.send(event).await.is_err() {
            return Ok(());
        }
    }
}

/// Translate Ctrl-C into [`LifecycleSignal::Terminate`] until the receiver is dropped.
#[cfg(not(unix))]
pub async fn forward_os_signals(tx: mpsc::Sender<LifecycleSignal>) -> std::io::Result<()> {
    loop {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
        if tx.send(LifecycleSignal::Terminate).await.is_err() {
            return Ok(());
        }
    }
}

/// Applies lifecycle signals to the supervisor's sessions.
#[derive(Debug)]
pub struct SignalMonitor {
    supervisor: Arc<Supervisor>,
    file_list: Option<PathBuf>,
}

impl SignalMonitor {
    pub const fn new(supervisor: Arc<Supervisor>, file_list: Option<PathBuf>) -> Self {
        Self {
            supervisor,
            file_list,
        }
    }

    /// Handle signals until the sender side closes.
    pub async fn run(self, mut rx: mpsc::Receiver<LifecycleSignal>) {
        while let Some(signal) = rx.recv().await {
            match signal {
                LifecycleSignal::Terminate => {
                    info!("Stopping all sessions");
                    self.supervisor.stop_all_with_grace().await;
                }
                LifecycleSignal::Reload => self.reload().await,
            }
        }
    }

    /// Best effort: a list that cannot be read leaves every session as it is.
    async fn reload(&self) {
        let Some(path) = &self.file_list else {
            warn!("Reload requested but no config file list is configured");
            return;
        };
        match ConfigFileList::load(path) {
            Ok(list) => {
                self.supervisor.reload(list.units()).await;
            }
            Err(e) => error!(path = %path.display(), error = %e, "Reload aborted"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tempfile::TempDir;

    use crate::session::SessionOptions;
    use crate::vendor::VendorRegistry;

    fn supervisor() -> Arc<Supervisor> {
        Arc::new(
            Supervisor::new(VendorRegistry::builtin(), SessionOptions::default())
                .with_grace(Duration::from_millis(100)),
        )
    }

    #[tokio::test]
    async fn bad_list_leaves_sessions_untouched() {
        let dir = TempDir::new().unwrap();
        let device = dir.path().join("r1.json");
        std::fs::write(&device, r#"{"host": "r1", "vendor": {"name": "unknown-vendor"}}"#)
            .unwrap();
        let list = dir.path().join("list.json");
        std::fs::write(&list, "not json").unwrap();

        let sup = supervisor();
        sup.launch_paths(&[device.to_string_lossy().into_owned()])
            .await;

        let (tx, rx) = mpsc::channel(4);
        let monitor = tokio::spawn(SignalMonitor::new(Arc::clone(&sup), Some(list)).run(rx));
        tx.send(LifecycleSignal::Reload).await.unwrap();
        drop(tx);
        monitor.await.unwrap();

        assert_eq!(sup.handles().await.len(), 1);
    }

    #[tokio::test]
    async fn reload_picks_up_new_units() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("a.json"),
            r#"{"host": "a", "vendor": {"name": "unknown-vendor"}}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("b.json"),
            r#"{"host": "b", "vendor": {"name": "unknown-vendor"}}"#,
        )
        .unwrap();
        let list = dir.path().join("list.json");
        std::fs::write(&list, r#"{"config_file_list": ["a.json"]}"#).unwrap();

        let sup = supervisor();
        sup.launch_paths(&ConfigFileList::load(&list).unwrap().units())
            .await;
        std::fs::write(&list, r#"{"config_file_list": ["a.json", "b.json"]}"#).unwrap();

        let (tx, rx) = mpsc::channel(4);
        let monitor = tokio::spawn(SignalMonitor::new(Arc::clone(&sup), Some(list)).run(rx));
        tx.send(LifecycleSignal::Reload).await.unwrap();
        drop(tx);
        monitor.await.unwrap();

        assert_eq!(sup.handles().await.len(), 2);
    }

    #[tokio::test]
    async fn reload_without_list_is_ignored() {
        let sup = supervisor();
        let (tx, rx) = mpsc::channel(1);
        tx.send(LifecycleSignal::Reload).await.unwrap();
        drop(tx);
        SignalMonitor::new(Arc::clone(&sup), None).run(rx).await;
        assert!(sup.handles().await.is_empty());
    }
}
