//! Per-session control channel.
//!
//! The supervisor keeps a [`SessionControlHandle`] for every config unit and
//! drives the session through a small bounded queue of [`Control`] tokens.
//! Sends never block: a full queue already holds a pending stop, a closed one
//! belongs to a session that has finished.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use super::config::SessionConfig;
use super::error::SessionError;
use super::state::SessionState;

/// Queue depth: one start plus one stop.
const CONTROL_CAPACITY: usize = 2;

/// Control tokens delivered to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Start,
    Stop,
}

/// Supervisor-side view of one session.
#[derive(Debug)]
pub struct SessionControlHandle {
    unit: String,
    vendor: String,
    device: String,
    config: Option<Arc<SessionConfig>>,
    control_tx: Option<mpsc::Sender<Control>>,
    started: AtomicBool,
    state_rx: watch::Receiver<SessionState>,
    error: Option<SessionError>,
    task: OnceLock<AbortHandle>,
}

impl SessionControlHandle {
    /// Handle for a constructed session, plus the session's ends of the
    /// control queue and the state channel.
    pub(crate) fn new(
        unit: String,
        vendor: String,
        config: Arc<SessionConfig>,
    ) -> (Self, StopSignal, watch::Sender<SessionState>) {
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(SessionState::Created);
        let handle = Self {
            unit,
            vendor,
            device: config.device.device(),
            config: Some(config),
            control_tx: Some(control_tx),
            started: AtomicBool::new(false),
            state_rx,
            error: None,
            task: OnceLock::new(),
        };
        (handle, StopSignal::new(control_rx), state_tx)
    }

    /// Handle for a unit that could not be constructed.
    ///
    /// It is already `Failed`, never started, and ignores stop requests.
    pub(crate) fn failed(
        unit: String,
        vendor: String,
        device: String,
        config: Option<Arc<SessionConfig>>,
        error: SessionError,
    ) -> Self {
        let (_, state_rx) = watch::channel(SessionState::Failed);
        Self {
            unit,
            vendor,
            device,
            config,
            control_tx: None,
            started: AtomicBool::new(false),
            state_rx,
            error: Some(error),
            task: OnceLock::new(),
        }
    }

    pub(crate) fn attach_task(&self, task: AbortHandle) {
        let _ = self.task.set(task);
    }

    /// Release the session to start dialing. Only the first call sends.
    pub(crate) fn start(&self) -> bool {
        let Some(tx) = &self.control_tx else {
            return false;
        };
        if self.started.swap(true, Ordering::AcqRel) {
            return false;
        }
        tx.try_send(Control::Start).is_ok()
    }

    /// Ask the session to stop.
    ///
    /// Returns `true` when a stop token was queued. Stopping a session that
    /// already ended, already has a stop pending, or was never constructed is
    /// a no-op returning `false`.
    pub fn stop(&self) -> bool {
        let Some(tx) = &self.control_tx else {
            return false;
        };
        if self.state().is_terminal() {
            return false;
        }
        match tx.try_send(Control::Stop) {
            Ok(()) => {
                debug!(unit = %self.unit, "Stop queued");
                true
            }
            Err(mpsc::error::TrySendError::Full(_) | mpsc::error::TrySendError::Closed(_)) => {
                false
            }
        }
    }

    /// Abort the session task, dropping its connection.
    ///
    /// Last resort for a session that ignored its stop request.
    pub fn force_close(&self) -> bool {
        if self.state().is_terminal() {
            return false;
        }
        match self.task.get() {
            Some(task) => {
                warn!(
                    unit = %self.unit,
                    vendor = %self.vendor,
                    device = %self.device,
                    "Force-closing session"
                );
                task.abort();
                true
            }
            None => false,
        }
    }

    /// Wait until the session reaches a terminal state.
    pub async fn wait_terminal(&self) -> SessionState {
        let mut rx = self.state_rx.clone();
        let result = rx.wait_for(|s| s.is_terminal()).await.map(|state| *state);
        match result {
            Ok(state) => state,
            // The session dropped its sender without a terminal transition.
            Err(_) => *rx.borrow(),
        }
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Construction error, if the session never started.
    pub const fn error(&self) -> Option<&SessionError> {
        self.error.as_ref()
    }

    pub fn config(&self) -> Option<&SessionConfig> {
        self.config.as_deref()
    }

    /// Still running or waiting to run.
    pub fn is_active(&self) -> bool {
        self.error.is_none() && !self.state().is_terminal()
    }
}

/// Session-side end of the control queue.
///
/// Vendors receive it in `subscribe` and must race their stream reads
/// against [`StopSignal::stopped`].
#[derive(Debug)]
pub struct StopSignal {
    rx: mpsc::Receiver<Control>,
    stopped: bool,
}

impl StopSignal {
    pub(crate) const fn new(rx: mpsc::Receiver<Control>) -> Self {
        Self { rx, stopped: false }
    }

    /// Standalone signal for driving a vendor outside the supervisor.
    pub fn channel() -> (mpsc::Sender<Control>, Self) {
        let (tx, rx) = mpsc::channel(CONTROL_CAPACITY);
        (tx, Self::new(rx))
    }

    /// Block until started. Returns `false` if a stop (or a dropped handle)
    /// arrives first.
    pub(crate) async fn wait_start(&mut self) -> bool {
        match self.rx.recv().await {
            Some(Control::Start) => true,
            Some(Control::Stop) | None => {
                self.stopped = true;
                false
            }
        }
    }

    /// Resolves once a stop has been requested. Cancel-safe.
    pub async fn stopped(&mut self) {
        while !self.stopped {
            match self.rx.recv().await {
                Some(Control::Start) => {}
                Some(Control::Stop) | None => self.stopped = true,
            }
        }
    }

    pub const fn is_stopped(&self) -> bool {
        self.stopped
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    use telestream_core::DeviceConfig;

    use crate::session::SessionOptions;

    fn handle() -> (SessionControlHandle, StopSignal, watch::Sender<SessionState>) {
        let device: DeviceConfig = serde_json::from_str(r#"{"host": "r1"}"#).unwrap();
        let config = Arc::new(SessionConfig::new(device, &SessionOptions::default()));
        SessionControlHandle::new("r1.json".into(), "juniper-junos".into(), config)
    }

    #[tokio::test]
    async fn start_is_single_use() {
        let (handle, mut signal, _state) = handle();
        assert!(handle.start());
        assert!(!handle.start());
        assert!(signal.wait_start().await);
    }

    #[tokio::test]
    async fn stop_before_start_cancels_start_wait() {
        let (handle, mut signal, _state) = handle();
        assert!(handle.stop());
        assert!(!signal.wait_start().await);
        assert!(signal.is_stopped());
    }

    #[tokio::test]
    async fn repeated_stop_never_blocks() {
        let (handle, _signal, _state) = handle();
        assert!(handle.stop());
        assert!(handle.stop());
        // Queue full: the third stop is dropped, not awaited.
        assert!(!handle.stop());
    }

    #[tokio::test]
    async fn stop_after_terminal_is_noop() {
        let (handle, signal, state) = handle();
        state.send_replace(SessionState::Completed);
        drop(signal);
        assert!(!handle.stop());
        assert_eq!(handle.wait_terminal().await, SessionState::Completed);
    }

    #[tokio::test]
    async fn stopped_ignores_start_tokens() {
        let (tx, mut signal) = StopSignal::channel();
        tx.send(Control::Start).await.unwrap();
        tx.send(Control::Stop).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), signal.stopped())
            .await
            .unwrap();
        assert!(signal.is_stopped());
    }

    #[tokio::test]
    async fn failed_handle_is_inert() {
        let handle = SessionControlHandle::failed(
            "bad.json".into(),
            "unknown-vendor".into(),
            "r1:32767".into(),
            None,
            SessionError::Protocol("x".into()),
        );
        assert!(!handle.start());
        assert!(!handle.stop());
        assert!(!handle.is_active());
        assert_eq!(handle.state(), SessionState::Failed);
        assert!(handle.error().is_some());
    }
}
