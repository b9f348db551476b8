//! The per-device session task.
//!
//! A session waits for its start token, dials, runs the vendor login check
//! when required, subscribes and streams until it is stopped, the device
//! closes the stream, or an error ends it. Exactly one terminal state is
//! published, after which the session's completion-barrier token is released.

use std::sync::Arc;

use tracing::{error, info, warn};

use super::context::SessionContext;
use super::control::StopSignal;
use super::dial::{Connection, Connector, DialOptions};
use super::error::SessionError;
use super::reconnect::ReconnectPolicy;
use super::state::SessionState;
use crate::barrier::BarrierToken;
use crate::vendor::{SubscribeOutcome, Vendor};

/// One device session, ready to be spawned.
pub struct Session {
    ctx: Arc<SessionContext>,
    vendor: Vendor,
    connector: Arc<dyn Connector>,
    stop: StopSignal,
    token: BarrierToken,
}

impl Session {
    pub(crate) fn new(
        ctx: Arc<SessionContext>,
        vendor: Vendor,
        connector: Arc<dyn Connector>,
        stop: StopSignal,
        token: BarrierToken,
    ) -> Self {
        Self {
            ctx,
            vendor,
            connector,
            stop,
            token,
        }
    }

    /// Drive the session to a terminal state and return it.
    pub async fn run(self) -> SessionState {
        let Self {
            ctx,
            vendor,
            connector,
            mut stop,
            token,
        } = self;
        let _exit = ExitGuard {
            ctx: Arc::clone(&ctx),
            _token: token,
        };

        ctx.set_state(SessionState::AwaitingStart);
        if !stop.wait_start().await {
            return finish(&ctx, SubscribeOutcome::Stopped);
        }
        ctx.collector().session_started(vendor.name());

        let policy = ctx
            .config()
            .device
            .reconnect
            .as_ref()
            .map(ReconnectPolicy::from_config);
        let mut attempt = 0u32;

        let outcome = loop {
            let outcome = connect_and_stream(&ctx, &vendor, connector.as_ref(), &mut stop).await;
            let SubscribeOutcome::Failed(err) = outcome else {
                break outcome;
            };
            let Some(policy) = policy.as_ref().filter(|_| err.is_retryable()) else {
                break SubscribeOutcome::Failed(err);
            };
            // A session that made it to streaming earns a fresh backoff.
            if ctx.state() == SessionState::Streaming {
                attempt = 0;
            }
            if !policy.should_retry(attempt) {
                break SubscribeOutcome::Failed(err);
            }

            let delay = policy.delay_for_attempt(attempt);
            attempt += 1;
            warn!(
                unit = ctx.unit(),
                device = ctx.device(),
                error = %err,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Connection lost, redialing"
            );
            tokio::select! {
                biased;
                () = stop.stopped() => break SubscribeOutcome::Stopped,
                () = tokio::time::sleep(delay) => {}
            }
        };

        finish(&ctx, outcome)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("ctx", &self.ctx)
            .field("vendor", &self.vendor.name())
            .finish_non_exhaustive()
    }
}

async fn connect_and_stream(
    ctx: &Arc<SessionContext>,
    vendor: &Vendor,
    connector: &dyn Connector,
    stop: &mut StopSignal,
) -> SubscribeOutcome {
    ctx.set_state(SessionState::Dialing);
    let mut options = DialOptions::from_config(ctx.config());
    if let Err(e) = vendor.extend_dial(ctx, &mut options) {
        return SubscribeOutcome::Failed(e);
    }

    let channel = tokio::select! {
        biased;
        () = stop.stopped() => return SubscribeOutcome::Stopped,
        result = connector.connect(&options) => match result {
            Ok(channel) => channel,
            Err(e) => return SubscribeOutcome::Failed(e),
        },
    };
    let conn = Connection::new(channel, options.interceptor(ctx.stream_stats().cloned()));

    if vendor.login_check_required() {
        ctx.set_state(SessionState::LoginCheck);
        let result: Result<(), SessionError> = tokio::select! {
            biased;
            () = stop.stopped() => return SubscribeOutcome::Stopped,
            result = vendor.login_check(ctx, &conn) => result,
        };
        if let Err(e) = result {
            return SubscribeOutcome::Failed(e);
        }
    }

    ctx.set_state(SessionState::Subscribing);
    vendor.subscribe(&conn, ctx, stop).await
}

/// Publish the terminal state, log it and count it.
fn finish(ctx: &SessionContext, outcome: SubscribeOutcome) -> SessionState {
    let (state, err) = match outcome {
        SubscribeOutcome::Stopped => (SessionState::Stopped, None),
        SubscribeOutcome::Completed => (SessionState::Completed, None),
        SubscribeOutcome::Failed(e) => (SessionState::Failed, Some(e)),
    };
    ctx.set_state(state);
    ctx.collector().session_ended(state, ctx.vendor());
    if let Some(stats) = ctx.stream_stats() {
        info!(
            unit = ctx.unit(),
            device = ctx.device(),
            rpcs = stats.rpcs(),
            messages = stats.messages(),
            bytes = stats.bytes(),
            "Stream stats"
        );
    }

    match err {
        Some(e) => error!(
            unit = ctx.unit(),
            vendor = ctx.vendor(),
            device = ctx.device(),
            state = %state,
            error = %e,
            "Session ended"
        ),
        None => info!(
            unit = ctx.unit(),
            vendor = ctx.vendor(),
            device = ctx.device(),
            state = %state,
            "Session ended"
        ),
    }
    state
}

/// Runs when the session future is dropped, including on abort and when a
/// vendor panics.
///
/// An aborted session is published as `Stopped`, a panicked one as `Failed`.
/// The barrier token is released afterwards.
struct ExitGuard {
    ctx: Arc<SessionContext>,
    _token: BarrierToken,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if self.ctx.state().is_terminal() {
            return;
        }
        let ctx = &self.ctx;
        if std::thread::panicking() {
            ctx.set_state(SessionState::Failed);
            ctx.collector()
                .session_ended(SessionState::Failed, ctx.vendor());
            error!(
                unit = ctx.unit(),
                vendor = ctx.vendor(),
                device = ctx.device(),
                state = %SessionState::Failed,
                "Session panicked"
            );
        } else {
            ctx.set_state(SessionState::Stopped);
            ctx.collector()
                .session_ended(SessionState::Stopped, ctx.vendor());
            warn!(
                unit = ctx.unit(),
                vendor = ctx.vendor(),
                device = ctx.device(),
                "Session closed without finishing"
            );
        }
    }
}
