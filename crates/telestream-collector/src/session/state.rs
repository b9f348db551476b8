//! Session lifecycle states.

use std::fmt;

/// Where a session is in its lifecycle.
///
/// `Stopped`, `Failed` and `Completed` are terminal; a session reaches exactly
/// one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Configuration parsed, vendor not yet resolved.
    Created,
    /// Waiting for the supervisor's start signal; no network I/O yet.
    AwaitingStart,
    /// Opening the transport connection.
    Dialing,
    /// Running the vendor login handshake.
    LoginCheck,
    /// Subscribe RPC issued, waiting for the device to accept it.
    Subscribing,
    /// Receiving telemetry.
    Streaming,
    /// Ended by a stop request.
    Stopped,
    /// Ended by a construction, transport or protocol error.
    Failed,
    /// The device closed the stream gracefully.
    Completed,
}

impl SessionState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed | Self::Completed)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::AwaitingStart => "awaiting_start",
            Self::Dialing => "dialing",
            Self::LoginCheck => "login_check",
            Self::Subscribing => "subscribing",
            Self::Streaming => "streaming",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_end_states_are_terminal() {
        let live = [
            SessionState::Created,
            SessionState::AwaitingStart,
            SessionState::Dialing,
            SessionState::LoginCheck,
            SessionState::Subscribing,
            SessionState::Streaming,
        ];
        assert!(live.iter().all(|s| !s.is_terminal()));
        assert!(SessionState::Stopped.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        assert!(SessionState::Completed.is_terminal());
    }

    #[test]
    fn display_uses_snake_case() {
        assert_eq!(SessionState::AwaitingStart.to_string(), "awaiting_start");
        assert_eq!(SessionState::LoginCheck.to_string(), "login_check");
    }
}
