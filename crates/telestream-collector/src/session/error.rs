//! Session error types.

use tonic::{Code, Status};

use crate::vendor::VendorError;

/// Everything that can end a session in `Failed`.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Vendor(#[from] VendorError),

    #[error(transparent)]
    Config(#[from] telestream_core::Error),

    #[error("Dial {device} failed: {reason}")]
    Dial { device: String, reason: String },

    #[error("Login check against {device} ({vendor}) failed: {reason}")]
    LoginCheck {
        vendor: String,
        device: String,
        reason: String,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl SessionError {
    /// Map a gRPC status from the subscribe stream.
    ///
    /// Connectivity codes are transport errors, everything else means the
    /// device understood and refused the request.
    pub fn from_status(status: &Status) -> Self {
        match status.code() {
            Code::Unavailable | Code::Unknown | Code::Cancelled | Code::DeadlineExceeded => {
                Self::Transport(format!("{}: {}", status.code(), status.message()))
            }
            code => Self::Protocol(format!("{code}: {}", status.message())),
        }
    }

    /// Whether a reconnect policy may redial after this error.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Dial { .. } | Self::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_status_is_transport() {
        let err = SessionError::from_status(&Status::unavailable("connection refused"));
        assert!(matches!(err, SessionError::Transport(_)));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn unauthenticated_status_is_protocol() {
        let err = SessionError::from_status(&Status::unauthenticated("bad credentials"));
        assert!(matches!(err, SessionError::Protocol(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn login_check_is_never_retryable() {
        let err = SessionError::LoginCheck {
            vendor: "juniper-junos".into(),
            device: "r1:32767".into(),
            reason: "rejected".into(),
        };
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "Login check against r1:32767 (juniper-junos) failed: rejected"
        );
    }

    #[test]
    fn config_error_is_not_prefixed_twice() {
        let core = telestream_core::Error::Config("host must not be empty".into());
        let err = SessionError::from(core);
        assert_eq!(err.to_string(), "Configuration error: host must not be empty");
        assert!(!err.is_retryable());
    }
}
