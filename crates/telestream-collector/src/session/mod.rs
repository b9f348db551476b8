//! Device sessions.
//!
//! A session is one independent telemetry connection to a single device. It
//! is built by the supervisor, waits for a start token, then dials, runs the
//! vendor login check when the vendor requires one, subscribes and streams.
//! The supervisor talks to it only through its [`SessionControlHandle`].

mod config;
mod context;
mod control;
mod dial;
mod error;
mod reconnect;
mod runner;
mod state;

pub use config::{Compression, PayloadOptions, SessionConfig, SessionOptions, TransportOptions};
pub use context::SessionContext;
pub use control::{Control, SessionControlHandle, StopSignal};
pub use dial::{Connection, Connector, DialOptions, SessionInterceptor, TonicConnector};
pub use error::SessionError;
pub use reconnect::ReconnectPolicy;
pub use runner::Session;
pub use state::SessionState;
