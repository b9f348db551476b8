//! Per-session configuration.
//!
//! A [`SessionConfig`] is the device file for one config unit combined with
//! the process-wide knobs from the command line. It is built once and never
//! mutated after the session starts.

use std::path::Path;
use std::time::Duration;

use tonic::codec::CompressionEncoding;

use telestream_core::DeviceConfig;

use crate::packet::PacketStrategy;

/// HTTP/2 message compression for the subscribe stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Compression {
    Gzip,
    Deflate,
}

impl Compression {
    pub const fn encoding(self) -> CompressionEncoding {
        match self {
            Self::Gzip => CompressionEncoding::Gzip,
            Self::Deflate => CompressionEncoding::Deflate,
        }
    }
}

/// Transport knobs applied when dialing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOptions {
    /// Initial HTTP/2 stream and connection window, from the device file.
    pub window_size: u32,
    pub compression: Option<Compression>,
    /// Count RPCs, messages and bytes per session.
    pub stats_handler: bool,
    /// Record the subscribe response headers.
    pub grpc_headers: bool,
    pub connect_timeout: Duration,
}

/// Knobs handed to the packet sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PayloadOptions {
    pub json: bool,
    pub latency_profile: bool,
    pub prefix_check: bool,
    pub strategy: PacketStrategy,
}

/// Command-line knobs shared by every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub compression: Option<Compression>,
    pub stats_handler: bool,
    pub grpc_headers: bool,
    pub connect_timeout: Duration,
    pub payload: PayloadOptions,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            compression: None,
            stats_handler: false,
            grpc_headers: false,
            connect_timeout: Duration::from_secs(10),
            payload: PayloadOptions::default(),
        }
    }
}

/// Everything one session needs to know about its device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub device: DeviceConfig,
    pub transport: TransportOptions,
    pub payload: PayloadOptions,
}

impl SessionConfig {
    pub fn new(device: DeviceConfig, options: &SessionOptions) -> Self {
        let transport = TransportOptions {
            window_size: device.grpc.ws,
            compression: options.compression,
            stats_handler: options.stats_handler,
            grpc_headers: options.grpc_headers,
            connect_timeout: options.connect_timeout,
        };
        Self {
            device,
            transport,
            payload: options.payload,
        }
    }

    /// Read and validate the device file at `path`.
    pub fn load(path: &Path, options: &SessionOptions) -> telestream_core::Result<Self> {
        DeviceConfig::load(path).map(|device| Self::new(device, options))
    }

    pub fn vendor_name(&self) -> &str {
        &self.device.vendor.name
    }
}
