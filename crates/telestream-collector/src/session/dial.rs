//! gRPC channel assembly for a device session.
//!
//! [`DialOptions`] starts from the session config (window size, timeouts,
//! TLS), vendors extend it with per-RPC metadata, and a [`Connector`] turns it
//! into a [`Connection`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tonic::metadata::{AsciiMetadataKey, AsciiMetadataValue};
use tonic::service::Interceptor;
use tonic::service::interceptor::InterceptedService;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};
use tonic::{Request, Status};

use telestream_core::config::TlsConfig;

use super::config::SessionConfig;
use super::error::SessionError;
use crate::stats::StreamStats;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);
const KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything needed to open the channel to one device.
#[derive(Debug, Clone)]
pub struct DialOptions {
    pub device: String,
    pub window_size: u32,
    pub connect_timeout: Duration,
    pub tls: Option<TlsConfig>,
    metadata: Vec<(AsciiMetadataKey, AsciiMetadataValue)>,
}

impl DialOptions {
    /// Base options from the session config.
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            device: config.device.device(),
            window_size: config.transport.window_size,
            connect_timeout: config.transport.connect_timeout,
            tls: config.device.tls.clone(),
            metadata: Vec::new(),
        }
    }

    /// Attach a header to every RPC on the connection.
    pub fn insert_metadata(&mut self, key: &'static str, value: &str) -> Result<(), SessionError> {
        let value = AsciiMetadataValue::try_from(value).map_err(|_| SessionError::Dial {
            device: self.device.clone(),
            reason: format!("metadata `{key}` is not a valid header value"),
        })?;
        self.metadata
            .push((AsciiMetadataKey::from_static(key), value));
        Ok(())
    }

    pub fn metadata(&self) -> &[(AsciiMetadataKey, AsciiMetadataValue)] {
        &self.metadata
    }

    pub fn uri(&self) -> String {
        let scheme = if self.tls.is_some() { "https" } else { "http" };
        format!("{scheme}://{}", self.device)
    }

    /// Build the tonic endpoint, reading TLS material from disk.
    pub fn endpoint(&self) -> Result<Endpoint, SessionError> {
        let mut endpoint = Endpoint::from_shared(self.uri())
            .map_err(|e| self.dial_error(e.to_string()))?
            .initial_stream_window_size(self.window_size)
            .initial_connection_window_size(self.window_size)
            .connect_timeout(self.connect_timeout)
            .http2_keep_alive_interval(KEEP_ALIVE_INTERVAL)
            .keep_alive_timeout(KEEP_ALIVE_TIMEOUT);

        if let Some(tls) = &self.tls {
            endpoint = endpoint
                .tls_config(self.tls_config(tls)?)
                .map_err(|e| self.dial_error(e.to_string()))?;
        }
        Ok(endpoint)
    }

    fn tls_config(&self, tls: &TlsConfig) -> Result<ClientTlsConfig, SessionError> {
        let mut config = ClientTlsConfig::new().with_enabled_roots();
        if let Some(name) = &tls.server_name {
            config = config.domain_name(name.clone());
        }
        if let Some(ca) = &tls.ca {
            let pem = std::fs::read_to_string(ca).map_err(|e| {
                self.dial_error(format!("Failed to read CA cert {}: {e}", ca.display()))
            })?;
            config = config.ca_certificate(Certificate::from_pem(pem));
        }
        match (&tls.cert, &tls.key) {
            (Some(cert), Some(key)) => {
                let cert_pem = std::fs::read_to_string(cert).map_err(|e| {
                    self.dial_error(format!("Failed to read cert {}: {e}", cert.display()))
                })?;
                let key_pem = std::fs::read_to_string(key).map_err(|e| {
                    self.dial_error(format!("Failed to read key {}: {e}", key.display()))
                })?;
                config = config.identity(Identity::from_pem(cert_pem, key_pem));
            }
            (None, None) => {}
            _ => {
                return Err(self.dial_error(
                    "tls.cert and tls.key must be configured together".into(),
                ));
            }
        }
        Ok(config)
    }

    /// Interceptor carrying this dial's metadata.
    pub fn interceptor(&self, stats: Option<Arc<StreamStats>>) -> SessionInterceptor {
        SessionInterceptor {
            metadata: Arc::from(self.metadata.clone()),
            stats,
        }
    }

    fn dial_error(&self, reason: String) -> SessionError {
        SessionError::Dial {
            device: self.device.clone(),
            reason,
        }
    }
}

/// Adds the dial metadata to each request and counts RPCs for the stats handler.
#[derive(Debug, Clone)]
pub struct SessionInterceptor {
    metadata: Arc<[(AsciiMetadataKey, AsciiMetadataValue)]>,
    stats: Option<Arc<StreamStats>>,
}

impl Interceptor for SessionInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        for (key, value) in self.metadata.iter() {
            request.metadata_mut().insert(key.clone(), value.clone());
        }
        if let Some(stats) = &self.stats {
            stats.record_rpc();
        }
        Ok(request)
    }
}

/// An open device channel plus the interceptor every client must use.
#[derive(Debug, Clone)]
pub struct Connection {
    channel: Channel,
    interceptor: SessionInterceptor,
}

impl Connection {
    pub const fn new(channel: Channel, interceptor: SessionInterceptor) -> Self {
        Self {
            channel,
            interceptor,
        }
    }

    /// Service stack for generated clients' `new`.
    pub fn service(&self) -> InterceptedService<Channel, SessionInterceptor> {
        InterceptedService::new(self.channel.clone(), self.interceptor.clone())
    }
}

/// Opens device channels. Swappable so sessions can run without a network.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, options: &DialOptions) -> Result<Channel, SessionError>;
}

/// Eagerly connects over TCP (and TLS when configured).
#[derive(Debug, Clone, Copy, Default)]
pub struct TonicConnector;

#[async_trait]
impl Connector for TonicConnector {
    async fn connect(&self, options: &DialOptions) -> Result<Channel, SessionError> {
        let endpoint = options.endpoint()?;
        endpoint.connect().await.map_err(|e| {
            tracing::debug!(error = ?e, device = %options.device, "connection error details");
            SessionError::Dial {
                device: options.device.clone(),
                reason: format!("{e}: {}", error_chain(&e)),
            }
        })
    }
}

/// Walk the `source()` chain of an error and join into a single string.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut chain = Vec::new();
    let mut current = err.source();
    while let Some(e) = current {
        chain.push(e.to_string());
        current = e.source();
    }
    if chain.is_empty() {
        String::from("(no further details)")
    } else {
        chain.join(" -> ")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use telestream_core::DeviceConfig;

    use crate::session::SessionOptions;

    fn options(json: &str) -> DialOptions {
        let device: DeviceConfig = serde_json::from_str(json).unwrap();
        DialOptions::from_config(&SessionConfig::new(device, &SessionOptions::default()))
    }

    #[test]
    fn plaintext_without_tls() {
        let opts = options(r#"{"host": "10.0.0.1", "port": 50051}"#);
        assert_eq!(opts.uri(), "http://10.0.0.1:50051");
        assert_eq!(opts.window_size, telestream_core::config::DEFAULT_GRPC_WINDOW_SIZE);
        assert!(opts.endpoint().is_ok());
    }

    #[test]
    fn tls_switches_scheme() {
        let opts = options(r#"{"host": "r1", "tls": {"servername": "r1.lab"}}"#);
        assert_eq!(opts.uri(), "https://r1:32767");
    }

    #[test]
    fn missing_ca_file_is_dial_error() {
        let mut opts = options(r#"{"host": "r1"}"#);
        opts.tls = Some(TlsConfig {
            ca: Some(PathBuf::from("/nonexistent/ca.pem")),
            ..TlsConfig::default()
        });
        let err = opts.endpoint().unwrap_err();
        assert!(matches!(err, SessionError::Dial { .. }));
        assert!(err.to_string().contains("ca.pem"));
    }

    #[test]
    fn cert_without_key_is_rejected() {
        let mut opts = options(r#"{"host": "r1"}"#);
        opts.tls = Some(TlsConfig {
            cert: Some(PathBuf::from("client.pem")),
            ..TlsConfig::default()
        });
        assert!(opts.endpoint().is_err());
    }

    #[test]
    fn interceptor_adds_metadata_and_counts() {
        let mut opts = options(r#"{"host": "r1"}"#);
        opts.insert_metadata("username", "lab").unwrap();
        let stats = Arc::new(StreamStats::default());
        let mut interceptor = opts.interceptor(Some(Arc::clone(&stats)));

        let request = interceptor.call(Request::new(())).unwrap();
        let username = request.metadata().get("username").unwrap();
        assert_eq!(username.to_str().unwrap(), "lab");
        assert_eq!(stats.rpcs(), 1);
    }

    #[test]
    fn non_ascii_metadata_is_rejected() {
        let mut opts = options(r#"{"host": "r1"}"#);
        assert!(opts.insert_metadata("password", "pa\nss").is_err());
    }

    #[test]
    fn error_chain_without_source() {
        let err = std::io::Error::other("boom");
        assert_eq!(error_chain(&err), "(no further details)");
    }
}
