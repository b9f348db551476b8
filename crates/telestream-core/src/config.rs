//! Device configuration files for telestream.
//!
//! Each collection session is described by one JSON file (a "config unit").
//! Units are named on the command line directly or through a
//! config-file-list, which is itself a JSON document:
//!
//! ```json
//! { "config_file_list": ["r1.json", "r2.json"] }
//! ```
//!
//! Relative entries of a config-file-list resolve against the directory the
//! list lives in.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Default device port for gRPC telemetry.
pub const DEFAULT_PORT: u16 = 32767;

/// Default HTTP/2 window size for the telemetry stream.
pub const DEFAULT_GRPC_WINDOW_SIZE: u32 = 1_048_576;

/// One device to collect telemetry from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Client identifier presented during the login handshake.
    #[serde(default, rename = "cid")]
    pub client_id: String,
    #[serde(default)]
    pub vendor: VendorConfig,
    #[serde(default)]
    pub grpc: GrpcConfig,
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    #[serde(default)]
    pub paths: Vec<PathConfig>,
    /// Ask the device for an end-of-sync marker.
    #[serde(default)]
    pub eos: bool,
    /// Redial policy; absent means dial and transport failures are terminal.
    #[serde(default)]
    pub reconnect: Option<ReconnectConfig>,
}

/// Vendor selection. An empty name selects the default vendor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorConfig {
    #[serde(default)]
    pub name: String,
}

/// Transport tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrpcConfig {
    /// Initial stream and connection window size in bytes.
    #[serde(default = "default_window_size")]
    pub ws: u32,
}

impl Default for GrpcConfig {
    fn default() -> Self {
        Self {
            ws: DEFAULT_GRPC_WINDOW_SIZE,
        }
    }
}

/// TLS material, all PEM files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub ca: Option<PathBuf>,
    #[serde(default)]
    pub cert: Option<PathBuf>,
    #[serde(default)]
    pub key: Option<PathBuf>,
    #[serde(default, rename = "servername")]
    pub server_name: Option<String>,
}

/// A sensor path to subscribe to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathConfig {
    pub path: String,
    /// Sample frequency in milliseconds; 0 means on-change.
    #[serde(default)]
    pub freq: u32,
    #[serde(default)]
    pub mode: String,
}

/// Exponential backoff used when a device connection drops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Maximum number of redials (None = unlimited).
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl ReconnectConfig {
    pub const fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

const fn default_port() -> u16 {
    DEFAULT_PORT
}

const fn default_window_size() -> u32 {
    DEFAULT_GRPC_WINDOW_SIZE
}

const fn default_initial_delay_ms() -> u64 {
    1_000
}

const fn default_max_delay_ms() -> u64 {
    60_000
}

impl DeviceConfig {
    /// Load and validate a device config file.
    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = read_json(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the fields a session cannot run without.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(Error::Config("port must not be zero".into()));
        }
        if let Some(p) = self.paths.iter().position(|p| p.path.trim().is_empty()) {
            return Err(Error::Config(format!("paths[{p}] has an empty path")));
        }
        Ok(())
    }

    /// `host:port` as used in logs.
    pub fn device(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// A fully populated config, printed by `--explore-config`.
    pub fn example() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: DEFAULT_PORT,
            user: "username".into(),
            password: "password".into(),
            client_id: "telestream".into(),
            vendor: VendorConfig {
                name: "juniper-junos".into(),
            },
            grpc: GrpcConfig::default(),
            tls: Some(TlsConfig {
                ca: Some(PathBuf::from("ca.pem")),
                cert: Some(PathBuf::from("client.pem")),
                key: Some(PathBuf::from("client-key.pem")),
                server_name: Some("router".into()),
            }),
            paths: vec![PathConfig {
                path: "/interfaces".into(),
                freq: 2000,
                mode: String::new(),
            }],
            eos: false,
            reconnect: Some(ReconnectConfig::default()),
        }
    }
}

/// A list of device config files, reloadable at runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFileList {
    #[serde(default)]
    pub config_file_list: Vec<PathBuf>,
}

impl ConfigFileList {
    /// Read a config-file-list, resolving relative entries against its directory.
    pub fn load(path: &Path) -> Result<Self> {
        let mut list: Self = read_json(path)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for entry in &mut list.config_file_list {
            if entry.is_relative() {
                *entry = base.join(&*entry);
            }
        }
        Ok(list)
    }

    /// Entries rendered as unit identifiers.
    pub fn units(&self) -> Vec<String> {
        self.config_file_list
            .iter()
            .map(|p| p.display().to_string())
            .collect()
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| Error::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Merge explicit config files with an optional config-file-list, dropping duplicates.
pub fn collect_units(files: &[PathBuf], list: Option<&Path>) -> Result<Vec<String>> {
    let mut units: Vec<String> = files.iter().map(|p| p.display().to_string()).collect();
    if let Some(list_path) = list {
        for unit in ConfigFileList::load(list_path)?.units() {
            if !units.contains(&unit) {
                units.push(unit);
            }
        }
    }
    if units.is_empty() {
        return Err(Error::Config(
            "no config files given (use --config or --config-file-list)".into(),
        ));
    }
    Ok(units)
}
