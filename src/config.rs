//! # Configuration Management
//!
//! Centralized configuration for a peer node.
//!
//! ## Sections
//! - `node`: where the node listens, what it advertises, and which protocol it speaks
//! - `connection`: per-connection limits, compression offer and recovery policy
//! - `logging`: subscriber setup consumed by [`crate::utils::logging::init_logging`]
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - `PEER_PROTOCOL_*` environment variables via `from_env()`
//! - Direct instantiation with defaults
//!
//! Two nodes only talk to each other when `subnet`, `encryption_method` and
//! `protocol_version` all agree; see [`crate::core::identity::ProtocolIdentity`].

use crate::core::identity::ProtocolIdentity;
use crate::error::{ProtocolError, Result};
use crate::utils::compression::{CompressionKind, SUPPORTED};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::net::IpAddr;
use std::path::Path;
use tracing::Level;

/// Protocol version folded into every fingerprint
pub const PROTOCOL_VERSION: &str = "0.7";

/// Default ceiling for a frame body (16 MiB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Default listening port
pub const DEFAULT_PORT: u16 = 44565;

/// Default subnet name
pub const DEFAULT_SUBNET: &str = "mesh";

/// Default encryption label; only plaintext transport is implemented
pub const DEFAULT_ENCRYPTION: &str = "Plaintext";

/// Main configuration structure for a node
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NodeConfig {
    /// Identity and listening configuration
    #[serde(default)]
    pub node: NodeSection,

    /// Per-connection behaviour
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NodeConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    ///
    /// Unset variables keep their defaults; set but unparsable numeric values
    /// are a `ConfigError`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("PEER_PROTOCOL_BIND_ADDRESS") {
            config.node.bind_address = addr;
        }

        if let Ok(port) = std::env::var("PEER_PROTOCOL_BIND_PORT") {
            config.node.bind_port = parse_env("PEER_PROTOCOL_BIND_PORT", &port)?;
        }

        if let Ok(addr) = std::env::var("PEER_PROTOCOL_ADVERTISED_ADDRESS") {
            config.node.advertised_address = Some(addr);
        }

        if let Ok(subnet) = std::env::var("PEER_PROTOCOL_SUBNET") {
            config.node.subnet = subnet;
        }

        if let Ok(method) = std::env::var("PEER_PROTOCOL_ENCRYPTION") {
            config.node.encryption_method = method;
        }

        if let Ok(salt) = std::env::var("PEER_PROTOCOL_IDENTITY_SALT") {
            config.node.identity_salt = Some(salt);
        }

        if let Ok(size) = std::env::var("PEER_PROTOCOL_MAX_FRAME_SIZE") {
            config.connection.max_frame_size = parse_env("PEER_PROTOCOL_MAX_FRAME_SIZE", &size)?;
        }

        if let Ok(capacity) = std::env::var("PEER_PROTOCOL_OUTBOUND_QUEUE") {
            config.connection.outbound_queue_capacity =
                parse_env("PEER_PROTOCOL_OUTBOUND_QUEUE", &capacity)?;
        }

        if let Ok(threshold) = std::env::var("PEER_PROTOCOL_COMPRESSION_THRESHOLD") {
            config.connection.compression_threshold_bytes =
                parse_env("PEER_PROTOCOL_COMPRESSION_THRESHOLD", &threshold)?;
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Protocol identity described by the `node` section
    pub fn protocol_identity(&self) -> ProtocolIdentity {
        ProtocolIdentity::with_version(
            self.node.subnet.as_str(),
            self.node.encryption_method.as_str(),
            self.node.protocol_version.as_str(),
        )
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.node.validate());
        errors.extend(self.connection.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| ProtocolError::ConfigError(format!("Invalid value for {name}: '{value}'")))
}

/// Identity and listening configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeSection {
    /// Address to listen on
    pub bind_address: String,

    /// Port to listen on
    pub bind_port: u16,

    /// Host advertised to peers in the handshake; defaults to `bind_address`
    #[serde(default)]
    pub advertised_address: Option<String>,

    /// Subnet name; nodes on different subnets refuse each other
    pub subnet: String,

    /// Encryption label folded into the fingerprint
    pub encryption_method: String,

    /// Protocol version folded into the fingerprint
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,

    /// Fixed salt for a restart-stable node id; random per process when unset
    #[serde(default)]
    pub identity_salt: Option<String>,
}

fn default_protocol_version() -> String {
    PROTOCOL_VERSION.to_string()
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            bind_address: String::from("0.0.0.0"),
            bind_port: DEFAULT_PORT,
            advertised_address: None,
            subnet: String::from(DEFAULT_SUBNET),
            encryption_method: String::from(DEFAULT_ENCRYPTION),
            protocol_version: default_protocol_version(),
            identity_salt: None,
        }
    }
}

impl NodeSection {
    /// Host peers should use to reach this node
    pub fn advertised_host(&self) -> &str {
        self.advertised_address
            .as_deref()
            .unwrap_or(&self.bind_address)
    }

    /// `address:port` string suitable for binding a listener
    pub fn bind_target(&self) -> String {
        format!("{}:{}", self.bind_address, self.bind_port)
    }

    /// Validate node configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.bind_address.is_empty() {
            errors.push("Bind address cannot be empty".to_string());
        } else if self.bind_address.parse::<IpAddr>().is_err() {
            errors.push(format!(
                "Invalid bind address: '{}' (expected an IP address such as '0.0.0.0')",
                self.bind_address
            ));
        }

        if let Some(ref advertised) = self.advertised_address {
            if advertised.is_empty() {
                errors.push("Advertised address cannot be empty when set".to_string());
            }
        }

        if self.subnet.is_empty() {
            errors.push("Subnet cannot be empty".to_string());
        }

        if self.encryption_method.is_empty() {
            errors.push("Encryption method cannot be empty".to_string());
        }

        if self.protocol_version.is_empty() {
            errors.push("Protocol version cannot be empty".to_string());
        }

        if let Some(ref salt) = self.identity_salt {
            if salt.is_empty() {
                errors.push("Identity salt cannot be empty when set".to_string());
            }
        }

        errors
    }
}

/// What a connection does when an inbound frame fails to decode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DecodeFailurePolicy {
    /// Log the fault and close the connection
    #[default]
    Disconnect,
    /// Log the fault, renegotiate to no compression and ask for a resend
    Renegotiate,
}

/// Per-connection configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionConfig {
    /// Largest accepted frame body in bytes
    pub max_frame_size: usize,

    /// Compression methods offered to peers, in preference order
    pub compression: Vec<CompressionKind>,

    /// Bodies smaller than this are sent uncompressed
    #[serde(default)]
    pub compression_threshold_bytes: usize,

    /// Frames that may wait in a connection's outbound queue
    pub outbound_queue_capacity: usize,

    /// Recovery behaviour on decode failures
    #[serde(default)]
    pub decode_failure_policy: DecodeFailurePolicy,

    /// Answer `ping` with `pong` automatically
    #[serde(default = "default_auto_pong")]
    pub auto_pong: bool,
}

fn default_auto_pong() -> bool {
    true
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
            compression: SUPPORTED.to_vec(),
            compression_threshold_bytes: 0,
            outbound_queue_capacity: 256,
            decode_failure_policy: DecodeFailurePolicy::Disconnect,
            auto_pong: true,
        }
    }
}

impl ConnectionConfig {
    /// Wire tags of the offered compression methods, in configured order
    pub fn offered_tags(&self) -> Vec<u8> {
        self.compression.iter().map(|kind| kind.tag()).collect()
    }

    /// Validate connection configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_frame_size == 0 {
            errors.push("Max frame size cannot be 0".to_string());
        } else if self.max_frame_size < 1024 {
            errors.push("Max frame size too small (minimum: 1 KB)".to_string());
        } else if self.max_frame_size > u32::MAX as usize {
            errors.push(format!(
                "Max frame size too large: {} bytes (maximum: {})",
                self.max_frame_size,
                u32::MAX
            ));
        }

        for (index, kind) in self.compression.iter().enumerate() {
            if self.compression[..index].contains(kind) {
                errors.push(format!("Compression method listed twice: {}", kind.name()));
            }
        }

        if self.compression_threshold_bytes > self.max_frame_size {
            errors.push("Compression threshold cannot be larger than max frame size".to_string());
        }

        if self.outbound_queue_capacity == 0 {
            errors.push("Outbound queue capacity must be greater than 0".to_string());
        } else if self.outbound_queue_capacity > 1_000_000 {
            errors.push(format!(
                "Outbound queue capacity too large: {} (max recommended: 1,000,000)",
                self.outbound_queue_capacity
            ));
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("peer-protocol"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
