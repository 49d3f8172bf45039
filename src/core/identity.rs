//! # Protocol Identity
//!
//! The fingerprint that segregates incompatible networks. Two nodes whose
//! fingerprints differ are never treated as peers.
//!
//! The fingerprint is `base58(SHA-256(subnet ‖ encryption_method ‖ version))`, the
//! digest read as a big-endian integer. Any divergence in hash, encoding or input
//! order breaks interoperability with every other implementation of the protocol.
//!
//! Node ids are derived here too: `base58(SHA-384(repr(addr, port) ‖ fingerprint ‖ salt))`
//! where `repr` renders `('<addr>', <port>)`.

use crate::config::PROTOCOL_VERSION;
use crate::core::base58;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384};
use std::fmt;

/// Random salt drawn once per process so restarted nodes get fresh ids.
static PROCESS_SALT: Lazy<String> = Lazy::new(|| base58::encode(&rand::random::<[u8; 16]>()));

/// Subnet name, encryption method tag and protocol version of a network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProtocolIdentity {
    subnet: String,
    encryption_method: String,
    version: String,
}

impl ProtocolIdentity {
    /// Identity at the current protocol version.
    pub fn new(subnet: impl Into<String>, encryption_method: impl Into<String>) -> Self {
        Self::with_version(subnet, encryption_method, PROTOCOL_VERSION)
    }

    pub fn with_version(
        subnet: impl Into<String>,
        encryption_method: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            subnet: subnet.into(),
            encryption_method: encryption_method.into(),
            version: version.into(),
        }
    }

    pub fn subnet(&self) -> &str {
        &self.subnet
    }

    pub fn encryption_method(&self) -> &str {
        &self.encryption_method
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Deterministic base58 fingerprint of this identity.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.subnet.as_bytes());
        hasher.update(self.encryption_method.as_bytes());
        hasher.update(self.version.as_bytes());
        base58::encode(&hasher.finalize())
    }

    /// Whether a remote fingerprint belongs to the same network.
    pub fn matches(&self, remote_fingerprint: &str) -> bool {
        self.fingerprint() == remote_fingerprint
    }
}

impl fmt::Display for ProtocolIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.subnet, self.encryption_method, self.version
        )
    }
}

/// The salt mixed into node ids when none is configured.
pub fn process_salt() -> &'static str {
    &PROCESS_SALT
}

/// Derive a node id from the advertised address and the protocol fingerprint.
///
/// `salt` overrides the per-process salt for ids that must survive restarts.
pub fn node_identity(
    address: &str,
    port: u16,
    protocol: &ProtocolIdentity,
    salt: Option<&str>,
) -> String {
    let mut hasher = Sha384::new();
    hasher.update(format!("('{address}', {port})").as_bytes());
    hasher.update(protocol.fingerprint().as_bytes());
    hasher.update(salt.unwrap_or(process_salt()).as_bytes());
    base58::encode(&hasher.finalize())
}
