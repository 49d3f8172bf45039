//! # Peer Protocol
//!
//! Wire protocol core for a peer-to-peer mesh: length-prefixed frames of
//! length-prefixed sub-packets, a SHA-384 content id on every message,
//! negotiated whole-body compression, and a node that routes handshaken
//! peers and dispatches their messages through an ordered handler chain.
//!
//! ## Layers
//! - [`core`]: base58, protocol fingerprint, envelope encode/decode, frame reassembly
//! - [`protocol`]: flag tables, handshake, renegotiation, handler dispatch
//! - [`transport`]: per-peer connection state and outbound queue
//! - [`service`]: the [`Node`](service::Node)
//! - [`utils`]: compression registry, logging, metrics, time
//!
//! ## Example
//! ```no_run
//! use peer_protocol::config::NodeConfig;
//! use peer_protocol::core::envelope::Envelope;
//! use peer_protocol::protocol::flags::MessageType;
//! use peer_protocol::service::Node;
//! use peer_protocol::transport::Connection;
//! use std::sync::Arc;
//!
//! fn on_broadcast(_node: &Node, _conn: &Arc<Connection>, envelope: &Envelope) -> peer_protocol::Result<bool> {
//!     Ok(envelope.msg_type() == MessageType::Broadcast)
//! }
//!
//! # async fn run() -> peer_protocol::Result<()> {
//! let node = Node::new(NodeConfig::default())?;
//! node.register_handler(on_broadcast)?;
//!
//! let listener = node.bind().await?;
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel(1);
//! node.serve(listener, shutdown_rx).await?;
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use crate::config::NodeConfig;
pub use crate::core::envelope::Envelope;
pub use crate::error::{ProtocolError, Result};
pub use crate::protocol::flags::MessageType;
pub use crate::service::Node;
