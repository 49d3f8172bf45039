//! # Service Layer
//!
//! The peer node: identity, routing table, handshake promotion, handler
//! dispatch and the fault log.

pub mod node;

pub use node::{FaultRecord, Node, Status};
