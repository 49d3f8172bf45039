//! # Node
//!
//! A peer node: its identity, the connections it holds, the handler chain
//! application messages go through, and a log of faults.
//!
//! Every attached connection starts in the pending set. Both ends send a
//! handshake straight away; an accepted handshake moves the connection into
//! the routing table under the peer's node id. Closing removes a connection
//! from whichever set holds it.
//!
//! Each connection runs two tasks: a reader that owns reassembly and dispatch,
//! and a writer draining the connection's outbound queue through a
//! `FramedWrite<_, FrameCodec>`.

use crate::config::NodeConfig;
use crate::core::codec::FrameCodec;
use crate::core::envelope::Envelope;
use crate::core::identity::{node_identity, ProtocolIdentity};
use crate::error::{FaultKind, ProtocolError, Result};
use crate::protocol::dispatcher::{Dispatcher, Handler};
use crate::protocol::flags::MessageType;
use crate::protocol::handshake;
use crate::transport::connection::{Connection, ConnectionId, ConnectionSettings, Direction};
use crate::utils::metrics::Metrics;
use crate::utils::time;
use bytes::{Bytes, BytesMut};
use futures::SinkExt;
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Initial receive buffer size per connection
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// One entry in a node's fault log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FaultRecord {
    pub kind: FaultKind,
    pub message: String,
    /// Connection the fault occurred on, if any
    pub connection: Option<u64>,
    /// Peer id of that connection, if its handshake had completed
    pub peer: Option<String>,
    /// Unix time in seconds
    pub at: u64,
}

/// Health of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Nominal,
    Faults(Vec<FaultRecord>),
}

impl Status {
    pub fn is_nominal(&self) -> bool {
        matches!(self, Status::Nominal)
    }
}

pub struct Node {
    identity: String,
    protocol: ProtocolIdentity,
    config: NodeConfig,
    routing_table: RwLock<HashMap<String, Arc<Connection>>>,
    pending: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    dispatcher: Dispatcher,
    faults: Mutex<Vec<FaultRecord>>,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("identity", &self.identity)
            .field("protocol", &self.protocol)
            .field("peers", &self.peers().len())
            .field("pending", &self.pending_count())
            .finish()
    }
}

fn auto_pong(_node: &Node, connection: &Arc<Connection>, envelope: &Envelope) -> Result<bool> {
    if envelope.msg_type() != MessageType::Ping {
        return Ok(false);
    }
    connection.send(MessageType::Pong, envelope.payload().to_vec())?;
    Ok(true)
}

impl Node {
    /// Build a node from a validated configuration.
    ///
    /// # Errors
    /// `ProtocolError::ConfigError` if the configuration fails validation.
    pub fn new(config: NodeConfig) -> Result<Arc<Self>> {
        config.validate_strict()?;

        let protocol = config.protocol_identity();
        let identity = node_identity(
            config.node.advertised_host(),
            config.node.bind_port,
            &protocol,
            config.node.identity_salt.as_deref(),
        );

        let dispatcher = Dispatcher::new();
        if config.connection.auto_pong {
            dispatcher.register(auto_pong)?;
        }

        info!(node = %identity, protocol = %protocol, "Node created");

        Ok(Arc::new(Self {
            identity,
            protocol,
            config,
            routing_table: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
            dispatcher,
            faults: Mutex::new(Vec::new()),
            metrics: Arc::new(Metrics::new()),
            shutdown: CancellationToken::new(),
        }))
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn protocol(&self) -> &ProtocolIdentity {
        &self.protocol
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Append a handler to the chain.
    pub fn register_handler<H: Handler>(&self, handler: H) -> Result<()> {
        self.dispatcher.register(handler)
    }

    /// Run the handler chain for one envelope. Handler errors are logged as
    /// faults and the chain moves on.
    ///
    /// Returns whether any handler reported the envelope handled.
    pub fn dispatch(&self, connection: &Arc<Connection>, envelope: &Envelope) -> Result<bool> {
        let outcome = self.dispatcher.dispatch(self, connection, envelope)?;
        for (index, failure) in outcome.failures {
            warn!(handler = index, error = %failure, "Handler failed");
            self.push_fault(FaultKind::Handler, failure.to_string(), Some(connection));
        }
        Ok(outcome.handled)
    }

    fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings::from_config(&self.config.connection, self.identity.clone())
    }

    /// Take ownership of a byte stream and start speaking the protocol on it.
    ///
    /// The connection is placed in the pending set and our handshake is queued
    /// immediately. Must be called from inside a tokio runtime.
    #[instrument(skip(self, stream), fields(node = %self.identity))]
    pub fn attach<S>(
        self: &Arc<Self>,
        stream: S,
        direction: Direction,
        peer_addr: Option<SocketAddr>,
    ) -> Result<Arc<Connection>>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (connection, outbound_rx) = Connection::new(
            direction,
            peer_addr,
            self.connection_settings(),
            Arc::clone(&self.metrics),
        );

        write_lock(&self.pending).insert(connection.id(), Arc::clone(&connection));
        self.metrics.connection_established();
        info!(connection = %connection.id(), ?direction, ?peer_addr, "Connection attached");

        let (read_half, write_half) = tokio::io::split(stream);
        let sink = FramedWrite::new(
            write_half,
            FrameCodec::new().with_max_frame_size(self.config.connection.max_frame_size),
        );

        let node = Arc::clone(self);
        let conn = Arc::clone(&connection);
        tokio::spawn(async move {
            if let Err(e) = write_loop(sink, outbound_rx, conn.cancellation_token()).await {
                debug!(connection = %conn.id(), error = %e, "Writer stopped");
                node.record_fault(&e, Some(&conn));
            }
            node.close_connection(&conn);
        });

        let node = Arc::clone(self);
        let conn = Arc::clone(&connection);
        tokio::spawn(async move {
            node.read_loop(&conn, read_half).await;
            node.close_connection(&conn);
        });

        let payload = handshake::build_payload(
            &self.identity,
            &self.protocol,
            self.config.node.advertised_host(),
            self.config.node.bind_port,
            &self.config.connection.offered_tags(),
        )?;
        if let Err(e) = connection.send(MessageType::Whisper, payload) {
            self.close_connection(&connection);
            return Err(e);
        }

        Ok(connection)
    }

    /// Open an outbound TCP connection and attach it.
    #[instrument(skip(self), fields(node = %self.identity))]
    pub async fn connect(self: &Arc<Self>, addr: &str) -> Result<Arc<Connection>> {
        let stream = TcpStream::connect(addr).await?;
        let peer_addr = stream.peer_addr().ok();
        stream.set_nodelay(true)?;
        self.attach(stream, Direction::Outbound, peer_addr)
    }

    /// Bind a listener on the configured address and port.
    pub async fn bind(&self) -> Result<TcpListener> {
        Ok(TcpListener::bind(self.config.node.bind_target()).await?)
    }

    /// Accept peers until `shutdown_rx` fires (or its sender is dropped) or
    /// the node shuts down.
    #[instrument(skip(self, listener, shutdown_rx), fields(node = %self.identity))]
    pub async fn serve(
        self: &Arc<Self>,
        listener: TcpListener,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) -> Result<()> {
        info!(address = ?listener.local_addr().ok(), "Listening for peers");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, no longer accepting peers");
                    break;
                }
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            if let Err(e) = stream.set_nodelay(true) {
                                debug!(error = %e, "Failed to set TCP_NODELAY");
                            }
                            if let Err(e) = self.attach(stream, Direction::Inbound, Some(addr)) {
                                warn!(error = %e, %addr, "Failed to attach inbound connection");
                                self.record_fault(&e, None);
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "Error accepting connection");
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn read_loop<R>(&self, connection: &Arc<Connection>, mut reader: R)
    where
        R: AsyncRead + Unpin,
    {
        let token = connection.cancellation_token();
        let mut buffer = BytesMut::with_capacity(READ_BUFFER_SIZE);

        loop {
            buffer.clear();
            let read = tokio::select! {
                _ = token.cancelled() => break,
                read = reader.read_buf(&mut buffer) => read,
            };

            match read {
                Ok(0) => {
                    if connection.mid_frame() {
                        warn!(connection = %connection.id(), "Peer closed the stream mid-frame");
                        self.record_fault(&ProtocolError::ConnectionClosed, Some(connection));
                    } else {
                        debug!(connection = %connection.id(), "Peer closed the stream");
                    }
                    break;
                }
                Ok(_) => {
                    let received = connection.on_bytes_received(&buffer);
                    for fault in connection.take_recovered_faults() {
                        self.record_fault(&fault, Some(connection));
                    }
                    for envelope in received.envelopes {
                        self.handle_envelope(connection, envelope);
                    }
                    if let Some(e) = received.error {
                        warn!(connection = %connection.id(), error = %e, "Dropping connection");
                        self.record_fault(&e, Some(connection));
                        break;
                    }
                }
                Err(e) => {
                    self.record_fault(&ProtocolError::Io(e), Some(connection));
                    break;
                }
            }

            if connection.is_closed() {
                break;
            }
        }
    }

    fn handle_envelope(&self, connection: &Arc<Connection>, envelope: Envelope) {
        if handshake::is_handshake(&envelope) {
            if let Err(e) = self.complete_handshake(connection, &envelope) {
                self.metrics.handshake_failed();
                match e {
                    ProtocolError::ProtocolMismatch { .. } => {
                        debug!(connection = %connection.id(), "Peer speaks another protocol")
                    }
                    _ => warn!(connection = %connection.id(), error = %e, "Handshake rejected"),
                }
                self.record_fault(&e, Some(connection));
                self.close_connection(connection);
            }
            return;
        }

        // nothing reaches handlers before the peer's fingerprint is verified
        if connection.peer_id().is_none() {
            self.metrics.unhandled_message();
            debug!(
                connection = %connection.id(),
                msg_type = %envelope.msg_type(),
                "Dropping message received before handshake"
            );
            return;
        }

        match self.dispatch(connection, &envelope) {
            Ok(true) => {}
            Ok(false) => {
                self.metrics.unhandled_message();
                debug!(
                    connection = %connection.id(),
                    msg_type = %envelope.msg_type(),
                    id = %envelope.id(),
                    "No handler claimed message"
                );
            }
            Err(e) => self.record_fault(&e, Some(connection)),
        }
    }

    /// Accept a peer's handshake and route the connection under its id.
    ///
    /// A different connection already routed under the same id is replaced
    /// and closed. A repeated handshake with the same id is accepted.
    ///
    /// # Errors
    /// `ProtocolError::ProtocolMismatch` or `ProtocolError::Handshake` (also
    /// when the connection already belongs to another node id), and
    /// `ProtocolError::ConnectionClosed` if the connection closed meanwhile.
    /// The caller is expected to close the connection.
    pub fn complete_handshake(
        &self,
        connection: &Arc<Connection>,
        envelope: &Envelope,
    ) -> Result<()> {
        let info = handshake::verify(envelope, &self.protocol, &self.identity)?;
        connection.record_handshake(&info)?;

        write_lock(&self.pending).remove(&connection.id());
        let replaced = {
            let mut table = write_lock(&self.routing_table);
            // close() flips the flag before close_connection takes this lock
            if connection.is_closed() {
                return Err(ProtocolError::ConnectionClosed);
            }
            table.insert(info.node_id.clone(), Arc::clone(connection))
        };
        if let Some(stale) = replaced.filter(|old| old.id() != connection.id()) {
            info!(peer = %info.node_id, stale = %stale.id(), "Replacing stale connection");
            self.close_connection(&stale);
        }

        self.metrics.handshake_success();
        info!(peer = %info.node_id, connection = %connection.id(), "Peer routed");
        Ok(())
    }

    /// Close a connection and remove it from the node's tables. Idempotent.
    pub fn close_connection(&self, connection: &Arc<Connection>) {
        let newly_closed = connection.close();

        write_lock(&self.pending).remove(&connection.id());
        if let Some(peer) = connection.peer_id() {
            let mut table = write_lock(&self.routing_table);
            if table.get(&peer).map(|c| c.id()) == Some(connection.id()) {
                table.remove(&peer);
            }
        }

        if newly_closed {
            self.metrics.connection_closed();
            debug!(connection = %connection.id(), "Connection removed");
        }
    }

    pub fn record_fault(&self, error: &ProtocolError, connection: Option<&Arc<Connection>>) {
        self.push_fault(error.kind(), error.to_string(), connection);
    }

    fn push_fault(&self, kind: FaultKind, message: String, connection: Option<&Arc<Connection>>) {
        self.metrics.fault();
        let record = FaultRecord {
            kind,
            message,
            connection: connection.map(|c| c.id().as_u64()),
            peer: connection.and_then(|c| c.peer_id()),
            at: time::unix_timestamp().unwrap_or_default(),
        };
        lock(&self.faults).push(record);
    }

    /// The fault log, or `Nominal` when nothing has gone wrong.
    pub fn status(&self) -> Status {
        let faults = lock(&self.faults);
        if faults.is_empty() {
            Status::Nominal
        } else {
            Status::Faults(faults.clone())
        }
    }

    /// Send to one routed peer.
    ///
    /// # Errors
    /// `ProtocolError::Transport` if the peer is not routed or its connection
    /// cannot accept the frame.
    pub fn send_to(
        &self,
        peer_id: &str,
        msg_type: MessageType,
        payload: Vec<Bytes>,
    ) -> Result<Envelope> {
        let connection = self
            .connection(peer_id)
            .ok_or_else(|| ProtocolError::Transport(format!("Unknown peer: {peer_id}")))?;
        connection.send(msg_type, payload)
    }

    /// Send the same message to every routed peer. Returns how many accepted it.
    pub fn send_all(&self, msg_type: MessageType, payload: Vec<Bytes>) -> usize {
        let connections: Vec<Arc<Connection>> =
            read_lock(&self.routing_table).values().cloned().collect();

        connections
            .iter()
            .filter(|connection| match connection.send(msg_type, payload.clone()) {
                Ok(_) => true,
                Err(e) => {
                    warn!(connection = %connection.id(), error = %e, "Send to peer failed");
                    false
                }
            })
            .count()
    }

    /// Ids of all routed peers.
    pub fn peers(&self) -> Vec<String> {
        read_lock(&self.routing_table).keys().cloned().collect()
    }

    pub fn connection(&self, peer_id: &str) -> Option<Arc<Connection>> {
        read_lock(&self.routing_table).get(peer_id).cloned()
    }

    /// Connections still waiting for a handshake.
    pub fn pending_count(&self) -> usize {
        read_lock(&self.pending).len()
    }

    /// Close every connection and stop `serve`.
    pub fn shutdown(&self) {
        self.shutdown.cancel();

        let mut connections: Vec<Arc<Connection>> =
            read_lock(&self.pending).values().cloned().collect();
        connections.extend(read_lock(&self.routing_table).values().cloned());

        for connection in &connections {
            self.close_connection(connection);
        }
        info!(closed = connections.len(), "Node shut down");
        self.metrics.log_metrics();
    }
}

async fn write_loop<W>(
    mut sink: FramedWrite<W, FrameCodec>,
    mut outbound_rx: mpsc::Receiver<Bytes>,
    token: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            frame = outbound_rx.recv() => match frame {
                Some(frame) => sink.send(frame).await?,
                None => break,
            }
        }
    }

    sink.get_mut().shutdown().await.ok();
    Ok(())
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
