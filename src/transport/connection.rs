//! # Connection
//!
//! One logical link to a peer. A connection owns:
//!
//! - the receive buffer and its [`FrameCodec`] (written only by the reader task)
//! - session state: negotiated compression, the last resendable message, and
//!   what the peer told us in its handshake
//! - the sending half of a bounded outbound queue drained by a writer task
//!
//! Connections are transport-agnostic: [`Connection::new`] hands back the
//! queue's receiving half so tests can inspect outgoing frames without a socket.

use crate::config::{ConnectionConfig, DecodeFailurePolicy};
use crate::core::codec::FrameCodec;
use crate::core::envelope::{CompressionOutcome, Envelope};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::flags::MessageType;
use crate::protocol::handshake::HandshakeInfo;
use crate::protocol::renegotiate::{self, Renegotiation};
use crate::utils::compression;
use crate::utils::metrics::Metrics;
use bytes::{Bytes, BytesMut};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Who opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Outcome of feeding one read into a connection.
#[derive(Debug, Default)]
pub struct Received {
    /// Application envelopes completed by the read, in arrival order
    pub envelopes: Vec<Envelope>,
    /// The error that ended processing; the connection must be closed
    pub error: Option<ProtocolError>,
}

impl Received {
    /// Collapse into a `Result`, dropping any envelopes decoded before an error.
    pub fn into_result(self) -> Result<Vec<Envelope>> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.envelopes),
        }
    }
}

/// Per-connection settings derived from the node configuration.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Our node id, used as `sender_id` on everything we send
    pub local_id: String,
    /// Compression tags this side accepts
    pub local_compression: Vec<u8>,
    pub compression_threshold: usize,
    pub max_frame_size: usize,
    pub outbound_queue_capacity: usize,
    pub decode_failure_policy: DecodeFailurePolicy,
}

impl ConnectionSettings {
    pub fn from_config(config: &ConnectionConfig, local_id: impl Into<String>) -> Self {
        Self {
            local_id: local_id.into(),
            local_compression: config.offered_tags(),
            compression_threshold: config.compression_threshold_bytes,
            max_frame_size: config.max_frame_size,
            outbound_queue_capacity: config.outbound_queue_capacity,
            decode_failure_policy: config.decode_failure_policy,
        }
    }
}

struct InboundState {
    buffer: BytesMut,
    codec: FrameCodec,
}

#[derive(Default)]
struct SessionState {
    negotiated_compression: Vec<u8>,
    last_sent: Option<Envelope>,
    peer_id: Option<String>,
    peer_address: Option<(String, u16)>,
    recovered_faults: Vec<ProtocolError>,
}

pub struct Connection {
    id: ConnectionId,
    direction: Direction,
    remote_addr: Option<SocketAddr>,
    settings: ConnectionSettings,
    inbound: Mutex<InboundState>,
    session: Mutex<SessionState>,
    outbound: mpsc::Sender<Bytes>,
    closed: AtomicBool,
    cancel: CancellationToken,
    metrics: Arc<Metrics>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("remote_addr", &self.remote_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Connection {
    /// Create a connection and the receiving end of its outbound queue.
    ///
    /// Nothing is compressed until the peer's handshake or a renegotiation
    /// says which methods it accepts.
    pub fn new(
        direction: Direction,
        remote_addr: Option<SocketAddr>,
        settings: ConnectionSettings,
        metrics: Arc<Metrics>,
    ) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(settings.outbound_queue_capacity.max(1));
        let codec = FrameCodec::new().with_max_frame_size(settings.max_frame_size);

        let connection = Arc::new(Self {
            id: ConnectionId::next(),
            direction,
            remote_addr,
            settings,
            inbound: Mutex::new(InboundState {
                buffer: BytesMut::new(),
                codec,
            }),
            session: Mutex::new(SessionState::default()),
            outbound: tx,
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            metrics,
        });

        (connection, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Peer node id, known once its handshake has been accepted.
    pub fn peer_id(&self) -> Option<String> {
        self.session().ok().and_then(|s| s.peer_id.clone())
    }

    /// Host and port the peer advertised in its handshake.
    pub fn peer_address(&self) -> Option<(String, u16)> {
        self.session().ok().and_then(|s| s.peer_address.clone())
    }

    pub fn negotiated_compression(&self) -> Vec<u8> {
        self.session()
            .map(|s| s.negotiated_compression.clone())
            .unwrap_or_default()
    }

    pub fn last_sent(&self) -> Option<Envelope> {
        self.session().ok().and_then(|s| s.last_sent.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Token cancelled when the connection closes; the I/O tasks watch it.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Mark the connection closed. Returns `true` only for the call that
    /// actually closed it.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.cancel.cancel();
        debug!(connection = %self.id, "Connection closed");
        true
    }

    fn session(&self) -> Result<MutexGuard<'_, SessionState>> {
        self.session
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.into()))
    }

    /// Send a message from the local node, stamped with the current time.
    pub fn send(&self, msg_type: MessageType, payload: Vec<Bytes>) -> Result<Envelope> {
        let envelope = Envelope::now(msg_type, self.settings.local_id.clone(), payload)?;
        self.send_envelope(envelope)
    }

    /// Send with an explicit sender and timestamp.
    pub fn send_as(
        &self,
        msg_type: MessageType,
        sender_id: impl Into<Bytes>,
        payload: Vec<Bytes>,
        timestamp: u64,
    ) -> Result<Envelope> {
        self.send_envelope(Envelope::new(msg_type, sender_id, payload, timestamp))
    }

    /// Encode with the current negotiated compression and queue for writing.
    ///
    /// # Errors
    /// `ProtocolError::Transport` if the connection is closed or its queue is full.
    #[instrument(skip(self, envelope), fields(connection = %self.id, msg_type = %envelope.msg_type()))]
    fn send_envelope(&self, envelope: Envelope) -> Result<Envelope> {
        if self.is_closed() {
            return Err(ProtocolError::Transport(
                constants::ERR_CONNECTION_CLOSED.into(),
            ));
        }

        let envelope = envelope.with_compression_offer(self.negotiated_compression());
        let frame = envelope.encode_with_threshold(self.settings.compression_threshold)?;
        let frame_len = frame.len();

        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                ProtocolError::Transport(constants::ERR_OUTBOUND_QUEUE_FULL.into())
            }
            mpsc::error::TrySendError::Closed(_) => {
                ProtocolError::Transport(constants::ERR_CONNECTION_CLOSED.into())
            }
        })?;

        if envelope.msg_type().is_resendable() {
            self.session()?.last_sent = Some(envelope.clone());
        }
        self.metrics.frame_sent(frame_len as u64);
        Ok(envelope)
    }

    /// Feed bytes read from the transport.
    ///
    /// Every application envelope completed by this read is returned, including
    /// those decoded before a frame that ended processing. Renegotiation
    /// messages are consumed here.
    ///
    /// Reassembly errors (oversized frames) always end processing. Decode and
    /// integrity errors end it under [`DecodeFailurePolicy::Disconnect`]; under
    /// [`DecodeFailurePolicy::Renegotiate`] the frame is dropped, recovery is
    /// requested from the peer and the error is kept for
    /// [`take_recovered_faults`](Self::take_recovered_faults). Errors that are
    /// not [connection fatal](ProtocolError::is_connection_fatal) are kept the
    /// same way and the remaining frames are still processed.
    pub fn on_bytes_received(&self, data: &[u8]) -> Received {
        let (frames, reassembly_error) = self.extract_frames(data);

        let mut received = Received {
            envelopes: Vec::with_capacity(frames.len()),
            error: None,
        };
        for frame in frames {
            if let Err(e) = self.process_frame(frame, &mut received.envelopes) {
                if e.is_connection_fatal() {
                    received.error = Some(e);
                    return received;
                }
                debug!(connection = %self.id, error = %e, "Skipping frame");
                self.keep_fault(e);
            }
        }

        received.error = reassembly_error;
        received
    }

    fn process_frame(&self, frame: Bytes, envelopes: &mut Vec<Envelope>) -> Result<()> {
        self.metrics.frame_received(frame.len() as u64);

        let offered = self.negotiated_compression();
        let envelope = match Envelope::decode_with_outcome(&frame, false, &offered) {
            Ok((envelope, outcome)) => {
                if let CompressionOutcome::Decompressed(_) = outcome {
                    self.metrics.frame_decompressed();
                }
                envelope
            }
            Err(e) => return self.on_decode_failure(e),
        };

        if envelope.msg_type() == MessageType::Renegotiate {
            self.handle_renegotiation(&envelope)
        } else {
            envelopes.push(envelope);
            Ok(())
        }
    }

    /// Append to the receive buffer and drain every complete frame.
    ///
    /// Frames completed before a reassembly error are still returned.
    fn extract_frames(&self, data: &[u8]) -> (Vec<Bytes>, Option<ProtocolError>) {
        let mut guard = match self.inbound.lock() {
            Ok(guard) => guard,
            Err(_) => {
                return (
                    Vec::new(),
                    Some(ProtocolError::Transport(constants::ERR_LOCK_POISONED.into())),
                )
            }
        };
        let state = &mut *guard;

        state.buffer.extend_from_slice(data);
        let mut frames = Vec::new();
        loop {
            match state.codec.decode(&mut state.buffer) {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => return (frames, None),
                Err(e) => return (frames, Some(e)),
            }
        }
    }

    fn keep_fault(&self, error: ProtocolError) {
        if let Ok(mut session) = self.session() {
            session.recovered_faults.push(error);
        }
    }

    fn on_decode_failure(&self, error: ProtocolError) -> Result<()> {
        match self.settings.decode_failure_policy {
            DecodeFailurePolicy::Disconnect => Err(error),
            DecodeFailurePolicy::Renegotiate => {
                warn!(
                    connection = %self.id,
                    error = %error,
                    expected = ?self.negotiated_compression(),
                    "Failed to decode frame, renegotiating"
                );
                self.keep_fault(error);
                self.renegotiate_compression(&[])?;
                self.request_resend()
            }
        }
    }

    /// Errors survived without closing since the last call: decode failures
    /// under the renegotiate policy and frames skipped as non-fatal.
    pub fn take_recovered_faults(&self) -> Vec<ProtocolError> {
        self.session()
            .map(|mut s| std::mem::take(&mut s.recovered_faults))
            .unwrap_or_default()
    }

    #[instrument(skip(self, envelope), fields(connection = %self.id))]
    fn handle_renegotiation(&self, envelope: &Envelope) -> Result<()> {
        match renegotiate::parse(envelope)? {
            Some(Renegotiation::Compression(offered)) => {
                self.metrics.renegotiation();
                let changed = {
                    let mut session = self.session()?;
                    let changed = session.negotiated_compression != offered;
                    session.negotiated_compression = offered.clone();
                    changed
                };
                debug!(?offered, changed, "Compression methods changed");

                if changed {
                    let reply = compression::intersect_supported(&offered);
                    self.renegotiate_compression(&reply)?;
                }
                Ok(())
            }
            Some(Renegotiation::Resend) => self.resend_last(),
            None => {
                debug!("Ignoring unknown renegotiation sub-type");
                Ok(())
            }
        }
    }

    /// Retransmit the last broadcast/whisper with a fresh timestamp.
    fn resend_last(&self) -> Result<()> {
        match self.last_sent() {
            Some(previous) => {
                self.send(previous.msg_type(), previous.payload().to_vec())?;
                self.metrics.resend();
                Ok(())
            }
            None => {
                debug!(connection = %self.id, "{}", constants::ERR_NOTHING_TO_RESEND);
                Ok(())
            }
        }
    }

    /// Tell the peer which compression methods we now accept.
    pub fn renegotiate_compression(&self, tags: &[u8]) -> Result<Envelope> {
        self.send(MessageType::Renegotiate, renegotiate::compression_payload(tags)?)
    }

    /// Ask the peer to retransmit its last message.
    pub fn request_resend(&self) -> Result<()> {
        self.send(MessageType::Renegotiate, renegotiate::resend_payload())
            .map(|_| ())
    }

    /// Record what the peer announced. The negotiated list becomes the
    /// methods both sides accept, in the peer's order.
    ///
    /// Repeating the handshake under the same node id is accepted.
    ///
    /// # Errors
    /// `ProtocolError::Handshake` if the connection already belongs to a
    /// different node id.
    pub fn record_handshake(&self, info: &HandshakeInfo) -> Result<()> {
        let mut session = self.session()?;
        if let Some(known) = session.peer_id.as_deref() {
            if known != info.node_id {
                return Err(ProtocolError::Handshake(
                    constants::ERR_HANDSHAKE_REPEATED.into(),
                ));
            }
        }
        session.peer_id = Some(info.node_id.clone());
        session.peer_address = Some((info.host.clone(), info.port));
        session.negotiated_compression = info
            .compression
            .iter()
            .copied()
            .filter(|tag| self.settings.local_compression.contains(tag))
            .collect();
        Ok(())
    }

    /// Whether the codec is waiting on the body of a partially received frame.
    pub fn mid_frame(&self) -> bool {
        self.inbound
            .lock()
            .map(|state| state.codec.frame_header_seen() || !state.buffer.is_empty())
            .unwrap_or(false)
    }
}
