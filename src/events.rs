//! Structured protocol events and the sinks that consume them.
//!
//! The server and client never log through a hidden global; each is handed
//! a `Box<dyn EventSink + Send>` and reports what happens to it.  The
//! default [`LogSink`] renders events through the `log` facade, so a binary
//! that initialises `env_logger` gets readable output, while tests attach a
//! [`Recorder`] and assert on the sequence of events.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use crate::packet::Kind;
use crate::state::ClientPhase;

/// Why a connection was torn down without a FIN handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbandonReason {
    /// The retry budget ran out while waiting for an acknowledgment.
    RetriesExhausted,
    /// The peer went silent for longer than the connection timeout.
    PeerTimedOut,
    /// An APP message arrived with the wrong sequence number.
    OutOfOrder { got: u8, expected: u8 },
}

impl std::fmt::Display for AbandonReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbandonReason::RetriesExhausted => f.write_str("maximum retries exceeded"),
            AbandonReason::PeerTimedOut => f.write_str("connection timeout expired"),
            AbandonReason::OutOfOrder { got, expected } => {
                write!(f, "bad sequence number {got}, expected {expected}")
            }
        }
    }
}

/// Something worth reporting that happened on an RDP endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Listening { local: SocketAddr },
    /// A SYN created a connection (`reset` when it replaced a live one).
    Accepted { peer: SocketAddr, reset: bool },
    /// A client sent its SYN.
    Connecting { server: SocketAddr, isn: u8 },
    Connected { peer: SocketAddr, local_seq: u8, peer_seq: u8 },
    /// Our SYN was acknowledged by something other than a SYN.
    HandshakeAckNotSyn { kind: Kind },
    Abandoned { peer: SocketAddr, reason: AbandonReason },
    Retransmit { seq: u8, attempt: u32 },
    /// A datagram from someone other than the connected peer.
    DroppedForeign { from: SocketAddr },
    /// A message that no handler wants in the current state.
    Dropped { from: SocketAddr, kind: Kind },
    Malformed { reason: String },
    RequestReceived { peer: SocketAddr, resource: String },
    ResourceMissing { resource: String },
    ResponseSent { resource: String, chunks: usize, bytes: usize },
    RequestSent { resource: String },
    PhaseChanged { from: ClientPhase, to: ClientPhase },
    ChunkReceived { seq: u8, len: usize },
    /// The server's FIN ended the response stream.
    StreamComplete { chunks: usize, bytes: usize },
    DuplicateReacked { seq: u8 },
    /// Our FIN was not acknowledged, or was acknowledged by a non-FIN.
    FinUnacknowledged,
    FinAckNotFin { kind: Kind },
    KeepAliveReack { seq: u8 },
    Closed { peer: SocketAddr },
}

/// Destination for [`Event`]s.
pub trait EventSink {
    fn record(&mut self, event: Event);
}

/// Renders every event through the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn record(&mut self, event: Event) {
        match event {
            Event::Listening { local } => log::info!("[rdp] serving on {local}"),
            Event::Accepted { peer, reset: false } => {
                log::info!("[rdp] ← SYN from {peer}; connection request")
            }
            Event::Accepted { peer, reset: true } => {
                log::warn!("[rdp] ← SYN from already connected {peer}; resetting")
            }
            Event::Connecting { server, isn } => {
                log::info!("[rdp] connecting to {server} (isn={isn})")
            }
            Event::HandshakeAckNotSyn { kind } => {
                log::warn!("[rdp] SYN acknowledged by {kind}, not by a SYN")
            }
            Event::Connected {
                peer,
                local_seq,
                peer_seq,
            } => log::info!("[rdp] connected to {peer} (local isn={local_seq}, peer isn={peer_seq})"),
            Event::Abandoned { peer, reason } => {
                log::warn!("[rdp] connectivity to {peer} lost ({reason}); abandoning connection")
            }
            Event::Retransmit { seq, attempt } => {
                log::debug!("[rdp] timeout; retransmitting seq={seq} (attempt {attempt})")
            }
            Event::DroppedForeign { from } => {
                log::info!("[rdp] existing connection; dropping packet from {from}")
            }
            Event::Dropped { from, kind } => {
                log::debug!("[rdp] no handler for {kind} from {from}; dropping")
            }
            Event::Malformed { reason } => log::warn!("[rdp] discarding malformed datagram: {reason}"),
            Event::RequestReceived { peer, resource } => {
                log::info!("[rdp] request from {peer} for '{resource}'")
            }
            Event::ResourceMissing { resource } => log::info!("[rdp] no such resource '{resource}'"),
            Event::ResponseSent {
                resource,
                chunks,
                bytes,
            } => log::info!("[rdp] sent '{resource}' ({bytes} bytes in {chunks} chunks)"),
            Event::RequestSent { resource } => log::info!("[rdp] requesting '{resource}'"),
            Event::PhaseChanged { from, to } => log::debug!("[rdp] {from} → {to}"),
            Event::StreamComplete { chunks, bytes } => {
                log::debug!("[rdp] ← FIN after {chunks} chunks ({bytes} bytes)")
            }
            Event::ChunkReceived { seq, len } => log::debug!("[rdp] ← APP seq={seq} len={len}"),
            Event::DuplicateReacked { seq } => log::debug!("[rdp] duplicate seq={seq}; re-ACKing"),
            Event::FinUnacknowledged => log::info!("[rdp] no ACK received in response to FIN"),
            Event::FinAckNotFin { kind } => {
                log::warn!("[rdp] FIN acknowledged by {kind}, not by a FIN")
            }
            Event::KeepAliveReack { seq } => {
                log::debug!("[rdp] duplicate FIN seq={seq} during keep-alive; re-sending FIN-ACK")
            }
            Event::Closed { peer } => log::info!("[rdp] connection to {peer} closed"),
        }
    }
}

/// Collects events in memory; clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far.
    pub fn events(&self) -> Vec<Event> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Number of recorded events matching `pred`.
    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for Recorder {
    fn record(&mut self, event: Event) {
        log::trace!("[recorder] {event:?}");
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
