//! RDP server: one connection at a time, one request per connection.
//!
//! ```text
//!  client                                   server
//!    │ ── SYN seq=c ─────────────────────────▶ │  Idle → Connected
//!    │ ◀──────────────── SYN seq=s ack=c ───── │  (reliable)
//!    │ ── ACK ack=s ─────────────────────────▶ │
//!    │ ── APP seq=c+1 "name" ────────────────▶ │  request
//!    │ ◀────────── APP seq=s+1 ack=c+1 chunk ─ │  each chunk reliable,
//!    │ ── ACK ack=s+1 ───────────────────────▶ │  strictly in order
//!    │              …                          │
//!    │ ◀─────────────── FIN seq=s+n ───────── │  best effort
//!    │ ── FIN ack=s+n ───────────────────────▶ │  Connected → Idle
//! ```
//!
//! Every fault on a live connection (retry budget spent, a gap in the
//! peer's sequence numbers, the peer going quiet for `connection_timeout`)
//! abandons it: the [`Connection`] is dropped and the server is `Idle`
//! again.  Only socket I/O errors end [`Server::serve`].

use std::net::SocketAddr;

use rand::Rng;
use thiserror::Error;

use crate::connection::Connection;
use crate::events::{AbandonReason, Event, EventSink};
use crate::packet::{Kind, Message};
use crate::resource::{chunks, not_found_payload, ResourceStore};
use crate::sender::send_until_ack;
use crate::socket::{Recv, Socket, SocketError, Transport};
use crate::state::ServerState;
use crate::timer::TimerConfig;

/// Errors that end the serve loop.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Socket(#[from] SocketError),
}

/// A single-connection RDP server.
pub struct Server<T: Transport, S: ResourceStore> {
    transport: T,
    store: S,
    timers: TimerConfig,
    sink: Box<dyn EventSink + Send>,
    conn: Option<Connection>,
    initial_seq: Option<u8>,
}

impl<S: ResourceStore> Server<Socket, S> {
    /// Bind a UDP socket on `addr` and build a server around it.
    pub async fn bind(
        addr: SocketAddr,
        store: S,
        timers: TimerConfig,
        sink: impl EventSink + Send + 'static,
    ) -> Result<Self, ServerError> {
        let socket = Socket::bind(addr).await?;
        Ok(Self::new(socket, store, timers, sink))
    }
}

impl<T: Transport, S: ResourceStore> Server<T, S> {
    pub fn new(
        transport: T,
        store: S,
        timers: TimerConfig,
        sink: impl EventSink + Send + 'static,
    ) -> Self {
        Self {
            transport,
            store,
            timers,
            sink: Box::new(sink),
            conn: None,
            initial_seq: None,
        }
    }

    /// Use `seq` as the first sequence number of every connection instead
    /// of a random one.
    pub fn with_initial_seq(mut self, seq: u8) -> Self {
        self.initial_seq = Some(seq);
        self
    }

    /// Address the server is bound to; useful after binding port `0`.
    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    pub fn state(&self) -> ServerState {
        match self.conn {
            Some(_) => ServerState::Connected,
            None => ServerState::Idle,
        }
    }

    /// Serve until the socket fails.  The socket is closed when this returns.
    pub async fn serve(mut self) -> Result<(), ServerError> {
        self.sink.record(Event::Listening {
            local: self.local_addr(),
        });
        loop {
            self.step().await?;
        }
    }

    /// Handle one read: a message, a connection timeout, or a bad datagram.
    ///
    /// While `Idle` the read blocks indefinitely; while `Connected` it is
    /// bounded by `connection_timeout`.
    pub async fn step(&mut self) -> Result<(), ServerError> {
        let wait = self.conn.as_ref().map(|_| self.timers.connection_timeout);

        match self.transport.recv_within(wait).await {
            Ok(Recv::Message(msg, from)) => self.dispatch(msg, from).await,
            Ok(Recv::TimedOut) => {
                self.abandon(AbandonReason::PeerTimedOut);
                Ok(())
            }
            Err(SocketError::Malformed(e)) => {
                self.sink.record(Event::Malformed {
                    reason: e.to_string(),
                });
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Route `msg` to its handler.  A handler may hand back a follow-up
    /// message (a request that doubled as the handshake ack), which is
    /// dispatched in turn.
    async fn dispatch(&mut self, msg: Message, from: SocketAddr) -> Result<(), ServerError> {
        let mut next = Some(msg);
        while let Some(msg) = next.take() {
            next = self.handle(msg, from).await?;
        }
        Ok(())
    }

    async fn handle(&mut self, msg: Message, from: SocketAddr) -> Result<Option<Message>, ServerError> {
        let expected = match &self.conn {
            Some(conn) if conn.remote_addr() != from => {
                self.sink.record(Event::DroppedForeign { from });
                return Ok(None);
            }
            Some(conn) => Some(conn.expected_next_index()),
            None => None,
        };

        match (msg.kind, expected) {
            (Kind::Syn, _) => self.accept(msg, from).await,
            (Kind::App, Some(expected)) if msg.seq_no != expected => {
                self.abandon(AbandonReason::OutOfOrder {
                    got: msg.seq_no,
                    expected,
                });
                Ok(None)
            }
            (Kind::App, Some(_)) => {
                self.serve_request(msg).await?;
                Ok(None)
            }
            (kind, _) => {
                self.sink.record(Event::Dropped { from, kind });
                Ok(None)
            }
        }
    }

    /// Create (or reset) the connection for `syn` and answer with our own
    /// SYN.  Returns the peer's ack when it is more than a bare ACK, so it
    /// can be processed right away.
    async fn accept(&mut self, syn: Message, from: SocketAddr) -> Result<Option<Message>, ServerError> {
        self.sink.record(Event::Accepted {
            peer: from,
            reset: self.conn.is_some(),
        });

        let isn = self
            .initial_seq
            .unwrap_or_else(|| rand::rng().random::<u8>());
        let mut conn = Connection::new(from, syn.seq_no, isn);
        let reply = Message::syn(conn.issue_next_seq(), Some(syn.seq_no));
        self.conn = Some(conn);

        let Some(ack) = self.send_reliably(&reply).await? else {
            return Ok(None);
        };
        self.sink.record(Event::Connected {
            peer: from,
            local_seq: isn,
            peer_seq: syn.seq_no,
        });

        // The request also acknowledges our SYN, so a lost bare ACK costs
        // nothing: process whatever arrived.
        Ok((!ack.is_ack_only()).then_some(ack))
    }

    /// Answer an in-order request, then close the connection.
    async fn serve_request(&mut self, request: Message) -> Result<(), ServerError> {
        let Some(conn) = self.conn.as_mut() else {
            return Ok(());
        };
        conn.advance_received(request.seq_no);
        let peer = conn.remote_addr();

        let resource = request.payload_text();
        self.sink.record(Event::RequestReceived {
            peer,
            resource: resource.clone(),
        });

        match self.store.fetch(&resource) {
            None => {
                self.sink.record(Event::ResourceMissing {
                    resource: resource.clone(),
                });
                if !self.send_data(&not_found_payload(&resource)).await? {
                    return Ok(());
                }
            }
            Some(content) => {
                let mut sent = 0;
                for chunk in chunks(&content) {
                    if !self.send_data(chunk).await? {
                        return Ok(());
                    }
                    sent += 1;
                }
                self.sink.record(Event::ResponseSent {
                    resource,
                    chunks: sent,
                    bytes: content.len(),
                });
            }
        }

        self.close().await
    }

    /// Send one APP chunk reliably.  `false` means the connection was
    /// abandoned.
    async fn send_data(&mut self, data: &[u8]) -> Result<bool, ServerError> {
        let Some(conn) = self.conn.as_mut() else {
            return Ok(false);
        };
        let msg = Message::app(conn.issue_next_seq(), Some(conn.last_seq_received()), data);
        Ok(self.send_reliably(&msg).await?.is_some())
    }

    /// Best-effort FIN handshake; the connection is released either way.
    async fn close(&mut self) -> Result<(), ServerError> {
        let Some(conn) = self.conn.as_mut() else {
            return Ok(());
        };
        let peer = conn.remote_addr();
        let fin = Message::fin(conn.issue_next_seq(), Some(conn.last_seq_received()));

        let ack = send_until_ack(&self.transport, &fin, peer, &self.timers, self.sink.as_mut()).await?;
        match ack {
            None => self.sink.record(Event::FinUnacknowledged),
            Some(ack) if !ack.is_fin() => self.sink.record(Event::FinAckNotFin { kind: ack.kind }),
            Some(_) => {}
        }

        self.conn = None;
        self.sink.record(Event::Closed { peer });
        Ok(())
    }

    /// [`send_until_ack`] to the connected peer, abandoning the connection
    /// when the retry budget runs out.
    async fn send_reliably(&mut self, msg: &Message) -> Result<Option<Message>, ServerError> {
        let Some(peer) = self.conn.as_ref().map(Connection::remote_addr) else {
            return Ok(None);
        };
        let ack = send_until_ack(&self.transport, msg, peer, &self.timers, self.sink.as_mut()).await?;
        if ack.is_none() {
            self.abandon(AbandonReason::RetriesExhausted);
        }
        Ok(ack)
    }

    fn abandon(&mut self, reason: AbandonReason) {
        if let Some(conn) = self.conn.take() {
            self.sink.record(Event::Abandoned {
                peer: conn.remote_addr(),
                reason,
            });
        }
    }
}
