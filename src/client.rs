//! RDP client: handshake, one request, streamed response, teardown.
//!
//! The client walks the phases in [`ClientPhase`] in order and bails out on
//! the first failure.  [`Client::fetch`] consumes the client, so the socket
//! is released on every exit path.
//!
//! Two loss cases are handled explicitly:
//! - our ACK of a chunk is lost and the server re-sends the chunk: the
//!   duplicate is re-ACKed but not appended again;
//! - our FIN-ACK is lost and the server re-sends its FIN: during the
//!   keep-alive window every repeat of that FIN is answered again.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use rand::Rng;
use thiserror::Error;

use crate::connection::Connection;
use crate::events::{Event, EventSink};
use crate::packet::{Kind, Message};
use crate::receiver::{Delivery, Receiver};
use crate::sender::send_until_ack;
use crate::socket::{Recv, Socket, SocketError, Transport};
use crate::state::ClientPhase;
use crate::timer::{Deadline, TimerConfig};

/// Ways a fetch can fail.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no response from server")]
    HandshakeFailed,
    #[error("no acknowledgment received for request")]
    RequestUnacknowledged,
    #[error("unexpected {0} in reply to request")]
    UnexpectedReply(Kind),
    #[error("bad sequence number {got} during transfer, expected {expected}")]
    OutOfOrder { got: u8, expected: u8 },
    #[error("server stopped responding")]
    ServerStoppedResponding,
    #[error(transparent)]
    Socket(#[from] SocketError),
}

/// Bind an ephemeral socket, connect to `server` and fetch `resource`.
pub async fn fetch(
    server: SocketAddr,
    resource: &str,
    timers: TimerConfig,
    sink: impl EventSink + Send + 'static,
) -> Result<Vec<u8>, ClientError> {
    let local: SocketAddr = match server {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = Socket::bind(local).await?;
    Client::connect(socket, server, timers, sink)
        .await?
        .fetch(resource)
        .await
}

/// A connected client session.
pub struct Client<T: Transport> {
    transport: T,
    conn: Connection,
    timers: TimerConfig,
    sink: Box<dyn EventSink + Send>,
    phase: ClientPhase,
}

impl<T: Transport> Client<T> {
    /// Perform the handshake with a random initial sequence number.
    pub async fn connect(
        transport: T,
        server: SocketAddr,
        timers: TimerConfig,
        sink: impl EventSink + Send + 'static,
    ) -> Result<Self, ClientError> {
        let isn = rand::rng().random::<u8>();
        Self::connect_with_seq(transport, server, isn, timers, sink).await
    }

    /// Perform the handshake starting from sequence number `isn`.
    ///
    /// The server's SYN is acknowledged immediately; the request sent next
    /// acknowledges it again, so losing this ACK is harmless.
    pub async fn connect_with_seq(
        transport: T,
        server: SocketAddr,
        isn: u8,
        timers: TimerConfig,
        sink: impl EventSink + Send + 'static,
    ) -> Result<Self, ClientError> {
        let mut sink: Box<dyn EventSink + Send> = Box::new(sink);
        sink.record(Event::Connecting { server, isn });

        let syn = Message::syn(isn, None);
        let response = send_until_ack(&transport, &syn, server, &timers, sink.as_mut())
            .await?
            .ok_or(ClientError::HandshakeFailed)?;
        if !response.is_syn() {
            sink.record(Event::HandshakeAckNotSyn {
                kind: response.kind,
            });
        }

        let conn = Connection::new(server, response.seq_no, isn.wrapping_add(1));
        sink.record(Event::Connected {
            peer: server,
            local_seq: isn,
            peer_seq: response.seq_no,
        });

        let mut client = Self {
            transport,
            conn,
            timers,
            sink,
            phase: ClientPhase::Request,
        };
        client.send_ack(response.seq_no).await?;
        Ok(client)
    }

    pub fn phase(&self) -> ClientPhase {
        self.phase
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    /// Request `resource` and collect the response until the server's FIN.
    ///
    /// A missing resource is not an error here: the server's in-band
    /// not-found payload is returned as content (see
    /// [`crate::resource::is_not_found`]).
    pub async fn fetch(mut self, resource: &str) -> Result<Vec<u8>, ClientError> {
        let result = self.run(resource).await;
        self.enter(ClientPhase::Closed);
        result
    }

    async fn run(&mut self, resource: &str) -> Result<Vec<u8>, ClientError> {
        let request = Message::app(
            self.conn.issue_next_seq(),
            Some(self.conn.last_seq_received()),
            resource.as_bytes(),
        );
        self.sink.record(Event::RequestSent {
            resource: resource.to_owned(),
        });

        let reply = send_until_ack(
            &self.transport,
            &request,
            self.conn.remote_addr(),
            &self.timers,
            self.sink.as_mut(),
        )
        .await?
        .ok_or(ClientError::RequestUnacknowledged)?;

        // The first chunk (or the FIN, for empty content) usually doubles as
        // the ack; a bare ACK means the data is still to come.
        let first = match reply.kind {
            Kind::App | Kind::Fin => Some(reply),
            Kind::Ack => None,
            Kind::Syn => return Err(ClientError::UnexpectedReply(Kind::Syn)),
        };

        self.enter(ClientPhase::Streaming);
        let (content, fin) = self.stream(first).await?;

        self.enter(ClientPhase::Teardown);
        self.teardown(&fin).await?;
        Ok(content)
    }

    /// Consume APP messages until a FIN arrives.
    async fn stream(&mut self, first: Option<Message>) -> Result<(Vec<u8>, Message), ClientError> {
        let mut receiver = Receiver::new();
        let mut next = first;

        loop {
            let msg = match next.take() {
                Some(msg) => msg,
                None => self.read_from_server().await?,
            };

            match msg.kind {
                Kind::App => match receiver.on_chunk(&mut self.conn, &msg) {
                    Delivery::Accepted => {
                        self.sink.record(Event::ChunkReceived {
                            seq: msg.seq_no,
                            len: msg.payload.len(),
                        });
                        self.send_ack(msg.seq_no).await?;
                    }
                    Delivery::Duplicate => {
                        self.sink.record(Event::DuplicateReacked { seq: msg.seq_no });
                        self.send_ack(msg.seq_no).await?;
                    }
                    Delivery::OutOfOrder { expected } => {
                        return Err(ClientError::OutOfOrder {
                            got: msg.seq_no,
                            expected,
                        });
                    }
                },
                Kind::Fin if msg.seq_no == self.conn.expected_next_index() => {
                    self.sink.record(Event::StreamComplete {
                        chunks: receiver.chunks(),
                        bytes: receiver.len(),
                    });
                    return Ok((receiver.into_content(), msg));
                }
                Kind::Fin => {
                    return Err(ClientError::OutOfOrder {
                        got: msg.seq_no,
                        expected: self.conn.expected_next_index(),
                    });
                }
                kind => self.sink.record(Event::Dropped {
                    from: self.conn.remote_addr(),
                    kind,
                }),
            }
        }
    }

    /// Next message from the server, waiting at most
    /// [`TimerConfig::stream_timeout`].
    async fn read_from_server(&mut self) -> Result<Message, ClientError> {
        let deadline = Deadline::after(self.timers.stream_timeout());
        let server = self.conn.remote_addr();

        while let Some(left) = deadline.remaining() {
            match self.transport.recv_within(Some(left)).await {
                Ok(Recv::Message(msg, from)) if from == server => return Ok(msg),
                Ok(Recv::Message(_, from)) => {
                    self.sink.record(Event::DroppedForeign { from });
                }
                Ok(Recv::TimedOut) => break,
                Err(SocketError::Malformed(e)) => self.sink.record(Event::Malformed {
                    reason: e.to_string(),
                }),
                Err(e) => return Err(e.into()),
            }
        }

        Err(ClientError::ServerStoppedResponding)
    }

    /// Answer the server's FIN, then linger for `fin_keep_alive`, answering
    /// every repeat of that FIN the same way.
    async fn teardown(&mut self, fin_in: &Message) -> Result<(), ClientError> {
        let server = self.conn.remote_addr();
        let fin_out = Message::fin(self.conn.issue_next_seq(), Some(fin_in.seq_no));
        self.transport.send_to(&fin_out, server).await?;

        let deadline = Deadline::after(self.timers.fin_keep_alive);
        while let Some(left) = deadline.remaining() {
            match self.transport.recv_within(Some(left)).await {
                Ok(Recv::Message(msg, from)) if from == server && msg == *fin_in => {
                    self.sink.record(Event::KeepAliveReack { seq: msg.seq_no });
                    self.transport.send_to(&fin_out, server).await?;
                }
                Ok(Recv::Message(..)) | Err(SocketError::Malformed(_)) => {}
                Ok(Recv::TimedOut) => break,
                Err(e) => return Err(e.into()),
            }
        }

        self.sink.record(Event::Closed { peer: server });
        Ok(())
    }

    async fn send_ack(&mut self, seq: u8) -> Result<(), SocketError> {
        let ack = Message::ack(self.conn.current_seq(), seq);
        self.transport.send_to(&ack, self.conn.remote_addr()).await
    }

    fn enter(&mut self, phase: ClientPhase) {
        self.sink.record(Event::PhaseChanged {
            from: self.phase,
            to: phase,
        });
        self.phase = phase;
    }
}
