//! `rdp-over-udp`: a reliable, ordered, connection-oriented transfer
//! protocol ("RDP") over UDP, and a single-resource client/server on top.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────┐   request / FIN-ACK   ┌──────────┐
//!  │  Client  │──────────────────────▶│  Server  │
//!  └────┬─────┘◀──────────────────────└────┬─────┘
//!       │        chunks / FIN              │
//!       │                                  │
//!  ┌────▼──────────────────────────────────▼────┐
//!  │   sender::send_until_ack (stop-and-wait)   │
//!  │   Connection (seq bookkeeping)             │
//!  └────┬───────────────────────────────────────┘
//!       │ Message ⇄ bytes (packet)
//!  ┌────▼──────┐
//!  │ Transport │  (Socket over tokio UdpSocket, or Simulator)
//!  └───────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]     wire format (serialise / deserialise)
//! - [`connection`] per-peer sequence numbers
//! - [`sender`]     stop-and-wait retransmission engine
//! - [`receiver`]   in-order chunk acceptance, duplicate detection
//! - [`server`]     single-connection server state machine
//! - [`client`]     handshake / request / stream / teardown
//! - [`state`]      state and phase types
//! - [`timer`]      timeouts, retry budget, deadlines
//! - [`resource`]   what the server can serve
//! - [`events`]     injected diagnostics
//! - [`simulator`]  lossy network layer for testing
//! - [`socket`]     async UDP socket abstraction

pub mod client;
pub mod connection;
pub mod events;
pub mod packet;
pub mod receiver;
pub mod resource;
pub mod sender;
pub mod server;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod timer;

pub use client::{Client, ClientError};
pub use connection::Connection;
pub use events::{Event, EventSink, LogSink, Recorder};
pub use packet::{Kind, Message, MessageError};
pub use server::{Server, ServerError};
pub use socket::{Recv, Socket, SocketError, Transport};
pub use timer::TimerConfig;
