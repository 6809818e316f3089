//! Per-connection sequence bookkeeping.
//!
//! A [`Connection`] is the only state RDP keeps about a peer: where it lives,
//! the next sequence number we will stamp on an outgoing message, and the
//! last in-order sequence number accepted from it.  There is no retransmit
//! buffer: the protocol is stop-and-wait, so the single outstanding message
//! is held by whoever is driving [`crate::sender::send_until_ack`].
//!
//! All arithmetic is modulo 256.
//!
//! The transport endpoint is not part of this type; the
//! server and client state machines own their socket and hold a
//! `Connection` next to it.

use std::net::SocketAddr;

/// Sequence state for one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    remote: SocketAddr,
    next_seq_to_send: u8,
    last_seq_received: u8,
}

impl Connection {
    /// Create a connection to `remote`.
    ///
    /// `last_seq_received` is the peer's base sequence number (the seq of the
    /// SYN it sent); `next_seq_to_send` is the next number we will issue.
    pub fn new(remote: SocketAddr, last_seq_received: u8, next_seq_to_send: u8) -> Self {
        Self {
            remote,
            next_seq_to_send,
            last_seq_received,
        }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// Return the current outgoing sequence number and advance it.
    pub fn issue_next_seq(&mut self) -> u8 {
        let seq = self.next_seq_to_send;
        self.next_seq_to_send = seq.wrapping_add(1);
        seq
    }

    /// The outgoing sequence number without consuming it.
    ///
    /// Used to stamp ACK-only messages, which occupy no sequence slot.
    pub fn current_seq(&self) -> u8 {
        self.next_seq_to_send
    }

    pub fn last_seq_received(&self) -> u8 {
        self.last_seq_received
    }

    /// Sequence number the next in-order message from the peer must carry.
    pub fn expected_next_index(&self) -> u8 {
        self.last_seq_received.wrapping_add(1)
    }

    /// Record `seq` as the latest in-order message accepted from the peer.
    pub fn advance_received(&mut self, seq: u8) {
        self.last_seq_received = seq;
    }
}
