//! Inbound chunk acceptance and reassembly for the client.
//!
//! The [`Receiver`] decides what to do with each APP message the server
//! streams during a response:
//! - the next in-order chunk is appended and the connection advanced,
//! - a repeat of the last accepted chunk (our ACK was lost) is flagged so the
//!   caller re-sends the ACK without appending anything,
//! - anything else is a protocol violation.
//!
//! RDP has no reordering: there is no out-of-order buffer.  The
//! [`Receiver`] does **not** send ACKs itself; the client does.

use crate::connection::Connection;
use crate::packet::Message;

/// What happened to one inbound chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// In order; payload appended.
    Accepted,
    /// Repeat of the last accepted chunk; nothing appended.
    Duplicate,
    /// Neither the next chunk nor a repeat of the last one.
    OutOfOrder { expected: u8 },
}

/// Accumulates the content of one response.
#[derive(Debug, Default)]
pub struct Receiver {
    content: Vec<u8>,
    chunks: usize,
}

impl Receiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify `chunk` against `conn` and, when in order, take its payload.
    pub fn on_chunk(&mut self, conn: &mut Connection, chunk: &Message) -> Delivery {
        if chunk.seq_no == conn.expected_next_index() {
            self.content.extend_from_slice(&chunk.payload);
            self.chunks += 1;
            conn.advance_received(chunk.seq_no);
            Delivery::Accepted
        } else if chunk.seq_no == conn.last_seq_received() {
            Delivery::Duplicate
        } else {
            Delivery::OutOfOrder {
                expected: conn.expected_next_index(),
            }
        }
    }

    /// Number of chunks accepted so far.
    pub fn chunks(&self) -> usize {
        self.chunks
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn into_content(self) -> Vec<u8> {
        self.content
    }
}
