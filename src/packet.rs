//! Wire-format definitions for RDP messages.
//!
//! Every datagram exchanged between peers is a single [`Message`].  This
//! module is responsible for:
//! - Defining the on-wire binary layout (kind, ack flag, seq/ack, payload).
//! - Serialising a [`Message`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Message`], returning errors
//!   for malformed or truncated input.
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |A|  Kind id    |   Reserved    |    Seq No     |    Ack No     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |        Payload Length         |          Payload ...          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! `A` is the ack-present flag; `Ack No` is meaningful only when it is set.
//! The payload length is big-endian.  Total header size: [`HEADER_SIZE`].

use thiserror::Error;

/// Largest datagram either peer will ever send.
pub const MAX_PACKET_SIZE: usize = 1024;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_SIZE: usize = 6;

/// Largest payload that fits in one datagram.  Longer payloads are truncated
/// by [`Message::encode`]; chunking is the caller's job.
pub const MAX_PAYLOAD_SIZE: usize = MAX_PACKET_SIZE - HEADER_SIZE;

const ACK_FLAG: u8 = 0b1000_0000;
const KIND_MASK: u8 = !ACK_FLAG;

// Byte offsets of each field within the serialised header.
const OFF_KIND: usize = 0;
const OFF_RESERVED: usize = 1;
const OFF_SEQ: usize = 2;
const OFF_ACK: usize = 3;
const OFF_PAYLOAD_LEN: usize = 4;

// ---------------------------------------------------------------------------
// Kind
// ---------------------------------------------------------------------------

/// Message kind, carried in the low 7 bits of the first header byte.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Acknowledgment only; carries no payload.
    Ack = 0,
    /// Handshake initiation (and the server's handshake reply).
    Syn = 1,
    /// Connection termination.
    Fin = 2,
    /// Application data: a request or a chunk of a response.
    App = 3,
}

impl Kind {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Kind::Ack),
            1 => Some(Kind::Syn),
            2 => Some(Kind::Fin),
            3 => Some(Kind::App),
            _ => None,
        }
    }

    pub fn id(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Kind::Ack => "ACK",
            Kind::Syn => "SYN",
            Kind::Fin => "FIN",
            Kind::App => "APP",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A complete RDP datagram: header fields + payload bytes.
///
/// Endpoints are not part of the wire format; the transport reports the
/// source address alongside each decoded message.  Equality is structural
/// over the four wire fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: Kind,
    /// Position of this message in its sender's outgoing stream (mod 256).
    pub seq_no: u8,
    /// Sequence number of the peer message this one acknowledges, if any.
    /// Independent of `kind`: a SYN, APP or FIN may piggy-back an ack.
    pub ack_no: Option<u8>,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn syn(seq_no: u8, ack_no: Option<u8>) -> Self {
        Self::new(Kind::Syn, seq_no, ack_no, Vec::new())
    }

    pub fn ack(seq_no: u8, ack_no: u8) -> Self {
        Self::new(Kind::Ack, seq_no, Some(ack_no), Vec::new())
    }

    pub fn app(seq_no: u8, ack_no: Option<u8>, payload: impl Into<Vec<u8>>) -> Self {
        Self::new(Kind::App, seq_no, ack_no, payload.into())
    }

    pub fn fin(seq_no: u8, ack_no: Option<u8>) -> Self {
        Self::new(Kind::Fin, seq_no, ack_no, Vec::new())
    }

    fn new(kind: Kind, seq_no: u8, ack_no: Option<u8>, payload: Vec<u8>) -> Self {
        Self {
            kind,
            seq_no,
            ack_no,
            payload,
        }
    }

    pub fn is_syn(&self) -> bool {
        self.kind == Kind::Syn
    }

    pub fn is_fin(&self) -> bool {
        self.kind == Kind::Fin
    }

    pub fn is_app(&self) -> bool {
        self.kind == Kind::App
    }

    /// `true` when an acknowledgment is piggy-backed, whatever the kind.
    pub fn is_ack(&self) -> bool {
        self.ack_no.is_some()
    }

    /// `true` for a bare acknowledgment (kind [`Kind::Ack`]).
    pub fn is_ack_only(&self) -> bool {
        self.kind == Kind::Ack
    }

    /// `true` when this message acknowledges exactly `outgoing`.
    pub fn is_ack_for(&self, outgoing: &Message) -> bool {
        self.ack_no == Some(outgoing.seq_no)
    }

    /// Payload decoded as UTF-8, with invalid sequences replaced.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Serialise this message into a newly allocated byte vector.
    ///
    /// A payload longer than [`MAX_PAYLOAD_SIZE`] is truncated, never split.
    pub fn encode(&self) -> Vec<u8> {
        let payload_len = self.payload.len().min(MAX_PAYLOAD_SIZE);
        let mut buf = vec![0u8; HEADER_SIZE + payload_len];

        buf[OFF_KIND] = match self.ack_no {
            Some(_) => self.kind.id() | ACK_FLAG,
            None => self.kind.id(),
        };
        buf[OFF_RESERVED] = 0;
        buf[OFF_SEQ] = self.seq_no;
        buf[OFF_ACK] = self.ack_no.unwrap_or(0);
        buf[OFF_PAYLOAD_LEN..OFF_PAYLOAD_LEN + 2]
            .copy_from_slice(&(payload_len as u16).to_be_bytes());
        buf[HEADER_SIZE..].copy_from_slice(&self.payload[..payload_len]);

        buf
    }

    /// Parse a [`Message`] from a raw byte slice.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is shorter than [`HEADER_SIZE`],
    /// - the kind id is not one of the known kinds, or
    /// - the declared payload length exceeds the remaining bytes.
    ///
    /// Bytes beyond the declared payload are ignored.
    pub fn decode(buf: &[u8]) -> Result<Self, MessageError> {
        if buf.len() < HEADER_SIZE {
            return Err(MessageError::TooShort { len: buf.len() });
        }

        let first = buf[OFF_KIND];
        let kind = Kind::from_id(first & KIND_MASK)
            .ok_or(MessageError::UnknownKind(first & KIND_MASK))?;
        let ack_no = (first & ACK_FLAG != 0).then_some(buf[OFF_ACK]);

        let declared = usize::from(u16::from_be_bytes([
            buf[OFF_PAYLOAD_LEN],
            buf[OFF_PAYLOAD_LEN + 1],
        ]));
        let available = buf.len() - HEADER_SIZE;
        if declared > available {
            return Err(MessageError::PayloadTruncated {
                declared,
                available,
            });
        }

        Ok(Message {
            kind,
            seq_no: buf[OFF_SEQ],
            ack_no,
            payload: buf[HEADER_SIZE..HEADER_SIZE + declared].to_vec(),
        })
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} seq={}", self.kind, self.seq_no)?;
        if let Some(ack) = self.ack_no {
            write!(f, " ack={ack}")?;
        }
        if !self.payload.is_empty() {
            write!(f, " len={}", self.payload.len())?;
        }
        Ok(())
    }
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("datagram of {len} bytes is shorter than the 6-byte header")]
    TooShort { len: usize },
    #[error("unknown message kind id {0}")]
    UnknownKind(u8),
    #[error("declared payload length {declared} exceeds the {available} bytes available")]
    PayloadTruncated { declared: usize, available: usize },
}
