//! Datagram transport boundary.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that speaks
//! [`Message`] instead of raw bytes.  The state machines are written against
//! the [`Transport`] trait so tests can slot a fault-injecting
//! [`crate::simulator::Simulator`] in between.  All protocol logic lives
//! elsewhere; this module owns only byte I/O.
//!
//! A bounded read never raises on timeout: it returns [`Recv::TimedOut`] and
//! the caller branches on it.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;

use crate::packet::{Message, MessageError, MAX_PACKET_SIZE};

/// Receive buffer size.  Larger than [`MAX_PACKET_SIZE`] so an oversized
/// datagram is seen whole rather than silently clipped by the OS.
const RECV_BUFFER: usize = MAX_PACKET_SIZE * 2;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can arise from socket operations.
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed datagram: {0}")]
    Malformed(#[from] MessageError),
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Outcome of a bounded read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recv {
    /// A well-formed message and the address it came from.
    Message(Message, SocketAddr),
    /// Nothing arrived before the wait expired.
    TimedOut,
}

/// An addressed, unreliable, message-oriented channel.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Address this endpoint is bound to.
    fn local_addr(&self) -> SocketAddr;

    /// Encode `message` and send it as a single datagram to `dest`.
    async fn send_to(&self, message: &Message, dest: SocketAddr) -> Result<(), SocketError>;

    /// Wait up to `wait` (forever when `None`) for the next datagram.
    ///
    /// Datagrams that fail to decode are returned as
    /// [`SocketError::Malformed`]; the caller decides whether to keep reading.
    async fn recv_within(&self, wait: Option<Duration>) -> Result<Recv, SocketError>;
}

// ---------------------------------------------------------------------------
// Socket
// ---------------------------------------------------------------------------

/// A UDP socket carrying RDP messages.
///
/// Dropping the socket closes it, so every exit path of the state machine
/// that owns it releases the port.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing port `0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, SocketError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// Receive and decode the next datagram, waiting indefinitely.
    pub async fn recv_from(&self) -> Result<(Message, SocketAddr), SocketError> {
        let mut buf = vec![0u8; RECV_BUFFER];
        let (n, addr) = self.inner.recv_from(&mut buf).await?;
        let message = Message::decode(&buf[..n]).map_err(|e| {
            log::trace!("[socket] ← {n} undecodable bytes from {addr}: {e}");
            e
        })?;
        log::trace!("[socket] ← {message} from {addr}");
        Ok((message, addr))
    }

    /// Send raw bytes, bypassing the codec.  Used to exercise decode errors.
    #[cfg(test)]
    pub(crate) async fn send_raw(&self, bytes: &[u8], dest: SocketAddr) -> Result<(), SocketError> {
        self.inner.send_to(bytes, dest).await?;
        Ok(())
    }
}

impl Transport for Socket {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn send_to(&self, message: &Message, dest: SocketAddr) -> Result<(), SocketError> {
        log::trace!("[socket] → {message} to {dest}");
        self.inner.send_to(&message.encode(), dest).await?;
        Ok(())
    }

    async fn recv_within(&self, wait: Option<Duration>) -> Result<Recv, SocketError> {
        let received = match wait {
            None => self.recv_from().await?,
            Some(wait) => match tokio::time::timeout(wait, self.recv_from()).await {
                Ok(result) => result?,
                Err(_elapsed) => return Ok(Recv::TimedOut),
            },
        };
        Ok(Recv::Message(received.0, received.1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn loopback() -> Socket {
        Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn send_and_receive_message() {
        let a = loopback().await;
        let b = loopback().await;

        let msg = Message::app(17, Some(3), b"payload".to_vec());
        a.send_to(&msg, b.local_addr).await.unwrap();

        let got = b.recv_within(Some(Duration::from_secs(2))).await.unwrap();
        assert_eq!(got, Recv::Message(msg, a.local_addr));
    }

    #[tokio::test]
    async fn bounded_read_times_out() {
        let a = loopback().await;
        let got = a.recv_within(Some(Duration::from_millis(20))).await.unwrap();
        assert_eq!(got, Recv::TimedOut);
    }

    #[tokio::test]
    async fn undecodable_datagram_is_an_error() {
        let a = loopback().await;
        let b = loopback().await;

        a.send_raw(&[0x7f, 0, 0, 0, 0, 0], b.local_addr).await.unwrap();

        let got = b.recv_within(Some(Duration::from_secs(2))).await;
        assert!(matches!(
            got,
            Err(SocketError::Malformed(MessageError::UnknownKind(0x7f)))
        ));
    }
}
