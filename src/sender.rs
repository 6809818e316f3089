//! Reliable send engine: stop-and-wait with a fixed retry budget.
//!
//! [`send_until_ack`] is the only retransmission mechanism in RDP.  It sends
//! one message, then listens for an acknowledgment of exactly that message:
//!
//! ```text
//!   send ──▶ wait ack_timeout ──▶ ack from peer with ack_no == seq_no? ──▶ done
//!    ▲                │ timeout
//!    └── attempts < retry_budget + 1 ◀┘            otherwise ──▶ None
//! ```
//!
//! # Stop-and-Wait contract
//! - At most **one** message is outstanding; the caller blocks until it is
//!   acknowledged or abandoned.
//! - Anything else that arrives during the wait (another sender, a stale
//!   ack, a malformed datagram) is discarded; the wait for the current
//!   attempt continues until its own deadline.
//! - Any message kind may serve as the ack: a peer's next SYN, APP or FIN
//!   that carries `ack_no == seq_no` is returned to the caller so it can be
//!   processed without waiting for a separate bare ACK.
//! - On exhaustion the engine returns `Ok(None)`; treating that as
//!   abandonment is the caller's business.

use std::net::SocketAddr;
use std::time::Duration;

use crate::events::{Event, EventSink};
use crate::packet::Message;
use crate::socket::{Recv, SocketError, Transport};
use crate::timer::{Deadline, TimerConfig};

/// Transmit `message` to `remote` until an acknowledgment for it arrives.
///
/// Returns the acknowledging message, or `None` once
/// [`TimerConfig::max_attempts`] transmissions went unanswered.  Only I/O
/// failures surface as `Err`.
pub async fn send_until_ack<T: Transport>(
    transport: &T,
    message: &Message,
    remote: SocketAddr,
    timers: &TimerConfig,
    sink: &mut (dyn EventSink + Send),
) -> Result<Option<Message>, SocketError> {
    for attempt in 1..=timers.max_attempts() {
        if attempt > 1 {
            sink.record(Event::Retransmit {
                seq: message.seq_no,
                attempt,
            });
        }
        transport.send_to(message, remote).await?;

        if let Some(ack) = await_ack(transport, message, remote, timers.ack_timeout, sink).await? {
            return Ok(Some(ack));
        }
    }

    log::debug!(
        "[rdp] no ACK for seq={} after {} attempts",
        message.seq_no,
        timers.max_attempts()
    );
    Ok(None)
}

/// Wait up to `wait` for a message from `remote` acknowledging `outgoing`.
///
/// Every other datagram read in the meantime is discarded.
pub async fn await_ack<T: Transport>(
    transport: &T,
    outgoing: &Message,
    remote: SocketAddr,
    wait: Duration,
    sink: &mut (dyn EventSink + Send),
) -> Result<Option<Message>, SocketError> {
    let deadline = Deadline::after(wait);

    while let Some(left) = deadline.remaining() {
        match transport.recv_within(Some(left)).await {
            Ok(Recv::Message(msg, from)) if from == remote && msg.is_ack_for(outgoing) => {
                log::debug!("[rdp] ← {msg} acknowledges seq={}", outgoing.seq_no);
                return Ok(Some(msg));
            }
            Ok(Recv::Message(msg, from)) => {
                log::debug!(
                    "[rdp] ← {msg} from {from}; not an ACK for seq={}, discarding",
                    outgoing.seq_no
                );
            }
            Ok(Recv::TimedOut) => break,
            Err(SocketError::Malformed(e)) => sink.record(Event::Malformed {
                reason: e.to_string(),
            }),
            Err(e) => return Err(e),
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Recorder;
    use crate::socket::Socket;

    fn timers() -> TimerConfig {
        TimerConfig::default().with_ack_timeout(Duration::from_millis(40))
    }

    async fn loopback() -> Socket {
        Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap()
    }

    /// Read everything `sock` receives until it has been quiet for `idle`.
    async fn drain(sock: &Socket, idle: Duration) -> Vec<Message> {
        let mut got = Vec::new();
        while let Ok(Recv::Message(m, _)) = sock.recv_within(Some(idle)).await {
            got.push(m);
        }
        got
    }

    #[tokio::test]
    async fn returns_matching_ack() {
        let local = loopback().await;
        let peer = loopback().await;
        let peer_addr = peer.local_addr;
        let msg = Message::app(21, None, b"chunk".to_vec());

        let peer_task = tokio::spawn(async move {
            let (m, from) = peer.recv_from().await.unwrap();
            peer.send_to(&Message::ack(90, m.seq_no), from).await.unwrap();
        });

        let mut sink = Recorder::new();
        let ack = send_until_ack(&local, &msg, peer_addr, &timers(), &mut sink)
            .await
            .unwrap();
        peer_task.await.unwrap();

        assert_eq!(ack, Some(Message::ack(90, 21)));
        assert_eq!(sink.count(|e| matches!(e, Event::Retransmit { .. })), 0);
    }

    #[tokio::test]
    async fn gives_up_after_six_transmissions() {
        let local = loopback().await;
        let silent = loopback().await;
        let msg = Message::syn(10, None);

        let mut sink = Recorder::new();
        let ack = send_until_ack(&local, &msg, silent.local_addr, &timers(), &mut sink)
            .await
            .unwrap();
        assert_eq!(ack, None);

        let seen = drain(&silent, Duration::from_millis(50)).await;
        assert_eq!(seen.len(), 6);
        assert!(seen.iter().all(|m| *m == msg));
        assert_eq!(sink.count(|e| matches!(e, Event::Retransmit { .. })), 5);
    }

    #[tokio::test]
    async fn ack_from_wrong_sender_is_ignored() {
        let local = loopback().await;
        let peer = loopback().await;
        let impostor = loopback().await;
        let msg = Message::app(5, None, b"x".to_vec());

        impostor
            .send_to(&Message::ack(0, 5), local.local_addr)
            .await
            .unwrap();

        let timers = timers().with_retry_budget(0);
        let mut sink = Recorder::new();
        let ack = send_until_ack(&local, &msg, peer.local_addr, &timers, &mut sink)
            .await
            .unwrap();
        assert_eq!(ack, None);
    }

    #[tokio::test]
    async fn non_matching_ack_is_discarded_then_match_accepted() {
        let local = loopback().await;
        let peer = loopback().await;
        let msg = Message::app(5, None, b"x".to_vec());

        // Stale ack for an earlier message, then piggy-backed ack on a FIN.
        peer.send_to(&Message::ack(0, 4), local.local_addr).await.unwrap();
        peer.send_to(&Message::fin(77, Some(5)), local.local_addr)
            .await
            .unwrap();

        let got = await_ack(
            &local,
            &msg,
            peer.local_addr,
            Duration::from_millis(500),
            &mut Recorder::new(),
        )
        .await
        .unwrap();
        assert_eq!(got, Some(Message::fin(77, Some(5))));
    }

    #[tokio::test]
    async fn malformed_datagram_is_reported_and_skipped() {
        let local = loopback().await;
        let peer = loopback().await;
        let msg = Message::app(8, None, Vec::new());

        peer.send_raw(&[1, 0, 0], local.local_addr).await.unwrap();
        peer.send_to(&Message::ack(1, 8), local.local_addr).await.unwrap();

        let mut sink = Recorder::new();
        let got = await_ack(&local, &msg, peer.local_addr, Duration::from_millis(500), &mut sink)
            .await
            .unwrap();
        assert_eq!(got, Some(Message::ack(1, 8)));
        assert_eq!(sink.count(|e| matches!(e, Event::Malformed { .. })), 1);
    }
}
