//! Helpers shared by the integration tests.
//!
//! Scripted peers are plain [`Socket`]s driven by hand, so a test can play
//! one side of the protocol message by message (and misbehave on purpose).

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use rdp_over_udp::{Message, Recv, Socket, TimerConfig, Transport};

/// Short timings so retransmission paths run in milliseconds.
pub fn fast() -> TimerConfig {
    TimerConfig::default()
        .with_ack_timeout(Duration::from_millis(40))
        .with_connection_timeout(Duration::from_millis(500))
}

/// Bind a socket to an OS-assigned port on loopback.
pub async fn ephemeral() -> Socket {
    let addr = "127.0.0.1:0".parse().unwrap();
    Socket::bind(addr).await.expect("bind failed")
}

/// Next message on `sock` for which `pred` holds; everything else is skipped.
///
/// Panics if nothing matching arrives within two seconds.
pub async fn next_matching(
    sock: &Socket,
    pred: impl Fn(&Message) -> bool,
) -> (Message, SocketAddr) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let left = deadline.saturating_duration_since(tokio::time::Instant::now());
        match sock.recv_within(Some(left)).await.expect("recv failed") {
            Recv::Message(m, from) if pred(&m) => return (m, from),
            Recv::Message(..) => continue,
            Recv::TimedOut => panic!("scripted peer timed out waiting for a message"),
        }
    }
}

/// Everything `sock` receives until it has been quiet for `idle`.
pub async fn drain(sock: &Socket, idle: Duration) -> Vec<Message> {
    let mut got = Vec::new();
    while let Ok(Recv::Message(m, _)) = sock.recv_within(Some(idle)).await {
        got.push(m);
    }
    got
}

/// Content with a recognisable, non-repeating byte pattern.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

/// Play the server side of the handshake: wait for a SYN, answer it with
/// `SYN seq=isn ack=<client seq>`, and return the client's SYN and address.
pub async fn accept_scripted(server: &Socket, isn: u8) -> (Message, SocketAddr) {
    let (syn, client) = next_matching(server, Message::is_syn).await;
    server
        .send_to(&Message::syn(isn, Some(syn.seq_no)), client)
        .await
        .unwrap();
    (syn, client)
}

/// Poll `rec` until an event matching `pred` shows up.
///
/// Panics after two seconds.
pub async fn wait_for(rec: &rdp_over_udp::Recorder, pred: impl Fn(&rdp_over_udp::Event) -> bool) {
    for _ in 0..200 {
        if rec.count(&pred) > 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected event was never recorded: {:#?}", rec.events());
}
