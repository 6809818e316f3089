//! Client behaviour against a scripted server that misbehaves on purpose.

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use tokio::task::JoinHandle;

use rdp_over_udp::state::ClientPhase;
use rdp_over_udp::{Client, ClientError, Event, Kind, Message, Recorder, Socket, Transport};

use common::{accept_scripted, drain, ephemeral, fast, next_matching};

const CLIENT_ISN: u8 = 20;
const SERVER_ISN: u8 = 4;

/// Start a client fetching `resource` from `server` and play the scripted
/// side up to the request.  Returns the client's address and task.
async fn start_fetch(
    server: &Socket,
    resource: &'static str,
    rec: &Recorder,
) -> (SocketAddr, JoinHandle<Result<Vec<u8>, ClientError>>) {
    let server_addr = server.local_addr;
    let client_rec = rec.clone();
    let task = tokio::spawn(async move {
        let socket = ephemeral().await;
        let client =
            Client::connect_with_seq(socket, server_addr, CLIENT_ISN, fast(), client_rec).await?;
        client.fetch(resource).await
    });

    let (_, peer) = accept_scripted(server, SERVER_ISN).await;
    let (request, _) = next_matching(server, Message::is_app).await;
    assert_eq!(request.seq_no, CLIENT_ISN + 1);
    assert_eq!(request.ack_no, Some(SERVER_ISN));
    assert_eq!(request.payload_text(), resource);
    (peer, task)
}

fn ack_of(seq: u8) -> impl Fn(&Message) -> bool {
    move |m: &Message| m.is_ack_only() && m.ack_no == Some(seq)
}

/// A chunk re-sent after a lost ACK is ACKed again but stored once.
#[tokio::test]
async fn duplicate_chunk_is_reacked_not_reappended() {
    let server = ephemeral().await;
    let rec = Recorder::new();
    let (peer, task) = start_fetch(&server, "greeting", &rec).await;
    let req = CLIENT_ISN + 1;

    let first = Message::app(5, Some(req), "hello ");
    server.send_to(&first, peer).await.unwrap();
    next_matching(&server, ack_of(5)).await;
    server.send_to(&first, peer).await.unwrap();
    next_matching(&server, ack_of(5)).await;

    server.send_to(&Message::app(6, Some(req), "world"), peer).await.unwrap();
    next_matching(&server, ack_of(6)).await;

    server.send_to(&Message::fin(7, Some(req)), peer).await.unwrap();
    let (fin_ack, _) = next_matching(&server, Message::is_fin).await;
    assert_eq!(fin_ack.ack_no, Some(7));

    assert_eq!(task.await.unwrap().unwrap(), b"hello world");
    assert_eq!(rec.count(|e| *e == Event::DuplicateReacked { seq: 5 }), 1);
}

/// A bare ACK of the request means the data follows separately.
#[tokio::test]
async fn bare_ack_of_request_then_data() {
    let server = ephemeral().await;
    let rec = Recorder::new();
    let (peer, task) = start_fetch(&server, "late", &rec).await;
    let req = CLIENT_ISN + 1;

    server.send_to(&Message::ack(5, req), peer).await.unwrap();
    server.send_to(&Message::app(5, Some(req), "data"), peer).await.unwrap();
    next_matching(&server, ack_of(5)).await;
    server.send_to(&Message::fin(6, Some(req)), peer).await.unwrap();
    next_matching(&server, Message::is_fin).await;

    assert_eq!(task.await.unwrap().unwrap(), b"data");
}

/// A repeat of the server's FIN inside the keep-alive window gets exactly one
/// more FIN-ACK; the FIN also serves as the request's ack for empty content.
#[tokio::test]
async fn keep_alive_answers_repeated_fin_once() {
    let server = ephemeral().await;
    let rec = Recorder::new();
    let (peer, task) = start_fetch(&server, "empty", &rec).await;

    let fin = Message::fin(5, Some(CLIENT_ISN + 1));
    server.send_to(&fin, peer).await.unwrap();
    let (fin_ack, _) = next_matching(&server, Message::is_fin).await;
    assert_eq!(fin_ack.ack_no, Some(5));

    // Pretend the FIN-ACK was lost.
    server.send_to(&fin, peer).await.unwrap();
    let after = drain(&server, Duration::from_millis(150)).await;
    assert_eq!(after, vec![fin_ack]);

    assert!(task.await.unwrap().unwrap().is_empty());
    assert_eq!(rec.count(|e| *e == Event::KeepAliveReack { seq: 5 }), 1);
    assert_eq!(rec.count(|e| matches!(e, Event::Closed { .. })), 1);
}

#[tokio::test]
async fn gap_in_chunks_aborts_transfer() {
    let server = ephemeral().await;
    let rec = Recorder::new();
    let (peer, task) = start_fetch(&server, "gappy", &rec).await;

    server
        .send_to(&Message::app(7, Some(CLIENT_ISN + 1), "x"), peer)
        .await
        .unwrap();

    let result = task.await.unwrap();
    assert!(matches!(
        result,
        Err(ClientError::OutOfOrder { got: 7, expected: 5 })
    ));
}

#[tokio::test]
async fn server_going_quiet_mid_stream_is_an_error() {
    let server = ephemeral().await;
    let rec = Recorder::new();
    let (peer, task) = start_fetch(&server, "stalls", &rec).await;

    server
        .send_to(&Message::app(5, Some(CLIENT_ISN + 1), "part"), peer)
        .await
        .unwrap();
    next_matching(&server, ack_of(5)).await;

    let result = task.await.unwrap();
    assert!(matches!(result, Err(ClientError::ServerStoppedResponding)));
}

/// A SYN in answer to the request is a protocol violation.
#[tokio::test]
async fn syn_acking_request_is_rejected() {
    let server = ephemeral().await;
    let rec = Recorder::new();
    let (peer, task) = start_fetch(&server, "odd", &rec).await;

    server
        .send_to(&Message::syn(SERVER_ISN, Some(CLIENT_ISN + 1)), peer)
        .await
        .unwrap();

    let result = task.await.unwrap();
    assert!(matches!(
        result,
        Err(ClientError::UnexpectedReply(Kind::Syn))
    ));
}

/// A request nobody acknowledges is sent six times, then the fetch fails.
#[tokio::test]
async fn unacknowledged_request_fails_fetch() {
    let server = ephemeral().await;
    let rec = Recorder::new();
    let (_, task) = start_fetch(&server, "ignored", &rec).await;

    let repeats = drain(&server, Duration::from_millis(200)).await;
    assert_eq!(repeats.len(), 5);
    assert!(repeats
        .iter()
        .all(|m| *m == Message::app(CLIENT_ISN + 1, Some(SERVER_ISN), "ignored")));

    let result = task.await.unwrap();
    assert!(matches!(result, Err(ClientError::RequestUnacknowledged)));
    assert_eq!(
        rec.count(|e| *e
            == Event::PhaseChanged {
                from: ClientPhase::Request,
                to: ClientPhase::Closed,
            }),
        1
    );
}

/// Handshake and request milestones reach the injected sink, including a
/// SYN acknowledged by something other than a SYN.
#[tokio::test]
async fn client_reports_through_its_sink() {
    let server = ephemeral().await;
    let server_addr = server.local_addr;
    let rec = Recorder::new();
    let client_rec = rec.clone();
    let task = tokio::spawn(async move {
        let socket = ephemeral().await;
        let client =
            Client::connect_with_seq(socket, server_addr, CLIENT_ISN, fast(), client_rec).await?;
        client.fetch("quiet").await
    });

    let (_, peer) = next_matching(&server, Message::is_syn).await;
    server
        .send_to(&Message::ack(SERVER_ISN, CLIENT_ISN), peer)
        .await
        .unwrap();
    next_matching(&server, Message::is_app).await;
    server
        .send_to(&Message::fin(SERVER_ISN + 1, Some(CLIENT_ISN + 1)), peer)
        .await
        .unwrap();
    next_matching(&server, Message::is_fin).await;

    assert!(task.await.unwrap().unwrap().is_empty());
    let events = rec.events();
    let position = |wanted: &Event| events.iter().position(|e| e == wanted);

    let connecting = position(&Event::Connecting {
        server: server_addr,
        isn: CLIENT_ISN,
    });
    let not_syn = position(&Event::HandshakeAckNotSyn { kind: Kind::Ack });
    let request = position(&Event::RequestSent {
        resource: "quiet".to_owned(),
    });
    let done = position(&Event::StreamComplete {
        chunks: 0,
        bytes: 0,
    });
    assert!(connecting.is_some());
    assert!(connecting < not_syn && not_syn < request && request < done);
}
