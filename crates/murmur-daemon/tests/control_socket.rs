//! Control-protocol tests over a real Unix socket.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::timeout;

use murmur_core::control::{self, ControlRequest, ControlResponse, ErrorCode};
use murmur_core::wire::ChatMessage;
use murmur_core::{Address, ADDRESS_DIGEST_LEN};
use murmur_daemon::mem::{MemoryBus, MemoryConnector};
use murmur_daemon::{server, Daemon, DaemonConfig};

const URL: &str = "mem://bus";

fn addr(seed: u8) -> Address {
    Address::from_digest(&[seed; ADDRESS_DIGEST_LEN])
}

/// Bind a daemon and its control server inside `dir`.
fn start_daemon(bus: &MemoryBus, dir: &Path, name: &str) -> PathBuf {
    let socket = dir.join(name);
    let config = DaemonConfig::new()
        .socket_path(&socket)
        .ping_interval(Duration::from_millis(5))
        .dial_timeout(Some(Duration::from_millis(300)));
    let listener = server::bind(&socket).unwrap();
    let daemon = Arc::new(Daemon::with_connector(
        config,
        Box::new(MemoryConnector::new(bus.clone())),
    ));
    tokio::spawn(server::serve(daemon, listener));
    socket
}

async fn request(socket: &Path, request: &ControlRequest) -> ControlResponse {
    let mut stream = UnixStream::connect(socket).await.unwrap();
    stream
        .write_all(control::to_line(request).unwrap().as_bytes())
        .await
        .unwrap();
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    timeout(Duration::from_secs(2), reader.read_line(&mut line))
        .await
        .expect("no response within 2s")
        .unwrap();
    control::from_line(&line).unwrap()
}

fn assert_ok(response: ControlResponse) {
    assert!(matches!(response, ControlResponse::Ok), "got {response:?}");
}

fn assert_code(response: ControlResponse, expected: ErrorCode) {
    match response {
        ControlResponse::Error { code, .. } => assert_eq!(code, expected),
        other => panic!("expected {expected:?}, got {other:?}"),
    }
}

#[tokio::test]
async fn state_machine_codes_over_the_socket() {
    let dir = tempfile::tempdir().unwrap();
    let bus = MemoryBus::new();
    let socket = start_daemon(&bus, dir.path(), "a.sock");

    // Offline while Down is a no-op.
    assert_ok(request(&socket, &ControlRequest::Offline).await);

    // Send while Down: no chat.
    assert_code(
        request(&socket, &ControlRequest::Send).await,
        ErrorCode::NoChat,
    );

    assert_ok(
        request(
            &socket,
            &ControlRequest::Online {
                nats_url: URL.into(),
                sender_address: addr(1),
            },
        )
        .await,
    );
    assert_code(
        request(
            &socket,
            &ControlRequest::Online {
                nats_url: URL.into(),
                sender_address: addr(1),
            },
        )
        .await,
        ErrorCode::AlreadyOnline,
    );

    // Nobody answers on addr(9).
    assert_code(
        request(
            &socket,
            &ControlRequest::CreateChat {
                recipient_address: addr(9),
            },
        )
        .await,
        ErrorCode::RecipientOffline,
    );

    // DeleteChat without a chat succeeds.
    assert_ok(
        request(
            &socket,
            &ControlRequest::DeleteChat {
                recipient_address: addr(9),
            },
        )
        .await,
    );

    assert_ok(request(&socket, &ControlRequest::Offline).await);
    assert_eq!(bus.subscription_count(), 0);
}

#[tokio::test]
async fn malformed_requests_get_an_error_response() {
    let dir = tempfile::tempdir().unwrap();
    let bus = MemoryBus::new();
    let socket = start_daemon(&bus, dir.path(), "a.sock");

    let mut stream = UnixStream::connect(&socket).await.unwrap();
    stream.write_all(b"this is not json\n").await.unwrap();
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    timeout(Duration::from_secs(2), reader.read_line(&mut line))
        .await
        .expect("no response within 2s")
        .unwrap();
    assert_code(control::from_line(&line).unwrap(), ErrorCode::Internal);
}

/// End to end over two sockets: online, dial, chat, remote teardown.
#[tokio::test]
async fn two_daemons_chat_over_their_sockets() {
    let dir = tempfile::tempdir().unwrap();
    let bus = MemoryBus::new();
    let socket_a = start_daemon(&bus, dir.path(), "a.sock");
    let socket_b = start_daemon(&bus, dir.path(), "b.sock");

    for (socket, address) in [(&socket_a, addr(1)), (&socket_b, addr(2))] {
        assert_ok(
            request(
                socket,
                &ControlRequest::Online {
                    nats_url: URL.into(),
                    sender_address: address,
                },
            )
            .await,
        );
    }
    assert_ok(
        request(
            &socket_a,
            &ControlRequest::CreateChat {
                recipient_address: addr(2),
            },
        )
        .await,
    );
    assert_ok(
        request(
            &socket_b,
            &ControlRequest::CreateChat {
                recipient_address: addr(1),
            },
        )
        .await,
    );

    // Attach a Send stream on each side.
    let mut stream_a = UnixStream::connect(&socket_a).await.unwrap();
    stream_a
        .write_all(control::to_line(&ControlRequest::Send).unwrap().as_bytes())
        .await
        .unwrap();
    let (read_a, mut write_a) = stream_a.into_split();
    let mut lines_a = BufReader::new(read_a).lines();
    let first = lines_a.next_line().await.unwrap().unwrap();
    assert!(matches!(
        control::from_line::<ControlResponse>(&first).unwrap(),
        ControlResponse::Ok
    ));

    let mut stream_b = UnixStream::connect(&socket_b).await.unwrap();
    stream_b
        .write_all(control::to_line(&ControlRequest::Send).unwrap().as_bytes())
        .await
        .unwrap();
    let (read_b, mut write_b) = stream_b.into_split();
    let mut lines_b = BufReader::new(read_b).lines();
    let first = lines_b.next_line().await.unwrap().unwrap();
    assert!(matches!(
        control::from_line::<ControlResponse>(&first).unwrap(),
        ControlResponse::Ok
    ));

    // a → b
    let hello = ChatMessage {
        time: 1_700_000_000_001,
        text: "over the socket".into(),
    };
    write_a
        .write_all(control::to_line(&hello).unwrap().as_bytes())
        .await
        .unwrap();
    let line = timeout(Duration::from_secs(2), lines_b.next_line())
        .await
        .expect("no chat message within 2s")
        .unwrap()
        .unwrap();
    let received: ChatMessage = control::from_line(&line).unwrap();
    assert_eq!(received, hello);

    // b → a
    let reply = ChatMessage {
        time: 1_700_000_000_002,
        text: "ack".into(),
    };
    write_b
        .write_all(control::to_line(&reply).unwrap().as_bytes())
        .await
        .unwrap();
    let line = timeout(Duration::from_secs(2), lines_a.next_line())
        .await
        .expect("no chat message within 2s")
        .unwrap()
        .unwrap();
    assert_eq!(control::from_line::<ChatMessage>(&line).unwrap(), reply);

    // b hangs up; a's daemon auto-closes its side once the offline
    // notice lands.
    write_b.shutdown().await.unwrap();
    assert_ok(
        request(
            &socket_b,
            &ControlRequest::DeleteChat {
                recipient_address: addr(1),
            },
        )
        .await,
    );

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        match request(&socket_a, &ControlRequest::Send).await {
            ControlResponse::Error {
                code: ErrorCode::NoChat,
                ..
            } => break,
            _ if tokio::time::Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            other => panic!("chat was not auto-closed, got {other:?}"),
        }
    }
}
