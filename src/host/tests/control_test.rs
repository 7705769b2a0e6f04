use crate::event::{EventReceiver, SessionEvent};
use crate::host::control::{ControlServer, LineReceiver};
use crate::proto::Event;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

struct TestServer {
    server: Arc<ControlServer>,
    line_rx: LineReceiver,
    events: EventReceiver,
    token: CancellationToken,
}

async fn start_server() -> TestServer {
    let (event_sender, _) = tokio::sync::broadcast::channel(64);
    let (line_tx, line_rx) = tokio::sync::mpsc::unbounded_channel();
    let token = CancellationToken::new();
    let server = Arc::new(
        ControlServer::bind(
            "127.0.0.1:0".parse().unwrap(),
            token.clone(),
            event_sender.clone(),
            line_tx,
        )
        .await
        .unwrap(),
    );
    let events = event_sender.subscribe();
    let serve = server.clone();
    tokio::spawn(async move { serve.serve().await });
    TestServer {
        server,
        line_rx,
        events,
        token,
    }
}

async fn wait_for_count(events: &mut EventReceiver, expected: usize) {
    timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await.unwrap() {
                SessionEvent::ClientCount(count) if count == expected => break,
                _ => continue,
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("client count never reached {}", expected));
}

async fn read_line(reader: &mut BufReader<TcpStream>) -> String {
    let mut line = String::new();
    timeout(Duration::from_secs(2), reader.read_line(&mut line))
        .await
        .expect("no line from server")
        .unwrap();
    line.trim_end().to_string()
}

#[tokio::test]
async fn test_broadcast_reaches_every_client_verbatim() {
    let mut ts = start_server().await;
    let addr = ts.server.local_addr();

    let mut first = BufReader::new(TcpStream::connect(addr).await.unwrap());
    let mut second = BufReader::new(TcpStream::connect(addr).await.unwrap());
    wait_for_count(&mut ts.events, 2).await;

    ts.server.broadcast(&Event::Notification {
        app: "Mail".to_string(),
        title: "New message".to_string(),
        text: "Hello".to_string(),
    });

    let expected = "NOTIFICATION:Mail|New message|Hello";
    assert_eq!(read_line(&mut first).await, expected);
    assert_eq!(read_line(&mut second).await, expected);

    ts.token.cancel();
}

#[tokio::test]
async fn test_commands_arrive_in_order() {
    let mut ts = start_server().await;
    let addr = ts.server.local_addr();

    let mut client = TcpStream::connect(addr).await.unwrap();
    wait_for_count(&mut ts.events, 1).await;

    client.write_all(b"ANSWER\nEND_CALL\nMUTE\n").await.unwrap();

    for expected in ["ANSWER", "END_CALL", "MUTE"] {
        let line = timeout(Duration::from_secs(2), ts.line_rx.recv())
            .await
            .expect("no command line")
            .unwrap();
        assert_eq!(line, expected);
    }

    ts.token.cancel();
}

#[tokio::test]
async fn test_broadcast_survives_dead_client() {
    let mut ts = start_server().await;
    let addr = ts.server.local_addr();

    let first = TcpStream::connect(addr).await.unwrap();
    let mut second = BufReader::new(TcpStream::connect(addr).await.unwrap());
    wait_for_count(&mut ts.events, 2).await;

    // first client goes away; its reader deregisters the writer
    drop(first);
    wait_for_count(&mut ts.events, 1).await;

    ts.server.broadcast(&Event::Status("still here".to_string()));
    assert_eq!(read_line(&mut second).await, "STATUS:still here");

    ts.token.cancel();
}

#[tokio::test]
async fn test_broadcast_continues_past_failed_writer() {
    let mut ts = start_server().await;
    let addr = ts.server.local_addr();

    let first = TcpStream::connect(addr).await.unwrap();
    let mut second = BufReader::new(TcpStream::connect(addr).await.unwrap());
    wait_for_count(&mut ts.events, 2).await;

    // close abruptly and broadcast before the deregistration settles; the
    // surviving client still gets every line
    drop(first);
    ts.server.broadcast(&Event::CallIdle);
    ts.server.broadcast(&Event::Status("after".to_string()));

    assert_eq!(read_line(&mut second).await, "CALL_IDLE");
    assert_eq!(read_line(&mut second).await, "STATUS:after");

    ts.token.cancel();
}
