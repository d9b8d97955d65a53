//! Handshake and session lifecycle over the in-memory transport

use minitunnel_control::{HandshakeError, SessionRegistry, TunnelHandler};
use minitunnel_proto::{TunnelMessage, TunneledRequest, TunneledResponse};
use minitunnel_router::is_client_id_segment;
use minitunnel_transport::memory::{connection_pair, MemoryConnection, MemoryStream};
use minitunnel_transport::{TransportConnection, TransportStream};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;

fn peer() -> SocketAddr {
    "127.0.0.1:50000".parse().unwrap()
}

fn spawn_handler(
    registry: SessionRegistry<MemoryStream>,
) -> (MemoryConnection, JoinHandle<Result<(), HandshakeError>>) {
    let handler = TunnelHandler::new(registry, 8081).with_public_host("relay.test");
    let (agent_conn, relay_conn) = connection_pair();
    let relay_conn = Arc::new(relay_conn);

    let task = tokio::spawn(async move { handler.handle_connection(relay_conn, peer()).await });
    (agent_conn, task)
}

#[tokio::test]
async fn test_handshake_registers_session_until_disconnect() {
    let registry = SessionRegistry::<MemoryStream>::new();
    let (agent_conn, task) = spawn_handler(registry.clone());

    let mut stream = agent_conn.open_stream().await.unwrap();
    stream.send_message(&TunnelMessage::Hello {}).await.unwrap();

    let welcome = match timeout(Duration::from_secs(5), stream.recv_message())
        .await
        .expect("no welcome")
        .unwrap()
    {
        Some(TunnelMessage::Welcome(info)) => info,
        other => panic!("Expected welcome, got {:?}", other),
    };

    assert_eq!(welcome.client_id.len(), 36);
    assert!(is_client_id_segment(&welcome.client_id));
    assert_eq!(
        welcome.tunnel_url,
        format!("http://relay.test:8081/{}", welcome.client_id)
    );
    assert!(registry.contains(&welcome.client_id));

    // The registered session talks to this agent's stream
    let session = registry.get(&welcome.client_id).unwrap();
    assert_eq!(session.id(), welcome.client_id);

    let agent = tokio::spawn(async move {
        let request = match stream.recv_message().await.unwrap() {
            Some(TunnelMessage::Request(request)) => request,
            other => panic!("Expected request, got {:?}", other),
        };
        stream
            .send_message(&TunnelMessage::Response(TunneledResponse {
                status_code: 201,
                body: request.path.into_bytes(),
                ..Default::default()
            }))
            .await
            .unwrap();
        stream
    });

    let response = session
        .round_trip(TunneledRequest {
            method: "POST".to_string(),
            path: "/items?x=1".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(response.status_code, 201);
    assert_eq!(response.body, b"/items?x=1");
    let _stream = agent.await.unwrap();

    agent_conn.close(0, "bye").await;

    timeout(Duration::from_secs(5), task)
        .await
        .expect("handler did not return")
        .unwrap()
        .unwrap();
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_each_connection_gets_a_fresh_id() {
    let registry = SessionRegistry::<MemoryStream>::new();
    let mut ids = Vec::new();
    let mut connections = Vec::new();

    for _ in 0..3 {
        let (agent_conn, _task) = spawn_handler(registry.clone());
        let mut stream = agent_conn.open_stream().await.unwrap();
        stream.send_message(&TunnelMessage::Hello {}).await.unwrap();
        match stream.recv_message().await.unwrap() {
            Some(TunnelMessage::Welcome(info)) => ids.push(info.client_id),
            other => panic!("Expected welcome, got {:?}", other),
        }
        connections.push((agent_conn, stream));
    }

    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 3);
    assert_eq!(registry.len(), 3);
}

#[tokio::test]
async fn test_wrong_first_message_is_rejected() {
    let registry = SessionRegistry::<MemoryStream>::new();
    let (agent_conn, task) = spawn_handler(registry.clone());

    let mut stream = agent_conn.open_stream().await.unwrap();
    stream
        .send_message(&TunnelMessage::Heartbeat {})
        .await
        .unwrap();

    let result = task.await.unwrap();
    assert!(matches!(result, Err(HandshakeError::UnexpectedMessage(_))));
    assert!(registry.is_empty());
    assert!(agent_conn.is_closed());
}

#[tokio::test]
async fn test_connection_closed_before_hello() {
    let registry = SessionRegistry::<MemoryStream>::new();
    let (agent_conn, task) = spawn_handler(registry.clone());

    agent_conn.close(0, "changed my mind").await;

    let result = task.await.unwrap();
    assert!(matches!(result, Err(HandshakeError::ClosedBeforeHello)));
    assert!(registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_no_stream_times_out() {
    let registry = SessionRegistry::<MemoryStream>::new();
    let (agent_conn, task) = spawn_handler(registry.clone());

    let result = task.await.unwrap();
    assert!(matches!(result, Err(HandshakeError::Timeout)));
    assert!(registry.is_empty());
    assert!(agent_conn.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_silent_stream_times_out() {
    let registry = SessionRegistry::<MemoryStream>::new();
    let (agent_conn, task) = spawn_handler(registry.clone());

    let _stream = agent_conn.open_stream().await.unwrap();

    let started = tokio::time::Instant::now();
    let result = task.await.unwrap();
    assert!(matches!(result, Err(HandshakeError::Timeout)));
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert!(registry.is_empty());
}
