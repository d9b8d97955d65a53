//! Agent behaviour against an in-memory relay and a real local HTTP service

use axum::body::Bytes;
use axum::http::{HeaderMap, Method, Uri};
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use minitunnel_client::{Agent, AgentConfig, AgentError};
use minitunnel_proto::{
    HeaderMultimap, MessageType, TunnelMessage, TunneledRequest, TunneledResponse, WelcomeInfo,
};
use minitunnel_transport::memory::{connection_pair, MemoryConnection, MemoryStream};
use minitunnel_transport::{TransportConnection, TransportStream};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;

const CLIENT_ID: &str = "0f8fad5b-d9cb-469f-a165-70867728950e";

async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-")
            .to_string()
    };
    format!(
        "{} {} host={} x-custom={} body={}",
        method,
        uri,
        header("host"),
        header("x-custom"),
        String::from_utf8_lossy(&body)
    )
}

async fn start_local_service() -> SocketAddr {
    let app = Router::new()
        .route("/page", get(|| async { Html("<html><head></head></html>") }))
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        )
        .fallback(echo);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn unused_local_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Accept the agent's stream, check hello and send a welcome
async fn accept_agent(relay: &MemoryConnection) -> MemoryStream {
    let mut stream = relay.accept_stream().await.unwrap().unwrap();
    assert_eq!(
        stream.recv_message().await.unwrap(),
        Some(TunnelMessage::Hello {})
    );
    stream
        .send_message(&TunnelMessage::Welcome(WelcomeInfo {
            client_id: CLIENT_ID.to_string(),
            tunnel_url: format!("http://localhost:8081/{}", CLIENT_ID),
        }))
        .await
        .unwrap();
    stream
}

/// Read until a response arrives, skipping heartbeats
async fn next_response(stream: &mut MemoryStream) -> TunneledResponse {
    loop {
        match stream.recv_message().await.unwrap() {
            Some(TunnelMessage::Response(response)) => return response,
            Some(TunnelMessage::Heartbeat {}) => continue,
            other => panic!("Expected response, got {:?}", other),
        }
    }
}

fn request(method: &str, path: &str) -> TunneledRequest {
    TunneledRequest {
        method: method.to_string(),
        path: path.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_forwards_request_to_local_service() {
    let local = start_local_service().await;
    let agent = Agent::new(AgentConfig::new("relay:8080", local.to_string())).unwrap();
    let (agent_conn, relay_conn) = connection_pair();

    let running = tokio::spawn(async move { agent.run_on(&agent_conn).await });
    let mut stream = accept_agent(&relay_conn).await;

    let mut headers = HeaderMultimap::new();
    headers.insert("Host".to_string(), vec!["public.example.com".to_string()]);
    headers.insert("X-Custom".to_string(), vec!["a".to_string()]);
    headers.insert("Content-Length".to_string(), vec!["2".to_string()]);
    stream
        .send_message(&TunnelMessage::Request(TunneledRequest {
            headers,
            body: b"hi".to_vec(),
            ..request("POST", "/submit?x=1")
        }))
        .await
        .unwrap();

    let response = next_response(&mut stream).await;
    assert_eq!(response.status_code, 200);
    assert_eq!(
        String::from_utf8(response.body).unwrap(),
        format!("POST /submit?x=1 host={} x-custom=a body=hi", local)
    );

    // Relay finishing the stream ends the agent cleanly
    stream.finish().await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("agent did not stop")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_response_headers_are_returned() {
    let local = start_local_service().await;
    let agent = Agent::new(AgentConfig::new("relay:8080", local.to_string())).unwrap();
    let (agent_conn, relay_conn) = connection_pair();

    tokio::spawn(async move { agent.run_on(&agent_conn).await });
    let mut stream = accept_agent(&relay_conn).await;

    stream
        .send_message(&TunnelMessage::Request(request("GET", "/page")))
        .await
        .unwrap();

    let response = next_response(&mut stream).await;
    assert_eq!(response.status_code, 200);
    let content_type = response.header_values("content-type").unwrap();
    assert!(content_type[0].starts_with("text/html"));
    assert_eq!(response.body, b"<html><head></head></html>");
}

#[tokio::test]
async fn test_unreachable_local_service_is_bad_gateway() {
    let local = unused_local_addr().await;
    let agent = Agent::new(AgentConfig::new("relay:8080", local.to_string())).unwrap();
    let (agent_conn, relay_conn) = connection_pair();

    tokio::spawn(async move { agent.run_on(&agent_conn).await });
    let mut stream = accept_agent(&relay_conn).await;

    stream
        .send_message(&TunnelMessage::Request(request("GET", "/")))
        .await
        .unwrap();

    let response = next_response(&mut stream).await;
    assert_eq!(response.status_code, 502);
    assert!(String::from_utf8_lossy(&response.body).starts_with("Error: "));
}

#[tokio::test]
async fn test_slow_local_service_times_out() {
    let local = start_local_service().await;
    let config = AgentConfig::new("relay:8080", local.to_string())
        .with_forward_timeout(Duration::from_millis(200));
    let agent = Agent::new(config).unwrap();
    let (agent_conn, relay_conn) = connection_pair();

    tokio::spawn(async move { agent.run_on(&agent_conn).await });
    let mut stream = accept_agent(&relay_conn).await;

    stream
        .send_message(&TunnelMessage::Request(request("GET", "/slow")))
        .await
        .unwrap();

    let response = tokio::time::timeout(Duration::from_secs(3), next_response(&mut stream))
        .await
        .expect("forward timeout not applied");
    assert_eq!(response.status_code, 502);
}

#[tokio::test]
async fn test_unexpected_messages_are_skipped() {
    let local = start_local_service().await;
    let agent = Agent::new(AgentConfig::new("relay:8080", local.to_string())).unwrap();
    let (agent_conn, relay_conn) = connection_pair();

    tokio::spawn(async move { agent.run_on(&agent_conn).await });
    let mut stream = accept_agent(&relay_conn).await;

    stream
        .send_message(&TunnelMessage::Heartbeat {})
        .await
        .unwrap();
    stream
        .send_message(&TunnelMessage::Response(TunneledResponse::default()))
        .await
        .unwrap();
    stream
        .send_message(&TunnelMessage::Request(request("GET", "/still-alive")))
        .await
        .unwrap();

    let response = next_response(&mut stream).await;
    assert_eq!(response.status_code, 200);
    assert!(String::from_utf8_lossy(&response.body).starts_with("GET /still-alive"));
}

#[tokio::test]
async fn test_heartbeats_share_the_stream_with_responses() {
    let local = start_local_service().await;
    let config = AgentConfig::new("relay:8080", local.to_string())
        .with_heartbeat_interval(Duration::from_millis(20));
    let agent = Agent::new(config).unwrap();
    let (agent_conn, relay_conn) = connection_pair();

    tokio::spawn(async move { agent.run_on(&agent_conn).await });
    let mut stream = accept_agent(&relay_conn).await;

    let first = tokio::time::timeout(Duration::from_secs(2), stream.recv_message())
        .await
        .expect("no heartbeat")
        .unwrap();
    assert_eq!(first, Some(TunnelMessage::Heartbeat {}));

    for i in 0..5 {
        let path = format!("/req/{}", i);
        stream
            .send_message(&TunnelMessage::Request(request("GET", &path)))
            .await
            .unwrap();
        let response = next_response(&mut stream).await;
        assert!(String::from_utf8_lossy(&response.body).starts_with(&format!("GET {}", path)));
        tokio::time::sleep(Duration::from_millis(15)).await;
    }
}

#[tokio::test]
async fn test_non_welcome_reply_fails_handshake() {
    let agent = Agent::new(AgentConfig::new("relay:8080", "localhost:3000")).unwrap();
    let (agent_conn, relay_conn) = connection_pair();

    let relay = tokio::spawn(async move {
        let mut stream = relay_conn.accept_stream().await.unwrap().unwrap();
        stream.recv_message().await.unwrap();
        stream
            .send_message(&TunnelMessage::Heartbeat {})
            .await
            .unwrap();
        stream
    });

    let err = agent.establish(&agent_conn).await.unwrap_err();
    assert!(matches!(
        err,
        AgentError::UnexpectedMessage(MessageType::Heartbeat)
    ));
    relay.await.unwrap();
}

#[tokio::test]
async fn test_relay_finishing_before_welcome() {
    let agent = Agent::new(AgentConfig::new("relay:8080", "localhost:3000")).unwrap();
    let (agent_conn, relay_conn) = connection_pair();

    tokio::spawn(async move {
        let mut stream = relay_conn.accept_stream().await.unwrap().unwrap();
        stream.recv_message().await.unwrap();
        stream.finish().await.unwrap();
        // Keep the receiving side open until the agent has read the end of stream
        tokio::time::sleep(Duration::from_secs(1)).await;
    });

    let err = agent.establish(&agent_conn).await.unwrap_err();
    assert!(matches!(err, AgentError::ClosedBeforeWelcome));
}

#[tokio::test(start_paused = true)]
async fn test_silent_relay_times_out() {
    let agent = Agent::new(AgentConfig::new("relay:8080", "localhost:3000")).unwrap();
    let (agent_conn, relay_conn) = connection_pair();

    let relay = tokio::spawn(async move {
        let mut stream = relay_conn.accept_stream().await.unwrap().unwrap();
        stream.recv_message().await.unwrap();
        // Hold the stream open without answering
        tokio::time::sleep(Duration::from_secs(60)).await;
        drop(stream);
    });

    let err = agent.establish(&agent_conn).await.unwrap_err();
    assert!(matches!(err, AgentError::HandshakeTimeout));
    relay.abort();
}

#[test]
fn test_invalid_config_is_rejected() {
    let err = Agent::new(AgentConfig::new("", "localhost:3000")).unwrap_err();
    assert!(matches!(err, AgentError::Config(_)));
}
