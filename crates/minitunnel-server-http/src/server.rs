//! Axum server for public tunnel traffic

use crate::rewrite::rewrite_response;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use minitunnel_control::{Session, SessionRegistry};
use minitunnel_proto::{HeaderMultimap, TunneledRequest, TunneledResponse};
use minitunnel_router::PathRouter;
use minitunnel_transport::TransportStream;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Largest request body accepted from public callers
///
/// Leaves room for base64 expansion inside a 16 MiB frame.
pub const MAX_REQUEST_BODY: usize = 12 * 1024 * 1024;

/// HTTP server errors
#[derive(Debug, Error)]
pub enum HttpServerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to bind to {address}: {reason}\n\nTroubleshooting:\n  • Check if another process is using this port: lsof -i :{port}\n  • Try using a different address or port")]
    BindError {
        address: String,
        port: u16,
        reason: String,
    },
}

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct HttpServerConfig {
    pub bind_addr: SocketAddr,
}

/// Public HTTP ingress relaying requests to registered sessions
pub struct HttpServer<S> {
    config: HttpServerConfig,
    router: PathRouter<Session<S>>,
}

impl<S> HttpServer<S>
where
    S: TransportStream + 'static,
{
    pub fn new(config: HttpServerConfig, registry: SessionRegistry<S>) -> Self {
        Self {
            config,
            router: PathRouter::new(registry),
        }
    }

    /// The axum application: every method and path goes to the relay handler
    pub fn app(&self) -> Router {
        Router::new()
            .fallback(relay_request::<S>)
            .with_state(self.router.clone())
    }

    /// Bind the configured address
    pub async fn bind(&self) -> Result<TcpListener, HttpServerError> {
        let addr = self.config.bind_addr;
        TcpListener::bind(addr)
            .await
            .map_err(|e| HttpServerError::BindError {
                address: addr.ip().to_string(),
                port: addr.port(),
                reason: e.to_string(),
            })
    }

    /// Bind and serve until the process stops
    pub async fn start(self) -> Result<(), HttpServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve(self, listener: TcpListener) -> Result<(), HttpServerError> {
        info!("HTTP server listening on {}", listener.local_addr()?);

        axum::serve(listener, self.app()).await?;
        Ok(())
    }
}

async fn relay_request<S>(
    State(router): State<PathRouter<Session<S>>>,
    request: Request,
) -> Response
where
    S: TransportStream + 'static,
{
    let (parts, body) = request.into_parts();
    let path = parts.uri.path();

    let route = match router.route(path, parts.uri.query()) {
        Ok(route) => route,
        Err(e) => {
            debug!("No route for {} {}: {}", parts.method, path, e);
            return error_response(e.status_code(), &e.to_string());
        }
    };

    let body = match axum::body::to_bytes(body, MAX_REQUEST_BODY).await {
        Ok(body) => body,
        Err(e) => {
            warn!("Error reading request body for {}: {}", route.client_id, e);
            return error_response(500, "Error reading request body");
        }
    };

    let tunneled = TunneledRequest {
        method: parts.method.to_string(),
        path: route.forwarded_path,
        headers: collect_headers(&parts.headers),
        body: body.to_vec(),
    };

    debug!(
        "Relaying {} {} to {}",
        tunneled.method, tunneled.path, route.client_id
    );

    match Arc::clone(&route.session).relay(tunneled).await {
        Ok(response) => build_response(rewrite_response(&route.client_id, response)),
        Err(e) => {
            warn!("Relay to {} failed: {}", route.client_id, e);
            error_response(e.status_code(), e.public_message())
        }
    }
}

fn collect_headers(headers: &axum::http::HeaderMap) -> HeaderMultimap {
    let mut collected = HeaderMultimap::new();
    for (name, value) in headers {
        collected
            .entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    collected
}

fn build_response(tunneled: TunneledResponse) -> Response {
    let Ok(status) = StatusCode::from_u16(tunneled.status_code) else {
        warn!("Agent returned invalid status code {}", tunneled.status_code);
        return error_response(502, "Invalid response from agent");
    };

    let mut response = Response::new(Body::from(tunneled.body));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    for (name, values) in tunneled.headers {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            debug!("Dropping invalid header name {:?}", name);
            continue;
        };
        for value in values {
            match HeaderValue::from_str(&value) {
                Ok(value) => {
                    headers.append(name.clone(), value);
                }
                Err(_) => debug!("Dropping invalid value for header {}", name),
            }
        }
    }

    response
}

fn error_response(status: u16, message: &str) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    (status, format!("{}\n", message)).into_response()
}
