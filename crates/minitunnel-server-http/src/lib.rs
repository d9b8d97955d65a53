//! Public HTTP ingress of the relay
//!
//! Every inbound request is routed to a session by path, relayed to the agent in
//! one round trip, and the agent's response is rewritten for the path-prefixed
//! tunnel URL before it is returned.

pub mod rewrite;
pub mod server;

pub use rewrite::{base_tag, inject_base_tag, rewrite_response};
pub use server::{HttpServer, HttpServerConfig, HttpServerError, MAX_REQUEST_BODY};
