//! Relay-side control plane
//!
//! [`TunnelHandler`] runs the hello/welcome handshake for each agent connection and
//! keeps the resulting [`Session`] registered for as long as the connection lives.
//! [`Session::round_trip`] relays one HTTP exchange over the session's stream.

pub mod handler;
pub mod session;

pub use handler::{HandshakeError, TunnelHandler, HANDSHAKE_TIMEOUT};
pub use session::{RelayError, Session, SessionRegistry};
