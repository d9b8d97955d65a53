//! Tunnel agent
//!
//! Connects to a relay, performs the hello/welcome handshake and then answers
//! relayed requests by replaying them against a local HTTP service.

pub mod agent;
pub mod config;
pub mod forwarder;
pub mod heartbeat;

pub use agent::{Agent, AgentError, Tunnel, WELCOME_TIMEOUT};
pub use config::{AgentConfig, ConfigError, DEFAULT_RELAY_PORT};
pub use forwarder::{ForwardError, LocalForwarder};
pub use heartbeat::{run_heartbeat, HEARTBEAT_INTERVAL};
