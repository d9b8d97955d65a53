//! Client registry and public request routing
//!
//! The registry maps client IDs to live sessions. The path router decides which
//! session an inbound public request belongs to and which path it is forwarded with.

pub mod path;
pub mod registry;

pub use path::{is_client_id_segment, PathRouter, Route, RouteError};
pub use registry::{ClientRegistry, SoleEntry};
