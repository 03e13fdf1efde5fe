//! HTTP API
//!
//! Provides:
//! - Query, batch import and set-bit endpoints forwarding to the executor
//! - Cluster introspection (processes, ping, status page)
//! - Live traffic listeners over WebSocket and chunked NDJSON
//! - Request archiving for `/set_bits`

pub mod error;
pub mod handlers;
pub mod pages;
pub mod server;
pub mod transport;

pub use error::ApiError;
pub use server::{AppState, WebService};
pub use transport::{serve_socket, stream_response, SocketWriter, StreamWriter};
