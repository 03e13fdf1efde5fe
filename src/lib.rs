//! Pilosa - HTTP boundary of the bitmap index
//!
//! Accepts queries and bit-setting traffic over HTTP, forwards it to the
//! query executor, and provides two side channels:
//! - a request archive that batches captured `/set_bits` requests into
//!   compressed, hour-partitioned log files
//! - live traffic listeners that receive every inbound and outbound cluster
//!   message as it passes through the local event bus
//!
//! # Architecture
//!
//! - **Archive**: capture middleware, fixed-size buffer and the single
//!   archive worker that owns it
//! - **Bus**: topic-based in-process publish/subscribe for cluster traffic
//! - **Hub**: per-listener relay from the bus to a frame writer
//! - **API**: axum router, handlers and listener transports
//! - **Collaborators**: executor, process registry and transport interfaces
//!
//! # Example
//!
//! ```ignore
//! use pilosa_core::{api::WebService, Collaborators, EventBus, LocalBus, ServiceConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServiceConfig::load(None)?;
//!     let bus: Arc<dyn EventBus> = Arc::new(LocalBus::new());
//!     let collaborators = Collaborators::detached(&config, bus.clone());
//!
//!     WebService::new(config, collaborators, bus).serve().await
//! }
//! ```

pub mod api;
pub mod archive;
pub mod bus;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod hub;

// Re-export commonly used types
pub use archive::{ArchiveHandle, ArchiveStats, ArchiveWorker, LogRecord};
pub use bus::{BusEvent, Envelope, EventBus, LocalBus, Message, Payload, Topic};
pub use collaborators::{Collaborators, Executor, ProcessRegistry, Transport};
pub use config::ServiceConfig;
pub use error::{PilosaError, Result};
pub use hub::{relay, BroadcastFrame, FrameWriter, RelayOutcome, RelayReport};
