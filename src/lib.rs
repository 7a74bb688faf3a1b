//! livehub: live-media ingest and distribution engine
//!
//! This library implements the protocol core of an RTMP/HTTP-FLV media
//! server:
//! - RTMP handshake (simple and digest-based) and chunk stream parsing
//! - AMF0 command/data codec used by the RTMP control channel
//! - FLV tag parsing/muxing shared by both transports
//! - Per-stream broadcast hubs with GOP caching for instant playback start
//!
//! The protocol engines are pure state machines: they consume bytes and
//! produce bytes, packets and lifecycle callbacks, but never touch a socket
//! themselves. Transport adapters in [`session`] own the I/O and drive the
//! engines.
//!
//! # Example: RTMP Server
//!
//! ```no_run
//! use std::sync::Arc;
//! use livehub::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Arc::new(Server::new(ServerConfig::default()));
//!     livehub::server::run_rtmp_listener(server).await?;
//!     Ok(())
//! }
//! ```

pub mod amf;
pub mod broadcast;
pub mod error;
pub mod media;
pub mod protocol;
pub mod server;
pub mod session;

// Re-export main types for convenience
pub use broadcast::BroadcastHub;
pub use error::{Error, Result};
pub use media::{AvPacket, PacketFlags};
pub use server::{AuthConfig, Server, ServerConfig};
pub use session::{Event, EventKind, Protocol, SessionInfo};
