//! RTMP wire protocol implementation
//!
//! This module handles the protocol details:
//! - Handshake digests (simple echo and HMAC-SHA256 schemes)
//! - Chunk stream multiplexing and reassembly
//! - Message dispatch, command routing and outbound replies

pub mod chunk;
pub mod constants;
pub mod engine;
pub mod handshake;

pub use chunk::{chunks_create, ChunkParser, OutboundMessage, RtmpMessage};
pub use engine::{ConnectRequest, RtmpEngine, SessionHandler};
