//! Media handling
//!
//! This module provides:
//! - The normalized [`AvPacket`] unit both protocol engines emit
//! - Incremental FLV byte-stream parsing with fragment-safe state
//! - FLV tag classification (codec headers, keyframes, metadata)
//! - FLV header/tag muxing for subscriber output

pub mod flv;
pub mod packet;

pub use flv::{create_header, create_message, parse_tag, FlvParser};
pub use packet::{AvPacket, PacketFlags};
