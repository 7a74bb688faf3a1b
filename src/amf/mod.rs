//! AMF (Action Message Format) implementation
//!
//! AMF0 is Adobe's binary serialization format used in RTMP for encoding
//! command parameters and metadata. AMF3 is out of scope; the one place the
//! protocol can hand us an AMF3 payload (message type 17) carries a
//! single-byte format marker that the engine skips before AMF0 decoding.

pub mod amf0;
pub mod command;
pub mod value;

pub use amf0::{decode_all, decode_one, encode_all, encode_one};
pub use command::{decode_command, decode_data, encode_command, encode_data, CommandMessage};
pub use value::Amf0Value;
