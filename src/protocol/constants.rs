//! RTMP protocol constants
//!
//! Reference: Adobe RTMP Specification (December 2012)

/// RTMP version number (always 3 for plain RTMP)
pub const RTMP_VERSION: u8 = 3;

/// Default RTMP port
pub const RTMP_PORT: u16 = 1935;

/// C1/C2/S1/S2 handshake payload size
pub const HANDSHAKE_SIZE: usize = 1536;

/// Default chunk size until a Set Chunk Size message arrives
pub const DEFAULT_CHUNK_SIZE: u32 = 128;

/// Outbound chunk size advertised to peers
pub const OUT_CHUNK_SIZE: u32 = 0xFFFF;

/// Maximum reassembled message size (sanity limit, within the 24-bit
/// length field's range)
pub const MAX_MESSAGE_SIZE: u32 = 8 * 1024 * 1024;

/// Largest possible chunk header: 3-byte basic header + 11-byte message
/// header + 4-byte extended timestamp
pub const MAX_CHUNK_HEADER: usize = 18;

/// Message header sizes indexed by chunk fmt
pub const RTMP_HEADER_SIZE: [usize; 4] = [11, 7, 3, 0];

// ============================================================================
// Chunk Stream IDs (cid)
// ============================================================================

/// Protocol control messages
pub const CHANNEL_PROTOCOL: u32 = 2;

/// Command messages (connect, publish, onStatus, ...)
pub const CHANNEL_INVOKE: u32 = 3;

/// Audio data
pub const CHANNEL_AUDIO: u32 = 4;

/// Video data
pub const CHANNEL_VIDEO: u32 = 5;

/// Script data
pub const CHANNEL_DATA: u32 = 6;

// ============================================================================
// Chunk Header Format Types (fmt)
// ============================================================================

/// Type 0: full header - timestamp, length, type, stream id
pub const CHUNK_TYPE_0: u8 = 0;

/// Type 1: timestamp delta, length, type
pub const CHUNK_TYPE_1: u8 = 1;

/// Type 2: timestamp delta only
pub const CHUNK_TYPE_2: u8 = 2;

/// Type 3: pure continuation, inherits everything
pub const CHUNK_TYPE_3: u8 = 3;

// ============================================================================
// Message Type IDs
// ============================================================================

/// Set Chunk Size (1) - protocol control
pub const TYPE_SET_CHUNK_SIZE: u8 = 1;

/// Abort Message (2) - protocol control
pub const TYPE_ABORT: u8 = 2;

/// Acknowledgement (3) - protocol control
pub const TYPE_ACKNOWLEDGEMENT: u8 = 3;

/// User Control Message (4)
pub const TYPE_EVENT: u8 = 4;

/// Window Acknowledgement Size (5) - protocol control
pub const TYPE_WINDOW_ACK_SIZE: u8 = 5;

/// Set Peer Bandwidth (6) - protocol control
pub const TYPE_SET_PEER_BANDWIDTH: u8 = 6;

/// Audio Message (8)
pub const TYPE_AUDIO: u8 = 8;

/// Video Message (9)
pub const TYPE_VIDEO: u8 = 9;

/// AMF3 Data Message (15)
pub const TYPE_FLEX_STREAM: u8 = 15;

/// AMF3 Command Message (17)
pub const TYPE_FLEX_MESSAGE: u8 = 17;

/// AMF0 Data Message (18) - @setDataFrame, onMetaData
pub const TYPE_DATA: u8 = 18;

/// AMF0 Command Message (20) - connect, play, publish, ...
pub const TYPE_INVOKE: u8 = 20;

// ============================================================================
// User Control Event Types
// ============================================================================

/// Stream Begin - sent when a play stream becomes functional
pub const STREAM_BEGIN: u16 = 0;

// ============================================================================
// Status Codes
// ============================================================================

pub const NC_CONNECT_SUCCESS: &str = "NetConnection.Connect.Success";

pub const NS_PUBLISH_START: &str = "NetStream.Publish.Start";
pub const NS_PLAY_RESET: &str = "NetStream.Play.Reset";
pub const NS_PLAY_START: &str = "NetStream.Play.Start";

// ============================================================================
// Default Server Settings
// ============================================================================

/// Window acknowledgement size sent on connect
pub const DEFAULT_WINDOW_ACK_SIZE: u32 = 5_000_000;

/// Peer bandwidth sent on connect
pub const DEFAULT_PEER_BANDWIDTH: u32 = 5_000_000;

/// Peer bandwidth limit type: dynamic
pub const BANDWIDTH_LIMIT_DYNAMIC: u8 = 2;
