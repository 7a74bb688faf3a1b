//! RTMP chunk stream codec
//!
//! RTMP messages are split into chunks so that audio, video and command
//! traffic can interleave on one connection. Each chunk opens with a basic
//! header carrying the chunk format and chunk-stream id:
//!
//! ```text
//! +-------------+----------------+-------------------+-----------+
//! | Basic Header| Message Header | Extended Timestamp| Chunk Data|
//! | (1-3 bytes) | (0,3,7,11 bytes)| (0 or 4 bytes)   | (variable)|
//! +-------------+----------------+-------------------+-----------+
//!
//! Message header contents by fmt:
//! - Type 0 (11 bytes): timestamp(3) + length(3) + type(1) + stream_id(4 LE)
//! - Type 1 (7 bytes):  timestamp delta(3) + length(3) + type(1)
//! - Type 2 (3 bytes):  timestamp delta(3)
//! - Type 3 (0 bytes):  continuation, all fields inherited
//! ```
//!
//! A 24-bit timestamp of exactly 0xFFFFFF signals a 4-byte absolute extended
//! timestamp after the message header, on continuation chunks too.
//!
//! Reassembly state is kept per chunk-stream id in an arena so interleaved
//! streams cannot corrupt each other; the parser is restartable at any byte
//! boundary.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::protocol::constants::*;

/// Header fields of an in-flight chunk stream.
#[derive(Debug, Clone, Default)]
pub struct ChunkHeader {
    pub fmt: u8,
    pub cid: u32,
    /// 24-bit timestamp field (absolute for fmt 0, delta for fmt 1/2);
    /// 0xFFFFFF means "read the extended timestamp".
    pub timestamp: u32,
    /// Declared message length in bytes.
    pub length: usize,
    /// Message type id.
    pub type_id: u8,
    /// Message stream id (little-endian on the wire).
    pub stream_id: u32,
}

/// Per-cid reassembly state. One instance persists for the lifetime of the
/// connection once its chunk stream has been seen.
#[derive(Debug, Default)]
pub struct RtmpChunkPacket {
    pub header: ChunkHeader,
    /// Absolute timestamp after delta accumulation. Kept wider than the wire
    /// field; messages whose clock passes 32 bits are dropped, not wrapped.
    pub clock: u64,
    /// Payload buffer; `capacity` may exceed the current message length.
    pub payload: Vec<u8>,
    /// Bytes of the current message received so far.
    pub bytes: usize,
}

/// A fully reassembled message.
#[derive(Debug, Clone)]
pub struct RtmpMessage {
    pub cid: u32,
    /// Absolute timestamp (the chunk stream's accumulated clock).
    pub timestamp: u32,
    pub type_id: u8,
    pub stream_id: u32,
    pub payload: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    /// Waiting for the first byte of a basic header.
    Init,
    /// Accumulating the 1-3 byte basic header.
    BasicHeader,
    /// Accumulating the fmt-dependent message header.
    MessageHeader,
    /// Accumulating the optional 4-byte extended timestamp.
    ExtendedTimestamp,
    /// Accumulating payload up to a chunk boundary or message end.
    Payload,
}

/// Incremental chunk-stream parser.
pub struct ChunkParser {
    state: ParseState,
    buffer: [u8; MAX_CHUNK_HEADER],
    bytes: usize,
    basic_bytes: usize,
    current_cid: u32,
    /// Reassembly arena indexed by cid; `None` marks a cid not yet seen.
    streams: Vec<Option<RtmpChunkPacket>>,
    /// Incoming chunk size, updated by Set Chunk Size messages.
    pub in_chunk_size: usize,
    max_message_size: u32,
}

impl ChunkParser {
    pub fn new() -> Self {
        Self {
            state: ParseState::Init,
            buffer: [0u8; MAX_CHUNK_HEADER],
            bytes: 0,
            basic_bytes: 0,
            current_cid: 0,
            streams: Vec::new(),
            in_chunk_size: DEFAULT_CHUNK_SIZE as usize,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }

    /// Feed bytes into the parser, returning any messages they complete.
    pub fn parse(&mut self, data: &[u8]) -> Result<Vec<RtmpMessage>, ProtocolError> {
        let mut messages = Vec::new();
        let mut offset = 0;
        while offset < data.len() {
            match self.state {
                ParseState::Init => {
                    self.buffer[0] = data[offset];
                    offset += 1;
                    self.bytes = 1;
                    self.basic_bytes = match self.buffer[0] & 0x3f {
                        0 => 2,
                        1 => 3,
                        _ => 1,
                    };
                    self.state = ParseState::BasicHeader;
                }
                ParseState::BasicHeader => {
                    while self.bytes < self.basic_bytes && offset < data.len() {
                        self.buffer[self.bytes] = data[offset];
                        self.bytes += 1;
                        offset += 1;
                    }
                    if self.bytes >= self.basic_bytes {
                        self.state = ParseState::MessageHeader;
                    }
                }
                ParseState::MessageHeader => {
                    let size =
                        RTMP_HEADER_SIZE[(self.buffer[0] >> 6) as usize] + self.basic_bytes;
                    while self.bytes < size && offset < data.len() {
                        self.buffer[self.bytes] = data[offset];
                        self.bytes += 1;
                        offset += 1;
                    }
                    if self.bytes >= size {
                        self.packet_parse()?;
                        self.state = ParseState::ExtendedTimestamp;
                    }
                }
                ParseState::ExtendedTimestamp => {
                    let packet = self.current_packet();
                    let fmt = packet.header.fmt;
                    let has_extended = packet.header.timestamp == 0xFFFFFF;
                    let mut size = RTMP_HEADER_SIZE[fmt as usize] + self.basic_bytes;
                    if has_extended {
                        size += 4;
                    }
                    while self.bytes < size && offset < data.len() {
                        self.buffer[self.bytes] = data[offset];
                        self.bytes += 1;
                        offset += 1;
                    }
                    if self.bytes >= size {
                        let base = RTMP_HEADER_SIZE[fmt as usize] + self.basic_bytes;
                        let extended_timestamp = if has_extended {
                            u32::from_be_bytes([
                                self.buffer[base],
                                self.buffer[base + 1],
                                self.buffer[base + 2],
                                self.buffer[base + 3],
                            ])
                        } else {
                            self.current_packet().header.timestamp
                        };

                        let max = self.max_message_size;
                        let packet = self.current_packet();
                        if packet.bytes == 0 {
                            if packet.header.length as u32 > max {
                                return Err(ProtocolError::MessageTooLarge {
                                    size: packet.header.length as u32,
                                    max,
                                });
                            }
                            if packet.header.fmt == CHUNK_TYPE_0 {
                                packet.clock = extended_timestamp as u64;
                            } else {
                                packet.clock += extended_timestamp as u64;
                            }
                            packet.alloc();
                        }
                        self.state = ParseState::Payload;
                    }
                }
                ParseState::Payload => {
                    let in_chunk_size = self.in_chunk_size;
                    let remaining = data.len() - offset;
                    let packet = self.streams[self.current_cid as usize]
                        .as_mut()
                        .expect("chunk state machine entered payload without a header");
                    let size = (in_chunk_size - (packet.bytes % in_chunk_size))
                        .min(packet.header.length - packet.bytes)
                        .min(remaining);
                    if size > 0 {
                        packet.payload[packet.bytes..packet.bytes + size]
                            .copy_from_slice(&data[offset..offset + size]);
                    }
                    packet.bytes += size;
                    offset += size;

                    if packet.bytes >= packet.header.length {
                        self.state = ParseState::Init;
                        packet.bytes = 0;
                        // Messages past the 32-bit clock range are dropped
                        if packet.clock <= u32::MAX as u64 {
                            messages.push(RtmpMessage {
                                cid: packet.header.cid,
                                timestamp: packet.clock as u32,
                                type_id: packet.header.type_id,
                                stream_id: packet.header.stream_id,
                                payload: Bytes::copy_from_slice(
                                    &packet.payload[..packet.header.length],
                                ),
                            });
                        }
                    } else if packet.bytes % in_chunk_size == 0 {
                        // Chunk boundary mid-message
                        self.state = ParseState::Init;
                    }
                }
            }
        }
        Ok(messages)
    }

    /// Decode the basic header, pick the per-cid reassembly slot and read the
    /// message header fields it carries.
    fn packet_parse(&mut self) -> Result<(), ProtocolError> {
        let fmt = self.buffer[0] >> 6;
        let cid = match self.basic_bytes {
            2 => 64 + self.buffer[1] as u32,
            3 => 64 + self.buffer[1] as u32 + self.buffer[2] as u32 * 256,
            _ => (self.buffer[0] & 0x3f) as u32,
        };

        if self.streams.len() <= cid as usize {
            self.streams.resize_with(cid as usize + 1, || None);
        }
        let slot = &mut self.streams[cid as usize];
        let packet = slot.get_or_insert_with(RtmpChunkPacket::default);
        packet.header.fmt = fmt;
        packet.header.cid = cid;
        self.current_cid = cid;

        // Fields are cumulative: anything this fmt omits is inherited from
        // the previous chunk on the same cid.
        let mut pos = self.basic_bytes;
        if fmt <= CHUNK_TYPE_2 {
            packet.header.timestamp = ((self.buffer[pos] as u32) << 16)
                | ((self.buffer[pos + 1] as u32) << 8)
                | (self.buffer[pos + 2] as u32);
            pos += 3;
        }
        if fmt <= CHUNK_TYPE_1 {
            packet.header.length = ((self.buffer[pos] as usize) << 16)
                | ((self.buffer[pos + 1] as usize) << 8)
                | (self.buffer[pos + 2] as usize);
            packet.header.type_id = self.buffer[pos + 3];
            pos += 4;
        }
        if fmt == CHUNK_TYPE_0 {
            packet.header.stream_id = u32::from_le_bytes([
                self.buffer[pos],
                self.buffer[pos + 1],
                self.buffer[pos + 2],
                self.buffer[pos + 3],
            ]);
        }
        Ok(())
    }

    fn current_packet(&mut self) -> &mut RtmpChunkPacket {
        // packet_parse always populates the slot before these states run
        self.streams[self.current_cid as usize]
            .as_mut()
            .expect("chunk state machine entered payload without a header")
    }
}

impl Default for ChunkParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RtmpChunkPacket {
    /// Ensure the payload buffer can hold the declared message length.
    fn alloc(&mut self) {
        if self.payload.len() < self.header.length {
            self.payload = vec![0u8; self.header.length + 1024];
        }
    }
}

/// An outbound message to be serialized into chunks.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub cid: u32,
    pub type_id: u8,
    pub stream_id: u32,
    pub timestamp: u32,
    pub payload: Bytes,
}

/// Write a basic header with cid compaction (1 byte below 64, 2 bytes below
/// 64+256, 3 bytes above).
fn put_basic_header(buf: &mut BytesMut, fmt: u8, cid: u32) {
    if cid >= 64 + 255 {
        buf.put_u8((fmt << 6) | 1);
        buf.put_u8(((cid - 64) & 0xff) as u8);
        buf.put_u8(((cid - 64) >> 8) as u8);
    } else if cid >= 64 {
        buf.put_u8(fmt << 6);
        buf.put_u8((cid - 64) as u8);
    } else {
        buf.put_u8((fmt << 6) | cid as u8);
    }
}

fn put_u24(buf: &mut BytesMut, value: u32) {
    buf.put_u8((value >> 16) as u8);
    buf.put_u8((value >> 8) as u8);
    buf.put_u8(value as u8);
}

/// Serialize a message as a type-0 chunk followed by type-3 continuations,
/// splitting the payload at [`OUT_CHUNK_SIZE`]. When the timestamp needs the
/// extended field it is written after every chunk header, continuations
/// included, matching what the parser expects.
pub fn chunks_create(message: &OutboundMessage) -> Bytes {
    let payload = &message.payload;
    let chunk_size = OUT_CHUNK_SIZE as usize;
    let use_extended = message.timestamp >= 0xFFFFFF;

    let mut buf = BytesMut::with_capacity(MAX_CHUNK_HEADER + payload.len());
    put_basic_header(&mut buf, CHUNK_TYPE_0, message.cid);
    put_u24(
        &mut buf,
        if use_extended { 0xFFFFFF } else { message.timestamp },
    );
    put_u24(&mut buf, payload.len() as u32);
    buf.put_u8(message.type_id);
    buf.put_u32_le(message.stream_id);
    if use_extended {
        buf.put_u32(message.timestamp);
    }

    let mut offset = 0;
    loop {
        let n = (payload.len() - offset).min(chunk_size);
        buf.put_slice(&payload[offset..offset + n]);
        offset += n;
        if offset >= payload.len() {
            break;
        }
        put_basic_header(&mut buf, CHUNK_TYPE_3, message.cid);
        if use_extended {
            buf.put_u32(message.timestamp);
        }
    }
    buf.freeze()
}
