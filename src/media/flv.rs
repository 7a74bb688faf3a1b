//! FLV byte-stream parsing, tag classification and muxing
//!
//! FLV is the container shared by both transports: progressive-FLV
//! connections carry a full FLV byte stream, while RTMP media messages are
//! FLV tag payloads whose framing the chunk layer already removed.
//!
//! ```text
//! FLV stream:
//! +-------------+-------------+-----+-------------+-----+
//! | File Header | PrevTagSize | Tag | PrevTagSize | Tag | ...
//! |  (13 bytes) |  (in hdr)   |     |  (4 bytes)  |     |
//! +-------------+-------------+-----+-------------+-----+
//!
//! Tag: Type(1) | DataSize(3) | Timestamp(3+1) | StreamID(3) | Data(N)
//! ```
//!
//! The tag timestamp is assembled as `(b4<<16)|(b5<<8)|b6|(b7<<24)`: the
//! high byte travels fourth. This is the FLV wire convention, not a 32-bit
//! big-endian read.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::FlvError;

use super::packet::{AvPacket, PacketFlags};

const FLV_MEDIA_TYPE_AUDIO: u8 = 8;
const FLV_MEDIA_TYPE_VIDEO: u8 = 9;

const FLV_FRAME_KEY: u8 = 1;

const FLV_CODECID_EX_HEADER: u8 = 9;
const FLV_CODECID_AAC: u8 = 10;
const FLV_CODECID_H264: u8 = 7;

const FOURCC_AV1: &[u8; 4] = b"av01";
const FOURCC_VP9: &[u8; 4] = b"vp09";
const FOURCC_HEVC: &[u8; 4] = b"hvc1";

const VIDEO_PACKET_TYPE_SEQUENCE_START: u8 = 0;
const VIDEO_PACKET_TYPE_CODED_FRAMES: u8 = 1;
const VIDEO_PACKET_TYPE_CODED_FRAMES_X: u8 = 3;
const VIDEO_PACKET_TYPE_METADATA: u8 = 4;

const AUDIO_PACKET_TYPE_SEQUENCE_START: u8 = 0;

/// Initial tag buffer capacity; grows by doubling when a larger tag arrives.
const INITIAL_TAG_CAPACITY: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    /// Accumulating the 13-byte file header (signature + first prev-size).
    Init,
    /// Accumulating an 11-byte tag header.
    TagHeader,
    /// Accumulating `tag_size` bytes of tag payload.
    TagData,
    /// Accumulating the trailing 4-byte previous-tag-size field.
    PrevSize,
}

/// Incremental FLV byte-stream parser.
///
/// Restartable across arbitrary input boundaries: feeding a stream one byte
/// at a time produces the same packets as feeding it whole.
pub struct FlvParser {
    state: ParserState,
    /// Scratch for the file header, tag header and prev-size fields.
    header: [u8; 13],
    header_bytes: usize,
    tag_type: u8,
    tag_size: usize,
    tag_time: u32,
    tag_bytes: usize,
    tag_data: Vec<u8>,
    prev_bytes: usize,
}

impl FlvParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::Init,
            header: [0u8; 13],
            header_bytes: 0,
            tag_type: 0,
            tag_size: 0,
            tag_time: 0,
            tag_bytes: 0,
            tag_data: vec![0u8; INITIAL_TAG_CAPACITY],
            prev_bytes: 0,
        }
    }

    /// Feed bytes into the parser, returning the packets completed by them.
    ///
    /// A previous-tag-size mismatch is a framing error: the stream is
    /// desynchronized and the caller should close the connection.
    pub fn parse(&mut self, data: &[u8]) -> Result<Vec<AvPacket>, FlvError> {
        let mut packets = Vec::new();
        let mut p = 0;
        while p < data.len() {
            match self.state {
                ParserState::Init => {
                    let n = (13 - self.header_bytes).min(data.len() - p);
                    self.header[self.header_bytes..self.header_bytes + n]
                        .copy_from_slice(&data[p..p + n]);
                    self.header_bytes += n;
                    p += n;
                    if self.header_bytes == 13 {
                        self.state = ParserState::TagHeader;
                        self.header_bytes = 0;
                    }
                }
                ParserState::TagHeader => {
                    let n = (11 - self.header_bytes).min(data.len() - p);
                    self.header[self.header_bytes..self.header_bytes + n]
                        .copy_from_slice(&data[p..p + n]);
                    self.header_bytes += n;
                    p += n;
                    if self.header_bytes == 11 {
                        self.state = ParserState::TagData;
                        self.header_bytes = 0;
                        self.tag_type = self.header[0];
                        self.tag_size = ((self.header[1] as usize) << 16)
                            | ((self.header[2] as usize) << 8)
                            | (self.header[3] as usize);
                        self.tag_time = ((self.header[4] as u32) << 16)
                            | ((self.header[5] as u32) << 8)
                            | (self.header[6] as u32)
                            | ((self.header[7] as u32) << 24);
                        tracing::trace!(
                            tag_type = self.tag_type,
                            time = self.tag_time,
                            size = self.tag_size,
                            "flv tag header"
                        );
                    }
                }
                ParserState::TagData => {
                    self.tag_alloc(self.tag_size);
                    let n = (self.tag_size - self.tag_bytes).min(data.len() - p);
                    self.tag_data[self.tag_bytes..self.tag_bytes + n]
                        .copy_from_slice(&data[p..p + n]);
                    self.tag_bytes += n;
                    p += n;
                    if self.tag_bytes == self.tag_size {
                        self.state = ParserState::PrevSize;
                        self.tag_bytes = 0;
                    }
                }
                ParserState::PrevSize => {
                    let n = (4 - self.prev_bytes).min(data.len() - p);
                    self.header[self.prev_bytes..self.prev_bytes + n]
                        .copy_from_slice(&data[p..p + n]);
                    self.prev_bytes += n;
                    p += n;
                    if self.prev_bytes == 4 {
                        self.state = ParserState::TagHeader;
                        self.prev_bytes = 0;
                        let previous_size = u32::from_be_bytes([
                            self.header[0],
                            self.header[1],
                            self.header[2],
                            self.header[3],
                        ]);
                        let expected = self.tag_size as u32 + 11;
                        if previous_size != expected {
                            return Err(FlvError::TagSizeMismatch {
                                expected,
                                actual: previous_size,
                            });
                        }
                        let packet = parse_tag(
                            self.tag_type,
                            self.tag_time,
                            Bytes::copy_from_slice(&self.tag_data[..self.tag_size]),
                        )?;
                        packets.push(packet);
                    }
                }
            }
        }
        Ok(packets)
    }

    /// Grow the tag buffer to hold `size` bytes, doubling and copying forward.
    fn tag_alloc(&mut self, size: usize) {
        if self.tag_data.len() < size {
            let mut grown = vec![0u8; size * 2];
            grown[..self.tag_data.len()].copy_from_slice(&self.tag_data);
            self.tag_data = grown;
        }
    }
}

impl Default for FlvParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Classify one tag payload into an [`AvPacket`].
///
/// The resulting [`PacketFlags`] value is the sole signal the broadcast hub
/// uses for header-cache / GOP-cache / keyframe handling.
pub fn parse_tag(tag_type: u8, time: u32, data: Bytes) -> Result<AvPacket, FlvError> {
    let mut packet = AvPacket {
        codec_id: 0,
        codec_type: tag_type,
        flags: PacketFlags::Metadata,
        pts: time,
        dts: time,
        data,
    };

    match tag_type {
        FLV_MEDIA_TYPE_AUDIO => {
            let b0 = *packet.data.first().ok_or(FlvError::TruncatedTag)?;
            let sound_format = b0 >> 4;
            packet.codec_id = sound_format as u32;
            packet.flags = PacketFlags::AudioFrame;
            if sound_format != FLV_CODECID_EX_HEADER {
                if sound_format == FLV_CODECID_AAC && packet.data.get(1) == Some(&0) {
                    packet.flags = PacketFlags::AudioHeader;
                }
            } else {
                // Extended audio header: packet type in the low nibble
                let audio_packet_type = b0 & 0x0f;
                if audio_packet_type == AUDIO_PACKET_TYPE_SEQUENCE_START {
                    packet.flags = PacketFlags::AudioHeader;
                }
            }
        }
        FLV_MEDIA_TYPE_VIDEO => {
            let b0 = *packet.data.first().ok_or(FlvError::TruncatedTag)?;
            let frame_type = (b0 >> 4) & 0b0111;
            let codec_id = b0 & 0x0f;
            let is_ex_header = (b0 >> 4) & 0b1000 != 0;

            if is_ex_header {
                let video_packet_type = b0 & 0x0f;
                let four_cc = packet.data.get(1..5).ok_or(FlvError::TruncatedTag)?;
                if four_cc == FOURCC_AV1 || four_cc == FOURCC_VP9 || four_cc == FOURCC_HEVC {
                    packet.codec_id =
                        u32::from_be_bytes([four_cc[0], four_cc[1], four_cc[2], four_cc[3]]);
                    packet.flags = match video_packet_type {
                        VIDEO_PACKET_TYPE_SEQUENCE_START => PacketFlags::VideoHeader,
                        VIDEO_PACKET_TYPE_CODED_FRAMES | VIDEO_PACKET_TYPE_CODED_FRAMES_X => {
                            if frame_type == FLV_FRAME_KEY {
                                PacketFlags::Keyframe
                            } else {
                                PacketFlags::InterFrame
                            }
                        }
                        VIDEO_PACKET_TYPE_METADATA => PacketFlags::VideoMetadata,
                        _ => PacketFlags::InterFrame,
                    };
                    // HEVC coded frames carry a composition-time offset; the
                    // CodedFramesX variant implies a zero offset.
                    if four_cc == FOURCC_HEVC
                        && video_packet_type == VIDEO_PACKET_TYPE_CODED_FRAMES
                    {
                        let cts = read_u24(&packet.data, 5).ok_or(FlvError::TruncatedTag)?;
                        packet.pts = packet.dts.wrapping_add(cts);
                    }
                } else {
                    // Unknown fourCC: forward without caching semantics
                    packet.flags = PacketFlags::InterFrame;
                }
            } else {
                let cts = read_u24(&packet.data, 2).ok_or(FlvError::TruncatedTag)?;
                let video_packet_type = packet.data[1];
                packet.codec_id = codec_id as u32;
                packet.pts = packet.dts.wrapping_add(cts);
                packet.flags = PacketFlags::InterFrame;
                if codec_id == FLV_CODECID_H264 {
                    if video_packet_type == 0 {
                        packet.flags = PacketFlags::VideoHeader;
                    } else if frame_type == FLV_FRAME_KEY {
                        packet.flags = PacketFlags::Keyframe;
                    } else {
                        packet.flags = PacketFlags::InterFrame;
                    }
                }
            }
        }
        // Script data and anything routed through the data path
        _ => packet.flags = PacketFlags::Metadata,
    }

    Ok(packet)
}

fn read_u24(data: &Bytes, pos: usize) -> Option<u32> {
    let bytes = data.get(pos..pos + 3)?;
    Some(((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | (bytes[2] as u32))
}

/// Build the 13-byte FLV file header.
pub fn create_header(has_audio: bool, has_video: bool) -> Bytes {
    let mut header = [
        0x46, 0x4c, 0x56, 0x01, 0x00, 0x00, 0x00, 0x00, 0x09, 0x00, 0x00, 0x00, 0x00,
    ];
    if has_audio {
        header[4] |= 4;
    }
    if has_video {
        header[4] |= 1;
    }
    Bytes::copy_from_slice(&header)
}

/// Mux a packet into a complete FLV tag: 11-byte header, payload, 4-byte
/// previous-tag-size trailer. The timestamp is written in the same
/// non-contiguous byte order the parser reads it.
pub fn create_message(packet: &AvPacket) -> Bytes {
    let size = packet.size();
    let mut buf = BytesMut::with_capacity(11 + size + 4);
    buf.put_u8(packet.codec_type);
    buf.put_u8((size >> 16) as u8);
    buf.put_u8((size >> 8) as u8);
    buf.put_u8(size as u8);
    buf.put_u8((packet.dts >> 16) as u8);
    buf.put_u8((packet.dts >> 8) as u8);
    buf.put_u8(packet.dts as u8);
    buf.put_u8((packet.dts >> 24) as u8);
    buf.put_slice(&[0, 0, 0]); // stream id
    buf.put_slice(&packet.data);
    buf.put_u32(11 + size as u32);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_packet(data: &'static [u8], time: u32) -> AvPacket {
        parse_tag(9, time, Bytes::from_static(data)).unwrap()
    }

    #[test]
    fn test_audio_classification() {
        // AAC sequence header: sound format 10, AACPacketType 0
        let packet = parse_tag(8, 0, Bytes::from_static(&[0xAF, 0x00, 0x12, 0x10])).unwrap();
        assert_eq!(packet.flags, PacketFlags::AudioHeader);
        assert_eq!(packet.codec_id, 10);

        // AAC raw frame
        let packet = parse_tag(8, 40, Bytes::from_static(&[0xAF, 0x01, 0x21])).unwrap();
        assert_eq!(packet.flags, PacketFlags::AudioFrame);
        assert_eq!(packet.pts, 40);

        // MP3 frame: never a sequence header
        let packet = parse_tag(8, 0, Bytes::from_static(&[0x2F, 0x00])).unwrap();
        assert_eq!(packet.flags, PacketFlags::AudioFrame);
        assert_eq!(packet.codec_id, 2);

        // Extended audio header, sequence start
        let packet = parse_tag(8, 0, Bytes::from_static(&[0x90, b'm', b'p', b'4', b'a'])).unwrap();
        assert_eq!(packet.flags, PacketFlags::AudioHeader);
    }

    #[test]
    fn test_video_classification_avc() {
        // AVC sequence header
        let packet = video_packet(&[0x17, 0x00, 0x00, 0x00, 0x00, 0x01], 0);
        assert_eq!(packet.flags, PacketFlags::VideoHeader);
        assert_eq!(packet.codec_id, 7);

        // AVC keyframe with composition offset 0x000014
        let packet = video_packet(&[0x17, 0x01, 0x00, 0x00, 0x14, 0xAA], 1000);
        assert_eq!(packet.flags, PacketFlags::Keyframe);
        assert_eq!(packet.dts, 1000);
        assert_eq!(packet.pts, 1020);

        // AVC inter frame
        let packet = video_packet(&[0x27, 0x01, 0x00, 0x00, 0x00, 0xAA], 1040);
        assert_eq!(packet.flags, PacketFlags::InterFrame);
    }

    #[test]
    fn test_video_classification_extended_header() {
        // HEVC sequence start
        let packet = video_packet(&[0x90, b'h', b'v', b'c', b'1', 0x01], 0);
        assert_eq!(packet.flags, PacketFlags::VideoHeader);
        assert_eq!(packet.codec_id, u32::from_be_bytes(*b"hvc1"));

        // HEVC coded frame, keyframe, cts 0x000010
        let packet = video_packet(&[0x91, b'h', b'v', b'c', b'1', 0x00, 0x00, 0x10, 0xFF], 500);
        assert_eq!(packet.flags, PacketFlags::Keyframe);
        assert_eq!(packet.pts, 516);

        // AV1 CodedFramesX inter frame: no cts field
        let packet = video_packet(&[0xA3, b'a', b'v', b'0', b'1', 0xFF], 500);
        assert_eq!(packet.flags, PacketFlags::InterFrame);
        assert_eq!(packet.pts, 500);

        // VP9 metadata packet
        let packet = video_packet(&[0x94, b'v', b'p', b'0', b'9', 0x00], 0);
        assert_eq!(packet.flags, PacketFlags::VideoMetadata);
    }

    #[test]
    fn test_script_classification() {
        let packet = parse_tag(18, 0, Bytes::from_static(&[0x02, 0x00, 0x01, b'x'])).unwrap();
        assert_eq!(packet.flags, PacketFlags::Metadata);
        assert_eq!(packet.codec_type, 18);
    }

    #[test]
    fn test_truncated_tag_fails() {
        assert!(parse_tag(9, 0, Bytes::from_static(&[0x17, 0x01])).is_err());
        assert!(parse_tag(8, 0, Bytes::new()).is_err());
        assert!(parse_tag(9, 0, Bytes::from_static(&[0x90, b'h', b'v'])).is_err());
    }

    #[test]
    fn test_header_flags() {
        assert_eq!(create_header(true, true)[4], 0x05);
        assert_eq!(create_header(true, false)[4], 0x04);
        assert_eq!(create_header(false, true)[4], 0x01);
    }

    fn sample_stream() -> (Vec<u8>, Vec<(u8, u32)>) {
        let mut stream = create_header(true, true).to_vec();
        let tags: Vec<(u8, u32, &[u8])> = vec![
            (18, 0, &[0x02, 0x00, 0x01, b'm']),
            (9, 0, &[0x17, 0x00, 0x00, 0x00, 0x00]),
            (9, 40, &[0x17, 0x01, 0x00, 0x00, 0x00, 0xAB]),
            (8, 40, &[0xAF, 0x01, 0x21]),
        ];
        let mut expected = Vec::new();
        for (tag_type, time, data) in tags {
            let packet = parse_tag(tag_type, time, Bytes::copy_from_slice(data)).unwrap();
            stream.extend_from_slice(&create_message(&packet));
            expected.push((tag_type, time));
        }
        (stream, expected)
    }

    #[test]
    fn test_parse_whole_buffer() {
        let (stream, expected) = sample_stream();
        let mut parser = FlvParser::new();
        let packets = parser.parse(&stream).unwrap();
        assert_eq!(packets.len(), expected.len());
        for (packet, (tag_type, time)) in packets.iter().zip(&expected) {
            assert_eq!(packet.codec_type, *tag_type);
            assert_eq!(packet.dts, *time);
        }
    }

    #[test]
    fn test_parse_one_byte_at_a_time_matches_whole() {
        let (stream, _) = sample_stream();

        let mut whole = FlvParser::new();
        let whole_packets = whole.parse(&stream).unwrap();

        let mut fragmented = FlvParser::new();
        let mut frag_packets = Vec::new();
        for byte in &stream {
            frag_packets.extend(fragmented.parse(std::slice::from_ref(byte)).unwrap());
        }

        assert_eq!(whole_packets.len(), frag_packets.len());
        for (a, b) in whole_packets.iter().zip(&frag_packets) {
            assert_eq!(a.codec_type, b.codec_type);
            assert_eq!(a.flags, b.flags);
            assert_eq!(a.pts, b.pts);
            assert_eq!(a.dts, b.dts);
            assert_eq!(a.data, b.data);
        }
    }

    #[test]
    fn test_prev_size_mismatch_is_error() {
        let (mut stream, _) = sample_stream();
        // Corrupt the last previous-tag-size field
        let last = stream.len() - 1;
        stream[last] ^= 0xFF;
        let mut parser = FlvParser::new();
        let err = parser.parse(&stream).unwrap_err();
        assert!(matches!(err, FlvError::TagSizeMismatch { .. }));
    }

    #[test]
    fn test_mux_timestamp_byte_order() {
        let packet = AvPacket {
            codec_id: 7,
            codec_type: 9,
            flags: PacketFlags::InterFrame,
            pts: 0x0A_BB_CC_DD,
            dts: 0x0A_BB_CC_DD,
            data: Bytes::from_static(&[0x27, 0x01, 0, 0, 0]),
        };
        let message = create_message(&packet);
        // Lower 24 bits big-endian in bytes 4..7, high byte in byte 7
        assert_eq!(message[4], 0xBB);
        assert_eq!(message[5], 0xCC);
        assert_eq!(message[6], 0xDD);
        assert_eq!(message[7], 0x0A);

        // And the parser reassembles the same value
        let mut parser = FlvParser::new();
        let mut stream = create_header(false, true).to_vec();
        stream.extend_from_slice(&message);
        let packets = parser.parse(&stream).unwrap();
        assert_eq!(packets[0].dts, 0x0A_BB_CC_DD);
    }

    #[test]
    fn test_tag_larger_than_initial_capacity() {
        let payload = {
            let mut v = vec![0x27u8, 0x01, 0, 0, 0];
            v.resize(INITIAL_TAG_CAPACITY + 4096, 0xAB);
            v
        };
        let packet = parse_tag(9, 0, Bytes::from(payload.clone())).unwrap();
        let mut stream = create_header(false, true).to_vec();
        stream.extend_from_slice(&create_message(&packet));

        let mut parser = FlvParser::new();
        let packets = parser.parse(&stream).unwrap();
        assert_eq!(packets[0].data.len(), payload.len());
        assert_eq!(packets[0].data, Bytes::from(payload));
    }
}
