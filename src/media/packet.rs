//! Normalized elementary-stream packets
//!
//! Both protocol engines reduce their input to [`AvPacket`]s: one audio,
//! video or script unit with container framing stripped. The broadcast hub
//! routes packets purely on [`PacketFlags`], so the classifier in
//! [`crate::media::flv`] must assign them exactly.

use bytes::Bytes;

/// Semantic classification of a packet, used by the broadcast hub to decide
/// header caching, GOP caching and keyframe resets.
///
/// Discriminants are part of the wire-adjacent contract between the
/// classifier and the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketFlags {
    /// Audio sequence header (AAC AudioSpecificConfig or multichannel
    /// config); replaces the cached audio header.
    AudioHeader = 0,
    /// Regular audio frame; appended to the GOP cache.
    AudioFrame = 1,
    /// Video sequence header (SPS/PPS etc.); replaces the cached video header.
    VideoHeader = 2,
    /// Video keyframe; clears the GOP cache and starts a new one.
    Keyframe = 3,
    /// Video inter frame; appended to the GOP cache.
    InterFrame = 4,
    /// Script data (onMetaData); replaces the cached metadata.
    Metadata = 5,
    /// Codec-specific video metadata (HDR info etc.) in an extended header.
    VideoMetadata = 6,
}

/// One demultiplexed elementary-stream unit.
///
/// Immutable after creation; the payload is reference-counted so hub fan-out
/// and caching never copy it.
#[derive(Debug, Clone)]
pub struct AvPacket {
    /// Codec identifier: FLV sound-format / video-codec nibble, or the
    /// big-endian fourCC for extended-header video.
    pub codec_id: u32,
    /// Stream kind, using FLV tag-type values: 8 audio, 9 video, 18 script.
    pub codec_type: u8,
    /// Semantic classification, see [`PacketFlags`].
    pub flags: PacketFlags,
    /// Presentation timestamp in milliseconds.
    pub pts: u32,
    /// Decode timestamp in milliseconds.
    pub dts: u32,
    /// Payload without any container framing.
    pub data: Bytes,
}

impl AvPacket {
    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// True for audio packets (codec_type 8).
    pub fn is_audio(&self) -> bool {
        self.codec_type == 8
    }

    /// True for video packets (codec_type 9).
    pub fn is_video(&self) -> bool {
        self.codec_type == 9
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_discriminants() {
        assert_eq!(PacketFlags::AudioHeader as u8, 0);
        assert_eq!(PacketFlags::AudioFrame as u8, 1);
        assert_eq!(PacketFlags::VideoHeader as u8, 2);
        assert_eq!(PacketFlags::Keyframe as u8, 3);
        assert_eq!(PacketFlags::InterFrame as u8, 4);
        assert_eq!(PacketFlags::Metadata as u8, 5);
        assert_eq!(PacketFlags::VideoMetadata as u8, 6);
    }

    #[test]
    fn test_packet_kind() {
        let packet = AvPacket {
            codec_id: 7,
            codec_type: 9,
            flags: PacketFlags::Keyframe,
            pts: 0,
            dts: 0,
            data: Bytes::from_static(&[0x17, 0x01]),
        };
        assert!(packet.is_video());
        assert!(!packet.is_audio());
        assert_eq!(packet.size(), 2);
    }
}
