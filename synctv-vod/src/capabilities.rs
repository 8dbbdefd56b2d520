use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::frame::TrackType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Aac,
    Mp3,
    Opus,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    H265,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioCodecInfo {
    pub codec: AudioCodec,
    pub sample_rate: u32,
    pub channels: u8,
    /// Decoder configuration sent ahead of the first audio frame.
    #[serde(default)]
    pub codec_init: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoCodecInfo {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    /// Decoder configuration sent ahead of the first video frame.
    #[serde(default)]
    pub codec_init: Bytes,
}

/// Codec and container description of a media file. Set once when the
/// engine initializes and never modified afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamCapabilities {
    pub audio: Option<AudioCodecInfo>,
    pub video: Option<VideoCodecInfo>,
    pub duration_ms: u64,
    #[serde(default)]
    pub bandwidth_kbps: u32,
}

impl StreamCapabilities {
    /// Codec initialization bytes for a track, if the track exists and
    /// carries any.
    #[must_use]
    pub fn codec_init(&self, track: TrackType) -> Option<&Bytes> {
        let init = match track {
            TrackType::Audio => self.audio.as_ref().map(|a| &a.codec_init),
            TrackType::Video => self.video.as_ref().map(|v| &v.codec_init),
        };
        init.filter(|bytes| !bytes.is_empty())
    }

    #[must_use]
    pub const fn has_track(&self, track: TrackType) -> bool {
        match track {
            TrackType::Audio => self.audio.is_some(),
            TrackType::Video => self.video.is_some(),
        }
    }
}
