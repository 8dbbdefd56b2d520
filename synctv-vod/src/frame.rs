use serde::{Deserialize, Serialize};

/// Which output buffer a frame is appended to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackType {
    Audio,
    Video,
}

impl TrackType {
    pub const ALL: [Self; 2] = [Self::Audio, Self::Video];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameKind {
    Audio,
    Video,
    /// Out-of-band decoder configuration (AAC AudioSpecificConfig, AVC
    /// sequence header, ...) for the given track.
    CodecInit(TrackType),
}

impl FrameKind {
    #[must_use]
    pub const fn track(self) -> TrackType {
        match self {
            Self::Audio | Self::CodecInit(TrackType::Audio) => TrackType::Audio,
            Self::Video | Self::CodecInit(TrackType::Video) => TrackType::Video,
        }
    }

    #[must_use]
    pub const fn is_codec_init(self) -> bool {
        matches!(self, Self::CodecInit(_))
    }
}

/// One demuxed unit located in the data file.
///
/// Frames are plain values: they are read from the frame table, handed to
/// the format hook for one feed step and then discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaFrame {
    pub kind: FrameKind,
    pub is_key_frame: bool,
    pub file_offset: u64,
    pub length: u32,
    pub timestamp_ms: u32,
}

impl MediaFrame {
    #[must_use]
    pub const fn audio(file_offset: u64, length: u32, timestamp_ms: u32) -> Self {
        Self {
            kind: FrameKind::Audio,
            is_key_frame: true,
            file_offset,
            length,
            timestamp_ms,
        }
    }

    #[must_use]
    pub const fn video(file_offset: u64, length: u32, timestamp_ms: u32, is_key_frame: bool) -> Self {
        Self {
            kind: FrameKind::Video,
            is_key_frame,
            file_offset,
            length,
            timestamp_ms,
        }
    }

    #[must_use]
    pub const fn track(&self) -> TrackType {
        self.kind.track()
    }

    /// Byte offset one past the end of the frame payload.
    #[must_use]
    pub const fn end_offset(&self) -> u64 {
        self.file_offset + self.length as u64
    }
}
