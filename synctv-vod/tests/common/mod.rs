#![allow(dead_code)]

use bytes::{Bytes, BytesMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

use synctv_vod::capabilities::{AudioCodec, AudioCodecInfo, VideoCodec, VideoCodecInfo};
use synctv_vod::config::FeedingConfig;
use synctv_vod::format::read_frame_payload;
use synctv_vod::{
    FileAccess, FileHandle, FileStreamEngine, FormatError, MediaFormat, MediaFrame, MediaIndex,
    SeekFile, StreamCapabilities, StreamEventReceiver, TrackType,
};

pub const PAYLOAD_LEN: u32 = 4;
pub const AUDIO_INIT: &[u8] = &[0xAF, 0x00, 0x12, 0x10];
pub const VIDEO_INIT: &[u8] = &[0x17, 0x00, 0x00, 0x00, 0x01];

pub fn capabilities() -> StreamCapabilities {
    StreamCapabilities {
        audio: Some(AudioCodecInfo {
            codec: AudioCodec::Aac,
            sample_rate: 44_100,
            channels: 2,
            codec_init: Bytes::from_static(AUDIO_INIT),
        }),
        video: Some(VideoCodecInfo {
            codec: VideoCodec::H264,
            width: 1280,
            height: 720,
            codec_init: Bytes::from_static(VIDEO_INIT),
        }),
        duration_ms: 0,
        bandwidth_kbps: 1500,
    }
}

/// Payload bytes of frame `index`: `PAYLOAD_LEN` copies of the index.
pub fn payload(index: u32) -> Vec<u8> {
    vec![index as u8; PAYLOAD_LEN as usize]
}

/// Write a data file and its seek file. Frames alternate video (even
/// indices, key frame every 10th) and audio, with the given timestamps.
pub fn write_media(dir: &Path, name: &str, timestamps: &[u32]) -> PathBuf {
    let data_path = dir.join(name);
    let mut data = Vec::new();
    let mut frames = Vec::with_capacity(timestamps.len());
    for (i, &ts) in timestamps.iter().enumerate() {
        let index = i as u32;
        let offset = data.len() as u64;
        data.extend_from_slice(&payload(index));
        frames.push(if index % 2 == 0 {
            MediaFrame::video(offset, PAYLOAD_LEN, ts, index % 10 == 0)
        } else {
            MediaFrame::audio(offset, PAYLOAD_LEN, ts)
        });
    }
    std::fs::write(&data_path, data).unwrap();

    let index = MediaIndex::new(capabilities(), frames)
        .unwrap()
        .with_time_index(1000);
    SeekFile::write_for(&data_path, &index).unwrap();
    data_path
}

/// `count` frames spaced `step_ms` apart starting at `first_ms`.
pub fn timestamps(count: u32, first_ms: u32, step_ms: u32) -> Vec<u32> {
    (0..count).map(|i| first_ms + i * step_ms).collect()
}

pub fn engine(
    path: &Path,
    format: Arc<dyn MediaFormat>,
    access: Arc<dyn FileAccess>,
) -> (FileStreamEngine, StreamEventReceiver) {
    engine_with(path, format, access, FeedingConfig::default())
}

pub fn engine_with(
    path: &Path,
    format: Arc<dyn MediaFormat>,
    access: Arc<dyn FileAccess>,
    feeding: FeedingConfig,
) -> (FileStreamEngine, StreamEventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let engine = FileStreamEngine::new(name, path, format, access, tx).with_feeding_config(feeding);
    (engine, rx)
}

/// Raw format that reports frame `fail_at` as corrupt.
pub struct CorruptAt {
    pub fail_at: u32,
}

impl MediaFormat for CorruptAt {
    fn name(&self) -> &str {
        "corrupt-at"
    }

    fn build_frame(
        &self,
        data: &FileHandle,
        index: u32,
        frame: &MediaFrame,
        out: &mut BytesMut,
    ) -> Result<(), FormatError> {
        if index == self.fail_at {
            return Err(FormatError::CorruptFrame {
                index,
                reason: "bad tag header".to_string(),
            });
        }
        read_frame_payload(data, frame, out)
    }
}

/// Raw format whose codec initialization always fails.
pub struct BrokenCodecInit;

impl MediaFormat for BrokenCodecInit {
    fn name(&self) -> &str {
        "broken-codec-init"
    }

    fn build_frame(
        &self,
        data: &FileHandle,
        _index: u32,
        frame: &MediaFrame,
        out: &mut BytesMut,
    ) -> Result<(), FormatError> {
        read_frame_payload(data, frame, out)
    }

    fn build_codec_init(
        &self,
        _capabilities: &StreamCapabilities,
        track: TrackType,
        _out: &mut BytesMut,
    ) -> Result<bool, FormatError> {
        Err(FormatError::CorruptFrame {
            index: 0,
            reason: format!("unsupported {track:?} sequence header"),
        })
    }
}
