use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use crate::capabilities::StreamCapabilities;
use crate::error::FormatError;
use crate::frame::{FrameKind, MediaFrame, TrackType};

/*
 ** Seek file **
 +--------------------------------------------------------------------------------------+
 | Magic "SVSK"(4) | Version(1) | CapsLen(4) | Caps JSON(CapsLen) | FrameCount(4) | ... |
 +--------------------------------------------------------------------------------------+
 | Frame records (FrameCount x 18 bytes) | Granularity(4) | EntryCount(4) | Entries(4 x n) |
 +--------------------------------------------------------------------------------------+

 *** Frame record ***
 +--------------------------------------------------------------------------+
 | Kind(1) | Flags(1) | Offset(8) | Length(4) | Timestamp ms(4)             |
 +--------------------------------------------------------------------------+
  Kind:  0 audio, 1 video, 2 audio codec init, 3 video codec init
  Flags: bit 0 set for key frames

 Time index entry `i` is the index of the first frame whose timestamp is at
 or after `i * granularity`. A granularity of 0 means no time index.
 All integers are big endian.
*/

pub const SEEK_FILE_MAGIC: &[u8; 4] = b"SVSK";
pub const SEEK_FILE_VERSION: u8 = 1;
pub const SEEK_FILE_EXTENSION: &str = "seek";
pub const DEFAULT_TIME_INDEX_GRANULARITY_MS: u32 = 1000;

const FRAME_RECORD_LEN: usize = 18;
const FLAG_KEY_FRAME: u8 = 0x01;

/// Companion seek file path: `movie.flv` -> `movie.flv.seek`.
#[must_use]
pub fn seek_file_path_for(data_path: &Path) -> PathBuf {
    let mut name = data_path.as_os_str().to_os_string();
    name.push(".");
    name.push(SEEK_FILE_EXTENSION);
    PathBuf::from(name)
}

/// Coarse timestamp -> frame index table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeIndex {
    granularity_ms: u32,
    entries: Vec<u32>,
}

impl TimeIndex {
    #[must_use]
    pub fn build(frames: &[MediaFrame], granularity_ms: u32) -> Option<Self> {
        if granularity_ms == 0 {
            return None;
        }
        let last = frames.last().map_or(0, |f| f.timestamp_ms);
        let buckets = last / granularity_ms + 1;
        let entries = (0..buckets)
            .map(|bucket| {
                let bucket_start = u64::from(bucket) * u64::from(granularity_ms);
                frames.partition_point(|f| u64::from(f.timestamp_ms) < bucket_start) as u32
            })
            .collect();
        Some(Self {
            granularity_ms,
            entries,
        })
    }

    #[must_use]
    pub const fn granularity_ms(&self) -> u32 {
        self.granularity_ms
    }

    #[must_use]
    pub fn entries(&self) -> &[u32] {
        &self.entries
    }

    /// First frame index that can hold the answer for `target_ms`.
    fn lower_bound(&self, target_ms: u64) -> u32 {
        let bucket = usize::try_from(target_ms / u64::from(self.granularity_ms)).unwrap_or(usize::MAX);
        self.entries
            .get(bucket)
            .or_else(|| self.entries.last())
            .copied()
            .unwrap_or(0)
    }
}

/// Capabilities and frame table of one media file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaIndex {
    capabilities: StreamCapabilities,
    frames: Vec<MediaFrame>,
    time_index: Option<TimeIndex>,
}

impl MediaIndex {
    /// Validate and wrap a frame table. Frames must have a payload and
    /// non-decreasing timestamps.
    pub fn new(capabilities: StreamCapabilities, frames: Vec<MediaFrame>) -> Result<Self, FormatError> {
        u32::try_from(frames.len()).map_err(|_| FormatError::corrupt("too many frames"))?;
        for (index, pair) in frames.windows(2).enumerate() {
            if pair[1].timestamp_ms < pair[0].timestamp_ms {
                return Err(FormatError::CorruptFrame {
                    index: index as u32 + 1,
                    reason: format!(
                        "timestamp {} goes backwards from {}",
                        pair[1].timestamp_ms, pair[0].timestamp_ms
                    ),
                });
            }
        }
        if let Some(index) = frames.iter().position(|f| f.length == 0) {
            return Err(FormatError::CorruptFrame {
                index: index as u32,
                reason: "zero length frame".to_string(),
            });
        }

        Ok(Self {
            capabilities,
            frames,
            time_index: None,
        })
    }

    #[must_use]
    pub fn with_time_index(mut self, granularity_ms: u32) -> Self {
        self.time_index = TimeIndex::build(&self.frames, granularity_ms);
        self
    }

    #[must_use]
    pub const fn capabilities(&self) -> &StreamCapabilities {
        &self.capabilities
    }

    #[must_use]
    pub fn frames(&self) -> &[MediaFrame] {
        &self.frames
    }

    #[must_use]
    pub const fn time_index(&self) -> Option<&TimeIndex> {
        self.time_index.as_ref()
    }

    #[must_use]
    pub fn frame_count(&self) -> u32 {
        self.frames.len() as u32
    }

    #[must_use]
    pub fn frame(&self, index: u32) -> Option<&MediaFrame> {
        self.frames.get(index as usize)
    }

    /// Stream duration: the declared duration or the last timestamp,
    /// whichever is larger.
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        let last = self.frames.last().map_or(0, |f| u64::from(f.timestamp_ms));
        self.capabilities.duration_ms.max(last)
    }

    /// Index of the first frame carrying the greatest timestamp `<= target_ms`.
    /// Targets before the first frame map to frame 0. `None` when the target
    /// lies beyond the duration.
    #[must_use]
    pub fn seek(&self, target_ms: u64) -> Option<u32> {
        if target_ms > self.duration_ms() {
            return None;
        }

        let start = self
            .time_index
            .as_ref()
            .map_or(0, |index| index.lower_bound(target_ms) as usize)
            .min(self.frames.len());
        let upper = start
            + self.frames[start..].partition_point(|f| u64::from(f.timestamp_ms) <= target_ms);
        if upper == 0 {
            return Some(0);
        }

        let landed = self.frames[upper - 1].timestamp_ms;
        Some(self.frames[..upper].partition_point(|f| f.timestamp_ms < landed) as u32)
    }
}

fn encode_kind(kind: FrameKind) -> u8 {
    match kind {
        FrameKind::Audio => 0,
        FrameKind::Video => 1,
        FrameKind::CodecInit(TrackType::Audio) => 2,
        FrameKind::CodecInit(TrackType::Video) => 3,
    }
}

fn decode_kind(value: u8, index: u32) -> Result<FrameKind, FormatError> {
    match value {
        0 => Ok(FrameKind::Audio),
        1 => Ok(FrameKind::Video),
        2 => Ok(FrameKind::CodecInit(TrackType::Audio)),
        3 => Ok(FrameKind::CodecInit(TrackType::Video)),
        other => Err(FormatError::CorruptFrame {
            index,
            reason: format!("unknown frame kind {other}"),
        }),
    }
}

fn truncated(what: &str) -> impl FnOnce(std::io::Error) -> FormatError + '_ {
    move |_| FormatError::Corrupt(format!("truncated {what}"))
}

/// Reader and writer for the seek file layout.
pub struct SeekFile;

impl SeekFile {
    pub fn encode(index: &MediaIndex) -> Result<Bytes, FormatError> {
        let caps = serde_json::to_vec(&index.capabilities)?;
        let mut out = Vec::with_capacity(
            4 + 1 + 4 + caps.len() + 4 + index.frames.len() * FRAME_RECORD_LEN + 8,
        );

        out.extend_from_slice(SEEK_FILE_MAGIC);
        out.write_u8(SEEK_FILE_VERSION)?;
        out.write_u32::<BigEndian>(caps.len() as u32)?;
        out.extend_from_slice(&caps);

        out.write_u32::<BigEndian>(index.frame_count())?;
        for frame in &index.frames {
            out.write_u8(encode_kind(frame.kind))?;
            out.write_u8(if frame.is_key_frame { FLAG_KEY_FRAME } else { 0 })?;
            out.write_u64::<BigEndian>(frame.file_offset)?;
            out.write_u32::<BigEndian>(frame.length)?;
            out.write_u32::<BigEndian>(frame.timestamp_ms)?;
        }

        match &index.time_index {
            Some(time_index) => {
                out.write_u32::<BigEndian>(time_index.granularity_ms)?;
                out.write_u32::<BigEndian>(time_index.entries.len() as u32)?;
                for entry in &time_index.entries {
                    out.write_u32::<BigEndian>(*entry)?;
                }
            }
            None => {
                out.write_u32::<BigEndian>(0)?;
                out.write_u32::<BigEndian>(0)?;
            }
        }

        Ok(Bytes::from(out))
    }

    pub fn parse(data: &[u8]) -> Result<MediaIndex, FormatError> {
        let mut reader = Cursor::new(data);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic).map_err(truncated("header"))?;
        if &magic != SEEK_FILE_MAGIC {
            return Err(FormatError::corrupt("bad magic"));
        }
        let version = reader.read_u8().map_err(truncated("header"))?;
        if version != SEEK_FILE_VERSION {
            return Err(FormatError::Corrupt(format!("unsupported version {version}")));
        }

        let caps_len = reader.read_u32::<BigEndian>().map_err(truncated("capabilities"))? as usize;
        let mut caps = vec![0u8; caps_len.min(data.len())];
        reader.read_exact(&mut caps).map_err(truncated("capabilities"))?;
        if caps.len() != caps_len {
            return Err(FormatError::corrupt("truncated capabilities"));
        }
        let capabilities: StreamCapabilities = serde_json::from_slice(&caps)?;

        let frame_count = reader.read_u32::<BigEndian>().map_err(truncated("frame table"))?;
        let remaining = data.len() - reader.position() as usize;
        if (frame_count as usize).saturating_mul(FRAME_RECORD_LEN) > remaining {
            return Err(FormatError::corrupt("truncated frame table"));
        }

        let mut frames = Vec::with_capacity(frame_count as usize);
        for index in 0..frame_count {
            let kind = decode_kind(reader.read_u8().map_err(truncated("frame"))?, index)?;
            let flags = reader.read_u8().map_err(truncated("frame"))?;
            frames.push(MediaFrame {
                kind,
                is_key_frame: flags & FLAG_KEY_FRAME != 0,
                file_offset: reader.read_u64::<BigEndian>().map_err(truncated("frame"))?,
                length: reader.read_u32::<BigEndian>().map_err(truncated("frame"))?,
                timestamp_ms: reader.read_u32::<BigEndian>().map_err(truncated("frame"))?,
            });
        }

        let granularity_ms = reader.read_u32::<BigEndian>().map_err(truncated("time index"))?;
        let entry_count = reader.read_u32::<BigEndian>().map_err(truncated("time index"))?;
        let mut entries = Vec::with_capacity((entry_count as usize).min(data.len() / 4));
        for _ in 0..entry_count {
            let entry = reader.read_u32::<BigEndian>().map_err(truncated("time index"))?;
            if entry > frame_count {
                return Err(FormatError::Corrupt(format!(
                    "time index entry {entry} beyond {frame_count} frames"
                )));
            }
            entries.push(entry);
        }

        let mut index = MediaIndex::new(capabilities, frames)?;
        if granularity_ms > 0 && !entries.is_empty() {
            // Seeks trust the entries as a search floor.
            let expected = TimeIndex::build(&index.frames, granularity_ms);
            if expected.as_ref().map(TimeIndex::entries) != Some(&entries[..]) {
                return Err(FormatError::corrupt(
                    "time index does not match the frame table",
                ));
            }
            index.time_index = expected;
        }
        Ok(index)
    }

    /// Encode `index` and write it next to `data_path`. Returns the seek
    /// file path.
    pub fn write_for(data_path: &Path, index: &MediaIndex) -> Result<PathBuf, FormatError> {
        let path = seek_file_path_for(data_path);
        std::fs::write(&path, Self::encode(index)?)?;
        tracing::debug!("Wrote seek file {:?} ({} frames)", path, index.frame_count());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{VideoCodec, VideoCodecInfo};

    fn video_caps() -> StreamCapabilities {
        StreamCapabilities {
            audio: None,
            video: Some(VideoCodecInfo {
                codec: VideoCodec::H264,
                width: 640,
                height: 360,
                codec_init: Bytes::from_static(&[0x01, 0x42]),
            }),
            duration_ms: 0,
            bandwidth_kbps: 0,
        }
    }

    /// Interleaved audio/video every `step` ms, both at the same timestamp.
    fn interleaved(pairs: u32, step: u32) -> Vec<MediaFrame> {
        let mut offset = 0;
        let mut frames = Vec::new();
        for i in 0..pairs {
            frames.push(MediaFrame::audio(offset, 10, i * step));
            offset += 10;
            frames.push(MediaFrame::video(offset, 20, i * step, i % 5 == 0));
            offset += 20;
        }
        frames
    }

    #[test]
    fn test_seek_file_path() {
        assert_eq!(
            seek_file_path_for(Path::new("/media/movie.flv")),
            PathBuf::from("/media/movie.flv.seek")
        );
    }

    #[test]
    fn test_seek_lands_on_greatest_timestamp_not_after_target() {
        let frames: Vec<_> = (0..10).map(|i| MediaFrame::video(i * 100, 100, i as u32 * 100, true)).collect();
        let index = MediaIndex::new(video_caps(), frames).unwrap();

        assert_eq!(index.seek(550), Some(5));
        assert_eq!(index.seek(500), Some(5));
        assert_eq!(index.seek(0), Some(0));
        assert_eq!(index.seek(900), Some(9));
        assert_eq!(index.seek(901), None);
    }

    #[test]
    fn test_seek_picks_first_frame_of_shared_timestamp() {
        let index = MediaIndex::new(video_caps(), interleaved(20, 40)).unwrap();
        // audio and video of pair 3 are both at 120ms
        assert_eq!(index.seek(130), Some(6));
        assert_eq!(index.frame(6).unwrap().kind, FrameKind::Audio);
    }

    #[test]
    fn test_seek_before_first_frame_maps_to_start() {
        let frames: Vec<_> = (1..=10).map(|i| MediaFrame::audio(i * 10, 10, i as u32 * 40)).collect();
        let index = MediaIndex::new(video_caps(), frames).unwrap();
        assert_eq!(index.seek(0), Some(0));
        assert_eq!(index.seek(39), Some(0));
        assert_eq!(index.seek(40), Some(0));
        assert_eq!(index.seek(80), Some(1));
    }

    #[test]
    fn test_parse_rejects_inconsistent_time_index() {
        let frames = (0..10).map(|i| MediaFrame::audio(u64::from(i) * 10, 10, i * 100)).collect();
        let index = MediaIndex::new(video_caps(), frames).unwrap().with_time_index(100);
        let encoded = SeekFile::encode(&index).unwrap();

        let parsed = SeekFile::parse(&encoded).unwrap();
        assert_eq!(parsed.time_index().unwrap().entries().len(), 10);
        assert_eq!(parsed.seek(150), Some(1));

        // Every bucket pointing at frame 9 would make seeks overshoot.
        let mut skewed = encoded.to_vec();
        let entries_start = skewed.len() - 10 * 4;
        for entry in skewed[entries_start..].chunks_mut(4) {
            entry.copy_from_slice(&9u32.to_be_bytes());
        }
        assert!(matches!(
            SeekFile::parse(&skewed),
            Err(FormatError::Corrupt(_))
        ));
    }

    #[test]
    fn test_time_index_agrees_with_binary_search() {
        let plain = MediaIndex::new(video_caps(), interleaved(200, 33)).unwrap();
        let indexed = plain.clone().with_time_index(250);
        assert!(indexed.time_index().is_some());

        for target in (0..=plain.duration_ms()).step_by(7) {
            assert_eq!(plain.seek(target), indexed.seek(target), "target {target}");
        }
    }

    #[test]
    fn test_declared_duration_extends_seek_range() {
        let mut caps = video_caps();
        caps.duration_ms = 2_000;
        let index = MediaIndex::new(caps, interleaved(10, 100)).unwrap();
        assert_eq!(index.duration_ms(), 2_000);
        assert_eq!(index.seek(1_500), Some(18));
    }

    #[test]
    fn test_rejects_invalid_frame_tables() {
        let backwards = vec![MediaFrame::audio(0, 1, 50), MediaFrame::audio(1, 1, 10)];
        assert!(matches!(
            MediaIndex::new(video_caps(), backwards),
            Err(FormatError::CorruptFrame { index: 1, .. })
        ));

        let empty = vec![MediaFrame::audio(0, 0, 0)];
        assert!(MediaIndex::new(video_caps(), empty).is_err());
    }

    #[test]
    fn test_encoded_layout_parses_back() {
        let mut frames = vec![MediaFrame {
            kind: FrameKind::CodecInit(TrackType::Video),
            is_key_frame: true,
            file_offset: 0,
            length: 2,
            timestamp_ms: 0,
        }];
        frames.extend(interleaved(30, 40).into_iter().map(|mut f| {
            f.file_offset += 2;
            f
        }));
        let index = MediaIndex::new(video_caps(), frames).unwrap().with_time_index(500);

        let encoded = SeekFile::encode(&index).unwrap();
        assert_eq!(&encoded[..4], SEEK_FILE_MAGIC);
        assert_eq!(SeekFile::parse(&encoded).unwrap(), index);
    }

    #[test]
    fn test_parse_rejects_corruption() {
        let index = MediaIndex::new(video_caps(), interleaved(4, 40)).unwrap();
        let encoded = SeekFile::encode(&index).unwrap();

        assert!(SeekFile::parse(b"nope").is_err());
        assert!(SeekFile::parse(&encoded[..encoded.len() - 20]).is_err());

        let mut bad_magic = encoded.to_vec();
        bad_magic[0] = b'X';
        assert!(SeekFile::parse(&bad_magic).is_err());

        let mut bad_version = encoded.to_vec();
        bad_version[4] = 9;
        assert!(SeekFile::parse(&bad_version).is_err());
    }
}
