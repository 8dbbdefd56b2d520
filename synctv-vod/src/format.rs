use bytes::BytesMut;
use std::io;
use std::path::{Path, PathBuf};

use crate::capabilities::StreamCapabilities;
use crate::error::FormatError;
use crate::file::FileHandle;
use crate::frame::{MediaFrame, TrackType};
use crate::seekfile::{seek_file_path_for, MediaIndex, SeekFile};

/// Container/protocol strategy plugged into a
/// [`FileStreamEngine`](crate::engine::FileStreamEngine).
///
/// The engine owns timing, state and buffers. A format only knows how to
/// load the frame table of a file and how to turn one table entry into the
/// bytes handed to the network layer.
pub trait MediaFormat: Send + Sync {
    fn name(&self) -> &str;

    /// Companion seek/index file for `data_path`, `None` if the format
    /// indexes the data file itself.
    fn seek_file_path(&self, data_path: &Path) -> Option<PathBuf> {
        Some(seek_file_path_for(data_path))
    }

    /// Load capabilities and the frame table.
    ///
    /// The default implementation parses the seek file.
    fn load_index(
        &self,
        _data: &FileHandle,
        seek: Option<&FileHandle>,
    ) -> Result<MediaIndex, FormatError> {
        let seek = seek.ok_or(FormatError::MissingSeekFile)?;
        SeekFile::parse(&seek.read_all()?)
    }

    /// Materialize frame `index` of the table into `out`.
    ///
    /// Must report [`FormatError::EndOfFile`] when the payload lies past the
    /// end of the data file and [`FormatError::CorruptFrame`] when it cannot
    /// be interpreted. `out` is scratch space owned by the engine; partial
    /// output on error is discarded.
    fn build_frame(
        &self,
        data: &FileHandle,
        index: u32,
        frame: &MediaFrame,
        out: &mut BytesMut,
    ) -> Result<(), FormatError>;

    /// Write codec initialization bytes for `track` into `out`. Returns
    /// `false` when the track has none.
    fn build_codec_init(
        &self,
        capabilities: &StreamCapabilities,
        track: TrackType,
        out: &mut BytesMut,
    ) -> Result<bool, FormatError> {
        match capabilities.codec_init(track) {
            Some(init) => {
                out.extend_from_slice(init);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Append the payload of `frame` to `out`, mapping short reads to
/// [`FormatError::EndOfFile`].
pub fn read_frame_payload(
    data: &FileHandle,
    frame: &MediaFrame,
    out: &mut BytesMut,
) -> Result<(), FormatError> {
    data.read_into(frame.file_offset, frame.length as usize, out)
        .map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => FormatError::EndOfFile {
                offset: frame.file_offset,
            },
            _ => FormatError::Io(e),
        })
}

/// Pass-through format: frame payloads are copied verbatim from the data
/// file, the frame table comes from the seek file.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawFrameFormat;

impl MediaFormat for RawFrameFormat {
    fn name(&self) -> &str {
        "raw"
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
}
