// File-backed media sources for SyncTV
//
// Plays pre-recorded media files to live clients: a frame table (seek file)
// drives paced delivery into per-track buffers the network layer drains,
// with play/pause/seek/stop control and shared, reference-counted file
// handles across concurrent viewers.

pub mod buffers;
pub mod capabilities;
pub mod config;
pub mod engine;
pub mod error;
pub mod file;
pub mod format;
pub mod frame;
pub mod logging;
pub mod metadata;
pub mod pacing;
pub mod seekfile;
pub mod timer;

pub use buffers::FeedBuffers;
pub use capabilities::StreamCapabilities;
pub use config::VodConfig;
pub use engine::{
    FeedOutcome, FileStreamEngine, StreamEvent, StreamEventReceiver, StreamEventSender,
    StreamState, TickOutcome,
};
pub use error::{FileCacheError, FormatError, Result, StreamError};
pub use file::{FileAccess, FileAccessMode, FileHandle, SharedFileCache};
pub use format::{MediaFormat, RawFrameFormat};
pub use frame::{FrameKind, MediaFrame, TrackType};
pub use metadata::{resolve_complete_metadata, PartialMetadata, StreamMetadata};
pub use seekfile::{MediaIndex, SeekFile};
pub use timer::{FeedTimer, SharedEngine};
