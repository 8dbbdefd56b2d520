// File-backed stream engine
//
// One engine per playback session. The session drives it with control
// signals, the network layer with readiness callbacks, and an optional
// `FeedTimer` with periodic ticks. All three must be serialized by the
// owner (`&mut self` everywhere; share as `Arc<Mutex<_>>` when needed).
//
// Feed step order:
// 1. codec initialization bytes, once per (re)start or seek
// 2. look-ahead throttle against the client buffer
// 3. play length limit and end of media
// 4. format hook materializes the next frame into the track buffer

use bytes::{Bytes, BytesMut};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::buffers::FeedBuffers;
use crate::capabilities::StreamCapabilities;
use crate::config::{FeedingConfig, StorageConfig, VodConfig};
use crate::error::{FormatError, Result, StreamError};
use crate::file::{FileAccess, FileHandle};
use crate::format::MediaFormat;
use crate::frame::{MediaFrame, TrackType};
use crate::metadata::StreamMetadata;
use crate::pacing::PacingClock;
use crate::seekfile::MediaIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StreamState {
    Uninitialized,
    Initializing,
    Ready,
    Playing,
    Paused,
    /// End of media or play length reached. Handles are kept so a new play
    /// request can restart the stream.
    Completed,
    /// Terminal. Buffers and file handles are released.
    Stopped,
}

/// Notifications for the session layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Ended { stream_id: String, name: String },
    Failed { stream_id: String, name: String, reason: String },
}

pub type StreamEventSender = mpsc::UnboundedSender<StreamEvent>;
pub type StreamEventReceiver = mpsc::UnboundedReceiver<StreamEvent>;

/// Result of one feed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// Codec initialization bytes were written to the buffers.
    CodecsSent,
    FrameSent(MediaFrame),
    /// The client holds enough look-ahead; wait for the next readiness
    /// signal or timer tick.
    Throttled,
    /// The stream reached its end during this step.
    Completed,
    /// Nothing to do in the current state.
    Idle,
}

impl FeedOutcome {
    /// Whether the step put bytes into a buffer.
    #[must_use]
    pub const fn delivered(&self) -> bool {
        matches!(self, Self::CodecsSent | Self::FrameSent(_))
    }
}

/// What a timer tick observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not actively feeding.
    Idle,
    /// Frames were fed since the previous tick.
    Healthy,
    /// Feeding is held back by the client buffer.
    Throttled,
    /// No feeding since the previous tick, below the stall threshold.
    Waiting,
    /// Stalled for the configured number of ticks; pacing was rebased.
    StallReset,
}

pub struct FileStreamEngine {
    id: String,
    name: String,
    path: PathBuf,
    format: Arc<dyn MediaFormat>,
    access: Arc<dyn FileAccess>,
    feeding: FeedingConfig,
    window_size: usize,
    events: StreamEventSender,

    state: StreamState,
    index: Option<MediaIndex>,
    current_frame_index: u32,
    pacing: PacingClock,
    client_buffer_seconds: i32,
    play_start_ms: u64,
    play_limit_ms: Option<u64>,
    buffers: FeedBuffers,
    scratch: BytesMut,
    paused: bool,
    codecs_sent: bool,
    end_notified: bool,

    data_file: Option<FileHandle>,
    seek_file: Option<FileHandle>,

    feeds_since_tick: u32,
    idle_ticks: u32,
    throttled: bool,
}

impl FileStreamEngine {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        format: Arc<dyn MediaFormat>,
        access: Arc<dyn FileAccess>,
        events: StreamEventSender,
    ) -> Self {
        let feeding = FeedingConfig::default();
        Self {
            id: nanoid::nanoid!(10),
            name: name.into(),
            path: path.into(),
            format,
            access,
            client_buffer_seconds: feeding.client_buffer_seconds,
            feeding,
            window_size: StorageConfig::default().window_size,
            events,
            state: StreamState::Uninitialized,
            index: None,
            current_frame_index: 0,
            pacing: PacingClock::new(),
            play_start_ms: 0,
            play_limit_ms: None,
            buffers: FeedBuffers::new(),
            scratch: BytesMut::new(),
            paused: false,
            codecs_sent: false,
            end_notified: false,
            data_file: None,
            seek_file: None,
            feeds_since_tick: 0,
            idle_ticks: 0,
            throttled: false,
        }
    }

    /// Engine for a file resolved by
    /// [`resolve_complete_metadata`](crate::metadata::resolve_complete_metadata).
    pub fn from_metadata(
        metadata: &StreamMetadata,
        format: Arc<dyn MediaFormat>,
        access: Arc<dyn FileAccess>,
        config: &VodConfig,
        events: StreamEventSender,
    ) -> Self {
        Self::new(
            metadata.file_name.clone(),
            metadata.media_full_path.clone(),
            format,
            access,
            events,
        )
        .with_feeding_config(config.feeding.clone())
        .with_window_size(config.storage.window_size)
    }

    #[must_use]
    pub fn with_feeding_config(mut self, feeding: FeedingConfig) -> Self {
        self.client_buffer_seconds = feeding.client_buffer_seconds;
        self.feeding = feeding;
        self
    }

    #[must_use]
    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub const fn state(&self) -> StreamState {
        self.state
    }

    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    pub const fn codecs_sent(&self) -> bool {
        self.codecs_sent
    }

    pub const fn current_frame_index(&self) -> u32 {
        self.current_frame_index
    }

    pub fn total_frame_count(&self) -> u32 {
        self.index.as_ref().map_or(0, MediaIndex::frame_count)
    }

    pub const fn client_buffer_seconds(&self) -> i32 {
        self.client_buffer_seconds
    }

    pub const fn feeding_config(&self) -> &FeedingConfig {
        &self.feeding
    }

    pub const fn pacing(&self) -> &PacingClock {
        &self.pacing
    }

    pub const fn buffers(&self) -> &FeedBuffers {
        &self.buffers
    }

    /// Buffers for the network layer to drain.
    pub fn buffers_mut(&mut self) -> &mut FeedBuffers {
        &mut self.buffers
    }

    pub fn take(&mut self, track: TrackType) -> Bytes {
        self.buffers.take(track)
    }

    /// Codec and container description. Available once the engine is ready.
    pub fn capabilities(&self) -> Result<&StreamCapabilities> {
        self.index
            .as_ref()
            .map(MediaIndex::capabilities)
            .ok_or_else(|| self.invalid("capabilities"))
    }

    /// Open the media (and seek) file and load the frame table.
    pub fn initialize(&mut self, client_buffer_seconds: i32) -> Result<()> {
        self.ensure_live("initialize")?;
        if self.state != StreamState::Uninitialized {
            return Err(self.invalid("initialize"));
        }

        self.state = StreamState::Initializing;
        self.client_buffer_seconds = client_buffer_seconds;

        match self.load() {
            Ok(index) => {
                tracing::info!(
                    stream = %self.name,
                    id = %self.id,
                    format = self.format.name(),
                    frames = index.frame_count(),
                    duration_ms = index.duration_ms(),
                    client_buffer_seconds,
                    "File stream initialized"
                );
                self.index = Some(index);
                self.state = StreamState::Ready;
                Ok(())
            }
            Err(reason) => {
                tracing::error!(stream = %self.name, id = %self.id, "File stream initialization failed: {}", reason);
                if let Err(e) = self.release_files() {
                    tracing::error!(stream = %self.name, "Failed to release stream resources: {}", e);
                }
                self.state = StreamState::Stopped;
                Err(StreamError::Initialization(reason))
            }
        }
    }

    fn load(&mut self) -> std::result::Result<MediaIndex, String> {
        let data = self
            .access
            .open(&self.path, self.window_size)
            .map_err(|e| e.to_string())?;

        let seek = match self.format.seek_file_path(&self.path) {
            Some(seek_path) if seek_path.is_file() => Some(
                self.access
                    .open(&seek_path, self.window_size)
                    .map_err(|e| e.to_string())?,
            ),
            _ => None,
        };

        let index = self
            .format
            .load_index(&data, seek.as_ref())
            .map_err(|e| format!("{}: {e}", self.path.display()))?;
        if index.frame_count() == 0 {
            return Err(format!("{} has no frames", self.path.display()));
        }

        self.data_file = Some(data);
        self.seek_file = seek;
        Ok(index)
    }

    /// Start feeding from `start_ms`. `length_ms` limits how much media is
    /// delivered; `None` plays to the end.
    pub fn signal_play(&mut self, start_ms: u64, length_ms: Option<u64>) -> Result<()> {
        self.ensure_live("play")?;
        if !matches!(
            self.state,
            StreamState::Ready | StreamState::Paused | StreamState::Completed
        ) {
            return Err(self.invalid("play"));
        }

        self.internal_seek(start_ms)?;
        self.buffers.clear();
        self.codecs_sent = false;
        self.pacing.restart(start_ms);
        self.play_start_ms = start_ms;
        self.play_limit_ms = length_ms;
        self.paused = false;
        self.end_notified = false;
        self.reset_tick_bookkeeping();
        self.state = StreamState::Playing;

        tracing::info!(
            stream = %self.name,
            id = %self.id,
            start_ms,
            length_ms = ?length_ms,
            frame = self.current_frame_index,
            "Play"
        );
        Ok(())
    }

    pub fn signal_pause(&mut self) -> Result<()> {
        self.ensure_live("pause")?;
        match self.state {
            StreamState::Playing => {
                self.paused = true;
                self.pacing.pause();
                self.state = StreamState::Paused;
                tracing::debug!(stream = %self.name, id = %self.id, frame = self.current_frame_index, "Pause");
                Ok(())
            }
            StreamState::Paused => Ok(()),
            _ => Err(self.invalid("pause")),
        }
    }

    pub fn signal_resume(&mut self) -> Result<()> {
        self.ensure_live("resume")?;
        if self.state != StreamState::Paused {
            return Err(self.invalid("resume"));
        }

        self.paused = false;
        self.pacing.resume();
        self.reset_tick_bookkeeping();
        self.state = StreamState::Playing;
        tracing::debug!(stream = %self.name, id = %self.id, frame = self.current_frame_index, "Resume");
        Ok(())
    }

    /// Jump to `target_ms`, keeping the current playing/paused state.
    pub fn signal_seek(&mut self, target_ms: u64) -> Result<()> {
        self.ensure_live("seek")?;
        if !matches!(self.state, StreamState::Playing | StreamState::Paused) {
            return Err(self.invalid("seek"));
        }

        self.internal_seek(target_ms)?;
        self.buffers.clear();
        self.codecs_sent = false;
        self.pacing.restart(target_ms);
        self.play_start_ms = target_ms;
        self.end_notified = false;
        self.reset_tick_bookkeeping();

        tracing::debug!(
            stream = %self.name,
            id = %self.id,
            target_ms,
            frame = self.current_frame_index,
            "Seek"
        );
        Ok(())
    }

    /// Terminate the stream. Buffers and file handles are released; the
    /// engine accepts no further signals.
    pub fn signal_stop(&mut self) -> Result<()> {
        self.ensure_live("stop")?;
        let result = self.shutdown();
        tracing::info!(stream = %self.name, id = %self.id, frame = self.current_frame_index, "Stop");
        result
    }

    /// The client announced a new buffer length.
    pub fn set_client_buffer_seconds(&mut self, seconds: i32) -> Result<()> {
        self.ensure_live("set buffer length")?;
        self.client_buffer_seconds = seconds;
        Ok(())
    }

    /// The network layer can take more data. Runs feed steps until one
    /// delivers nothing or the per-call step budget is used up.
    pub fn ready_for_send(&mut self) -> Result<FeedOutcome> {
        let mut last = FeedOutcome::Idle;
        for _ in 0..self.feeding.max_steps_per_ready {
            last = self.feed()?;
            if !last.delivered() {
                break;
            }
        }
        Ok(last)
    }

    /// Run a single feed step.
    pub fn feed(&mut self) -> Result<FeedOutcome> {
        if self.state != StreamState::Playing || self.paused {
            return Ok(FeedOutcome::Idle);
        }

        if !self.codecs_sent {
            self.send_codecs()?;
            self.codecs_sent = true;
            self.feeds_since_tick += 1;
            return Ok(FeedOutcome::CodecsSent);
        }

        if self.pacing.is_throttled(self.client_buffer_seconds) {
            if !self.throttled {
                tracing::trace!(
                    stream = %self.name,
                    ahead_ms = self.pacing.ahead_ms(),
                    "Client buffer full, holding back"
                );
            }
            self.throttled = true;
            return Ok(FeedOutcome::Throttled);
        }
        self.throttled = false;

        let index = self.current_frame_index;
        let Some(frame) = self.index.as_ref().and_then(|i| i.frame(index)).copied() else {
            return Ok(self.complete("end of media"));
        };

        if let Some(limit) = self.play_limit_ms {
            let presented = i64::from(frame.timestamp_ms) - to_signed(self.play_start_ms);
            if presented > to_signed(limit) {
                return Ok(self.complete("play length reached"));
            }
        }

        let Some(data) = self.data_file.as_ref() else {
            return Err(StreamError::InvariantViolation(format!(
                "stream {} is playing without a data file",
                self.name
            )));
        };
        self.scratch.clear();
        if let Err(e) = self.format.build_frame(data, index, &frame, &mut self.scratch) {
            return self.frame_failed(index, e);
        }

        self.buffers.append(frame.track(), &self.scratch);
        self.pacing.record_sent(u64::from(frame.timestamp_ms));
        self.current_frame_index += 1;
        self.feeds_since_tick += 1;

        if self.current_frame_index == self.total_frame_count() {
            self.complete("end of media");
        }
        Ok(FeedOutcome::FrameSent(frame))
    }

    /// Periodic bookkeeping. Never reads frames.
    pub fn on_timer_tick(&mut self) -> TickOutcome {
        if self.state != StreamState::Playing || self.paused {
            self.reset_tick_bookkeeping();
            return TickOutcome::Idle;
        }
        if self.throttled {
            self.reset_tick_bookkeeping();
            return TickOutcome::Throttled;
        }
        if self.feeds_since_tick > 0 {
            self.reset_tick_bookkeeping();
            return TickOutcome::Healthy;
        }

        self.idle_ticks += 1;
        if self.idle_ticks < self.feeding.stall_threshold_ticks {
            return TickOutcome::Waiting;
        }

        tracing::warn!(
            stream = %self.name,
            id = %self.id,
            ahead_ms = self.pacing.ahead_ms(),
            idle_ticks = self.idle_ticks,
            "Feeding stalled, rebasing pacing clock"
        );
        self.idle_ticks = 0;
        self.pacing.rebase();
        TickOutcome::StallReset
    }

    /// Write codec initialization bytes for every track. Frame position and
    /// pacing are left exactly as they were.
    fn send_codecs(&mut self) -> Result<()> {
        let saved_index = self.current_frame_index;
        let saved_pacing = self.pacing;

        let Some(index) = self.index.as_ref() else {
            return Err(StreamError::InvariantViolation(format!(
                "stream {} has no index",
                self.name
            )));
        };
        let capabilities = index.capabilities();

        for track in TrackType::ALL {
            self.scratch.clear();
            match self
                .format
                .build_codec_init(capabilities, track, &mut self.scratch)
            {
                Ok(true) => self.buffers.append(track, &self.scratch),
                Ok(false) => {}
                Err(e) => {
                    // Unlike frames, codec headers are never optional.
                    let index = self.current_frame_index;
                    return Err(self.fail(StreamError::CorruptFrame {
                        index,
                        reason: format!("{track:?} codec initialization: {e}"),
                    }));
                }
            }
        }

        self.current_frame_index = saved_index;
        self.pacing = saved_pacing;
        tracing::trace!(stream = %self.name, "Codec initialization sent");
        Ok(())
    }

    /// Position on the first frame of the greatest timestamp `<= target_ms`.
    fn internal_seek(&mut self, target_ms: u64) -> Result<u32> {
        let Some(index) = self.index.as_ref() else {
            return Err(self.invalid("seek"));
        };
        let Some(frame) = index.seek(target_ms) else {
            return Err(StreamError::SeekOutOfRange {
                requested_ms: target_ms,
                duration_ms: index.duration_ms(),
            });
        };
        self.current_frame_index = frame;
        Ok(frame)
    }

    /// Frame `index` could not be built. The last frame failing counts as
    /// the end of the stream; anything earlier is fatal.
    fn frame_failed(&mut self, index: u32, error: FormatError) -> Result<FeedOutcome> {
        let at_last_frame = index + 1 >= self.total_frame_count();
        let end_like = matches!(
            error,
            FormatError::EndOfFile { .. } | FormatError::CorruptFrame { .. }
        );
        if at_last_frame && end_like {
            tracing::warn!(stream = %self.name, id = %self.id, frame = index, "Last frame unreadable: {}", error);
            self.current_frame_index = self.total_frame_count();
            return Ok(self.complete("end of media"));
        }

        let error = match error {
            FormatError::EndOfFile { .. } => StreamError::EndOfFile { index },
            FormatError::CorruptFrame { reason, .. } => StreamError::CorruptFrame { index, reason },
            other => StreamError::CorruptFrame {
                index,
                reason: other.to_string(),
            },
        };
        Err(self.fail(error))
    }

    /// Fatal error: notify the session and stop the engine.
    fn fail(&mut self, error: StreamError) -> StreamError {
        tracing::error!(stream = %self.name, id = %self.id, frame = self.current_frame_index, "Stream failed: {}", error);
        self.notify(StreamEvent::Failed {
            stream_id: self.id.clone(),
            name: self.name.clone(),
            reason: error.to_string(),
        });
        if let Err(e) = self.shutdown() {
            tracing::error!(stream = %self.name, "Failed to release stream resources: {}", e);
        }
        error
    }

    fn complete(&mut self, reason: &str) -> FeedOutcome {
        if !self.end_notified {
            self.end_notified = true;
            tracing::info!(
                stream = %self.name,
                id = %self.id,
                frame = self.current_frame_index,
                sent_ms = self.pacing.sent_ms(),
                "Stream completed: {}",
                reason
            );
            self.notify(StreamEvent::Ended {
                stream_id: self.id.clone(),
                name: self.name.clone(),
            });
        }
        self.state = StreamState::Completed;
        FeedOutcome::Completed
    }

    fn notify(&self, event: StreamEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!(stream = %self.name, "Session gone, dropping stream event");
        }
    }

    fn shutdown(&mut self) -> Result<()> {
        self.state = StreamState::Stopped;
        self.paused = true;
        self.buffers.release();
        self.scratch = BytesMut::new();
        self.release_files()
    }

    fn release_files(&mut self) -> Result<()> {
        let mut result = Ok(());
        for mut handle in [self.data_file.take(), self.seek_file.take()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = handle.release() {
                result = Err(e.into());
            }
        }
        result
    }

    fn reset_tick_bookkeeping(&mut self) {
        self.feeds_since_tick = 0;
        self.idle_ticks = 0;
        self.throttled = false;
    }

    fn ensure_live(&self, operation: &str) -> Result<()> {
        if self.state == StreamState::Stopped {
            return Err(StreamError::InvariantViolation(format!(
                "{operation} on stopped stream {}",
                self.name
            )));
        }
        Ok(())
    }

    fn invalid(&self, operation: &'static str) -> StreamError {
        StreamError::InvalidState {
            operation,
            state: self.state,
        }
    }
}

fn to_signed(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl std::fmt::Debug for FileStreamEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStreamEngine")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("frame", &self.current_frame_index)
            .field("total", &self.total_frame_count())
            .field("codecs_sent", &self.codecs_sent)
            .finish_non_exhaustive()
    }
}
