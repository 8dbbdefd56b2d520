use bytes::{Bytes, BytesMut};

use crate::frame::TrackType;

/// Output bytes not yet drained by the network layer, one buffer per track.
#[derive(Debug, Default)]
pub struct FeedBuffers {
    audio: BytesMut,
    video: BytesMut,
}

impl FeedBuffers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn get(&self, track: TrackType) -> &BytesMut {
        match track {
            TrackType::Audio => &self.audio,
            TrackType::Video => &self.video,
        }
    }

    pub fn get_mut(&mut self, track: TrackType) -> &mut BytesMut {
        match track {
            TrackType::Audio => &mut self.audio,
            TrackType::Video => &mut self.video,
        }
    }

    pub fn append(&mut self, track: TrackType, data: &[u8]) {
        self.get_mut(track).extend_from_slice(data);
    }

    #[must_use]
    pub fn audio(&self) -> &[u8] {
        &self.audio
    }

    #[must_use]
    pub fn video(&self) -> &[u8] {
        &self.video
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.audio.len() + self.video.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain everything buffered for `track`.
    pub fn take(&mut self, track: TrackType) -> Bytes {
        self.get_mut(track).split().freeze()
    }

    /// Drop buffered bytes but keep the allocations for reuse.
    pub fn clear(&mut self) {
        self.audio.clear();
        self.video.clear();
    }

    /// Drop buffered bytes and their allocations.
    pub fn release(&mut self) {
        self.audio = BytesMut::new();
        self.video = BytesMut::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracks_are_independent() {
        let mut buffers = FeedBuffers::new();
        buffers.append(TrackType::Audio, b"aa");
        buffers.append(TrackType::Video, b"vvv");
        buffers.append(TrackType::Audio, b"a");

        assert_eq!(buffers.audio(), b"aaa");
        assert_eq!(buffers.video(), b"vvv");
        assert_eq!(buffers.len(), 6);

        let drained = buffers.take(TrackType::Video);
        assert_eq!(&drained[..], b"vvv");
        assert!(buffers.video().is_empty());
        assert_eq!(buffers.audio(), b"aaa");
    }

    #[test]
    fn test_clear_and_release() {
        let mut buffers = FeedBuffers::new();
        buffers.append(TrackType::Video, &[0u8; 1024]);
        buffers.clear();
        assert!(buffers.is_empty());
        assert!(buffers.get(TrackType::Video).capacity() >= 1024);

        buffers.release();
        assert_eq!(buffers.get(TrackType::Video).capacity(), 0);
    }
}
