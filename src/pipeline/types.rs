//! Core types moving through the pipeline

use bytes::Bytes;
use std::time::Duration;

/// Timestamp representation for media units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    /// Microseconds since stream start
    pub micros: i64,
}

impl Timestamp {
    /// Create a new timestamp from microseconds
    pub fn from_micros(micros: i64) -> Self {
        Self { micros }
    }

    /// Create a timestamp from a duration since stream start
    pub fn from_duration(duration: Duration) -> Self {
        Self {
            micros: duration.as_micros() as i64,
        }
    }

    /// Convert to duration (negative timestamps clamp to zero)
    pub fn as_duration(&self) -> Duration {
        Duration::from_micros(self.micros.max(0) as u64)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}µs", self.micros)
    }
}

/// Kind of media data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// Video frame data
    Video,
    /// Audio sample data
    Audio,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Video => write!(f, "Video"),
            MediaKind::Audio => write!(f, "Audio"),
        }
    }
}

/// Stream indices the demuxer routes on.
///
/// Packets whose stream index matches neither are dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamLayout {
    pub video_stream: Option<usize>,
    pub audio_stream: Option<usize>,
}

impl StreamLayout {
    /// Classify a packet's stream index
    pub fn classify(&self, stream_index: usize) -> Option<MediaKind> {
        if self.video_stream == Some(stream_index) {
            Some(MediaKind::Video)
        } else if self.audio_stream == Some(stream_index) {
            Some(MediaKind::Audio)
        } else {
            None
        }
    }
}

/// Compressed unit read by the demuxer.
///
/// Not `Clone`: a packet is moved from the demuxer into a queue and from the
/// queue into a decoder exactly once.
pub struct Packet {
    /// Index of the stream this packet belongs to
    pub stream_index: usize,

    /// Compressed payload
    pub data: Bytes,

    /// Presentation timestamp
    pub pts: Timestamp,

    /// Whether this is a keyframe (video only)
    pub is_keyframe: bool,
}

impl Packet {
    pub fn new(stream_index: usize, data: Bytes, pts: Timestamp) -> Self {
        Self {
            stream_index,
            data,
            pts,
            is_keyframe: false,
        }
    }

    pub fn keyframe(mut self) -> Self {
        self.is_keyframe = true;
        self
    }

    /// Get the size of the payload in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("stream_index", &self.stream_index)
            .field("pts", &self.pts)
            .field("is_keyframe", &self.is_keyframe)
            .field("size", &self.size())
            .finish()
    }
}

/// Decoded picture handed from the video decoder to the renderer.
pub struct VideoFrame {
    /// Raw picture data, layout owned by the decoder/renderer pair
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub pts: Timestamp,
}

impl VideoFrame {
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

impl std::fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pts", &self.pts)
            .field("size", &self.size())
            .finish()
    }
}
