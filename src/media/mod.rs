//! Boundary between the pipeline and the media libraries it drives
//!
//! The pipeline never looks inside packets or frames. Demuxing, decoding,
//! drawing and the audio device are supplied through these traits; each one is
//! owned and called by exactly one stage thread.

pub mod pull;
pub mod synthetic;

use anyhow::Result;
use bytes::Bytes;

use crate::pipeline::types::{Packet, StreamLayout, VideoFrame};

pub use pull::{AudioPull, PullStatus};

/// Container reader feeding the demux stage.
pub trait MediaSource: Send {
    /// Stream indices to route on. Queried once before the first read.
    fn streams(&self) -> StreamLayout;

    /// Next packet in container order, `None` at end of input.
    fn read_packet(&mut self) -> Result<Option<Packet>>;
}

pub trait VideoDecoder: Send {
    /// Decode one packet. A packet may yield zero or more frames.
    fn decode(&mut self, packet: Packet) -> Result<Vec<VideoFrame>>;

    /// Frames still held by the decoder once input has ended.
    fn flush(&mut self) -> Vec<VideoFrame> {
        Vec::new()
    }
}

pub trait AudioDecoder: Send {
    /// Decode one packet into interleaved PCM in the configured format.
    fn decode(&mut self, packet: Packet) -> Result<Bytes>;

    fn flush(&mut self) -> Bytes {
        Bytes::new()
    }
}

/// Draws decoded frames. The frame is only borrowed for the call.
pub trait FrameRenderer: Send {
    fn draw(&mut self, frame: &VideoFrame) -> Result<()>;
}

/// Audio device driving playback by pulling PCM.
///
/// `start` hands over the pull side of the audio ring; the device keeps it for
/// as long as it plays and drops it when done, which releases the audio decoder
/// if it is still writing.
pub trait AudioOutput: Send {
    fn start(&mut self, pull: AudioPull) -> Result<()>;

    /// Stop pulling and release the ring. Must be safe to call more than once.
    fn stop(&mut self);
}
