//! In-process stand-ins for the media libraries
//!
//! Used by the command line demo and the tests to drive a full pipeline
//! without a container, codec or audio device.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use bytes::Bytes;
use log::{debug, info};
use parking_lot::Mutex;

use super::{AudioDecoder, AudioOutput, AudioPull, FrameRenderer, MediaSource, VideoDecoder};
use crate::pipeline::types::{Packet, StreamLayout, Timestamp, VideoFrame};
use crate::utils::sos::SignalOfStop;

pub const VIDEO_STREAM: usize = 0;
pub const AUDIO_STREAM: usize = 1;
/// Stream the pipeline does not route (subtitles, data tracks...)
pub const FOREIGN_STREAM: usize = 2;

const FRAME_INTERVAL_MICROS: i64 = 40_000;
const AUDIO_INTERVAL_MICROS: i64 = 20_000;
const KEYFRAME_INTERVAL: usize = 30;

/// Source producing interleaved video and audio packets.
///
/// Video packet `i` carries `i` as four little-endian bytes; audio packet `i`
/// carries `audio_packet_bytes` copies of `i as u8`.
pub struct SyntheticSource {
    layout: StreamLayout,
    packets: VecDeque<Packet>,
}

impl SyntheticSource {
    pub fn new(video_frames: usize, audio_packets: usize, audio_packet_bytes: usize) -> Self {
        let mut packets = VecDeque::with_capacity(video_frames + audio_packets);
        for i in 0..video_frames.max(audio_packets) {
            if i < video_frames {
                packets.push_back(Self::video_packet(i));
            }
            if i < audio_packets {
                packets.push_back(Packet::new(
                    AUDIO_STREAM,
                    Bytes::from(vec![i as u8; audio_packet_bytes]),
                    Timestamp::from_micros(i as i64 * AUDIO_INTERVAL_MICROS),
                ));
            }
        }

        Self {
            layout: StreamLayout {
                video_stream: Some(VIDEO_STREAM),
                audio_stream: Some(AUDIO_STREAM),
            },
            packets,
        }
    }

    /// Replay a fixed packet list.
    pub fn from_packets(layout: StreamLayout, packets: Vec<Packet>) -> Self {
        Self {
            layout,
            packets: packets.into(),
        }
    }

    /// Insert a packet of an unrouted stream after every `every` packets.
    pub fn with_foreign_packets(mut self, every: usize) -> Self {
        let every = every.max(1);
        let packets = std::mem::take(&mut self.packets);
        for (i, packet) in packets.into_iter().enumerate() {
            let pts = packet.pts;
            self.packets.push_back(packet);
            if (i + 1) % every == 0 {
                self.packets
                    .push_back(Packet::new(FOREIGN_STREAM, Bytes::from_static(b"sub"), pts));
            }
        }
        self
    }

    pub fn video_packet(index: usize) -> Packet {
        let packet = Packet::new(
            VIDEO_STREAM,
            Bytes::copy_from_slice(&(index as u32).to_le_bytes()),
            Timestamp::from_micros(index as i64 * FRAME_INTERVAL_MICROS),
        );
        if index % KEYFRAME_INTERVAL == 0 {
            packet.keyframe()
        } else {
            packet
        }
    }

    /// Packets not yet read
    pub fn remaining(&self) -> usize {
        self.packets.len()
    }
}

impl MediaSource for SyntheticSource {
    fn streams(&self) -> StreamLayout {
        self.layout
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        Ok(self.packets.pop_front())
    }
}

/// Turns each non-empty packet into one frame carrying the packet payload.
///
/// With a delay of `n` the decoder holds `n` frames back until the next
/// packets arrive, and hands them out on flush.
pub struct PassthroughVideoDecoder {
    width: u32,
    height: u32,
    delay: usize,
    pending: VecDeque<VideoFrame>,
}

impl PassthroughVideoDecoder {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            delay: 0,
            pending: VecDeque::new(),
        }
    }

    pub fn with_delay(mut self, delay: usize) -> Self {
        self.delay = delay;
        self
    }
}

impl VideoDecoder for PassthroughVideoDecoder {
    fn decode(&mut self, packet: Packet) -> Result<Vec<VideoFrame>> {
        if packet.data.is_empty() {
            bail!("empty video packet at {}", packet.pts);
        }
        self.pending.push_back(VideoFrame {
            data: packet.data,
            width: self.width,
            height: self.height,
            pts: packet.pts,
        });

        let ready = self.pending.len().saturating_sub(self.delay);
        Ok(self.pending.drain(..ready).collect())
    }

    fn flush(&mut self) -> Vec<VideoFrame> {
        self.pending.drain(..).collect()
    }
}

/// Audio packets already hold PCM; empty packets are decode errors.
#[derive(Default)]
pub struct PcmAudioDecoder;

impl AudioDecoder for PcmAudioDecoder {
    fn decode(&mut self, packet: Packet) -> Result<Bytes> {
        if packet.data.is_empty() {
            return Err(anyhow!("empty audio packet at {}", packet.pts));
        }
        Ok(packet.data)
    }
}

/// Renderer that records the timestamp of every drawn frame.
#[derive(Default)]
pub struct RecordingRenderer {
    drawn: Arc<Mutex<Vec<Timestamp>>>,
    frame_time: Option<Duration>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long per draw call, like a vsync-bound display.
    pub fn with_frame_time(mut self, frame_time: Duration) -> Self {
        self.frame_time = Some(frame_time);
        self
    }

    pub fn drawn(&self) -> Arc<Mutex<Vec<Timestamp>>> {
        self.drawn.clone()
    }
}

impl FrameRenderer for RecordingRenderer {
    fn draw(&mut self, frame: &VideoFrame) -> Result<()> {
        if frame.width == 0 || frame.height == 0 {
            bail!("cannot draw a {}x{} frame", frame.width, frame.height);
        }
        if let Some(frame_time) = self.frame_time {
            thread::sleep(frame_time);
        }
        self.drawn.lock().push(frame.pts);
        Ok(())
    }
}

/// Audio device that pulls periods on its own thread and keeps the PCM.
#[derive(Default)]
pub struct NullAudioOutput {
    captured: Arc<Mutex<Vec<u8>>>,
    pace: Option<Duration>,
    sos: SignalOfStop,
    worker: Option<JoinHandle<()>>,
}

impl NullAudioOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait this long between pulls, e.g. one period, to play in real time.
    pub fn paced(mut self, period: Duration) -> Self {
        self.pace = Some(period);
        self
    }

    /// PCM pulled so far, silence padding excluded
    pub fn captured(&self) -> Arc<Mutex<Vec<u8>>> {
        self.captured.clone()
    }
}

impl AudioOutput for NullAudioOutput {
    fn start(&mut self, mut pull: AudioPull) -> Result<()> {
        if self.worker.is_some() {
            bail!("audio output already started");
        }

        let sos = self.sos.clone();
        let captured = self.captured.clone();
        let pace = self.pace;

        let worker = thread::Builder::new()
            .name("audio-output".into())
            .spawn(move || {
                info!("NullAudioOutput: started");
                let mut period = vec![0u8; pull.period_bytes()];
                while !sos.cancelled() {
                    let status = pull.fill(&mut period);
                    captured.lock().extend_from_slice(&period[..status.read]);
                    if status.end_of_stream {
                        debug!("NullAudioOutput: end of stream");
                        break;
                    }
                    if let Some(pace) = pace {
                        if sos.wait_timeout(pace) {
                            break;
                        }
                    }
                }
                info!("NullAudioOutput: stopped");
            })?;

        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) {
        self.sos.cancel();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("NullAudioOutput: output thread panicked");
            }
        }
    }
}

impl Drop for NullAudioOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_interleaves_streams() {
        let mut source = SyntheticSource::new(2, 3, 4);
        let mut streams = Vec::new();
        while let Some(packet) = source.read_packet().unwrap() {
            streams.push(packet.stream_index);
        }
        assert_eq!(
            streams,
            vec![VIDEO_STREAM, AUDIO_STREAM, VIDEO_STREAM, AUDIO_STREAM, AUDIO_STREAM]
        );
        assert!(source.read_packet().unwrap().is_none());
    }

    #[test]
    fn test_foreign_packets_inserted() {
        let source = SyntheticSource::new(2, 2, 4).with_foreign_packets(2);
        assert_eq!(source.remaining(), 6);
        assert_eq!(source.packets[2].stream_index, FOREIGN_STREAM);
        assert_eq!(source.packets[5].stream_index, FOREIGN_STREAM);
    }

    #[test]
    fn test_video_decoder_delay_and_flush() {
        let mut decoder = PassthroughVideoDecoder::new(4, 4).with_delay(1);
        assert!(decoder.decode(SyntheticSource::video_packet(0)).unwrap().is_empty());

        let frames = decoder.decode(SyntheticSource::video_packet(1)).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].pts, Timestamp::from_micros(0));

        let rest = decoder.flush();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].pts, Timestamp::from_micros(FRAME_INTERVAL_MICROS));
    }

    #[test]
    fn test_empty_packets_fail_to_decode() {
        let empty = || Packet::new(VIDEO_STREAM, Bytes::new(), Timestamp::default());
        assert!(PassthroughVideoDecoder::new(4, 4).decode(empty()).is_err());
        assert!(PcmAudioDecoder.decode(empty()).is_err());
    }

    #[test]
    fn test_renderer_records_frames() {
        let mut renderer = RecordingRenderer::new();
        let drawn = renderer.drawn();
        let frame = VideoFrame {
            data: Bytes::from_static(&[0; 4]),
            width: 1,
            height: 1,
            pts: Timestamp::from_micros(7),
        };
        renderer.draw(&frame).unwrap();
        assert_eq!(*drawn.lock(), vec![Timestamp::from_micros(7)]);

        let broken = VideoFrame { width: 0, ..frame };
        assert!(renderer.draw(&broken).is_err());
    }
}
