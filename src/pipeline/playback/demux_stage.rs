//! Demux stage for the playback pipeline
//!
//! Reads packets from the media source and routes them by stream index into
//! the video and audio packet queues.

use anyhow::{Result, anyhow};
use log::{info, trace};

use crate::buffer::QueueProducer;
use crate::media::MediaSource;
use crate::pipeline::PipelineStage;
use crate::pipeline::stage::StageContext;
use crate::pipeline::types::{MediaKind, Packet};

/// Demux stage: source → video packet queue + audio packet queue
pub struct DemuxStage {
    ctx: StageContext,
    source: Box<dyn MediaSource>,
    video_tx: Option<QueueProducer<Packet>>,
    audio_tx: Option<QueueProducer<Packet>>,
}

impl DemuxStage {
    pub fn new(ctx: StageContext, source: Box<dyn MediaSource>) -> Self {
        Self {
            ctx,
            source,
            video_tx: None,
            audio_tx: None,
        }
    }

    pub fn set_outputs(&mut self, video_tx: QueueProducer<Packet>, audio_tx: QueueProducer<Packet>) {
        self.video_tx = Some(video_tx);
        self.audio_tx = Some(audio_tx);
    }
}

impl PipelineStage for DemuxStage {
    fn run(&mut self) -> Result<()> {
        // Both producers are locals from here on: any exit finishes both queues
        let video_tx = self
            .video_tx
            .take()
            .ok_or_else(|| anyhow!("No video packet queue"))?;
        let audio_tx = self
            .audio_tx
            .take()
            .ok_or_else(|| anyhow!("No audio packet queue"))?;

        let layout = self.source.streams();
        let health = &self.ctx.health;
        let mut total_packets = 0u64;

        info!("DemuxStage: started ({:?})", layout);

        let result = loop {
            if self.ctx.stop_requested() {
                info!("DemuxStage: stop requested");
                break Ok(());
            }

            let packet = match self.source.read_packet() {
                Ok(Some(packet)) => packet,
                Ok(None) => {
                    info!("DemuxStage: end of source");
                    self.ctx.flags.demuxing_completed.set();
                    break Ok(());
                }
                Err(e) => {
                    // A read error ends the stream like end of file does
                    self.ctx.flags.demuxing_completed.set();
                    break Err(e.context("DemuxStage: failed to read packet"));
                }
            };
            total_packets += 1;

            // A decoder that gave up abandons its queue; its packets are dropped
            match layout.classify(packet.stream_index) {
                Some(MediaKind::Video) => {
                    if video_tx.push(packet) {
                        health.record_video_packet();
                    } else {
                        health.record_packet_drop();
                    }
                }
                Some(MediaKind::Audio) => {
                    if audio_tx.push(packet) {
                        health.record_audio_packet();
                    } else {
                        health.record_packet_drop();
                    }
                }
                None => {
                    trace!("DemuxStage: dropping packet of stream {}", packet.stream_index);
                    health.record_packet_drop();
                }
            }
        };

        video_tx.finish();
        audio_tx.finish();

        info!(
            "DemuxStage: finished ({} packets, {} video queued, {} audio queued)",
            total_packets,
            video_tx.size(),
            audio_tx.size()
        );
        result
    }

    fn name(&self) -> &'static str {
        "DemuxStage"
    }
}
