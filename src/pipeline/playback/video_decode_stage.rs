//! Video decode stage for the playback pipeline
//!
//! Pops compressed packets, decodes them and hands the frames to the render
//! stage through the frame link.

use anyhow::{Result, anyhow};
use log::{error, info, warn};

use crate::buffer::{Outlet, QueueConsumer};
use crate::media::VideoDecoder;
use crate::pipeline::PipelineStage;
use crate::pipeline::stage::StageContext;
use crate::pipeline::types::{Packet, VideoFrame};

/// Video decode stage: video packet queue → decoder → frame link
pub struct VideoDecodeStage {
    ctx: StageContext,
    decoder: Box<dyn VideoDecoder>,
    max_consecutive_failures: u32,
    input_rx: Option<QueueConsumer<Packet>>,
    output_tx: Option<Box<dyn Outlet<VideoFrame>>>,
}

impl VideoDecodeStage {
    pub fn new(ctx: StageContext, decoder: Box<dyn VideoDecoder>, max_consecutive_failures: u32) -> Self {
        Self {
            ctx,
            decoder,
            max_consecutive_failures,
            input_rx: None,
            output_tx: None,
        }
    }

    pub fn set_input(&mut self, rx: QueueConsumer<Packet>) {
        self.input_rx = Some(rx);
    }

    pub fn set_output(&mut self, tx: Box<dyn Outlet<VideoFrame>>) {
        self.output_tx = Some(tx);
    }

    /// Send decoded frames downstream. Returns false once the render side is gone.
    fn forward(&self, output_tx: &mut dyn Outlet<VideoFrame>, frames: Vec<VideoFrame>) -> bool {
        for frame in frames {
            self.ctx.health.record_frame_decoded();
            if output_tx.send(frame).is_err() {
                self.ctx.health.record_frame_drop();
                return false;
            }
        }
        true
    }

    /// The frame link was released under us; only an error outside of a stop.
    fn consumer_gone(&self) -> Result<()> {
        if self.ctx.stop_requested() {
            info!("VideoDecodeStage: frame link released by stop");
            Ok(())
        } else {
            Err(anyhow!("VideoDecodeStage: frame consumer is gone"))
        }
    }
}

impl PipelineStage for VideoDecodeStage {
    fn run(&mut self) -> Result<()> {
        let input_rx = self
            .input_rx
            .take()
            .ok_or_else(|| anyhow!("No video packet queue"))?;
        let mut output_tx = self
            .output_tx
            .take()
            .ok_or_else(|| anyhow!("No frame output"))?;

        let mut consecutive_failures: u32 = 0;
        let mut total_packets = 0u64;

        info!("VideoDecodeStage: started");

        loop {
            if self.ctx.stop_requested() {
                info!("VideoDecodeStage: stop requested");
                break;
            }
            self.ctx.observe_upstream(&self.ctx.flags.demuxing_completed);

            let Some(packet) = input_rx.pop() else {
                let frames = self.decoder.flush();
                info!("VideoDecodeStage: end of input, {} frames flushed", frames.len());
                let flushed = self.forward(output_tx.as_mut(), frames);
                self.ctx.flags.video_decoding_completed.set();
                if !flushed {
                    return self.consumer_gone();
                }
                break;
            };
            total_packets += 1;

            match self.decoder.decode(packet) {
                Ok(frames) => {
                    consecutive_failures = 0;
                    if !self.forward(output_tx.as_mut(), frames) {
                        return self.consumer_gone();
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    self.ctx.health.record_decode_failure();
                    warn!("VideoDecodeStage: decode failed: {:#}", e);

                    if consecutive_failures >= self.max_consecutive_failures {
                        error!(
                            "VideoDecodeStage: {} consecutive failures, giving up",
                            consecutive_failures
                        );
                        self.ctx.flags.video_decoding_completed.set();
                        return Err(e.context(format!(
                            "VideoDecodeStage: {} consecutive decode failures",
                            consecutive_failures
                        )));
                    }
                }
            }
        }

        info!("VideoDecodeStage: finished ({} packets)", total_packets);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "VideoDecodeStage"
    }
}
