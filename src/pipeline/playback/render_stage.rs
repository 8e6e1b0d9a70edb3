//! Render stage for the playback pipeline

use anyhow::{Result, anyhow};
use log::{debug, info, warn};

use crate::buffer::Inlet;
use crate::media::FrameRenderer;
use crate::pipeline::PipelineStage;
use crate::pipeline::stage::StageContext;
use crate::pipeline::types::VideoFrame;

/// Render stage: frame link → renderer
///
/// Each frame is lent to the renderer for one draw call and released right
/// after it. Draw errors are counted, never fatal.
pub struct RenderStage {
    ctx: StageContext,
    renderer: Box<dyn FrameRenderer>,
    input_rx: Option<Box<dyn Inlet<VideoFrame>>>,
}

impl RenderStage {
    pub fn new(ctx: StageContext, renderer: Box<dyn FrameRenderer>) -> Self {
        Self {
            ctx,
            renderer,
            input_rx: None,
        }
    }

    pub fn set_input(&mut self, rx: Box<dyn Inlet<VideoFrame>>) {
        self.input_rx = Some(rx);
    }
}

impl PipelineStage for RenderStage {
    fn run(&mut self) -> Result<()> {
        let mut input_rx = self
            .input_rx
            .take()
            .ok_or_else(|| anyhow!("No frame input"))?;

        let health = &self.ctx.health;
        let mut rendered = 0u64;

        info!("RenderStage: started");

        loop {
            self.ctx.observe_upstream(&self.ctx.flags.video_decoding_completed);

            let Some(frame) = input_rx.recv() else {
                info!("RenderStage: end of frames");
                break;
            };

            if self.ctx.stop_requested() {
                info!("RenderStage: stop requested");
                health.record_frame_drop();
                break;
            }

            match self.renderer.draw(&frame) {
                Ok(()) => {
                    rendered += 1;
                    health.record_frame_rendered();
                }
                Err(e) => {
                    health.record_render_failure();
                    warn!("RenderStage: draw failed for frame at {}: {:#}", frame.pts, e);
                }
            }
            debug!("RenderStage: released frame at {}", frame.pts);
        }

        info!("RenderStage: finished ({} frames rendered)", rendered);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "RenderStage"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::HandoffQueue;
    use crate::media::synthetic::RecordingRenderer;
    use crate::pipeline::health::PipelineHealth;
    use crate::pipeline::state::{LifecycleFlags, StageStatus};
    use crate::pipeline::types::Timestamp;
    use crate::utils::sos::SignalOfStop;
    use bytes::Bytes;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn context() -> StageContext {
        StageContext {
            status: Arc::new(StageStatus::new()),
            health: Arc::new(PipelineHealth::new()),
            flags: Arc::new(LifecycleFlags::new()),
            sos: SignalOfStop::new(),
        }
    }

    fn frame(micros: i64, width: u32) -> VideoFrame {
        VideoFrame {
            data: Bytes::from_static(&[0; 16]),
            width,
            height: 2,
            pts: Timestamp::from_micros(micros),
        }
    }

    #[test]
    fn test_draws_every_frame_in_order() {
        let ctx = context();
        let frames = Arc::new(HandoffQueue::new());
        let renderer = RecordingRenderer::new();
        let drawn = renderer.drawn();

        frames.push(frame(0, 2));
        frames.push(frame(1, 0));
        frames.push(frame(2, 2));
        frames.set_finished();

        let mut stage = RenderStage::new(ctx.clone(), Box::new(renderer));
        stage.set_input(Box::new(frames.consumer().unwrap()));
        stage.run().unwrap();

        assert_eq!(
            *drawn.lock(),
            vec![Timestamp::from_micros(0), Timestamp::from_micros(2)]
        );
        let summary = ctx.health.summary();
        assert_eq!(summary.frames_rendered, 2);
        assert_eq!(summary.render_failures, 1);
    }

    #[test]
    fn test_blocks_until_frames_finished() {
        let ctx = context();
        let frames = Arc::new(HandoffQueue::new());
        let producer = frames.producer().unwrap();

        let mut stage = RenderStage::new(ctx.clone(), Box::new(RecordingRenderer::new()));
        stage.set_input(Box::new(frames.consumer().unwrap()));
        let render = thread::spawn(move || stage.run());

        thread::sleep(Duration::from_millis(30));
        assert!(!render.is_finished());

        producer.push(frame(0, 2));
        drop(producer);
        render.join().unwrap().unwrap();
        assert_eq!(ctx.health.frames_rendered(), 1);
    }

    #[test]
    fn test_stop_drops_pending_frames() {
        let ctx = context();
        let frames = Arc::new(HandoffQueue::new());
        frames.push(frame(0, 2));
        frames.push(frame(1, 2));
        ctx.sos.cancel();

        let mut stage = RenderStage::new(ctx.clone(), Box::new(RecordingRenderer::new()));
        stage.set_input(Box::new(frames.consumer().unwrap()));
        stage.run().unwrap();

        assert_eq!(ctx.health.frames_rendered(), 0);
        assert_eq!(ctx.health.summary().frames_dropped, 1);
    }
}
