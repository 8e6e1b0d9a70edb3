//! Playback pipeline coordinator
//!
//! Owns every buffer between the stages, spawns one thread per stage and runs
//! the two ways a playback ends:
//!
//! - [`PlaybackCoordinator::wait`]: the source runs dry. Upstream stages exit on
//!   their own and their dropped endpoints finish the buffers below them, so the
//!   render stage and the audio output drain what is left.
//! - [`PlaybackCoordinator::stop`]: abort. Raises the stop signal, finishes or
//!   releases every buffer so no thread stays blocked, and drops whatever is
//!   still queued.
//!
//! Either way upstream stages are joined first and the render stage last.

use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use log::{error, info, warn};

use crate::buffer::{BoundedByteRing, BoundedItemRing, HandoffQueue, Inlet, Outlet};
use crate::config::PipelineConfig;
use crate::media::{
    AudioDecoder, AudioOutput, AudioPull, FrameRenderer, MediaSource, VideoDecoder,
};
use crate::pipeline::health::{HealthMonitor, HealthSummary, PipelineHealth};
use crate::pipeline::playback::audio_decode_stage::AudioDecodeStage;
use crate::pipeline::playback::demux_stage::DemuxStage;
use crate::pipeline::playback::render_stage::RenderStage;
use crate::pipeline::playback::video_decode_stage::VideoDecodeStage;
use crate::pipeline::stage::{StageContext, StageHandle, StageOutcome, spawn_stage};
use crate::pipeline::state::{LifecycleFlags, PipelineState, StageState, StageStatus};
use crate::pipeline::types::{MediaKind, Packet, VideoFrame};
use crate::utils::sos::SignalOfStop;

/// The four stage threads of a playback pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Demux,
    VideoDecode,
    AudioDecode,
    Render,
}

impl StageKind {
    /// Upstream stages first
    pub const ALL: [StageKind; 4] = [
        StageKind::Demux,
        StageKind::VideoDecode,
        StageKind::AudioDecode,
        StageKind::Render,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageKind::Demux => "demux",
            StageKind::VideoDecode => "video decode",
            StageKind::AudioDecode => "audio decode",
            StageKind::Render => "render",
        };
        write!(f, "{name}")
    }
}

/// External collaborators a playback runs against.
pub struct MediaComponents {
    pub source: Box<dyn MediaSource>,
    pub video_decoder: Box<dyn VideoDecoder>,
    pub audio_decoder: Box<dyn AudioDecoder>,
    pub renderer: Box<dyn FrameRenderer>,
    pub audio_output: Box<dyn AudioOutput>,
}

/// Result of a finished playback.
#[derive(Debug, Clone)]
pub struct PlaybackReport {
    /// Every stage reached its end of stream and none failed
    pub success: bool,
    /// The stop signal was raised before the end of stream
    pub stopped: bool,
    pub health: HealthSummary,
    pub stage_errors: Vec<(StageKind, String)>,
    pub elapsed: Duration,
}

impl fmt::Display for PlaybackReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = if self.success {
            "completed"
        } else if self.stopped {
            "stopped"
        } else {
            "failed"
        };
        write!(f, "Playback {} after {:?}. {}", outcome, self.elapsed, self.health)?;
        for (kind, message) in &self.stage_errors {
            write!(f, "\n  {} stage: {}", kind, message)?;
        }
        Ok(())
    }
}

/// Decoded frames travel through an unbounded queue unless a bound is configured.
enum FrameLink {
    Queue(Arc<HandoffQueue<VideoFrame>>),
    Ring(Arc<BoundedItemRing<VideoFrame>>),
}

type FrameEndpoints = (Box<dyn Outlet<VideoFrame>>, Box<dyn Inlet<VideoFrame>>);

impl FrameLink {
    fn new(capacity: Option<usize>) -> Self {
        match capacity {
            Some(capacity) => FrameLink::Ring(Arc::new(BoundedItemRing::new(capacity))),
            None => FrameLink::Queue(Arc::new(HandoffQueue::new())),
        }
    }

    fn endpoints(&self) -> crate::Result<FrameEndpoints> {
        Ok(match self {
            FrameLink::Queue(queue) => {
                let tx: Box<dyn Outlet<VideoFrame>> = Box::new(queue.producer()?);
                let rx: Box<dyn Inlet<VideoFrame>> = Box::new(queue.consumer()?);
                (tx, rx)
            }
            FrameLink::Ring(ring) => {
                let tx: Box<dyn Outlet<VideoFrame>> = Box::new(ring.sender()?);
                let rx: Box<dyn Inlet<VideoFrame>> = Box::new(ring.receiver()?);
                (tx, rx)
            }
        })
    }

    /// Wake both sides: the reader sees end of stream, a blocked writer gets its frame back.
    fn release(&self) {
        match self {
            FrameLink::Queue(queue) => queue.set_finished(),
            FrameLink::Ring(ring) => {
                ring.finish();
                ring.abandon();
            }
        }
    }
}

/// Coordinates the playback pipeline:
/// Demux → {Video Decode → Render, Audio Decode → Audio Output}
pub struct PlaybackCoordinator {
    config: PipelineConfig,
    state: PipelineState,
    health: Arc<PipelineHealth>,
    flags: Arc<LifecycleFlags>,
    sos: SignalOfStop,
    statuses: [Arc<StageStatus>; 4],

    video_packets: Arc<HandoffQueue<Packet>>,
    audio_packets: Arc<HandoffQueue<Packet>>,
    frames: FrameLink,
    audio_ring: Arc<BoundedByteRing>,

    stages: [Option<StageHandle>; 4],
    audio_output: Option<Box<dyn AudioOutput>>,
    monitor: Option<(SignalOfStop, JoinHandle<()>)>,
    stage_errors: Vec<(StageKind, String)>,
    started_at: Option<Instant>,
    elapsed: Duration,
}

impl PlaybackCoordinator {
    /// Validate `config` and allocate every buffer. No thread is started.
    pub fn new(config: PipelineConfig) -> crate::Result<Self> {
        config.validate()?;

        Ok(Self {
            state: PipelineState::Idle,
            health: Arc::new(PipelineHealth::new()),
            flags: Arc::new(LifecycleFlags::new()),
            sos: SignalOfStop::new(),
            statuses: Default::default(),
            video_packets: Arc::new(HandoffQueue::new()),
            audio_packets: Arc::new(HandoffQueue::new()),
            frames: FrameLink::new(config.frame_queue_capacity),
            audio_ring: Arc::new(BoundedByteRing::new(config.audio_ring_capacity)),
            stages: Default::default(),
            audio_output: None,
            monitor: None,
            stage_errors: Vec::new(),
            started_at: None,
            elapsed: Duration::ZERO,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stage_state(&self, kind: StageKind) -> StageState {
        self.statuses[kind.index()].get()
    }

    pub fn health(&self) -> &Arc<PipelineHealth> {
        &self.health
    }

    pub fn flags(&self) -> &Arc<LifecycleFlags> {
        &self.flags
    }

    /// Packets demuxed for `kind` and not yet taken by its decoder.
    pub fn queued_packets(&self, kind: MediaKind) -> usize {
        match kind {
            MediaKind::Video => self.video_packets.size(),
            MediaKind::Audio => self.audio_packets.size(),
        }
    }

    /// Clone of the stop signal, e.g. for a Ctrl-C handler.
    ///
    /// Raising it makes every stage wind down at its next check; [`wait`](Self::wait)
    /// then returns a report with `stopped` set.
    pub fn stop_signal(&self) -> SignalOfStop {
        self.sos.clone()
    }

    fn transition(&mut self, target: PipelineState) {
        if self.state.can_transition_to(&target) {
            info!("PlaybackCoordinator: {} -> {}", self.state, target);
            self.state = target;
        } else {
            warn!(
                "PlaybackCoordinator: ignoring transition {} -> {}",
                self.state, target
            );
        }
    }

    fn context(&self, kind: StageKind) -> StageContext {
        StageContext {
            status: self.statuses[kind.index()].clone(),
            health: self.health.clone(),
            flags: self.flags.clone(),
            sos: self.sos.clone(),
        }
    }

    fn spawn<S>(&mut self, kind: StageKind, stage: S) -> Result<()>
    where
        S: crate::pipeline::PipelineStage + 'static,
    {
        let status = self.statuses[kind.index()].clone();
        let handle = spawn_stage(stage, status)
            .with_context(|| format!("failed to spawn the {} stage", kind))?;
        self.stages[kind.index()] = Some(handle);
        Ok(())
    }

    /// Start the stage threads, the audio output and the health monitor.
    ///
    /// On error everything already started is torn down again.
    pub fn launch(&mut self, components: MediaComponents) -> Result<()> {
        if self.state != PipelineState::Idle {
            return Err(crate::Error::InvalidState("launch requires an idle pipeline").into());
        }

        let started_at = Instant::now();
        self.started_at = Some(started_at);
        self.transition(PipelineState::Running { started_at });

        if let Err(e) = self.start_threads(components) {
            error!("PlaybackCoordinator: launch failed: {:#}", e);
            self.stop();
            return Err(e);
        }
        Ok(())
    }

    fn start_threads(&mut self, components: MediaComponents) -> Result<()> {
        let MediaComponents {
            source,
            video_decoder,
            audio_decoder,
            renderer,
            mut audio_output,
        } = components;

        let video_tx = self.video_packets.producer()?;
        let video_rx = self.video_packets.consumer()?;
        let audio_tx = self.audio_packets.producer()?;
        let audio_rx = self.audio_packets.consumer()?;
        let (frame_tx, frame_rx) = self.frames.endpoints()?;
        let ring_tx = self.audio_ring.writer()?;
        let ring_rx = self.audio_ring.reader()?;

        let max_failures = self.config.max_consecutive_decode_failures;

        let mut render = RenderStage::new(self.context(StageKind::Render), renderer);
        render.set_input(frame_rx);
        self.spawn(StageKind::Render, render)?;

        let mut video = VideoDecodeStage::new(self.context(StageKind::VideoDecode), video_decoder, max_failures);
        video.set_input(video_rx);
        video.set_output(frame_tx);
        self.spawn(StageKind::VideoDecode, video)?;

        let mut audio = AudioDecodeStage::new(self.context(StageKind::AudioDecode), audio_decoder, max_failures);
        audio.set_input(audio_rx);
        audio.set_output(ring_tx);
        self.spawn(StageKind::AudioDecode, audio)?;

        let mut demux = DemuxStage::new(self.context(StageKind::Demux), source);
        demux.set_outputs(video_tx, audio_tx);
        self.spawn(StageKind::Demux, demux)?;

        let pull = AudioPull::new(
            ring_rx,
            self.health.clone(),
            self.config.audio.period_bytes(),
            self.config.underrun_timeout(),
        );
        // Keep the output before starting it so stop() can reach it whatever happens
        let start = audio_output.start(pull);
        self.audio_output = Some(audio_output);
        start.context("failed to start the audio output")?;

        let monitor_stop = SignalOfStop::new();
        let monitor = HealthMonitor::new(self.health.clone())
            .with_check_interval(self.config.health_log_interval())
            .with_stall_threshold(self.config.stall_threshold())
            .spawn(monitor_stop.clone())
            .context("failed to spawn the health monitor")?;
        self.monitor = Some((monitor_stop, monitor));

        info!(
            "PlaybackCoordinator: launched ({} byte audio ring, frame link {})",
            self.config.audio_ring_capacity,
            match self.config.frame_queue_capacity {
                Some(capacity) => format!("bounded to {}", capacity),
                None => "unbounded".to_string(),
            }
        );
        Ok(())
    }

    fn join_stage(&mut self, kind: StageKind) {
        let Some(handle) = self.stages[kind.index()].take() else {
            return;
        };
        let name = handle.name();
        match handle.join() {
            StageOutcome::Completed => info!("PlaybackCoordinator: {} joined", name),
            outcome => {
                error!("PlaybackCoordinator: {} {}", name, outcome);
                self.stage_errors.push((kind, outcome.to_string()));
            }
        }
    }

    fn stop_audio_output(&mut self) {
        if let Some(mut output) = self.audio_output.take() {
            output.stop();
        }
    }

    fn stop_monitor(&mut self) {
        if let Some((monitor_stop, monitor)) = self.monitor.take() {
            monitor_stop.cancel();
            if monitor.join().is_err() {
                error!("PlaybackCoordinator: health monitor panicked");
            }
        }
    }

    fn finish(&mut self) -> PlaybackReport {
        self.stop_monitor();
        if let Some(started_at) = self.started_at {
            self.elapsed = started_at.elapsed();
        }
        self.transition(PipelineState::Stopped);

        let report = self.report();
        info!("{}", report);
        report
    }

    /// Wait for the playback to run to its end and shut down in order.
    pub fn wait(&mut self) -> Result<PlaybackReport> {
        if !self.state.is_running() {
            return Err(anyhow!(crate::Error::InvalidState(
                "wait requires a running pipeline"
            )));
        }

        for kind in [StageKind::Demux, StageKind::VideoDecode, StageKind::AudioDecode] {
            self.join_stage(kind);
        }
        self.transition(PipelineState::Draining);

        // Frame link is finished by now, so render exits once it has drawn the rest
        self.join_stage(StageKind::Render);

        if !self.audio_ring.wait_drained(self.config.drain_timeout()) {
            warn!(
                "PlaybackCoordinator: audio ring not drained after {:?}, {} bytes dropped",
                self.config.drain_timeout(),
                self.audio_ring.available_read()
            );
        }

        self.transition(PipelineState::Stopping);
        self.audio_ring.close();
        self.stop_audio_output();

        Ok(self.finish())
    }

    /// Abort the playback: stop every stage now and drop pending data.
    ///
    /// Idempotent; on a stopped pipeline it returns the final report again.
    pub fn stop(&mut self) -> PlaybackReport {
        if self.state == PipelineState::Stopped {
            return self.report();
        }

        self.transition(PipelineState::Stopping);
        self.sos.cancel();

        // Nothing may stay blocked on a buffer whose other side is leaving
        self.video_packets.set_finished();
        self.audio_packets.set_finished();
        self.frames.release();
        self.audio_ring.close();
        self.audio_ring.abandon();

        for kind in StageKind::ALL {
            self.join_stage(kind);
        }
        self.stop_audio_output();

        // Stages that never ran still end up Completed
        for status in &self.statuses {
            status.advance(StageState::Completed);
        }

        self.finish()
    }

    fn report(&self) -> PlaybackReport {
        let stopped = self.sos.cancelled();
        PlaybackReport {
            success: !stopped && self.stage_errors.is_empty() && self.flags.all_completed(),
            stopped,
            health: self.health.summary(),
            stage_errors: self.stage_errors.clone(),
            elapsed: self.elapsed,
        }
    }
}

impl Drop for PlaybackCoordinator {
    fn drop(&mut self) {
        if self.state != PipelineState::Stopped {
            self.stop();
        }
    }
}
