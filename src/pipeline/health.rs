//! Health monitoring and metrics for pipeline

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{info, warn};

use crate::utils::sos::SignalOfStop;

fn now_micros() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}

/// Health metrics for a pipeline
///
/// Tracks counters updated by every stage thread. All fields use atomic
/// operations for thread-safe access.
pub struct PipelineHealth {
    /// Packets routed to the video queue
    pub video_packets: AtomicU64,

    /// Packets routed to the audio queue
    pub audio_packets: AtomicU64,

    /// Packets belonging to no routed stream
    pub packets_dropped: AtomicU64,

    /// Frames produced by the video decoder
    pub frames_decoded: AtomicU64,

    /// Frames handed to the renderer
    pub frames_rendered: AtomicU64,

    /// Frames discarded because the consumer was gone or stop was raised
    pub frames_dropped: AtomicU64,

    /// Number of decode failures (both media kinds)
    pub decode_failures: AtomicU64,

    /// Number of failed draw calls
    pub render_failures: AtomicU64,

    /// PCM bytes written into the audio ring
    pub audio_bytes_decoded: AtomicU64,

    /// PCM bytes pulled by the audio output
    pub audio_bytes_played: AtomicU64,

    /// Silence bytes padded into short audio pulls
    pub silence_bytes_padded: AtomicU64,

    /// Audio pulls that had to be padded
    pub underruns: AtomicU64,

    /// Timestamp (as Unix microseconds) of the last unit any stage moved
    pub last_activity_time: AtomicU64,
}

impl PipelineHealth {
    /// Create a new health metrics instance
    pub fn new() -> Self {
        Self {
            video_packets: AtomicU64::new(0),
            audio_packets: AtomicU64::new(0),
            packets_dropped: AtomicU64::new(0),
            frames_decoded: AtomicU64::new(0),
            frames_rendered: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            render_failures: AtomicU64::new(0),
            audio_bytes_decoded: AtomicU64::new(0),
            audio_bytes_played: AtomicU64::new(0),
            silence_bytes_padded: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
            last_activity_time: AtomicU64::new(now_micros()),
        }
    }

    fn touch(&self) {
        self.last_activity_time
            .store(now_micros(), Ordering::Relaxed);
    }

    pub fn record_video_packet(&self) {
        self.video_packets.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_audio_packet(&self) {
        self.audio_packets.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_packet_drop(&self) {
        self.packets_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_decoded(&self) {
        self.frames_decoded.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_frame_rendered(&self) {
        self.frames_rendered.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_frame_drop(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_render_failure(&self) {
        self.render_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_audio_decoded(&self, bytes: usize) {
        self.audio_bytes_decoded
            .fetch_add(bytes as u64, Ordering::Relaxed);
        self.touch();
    }

    /// Record one audio pull: bytes taken from the ring and silence padded after them
    pub fn record_audio_pull(&self, played: usize, padded: usize) {
        self.audio_bytes_played
            .fetch_add(played as u64, Ordering::Relaxed);
        if padded > 0 {
            self.silence_bytes_padded
                .fetch_add(padded as u64, Ordering::Relaxed);
            self.underruns.fetch_add(1, Ordering::Relaxed);
        }
        if played > 0 {
            self.touch();
        }
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded.load(Ordering::Relaxed)
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered.load(Ordering::Relaxed)
    }

    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    pub fn audio_bytes_played(&self) -> u64 {
        self.audio_bytes_played.load(Ordering::Relaxed)
    }

    pub fn silence_bytes_padded(&self) -> u64 {
        self.silence_bytes_padded.load(Ordering::Relaxed)
    }

    /// Check if the pipeline has stalled (nothing moved for given duration)
    pub fn is_stalled(&self, threshold: Duration) -> bool {
        let last = self.last_activity_time.load(Ordering::Relaxed);
        let elapsed_micros = now_micros().saturating_sub(last);
        elapsed_micros > threshold.as_micros() as u64
    }

    /// Get a summary of health metrics
    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            video_packets: self.video_packets.load(Ordering::Relaxed),
            audio_packets: self.audio_packets.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            frames_decoded: self.frames_decoded(),
            frames_rendered: self.frames_rendered(),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            decode_failures: self.decode_failures(),
            render_failures: self.render_failures.load(Ordering::Relaxed),
            audio_bytes_decoded: self.audio_bytes_decoded.load(Ordering::Relaxed),
            audio_bytes_played: self.audio_bytes_played(),
            silence_bytes_padded: self.silence_bytes_padded(),
            underruns: self.underruns.load(Ordering::Relaxed),
        }
    }
}

impl Default for PipelineHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of health metrics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthSummary {
    pub video_packets: u64,
    pub audio_packets: u64,
    pub packets_dropped: u64,
    pub frames_decoded: u64,
    pub frames_rendered: u64,
    pub frames_dropped: u64,
    pub decode_failures: u64,
    pub render_failures: u64,
    pub audio_bytes_decoded: u64,
    pub audio_bytes_played: u64,
    pub silence_bytes_padded: u64,
    pub underruns: u64,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Health: {}/{} video/audio packets ({} unrouted), {} frames decoded, {} rendered ({} dropped), {} decode failures, {} render failures, {}/{} audio bytes decoded/played, {} silence bytes in {} underruns",
            self.video_packets,
            self.audio_packets,
            self.packets_dropped,
            self.frames_decoded,
            self.frames_rendered,
            self.frames_dropped,
            self.decode_failures,
            self.render_failures,
            self.audio_bytes_decoded,
            self.audio_bytes_played,
            self.silence_bytes_padded,
            self.underruns
        )
    }
}

/// Health alert types
#[derive(Debug, Clone, PartialEq)]
pub enum HealthAlert {
    /// Nothing moved through the pipeline for the threshold duration
    Stalled { duration: Duration },

    /// New decode failures since the last check
    DecodeFailures { count: u64 },

    /// New padded audio pulls since the last check
    Underruns { count: u64 },
}

impl std::fmt::Display for HealthAlert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthAlert::Stalled { duration } => {
                write!(f, "Pipeline stalled for {:?}", duration)
            }
            HealthAlert::DecodeFailures { count } => {
                write!(f, "Decode failures: {}", count)
            }
            HealthAlert::Underruns { count } => {
                write!(f, "Audio underruns: {}", count)
            }
        }
    }
}

/// Health monitoring service
///
/// Periodically logs a summary and warns about stalls, decode failures and
/// audio underruns. Runs on its own thread until the stop signal is raised.
pub struct HealthMonitor {
    health: Arc<PipelineHealth>,
    check_interval: Duration,
    stall_threshold: Duration,
    last_decode_failures: u64,
    last_underruns: u64,
}

impl HealthMonitor {
    /// Create a new health monitor
    pub fn new(health: Arc<PipelineHealth>) -> Self {
        Self {
            health,
            check_interval: Duration::from_secs(30),
            stall_threshold: Duration::from_secs(5),
            last_decode_failures: 0,
            last_underruns: 0,
        }
    }

    /// Configure the check interval
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Configure the stall threshold
    pub fn with_stall_threshold(mut self, threshold: Duration) -> Self {
        self.stall_threshold = threshold;
        self
    }

    /// Compare the counters against the previous check
    pub fn check(&mut self) -> Vec<HealthAlert> {
        let mut alerts = Vec::new();

        if self.health.is_stalled(self.stall_threshold) {
            alerts.push(HealthAlert::Stalled {
                duration: self.stall_threshold,
            });
        }

        let decode_failures = self.health.decode_failures();
        if decode_failures > self.last_decode_failures {
            alerts.push(HealthAlert::DecodeFailures {
                count: decode_failures - self.last_decode_failures,
            });
            self.last_decode_failures = decode_failures;
        }

        let underruns = self.health.underruns.load(Ordering::Relaxed);
        if underruns > self.last_underruns {
            alerts.push(HealthAlert::Underruns {
                count: underruns - self.last_underruns,
            });
            self.last_underruns = underruns;
        }

        alerts
    }

    /// Run the monitor on a dedicated thread until `sos` is cancelled
    pub fn spawn(mut self, sos: SignalOfStop) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("health-monitor".into())
            .spawn(move || {
                while !sos.wait_timeout(self.check_interval) {
                    info!("Pipeline health: {}", self.health.summary());
                    for alert in self.check() {
                        warn!("Pipeline health alert: {}", alert);
                    }
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_metrics() {
        let health = PipelineHealth::new();

        health.record_video_packet();
        health.record_video_packet();
        health.record_audio_packet();
        health.record_packet_drop();
        health.record_frame_decoded();
        health.record_frame_rendered();
        health.record_audio_decoded(4096);
        health.record_audio_pull(1000, 24);
        health.record_audio_pull(1024, 0);

        let summary = health.summary();
        assert_eq!(summary.video_packets, 2);
        assert_eq!(summary.audio_packets, 1);
        assert_eq!(summary.packets_dropped, 1);
        assert_eq!(summary.frames_decoded, 1);
        assert_eq!(summary.frames_rendered, 1);
        assert_eq!(summary.audio_bytes_decoded, 4096);
        assert_eq!(summary.audio_bytes_played, 2024);
        assert_eq!(summary.silence_bytes_padded, 24);
        assert_eq!(summary.underruns, 1);
    }

    #[test]
    fn test_stall_detection() {
        let health = PipelineHealth::new();

        // Should not be stalled immediately
        assert!(!health.is_stalled(Duration::from_secs(1)));

        health.record_frame_rendered();

        // Simulate stall by not recording anything
        std::thread::sleep(Duration::from_millis(150));

        assert!(health.is_stalled(Duration::from_millis(100)));
    }

    #[test]
    fn test_monitor_reports_new_failures_once() {
        let health = Arc::new(PipelineHealth::new());
        let mut monitor =
            HealthMonitor::new(health.clone()).with_stall_threshold(Duration::from_secs(60));

        assert!(monitor.check().is_empty());

        health.record_decode_failure();
        health.record_decode_failure();
        health.record_audio_pull(0, 512);
        assert_eq!(
            monitor.check(),
            vec![
                HealthAlert::DecodeFailures { count: 2 },
                HealthAlert::Underruns { count: 1 }
            ]
        );
        assert!(monitor.check().is_empty());
    }

    #[test]
    fn test_monitor_thread_stops_on_signal() {
        let health = Arc::new(PipelineHealth::new());
        let sos = SignalOfStop::new();
        let handle = HealthMonitor::new(health)
            .with_check_interval(Duration::from_millis(10))
            .spawn(sos.clone())
            .unwrap();

        std::thread::sleep(Duration::from_millis(30));
        sos.cancel();
        handle.join().unwrap();
    }
}
