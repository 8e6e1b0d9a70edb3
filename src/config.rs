use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// PCM layout of the audio ring, shared by the audio decoder and output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bytes_per_sample: u16,
    /// Frames requested by the output on each pull
    pub frames_per_period: usize,
}

impl AudioFormat {
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * self.bytes_per_sample as usize
    }

    /// Bytes the output pulls from the ring per period
    pub fn period_bytes(&self) -> usize {
        self.frames_per_period.saturating_mul(self.bytes_per_frame())
    }

    /// `None` when the period size does not fit in a `usize`.
    pub fn checked_period_bytes(&self) -> Option<usize> {
        self.frames_per_period.checked_mul(self.bytes_per_frame())
    }

    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.bytes_per_frame()
    }

    /// Wall-clock length of one period
    pub fn period_duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames_per_period as f64 / self.sample_rate.max(1) as f64)
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
            bytes_per_sample: 2,
            frames_per_period: 256,
        }
    }
}

/// Tuning knobs of a playback pipeline.
///
/// Every field has a default, so a JSON file only needs the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Size of the decoded-audio byte ring
    pub audio_ring_capacity: usize,

    pub audio: AudioFormat,

    /// Bound on queued decoded frames; unbounded when absent
    pub frame_queue_capacity: Option<usize>,

    /// Consecutive decode errors after which a decoder stage gives up
    pub max_consecutive_decode_failures: u32,

    /// How long an audio pull waits for data before padding with silence
    pub underrun_timeout_ms: Option<u64>,

    /// How long a normal shutdown waits for the audio output to drain the ring
    pub drain_timeout_ms: u64,

    pub health_log_interval_secs: u64,

    pub stall_threshold_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            audio_ring_capacity: 4096,
            audio: AudioFormat::default(),
            frame_queue_capacity: None,
            max_consecutive_decode_failures: 10,
            underrun_timeout_ms: None,
            drain_timeout_ms: 2000,
            health_log_interval_secs: 30,
            stall_threshold_ms: 5000,
        }
    }
}

impl PipelineConfig {
    /// Load a configuration from a JSON file and validate it.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the pipeline could deadlock or divide by zero on.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| -> Result<()> { Err(Error::InvalidConfig(msg)) };

        if self.audio_ring_capacity == 0 {
            return invalid("audio_ring_capacity must be greater than 0".into());
        }
        if self.audio.sample_rate == 0
            || self.audio.channels == 0
            || self.audio.bytes_per_sample == 0
            || self.audio.frames_per_period == 0
        {
            return invalid(format!("audio format has a zero field: {:?}", self.audio));
        }
        let Some(period_bytes) = self.audio.checked_period_bytes() else {
            return invalid(format!(
                "audio period of {} frames overflows the byte count",
                self.audio.frames_per_period
            ));
        };
        if period_bytes > self.audio_ring_capacity {
            return invalid(format!(
                "audio period of {} bytes does not fit in a ring of {} bytes",
                period_bytes, self.audio_ring_capacity
            ));
        }
        if self.frame_queue_capacity == Some(0) {
            return invalid("frame_queue_capacity must be greater than 0".into());
        }
        if self.max_consecutive_decode_failures == 0 {
            return invalid("max_consecutive_decode_failures must be greater than 0".into());
        }
        if self.health_log_interval_secs == 0 {
            return invalid("health_log_interval_secs must be greater than 0".into());
        }
        Ok(())
    }

    pub fn underrun_timeout(&self) -> Option<Duration> {
        self.underrun_timeout_ms.map(Duration::from_millis)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn health_log_interval(&self) -> Duration {
        Duration::from_secs(self.health_log_interval_secs)
    }

    pub fn stall_threshold(&self) -> Duration {
        Duration::from_millis(self.stall_threshold_ms)
    }
}

/// Returns a version as specified in Cargo.toml
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}
