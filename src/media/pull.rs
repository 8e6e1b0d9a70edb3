//! Pull side of the decoded-audio ring
//!
//! Audio devices ask for a fixed number of bytes per period and cannot wait
//! for a decoder to catch up at end of stream. Short reads are therefore padded
//! with silence; every padded byte is counted so underruns stay visible.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace};

use crate::Error;
use crate::buffer::RingReader;
use crate::pipeline::health::PipelineHealth;

/// Outcome of one [`AudioPull::fill`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullStatus {
    /// Bytes of real PCM copied from the ring
    pub read: usize,
    /// Bytes of silence written after them
    pub padded: usize,
    /// The decoder closed the ring and nothing is left to play
    pub end_of_stream: bool,
}

pub struct AudioPull {
    reader: RingReader,
    health: Arc<PipelineHealth>,
    underrun_timeout: Option<Duration>,
    period_bytes: usize,
}

impl AudioPull {
    pub fn new(
        reader: RingReader,
        health: Arc<PipelineHealth>,
        period_bytes: usize,
        underrun_timeout: Option<Duration>,
    ) -> Self {
        Self {
            reader,
            health,
            underrun_timeout,
            period_bytes,
        }
    }

    /// Bytes the device should request per period.
    pub fn period_bytes(&self) -> usize {
        self.period_bytes
    }

    /// Fill `out` completely: PCM from the ring first, silence after it.
    ///
    /// Blocks until `out` can be filled from the ring, the decoder closes it,
    /// or the underrun timeout (if any) expires. On a timeout whatever the ring
    /// holds is still played; only the rest is silence.
    pub fn fill(&mut self, out: &mut [u8]) -> PullStatus {
        let mut read = 0;

        // Requests larger than the ring are served one ring-full at a time
        let chunk_size = self.reader.capacity();
        for chunk in out.chunks_mut(chunk_size) {
            let wanted = chunk.len();
            let got = self.read_chunk(chunk);
            read += got;
            if got < wanted {
                break;
            }
        }

        let padded = out.len() - read;
        if padded > 0 {
            out[read..].fill(0);
            trace!("AudioPull: padded {} bytes of silence", padded);
        }
        self.health.record_audio_pull(read, padded);

        PullStatus {
            read,
            padded,
            end_of_stream: self.reader.is_drained(),
        }
    }

    fn read_chunk(&self, chunk: &mut [u8]) -> usize {
        let result = match self.underrun_timeout {
            Some(timeout) => self.reader.read_timeout(chunk, timeout),
            None => self.reader.read(chunk),
        };
        match result {
            Ok(n) => n,
            Err(Error::Timeout) => self.read_available(chunk),
            Err(e) => {
                debug!("AudioPull: read failed: {}", e);
                0
            }
        }
    }

    /// Take what is buffered right now, at most `chunk.len()` bytes.
    fn read_available(&self, chunk: &mut [u8]) -> usize {
        let n = self.reader.available_read().min(chunk.len());
        if n == 0 {
            return 0;
        }
        // Single reader: the count can only grow, so this read never waits
        self.reader.read(&mut chunk[..n]).unwrap_or(0)
    }
}
