//! Audio decode stage for the playback pipeline
//!
//! Pops compressed audio packets, decodes them to PCM and writes the PCM into
//! the byte ring the audio output pulls from.

use anyhow::{Result, anyhow};
use log::{error, info, warn};

use crate::Error;
use crate::buffer::{QueueConsumer, RingWriter};
use crate::media::AudioDecoder;
use crate::pipeline::PipelineStage;
use crate::pipeline::stage::StageContext;
use crate::pipeline::types::Packet;

/// Audio decode stage: audio packet queue → decoder → audio ring
pub struct AudioDecodeStage {
    ctx: StageContext,
    decoder: Box<dyn AudioDecoder>,
    max_consecutive_failures: u32,
    input_rx: Option<QueueConsumer<Packet>>,
    ring_tx: Option<RingWriter>,
}

impl AudioDecodeStage {
    pub fn new(ctx: StageContext, decoder: Box<dyn AudioDecoder>, max_consecutive_failures: u32) -> Self {
        Self {
            ctx,
            decoder,
            max_consecutive_failures,
            input_rx: None,
            ring_tx: None,
        }
    }

    pub fn set_input(&mut self, rx: QueueConsumer<Packet>) {
        self.input_rx = Some(rx);
    }

    pub fn set_output(&mut self, tx: RingWriter) {
        self.ring_tx = Some(tx);
    }

    /// Write PCM in pieces the ring can hold, since ring writes are all-or-nothing.
    fn write_pcm(&self, ring_tx: &RingWriter, pcm: &[u8]) -> crate::Result<()> {
        for chunk in pcm.chunks(ring_tx.capacity()) {
            ring_tx.write(chunk)?;
            self.ctx.health.record_audio_decoded(chunk.len());
        }
        Ok(())
    }
}

impl PipelineStage for AudioDecodeStage {
    fn run(&mut self) -> Result<()> {
        let input_rx = self
            .input_rx
            .take()
            .ok_or_else(|| anyhow!("No audio packet queue"))?;
        let ring_tx = self
            .ring_tx
            .take()
            .ok_or_else(|| anyhow!("No audio ring"))?;

        let mut consecutive_failures: u32 = 0;
        let mut total_packets = 0u64;

        info!("AudioDecodeStage: started");

        let result = loop {
            if self.ctx.stop_requested() {
                info!("AudioDecodeStage: stop requested");
                break Ok(());
            }
            self.ctx.observe_upstream(&self.ctx.flags.demuxing_completed);

            let Some(packet) = input_rx.pop() else {
                let tail = self.decoder.flush();
                info!("AudioDecodeStage: end of input, {} bytes flushed", tail.len());
                let written = self.write_pcm(&ring_tx, &tail);
                self.ctx.flags.audio_decoding_completed.set();
                break written;
            };
            total_packets += 1;

            match self.decoder.decode(packet) {
                Ok(pcm) => {
                    consecutive_failures = 0;
                    if let Err(e) = self.write_pcm(&ring_tx, &pcm) {
                        break Err(e);
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    self.ctx.health.record_decode_failure();
                    warn!("AudioDecodeStage: decode failed: {:#}", e);

                    if consecutive_failures >= self.max_consecutive_failures {
                        error!(
                            "AudioDecodeStage: {} consecutive failures, giving up",
                            consecutive_failures
                        );
                        self.ctx.flags.audio_decoding_completed.set();
                        return Err(e.context(format!(
                            "AudioDecodeStage: {} consecutive decode failures",
                            consecutive_failures
                        )));
                    }
                }
            }
        };

        info!(
            "AudioDecodeStage: finished ({} packets, {} bytes left in ring)",
            total_packets,
            ring_tx.capacity() - ring_tx.available_write()
        );

        match result {
            Ok(()) => Ok(()),
            // The output releasing the ring during a stop is expected
            Err(Error::Disconnected) if self.ctx.stop_requested() => Ok(()),
            Err(Error::Disconnected) => Err(anyhow!("AudioDecodeStage: audio output is gone")),
            Err(e) => Err(e.into()),
        }
    }

    fn name(&self) -> &'static str {
        "AudioDecodeStage"
    }
}
