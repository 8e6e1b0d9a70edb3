//! Playback pipeline components
//!
//! - DemuxStage: splits the container into video and audio packets
//! - VideoDecodeStage: packets to frames
//! - AudioDecodeStage: packets to PCM in the audio ring
//! - RenderStage: draws frames
//!
//! The playback pipeline flow:
//! ```text
//!          ┌→ video packets → VideoDecode → frames → Render
//! Demux ───┤
//!          └→ audio packets → AudioDecode → audio ring → Audio Output
//! ```

pub mod audio_decode_stage;
pub mod coordinator;
pub mod demux_stage;
pub mod render_stage;
pub mod video_decode_stage;

pub use audio_decode_stage::AudioDecodeStage;
pub use coordinator::{MediaComponents, PlaybackCoordinator, PlaybackReport, StageKind};
pub use demux_stage::DemuxStage;
pub use render_stage::RenderStage;
pub use video_decode_stage::VideoDecodeStage;
