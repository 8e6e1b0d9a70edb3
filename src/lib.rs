//! Thread-safe handoff buffers and the stage protocol of a demux/decode/render
//! media pipeline.
//!
//! [`buffer`] holds the queues and rings that carry packets, frames and PCM
//! between threads. [`pipeline`] runs the stages on top of them, and [`media`]
//! is the boundary to the libraries that actually demux, decode and play.

pub mod buffer;
pub mod config;
pub mod error;
pub mod media;
pub mod pipeline;
pub mod utils;

pub use config::PipelineConfig;
pub use error::{Error, Result};
