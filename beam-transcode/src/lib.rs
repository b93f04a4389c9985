pub mod codec;
pub mod dicer;
pub mod error;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod frame;
pub mod job;
pub mod muxer;
pub mod packet;
pub mod pipeline;
pub mod range;
pub mod rational;
pub mod source;
pub mod stream;

pub use error::{Result, TranscodeError};
pub use job::{EncoderConfig, OutputTarget, PipelineConfig, StreamMapping, TranscodeJob};
pub use pipeline::{TranscodeReport, Transcoder};
