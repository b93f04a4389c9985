//! FFmpeg backed codec engine and container writer.

mod convert;
mod decoder;
mod encoder;
mod filter;
mod output;

pub use decoder::FfmpegDecoder;
pub use encoder::FfmpegEncoder;
pub use filter::{FfmpegFilter, graph_spec};
pub use output::FfmpegWriter;

use crate::{
    codec::{ContainerWriter, Decoder, Encoder, Filterer, MediaEngine},
    job::{OutputTarget, StreamMapping},
    stream::StreamDescriptor,
};

pub struct FfmpegEngine;

impl FfmpegEngine {
    pub fn new() -> anyhow::Result<Self> {
        ffmpeg_next::init()?;
        Ok(Self)
    }
}

impl MediaEngine for FfmpegEngine {
    fn decoder(&self, source: &StreamDescriptor) -> anyhow::Result<Box<dyn Decoder>> {
        Ok(Box::new(FfmpegDecoder::new(source)?))
    }

    fn filter(
        &self,
        source: &StreamDescriptor,
        mapping: &StreamMapping,
    ) -> anyhow::Result<Box<dyn Filterer>> {
        Ok(Box::new(FfmpegFilter::new(source, mapping)?))
    }

    fn encoder(
        &self,
        source: &StreamDescriptor,
        mapping: &StreamMapping,
    ) -> anyhow::Result<Box<dyn Encoder>> {
        Ok(Box::new(FfmpegEncoder::new(source, mapping)?))
    }

    fn container(&self, output: &OutputTarget) -> anyhow::Result<Box<dyn ContainerWriter>> {
        Ok(Box::new(FfmpegWriter::new(output)?))
    }
}
