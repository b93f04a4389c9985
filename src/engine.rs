use std::sync::Arc;

use beam_transcode::{
    codec::{ContainerWriter, Decoder, Encoder, Filterer, MediaEngine},
    job::{OutputTarget, StreamMapping},
    stream::StreamDescriptor,
};

/// Engine of a build without codec support. Every job fails at setup with a
/// configuration error instead of the server refusing to start.
#[cfg_attr(feature = "ffmpeg", allow(dead_code))]
pub(crate) struct UnavailableEngine;

#[cfg_attr(feature = "ffmpeg", allow(dead_code))]
impl UnavailableEngine {
    fn unavailable<T>(what: &str) -> anyhow::Result<T> {
        Err(anyhow::anyhow!(
            "no {} available, rebuild with the `ffmpeg` feature",
            what
        ))
    }
}

impl MediaEngine for UnavailableEngine {
    fn decoder(&self, source: &StreamDescriptor) -> anyhow::Result<Box<dyn Decoder>> {
        Self::unavailable(&format!("{} decoder", source.codec))
    }

    fn filter(
        &self,
        _source: &StreamDescriptor,
        _mapping: &StreamMapping,
    ) -> anyhow::Result<Box<dyn Filterer>> {
        Self::unavailable("filter graph")
    }

    fn encoder(
        &self,
        _source: &StreamDescriptor,
        mapping: &StreamMapping,
    ) -> anyhow::Result<Box<dyn Encoder>> {
        Self::unavailable(&format!("{} encoder", mapping.encoder.codec))
    }

    fn container(&self, output: &OutputTarget) -> anyhow::Result<Box<dyn ContainerWriter>> {
        Self::unavailable(&format!("container for {}", output.url))
    }
}

#[cfg(feature = "ffmpeg")]
pub(crate) fn media_engine() -> anyhow::Result<Arc<dyn MediaEngine>> {
    let engine = beam_transcode::ffmpeg::FfmpegEngine::new()?;
    log::info!("ffmpeg media engine initialized");
    Ok(Arc::new(engine))
}

#[cfg(not(feature = "ffmpeg"))]
pub(crate) fn media_engine() -> anyhow::Result<Arc<dyn MediaEngine>> {
    log::warn!("built without ffmpeg, transcode jobs will be rejected");
    Ok(Arc::new(UnavailableEngine))
}
