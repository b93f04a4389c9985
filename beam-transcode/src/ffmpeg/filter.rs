use ffmpeg_next::filter;

use crate::{
    codec::Filterer,
    frame::Frame,
    job::StreamMapping,
    rational::Rational,
    stream::StreamDescriptor,
};

use super::convert::{audio_from_av, audio_to_av, video_from_av, video_to_av};

/// Filter graph between a `buffer`/`abuffer` source named `in` and a sink
/// named `out`.
pub struct FfmpegFilter {
    graph: filter::Graph,
    audio: bool,
    spec: String,
}

// the graph is only touched from the stage thread that owns it
unsafe impl Send for FfmpegFilter {}

impl FfmpegFilter {
    pub fn new(source: &StreamDescriptor, mapping: &StreamMapping) -> anyhow::Result<Self> {
        let spec = graph_spec(source, mapping);
        let mut graph = filter::Graph::new();

        let (source_name, sink_name, args) = if let Some(audio) = &source.audio {
            let args = format!(
                "time_base=1/{}:sample_rate={}:sample_fmt={}:channel_layout={}c",
                audio.sample_rate, audio.sample_rate, audio.sample_format, audio.channels
            );
            ("abuffer", "abuffersink", args)
        } else if let Some(video) = &source.video {
            let tb: Rational = source.time_base;
            let sar = video.sample_aspect_ratio.unwrap_or(Rational::new(1, 1));
            let args = format!(
                "video_size={}x{}:pix_fmt={}:time_base={}:pixel_aspect={}",
                video.width, video.height, video.pixel_format, tb, sar
            );
            ("buffer", "buffersink", args)
        } else {
            anyhow::bail!("stream {} cannot be filtered", source.index);
        };

        let find = |name: &str| {
            filter::find(name).ok_or_else(|| anyhow::anyhow!("filter {} not found", name))
        };
        graph.add(&find(source_name)?, "in", &args)?;
        graph.add(&find(sink_name)?, "out", "")?;
        graph.output("in", 0)?.input("out", 0)?.parse(&spec)?;
        graph.validate()?;
        log::debug!("stream {} filter graph: {}", source.index, spec);

        Ok(Self {
            graph,
            audio: source.is_audio(),
            spec,
        })
    }

    pub fn spec(&self) -> &str {
        &self.spec
    }

    fn push(&mut self, frame: &Frame) -> anyhow::Result<()> {
        let mut input = self
            .graph
            .get("in")
            .ok_or_else(|| anyhow::anyhow!("filter graph has no input"))?;
        match frame {
            Frame::Audio(frame) => input.source().add(&audio_to_av(frame)?)?,
            Frame::Video(frame) => input.source().add(&video_to_av(frame)?)?,
        }
        Ok(())
    }

    fn pull(&mut self, frames: &mut Vec<Frame>) -> anyhow::Result<()> {
        let mut output = self
            .graph
            .get("out")
            .ok_or_else(|| anyhow::anyhow!("filter graph has no output"))?;
        loop {
            let pulled = if self.audio {
                let mut frame = ffmpeg_next::frame::Audio::empty();
                match output.sink().frame(&mut frame) {
                    Ok(()) => Ok(Frame::Audio(audio_from_av(&frame)?)),
                    Err(e) => Err(e),
                }
            } else {
                let mut frame = ffmpeg_next::frame::Video::empty();
                output
                    .sink()
                    .frame(&mut frame)
                    .map(|()| Frame::Video(video_from_av(&frame)))
            };
            match pulled {
                Ok(frame) => frames.push(frame),
                Err(ffmpeg_next::Error::Eof) => return Ok(()),
                Err(ffmpeg_next::Error::Other { errno })
                    if errno == ffmpeg_next::util::error::EAGAIN =>
                {
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Filterer for FfmpegFilter {
    fn filter(&mut self, frames: Vec<Frame>) -> anyhow::Result<Vec<Frame>> {
        let mut output = Vec::with_capacity(frames.len());
        for frame in &frames {
            self.push(frame)?;
            self.pull(&mut output)?;
        }
        Ok(output)
    }

    fn flush(&mut self) -> anyhow::Result<Vec<Frame>> {
        self.graph
            .get("in")
            .ok_or_else(|| anyhow::anyhow!("filter graph has no input"))?
            .source()
            .flush()?;
        let mut output = Vec::new();
        self.pull(&mut output)?;
        Ok(output)
    }
}

/// The user's filter chain, followed by the conversions the encoder needs:
/// `aformat` for audio, `scale` and `format` for video.
pub fn graph_spec(source: &StreamDescriptor, mapping: &StreamMapping) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(spec) = mapping.filter.as_deref().filter(|s| !s.trim().is_empty()) {
        parts.push(spec.trim().to_string());
    }
    if source.is_audio() {
        if let Some(audio) = &mapping.encoder.audio {
            parts.push(format!(
                "aformat=sample_fmts={}:sample_rates={}:channel_layouts={}c",
                audio.sample_format, audio.sample_rate, audio.channels
            ));
        }
    } else if let Some(video) = &mapping.encoder.video {
        parts.push(format!("scale={}:{}", video.width, video.height));
        parts.push(format!("format={}", video.pixel_format));
    }
    if parts.is_empty() {
        let passthrough = if source.is_audio() { "anull" } else { "null" };
        parts.push(passthrough.to_string());
    }
    parts.join(",")
}
