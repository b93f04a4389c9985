use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, TranscodeError},
    range::MediaRange,
    rational::Rational,
    stream::{AudioParams, VideoParams},
};

/// Where and how the interleaved result is written.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutputTarget {
    pub url: String,
    // "mp4", "matroska", etc. None = guess from url
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EncoderConfig {
    // encoder name, e.g. "libx264", "aac"
    pub codec: String,
    // None = source stream time base
    #[serde(default)]
    pub time_base: Option<Rational>,
    #[serde(default)]
    pub audio: Option<AudioParams>,
    #[serde(default)]
    pub video: Option<VideoParams>,
    // codec private options, e.g. {"crf": "23"}
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    #[serde(default)]
    pub global_header: bool,
}

/// Maps one source stream onto one output stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamMapping {
    pub source_index: usize,
    // filter graph spec, e.g. "scale=1280:720, colorspace=all=bt709"
    #[serde(default)]
    pub filter: Option<String>,
    pub encoder: EncoderConfig,
    // container stream time base, e.g. [1, 90000]
    #[serde(default)]
    pub output_time_base: Option<Rational>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TranscodeJob {
    pub source_url: String,
    pub range: MediaRange,
    // passed through to the packet store untouched
    #[serde(default)]
    pub flags: u32,
    pub output: OutputTarget,
    pub streams: Vec<StreamMapping>,
}

impl TranscodeJob {
    pub fn validate(&self) -> Result<()> {
        if self.source_url.is_empty() {
            return Err(TranscodeError::config("job has no source url"));
        }
        if self.output.url.is_empty() {
            return Err(TranscodeError::config("job has no output url"));
        }
        if self.streams.is_empty() {
            return Err(TranscodeError::config("job maps no streams"));
        }
        for (i, mapping) in self.streams.iter().enumerate() {
            if mapping.encoder.codec.is_empty() {
                return Err(TranscodeError::config(format!(
                    "stream mapping {} has no encoder",
                    i
                )));
            }
            if let Some(tb) = mapping.encoder.time_base {
                tb.validate()?;
            }
            if let Some(tb) = mapping.output_time_base {
                tb.validate()?;
            }
            if mapping.encoder.audio.is_some() && mapping.encoder.video.is_some() {
                return Err(TranscodeError::config(format!(
                    "stream mapping {} has both audio and video params",
                    i
                )));
            }
        }
        Ok(())
    }
}

/// Tunables of the pipeline orchestrator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// In-flight items between two stages of a chain.
    pub queue_capacity: usize,
    /// Seconds fetched per store request for time ranges.
    pub window_secs: f64,
    /// Packets fetched per store request for index ranges.
    pub window_packets: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 4,
            window_secs: 1.0,
            window_packets: 16,
        }
    }
}
