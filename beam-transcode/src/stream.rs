use std::fmt::{Display, Formatter};
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::TranscodeError;
use crate::rational::Rational;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
    Data,
}

/// Raw audio sample layout, named the way FFmpeg names them ("s16", "fltp").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SampleFormat {
    U8,
    S16,
    S32,
    S64,
    Flt,
    Dbl,
    U8p,
    S16p,
    S32p,
    S64p,
    Fltp,
    Dblp,
}

impl SampleFormat {
    /// Bytes per sample of one channel.
    pub fn bytes(&self) -> usize {
        match self {
            SampleFormat::U8 | SampleFormat::U8p => 1,
            SampleFormat::S16 | SampleFormat::S16p => 2,
            SampleFormat::S32 | SampleFormat::S32p | SampleFormat::Flt | SampleFormat::Fltp => 4,
            SampleFormat::S64 | SampleFormat::S64p | SampleFormat::Dbl | SampleFormat::Dblp => 8,
        }
    }

    /// Planar formats keep one buffer per channel.
    pub fn is_planar(&self) -> bool {
        matches!(
            self,
            SampleFormat::U8p
                | SampleFormat::S16p
                | SampleFormat::S32p
                | SampleFormat::S64p
                | SampleFormat::Fltp
                | SampleFormat::Dblp
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            SampleFormat::U8 => "u8",
            SampleFormat::S16 => "s16",
            SampleFormat::S32 => "s32",
            SampleFormat::S64 => "s64",
            SampleFormat::Flt => "flt",
            SampleFormat::Dbl => "dbl",
            SampleFormat::U8p => "u8p",
            SampleFormat::S16p => "s16p",
            SampleFormat::S32p => "s32p",
            SampleFormat::S64p => "s64p",
            SampleFormat::Fltp => "fltp",
            SampleFormat::Dblp => "dblp",
        }
    }
}

impl FromStr for SampleFormat {
    type Err = TranscodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let format = match s {
            "u8" => SampleFormat::U8,
            "s16" => SampleFormat::S16,
            "s32" => SampleFormat::S32,
            "s64" => SampleFormat::S64,
            "flt" => SampleFormat::Flt,
            "dbl" => SampleFormat::Dbl,
            "u8p" => SampleFormat::U8p,
            "s16p" => SampleFormat::S16p,
            "s32p" => SampleFormat::S32p,
            "s64p" => SampleFormat::S64p,
            "fltp" => SampleFormat::Fltp,
            "dblp" => SampleFormat::Dblp,
            other => {
                return Err(TranscodeError::config(format!(
                    "unknown sample format {:?}",
                    other
                )));
            }
        };
        Ok(format)
    }
}

impl TryFrom<String> for SampleFormat {
    type Error = TranscodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SampleFormat> for String {
    fn from(value: SampleFormat) -> Self {
        value.name().to_string()
    }
}

impl Display for SampleFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AudioParams {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
    // fixed samples per frame required by the codec, None = variable
    #[serde(default)]
    pub frame_size: Option<usize>,
}

impl AudioParams {
    /// Bytes one sample instant occupies across all channels.
    pub fn bytes_per_sample(&self) -> usize {
        self.channels as usize * self.sample_format.bytes()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
    // "yuv420p", "yuv422p", etc.
    pub pixel_format: String,
    #[serde(default)]
    pub sample_aspect_ratio: Option<Rational>,
    #[serde(default)]
    pub frame_rate: Option<Rational>,
}

/// Codec parameters and time base of one source or output stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub index: usize,
    pub kind: MediaKind,
    // "h264", "aac", "pcm_s24le", etc.
    pub codec: String,
    pub time_base: Rational,
    #[serde(default)]
    pub audio: Option<AudioParams>,
    #[serde(default)]
    pub video: Option<VideoParams>,
    #[serde(default, skip_serializing)]
    pub extradata: Option<Bytes>,
}

impl StreamDescriptor {
    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }

    pub fn is_audio(&self) -> bool {
        self.kind == MediaKind::Audio
    }

    pub fn audio(index: usize, codec: &str, time_base: Rational, params: AudioParams) -> Self {
        Self {
            index,
            kind: MediaKind::Audio,
            codec: codec.to_string(),
            time_base,
            audio: Some(params),
            video: None,
            extradata: None,
        }
    }

    pub fn video(index: usize, codec: &str, time_base: Rational, params: VideoParams) -> Self {
        Self {
            index,
            kind: MediaKind::Video,
            codec: codec.to_string(),
            time_base,
            audio: None,
            video: Some(params),
            extradata: None,
        }
    }

    /// Checks the descriptor is self-consistent enough to build a stage from.
    pub fn validate(&self) -> crate::error::Result<()> {
        self.time_base.validate()?;
        match self.kind {
            MediaKind::Audio => {
                let audio = self.audio.as_ref().ok_or_else(|| {
                    TranscodeError::config(format!("audio stream {} has no audio params", self.index))
                })?;
                if audio.channels == 0 || audio.sample_rate == 0 {
                    return Err(TranscodeError::config(format!(
                        "audio stream {} needs channels and sample rate",
                        self.index
                    )));
                }
            }
            MediaKind::Video => {
                if self.video.is_none() {
                    return Err(TranscodeError::config(format!(
                        "video stream {} has no video params",
                        self.index
                    )));
                }
            }
            MediaKind::Data => {}
        }
        Ok(())
    }
}
