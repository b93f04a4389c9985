use std::fmt::{Display, Formatter};

use bytes::Bytes;

use crate::stream::SampleFormat;

#[derive(Clone, Debug)]
pub enum Frame {
    Video(VideoFrame),
    Audio(AudioFrame),
}

impl Frame {
    pub fn pts(&self) -> Option<i64> {
        match self {
            Frame::Video(frame) => frame.pts,
            Frame::Audio(frame) => frame.pts,
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, Frame::Audio(_))
    }
}

/// Decoded audio. Packed formats use one plane holding interleaved channels,
/// planar formats use one plane per channel.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioFrame {
    pub pts: Option<i64>,
    pub nb_samples: usize,
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
    pub duration: i64,
    pub planes: Vec<Bytes>,
}

impl AudioFrame {
    pub fn new(
        pts: Option<i64>,
        format: SampleFormat,
        channels: u16,
        sample_rate: u32,
        nb_samples: usize,
        planes: Vec<Bytes>,
    ) -> Self {
        Self {
            pts,
            nb_samples,
            sample_rate,
            channels,
            format,
            duration: nb_samples as i64,
            planes,
        }
    }

    /// Bytes of one sample instant inside one plane.
    pub fn plane_sample_bytes(&self) -> usize {
        if self.format.is_planar() {
            self.format.bytes()
        } else {
            self.format.bytes() * self.channels as usize
        }
    }

    /// Sample bytes actually carried, ignoring any buffer padding.
    pub fn data_len(&self) -> usize {
        self.nb_samples * self.format.bytes() * self.channels as usize
    }

    /// Planes trimmed to `nb_samples`, or None when a plane is too short.
    pub fn used_planes(&self) -> Option<Vec<Bytes>> {
        let len = self.nb_samples * self.plane_sample_bytes();
        self.planes
            .iter()
            .map(|plane| (plane.len() >= len).then(|| plane.slice(..len)))
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct VideoFrame {
    pub pts: Option<i64>,
    pub width: u32,
    pub height: u32,
    // "yuv420p", "yuv422p", etc.
    pub pixel_format: String,
    pub is_key: bool,
    pub planes: Vec<Bytes>,
    pub linesizes: Vec<usize>,
}

impl Display for Frame {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            Frame::Audio(frame) => write!(
                f,
                "AudioFrame pts: {:?}, nb_samples: {}, format: {}, channels: {}, data_len: {}",
                frame.pts,
                frame.nb_samples,
                frame.format,
                frame.channels,
                frame.data_len()
            ),
            Frame::Video(frame) => write!(
                f,
                "VideoFrame pts: {:?}, width: {}, height: {}, format: {}, is_key: {}",
                frame.pts, frame.width, frame.height, frame.pixel_format, frame.is_key
            ),
        }
    }
}
