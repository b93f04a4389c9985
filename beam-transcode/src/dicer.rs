//! Repacketizes decoded audio into the fixed frame size an encoder demands.
//!
//! Decoders and filters hand out audio in whatever chunk sizes they like,
//! while encoders such as AAC accept exactly `frame_size` samples per frame.
//! [`FrameDicer`] carries the samples that do not fill a whole frame over to
//! the next call, and stamps every frame it emits with a pts that advances by
//! exactly `samples_per_frame`.

use bytes::{Bytes, BytesMut};

use crate::{
    error::{Result, TranscodeError},
    frame::{AudioFrame, Frame},
    stream::{SampleFormat, StreamDescriptor},
};

pub struct FrameDicer {
    samples_per_frame: usize,
    channels: u16,
    format: SampleFormat,
    sample_rate: u32,
    remainder: Vec<BytesMut>,
    remainder_samples: usize,
    next_pts: Option<i64>,
}

impl FrameDicer {
    pub fn new(samples_per_frame: usize, channels: u16, format: SampleFormat) -> Result<Self> {
        if samples_per_frame == 0 {
            return Err(TranscodeError::config("dicer frame size must be positive"));
        }
        if channels == 0 {
            return Err(TranscodeError::config("dicer needs at least one channel"));
        }
        let planes = if format.is_planar() {
            channels as usize
        } else {
            1
        };
        Ok(Self {
            samples_per_frame,
            channels,
            format,
            sample_rate: 0,
            remainder: (0..planes).map(|_| BytesMut::new()).collect(),
            remainder_samples: 0,
            next_pts: None,
        })
    }

    pub fn samples_per_frame(&self) -> usize {
        self.samples_per_frame
    }

    /// Byte size of one emitted full frame across all planes.
    pub fn frame_bytes(&self) -> usize {
        self.samples_per_frame * self.channels as usize * self.format.bytes()
    }

    /// Carried-over bytes across all planes, always below [`Self::frame_bytes`].
    pub fn remainder_len(&self) -> usize {
        self.remainder.iter().map(|plane| plane.len()).sum()
    }

    pub fn remainder_samples(&self) -> usize {
        self.remainder_samples
    }

    /// Pts the carried-over samples start at.
    pub fn remainder_pts(&self) -> Option<i64> {
        self.next_pts
    }

    fn plane_sample_bytes(&self) -> usize {
        if self.format.is_planar() {
            self.format.bytes()
        } else {
            self.format.bytes() * self.channels as usize
        }
    }

    /// Feeds one frame and returns the full frames it completes, in order.
    pub fn add_frame(&mut self, frame: AudioFrame) -> Result<Vec<AudioFrame>> {
        if frame.format != self.format || frame.channels != self.channels {
            return Err(TranscodeError::DicerInvariant(format!(
                "frame layout {}x{} does not match dicer layout {}x{}",
                frame.format, frame.channels, self.format, self.channels
            )));
        }
        let planes = frame.used_planes().ok_or_else(|| {
            TranscodeError::DicerInvariant(format!(
                "frame planes shorter than {} samples",
                frame.nb_samples
            ))
        })?;
        if planes.len() != self.remainder.len() {
            return Err(TranscodeError::DicerInvariant(format!(
                "frame has {} planes, expected {}",
                planes.len(),
                self.remainder.len()
            )));
        }
        if frame.nb_samples == 0 {
            return Ok(Vec::new());
        }
        if frame.sample_rate != 0 {
            self.sample_rate = frame.sample_rate;
        }

        let spf = self.samples_per_frame;
        let psb = self.plane_sample_bytes();
        // carried samples keep their pts, otherwise the frame's own pts counts
        let mut pts = if self.remainder_samples > 0 {
            self.next_pts.or(frame.pts).unwrap_or(0)
        } else {
            frame.pts.or(self.next_pts).unwrap_or(0)
        };
        let mut consumed = 0;
        let mut result = Vec::new();

        while self.remainder_samples + (frame.nb_samples - consumed) >= spf {
            let take = spf - self.remainder_samples;
            let range = consumed * psb..(consumed + take) * psb;
            let data = planes
                .iter()
                .zip(self.remainder.iter_mut())
                .map(|(src, rem)| {
                    if rem.is_empty() {
                        src.slice(range.clone())
                    } else {
                        rem.extend_from_slice(&src[range.clone()]);
                        rem.split().freeze()
                    }
                })
                .collect::<Vec<Bytes>>();

            result.push(self.make_frame(pts, spf, data));
            pts += spf as i64;
            consumed += take;
            self.remainder_samples = 0;
        }

        for (src, rem) in planes.iter().zip(self.remainder.iter_mut()) {
            rem.extend_from_slice(&src[consumed * psb..]);
        }
        self.remainder_samples += frame.nb_samples - consumed;
        self.next_pts = Some(pts);

        if self.remainder_samples >= spf {
            return Err(TranscodeError::DicerInvariant(format!(
                "remainder of {} samples reached frame size {}",
                self.remainder_samples, spf
            )));
        }
        Ok(result)
    }

    /// Emits the carried-over samples as one short frame, if there are any.
    pub fn flush(&mut self) -> Option<AudioFrame> {
        if self.remainder_samples == 0 {
            return None;
        }
        let pts = self.next_pts.unwrap_or(0);
        let nb_samples = self.remainder_samples;
        let data = self
            .remainder
            .iter_mut()
            .map(|rem| rem.split().freeze())
            .collect();
        self.remainder_samples = 0;
        self.next_pts = Some(pts + nb_samples as i64);
        Some(self.make_frame(pts, nb_samples, data))
    }

    fn make_frame(&self, pts: i64, nb_samples: usize, planes: Vec<Bytes>) -> AudioFrame {
        AudioFrame::new(
            Some(pts),
            self.format,
            self.channels,
            self.sample_rate,
            nb_samples,
            planes,
        )
    }
}

/// The dice step of a pipeline chain: dices audio for fixed frame size
/// encoders, hands everything else through untouched.
pub enum DiceStage {
    Dice(FrameDicer),
    PassThrough,
}

impl DiceStage {
    /// Picks dicing when `output` is audio and its encoder wants `frame_size`
    /// samples per frame.
    pub fn for_output(output: &StreamDescriptor, frame_size: Option<usize>) -> Result<Self> {
        match (&output.audio, frame_size) {
            (Some(audio), Some(frame_size)) if output.is_audio() && frame_size > 0 => {
                let dicer = FrameDicer::new(frame_size, audio.channels, audio.sample_format)?;
                Ok(DiceStage::Dice(dicer))
            }
            _ => Ok(DiceStage::PassThrough),
        }
    }

    pub fn is_dicing(&self) -> bool {
        matches!(self, DiceStage::Dice(_))
    }

    pub fn process(&mut self, frames: Vec<Frame>) -> Result<Vec<Frame>> {
        let dicer = match self {
            DiceStage::Dice(dicer) => dicer,
            DiceStage::PassThrough => return Ok(frames),
        };
        let mut result = Vec::with_capacity(frames.len());
        for frame in frames {
            match frame {
                Frame::Audio(frame) => {
                    result.extend(dicer.add_frame(frame)?.into_iter().map(Frame::Audio));
                }
                other => result.push(other),
            }
        }
        Ok(result)
    }

    pub fn flush(&mut self) -> Vec<Frame> {
        match self {
            DiceStage::Dice(dicer) => dicer.flush().map(Frame::Audio).into_iter().collect(),
            DiceStage::PassThrough => Vec::new(),
        }
    }
}

#[cfg(test)]
#[path = "dicer_test.rs"]
mod dicer_test;
