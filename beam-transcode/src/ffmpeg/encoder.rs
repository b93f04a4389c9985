use bytes::Bytes;
use ffmpeg_next::Dictionary;

use crate::{
    codec::Encoder,
    frame::Frame,
    job::StreamMapping,
    packet::Packet,
    rational::{Rational, rescale},
    stream::{AudioParams, StreamDescriptor},
};

use super::convert::{
    audio_to_av, from_av_packet, from_av_rational, pixel_format, set_default_layout,
    to_av_rational, to_av_sample, video_to_av,
};

enum EncoderType {
    Video(ffmpeg_next::codec::encoder::Video),
    Audio(ffmpeg_next::codec::encoder::Audio),
}

pub struct FfmpegEncoder {
    inner: EncoderType,
    descriptor: StreamDescriptor,
    // unit of the incoming frame timestamps
    frame_time_base: Rational,
    frame_size: Option<usize>,
}

impl FfmpegEncoder {
    pub fn new(source: &StreamDescriptor, mapping: &StreamMapping) -> anyhow::Result<Self> {
        let config = &mapping.encoder;
        let codec = ffmpeg_next::encoder::find_by_name(&config.codec)
            .ok_or_else(|| anyhow::anyhow!("codec not found: {}", config.codec))?;
        let mut ctx = ffmpeg_next::codec::Context::new_with_codec(codec);
        if config.global_header {
            ctx.set_flags(ffmpeg_next::codec::Flags::GLOBAL_HEADER);
        }
        let mut options = Dictionary::new();
        for (key, value) in &config.options {
            options.set(key, value);
        }

        let (inner, mut descriptor, frame_time_base) = if let Some(src) = &source.audio {
            let params = config.audio.clone().unwrap_or_else(|| AudioParams {
                frame_size: None,
                ..src.clone()
            });
            let samples = Rational::new(1, params.sample_rate as i32);
            let time_base = config.time_base.unwrap_or(samples);
            let mut encoder = ctx.encoder().audio()?;
            encoder.set_rate(params.sample_rate as i32);
            encoder.set_format(to_av_sample(params.sample_format));
            encoder.set_time_base(to_av_rational(time_base));
            unsafe {
                set_default_layout(&mut (*encoder.as_mut_ptr()).ch_layout, params.channels);
            }
            let encoder = encoder.open_with(options)?;
            let frame_size = match encoder.frame_size() {
                0 => None,
                n => Some(n as usize),
            };
            let descriptor = StreamDescriptor::audio(
                source.index,
                &config.codec,
                time_base,
                AudioParams {
                    frame_size,
                    ..params
                },
            );
            (EncoderType::Audio(encoder), descriptor, samples)
        } else if let Some(src) = &source.video {
            let params = config.video.clone().unwrap_or_else(|| src.clone());
            let time_base = config.time_base.unwrap_or(source.time_base);
            let mut encoder = ctx.encoder().video()?;
            encoder.set_width(params.width);
            encoder.set_height(params.height);
            encoder.set_format(pixel_format(&params.pixel_format)?);
            encoder.set_time_base(to_av_rational(time_base));
            if let Some(rate) = params.frame_rate.or(src.frame_rate) {
                encoder.set_frame_rate(Some(to_av_rational(rate)));
            }
            if let Some(sar) = params.sample_aspect_ratio {
                encoder.set_aspect_ratio(to_av_rational(sar));
            }
            let encoder = encoder.open_with(options)?;
            let descriptor =
                StreamDescriptor::video(source.index, &config.codec, time_base, params);
            (EncoderType::Video(encoder), descriptor, source.time_base)
        } else {
            anyhow::bail!("stream {} cannot be encoded", source.index);
        };

        // the opened context holds the final time base and any global header
        unsafe {
            let raw = match &inner {
                EncoderType::Video(encoder) => encoder.as_ptr(),
                EncoderType::Audio(encoder) => encoder.as_ptr(),
            };
            descriptor.time_base = from_av_rational((*raw).time_base.into());
            if !(*raw).extradata.is_null() && (*raw).extradata_size > 0 {
                descriptor.extradata = Some(Bytes::copy_from_slice(std::slice::from_raw_parts(
                    (*raw).extradata,
                    (*raw).extradata_size as usize,
                )));
            }
        }
        log::info!(
            "encoder {} opened, time base {}, frame size {:?}",
            config.codec,
            descriptor.time_base,
            descriptor.audio.as_ref().and_then(|a| a.frame_size)
        );

        Ok(Self {
            frame_size: descriptor.audio.as_ref().and_then(|a| a.frame_size),
            inner,
            descriptor,
            frame_time_base,
        })
    }

    fn receive_packets(&mut self, packets: &mut Vec<Packet>) -> anyhow::Result<()> {
        loop {
            let mut packet = ffmpeg_next::Packet::empty();
            let received = match &mut self.inner {
                EncoderType::Video(encoder) => encoder.receive_packet(&mut packet),
                EncoderType::Audio(encoder) => encoder.receive_packet(&mut packet),
            };
            match received {
                Ok(()) => packets.push(from_av_packet(&packet, self.descriptor.time_base)),
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

impl Encoder for FfmpegEncoder {
    fn descriptor(&self) -> StreamDescriptor {
        self.descriptor.clone()
    }

    fn frame_size(&self) -> Option<usize> {
        self.frame_size
    }

    fn encode(&mut self, frames: Vec<Frame>) -> anyhow::Result<Vec<Packet>> {
        let mut packets = Vec::new();
        let (from, to) = (self.frame_time_base, self.descriptor.time_base);
        for frame in frames {
            match (&mut self.inner, frame) {
                (EncoderType::Audio(encoder), Frame::Audio(mut frame)) => {
                    frame.pts = frame.pts.map(|pts| rescale(pts, from, to));
                    encoder.send_frame(&audio_to_av(&frame)?)?;
                }
                (EncoderType::Video(encoder), Frame::Video(mut frame)) => {
                    frame.pts = frame.pts.map(|pts| rescale(pts, from, to));
                    encoder.send_frame(&video_to_av(&frame)?)?;
                }
                _ => anyhow::bail!("frame does not match the encoder type"),
            }
            self.receive_packets(&mut packets)?;
        }
        Ok(packets)
    }

    fn flush(&mut self) -> anyhow::Result<Vec<Packet>> {
        match &mut self.inner {
            EncoderType::Video(encoder) => encoder.send_eof()?,
            EncoderType::Audio(encoder) => encoder.send_eof()?,
        }
        let mut packets = Vec::new();
        self.receive_packets(&mut packets)?;
        Ok(packets)
    }
}
