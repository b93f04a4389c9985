use crate::{
    codec::Decoder,
    frame::Frame,
    packet::Packet,
    rational::{Rational, rescale},
    stream::StreamDescriptor,
};

use super::convert::{
    audio_from_av, pixel_format, set_default_layout, to_av_packet, to_av_rational, to_av_sample,
    video_from_av,
};

enum DecoderType {
    Video(ffmpeg_next::codec::decoder::Video),
    Audio(ffmpeg_next::codec::decoder::Audio),
}

/// FFmpeg decoder for one source stream. Audio frames come out timed in
/// samples (`1/sample_rate`), video frames in the stream time base.
pub struct FfmpegDecoder {
    stream_index: usize,
    inner: DecoderType,
    time_base: Rational,
    sample_rate: Option<u32>,
}

impl FfmpegDecoder {
    pub fn new(stream: &StreamDescriptor) -> anyhow::Result<Self> {
        let codec = ffmpeg_next::decoder::find_by_name(&stream.codec)
            .ok_or_else(|| anyhow::anyhow!("decoder not found: {}", stream.codec))?;
        let mut ctx = ffmpeg_next::codec::Context::new_with_codec(codec);
        unsafe {
            let raw = ctx.as_mut_ptr();
            (*raw).time_base = to_av_rational(stream.time_base).into();
            (*raw).pkt_timebase = to_av_rational(stream.time_base).into();
            if let Some(video) = &stream.video {
                (*raw).width = video.width as i32;
                (*raw).height = video.height as i32;
                (*raw).pix_fmt = pixel_format(&video.pixel_format)?.into();
            }
            if let Some(audio) = &stream.audio {
                (*raw).sample_rate = audio.sample_rate as i32;
                (*raw).sample_fmt = to_av_sample(audio.sample_format).into();
                set_default_layout(&mut (*raw).ch_layout, audio.channels);
            }
            if let Some(extradata) = &stream.extradata {
                let size = extradata.len();
                let padded = size + ffmpeg_next::ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize;
                let buf = ffmpeg_next::ffi::av_mallocz(padded) as *mut u8;
                if buf.is_null() {
                    anyhow::bail!("cannot allocate extradata");
                }
                std::ptr::copy_nonoverlapping(extradata.as_ptr(), buf, size);
                (*raw).extradata = buf;
                (*raw).extradata_size = size as i32;
            }
        }

        let inner = if stream.is_video() {
            DecoderType::Video(ctx.decoder().video()?)
        } else if stream.is_audio() {
            DecoderType::Audio(ctx.decoder().audio()?)
        } else {
            anyhow::bail!("unsupported stream type for stream {}", stream.index);
        };
        log::info!(
            "decoder {} opened for stream {}",
            stream.codec,
            stream.index
        );

        Ok(Self {
            stream_index: stream.index,
            inner,
            time_base: stream.time_base,
            sample_rate: stream.audio.as_ref().map(|a| a.sample_rate),
        })
    }

    fn receive_frames(&mut self, frames: &mut Vec<Frame>) -> anyhow::Result<()> {
        loop {
            let received = match &mut self.inner {
                DecoderType::Video(decoder) => {
                    let mut frame = ffmpeg_next::frame::Video::empty();
                    decoder
                        .receive_frame(&mut frame)
                        .map(|()| Frame::Video(video_from_av(&frame)))
                }
                DecoderType::Audio(decoder) => {
                    let mut frame = ffmpeg_next::frame::Audio::empty();
                    match decoder.receive_frame(&mut frame) {
                        Ok(()) => {
                            let pts = frame.timestamp().or(frame.pts());
                            let mut audio = audio_from_av(&frame)?;
                            let rate = self.sample_rate.unwrap_or(audio.sample_rate);
                            audio.pts = pts.map(|pts| {
                                rescale(pts, self.time_base, Rational::new(1, rate as i32))
                            });
                            Ok(Frame::Audio(audio))
                        }
                        Err(e) => Err(e),
                    }
                }
            };
            match received {
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

impl Decoder for FfmpegDecoder {
    fn decode(&mut self, packets: Vec<Packet>) -> anyhow::Result<Vec<Frame>> {
        let mut frames = Vec::new();
        for mut packet in packets {
            if packet.time_base != self.time_base {
                packet.rescale_ts(self.time_base);
            }
            let av = to_av_packet(&packet);
            match &mut self.inner {
                DecoderType::Video(decoder) => decoder.send_packet(&av)?,
                DecoderType::Audio(decoder) => decoder.send_packet(&av)?,
            }
            self.receive_frames(&mut frames)?;
        }
        Ok(frames)
    }

    fn flush(&mut self) -> anyhow::Result<Vec<Frame>> {
        match &mut self.inner {
            DecoderType::Video(decoder) => decoder.send_eof()?,
            DecoderType::Audio(decoder) => decoder.send_eof()?,
        }
        let mut frames = Vec::new();
        self.receive_frames(&mut frames)?;
        log::debug!("decoder for stream {} drained", self.stream_index);
        Ok(frames)
    }
}
