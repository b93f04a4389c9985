use crate::{
    codec::ContainerWriter,
    job::OutputTarget,
    packet::Packet,
    rational::Rational,
    stream::{MediaKind, StreamDescriptor},
};

use super::convert::{
    from_av_rational, pixel_format, set_default_layout, to_av_packet, to_av_rational,
    to_av_sample,
};

/// Container output backed by an FFmpeg muxer. Packets are written with
/// `av_write_frame`: ordering across streams is already decided upstream.
pub struct FfmpegWriter {
    inner: ffmpeg_next::format::context::Output,
    url: String,
    stream_count: usize,
    have_written_header: bool,
    have_written_trailer: bool,
}

impl FfmpegWriter {
    pub fn new(target: &OutputTarget) -> anyhow::Result<Self> {
        let inner = match &target.format {
            Some(format) => ffmpeg_next::format::output_as(&target.url, format),
            None => ffmpeg_next::format::output(&target.url),
        }
        .map_err(|e| {
            anyhow::anyhow!(
                "open output (url={:?}, format={:?}): {}",
                target.url,
                target.format,
                e
            )
        })?;
        Ok(Self {
            inner,
            url: target.url.clone(),
            stream_count: 0,
            have_written_header: false,
            have_written_trailer: false,
        })
    }
}

fn codec_id(name: &str) -> anyhow::Result<ffmpeg_next::codec::Id> {
    ffmpeg_next::encoder::find_by_name(name)
        .or_else(|| ffmpeg_next::decoder::find_by_name(name))
        .map(|codec| codec.id())
        .ok_or_else(|| anyhow::anyhow!("unknown codec {}", name))
}

impl ContainerWriter for FfmpegWriter {
    fn add_stream(&mut self, stream: &StreamDescriptor) -> anyhow::Result<usize> {
        if self.have_written_header {
            anyhow::bail!("cannot add a stream after the header is written");
        }
        let id = codec_id(&stream.codec)?;
        let mut output = self.inner.add_stream(ffmpeg_next::encoder::find(id))?;
        output.set_time_base(to_av_rational(stream.time_base));
        unsafe {
            let par = (*output.as_mut_ptr()).codecpar;
            (*par).codec_id = id.into();
            match stream.kind {
                MediaKind::Video => (*par).codec_type = ffmpeg_next::media::Type::Video.into(),
                MediaKind::Audio => (*par).codec_type = ffmpeg_next::media::Type::Audio.into(),
                MediaKind::Data => (*par).codec_type = ffmpeg_next::media::Type::Data.into(),
            }
            if let Some(video) = &stream.video {
                (*par).width = video.width as i32;
                (*par).height = video.height as i32;
                (*par).format = ffmpeg_next::ffi::AVPixelFormat::from(pixel_format(
                    &video.pixel_format,
                )?) as i32;
                if let Some(sar) = video.sample_aspect_ratio {
                    (*par).sample_aspect_ratio = to_av_rational(sar).into();
                }
            }
            if let Some(audio) = &stream.audio {
                (*par).sample_rate = audio.sample_rate as i32;
                (*par).format =
                    ffmpeg_next::ffi::AVSampleFormat::from(to_av_sample(audio.sample_format))
                        as i32;
                (*par).frame_size = audio.frame_size.unwrap_or(0) as i32;
                set_default_layout(&mut (*par).ch_layout, audio.channels);
            }
            if let Some(extradata) = &stream.extradata {
                let size = extradata.len();
                let padded = size + ffmpeg_next::ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize;
                let buf = ffmpeg_next::ffi::av_mallocz(padded) as *mut u8;
                if buf.is_null() {
                    anyhow::bail!("cannot allocate extradata");
                }
                std::ptr::copy_nonoverlapping(extradata.as_ptr(), buf, size);
                (*par).extradata = buf;
                (*par).extradata_size = size as i32;
            }
        }
        self.stream_count += 1;
        Ok(output.index())
    }

    fn write_header(&mut self) -> anyhow::Result<()> {
        if !self.have_written_header {
            self.inner.write_header()?;
            self.have_written_header = true;
            log::info!("{}: header written, {} streams", self.url, self.stream_count);
        }
        Ok(())
    }

    fn time_base(&self, index: usize) -> Option<Rational> {
        self.inner
            .stream(index)
            .map(|stream| from_av_rational(stream.time_base()))
    }

    fn write_frame(&mut self, packet: Packet) -> anyhow::Result<()> {
        if !self.have_written_header {
            anyhow::bail!("packet written before the header");
        }
        to_av_packet(&packet).write(&mut self.inner)?;
        Ok(())
    }

    fn write_trailer(&mut self) -> anyhow::Result<()> {
        if self.have_written_header && !self.have_written_trailer {
            self.have_written_trailer = true;
            self.inner.write_trailer()?;
            log::info!("{}: trailer written", self.url);
        }
        Ok(())
    }
}
