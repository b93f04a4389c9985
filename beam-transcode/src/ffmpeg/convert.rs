//! Conversions between the crate's media types and FFmpeg's.

use bytes::Bytes;
use ffmpeg_next::format::{Pixel, Sample, sample::Type};

use crate::{
    frame::{AudioFrame, VideoFrame},
    packet::Packet,
    rational::Rational,
    stream::SampleFormat,
};

pub fn to_av_rational(r: Rational) -> ffmpeg_next::Rational {
    ffmpeg_next::Rational::new(r.numerator(), r.denominator())
}

pub fn from_av_rational(r: ffmpeg_next::Rational) -> Rational {
    Rational::new(r.numerator(), r.denominator())
}

pub fn to_av_sample(format: SampleFormat) -> Sample {
    match format {
        SampleFormat::U8 => Sample::U8(Type::Packed),
        SampleFormat::S16 => Sample::I16(Type::Packed),
        SampleFormat::S32 => Sample::I32(Type::Packed),
        SampleFormat::S64 => Sample::I64(Type::Packed),
        SampleFormat::Flt => Sample::F32(Type::Packed),
        SampleFormat::Dbl => Sample::F64(Type::Packed),
        SampleFormat::U8p => Sample::U8(Type::Planar),
        SampleFormat::S16p => Sample::I16(Type::Planar),
        SampleFormat::S32p => Sample::I32(Type::Planar),
        SampleFormat::S64p => Sample::I64(Type::Planar),
        SampleFormat::Fltp => Sample::F32(Type::Planar),
        SampleFormat::Dblp => Sample::F64(Type::Planar),
    }
}

pub fn from_av_sample(format: Sample) -> anyhow::Result<SampleFormat> {
    let format = match format {
        Sample::U8(Type::Packed) => SampleFormat::U8,
        Sample::I16(Type::Packed) => SampleFormat::S16,
        Sample::I32(Type::Packed) => SampleFormat::S32,
        Sample::I64(Type::Packed) => SampleFormat::S64,
        Sample::F32(Type::Packed) => SampleFormat::Flt,
        Sample::F64(Type::Packed) => SampleFormat::Dbl,
        Sample::U8(Type::Planar) => SampleFormat::U8p,
        Sample::I16(Type::Planar) => SampleFormat::S16p,
        Sample::I32(Type::Planar) => SampleFormat::S32p,
        Sample::I64(Type::Planar) => SampleFormat::S64p,
        Sample::F32(Type::Planar) => SampleFormat::Fltp,
        Sample::F64(Type::Planar) => SampleFormat::Dblp,
        Sample::None => anyhow::bail!("frame has no sample format"),
    };
    Ok(format)
}

pub fn pixel_format(name: &str) -> anyhow::Result<Pixel> {
    name.parse::<Pixel>()
        .map_err(|_| anyhow::anyhow!("unknown pixel format {}", name))
}

pub fn pixel_name(format: Pixel) -> String {
    format
        .descriptor()
        .map(|d| d.name().to_string())
        .unwrap_or_else(|| "none".to_string())
}

/// Default channel order for `channels` channels.
pub fn set_default_layout(layout: &mut ffmpeg_next::ffi::AVChannelLayout, channels: u16) {
    unsafe {
        ffmpeg_next::ffi::av_channel_layout_uninit(layout);
        ffmpeg_next::ffi::av_channel_layout_default(layout, channels as i32);
    }
}

pub fn to_av_packet(packet: &Packet) -> ffmpeg_next::Packet {
    let mut av = ffmpeg_next::Packet::copy(&packet.data);
    av.set_pts(packet.pts);
    av.set_dts(packet.dts);
    av.set_duration(packet.duration);
    av.set_stream(packet.stream_index);
    av.set_position(-1);
    if packet.is_key {
        av.set_flags(ffmpeg_next::codec::packet::Flags::KEY);
    }
    av
}

pub fn from_av_packet(av: &ffmpeg_next::Packet, time_base: Rational) -> Packet {
    Packet {
        stream_index: av.stream(),
        pts: av.pts(),
        dts: av.dts(),
        duration: av.duration(),
        time_base,
        is_key: av.is_key(),
        data: av.data().map(Bytes::copy_from_slice).unwrap_or_default(),
    }
}

pub fn audio_from_av(frame: &ffmpeg_next::frame::Audio) -> anyhow::Result<AudioFrame> {
    let format = from_av_sample(frame.format())?;
    let channels = unsafe { (*frame.as_ptr()).ch_layout.nb_channels.max(0) as u16 };
    let planes = (0..frame.planes())
        .map(|i| Bytes::copy_from_slice(frame.data(i)))
        .collect();
    Ok(AudioFrame::new(
        frame.pts(),
        format,
        channels,
        frame.rate(),
        frame.samples(),
        planes,
    ))
}

pub fn audio_to_av(frame: &AudioFrame) -> anyhow::Result<ffmpeg_next::frame::Audio> {
    let planes = frame
        .used_planes()
        .ok_or_else(|| anyhow::anyhow!("audio frame planes shorter than {} samples", frame.nb_samples))?;
    let mut av = ffmpeg_next::frame::Audio::empty();
    unsafe {
        let raw = av.as_mut_ptr();
        (*raw).format = ffmpeg_next::ffi::AVSampleFormat::from(to_av_sample(frame.format)) as i32;
        (*raw).nb_samples = frame.nb_samples as i32;
        (*raw).sample_rate = frame.sample_rate as i32;
        set_default_layout(&mut (*raw).ch_layout, frame.channels);
        if ffmpeg_next::ffi::av_frame_get_buffer(raw, 0) < 0 {
            anyhow::bail!("cannot allocate audio frame of {} samples", frame.nb_samples);
        }
    }
    for (i, plane) in planes.iter().enumerate() {
        av.data_mut(i)[..plane.len()].copy_from_slice(plane);
    }
    av.set_pts(frame.pts);
    Ok(av)
}

pub fn video_from_av(frame: &ffmpeg_next::frame::Video) -> VideoFrame {
    let planes = frame.planes();
    VideoFrame {
        pts: frame.pts(),
        width: frame.width(),
        height: frame.height(),
        pixel_format: pixel_name(frame.format()),
        is_key: frame.is_key(),
        planes: (0..planes)
            .map(|i| Bytes::copy_from_slice(frame.data(i)))
            .collect(),
        linesizes: (0..planes).map(|i| frame.stride(i)).collect(),
    }
}

pub fn video_to_av(frame: &VideoFrame) -> anyhow::Result<ffmpeg_next::frame::Video> {
    let mut av =
        ffmpeg_next::frame::Video::new(pixel_format(&frame.pixel_format)?, frame.width, frame.height);
    for (i, (plane, &src_stride)) in frame.planes.iter().zip(&frame.linesizes).enumerate() {
        if i >= av.planes() {
            break;
        }
        let rows = av.plane_height(i) as usize;
        let dst_stride = av.stride(i);
        let row_len = src_stride.min(dst_stride);
        let dst = av.data_mut(i);
        for row in 0..rows {
            let src = row * src_stride;
            if src + row_len > plane.len() {
                anyhow::bail!("video plane {} is shorter than {} rows", i, rows);
            }
            dst[row * dst_stride..row * dst_stride + row_len]
                .copy_from_slice(&plane[src..src + row_len]);
        }
    }
    av.set_pts(frame.pts);
    Ok(av)
}
