//! Interfaces of the codec engine and container writer the pipeline drives.
//!
//! The stage traits are synchronous; the pipeline runs each stage on the
//! blocking pool, so an implementation is free to do heavy work inline.

use crate::{
    frame::Frame,
    job::{OutputTarget, StreamMapping},
    packet::Packet,
    rational::Rational,
    stream::StreamDescriptor,
};

pub trait Decoder: Send {
    fn decode(&mut self, packets: Vec<Packet>) -> anyhow::Result<Vec<Frame>>;

    /// Drains frames still buffered after the last packet.
    fn flush(&mut self) -> anyhow::Result<Vec<Frame>>;
}

pub trait Filterer: Send {
    fn filter(&mut self, frames: Vec<Frame>) -> anyhow::Result<Vec<Frame>>;

    fn flush(&mut self) -> anyhow::Result<Vec<Frame>> {
        Ok(Vec::new())
    }
}

pub trait Encoder: Send {
    /// Parameters of the encoded stream, used to create the container stream.
    fn descriptor(&self) -> StreamDescriptor;

    /// Samples per frame the encoder insists on, None when any size works.
    fn frame_size(&self) -> Option<usize> {
        None
    }

    /// Encodes frames; packets carry the encoder time base.
    fn encode(&mut self, frames: Vec<Frame>) -> anyhow::Result<Vec<Packet>>;

    fn flush(&mut self) -> anyhow::Result<Vec<Packet>>;
}

/// Container output. `write_frame` is only ever called in the order the
/// balanced muxer decides.
///
/// Calls run on the async runtime while the muxer lock is held, so each write
/// must be a short buffered append. Long blocking work belongs in the codec
/// stages.
pub trait ContainerWriter: Send {
    /// Adds an output stream and returns its index.
    fn add_stream(&mut self, stream: &StreamDescriptor) -> anyhow::Result<usize>;

    fn write_header(&mut self) -> anyhow::Result<()>;

    /// Time base of a stream, as fixed by the container once the header is
    /// written.
    fn time_base(&self, index: usize) -> Option<Rational>;

    fn write_frame(&mut self, packet: Packet) -> anyhow::Result<()>;

    fn write_trailer(&mut self) -> anyhow::Result<()>;
}

/// Builds the per-stream stages and the container writer for a job.
pub trait MediaEngine: Send + Sync {
    fn decoder(&self, source: &StreamDescriptor) -> anyhow::Result<Box<dyn Decoder>>;

    fn filter(
        &self,
        source: &StreamDescriptor,
        mapping: &StreamMapping,
    ) -> anyhow::Result<Box<dyn Filterer>>;

    fn encoder(
        &self,
        source: &StreamDescriptor,
        mapping: &StreamMapping,
    ) -> anyhow::Result<Box<dyn Encoder>>;

    fn container(&self, output: &OutputTarget) -> anyhow::Result<Box<dyn ContainerWriter>>;
}

/// Filter that hands frames through, for mappings without a filter spec.
pub struct IdentityFilter;

impl Filterer for IdentityFilter {
    fn filter(&mut self, frames: Vec<Frame>) -> anyhow::Result<Vec<Frame>> {
        Ok(frames)
    }
}
