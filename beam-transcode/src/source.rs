//! Packet storage collaborator and the lazy per-stream packet source.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use futures::{Stream, future::BoxFuture};

use crate::{packet::Packet, range::MediaRange, stream::StreamDescriptor};

/// One fetch from the store: the packets of `stream_index` inside `window`.
#[derive(Clone, Debug, PartialEq)]
pub struct RetrieveRequest {
    pub url: String,
    pub stream_index: usize,
    pub window: MediaRange,
    pub flags: u32,
}

/// Keyed packet storage. Packets of a stream come back in increasing pts
/// order.
pub trait PacketStore: Send + Sync {
    /// Stream descriptors of the beam at `url`.
    fn format<'a>(&'a self, url: &'a str) -> BoxFuture<'a, anyhow::Result<Vec<StreamDescriptor>>>;

    fn retrieve<'a>(
        &'a self,
        request: &'a RetrieveRequest,
    ) -> BoxFuture<'a, anyhow::Result<Vec<Packet>>>;
}

/// Pull based reader of one stream's packets, one window per fetch. Nothing
/// is fetched until the next batch is asked for.
pub struct PacketSource {
    store: Arc<dyn PacketStore>,
    url: String,
    stream_index: usize,
    flags: u32,
    windows: VecDeque<MediaRange>,
}

impl PacketSource {
    pub fn new(
        store: Arc<dyn PacketStore>,
        url: &str,
        stream_index: usize,
        range: MediaRange,
        flags: u32,
        window_secs: f64,
        window_packets: i64,
    ) -> Self {
        Self {
            store,
            url: url.to_string(),
            stream_index,
            flags,
            windows: range.windows(window_secs, window_packets).into(),
        }
    }

    /// Fetches the next non-empty window. `None` once the range is exhausted.
    pub async fn next_batch(&mut self) -> Option<anyhow::Result<Vec<Packet>>> {
        while let Some(window) = self.windows.pop_front() {
            let request = RetrieveRequest {
                url: self.url.clone(),
                stream_index: self.stream_index,
                window,
                flags: self.flags,
            };
            match self.store.retrieve(&request).await {
                Ok(packets) if packets.is_empty() => {
                    log::trace!(
                        "source stream {}: window {} is empty",
                        self.stream_index,
                        window
                    );
                }
                Ok(packets) => return Some(Ok(packets)),
                Err(e) => {
                    self.windows.clear();
                    return Some(Err(e.context(format!(
                        "retrieve {} stream {} window {}",
                        self.url, self.stream_index, window
                    ))));
                }
            }
        }
        None
    }

    pub fn remaining_windows(&self) -> usize {
        self.windows.len()
    }

    pub fn into_stream(self) -> impl Stream<Item = anyhow::Result<Vec<Packet>>> + Send {
        futures::stream::unfold(self, |mut source| async move {
            source.next_batch().await.map(|batch| (batch, source))
        })
    }
}

struct MemoryBeam {
    streams: Vec<StreamDescriptor>,
    packets: HashMap<usize, Vec<Packet>>,
}

/// Packet store held in process memory.
#[derive(Default)]
pub struct MemoryStore {
    beams: RwLock<HashMap<String, MemoryBeam>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_format(&self, url: &str, streams: Vec<StreamDescriptor>) -> anyhow::Result<()> {
        let mut beams = self
            .beams
            .write()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        let beam = beams.entry(url.to_string()).or_insert_with(|| MemoryBeam {
            streams: Vec::new(),
            packets: HashMap::new(),
        });
        beam.streams = streams;
        Ok(())
    }

    /// Appends packets of one stream, keeping the stream sorted by pts.
    pub fn insert_packets(
        &self,
        url: &str,
        stream_index: usize,
        packets: Vec<Packet>,
    ) -> anyhow::Result<()> {
        let mut beams = self
            .beams
            .write()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        let beam = beams
            .get_mut(url)
            .ok_or_else(|| anyhow::anyhow!("beam {} not found", url))?;
        let stored = beam.packets.entry(stream_index).or_default();
        stored.extend(packets);
        stored.sort_by_key(|p| p.timestamp());
        Ok(())
    }

    fn lookup(&self, request: &RetrieveRequest) -> anyhow::Result<Vec<Packet>> {
        let beams = self
            .beams
            .read()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        let beam = beams
            .get(&request.url)
            .ok_or_else(|| anyhow::anyhow!("beam {} not found", request.url))?;
        let Some(packets) = beam.packets.get(&request.stream_index) else {
            return Ok(Vec::new());
        };
        let selected = match request.window {
            MediaRange::Time { start, end } => packets
                .iter()
                .filter(|p| {
                    let secs = p.timestamp().as_secs_f64();
                    secs >= start && secs < end
                })
                .cloned()
                .collect(),
            MediaRange::Index { start, end } => {
                let len = packets.len() as i64;
                let (start, end) = (start.clamp(0, len) as usize, end.clamp(0, len) as usize);
                packets[start..end.max(start)].to_vec()
            }
        };
        Ok(selected)
    }
}

impl PacketStore for MemoryStore {
    fn format<'a>(&'a self, url: &'a str) -> BoxFuture<'a, anyhow::Result<Vec<StreamDescriptor>>> {
        let result = self
            .beams
            .read()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))
            .and_then(|beams| {
                beams
                    .get(url)
                    .map(|beam| beam.streams.clone())
                    .ok_or_else(|| anyhow::anyhow!("beam {} not found", url))
            });
        Box::pin(futures::future::ready(result))
    }

    fn retrieve<'a>(
        &'a self,
        request: &'a RetrieveRequest,
    ) -> BoxFuture<'a, anyhow::Result<Vec<Packet>>> {
        Box::pin(futures::future::ready(self.lookup(request)))
    }
}

#[cfg(test)]
#[path = "source_test.rs"]
mod source_test;
