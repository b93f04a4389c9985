//! Pipeline orchestrator: one chain of stages per output stream, all feeding
//! a shared balanced muxer.
//!
//! ```text
//! source ─▶ decode ─▶ filter ─▶ dice ─▶ encode ─▶ mux
//! (async)   └────────── blocking pool ─────────┘   (async)
//! ```
//!
//! Stages are joined by bounded channels, so a slow muxer turn backs up the
//! whole chain instead of buffering the source in memory.

use std::sync::Arc;

use tokio::sync::mpsc::{Receiver, Sender, channel};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::{
    codec::{Decoder, Encoder, Filterer, MediaEngine},
    dicer::DiceStage,
    error::{Result, TranscodeError},
    frame::Frame,
    job::{PipelineConfig, StreamMapping, TranscodeJob},
    muxer::BalancedMuxer,
    packet::{Packet, PacketCmd},
    rational::Rational,
    source::{PacketSource, PacketStore},
    stream::StreamDescriptor,
};

/// What flows between two stages. A channel that closes without `EOF` means
/// the upstream stage stopped early, and nothing downstream flushes.
#[derive(Debug)]
pub enum StageCmd<T> {
    Data(Vec<T>),
    EOF,
}

/// Summary of a finished job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranscodeReport {
    pub streams: usize,
    pub packets_written: u64,
}

/// Everything one chain needs, built before any chain starts.
struct Chain {
    output_index: usize,
    source_index: usize,
    decoder: Box<dyn Decoder>,
    filter: Box<dyn Filterer>,
    dice: DiceStage,
    encoder: Box<dyn Encoder>,
}

pub struct Transcoder {
    store: Arc<dyn PacketStore>,
    engine: Arc<dyn MediaEngine>,
    config: PipelineConfig,
}

impl Transcoder {
    pub fn new(
        store: Arc<dyn PacketStore>,
        engine: Arc<dyn MediaEngine>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            engine,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn run_transcode(&self, job: &TranscodeJob) -> Result<TranscodeReport> {
        self.run_transcode_with_cancel(job, CancellationToken::new())
            .await
    }

    /// Runs the job until every chain has ended. Cancelling `cancel` stops the
    /// chains without flushing; the container trailer is still written.
    pub async fn run_transcode_with_cancel(
        &self,
        job: &TranscodeJob,
        cancel: CancellationToken,
    ) -> Result<TranscodeReport> {
        job.validate()?;
        if self.config.queue_capacity == 0 {
            return Err(TranscodeError::config("queue capacity must be at least 1"));
        }
        log::info!(
            "transcode {} range {} -> {} ({} streams)",
            job.source_url,
            job.range,
            job.output.url,
            job.streams.len()
        );

        let sources = tokio::select! {
            _ = cancel.cancelled() => return Err(TranscodeError::Cancelled),
            sources = self.store.format(&job.source_url) => {
                sources.map_err(TranscodeError::SourceRead)?
            }
        };

        let mut chains = Vec::with_capacity(job.streams.len());
        for (output_index, mapping) in job.streams.iter().enumerate() {
            chains.push(self.build_chain(output_index, mapping, &sources)?);
        }

        let mut writer = self
            .engine
            .container(&job.output)
            .map_err(|e| TranscodeError::MuxerWrite(format!("open {}: {:#}", job.output.url, e)))?;
        let mut requested = Vec::with_capacity(chains.len());
        for (chain, mapping) in chains.iter().zip(&job.streams) {
            let mut descriptor = chain.encoder.descriptor();
            descriptor.index = chain.output_index;
            if let Some(tb) = mapping.output_time_base {
                descriptor.time_base = tb;
            }
            let index = writer
                .add_stream(&descriptor)
                .map_err(|e| TranscodeError::MuxerWrite(format!("add stream: {:#}", e)))?;
            if index != chain.output_index {
                return Err(TranscodeError::Internal(format!(
                    "container assigned index {} to output stream {}",
                    index, chain.output_index
                )));
            }
            requested.push(descriptor.time_base);
        }
        writer
            .write_header()
            .map_err(|e| TranscodeError::MuxerWrite(format!("header: {:#}", e)))?;
        // the container may adjust the requested time bases when writing the header
        let time_bases: Vec<Rational> = requested
            .iter()
            .enumerate()
            .map(|(i, tb)| writer.time_base(i).unwrap_or(*tb))
            .collect();
        let muxer = Arc::new(BalancedMuxer::new(writer, time_bases)?);

        let job_cancel = cancel.child_token();
        let mut tasks = JoinSet::new();
        for chain in chains {
            self.spawn_chain(&mut tasks, job, chain, muxer.clone(), job_cancel.clone());
        }

        let mut first_error: Option<TranscodeError> = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined.unwrap_or_else(|e| {
                job_cancel.cancel();
                Err(TranscodeError::Internal(format!("stage task failed: {}", e)))
            });
            if let Err(e) = result {
                if first_error.is_none() {
                    log::error!("transcode {} failed: {}", job.source_url, e);
                    first_error = Some(e);
                } else {
                    log::debug!("transcode {} follow-up error: {}", job.source_url, e);
                }
            }
        }

        if let Err(e) = muxer.finish().await {
            log::error!("transcode {} trailer: {}", job.source_url, e);
            first_error.get_or_insert(e);
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        if cancel.is_cancelled() {
            log::info!("transcode {} cancelled", job.source_url);
            return Err(TranscodeError::Cancelled);
        }

        let report = TranscodeReport {
            streams: job.streams.len(),
            packets_written: muxer.packets_written().await,
        };
        log::info!(
            "transcode {} done, {} packets written",
            job.output.url,
            report.packets_written
        );
        Ok(report)
    }

    fn build_chain(
        &self,
        output_index: usize,
        mapping: &StreamMapping,
        sources: &[StreamDescriptor],
    ) -> Result<Chain> {
        let source = sources
            .iter()
            .find(|s| s.index == mapping.source_index)
            .ok_or_else(|| {
                TranscodeError::config(format!(
                    "output stream {} maps missing source stream {}",
                    output_index, mapping.source_index
                ))
            })?;
        source.validate()?;

        let setup = |what: &str, e: anyhow::Error| {
            TranscodeError::config(format!(
                "output stream {} {}: {:#}",
                output_index, what, e
            ))
        };
        let decoder = self
            .engine
            .decoder(source)
            .map_err(|e| setup("decoder", e))?;
        let filter = self
            .engine
            .filter(source, mapping)
            .map_err(|e| setup("filter", e))?;
        let encoder = self
            .engine
            .encoder(source, mapping)
            .map_err(|e| setup("encoder", e))?;
        let dice = DiceStage::for_output(&encoder.descriptor(), encoder.frame_size())?;
        log::debug!(
            "output stream {}: source {} ({}) -> {}{}",
            output_index,
            source.index,
            source.codec,
            mapping.encoder.codec,
            if dice.is_dicing() { ", diced" } else { "" }
        );

        Ok(Chain {
            output_index,
            source_index: source.index,
            decoder,
            filter,
            dice,
            encoder,
        })
    }

    fn spawn_chain(
        &self,
        tasks: &mut JoinSet<Result<()>>,
        job: &TranscodeJob,
        chain: Chain,
        muxer: Arc<BalancedMuxer>,
        cancel: CancellationToken,
    ) {
        let capacity = self.config.queue_capacity;
        let stream = chain.output_index;
        let (packet_tx, packet_rx) = channel::<StageCmd<Packet>>(capacity);
        let (decoded_tx, decoded_rx) = channel::<StageCmd<Frame>>(capacity);
        let (filtered_tx, filtered_rx) = channel::<StageCmd<Frame>>(capacity);
        let (diced_tx, diced_rx) = channel::<StageCmd<Frame>>(capacity);
        let (encoded_tx, encoded_rx) = channel::<StageCmd<Packet>>(capacity);

        let source = PacketSource::new(
            self.store.clone(),
            &job.source_url,
            chain.source_index,
            job.range,
            job.flags,
            self.config.window_secs,
            self.config.window_packets,
        );
        tasks.spawn(source_loop(stream, source, packet_tx, cancel.clone()));

        let mut decoder = chain.decoder;
        let c = cancel.clone();
        tasks.spawn_blocking(move || {
            stage_loop(stream, "decode", packet_rx, decoded_tx, c, |batch| {
                let output = match batch {
                    Some(packets) => decoder.decode(packets),
                    None => decoder.flush(),
                };
                output.map_err(|e| TranscodeError::codec(stream, "decode", e))
            })
        });

        let mut filter = chain.filter;
        let c = cancel.clone();
        tasks.spawn_blocking(move || {
            stage_loop(stream, "filter", decoded_rx, filtered_tx, c, |batch| {
                let output = match batch {
                    Some(frames) => filter.filter(frames),
                    None => filter.flush(),
                };
                output.map_err(|e| TranscodeError::codec(stream, "filter", e))
            })
        });

        let mut dice = chain.dice;
        let c = cancel.clone();
        tasks.spawn_blocking(move || {
            stage_loop(stream, "dice", filtered_rx, diced_tx, c, |batch| match batch {
                Some(frames) => dice.process(frames),
                None => Ok(dice.flush()),
            })
        });

        let mut encoder = chain.encoder;
        let c = cancel.clone();
        tasks.spawn_blocking(move || {
            stage_loop(stream, "encode", diced_rx, encoded_tx, c, |batch| {
                let output = match batch {
                    Some(frames) => encoder.encode(frames),
                    None => encoder.flush(),
                };
                output.map_err(|e| TranscodeError::codec(stream, "encode", e))
            })
        });

        tasks.spawn(mux_loop(stream, encoded_rx, muxer, cancel));
    }
}

async fn forward<T>(tx: &Sender<StageCmd<T>>, cmd: StageCmd<T>, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        sent = tx.send(cmd) => sent.is_ok(),
    }
}

async fn source_loop(
    stream: usize,
    mut source: PacketSource,
    tx: Sender<StageCmd<Packet>>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        let batch = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            batch = source.next_batch() => batch,
        };
        match batch {
            Some(Ok(packets)) => {
                log::trace!("stream {}: read {} packets", stream, packets.len());
                if !forward(&tx, StageCmd::Data(packets), &cancel).await {
                    return Ok(());
                }
            }
            Some(Err(e)) => {
                cancel.cancel();
                return Err(TranscodeError::SourceRead(e));
            }
            None => {
                forward(&tx, StageCmd::EOF, &cancel).await;
                return Ok(());
            }
        }
    }
}

/// Runs one codec stage on the blocking pool. `work(Some(batch))` processes
/// a batch, `work(None)` drains the stage at end of stream.
fn stage_loop<I, O>(
    stream: usize,
    name: &'static str,
    mut rx: Receiver<StageCmd<I>>,
    tx: Sender<StageCmd<O>>,
    cancel: CancellationToken,
    mut work: impl FnMut(Option<Vec<I>>) -> Result<Vec<O>>,
) -> Result<()> {
    while let Some(cmd) = rx.blocking_recv() {
        if cancel.is_cancelled() {
            return Ok(());
        }
        match cmd {
            StageCmd::Data(items) => {
                let output = work(Some(items)).inspect_err(|_| cancel.cancel())?;
                if !output.is_empty() && tx.blocking_send(StageCmd::Data(output)).is_err() {
                    return Ok(());
                }
            }
            StageCmd::EOF => {
                let output = work(None).inspect_err(|_| cancel.cancel())?;
                if !output.is_empty() && tx.blocking_send(StageCmd::Data(output)).is_err() {
                    return Ok(());
                }
                log::debug!("stream {}: {} stage reached end of stream", stream, name);
                let _ = tx.blocking_send(StageCmd::EOF);
                return Ok(());
            }
        }
    }
    Ok(())
}

/// Feeds encoded packets to the muxer. Always ends the stream at the muxer,
/// whatever happened upstream, so sibling chains are never left waiting.
async fn mux_loop(
    stream: usize,
    mut rx: Receiver<StageCmd<Packet>>,
    muxer: Arc<BalancedMuxer>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut result = Ok(());
    'recv: loop {
        let cmd = tokio::select! {
            _ = cancel.cancelled() => break,
            cmd = rx.recv() => cmd,
        };
        let Some(StageCmd::Data(packets)) = cmd else {
            break;
        };
        for packet in packets {
            if cancel.is_cancelled() {
                break 'recv;
            }
            if let Err(e) = muxer.submit(stream, PacketCmd::Data(packet)).await {
                cancel.cancel();
                result = Err(e);
                break 'recv;
            }
        }
    }
    drop(rx);
    if let Err(e) = muxer.submit(stream, PacketCmd::EOF).await {
        log::warn!("stream {}: end of stream rejected: {}", stream, e);
    }
    result
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;
