//! Balanced muxer: decides the global write order of packets produced by
//! concurrently running stream chains.
//!
//! Every stream owns one slot. A chain submits a packet and is suspended
//! until that packet has been written. A write only happens once every slot
//! is occupied, either by a pending packet or by an end of stream marker;
//! an empty slot means that stream has not told us its next timestamp yet,
//! so nothing can safely be written before it. The pending packet with the
//! smallest timestamp wins, ties go to the lower stream index.

use tokio::sync::{Mutex, oneshot, watch};

use crate::{
    codec::ContainerWriter,
    error::{Result, TranscodeError},
    packet::{Packet, PacketCmd},
    rational::{Rational, Timestamp},
};

enum Slot {
    Empty,
    Pending {
        key: Timestamp,
        packet: Packet,
        done: oneshot::Sender<Result<()>>,
    },
    Ended,
}

struct MuxState {
    writer: Box<dyn ContainerWriter>,
    slots: Vec<Slot>,
    time_bases: Vec<Rational>,
    // first writer failure, replayed to every later data submission
    error: Option<String>,
    have_written_trailer: bool,
    packets_written: u64,
}

impl MuxState {
    fn all_ended(&self) -> bool {
        self.slots.iter().all(|slot| matches!(slot, Slot::Ended))
    }

    fn next_ready(&self) -> Option<usize> {
        if self.slots.iter().any(|slot| matches!(slot, Slot::Empty)) {
            return None;
        }
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| match slot {
                Slot::Pending { key, .. } => Some((*key, i)),
                _ => None,
            })
            .min()
            .map(|(_, i)| i)
    }

    /// Writes the winning packet if the barrier is complete.
    fn write_next(&mut self) {
        let Some(index) = self.next_ready() else {
            return;
        };
        let Slot::Pending { packet, done, .. } =
            std::mem::replace(&mut self.slots[index], Slot::Empty)
        else {
            return;
        };
        log::trace!("mux write {}", packet);
        match self.writer.write_frame(packet) {
            Ok(()) => {
                self.packets_written += 1;
                let _ = done.send(Ok(()));
            }
            Err(e) => {
                let msg = format!("stream {}: {:#}", index, e);
                log::error!("muxer write failed, {}", msg);
                let _ = done.send(Err(TranscodeError::MuxerWrite(msg.clone())));
                self.fail(msg);
            }
        }
    }

    fn fail(&mut self, msg: String) {
        for slot in self.slots.iter_mut() {
            if matches!(slot, Slot::Pending { .. }) {
                if let Slot::Pending { done, .. } = std::mem::replace(slot, Slot::Empty) {
                    let _ = done.send(Err(TranscodeError::MuxerWrite(msg.clone())));
                }
            }
        }
        if self.error.is_none() {
            self.error = Some(msg);
        }
    }
}

pub struct BalancedMuxer {
    state: Mutex<MuxState>,
    finished: watch::Sender<bool>,
}

impl BalancedMuxer {
    /// `writer` must already have one stream per entry of
    /// `output_time_bases`, with its header written.
    pub fn new(
        writer: Box<dyn ContainerWriter>,
        output_time_bases: Vec<Rational>,
    ) -> Result<Self> {
        if output_time_bases.is_empty() {
            return Err(TranscodeError::config("muxer needs at least one stream"));
        }
        for tb in &output_time_bases {
            tb.validate()?;
        }
        let (finished, _) = watch::channel(false);
        Ok(Self {
            state: Mutex::new(MuxState {
                writer,
                slots: output_time_bases.iter().map(|_| Slot::Empty).collect(),
                time_bases: output_time_bases,
                error: None,
                have_written_trailer: false,
                packets_written: 0,
            }),
            finished,
        })
    }

    /// Offers the next packet of `stream_index`, or its end of stream.
    ///
    /// A data submission resolves once the packet has been written, so a
    /// chain never has more than one packet in the muxer. An end of stream
    /// resolves immediately.
    pub async fn submit(&self, stream_index: usize, cmd: PacketCmd) -> Result<()> {
        let done = {
            let mut state = self.state.lock().await;
            let Some(slot) = state.slots.get(stream_index) else {
                return Err(TranscodeError::config(format!(
                    "muxer has no stream {}",
                    stream_index
                )));
            };
            match slot {
                Slot::Pending { .. } => {
                    return Err(TranscodeError::config(format!(
                        "stream {} submitted while a packet is pending",
                        stream_index
                    )));
                }
                Slot::Ended => {
                    return Err(TranscodeError::config(format!(
                        "stream {} submitted after end of stream",
                        stream_index
                    )));
                }
                Slot::Empty => {}
            }

            match cmd {
                PacketCmd::EOF => {
                    log::debug!("muxer stream {} ended", stream_index);
                    state.slots[stream_index] = Slot::Ended;
                    state.write_next();
                    if state.all_ended() {
                        log::info!(
                            "muxer finished, {} packets written",
                            state.packets_written
                        );
                        self.finished.send_replace(true);
                    }
                    return Ok(());
                }
                PacketCmd::Data(mut packet) => {
                    if let Some(msg) = &state.error {
                        return Err(TranscodeError::MuxerWrite(msg.clone()));
                    }
                    packet.rescale_ts(state.time_bases[stream_index]);
                    packet.stream_index = stream_index;
                    let key = packet.timestamp();
                    let (tx, rx) = oneshot::channel();
                    state.slots[stream_index] = Slot::Pending {
                        key,
                        packet,
                        done: tx,
                    };
                    state.write_next();
                    rx
                }
            }
        };

        done.await
            .map_err(|_| TranscodeError::Internal("muxer dropped a pending packet".to_string()))?
    }

    /// True once every stream has submitted its end of stream.
    pub fn is_finished(&self) -> bool {
        *self.finished.borrow()
    }

    pub async fn wait_finished(&self) {
        let mut rx = self.finished.subscribe();
        let _ = rx.wait_for(|finished| *finished).await;
    }

    pub async fn packets_written(&self) -> u64 {
        self.state.lock().await.packets_written
    }

    /// Writes the container trailer. Only the first call reaches the writer.
    pub async fn finish(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.have_written_trailer {
            return Ok(());
        }
        if !state.all_ended() {
            log::warn!("muxer finishing before every stream ended");
            state.fail("muxer finished with streams still open".to_string());
        }
        state.have_written_trailer = true;
        state
            .writer
            .write_trailer()
            .map_err(|e| TranscodeError::MuxerWrite(format!("trailer: {:#}", e)))
    }
}

#[cfg(test)]
#[path = "muxer_test.rs"]
mod muxer_test;
