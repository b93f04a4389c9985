use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use super::Transcoder;
use crate::{
    codec::{ContainerWriter, Decoder, Encoder, Filterer, IdentityFilter, MediaEngine},
    error::TranscodeError,
    frame::{AudioFrame, Frame, VideoFrame},
    job::{EncoderConfig, OutputTarget, PipelineConfig, StreamMapping, TranscodeJob},
    packet::Packet,
    rational::{Rational, Timestamp},
    source::{MemoryStore, PacketStore, RetrieveRequest},
    stream::{AudioParams, SampleFormat, StreamDescriptor, VideoParams},
};

const URL: &str = "file:clip.mxf";
const VIDEO_TB: Rational = Rational::new(1, 25);
const AUDIO_TB: Rational = Rational::new(1, 48000);
const OUT_TB: Rational = Rational::new(1, 90000);
const SAMPLES_PER_PACKET: usize = 1000;

fn audio_params(frame_size: Option<usize>) -> AudioParams {
    AudioParams {
        sample_rate: 48000,
        channels: 1,
        sample_format: SampleFormat::S16,
        frame_size,
    }
}

fn video_params() -> VideoParams {
    VideoParams {
        width: 1920,
        height: 1080,
        pixel_format: "yuv420p".to_string(),
        sample_aspect_ratio: None,
        frame_rate: Some(Rational::new(25, 1)),
    }
}

/// Four seconds of 25 fps video on stream 0 and 48 kHz mono audio in
/// 1000 sample packets on stream 1.
fn memory_store() -> MemoryStore {
    let store = MemoryStore::new();
    store
        .insert_format(
            URL,
            vec![
                StreamDescriptor::video(0, "h264", VIDEO_TB, video_params()),
                StreamDescriptor::audio(1, "pcm_s16le", AUDIO_TB, audio_params(None)),
            ],
        )
        .unwrap();
    let video = (0..100)
        .map(|i| Packet::new(0, i, VIDEO_TB, vec![0u8; 16]).with_key(i % 25 == 0))
        .collect();
    store.insert_packets(URL, 0, video).unwrap();
    let audio = (0..192)
        .map(|i| {
            let pts = i * SAMPLES_PER_PACKET as i64;
            Packet::new(1, pts, AUDIO_TB, vec![i as u8; SAMPLES_PER_PACKET * 2])
        })
        .collect();
    store.insert_packets(URL, 1, audio).unwrap();
    store
}

fn mapping(source_index: usize, codec: &str, audio: Option<AudioParams>) -> StreamMapping {
    StreamMapping {
        source_index,
        filter: None,
        encoder: EncoderConfig {
            codec: codec.to_string(),
            time_base: None,
            audio,
            video: None,
            options: Default::default(),
            global_header: false,
        },
        output_time_base: Some(OUT_TB),
    }
}

fn job(range: &str) -> TranscodeJob {
    TranscodeJob {
        source_url: URL.to_string(),
        range: range.parse().unwrap(),
        flags: 0,
        output: OutputTarget {
            url: "file:out.mp4".to_string(),
            format: Some("mp4".to_string()),
        },
        streams: vec![
            mapping(0, "fake-video", None),
            mapping(1, "fake-aac", Some(audio_params(Some(1024)))),
        ],
    }
}

#[derive(Default)]
struct WriterLog {
    streams: Vec<StreamDescriptor>,
    packets: Vec<Packet>,
    headers: usize,
    trailers: usize,
}

struct FakeWriter {
    log: Arc<Mutex<WriterLog>>,
    fail_at: Option<usize>,
}

impl ContainerWriter for FakeWriter {
    fn add_stream(&mut self, stream: &StreamDescriptor) -> anyhow::Result<usize> {
        let mut log = self.log.lock().unwrap();
        log.streams.push(stream.clone());
        Ok(log.streams.len() - 1)
    }

    fn write_header(&mut self) -> anyhow::Result<()> {
        self.log.lock().unwrap().headers += 1;
        Ok(())
    }

    fn time_base(&self, index: usize) -> Option<Rational> {
        self.log.lock().unwrap().streams.get(index).map(|s| s.time_base)
    }

    fn write_frame(&mut self, packet: Packet) -> anyhow::Result<()> {
        let mut log = self.log.lock().unwrap();
        if self.fail_at == Some(log.packets.len()) {
            return Err(anyhow::anyhow!("broken pipe"));
        }
        log.packets.push(packet);
        Ok(())
    }

    fn write_trailer(&mut self) -> anyhow::Result<()> {
        self.log.lock().unwrap().trailers += 1;
        Ok(())
    }
}

struct FakeDecoder {
    source: StreamDescriptor,
}

impl Decoder for FakeDecoder {
    fn decode(&mut self, packets: Vec<Packet>) -> anyhow::Result<Vec<Frame>> {
        let frames = packets
            .into_iter()
            .map(|p| match &self.source.audio {
                Some(audio) => Frame::Audio(AudioFrame::new(
                    p.pts,
                    audio.sample_format,
                    audio.channels,
                    audio.sample_rate,
                    p.size() / audio.bytes_per_sample(),
                    vec![p.data],
                )),
                None => Frame::Video(VideoFrame {
                    pts: p.pts,
                    width: 1920,
                    height: 1080,
                    pixel_format: "yuv420p".to_string(),
                    is_key: p.is_key,
                    linesizes: vec![p.size()],
                    planes: vec![p.data],
                }),
            })
            .collect();
        Ok(frames)
    }

    fn flush(&mut self) -> anyhow::Result<Vec<Frame>> {
        Ok(Vec::new())
    }
}

struct FakeEncoder {
    descriptor: StreamDescriptor,
    // fail once this many frames went through
    fail_after: Option<usize>,
    frames: usize,
}

impl Encoder for FakeEncoder {
    fn descriptor(&self) -> StreamDescriptor {
        self.descriptor.clone()
    }

    fn frame_size(&self) -> Option<usize> {
        self.descriptor.audio.as_ref().and_then(|a| a.frame_size)
    }

    fn encode(&mut self, frames: Vec<Frame>) -> anyhow::Result<Vec<Packet>> {
        let mut packets = Vec::with_capacity(frames.len());
        for frame in frames {
            self.frames += 1;
            if self.fail_after.is_some_and(|n| self.frames > n) {
                return Err(anyhow::anyhow!("encoder exploded"));
            }
            let tb = self.descriptor.time_base;
            let packet = match frame {
                Frame::Audio(frame) => Packet::new(
                    0,
                    frame.pts.unwrap_or(0),
                    tb,
                    frame.planes[0].clone(),
                )
                .with_duration(frame.nb_samples as i64),
                Frame::Video(frame) => {
                    Packet::new(0, frame.pts.unwrap_or(0), tb, frame.planes[0].clone())
                        .with_duration(1)
                        .with_key(frame.is_key)
                }
            };
            packets.push(packet);
        }
        Ok(packets)
    }

    fn flush(&mut self) -> anyhow::Result<Vec<Packet>> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct FakeEngine {
    log: Arc<Mutex<WriterLog>>,
    fail_write_at: Option<usize>,
    containers: AtomicUsize,
}

impl MediaEngine for FakeEngine {
    fn decoder(&self, source: &StreamDescriptor) -> anyhow::Result<Box<dyn Decoder>> {
        Ok(Box::new(FakeDecoder {
            source: source.clone(),
        }))
    }

    fn filter(
        &self,
        _source: &StreamDescriptor,
        mapping: &StreamMapping,
    ) -> anyhow::Result<Box<dyn Filterer>> {
        match mapping.filter.as_deref() {
            Some("reject") => Err(anyhow::anyhow!("no such filter")),
            _ => Ok(Box::new(IdentityFilter)),
        }
    }

    fn encoder(
        &self,
        source: &StreamDescriptor,
        mapping: &StreamMapping,
    ) -> anyhow::Result<Box<dyn Encoder>> {
        let config = &mapping.encoder;
        let descriptor = match (&source.audio, &source.video) {
            (Some(audio), _) => StreamDescriptor::audio(
                0,
                &config.codec,
                source.time_base,
                config.audio.clone().unwrap_or_else(|| audio.clone()),
            ),
            (_, Some(video)) => {
                StreamDescriptor::video(0, &config.codec, source.time_base, video.clone())
            }
            _ => return Err(anyhow::anyhow!("unsupported source")),
        };
        Ok(Box::new(FakeEncoder {
            descriptor,
            fail_after: (config.codec == "broken").then_some(10),
            frames: 0,
        }))
    }

    fn container(&self, _output: &OutputTarget) -> anyhow::Result<Box<dyn ContainerWriter>> {
        self.containers.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeWriter {
            log: self.log.clone(),
            fail_at: self.fail_write_at,
        }))
    }
}

fn transcoder(store: impl PacketStore + 'static, engine: Arc<FakeEngine>) -> Transcoder {
    Transcoder::new(Arc::new(store), engine, PipelineConfig::default())
}

fn assert_globally_ordered(packets: &[Packet]) {
    let keys: Vec<Timestamp> = packets.iter().map(|p| p.timestamp()).collect();
    assert!(keys.windows(2).all(|w| w[0] <= w[1]), "packets out of order");
}

#[tokio::test]
async fn test_transcode_two_streams() {
    let engine = Arc::new(FakeEngine::default());
    let transcoder = transcoder(memory_store(), engine.clone());

    let report = transcoder.run_transcode(&job("0s-2s")).await.unwrap();

    let log = engine.log.lock().unwrap();
    assert_eq!(log.headers, 1);
    assert_eq!(log.trailers, 1);
    assert_eq!(log.streams.len(), 2);
    assert!(log.streams.iter().all(|s| s.time_base == OUT_TB));
    assert_globally_ordered(&log.packets);

    let video: Vec<&Packet> = log.packets.iter().filter(|p| p.stream_index == 0).collect();
    assert_eq!(video.len(), 50);
    assert_eq!(video[1].pts, Some(3600));
    assert_eq!(video[49].pts, Some(49 * 3600));

    // 96 packets of 1000 samples become 93 frames of 1024 plus 768 left over
    let audio: Vec<&Packet> = log.packets.iter().filter(|p| p.stream_index == 1).collect();
    assert_eq!(audio.len(), 94);
    assert!(audio[..93].iter().all(|p| p.size() == 2048));
    assert_eq!(audio[93].size(), 768 * 2);
    for (i, packet) in audio.iter().enumerate() {
        assert_eq!(packet.time_base, OUT_TB);
        assert_eq!(packet.pts, Some(i as i64 * 1920));
    }
    let total: usize = audio.iter().map(|p| p.size()).sum();
    assert_eq!(total, 96 * SAMPLES_PER_PACKET * 2);

    assert_eq!(report.streams, 2);
    assert_eq!(report.packets_written, 144);
}

#[tokio::test]
async fn test_index_range_reads_packet_positions() {
    let engine = Arc::new(FakeEngine::default());
    let transcoder = transcoder(memory_store(), engine.clone());
    let mut job = job("10-40");
    job.streams.truncate(1);

    let report = transcoder.run_transcode(&job).await.unwrap();
    assert_eq!(report.packets_written, 30);
    let log = engine.log.lock().unwrap();
    assert_eq!(log.packets[0].pts, Some(10 * 3600));
}

#[tokio::test]
async fn test_configuration_errors_fail_before_output() {
    let engine = Arc::new(FakeEngine::default());
    let transcoder = transcoder(memory_store(), engine.clone());

    let mut missing = job("0s-1s");
    missing.streams[1].source_index = 7;
    let mut rejected = job("0s-1s");
    rejected.streams[0].filter = Some("reject".to_string());
    let mut empty = job("0s-1s");
    empty.streams.clear();
    let mut zero_tb = job("0s-1s");
    zero_tb.streams[0].output_time_base = Some(Rational::new(1, 0));

    for job in [missing, rejected, empty, zero_tb] {
        let err = transcoder.run_transcode(&job).await.unwrap_err();
        assert!(
            matches!(err, TranscodeError::Configuration(_)),
            "unexpected {}",
            err
        );
    }
    assert_eq!(engine.containers.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_codec_error_stops_job_and_writes_trailer() {
    let engine = Arc::new(FakeEngine::default());
    let transcoder = transcoder(memory_store(), engine.clone());
    let mut job = job("0s-4s");
    job.streams[1].encoder.codec = "broken".to_string();

    let err = transcoder.run_transcode(&job).await.unwrap_err();
    assert!(
        matches!(
            err,
            TranscodeError::Codec {
                stream: 1,
                stage: "encode",
                ..
            }
        ),
        "unexpected {}",
        err
    );
    assert!(!err.is_retryable());

    let log = engine.log.lock().unwrap();
    assert_eq!(log.trailers, 1);
    // the video chain is cancelled long before its 100 packets are through
    assert!(log.packets.iter().filter(|p| p.stream_index == 0).count() < 100);
    assert!(log.packets.iter().filter(|p| p.stream_index == 1).count() <= 10);
    assert_globally_ordered(&log.packets);
}

#[tokio::test]
async fn test_muxer_write_error_fails_job() {
    let engine = Arc::new(FakeEngine {
        fail_write_at: Some(5),
        ..Default::default()
    });
    let transcoder = transcoder(memory_store(), engine.clone());

    let err = transcoder.run_transcode(&job("0s-2s")).await.unwrap_err();
    assert!(matches!(err, TranscodeError::MuxerWrite(_)), "unexpected {}", err);
    let log = engine.log.lock().unwrap();
    assert_eq!(log.packets.len(), 5);
    assert_eq!(log.trailers, 1);
}

/// Store that fails or hangs on selected windows of one stream.
struct FlakyStore {
    inner: MemoryStore,
    stream_index: usize,
    // windows served before misbehaving
    good_windows: usize,
    hang: bool,
    calls: AtomicUsize,
}

impl PacketStore for FlakyStore {
    fn format<'a>(&'a self, url: &'a str) -> BoxFuture<'a, anyhow::Result<Vec<StreamDescriptor>>> {
        self.inner.format(url)
    }

    fn retrieve<'a>(
        &'a self,
        request: &'a RetrieveRequest,
    ) -> BoxFuture<'a, anyhow::Result<Vec<Packet>>> {
        if request.stream_index != self.stream_index {
            return self.inner.retrieve(request);
        }
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.good_windows {
            return self.inner.retrieve(request);
        }
        if self.hang {
            Box::pin(futures::future::pending())
        } else {
            Box::pin(async { Err(anyhow::anyhow!("beam service unavailable")) })
        }
    }
}

#[tokio::test]
async fn test_source_error_is_retryable() {
    let engine = Arc::new(FakeEngine::default());
    let store = FlakyStore {
        inner: memory_store(),
        stream_index: 1,
        good_windows: 1,
        hang: false,
        calls: AtomicUsize::new(0),
    };
    let transcoder = transcoder(store, engine.clone());

    let err = transcoder.run_transcode(&job("0s-4s")).await.unwrap_err();
    assert!(matches!(err, TranscodeError::SourceRead(_)), "unexpected {}", err);
    assert!(err.is_retryable());
    assert!(err.to_string().contains("beam service unavailable"));
    assert_eq!(engine.log.lock().unwrap().trailers, 1);
}

#[tokio::test]
async fn test_external_cancel_finishes_output() {
    let engine = Arc::new(FakeEngine::default());
    let store = FlakyStore {
        inner: memory_store(),
        stream_index: 0,
        good_windows: 1,
        hang: true,
        calls: AtomicUsize::new(0),
    };
    let transcoder = transcoder(store, engine.clone());
    let cancel = CancellationToken::new();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        transcoder.run_transcode_with_cancel(&job("0s-4s"), cancel),
    )
    .await
    .expect("cancelled job must not hang");

    assert!(matches!(result, Err(TranscodeError::Cancelled)));
    let log = engine.log.lock().unwrap();
    assert_eq!(log.trailers, 1);
    assert_globally_ordered(&log.packets);
}
