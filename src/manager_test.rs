use std::sync::Arc;
use std::time::Duration;

use beam_transcode::{
    EncoderConfig, OutputTarget, PipelineConfig, StreamMapping, TranscodeJob, Transcoder,
    packet::Packet,
    rational::Rational,
    source::{MemoryStore, PacketStore, RetrieveRequest},
    stream::{StreamDescriptor, VideoParams},
};
use futures::future::BoxFuture;

use super::{JobManager, JobState};
use crate::engine::UnavailableEngine;

const URL: &str = "file:clip.mxf";

/// Never answers, so a job stays running until cancelled.
struct StalledStore;

impl PacketStore for StalledStore {
    fn format<'a>(&'a self, _url: &'a str) -> BoxFuture<'a, anyhow::Result<Vec<StreamDescriptor>>> {
        Box::pin(futures::future::pending())
    }

    fn retrieve<'a>(
        &'a self,
        _request: &'a RetrieveRequest,
    ) -> BoxFuture<'a, anyhow::Result<Vec<Packet>>> {
        Box::pin(futures::future::pending())
    }
}

fn job() -> TranscodeJob {
    TranscodeJob {
        source_url: URL.to_string(),
        range: "0s-1s".parse().unwrap(),
        flags: 0,
        output: OutputTarget {
            url: "file:out.mp4".to_string(),
            format: None,
        },
        streams: vec![StreamMapping {
            source_index: 0,
            filter: None,
            encoder: EncoderConfig {
                codec: "libx264".to_string(),
                time_base: None,
                audio: None,
                video: None,
                options: Default::default(),
                global_header: false,
            },
            output_time_base: None,
        }],
    }
}

fn manager(store: Arc<dyn PacketStore>) -> JobManager {
    JobManager::new(Transcoder::new(
        store,
        Arc::new(UnavailableEngine),
        PipelineConfig::default(),
    ))
}

fn memory_store() -> Arc<dyn PacketStore> {
    let store = MemoryStore::new();
    store
        .insert_format(
            URL,
            vec![StreamDescriptor::video(
                0,
                "h264",
                Rational::new(1, 25),
                VideoParams {
                    width: 1280,
                    height: 720,
                    pixel_format: "yuv420p".to_string(),
                    sample_aspect_ratio: None,
                    frame_rate: None,
                },
            )],
        )
        .unwrap();
    Arc::new(store)
}

#[tokio::test]
async fn test_job_without_codecs_fails_as_configuration() {
    let manager = manager(memory_store());
    let handle = manager.add_job("a", job(), false).await.unwrap();

    let state = tokio::time::timeout(Duration::from_secs(5), handle.wait_done())
        .await
        .unwrap();
    match state {
        JobState::Failed { error, retryable } => {
            assert!(error.starts_with("configuration error"), "{}", error);
            assert!(!retryable);
        }
        other => panic!("unexpected state {:?}", other),
    }
    assert_eq!(manager.list().await.len(), 1);
}

#[tokio::test]
async fn test_duplicate_id_is_rejected_unless_updating() {
    let manager = manager(Arc::new(StalledStore));
    let first = manager.add_job("a", job(), false).await.unwrap();
    assert!(manager.add_job("a", job(), false).await.is_err());

    let second = manager.add_job("a", job(), true).await.unwrap();
    let state = tokio::time::timeout(Duration::from_secs(5), first.wait_done())
        .await
        .unwrap();
    assert_eq!(state, JobState::Cancelled);
    assert!(!second.state().is_done());

    let current = manager.get_job("a").await.unwrap();
    assert!(Arc::ptr_eq(&current, &second));
    manager.shutdown(Duration::from_secs(5)).await;
    assert_eq!(second.state(), JobState::Cancelled);
}

#[tokio::test]
async fn test_remove_cancels_running_job() {
    let manager = manager(Arc::new(StalledStore));
    let handle = manager.add_job("a", job(), false).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(handle.state(), JobState::Running);

    assert!(manager.remove_job("a").await);
    assert!(!manager.remove_job("a").await);
    let state = tokio::time::timeout(Duration::from_secs(5), handle.wait_done())
        .await
        .unwrap();
    assert_eq!(state, JobState::Cancelled);
    assert!(manager.get_job("a").await.is_none());
    assert!(manager.list().await.is_empty());
}

#[tokio::test]
async fn test_invalid_job_is_not_registered() {
    let manager = manager(Arc::new(StalledStore));
    let mut invalid = job();
    invalid.streams.clear();
    assert!(manager.add_job("a", invalid, false).await.is_err());
    assert!(manager.add_job("", job(), false).await.is_err());
    assert!(manager.list().await.is_empty());
}

#[test]
fn test_job_state_serializes_tagged() {
    let state = JobState::Failed {
        error: "source read error: timeout".to_string(),
        retryable: true,
    };
    assert_eq!(
        serde_json::to_value(&state).unwrap(),
        serde_json::json!({
            "state": "failed",
            "error": "source read error: timeout",
            "retryable": true,
        })
    );
    assert_eq!(
        serde_json::to_value(JobState::Finished { packets_written: 3 }).unwrap(),
        serde_json::json!({ "state": "finished", "packets_written": 3 })
    );
}
