use std::{
    collections::HashMap,
    sync::{Arc, OnceLock},
    time::Duration,
};

use beam_transcode::{TranscodeJob, Transcoder};
use serde::Serialize;
use tokio::sync::{RwLock, watch};
use tokio_util::sync::CancellationToken;

static JOB_MANAGER: OnceLock<JobManager> = OnceLock::new();

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub(crate) enum JobState {
    Pending,
    Running,
    Finished { packets_written: u64 },
    Failed { error: String, retryable: bool },
    Cancelled,
}

impl JobState {
    pub(crate) fn is_done(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

pub(crate) struct JobHandle {
    id: String,
    job: TranscodeJob,
    cancel: CancellationToken,
    state: watch::Sender<JobState>,
}

impl JobHandle {
    fn new(id: &str, job: TranscodeJob) -> Self {
        let (state, _) = watch::channel(JobState::Pending);
        Self {
            id: id.to_string(),
            job,
            cancel: CancellationToken::new(),
            state,
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn job(&self) -> &TranscodeJob {
        &self.job
    }

    pub(crate) fn state(&self) -> JobState {
        self.state.borrow().clone()
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    pub(crate) async fn wait_done(&self) -> JobState {
        let mut rx = self.state.subscribe();
        let state = match rx.wait_for(JobState::is_done).await {
            Ok(state) => state.clone(),
            // the sender lives in self
            Err(_) => self.state(),
        };
        state
    }

    async fn run(self: Arc<Self>, transcoder: Arc<Transcoder>) {
        if self.cancel.is_cancelled() {
            self.state.send_replace(JobState::Cancelled);
            return;
        }
        self.state.send_replace(JobState::Running);
        let state = match transcoder
            .run_transcode_with_cancel(&self.job, self.cancel.clone())
            .await
        {
            Ok(report) => {
                log::info!(
                    "job {} finished, {} packets in {} streams",
                    self.id,
                    report.packets_written,
                    report.streams
                );
                JobState::Finished {
                    packets_written: report.packets_written,
                }
            }
            Err(beam_transcode::TranscodeError::Cancelled) => {
                log::info!("job {} cancelled", self.id);
                JobState::Cancelled
            }
            Err(e) => {
                log::error!("job {} failed: {}", self.id, e);
                JobState::Failed {
                    retryable: e.is_retryable(),
                    error: e.to_string(),
                }
            }
        };
        self.state.send_replace(state);
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JobSummary {
    pub id: String,
    pub source_url: String,
    pub output_url: String,
    #[serde(flatten)]
    pub state: JobState,
}

impl From<&JobHandle> for JobSummary {
    fn from(handle: &JobHandle) -> Self {
        Self {
            id: handle.id().to_string(),
            source_url: handle.job().source_url.clone(),
            output_url: handle.job().output.url.clone(),
            state: handle.state(),
        }
    }
}

pub(crate) struct JobManager {
    jobs: RwLock<HashMap<String, Arc<JobHandle>>>,
    transcoder: Arc<Transcoder>,
}

impl JobManager {
    pub(crate) fn new(transcoder: Transcoder) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            transcoder: Arc::new(transcoder),
        }
    }

    /// Registers `job` under `id` and starts it in the background. An
    /// existing job with the same id is cancelled first when
    /// `update_if_exists` is set.
    pub(crate) async fn add_job(
        &self,
        id: &str,
        job: TranscodeJob,
        update_if_exists: bool,
    ) -> anyhow::Result<Arc<JobHandle>> {
        if id.is_empty() {
            anyhow::bail!("job id is required");
        }
        job.validate()?;

        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(id) {
            if !update_if_exists {
                anyhow::bail!("job {} already exists", id);
            }
            if let Some(old) = jobs.remove(id) {
                old.cancel();
            }
        }
        let handle = Arc::new(JobHandle::new(id, job));
        jobs.insert(id.to_string(), Arc::clone(&handle));

        tokio::spawn(Arc::clone(&handle).run(Arc::clone(&self.transcoder)));
        Ok(handle)
    }

    /// Cancels and forgets the job. Returns whether it existed.
    pub(crate) async fn remove_job(&self, id: &str) -> bool {
        let mut jobs = self.jobs.write().await;
        match jobs.remove(id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    pub(crate) async fn get_job(&self, id: &str) -> Option<Arc<JobHandle>> {
        self.jobs.read().await.get(id).cloned()
    }

    pub(crate) async fn list(&self) -> Vec<JobSummary> {
        let jobs = self.jobs.read().await;
        let mut list: Vec<JobSummary> = jobs
            .values()
            .map(|handle| JobSummary::from(handle.as_ref()))
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    /// Cancels every job and waits up to `grace` for them to close their
    /// outputs.
    pub(crate) async fn shutdown(&self, grace: Duration) {
        let handles: Vec<Arc<JobHandle>> =
            self.jobs.read().await.values().cloned().collect();
        for handle in &handles {
            handle.cancel();
        }
        let done = futures::future::join_all(handles.iter().map(|handle| handle.wait_done()));
        if tokio::time::timeout(grace, done).await.is_err() {
            log::warn!("jobs still running after {:?}, exiting anyway", grace);
        }
    }
}

pub(crate) fn init_job_manager(transcoder: Transcoder) -> anyhow::Result<()> {
    JOB_MANAGER
        .set(JobManager::new(transcoder))
        .map_err(|_| anyhow::anyhow!("job manager already initialized"))
}

pub(crate) fn job_manager() -> anyhow::Result<&'static JobManager> {
    JOB_MANAGER
        .get()
        .ok_or_else(|| anyhow::anyhow!("job manager is not initialized"))
}

#[cfg(test)]
#[path = "manager_test.rs"]
mod manager_test;
