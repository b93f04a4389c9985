use axum::{
    Json, Router,
    extract::Path,
    routing::{get, post},
};
use beam_transcode::TranscodeJob;
use serde::Deserialize;

use crate::{
    handler::{ApiError, ApiJsonResult},
    manager::{self, JobSummary},
};

pub fn transcode_router() -> Router {
    Router::new()
        .route("/", get(index))
        .route("/list", get(list_jobs))
        .route("/add", post(add_job))
        .route("/remove/{id}", get(remove_job))
        .route("/status/{id}", get(get_job_status))
}

#[derive(Deserialize)]
struct JobRequest {
    id: String,
    job: TranscodeJob,
    // replace a job registered under the same id
    #[serde(default)]
    update: bool,
}

async fn index() -> &'static str {
    "transcode route!"
}

async fn list_jobs() -> ApiJsonResult<Vec<JobSummary>> {
    Ok(Json(manager::job_manager()?.list().await))
}

async fn add_job(Json(request): Json<JobRequest>) -> ApiJsonResult<JobSummary> {
    let handle = manager::job_manager()?
        .add_job(&request.id, request.job, request.update)
        .await
        .map_err(ApiError::bad_request)?;
    Ok(Json(JobSummary::from(handle.as_ref())))
}

async fn remove_job(Path(id): Path<String>) -> ApiJsonResult<String> {
    if !manager::job_manager()?.remove_job(&id).await {
        return Err(ApiError::not_found(format!("job {}", id)));
    }
    Ok(Json("success".to_string()))
}

async fn get_job_status(Path(id): Path<String>) -> ApiJsonResult<JobSummary> {
    match manager::job_manager()?.get_job(&id).await {
        Some(handle) => Ok(Json(JobSummary::from(handle.as_ref()))),
        None => Err(ApiError::not_found(format!("job {}", id))),
    }
}
