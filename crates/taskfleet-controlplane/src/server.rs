//! HTTP API
//!
//! | Method   | Path          | Result                                       |
//! |----------|---------------|----------------------------------------------|
//! | `POST`   | `/task`       | `{"id"}` of the job creating the task        |
//! | `DELETE` | `/task/{id}`  | `{"id"}` of the job deleting the task        |
//! | `GET`    | `/tasks`      | `{"tasks"}` long identifiers                 |
//! | `GET`    | `/task/{id}`  | `{"active", "succeeded", "failed"}`          |
//! | `GET`    | `/job/{id}`   | `{"id", "status", "error"?}`                 |
//! | `GET`    | `/health`     | `ok`                                         |
//!
//! Creation and deletion run in the background through the [`JobManager`];
//! listing and status are answered synchronously.

use crate::credentials::cloud_from_headers;
use crate::error::{ApiError, ApiResult};
use crate::factory::TaskFactory;
use crate::jobs::{JobManager, JobState};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use taskfleet_cloud::{Identifier, StatusCode, TaskAttributes};
use taskfleet_config::Settings;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Body of `POST /task`
#[derive(Debug, Clone, Deserialize)]
pub struct TaskRequest {
    pub name: String,
    #[serde(flatten)]
    pub attributes: TaskAttributes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReference {
    pub id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResponse {
    pub id: Uuid,
    pub status: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskList {
    pub tasks: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskStatus {
    pub active: u32,
    pub succeeded: u32,
    pub failed: u32,
}

#[derive(Clone)]
pub struct AppState {
    jobs: JobManager,
    factory: Arc<dyn TaskFactory>,
    settings: Arc<Settings>,
    /// Last job submitted per task, by long identifier, while the job is held
    tasks: Arc<Mutex<HashMap<String, Uuid>>>,
}

impl AppState {
    pub fn new(settings: Settings, factory: Arc<dyn TaskFactory>) -> Self {
        Self {
            jobs: JobManager::new(),
            factory,
            settings: Arc::new(settings),
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_jobs(mut self, jobs: JobManager) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn jobs(&self) -> &JobManager {
        &self.jobs
    }

    /// Submit a mutating operation unless the task already has one running
    async fn submit<F>(&self, identifier: &Identifier, operation: F) -> ApiResult<Uuid>
    where
        F: Future<Output = taskfleet_cloud::Result<()>> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().await;
        let held = self.jobs.ids().await;
        tasks.retain(|_, job| held.contains(job));

        let key = identifier.long();
        if let Some(previous) = tasks.get(&key) {
            if let Ok(status) = self.jobs.status(*previous).await {
                if status.state == JobState::Running {
                    return Err(ApiError::Conflict(format!(
                        "task {key} is busy with job {previous}"
                    )));
                }
            }
        }
        let id = self.jobs.submit(operation).await;
        tasks.insert(key, id);
        Ok(id)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/task", post(create_task))
        .route("/task/{id}", get(task_status).delete(delete_task))
        .route("/tasks", get(list_tasks))
        .route("/job/{id}", get(job_status))
        .with_state(state)
}

/// Bind `settings.listen` and serve until interrupted
pub async fn serve(settings: Settings, factory: Arc<dyn TaskFactory>) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(&settings.listen).await?;
    tracing::info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, router(AppState::new(settings, factory)))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("Cannot listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

fn parse_identifier(id: &str) -> ApiResult<Identifier> {
    Identifier::parse(id).map_err(|err| ApiError::BadRequest(err.to_string()))
}

async fn health() -> &'static str {
    "ok"
}

async fn create_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<TaskRequest>, JsonRejection>,
) -> ApiResult<Json<JobReference>> {
    let cloud = cloud_from_headers(&headers, &state.settings)?;
    let Json(request) = body.map_err(|err| ApiError::BadRequest(err.body_text()))?;
    if request.name.trim().is_empty() {
        return Err(ApiError::BadRequest("task name is empty".to_string()));
    }

    let identifier = Identifier::new(&request.name);
    let mut task = state
        .factory
        .task(cloud, identifier.clone(), request.attributes)?;
    let id = state
        .submit(&identifier, async move { task.create().await })
        .await?;
    tracing::info!("Creating task {} in job {}", identifier, id);
    Ok(Json(JobReference { id }))
}

async fn delete_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<JobReference>> {
    let cloud = cloud_from_headers(&headers, &state.settings)?;
    let identifier = parse_identifier(&id)?;

    let mut task = state
        .factory
        .task(cloud, identifier.clone(), TaskAttributes::default())?;
    let id = state
        .submit(&identifier, async move { task.delete().await })
        .await?;
    tracing::info!("Deleting task {} in job {}", identifier, id);
    Ok(Json(JobReference { id }))
}

async fn list_tasks(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<TaskList>> {
    let cloud = cloud_from_headers(&headers, &state.settings)?;
    let tasks = state.factory.list(&cloud).await?;
    Ok(Json(TaskList {
        tasks: tasks.iter().map(Identifier::long).collect(),
    }))
}

async fn task_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<TaskStatus>> {
    let cloud = cloud_from_headers(&headers, &state.settings)?;
    let identifier = parse_identifier(&id)?;

    let mut task = state
        .factory
        .task(cloud, identifier, TaskAttributes::default())?;
    let status = task.status().await?;
    Ok(Json(TaskStatus {
        active: status.get(StatusCode::Active),
        succeeded: status.get(StatusCode::Succeeded),
        failed: status.get(StatusCode::Failed),
    }))
}

async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobResponse>> {
    let id = Uuid::parse_str(&id)
        .map_err(|err| ApiError::BadRequest(format!("invalid job id {id}: {err}")))?;
    let status = state
        .jobs
        .status(id)
        .await
        .map_err(|err| ApiError::NotFound(err.to_string()))?;
    Ok(Json(JobResponse {
        id,
        status: status.state,
        error: status.error,
    }))
}
