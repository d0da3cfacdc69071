use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use common::{
    JobAccepted, JobRequest, SchedulerStats, Task, TaskAssignmentRequest,
    TaskAssignmentResponse, TaskCompleteRequest, TaskCompleteResponse, TaskType,
    WorkerDetail, WorkerHeartbeatRequest, WorkerHeartbeatResponse, WorkerRegisterRequest,
    WorkerRegisterResponse,
};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::{Result, SchedulerError};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/jobs", post(create_job))
        .route("/api/v1/workers", get(list_workers))
        .route("/api/v1/workers/register", post(register_worker))
        .route("/api/v1/workers/heartbeat", post(worker_heartbeat))
        .route("/api/v1/tasks/next", post(assign_task))
        .route("/api/v1/tasks/complete", post(complete_task))
        .route("/api/v1/scheduler/stats", get(scheduler_stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

// Crea un job: una tarea (con id nuevo) por cada spec, en el mismo orden
async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<JobRequest>,
) -> Result<Json<JobAccepted>> {
    if req.tasks.is_empty() {
        return Err(SchedulerError::InvalidRequest(
            "el job no tiene tareas".to_string(),
        ));
    }

    let job_id = uuid::Uuid::new_v4().to_string();
    let tasks: Vec<Task> = req
        .tasks
        .into_iter()
        .map(|spec| Task::new(job_id.clone(), spec.task_type, spec.payload))
        .collect();

    let count = |t: TaskType| tasks.iter().filter(|task| task.task_type == t).count() as u32;
    let accepted = JobAccepted {
        id: job_id.clone(),
        name: req.name,
        submitted_at: Utc::now(),
        task_ids: tasks.iter().map(|t| t.id.clone()).collect(),
        map_tasks: count(TaskType::Map),
        reduce_tasks: count(TaskType::Reduce),
    };

    info!(
        "job {} ({}) aceptado: {} map, {} reduce",
        job_id, accepted.name, accepted.map_tasks, accepted.reduce_tasks
    );
    state.scheduler.enqueue_all(tasks);

    Ok(Json(accepted))
}

// Registra un worker nuevo
async fn register_worker(
    State(state): State<AppState>,
    Json(req): Json<WorkerRegisterRequest>,
) -> Result<Json<WorkerRegisterResponse>> {
    if req.max_concurrency == 0 {
        return Err(SchedulerError::InvalidRequest(
            "max_concurrency tiene que ser mayor a 0".to_string(),
        ));
    }

    let worker_id = uuid::Uuid::new_v4().to_string();
    state.scheduler.registry().register(
        worker_id.clone(),
        req.hostname.clone(),
        req.name,
        req.max_concurrency,
    )?;

    info!(
        "worker registrado: {} en {} (max_concurrency={})",
        worker_id, req.hostname, req.max_concurrency
    );
    Ok(Json(WorkerRegisterResponse { worker_id }))
}

// Heartbeat de worker; 404 si el master no lo conoce (o ya lo eliminó)
async fn worker_heartbeat(
    State(state): State<AppState>,
    Json(req): Json<WorkerHeartbeatRequest>,
) -> Result<Json<WorkerHeartbeatResponse>> {
    state.scheduler.registry().heartbeat(
        &req.worker_id,
        req.cpu_usage,
        req.memory_usage,
        req.healthy,
    )?;
    Ok(Json(WorkerHeartbeatResponse { ok: true }))
}

// Próxima tarea para el worker (si le toca alguna)
async fn assign_task(
    State(state): State<AppState>,
    Json(req): Json<TaskAssignmentRequest>,
) -> Json<TaskAssignmentResponse> {
    let task = state.scheduler.next_task_for_worker(&req.worker_id);
    Json(TaskAssignmentResponse { task })
}

// Worker reporta que terminó una tarea; un reporte viejo responde ok=false
async fn complete_task(
    State(state): State<AppState>,
    Json(req): Json<TaskCompleteRequest>,
) -> Json<TaskCompleteResponse> {
    let ok = state
        .scheduler
        .on_task_completed(&req.task_id, &req.worker_id);
    Json(TaskCompleteResponse { ok })
}

async fn list_workers(State(state): State<AppState>) -> Json<Vec<WorkerDetail>> {
    Json(state.scheduler.scheduler_stats().workers)
}

async fn scheduler_stats(State(state): State<AppState>) -> Json<SchedulerStats> {
    Json(state.scheduler.scheduler_stats())
}
