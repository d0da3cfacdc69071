use anyhow::{Context, Result};
use common::{
    Task, TaskAssignmentRequest, TaskAssignmentResponse, TaskCompleteRequest,
    TaskCompleteResponse, WorkerHeartbeatRequest, WorkerId, WorkerRegisterRequest,
    WorkerRegisterResponse,
};
use reqwest::{Client, StatusCode};
use std::{env, sync::Arc, time::Duration};
use sysinfo::{CpuExt, System, SystemExt};
use tokio::sync::{RwLock, Semaphore};
use tokio::time::sleep;
use tracing::{debug, info, warn};

const DEFAULT_MASTER_BASE_URL: &str = "http://master:8080";
const DEFAULT_WORKER_CONCURRENCY: u32 = 2;
const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 10;
const DEFAULT_SIMULATED_TASK_MS: u64 = 2_000;
const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Configuración del worker, leída del entorno.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub base_url: String,
    pub concurrency: u32,
    pub name: Option<String>,
    pub heartbeat_interval: Duration,
    pub simulated_task: Duration,
}

impl WorkerSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let number = |key: &str, default: u64| {
            lookup(key)
                .and_then(|s| s.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };

        Self {
            base_url: lookup("MASTER_BASE_URL")
                .unwrap_or_else(|| DEFAULT_MASTER_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            concurrency: lookup("WORKER_CONCURRENCY")
                .and_then(|s| s.trim().parse::<u32>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_WORKER_CONCURRENCY),
            name: lookup("WORKER_NAME").filter(|s| !s.trim().is_empty()),
            heartbeat_interval: Duration::from_secs(
                number("HEARTBEAT_INTERVAL_SECS", DEFAULT_HEARTBEAT_INTERVAL_SECS).max(1),
            ),
            simulated_task: Duration::from_millis(number(
                "SIMULATED_TASK_MS",
                DEFAULT_SIMULATED_TASK_MS,
            )),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// CPU y memoria como fracción 0.0-1.0, como las espera el master.
fn usage_fractions(cpu_percent: f32, used_memory: u64, total_memory: u64) -> (f64, f64) {
    let cpu = (f64::from(cpu_percent) / 100.0).clamp(0.0, 1.0);
    let mem = if total_memory == 0 {
        0.0
    } else {
        (used_memory as f64 / total_memory as f64).clamp(0.0, 1.0)
    };
    (cpu, mem)
}

/// Cuánto "trabaja" una tarea simulada: `duration_ms` del payload si viene,
/// si no el default del worker.
fn simulated_duration(task: &Task, default: Duration) -> Duration {
    task.payload
        .get("duration_ms")
        .and_then(|v| v.as_u64())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

async fn register(client: &Client, settings: &WorkerSettings) -> Result<WorkerId> {
    let hostname = hostname::get()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();

    let res = client
        .post(settings.url("/api/v1/workers/register"))
        .json(&WorkerRegisterRequest {
            hostname,
            name: settings.name.clone(),
            max_concurrency: settings.concurrency,
        })
        .send()
        .await
        .context("no se pudo contactar al master para registrarse")?
        .error_for_status()?;

    let WorkerRegisterResponse { worker_id } = res.json().await?;
    Ok(worker_id)
}

/// Heartbeats periódicos con CPU/MEM. Si el master ya no conoce al worker
/// (404: lo eliminó por muerto) se registra de nuevo y sigue con el id nuevo.
async fn heartbeat_loop(
    client: Client,
    settings: Arc<WorkerSettings>,
    worker_id: Arc<RwLock<WorkerId>>,
) {
    let mut sys = System::new_all();

    loop {
        sleep(settings.heartbeat_interval).await;

        sys.refresh_cpu();
        sys.refresh_memory();
        let (cpu_usage, memory_usage) = usage_fractions(
            sys.global_cpu_info().cpu_usage(),
            sys.used_memory(),
            sys.total_memory(),
        );

        let current_id = worker_id.read().await.clone();
        let res = client
            .post(settings.url("/api/v1/workers/heartbeat"))
            .json(&WorkerHeartbeatRequest {
                worker_id: current_id.clone(),
                cpu_usage,
                memory_usage,
                healthy: true,
            })
            .send()
            .await;

        match res {
            Ok(resp) if resp.status() == StatusCode::NOT_FOUND => {
                warn!("el master no conoce al worker {}, re-registrando", current_id);
                match register(&client, &settings).await {
                    Ok(new_id) => {
                        info!("worker re-registrado: {} -> {}", current_id, new_id);
                        *worker_id.write().await = new_id;
                    }
                    Err(e) => warn!("falló el re-registro: {:?}", e),
                }
            }
            Ok(resp) if !resp.status().is_success() => {
                warn!("heartbeat rechazado con status {}", resp.status());
            }
            Ok(_) => debug!(
                "heartbeat enviado (cpu={:.2}, mem={:.2})",
                cpu_usage, memory_usage
            ),
            Err(e) => warn!("error enviando heartbeat: {:?}", e),
        }
    }
}

async fn execute_and_report(
    client: Client,
    settings: Arc<WorkerSettings>,
    worker_id: WorkerId,
    task: Task,
) {
    let duration = simulated_duration(&task, settings.simulated_task);
    debug!("simulando tarea {} por {:?}", task.id, duration);
    sleep(duration).await;

    let res = client
        .post(settings.url("/api/v1/tasks/complete"))
        .json(&TaskCompleteRequest {
            task_id: task.id.clone(),
            worker_id,
        })
        .send()
        .await;

    match res {
        Ok(resp) => match resp.json::<TaskCompleteResponse>().await {
            Ok(TaskCompleteResponse { ok: true }) => {
                info!("terminé tarea {} ({}) del job {}", task.id, task.task_type, task.job_id)
            }
            Ok(TaskCompleteResponse { ok: false }) => warn!(
                "el master ignoró la finalización de {} (ya se había reasignado)",
                task.id
            ),
            Err(e) => warn!("respuesta inválida al completar {}: {:?}", task.id, e),
        },
        Err(e) => warn!("error reportando tarea {}: {:?}", task.id, e),
    }
}

/// Loop principal del worker.
/// - Se registra en el master.
/// - Hace heartbeats periódicos en una tarea aparte.
/// - Pide tareas mientras tenga "slots" libres.
/// - Ejecuta cada tarea en paralelo (hasta WORKER_CONCURRENCY).
pub async fn run() -> Result<()> {
    let settings = Arc::new(WorkerSettings::from_env());
    let client = Client::new();

    let first_id = register(&client, &settings).await?;
    info!(
        "worker {} registrado con concurrency={} contra {}",
        first_id, settings.concurrency, settings.base_url
    );
    let worker_id = Arc::new(RwLock::new(first_id));

    tokio::spawn(heartbeat_loop(
        client.clone(),
        settings.clone(),
        worker_id.clone(),
    ));

    let sem = Arc::new(Semaphore::new(settings.concurrency as usize));

    loop {
        // Control de concurrencia local: esperar un slot libre
        let permit = sem.clone().acquire_owned().await?;
        let current_id = worker_id.read().await.clone();

        let res = client
            .post(settings.url("/api/v1/tasks/next"))
            .json(&TaskAssignmentRequest {
                worker_id: current_id.clone(),
            })
            .send()
            .await;

        let assignment = match res {
            Ok(resp) => resp.json::<TaskAssignmentResponse>().await,
            Err(e) => Err(e),
        };

        match assignment {
            Ok(TaskAssignmentResponse { task: Some(task) }) => {
                info!(
                    "tengo tarea {} ({}) del job {}",
                    task.id, task.task_type, task.job_id
                );
                let client = client.clone();
                let settings = settings.clone();
                tokio::spawn(async move {
                    execute_and_report(client, settings, current_id, task).await;
                    // liberar el slot al terminar
                    drop(permit);
                });
            }
            Ok(TaskAssignmentResponse { task: None }) => {
                drop(permit);
                debug!("worker {} pidió tarea pero no hay", current_id);
                sleep(IDLE_POLL_INTERVAL).await;
            }
            Err(e) => {
                drop(permit);
                warn!("error pidiendo tarea al master: {:?}", e);
                sleep(IDLE_POLL_INTERVAL).await;
            }
        }
    }
}
