use serde::{Deserialize, Serialize};

use crate::worker::WorkerId;

/// Profundidad de las dos colas del scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSizes {
    pub map: usize,
    pub reduce: usize,
}

impl QueueSizes {
    pub fn total(&self) -> usize {
        self.map + self.reduce
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatusLabel {
    Healthy,
    Unhealthy,
}

/// Detalle de un worker dentro de `SchedulerStats`.
/// Los porcentajes ya vienen en escala 0-100.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerDetail {
    pub id: WorkerId,
    pub name: String,
    pub is_healthy: bool,
    pub active_tasks: u32,
    pub capacity: u32,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub load_percentage: f64,
    pub load_score: f64,
    pub avg_task_time: f64,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    /// Epoch en milisegundos
    pub last_heartbeat: i64,
    pub status: WorkerStatusLabel,
}

/// Foto del estado del scheduler (sólo lectura).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStats {
    pub healthy_workers: usize,
    pub total_workers: usize,
    pub total_active_tasks: u64,
    pub total_capacity: u64,
    pub in_flight_tasks: usize,
    pub queue_sizes: QueueSizes,
    pub avg_worker_load: f64,
    pub workers: Vec<WorkerDetail>,
    pub algorithm: String,
}
