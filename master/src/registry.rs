//! Registro de workers y su interfaz de capacidad (salud, carga, score).

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::WorkerId;
use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::{Result, SchedulerError};

/// Pesos del score compuesto (menor = mejor).
pub const LOAD_WEIGHT: f64 = 0.5;
pub const RESOURCE_WEIGHT: f64 = 0.3;
pub const PERFORMANCE_WEIGHT: f64 = 0.2;

/// Duración media con la que el componente de performance vale 0.5.
pub const PERFORMANCE_REFERENCE_MS: f64 = 10_000.0;

/// Métricas que cambian juntas en cada heartbeat o finalización.
#[derive(Debug, Clone)]
struct WorkerMetrics {
    avg_task_time_ms: f64,
    cpu_usage: f64,
    memory_usage: f64,
    reported_healthy: bool,
    last_heartbeat: Instant,
    last_heartbeat_at: DateTime<Utc>,
}

/// Estado de un worker registrado.
///
/// Los contadores de carga son atómicos y sólo se tocan a través de los hooks
/// `on_task_*`; el resto de métricas va bajo un mutex corto.
#[derive(Debug)]
pub struct Worker {
    id: WorkerId,
    name: Option<String>,
    hostname: String,
    capacity: u32,
    health_window: Duration,

    active_tasks: AtomicU32,
    completed_tasks: AtomicU64,
    failed_tasks: AtomicU64,

    metrics: Mutex<WorkerMetrics>,
}

impl Worker {
    pub fn new(id: impl Into<WorkerId>, capacity: u32, health_window: Duration) -> Self {
        Self {
            id: id.into(),
            name: None,
            hostname: String::new(),
            capacity,
            health_window,
            active_tasks: AtomicU32::new(0),
            completed_tasks: AtomicU64::new(0),
            failed_tasks: AtomicU64::new(0),
            metrics: Mutex::new(WorkerMetrics {
                avg_task_time_ms: 0.0,
                cpu_usage: 0.0,
                memory_usage: 0.0,
                reported_healthy: true,
                last_heartbeat: Instant::now(),
                last_heartbeat_at: Utc::now(),
            }),
        }
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Nombre para mostrar; si no hay, el id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn active_tasks(&self) -> u32 {
        self.active_tasks.load(Ordering::Acquire)
    }

    pub fn completed_tasks(&self) -> u64 {
        self.completed_tasks.load(Ordering::Acquire)
    }

    pub fn failed_tasks(&self) -> u64 {
        self.failed_tasks.load(Ordering::Acquire)
    }

    pub fn avg_task_time_ms(&self) -> f64 {
        self.metrics.lock().avg_task_time_ms
    }

    pub fn cpu_usage(&self) -> f64 {
        self.metrics.lock().cpu_usage
    }

    pub fn memory_usage(&self) -> f64 {
        self.metrics.lock().memory_usage
    }

    /// Último heartbeat en epoch millis.
    pub fn last_heartbeat_millis(&self) -> i64 {
        self.metrics.lock().last_heartbeat_at.timestamp_millis()
    }

    pub fn heartbeat_age(&self) -> Duration {
        let last = self.metrics.lock().last_heartbeat;
        Instant::now().saturating_duration_since(last)
    }

    /// Healthy = el worker se reporta sano y su último heartbeat entra en la ventana.
    pub fn is_healthy(&self) -> bool {
        let metrics = self.metrics.lock();
        metrics.reported_healthy
            && Instant::now().saturating_duration_since(metrics.last_heartbeat)
                <= self.health_window
    }

    pub fn can_accept_task(&self) -> bool {
        self.is_healthy() && self.active_tasks() < self.capacity
    }

    /// Score compuesto: 50% carga + 30% recursos + 20% performance histórica.
    /// Menor es mejor; no decrece al subir `active_tasks`.
    pub fn load_score(&self) -> f64 {
        let load = if self.capacity == 0 {
            1.0
        } else {
            f64::from(self.active_tasks()) / f64::from(self.capacity)
        };

        let (resource, performance) = {
            let m = self.metrics.lock();
            let resource = ((m.cpu_usage + m.memory_usage) / 2.0).clamp(0.0, 1.0);
            let avg = m.avg_task_time_ms.max(0.0);
            (resource, avg / (avg + PERFORMANCE_REFERENCE_MS))
        };

        LOAD_WEIGHT * load + RESOURCE_WEIGHT * resource + PERFORMANCE_WEIGHT * performance
    }

    pub fn on_task_assigned(&self) {
        self.active_tasks.fetch_add(1, Ordering::AcqRel);
    }

    /// Versión con chequeo de `on_task_assigned`: sólo incrementa si el worker
    /// está sano y sigue habiendo hueco. Cierra la carrera entre elegir y asignar.
    pub fn try_reserve_slot(&self) -> bool {
        if !self.is_healthy() {
            return false;
        }
        let capacity = self.capacity;
        self.active_tasks
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < capacity).then_some(n + 1)
            })
            .is_ok()
    }

    pub fn on_task_completed(&self, duration_ms: u64) {
        self.release_slot();

        let mut metrics = self.metrics.lock();
        let n = self.completed_tasks.fetch_add(1, Ordering::AcqRel) + 1;
        // media acumulada
        metrics.avg_task_time_ms += (duration_ms as f64 - metrics.avg_task_time_ms) / n as f64;
    }

    pub fn on_task_failed(&self) {
        self.release_slot();
        self.failed_tasks.fetch_add(1, Ordering::AcqRel);
    }

    pub fn record_heartbeat(&self, cpu_usage: f64, memory_usage: f64, healthy: bool) {
        let mut metrics = self.metrics.lock();
        metrics.cpu_usage = cpu_usage.clamp(0.0, 1.0);
        metrics.memory_usage = memory_usage.clamp(0.0, 1.0);
        metrics.reported_healthy = healthy;
        metrics.last_heartbeat = Instant::now();
        metrics.last_heartbeat_at = Utc::now();
    }

    fn release_slot(&self) {
        let _ = self
            .active_tasks
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(1))
            });
    }
}

/// Registro concurrente de workers.
/// El scheduler lo lee y muta entradas; altas y heartbeats llegan por HTTP.
#[derive(Debug)]
pub struct WorkerRegistry {
    workers: DashMap<WorkerId, Arc<Worker>>,
    health_window: Duration,
}

impl WorkerRegistry {
    pub fn new(health_window: Duration) -> Self {
        Self {
            workers: DashMap::new(),
            health_window,
        }
    }

    /// Crea y registra un worker nuevo con la ventana de salud del registro.
    pub fn register(
        &self,
        id: impl Into<WorkerId>,
        hostname: impl Into<String>,
        name: Option<String>,
        capacity: u32,
    ) -> Result<Arc<Worker>> {
        let worker = Worker::new(id, capacity, self.health_window)
            .with_hostname(hostname)
            .with_name(name);
        self.insert(worker)
    }

    pub fn insert(&self, worker: Worker) -> Result<Arc<Worker>> {
        match self.workers.entry(worker.id.clone()) {
            Entry::Occupied(e) => Err(SchedulerError::WorkerAlreadyRegistered(e.key().clone())),
            Entry::Vacant(e) => {
                let worker = Arc::new(worker);
                e.insert(worker.clone());
                Ok(worker)
            }
        }
    }

    pub fn heartbeat(
        &self,
        worker_id: &str,
        cpu_usage: f64,
        memory_usage: f64,
        healthy: bool,
    ) -> Result<()> {
        let worker = self
            .get(worker_id)
            .ok_or_else(|| SchedulerError::WorkerNotFound(worker_id.to_owned()))?;
        worker.record_heartbeat(cpu_usage, memory_usage, healthy);
        Ok(())
    }

    pub fn get(&self, worker_id: &str) -> Option<Arc<Worker>> {
        self.workers.get(worker_id).map(|r| r.value().clone())
    }

    /// Saca al worker sólo si el predicado se cumple en el momento del borrado.
    pub fn remove_if<F>(&self, worker_id: &str, pred: F) -> Option<Arc<Worker>>
    where
        F: FnOnce(&Worker) -> bool,
    {
        self.workers
            .remove_if(worker_id, |_, w| pred(w.as_ref()))
            .map(|(_, w)| w)
    }

    /// Copia de los handles actuales (no bloquea el mapa mientras se usan).
    pub fn snapshot(&self) -> Vec<Arc<Worker>> {
        self.workers.iter().map(|r| r.value().clone()).collect()
    }

    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.workers.iter().map(|r| r.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
