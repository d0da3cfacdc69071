//! Dispatch de tareas: colas por tipo, elección de worker y reportes de finalización.

use std::sync::Arc;

use common::{QueueSizes, Task, TaskType};
use tracing::{debug, info, warn};

use crate::assignments::{Assignment, AssignmentTracker};
use crate::config::SchedulerConfig;
use crate::queues::TaskQueues;
use crate::registry::{Worker, WorkerRegistry};
use crate::telemetry::{
    emit, now_millis, SchedulerEvent, TaskAssigned, TaskCompleted, TaskQueued, TelemetrySink,
};

pub const ALGORITHM_LABEL: &str =
    "Smart Scheduler (Hybrid: 50% Load + 30% Resources + 20% Performance)";

/// Scheduler con colas MAP/REDUCE separadas y asignación según carga del worker.
///
/// Todo el estado compartido es concurrente por sí mismo (DashMap, mutex por
/// cola, contadores atómicos); ninguna operación toma un lock global.
pub struct SmartScheduler {
    pub(crate) registry: Arc<WorkerRegistry>,
    pub(crate) queues: TaskQueues,
    pub(crate) assignments: AssignmentTracker,
    pub(crate) telemetry: Option<Arc<dyn TelemetrySink>>,
    pub(crate) config: SchedulerConfig,
}

impl SmartScheduler {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        config: SchedulerConfig,
        telemetry: Option<Arc<dyn TelemetrySink>>,
    ) -> Self {
        Self {
            registry,
            queues: TaskQueues::new(),
            assignments: AssignmentTracker::new(),
            telemetry,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn queue_sizes(&self) -> QueueSizes {
        self.queues.sizes()
    }

    pub fn assignment(&self, task_id: &str) -> Option<Assignment> {
        self.assignments.get(task_id)
    }

    pub fn in_flight(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_queued(&self, task_id: &str) -> bool {
        self.queues.contains(task_id)
    }

    pub(crate) fn publish(&self, event: SchedulerEvent) {
        emit(self.telemetry.as_deref(), event);
    }

    /* ---------------- encolado ---------------- */

    /// Encola al final de la cola de su tipo y publica `task/queued`.
    pub fn enqueue(&self, task: Task) {
        let task_id = task.id.clone();
        let job_id = task.job_id.clone();
        let task_type = task.task_type;

        let queue_sizes = self.queues.push(task);
        debug!(
            "tarea {} del job {} encolada como {} (map={}, reduce={})",
            task_id, job_id, task_type, queue_sizes.map, queue_sizes.reduce
        );

        self.publish(SchedulerEvent::Queued(TaskQueued {
            task_id,
            job_id,
            task_type,
            queue_sizes,
            ts: now_millis(),
        }));
    }

    /// `enqueue` de a una; si algo corta a mitad, queda encolado el prefijo.
    pub fn enqueue_all<I>(&self, tasks: I)
    where
        I: IntoIterator<Item = Task>,
    {
        for task in tasks {
            self.enqueue(task);
        }
    }

    /* ---------------- dispatch ---------------- */

    /// Mejor worker disponible: filtra los que aceptan tareas, ordena por score
    /// ascendente, se queda con los `top_candidates` primeros y elige el primero.
    pub fn select_best_worker(&self, task_type: TaskType) -> Option<Arc<Worker>> {
        let mut candidates: Vec<(f64, Arc<Worker>)> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|w| w.can_accept_task())
            .map(|w| (w.load_score(), w))
            .collect();

        candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.id().cmp(b.1.id())));
        candidates.truncate(self.config.top_candidates.max(1));

        let (score, selected) = candidates.into_iter().next()?;
        debug!(
            "mejor worker para {}: {} (score: {:.3}, carga: {}/{})",
            task_type,
            selected.id(),
            score,
            selected.active_tasks(),
            selected.capacity()
        );
        Some(selected)
    }

    /// Próxima tarea para el worker que la pide, o `None` si no le toca nada ahora.
    /// Nunca espera: el worker vuelve a preguntar más tarde.
    pub fn next_task_for_worker(&self, worker_id: &str) -> Option<Task> {
        // 1) El worker tiene que estar registrado
        let Some(requester) = self.registry.get(worker_id) else {
            warn!("worker {} pidió tarea pero no está registrado", worker_id);
            return None;
        };

        // 2) ... y poder aceptar una tarea más
        if !requester.can_accept_task() {
            debug!(
                "worker {} no puede aceptar tarea (healthy: {}, tareas: {}/{})",
                worker_id,
                requester.is_healthy(),
                requester.active_tasks(),
                requester.capacity()
            );
            return None;
        }

        // 3) REDUCE antes que MAP: terminar jobs antes que empezar trabajo nuevo
        let task = self.queues.pop_preferred()?;

        // 4) Mejor worker para esta tarea
        let Some(best) = self.select_best_worker(task.task_type) else {
            debug!("sin workers disponibles, devolviendo tarea {} a la cola", task.id);
            self.queues.push_front(task);
            return None;
        };

        // 5) Anti-starvation: si la diferencia de score es chica se la damos igual
        if best.id() != worker_id {
            let score_diff = requester.load_score() - best.load_score();
            if score_diff >= self.config.anti_starvation_threshold {
                debug!(
                    "worker {} no es óptimo (diff {:.3} vs {}), devolviendo tarea {}",
                    worker_id,
                    score_diff,
                    best.id(),
                    task.id
                );
                self.queues.push_front(task);
                return None;
            }
        }

        // 6) Reserva con chequeo: otra asignación concurrente pudo llenar el worker
        if !requester.try_reserve_slot() {
            debug!(
                "worker {} se quedó sin capacidad antes de asignar, devolviendo tarea {}",
                worker_id, task.id
            );
            self.queues.push_front(task);
            return None;
        }

        if let Some(previous) = self
            .assignments
            .insert(Assignment::new(task.clone(), worker_id))
        {
            warn!(
                "tarea {} ya estaba asignada a {}, se reemplaza la asignación",
                previous.task.id, previous.worker_id
            );
        }

        info!(
            "asignando tarea {} (job={}, tipo={}) al worker {} ({}/{} en vuelo)",
            task.id,
            task.job_id,
            task.task_type,
            worker_id,
            requester.active_tasks(),
            requester.capacity()
        );

        self.publish(SchedulerEvent::Assigned(TaskAssigned {
            task_id: task.id.clone(),
            worker_id: worker_id.to_owned(),
            worker_load: requester.active_tasks(),
            worker_capacity: requester.capacity(),
            worker_score: requester.load_score(),
            ts: now_millis(),
        }));

        Some(task)
    }

    /* ---------------- finalización ---------------- */

    /// Registra que `worker_id` terminó `task_id`.
    ///
    /// Si la tarea ya no estaba asignada a ese worker (la reclamó un barrido,
    /// o es un reporte duplicado) no hace nada y devuelve `false`.
    pub fn on_task_completed(&self, task_id: &str, worker_id: &str) -> bool {
        let Some(assignment) = self.assignments.complete(task_id, worker_id) else {
            debug!(
                "reporte de finalización ignorado: tarea {} no está asignada a {}",
                task_id, worker_id
            );
            return false;
        };

        let duration_ms = u64::try_from(
            assignment
                .age(tokio::time::Instant::now())
                .as_millis(),
        )
        .unwrap_or(u64::MAX);

        let Some(worker) = self.registry.get(worker_id) else {
            debug!(
                "tarea {} completada por worker {} que ya no está registrado",
                task_id, worker_id
            );
            return true;
        };
        worker.on_task_completed(duration_ms);

        info!(
            "tarea {} completada por {} en {} ms (media {:.1} ms)",
            task_id,
            worker_id,
            duration_ms,
            worker.avg_task_time_ms()
        );

        self.publish(SchedulerEvent::Completed(TaskCompleted {
            task_id: task_id.to_owned(),
            worker_id: worker_id.to_owned(),
            duration_ms,
            worker_avg_time: worker.avg_task_time_ms(),
            ts: now_millis(),
        }));

        true
    }
}
