//! Tareas asignadas a un worker y todavía no completadas.

use std::time::Duration;

use common::{Task, TaskId, WorkerId};
use dashmap::DashMap;
use tokio::time::Instant;

/// Vínculo vivo entre una tarea y el worker que la recibió.
/// `assigned_at` sirve tanto para medir la duración como para detectar timeouts.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub task: Task,
    pub worker_id: WorkerId,
    pub assigned_at: Instant,
    /// Epoch millis del momento de asignación
    pub assigned_at_ms: i64,
}

impl Assignment {
    pub fn new(task: Task, worker_id: impl Into<WorkerId>) -> Self {
        Self {
            task,
            worker_id: worker_id.into(),
            assigned_at: Instant::now(),
            assigned_at_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task.id
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.assigned_at)
    }

    pub fn is_timed_out(&self, now: Instant, timeout: Duration) -> bool {
        self.age(now) > timeout
    }
}

/// Mapa concurrente task_id -> asignación.
///
/// Toda baja pasa por un compare-and-remove: de completar, timeout y worker
/// muerto, sólo uno se queda con la asignación y los demás ven que ya no está.
#[derive(Debug, Default)]
pub struct AssignmentTracker {
    assignments: DashMap<TaskId, Assignment>,
}

impl AssignmentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra la asignación. Si ya había una para ese id, la devuelve.
    pub fn insert(&self, assignment: Assignment) -> Option<Assignment> {
        self.assignments
            .insert(assignment.task.id.clone(), assignment)
    }

    pub fn get(&self, task_id: &str) -> Option<Assignment> {
        self.assignments.get(task_id).map(|r| r.value().clone())
    }

    /// Baja por finalización: sólo si la tarea sigue asignada a `worker_id`.
    pub fn complete(&self, task_id: &str, worker_id: &str) -> Option<Assignment> {
        self.assignments
            .remove_if(task_id, |_, a| a.worker_id == worker_id)
            .map(|(_, a)| a)
    }

    /// Ids cuyas asignaciones superan `timeout` en `now`.
    pub fn expired(&self, now: Instant, timeout: Duration) -> Vec<TaskId> {
        self.assignments
            .iter()
            .filter(|r| r.value().is_timed_out(now, timeout))
            .map(|r| r.key().clone())
            .collect()
    }

    /// Baja por timeout: vuelve a chequear la edad en el momento del borrado.
    pub fn reclaim_if_expired(
        &self,
        task_id: &str,
        now: Instant,
        timeout: Duration,
    ) -> Option<Assignment> {
        self.assignments
            .remove_if(task_id, |_, a| a.is_timed_out(now, timeout))
            .map(|(_, a)| a)
    }

    /// Baja de todas las asignaciones de un worker.
    pub fn reclaim_for_worker(&self, worker_id: &str) -> Vec<Assignment> {
        let task_ids: Vec<TaskId> = self
            .assignments
            .iter()
            .filter(|r| r.value().worker_id == worker_id)
            .map(|r| r.key().clone())
            .collect();

        task_ids
            .iter()
            .filter_map(|id| {
                self.assignments
                    .remove_if(id, |_, a| a.worker_id == worker_id)
                    .map(|(_, a)| a)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}
