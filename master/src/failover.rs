use std::sync::Arc;
use std::time::Duration;

use common::{TaskId, WorkerId};
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::assignments::Assignment;
use crate::registry::Worker;
use crate::scheduler::SmartScheduler;
use crate::telemetry::{now_millis, RecoveryReason, SchedulerEvent, TaskRecovered};

/// Una tarea que un barrido sacó de su asignación y volvió a encolar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recovery {
    pub task_id: TaskId,
    pub worker_id: WorkerId,
    pub reason: RecoveryReason,
}

/// Loop de tareas colgadas: cada `task_sweep_interval` (contado desde el fin
/// de la pasada anterior) reencola las asignaciones más viejas que `task_timeout`.
pub async fn run_task_timeout_loop(scheduler: Arc<SmartScheduler>) {
    let interval = scheduler.config().task_sweep_interval;
    loop {
        sleep(interval).await;
        scheduler.sweep_timed_out_tasks();
    }
}

/// Loop de workers muertos: saca del registro a los que no mandan heartbeat
/// y reencola todo lo que tenían asignado.
pub async fn run_dead_worker_loop(scheduler: Arc<SmartScheduler>) {
    let interval = scheduler.config().worker_sweep_interval;
    loop {
        sleep(interval).await;
        scheduler.sweep_dead_workers();
    }
}

impl SmartScheduler {
    /// Una pasada del barrido de timeouts.
    ///
    /// Cada asignación vencida se quita con compare-and-remove, así que si el
    /// worker reporta la finalización en el mismo instante gana uno solo.
    /// La tarea vuelve al final de su cola.
    pub fn sweep_timed_out_tasks(&self) -> Vec<Recovery> {
        let now = Instant::now();
        let timeout = self.config.task_timeout;
        let mut recovered = Vec::new();

        for task_id in self.assignments.expired(now, timeout) {
            // 1) sacar la asignación (si nadie se adelantó)
            let Some(assignment) = self.assignments.reclaim_if_expired(&task_id, now, timeout)
            else {
                continue;
            };
            let age = assignment.age(now);

            warn!(
                "tarea {} superó el timeout (worker: {}, {:?}), reencolando",
                task_id, assignment.worker_id, age
            );

            // 2) el worker (si sigue registrado) cuenta la tarea como fallida
            if let Some(worker) = self.registry.get(&assignment.worker_id) {
                worker.on_task_failed();
            }

            // 3) reencolar y publicar
            recovered.push(self.requeue_recovered(
                assignment,
                RecoveryReason::Timeout,
                Some(age),
            ));
        }

        if !recovered.is_empty() {
            info!("recuperadas {} tareas por timeout", recovered.len());
        }
        recovered
    }

    /// Una pasada del barrido de workers muertos.
    ///
    /// Muerto = último heartbeat más viejo que `worker_timeout` y además unhealthy.
    /// El chequeo se repite en el momento del borrado, así que un heartbeat que
    /// llega durante la pasada salva al worker.
    pub fn sweep_dead_workers(&self) -> Vec<Recovery> {
        let worker_timeout = self.config.worker_timeout;
        let mut recovered = Vec::new();

        for worker_id in self.registry.worker_ids() {
            let is_dead = |w: &Worker| w.heartbeat_age() > worker_timeout && !w.is_healthy();
            let Some(dead) = self.registry.remove_if(&worker_id, is_dead) else {
                continue;
            };

            let tasks = self.assignments.reclaim_for_worker(&worker_id);
            for assignment in tasks {
                info!(
                    "worker {} muerto, recuperando tarea {}",
                    worker_id,
                    assignment.task_id()
                );
                recovered.push(self.requeue_recovered(
                    assignment,
                    RecoveryReason::DeadWorker,
                    None,
                ));
            }

            warn!(
                "worker {} ({} en {}) eliminado: sin heartbeat hace {:?}",
                worker_id,
                dead.display_name(),
                dead.hostname(),
                dead.heartbeat_age()
            );
        }

        recovered
    }

    fn requeue_recovered(
        &self,
        assignment: Assignment,
        reason: RecoveryReason,
        age: Option<Duration>,
    ) -> Recovery {
        let Assignment {
            task, worker_id, ..
        } = assignment;
        let task_id = task.id.clone();

        self.enqueue(task);

        self.publish(SchedulerEvent::Recovered(TaskRecovered {
            task_id: task_id.clone(),
            worker_id: worker_id.clone(),
            timeout_ms: age.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            reason,
            ts: now_millis(),
        }));

        Recovery {
            task_id,
            worker_id,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::WorkerRegistry;
    use crate::scheduler::tests::{add_worker, drain, scheduler_with_sink};
    use common::Task;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn timeout_reencola_y_marca_fallo() {
        let (scheduler, mut rx) = scheduler_with_sink();
        let t1 = Task::map("J1", json!(null));
        scheduler.enqueue(t1.clone());
        let w1 = add_worker(&scheduler, "W1", 2);
        scheduler.next_task_for_worker("W1").unwrap();
        assert_eq!(w1.active_tasks(), 1);

        tokio::time::advance(Duration::from_secs(301)).await;
        drain(&mut rx);
        let recovered = scheduler.sweep_timed_out_tasks();

        assert_eq!(
            recovered,
            vec![Recovery {
                task_id: t1.id.clone(),
                worker_id: "W1".into(),
                reason: RecoveryReason::Timeout,
            }]
        );
        assert!(scheduler.assignment(&t1.id).is_none());
        assert!(scheduler.is_queued(&t1.id));
        assert_eq!(scheduler.queue_sizes().map, 1);
        assert_eq!(w1.active_tasks(), 0);
        assert_eq!(w1.failed_tasks(), 1);

        let events = drain(&mut rx);
        let recovered_event = events
            .iter()
            .find(|e| e.topic == "scheduler/task/recovered")
            .unwrap();
        assert_eq!(recovered_event.payload["reason"], json!("timeout"));
        assert_eq!(recovered_event.payload["timeoutMs"], json!(301_000));
        assert!(events.iter().any(|e| e.topic == "scheduler/task/queued"));

        // segunda pasada: nada más que recuperar
        assert!(scheduler.sweep_timed_out_tasks().is_empty());
        assert_eq!(scheduler.queue_sizes().map, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn asignaciones_recientes_no_se_tocan() {
        let (scheduler, _rx) = scheduler_with_sink();
        scheduler.enqueue(Task::reduce("J1", json!(null)));
        add_worker(&scheduler, "W1", 1);
        scheduler.next_task_for_worker("W1").unwrap();

        tokio::time::advance(Duration::from_secs(300)).await;

        assert!(scheduler.sweep_timed_out_tasks().is_empty());
        assert_eq!(scheduler.in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn completar_despues_del_timeout_se_ignora() {
        let (scheduler, _rx) = scheduler_with_sink();
        let t1 = Task::map("J1", json!(null));
        scheduler.enqueue(t1.clone());
        let w1 = add_worker(&scheduler, "W1", 1);
        scheduler.next_task_for_worker("W1").unwrap();

        tokio::time::advance(Duration::from_secs(301)).await;
        scheduler.sweep_timed_out_tasks();

        assert!(!scheduler.on_task_completed(&t1.id, "W1"));
        assert_eq!(w1.completed_tasks(), 0);
        // la tarea quedó una sola vez en la cola
        assert_eq!(scheduler.queue_sizes().map, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn worker_muerto_se_elimina_y_sus_tareas_vuelven() {
        let (scheduler, mut rx) = scheduler_with_sink();
        let tasks: Vec<Task> = (0..3).map(|i| Task::map("J1", json!(i))).collect();
        scheduler.enqueue_all(tasks.clone());
        add_worker(&scheduler, "dead", 3);
        for _ in 0..2 {
            scheduler.next_task_for_worker("dead").unwrap();
        }
        let alive = add_worker(&scheduler, "alive", 3);
        scheduler.next_task_for_worker("alive").unwrap();

        tokio::time::advance(Duration::from_secs(121)).await;
        alive.record_heartbeat(0.2, 0.2, true);
        drain(&mut rx);

        let recovered = scheduler.sweep_dead_workers();

        assert_eq!(recovered.len(), 2);
        assert!(recovered
            .iter()
            .all(|r| r.worker_id == "dead" && r.reason == RecoveryReason::DeadWorker));
        assert!(scheduler.registry().get("dead").is_none());
        assert!(scheduler.registry().get("alive").is_some());
        assert_eq!(scheduler.queue_sizes().map, 2);
        assert_eq!(scheduler.in_flight(), 1);
        for r in &recovered {
            assert!(scheduler.is_queued(&r.task_id));
        }

        let events = drain(&mut rx);
        let dead_events: Vec<_> = events
            .iter()
            .filter(|e| e.topic == "scheduler/task/recovered")
            .collect();
        assert_eq!(dead_events.len(), 2);
        assert!(dead_events.iter().all(|e| {
            e.payload["reason"] == json!("dead_worker") && e.payload.get("timeoutMs").is_none()
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn worker_viejo_pero_healthy_no_se_elimina() {
        let (scheduler, _rx) = scheduler_with_sink();
        let mut config = scheduler.config().clone();
        // ventana de salud más larga que el timeout de worker
        config.worker_health_window = Duration::from_secs(600);
        let registry = Arc::new(WorkerRegistry::new(config.worker_health_window));
        let scheduler = SmartScheduler::new(registry, config, None);
        add_worker(&scheduler, "w1", 1);

        tokio::time::advance(Duration::from_secs(200)).await;

        assert!(scheduler.sweep_dead_workers().is_empty());
        assert!(scheduler.registry().get("w1").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn worker_con_heartbeat_reciente_pero_unhealthy_sigue() {
        let (scheduler, _rx) = scheduler_with_sink();
        let w = add_worker(&scheduler, "w1", 1);
        w.record_heartbeat(0.9, 0.9, false);

        tokio::time::advance(Duration::from_secs(60)).await;

        assert!(scheduler.sweep_dead_workers().is_empty());
        assert_eq!(scheduler.registry().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_de_timeout_recupera_dentro_de_un_intervalo() {
        let (scheduler, _rx) = scheduler_with_sink();
        let scheduler = Arc::new(scheduler);
        let t1 = Task::map("J1", json!(null));
        scheduler.enqueue(t1.clone());
        add_worker(&scheduler, "W1", 1);
        scheduler.next_task_for_worker("W1").unwrap();

        let handle = tokio::spawn(run_task_timeout_loop(scheduler.clone()));

        // timeout 300s + un intervalo de 30s
        sleep(Duration::from_secs(331)).await;

        assert!(scheduler.assignment(&t1.id).is_none());
        assert!(scheduler.is_queued(&t1.id));
        assert_eq!(scheduler.queue_sizes().map, 1);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn loop_de_workers_muertos_elimina_al_worker() {
        let (scheduler, _rx) = scheduler_with_sink();
        let scheduler = Arc::new(scheduler);
        let t1 = Task::reduce("J1", json!(null));
        scheduler.enqueue(t1.clone());
        add_worker(&scheduler, "W1", 1);
        scheduler.next_task_for_worker("W1").unwrap();

        let handle = tokio::spawn(run_dead_worker_loop(scheduler.clone()));

        // primera pasada a los 120s (edad == timeout, no alcanza), segunda a los 240s
        sleep(Duration::from_secs(241)).await;

        assert!(scheduler.registry().get("W1").is_none());
        assert!(scheduler.is_queued(&t1.id));
        assert_eq!(scheduler.queue_sizes().reduce, 1);
        handle.abort();
    }
}
