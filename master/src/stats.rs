use common::{SchedulerStats, WorkerDetail, WorkerStatusLabel};

use crate::registry::Worker;
use crate::scheduler::{SmartScheduler, ALGORITHM_LABEL};

/// Porcentaje 0-100 de `part` sobre `whole`; 0 si no hay capacidad.
fn percentage(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        part / whole * 100.0
    } else {
        0.0
    }
}

fn worker_detail(worker: &Worker) -> WorkerDetail {
    let is_healthy = worker.is_healthy();
    WorkerDetail {
        id: worker.id().to_owned(),
        name: worker.display_name().to_owned(),
        is_healthy,
        active_tasks: worker.active_tasks(),
        capacity: worker.capacity(),
        completed_tasks: worker.completed_tasks(),
        failed_tasks: worker.failed_tasks(),
        load_percentage: percentage(worker.active_tasks() as f64, worker.capacity() as f64),
        load_score: worker.load_score(),
        avg_task_time: worker.avg_task_time_ms(),
        cpu_usage: worker.cpu_usage() * 100.0,
        memory_usage: worker.memory_usage() * 100.0,
        last_heartbeat: worker.last_heartbeat_millis(),
        status: if is_healthy {
            WorkerStatusLabel::Healthy
        } else {
            WorkerStatusLabel::Unhealthy
        },
    }
}

impl SmartScheduler {
    /// Foto del estado actual. Sólo lee; no cambia nada del scheduler.
    pub fn scheduler_stats(&self) -> SchedulerStats {
        let mut workers: Vec<WorkerDetail> = self
            .registry
            .snapshot()
            .iter()
            .map(|w| worker_detail(w))
            .collect();
        workers.sort_by(|a, b| a.id.cmp(&b.id));

        let healthy_workers = workers.iter().filter(|w| w.is_healthy).count();
        let total_active_tasks: u64 = workers.iter().map(|w| u64::from(w.active_tasks)).sum();
        let total_capacity: u64 = workers.iter().map(|w| u64::from(w.capacity)).sum();

        SchedulerStats {
            healthy_workers,
            total_workers: workers.len(),
            total_active_tasks,
            total_capacity,
            in_flight_tasks: self.in_flight(),
            queue_sizes: self.queue_sizes(),
            avg_worker_load: percentage(total_active_tasks as f64, total_capacity as f64),
            workers,
            algorithm: ALGORITHM_LABEL.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::tests::{add_worker, drain, scheduler_with_sink};
    use common::{QueueSizes, Task};
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn stats_sin_workers() {
        let (scheduler, _rx) = scheduler_with_sink();
        scheduler.enqueue(Task::reduce("j1", json!(null)));

        let stats = scheduler.scheduler_stats();

        assert_eq!(stats.total_workers, 0);
        assert_eq!(stats.healthy_workers, 0);
        assert_eq!(stats.total_capacity, 0);
        assert_eq!(stats.avg_worker_load, 0.0);
        assert_eq!(stats.queue_sizes, QueueSizes { map: 0, reduce: 1 });
        assert_eq!(stats.algorithm, ALGORITHM_LABEL);
    }

    #[test]
    fn stats_agrega_carga_y_capacidad() {
        let (scheduler, _rx) = scheduler_with_sink();
        scheduler.enqueue_all((0..3).map(|i| Task::map("j1", json!(i))));
        let a = add_worker(&scheduler, "a", 2);
        a.record_heartbeat(0.5, 0.25, true);
        add_worker(&scheduler, "b", 2);
        scheduler.next_task_for_worker("b").unwrap();

        let stats = scheduler.scheduler_stats();

        assert_eq!(stats.total_workers, 2);
        assert_eq!(stats.healthy_workers, 2);
        assert_eq!(stats.total_active_tasks, 1);
        assert_eq!(stats.total_capacity, 4);
        assert_eq!(stats.in_flight_tasks, 1);
        assert!((stats.avg_worker_load - 25.0).abs() < 1e-9);
        assert_eq!(stats.queue_sizes.map, 2);

        let a = &stats.workers[0];
        assert_eq!(a.id, "a");
        assert!((a.cpu_usage - 50.0).abs() < 1e-9);
        assert!((a.memory_usage - 25.0).abs() < 1e-9);
        assert_eq!(a.status, WorkerStatusLabel::Healthy);

        let b = &stats.workers[1];
        assert_eq!(b.active_tasks, 1);
        assert!((b.load_percentage - 50.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn stats_marca_unhealthy_por_heartbeat_viejo() {
        let (scheduler, _rx) = scheduler_with_sink();
        add_worker(&scheduler, "w1", 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        let stats = scheduler.scheduler_stats();

        assert_eq!(stats.healthy_workers, 0);
        assert_eq!(stats.workers[0].status, WorkerStatusLabel::Unhealthy);
        assert!(!stats.workers[0].is_healthy);
    }

    #[test]
    fn stats_no_modifica_nada_ni_publica() {
        let (scheduler, mut rx) = scheduler_with_sink();
        scheduler.enqueue(Task::map("j1", json!(null)));
        add_worker(&scheduler, "w1", 1);
        drain(&mut rx);

        let before = scheduler.queue_sizes();
        let _ = scheduler.scheduler_stats();
        let _ = scheduler.scheduler_stats();

        assert_eq!(scheduler.queue_sizes(), before);
        assert_eq!(scheduler.in_flight(), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn stats_serializa_en_camel_case() {
        let (scheduler, _rx) = scheduler_with_sink();
        add_worker(&scheduler, "w1", 3);

        let value = serde_json::to_value(scheduler.scheduler_stats()).unwrap();

        assert_eq!(value["totalWorkers"], json!(1));
        assert_eq!(value["queueSizes"], json!({"map": 0, "reduce": 0}));
        assert_eq!(value["workers"][0]["status"], json!("HEALTHY"));
        assert!(value["workers"][0].get("loadScore").is_some());
    }
}
