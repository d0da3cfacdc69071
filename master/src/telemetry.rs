//! Eventos del scheduler y los sinks que los publican.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{info, warn};

use common::{JobId, QueueSizes, TaskId, TaskType, WorkerId};

pub const TOPIC_TASK_QUEUED: &str = "scheduler/task/queued";
pub const TOPIC_TASK_ASSIGNED: &str = "scheduler/task/assigned";
pub const TOPIC_TASK_COMPLETED: &str = "scheduler/task/completed";
pub const TOPIC_TASK_RECOVERED: &str = "scheduler/task/recovered";

/// Destino de la telemetría. Publicar nunca falla hacia el scheduler.
pub trait TelemetrySink: Send + Sync {
    fn publish(&self, topic: &str, payload: Value);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryReason {
    Timeout,
    DeadWorker,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskQueued {
    pub task_id: TaskId,
    pub job_id: JobId,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub queue_sizes: QueueSizes,
    pub ts: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAssigned {
    pub task_id: TaskId,
    pub worker_id: WorkerId,
    pub worker_load: u32,
    pub worker_capacity: u32,
    pub worker_score: f64,
    pub ts: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCompleted {
    pub task_id: TaskId,
    pub worker_id: WorkerId,
    pub duration_ms: u64,
    pub worker_avg_time: f64,
    pub ts: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecovered {
    pub task_id: TaskId,
    pub worker_id: WorkerId,
    /// Edad de la asignación; sólo en recuperaciones por timeout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    pub reason: RecoveryReason,
    pub ts: i64,
}

/// Todo lo que el scheduler publica.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    Queued(TaskQueued),
    Assigned(TaskAssigned),
    Completed(TaskCompleted),
    Recovered(TaskRecovered),
}

impl SchedulerEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            SchedulerEvent::Queued(_) => TOPIC_TASK_QUEUED,
            SchedulerEvent::Assigned(_) => TOPIC_TASK_ASSIGNED,
            SchedulerEvent::Completed(_) => TOPIC_TASK_COMPLETED,
            SchedulerEvent::Recovered(_) => TOPIC_TASK_RECOVERED,
        }
    }

    pub fn payload(&self) -> serde_json::Result<Value> {
        match self {
            SchedulerEvent::Queued(e) => serde_json::to_value(e),
            SchedulerEvent::Assigned(e) => serde_json::to_value(e),
            SchedulerEvent::Completed(e) => serde_json::to_value(e),
            SchedulerEvent::Recovered(e) => serde_json::to_value(e),
        }
    }
}

/// Publica el evento si hay sink; sin sink no hace nada.
pub fn emit(sink: Option<&dyn TelemetrySink>, event: SchedulerEvent) {
    let Some(sink) = sink else {
        return;
    };
    match event.payload() {
        Ok(payload) => sink.publish(event.topic(), payload),
        Err(e) => warn!("no se pudo serializar evento {}: {:?}", event.topic(), e),
    }
}

/// Epoch millis para el campo `ts`.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Sink que vuelca cada evento al log.
#[derive(Debug, Default)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn publish(&self, topic: &str, payload: Value) {
        info!(target: "telemetry", topic = topic, "{}", payload);
    }
}

/// Un evento ya publicado, tal como lo ve un suscriptor.
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub topic: String,
    pub payload: Value,
}

/// Sink sobre un canal broadcast de tokio; los suscriptores lentos pierden eventos.
#[derive(Debug)]
pub struct BroadcastSink {
    sender: broadcast::Sender<PublishedEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }
}

impl TelemetrySink for BroadcastSink {
    fn publish(&self, topic: &str, payload: Value) {
        // sin suscriptores send devuelve error; no es un problema
        let _ = self.sender.send(PublishedEvent {
            topic: topic.to_owned(),
            payload,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn queued_usa_camel_case_y_campo_type() {
        let event = SchedulerEvent::Queued(TaskQueued {
            task_id: "t1".into(),
            job_id: "j1".into(),
            task_type: TaskType::Reduce,
            queue_sizes: QueueSizes { map: 2, reduce: 1 },
            ts: 42,
        });

        assert_eq!(event.topic(), "scheduler/task/queued");
        assert_eq!(
            event.payload().unwrap(),
            json!({
                "taskId": "t1",
                "jobId": "j1",
                "type": "REDUCE",
                "queueSizes": {"map": 2, "reduce": 1},
                "ts": 42
            })
        );
    }

    #[test]
    fn recovered_por_worker_muerto_omite_timeout() {
        let event = SchedulerEvent::Recovered(TaskRecovered {
            task_id: "t1".into(),
            worker_id: "w1".into(),
            timeout_ms: None,
            reason: RecoveryReason::DeadWorker,
            ts: 7,
        });

        let payload = event.payload().unwrap();
        assert_eq!(payload["reason"], json!("dead_worker"));
        assert!(payload.get("timeoutMs").is_none());
    }

    #[test]
    fn emit_sin_sink_no_hace_nada() {
        emit(
            None,
            SchedulerEvent::Completed(TaskCompleted {
                task_id: "t1".into(),
                worker_id: "w1".into(),
                duration_ms: 10,
                worker_avg_time: 10.0,
                ts: 1,
            }),
        );
    }

    #[test]
    fn broadcast_sink_entrega_a_suscriptores() {
        let sink = BroadcastSink::new(16);
        let mut rx = sink.subscribe();

        emit(
            Some(&sink as &dyn TelemetrySink),
            SchedulerEvent::Assigned(TaskAssigned {
                task_id: "t1".into(),
                worker_id: "w1".into(),
                worker_load: 1,
                worker_capacity: 2,
                worker_score: 0.25,
                ts: 3,
            }),
        );

        let got = rx.try_recv().unwrap();
        assert_eq!(got.topic, TOPIC_TASK_ASSIGNED);
        assert_eq!(got.payload["workerCapacity"], json!(2));
    }
}
