use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::job::JobId;

pub type TaskId = String;

/// Tipo de tarea dentro de un job MapReduce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Map,
    Reduce,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Map => "MAP",
            TaskType::Reduce => "REDUCE",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unidad de trabajo que el master reparte a los workers.
/// Una vez creada no cambia: el scheduler sólo la mueve entre colas y asignaciones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub job_id: JobId,
    pub task_type: TaskType,

    /// Payload opaco para el scheduler (lo interpreta el worker)
    #[serde(default)]
    pub payload: Value,
}

impl Task {
    /// Crea una tarea con id nuevo (uuid v4).
    pub fn new(job_id: impl Into<JobId>, task_type: TaskType, payload: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_id: job_id.into(),
            task_type,
            payload,
        }
    }

    pub fn map(job_id: impl Into<JobId>, payload: Value) -> Self {
        Self::new(job_id, TaskType::Map, payload)
    }

    pub fn reduce(job_id: impl Into<JobId>, payload: Value) -> Self {
        Self::new(job_id, TaskType::Reduce, payload)
    }
}

/// Descripción de una tarea dentro de un `JobRequest` (el master le pone el id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub task_type: TaskType,
    #[serde(default)]
    pub payload: Value,
}
