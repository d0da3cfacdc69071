use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

use crate::task::{TaskId, TaskSpec};

pub type JobId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub name: String,

    /// Tareas MAP y REDUCE del job, en el orden en que se encolan
    pub tasks: Vec<TaskSpec>,
}

/// Respuesta del master al aceptar un job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAccepted {
    pub id: JobId,
    pub name: String,
    pub submitted_at: DateTime<Utc>,

    /// Ids asignados a cada tarea, mismo orden que `JobRequest::tasks`
    pub task_ids: Vec<TaskId>,
    pub map_tasks: u32,
    pub reduce_tasks: u32,
}
