//! Colas FIFO separadas para tareas MAP y REDUCE.

use std::collections::VecDeque;

use common::{QueueSizes, Task, TaskType};
use parking_lot::Mutex;

/// Dos colas sin límite, una por tipo. Cada una tiene su propio lock;
/// ninguna operación bloquea más que el push/pop en sí.
#[derive(Debug, Default)]
pub struct TaskQueues {
    map: Mutex<VecDeque<Task>>,
    reduce: Mutex<VecDeque<Task>>,
}

impl TaskQueues {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue_for(&self, task_type: TaskType) -> &Mutex<VecDeque<Task>> {
        match task_type {
            TaskType::Map => &self.map,
            TaskType::Reduce => &self.reduce,
        }
    }

    /// Encola al final de la cola de su tipo y devuelve las profundidades resultantes.
    pub fn push(&self, task: Task) -> QueueSizes {
        self.queue_for(task.task_type).lock().push_back(task);
        self.sizes()
    }

    /// Devuelve a la cabeza una tarea que se sacó pero no se llegó a asignar.
    pub fn push_front(&self, task: Task) {
        self.queue_for(task.task_type).lock().push_front(task);
    }

    /// Saca la próxima tarea priorizando REDUCE sobre MAP.
    pub fn pop_preferred(&self) -> Option<Task> {
        // el lock de reduce se suelta antes de mirar map
        let reduce = self.reduce.lock().pop_front();
        reduce.or_else(|| self.map.lock().pop_front())
    }

    pub fn sizes(&self) -> QueueSizes {
        QueueSizes {
            map: self.map.lock().len(),
            reduce: self.reduce.lock().len(),
        }
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.map.lock().iter().any(|t| t.id == task_id)
            || self.reduce.lock().iter().any(|t| t.id == task_id)
    }
}
