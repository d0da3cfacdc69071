pub mod job;
pub mod stats;
pub mod task;
pub mod worker;

pub use job::{JobAccepted, JobId, JobRequest};
pub use stats::{QueueSizes, SchedulerStats, WorkerDetail, WorkerStatusLabel};
pub use task::{Task, TaskId, TaskSpec, TaskType};
pub use worker::{
    TaskAssignmentRequest, TaskAssignmentResponse, TaskCompleteRequest, TaskCompleteResponse,
    WorkerHeartbeatRequest, WorkerHeartbeatResponse, WorkerId, WorkerRegisterRequest,
    WorkerRegisterResponse,
};
