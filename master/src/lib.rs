//! Master del grid MapReduce: scheduler de tareas, tolerancia a fallos y API HTTP.

pub mod assignments;
pub mod config;
pub mod error;
pub mod failover;
pub mod handlers;
pub mod queues;
pub mod registry;
pub mod scheduler;
pub mod state;
pub mod stats;
pub mod telemetry;
