use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use master::config::{SchedulerConfig, TelemetryMode};
use master::registry::WorkerRegistry;
use master::scheduler::SmartScheduler;
use master::state::AppState;
use master::telemetry::{LogSink, TelemetrySink};
use master::{failover, handlers};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("master=debug,tower_http=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = SchedulerConfig::from_env();
    info!("configuración: {:?}", config);

    let telemetry: Option<Arc<dyn TelemetrySink>> = match config.telemetry {
        TelemetryMode::Log => Some(Arc::new(LogSink)),
        TelemetryMode::Off => None,
    };

    let registry = Arc::new(WorkerRegistry::new(config.worker_health_window));
    let bind_addr = config.bind_addr;
    let scheduler = Arc::new(SmartScheduler::new(registry, config, telemetry));

    // router HTTP
    let app = handlers::build_router(AppState::new(scheduler.clone()));

    // barridos de tolerancia a fallos en segundo plano
    tokio::spawn(failover::run_task_timeout_loop(scheduler.clone()));
    tokio::spawn(failover::run_dead_worker_loop(scheduler.clone()));

    let listener = TcpListener::bind(bind_addr).await?;
    info!("master escuchando en {}", listener.local_addr()?);

    axum::serve(listener, app).await
}
