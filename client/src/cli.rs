use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use common::{JobAccepted, JobRequest, SchedulerStats, TaskSpec, TaskType, WorkerDetail};
use reqwest::Client;
use serde_json::json;
use std::env;

/// Igual que en el worker:
/// - En Docker: MASTER_URL=http://master:8080
/// - Local: default http://localhost:8080
fn master_base_url() -> String {
    env::var("MASTER_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
}

#[derive(Parser, Debug)]
#[command(name = "client")]
#[command(about = "CLI simple para hablar con el master")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Envía un job nuevo con N tareas MAP y M tareas REDUCE
    Submit {
        #[arg(value_name = "NOMBRE")]
        name: String,

        /// Cantidad de tareas MAP
        #[arg(long, default_value_t = 4)]
        maps: u32,

        /// Cantidad de tareas REDUCE
        #[arg(long, default_value_t = 1)]
        reduces: u32,

        /// Duración simulada de cada tarea en ms (si no, la del worker)
        #[arg(long, value_name = "MS")]
        task_ms: Option<u64>,
    },

    /// Estado del scheduler: colas, carga y workers
    Stats,

    /// Lista los workers registrados
    Workers,
}

/// Arma el job: primero los MAP y después los REDUCE, cada uno con su índice.
fn build_job_request(name: String, maps: u32, reduces: u32, task_ms: Option<u64>) -> JobRequest {
    let spec = |task_type: TaskType, index: u32| {
        let mut payload = json!({ "index": index });
        if let Some(ms) = task_ms {
            payload["duration_ms"] = json!(ms);
        }
        TaskSpec { task_type, payload }
    };

    let tasks = (0..maps)
        .map(|i| spec(TaskType::Map, i))
        .chain((0..reduces).map(|i| spec(TaskType::Reduce, i)))
        .collect();

    JobRequest { name, tasks }
}

fn print_worker(w: &WorkerDetail) {
    println!("Worker {} ({})", w.id, w.name);
    println!("  estado         : {:?}", w.status);
    println!(
        "  carga          : {}/{} ({:.1}%)",
        w.active_tasks, w.capacity, w.load_percentage
    );
    println!("  score          : {:.3}", w.load_score);
    println!(
        "  tareas         : ok={}, fallidas={}",
        w.completed_tasks, w.failed_tasks
    );
    println!("  avg_task_ms    : {:.1}", w.avg_task_time);
    println!("  cpu / mem      : {:.1}% / {:.1}%", w.cpu_usage, w.memory_usage);
    println!("  last_heartbeat : {}", w.last_heartbeat);
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let base_url = master_base_url();

    match cli.command {
        Commands::Submit {
            name,
            maps,
            reduces,
            task_ms,
        } => {
            if maps == 0 && reduces == 0 {
                bail!("el job necesita al menos una tarea (--maps o --reduces)");
            }

            let url = format!("{}/api/v1/jobs", base_url);
            let req = build_job_request(name, maps, reduces, task_ms);
            let resp = client.post(&url).json(&req).send().await?;

            if !resp.status().is_success() {
                bail!("el master rechazó el job (status {})", resp.status());
            }
            let job: JobAccepted = resp.json().await?;

            println!("Job creado:");
            println!("  id: {}", job.id);
            println!("  nombre: {}", job.name);
            println!("  tareas: map={}, reduce={}", job.map_tasks, job.reduce_tasks);
            println!("  submitted_at: {}", job.submitted_at);
        }

        Commands::Stats => {
            let url = format!("{}/api/v1/scheduler/stats", base_url);
            let resp = client.get(&url).send().await?;
            if !resp.status().is_success() {
                bail!("error consultando stats (status {})", resp.status());
            }
            let stats: SchedulerStats = resp.json().await?;

            println!("{}", stats.algorithm);
            println!(
                "  workers        : {} sanos de {}",
                stats.healthy_workers, stats.total_workers
            );
            println!(
                "  carga          : {}/{} ({:.1}%)",
                stats.total_active_tasks, stats.total_capacity, stats.avg_worker_load
            );
            println!("  en vuelo       : {}", stats.in_flight_tasks);
            println!(
                "  colas          : map={}, reduce={}",
                stats.queue_sizes.map, stats.queue_sizes.reduce
            );
            println!();
            for w in &stats.workers {
                print_worker(w);
                println!();
            }
        }

        Commands::Workers => {
            let url = format!("{}/api/v1/workers", base_url);
            let resp = client.get(&url).send().await?;
            if resp.status().is_success() {
                let workers: Vec<WorkerDetail> = resp.json().await?;
                if workers.is_empty() {
                    println!("No hay workers registrados.");
                } else {
                    for w in &workers {
                        print_worker(w);
                        println!();
                    }
                }
            } else {
                println!(
                    "Error consultando /api/v1/workers (status {})",
                    resp.status()
                );
            }
        }
    }

    Ok(())
}
