use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_TASK_SWEEP_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_WORKER_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_WORKER_SWEEP_INTERVAL_SECS: u64 = 120;
pub const DEFAULT_WORKER_HEALTH_WINDOW_SECS: u64 = 30;
pub const DEFAULT_ANTI_STARVATION_THRESHOLD: f64 = 0.2;
pub const DEFAULT_TOP_CANDIDATES: usize = 3;

/// Adónde van los eventos de telemetría del scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryMode {
    /// Publica cada evento como línea de log (`tracing`)
    Log,
    /// Sin telemetría
    Off,
}

impl FromStr for TelemetryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "log" => Ok(TelemetryMode::Log),
            "off" | "none" => Ok(TelemetryMode::Off),
            other => Err(format!("modo de telemetría desconocido: {other}")),
        }
    }
}

/// Configuración del master. Se arma desde variables de entorno.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub bind_addr: SocketAddr,

    /// Edad máxima de una asignación antes de reencolar la tarea
    pub task_timeout: Duration,
    /// Cada cuánto corre el barrido de tareas colgadas
    pub task_sweep_interval: Duration,

    /// Tiempo sin heartbeat para considerar muerto a un worker (si además está unhealthy)
    pub worker_timeout: Duration,
    /// Cada cuánto corre el barrido de workers muertos
    pub worker_sweep_interval: Duration,
    /// Ventana en la que un heartbeat mantiene al worker healthy
    pub worker_health_window: Duration,

    /// Diferencia de score bajo la cual el solicitante recibe la tarea igual
    pub anti_starvation_threshold: f64,
    /// Cuántos candidatos se consideran al elegir el mejor worker
    pub top_candidates: usize,

    pub telemetry: TelemetryMode,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            task_timeout: Duration::from_secs(DEFAULT_TASK_TIMEOUT_SECS),
            task_sweep_interval: Duration::from_secs(DEFAULT_TASK_SWEEP_INTERVAL_SECS),
            worker_timeout: Duration::from_secs(DEFAULT_WORKER_TIMEOUT_SECS),
            worker_sweep_interval: Duration::from_secs(DEFAULT_WORKER_SWEEP_INTERVAL_SECS),
            worker_health_window: Duration::from_secs(DEFAULT_WORKER_HEALTH_WINDOW_SECS),
            anti_starvation_threshold: DEFAULT_ANTI_STARVATION_THRESHOLD,
            top_candidates: DEFAULT_TOP_CANDIDATES,
            telemetry: TelemetryMode::Log,
        }
    }
}

impl SchedulerConfig {
    /// Lee la configuración del entorno del proceso.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Igual que `from_env` pero con una fuente de variables inyectable.
    /// Valores que no parsean se loguean y quedan en el default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let secs = |key: &str, default: Duration| {
            parse_or(&lookup, key, default.as_secs()).map_or(default, Duration::from_secs)
        };

        Self {
            bind_addr: parse_or(&lookup, "MASTER_BIND_ADDR", defaults.bind_addr)
                .unwrap_or(defaults.bind_addr),
            task_timeout: secs("TASK_TIMEOUT_SECS", defaults.task_timeout),
            task_sweep_interval: secs("TASK_SWEEP_INTERVAL_SECS", defaults.task_sweep_interval),
            worker_timeout: secs("WORKER_TIMEOUT_SECS", defaults.worker_timeout),
            worker_sweep_interval: secs(
                "WORKER_SWEEP_INTERVAL_SECS",
                defaults.worker_sweep_interval,
            ),
            worker_health_window: secs(
                "WORKER_HEALTH_WINDOW_SECS",
                defaults.worker_health_window,
            ),
            anti_starvation_threshold: parse_or(
                &lookup,
                "ANTI_STARVATION_THRESHOLD",
                defaults.anti_starvation_threshold,
            )
            .unwrap_or(defaults.anti_starvation_threshold),
            top_candidates: parse_or(&lookup, "TOP_CANDIDATES", defaults.top_candidates)
                .unwrap_or(defaults.top_candidates)
                .max(1),
            telemetry: parse_or(&lookup, "SCHEDULER_TELEMETRY", defaults.telemetry)
                .unwrap_or(defaults.telemetry),
        }
    }
}

/// `Some(valor)` si la variable no existe (default) o parsea bien; `None` si es inválida.
fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Some(default),
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("valor inválido para {}: {:?}, usando el default", key, raw);
                None
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_coinciden_con_los_umbrales_del_scheduler() {
        let cfg = SchedulerConfig::default();

        assert_eq!(cfg.task_timeout, Duration::from_secs(300));
        assert_eq!(cfg.task_sweep_interval, Duration::from_secs(30));
        assert_eq!(cfg.worker_timeout, Duration::from_secs(120));
        assert_eq!(cfg.worker_sweep_interval, Duration::from_secs(120));
        assert_eq!(cfg.top_candidates, 3);
        assert!((cfg.anti_starvation_threshold - 0.2).abs() < f64::EPSILON);
        assert_eq!(cfg.bind_addr.to_string(), DEFAULT_BIND_ADDR);
    }

    #[test]
    fn lee_valores_del_entorno() {
        let cfg = SchedulerConfig::from_lookup(lookup_from(&[
            ("TASK_TIMEOUT_SECS", "60"),
            ("WORKER_TIMEOUT_SECS", "10"),
            ("ANTI_STARVATION_THRESHOLD", "0.5"),
            ("TOP_CANDIDATES", "5"),
            ("SCHEDULER_TELEMETRY", "off"),
            ("MASTER_BIND_ADDR", "127.0.0.1:9000"),
        ]));

        assert_eq!(cfg.task_timeout, Duration::from_secs(60));
        assert_eq!(cfg.worker_timeout, Duration::from_secs(10));
        assert!((cfg.anti_starvation_threshold - 0.5).abs() < f64::EPSILON);
        assert_eq!(cfg.top_candidates, 5);
        assert_eq!(cfg.telemetry, TelemetryMode::Off);
        assert_eq!(cfg.bind_addr.port(), 9000);
    }

    #[test]
    fn valores_invalidos_quedan_en_default() {
        let cfg = SchedulerConfig::from_lookup(lookup_from(&[
            ("TASK_TIMEOUT_SECS", "cinco"),
            ("SCHEDULER_TELEMETRY", "mqtt"),
            ("TOP_CANDIDATES", "0"),
        ]));

        assert_eq!(cfg.task_timeout, Duration::from_secs(300));
        assert_eq!(cfg.telemetry, TelemetryMode::Log);
        // 0 candidatos no tiene sentido, se sube a 1
        assert_eq!(cfg.top_candidates, 1);
    }
}
