use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Errores de las rutas del master que no son parte del contrato del scheduler
/// (el scheduler en sí responde con `None`/`false`, nunca con error).
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("worker no registrado: {0}")]
    WorkerNotFound(String),

    #[error("worker ya registrado: {0}")]
    WorkerAlreadyRegistered(String),

    #[error("request inválido: {0}")]
    InvalidRequest(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

impl SchedulerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            SchedulerError::WorkerNotFound(_) => StatusCode::NOT_FOUND,
            SchedulerError::WorkerAlreadyRegistered(_) => StatusCode::CONFLICT,
            SchedulerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for SchedulerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
