// master/src/state.rs

use std::sync::Arc;

use crate::scheduler::SmartScheduler;

/// Estado compartido por los handlers HTTP.
/// El scheduler ya es concurrente por dentro; acá sólo se comparte el handle.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<SmartScheduler>,
}

impl AppState {
    pub fn new(scheduler: Arc<SmartScheduler>) -> Self {
        Self { scheduler }
    }
}
