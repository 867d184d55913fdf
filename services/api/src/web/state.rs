//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use course_progress_core::ProgressService;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub progress: Arc<ProgressService>,
}

impl AppState {
    pub fn new(progress: ProgressService) -> Self {
        Self {
            progress: Arc::new(progress),
        }
    }
}
