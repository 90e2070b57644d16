use crate::scheduler::JobRegistry;
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<JobRegistry>,
    pub start_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(registry: Arc<JobRegistry>) -> Self {
        Self {
            registry,
            start_time: Utc::now(),
        }
    }
}
