pub mod app;
pub mod config;
pub mod jobs;
pub mod scheduler;
pub mod state;
