//! Shared types and ID generation for the wellmind notification engine.

pub mod id;
pub mod types;
