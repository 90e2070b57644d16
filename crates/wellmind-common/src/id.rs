//! Row identifiers for notification records and scheduled sends.
//!
//! Ids are snowflake i64s rendered as strings, so they stay unique
//! across restarts and sort by issue order, which keeps
//! `notification_records` naturally ordered by creation.

use snowflake::SnowflakeIdBucket;
use std::sync::{Mutex, OnceLock};

static BUCKET: OnceLock<Mutex<SnowflakeIdBucket>> = OnceLock::new();

/// Seeds the generator with this instance's `(machine_id, node_id)`
/// pair from the scheduler config. Call once at startup, before any
/// id is issued; later calls and un-seeded use both fall back to the
/// first bucket created.
pub fn init(machine_id: i32, node_id: i32) {
    let _ = BUCKET.set(Mutex::new(SnowflakeIdBucket::new(machine_id, node_id)));
}

pub fn next_id() -> String {
    let bucket = BUCKET.get_or_init(|| Mutex::new(SnowflakeIdBucket::new(1, 1)));
    bucket
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .get_id()
        .to_string()
}
