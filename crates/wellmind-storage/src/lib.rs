//! Persistence layer for the wellmind notification engine.
//!
//! The default implementation ([`sqlite::SqliteStore`]) keeps all
//! notification state in a single SQLite database with WAL mode.
//! Every trait here is a seam: the eligibility engine, dispatcher,
//! and job handlers only ever see trait objects, so tests substitute
//! in-memory fakes.

pub mod error;
pub mod sqlite;

#[cfg(test)]
mod tests;

use anyhow::Result;
use chrono::{DateTime, Utc};
use wellmind_common::types::{
    Device, GlobalSettings, NotificationRecord, Preference, ScheduledNotification, Tier,
    UserProfile,
};

/// Read access to user profiles.
///
/// Profiles are written by out-of-scope account/billing/assessment
/// flows; the notification engine only selects audiences from them.
pub trait UserStore: Send + Sync {
    fn get(&self, user_id: &str) -> Result<Option<UserProfile>>;
    fn upsert(&self, user: &UserProfile) -> Result<()>;
    fn list_all(&self) -> Result<Vec<UserProfile>>;
    fn list_by_tier(&self, tier: Tier) -> Result<Vec<UserProfile>>;
    fn list_at_risk(&self) -> Result<Vec<UserProfile>>;
}

/// Registered push devices per user.
pub trait DeviceStore: Send + Sync {
    /// Registers (or re-registers) a device token for a user. A token
    /// previously registered to a different user is silently moved:
    /// its rows under other users are deactivated.
    fn upsert(&self, device: &Device) -> Result<()>;

    /// Marks a device inactive. Rows are never deleted. Returns true
    /// if a row was updated.
    fn deactivate(&self, user_id: &str, token: &str) -> Result<bool>;

    fn list_active(&self, user_id: &str) -> Result<Vec<Device>>;
}

/// Per-user notification preferences and global settings.
pub trait PreferenceStore: Send + Sync {
    /// Returns the stored preference for this (user, type), or `None`
    /// if the user has never touched it (callers fall back to the
    /// catalog default and persist it via [`PreferenceStore::upsert`]).
    fn get(&self, user_id: &str, notification_type: &str) -> Result<Option<Preference>>;

    fn upsert(&self, user_id: &str, pref: &Preference) -> Result<()>;

    /// Global settings for the user; a missing row yields
    /// [`GlobalSettings::default`].
    fn global_settings(&self, user_id: &str) -> Result<GlobalSettings>;

    fn set_global_settings(&self, user_id: &str, settings: &GlobalSettings) -> Result<()>;

    /// Returns `(user_id, notification_type)` pairs whose enabled
    /// preference stores exactly this `"HH:MM"` reminder time.
    fn users_with_reminder_at(&self, hhmm: &str) -> Result<Vec<(String, String)>>;
}

/// Durable per-send notification history.
pub trait NotificationStore: Send + Sync {
    fn create(&self, record: &NotificationRecord) -> Result<()>;

    /// Number of records for this user with `sent_at >= since`. Drives
    /// the daily send cap.
    fn count_sent_since(&self, user_id: &str, since: DateTime<Utc>) -> Result<u32>;

    /// Whether any record of this type was created for this user at or
    /// after `since`. Drives once-per-day reminder dedup.
    fn exists_type_since(
        &self,
        user_id: &str,
        notification_type: &str,
        since: DateTime<Utc>,
    ) -> Result<bool>;

    fn mark_read(&self, id: &str) -> Result<bool>;

    /// Purges records older than `retention_days`. Returns the number
    /// of rows removed.
    fn cleanup_older_than(&self, retention_days: u32) -> Result<u64>;
}

/// Deferred one-shot sends, fired by the process-scheduled job.
pub trait ScheduledStore: Send + Sync {
    fn create(&self, scheduled: &ScheduledNotification) -> Result<()>;

    /// Unsent rows whose `scheduled_for` is at or before `now`.
    fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledNotification>>;

    /// Marks a row sent (exactly once; the flag never reverts).
    /// `sent_at` is set only when delivery actually succeeded.
    fn mark_sent(&self, id: &str, sent_at: Option<DateTime<Utc>>) -> Result<bool>;
}

/// Read-only behavioral context produced by the entry-logging CRUD
/// (mood/sleep/journal check-ins), consumed by the contextual job and
/// fed into eligibility conditions.
pub trait ContextStore: Send + Sync {
    fn record_checkin(&self, user_id: &str, mood: i64, at: DateTime<Utc>) -> Result<()>;
    fn has_checkin_since(&self, user_id: &str, since: DateTime<Utc>) -> Result<bool>;
    fn latest_mood(&self, user_id: &str) -> Result<Option<i64>>;
}
