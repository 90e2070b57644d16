use crate::{
    ContextStore, DeviceStore, NotificationStore, PreferenceStore, ScheduledStore, UserStore,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use wellmind_common::types::{
    parse_hhmm, ConditionValue, Device, GlobalSettings, NotificationRecord, Preference,
    ScheduledNotification, Tier, UserProfile,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    tier TEXT NOT NULL DEFAULT 'free',
    at_risk INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS devices (
    user_id TEXT NOT NULL,
    token TEXT NOT NULL,
    platform TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    last_seen INTEGER NOT NULL,
    PRIMARY KEY (user_id, token)
);
CREATE INDEX IF NOT EXISTS idx_devices_token ON devices(token);

CREATE TABLE IF NOT EXISTS preferences (
    user_id TEXT NOT NULL,
    notification_type TEXT NOT NULL,
    category TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    frequency TEXT NOT NULL DEFAULT 'daily',
    time TEXT,
    conditions TEXT NOT NULL DEFAULT '{}',
    PRIMARY KEY (user_id, notification_type)
);
CREATE INDEX IF NOT EXISTS idx_preferences_time ON preferences(time);

CREATE TABLE IF NOT EXISTS global_settings (
    user_id TEXT PRIMARY KEY,
    enabled INTEGER NOT NULL DEFAULT 1,
    quiet_start TEXT NOT NULL DEFAULT '22:00',
    quiet_end TEXT NOT NULL DEFAULT '08:00',
    max_per_day INTEGER NOT NULL DEFAULT 10,
    priority_level TEXT NOT NULL DEFAULT 'normal'
);

CREATE TABLE IF NOT EXISTS notification_records (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    title TEXT NOT NULL,
    body TEXT NOT NULL,
    notification_type TEXT NOT NULL,
    sent_at INTEGER,
    read_at INTEGER,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_records_user_sent
    ON notification_records(user_id, sent_at);
CREATE INDEX IF NOT EXISTS idx_records_user_type_created
    ON notification_records(user_id, notification_type, created_at);
CREATE INDEX IF NOT EXISTS idx_records_created ON notification_records(created_at);

CREATE TABLE IF NOT EXISTS scheduled_notifications (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    template_id TEXT NOT NULL,
    scheduled_for INTEGER NOT NULL,
    sent INTEGER NOT NULL DEFAULT 0,
    sent_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_scheduled_due
    ON scheduled_notifications(sent, scheduled_for);

CREATE TABLE IF NOT EXISTS checkins (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    mood INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_checkins_user_created ON checkins(user_id, created_at);
";

/// SQLite-backed implementation of every store trait, sharing one
/// WAL-mode connection behind a mutex.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;
        tracing::info!(path = %path.display(), "Opened notification database");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Lock the connection, recovering from a poisoned mutex if necessary.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn ts_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn parse_str_col<T>(column: &'static str, s: &str) -> Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    s.parse()
        .map_err(|e| anyhow::anyhow!("invalid value in column '{column}': {e}"))
}

impl UserStore for SqliteStore {
    fn get(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, display_name, tier, at_risk, created_at FROM users WHERE id = ?1",
        )?;
        let mut rows = stmt.query(rusqlite::params![user_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_user(row)?)),
            None => Ok(None),
        }
    }

    fn upsert(&self, user: &UserProfile) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO users (id, display_name, tier, at_risk, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                 display_name = excluded.display_name,
                 tier = excluded.tier,
                 at_risk = excluded.at_risk",
            rusqlite::params![
                &user.id,
                &user.display_name,
                user.tier.to_string(),
                user.at_risk,
                ts_millis(user.created_at),
            ],
        )?;
        Ok(())
    }

    fn list_all(&self) -> Result<Vec<UserProfile>> {
        self.query_users("SELECT id, display_name, tier, at_risk, created_at FROM users", &[])
    }

    fn list_by_tier(&self, tier: Tier) -> Result<Vec<UserProfile>> {
        self.query_users(
            "SELECT id, display_name, tier, at_risk, created_at FROM users WHERE tier = ?1",
            &[&tier.to_string()],
        )
    }

    fn list_at_risk(&self) -> Result<Vec<UserProfile>> {
        self.query_users(
            "SELECT id, display_name, tier, at_risk, created_at FROM users WHERE at_risk = 1",
            &[],
        )
    }
}

impl SqliteStore {
    fn query_users(&self, sql: &str, params: &[&dyn rusqlite::types::ToSql]) -> Result<Vec<UserProfile>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(sql)?;
        let mut rows = stmt.query(params)?;
        let mut users = Vec::new();
        while let Some(row) = rows.next()? {
            users.push(row_to_user(row)?);
        }
        Ok(users)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> Result<UserProfile> {
    let tier_str: String = row.get(2)?;
    Ok(UserProfile {
        id: row.get(0)?,
        display_name: row.get(1)?,
        tier: parse_str_col("tier", &tier_str)?,
        at_risk: row.get(3)?,
        created_at: from_millis(row.get(4)?),
    })
}

impl DeviceStore for SqliteStore {
    fn upsert(&self, device: &Device) -> Result<()> {
        let conn = self.lock();
        // A token reinstalled under another account moves: deactivate
        // rows for this token held by other users first.
        conn.execute(
            "UPDATE devices SET active = 0 WHERE token = ?1 AND user_id != ?2",
            rusqlite::params![&device.token, &device.user_id],
        )?;
        conn.execute(
            "INSERT INTO devices (user_id, token, platform, active, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id, token) DO UPDATE SET
                 platform = excluded.platform,
                 active = excluded.active,
                 last_seen = excluded.last_seen",
            rusqlite::params![
                &device.user_id,
                &device.token,
                &device.platform,
                device.active,
                ts_millis(device.last_seen),
            ],
        )?;
        Ok(())
    }

    fn deactivate(&self, user_id: &str, token: &str) -> Result<bool> {
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE devices SET active = 0 WHERE user_id = ?1 AND token = ?2",
            rusqlite::params![user_id, token],
        )?;
        Ok(updated > 0)
    }

    fn list_active(&self, user_id: &str) -> Result<Vec<Device>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT user_id, token, platform, active, last_seen
             FROM devices WHERE user_id = ?1 AND active = 1
             ORDER BY last_seen DESC",
        )?;
        let mut rows = stmt.query(rusqlite::params![user_id])?;
        let mut devices = Vec::new();
        while let Some(row) = rows.next()? {
            devices.push(Device {
                user_id: row.get(0)?,
                token: row.get(1)?,
                platform: row.get(2)?,
                active: row.get(3)?,
                last_seen: from_millis(row.get(4)?),
            });
        }
        Ok(devices)
    }
}

impl PreferenceStore for SqliteStore {
    fn get(&self, user_id: &str, notification_type: &str) -> Result<Option<Preference>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT notification_type, category, enabled, frequency, time, conditions
             FROM preferences WHERE user_id = ?1 AND notification_type = ?2",
        )?;
        let mut rows = stmt.query(rusqlite::params![user_id, notification_type])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_preference(row)?)),
            None => Ok(None),
        }
    }

    fn upsert(&self, user_id: &str, pref: &Preference) -> Result<()> {
        let conditions_json = serde_json::to_string(&pref.conditions)?;
        let conn = self.lock();
        conn.execute(
            "INSERT INTO preferences
                 (user_id, notification_type, category, enabled, frequency, time, conditions)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(user_id, notification_type) DO UPDATE SET
                 category = excluded.category,
                 enabled = excluded.enabled,
                 frequency = excluded.frequency,
                 time = excluded.time,
                 conditions = excluded.conditions",
            rusqlite::params![
                user_id,
                &pref.notification_type,
                pref.category.to_string(),
                pref.enabled,
                pref.frequency.to_string(),
                &pref.time,
                conditions_json,
            ],
        )?;
        Ok(())
    }

    fn global_settings(&self, user_id: &str) -> Result<GlobalSettings> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT enabled, quiet_start, quiet_end, max_per_day, priority_level
             FROM global_settings WHERE user_id = ?1",
        )?;
        let mut rows = stmt.query(rusqlite::params![user_id])?;
        match rows.next()? {
            Some(row) => {
                let quiet_start: String = row.get(1)?;
                let quiet_end: String = row.get(2)?;
                let priority: String = row.get(4)?;
                Ok(GlobalSettings {
                    enabled: row.get(0)?,
                    quiet_hours: wellmind_common::types::QuietHours {
                        start: parse_hhmm(&quiet_start).map_err(|e| anyhow::anyhow!(e))?,
                        end: parse_hhmm(&quiet_end).map_err(|e| anyhow::anyhow!(e))?,
                    },
                    max_per_day: row.get(3)?,
                    priority_level: parse_str_col("priority_level", &priority)?,
                })
            }
            None => Ok(GlobalSettings::default()),
        }
    }

    fn set_global_settings(&self, user_id: &str, settings: &GlobalSettings) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO global_settings
                 (user_id, enabled, quiet_start, quiet_end, max_per_day, priority_level)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(user_id) DO UPDATE SET
                 enabled = excluded.enabled,
                 quiet_start = excluded.quiet_start,
                 quiet_end = excluded.quiet_end,
                 max_per_day = excluded.max_per_day,
                 priority_level = excluded.priority_level",
            rusqlite::params![
                user_id,
                settings.enabled,
                settings.quiet_hours.start.format("%H:%M").to_string(),
                settings.quiet_hours.end.format("%H:%M").to_string(),
                settings.max_per_day,
                settings.priority_level.to_string(),
            ],
        )?;
        Ok(())
    }

    fn users_with_reminder_at(&self, hhmm: &str) -> Result<Vec<(String, String)>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT user_id, notification_type FROM preferences
             WHERE enabled = 1 AND time = ?1",
        )?;
        let mut rows = stmt.query(rusqlite::params![hhmm])?;
        let mut matches = Vec::new();
        while let Some(row) = rows.next()? {
            matches.push((row.get(0)?, row.get(1)?));
        }
        Ok(matches)
    }
}

fn row_to_preference(row: &rusqlite::Row<'_>) -> Result<Preference> {
    let category: String = row.get(1)?;
    let frequency: String = row.get(3)?;
    let conditions_json: String = row.get(5)?;
    let conditions: HashMap<String, ConditionValue> =
        serde_json::from_str(&conditions_json).unwrap_or_default();
    Ok(Preference {
        notification_type: row.get(0)?,
        category: parse_str_col("category", &category)?,
        enabled: row.get(2)?,
        frequency: parse_str_col("frequency", &frequency)?,
        time: row.get(4)?,
        conditions,
    })
}

impl NotificationStore for SqliteStore {
    fn create(&self, record: &NotificationRecord) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO notification_records
                 (id, user_id, title, body, notification_type, sent_at, read_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                &record.id,
                &record.user_id,
                &record.title,
                &record.body,
                &record.notification_type,
                record.sent_at.map(ts_millis),
                record.read_at.map(ts_millis),
                ts_millis(record.created_at),
            ],
        )?;
        Ok(())
    }

    fn count_sent_since(&self, user_id: &str, since: DateTime<Utc>) -> Result<u32> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT COUNT(*) FROM notification_records
             WHERE user_id = ?1 AND sent_at IS NOT NULL AND sent_at >= ?2",
        )?;
        let count: u32 =
            stmt.query_row(rusqlite::params![user_id, ts_millis(since)], |row| row.get(0))?;
        Ok(count)
    }

    fn exists_type_since(
        &self,
        user_id: &str,
        notification_type: &str,
        since: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT COUNT(*) FROM notification_records
             WHERE user_id = ?1 AND notification_type = ?2 AND created_at >= ?3",
        )?;
        let count: u32 = stmt.query_row(
            rusqlite::params![user_id, notification_type, ts_millis(since)],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn mark_read(&self, id: &str) -> Result<bool> {
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE notification_records SET read_at = ?1 WHERE id = ?2 AND read_at IS NULL",
            rusqlite::params![ts_millis(Utc::now()), id],
        )?;
        Ok(updated > 0)
    }

    fn cleanup_older_than(&self, retention_days: u32) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);
        let conn = self.lock();
        let removed = conn.execute(
            "DELETE FROM notification_records WHERE created_at < ?1",
            rusqlite::params![ts_millis(cutoff)],
        )?;
        if removed > 0 {
            tracing::info!(removed, retention_days, "Purged old notification records");
        }
        Ok(removed as u64)
    }
}

impl ScheduledStore for SqliteStore {
    fn create(&self, scheduled: &ScheduledNotification) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO scheduled_notifications
                 (id, user_id, template_id, scheduled_for, sent, sent_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                &scheduled.id,
                &scheduled.user_id,
                &scheduled.template_id,
                ts_millis(scheduled.scheduled_for),
                scheduled.sent,
                scheduled.sent_at.map(ts_millis),
            ],
        )?;
        Ok(())
    }

    fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledNotification>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, user_id, template_id, scheduled_for, sent, sent_at
             FROM scheduled_notifications
             WHERE sent = 0 AND scheduled_for <= ?1
             ORDER BY scheduled_for ASC",
        )?;
        let mut rows = stmt.query(rusqlite::params![ts_millis(now)])?;
        let mut due = Vec::new();
        while let Some(row) = rows.next()? {
            let sent_at: Option<i64> = row.get(5)?;
            due.push(ScheduledNotification {
                id: row.get(0)?,
                user_id: row.get(1)?,
                template_id: row.get(2)?,
                scheduled_for: from_millis(row.get(3)?),
                sent: row.get(4)?,
                sent_at: sent_at.map(from_millis),
            });
        }
        Ok(due)
    }

    fn mark_sent(&self, id: &str, sent_at: Option<DateTime<Utc>>) -> Result<bool> {
        let conn = self.lock();
        // `sent = 0` guard keeps the unsent -> sent transition one-way.
        let updated = conn.execute(
            "UPDATE scheduled_notifications SET sent = 1, sent_at = ?1
             WHERE id = ?2 AND sent = 0",
            rusqlite::params![sent_at.map(ts_millis), id],
        )?;
        Ok(updated > 0)
    }
}

impl ContextStore for SqliteStore {
    fn record_checkin(&self, user_id: &str, mood: i64, at: DateTime<Utc>) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO checkins (id, user_id, mood, created_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                wellmind_common::id::next_id(),
                user_id,
                mood,
                ts_millis(at)
            ],
        )?;
        Ok(())
    }

    fn has_checkin_since(&self, user_id: &str, since: DateTime<Utc>) -> Result<bool> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT COUNT(*) FROM checkins WHERE user_id = ?1 AND created_at >= ?2",
        )?;
        let count: u32 =
            stmt.query_row(rusqlite::params![user_id, ts_millis(since)], |row| row.get(0))?;
        Ok(count > 0)
    }

    fn latest_mood(&self, user_id: &str) -> Result<Option<i64>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT mood FROM checkins WHERE user_id = ?1 ORDER BY created_at DESC LIMIT 1",
        )?;
        let mut rows = stmt.query(rusqlite::params![user_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }
}
