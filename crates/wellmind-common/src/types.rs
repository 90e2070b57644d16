use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Notification priority passed through to the push gateway.
///
/// # Examples
///
/// ```
/// use wellmind_common::types::Priority;
///
/// let p: Priority = "high".parse().unwrap();
/// assert_eq!(p, Priority::High);
/// assert_eq!(p.to_string(), "high");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Normal,
    High,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "normal" | "default" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            _ => Err(format!("unknown priority: {s}")),
        }
    }
}

/// Notification template category, used for per-category preference
/// grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Reminder,
    Insight,
    Intervention,
    Achievement,
    Support,
    Promotion,
    Summary,
    Goal,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Category::Reminder => "reminder",
            Category::Insight => "insight",
            Category::Intervention => "intervention",
            Category::Achievement => "achievement",
            Category::Support => "support",
            Category::Promotion => "promotion",
            Category::Summary => "summary",
            Category::Goal => "goal",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reminder" => Ok(Category::Reminder),
            "insight" => Ok(Category::Insight),
            "intervention" => Ok(Category::Intervention),
            "achievement" => Ok(Category::Achievement),
            "support" => Ok(Category::Support),
            "promotion" => Ok(Category::Promotion),
            "summary" => Ok(Category::Summary),
            "goal" => Ok(Category::Goal),
            _ => Err(format!("unknown category: {s}")),
        }
    }
}

/// Subscription tier, written by the (out-of-scope) billing flow and
/// read here only to scope the upgrade-nudge job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Premium,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Free => write!(f, "free"),
            Tier::Premium => write!(f, "premium"),
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "premium" => Ok(Tier::Premium),
            _ => Err(format!("unknown tier: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub display_name: String,
    pub tier: Tier,
    /// Flagged by the (out-of-scope) wellbeing assessment flow; drives
    /// the crisis-check job's audience.
    pub at_risk: bool,
    pub created_at: DateTime<Utc>,
}

/// A registered push device. At most one active row exists per
/// `(user_id, token)`; unregistering deactivates, never deletes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub token: String,
    pub user_id: String,
    pub platform: String,
    pub active: bool,
    pub last_seen: DateTime<Utc>,
}

/// A daily time window during which no notifications are sent.
/// The window may wrap past midnight (e.g. 22:00 - 08:00).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl QuietHours {
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let current_time = now.time();
        if self.start <= self.end {
            current_time >= self.start && current_time <= self.end
        } else {
            // Overnight window (e.g., 22:00 - 08:00)
            current_time >= self.start || current_time <= self.end
        }
    }
}

/// Parse an `"HH:MM"` string into a [`NaiveTime`].
///
/// # Examples
///
/// ```
/// use wellmind_common::types::parse_hhmm;
///
/// assert!(parse_hhmm("22:00").is_ok());
/// assert!(parse_hhmm("9:5").is_err());
/// ```
pub fn parse_hhmm(s: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s, "%H:%M").map_err(|e| format!("invalid HH:MM time '{s}': {e}"))
}

/// Per-user global notification settings. A user without a stored row
/// gets [`GlobalSettings::default`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalSettings {
    pub enabled: bool,
    pub quiet_hours: QuietHours,
    pub max_per_day: u32,
    pub priority_level: Priority,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            quiet_hours: QuietHours {
                start: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
                end: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            },
            max_per_day: 10,
            priority_level: Priority::Normal,
        }
    }
}

/// How often a notification type is expected to fire. Informational
/// in the core engine; the schedule table is the behavioral contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    AsNeeded,
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Frequency::Daily => write!(f, "daily"),
            Frequency::Weekly => write!(f, "weekly"),
            Frequency::Monthly => write!(f, "monthly"),
            Frequency::AsNeeded => write!(f, "as_needed"),
        }
    }
}

impl std::str::FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            "as_needed" => Ok(Frequency::AsNeeded),
            _ => Err(format!("unknown frequency: {s}")),
        }
    }
}

/// A declarative eligibility condition value, compared against the
/// caller-supplied context map.
///
/// Numbers require `context[key] >= threshold`; booleans and strings
/// require equality. A key absent from the context is always unmet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl ConditionValue {
    pub fn is_met_by(&self, value: Option<&serde_json::Value>) -> bool {
        let Some(value) = value else {
            return false;
        };
        match self {
            ConditionValue::Number(threshold) => {
                value.as_f64().is_some_and(|v| v >= *threshold)
            }
            ConditionValue::Bool(expected) => value.as_bool().is_some_and(|v| v == *expected),
            ConditionValue::Text(expected) => value.as_str().is_some_and(|v| v == expected),
        }
    }
}

/// A per-(user, notification type) preference row, created lazily from
/// catalog defaults on first read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preference {
    /// The notification type this preference applies to
    /// (e.g. `"mood_reminder"`).
    pub notification_type: String,
    pub category: Category,
    pub enabled: bool,
    pub frequency: Frequency,
    /// Reminder time of day as `"HH:MM"`, for time-matched types.
    pub time: Option<String>,
    pub conditions: HashMap<String, ConditionValue>,
}

/// One durable record per logical send. `sent_at` is set iff at least
/// one device in the send succeeded; `created_at` is immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub body: String,
    pub notification_type: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A deferred one-shot send. Transitions `unsent -> sent` exactly
/// once and never reverts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledNotification {
    pub id: String,
    pub user_id: String,
    pub template_id: String,
    pub scheduled_for: DateTime<Utc>,
    pub sent: bool,
    pub sent_at: Option<DateTime<Utc>>,
}
