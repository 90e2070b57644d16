use crate::catalog::TemplateCatalog;
use crate::Context;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use wellmind_storage::{NotificationStore, PreferenceStore};

/// The outcome of an eligibility check. A denial is a normal
/// decision, never an error: the user simply receives nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// The user disabled notifications entirely.
    NotificationsDisabled,
    /// The current time falls inside the user's quiet hours.
    QuietHours,
    /// The notification type is not in the catalog; unknown types are
    /// never sent.
    UnknownType,
    /// The per-type preference is disabled.
    TypeDisabled,
    /// A declarative condition was not met by the context (key named).
    ConditionUnmet(String),
    /// The user already received `max_per_day` sends today.
    DailyCapReached,
    /// A reminder of this type was already sent today.
    AlreadySentToday,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenyReason::NotificationsDisabled => write!(f, "notifications disabled"),
            DenyReason::QuietHours => write!(f, "quiet hours"),
            DenyReason::UnknownType => write!(f, "unknown notification type"),
            DenyReason::TypeDisabled => write!(f, "type disabled"),
            DenyReason::ConditionUnmet(key) => write!(f, "condition '{key}' unmet"),
            DenyReason::DailyCapReached => write!(f, "daily cap reached"),
            DenyReason::AlreadySentToday => write!(f, "already sent today"),
        }
    }
}

/// The policy gate: decides per-user-per-type whether a notification
/// may be sent, as an ordered pipeline that short-circuits on the
/// first failing check.
pub struct EligibilityEngine {
    prefs: Arc<dyn PreferenceStore>,
    history: Arc<dyn NotificationStore>,
    catalog: Arc<TemplateCatalog>,
}

impl EligibilityEngine {
    pub fn new(
        prefs: Arc<dyn PreferenceStore>,
        history: Arc<dyn NotificationStore>,
        catalog: Arc<TemplateCatalog>,
    ) -> Self {
        Self {
            prefs,
            history,
            catalog,
        }
    }

    /// Evaluates the full pipeline for `(user, type, context)` at the
    /// given instant. Pipeline order matters: a disabled type is
    /// denied before its conditions are ever looked at.
    pub fn evaluate(
        &self,
        user_id: &str,
        notification_type: &str,
        context: &Context,
        now: DateTime<Utc>,
    ) -> Result<Decision> {
        let settings = self.prefs.global_settings(user_id)?;

        if !settings.enabled {
            return Ok(self.deny(user_id, notification_type, DenyReason::NotificationsDisabled));
        }

        if settings.quiet_hours.contains(now) {
            return Ok(self.deny(user_id, notification_type, DenyReason::QuietHours));
        }

        let Some(default) = self.catalog.default_preference(notification_type) else {
            return Ok(self.deny(user_id, notification_type, DenyReason::UnknownType));
        };

        // Lazily materialize the preference row on first read.
        let pref = match self.prefs.get(user_id, notification_type)? {
            Some(pref) => pref,
            None => {
                let pref = default.clone();
                self.prefs.upsert(user_id, &pref)?;
                pref
            }
        };

        if !pref.enabled {
            return Ok(self.deny(user_id, notification_type, DenyReason::TypeDisabled));
        }

        for (key, condition) in &pref.conditions {
            if !condition.is_met_by(context.get(key)) {
                return Ok(self.deny(
                    user_id,
                    notification_type,
                    DenyReason::ConditionUnmet(key.clone()),
                ));
            }
        }

        let sent_today = self.history.count_sent_since(user_id, start_of_day(now))?;
        if sent_today >= settings.max_per_day {
            return Ok(self.deny(user_id, notification_type, DenyReason::DailyCapReached));
        }

        Ok(Decision::Allow)
    }

    /// Reminder-specific layer: a reminder type goes out at most once
    /// per calendar day per user, checked before the pipeline runs.
    pub fn evaluate_reminder(
        &self,
        user_id: &str,
        notification_type: &str,
        context: &Context,
        now: DateTime<Utc>,
    ) -> Result<Decision> {
        if self
            .history
            .exists_type_since(user_id, notification_type, start_of_day(now))?
        {
            return Ok(self.deny(user_id, notification_type, DenyReason::AlreadySentToday));
        }
        self.evaluate(user_id, notification_type, context, now)
    }

    /// Convenience boolean form of [`EligibilityEngine::evaluate`].
    pub fn should_send(
        &self,
        user_id: &str,
        notification_type: &str,
        context: &Context,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self.evaluate(user_id, notification_type, context, now)?.is_allow())
    }

    fn deny(&self, user_id: &str, notification_type: &str, reason: DenyReason) -> Decision {
        tracing::debug!(
            user_id,
            notification_type,
            reason = %reason,
            "Notification denied"
        );
        Decision::Deny(reason)
    }
}

/// Midnight UTC of the day containing `now`.
pub fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .unwrap_or_default()
        .and_utc()
}
