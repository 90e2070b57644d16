use crate::dispatcher::Dispatcher;
use crate::eligibility::{Decision, EligibilityEngine};
use crate::Context;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use wellmind_storage::PreferenceStore;

/// Turns stored "time of day" preferences into fire/no-fire decisions
/// each minute: every (user, type) whose reminder time equals the
/// current `HH:MM` — and which hasn't fired today — is gated through
/// the eligibility engine and dispatched.
pub struct ReminderMatcher {
    prefs: Arc<dyn PreferenceStore>,
    eligibility: Arc<EligibilityEngine>,
    dispatcher: Arc<Dispatcher>,
}

impl ReminderMatcher {
    pub fn new(
        prefs: Arc<dyn PreferenceStore>,
        eligibility: Arc<EligibilityEngine>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            prefs,
            eligibility,
            dispatcher,
        }
    }

    /// One minute tick. Returns the number of successful dispatches.
    /// A failure for one user never aborts the rest of the tick.
    pub async fn run_tick(&self, now: DateTime<Utc>) -> Result<u32> {
        let hhmm = now.format("%H:%M").to_string();
        let due = self.prefs.users_with_reminder_at(&hhmm)?;
        if due.is_empty() {
            return Ok(0);
        }

        tracing::debug!(time = %hhmm, candidates = due.len(), "Reminder tick");

        let context = Context::new();
        let mut dispatched = 0u32;
        for (user_id, notification_type) in due {
            match self
                .eligibility
                .evaluate_reminder(&user_id, &notification_type, &context, now)
            {
                Ok(Decision::Allow) => {
                    let report = self
                        .dispatcher
                        .send_to_user(&user_id, &notification_type, &context)
                        .await;
                    if report.success {
                        dispatched += 1;
                    } else {
                        tracing::warn!(
                            user_id = %user_id,
                            notification_type = %notification_type,
                            error = report.error.as_deref().unwrap_or("unknown"),
                            "Reminder dispatch failed"
                        );
                    }
                }
                Ok(Decision::Deny(_)) => {
                    // Already logged at debug by the engine.
                }
                Err(e) => {
                    tracing::warn!(
                        user_id = %user_id,
                        notification_type = %notification_type,
                        error = %e,
                        "Reminder eligibility check failed"
                    );
                }
            }
        }

        Ok(dispatched)
    }
}
