//! The nine recurring jobs. Each handler is a thin orchestration
//! shell: selection comes from storage, the go/no-go decision from the
//! eligibility engine, delivery from the dispatcher. Per-user failures
//! are logged and never abort the rest of a cycle.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Timelike, Utc};
use std::sync::Arc;
use wellmind_common::types::Tier;
use wellmind_notify::dispatcher::Dispatcher;
use wellmind_notify::eligibility::{start_of_day, Decision, EligibilityEngine};
use wellmind_notify::reminder::ReminderMatcher;
use wellmind_notify::Context;
use wellmind_storage::{ContextStore, NotificationStore, ScheduledStore, UserStore};

use crate::scheduler::JobHandler;

/// Delivers deferred one-shot sends whose time has come. A row is
/// marked sent after its first processing attempt, whatever the
/// delivery outcome; a row that failed delivery is not retried.
pub struct ProcessScheduledJob {
    pub scheduled: Arc<dyn ScheduledStore>,
    pub dispatcher: Arc<Dispatcher>,
}

#[async_trait]
impl JobHandler for ProcessScheduledJob {
    async fn run(&self, now: DateTime<Utc>) -> Result<()> {
        let due = self.scheduled.list_due(now)?;
        if due.is_empty() {
            return Ok(());
        }
        tracing::info!(count = due.len(), "processing due scheduled notifications");

        for row in due {
            let report = self
                .dispatcher
                .send_to_user(&row.user_id, &row.template_id, &Context::new())
                .await;
            if !report.success {
                tracing::warn!(
                    scheduled_id = %row.id,
                    user_id = %row.user_id,
                    error = report.error.as_deref().unwrap_or("unknown"),
                    "scheduled notification delivery failed"
                );
            }
            let sent_at = (report.sent > 0).then_some(now);
            self.scheduled.mark_sent(&row.id, sent_at)?;
        }
        Ok(())
    }
}

/// Fires user-configured daily reminders whose time matches the
/// current minute.
pub struct SendRemindersJob {
    pub matcher: Arc<ReminderMatcher>,
}

#[async_trait]
impl JobHandler for SendRemindersJob {
    async fn run(&self, now: DateTime<Utc>) -> Result<()> {
        let dispatched = self.matcher.run_tick(now).await?;
        if dispatched > 0 {
            tracing::info!(dispatched, "reminder tick complete");
        }
        Ok(())
    }
}

/// Nudges users who have not checked in today. Only runs its
/// selection after noon so morning users are left alone. Goes through
/// the once-per-day reminder gate: the job repeats every few minutes,
/// but each user gets at most one nudge per calendar day.
pub struct SendContextualJob {
    pub users: Arc<dyn UserStore>,
    pub checkins: Arc<dyn ContextStore>,
    pub eligibility: Arc<EligibilityEngine>,
    pub dispatcher: Arc<Dispatcher>,
}

#[async_trait]
impl JobHandler for SendContextualJob {
    async fn run(&self, now: DateTime<Utc>) -> Result<()> {
        if now.hour() < 12 {
            return Ok(());
        }
        let midnight = start_of_day(now);

        for user in self.users.list_all()? {
            if self.checkins.has_checkin_since(&user.id, midnight)? {
                continue;
            }
            let mut ctx = Context::new();
            if let Some(mood) = self.checkins.latest_mood(&user.id)? {
                ctx.insert("mood".into(), serde_json::json!(mood));
            }
            match self
                .eligibility
                .evaluate_reminder(&user.id, "checkin_nudge", &ctx, now)
            {
                Ok(Decision::Allow) => {
                    let report = self
                        .dispatcher
                        .send_to_user(&user.id, "checkin_nudge", &ctx)
                        .await;
                    if !report.success {
                        tracing::warn!(
                            user_id = %user.id,
                            error = report.error.as_deref().unwrap_or("unknown"),
                            "check-in nudge delivery failed"
                        );
                    }
                }
                Ok(Decision::Deny(_)) => {}
                Err(e) => {
                    tracing::warn!(user_id = %user.id, error = %e, "check-in nudge eligibility check failed");
                }
            }
        }
        Ok(())
    }
}

/// Weekly activity summary, fanned out over every user.
pub struct WeeklySummaryJob {
    pub users: Arc<dyn UserStore>,
    pub history: Arc<dyn NotificationStore>,
    pub eligibility: Arc<EligibilityEngine>,
    pub dispatcher: Arc<Dispatcher>,
}

#[async_trait]
impl JobHandler for WeeklySummaryJob {
    async fn run(&self, now: DateTime<Utc>) -> Result<()> {
        let week_ago = now - Duration::days(7);
        for user in self.users.list_all()? {
            let mut ctx = Context::new();
            let received = self.history.count_sent_since(&user.id, week_ago)?;
            ctx.insert("weeklyCount".into(), serde_json::json!(received));
            gated_send(
                &self.eligibility,
                &self.dispatcher,
                &user.id,
                "weekly_summary",
                &ctx,
                now,
            )
            .await;
        }
        Ok(())
    }
}

pub struct MonthlyInsightsJob {
    pub users: Arc<dyn UserStore>,
    pub eligibility: Arc<EligibilityEngine>,
    pub dispatcher: Arc<Dispatcher>,
}

#[async_trait]
impl JobHandler for MonthlyInsightsJob {
    async fn run(&self, now: DateTime<Utc>) -> Result<()> {
        for user in self.users.list_all()? {
            gated_send(
                &self.eligibility,
                &self.dispatcher,
                &user.id,
                "monthly_insights",
                &Context::new(),
                now,
            )
            .await;
        }
        Ok(())
    }
}

/// Purges notification records older than the retention window.
pub struct CleanupNotificationsJob {
    pub history: Arc<dyn NotificationStore>,
    pub retention_days: u32,
}

#[async_trait]
impl JobHandler for CleanupNotificationsJob {
    async fn run(&self, _now: DateTime<Utc>) -> Result<()> {
        let removed = self.history.cleanup_older_than(self.retention_days)?;
        if removed > 0 {
            tracing::info!(removed, retention_days = self.retention_days, "old notifications purged");
        }
        Ok(())
    }
}

/// Upgrade prompts for free-tier users. The `subscription_upgrade`
/// preference defaults to disabled, so nothing reaches users who have
/// not opted in.
pub struct SubscriptionRemindersJob {
    pub users: Arc<dyn UserStore>,
    pub eligibility: Arc<EligibilityEngine>,
    pub dispatcher: Arc<Dispatcher>,
}

#[async_trait]
impl JobHandler for SubscriptionRemindersJob {
    async fn run(&self, now: DateTime<Utc>) -> Result<()> {
        for user in self.users.list_by_tier(Tier::Free)? {
            let mut ctx = Context::new();
            let days_active = (now - user.created_at).num_days().max(0);
            ctx.insert("days_active".into(), serde_json::json!(days_active));
            gated_send(
                &self.eligibility,
                &self.dispatcher,
                &user.id,
                "subscription_upgrade",
                &ctx,
                now,
            )
            .await;
        }
        Ok(())
    }
}

pub struct GoalRemindersJob {
    pub users: Arc<dyn UserStore>,
    pub eligibility: Arc<EligibilityEngine>,
    pub dispatcher: Arc<Dispatcher>,
}

#[async_trait]
impl JobHandler for GoalRemindersJob {
    async fn run(&self, now: DateTime<Utc>) -> Result<()> {
        for user in self.users.list_all()? {
            gated_send(
                &self.eligibility,
                &self.dispatcher,
                &user.id,
                "goal_progress",
                &Context::new(),
                now,
            )
            .await;
        }
        Ok(())
    }
}

/// Support outreach for at-risk users (high-priority template).
pub struct CrisisCheckJob {
    pub users: Arc<dyn UserStore>,
    pub eligibility: Arc<EligibilityEngine>,
    pub dispatcher: Arc<Dispatcher>,
}

#[async_trait]
impl JobHandler for CrisisCheckJob {
    async fn run(&self, now: DateTime<Utc>) -> Result<()> {
        for user in self.users.list_at_risk()? {
            gated_send(
                &self.eligibility,
                &self.dispatcher,
                &user.id,
                "crisis_support",
                &Context::new(),
                now,
            )
            .await;
        }
        Ok(())
    }
}

/// Common per-user step of the fan-out jobs: eligibility gate, then
/// dispatch. Failures are logged so one user never sinks the cycle.
async fn gated_send(
    eligibility: &EligibilityEngine,
    dispatcher: &Dispatcher,
    user_id: &str,
    notification_type: &str,
    ctx: &Context,
    now: DateTime<Utc>,
) {
    match eligibility.should_send(user_id, notification_type, ctx, now) {
        Ok(false) => {}
        Ok(true) => {
            let report = dispatcher.send_to_user(user_id, notification_type, ctx).await;
            if !report.success {
                tracing::warn!(
                    user_id = %user_id,
                    notification_type = %notification_type,
                    error = report.error.as_deref().unwrap_or("unknown"),
                    "delivery failed"
                );
            }
        }
        Err(e) => {
            tracing::warn!(
                user_id = %user_id,
                notification_type = %notification_type,
                error = %e,
                "eligibility check failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use wellmind_common::types::{Device, ScheduledNotification, UserProfile};
    use wellmind_notify::catalog::TemplateCatalog;
    use wellmind_notify::gateway::{PushGateway, PushMessage, PushTicket, TicketStatus};
    use wellmind_storage::sqlite::SqliteStore;

    struct OkGateway;

    #[async_trait]
    impl PushGateway for OkGateway {
        async fn send_batch(&self, messages: &[PushMessage]) -> Result<Vec<PushTicket>> {
            Ok(messages
                .iter()
                .map(|_| PushTicket {
                    status: TicketStatus::Ok,
                    message: None,
                })
                .collect())
        }

        fn max_batch_size(&self) -> usize {
            100
        }
    }

    fn wired_store() -> (Arc<SqliteStore>, Arc<EligibilityEngine>, Arc<Dispatcher>) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let catalog = Arc::new(TemplateCatalog::builtin());
        let eligibility = Arc::new(EligibilityEngine::new(
            store.clone(),
            store.clone(),
            catalog.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(OkGateway),
            catalog,
        ));
        (store, eligibility, dispatcher)
    }

    fn seed_user(store: &SqliteStore, id: &str, tier: Tier, at_risk: bool) {
        UserStore::upsert(
            store,
            &UserProfile {
                id: id.to_string(),
                display_name: "Ana".to_string(),
                tier,
                at_risk,
                created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            },
        )
        .unwrap();
        wellmind_storage::DeviceStore::upsert(
            store,
            &Device {
                token: format!("ExponentPushToken[{id}]"),
                user_id: id.to_string(),
                platform: "ios".to_string(),
                active: true,
                last_seen: Utc::now(),
            },
        )
        .unwrap();
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 12, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn scheduled_rows_fire_exactly_once() {
        let (store, _eligibility, dispatcher) = wired_store();
        seed_user(&store, "u1", Tier::Free, false);
        let scheduled: Arc<dyn ScheduledStore> = store.clone();
        scheduled
            .create(&ScheduledNotification {
                id: "s1".to_string(),
                user_id: "u1".to_string(),
                template_id: "mood_reminder".to_string(),
                scheduled_for: noon() - Duration::minutes(1),
                sent: false,
                sent_at: None,
            })
            .unwrap();

        let job = ProcessScheduledJob {
            scheduled: scheduled.clone(),
            dispatcher,
        };
        job.run(noon()).await.unwrap();

        // The row is gone from the due set and a record was written.
        assert!(scheduled.list_due(noon()).unwrap().is_empty());
        assert_eq!(
            NotificationStore::count_sent_since(store.as_ref(), "u1", noon() - Duration::hours(1))
                .unwrap(),
            1
        );

        // A second cycle finds nothing to do.
        job.run(noon() + Duration::minutes(1)).await.unwrap();
        assert_eq!(
            NotificationStore::count_sent_since(store.as_ref(), "u1", noon() - Duration::hours(1))
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn scheduled_row_with_unknown_template_is_still_consumed() {
        let (store, _eligibility, dispatcher) = wired_store();
        seed_user(&store, "u1", Tier::Free, false);
        let scheduled: Arc<dyn ScheduledStore> = store.clone();
        scheduled
            .create(&ScheduledNotification {
                id: "s1".to_string(),
                user_id: "u1".to_string(),
                template_id: "no_such_template".to_string(),
                scheduled_for: noon(),
                sent: false,
                sent_at: None,
            })
            .unwrap();

        let job = ProcessScheduledJob {
            scheduled: scheduled.clone(),
            dispatcher,
        };
        job.run(noon()).await.unwrap();
        assert!(scheduled.list_due(noon()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn subscription_reminders_denied_by_default_preference() {
        let (store, eligibility, dispatcher) = wired_store();
        seed_user(&store, "free1", Tier::Free, false);
        seed_user(&store, "prem1", Tier::Premium, false);

        let job = SubscriptionRemindersJob {
            users: store.clone(),
            eligibility,
            dispatcher,
        };
        job.run(noon()).await.unwrap();

        // The default subscription_upgrade preference is disabled, so
        // no record is written for anyone.
        for user in ["free1", "prem1"] {
            assert_eq!(
                NotificationStore::count_sent_since(
                    store.as_ref(),
                    user,
                    noon() - Duration::hours(1)
                )
                .unwrap(),
                0
            );
        }
    }

    #[tokio::test]
    async fn crisis_check_targets_at_risk_users_only() {
        let (store, eligibility, dispatcher) = wired_store();
        seed_user(&store, "calm", Tier::Free, false);
        seed_user(&store, "risk", Tier::Free, true);

        let job = CrisisCheckJob {
            users: store.clone(),
            eligibility,
            dispatcher,
        };
        job.run(noon()).await.unwrap();

        let since = noon() - Duration::hours(1);
        assert_eq!(
            NotificationStore::count_sent_since(store.as_ref(), "risk", since).unwrap(),
            1
        );
        assert_eq!(
            NotificationStore::count_sent_since(store.as_ref(), "calm", since).unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn contextual_nudge_skips_mornings_and_checked_in_users() {
        let (store, eligibility, dispatcher) = wired_store();
        seed_user(&store, "quiet", Tier::Free, false);
        seed_user(&store, "active", Tier::Free, false);
        ContextStore::record_checkin(store.as_ref(), "active", 4, noon() - Duration::hours(2))
            .unwrap();

        let job = SendContextualJob {
            users: store.clone(),
            checkins: store.clone(),
            eligibility,
            dispatcher,
        };

        // Before noon the job is a no-op.
        job.run(Utc.with_ymd_and_hms(2024, 6, 12, 9, 0, 0).unwrap())
            .await
            .unwrap();
        let since = noon() - Duration::hours(12);
        assert_eq!(
            NotificationStore::count_sent_since(store.as_ref(), "quiet", since).unwrap(),
            0
        );

        job.run(noon()).await.unwrap();
        assert_eq!(
            NotificationStore::count_sent_since(store.as_ref(), "quiet", since).unwrap(),
            1
        );
        assert_eq!(
            NotificationStore::count_sent_since(store.as_ref(), "active", since).unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn contextual_nudge_fires_at_most_once_per_day() {
        let (store, eligibility, dispatcher) = wired_store();
        seed_user(&store, "quiet", Tier::Free, false);

        let job = SendContextualJob {
            users: store.clone(),
            checkins: store.clone(),
            eligibility,
            dispatcher,
        };

        // The job repeats every few minutes; back-to-back cycles must
        // not stack nudges for a user who still hasn't checked in.
        job.run(noon()).await.unwrap();
        job.run(noon() + Duration::minutes(5)).await.unwrap();
        job.run(noon() + Duration::minutes(10)).await.unwrap();

        let since = noon() - Duration::hours(12);
        assert_eq!(
            NotificationStore::count_sent_since(store.as_ref(), "quiet", since).unwrap(),
            1
        );
    }
}
