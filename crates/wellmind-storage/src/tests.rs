use crate::sqlite::SqliteStore;
use crate::{
    ContextStore, DeviceStore, NotificationStore, PreferenceStore, ScheduledStore, UserStore,
};
use chrono::{Duration, Utc};
use std::collections::HashMap;
use tempfile::TempDir;
use wellmind_common::types::{
    Category, ConditionValue, Device, Frequency, GlobalSettings, NotificationRecord, Preference,
    ScheduledNotification, Tier, UserProfile,
};

fn setup() -> (TempDir, SqliteStore) {
    wellmind_common::id::init(1, 1);
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(&dir.path().join("wellmind.db")).unwrap();
    (dir, store)
}

fn make_user(id: &str, tier: Tier, at_risk: bool) -> UserProfile {
    UserProfile {
        id: id.to_string(),
        display_name: format!("User {id}"),
        tier,
        at_risk,
        created_at: Utc::now(),
    }
}

fn make_device(user: &str, token: &str) -> Device {
    Device {
        token: token.to_string(),
        user_id: user.to_string(),
        platform: "ios".to_string(),
        active: true,
        last_seen: Utc::now(),
    }
}

fn make_record(user: &str, ntype: &str, sent: bool, created_secs_ago: i64) -> NotificationRecord {
    let created = Utc::now() - Duration::seconds(created_secs_ago);
    NotificationRecord {
        id: wellmind_common::id::next_id(),
        user_id: user.to_string(),
        title: "Hi".to_string(),
        body: "Body".to_string(),
        notification_type: ntype.to_string(),
        sent_at: sent.then_some(created),
        read_at: None,
        created_at: created,
    }
}

#[test]
fn user_tier_and_risk_audiences() {
    let (_dir, store) = setup();
    UserStore::upsert(&store, &make_user("u1", Tier::Free, false)).unwrap();
    UserStore::upsert(&store, &make_user("u2", Tier::Premium, true)).unwrap();
    UserStore::upsert(&store, &make_user("u3", Tier::Free, true)).unwrap();

    assert_eq!(UserStore::list_all(&store).unwrap().len(), 3);
    let free = store.list_by_tier(Tier::Free).unwrap();
    assert_eq!(free.len(), 2);
    let at_risk = store.list_at_risk().unwrap();
    assert_eq!(at_risk.len(), 2);
    assert!(at_risk.iter().all(|u| u.at_risk));
}

#[test]
fn device_upsert_is_idempotent_per_user_token() {
    let (_dir, store) = setup();
    let device = make_device("u1", "ExponentPushToken[aaa]");
    DeviceStore::upsert(&store, &device).unwrap();
    DeviceStore::upsert(&store, &device).unwrap();

    let active = store.list_active("u1").unwrap();
    assert_eq!(active.len(), 1);
}

#[test]
fn device_deactivate_keeps_row() {
    let (_dir, store) = setup();
    let device = make_device("u1", "ExponentPushToken[aaa]");
    DeviceStore::upsert(&store, &device).unwrap();

    assert!(store.deactivate("u1", "ExponentPushToken[aaa]").unwrap());
    assert!(store.list_active("u1").unwrap().is_empty());

    // Re-registering the same token reactivates it.
    DeviceStore::upsert(&store, &device).unwrap();
    assert_eq!(store.list_active("u1").unwrap().len(), 1);
}

#[test]
fn device_token_moves_between_users_on_reinstall() {
    let (_dir, store) = setup();
    let token = "ExponentPushToken[shared]";
    DeviceStore::upsert(&store, &make_device("u1", token)).unwrap();
    DeviceStore::upsert(&store, &make_device("u2", token)).unwrap();

    assert!(store.list_active("u1").unwrap().is_empty());
    assert_eq!(store.list_active("u2").unwrap().len(), 1);
}

#[test]
fn preference_roundtrip_with_conditions() {
    let (_dir, store) = setup();
    let mut conditions = HashMap::new();
    conditions.insert("mood".to_string(), ConditionValue::Number(3.0));
    conditions.insert("raining".to_string(), ConditionValue::Bool(true));

    let pref = Preference {
        notification_type: "mood_reminder".to_string(),
        category: Category::Reminder,
        enabled: true,
        frequency: Frequency::Daily,
        time: Some("20:00".to_string()),
        conditions,
    };
    PreferenceStore::upsert(&store, "u1", &pref).unwrap();

    let loaded = PreferenceStore::get(&store, "u1", "mood_reminder")
        .unwrap()
        .expect("preference should exist");
    assert_eq!(loaded.category, Category::Reminder);
    assert_eq!(loaded.time.as_deref(), Some("20:00"));
    assert_eq!(loaded.conditions["mood"], ConditionValue::Number(3.0));

    assert!(PreferenceStore::get(&store, "u1", "unknown").unwrap().is_none());
}

#[test]
fn global_settings_default_when_missing() {
    let (_dir, store) = setup();
    let settings = store.global_settings("nobody").unwrap();
    assert!(settings.enabled);
    assert_eq!(settings.max_per_day, 10);

    let mut custom = GlobalSettings::default();
    custom.enabled = false;
    custom.max_per_day = 3;
    store.set_global_settings("u1", &custom).unwrap();
    let loaded = store.global_settings("u1").unwrap();
    assert!(!loaded.enabled);
    assert_eq!(loaded.max_per_day, 3);
    assert_eq!(loaded.quiet_hours, custom.quiet_hours);
}

#[test]
fn reminder_time_lookup_matches_exact_minute() {
    let (_dir, store) = setup();
    let pref = Preference {
        notification_type: "sleep_reminder".to_string(),
        category: Category::Reminder,
        enabled: true,
        frequency: Frequency::Daily,
        time: Some("21:30".to_string()),
        conditions: HashMap::new(),
    };
    PreferenceStore::upsert(&store, "u1", &pref).unwrap();

    let mut disabled = pref.clone();
    disabled.enabled = false;
    PreferenceStore::upsert(&store, "u2", &disabled).unwrap();

    let matches = store.users_with_reminder_at("21:30").unwrap();
    assert_eq!(matches, vec![("u1".to_string(), "sleep_reminder".to_string())]);
    assert!(store.users_with_reminder_at("21:31").unwrap().is_empty());
}

#[test]
fn daily_cap_counts_only_sent_records() {
    let (_dir, store) = setup();
    let midnight = Utc::now() - Duration::hours(1);
    NotificationStore::create(&store, &make_record("u1", "mood_reminder", true, 10)).unwrap();
    NotificationStore::create(&store, &make_record("u1", "sleep_reminder", true, 20)).unwrap();
    NotificationStore::create(&store, &make_record("u1", "weekly_summary", false, 30)).unwrap();
    NotificationStore::create(&store, &make_record("u2", "mood_reminder", true, 10)).unwrap();

    assert_eq!(store.count_sent_since("u1", midnight).unwrap(), 2);
}

#[test]
fn type_dedup_lookup_uses_created_at() {
    let (_dir, store) = setup();
    NotificationStore::create(&store, &make_record("u1", "mood_reminder", false, 10)).unwrap();

    let since = Utc::now() - Duration::hours(1);
    assert!(store.exists_type_since("u1", "mood_reminder", since).unwrap());
    assert!(!store.exists_type_since("u1", "sleep_reminder", since).unwrap());
    assert!(!store.exists_type_since("u2", "mood_reminder", since).unwrap());
}

#[test]
fn cleanup_purges_only_old_records() {
    let (_dir, store) = setup();
    NotificationStore::create(&store, &make_record("u1", "mood_reminder", true, 40 * 24 * 3600))
        .unwrap();
    NotificationStore::create(&store, &make_record("u1", "mood_reminder", true, 10)).unwrap();

    let removed = store.cleanup_older_than(30).unwrap();
    assert_eq!(removed, 1);

    let since = Utc::now() - Duration::days(60);
    assert_eq!(store.count_sent_since("u1", since).unwrap(), 1);
}

#[test]
fn scheduled_rows_fire_once() {
    let (_dir, store) = setup();
    let now = Utc::now();
    let sn = ScheduledNotification {
        id: "sn-1".to_string(),
        user_id: "u1".to_string(),
        template_id: "mood_reminder".to_string(),
        scheduled_for: now - Duration::minutes(5),
        sent: false,
        sent_at: None,
    };
    ScheduledStore::create(&store, &sn).unwrap();

    let future = ScheduledNotification {
        id: "sn-2".to_string(),
        scheduled_for: now + Duration::hours(1),
        ..sn.clone()
    };
    ScheduledStore::create(&store, &future).unwrap();

    let due = store.list_due(now).unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id, "sn-1");

    assert!(store.mark_sent("sn-1", Some(now)).unwrap());
    // Already sent: the transition never repeats or reverts.
    assert!(!store.mark_sent("sn-1", None).unwrap());
    assert!(store.list_due(now).unwrap().is_empty());
}

#[test]
fn checkin_context_queries() {
    let (_dir, store) = setup();
    let now = Utc::now();
    store.record_checkin("u1", 2, now - Duration::hours(2)).unwrap();
    store.record_checkin("u1", 4, now - Duration::minutes(5)).unwrap();

    let midnight = now - Duration::hours(12);
    assert!(store.has_checkin_since("u1", midnight).unwrap());
    assert!(!store.has_checkin_since("u2", midnight).unwrap());
    assert_eq!(store.latest_mood("u1").unwrap(), Some(4));
    assert_eq!(store.latest_mood("u2").unwrap(), None);
}
