use crate::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use wellmind_common::types::{Category, ConditionValue, Frequency, Preference, Priority};

/// A named, versionless message blueprint. `title` and `body` may
/// contain `${key}` placeholder tokens resolved against the send
/// context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub title: String,
    pub body: String,
    /// Opaque payload delivered alongside the push (deep-link route etc.).
    pub data: serde_json::Value,
    pub sound: Option<String>,
    pub priority: Priority,
    pub category: Category,
}

/// Immutable registry of notification templates and the per-type
/// preference defaults, built once at process start and injected
/// everywhere. Read-only afterwards, so it needs no synchronization.
pub struct TemplateCatalog {
    templates: HashMap<String, Template>,
    defaults: HashMap<String, Preference>,
}

impl TemplateCatalog {
    pub fn get(&self, id: &str) -> Option<&Template> {
        self.templates.get(id)
    }

    /// The catalog default used to lazily create a preference row on
    /// first read. `None` means the notification type is unknown and
    /// must never be sent.
    pub fn default_preference(&self, notification_type: &str) -> Option<&Preference> {
        self.defaults.get(notification_type)
    }

    pub fn template_ids(&self) -> Vec<&str> {
        self.templates.keys().map(|s| s.as_str()).collect()
    }

    /// The built-in catalog. Template ids double as notification type
    /// identifiers; every template has a matching preference default.
    pub fn builtin() -> Self {
        let mut catalog = Self {
            templates: HashMap::new(),
            defaults: HashMap::new(),
        };

        // Daily reminders (time-matched by the reminder matcher)
        catalog.add(
            Template {
                id: "mood_reminder".into(),
                name: "Mood check-in reminder".into(),
                title: "How are you feeling, ${userName}?".into(),
                body: "Take a moment to log your mood today.".into(),
                data: serde_json::json!({"route": "/mood/new"}),
                sound: Some("default".into()),
                priority: Priority::Normal,
                category: Category::Reminder,
            },
            default_pref(Category::Reminder, true, Frequency::Daily, Some("20:00"), &[]),
        );
        catalog.add(
            Template {
                id: "sleep_reminder".into(),
                name: "Sleep log reminder".into(),
                title: "Sleep check".into(),
                body: "${userName}, don't forget to log last night's sleep.".into(),
                data: serde_json::json!({"route": "/sleep/new"}),
                sound: Some("default".into()),
                priority: Priority::Normal,
                category: Category::Reminder,
            },
            default_pref(Category::Reminder, true, Frequency::Daily, Some("21:30"), &[]),
        );
        catalog.add(
            Template {
                id: "journal_reminder".into(),
                name: "Journal reminder".into(),
                title: "Evening reflection".into(),
                body: "A few lines in your journal can go a long way, ${userName}.".into(),
                data: serde_json::json!({"route": "/journal/new"}),
                sound: Some("default".into()),
                priority: Priority::Normal,
                category: Category::Reminder,
            },
            default_pref(Category::Reminder, true, Frequency::Daily, Some("21:00"), &[]),
        );
        catalog.add(
            Template {
                id: "energy_reminder".into(),
                name: "Energy level reminder".into(),
                title: "Energy check".into(),
                body: "How's your energy this afternoon? Log it in a tap.".into(),
                data: serde_json::json!({"route": "/energy/new"}),
                sound: None,
                priority: Priority::Normal,
                category: Category::Reminder,
            },
            default_pref(Category::Reminder, false, Frequency::Daily, Some("14:00"), &[]),
        );
        catalog.add(
            Template {
                id: "focus_reminder".into(),
                name: "Focus session reminder".into(),
                title: "Ready to focus?".into(),
                body: "Start a focus session and make the morning count.".into(),
                data: serde_json::json!({"route": "/focus"}),
                sound: None,
                priority: Priority::Normal,
                category: Category::Reminder,
            },
            default_pref(Category::Reminder, false, Frequency::Daily, Some("09:00"), &[]),
        );
        catalog.add(
            Template {
                id: "hydration_reminder".into(),
                name: "Hydration reminder".into(),
                title: "Water break".into(),
                body: "Time for a glass of water, ${userName}.".into(),
                data: serde_json::json!({"route": "/home"}),
                sound: None,
                priority: Priority::Normal,
                category: Category::Reminder,
            },
            default_pref(Category::Reminder, false, Frequency::Daily, Some("11:00"), &[]),
        );

        // Behavioral interventions
        catalog.add(
            Template {
                id: "checkin_nudge".into(),
                name: "Missed check-in nudge".into(),
                title: "We missed you today".into(),
                body: "${userName}, you haven't checked in yet. How is your day going?".into(),
                data: serde_json::json!({"route": "/mood/new"}),
                sound: Some("default".into()),
                priority: Priority::Normal,
                category: Category::Intervention,
            },
            default_pref(Category::Intervention, true, Frequency::AsNeeded, None, &[]),
        );
        catalog.add(
            Template {
                id: "bedtime_winddown".into(),
                name: "Bedtime wind-down".into(),
                title: "Wind down".into(),
                body: "Screens off soon? A calm evening helps you sleep better.".into(),
                data: serde_json::json!({"route": "/sleep/tips"}),
                sound: None,
                priority: Priority::Normal,
                category: Category::Intervention,
            },
            default_pref(
                Category::Intervention,
                true,
                Frequency::Daily,
                Some("22:00"),
                &[("sleep_goal_enabled", ConditionValue::Bool(true))],
            ),
        );

        // Achievements and goals
        catalog.add(
            Template {
                id: "daily_streak".into(),
                name: "Check-in streak".into(),
                title: "${streak}-day streak!".into(),
                body: "Amazing, ${userName} — you've checked in ${streak} days in a row.".into(),
                data: serde_json::json!({"route": "/achievements"}),
                sound: Some("default".into()),
                priority: Priority::Normal,
                category: Category::Achievement,
            },
            default_pref(
                Category::Achievement,
                true,
                Frequency::AsNeeded,
                None,
                &[("streak", ConditionValue::Number(3.0))],
            ),
        );
        catalog.add(
            Template {
                id: "goal_progress".into(),
                name: "Goal progress nudge".into(),
                title: "Goal check".into(),
                body: "You're at ${goal_completion}% of your weekly goal. Keep going!".into(),
                data: serde_json::json!({"route": "/goals"}),
                sound: None,
                priority: Priority::Normal,
                category: Category::Goal,
            },
            default_pref(
                Category::Goal,
                true,
                Frequency::Weekly,
                None,
                &[("goal_completion", ConditionValue::Number(25.0))],
            ),
        );

        // Digests
        catalog.add(
            Template {
                id: "weekly_summary".into(),
                name: "Weekly summary".into(),
                title: "Your week in review".into(),
                body: "${userName}, your weekly wellbeing summary is ready.".into(),
                data: serde_json::json!({"route": "/insights/weekly"}),
                sound: None,
                priority: Priority::Normal,
                category: Category::Summary,
            },
            default_pref(Category::Summary, true, Frequency::Weekly, None, &[]),
        );
        catalog.add(
            Template {
                id: "monthly_insights".into(),
                name: "Monthly insights".into(),
                title: "New monthly insights".into(),
                body: "See what shaped your mood over the last month.".into(),
                data: serde_json::json!({"route": "/insights/monthly"}),
                sound: None,
                priority: Priority::Normal,
                category: Category::Insight,
            },
            default_pref(Category::Insight, true, Frequency::Monthly, None, &[]),
        );

        // Location-based tips default to high priority.
        catalog.add(
            Template {
                id: "location_tip".into(),
                name: "Nearby wellbeing tip".into(),
                title: "A good moment to step out".into(),
                body: "The weather near you looks great — a short walk could lift your mood."
                    .into(),
                data: serde_json::json!({"route": "/tips/outdoor"}),
                sound: None,
                priority: Priority::High,
                category: Category::Insight,
            },
            default_pref(
                Category::Insight,
                true,
                Frequency::AsNeeded,
                None,
                &[("good_weather", ConditionValue::Bool(true))],
            ),
        );

        // Crisis support defaults to high priority.
        catalog.add(
            Template {
                id: "crisis_support".into(),
                name: "Wellbeing check-in".into(),
                title: "Checking in on you".into(),
                body: "${userName}, we're here for you. Would you like to talk to someone?".into(),
                data: serde_json::json!({"route": "/support"}),
                sound: Some("default".into()),
                priority: Priority::High,
                category: Category::Support,
            },
            default_pref(Category::Support, true, Frequency::AsNeeded, None, &[]),
        );

        // Upgrade nudges are opt-in: disabled until the user turns the
        // promotion category on.
        catalog.add(
            Template {
                id: "subscription_upgrade".into(),
                name: "Premium upgrade nudge".into(),
                title: "Unlock deeper insights".into(),
                body: "Go premium for trends, correlations, and unlimited history.".into(),
                data: serde_json::json!({"route": "/subscribe"}),
                sound: None,
                priority: Priority::Normal,
                category: Category::Promotion,
            },
            default_pref(
                Category::Promotion,
                false,
                Frequency::Weekly,
                None,
                &[("days_active", ConditionValue::Number(14.0))],
            ),
        );

        catalog
    }

    fn add(&mut self, template: Template, mut default: Preference) {
        default.notification_type = template.id.clone();
        self.defaults.insert(template.id.clone(), default);
        self.templates.insert(template.id.clone(), template);
    }
}

fn default_pref(
    category: Category,
    enabled: bool,
    frequency: Frequency,
    time: Option<&str>,
    conditions: &[(&str, ConditionValue)],
) -> Preference {
    Preference {
        notification_type: String::new(), // filled in by `add`
        category,
        enabled,
        frequency,
        time: time.map(str::to_string),
        conditions: conditions
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect(),
    }
}

/// Replace every `${key}` token with the stringified context value.
/// An unknown key leaves the token literal — a documented fallback,
/// not an error.
///
/// # Examples
///
/// ```
/// use wellmind_notify::catalog::interpolate;
/// use wellmind_notify::Context;
///
/// let mut ctx = Context::new();
/// ctx.insert("name".into(), serde_json::json!("Ana"));
/// assert_eq!(interpolate("Hi ${name}", &ctx), "Hi Ana");
/// assert_eq!(interpolate("Hi ${missing}", &ctx), "Hi ${missing}");
/// ```
pub fn interpolate(text: &str, context: &Context) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match context.get(key) {
                    Some(value) => out.push_str(&stringify(value)),
                    None => {
                        out.push_str("${");
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                // Unterminated token: keep the remainder verbatim.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn stringify(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
