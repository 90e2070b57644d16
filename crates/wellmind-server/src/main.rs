use anyhow::Result;
use chrono::Weekday;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use wellmind_notify::catalog::TemplateCatalog;
use wellmind_notify::dispatcher::Dispatcher;
use wellmind_notify::eligibility::EligibilityEngine;
use wellmind_notify::gateway::HttpPushGateway;
use wellmind_notify::reminder::ReminderMatcher;
use wellmind_server::app;
use wellmind_server::config::ServerConfig;
use wellmind_server::jobs::{
    CleanupNotificationsJob, CrisisCheckJob, GoalRemindersJob, MonthlyInsightsJob,
    ProcessScheduledJob, SendContextualJob, SendRemindersJob, SubscriptionRemindersJob,
    WeeklySummaryJob,
};
use wellmind_server::scheduler::{JobRegistry, Schedule};
use wellmind_server::state::AppState;
use wellmind_storage::sqlite::SqliteStore;
use wellmind_storage::{
    ContextStore, DeviceStore, NotificationStore, PreferenceStore, ScheduledStore, UserStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("wellmind=info".parse()?))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/server.toml".to_string());
    let config = if Path::new(&config_path).exists() {
        ServerConfig::load(&config_path)?
    } else {
        tracing::info!(path = %config_path, "no config file found, using defaults");
        ServerConfig::default()
    };

    wellmind_common::id::init(config.scheduler.machine_id, config.scheduler.node_id);

    tracing::info!(
        http_port = config.http.port,
        db = %config.database.path,
        "wellmind-server starting"
    );

    if let Some(dir) = Path::new(&config.database.path).parent() {
        std::fs::create_dir_all(dir)?;
    }
    let store = Arc::new(SqliteStore::open(Path::new(&config.database.path))?);

    let users: Arc<dyn UserStore> = store.clone();
    let devices: Arc<dyn DeviceStore> = store.clone();
    let prefs: Arc<dyn PreferenceStore> = store.clone();
    let history: Arc<dyn NotificationStore> = store.clone();
    let scheduled: Arc<dyn ScheduledStore> = store.clone();
    let checkins: Arc<dyn ContextStore> = store.clone();

    let catalog = Arc::new(TemplateCatalog::builtin());
    let gateway = Arc::new(HttpPushGateway::new(
        &config.gateway.url,
        config.gateway.timeout_secs,
        config.gateway.max_batch_size,
    )?);
    let eligibility = Arc::new(EligibilityEngine::new(
        prefs.clone(),
        history.clone(),
        catalog.clone(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        users.clone(),
        devices.clone(),
        history.clone(),
        gateway,
        catalog.clone(),
    ));
    let matcher = Arc::new(ReminderMatcher::new(
        prefs.clone(),
        eligibility.clone(),
        dispatcher.clone(),
    ));

    let mut registry = JobRegistry::new(config.scheduler.tick_secs);
    registry.register(
        "process-scheduled",
        Schedule::EveryMinute,
        Arc::new(ProcessScheduledJob {
            scheduled: scheduled.clone(),
            dispatcher: dispatcher.clone(),
        }),
    )?;
    registry.register(
        "send-reminders",
        Schedule::EveryMinute,
        Arc::new(SendRemindersJob { matcher }),
    )?;
    registry.register(
        "send-contextual",
        Schedule::EveryMinutes(5),
        Arc::new(SendContextualJob {
            users: users.clone(),
            checkins,
            eligibility: eligibility.clone(),
            dispatcher: dispatcher.clone(),
        }),
    )?;
    registry.register(
        "weekly-summary",
        Schedule::Weekly {
            weekday: Weekday::Mon,
            hour: 10,
            minute: 0,
        },
        Arc::new(WeeklySummaryJob {
            users: users.clone(),
            history: history.clone(),
            eligibility: eligibility.clone(),
            dispatcher: dispatcher.clone(),
        }),
    )?;
    registry.register(
        "monthly-insights",
        Schedule::Monthly {
            day: 1,
            hour: 9,
            minute: 0,
        },
        Arc::new(MonthlyInsightsJob {
            users: users.clone(),
            eligibility: eligibility.clone(),
            dispatcher: dispatcher.clone(),
        }),
    )?;
    registry.register(
        "cleanup-notifications",
        Schedule::Daily { hour: 2, minute: 0 },
        Arc::new(CleanupNotificationsJob {
            history: history.clone(),
            retention_days: config.scheduler.retention_days,
        }),
    )?;
    registry.register(
        "subscription-reminders",
        Schedule::Weekly {
            weekday: Weekday::Fri,
            hour: 15,
            minute: 0,
        },
        Arc::new(SubscriptionRemindersJob {
            users: users.clone(),
            eligibility: eligibility.clone(),
            dispatcher: dispatcher.clone(),
        }),
    )?;
    registry.register(
        "goal-reminders",
        Schedule::Weekly {
            weekday: Weekday::Tue,
            hour: 11,
            minute: 0,
        },
        Arc::new(GoalRemindersJob {
            users: users.clone(),
            eligibility: eligibility.clone(),
            dispatcher: dispatcher.clone(),
        }),
    )?;
    registry.register(
        "crisis-check",
        Schedule::Daily {
            hour: 18,
            minute: 0,
        },
        Arc::new(CrisisCheckJob {
            users,
            eligibility,
            dispatcher,
        }),
    )?;

    let registry = Arc::new(registry);
    registry.start();

    let http_addr = SocketAddr::from(([0, 0, 0, 0], config.http.port));
    let http_listener = tokio::net::TcpListener::bind(http_addr).await?;
    let http_app = app::build_http_app(AppState::new(registry.clone()));

    tracing::info!(http = %http_addr, "server started");

    axum::serve(http_listener, http_app)
        .with_graceful_shutdown(async {
            signal::ctrl_c().await.ok();
        })
        .await?;

    tracing::info!("shutting down gracefully");
    registry.stop();
    Ok(())
}
