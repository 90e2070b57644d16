use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{interval, Duration};

/// When a job fires, evaluated at minute granularity. The scheduler
/// ticks once per minute and asks every schedule whether the current
/// minute matches; there is no persisted next-fire time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    EveryMinute,
    EveryMinutes(u32),
    Daily { hour: u32, minute: u32 },
    Weekly { weekday: Weekday, hour: u32, minute: u32 },
    Monthly { day: u32, hour: u32, minute: u32 },
}

impl Schedule {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match *self {
            Schedule::EveryMinute => true,
            Schedule::EveryMinutes(n) => {
                let minute_of_day = now.hour() * 60 + now.minute();
                minute_of_day % n.max(1) == 0
            }
            Schedule::Daily { hour, minute } => now.hour() == hour && now.minute() == minute,
            Schedule::Weekly {
                weekday,
                hour,
                minute,
            } => now.weekday() == weekday && now.hour() == hour && now.minute() == minute,
            Schedule::Monthly { day, hour, minute } => {
                now.day() == day && now.hour() == hour && now.minute() == minute
            }
        }
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Schedule::EveryMinute => write!(f, "every minute"),
            Schedule::EveryMinutes(n) => write!(f, "every {n} minutes"),
            Schedule::Daily { hour, minute } => write!(f, "daily at {hour:02}:{minute:02}"),
            Schedule::Weekly {
                weekday,
                hour,
                minute,
            } => write!(f, "{weekday} at {hour:02}:{minute:02}"),
            Schedule::Monthly { day, hour, minute } => {
                write!(f, "day {day} of month at {hour:02}:{minute:02}")
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("job '{0}' is already registered")]
    DuplicateJob(String),
    #[error("no job named '{0}'")]
    UnknownJob(String),
}

/// One unit of recurring work. Handlers own their dependencies and
/// must swallow per-item failures internally; an `Err` from `run`
/// means the whole cycle failed and is counted against the job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, now: DateTime<Utc>) -> Result<()>;
}

struct Job {
    name: String,
    schedule: Schedule,
    handler: Arc<dyn JobHandler>,
    running: AtomicBool,
    failures: AtomicU64,
    last_error: Mutex<Option<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub name: String,
    pub schedule: String,
    pub running: bool,
    pub failure_count: u64,
    pub last_error: Option<String>,
}

/// Holds the named jobs and drives them from a single 60s tick loop.
/// Register everything up front, wrap in `Arc`, then `start()`.
pub struct JobRegistry {
    jobs: Vec<Arc<Job>>,
    tick_secs: u64,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl JobRegistry {
    pub fn new(tick_secs: u64) -> Self {
        Self {
            jobs: Vec::new(),
            tick_secs: tick_secs.max(1),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn register(
        &mut self,
        name: &str,
        schedule: Schedule,
        handler: Arc<dyn JobHandler>,
    ) -> Result<(), SchedulerError> {
        if self.jobs.iter().any(|j| j.name == name) {
            return Err(SchedulerError::DuplicateJob(name.to_string()));
        }
        self.jobs.push(Arc::new(Job {
            name: name.to_string(),
            schedule,
            handler,
            running: AtomicBool::new(false),
            failures: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }));
        Ok(())
    }

    /// Spawns the tick loop. Idempotent: a second call warns and does
    /// nothing.
    pub fn start(self: &Arc<Self>) {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!("job scheduler already started");
            return;
        }

        tracing::info!(jobs = self.jobs.len(), tick_secs = self.tick_secs, "job scheduler started");

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = interval(Duration::from_secs(registry.tick_secs));
            // The first tick of `interval` fires immediately; consume
            // it so jobs only run at their scheduled minutes.
            tick.tick().await;
            loop {
                tick.tick().await;
                if registry.stopped.load(Ordering::SeqCst) {
                    tracing::info!("job scheduler stopped");
                    return;
                }
                let now = Utc::now();
                for job in &registry.jobs {
                    if job.schedule.is_due(now) {
                        tokio::spawn(Self::run_job(Arc::clone(job), now));
                    }
                }
            }
        });
    }

    /// Prevents future ticks. Handlers already in flight run to
    /// completion.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Runs a job immediately, regardless of its schedule. The same
    /// single-flight guard applies, so a job that is mid-run is
    /// skipped rather than re-entered.
    pub async fn trigger_job(&self, name: &str) -> Result<(), SchedulerError> {
        let job = self
            .jobs
            .iter()
            .find(|j| j.name == name)
            .ok_or_else(|| SchedulerError::UnknownJob(name.to_string()))?;
        Self::run_job(Arc::clone(job), Utc::now()).await;
        Ok(())
    }

    pub fn status(&self) -> Vec<JobStatus> {
        self.jobs
            .iter()
            .map(|job| JobStatus {
                name: job.name.clone(),
                schedule: job.schedule.to_string(),
                running: job.running.load(Ordering::SeqCst),
                failure_count: job.failures.load(Ordering::SeqCst),
                last_error: job.last_error.lock().unwrap_or_else(|e| e.into_inner()).clone(),
            })
            .collect()
    }

    async fn run_job(job: Arc<Job>, now: DateTime<Utc>) {
        if job
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!(job = %job.name, "previous run still in flight, skipping");
            return;
        }

        tracing::debug!(job = %job.name, "job cycle started");
        // The handler runs in its own task so a panic unwinds into the
        // JoinError instead of past the flag reset below.
        let handler = Arc::clone(&job.handler);
        let outcome = tokio::spawn(async move { handler.run(now).await }).await;
        match outcome {
            Ok(Ok(())) => {
                *job.last_error.lock().unwrap_or_else(|e| e.into_inner()) = None;
            }
            Ok(Err(e)) => {
                job.failures.fetch_add(1, Ordering::SeqCst);
                *job.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(e.to_string());
                tracing::error!(job = %job.name, error = %e, "job cycle failed");
            }
            Err(e) => {
                job.failures.fetch_add(1, Ordering::SeqCst);
                *job.last_error.lock().unwrap_or_else(|e| e.into_inner()) =
                    Some(format!("handler panicked: {e}"));
                tracing::error!(job = %job.name, error = %e, "job cycle panicked");
            }
        }
        job.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::AtomicU32;

    fn at(weekday_date: (i32, u32, u32), hour: u32, minute: u32) -> DateTime<Utc> {
        let (y, m, d) = weekday_date;
        Utc.with_ymd_and_hms(y, m, d, hour, minute, 0).unwrap()
    }

    #[test]
    fn every_minute_always_fires() {
        assert!(Schedule::EveryMinute.is_due(at((2024, 6, 12), 3, 41)));
    }

    #[test]
    fn every_n_minutes_fires_on_multiples() {
        let s = Schedule::EveryMinutes(5);
        assert!(s.is_due(at((2024, 6, 12), 10, 0)));
        assert!(s.is_due(at((2024, 6, 12), 10, 5)));
        assert!(!s.is_due(at((2024, 6, 12), 10, 7)));
    }

    #[test]
    fn daily_fires_once() {
        let s = Schedule::Daily { hour: 2, minute: 0 };
        assert!(s.is_due(at((2024, 6, 12), 2, 0)));
        assert!(!s.is_due(at((2024, 6, 12), 2, 1)));
        assert!(!s.is_due(at((2024, 6, 12), 14, 0)));
    }

    #[test]
    fn weekly_checks_the_weekday() {
        let s = Schedule::Weekly {
            weekday: Weekday::Mon,
            hour: 10,
            minute: 0,
        };
        // 2024-06-10 is a Monday, 2024-06-12 a Wednesday.
        assert!(s.is_due(at((2024, 6, 10), 10, 0)));
        assert!(!s.is_due(at((2024, 6, 12), 10, 0)));
    }

    #[test]
    fn monthly_checks_day_of_month() {
        let s = Schedule::Monthly {
            day: 1,
            hour: 9,
            minute: 0,
        };
        assert!(s.is_due(at((2024, 6, 1), 9, 0)));
        assert!(!s.is_due(at((2024, 6, 2), 9, 0)));
    }

    #[test]
    fn schedule_display_is_readable() {
        assert_eq!(Schedule::EveryMinute.to_string(), "every minute");
        assert_eq!(
            Schedule::Daily { hour: 2, minute: 0 }.to_string(),
            "daily at 02:00"
        );
        assert_eq!(
            Schedule::Weekly {
                weekday: Weekday::Fri,
                hour: 15,
                minute: 0
            }
            .to_string(),
            "Fri at 15:00"
        );
    }

    struct CountingJob {
        runs: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl JobHandler for CountingJob {
        async fn run(&self, _now: DateTime<Utc>) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("boom");
            }
            Ok(())
        }
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let handler = Arc::new(CountingJob {
            runs: AtomicU32::new(0),
            fail: false,
        });
        let mut registry = JobRegistry::new(60);
        registry
            .register("a", Schedule::EveryMinute, handler.clone())
            .unwrap();
        let err = registry
            .register("a", Schedule::EveryMinute, handler)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateJob(_)));
    }

    #[tokio::test]
    async fn trigger_unknown_job_errors() {
        let registry = Arc::new(JobRegistry::new(60));
        let err = registry.trigger_job("nope").await.unwrap_err();
        assert!(matches!(err, SchedulerError::UnknownJob(_)));
    }

    #[tokio::test]
    async fn trigger_runs_handler_and_counts_failures() {
        let handler = Arc::new(CountingJob {
            runs: AtomicU32::new(0),
            fail: true,
        });
        let mut registry = JobRegistry::new(60);
        registry
            .register("failing", Schedule::Daily { hour: 2, minute: 0 }, handler.clone())
            .unwrap();
        let registry = Arc::new(registry);

        registry.trigger_job("failing").await.unwrap();
        registry.trigger_job("failing").await.unwrap();

        assert_eq!(handler.runs.load(Ordering::SeqCst), 2);
        let statuses = registry.status();
        let status = &statuses[0];
        assert_eq!(status.failure_count, 2);
        assert_eq!(status.last_error.as_deref(), Some("boom"));
        assert!(!status.running);
    }

    struct PanickingJob;

    #[async_trait]
    impl JobHandler for PanickingJob {
        async fn run(&self, _now: DateTime<Utc>) -> Result<()> {
            panic!("kaboom");
        }
    }

    #[tokio::test]
    async fn handler_panic_is_counted_and_releases_the_job() {
        let mut registry = JobRegistry::new(60);
        registry
            .register("explosive", Schedule::EveryMinute, Arc::new(PanickingJob))
            .unwrap();
        let registry = Arc::new(registry);

        registry.trigger_job("explosive").await.unwrap();

        let statuses = registry.status();
        assert!(!statuses[0].running, "flag must clear after a panic");
        assert_eq!(statuses[0].failure_count, 1);
        assert!(statuses[0]
            .last_error
            .as_deref()
            .unwrap()
            .contains("panicked"));

        // The job stays runnable.
        registry.trigger_job("explosive").await.unwrap();
        assert_eq!(registry.status()[0].failure_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_a_noop() {
        let handler = Arc::new(CountingJob {
            runs: AtomicU32::new(0),
            fail: false,
        });
        let mut registry = JobRegistry::new(60);
        registry
            .register("tick", Schedule::EveryMinute, handler.clone())
            .unwrap();
        let registry = Arc::new(registry);

        registry.start();
        registry.start();
        tokio::task::yield_now().await;

        // Three scheduler minutes: a double loop would double the runs.
        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(60)).await;
            for _ in 0..4 {
                tokio::task::yield_now().await;
            }
        }
        assert_eq!(handler.runs.load(Ordering::SeqCst), 3);
    }

    struct BlockingJob {
        runs: AtomicU32,
        release: tokio::sync::Semaphore,
    }

    #[async_trait]
    impl JobHandler for BlockingJob {
        async fn run(&self, _now: DateTime<Utc>) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let _permit = self.release.acquire().await?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn running_job_is_skipped_not_reentered() {
        let handler = Arc::new(BlockingJob {
            runs: AtomicU32::new(0),
            release: tokio::sync::Semaphore::new(0),
        });
        let mut registry = JobRegistry::new(60);
        registry
            .register("slow", Schedule::EveryMinute, handler.clone())
            .unwrap();
        let registry = Arc::new(registry);

        let first = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.trigger_job("slow").await })
        };
        // Wait for the first run to park on the semaphore.
        while handler.runs.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        assert!(registry.status()[0].running);

        // Second trigger must be skipped by the single-flight guard.
        registry.trigger_job("slow").await.unwrap();
        assert_eq!(handler.runs.load(Ordering::SeqCst), 1);

        handler.release.add_permits(1);
        first.await.unwrap().unwrap();
        assert!(!registry.status()[0].running);
    }
}
