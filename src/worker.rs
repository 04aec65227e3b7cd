//! # Dispatch Worker
//!
//! The polling loop at the heart of the engine. Each tick selects due
//! jobs, resolves their recipients, renders and dispatches one message
//! per recipient, then atomically records the execution and advances the
//! job's scheduling state per the retry state machine.
//!
//! The deployment contract is a single worker per job store; nothing
//! here takes a lease on selected jobs.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use rand::Rng;
use sea_orm::DatabaseConnection;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::mail::{DispatchGateway, DispatchOutcome, TemplateRenderer};
use crate::models::{job, ExecutionOutcome, JobStatus};
use crate::recipients::RecipientResolver;
use crate::repositories::{ExecutionDraft, JobRepository, JobUpdate};
use crate::schedule::{compute_next_run, Schedule};

/// Error summaries are truncated before persisting.
const MAX_ERROR_SUMMARY: usize = 512;

/// Counters for one tick, surfaced to logs and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickStats {
    pub selected: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub dead_lettered: usize,
    pub store_errors: usize,
}

/// Per-job result of resolving and dispatching to every recipient.
#[derive(Debug, Default)]
struct DispatchReport {
    attempted: i32,
    succeeded: i32,
    failed: i32,
    resolution_failed: bool,
    first_error: Option<String>,
}

pub struct Worker {
    jobs: JobRepository,
    resolver: Arc<dyn RecipientResolver>,
    gateway: Arc<dyn DispatchGateway>,
    renderer: Arc<dyn TemplateRenderer>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        db: DatabaseConnection,
        resolver: Arc<dyn RecipientResolver>,
        gateway: Arc<dyn DispatchGateway>,
        renderer: Arc<dyn TemplateRenderer>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            jobs: JobRepository::new(db),
            resolver,
            gateway,
            renderer,
            config,
        }
    }

    /// Poll until the cancellation token fires. Each cycle runs a full
    /// tick and then sleeps for the configured interval.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            tick_interval_seconds = self.config.tick_interval_seconds,
            batch_size = self.config.batch_size,
            "Worker started"
        );

        loop {
            self.run_once().await;

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Worker shutting down");
                    break;
                }
                _ = sleep(Duration::from_secs(self.config.tick_interval_seconds)) => {}
            }
        }
    }

    /// One tick against the wall clock. Store errors are logged, never
    /// fatal to the loop.
    pub async fn run_once(&self) {
        let started = Instant::now();
        match self.tick(Utc::now()).await {
            Ok(stats) => {
                if stats.selected > 0 {
                    info!(
                        selected = stats.selected,
                        succeeded = stats.succeeded,
                        failed = stats.failed,
                        dead_lettered = stats.dead_lettered,
                        store_errors = stats.store_errors,
                        "Tick complete"
                    );
                } else {
                    debug!("Tick complete, no due jobs");
                }
            }
            Err(err) => {
                error!(error = %err, "Tick failed to select due jobs");
            }
        }
        histogram!("autobulk_tick_duration_seconds").record(started.elapsed().as_secs_f64());
    }

    /// Process every job due at `now`. Takes the clock explicitly so the
    /// scheduling math is deterministic under test.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickStats, crate::error::StoreError> {
        let due = self.jobs.select_due(now, self.config.batch_size).await?;

        let mut stats = TickStats {
            selected: due.len(),
            ..TickStats::default()
        };

        for job in due {
            let job_id = job.id;
            match self.process_job(&job, now).await {
                Ok(ExecutionOutcome::Success) => stats.succeeded += 1,
                Ok(ExecutionOutcome::Failure) => stats.failed += 1,
                Ok(ExecutionOutcome::DeadLetter) => stats.dead_lettered += 1,
                Err(err) => {
                    // The job's state was not advanced; the next tick
                    // selects it again without consuming a retry.
                    warn!(job_id = %job_id, error = %err, "Failed to finalize job cycle");
                    stats.store_errors += 1;
                }
            }
        }

        Ok(stats)
    }

    /// Run one dispatch cycle for one job and persist its outcome.
    async fn process_job(
        &self,
        job: &job::Model,
        now: DateTime<Utc>,
    ) -> Result<ExecutionOutcome, crate::error::StoreError> {
        let attempt_number = job.retry_counter + 1;
        let dispatch_started = Instant::now();
        let report = self.dispatch(job).await;
        // Dispatch can outlive the next cron instant; rescheduling from
        // the tick-start clock would leave the job immediately due again.
        let completed_at = now + dispatch_started.elapsed();

        let job_failed = report.resolution_failed
            || (report.failed > 0
                && f64::from(report.failed)
                    > f64::from(report.attempted) * self.config.failure_threshold);

        let (outcome, update) = if job_failed {
            let retry_counter = job.retry_counter + 1;
            if retry_counter > job.max_retries {
                warn!(
                    job_id = %job.id,
                    attempts = retry_counter,
                    "Retry budget exhausted, dead-lettering job"
                );
                (
                    ExecutionOutcome::DeadLetter,
                    JobUpdate {
                        status: JobStatus::DeadLetter,
                        next_run_at: None,
                        retry_counter,
                    },
                )
            } else {
                let delay = self.backoff_delay(retry_counter, job.backoff_base_seconds);
                debug!(
                    job_id = %job.id,
                    attempt = retry_counter,
                    delay_seconds = delay.as_secs(),
                    "Scheduling retry"
                );
                (
                    ExecutionOutcome::Failure,
                    JobUpdate {
                        status: JobStatus::Active,
                        next_run_at: Some(now + delay),
                        retry_counter,
                    },
                )
            }
        } else {
            (
                ExecutionOutcome::Success,
                JobUpdate {
                    status: JobStatus::Active,
                    next_run_at: self.next_after_success(job, completed_at),
                    retry_counter: 0,
                },
            )
        };

        let draft = ExecutionDraft {
            attempted_at: now,
            outcome,
            recipients_attempted: report.attempted,
            recipients_succeeded: report.succeeded,
            recipients_failed: report.failed,
            error_summary: report.first_error.map(truncate_summary),
            attempt_number,
        };

        self.jobs.finalize_execution(job.id, update, draft).await?;
        counter!("autobulk_executions_total", "outcome" => outcome.as_str()).increment(1);
        Ok(outcome)
    }

    /// Resolve recipients and send one rendered message to each, bounded
    /// by the configured concurrency.
    async fn dispatch(&self, job: &job::Model) -> DispatchReport {
        let recipients = match self.resolver.resolve(job).await {
            Ok(recipients) => recipients,
            Err(err) => {
                warn!(job_id = %job.id, error = %err, "Recipient resolution failed");
                return DispatchReport {
                    resolution_failed: true,
                    first_error: Some(err.to_string()),
                    ..DispatchReport::default()
                };
            }
        };

        let semaphore = Arc::new(Semaphore::new(self.config.dispatch_concurrency));
        let mut tasks = JoinSet::new();

        for recipient in recipients {
            let semaphore = Arc::clone(&semaphore);
            let renderer = Arc::clone(&self.renderer);
            let gateway = Arc::clone(&self.gateway);
            let template_ref = job.template_ref.clone();

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return Err("dispatch semaphore closed".to_string());
                };
                let message = renderer
                    .render(&template_ref, &recipient.attributes)
                    .map_err(|err| err.to_string())?;
                match gateway.send(&message, &recipient).await {
                    DispatchOutcome::Delivered => Ok(()),
                    DispatchOutcome::Rejected(reason) => {
                        Err(format!("{}: rejected: {reason}", recipient.email))
                    }
                    DispatchOutcome::TransientError(reason) => {
                        Err(format!("{}: transient error: {reason}", recipient.email))
                    }
                }
            });
        }

        let mut report = DispatchReport::default();
        while let Some(joined) = tasks.join_next().await {
            report.attempted += 1;
            match joined {
                Ok(Ok(())) => report.succeeded += 1,
                Ok(Err(reason)) => {
                    report.failed += 1;
                    report.first_error.get_or_insert(reason);
                }
                Err(join_err) => {
                    report.failed += 1;
                    report
                        .first_error
                        .get_or_insert_with(|| format!("dispatch task panicked: {join_err}"));
                }
            }
        }
        report
    }

    /// Next run after a successful cycle: recurring jobs recompute from
    /// the cycle's completion time (missed windows collapse into one run
    /// and the next run is always strictly in the future), one-shot jobs
    /// are done and get a null `next_run_at`.
    fn next_after_success(
        &self,
        job: &job::Model,
        completed_at: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if job.schedule_kind.is_one_shot() {
            return None;
        }
        let schedule = Schedule::for_job(
            job.schedule_kind,
            job.run_at.map(|t| t.with_timezone(&Utc)),
            job.cron_expr.as_deref(),
        );
        match schedule {
            Ok(schedule) => compute_next_run(&schedule, completed_at),
            Err(err) => {
                // Expressions are validated at creation, so this only
                // fires on hand-edited rows.
                error!(job_id = %job.id, error = %err, "Stored schedule no longer parses");
                None
            }
        }
    }

    /// Exponential backoff for retry `attempt` (1-based), capped at the
    /// configured maximum, with optional multiplicative jitter.
    fn backoff_delay(&self, attempt: i32, base_seconds: i64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(62) as u32;
        let raw = (base_seconds.max(1) as f64) * 2f64.powi(exponent as i32);
        let capped = raw.min(self.config.max_backoff_seconds as f64);

        let jittered = if self.config.jitter_factor > 0.0 {
            let spread: f64 = rand::thread_rng().gen_range(-1.0..=1.0);
            (capped * (1.0 + self.config.jitter_factor * spread)).max(1.0)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }
}

fn truncate_summary(mut summary: String) -> String {
    if summary.len() > MAX_ERROR_SUMMARY {
        let mut cut = MAX_ERROR_SUMMARY;
        while !summary.is_char_boundary(cut) {
            cut -= 1;
        }
        summary.truncate(cut);
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScheduleKind;

    fn worker_with(config: WorkerConfig) -> Worker {
        // The loop is never driven in these tests; a lazy connection
        // keeps construction synchronous.
        let db = DatabaseConnection::default();
        Worker::new(
            db,
            Arc::new(crate::recipients::CacheRecipientResolver::new("unused.csv")),
            Arc::new(crate::mail::default::LoggingDispatchGateway),
            Arc::new(crate::mail::default::BasicTemplateRenderer),
            config,
        )
    }

    fn test_config() -> WorkerConfig {
        WorkerConfig {
            tick_interval_seconds: 5,
            batch_size: 50,
            dispatch_concurrency: 8,
            failure_threshold: 0.0,
            max_backoff_seconds: 86_400,
            jitter_factor: 0.0,
        }
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let worker = worker_with(test_config());
        assert_eq!(worker.backoff_delay(1, 60), Duration::from_secs(60));
        assert_eq!(worker.backoff_delay(2, 60), Duration::from_secs(120));
        assert_eq!(worker.backoff_delay(3, 60), Duration::from_secs(240));
    }

    #[test]
    fn backoff_caps_at_configured_maximum() {
        let mut config = test_config();
        config.max_backoff_seconds = 600;
        let worker = worker_with(config);
        assert_eq!(worker.backoff_delay(10, 60), Duration::from_secs(600));
    }

    #[test]
    fn backoff_survives_huge_attempt_numbers() {
        let worker = worker_with(test_config());
        assert_eq!(worker.backoff_delay(i32::MAX, 60), Duration::from_secs(86_400));
    }

    #[test]
    fn jitter_stays_within_factor() {
        let mut config = test_config();
        config.jitter_factor = 0.25;
        let worker = worker_with(config);
        for _ in 0..100 {
            let delay = worker.backoff_delay(1, 100).as_secs_f64();
            assert!((75.0..=125.0).contains(&delay), "delay {delay} out of range");
        }
    }

    #[test]
    fn one_shot_jobs_have_no_next_run_after_success() {
        let worker = worker_with(test_config());
        let now = Utc::now();
        let job = job::Model {
            id: uuid::Uuid::new_v4(),
            name: "t".to_string(),
            template_ref: "t".to_string(),
            recipient_spec: serde_json::json!({"type": "static_list", "addresses": ["a@b.c"]}),
            schedule_kind: ScheduleKind::Delayed,
            run_at: Some(now.fixed_offset()),
            cron_expr: None,
            next_run_at: Some(now.fixed_offset()),
            status: JobStatus::Active,
            retry_counter: 0,
            max_retries: 3,
            backoff_base_seconds: 60,
            created_at: now.fixed_offset(),
            updated_at: now.fixed_offset(),
        };
        assert_eq!(worker.next_after_success(&job, now), None);
    }

    #[test]
    fn recurring_jobs_recompute_from_now() {
        let worker = worker_with(test_config());
        let now = Utc::now();
        let job = job::Model {
            id: uuid::Uuid::new_v4(),
            name: "t".to_string(),
            template_ref: "t".to_string(),
            recipient_spec: serde_json::json!({"type": "static_list", "addresses": ["a@b.c"]}),
            schedule_kind: ScheduleKind::Recurring,
            run_at: None,
            cron_expr: Some("*/5 * * * *".to_string()),
            next_run_at: Some(now.fixed_offset()),
            status: JobStatus::Active,
            retry_counter: 2,
            max_retries: 3,
            backoff_base_seconds: 60,
            created_at: now.fixed_offset(),
            updated_at: now.fixed_offset(),
        };
        let next = worker.next_after_success(&job, now).unwrap();
        assert!(next > now);
        assert!(next <= now + chrono::Duration::minutes(5));
    }

    #[test]
    fn error_summaries_are_truncated() {
        let long = "x".repeat(2_000);
        assert_eq!(truncate_summary(long).len(), MAX_ERROR_SUMMARY);
        assert_eq!(truncate_summary("short".to_string()), "short");
    }
}
