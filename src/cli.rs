//! # Command-Line Interface
//!
//! Administrative surface of the engine: create, list, and cancel jobs,
//! inspect a job's execution history, and run the dispatch worker.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use clap::{Parser, Subcommand};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::mail::default::{BasicTemplateRenderer, LoggingDispatchGateway};
use crate::models::{JobStatus, RecipientSpec, ScheduleKind};
use crate::recipients::CacheRecipientResolver;
use crate::repositories::{ExecutionRepository, JobDraft, JobRepository};
use crate::worker::Worker;

#[derive(Debug, Parser)]
#[command(name = "autobulk", version, about = "Scheduled bulk email dispatch engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the polling dispatch worker
    Worker {
        /// Override the configured poll interval, in seconds
        #[arg(long)]
        poll_interval: Option<u64>,

        /// Run exactly one tick and exit
        #[arg(long)]
        run_once: bool,
    },

    /// Manage dispatch jobs
    #[command(subcommand)]
    Job(JobCommand),
}

#[derive(Debug, Subcommand)]
pub enum JobCommand {
    /// Create a job
    Create {
        /// Friendly job name
        name: String,

        /// Template reference passed to the renderer
        #[arg(long)]
        template: String,

        /// Schedule kind: immediate, delayed, or recurring
        #[arg(long)]
        schedule: String,

        /// Fire time for delayed jobs (RFC 3339, or naive UTC like
        /// 2026-09-01T08:00:00)
        #[arg(long)]
        run_at: Option<String>,

        /// 5-field cron expression for recurring jobs
        #[arg(long)]
        cron: Option<String>,

        /// Comma-separated static recipient addresses
        #[arg(long)]
        recipients: Option<String>,

        /// File with one recipient address per line
        #[arg(long)]
        recipients_file: Option<PathBuf>,

        /// Recipient cache filter, as field=value
        #[arg(long)]
        filter: Option<String>,

        /// Consecutive failures tolerated before dead-lettering
        #[arg(long, default_value_t = 3)]
        max_retries: i32,

        /// Base retry backoff, in seconds
        #[arg(long, default_value_t = 60)]
        backoff_base: i64,
    },

    /// List jobs
    List {
        /// Filter by status: active, cancelled, or dead_letter
        #[arg(long)]
        status: Option<String>,
    },

    /// Cancel a job
    Cancel { job_id: Uuid },

    /// Show a job's recent executions
    Executions {
        job_id: Uuid,

        #[arg(long, default_value_t = 20)]
        limit: u64,
    },
}

/// Dispatch a parsed command against an initialized database.
pub async fn run(cli: Cli, db: DatabaseConnection, config: &AppConfig) -> Result<()> {
    match cli.command {
        Command::Worker {
            poll_interval,
            run_once,
        } => run_worker(db, config, poll_interval, run_once).await,
        Command::Job(command) => run_job_command(command, db).await,
    }
}

async fn run_worker(
    db: DatabaseConnection,
    config: &AppConfig,
    poll_interval: Option<u64>,
    run_once: bool,
) -> Result<()> {
    let mut worker_config = config.worker.clone();
    if let Some(seconds) = poll_interval {
        worker_config.tick_interval_seconds = seconds;
    }
    worker_config.validate()?;

    let worker = Worker::new(
        db,
        Arc::new(CacheRecipientResolver::new(&config.recipient_cache_path)),
        Arc::new(LoggingDispatchGateway),
        Arc::new(BasicTemplateRenderer),
        worker_config,
    );

    if run_once {
        worker.run_once().await;
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_token.cancel();
        }
    });

    worker.run(shutdown).await;
    Ok(())
}

async fn run_job_command(command: JobCommand, db: DatabaseConnection) -> Result<()> {
    let jobs = JobRepository::new(db.clone());

    match command {
        JobCommand::Create {
            name,
            template,
            schedule,
            run_at,
            cron,
            recipients,
            recipients_file,
            filter,
            max_retries,
            backoff_base,
        } => {
            let schedule_kind = parse_schedule_kind(&schedule)?;
            let run_at = run_at.as_deref().map(parse_run_at).transpose()?;
            let spec = build_recipient_spec(recipients, recipients_file, filter)?;

            let job = jobs
                .create(JobDraft {
                    name,
                    template_ref: template,
                    spec,
                    schedule_kind,
                    run_at,
                    cron_expr: cron,
                    max_retries,
                    backoff_base_seconds: backoff_base,
                })
                .await?;

            println!("Created job {}", job.id);
            match job.next_run_at {
                Some(at) => println!("Next run at {}", at.to_rfc3339()),
                None => println!("No run scheduled"),
            }
        }

        JobCommand::List { status } => {
            let status = status.as_deref().map(parse_status).transpose()?;
            let jobs = jobs.list(status).await?;

            println!(
                "{:<36}  {:<20}  {:<10}  {:<11}  {:>7}  {}",
                "ID", "NAME", "KIND", "STATUS", "RETRIES", "NEXT RUN"
            );
            for job in jobs {
                println!(
                    "{:<36}  {:<20}  {:<10}  {:<11}  {:>7}  {}",
                    job.id,
                    job.name,
                    job.schedule_kind.as_str(),
                    job.status.as_str(),
                    format!("{}/{}", job.retry_counter, job.max_retries),
                    job.next_run_at
                        .map(|at| at.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string()),
                );
            }
        }

        JobCommand::Cancel { job_id } => {
            let job = jobs.cancel(job_id).await?;
            println!("Cancelled job {}", job.id);
        }

        JobCommand::Executions { job_id, limit } => {
            let executions = ExecutionRepository::new(db).recent(job_id, limit).await?;

            println!(
                "{:<25}  {:<11}  {:>7}  {:>9}  {:>6}  {:>7}  {}",
                "ATTEMPTED AT", "OUTCOME", "ATTEMPT", "ATTEMPTED", "SENT", "FAILED", "ERROR"
            );
            for execution in executions {
                println!(
                    "{:<25}  {:<11}  {:>7}  {:>9}  {:>6}  {:>7}  {}",
                    execution.attempted_at.to_rfc3339(),
                    execution.outcome.as_str(),
                    execution.attempt_number,
                    execution.recipients_attempted,
                    execution.recipients_succeeded,
                    execution.recipients_failed,
                    execution.error_summary.as_deref().unwrap_or("-"),
                );
            }
        }
    }

    Ok(())
}

fn parse_schedule_kind(value: &str) -> Result<ScheduleKind> {
    match value {
        "immediate" => Ok(ScheduleKind::Immediate),
        "delayed" => Ok(ScheduleKind::Delayed),
        "recurring" => Ok(ScheduleKind::Recurring),
        other => bail!("unknown schedule kind '{other}', expected immediate, delayed, or recurring"),
    }
}

fn parse_status(value: &str) -> Result<JobStatus> {
    match value {
        "active" => Ok(JobStatus::Active),
        "cancelled" => Ok(JobStatus::Cancelled),
        "dead_letter" => Ok(JobStatus::DeadLetter),
        other => bail!("unknown status '{other}', expected active, cancelled, or dead_letter"),
    }
}

/// Accept RFC 3339, or a naive timestamp interpreted as UTC.
fn parse_run_at(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .with_context(|| format!("invalid run_at timestamp '{value}'"))?;
    Ok(naive.and_utc())
}

fn build_recipient_spec(
    recipients: Option<String>,
    recipients_file: Option<PathBuf>,
    filter: Option<String>,
) -> Result<RecipientSpec> {
    let provided =
        usize::from(recipients.is_some()) + usize::from(recipients_file.is_some()) + usize::from(filter.is_some());
    if provided != 1 {
        bail!("specify exactly one of --recipients, --recipients-file, or --filter");
    }

    if let Some(list) = recipients {
        let addresses: Vec<String> = list
            .split(',')
            .map(str::trim)
            .filter(|address| !address.is_empty())
            .map(str::to_string)
            .collect();
        if addresses.is_empty() {
            bail!("--recipients did not contain any addresses");
        }
        return Ok(RecipientSpec::StaticList { addresses });
    }

    if let Some(path) = recipients_file {
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let addresses: Vec<String> = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        if addresses.is_empty() {
            bail!("{} did not contain any addresses", path.display());
        }
        return Ok(RecipientSpec::StaticList { addresses });
    }

    let filter = filter.context("missing --filter")?;
    let Some((field, value)) = filter.split_once('=') else {
        bail!("--filter must be field=value, got '{filter}'");
    };
    if field.is_empty() || value.is_empty() {
        bail!("--filter must be field=value, got '{filter}'");
    }
    Ok(RecipientSpec::CacheFilter {
        field: field.to_string(),
        value: value.to_string(),
    })
}
