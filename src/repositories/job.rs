//! # Job Repository
//!
//! Repository operations for the jobs table. Job creation validates the
//! schedule and seeds `next_run_at`; `finalize_execution` applies one
//! poll-and-dispatch cycle's outcome atomically so the execution log and
//! the job's scheduling state can never disagree.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{CreateJobError, StoreError};
use crate::models::job::{ActiveModel, Column, Entity, Model};
use crate::models::{execution, ExecutionOutcome, JobStatus, RecipientSpec, ScheduleKind};
use crate::schedule::{compute_next_run, Schedule};

/// Input for creating a job.
#[derive(Debug, Clone)]
pub struct JobDraft {
    pub name: String,
    pub template_ref: String,
    pub spec: RecipientSpec,
    pub schedule_kind: ScheduleKind,
    pub run_at: Option<DateTime<Utc>>,
    pub cron_expr: Option<String>,
    pub max_retries: i32,
    pub backoff_base_seconds: i64,
}

/// Scheduling-state changes to apply to a job when its cycle finalizes.
#[derive(Debug, Clone)]
pub struct JobUpdate {
    pub status: JobStatus,
    pub next_run_at: Option<DateTime<Utc>>,
    pub retry_counter: i32,
}

/// Execution row to append when a cycle finalizes.
#[derive(Debug, Clone)]
pub struct ExecutionDraft {
    pub attempted_at: DateTime<Utc>,
    pub outcome: ExecutionOutcome,
    pub recipients_attempted: i32,
    pub recipients_succeeded: i32,
    pub recipients_failed: i32,
    pub error_summary: Option<String>,
    pub attempt_number: i32,
}

/// Repository for job database operations
pub struct JobRepository {
    db: DatabaseConnection,
}

impl JobRepository {
    /// Create a new JobRepository with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Create a job, validating its schedule and computing the first
    /// `next_run_at`. The cron expression is stored exactly as supplied;
    /// normalization happens on every evaluation.
    pub async fn create(&self, draft: JobDraft) -> Result<Model, CreateJobError> {
        let schedule = Schedule::for_job(
            draft.schedule_kind,
            draft.run_at,
            draft.cron_expr.as_deref(),
        )?;
        let now = Utc::now();
        let next_run_at = compute_next_run(&schedule, now);

        let job = ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(draft.name),
            template_ref: Set(draft.template_ref),
            recipient_spec: Set(draft.spec.to_json()),
            schedule_kind: Set(draft.schedule_kind),
            run_at: Set(draft.run_at.map(|t| t.fixed_offset())),
            cron_expr: Set(draft.cron_expr),
            next_run_at: Set(next_run_at.map(|t| t.fixed_offset())),
            status: Set(JobStatus::Active),
            retry_counter: Set(0),
            max_retries: Set(draft.max_retries),
            backoff_base_seconds: Set(draft.backoff_base_seconds),
            created_at: Set(now.fixed_offset()),
            updated_at: Set(now.fixed_offset()),
        };

        let created = job
            .insert(&self.db)
            .await
            .map_err(|e| StoreError::db("failed to create job", e))?;

        info!(
            job_id = %created.id,
            name = %created.name,
            schedule_kind = created.schedule_kind.as_str(),
            next_run_at = ?created.next_run_at,
            "Job created"
        );
        Ok(created)
    }

    /// Find a job by ID.
    pub async fn find(&self, job_id: Uuid) -> Result<Option<Model>, StoreError> {
        Entity::find_by_id(job_id)
            .one(&self.db)
            .await
            .map_err(|e| StoreError::db("failed to find job", e))
    }

    /// List jobs, newest first, optionally filtered by status.
    pub async fn list(&self, status: Option<JobStatus>) -> Result<Vec<Model>, StoreError> {
        let mut query = Entity::find().order_by_desc(Column::CreatedAt);
        if let Some(status) = status {
            query = query.filter(Column::Status.eq(status));
        }
        query
            .all(&self.db)
            .await
            .map_err(|e| StoreError::db("failed to list jobs", e))
    }

    /// Select jobs due at `now`: active, with a non-null `next_run_at` at
    /// or before `now`, most overdue first, capped at `limit`.
    pub async fn select_due(
        &self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<Model>, StoreError> {
        Entity::find()
            .filter(Column::Status.eq(JobStatus::Active))
            .filter(Column::NextRunAt.is_not_null())
            .filter(Column::NextRunAt.lte(now.fixed_offset()))
            .order_by_asc(Column::NextRunAt)
            .limit(limit)
            .all(&self.db)
            .await
            .map_err(|e| StoreError::db("failed to select due jobs", e))
    }

    /// Cancel a job: terminal status, no further selection. The execution
    /// history is kept.
    pub async fn cancel(&self, job_id: Uuid) -> Result<Model, StoreError> {
        let job = self.find(job_id).await?.ok_or(StoreError::JobNotFound(job_id))?;

        if job.status.is_terminal() {
            return Ok(job);
        }

        let mut active: ActiveModel = job.into();
        active.status = Set(JobStatus::Cancelled);
        active.next_run_at = Set(None);
        active.updated_at = Set(Utc::now().fixed_offset());

        let cancelled = active
            .update(&self.db)
            .await
            .map_err(|e| StoreError::db("failed to cancel job", e))?;

        info!(job_id = %cancelled.id, "Job cancelled");
        Ok(cancelled)
    }

    /// Atomically record one execution and apply the resulting scheduling
    /// state to the job.
    ///
    /// The job is re-read inside the transaction: if it was cancelled
    /// while the cycle ran, the cancellation wins and the job row is left
    /// untouched, but the execution that already happened is still
    /// recorded.
    pub async fn finalize_execution(
        &self,
        job_id: Uuid,
        update: JobUpdate,
        draft: ExecutionDraft,
    ) -> Result<Model, StoreError> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| StoreError::db("failed to begin finalize transaction", e))?;

        let result = Self::finalize_in(&txn, job_id, update, draft).await;

        match result {
            Ok(model) => {
                txn.commit()
                    .await
                    .map_err(|e| StoreError::db("failed to commit finalize transaction", e))?;
                Ok(model)
            }
            Err(err) => {
                if let Err(rollback_err) = txn.rollback().await {
                    warn!(error = %rollback_err, "Failed to roll back finalize transaction");
                }
                Err(err)
            }
        }
    }

    async fn finalize_in<C: ConnectionTrait>(
        conn: &C,
        job_id: Uuid,
        update: JobUpdate,
        draft: ExecutionDraft,
    ) -> Result<Model, StoreError> {
        let job = Entity::find_by_id(job_id)
            .one(conn)
            .await
            .map_err(|e| StoreError::db("failed to re-read job for finalize", e))?
            .ok_or(StoreError::JobNotFound(job_id))?;

        let row = execution::ActiveModel {
            id: Set(Uuid::new_v4()),
            job_id: Set(job_id),
            attempted_at: Set(draft.attempted_at.fixed_offset()),
            outcome: Set(draft.outcome),
            recipients_attempted: Set(draft.recipients_attempted),
            recipients_succeeded: Set(draft.recipients_succeeded),
            recipients_failed: Set(draft.recipients_failed),
            error_summary: Set(draft.error_summary),
            attempt_number: Set(draft.attempt_number),
            created_at: Set(Utc::now().fixed_offset()),
        };
        row.insert(conn)
            .await
            .map_err(|e| StoreError::db("failed to record execution", e))?;

        if job.status == JobStatus::Cancelled {
            info!(job_id = %job.id, "Job was cancelled mid-cycle, keeping cancelled state");
            return Ok(job);
        }

        let mut active: ActiveModel = job.into();
        active.status = Set(update.status);
        active.next_run_at = Set(update.next_run_at.map(|t| t.fixed_offset()));
        active.retry_counter = Set(update.retry_counter);
        active.updated_at = Set(Utc::now().fixed_offset());

        active
            .update(conn)
            .await
            .map_err(|e| StoreError::db("failed to apply job update", e))
    }
}
