//! # Error Handling
//!
//! Error taxonomy for the dispatch engine. Schedule problems are rejected
//! at job creation and never reach the worker; resolution and dispatch
//! problems are captured in execution rows and drive the retry state
//! machine; store problems abort the affected job's cycle without
//! consuming a retry.

use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

/// Invalid cron expression or one-shot timestamp, detected at job creation.
#[derive(Debug, Error)]
pub enum ScheduleParseError {
    #[error("cron expression must have exactly 5 fields, got {count}: '{expr}'")]
    FieldCount { expr: String, count: usize },

    #[error("cron field {index} ('{field}') is invalid: {reason}")]
    InvalidField {
        index: usize,
        field: String,
        reason: String,
    },

    #[error("cron expression '{expr}' failed to parse: {source}")]
    Unparsable {
        expr: String,
        #[source]
        source: cron::error::Error,
    },

    #[error("{kind} jobs must not set {field}")]
    ExtraneousField {
        kind: &'static str,
        field: &'static str,
    },

    #[error("delayed jobs require a run_at timestamp")]
    MissingRunAt,

    #[error("recurring jobs require a cron expression")]
    MissingCron,

    #[error("invalid run_at timestamp '{value}': {reason}")]
    InvalidRunAt { value: String, reason: String },
}

/// Recipient source unavailable or empty; treated as a retryable job
/// failure by the worker.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("recipient cache {path} is unreadable: {source}")]
    CacheUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported recipient cache format: {path}")]
    UnsupportedFormat { path: PathBuf },

    #[error("recipient cache {path} is malformed: {reason}")]
    MalformedCache { path: PathBuf, reason: String },

    #[error("no cached recipients matched filter {field}={value}")]
    NoMatch { field: String, value: String },

    #[error("static list job does not define any recipients")]
    EmptyStaticList,

    #[error("job recipient spec is malformed: {0}")]
    MalformedSpec(#[from] serde_json::Error),
}

/// Template could not be rendered for a recipient; counts as a recipient
/// failure in the execution row.
#[derive(Debug, Error)]
#[error("failed to render template '{template_ref}': {reason}")]
pub struct TemplateError {
    pub template_ref: String,
    pub reason: String,
}

/// Persistence failure. The affected job's poll cycle aborts and is
/// retried on the next tick; its own state was never durably advanced.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{context}: {source}")]
    Db {
        context: &'static str,
        #[source]
        source: sea_orm::DbErr,
    },

    #[error("job {0} not found")]
    JobNotFound(Uuid),
}

impl StoreError {
    /// Wrap a database error with a short operation description.
    pub fn db(context: &'static str, source: sea_orm::DbErr) -> Self {
        StoreError::Db { context, source }
    }
}

/// Failure while creating a job through the administrative surface.
#[derive(Debug, Error)]
pub enum CreateJobError {
    #[error(transparent)]
    Schedule(#[from] ScheduleParseError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
