//! # Data Models
//!
//! SeaORM entities for the job store and execution log, plus the shared
//! enums that describe a job's schedule, status, and recipient source.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

pub mod execution;
pub mod job;

pub use execution::Entity as Execution;
pub use job::Entity as Job;

/// How a job is scheduled to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    #[sea_orm(string_value = "immediate")]
    Immediate,
    #[sea_orm(string_value = "delayed")]
    Delayed,
    #[sea_orm(string_value = "recurring")]
    Recurring,
}

impl ScheduleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleKind::Immediate => "immediate",
            ScheduleKind::Delayed => "delayed",
            ScheduleKind::Recurring => "recurring",
        }
    }

    /// True for schedules that fire exactly once.
    pub fn is_one_shot(&self) -> bool {
        matches!(self, ScheduleKind::Immediate | ScheduleKind::Delayed)
    }
}

/// Lifecycle status of a job.
///
/// One-shot jobs that have run stay `active` with a null `next_run_at`; the
/// poller's `next_run_at IS NOT NULL` guard keeps them from being selected
/// again while their history remains attributable to an active definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "dead_letter")]
    DeadLetter,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Active => "active",
            JobStatus::Cancelled => "cancelled",
            JobStatus::DeadLetter => "dead_letter",
        }
    }

    /// Terminal statuses are never selected by the poller again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Cancelled | JobStatus::DeadLetter)
    }
}

/// Job-level outcome of one poll-and-dispatch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    #[sea_orm(string_value = "success")]
    Success,
    #[sea_orm(string_value = "failure")]
    Failure,
    #[sea_orm(string_value = "dead_letter")]
    DeadLetter,
}

impl ExecutionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionOutcome::Success => "success",
            ExecutionOutcome::Failure => "failure",
            ExecutionOutcome::DeadLetter => "dead_letter",
        }
    }
}

/// Where a job's recipients come from, persisted as tagged JSON in the
/// `recipient_spec` column.
///
/// `StaticList` embeds the addresses in the job definition. `CacheFilter`
/// keeps cached recipient records whose `field` attribute equals `value`,
/// re-evaluated against the cache on every execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecipientSpec {
    StaticList { addresses: Vec<String> },
    CacheFilter { field: String, value: String },
}

impl RecipientSpec {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("recipient spec serializes to JSON")
    }

    pub fn from_json(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recipient_spec_round_trips_through_tagged_json() {
        let spec = RecipientSpec::CacheFilter {
            field: "department".to_string(),
            value: "marketing".to_string(),
        };
        let json = spec.to_json();
        assert_eq!(json["type"], "cache_filter");
        assert_eq!(json["field"], "department");
        assert_eq!(RecipientSpec::from_json(&json).unwrap(), spec);
    }

    #[test]
    fn static_list_json_shape() {
        let spec = RecipientSpec::StaticList {
            addresses: vec!["a@example.com".to_string()],
        };
        let json = spec.to_json();
        assert_eq!(json["type"], "static_list");
        assert_eq!(json["addresses"][0], "a@example.com");
    }

    #[test]
    fn one_shot_kinds() {
        assert!(ScheduleKind::Immediate.is_one_shot());
        assert!(ScheduleKind::Delayed.is_one_shot());
        assert!(!ScheduleKind::Recurring.is_one_shot());
    }
}
