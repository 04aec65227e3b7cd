//! Job entity model
//!
//! SeaORM entity for the jobs table: a schedulable unit of bulk dispatch
//! with its recipient specification, schedule, retry budget, and current
//! scheduling state. Job rows are owned by the job store and mutated only
//! by the worker loop and the explicit cancel operation.

use sea_orm::entity::prelude::*;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::execution::Entity as Execution;
use super::{JobStatus, RecipientSpec, ScheduleKind};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "jobs")]
pub struct Model {
    /// Unique identifier, assigned at creation (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Friendly job name
    pub name: String,

    /// Reference to the template the dispatch gateway renders from
    pub template_ref: String,

    /// Tagged recipient specification, see [`RecipientSpec`]
    pub recipient_spec: JsonValue,

    /// immediate, delayed, or recurring
    pub schedule_kind: ScheduleKind,

    /// One-shot fire time (immediate/delayed only)
    pub run_at: Option<DateTimeWithTimeZone>,

    /// 5-field cron expression (recurring only)
    pub cron_expr: Option<String>,

    /// Next eligible run time; null means no further runs are due
    pub next_run_at: Option<DateTimeWithTimeZone>,

    /// Lifecycle status; cancelled and dead_letter are terminal
    pub status: JobStatus,

    /// Consecutive failures since the last success
    pub retry_counter: i32,

    /// Failure budget before the job is dead-lettered
    pub max_retries: i32,

    /// Base interval for exponential retry backoff
    pub backoff_base_seconds: i64,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "Execution")]
    Execution,
}

impl Related<Execution> for Entity {
    fn to() -> RelationDef {
        Relation::Execution.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Decode the persisted recipient specification.
    pub fn spec(&self) -> Result<RecipientSpec, serde_json::Error> {
        RecipientSpec::from_json(&self.recipient_spec)
    }
}
