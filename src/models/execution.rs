//! Execution entity model
//!
//! SeaORM entity for the job_executions table. Rows are append-only: one
//! per poll-and-dispatch cycle, written after the cycle completes, and
//! never mutated or deleted afterwards.

use sea_orm::entity::prelude::*;
use uuid::Uuid;

use super::job::Entity as Job;
use super::ExecutionOutcome;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "job_executions")]
pub struct Model {
    /// Unique identifier for the execution (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Job this execution belongs to
    pub job_id: Uuid,

    /// When the dispatch cycle ran
    pub attempted_at: DateTimeWithTimeZone,

    /// Job-level outcome of the cycle
    pub outcome: ExecutionOutcome,

    pub recipients_attempted: i32,
    pub recipients_succeeded: i32,
    pub recipients_failed: i32,

    /// Truncated free-text error detail, if the cycle failed
    pub error_summary: Option<String>,

    /// Attempt number within the job's current retry sequence (1-based)
    pub attempt_number: i32,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "Job",
        from = "Column::JobId",
        to = "super::job::Column::Id"
    )]
    Job,
}

impl Related<Job> for Entity {
    fn to() -> RelationDef {
        Relation::Job.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
