//! Migration to create the job_executions table.
//!
//! Execution rows are append-only: one row per poll-and-dispatch cycle for a
//! job, recording the outcome and per-recipient counts. They are the source
//! of truth for "did this job run and what happened".

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(JobExecutions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(JobExecutions::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(JobExecutions::JobId).uuid().not_null())
                    .col(
                        ColumnDef::new(JobExecutions::AttemptedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(JobExecutions::Outcome).text().not_null())
                    .col(
                        ColumnDef::new(JobExecutions::RecipientsAttempted)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(JobExecutions::RecipientsSucceeded)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(JobExecutions::RecipientsFailed)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(JobExecutions::ErrorSummary).text().null())
                    .col(
                        ColumnDef::new(JobExecutions::AttemptNumber)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(JobExecutions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_job_executions_job_id")
                            .from(JobExecutions::Table, JobExecutions::JobId)
                            .to(Jobs::Table, Jobs::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        // Index for per-job history queries, newest first.
        manager
            .create_index(
                Index::create()
                    .name("idx_job_executions_job_id_attempted_at")
                    .table(JobExecutions::Table)
                    .col(JobExecutions::JobId)
                    .col(JobExecutions::AttemptedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_job_executions_job_id_attempted_at")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(JobExecutions::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum JobExecutions {
    Table,
    Id,
    JobId,
    AttemptedAt,
    Outcome,
    RecipientsAttempted,
    RecipientsSucceeded,
    RecipientsFailed,
    ErrorSummary,
    AttemptNumber,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Jobs {
    Table,
    Id,
}
