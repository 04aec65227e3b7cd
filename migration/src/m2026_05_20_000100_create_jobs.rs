//! Migration to create the jobs table.
//!
//! A job row is a schedulable unit of bulk dispatch: its template reference,
//! recipient specification, schedule, retry budget, and current scheduling
//! state all live here.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Jobs::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Jobs::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Jobs::Name).text().not_null())
                    .col(ColumnDef::new(Jobs::TemplateRef).text().not_null())
                    .col(ColumnDef::new(Jobs::RecipientSpec).json().not_null())
                    .col(ColumnDef::new(Jobs::ScheduleKind).text().not_null())
                    .col(
                        ColumnDef::new(Jobs::RunAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Jobs::CronExpr).text().null())
                    .col(
                        ColumnDef::new(Jobs::NextRunAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Jobs::Status)
                            .text()
                            .not_null()
                            .default("active"),
                    )
                    .col(
                        ColumnDef::new(Jobs::RetryCounter)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Jobs::MaxRetries)
                            .integer()
                            .not_null()
                            .default(3),
                    )
                    .col(
                        ColumnDef::new(Jobs::BackoffBaseSeconds)
                            .big_integer()
                            .not_null()
                            .default(60),
                    )
                    .col(
                        ColumnDef::new(Jobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Jobs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Index for the due-job poll: active jobs ordered by next_run_at.
        manager
            .create_index(
                Index::create()
                    .name("idx_jobs_status_next_run_at")
                    .table(Jobs::Table)
                    .col(Jobs::Status)
                    .col(Jobs::NextRunAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_jobs_status_next_run_at").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Jobs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Jobs {
    Table,
    Id,
    Name,
    TemplateRef,
    RecipientSpec,
    ScheduleKind,
    RunAt,
    CronExpr,
    NextRunAt,
    Status,
    RetryCounter,
    MaxRetries,
    BackoffBaseSeconds,
    CreatedAt,
    UpdatedAt,
}
