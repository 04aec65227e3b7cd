//! Database migrations for the autobulk dispatch engine.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2026_05_20_000100_create_jobs;
mod m2026_05_20_000200_create_job_executions;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_05_20_000100_create_jobs::Migration),
            Box::new(m2026_05_20_000200_create_job_executions::Migration),
        ]
    }
}
