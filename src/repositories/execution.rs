//! # Execution Repository
//!
//! Read side of the execution log. Rows are only ever written through
//! [`JobRepository::finalize_execution`](super::job::JobRepository).

use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::execution::{Column, Entity, Model};

/// Repository for execution log queries
pub struct ExecutionRepository {
    db: DatabaseConnection,
}

impl ExecutionRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Most recent executions for a job, newest first.
    pub async fn recent(&self, job_id: Uuid, limit: u64) -> Result<Vec<Model>, StoreError> {
        Entity::find()
            .filter(Column::JobId.eq(job_id))
            .order_by_desc(Column::AttemptedAt)
            .limit(limit)
            .all(&self.db)
            .await
            .map_err(|e| StoreError::db("failed to list executions", e))
    }
}
