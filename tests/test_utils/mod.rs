//! Test utilities for database testing.
//!
//! Sets up in-memory SQLite databases with migrations applied, plus the
//! mock resolver and gateway implementations the worker tests share.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection, EntityTrait};

use autobulk::error::ResolutionError;
use autobulk::mail::{DispatchGateway, DispatchOutcome, RenderedMessage};
use autobulk::models::job;
use autobulk::recipients::{Recipient, RecipientResolver};

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// Resolver that always yields the same recipient list.
pub struct StaticResolver {
    recipients: Vec<Recipient>,
}

impl StaticResolver {
    pub fn new(emails: &[&str]) -> Self {
        Self {
            recipients: emails.iter().map(|e| Recipient::new(*e)).collect(),
        }
    }
}

#[async_trait]
impl RecipientResolver for StaticResolver {
    async fn resolve(&self, _job: &job::Model) -> Result<Vec<Recipient>, ResolutionError> {
        Ok(self.recipients.clone())
    }
}

/// Resolver that always fails, as an unreadable cache would.
pub struct FailingResolver;

#[async_trait]
impl RecipientResolver for FailingResolver {
    async fn resolve(&self, _job: &job::Model) -> Result<Vec<Recipient>, ResolutionError> {
        Err(ResolutionError::NoMatch {
            field: "department".to_string(),
            value: "missing".to_string(),
        })
    }
}

/// Resolver that deletes the job row before returning recipients, so the
/// finalize step finds nothing to update.
pub struct VanishingResolver {
    db: DatabaseConnection,
}

impl VanishingResolver {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RecipientResolver for VanishingResolver {
    async fn resolve(&self, job: &job::Model) -> Result<Vec<Recipient>, ResolutionError> {
        let _ = job::Entity::delete_by_id(job.id).exec(&self.db).await;
        Ok(vec![Recipient::new("a@example.com")])
    }
}

/// Gateway that sleeps before delivering, to simulate dispatch outliving
/// a scheduling boundary.
pub struct DelayedGateway {
    delay: Duration,
}

impl DelayedGateway {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl DispatchGateway for DelayedGateway {
    async fn send(&self, _message: &RenderedMessage, _recipient: &Recipient) -> DispatchOutcome {
        tokio::time::sleep(self.delay).await;
        DispatchOutcome::Delivered
    }
}

/// Gateway that records every send and rejects configured addresses.
pub struct MockGateway {
    fail_addresses: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl MockGateway {
    pub fn delivering() -> Self {
        Self::rejecting(&[])
    }

    pub fn rejecting(addresses: &[&str]) -> Self {
        Self {
            fail_addresses: addresses.iter().map(|a| a.to_string()).collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DispatchGateway for MockGateway {
    async fn send(&self, _message: &RenderedMessage, recipient: &Recipient) -> DispatchOutcome {
        self.calls.lock().unwrap().push(recipient.email.clone());
        if self.fail_addresses.contains(&recipient.email) {
            DispatchOutcome::Rejected("mailbox unavailable".to_string())
        } else {
            DispatchOutcome::Delivered
        }
    }
}
