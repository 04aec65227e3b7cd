//! # Repositories
//!
//! Persistence layer over the job store. Repositories encapsulate all
//! SeaORM access so the worker and CLI never touch entities directly.

pub mod execution;
pub mod job;

pub use execution::ExecutionRepository;
pub use job::{ExecutionDraft, JobDraft, JobRepository, JobUpdate};
