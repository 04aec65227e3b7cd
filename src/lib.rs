//! # autobulk
//!
//! Scheduled bulk email dispatch engine: a durable job store, a polling
//! worker with retry and dead-letter handling, and recurring cron
//! schedules, all on top of an embedded SQLite database.

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod mail;
pub mod models;
pub mod recipients;
pub mod repositories;
pub mod schedule;
pub mod worker;

pub use migration;
