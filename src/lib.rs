// ABOUTME: Library root for device-replicator
// ABOUTME: Device snapshots mirrored into PostgreSQL, with backups and snapshot diffs

pub mod catalog;
pub mod commands;
pub mod compare;
pub mod config;
pub mod device;
pub mod error;
pub mod poller;
pub mod postgres;
pub mod replicate;
pub mod sqlite;
pub mod state;
pub mod utils;

pub use error::{Outcome, ReplicatorError, Result};
