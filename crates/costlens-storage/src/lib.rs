//! Costlens storage crate - SQLite persistence for the cost dashboard.
//!
//! Provides the writer database with migrations and sample data, plus a
//! bounded pool of read-only sessions used by the SQL assistant.

pub mod db;
pub mod migrations;
pub mod pool;
pub mod seed;

pub use db::{Database, DbLocation};
pub use pool::{InterruptHandle, PooledConnection, ReadPool};
pub use seed::{is_seeded, seed_sample_data, SeedSummary};
