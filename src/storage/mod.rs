//! Storage layer (SQLite, analyzer cache, checkpoints, plan repository)

pub mod cache;
pub mod checkpoint;
pub mod database;
pub mod plan_repository;

pub use cache::AnalyzerCache;
pub use checkpoint::{CheckpointStore, PhaseCheckpoint};
pub use database::{Database, DbPool};
pub use plan_repository::{JournalEntry, PlanRepository};
