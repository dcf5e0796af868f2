//! Gemstone photo analysis
//!
//! Three tiers plus orchestration:
//! - Tier 1 ([`tier1`]): inference-service adapters (classify, extract, fetch)
//! - Tier 2 ([`tier2`]): claim normalization and fusion
//! - Tier 3 ([`tier3`]): conflict detection and coverage
//! - [`gemstone_workflow`]: one gemstone through all tiers
//! - [`batch_orchestrator`]: bounded worker pool across gemstones
//! - [`db_repository`]: persistence adapter

pub mod batch_orchestrator;
pub mod db_repository;
pub mod gemstone_workflow;
pub mod schema;
pub mod tier1;
pub mod tier2;
pub mod tier3;
pub mod types;

pub use batch_orchestrator::{BatchOrchestrator, BatchSummary};
pub use db_repository::{AnalysisStore, SqliteAnalysisStore};
pub use gemstone_workflow::{GemstoneLocks, GemstoneWorkflowEngine};
