//! gemlab-ai library
//!
//! Turns photographs of a gemstone into one reconciled, provenance-tracked
//! attribute record.

pub mod analysis;
pub mod config;
pub mod db;
pub mod error;
pub mod utils;

pub use crate::analysis::{
    AnalysisStore, BatchOrchestrator, BatchSummary, GemstoneWorkflowEngine, SqliteAnalysisStore,
};
pub use crate::config::AnalysisConfig;
pub use crate::error::{AnalysisError, AnalysisResult, ContractError, ServiceError, StoreError};
