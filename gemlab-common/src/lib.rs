//! # Gemlab Common Library
//!
//! Shared code for the gemlab crates:
//! - Error and result types
//! - TOML configuration discovery and loading
//! - Root folder resolution
//! - Logging setup

pub mod config;
pub mod error;
pub mod logging;
pub mod time;

pub use error::{Error, Result};
