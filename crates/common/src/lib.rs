//! Castkit Common Utilities
//!
//! Shared infrastructure for all Castkit crates:
//! - Error types and result aliases
//! - Export clock and fixed-rate frame cadence
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
