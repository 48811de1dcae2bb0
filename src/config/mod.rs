//! # Configuration
//!
//! - [`engine::EngineConfig`]: process-level settings loaded from environment variables
//! - [`options::ReconcileOptions`]: per-invocation options of a reconciliation run
//! - [`options::EngineSettings`]: retry and lock tuning used by the engine

pub mod engine;
pub mod options;

pub use engine::EngineConfig;
pub use options::{ConfigError, EngineSettings, ReconcileOptions};
