//! Secret Reconciler Library
//!
//! Reconciles secret documents declared in a source tree (optionally
//! SOPS-encrypted) into a remote secret store.
//!
//! - `controller`: scanning, diffing, locking and the reconciliation engine
//! - `decrypt`: ciphertext decryption
//! - `provider`: remote secret stores
//! - `observability`: audit trail, metrics and logging
//! - `runtime`: the watch loop
//! - `server`: metrics and probe endpoints

pub mod config;
pub mod constants;
pub mod controller;
pub mod decrypt;
pub mod observability;
pub mod provider;
pub mod runtime;
pub mod secret;
pub mod server;

pub use config::{EngineConfig, ReconcileOptions};
pub use controller::reconciler::{ReconcileError, ReconciliationResult, Reconciler};
