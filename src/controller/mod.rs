//! # Controller
//!
//! Core reconciliation modules.
//!
//! - `backoff`: exponential and Fibonacci backoff schedules
//! - `diff`: desired versus observed state into an ordered plan
//! - `lock`: per-name locks with fencing tokens
//! - `parser`: source tree scanning and document parsing
//! - `reconciler`: the reconciliation engine

pub mod backoff;
pub mod diff;
pub mod lock;
pub mod parser;
pub mod reconciler;
