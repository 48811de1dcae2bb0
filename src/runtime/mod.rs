//! # Runtime
//!
//! Long-running operation of the reconciler.

pub mod watch_loop;

pub use watch_loop::WatchLoop;
