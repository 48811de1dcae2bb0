//! # CLI
//!
//! Command-line interface of the `secret-reconciler` binary.
//!
//! ```bash
//! # Show what a run would change
//! secret-reconciler plan --source ./secrets --store-url https://store.internal
//!
//! # Apply once, deleting remote secrets no document declares
//! secret-reconciler reconcile --source ./secrets --store-url https://store.internal --prune
//!
//! # Reconcile on an interval and serve /metrics, /healthz and /readyz
//! secret-reconciler watch --source ./secrets --store-url https://store.internal
//! ```
//!
//! Process-level settings (log level, retries, locks, intervals) come from
//! environment variables; see `EngineConfig`.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("BUILD_GIT_HASH"),
    ", built ",
    env!("BUILD_DATETIME"),
    ")"
);

/// Reconcile secret documents from a source tree into a remote secret store
#[derive(Parser, Debug)]
#[command(name = "secret-reconciler", version = VERSION, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan and diff, print the plan, write nothing
    Plan(RunArgs),
    /// Apply the plan once
    Reconcile {
        #[command(flatten)]
        run: RunArgs,

        /// Compute and report the plan without writing anything
        #[arg(long)]
        dry_run: bool,

        /// Exit with status 0 even when items failed
        #[arg(long)]
        allow_degraded: bool,
    },
    /// Reconcile on an interval until interrupted
    Watch {
        #[command(flatten)]
        run: RunArgs,

        /// Seconds between runs (overrides RECONCILE_INTERVAL_SECS)
        #[arg(long)]
        interval_secs: Option<u64>,
    },
}

#[derive(Args, Debug)]
#[allow(
    clippy::struct_excessive_bools,
    reason = "Flags map one to one onto command line switches"
)]
pub struct RunArgs {
    /// Root of the source tree
    #[arg(long, env = "SECRET_SOURCE_DIR", value_name = "DIR")]
    pub source: PathBuf,

    /// Secret store base URL, or `memory://` for a throwaway in-process store
    #[arg(long, env = "SECRET_STORE_URL", value_name = "URL")]
    pub store_url: String,

    /// Bearer token for the secret store
    #[arg(long, env = "SECRET_STORE_TOKEN", hide_env_values = true)]
    pub store_token: Option<String>,

    /// Leading name segment for every logical name (overrides SECRET_NAME_PREFIX)
    #[arg(long)]
    pub prefix: Option<String>,

    /// Delete remote secrets no source document declares
    #[arg(long)]
    pub prune: bool,

    /// Plan items applied in parallel within a phase (overrides CONCURRENCY_LIMIT)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Path of the sops binary (defaults to the one on PATH)
    #[arg(long, env = "SOPS_BINARY", value_name = "PATH")]
    pub sops_binary: Option<PathBuf>,

    /// Fail encrypted documents instead of decrypting them
    #[arg(long)]
    pub no_decrypt: bool,

    /// Append audit events as JSON lines to this file instead of the log
    #[arg(long, env = "AUDIT_LOG", value_name = "FILE")]
    pub audit_log: Option<PathBuf>,

    /// Report format on stdout
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}
