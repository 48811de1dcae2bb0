//! # Secret Reconciler
//!
//! Reconciles secret documents declared in a source tree into a remote secret store.
//!
//! Exit status:
//! - `0`: the run finished clean (or degraded with `--allow-degraded`)
//! - `1`: the run could not start (bad configuration, unreadable source, store unavailable)
//! - `2`: the run finished with failed items

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands, OutputFormat, RunArgs};
use secret_reconciler::config::{EngineConfig, ReconcileOptions};
use secret_reconciler::constants::{AUDIT_SHUTDOWN_FLUSH_SECS, MIN_RECONCILE_INTERVAL_SECS};
use secret_reconciler::controller::reconciler::{PlannedRun, ReconciliationResult, Reconciler};
use secret_reconciler::decrypt::{Decryptor, DisabledDecryptor, SopsDecryptor};
use secret_reconciler::observability::audit::{
    AuditBackend, AuditSink, BufferedAuditSink, JsonLinesAuditBackend, LogAuditBackend,
};
use secret_reconciler::observability::{init_logging, metrics};
use secret_reconciler::provider::http::HttpSecretStore;
use secret_reconciler::provider::memory::MemoryStore;
use secret_reconciler::provider::RemoteStore;
use secret_reconciler::runtime::WatchLoop;
use secret_reconciler::secret::SecretValue;
use secret_reconciler::server::{start_server, ServerState};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const MEMORY_STORE_URL: &str = "memory://";

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // .env must be loaded before clap reads env-backed flags
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();
    let config = EngineConfig::from_env();

    init_logging(&config.log_level, &config.log_format)?;
    match dotenv {
        Ok(path) => info!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => warn!("Ignoring unreadable .env file: {}", e),
    }

    metrics::register_metrics()?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, finishing in-flight items");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Commands::Plan(run) => plan(&config, &run).await,
        Commands::Reconcile {
            run,
            dry_run,
            allow_degraded,
        } => reconcile(&config, &run, dry_run, allow_degraded, &cancel).await,
        Commands::Watch { run, interval_secs } => watch(&config, &run, interval_secs, &cancel).await,
    }
}

async fn plan(config: &EngineConfig, args: &RunArgs) -> Result<ExitCode> {
    let (reconciler, _) = build_reconciler(config, args, None)?;
    let options = reconcile_options(config, args, false);

    let planned = reconciler.plan(&args.source, &options).await?;
    print_plan(&planned, args.output)?;
    Ok(ExitCode::SUCCESS)
}

async fn reconcile(
    config: &EngineConfig,
    args: &RunArgs,
    dry_run: bool,
    allow_degraded: bool,
    cancel: &CancellationToken,
) -> Result<ExitCode> {
    let audit_shutdown = CancellationToken::new();
    let (reconciler, audit) = build_reconciler(config, args, Some(audit_shutdown.clone()))?;
    let options = reconcile_options(config, args, dry_run);

    let result = reconciler.reconcile(&args.source, &options, cancel).await;
    shutdown_audit(audit, audit_shutdown).await;

    let result = result?;
    print_result(&result, args.output)?;

    if result.is_clean() || allow_degraded {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(2))
    }
}

async fn watch(
    config: &EngineConfig,
    args: &RunArgs,
    interval_secs: Option<u64>,
    cancel: &CancellationToken,
) -> Result<ExitCode> {
    let audit_shutdown = CancellationToken::new();
    let (reconciler, audit) = build_reconciler(config, args, Some(audit_shutdown.clone()))?;
    let options = reconcile_options(config, args, false);

    let interval = interval_secs.map_or_else(
        || config.reconcile_interval(),
        |secs| Duration::from_secs(secs.max(MIN_RECONCILE_INTERVAL_SECS)),
    );

    let server_state = Arc::new(ServerState::default());
    let server = {
        let state = Arc::clone(&server_state);
        let shutdown = cancel.clone();
        let port = config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = start_server(port, state, shutdown).await {
                error!("HTTP server error: {}", e);
            }
        })
    };

    let mut watch_loop = WatchLoop::new(reconciler, &args.source, options, interval);
    let outcome = watch_loop.run(&server_state, cancel).await;

    cancel.cancel();
    if let Err(e) = server.await {
        warn!("HTTP server task ended abnormally: {}", e);
    }
    shutdown_audit(audit, audit_shutdown).await;

    outcome?;
    Ok(ExitCode::SUCCESS)
}

/// Wire the store, decryptor and audit sink selected on the command line
fn build_reconciler(
    config: &EngineConfig,
    args: &RunArgs,
    audit_shutdown: Option<CancellationToken>,
) -> Result<(Reconciler, Option<AuditTask>)> {
    let settings = config.settings();
    settings.validate()?;

    let store: Arc<dyn RemoteStore> = if args.store_url == MEMORY_STORE_URL {
        warn!("Using a throwaway in-process store, nothing outlives this process");
        Arc::new(MemoryStore::new())
    } else {
        let token = args.store_token.as_deref().map(SecretValue::from);
        Arc::new(HttpSecretStore::with_timeout(
            &args.store_url,
            token,
            settings.store_timeout,
        )?)
    };

    let decryptor: Arc<dyn Decryptor> = if args.no_decrypt {
        Arc::new(DisabledDecryptor)
    } else if let Some(binary) = &args.sops_binary {
        Arc::new(SopsDecryptor::with_binary(binary))
    } else {
        Arc::new(SopsDecryptor::new())
    };

    let mut source_options = config.source_options();
    if let Some(prefix) = &args.prefix {
        source_options.name_prefix = Some(prefix.clone());
    }

    let mut reconciler = Reconciler::new(store)
        .with_decryptor(decryptor)
        .with_source_options(source_options)
        .with_settings(settings);

    let mut audit_task = None;
    if let Some(shutdown) = audit_shutdown {
        let backend: Arc<dyn AuditBackend> = match &args.audit_log {
            Some(path) => {
                info!("Writing audit events to {}", path.display());
                Arc::new(JsonLinesAuditBackend::new(path))
            }
            None => Arc::new(LogAuditBackend),
        };
        let (sink, handle) =
            BufferedAuditSink::spawn(backend, config.audit_buffer_capacity, shutdown);
        reconciler = reconciler.with_audit(Arc::clone(&sink) as Arc<dyn AuditSink>);
        audit_task = Some(AuditTask { sink, handle });
    }

    Ok((reconciler, audit_task))
}

struct AuditTask {
    sink: Arc<BufferedAuditSink>,
    handle: tokio::task::JoinHandle<()>,
}

/// Flush queued audit events, then stop the flusher
async fn shutdown_audit(audit: Option<AuditTask>, shutdown: CancellationToken) {
    let Some(AuditTask { sink, handle }) = audit else {
        return;
    };
    if !sink
        .flush(Duration::from_secs(AUDIT_SHUTDOWN_FLUSH_SECS))
        .await
    {
        warn!("{} audit events were not written before shutdown", sink.pending());
    }
    shutdown.cancel();
    if let Err(e) = handle.await {
        warn!("Audit flusher ended abnormally: {}", e);
    }
    if sink.dropped() > 0 {
        warn!("{} audit events were dropped because the queue was full", sink.dropped());
    }
}

fn reconcile_options(config: &EngineConfig, args: &RunArgs, dry_run: bool) -> ReconcileOptions {
    ReconcileOptions {
        prune_unmanaged: args.prune,
        concurrency_limit: args.concurrency.unwrap_or(config.concurrency_limit),
        dry_run,
    }
}

fn print_plan(planned: &PlannedRun, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let failures: Vec<serde_json::Value> = planned
                .scan_failures
                .iter()
                .map(|f| {
                    serde_json::json!({
                        "path": f.path,
                        "name": f.name,
                        "kind": f.error.kind(),
                        "error": f.error.to_string(),
                    })
                })
                .collect();
            let report = serde_json::json!({
                "runId": planned.run_id,
                "items": planned.describe(),
                "scanFailures": failures,
                "unresolved": planned.unresolved,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("Failed to serialize plan")?
            );
        }
        OutputFormat::Text => {
            for entry in planned.describe() {
                let checksum = entry
                    .checksum_after
                    .as_ref()
                    .or(entry.checksum_before.as_ref())
                    .map(ToString::to_string)
                    .unwrap_or_default();
                println!("{:<7} {} {}", entry.action, entry.name, checksum);
            }
            for failure in &planned.scan_failures {
                println!("error   {}: {}", failure.path.display(), failure.error);
            }
        }
    }
    Ok(())
}

fn print_result(result: &ReconciliationResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(result).context("Failed to serialize result")?
        ),
        OutputFormat::Text => {
            for item in &result.items {
                let action = item.action.map_or("error", |a| a.as_str());
                match item.outcome.reason() {
                    Some(reason) => println!(
                        "{:<7} {} {} ({})",
                        action,
                        item.name,
                        item.outcome.status(),
                        reason
                    ),
                    None => println!("{:<7} {} {}", action, item.name, item.outcome.status()),
                }
            }
            println!(
                "{:?}: {} applied, {} skipped, {} failed",
                result.status, result.summary.applied, result.summary.skipped, result.summary.failed
            );
        }
    }
    Ok(())
}
