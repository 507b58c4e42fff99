use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use opstream_client::logging::init_logging;
use opstream_client::{
    resolve_config, resolve_log_dir, shared_ledger, ConfigFlags, SseTransport, StreamClient,
    TracingNotifier,
};
use opstream_core::ledger::{Ledger, OperationLedger};
use opstream_core::OperationRecord;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "opstream", about = "Follow a server's live operation stream")]
struct Args {
    #[arg(long, default_value = "")]
    url: String,
    #[arg(long, default_value = "")]
    auth_header: String,
    #[arg(long, default_value_t = false)]
    insecure: bool,
    #[arg(long)]
    watchdog_secs: Option<u64>,
    #[arg(long)]
    retry_ms: Option<u64>,
    #[arg(long, default_value = "")]
    log_dir: String,
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_guard = init_logging(&resolve_log_dir(&args.log_dir));

    let config = resolve_config(&ConfigFlags {
        url: args.url.clone(),
        auth_header: args.auth_header.clone(),
        insecure: args.insecure,
        watchdog_secs: args.watchdog_secs,
        retry_ms: args.retry_ms,
    })?;
    info!(
        event = "opstream_starting",
        endpoint = %config.endpoint,
        watchdog = ?config.watchdog_window,
        retry = ?config.retry_delay,
        log_file = ?log_guard.as_ref().and_then(|guard| guard.path()),
    );

    let transport = SseTransport::new(config.clone()).context("building http client")?;
    let ledger = shared_ledger(OperationLedger::new());
    let handle = StreamClient::new(config, transport, ledger, TracingNotifier).start();

    let mut reconnecting = handle.reconnecting();
    let watcher = tokio::spawn(async move {
        while reconnecting.changed().await.is_ok() {
            let origin = *reconnecting.borrow_and_update();
            match origin {
                Some(origin) => warn!(event = "reconnecting", origin = %origin),
                None => info!(event = "reconnected"),
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    info!(event = "opstream_shutdown");

    let records = handle.with_ledger(|ledger| ledger.records().to_vec());
    handle.dispose().await?;
    watcher.abort();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        for record in &records {
            println!("{}", summary_line(record));
        }
    }
    Ok(())
}

fn summary_line(record: &OperationRecord) -> String {
    let started = DateTime::<Utc>::from_timestamp_millis(record.started_at_ms)
        .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| record.started_at_ms.to_string());
    let mut line = format!(
        "{} {} [{}] {}",
        record.key,
        started,
        record.status,
        record.title
    );
    if let Some(progress) = record.progress.filter(|progress| progress.total() > 0) {
        line.push_str(&format!(" progress={}/{}", progress.completed, progress.total()));
    }
    if let Some(caller) = &record.caller {
        line.push_str(&format!(" by={}", caller.as_str()));
    }
    if record.counters.warnings > 0 || record.counters.errors > 0 {
        line.push_str(&format!(
            " warnings={} errors={}",
            record.counters.warnings, record.counters.errors
        ));
    }
    if let Some(error) = &record.error {
        line.push_str(&format!(" error={error}"));
    }
    line
}
