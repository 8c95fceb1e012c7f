//! Console monitor for Ingeteam inverters.
//!
//! Runs one polling hub per configured inverter and prints every new
//! snapshot as a JSON line on stdout.

use anyhow::{Context, Result};
use clap::Parser;
use ingeteam_modbus::{ModbusHub, MonitorConfig, TickOutcome, init_tracing};
use serde_json::{Map, json};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{info, warn};

/// Polls Ingeteam hybrid inverters over Modbus/TCP.
#[derive(Parser, Debug)]
#[command(name = "ingeteam-modbus")]
#[command(about = "Polls Ingeteam inverters and prints their measurements")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format)
    #[arg(short, long, default_value = "ingeteam.json5")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Poll every inverter once, print the result and exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = MonitorConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    init_tracing(&config.logging).context("Failed to init tracing")?;

    info!("Starting ingeteam-modbus");
    info!("Loaded configuration from {:?}", args.config);

    let hubs: Vec<Arc<ModbusHub>> = config
        .inverters
        .into_iter()
        .map(|inverter| Arc::new(ModbusHub::new(inverter)))
        .collect();

    if args.once {
        poll_once(&hubs).await
    } else {
        monitor(hubs).await
    }
}

/// Subscribe to every hub and print snapshots until Ctrl-C.
async fn monitor(hubs: Vec<Arc<ModbusHub>>) -> Result<()> {
    let mut subscriptions = Vec::new();
    let mut printers = Vec::new();

    for hub in &hubs {
        let updated = Arc::new(Notify::new());
        let observer = {
            let updated = updated.clone();
            move || updated.notify_one()
        };
        let id = hub.subscribe(observer).await;
        subscriptions.push((hub.clone(), id));

        let hub = hub.clone();
        printers.push(tokio::spawn(async move {
            loop {
                updated.notified().await;
                print_snapshot(&hub);
            }
        }));
    }

    info!("Monitoring {} inverter(s)", hubs.len());

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    for (hub, id) in subscriptions {
        hub.unsubscribe(id).await;
    }
    for printer in printers {
        printer.abort();
    }

    info!("Monitor stopped");
    Ok(())
}

/// Read every hub once and print the result.
async fn poll_once(hubs: &[Arc<ModbusHub>]) -> Result<()> {
    let mut failed = Vec::new();

    for hub in hubs {
        let id = hub.subscribe(|| {}).await;
        let outcome = hub.refresh().await;
        hub.unsubscribe(id).await;

        match outcome {
            TickOutcome::Updated { .. } => print_snapshot(hub),
            other => {
                warn!(hub = %hub.name(), outcome = ?other, "No data read");
                failed.push(hub.name().to_string());
            }
        }
    }

    if !failed.is_empty() {
        anyhow::bail!("Failed to read {}", failed.join(", "));
    }
    Ok(())
}

fn print_snapshot(hub: &ModbusHub) {
    let snapshot = hub.snapshot();
    let mut values = Map::new();
    for field in hub.visible_fields() {
        if let Some(value) = snapshot.get(field.key) {
            values.insert(field.key.to_string(), json!(value));
        }
    }

    let line = json!({
        "hub": hub.name(),
        "captured_at": snapshot.captured_at(),
        "values": values,
    });
    println!("{}", line);
}
