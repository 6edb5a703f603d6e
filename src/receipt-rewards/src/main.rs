//! Receipt Rewards — batch driver for the rewards engine.
//!
//! Seeds an in-memory store from a fixture file, processes a batch of
//! receipts concurrently and prints one JSON outcome per receipt followed by
//! a summary of pool availability and operator notifications.

use anyhow::Context;
use clap::Parser;
use loyalty_core::config::AppConfig;
use loyalty_core::event_bus::noop_sink;
use loyalty_core::receipt::{Guest, Receipt};
use loyalty_engine::{ReceiptOutcome, ReceiptPipeline, Repositories};
use loyalty_store::StoreFixtures;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "receipt-rewards")]
#[command(about = "Match receipts to campaigns and grant rewards")]
#[command(version)]
struct Cli {
    /// Campaign and voucher pool fixtures (JSON)
    #[arg(long)]
    fixtures: PathBuf,

    /// Receipt submissions to process (JSON array)
    #[arg(long)]
    receipts: PathBuf,

    /// Node identifier (overrides config)
    #[arg(long, env = "RECEIPT_REWARDS__NODE_ID")]
    node_id: Option<String>,

    /// Print Prometheus exposition after the batch
    #[arg(long, default_value_t = false)]
    print_metrics: bool,
}

#[derive(Debug, Deserialize)]
struct Submission {
    receipt: Receipt,
    guest: Guest,
}

#[derive(Debug, Serialize)]
struct BatchSummary {
    processed: usize,
    failed: usize,
    outcomes: BTreeMap<&'static str, usize>,
    pools: BTreeMap<String, loyalty_core::voucher::PoolAvailability>,
    unread_notifications: Vec<loyalty_core::notification::OperatorNotification>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "receipt_rewards=info,loyalty_engine=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    let metrics_handle = if cli.print_metrics {
        Some(metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?)
    } else {
        None
    };

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    info!(
        node_id = %config.node_id,
        fraud_enabled = config.fraud.enabled,
        validity_days = config.engine.default_validity_days,
        "Configuration loaded"
    );

    let raw = std::fs::read_to_string(&cli.fixtures)
        .with_context(|| format!("reading fixtures {}", cli.fixtures.display()))?;
    let fixtures = StoreFixtures::from_json(&raw)?;
    let reward_types: Vec<String> = fixtures
        .campaigns
        .iter()
        .flat_map(|c| c.reward_types.iter().map(|rt| rt.id.clone()))
        .collect();
    let store = Arc::new(fixtures.into_store());

    let raw = std::fs::read_to_string(&cli.receipts)
        .with_context(|| format!("reading receipts {}", cli.receipts.display()))?;
    let submissions: Vec<Submission> = serde_json::from_str(&raw).context("parsing receipts")?;
    info!(receipts = submissions.len(), "Processing receipt batch");

    let pipeline = Arc::new(ReceiptPipeline::new(
        &config,
        Repositories::from_store(store),
        noop_sink(),
    ));

    let handles: Vec<_> = submissions
        .into_iter()
        .map(|submission| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                let receipt_id = submission.receipt.receipt_id.clone();
                let outcome = pipeline.process(&submission.receipt, &submission.guest).await;
                (receipt_id, outcome)
            })
        })
        .collect();

    let mut summary = BatchSummary {
        processed: 0,
        failed: 0,
        outcomes: BTreeMap::new(),
        pools: BTreeMap::new(),
        unread_notifications: Vec::new(),
    };
    for handle in handles {
        let (receipt_id, outcome) = handle.await?;
        match outcome {
            Ok(outcome) => {
                summary.processed += 1;
                *summary.outcomes.entry(outcome.label()).or_default() += 1;
                print_outcome(&outcome)?;
            }
            Err(e) => {
                summary.failed += 1;
                error!(receipt_id = %receipt_id, error = %e, "Receipt processing failed");
            }
        }
    }

    for reward_type_id in reward_types {
        let availability = pipeline.pool_availability(&reward_type_id).await?;
        summary.pools.insert(reward_type_id, availability);
    }
    summary.unread_notifications = pipeline.unread_notifications().await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if let Some(handle) = metrics_handle {
        println!("{}", handle.render());
    }

    info!(
        processed = summary.processed,
        failed = summary.failed,
        "Receipt batch complete"
    );
    Ok(())
}

fn print_outcome(outcome: &ReceiptOutcome) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(outcome)?);
    Ok(())
}
