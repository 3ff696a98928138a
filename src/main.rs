mod api;
mod database;
mod error;
mod ingest;
mod models;
mod normalize;
mod reconcile;

use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use chrono::{Datelike, Utc};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::api::MopsClient;
use crate::database::RevenueStore;
use crate::ingest::Ingestor;
use crate::models::{Config, IngestionSummary, Market};

/// Fetch monthly revenue disclosures from MOPS and store them locally.
#[derive(Debug, Parser)]
#[command(name = "mops-revenue", version)]
struct Args {
    /// Gregorian year. Defaults to the previous month's year.
    #[arg(long)]
    year: Option<i32>,

    /// Month 1-12. Defaults to the previous month.
    #[arg(long)]
    month: Option<u32>,

    /// Comma separated markets: sii,otc,rotc
    #[arg(long, default_value = "sii,otc,rotc")]
    markets: String,
}

/// Previous month is the default: the freshest period whose filings are
/// complete.
fn previous_month(now: chrono::NaiveDate) -> (i32, u32) {
    let first_of_month = now.with_day(1).expect("day 1 always valid");
    let last_month = first_of_month.pred_opt().expect("no date before 0001-01-01");
    (last_month.year(), last_month.month())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("mops_revenue=info")),
        )
        .init();

    let args = Args::parse();
    let (default_year, default_month) = previous_month(Utc::now().date_naive());
    let year = args.year.unwrap_or(default_year);
    let month = args.month.unwrap_or(default_month);

    let markets = args
        .markets
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(Market::from_str)
        .collect::<Result<Vec<_>>>()?;

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let store = RevenueStore::open(&config.database_path).await?;
    let client = MopsClient::new(&config)?;
    let ingestor = Ingestor::new(Arc::new(client), store.clone(), &config);

    // ctrl-c stops new markets from starting; in-flight work finishes
    let cancel = ingestor.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Cancellation requested, finishing in-flight markets...");
            cancel.cancel();
        }
    });

    let result = ingestor.run(year, month, &markets).await;
    store.close().await;

    match result {
        Ok(summary) => {
            print_summary(year, month, &summary);
            Ok(())
        }
        Err(e) => {
            error!("Ingestion run failed: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_summary(year: i32, month: u32, summary: &IngestionSummary) {
    println!("Monthly revenue {}-{:02}", year, month);
    println!("Saved records: {}", summary.total);
    println!(
        "Per market: {}",
        summary
            .per_market
            .iter()
            .map(|(market, count)| format!("{}:{}", market.label(), count))
            .collect::<Vec<_>>()
            .join(", ")
    );

    for (market, reason) in &summary.failed_markets {
        println!("Market {} ({}) failed: {}", market.label(), market, reason);
    }
    if !summary.skipped_markets.is_empty() {
        println!(
            "Skipped (cancelled): {}",
            summary
                .skipped_markets
                .iter()
                .map(|m| m.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    if summary.normalization_failures > 0 || summary.write_failures > 0 {
        println!(
            "Dropped rows: {} unnormalizable, {} write failures",
            summary.normalization_failures, summary.write_failures
        );
    }

    if summary.missing.is_empty() {
        println!("All registry companies have revenue data for this month.");
    } else {
        println!("Companies missing revenue data ({}):", summary.missing.len());
        for company in &summary.missing {
            println!(
                "  {} {} ({})",
                company.stock_id,
                company.company_name,
                company.market.label()
            );
        }
    }
}
