//! Probe: raw info API responses for one address
//!
//! POSTs each candidate query kind to the info API and documents:
//! - Response shape and fields
//! - Where withdrawal (unbonding) entries live
//! - Which staking query/field actually carries the staked amount
//!
//! Usage: probe_info <address> [query kinds...]

use std::time::Instant;

use anyhow::{Context, Result};
use serde_json::Value;

use hype_tracker::api::HyperliquidClient;
use hype_tracker::config::{AppConfig, CONFIG_PATH};

const DEFAULT_QUERIES: [&str; 5] = [
    "spotClearinghouseState",
    "userStaking",
    "delegatorSummary",
    "userWithdrawalRequests",
    "userFills",
];

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let mut args = std::env::args().skip(1);
    let address = args.next().context("usage: probe_info <address> [query kinds...]")?;
    let extra: Vec<String> = args.collect();
    let queries: Vec<&str> = if extra.is_empty() {
        DEFAULT_QUERIES.to_vec()
    } else {
        extra.iter().map(String::as_str).collect()
    };

    let config = AppConfig::load_or_default(std::path::Path::new(CONFIG_PATH))?;
    let client = HyperliquidClient::new(
        &config.endpoints,
        &config.staking,
        config.settings.request_timeout(),
    )?;

    println!("=== Probe: info API ===");
    println!("Address: {address}");
    println!("Endpoint: {}", config.endpoints.info_url);
    println!();

    println!("--- eth_getBalance ---");
    match client.native_balance(&address).await {
        Ok(hex) => println!("Result: {hex}"),
        Err(e) => println!("Error: {e:#}"),
    }
    println!();

    for query in queries {
        println!("--- {query} ---");
        let start = Instant::now();
        let result = client.raw_info(query, &address).await;
        println!("Latency: {:?}", start.elapsed());
        match result {
            Ok(body) => describe(&body)?,
            Err(e) => println!("Error: {e:#}"),
        }
        println!();
    }

    println!("=== Probe Complete ===");
    Ok(())
}

fn describe(body: &Value) -> Result<()> {
    match body {
        Value::Array(items) => {
            println!("Array of {} item(s)", items.len());
            if let Some(first) = items.first() {
                println!("Sample (first):");
                println!("{}", serde_json::to_string_pretty(first)?);
            }
        }
        Value::Object(obj) => {
            println!("Fields present:");
            for (key, value) in obj {
                let preview = value.to_string();
                let preview: String = preview.chars().take(60).collect();
                println!("  - {key:<24} {preview}");
            }
        }
        other => println!("{other}"),
    }
    Ok(())
}
