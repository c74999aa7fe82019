use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use futures_util::future::join4;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::{EndpointsConfig, StakingConfig};

/// Raw upstream payloads for one wallet, before normalization.
#[derive(Debug, Clone, Default)]
pub struct UpstreamPayloads {
    /// `eth_getBalance` result: hex-encoded wei.
    pub native_balance_hex: String,
    pub spot_state: SpotState,
    /// Staked amount as a decimal string. `None` when the staking query failed.
    pub staked: Option<String>,
    /// `None` when the fills query failed.
    pub fills: Option<Vec<RawFill>>,
}

/// Response of the `spotClearinghouseState` info query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpotState {
    #[serde(default)]
    pub balances: Vec<RawBalance>,
    #[serde(default, alias = "unbonding")]
    pub withdraws: Vec<RawWithdrawal>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub staking: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBalance {
    #[serde(default)]
    pub coin: String,
    #[serde(default, deserialize_with = "lenient_number")]
    pub hold: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub total: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawWithdrawal {
    #[serde(default, deserialize_with = "lenient_number")]
    pub amount: Option<String>,
    /// Epoch milliseconds.
    #[serde(default, deserialize_with = "lenient_number")]
    pub time: Option<String>,
}

/// One record of the `userFills` info query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFill {
    #[serde(default)]
    pub coin: String,
    /// `"A"` (ask, sell) or `"B"` (bid, buy).
    #[serde(default)]
    pub side: String,
    #[serde(default, deserialize_with = "lenient_number")]
    pub sz: Option<String>,
    /// Epoch milliseconds.
    #[serde(default, deserialize_with = "lenient_number")]
    pub time: Option<String>,
}

/// Accept numbers sent either as JSON strings or JSON numbers; anything else is `None`.
fn lenient_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Source of raw wallet payloads. The poller only depends on this seam.
pub trait UpstreamSource: Send + Sync + 'static {
    fn fetch(&self, address: &str) -> impl Future<Output = Result<UpstreamPayloads>> + Send;
}

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    message: String,
}

/// HTTP client for the HyperEVM RPC and the Hyperliquid info API.
pub struct HyperliquidClient {
    http: reqwest::Client,
    rpc_url: String,
    info_url: String,
    cors_proxy: String,
    staking: StakingConfig,
}

impl HyperliquidClient {
    pub fn new(
        endpoints: &EndpointsConfig,
        staking: &StakingConfig,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            rpc_url: endpoints.rpc_url.clone(),
            info_url: endpoints.info_url.clone(),
            cors_proxy: endpoints.cors_proxy.clone(),
            staking: staking.clone(),
        })
    }

    /// Native balance of `address` as hex-encoded wei.
    pub async fn native_balance(&self, address: &str) -> Result<String> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method: "eth_getBalance",
            params: json!([address, "latest"]),
        };
        let response = self.http.post(&self.rpc_url).json(&request).send().await?;
        if !response.status().is_success() {
            bail!("RPC request failed: {}", response.status());
        }
        let body: JsonRpcResponse<String> = response.json().await?;
        body.result.ok_or_else(|| {
            anyhow!(
                "eth_getBalance returned no result: {}",
                body.error.map(|e| e.message).unwrap_or_default()
            )
        })
    }

    /// POST `{type, user}` to the info API and return the raw JSON.
    ///
    /// A failed or non-2xx direct request is retried once through the CORS proxy.
    pub async fn raw_info(&self, query_kind: &str, address: &str) -> Result<Value> {
        let body = json!({ "type": query_kind, "user": address });
        match self.post_json(&self.info_url, &body).await {
            Ok(value) => Ok(value),
            Err(e) if !self.cors_proxy.is_empty() => {
                warn!("{query_kind} for {address} failed ({e}), retrying via proxy");
                let encoded: String =
                    url::form_urlencoded::byte_serialize(self.info_url.as_bytes()).collect();
                let proxied = format!("{}{}", self.cors_proxy, encoded);
                self.post_json(&proxied, &body)
                    .await
                    .with_context(|| format!("{query_kind} failed directly and via proxy"))
            }
            Err(e) => Err(e.context(format!("{query_kind} failed"))),
        }
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value> {
        let response = self.http.post(url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            bail!("info API returned {status}");
        }
        Ok(response.json().await?)
    }

    async fn info<T: DeserializeOwned + Default>(&self, query_kind: &str, address: &str) -> Result<T> {
        let value = self.raw_info(query_kind, address).await?;
        if value.is_null() {
            return Ok(T::default());
        }
        serde_json::from_value(value).with_context(|| format!("unexpected {query_kind} shape"))
    }

    pub async fn spot_state(&self, address: &str) -> Result<SpotState> {
        self.info("spotClearinghouseState", address).await
    }

    pub async fn user_fills(&self, address: &str) -> Result<Vec<RawFill>> {
        let fills: Vec<RawFill> = self.info("userFills", address).await?;
        debug!("Fetched {} fills for {address}", fills.len());
        Ok(fills)
    }

    /// Staked amount from the configured staking query.
    ///
    /// Returns `Ok(None)` when no separate query is configured.
    pub async fn staked_amount(&self, address: &str) -> Result<Option<String>> {
        if self.staking.query.is_empty() {
            return Ok(None);
        }
        let value = self.raw_info(&self.staking.query, address).await?;
        Ok(Some(extract_number(&value, &self.staking.field).unwrap_or_else(|| "0".to_string())))
    }
}

/// Read `field` from a JSON object as a numeric string.
fn extract_number(value: &Value, field: &str) -> Option<String> {
    match value.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl UpstreamSource for HyperliquidClient {
    /// Balance and spot state are required; staking and fills degrade independently.
    async fn fetch(&self, address: &str) -> Result<UpstreamPayloads> {
        let (balance, spot, staked, fills) = join4(
            self.native_balance(address),
            self.spot_state(address),
            self.staked_amount(address),
            self.user_fills(address),
        )
        .await;

        let native_balance_hex = balance.context("native balance unavailable")?;
        let spot_state = spot.context("spot clearinghouse state unavailable")?;

        let staked = match staked {
            Ok(Some(amount)) => Some(amount),
            Ok(None) => Some(spot_state.staking.clone().unwrap_or_else(|| "0".to_string())),
            Err(e) => {
                warn!("Staking query failed for {address}: {e:#}");
                None
            }
        };
        let fills = match fills {
            Ok(fills) => Some(fills),
            Err(e) => {
                warn!("Fills query failed for {address}: {e:#}");
                None
            }
        };

        Ok(UpstreamPayloads {
            native_balance_hex,
            spot_state,
            staked,
            fills,
        })
    }
}
