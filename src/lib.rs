pub mod api;
pub mod config;
pub mod ingest;
pub mod kv;
pub mod metrics;
pub mod poller;
pub mod reporter;
pub mod store;
pub mod tracking;
pub mod types;

/// Coin whose sell pressure is tracked.
pub const TRACKED_COIN: &str = "HYPE";

/// HyperEVM JSON-RPC endpoint (public, no auth required)
pub const RPC_URL: &str = "https://rpc.hyperliquid.xyz/evm";

/// Hyperliquid info API endpoint (POST JSON)
pub const INFO_API_URL: &str = "https://api.hyperliquid.xyz/info";

/// CORS proxy prefix used for the single fallback re-request.
pub const CORS_PROXY_URL: &str = "https://corsproxy.io/?";

/// Fixed unbonding delay between a withdrawal request and funds becoming available.
pub const UNBONDING_PERIOD_DAYS: i64 = 7;

/// Native balances are reported in wei (10^18 per token).
pub const WEI_DECIMALS: u32 = 18;
