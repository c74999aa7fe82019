use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tracking::TrackingState;

/// Opaque wallet identifier, assigned when the wallet is added.
pub type WalletId = Uuid;

/// A tracked address and its user-facing label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletIdentity {
    pub id: WalletId,
    /// `0x`-prefixed, 40 hex chars. Stored as entered.
    pub address: String,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FillSide {
    Buy,
    Sell,
}

impl FillSide {
    /// Map the exchange side code: `"A"` is the ask (sell), `"B"` the bid (buy).
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "A" => Some(FillSide::Sell),
            "B" => Some(FillSide::Buy),
            _ => None,
        }
    }
}

/// An executed trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    pub coin: String,
    pub side: FillSide,
    pub size: Decimal,
    pub at: DateTime<Utc>,
}

/// An unstaking request waiting out the unbonding period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingWithdrawal {
    pub amount: Decimal,
    pub requested_at: DateTime<Utc>,
}

/// Where a balance is held.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceLocation {
    /// Native balance on the EVM chain.
    OnChain,
    #[default]
    Exchange,
}

/// Non-zero balance of any coin, on-chain or on the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinBalance {
    pub coin: String,
    pub amount: Decimal,
    #[serde(default)]
    pub location: BalanceLocation,
}

/// Latest normalized view of one wallet's on-chain and exchange state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub wallet_id: WalletId,
    pub captured_at: DateTime<Utc>,
    pub on_chain_balance: Decimal,
    pub exchange_balance: Decimal,
    pub staked_amount: Decimal,
    /// Every non-zero balance: the on-chain tracked coin first, then the exchange balances.
    #[serde(default)]
    pub balances: Vec<CoinBalance>,
    /// Upstream order; the first entry is the active withdrawal.
    pub pending_withdrawals: Vec<PendingWithdrawal>,
    pub recent_fills: Vec<Fill>,
    #[serde(default)]
    pub fetch_error: Option<String>,
}

impl Snapshot {
    /// On-chain plus exchange balance of the tracked coin.
    pub fn total_balance(&self) -> Decimal {
        self.on_chain_balance + self.exchange_balance
    }

    pub fn has_pending_withdrawals(&self) -> bool {
        !self.pending_withdrawals.is_empty()
    }
}

/// A sell-tracking window measured against a fixed starting balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingEpisode {
    pub wallet_id: WalletId,
    pub initial_balance: Decimal,
    pub started_at: DateTime<Utc>,
}

/// Sell-pressure figures for an active tracking episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellMetrics {
    pub initial_balance: Decimal,
    pub started_at: DateTime<Utc>,
    pub sold: Decimal,
    pub sold_percentage: Decimal,
    /// Tracked-coin SELL volume inside the configured window.
    pub sell_volume_window: Decimal,
    pub sell_fill_count: usize,
    pub is_selling: bool,
    /// Linear extrapolation of the time left until the balance is sold out.
    /// `None` while not selling or already empty.
    pub eta_ms: Option<i64>,
    pub depletes_at: Option<DateTime<Utc>>,
}

/// Countdown for the first pending withdrawal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalCountdown {
    pub amount: Decimal,
    pub requested_at: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub remaining_ms: i64,
    /// Elapsed share of the unbonding period, clamped to `[0, 100]`.
    pub progress: Decimal,
    pub is_ready: bool,
    pub pending_count: usize,
    pub pending_total: Decimal,
}

/// Derived metrics for one wallet at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub tracking: Option<SellMetrics>,
    pub withdrawal: Option<WithdrawalCountdown>,
}

impl Metrics {
    pub fn is_tracking(&self) -> bool {
        self.tracking.is_some()
    }
}

/// Everything the presentation layer needs for one wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletReport {
    pub timestamp: String,
    pub wallet: WalletIdentity,
    pub state: TrackingState,
    pub total_balance: Option<Decimal>,
    pub snapshot: Option<Snapshot>,
    pub metrics: Metrics,
}
