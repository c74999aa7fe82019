//! Normalization of raw upstream payloads into a [`Snapshot`].
//!
//! Ingestion never fails on a single bad field: unparseable numbers become
//! zero. Only an upstream error produces a degraded snapshot, which carries
//! the wallet's last-known values so downstream consumers never see a
//! spurious drop to zero.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use crate::WEI_DECIMALS;
use crate::api::{RawBalance, UpstreamPayloads};
use crate::types::{BalanceLocation, CoinBalance, Fill, FillSide, PendingWithdrawal, Snapshot, WalletId};

/// Parse a base-10 decimal string, defaulting to zero.
pub fn parse_decimal(raw: Option<&str>) -> Decimal {
    let Some(raw) = raw.map(str::trim) else {
        return Decimal::ZERO;
    };
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .unwrap_or_else(|_| {
            debug!("Malformed decimal {raw:?}, using 0");
            Decimal::ZERO
        })
}

/// Convert a wei amount (`0x`-prefixed hex, or plain decimal digits) to tokens.
pub fn parse_wei(raw: &str) -> Decimal {
    let raw = raw.trim();
    let wei = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some("") => Some(0),
        Some(hex) => u128::from_str_radix(hex, 16).ok(),
        None => raw.parse::<u128>().ok(),
    };
    wei.and_then(|w| i128::try_from(w).ok())
        .and_then(|w| Decimal::try_from_i128_with_scale(w, WEI_DECIMALS).ok())
        .map(|d| d.normalize())
        .unwrap_or_else(|| {
            debug!("Malformed wei balance {raw:?}, using 0");
            Decimal::ZERO
        })
}

/// Parse an epoch-milliseconds string, defaulting to the Unix epoch.
pub fn parse_epoch_ms(raw: Option<&str>) -> DateTime<Utc> {
    raw.map(str::trim)
        .and_then(|s| {
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
        })
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or(DateTime::UNIX_EPOCH)
}

fn non_negative(value: Decimal) -> Decimal {
    value.max(Decimal::ZERO)
}

fn balance_amount(balance: &RawBalance) -> Decimal {
    let raw = balance.total.as_deref().or(balance.hold.as_deref());
    non_negative(parse_decimal(raw))
}

/// Build a snapshot from a successful upstream fetch.
///
/// `previous` supplies the staked amount and fills when those optional
/// queries failed.
pub fn ingest(
    wallet_id: WalletId,
    raw: &UpstreamPayloads,
    coin: &str,
    previous: Option<&Snapshot>,
    captured_at: DateTime<Utc>,
) -> Snapshot {
    let on_chain_balance = non_negative(parse_wei(&raw.native_balance_hex));

    let on_chain = CoinBalance {
        coin: coin.to_string(),
        amount: on_chain_balance,
        location: BalanceLocation::OnChain,
    };
    let balances: Vec<CoinBalance> = std::iter::once(on_chain)
        .chain(raw.spot_state.balances.iter().map(|b| CoinBalance {
            coin: b.coin.clone(),
            amount: balance_amount(b),
            location: BalanceLocation::Exchange,
        }))
        .filter(|b| b.amount > Decimal::ZERO)
        .collect();
    let exchange_balance = balances
        .iter()
        .filter(|b| b.location == BalanceLocation::Exchange && b.coin == coin)
        .map(|b| b.amount)
        .sum();

    let staked_amount = match &raw.staked {
        Some(amount) => non_negative(parse_decimal(Some(amount))),
        None => previous.map(|p| p.staked_amount).unwrap_or_default(),
    };

    let pending_withdrawals = raw
        .spot_state
        .withdraws
        .iter()
        .map(|w| PendingWithdrawal {
            amount: non_negative(parse_decimal(w.amount.as_deref())),
            requested_at: parse_epoch_ms(w.time.as_deref()),
        })
        .collect();

    let recent_fills = match &raw.fills {
        Some(fills) => fills
            .iter()
            .filter_map(|f| {
                let Some(side) = FillSide::from_code(&f.side) else {
                    debug!("Skipping fill with unknown side {:?}", f.side);
                    return None;
                };
                Some(Fill {
                    coin: f.coin.clone(),
                    side,
                    size: non_negative(parse_decimal(f.sz.as_deref())),
                    at: parse_epoch_ms(f.time.as_deref()),
                })
            })
            .collect(),
        None => previous.map(|p| p.recent_fills.clone()).unwrap_or_default(),
    };

    Snapshot {
        wallet_id,
        captured_at,
        on_chain_balance,
        exchange_balance,
        staked_amount,
        balances,
        pending_withdrawals,
        recent_fills,
        fetch_error: None,
    }
}

/// Build the snapshot recorded when the upstream fetch itself failed.
///
/// Numbers, withdrawals and fills carry over from `previous`; with no prior
/// snapshot everything is zero/empty.
pub fn degraded(
    wallet_id: WalletId,
    error: String,
    previous: Option<&Snapshot>,
    captured_at: DateTime<Utc>,
) -> Snapshot {
    match previous {
        Some(prev) => Snapshot {
            wallet_id,
            captured_at,
            fetch_error: Some(error),
            ..prev.clone()
        },
        None => Snapshot {
            wallet_id,
            captured_at,
            on_chain_balance: Decimal::ZERO,
            exchange_balance: Decimal::ZERO,
            staked_amount: Decimal::ZERO,
            balances: Vec::new(),
            pending_withdrawals: Vec::new(),
            recent_fills: Vec::new(),
            fetch_error: Some(error),
        },
    }
}
