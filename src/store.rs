use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::kv::KeyValueStore;
use crate::metrics::MetricsCalculator;
use crate::tracking::{self, TrackingState};
use crate::types::{Metrics, Snapshot, TrackingEpisode, WalletId, WalletIdentity, WalletReport};

pub const WALLETS_KEY: &str = "wallets";
pub const SNAPSHOTS_KEY: &str = "snapshots";
pub const EPISODES_KEY: &str = "episodes";

/// Rejections at the user-command boundary. State is unchanged when returned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("invalid address {0:?}: expected 0x followed by 40 hex characters")]
    InvalidAddress(String),
    #[error("address {0} is already tracked")]
    DuplicateAddress(String),
    #[error("unknown wallet {0}")]
    UnknownWallet(WalletId),
    #[error("wallet {0} has no snapshot yet; refresh first")]
    NoSnapshot(WalletId),
}

/// `0x` followed by exactly 40 hex digits.
pub fn validate_address(address: &str) -> Result<(), CommandError> {
    let valid = address
        .strip_prefix("0x")
        .is_some_and(|hex| hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()));
    if valid {
        Ok(())
    } else {
        Err(CommandError::InvalidAddress(address.to_string()))
    }
}

/// `0x1234...abcd`. Falls back to the whole address when it is too short to abbreviate.
fn default_label(address: &str) -> String {
    let head = address.get(..6);
    let tail = address.len().checked_sub(4).and_then(|i| address.get(i..));
    match (head, tail) {
        (Some(head), Some(tail)) if address.len() > 10 => format!("{head}...{tail}"),
        _ => address.to_string(),
    }
}

/// Owns every wallet together with its latest snapshot and tracking episode.
///
/// The latest snapshot doubles as the previous snapshot for the next
/// transition, so the edge detection survives restarts once saved.
#[derive(Debug, Default)]
pub struct TrackerStore {
    wallets: Vec<WalletIdentity>,
    snapshots: HashMap<WalletId, Snapshot>,
    episodes: HashMap<WalletId, TrackingEpisode>,
}

fn read_json<T: DeserializeOwned + Default>(kv: &dyn KeyValueStore, key: &str) -> Result<T> {
    match kv.get(key)? {
        Some(raw) => serde_json::from_str(&raw).with_context(|| format!("corrupt {key} entry")),
        None => Ok(T::default()),
    }
}

impl TrackerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore state from the key-value store, dropping wallets whose address
    /// is no longer valid and entries of unknown wallets.
    pub fn load(kv: &dyn KeyValueStore) -> Result<Self> {
        let mut wallets: Vec<WalletIdentity> = read_json(kv, WALLETS_KEY)?;
        wallets.retain(|w| match validate_address(w.address.trim()) {
            Ok(()) => true,
            Err(e) => {
                warn!("Skipping stored wallet {}: {e}", w.id);
                false
            }
        });
        let mut snapshots: HashMap<WalletId, Snapshot> = read_json(kv, SNAPSHOTS_KEY)?;
        let mut episodes: HashMap<WalletId, TrackingEpisode> = read_json(kv, EPISODES_KEY)?;

        let known = |id: &WalletId| wallets.iter().any(|w| w.id == *id);
        let before = snapshots.len() + episodes.len();
        snapshots.retain(|id, _| known(id));
        episodes.retain(|id, _| known(id));
        let dropped = before - snapshots.len() - episodes.len();
        if dropped > 0 {
            warn!("Dropped {dropped} orphaned snapshot/episode entries");
        }

        info!(
            "Loaded {} wallet(s), {} tracking episode(s)",
            wallets.len(),
            episodes.len()
        );
        Ok(Self {
            wallets,
            snapshots,
            episodes,
        })
    }

    /// Persist all three maps. An empty store clears its keys.
    pub fn save(&self, kv: &mut dyn KeyValueStore) -> Result<()> {
        if self.wallets.is_empty() {
            for key in [WALLETS_KEY, SNAPSHOTS_KEY, EPISODES_KEY] {
                kv.remove(key)?;
            }
            return Ok(());
        }
        kv.set(WALLETS_KEY, &serde_json::to_string(&self.wallets)?)?;
        kv.set(SNAPSHOTS_KEY, &serde_json::to_string(&self.snapshots)?)?;
        kv.set(EPISODES_KEY, &serde_json::to_string(&self.episodes)?)?;
        Ok(())
    }

    pub fn wallets(&self) -> &[WalletIdentity] {
        &self.wallets
    }

    pub fn wallet(&self, id: WalletId) -> Option<&WalletIdentity> {
        self.wallets.iter().find(|w| w.id == id)
    }

    /// Look a wallet up by id or (case-insensitive) address.
    pub fn find(&self, id_or_address: &str) -> Option<&WalletIdentity> {
        match Uuid::parse_str(id_or_address) {
            Ok(id) => self.wallet(id),
            Err(_) => self
                .wallets
                .iter()
                .find(|w| w.address.eq_ignore_ascii_case(id_or_address)),
        }
    }

    pub fn snapshot(&self, id: WalletId) -> Option<&Snapshot> {
        self.snapshots.get(&id)
    }

    pub fn episode(&self, id: WalletId) -> Option<&TrackingEpisode> {
        self.episodes.get(&id)
    }

    pub fn state(&self, id: WalletId) -> TrackingState {
        TrackingState::of(self.episode(id))
    }

    pub fn add_wallet(&mut self, address: &str, label: &str) -> Result<WalletIdentity, CommandError> {
        let address = address.trim();
        validate_address(address)?;
        if self
            .wallets
            .iter()
            .any(|w| w.address.eq_ignore_ascii_case(address))
        {
            return Err(CommandError::DuplicateAddress(address.to_string()));
        }
        let label = match label.trim() {
            "" => default_label(address),
            l => l.to_string(),
        };
        let wallet = WalletIdentity {
            id: Uuid::new_v4(),
            address: address.to_string(),
            label,
        };
        info!("Added wallet {} ({})", wallet.address, wallet.label);
        self.wallets.push(wallet.clone());
        Ok(wallet)
    }

    /// Remove a wallet together with its snapshot and episode.
    pub fn delete_wallet(&mut self, id: WalletId) -> Result<WalletIdentity, CommandError> {
        let idx = self
            .wallets
            .iter()
            .position(|w| w.id == id)
            .ok_or(CommandError::UnknownWallet(id))?;
        let wallet = self.wallets.remove(idx);
        self.snapshots.remove(&id);
        self.episodes.remove(&id);
        info!("Removed wallet {}", wallet.address);
        Ok(wallet)
    }

    pub fn update_label(&mut self, id: WalletId, label: &str) -> Result<(), CommandError> {
        let wallet = self
            .wallets
            .iter_mut()
            .find(|w| w.id == id)
            .ok_or(CommandError::UnknownWallet(id))?;
        wallet.label = match label.trim() {
            "" => default_label(&wallet.address),
            l => l.to_string(),
        };
        Ok(())
    }

    /// Restart (or manually start) tracking from the wallet's current balance.
    pub fn reset_tracking(
        &mut self,
        id: WalletId,
        now: DateTime<Utc>,
    ) -> Result<TrackingEpisode, CommandError> {
        if self.wallet(id).is_none() {
            return Err(CommandError::UnknownWallet(id));
        }
        let snapshot = self.snapshots.get(&id).ok_or(CommandError::NoSnapshot(id))?;
        let episode = tracking::reset(snapshot, now);
        info!(
            "Tracking reset for {id}: initial balance {}",
            episode.initial_balance
        );
        self.episodes.insert(id, episode.clone());
        Ok(episode)
    }

    /// Record a new snapshot and run the tracking transition against the previous one.
    ///
    /// Returns the episode if this snapshot started one.
    pub fn apply_snapshot(
        &mut self,
        snapshot: Snapshot,
        now: DateTime<Utc>,
    ) -> Result<Option<TrackingEpisode>, CommandError> {
        let id = snapshot.wallet_id;
        let Some(wallet) = self.wallet(id) else {
            return Err(CommandError::UnknownWallet(id));
        };

        let started = tracking::transition(
            self.snapshots.get(&id),
            &snapshot,
            self.episodes.get(&id),
            now,
        );
        if let Some(episode) = &started {
            info!(
                "Withdrawals cleared for {}: tracking sales from {}",
                wallet.address, episode.initial_balance
            );
            self.episodes.insert(id, episode.clone());
        }
        self.snapshots.insert(id, snapshot);
        Ok(started)
    }

    pub fn metrics(&self, id: WalletId, calculator: &MetricsCalculator, now: DateTime<Utc>) -> Metrics {
        self.snapshot(id)
            .map(|s| calculator.compute(s, self.episode(id), now))
            .unwrap_or_default()
    }

    /// Reports for all wallets, in insertion order.
    pub fn reports(&self, calculator: &MetricsCalculator, now: DateTime<Utc>) -> Vec<WalletReport> {
        self.wallets
            .iter()
            .map(|wallet| {
                let snapshot = self.snapshot(wallet.id).cloned();
                WalletReport {
                    timestamp: now.to_rfc3339(),
                    wallet: wallet.clone(),
                    state: self.state(wallet.id),
                    total_balance: snapshot.as_ref().map(Snapshot::total_balance),
                    metrics: self.metrics(wallet.id, calculator, now),
                    snapshot,
                }
            })
            .collect()
    }
}
