//! Polling actor.
//!
//! A single task owns the [`TrackerStore`] and applies every mutation, so
//! each wallet's snapshot and episode are always updated together. Wallets
//! are refreshed one at a time; user commands queue behind an in-flight
//! refresh and a deleted wallet is never fetched again.

use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::api::UpstreamSource;
use crate::ingest;
use crate::kv::KeyValueStore;
use crate::metrics::MetricsCalculator;
use crate::store::{CommandError, TrackerStore};
use crate::types::{TrackingEpisode, WalletId, WalletIdentity, WalletReport};

type Reply<T> = oneshot::Sender<Result<T, CommandError>>;

enum Command {
    AddWallet {
        address: String,
        label: String,
        reply: Reply<WalletIdentity>,
    },
    DeleteWallet {
        id: WalletId,
        reply: Reply<WalletIdentity>,
    },
    UpdateLabel {
        id: WalletId,
        label: String,
        reply: Reply<()>,
    },
    ResetTracking {
        id: WalletId,
        reply: Reply<TrackingEpisode>,
    },
    RefreshAll {
        reply: oneshot::Sender<Vec<WalletReport>>,
    },
    Reports {
        reply: oneshot::Sender<Vec<WalletReport>>,
    },
    Stop,
}

/// Owns the store and drives periodic refreshes.
pub struct Poller<S, K> {
    store: TrackerStore,
    kv: K,
    source: S,
    coin: String,
    calculator: MetricsCalculator,
    interval: Duration,
    reports_tx: Option<mpsc::UnboundedSender<Vec<WalletReport>>>,
}

impl<S: UpstreamSource, K: KeyValueStore + 'static> Poller<S, K> {
    pub fn new(
        store: TrackerStore,
        kv: K,
        source: S,
        calculator: MetricsCalculator,
        coin: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            kv,
            source,
            coin: coin.into(),
            calculator,
            interval,
            reports_tx: None,
        }
    }

    /// Publish the reports of every scheduled refresh on `tx`.
    pub fn with_reports(mut self, tx: mpsc::UnboundedSender<Vec<WalletReport>>) -> Self {
        self.reports_tx = Some(tx);
        self
    }

    /// Spawn the polling task. The first refresh runs immediately.
    pub fn start(self) -> PollerHandle {
        let (tx, rx) = mpsc::channel(32);
        let task = tokio::spawn(self.run(rx));
        PollerHandle { tx, task }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) -> TrackerStore {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "Poller started ({} wallet(s), interval {}s, sell window {}s)",
            self.store.wallets().len(),
            self.interval.as_secs(),
            self.calculator.window().num_seconds()
        );

        // The first tick completes immediately; refresh before taking commands.
        ticker.tick().await;
        self.scheduled_refresh().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.scheduled_refresh().await,
                cmd = rx.recv() => {
                    match cmd {
                        Some(Command::Stop) | None => break,
                        Some(cmd) => self.handle(cmd).await,
                    }
                }
            }
        }

        info!("Poller stopped");
        self.store
    }

    async fn scheduled_refresh(&mut self) {
        let reports = self.refresh_all().await;
        if let Some(tx) = &self.reports_tx {
            let _ = tx.send(reports);
        }
    }

    async fn handle(&mut self, cmd: Command) {
        let now = Utc::now();
        match cmd {
            Command::AddWallet {
                address,
                label,
                reply,
            } => {
                let result = self.store.add_wallet(&address, &label);
                if result.is_ok() {
                    self.persist();
                }
                let _ = reply.send(result);
            }
            Command::DeleteWallet { id, reply } => {
                let result = self.store.delete_wallet(id);
                if result.is_ok() {
                    self.persist();
                }
                let _ = reply.send(result);
            }
            Command::UpdateLabel { id, label, reply } => {
                let result = self.store.update_label(id, &label);
                if result.is_ok() {
                    self.persist();
                }
                let _ = reply.send(result);
            }
            Command::ResetTracking { id, reply } => {
                let result = self.store.reset_tracking(id, now);
                if result.is_ok() {
                    self.persist();
                }
                let _ = reply.send(result);
            }
            Command::RefreshAll { reply } => {
                let reports = self.refresh_all().await;
                let _ = reply.send(reports);
            }
            Command::Reports { reply } => {
                let _ = reply.send(self.store.reports(&self.calculator, now));
            }
            Command::Stop => {}
        }
    }

    /// Fetch, ingest and apply one wallet. Upstream failures are isolated to it.
    pub async fn refresh_wallet(&mut self, wallet: &WalletIdentity) {
        let fetched = self.source.fetch(&wallet.address).await;
        let now = Utc::now();
        let previous = self.store.snapshot(wallet.id);
        let snapshot = match fetched {
            Ok(raw) => ingest::ingest(wallet.id, &raw, &self.coin, previous, now),
            Err(e) => {
                warn!("Fetch failed for {}: {e:#}", wallet.address);
                ingest::degraded(wallet.id, format!("{e:#}"), previous, now)
            }
        };
        if let Err(e) = self.store.apply_snapshot(snapshot, now) {
            debug!("Dropping snapshot: {e}");
        }
    }

    /// Refresh every wallet sequentially, persist, and return fresh reports.
    pub async fn refresh_all(&mut self) -> Vec<WalletReport> {
        let wallets = self.store.wallets().to_vec();
        for wallet in &wallets {
            self.refresh_wallet(wallet).await;
        }
        if !wallets.is_empty() {
            self.persist();
            info!("Refreshed {} wallet(s)", wallets.len());
        }
        self.store.reports(&self.calculator, Utc::now())
    }

    fn persist(&mut self) {
        if let Err(e) = self.store.save(&mut self.kv) {
            warn!("Failed to persist tracker state: {e:#}");
        }
    }
}

/// Client side of a running [`Poller`].
pub struct PollerHandle {
    tx: mpsc::Sender<Command>,
    task: JoinHandle<TrackerStore>,
}

impl PollerHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| anyhow!("poller is not running"))?;
        rx.await.map_err(|_| anyhow!("poller dropped the request"))
    }

    pub async fn add_wallet(&self, address: &str, label: &str) -> Result<WalletIdentity> {
        let (address, label) = (address.to_string(), label.to_string());
        Ok(self
            .request(|reply| Command::AddWallet {
                address,
                label,
                reply,
            })
            .await??)
    }

    pub async fn delete_wallet(&self, id: WalletId) -> Result<WalletIdentity> {
        Ok(self
            .request(|reply| Command::DeleteWallet { id, reply })
            .await??)
    }

    pub async fn update_label(&self, id: WalletId, label: &str) -> Result<()> {
        let label = label.to_string();
        Ok(self
            .request(|reply| Command::UpdateLabel { id, label, reply })
            .await??)
    }

    pub async fn reset_tracking(&self, id: WalletId) -> Result<TrackingEpisode> {
        Ok(self
            .request(|reply| Command::ResetTracking { id, reply })
            .await??)
    }

    /// Refresh every wallet now, outside the regular schedule.
    pub async fn refresh_all(&self) -> Result<Vec<WalletReport>> {
        self.request(|reply| Command::RefreshAll { reply }).await
    }

    /// Current reports without fetching.
    pub async fn reports(&self) -> Result<Vec<WalletReport>> {
        self.request(|reply| Command::Reports { reply }).await
    }

    /// Stop polling and return the final store.
    pub async fn stop(self) -> Result<TrackerStore> {
        let _ = self.tx.send(Command::Stop).await;
        Ok(self.task.await?)
    }
}
