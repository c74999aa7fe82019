//! Per-wallet sell-tracking state machine.
//!
//! A wallet is `Idle` until its withdrawal queue drains (edge from a non-zero
//! count to zero) while it still holds a balance; it then stays `Tracking`
//! until the wallet is deleted. Explicit resets restart the measurement.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{Snapshot, TrackingEpisode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackingState {
    Idle,
    Tracking,
}

impl TrackingState {
    pub fn of(episode: Option<&TrackingEpisode>) -> Self {
        if episode.is_some() {
            TrackingState::Tracking
        } else {
            TrackingState::Idle
        }
    }
}

/// True when the withdrawal queue went from non-empty to empty between snapshots.
pub fn withdrawals_drained(previous: Option<&Snapshot>, current: &Snapshot) -> bool {
    previous.is_some_and(Snapshot::has_pending_withdrawals) && !current.has_pending_withdrawals()
}

/// Decide whether `current` starts a new episode.
///
/// Returns the episode to store, or `None` when nothing changes. An existing
/// episode is never replaced here.
pub fn transition(
    previous: Option<&Snapshot>,
    current: &Snapshot,
    episode: Option<&TrackingEpisode>,
    now: DateTime<Utc>,
) -> Option<TrackingEpisode> {
    if episode.is_some() || current.fetch_error.is_some() {
        return None;
    }
    if !withdrawals_drained(previous, current) {
        return None;
    }
    let balance = current.total_balance();
    if balance <= Decimal::ZERO {
        return None;
    }
    Some(TrackingEpisode {
        wallet_id: current.wallet_id,
        initial_balance: balance,
        started_at: now,
    })
}

/// Restart measurement from the current balance.
pub fn reset(current: &Snapshot, now: DateTime<Utc>) -> TrackingEpisode {
    TrackingEpisode {
        wallet_id: current.wallet_id,
        initial_balance: current.total_balance(),
        started_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PendingWithdrawal;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).expect("valid ts")
    }

    fn snap(id: Uuid, on_chain: Decimal, exchange: Decimal, withdrawals: usize) -> Snapshot {
        Snapshot {
            wallet_id: id,
            captured_at: ts(0),
            on_chain_balance: on_chain,
            exchange_balance: exchange,
            staked_amount: Decimal::ZERO,
            balances: Vec::new(),
            pending_withdrawals: (0..withdrawals)
                .map(|_| PendingWithdrawal {
                    amount: dec!(10),
                    requested_at: ts(0),
                })
                .collect(),
            recent_fills: Vec::new(),
            fetch_error: None,
        }
    }

    /// Replays snapshots the way the store does; returns the index that started tracking.
    fn replay(snaps: &[Snapshot]) -> Option<(usize, TrackingEpisode)> {
        let mut previous: Option<&Snapshot> = None;
        let mut started = None;
        let mut episode: Option<TrackingEpisode> = None;
        for (i, s) in snaps.iter().enumerate() {
            if let Some(new) = transition(previous, s, episode.as_ref(), ts(i as i64)) {
                started.get_or_insert((i, new.clone()));
                episode = Some(new);
            }
            previous = Some(s);
        }
        started
    }

    #[test]
    fn starts_only_on_drop_to_zero() {
        let id = Uuid::new_v4();
        let snaps = [
            snap(id, dec!(100), dec!(0), 2),
            snap(id, dec!(100), dec!(0), 2),
            snap(id, dec!(100), dec!(0), 0),
        ];
        let (idx, episode) = replay(&snaps).expect("tracking started");
        assert_eq!(idx, 2);
        assert_eq!(episode.initial_balance, dec!(100));
        assert_eq!(episode.started_at, ts(2));
    }

    #[test]
    fn first_snapshot_without_withdrawals_stays_idle() {
        let id = Uuid::new_v4();
        let snaps = [snap(id, dec!(100), dec!(0), 0), snap(id, dec!(90), dec!(0), 0)];
        assert!(replay(&snaps).is_none());
    }

    #[test]
    fn partial_drain_does_not_trigger() {
        let id = Uuid::new_v4();
        let snaps = [snap(id, dec!(5), dec!(0), 3), snap(id, dec!(5), dec!(0), 1)];
        assert!(replay(&snaps).is_none());
    }

    #[test]
    fn zero_balance_does_not_trigger() {
        let id = Uuid::new_v4();
        let snaps = [snap(id, dec!(5), dec!(0), 1), snap(id, dec!(0), dec!(0), 0)];
        assert!(replay(&snaps).is_none());
    }

    #[test]
    fn existing_episode_not_replaced() {
        let id = Uuid::new_v4();
        let prev = snap(id, dec!(50), dec!(0), 1);
        let cur = snap(id, dec!(40), dec!(0), 0);
        let episode = TrackingEpisode {
            wallet_id: id,
            initial_balance: dec!(80),
            started_at: ts(0),
        };
        assert!(transition(Some(&prev), &cur, Some(&episode), ts(10)).is_none());
    }

    #[test]
    fn degraded_snapshot_does_not_trigger() {
        let id = Uuid::new_v4();
        let prev = snap(id, dec!(50), dec!(0), 1);
        let mut cur = snap(id, dec!(50), dec!(0), 0);
        cur.fetch_error = Some("down".to_string());
        assert!(transition(Some(&prev), &cur, None, ts(1)).is_none());
    }

    #[test]
    fn scenario_initial_balance_is_total() {
        let id = Uuid::new_v4();
        let s1 = snap(id, dec!(100), dec!(50), 1);
        let s2 = snap(id, dec!(20), dec!(10), 0);
        assert!(transition(None, &s1, None, ts(0)).is_none());
        let episode = transition(Some(&s1), &s2, None, ts(30)).expect("started");
        assert_eq!(episode.initial_balance, dec!(30));
        assert_eq!(TrackingState::of(Some(&episode)), TrackingState::Tracking);
        assert_eq!(TrackingState::of(None), TrackingState::Idle);
    }

    #[test]
    fn reset_uses_latest_balance() {
        let id = Uuid::new_v4();
        let first = reset(&snap(id, dec!(30), dec!(0), 0), ts(1));
        let second = reset(&snap(id, dec!(12), dec!(3), 0), ts(2));
        assert_eq!(first.initial_balance, dec!(30));
        assert_eq!(second.initial_balance, dec!(15));
        assert_eq!(second.started_at, ts(2));
    }
}
