use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;

use crate::UNBONDING_PERIOD_DAYS;
use crate::types::{
    FillSide, Metrics, SellMetrics, Snapshot, TrackingEpisode, WithdrawalCountdown,
};

/// Derives sell-pressure and withdrawal metrics from a snapshot.
#[derive(Debug, Clone)]
pub struct MetricsCalculator {
    coin: String,
    window: Duration,
}

impl MetricsCalculator {
    /// `window` is the look-back over which SELL fills count towards the sell rate.
    pub fn new(coin: impl Into<String>, window: Duration) -> Self {
        Self {
            coin: coin.into(),
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn compute(
        &self,
        snapshot: &Snapshot,
        episode: Option<&TrackingEpisode>,
        now: DateTime<Utc>,
    ) -> Metrics {
        Metrics {
            tracking: episode.map(|e| self.sell_metrics(snapshot, e, now)),
            withdrawal: withdrawal_countdown(snapshot, now),
        }
    }

    /// Sum of tracked-coin SELL sizes inside the window, and the fill count.
    pub fn sell_volume(&self, snapshot: &Snapshot, now: DateTime<Utc>) -> (Decimal, usize) {
        let since = now
            .checked_sub_signed(self.window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        snapshot
            .recent_fills
            .iter()
            .filter(|f| f.side == FillSide::Sell && f.coin == self.coin && f.at >= since)
            .fold((Decimal::ZERO, 0), |(volume, count), f| {
                (volume + f.size, count + 1)
            })
    }

    fn sell_metrics(
        &self,
        snapshot: &Snapshot,
        episode: &TrackingEpisode,
        now: DateTime<Utc>,
    ) -> SellMetrics {
        let balance = snapshot.total_balance();
        let sold = (episode.initial_balance - balance).max(Decimal::ZERO);
        let sold_percentage = if episode.initial_balance > Decimal::ZERO {
            sold / episode.initial_balance * dec!(100)
        } else {
            Decimal::ZERO
        };

        let (sell_volume_window, sell_fill_count) = self.sell_volume(snapshot, now);
        let is_selling = sell_volume_window > Decimal::ZERO;

        let eta_ms = if is_selling && balance > Decimal::ZERO {
            self.extrapolate_ms(balance, sell_volume_window)
        } else {
            None
        };
        let depletes_at = eta_ms
            .and_then(Duration::try_milliseconds)
            .and_then(|eta| now.checked_add_signed(eta));

        SellMetrics {
            initial_balance: episode.initial_balance,
            started_at: episode.started_at,
            sold,
            sold_percentage,
            sell_volume_window,
            sell_fill_count,
            is_selling,
            eta_ms,
            depletes_at,
        }
    }

    /// Time to sell `balance` at the rate of `volume` per window.
    fn extrapolate_ms(&self, balance: Decimal, volume: Decimal) -> Option<i64> {
        let window_ms = Decimal::from(self.window.num_milliseconds());
        balance
            .checked_div(volume)?
            .checked_mul(window_ms)?
            .round()
            .to_i64()
    }
}

/// Countdown for the first pending withdrawal over the fixed unbonding period.
///
/// `None` when nothing is pending, or when the request time is so far in the
/// future that its end time is unrepresentable.
pub fn withdrawal_countdown(snapshot: &Snapshot, now: DateTime<Utc>) -> Option<WithdrawalCountdown> {
    let first = snapshot.pending_withdrawals.first()?;
    let period = Duration::days(UNBONDING_PERIOD_DAYS);
    let end_time = first.requested_at.checked_add_signed(period)?;

    let elapsed_ms = (now - first.requested_at).num_milliseconds();
    let period_ms = period.num_milliseconds();
    let progress = (Decimal::from(elapsed_ms) / Decimal::from(period_ms) * dec!(100))
        .clamp(Decimal::ZERO, dec!(100));

    Some(WithdrawalCountdown {
        amount: first.amount,
        requested_at: first.requested_at,
        end_time,
        remaining_ms: (end_time - now).num_milliseconds().max(0),
        progress,
        is_ready: now >= end_time,
        pending_count: snapshot.pending_withdrawals.len(),
        pending_total: snapshot.pending_withdrawals.iter().map(|w| w.amount).sum(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Fill, PendingWithdrawal};
    use uuid::Uuid;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).expect("valid ts")
    }

    fn calc() -> MetricsCalculator {
        MetricsCalculator::new("HYPE", Duration::hours(24))
    }

    fn snap(on_chain: Decimal, exchange: Decimal) -> Snapshot {
        Snapshot {
            wallet_id: Uuid::new_v4(),
            captured_at: now(),
            on_chain_balance: on_chain,
            exchange_balance: exchange,
            staked_amount: Decimal::ZERO,
            balances: Vec::new(),
            pending_withdrawals: Vec::new(),
            recent_fills: Vec::new(),
            fetch_error: None,
        }
    }

    fn episode(snapshot: &Snapshot, initial: Decimal) -> TrackingEpisode {
        TrackingEpisode {
            wallet_id: snapshot.wallet_id,
            initial_balance: initial,
            started_at: now() - Duration::hours(1),
        }
    }

    fn fill(coin: &str, side: FillSide, size: Decimal, ago: Duration) -> Fill {
        Fill {
            coin: coin.to_string(),
            side,
            size,
            at: now() - ago,
        }
    }

    // ── sell metrics ───────────────────────────────────────────────

    #[test]
    fn idle_wallet_has_no_tracking() {
        let s = snap(dec!(10), dec!(5));
        let m = calc().compute(&s, None, now());
        assert!(!m.is_tracking());
        assert!(m.withdrawal.is_none());
    }

    #[test]
    fn scenario_half_sold() {
        let mut s = snap(dec!(10), dec!(5));
        s.recent_fills.push(fill("HYPE", FillSide::Sell, dec!(15), Duration::minutes(10)));
        let e = episode(&s, dec!(30));

        let m = calc().compute(&s, Some(&e), now()).tracking.expect("tracking");
        assert_eq!(m.sold, dec!(15));
        assert_eq!(m.sold_percentage, dec!(50));
        assert!(m.is_selling);
        assert_eq!(m.sell_volume_window, dec!(15));
        // 15 left at 15 per 24h
        assert_eq!(m.eta_ms, Some(Duration::hours(24).num_milliseconds()));
        assert_eq!(m.depletes_at, Some(now() + Duration::hours(24)));
    }

    #[test]
    fn balance_growth_is_not_negative_sold() {
        let s = snap(dec!(40), dec!(0));
        let e = episode(&s, dec!(30));
        let m = calc().compute(&s, Some(&e), now()).tracking.expect("tracking");
        assert_eq!(m.sold, Decimal::ZERO);
        assert_eq!(m.sold_percentage, Decimal::ZERO);
    }

    #[test]
    fn zero_initial_balance_is_zero_percent() {
        let s = snap(dec!(0), dec!(0));
        let e = episode(&s, Decimal::ZERO);
        let m = calc().compute(&s, Some(&e), now()).tracking.expect("tracking");
        assert_eq!(m.sold_percentage, Decimal::ZERO);
        assert_eq!(m.eta_ms, None);
    }

    #[test]
    fn sold_percentage_within_bounds() {
        let e_initial = dec!(123.456);
        for balance in [dec!(0), dec!(0.001), dec!(61.728), dec!(123.456)] {
            let s = snap(balance, dec!(0));
            let e = episode(&s, e_initial);
            let pct = calc()
                .compute(&s, Some(&e), now())
                .tracking
                .expect("tracking")
                .sold_percentage;
            assert!(pct >= Decimal::ZERO && pct <= dec!(100), "{pct} out of range");
        }
    }

    #[test]
    fn window_filters_fills() {
        let mut s = snap(dec!(100), dec!(0));
        s.recent_fills = vec![
            fill("HYPE", FillSide::Sell, dec!(2), Duration::hours(1)),
            fill("HYPE", FillSide::Sell, dec!(3), Duration::hours(23)),
            fill("HYPE", FillSide::Sell, dec!(100), Duration::hours(25)),
            fill("HYPE", FillSide::Buy, dec!(7), Duration::hours(1)),
            fill("PURR", FillSide::Sell, dec!(9), Duration::hours(1)),
        ];
        assert_eq!(calc().sell_volume(&s, now()), (dec!(5), 2));

        let hourly = MetricsCalculator::new("HYPE", Duration::hours(1));
        assert_eq!(hourly.sell_volume(&s, now()), (dec!(2), 1));
    }

    #[test]
    fn oversized_window_counts_every_fill() {
        let mut s = snap(dec!(100), dec!(0));
        s.recent_fills = vec![
            fill("HYPE", FillSide::Sell, dec!(2), Duration::hours(1)),
            fill("HYPE", FillSide::Sell, dec!(3), Duration::days(9_000)),
        ];
        let wide = MetricsCalculator::new("HYPE", Duration::MAX);
        assert_eq!(wide.sell_volume(&s, now()), (dec!(5), 2));

        let e = episode(&s, dec!(200));
        let m = wide.compute(&s, Some(&e), now()).tracking.expect("tracking");
        assert!(m.is_selling);
        assert_eq!(m.depletes_at, None);
    }

    #[test]
    fn not_selling_has_no_eta() {
        let mut s = snap(dec!(100), dec!(0));
        s.recent_fills.push(fill("HYPE", FillSide::Buy, dec!(5), Duration::hours(1)));
        let e = episode(&s, dec!(100));
        let m = calc().compute(&s, Some(&e), now()).tracking.expect("tracking");
        assert!(!m.is_selling);
        assert_eq!(m.eta_ms, None);
        assert_eq!(m.depletes_at, None);
    }

    #[test]
    fn eta_scales_with_window() {
        let mut s = snap(dec!(10), dec!(0));
        s.recent_fills.push(fill("HYPE", FillSide::Sell, dec!(5), Duration::minutes(5)));
        let e = episode(&s, dec!(20));
        let hourly = MetricsCalculator::new("HYPE", Duration::hours(1));
        let m = hourly.compute(&s, Some(&e), now()).tracking.expect("tracking");
        assert_eq!(m.eta_ms, Some(2 * 60 * 60 * 1000));
    }

    // ── withdrawal countdown ───────────────────────────────────────

    fn with_withdrawal_at(requested_at: DateTime<Utc>) -> Snapshot {
        let mut s = snap(dec!(1), dec!(0));
        s.pending_withdrawals = vec![PendingWithdrawal {
            amount: dec!(10),
            requested_at,
        }];
        s
    }

    fn with_withdrawal(requested_at: DateTime<Utc>) -> Snapshot {
        let mut s = snap(dec!(1), dec!(0));
        s.pending_withdrawals = vec![
            PendingWithdrawal {
                amount: dec!(10),
                requested_at,
            },
            PendingWithdrawal {
                amount: dec!(5),
                requested_at: requested_at + Duration::days(1),
            },
        ];
        s
    }

    #[test]
    fn countdown_halfway() {
        let s = with_withdrawal(now() - Duration::hours(84));
        let c = withdrawal_countdown(&s, now()).expect("countdown");
        assert_eq!(c.progress, dec!(50));
        assert!(!c.is_ready);
        assert_eq!(c.remaining_ms, Duration::hours(84).num_milliseconds());
        assert_eq!(c.amount, dec!(10));
        assert_eq!(c.pending_count, 2);
        assert_eq!(c.pending_total, dec!(15));
    }

    #[test]
    fn countdown_past_end_is_ready() {
        let s = with_withdrawal(now() - Duration::days(7) - Duration::milliseconds(1));
        let c = withdrawal_countdown(&s, now()).expect("countdown");
        assert!(c.is_ready);
        assert_eq!(c.progress, dec!(100));
        assert_eq!(c.remaining_ms, 0);
    }

    #[test]
    fn countdown_clock_skew_clamps_to_zero() {
        let s = with_withdrawal(now() + Duration::minutes(5));
        let c = withdrawal_countdown(&s, now()).expect("countdown");
        assert_eq!(c.progress, Decimal::ZERO);
        assert!(!c.is_ready);
    }

    #[test]
    fn countdown_skips_unrepresentable_end_time() {
        let far = DateTime::<Utc>::MAX_UTC - Duration::seconds(1);
        let s = with_withdrawal_at(far);
        assert_eq!(withdrawal_countdown(&s, now()), None);
        assert!(calc().compute(&s, None, now()).withdrawal.is_none());
    }

    #[test]
    fn countdown_independent_of_episode() {
        let s = with_withdrawal(now() - Duration::days(1));
        let m = calc().compute(&s, None, now());
        assert!(!m.is_tracking());
        assert!(m.withdrawal.is_some());
    }
}
