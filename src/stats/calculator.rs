//! Performance aggregations over closed copy attempts and equity curves.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use statrs::statistics::Statistics;

use crate::models::{CopyAttemptRecord, CopyStatus};

/// Aggregated follower performance derived from attempt records.
#[derive(Debug, Clone, Default)]
pub struct FollowerPerformance {
    pub total_attempts: u32,
    pub executed: u32,
    pub failed: u32,
    pub skipped: u32,

    /// Closed attempts with a realized PnL
    pub closed_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,

    /// Winners / closed (0.0 to 1.0)
    pub win_rate: f64,

    /// Total realized PnL in quote currency
    pub total_pnl: Decimal,

    /// Mean realized PnL per closed trade
    pub avg_return: Decimal,

    /// Gross profit / gross loss
    pub profit_factor: f64,

    /// Standard deviation of per-trade PnL
    pub return_volatility: f64,
}

/// Calculator for follower performance statistics.
pub struct PerformanceCalculator;

impl PerformanceCalculator {
    /// Aggregate win-rate and return statistics from a follower's attempts.
    pub fn performance(attempts: &[CopyAttemptRecord]) -> FollowerPerformance {
        let mut perf = FollowerPerformance {
            total_attempts: attempts.len() as u32,
            ..Default::default()
        };

        let mut pnls: Vec<Decimal> = Vec::new();
        for attempt in attempts {
            match attempt.status {
                CopyStatus::Executed => perf.executed += 1,
                CopyStatus::Failed => perf.failed += 1,
                CopyStatus::Skipped => perf.skipped += 1,
            }
            if let Some(pnl) = attempt.realized_pnl {
                pnls.push(pnl);
            }
        }

        if pnls.is_empty() {
            return perf;
        }

        perf.closed_trades = pnls.len() as u32;

        let (wins, losses): (Vec<_>, Vec<_>) = pnls.iter().partition(|&&p| p > Decimal::ZERO);
        perf.winning_trades = wins.len() as u32;
        perf.losing_trades = losses.len() as u32;
        perf.win_rate = wins.len() as f64 / pnls.len() as f64;

        perf.total_pnl = pnls.iter().copied().sum();
        perf.avg_return = perf.total_pnl / Decimal::from(pnls.len() as u32);

        let gross_profit: Decimal = wins.iter().copied().sum();
        let gross_loss: Decimal = losses.iter().copied().map(|l: Decimal| l.abs()).sum();
        if gross_loss > Decimal::ZERO {
            perf.profit_factor =
                gross_profit.to_f64().unwrap_or(0.0) / gross_loss.to_f64().unwrap_or(1.0);
        }

        let returns: Vec<f64> = pnls.iter().filter_map(|p| p.to_f64()).collect();
        if returns.len() >= 2 {
            perf.return_volatility = returns.std_dev();
        }

        perf
    }

    /// Maximum drawdown over an equity curve, as a negative percentage.
    ///
    /// Scans for the largest peak-to-trough decline. An empty or
    /// monotonically rising curve yields 0.
    pub fn max_drawdown(equity_curve: &[Decimal]) -> f64 {
        let mut peak = Decimal::MIN;
        let mut max_dd_pct = 0.0f64;

        for &equity in equity_curve {
            if equity > peak {
                peak = equity;
            }
            if peak > Decimal::ZERO {
                let dd = peak - equity;
                let dd_pct = dd.to_f64().unwrap_or(0.0) / peak.to_f64().unwrap_or(1.0) * 100.0;
                if dd_pct > max_dd_pct {
                    max_dd_pct = dd_pct;
                }
            }
        }

        -max_dd_pct
    }

    /// Mean per-trade PnL in f64, for quick operator display.
    pub fn mean_return(pnls: &[Decimal]) -> f64 {
        let returns: Vec<f64> = pnls.iter().filter_map(|p| p.to_f64()).collect();
        if returns.is_empty() {
            return 0.0;
        }
        returns.mean()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MarketKind, TradeSide};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn attempt(status: CopyStatus, pnl: Option<Decimal>) -> CopyAttemptRecord {
        CopyAttemptRecord {
            id: uuid::Uuid::new_v4().to_string(),
            master_event_id: "evt".to_string(),
            strategy_id: "strat-1".to_string(),
            master_id: "master-1".to_string(),
            follower_id: "follower-1".to_string(),
            symbol: "BTCUSDT".to_string(),
            side: TradeSide::Buy,
            market: MarketKind::Futures,
            leverage: dec!(1),
            master_size: dec!(1000),
            follower_size: dec!(100),
            entry_price: dec!(50000),
            equity_at_open: dec!(1000),
            allocation_before: dec!(10),
            allocation_after: dec!(10),
            status,
            failure_reason: None,
            executor_trade_id: None,
            opened_at: Utc::now(),
            closed_at: pnl.map(|_| Utc::now()),
            realized_pnl: pnl,
        }
    }

    #[test]
    fn performance_partitions_wins_and_losses() {
        let attempts = vec![
            attempt(CopyStatus::Executed, Some(dec!(100))),
            attempt(CopyStatus::Executed, Some(dec!(-50))),
            attempt(CopyStatus::Executed, Some(dec!(200))),
            attempt(CopyStatus::Skipped, None),
            attempt(CopyStatus::Failed, None),
        ];

        let perf = PerformanceCalculator::performance(&attempts);
        assert_eq!(perf.total_attempts, 5);
        assert_eq!(perf.executed, 3);
        assert_eq!(perf.skipped, 1);
        assert_eq!(perf.failed, 1);
        assert_eq!(perf.closed_trades, 3);
        assert_eq!(perf.winning_trades, 2);
        assert_eq!(perf.losing_trades, 1);
        assert!((perf.win_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(perf.total_pnl, dec!(250));
    }

    #[test]
    fn max_drawdown_is_negative_percent() {
        // Peak 150, trough 50: 66.7% decline
        let curve = vec![
            dec!(100),
            dec!(150),
            dec!(70),
            dec!(50),
            dec!(150),
            dec!(200),
        ];
        let dd = PerformanceCalculator::max_drawdown(&curve);
        assert!(dd < -66.0 && dd > -67.0);
    }

    #[test]
    fn max_drawdown_zero_for_rising_curve() {
        let curve = vec![dec!(100), dec!(110), dec!(120)];
        assert_eq!(PerformanceCalculator::max_drawdown(&curve), 0.0);
        assert_eq!(PerformanceCalculator::max_drawdown(&[]), 0.0);
    }
}
