use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::Config;
use crate::trading::events::{EventKind, EventLog};
use crate::trading::trade_record::{Outcome, TradeJournal, TradeRecord};

use super::runner::EquityPoint;

#[derive(Debug, Clone, Serialize)]
pub struct BacktestReport {
    // Period
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub days: f64,
    pub bars: usize,

    // Performance
    pub initial_balance: f64,
    pub final_equity: f64,
    pub total_pnl: f64,
    pub total_return_pct: f64,

    // Trades
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub breakeven_trades: usize,
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub profit_factor: f64,
    pub best_trade: f64,
    pub worst_trade: f64,
    pub avg_trade: f64,
    /// Mean R-multiple per trade.
    pub expectancy_r: f64,
    pub total_commission: f64,

    // Risk
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,

    // Zones
    pub zones_registered: usize,
    pub zones_entered: usize,
    pub rejections: usize,
    pub addons: usize,

    pub exit_stats: BTreeMap<String, GroupStats>,
    pub sync_stats: BTreeMap<String, GroupStats>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GroupStats {
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub avg_pnl: f64,
}

impl GroupStats {
    fn add(&mut self, record: &TradeRecord) {
        self.trades += 1;
        self.total_pnl += record.realized_pnl;
        match record.outcome {
            Outcome::Win => self.wins += 1,
            Outcome::Loss => self.losses += 1,
            Outcome::Breakeven => {}
        }
    }

    fn finish(&mut self) {
        if self.trades > 0 {
            self.win_rate = self.wins as f64 / self.trades as f64 * 100.0;
            self.avg_pnl = self.total_pnl / self.trades as f64;
        }
    }
}

impl BacktestReport {
    pub fn from_run(
        cfg: &Config,
        journal: &TradeJournal,
        equity_curve: &[EquityPoint],
        events: &EventLog,
    ) -> Self {
        let initial = cfg.initial_balance;
        let final_equity = equity_curve.last().map_or(initial, |p| p.equity);
        let total_pnl = final_equity - initial;
        let start = equity_curve.first().map(|p| p.timestamp).unwrap_or_default();
        let end = equity_curve.last().map_or(start, |p| p.timestamp);
        let days = (end - start).num_hours() as f64 / 24.0;

        let trades = journal.as_slice();
        let total_trades = trades.len();
        let wins: Vec<f64> = trades
            .iter()
            .filter(|t| t.outcome == Outcome::Win)
            .map(|t| t.realized_pnl)
            .collect();
        let losses: Vec<f64> = trades
            .iter()
            .filter(|t| t.outcome == Outcome::Loss)
            .map(|t| t.realized_pnl)
            .collect();
        let winning = wins.len();
        let losing = losses.len();

        let win_rate = if total_trades > 0 {
            winning as f64 / total_trades as f64 * 100.0
        } else {
            0.0
        };
        let avg_win = mean(&wins);
        let avg_loss = mean(&losses);
        let gross_loss = losses.iter().sum::<f64>().abs();
        let profit_factor = if gross_loss > 0.0 {
            wins.iter().sum::<f64>() / gross_loss
        } else if !wins.is_empty() {
            f64::INFINITY
        } else {
            0.0
        };

        let pnls: Vec<f64> = trades.iter().map(|t| t.realized_pnl).collect();
        let best_trade = pnls.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let worst_trade = pnls.iter().copied().fold(f64::INFINITY, f64::min);
        let r_multiples: Vec<f64> = trades.iter().map(|t| t.r_multiple).collect();

        let (max_drawdown, max_drawdown_pct) = drawdown(equity_curve);

        let mut exit_stats: BTreeMap<String, GroupStats> = BTreeMap::new();
        let mut sync_stats: BTreeMap<String, GroupStats> = BTreeMap::new();
        for t in trades {
            exit_stats.entry(t.exit_reason.to_string()).or_default().add(t);
            sync_stats.entry(t.sync_mode.to_string()).or_default().add(t);
        }
        exit_stats.values_mut().for_each(GroupStats::finish);
        sync_stats.values_mut().for_each(GroupStats::finish);

        BacktestReport {
            start,
            end,
            days,
            bars: equity_curve.len(),
            initial_balance: initial,
            final_equity,
            total_pnl,
            total_return_pct: if initial > 0.0 {
                total_pnl / initial * 100.0
            } else {
                0.0
            },
            total_trades,
            winning_trades: winning,
            losing_trades: losing,
            breakeven_trades: total_trades - winning - losing,
            win_rate,
            avg_win,
            avg_loss,
            profit_factor,
            best_trade: if total_trades > 0 { best_trade } else { 0.0 },
            worst_trade: if total_trades > 0 { worst_trade } else { 0.0 },
            avg_trade: mean(&pnls),
            expectancy_r: mean(&r_multiples),
            total_commission: trades.iter().map(TradeRecord::commission).sum(),
            max_drawdown,
            max_drawdown_pct,
            sharpe_ratio: compute_sharpe(equity_curve),
            zones_registered: events.count(|e| matches!(e, EventKind::ZoneRegistered { .. })),
            zones_entered: events.count(|e| matches!(e, EventKind::Entered { .. })),
            rejections: events.count(|e| {
                matches!(e, EventKind::EntryRejected { .. } | EventKind::AddOnRejected { .. })
            }),
            addons: events.count(|e| matches!(e, EventKind::AddOnOpened { .. })),
            exit_stats,
            sync_stats,
        }
    }

    pub fn print_summary(&self) {
        println!("\n{}", "=".repeat(70));
        println!("  BACKTEST REPORT");
        println!("{}", "=".repeat(70));
        println!(
            "  Period:      {} to {} ({:.0} days, {} bars)",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d"),
            self.days,
            self.bars
        );
        println!();
        println!("  PERFORMANCE");
        println!("  ───────────────────────────────────");
        println!("  Initial:     ${:.2}", self.initial_balance);
        println!("  Final:       ${:.2}", self.final_equity);
        println!("  PnL:         ${:+.2}", self.total_pnl);
        println!("  Return:      {:+.1}%", self.total_return_pct);
        println!("  Fees:        ${:.2}", self.total_commission);
        println!();
        println!("  TRADES");
        println!("  ───────────────────────────────────");
        println!("  Total:       {}", self.total_trades);
        println!(
            "  W/L/BE:      {} / {} / {}",
            self.winning_trades, self.losing_trades, self.breakeven_trades
        );
        println!("  Win Rate:    {:.1}%", self.win_rate);
        println!("  Avg Win:     ${:+.2}", self.avg_win);
        println!("  Avg Loss:    ${:+.2}", self.avg_loss);
        println!("  Best:        ${:+.2}", self.best_trade);
        println!("  Worst:       ${:+.2}", self.worst_trade);
        println!("  Avg Trade:   ${:+.2}", self.avg_trade);
        println!("  Expectancy:  {:+.2}R", self.expectancy_r);
        println!("  Profit Factor: {:.2}", self.profit_factor);
        println!();
        println!("  RISK");
        println!("  ───────────────────────────────────");
        println!("  Max DD:      ${:.2} ({:.1}%)", self.max_drawdown, self.max_drawdown_pct);
        println!("  Sharpe:      {:.2}", self.sharpe_ratio);
        println!();
        println!("  ZONES");
        println!("  ───────────────────────────────────");
        println!("  Registered:  {}", self.zones_registered);
        println!("  Entered:     {}", self.zones_entered);
        println!("  Add-ons:     {}", self.addons);
        println!("  Rejected:    {}", self.rejections);

        if !self.exit_stats.is_empty() {
            println!();
            println!("  BY EXIT");
            println!("  ───────────────────────────────────");
            for (reason, stats) in &self.exit_stats {
                println!(
                    "  {:>12}: {} trades | WR {:.0}% | PnL ${:+.2} | Avg ${:+.2}",
                    reason, stats.trades, stats.win_rate, stats.total_pnl, stats.avg_pnl
                );
            }
        }

        if !self.sync_stats.is_empty() {
            println!();
            println!("  BY SYNC MODE");
            println!("  ───────────────────────────────────");
            for (mode, stats) in &self.sync_stats {
                println!(
                    "  {:>12}: {} trades | WR {:.0}% | PnL ${:+.2}",
                    mode, stats.trades, stats.win_rate, stats.total_pnl
                );
            }
        }

        println!("{}", "=".repeat(70));
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Largest peak-to-trough fall, absolute and as % of the peak.
fn drawdown(equity_curve: &[EquityPoint]) -> (f64, f64) {
    let mut peak = f64::NEG_INFINITY;
    let mut max_dd = 0.0f64;
    let mut max_dd_pct = 0.0f64;
    for p in equity_curve {
        peak = peak.max(p.equity);
        let dd = peak - p.equity;
        if dd > max_dd {
            max_dd = dd;
            max_dd_pct = if peak > 0.0 { dd / peak * 100.0 } else { 0.0 };
        }
    }
    (max_dd, max_dd_pct)
}

fn compute_sharpe(equity_curve: &[EquityPoint]) -> f64 {
    if equity_curve.len() < 2 {
        return 0.0;
    }

    // Sample once per day
    let mut daily_values: Vec<f64> = Vec::new();
    let mut last_day = None;
    for p in equity_curve {
        let day = p.timestamp.date_naive();
        if last_day != Some(day) {
            daily_values.push(p.equity);
            last_day = Some(day);
        }
    }

    if daily_values.len() < 2 {
        return 0.0;
    }

    let returns: Vec<f64> = daily_values
        .windows(2)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    if std_dev == 0.0 {
        return 0.0;
    }

    // Crypto trades every day
    mean / std_dev * 365.0_f64.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{base_time, default_test_config};
    use chrono::Duration;

    fn point(i: usize, equity: f64) -> EquityPoint {
        EquityPoint {
            bar_index: i,
            timestamp: base_time() + Duration::days(i as i64),
            equity,
            cash: equity,
            open_positions: 0,
        }
    }

    #[test]
    fn drawdown_from_peak() {
        let curve = vec![point(0, 100.0), point(1, 120.0), point(2, 90.0), point(3, 130.0)];
        let (dd, pct) = drawdown(&curve);
        assert!((dd - 30.0).abs() < 1e-9);
        assert!((pct - 25.0).abs() < 1e-9);
    }

    #[test]
    fn empty_run_reports_zeroes() {
        let cfg = default_test_config();
        let curve = vec![point(0, 10_000.0), point(1, 10_000.0)];
        let report = BacktestReport::from_run(&cfg, &TradeJournal::new(), &curve, &EventLog::new());
        assert_eq!(report.total_trades, 0);
        assert!((report.total_pnl).abs() < 1e-9);
        assert!((report.profit_factor).abs() < 1e-9);
        assert!((report.sharpe_ratio).abs() < 1e-9);
        assert!((report.days - 1.0).abs() < 1e-9);
    }
}
