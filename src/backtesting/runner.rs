use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::Range;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::data::TimeframeStore;
use crate::error::SimError;
use crate::models::{Candle, Timeframe};
use crate::strategies::context::ContextEngine;
use crate::strategies::signals::{Signal, SignalKind};
use crate::strategies::state_machine::BarContext;
use crate::strategies::zone::{Zone, ZoneSummary};
use crate::strategies::ZoneRegistry;
use crate::trading::events::{EventKind, EventLog};
use crate::trading::portfolio::{EntryMeta, Portfolio};
use crate::trading::trade_record::TradeJournal;

use super::report::BacktestReport;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EquityPoint {
    pub bar_index: usize,
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
    pub cash: f64,
    pub open_positions: usize,
}

/// Everything a run produces. Read-only from here on.
pub struct BacktestResult {
    pub journal: TradeJournal,
    pub equity_curve: Vec<EquityPoint>,
    pub events: EventLog,
    pub zones: Vec<Zone>,
    pub report: BacktestReport,
}

/// Steps through the execution timeframe bar by bar. Per bar, in order:
/// 1. register zones and refresh context for every bar closed since the last step
/// 2. feed the bar to every active zone
/// 3. exits and stop moves
/// 4. entries and add-ons
/// 5. mark to market
pub struct BacktestRunner {
    store: TimeframeStore,
    config: Config,
    context: ContextEngine,
    registry: ZoneRegistry,
    portfolio: Portfolio,
    events: EventLog,
    equity_curve: Vec<EquityPoint>,
    /// Last bar index already handled on each timeframe.
    last_closed: BTreeMap<Timeframe, usize>,
}

impl BacktestRunner {
    pub fn new(store: TimeframeStore, config: Config) -> Result<Self, SimError> {
        config.validate()?;
        let required = [config.execution_tf, config.htf_bias_tf, config.ltf_bias_tf]
            .into_iter()
            .chain(config.zone_timeframes.iter().copied());
        for tf in required {
            if !store.contains(tf) {
                return Err(SimError::MissingTimeframe(tf));
            }
        }
        if store.candles(config.execution_tf).map_or(true, |c| c.is_empty()) {
            return Err(SimError::EmptyInput);
        }

        Ok(Self {
            context: ContextEngine::new(&config),
            registry: ZoneRegistry::new(),
            portfolio: Portfolio::new(&config),
            events: EventLog::new(),
            equity_curve: Vec::new(),
            last_closed: BTreeMap::new(),
            store,
            config,
        })
    }

    pub fn run(mut self) -> Result<BacktestResult, SimError> {
        let exec_tf = self.config.execution_tf;
        let bars: Vec<Candle> = self
            .store
            .candles(exec_tf)
            .map(|c| c.as_slice().to_vec())
            .ok_or(SimError::MissingTimeframe(exec_tf))?;
        let total = bars.len();
        let log_interval = (total / 20).max(1);

        info!("=== BACKTEST START ===");
        info!(
            "Period: {} to {} ({} {} bars)",
            bars[0].timestamp.format("%Y-%m-%d %H:%M"),
            bars[total - 1].timestamp.format("%Y-%m-%d %H:%M"),
            total,
            exec_tf
        );
        info!("Initial balance: ${:.2}", self.config.initial_balance);

        for (k, bar) in bars.iter().enumerate() {
            self.step(k, bar)?;

            if (k + 1) % log_interval == 0 {
                info!(
                    "  Progress: {:.0}% | {} | Equity: ${:.2} | Trades: {} | Zones: {}",
                    (k + 1) as f64 / total as f64 * 100.0,
                    bar.timestamp.format("%Y-%m-%d %H:%M"),
                    self.portfolio.equity(),
                    self.portfolio.journal().len(),
                    self.registry.len(),
                );
            }
        }

        self.close_remaining(total - 1, &bars[total - 1])?;
        info!("=== BACKTEST COMPLETE ===");

        let journal = self.portfolio.into_journal();
        let report = BacktestReport::from_run(&self.config, &journal, &self.equity_curve, &self.events);
        Ok(BacktestResult {
            journal,
            equity_curve: self.equity_curve,
            events: self.events,
            zones: self.registry.into_zones(),
            report,
        })
    }

    fn step(&mut self, k: usize, bar: &Candle) -> Result<(), SimError> {
        let exec_tf = self.config.execution_tf;
        let Some(t) = self.store.close_time(exec_tf, k) else {
            return Err(SimError::MissingTimeframe(exec_tf));
        };

        // 1. Boundaries
        let timeframes: Vec<Timeframe> = self.store.timeframes().collect();
        for tf in timeframes {
            let fresh = self
                .store
                .newly_closed(tf, self.last_closed.get(&tf).copied(), t);
            if fresh.is_empty() {
                continue;
            }
            self.last_closed.insert(tf, fresh.end - 1);
            self.on_boundary(tf, fresh, k, bar);
        }

        // 2. Zones
        let zones = self.registry.summaries();
        let signals = {
            let ctx = bar_context(&self.store, &self.context, &self.config, k, bar, t, &zones)?;
            let mut signals = Vec::new();
            for zone in self.registry.active_mut() {
                signals.extend(zone.on_bar(&ctx, &mut self.events));
            }
            self.add_flips(&mut signals, &ctx);
            signals
        };

        // 3 + 4. Exit-class first so freed slots are reusable on this bar.
        let (exits, entries): (Vec<Signal>, Vec<Signal>) =
            signals.into_iter().partition(Signal::is_exit_class);
        for signal in &exits {
            self.apply_exit(signal)?;
        }
        for signal in &entries {
            self.apply_entry(signal)?;
        }

        // 5. Mark
        self.portfolio.mark_to_market(bar);
        self.equity_curve.push(EquityPoint {
            bar_index: k,
            timestamp: bar.timestamp,
            equity: self.portfolio.equity(),
            cash: self.portfolio.cash(),
            open_positions: self.portfolio.positions().len(),
        });
        Ok(())
    }

    /// Context reads only the latest closed bar; registration replays every
    /// bar in `fresh` so a missing execution bar cannot drop a zone.
    fn on_boundary(&mut self, tf: Timeframe, fresh: Range<usize>, k: usize, bar: &Candle) {
        let Some(latest) = self.store.view_at(tf, fresh.end - 1) else {
            return;
        };
        let cfg = &self.config;

        if tf == cfg.htf_bias_tf || tf == cfg.ltf_bias_tf {
            let change = self.context.refresh(latest, cfg);
            if let Some(bias) = change.bias {
                self.events
                    .push(k, bar.timestamp, None, EventKind::BiasUpdated { timeframe: tf, bias });
            }
            if let Some(mode) = change.sync {
                self.events
                    .push(k, bar.timestamp, None, EventKind::SyncUpdated { mode });
            }
        }

        if !cfg.zone_timeframes.contains(&tf) {
            return;
        }
        for index in fresh {
            let Some(view) = self.store.view_at(tf, index) else {
                continue;
            };
            let registration = self.registry.register_from(view, cfg, k, bar.timestamp);
            for id in &registration.registered {
                if let Some(zone) = self.registry.get(id) {
                    self.events.push(
                        k,
                        bar.timestamp,
                        Some(*id),
                        EventKind::ZoneRegistered {
                            direction: zone.direction,
                            top: zone.top,
                            bottom: zone.bottom,
                            strength: zone.strength,
                        },
                    );
                }
            }
            for c in registration.rejected {
                debug!(timeframe = %c.timeframe, top = c.top, bottom = c.bottom, "Rejected degenerate zone");
                self.events.push(
                    k,
                    bar.timestamp,
                    None,
                    EventKind::ZoneRejected {
                        timeframe: c.timeframe,
                        direction: c.direction,
                        top: c.top,
                        bottom: c.bottom,
                    },
                );
            }
        }
    }

    /// An entry against an open zone's direction closes that zone first.
    fn add_flips(&self, signals: &mut Vec<Signal>, ctx: &BarContext<'_>) {
        if !self.config.flip_enabled {
            return;
        }
        let entering: Vec<_> = signals
            .iter()
            .filter(|s| s.is_entry())
            .map(|s| s.direction)
            .collect();
        for direction in entering {
            let flips: Vec<Signal> = self
                .registry
                .positioned()
                .filter(|z| z.direction == direction.opposite())
                .filter(|z| {
                    !signals
                        .iter()
                        .any(|s| s.zone_id == z.id && matches!(s.kind, SignalKind::Exit { .. }))
                })
                .filter_map(|z| z.flip_exit(ctx))
                .collect();
            for flip in flips {
                debug!(zone = %flip.zone_id, "Flip exit");
                signals.push(flip);
            }
        }
    }

    fn apply_exit(&mut self, signal: &Signal) -> Result<(), SimError> {
        let id = signal.zone_id;
        if !self.registry.contains(&id) {
            return Err(SimError::UnknownZone(id));
        }
        let (k, ts) = (signal.bar_index, signal.timestamp);

        match signal.kind {
            SignalKind::Exit { reason } => {
                let records = self.portfolio.close(&id, signal.price, k, ts, reason)?;
                for r in &records {
                    self.events.push(
                        k,
                        ts,
                        Some(id),
                        EventKind::Exited {
                            trade_id: r.trade_id,
                            reason,
                            price: r.exit_price,
                            pnl: r.realized_pnl,
                        },
                    );
                }
                if let Some(zone) = self.registry.get_mut(&id) {
                    zone.on_closed();
                }
            }
            SignalKind::MoveStopToBreakeven { trigger } => {
                self.portfolio.move_stops(&id, signal.stop);
                self.events.push(
                    k,
                    ts,
                    Some(id),
                    EventKind::BreakevenMoved {
                        trigger,
                        stop: signal.stop,
                    },
                );
            }
            SignalKind::ModifyStop => {
                self.portfolio.move_stops(&id, signal.stop);
                self.events
                    .push(k, ts, Some(id), EventKind::StopModified { stop: signal.stop });
            }
            SignalKind::Enter { .. } | SignalKind::AddOn { .. } => {}
        }
        Ok(())
    }

    fn apply_entry(&mut self, signal: &Signal) -> Result<(), SimError> {
        let id = signal.zone_id;
        let zone = self.registry.get_mut(&id).ok_or(SimError::UnknownZone(id))?;
        let meta = EntryMeta {
            sync_mode: self.context.sync(),
            confirmations: zone.confirmation_count(),
        };
        let (k, ts) = (signal.bar_index, signal.timestamp);

        match (signal.kind, self.portfolio.open(signal, meta)) {
            (SignalKind::Enter { .. }, Ok(pos)) => {
                self.events.push(
                    k,
                    ts,
                    Some(id),
                    EventKind::Entered {
                        trade_id: pos.trade_id,
                        price: pos.entry_price,
                        size: pos.size,
                        stop: pos.stop,
                        target: pos.target,
                    },
                );
                zone.on_entry_filled(pos.entry_price, k);
            }
            (SignalKind::Enter { .. }, Err(rejection)) => {
                warn!(zone = %id, %rejection, "Entry rejected");
                self.events
                    .push(k, ts, Some(id), EventKind::EntryRejected { rejection });
                zone.on_entry_rejected();
            }
            (SignalKind::AddOn { child }, Ok(pos)) => {
                self.events.push(
                    k,
                    ts,
                    Some(id),
                    EventKind::AddOnOpened {
                        child,
                        trade_id: pos.trade_id,
                    },
                );
                zone.on_addon_filled(child);
            }
            (SignalKind::AddOn { child }, Err(rejection)) => {
                debug!(zone = %id, %child, %rejection, "Add-on rejected");
                self.events
                    .push(k, ts, Some(id), EventKind::AddOnRejected { child, rejection });
            }
            _ => {}
        }
        Ok(())
    }

    /// Close whatever is still open at the last bar's close.
    fn close_remaining(&mut self, k: usize, bar: &Candle) -> Result<(), SimError> {
        let Some(t) = self.store.close_time(self.config.execution_tf, k) else {
            return Ok(());
        };
        let zones = self.registry.summaries();
        let exits: Vec<Signal> = {
            let ctx = bar_context(&self.store, &self.context, &self.config, k, bar, t, &zones)?;
            self.registry
                .positioned()
                .filter_map(|z| z.end_of_data_exit(&ctx))
                .collect()
        };
        if exits.is_empty() {
            return Ok(());
        }
        info!("Closing {} open zone(s) at end of data", exits.len());
        for signal in &exits {
            self.apply_exit(signal)?;
        }
        if let Some(last) = self.equity_curve.last_mut() {
            last.equity = self.portfolio.equity();
            last.cash = self.portfolio.cash();
            last.open_positions = self.portfolio.positions().len();
        }
        Ok(())
    }
}

fn bar_context<'a>(
    store: &'a TimeframeStore,
    context: &ContextEngine,
    cfg: &'a Config,
    k: usize,
    bar: &'a Candle,
    t: DateTime<Utc>,
    zones: &'a [ZoneSummary],
) -> Result<BarContext<'a>, SimError> {
    let exec_view = store
        .view_at(cfg.execution_tf, k)
        .ok_or(SimError::MissingTimeframe(cfg.execution_tf))?;
    Ok(BarContext {
        index: k,
        bar,
        exec_view,
        swings_view: store.annotations_at(context.target_timeframe(cfg), t),
        zones,
        sync: context.sync(),
        size_factor: context.size_factor(cfg),
        config: cfg,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EntryMode;
    use crate::core::annotations::Annotations;
    use crate::models::{CandleSeries, Direction};
    use crate::strategies::signals::ExitReason;
    use crate::strategies::zone::{TradeLevels, ZoneId, ZonePhase};
    use crate::test_helpers::{base_time, default_test_config, gap, make_flat};

    fn signal(zone_id: ZoneId, kind: SignalKind, direction: Direction, bar_index: usize) -> Signal {
        Signal {
            zone_id,
            kind,
            direction,
            price: 100.0,
            stop: 100.0 - direction.sign(),
            target: 100.0 + 3.0 * direction.sign(),
            size_multiplier: 1.0,
            bar_index,
            timestamp: base_time(),
        }
    }

    /// Runner over ten flat bars holding a filled long zone.
    fn runner_holding_long(cfg: Config) -> (BacktestRunner, ZoneId) {
        let mut runner = BacktestRunner::new(store_with(make_flat(10, 100.0)), cfg).unwrap();
        let id = ZoneId::new(Timeframe::M1, Direction::Long, 100.2, 99.8, 6);
        let mut zone = Zone::new(id, 100.2, 99.8, Vec::new(), 1.0, 0, base_time());
        zone.phase = ZonePhase::Ready;
        zone.levels = Some(TradeLevels {
            entry: 100.0,
            stop: 99.0,
            target: 103.0,
        });
        runner.registry.insert(zone);
        let enter = signal(id, SignalKind::Enter { mode: EntryMode::Conservative }, Direction::Long, 2);
        runner.apply_entry(&enter).unwrap();
        (runner, id)
    }

    fn single_tf_config() -> Config {
        Config {
            timeframes: vec![Timeframe::M1],
            execution_tf: Timeframe::M1,
            htf_bias_tf: Timeframe::M1,
            ltf_bias_tf: Timeframe::M1,
            zone_timeframes: vec![Timeframe::M1],
            ..default_test_config()
        }
    }

    fn store_with(candles: CandleSeries) -> TimeframeStore {
        let mut store = TimeframeStore::new();
        store
            .insert(Timeframe::M1, candles, Annotations::default())
            .unwrap();
        store
    }

    #[test]
    fn rejects_missing_timeframe() {
        let store = store_with(make_flat(10, 100.0));
        let res = BacktestRunner::new(store, default_test_config());
        assert!(matches!(res, Err(SimError::MissingTimeframe(_))));
    }

    #[test]
    fn rejects_invalid_config() {
        let store = store_with(make_flat(10, 100.0));
        let cfg = Config {
            min_confirmations: 0,
            ..single_tf_config()
        };
        assert!(matches!(BacktestRunner::new(store, cfg), Err(SimError::Config(_))));
    }

    #[test]
    fn quiet_market_completes_with_empty_journal() {
        let store = store_with(make_flat(50, 100.0));
        let result = BacktestRunner::new(store, single_tf_config())
            .unwrap()
            .run()
            .unwrap();
        assert!(result.journal.is_empty());
        assert_eq!(result.equity_curve.len(), 50);
        assert!(result
            .equity_curve
            .iter()
            .all(|p| (p.equity - 10_000.0).abs() < 1e-9));
        assert_eq!(result.report.total_trades, 0);
    }

    #[test]
    fn missing_execution_bar_does_not_skip_a_zone_boundary() {
        // Minute 14 is absent, so no execution bar closes exactly at the
        // first M15 close.
        let bars: Vec<Candle> = make_flat(30, 100.0)
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != 14)
            .map(|(_, c)| c.clone())
            .collect();
        let m1 = CandleSeries::new(bars);
        let m15 = m1.resample(Timeframe::M15);

        let mut store = TimeframeStore::new();
        store.insert(Timeframe::M1, m1, Annotations::default()).unwrap();
        store
            .insert(
                Timeframe::M15,
                m15,
                Annotations {
                    gaps: vec![gap(0, Direction::Long, 99.0, 98.0, 0)],
                    ..Annotations::default()
                },
            )
            .unwrap();

        let cfg = Config {
            timeframes: vec![Timeframe::M1, Timeframe::M15],
            execution_tf: Timeframe::M1,
            htf_bias_tf: Timeframe::M15,
            ltf_bias_tf: Timeframe::M15,
            zone_timeframes: vec![Timeframe::M15],
            ..default_test_config()
        };
        let result = BacktestRunner::new(store, cfg).unwrap().run().unwrap();

        let registered: Vec<usize> = result
            .events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::ZoneRegistered { .. }))
            .map(|e| e.bar_index)
            .collect();
        assert_eq!(registered, vec![14]);
        assert_eq!(result.zones.len(), 1);
        assert_eq!(result.zones[0].registered_index, 14);
    }

    #[test]
    fn signals_for_unregistered_zones_are_errors() {
        let mut runner = BacktestRunner::new(store_with(make_flat(10, 100.0)), single_tf_config()).unwrap();
        let stranger = ZoneId::new(Timeframe::M1, Direction::Long, 101.0, 100.0, 6);

        let exit = runner.apply_exit(&signal(stranger, SignalKind::Exit { reason: ExitReason::Target }, Direction::Long, 3));
        assert!(matches!(exit, Err(SimError::UnknownZone(id)) if id == stranger));

        let entry = runner.apply_entry(&signal(stranger, SignalKind::Enter { mode: EntryMode::Conservative }, Direction::Long, 3));
        assert!(matches!(entry, Err(SimError::UnknownZone(id)) if id == stranger));
        assert!(runner.portfolio.positions().is_empty());
    }

    #[test]
    fn opposite_entry_closes_open_position_as_flip() {
        let cfg = Config {
            max_open_positions: 1,
            ..single_tf_config()
        };
        let (mut runner, long) = runner_holding_long(cfg);
        let short = ZoneId::new(Timeframe::M1, Direction::Short, 100.4, 100.1, 6);
        let mut zone = Zone::new(short, 100.4, 100.1, Vec::new(), 1.0, 0, base_time());
        zone.phase = ZonePhase::Ready;
        zone.levels = Some(TradeLevels {
            entry: 100.0,
            stop: 101.0,
            target: 97.0,
        });
        runner.registry.insert(zone);

        let mut signals = vec![signal(short, SignalKind::Enter { mode: EntryMode::Conservative }, Direction::Short, 5)];
        let bars = make_flat(10, 100.0);
        let t = runner.store.close_time(Timeframe::M1, 5).unwrap();
        let zones = runner.registry.summaries();
        {
            let ctx = bar_context(&runner.store, &runner.context, &runner.config, 5, &bars[5], t, &zones).unwrap();
            runner.add_flips(&mut signals, &ctx);
        }
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[1].zone_id, long);
        assert_eq!(signals[1].kind, SignalKind::Exit { reason: ExitReason::Flip });
        assert!((signals[1].price - bars[5].close).abs() < 1e-9);

        // Same settlement order as a step: the flip frees the only slot.
        let (exits, entries): (Vec<Signal>, Vec<Signal>) =
            signals.into_iter().partition(Signal::is_exit_class);
        for s in &exits {
            runner.apply_exit(s).unwrap();
        }
        for s in &entries {
            runner.apply_entry(s).unwrap();
        }

        let journal = runner.portfolio.journal();
        assert_eq!(journal.len(), 1);
        assert_eq!(journal.as_slice()[0].exit_reason, ExitReason::Flip);
        assert_eq!(runner.portfolio.positions().len(), 1);
        assert_eq!(runner.portfolio.positions()[0].zone_id, short);
        assert_eq!(runner.registry.get(&long).map(|z| z.phase), Some(ZonePhase::Closed));
        assert_eq!(runner.registry.get(&short).map(|z| z.phase), Some(ZonePhase::Positioned));
    }

    #[test]
    fn flips_disabled_leave_open_position_alone() {
        let cfg = Config {
            flip_enabled: false,
            ..single_tf_config()
        };
        let (runner, _) = runner_holding_long(cfg);
        let short = ZoneId::new(Timeframe::M1, Direction::Short, 100.4, 100.1, 6);
        let mut signals = vec![signal(short, SignalKind::Enter { mode: EntryMode::Conservative }, Direction::Short, 5)];
        let bars = make_flat(10, 100.0);
        let t = runner.store.close_time(Timeframe::M1, 5).unwrap();
        let zones = runner.registry.summaries();
        let ctx = bar_context(&runner.store, &runner.context, &runner.config, 5, &bars[5], t, &zones).unwrap();
        runner.add_flips(&mut signals, &ctx);
        assert_eq!(signals.len(), 1);
    }
}
