//! Per-zone lifecycle.
//!
//! `Idle -> Tapped -> Collecting -> Ready -> Positioned -> Managing -> Closed`,
//! with invalidation back to `Idle` (and discard) before an entry is taken.
//! A zone only ever emits signals; the portfolio reports fills back through
//! `on_entry_filled` / `on_entry_rejected` / `on_addon_filled` / `on_closed`.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

use crate::config::{Config, EntryMode};
use crate::core::annotations::AnnotationView;
use crate::models::{Candle, Direction, SyncMode};
use crate::strategies::addons::AddOnTracker;
use crate::strategies::confirmations::{self, CheckInput, Confirmation};
use crate::strategies::risk;
use crate::strategies::signals::{BreakevenTrigger, ExitReason, Signal, SignalKind};
use crate::strategies::trouble;
use crate::strategies::zone::{
    Invalidation, InvalidationReason, TradeLevels, Zone, ZoneId, ZonePhase, ZoneSummary,
};
use crate::trading::events::{EventKind, EventLog};

/// Why a ready zone did not enter on this bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferReason {
    /// Minimum count reached without an inversion, retest or wick reaction.
    TrapGuard,
    /// Conservative entry waits for a close beyond the zone.
    AwaitingClose,
    TroubleZoneClose,
    RewardRisk,
}

impl fmt::Display for DeferReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeferReason::TrapGuard => "trap_guard",
            DeferReason::AwaitingClose => "awaiting_close",
            DeferReason::TroubleZoneClose => "trouble_zone_close",
            DeferReason::RewardRisk => "reward_risk",
        };
        write!(f, "{}", s)
    }
}

/// Everything a zone may look at on one execution bar.
pub struct BarContext<'a> {
    pub index: usize,
    pub bar: &'a Candle,
    /// Execution-timeframe annotations as of this bar.
    pub exec_view: AnnotationView<'a>,
    /// Timeframe used for structural targets, as of the latest closed bar.
    pub swings_view: Option<AnnotationView<'a>>,
    pub zones: &'a [ZoneSummary],
    pub sync: SyncMode,
    pub size_factor: f64,
    pub config: &'a Config,
}

impl<'a> BarContext<'a> {
    fn check_input(&self) -> CheckInput<'a> {
        CheckInput {
            index: self.index,
            bar: self.bar,
            view: self.exec_view,
            config: self.config,
        }
    }

    fn break_in(&self, direction: Direction) -> bool {
        self.exec_view
            .breaks_at(self.index)
            .any(|b| b.direction == direction)
    }
}

/// Bookkeeping a zone holds while its position is open.
#[derive(Debug, Clone)]
pub struct PositionState {
    pub entry_index: usize,
    pub fill_price: f64,
    pub breakeven: bool,
    pub trouble_zone: Option<ZoneSummary>,
    pub addons: AddOnTracker,
}

impl Zone {
    /// Advance the zone by one execution bar.
    pub fn on_bar(&mut self, ctx: &BarContext<'_>, events: &mut EventLog) -> Vec<Signal> {
        // Only bars after registration count.
        if !self.is_active() || ctx.index <= self.registered_index {
            return Vec::new();
        }
        if self.phase.has_position() {
            self.manage(ctx)
        } else {
            self.seek_entry(ctx, events).into_iter().collect()
        }
    }

    fn transition(&mut self, next: ZonePhase) {
        debug_assert!(
            self.phase.can_transition_to(next),
            "{} -> {} for {}",
            self.phase,
            next,
            self.id
        );
        self.phase = next;
    }

    fn seek_entry(&mut self, ctx: &BarContext<'_>, events: &mut EventLog) -> Option<Signal> {
        let bar = ctx.bar;
        let k = ctx.index;
        let was_ready = self.phase == ZonePhase::Ready;

        // Invalidation wins over a tap on the same bar.
        let closed_through = match self.direction {
            Direction::Long => bar.close < self.bottom,
            Direction::Short => bar.close > self.top,
        };
        if closed_through {
            self.invalidate(InvalidationReason::ClosedThrough, ctx, events);
            return None;
        }

        let input = ctx.check_input();
        if self.phase == ZonePhase::Idle {
            confirmations::check_tap(self, &input)?;
            self.transition(ZonePhase::Tapped);
            self.tapped_index = Some(k);
            events.push(k, bar.timestamp, Some(self.id), EventKind::Tapped);
        }

        let found = confirmations::collect(self, &input);
        self.accept(found, ctx, events);

        if self.phase == ZonePhase::Tapped && !self.confirmations.is_empty() {
            self.transition(ZonePhase::Collecting);
        }
        if self.phase == ZonePhase::Collecting
            && self.confirmations.len() >= ctx.config.min_confirmations
        {
            self.transition(ZonePhase::Ready);
            self.ready_index = Some(k);
            info!(
                zone = %self.id,
                confirmations = self.confirmations.len(),
                "Zone ready"
            );
            events.push(
                k,
                bar.timestamp,
                Some(self.id),
                EventKind::Ready {
                    count: self.confirmations.len(),
                },
            );
        }

        if was_ready {
            self.decide_entry(ctx, events)
        } else {
            None
        }
    }

    /// Append new occurrences until the cap; the count never decreases.
    fn accept(&mut self, found: Vec<Confirmation>, ctx: &BarContext<'_>, events: &mut EventLog) {
        let max = ctx.config.max_confirmations;
        for c in found {
            if self.confirmations.len() >= max {
                break;
            }
            let key = c.kind.occurrence();
            if self.confirmations.iter().any(|held| held.kind.occurrence() == key) {
                continue;
            }
            self.confirmations.push(c);
            events.push(
                ctx.index,
                ctx.bar.timestamp,
                Some(self.id),
                EventKind::ConfirmationAccepted {
                    confirmation: c.kind,
                    count: self.confirmations.len(),
                },
            );
        }
    }

    /// At or past the minimum count with no retracement-type confirmation.
    /// Further non-retracement confirmations do not lift the guard.
    pub fn is_trapped(&self, config: &Config) -> bool {
        self.confirmations.len() >= config.min_confirmations
            && !self
                .confirmations
                .iter()
                .any(|c| c.kind.kind().is_retracement())
    }

    fn decide_entry(&mut self, ctx: &BarContext<'_>, events: &mut EventLog) -> Option<Signal> {
        let cfg = ctx.config;
        let k = ctx.index;

        if cfg.trap_guard && self.is_trapped(cfg) {
            let expired = cfg
                .trap_guard_expiry_bars
                .zip(self.ready_index)
                .is_some_and(|(limit, ready)| k - ready > limit);
            if expired {
                self.invalidate(InvalidationReason::TrapGuardExpired, ctx, events);
            } else {
                self.defer(DeferReason::TrapGuard, ctx, events);
            }
            return None;
        }

        let entry = ctx.bar.close;
        if cfg.entry_mode == EntryMode::Conservative && !self.direction.beyond(entry, self.near_edge()) {
            self.defer(DeferReason::AwaitingClose, ctx, events);
            return None;
        }

        let Some(stop) = risk::stop_for(self, entry, ctx.exec_view, cfg) else {
            self.invalidate(InvalidationReason::DegenerateLevels, ctx, events);
            return None;
        };
        let Some(target) = risk::target_for(self, entry, stop, ctx.swings_view, ctx.zones, cfg) else {
            self.invalidate(InvalidationReason::DegenerateLevels, ctx, events);
            return None;
        };
        let levels = TradeLevels {
            entry,
            stop,
            target,
        };

        let trouble = trouble::find_trouble(self.direction, entry, target, ctx.zones, self.id);
        if let Some(t) = &trouble {
            if trouble::is_close(t, entry, target, cfg.trouble_close_threshold) {
                self.defer(DeferReason::TroubleZoneClose, ctx, events);
                return None;
            }
        }
        if levels.reward_risk() < cfg.min_reward_risk {
            self.defer(DeferReason::RewardRisk, ctx, events);
            return None;
        }

        self.levels = Some(levels);
        self.trouble = trouble.map(|t| t.id);
        self.pending_trouble = trouble;
        debug!(zone = %self.id, entry, stop, target, "Entry signal");
        Some(self.signal(
            ctx,
            SignalKind::Enter {
                mode: cfg.entry_mode,
            },
            entry,
            ctx.size_factor,
        ))
    }

    fn defer(&mut self, reason: DeferReason, ctx: &BarContext<'_>, events: &mut EventLog) {
        if self.last_deferral != Some(reason) {
            self.last_deferral = Some(reason);
            events.push(
                ctx.index,
                ctx.bar.timestamp,
                Some(self.id),
                EventKind::EntryDeferred { reason },
            );
        }
    }

    fn invalidate(&mut self, reason: InvalidationReason, ctx: &BarContext<'_>, events: &mut EventLog) {
        if self.phase != ZonePhase::Idle {
            self.transition(ZonePhase::Idle);
        }
        self.invalidation = Some(Invalidation {
            index: ctx.index,
            reason,
        });
        self.levels = None;
        debug!(zone = %self.id, %reason, "Zone invalidated");
        events.push(
            ctx.index,
            ctx.bar.timestamp,
            Some(self.id),
            EventKind::Invalidated { reason },
        );
    }

    /// Exit checks in priority order: stop, target, trouble zone, max age.
    /// Breakeven and add-ons only run when nothing exited.
    fn manage(&mut self, ctx: &BarContext<'_>) -> Vec<Signal> {
        let (Some(levels), Some(pos)) = (self.levels, self.position.as_ref()) else {
            return Vec::new();
        };
        let (entry_index, fill, breakeven, trouble_zone) =
            (pos.entry_index, pos.fill_price, pos.breakeven, pos.trouble_zone);
        let bar = ctx.bar;
        let k = ctx.index;
        let dir = self.direction;
        let cfg = ctx.config;
        if k <= entry_index {
            return Vec::new();
        }

        // A bar that reaches both stop and target is a stop.
        let stop_hit = match dir {
            Direction::Long => bar.low <= levels.stop,
            Direction::Short => bar.high >= levels.stop,
        };
        if stop_hit {
            let reason = if breakeven {
                ExitReason::Breakeven
            } else {
                ExitReason::StopLoss
            };
            return vec![self.signal(ctx, SignalKind::Exit { reason }, levels.stop, 1.0)];
        }

        let target_hit = match dir {
            Direction::Long => bar.high >= levels.target,
            Direction::Short => bar.low <= levels.target,
        };
        if target_hit {
            return vec![self.signal(
                ctx,
                SignalKind::Exit {
                    reason: ExitReason::Target,
                },
                levels.target,
                1.0,
            )];
        }

        let mut signals = Vec::new();
        let trouble_check = trouble_zone.map(|t| (t, trouble::check(&t, dir, bar)));
        if let Some((t, check)) = trouble_check {
            if check.validated {
                return vec![self.signal(
                    ctx,
                    SignalKind::Exit {
                        reason: ExitReason::TroubleZone,
                    },
                    bar.close,
                    1.0,
                )];
            }
            if check.invalidated {
                // Closed through: the zone is behind price now, trail under it.
                self.trouble = None;
                if let Some(p) = self.position.as_mut() {
                    p.trouble_zone = None;
                }
                let buffer = self.midpoint() * cfg.stop_buffer_pct;
                let trailed = match dir {
                    Direction::Long => t.bottom - buffer,
                    Direction::Short => t.top + buffer,
                };
                if dir.beyond(trailed, levels.stop) && dir.beyond(bar.close, trailed) {
                    self.set_stop(trailed);
                    signals.push(self.signal(ctx, SignalKind::ModifyStop, bar.close, 1.0));
                }
            }
        }

        if let Some(max) = cfg.max_position_bars {
            if k - entry_index >= max {
                return vec![self.signal(
                    ctx,
                    SignalKind::Exit {
                        reason: ExitReason::MaxAge,
                    },
                    bar.close,
                    1.0,
                )];
            }
        }

        if !breakeven {
            let trigger = if cfg.structural_breakeven && ctx.break_in(dir) {
                Some(BreakevenTrigger::StructureBreak)
            } else if cfg.trouble_breakeven && trouble_check.is_some_and(|(_, c)| c.midpoint_crossed) {
                Some(BreakevenTrigger::TroubleMidpoint)
            } else {
                None
            };
            if let Some(trigger) = trigger {
                let level = risk::breakeven_level(dir, fill, cfg.fee_rate);
                let current = self.levels.map_or(levels.stop, |l| l.stop);
                if dir.beyond(level, current) && dir.beyond(bar.close, level) {
                    self.set_stop(level);
                    if let Some(p) = self.position.as_mut() {
                        p.breakeven = true;
                    }
                    if self.phase == ZonePhase::Positioned {
                        self.transition(ZonePhase::Managing);
                    }
                    signals.push(self.signal(
                        ctx,
                        SignalKind::MoveStopToBreakeven { trigger },
                        bar.close,
                        1.0,
                    ));
                }
            }
        }

        if self.addons.len() < cfg.max_addons {
            let parent = self.id;
            let child = self.position.as_mut().and_then(|p| {
                p.addons.on_bar(
                    parent,
                    dir,
                    levels.entry,
                    levels.target,
                    ctx.zones,
                    bar,
                    k,
                    ctx.break_in(dir),
                    cfg.addon_structure_window,
                )
            });
            if let Some(child) = child {
                signals.push(self.signal(
                    ctx,
                    SignalKind::AddOn { child },
                    bar.close,
                    cfg.addon_size_factor * ctx.size_factor,
                ));
            }
        }

        signals
    }

    fn set_stop(&mut self, stop: f64) {
        if let Some(levels) = self.levels.as_mut() {
            levels.stop = stop;
        }
    }

    fn signal(&self, ctx: &BarContext<'_>, kind: SignalKind, price: f64, size_multiplier: f64) -> Signal {
        let (stop, target) = self.levels.map_or((0.0, 0.0), |l| (l.stop, l.target));
        Signal {
            zone_id: self.id,
            kind,
            direction: self.direction,
            price,
            stop,
            target,
            size_multiplier,
            bar_index: ctx.index,
            timestamp: ctx.bar.timestamp,
        }
    }

    /// Exit this zone's position because another zone is entering the other way.
    pub fn flip_exit(&self, ctx: &BarContext<'_>) -> Option<Signal> {
        self.phase.has_position().then(|| {
            self.signal(
                ctx,
                SignalKind::Exit {
                    reason: ExitReason::Flip,
                },
                ctx.bar.close,
                1.0,
            )
        })
    }

    /// Close-out signal for a position still open on the last bar.
    pub fn end_of_data_exit(&self, ctx: &BarContext<'_>) -> Option<Signal> {
        (self.is_active() && self.phase.has_position()).then(|| {
            self.signal(
                ctx,
                SignalKind::Exit {
                    reason: ExitReason::EndOfData,
                },
                ctx.bar.close,
                1.0,
            )
        })
    }

    pub fn on_entry_filled(&mut self, fill_price: f64, index: usize) {
        self.transition(ZonePhase::Positioned);
        self.last_deferral = None;
        self.position = Some(PositionState {
            entry_index: index,
            fill_price,
            breakeven: false,
            trouble_zone: self.pending_trouble.take(),
            addons: AddOnTracker::new(),
        });
    }

    /// The zone stays ready and tries again on a later bar.
    pub fn on_entry_rejected(&mut self) {
        self.levels = None;
        self.trouble = None;
        self.pending_trouble = None;
    }

    pub fn on_addon_filled(&mut self, child: ZoneId) {
        self.addons.push(child);
        if self.phase == ZonePhase::Positioned {
            self.transition(ZonePhase::Managing);
        }
    }

    pub fn on_closed(&mut self) {
        self.transition(ZonePhase::Closed);
        self.position = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::annotations::Annotations;
    use crate::models::{BreakKind, LiquiditySide, Timeframe};
    use crate::strategies::confirmations::{ConfirmationKind, ConfirmationType};
    use crate::strategies::zone::ZoneSource;
    use crate::test_helpers::{base_time, default_test_config, gap, liquidity, structure_break};

    fn long_zone() -> Zone {
        let id = ZoneId::new(Timeframe::M15, Direction::Long, 101.0, 100.0, 6);
        Zone::new(
            id,
            101.0,
            100.0,
            vec![ZoneSource::Gap { timeframe: Timeframe::M15, gap_id: 0 }],
            3.0,
            0,
            base_time(),
        )
    }

    fn bar(o: f64, h: f64, l: f64, c: f64) -> Candle {
        Candle {
            timestamp: base_time(),
            open: o,
            high: h,
            low: l,
            close: c,
            volume: 1.0,
        }
    }

    fn ctx<'a>(
        index: usize,
        bar: &'a Candle,
        ann: &'a Annotations,
        zones: &'a [ZoneSummary],
        config: &'a Config,
    ) -> BarContext<'a> {
        BarContext {
            index,
            bar,
            exec_view: AnnotationView::new(Timeframe::M1, index, ann),
            swings_view: None,
            zones,
            sync: SyncMode::Aligned,
            size_factor: 1.0,
            config,
        }
    }

    /// Tap at bar 2, sweep at 3, structure break at 4, two continuation breaks at 5 and 6.
    fn five_confirmations() -> Annotations {
        let mut level = liquidity(0, LiquiditySide::SellSide, 99.9, 1);
        level.swept_index = Some(3);
        Annotations {
            liquidity: vec![level],
            breaks: vec![
                structure_break(0, BreakKind::Bos, Direction::Long, 101.2, 4),
                structure_break(1, BreakKind::Cbos, Direction::Long, 101.4, 5),
                structure_break(2, BreakKind::Cbos, Direction::Long, 101.6, 6),
            ],
            ..Annotations::default()
        }
    }

    fn run_to_ready(zone: &mut Zone, ann: &Annotations, cfg: &Config, events: &mut EventLog) {
        let bars = [
            (1, bar(102.0, 102.2, 101.5, 102.0)),
            (2, bar(101.5, 101.6, 100.6, 101.2)),
            (3, bar(101.0, 101.2, 99.7, 100.4)),
            (4, bar(100.4, 101.3, 100.3, 101.25)),
            (5, bar(101.3, 101.5, 101.1, 101.45)),
            (6, bar(101.45, 101.7, 101.3, 101.65)),
        ];
        for (k, b) in bars.iter() {
            let signals = zone.on_bar(&ctx(*k, b, ann, &[], cfg), events);
            assert!(signals.is_empty());
        }
    }

    #[test]
    fn collects_to_ready_then_trap_guard_holds_entry() {
        let cfg = default_test_config();
        let ann = five_confirmations();
        let mut zone = long_zone();
        let mut events = EventLog::new();

        run_to_ready(&mut zone, &ann, &cfg, &mut events);
        assert_eq!(zone.phase, ZonePhase::Ready);
        assert_eq!(zone.confirmations.len(), 5);
        assert_eq!(zone.tapped_index, Some(2));
        assert!(zone.is_trapped(&cfg));

        let b = bar(101.7, 102.0, 101.6, 101.9);
        assert!(zone.on_bar(&ctx(7, &b, &ann, &[], &cfg), &mut events).is_empty());
        assert_eq!(zone.last_deferral, Some(DeferReason::TrapGuard));
        // One deferral event however many bars wait.
        assert!(zone.on_bar(&ctx(8, &b, &ann, &[], &cfg), &mut events).is_empty());
        assert_eq!(events.count(|e| matches!(e, EventKind::EntryDeferred { .. })), 1);
    }

    #[test]
    fn enters_with_stop_behind_swept_level_when_guard_off() {
        let cfg = Config {
            trap_guard: false,
            ..default_test_config()
        };
        let ann = five_confirmations();
        let mut zone = long_zone();
        let mut events = EventLog::new();
        run_to_ready(&mut zone, &ann, &cfg, &mut events);

        let b = bar(101.7, 102.0, 101.6, 101.9);
        let signals = zone.on_bar(&ctx(7, &b, &ann, &[], &cfg), &mut events);
        assert_eq!(signals.len(), 1);
        let s = signals[0];
        assert!(s.is_entry());
        let buffer = zone.midpoint() * cfg.stop_buffer_pct;
        assert!((s.stop - (99.9 - buffer)).abs() < 1e-9);
        assert!((s.target - 101.9 * 1.03).abs() < 1e-9);
        assert_eq!(s.bar_index, 7);
    }

    #[test]
    fn close_through_invalidates_before_tap_counts() {
        let cfg = default_test_config();
        let ann = Annotations::default();
        let mut zone = long_zone();
        let mut events = EventLog::new();
        let b = bar(101.5, 101.6, 99.0, 99.5);
        zone.on_bar(&ctx(1, &b, &ann, &[], &cfg), &mut events);
        assert!(!zone.is_active());
        assert_eq!(zone.tapped_index, None);
        assert_eq!(
            zone.invalidation.map(|i| i.reason),
            Some(InvalidationReason::ClosedThrough)
        );
    }

    #[test]
    fn registration_bar_is_ignored() {
        let cfg = default_test_config();
        let ann = Annotations::default();
        let mut zone = long_zone();
        zone.registered_index = 5;
        let mut events = EventLog::new();
        let b = bar(101.5, 101.6, 100.5, 101.0);
        zone.on_bar(&ctx(5, &b, &ann, &[], &cfg), &mut events);
        assert_eq!(zone.phase, ZonePhase::Idle);
        zone.on_bar(&ctx(6, &b, &ann, &[], &cfg), &mut events);
        assert_eq!(zone.phase, ZonePhase::Collecting);
        assert!(zone.has_confirmation(ConfirmationType::Tap));
    }

    #[test]
    fn trap_guard_expires() {
        let cfg = Config {
            trap_guard_expiry_bars: Some(3),
            ..default_test_config()
        };
        let ann = five_confirmations();
        let mut zone = long_zone();
        let mut events = EventLog::new();
        run_to_ready(&mut zone, &ann, &cfg, &mut events);

        let b = bar(101.7, 102.0, 101.6, 101.9);
        for k in 7..=9 {
            zone.on_bar(&ctx(k, &b, &ann, &[], &cfg), &mut events);
            assert!(zone.is_active());
        }
        zone.on_bar(&ctx(10, &b, &ann, &[], &cfg), &mut events);
        assert_eq!(
            zone.invalidation.map(|i| i.reason),
            Some(InvalidationReason::TrapGuardExpired)
        );
    }

    #[test]
    fn extra_continuation_break_does_not_lift_trap_guard() {
        let cfg = default_test_config();
        let mut ann = five_confirmations();
        ann.breaks
            .push(structure_break(3, BreakKind::Cbos, Direction::Long, 101.8, 7));
        let mut zone = long_zone();
        let mut events = EventLog::new();
        run_to_ready(&mut zone, &ann, &cfg, &mut events);

        let b = bar(101.7, 102.0, 101.6, 101.9);
        let signals = zone.on_bar(&ctx(7, &b, &ann, &[], &cfg), &mut events);
        assert_eq!(zone.confirmation_count(), 6);
        assert!(zone.is_trapped(&cfg));
        assert!(signals.is_empty(), "entered without a retracement: {:?}", signals);
        assert_eq!(zone.last_deferral, Some(DeferReason::TrapGuard));
        assert_eq!(zone.phase, ZonePhase::Ready);
    }

    fn positioned_zone() -> Zone {
        let mut zone = long_zone();
        zone.phase = ZonePhase::Ready;
        zone.levels = Some(TradeLevels {
            entry: 102.0,
            stop: 99.0,
            target: 108.0,
        });
        zone.on_entry_filled(102.0, 10);
        assert_eq!(zone.phase, ZonePhase::Positioned);
        zone
    }

    #[test]
    fn position_held_past_max_age_exits_at_close() {
        let cfg = Config {
            max_position_bars: Some(3),
            ..default_test_config()
        };
        let ann = Annotations::default();
        let mut zone = positioned_zone();
        let mut events = EventLog::new();
        let quiet = bar(102.5, 103.0, 102.2, 102.6);

        assert!(zone.on_bar(&ctx(12, &quiet, &ann, &[], &cfg), &mut events).is_empty());
        let signals = zone.on_bar(&ctx(13, &quiet, &ann, &[], &cfg), &mut events);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].kind, SignalKind::Exit { reason: ExitReason::MaxAge });
        assert!((signals[0].price - 102.6).abs() < 1e-9);
    }

    #[test]
    fn stop_wins_when_bar_spans_stop_and_target() {
        let cfg = default_test_config();
        let ann = Annotations::default();
        let mut zone = positioned_zone();
        let mut events = EventLog::new();
        let wide = bar(102.0, 109.0, 98.0, 104.0);
        let signals = zone.on_bar(&ctx(11, &wide, &ann, &[], &cfg), &mut events);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].kind, SignalKind::Exit { reason: ExitReason::StopLoss });
        assert!((signals[0].price - 99.0).abs() < 1e-9);
    }

    #[test]
    fn structural_break_moves_stop_to_breakeven_next_bar() {
        let cfg = Config {
            fee_rate: 0.0005,
            ..default_test_config()
        };
        let ann = Annotations {
            breaks: vec![structure_break(0, BreakKind::Bos, Direction::Long, 103.0, 11)],
            ..Annotations::default()
        };
        let mut zone = positioned_zone();
        let mut events = EventLog::new();

        let up = bar(102.0, 103.6, 101.8, 103.5);
        let signals = zone.on_bar(&ctx(11, &up, &ann, &[], &cfg), &mut events);
        assert_eq!(signals.len(), 1);
        assert!(matches!(signals[0].kind, SignalKind::MoveStopToBreakeven { .. }));
        assert_eq!(zone.phase, ZonePhase::Managing);
        let be = 102.0 * (1.0 + 2.0 * 0.0005);
        assert!((zone.levels.unwrap().stop - be).abs() < 1e-9);

        // Back through breakeven: classified as a breakeven exit.
        let down = bar(103.0, 103.1, 101.0, 101.5);
        let signals = zone.on_bar(&ctx(12, &down, &ann, &[], &cfg), &mut events);
        assert_eq!(signals[0].kind, SignalKind::Exit { reason: ExitReason::Breakeven });
    }

    #[test]
    fn target_beats_breakeven_trigger_on_same_bar() {
        let cfg = default_test_config();
        let ann = Annotations {
            breaks: vec![structure_break(0, BreakKind::Bos, Direction::Long, 103.0, 11)],
            ..Annotations::default()
        };
        let mut zone = positioned_zone();
        let mut events = EventLog::new();
        let b = bar(102.0, 108.5, 101.8, 108.2);
        let signals = zone.on_bar(&ctx(11, &b, &ann, &[], &cfg), &mut events);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].kind, SignalKind::Exit { reason: ExitReason::Target });
    }

    #[test]
    fn trouble_zone_rejection_exits_at_close() {
        let cfg = default_test_config();
        let ann = Annotations::default();
        let mut zone = long_zone();
        zone.phase = ZonePhase::Ready;
        zone.levels = Some(TradeLevels {
            entry: 102.0,
            stop: 99.0,
            target: 108.0,
        });
        let trouble = ZoneSummary {
            id: ZoneId::new(Timeframe::M15, Direction::Short, 105.0, 104.0, 6),
            direction: Direction::Short,
            top: 105.0,
            bottom: 104.0,
            active: true,
            phase: ZonePhase::Idle,
        };
        zone.pending_trouble = Some(trouble);
        zone.on_entry_filled(102.0, 10);

        let mut events = EventLog::new();
        let rejected = bar(103.0, 104.2, 102.8, 103.5);
        let signals = zone.on_bar(&ctx(11, &rejected, &ann, &[], &cfg), &mut events);
        assert_eq!(signals[0].kind, SignalKind::Exit { reason: ExitReason::TroubleZone });
        assert!((signals[0].price - 103.5).abs() < 1e-9);
    }

    fn held(kind: ConfirmationKind, bar_index: usize) -> Confirmation {
        Confirmation {
            kind,
            bar_index,
            timestamp: base_time(),
        }
    }

    #[test]
    fn wick_reaction_lifts_trap_guard_on_the_same_bar() {
        let cfg = default_test_config();
        // Same-direction gap above the zone for the retracement to react from.
        let ann = Annotations {
            gaps: vec![gap(0, Direction::Long, 101.6, 101.3, 1)],
            ..Annotations::default()
        };
        let mut zone = long_zone();
        zone.phase = ZonePhase::Ready;
        zone.tapped_index = Some(2);
        zone.ready_index = Some(6);
        zone.confirmations = vec![
            held(ConfirmationKind::Tap, 2),
            held(ConfirmationKind::LiquiditySweep { level_id: 0, level: 99.9 }, 3),
            held(ConfirmationKind::StructureBreak { break_id: 0, kind: BreakKind::Bos, level: 101.2 }, 4),
            held(ConfirmationKind::ContinuationBreak { break_id: 1, level: 101.4 }, 5),
            held(ConfirmationKind::ContinuationBreak { break_id: 2, level: 101.6 }, 6),
        ];
        let mut events = EventLog::new();

        let drift = bar(101.8, 102.0, 101.7, 101.9);
        assert!(zone.on_bar(&ctx(7, &drift, &ann, &[], &cfg), &mut events).is_empty());
        assert_eq!(zone.last_deferral, Some(DeferReason::TrapGuard));

        // Wicks into the gap but stays above the midpoint-test band.
        let wick = bar(101.9, 102.0, 101.58, 101.95);
        let signals = zone.on_bar(&ctx(8, &wick, &ann, &[], &cfg), &mut events);
        assert_eq!(zone.confirmation_count(), 6);
        assert!(zone.has_confirmation(ConfirmationType::WickReaction));
        assert_eq!(signals.len(), 1);
        assert!(signals[0].is_entry());
        assert!((signals[0].stop - (99.9 - 100.5 * cfg.stop_buffer_pct)).abs() < 1e-9);
    }
}
