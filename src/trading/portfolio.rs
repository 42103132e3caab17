use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::SimError;
use crate::models::{Candle, Direction, SyncMode};
use crate::strategies::signals::{ExitReason, Signal, SignalKind};
use crate::strategies::zone::ZoneId;
use crate::trading::trade_record::{Outcome, TradeJournal, TradeRecord};

/// An open trade. Only excursions, stop and mark change while it is open.
#[derive(Debug, Clone, Serialize)]
pub struct Position {
    pub trade_id: u64,
    pub zone_id: ZoneId,
    /// Set on add-ons: the zone the add-on was triggered by.
    pub child_zone: Option<ZoneId>,
    pub parent_trade_id: Option<u64>,
    pub direction: Direction,
    pub signal_price: f64,
    pub entry_price: f64,
    pub size: f64,
    pub stop: f64,
    pub target: f64,
    pub initial_risk: f64,
    pub entry_index: usize,
    pub entry_time: DateTime<Utc>,
    pub entry_commission: f64,
    pub mfe_price: f64,
    pub mae_price: f64,
    pub mark_price: f64,
    pub sync_mode: SyncMode,
    pub confirmations: usize,
}

impl Position {
    pub fn unrealized_pnl(&self) -> f64 {
        self.direction.sign() * (self.mark_price - self.entry_price) * self.size
    }

    pub fn is_addon(&self) -> bool {
        self.parent_trade_id.is_some()
    }
}

/// Context carried into the journal with an entry.
#[derive(Debug, Clone, Copy)]
pub struct EntryMeta {
    pub sync_mode: SyncMode,
    pub confirmations: usize,
}

/// Why the ledger declined a signal. Recoverable: the signal is dropped.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rejection {
    PositionCap { open: usize, cap: usize },
    NonPositiveSize { size: f64 },
    NoParentPosition,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::PositionCap { open, cap } => {
                write!(f, "position cap reached ({}/{})", open, cap)
            }
            Rejection::NonPositiveSize { size } => write!(f, "non-positive size {}", size),
            Rejection::NoParentPosition => write!(f, "no open parent position"),
        }
    }
}

/// Execution ledger: the single writer of cash and open positions.
pub struct Portfolio {
    cash: f64,
    positions: Vec<Position>,
    journal: TradeJournal,
    trade_counter: u64,
    fee_rate: f64,
    slippage_rate: f64,
    risk_per_trade: f64,
    max_open_positions: usize,
}

impl Portfolio {
    pub fn new(cfg: &Config) -> Self {
        Self {
            cash: cfg.initial_balance,
            positions: Vec::new(),
            journal: TradeJournal::new(),
            trade_counter: 0,
            fee_rate: cfg.fee_rate,
            slippage_rate: cfg.slippage_rate,
            risk_per_trade: cfg.risk_per_trade,
            max_open_positions: cfg.max_open_positions,
        }
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    /// Cash plus unrealized P&L at the latest mark, recomputed on every call.
    pub fn equity(&self) -> f64 {
        self.cash + self.positions.iter().map(Position::unrealized_pnl).sum::<f64>()
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn journal(&self) -> &TradeJournal {
        &self.journal
    }

    pub fn into_journal(self) -> TradeJournal {
        self.journal
    }

    pub fn has_position(&self, zone_id: &ZoneId) -> bool {
        self.positions.iter().any(|p| &p.zone_id == zone_id)
    }

    /// Distinct zones with an open position, in opening order.
    pub fn open_zones(&self) -> Vec<ZoneId> {
        let mut zones: Vec<ZoneId> = Vec::new();
        for p in &self.positions {
            if !zones.contains(&p.zone_id) {
                zones.push(p.zone_id);
            }
        }
        zones
    }

    fn fill_price(&self, direction: Direction, price: f64, opening: bool) -> f64 {
        // Adverse on both sides: buy higher, sell lower.
        let buying = (direction == Direction::Long) == opening;
        if buying {
            price * (1.0 + self.slippage_rate)
        } else {
            price * (1.0 - self.slippage_rate)
        }
    }

    /// Open a position for an `Enter` or `AddOn` signal.
    pub fn open(&mut self, signal: &Signal, meta: EntryMeta) -> Result<&Position, Rejection> {
        let (parent_trade_id, child_zone) = match signal.kind {
            SignalKind::AddOn { child } => {
                let parent = self
                    .positions
                    .iter()
                    .find(|p| p.zone_id == signal.zone_id && !p.is_addon())
                    .ok_or(Rejection::NoParentPosition)?;
                (Some(parent.trade_id), Some(child))
            }
            _ => {
                let open = self.open_zones().len();
                if open >= self.max_open_positions {
                    return Err(Rejection::PositionCap {
                        open,
                        cap: self.max_open_positions,
                    });
                }
                (None, None)
            }
        };

        let entry_price = self.fill_price(signal.direction, signal.price, true);
        let distance = (entry_price - signal.stop).abs();
        let size = if distance > 0.0 {
            self.equity() * self.risk_per_trade / distance * signal.size_multiplier
        } else {
            0.0
        };
        if !(size > 0.0) || !size.is_finite() {
            return Err(Rejection::NonPositiveSize { size });
        }

        let entry_commission = entry_price * size * self.fee_rate;
        self.cash -= entry_commission;
        self.trade_counter += 1;

        let position = Position {
            trade_id: self.trade_counter,
            zone_id: signal.zone_id,
            child_zone,
            parent_trade_id,
            direction: signal.direction,
            signal_price: signal.price,
            entry_price,
            size,
            stop: signal.stop,
            target: signal.target,
            initial_risk: distance * size,
            entry_index: signal.bar_index,
            entry_time: signal.timestamp,
            entry_commission,
            mfe_price: entry_price,
            mae_price: entry_price,
            mark_price: entry_price,
            sync_mode: meta.sync_mode,
            confirmations: meta.confirmations,
        };
        info!(
            "Opened #{} {} {} @ {:.2} size {:.6} SL {:.2} TP {:.2}",
            position.trade_id,
            position.direction,
            position.zone_id,
            entry_price,
            size,
            position.stop,
            position.target
        );
        self.positions.push(position);
        self.positions.last().ok_or(Rejection::NonPositiveSize { size })
    }

    /// Close every position of `zone_id` (the parent and its add-ons) at
    /// `price`, appending one journal record each.
    pub fn close(
        &mut self,
        zone_id: &ZoneId,
        price: f64,
        bar_index: usize,
        timestamp: DateTime<Utc>,
        reason: ExitReason,
    ) -> Result<Vec<TradeRecord>, SimError> {
        if !self.has_position(zone_id) {
            return Err(SimError::NoOpenPosition(*zone_id));
        }

        let (closing, remaining): (Vec<Position>, Vec<Position>) = std::mem::take(&mut self.positions)
            .into_iter()
            .partition(|p| &p.zone_id == zone_id);
        self.positions = remaining;

        let mut records = Vec::with_capacity(closing.len());
        for pos in closing {
            let exit_price = self.fill_price(pos.direction, price, false);
            let gross_pnl = pos.direction.sign() * (exit_price - pos.entry_price) * pos.size;
            let exit_commission = exit_price * pos.size * self.fee_rate;
            self.cash += gross_pnl - exit_commission;

            let commission = pos.entry_commission + exit_commission;
            let realized_pnl = gross_pnl - commission;
            let record = TradeRecord {
                trade_id: pos.trade_id,
                zone_id: pos.zone_id,
                parent_trade_id: pos.parent_trade_id,
                direction: pos.direction,
                signal_price: pos.signal_price,
                entry_price: pos.entry_price,
                exit_price,
                entry_time: pos.entry_time,
                exit_time: timestamp,
                entry_index: pos.entry_index,
                exit_index: bar_index,
                size: pos.size,
                stop: pos.stop,
                target: pos.target,
                initial_risk: pos.initial_risk,
                exit_reason: reason,
                gross_pnl,
                realized_pnl,
                entry_commission: pos.entry_commission,
                exit_commission,
                outcome: Outcome::classify(realized_pnl, commission),
                r_multiple: if pos.initial_risk > 0.0 {
                    realized_pnl / pos.initial_risk
                } else {
                    0.0
                },
                duration_bars: bar_index.saturating_sub(pos.entry_index),
                mfe_price: pos.mfe_price,
                mae_price: pos.mae_price,
                sync_mode: pos.sync_mode,
                confirmations: pos.confirmations,
            };
            info!(
                "Closed #{} {} @ {:.2} ({}) PnL ${:+.2}",
                record.trade_id, record.direction, exit_price, reason, realized_pnl
            );
            self.journal.append(record.clone())?;
            records.push(record);
        }
        Ok(records)
    }

    /// Move the stop of every position of `zone_id`. Returns how many moved.
    pub fn move_stops(&mut self, zone_id: &ZoneId, stop: f64) -> usize {
        let mut moved = 0;
        for p in self.positions.iter_mut().filter(|p| &p.zone_id == zone_id) {
            debug!("Stop #{} {:.2} -> {:.2}", p.trade_id, p.stop, stop);
            p.stop = stop;
            moved += 1;
        }
        moved
    }

    /// Update excursions from the bar's range and mark at its close.
    pub fn mark_to_market(&mut self, bar: &Candle) {
        for p in &mut self.positions {
            match p.direction {
                Direction::Long => {
                    p.mfe_price = p.mfe_price.max(bar.high);
                    p.mae_price = p.mae_price.min(bar.low);
                }
                Direction::Short => {
                    p.mfe_price = p.mfe_price.min(bar.low);
                    p.mae_price = p.mae_price.max(bar.high);
                }
            }
            p.mark_price = bar.close;
        }
    }
}
