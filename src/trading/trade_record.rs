use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::SimError;
use crate::models::{Direction, SyncMode};
use crate::strategies::signals::ExitReason;
use crate::strategies::zone::ZoneId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Win,
    Loss,
    Breakeven,
}

impl Outcome {
    /// Breakeven when the realized result is within the commission paid.
    pub fn classify(realized_pnl: f64, commission: f64) -> Outcome {
        if realized_pnl.abs() <= commission {
            Outcome::Breakeven
        } else if realized_pnl > 0.0 {
            Outcome::Win
        } else {
            Outcome::Loss
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Win => write!(f, "win"),
            Outcome::Loss => write!(f, "loss"),
            Outcome::Breakeven => write!(f, "breakeven"),
        }
    }
}

/// A closed trade. Written once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub trade_id: u64,
    pub zone_id: ZoneId,
    #[serde(default)]
    pub parent_trade_id: Option<u64>,
    pub direction: Direction,
    /// Price the signal asked for, before slippage.
    pub signal_price: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub entry_index: usize,
    pub exit_index: usize,
    pub size: f64,
    pub stop: f64,
    pub target: f64,
    /// Money at risk between fill and the initial stop.
    pub initial_risk: f64,
    pub exit_reason: ExitReason,
    pub gross_pnl: f64,
    /// Net of both commissions.
    pub realized_pnl: f64,
    pub entry_commission: f64,
    pub exit_commission: f64,
    pub outcome: Outcome,
    pub r_multiple: f64,
    pub duration_bars: usize,
    pub mfe_price: f64,
    pub mae_price: f64,
    pub sync_mode: SyncMode,
    pub confirmations: usize,
}

impl TradeRecord {
    pub fn commission(&self) -> f64 {
        self.entry_commission + self.exit_commission
    }

    pub fn is_win(&self) -> bool {
        self.outcome == Outcome::Win
    }

    pub fn is_addon(&self) -> bool {
        self.parent_trade_id.is_some()
    }
}

/// Append-only list of closed trades, in close order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TradeJournal {
    records: Vec<TradeRecord>,
    #[serde(skip)]
    closed: BTreeSet<u64>,
}

impl TradeJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects a second record for the same trade id.
    pub fn append(&mut self, record: TradeRecord) -> Result<(), SimError> {
        if !self.closed.insert(record.trade_id) {
            return Err(SimError::TradeAlreadyClosed(record.trade_id));
        }
        self.records.push(record);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TradeRecord> {
        self.records.iter()
    }

    pub fn as_slice(&self) -> &[TradeRecord] {
        &self.records
    }

    pub fn total_pnl(&self) -> f64 {
        self.records.iter().map(|r| r.realized_pnl).sum()
    }

    pub fn by_reason(&self, reason: ExitReason) -> impl Iterator<Item = &TradeRecord> {
        self.records.iter().filter(move |r| r.exit_reason == reason)
    }
}
