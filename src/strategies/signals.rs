use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::EntryMode;
use crate::models::Direction;
use crate::strategies::zone::ZoneId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    Target,
    /// Stop hit after it was moved to breakeven.
    Breakeven,
    TroubleZone,
    MaxAge,
    Flip,
    EndOfData,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::Target => "target",
            ExitReason::Breakeven => "breakeven",
            ExitReason::TroubleZone => "trouble_zone",
            ExitReason::MaxAge => "max_age",
            ExitReason::Flip => "flip",
            ExitReason::EndOfData => "end_of_data",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakevenTrigger {
    StructureBreak,
    TroubleMidpoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum SignalKind {
    Enter { mode: EntryMode },
    Exit { reason: ExitReason },
    MoveStopToBreakeven { trigger: BreakevenTrigger },
    /// Tighten the stop, e.g. behind a trouble zone price closed through.
    ModifyStop,
    AddOn { child: ZoneId },
}

/// Intent emitted by a zone's state machine. Consumed exactly once by the
/// portfolio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub zone_id: ZoneId,
    #[serde(flatten)]
    pub kind: SignalKind,
    pub direction: Direction,
    /// Reference price before slippage.
    pub price: f64,
    pub stop: f64,
    pub target: f64,
    pub size_multiplier: f64,
    pub bar_index: usize,
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    /// Exits and stop changes run before entries on the same bar.
    pub fn is_exit_class(&self) -> bool {
        matches!(
            self.kind,
            SignalKind::Exit { .. } | SignalKind::MoveStopToBreakeven { .. } | SignalKind::ModifyStop
        )
    }

    pub fn is_entry(&self) -> bool {
        matches!(self.kind, SignalKind::Enter { .. })
    }
}
