use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{Direction, Timeframe};
use crate::strategies::confirmations::{Confirmation, ConfirmationType};
use crate::strategies::state_machine::{DeferReason, PositionState};

/// Content fingerprint of a zone. Prices are stored as integer ticks at a
/// fixed precision so float noise cannot split one zone into two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ZoneId {
    pub timeframe: Timeframe,
    pub direction: Direction,
    pub top_ticks: i64,
    pub bottom_ticks: i64,
}

impl ZoneId {
    pub fn new(timeframe: Timeframe, direction: Direction, top: f64, bottom: f64, decimals: u32) -> Self {
        let scale = 10f64.powi(decimals as i32);
        Self {
            timeframe,
            direction,
            top_ticks: (top * scale).round() as i64,
            bottom_ticks: (bottom * scale).round() as i64,
        }
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}-{}",
            self.timeframe, self.direction, self.top_ticks, self.bottom_ticks
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZonePhase {
    Idle,
    Tapped,
    Collecting,
    Ready,
    Positioned,
    Managing,
    Closed,
}

impl ZonePhase {
    pub fn can_transition_to(self, next: ZonePhase) -> bool {
        use ZonePhase::*;
        match (self, next) {
            (Idle, Tapped)
            | (Tapped, Collecting)
            | (Collecting, Ready)
            | (Ready, Positioned)
            | (Positioned, Managing)
            | (Positioned, Closed)
            | (Managing, Closed) => true,
            // Invalidation before an entry was taken.
            (Tapped | Collecting | Ready, Idle) => true,
            _ => false,
        }
    }

    pub fn has_position(self) -> bool {
        matches!(self, ZonePhase::Positioned | ZonePhase::Managing)
    }
}

impl fmt::Display for ZonePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ZonePhase::Idle => "idle",
            ZonePhase::Tapped => "tapped",
            ZonePhase::Collecting => "collecting",
            ZonePhase::Ready => "ready",
            ZonePhase::Positioned => "positioned",
            ZonePhase::Managing => "managing",
            ZonePhase::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

/// Annotation a zone was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ZoneSource {
    Gap { timeframe: Timeframe, gap_id: usize },
    InvertedGap { timeframe: Timeframe, gap_id: usize },
    Liquidity { timeframe: Timeframe, level_id: usize },
    OrderBlock { timeframe: Timeframe, block_id: usize },
    Breaker { timeframe: Timeframe, block_id: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationReason {
    /// Price closed fully through the zone before entry.
    ClosedThrough,
    /// Stop or target could not be placed on the right side of entry.
    DegenerateLevels,
    TrapGuardExpired,
}

impl fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidationReason::ClosedThrough => write!(f, "closed_through"),
            InvalidationReason::DegenerateLevels => write!(f, "degenerate_levels"),
            InvalidationReason::TrapGuardExpired => write!(f, "trap_guard_expired"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Invalidation {
    pub index: usize,
    pub reason: InvalidationReason,
}

/// Entry plan computed when the entry decision accepts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeLevels {
    pub entry: f64,
    pub stop: f64,
    pub target: f64,
}

impl TradeLevels {
    pub fn risk(&self) -> f64 {
        (self.entry - self.stop).abs()
    }

    pub fn reward(&self) -> f64 {
        (self.target - self.entry).abs()
    }

    pub fn reward_risk(&self) -> f64 {
        if self.risk() > 0.0 {
            self.reward() / self.risk()
        } else {
            0.0
        }
    }
}

/// A point of interest tracked by the registry, plus its lifecycle state.
#[derive(Debug, Clone, Serialize)]
pub struct Zone {
    pub id: ZoneId,
    pub timeframe: Timeframe,
    pub direction: Direction,
    pub top: f64,
    pub bottom: f64,
    pub sources: Vec<ZoneSource>,
    pub strength: f64,
    /// Execution bar at whose close the zone was registered.
    pub registered_index: usize,
    pub created_at: DateTime<Utc>,
    pub phase: ZonePhase,
    pub confirmations: Vec<Confirmation>,
    pub tapped_index: Option<usize>,
    pub ready_index: Option<usize>,
    pub invalidation: Option<Invalidation>,
    pub levels: Option<TradeLevels>,
    pub trouble: Option<ZoneId>,
    pub addons: Vec<ZoneId>,
    pub last_deferral: Option<DeferReason>,
    #[serde(skip)]
    pub position: Option<PositionState>,
    #[serde(skip)]
    pub(crate) pending_trouble: Option<ZoneSummary>,
}

impl Zone {
    pub fn new(
        id: ZoneId,
        top: f64,
        bottom: f64,
        sources: Vec<ZoneSource>,
        strength: f64,
        registered_index: usize,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            timeframe: id.timeframe,
            direction: id.direction,
            top,
            bottom,
            sources,
            strength,
            registered_index,
            created_at,
            phase: ZonePhase::Idle,
            confirmations: Vec::new(),
            tapped_index: None,
            ready_index: None,
            invalidation: None,
            levels: None,
            trouble: None,
            addons: Vec::new(),
            last_deferral: None,
            position: None,
            pending_trouble: None,
        }
    }

    pub fn midpoint(&self) -> f64 {
        (self.top + self.bottom) / 2.0
    }

    /// Still able to produce signals: not discarded and not closed.
    pub fn is_active(&self) -> bool {
        self.invalidation.is_none() && self.phase != ZonePhase::Closed
    }

    pub fn confirmation_count(&self) -> usize {
        self.confirmations.len()
    }

    pub fn has_confirmation(&self, kind: ConfirmationType) -> bool {
        self.confirmations.iter().any(|c| c.kind.kind() == kind)
    }

    /// Near edge (the side price reaches first coming from the trade's favour).
    pub fn near_edge(&self) -> f64 {
        match self.direction {
            Direction::Long => self.top,
            Direction::Short => self.bottom,
        }
    }

    pub fn far_edge(&self) -> f64 {
        match self.direction {
            Direction::Long => self.bottom,
            Direction::Short => self.top,
        }
    }

    pub fn overlaps(&self, bottom: f64, top: f64) -> bool {
        self.bottom <= top && self.top >= bottom
    }

    pub fn summary(&self) -> ZoneSummary {
        ZoneSummary {
            id: self.id,
            direction: self.direction,
            top: self.top,
            bottom: self.bottom,
            active: self.is_active(),
            phase: self.phase,
        }
    }
}

/// Copy of a zone's geometry, handed to other zones' state machines so they
/// can look for trouble zones, targets and add-on candidates without
/// borrowing the registry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoneSummary {
    pub id: ZoneId,
    pub direction: Direction,
    pub top: f64,
    pub bottom: f64,
    pub active: bool,
    pub phase: ZonePhase,
}

impl ZoneSummary {
    pub fn midpoint(&self) -> f64 {
        (self.top + self.bottom) / 2.0
    }
}
