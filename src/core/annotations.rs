//! Structural annotation records and their time-gated view.
//!
//! Every record carries the bar index at which it became knowable. Lifecycle
//! facts (tested, inverted, swept, ...) are stored as the index of the bar that
//! produced them, so the state "as of bar k" is derived rather than stored and
//! nothing produced after k can leak into a decision made at k.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{BreakKind, CandleSeries, Direction, GapStatus, LiquiditySide, SwingType, Timeframe};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwingPoint {
    pub id: usize,
    pub swing_type: SwingType,
    pub price: f64,
    /// Bar that printed the extreme.
    pub index: usize,
    /// First bar at whose close the swing is confirmed.
    pub confirmed_index: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureBreak {
    pub id: usize,
    pub kind: BreakKind,
    pub direction: Direction,
    /// Price of the swing that was broken.
    pub level: f64,
    /// Bar whose close broke the level.
    pub index: usize,
    pub swing_index: usize,
    pub timestamp: DateTime<Utc>,
}

/// Three-bar imbalance plus the bars at which its lifecycle advanced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapZone {
    pub id: usize,
    pub direction: Direction,
    pub top: f64,
    pub bottom: f64,
    pub created_index: usize,
    pub timestamp: DateTime<Utc>,
    pub tested_index: Option<usize>,
    pub partially_filled_index: Option<usize>,
    pub fully_filled_index: Option<usize>,
    pub mitigated_index: Option<usize>,
    pub inverted_index: Option<usize>,
}

impl GapZone {
    pub fn midpoint(&self) -> f64 {
        (self.top + self.bottom) / 2.0
    }

    pub fn status_at(&self, index: usize) -> GapStatus {
        let reached = |slot: Option<usize>| slot.is_some_and(|i| i <= index);
        if reached(self.inverted_index) {
            GapStatus::Inverted
        } else if reached(self.mitigated_index) {
            GapStatus::Mitigated
        } else if reached(self.fully_filled_index) {
            GapStatus::FullyFilled
        } else if reached(self.partially_filled_index) {
            GapStatus::PartiallyFilled
        } else if reached(self.tested_index) {
            GapStatus::Tested
        } else {
            GapStatus::Fresh
        }
    }

    /// Active over the whole of bar `index`, i.e. as of the previous close.
    pub fn is_active_before(&self, index: usize) -> bool {
        self.created_index < index
            && (index == 0 || self.status_at(index - 1).is_active())
    }

    pub fn overlaps(&self, bottom: f64, top: f64) -> bool {
        self.bottom <= top && self.top >= bottom
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidityLevel {
    pub id: usize,
    pub side: LiquiditySide,
    pub level: f64,
    /// Confirmation bar of every swing that touched the level, in order.
    pub touches: Vec<usize>,
    /// Bar at which the minimum number of touches was confirmed.
    pub formed_index: usize,
    /// First bar after formation whose wick traded through the level.
    pub swept_index: Option<usize>,
    pub timestamp: DateTime<Utc>,
}

impl LiquidityLevel {
    pub fn touches_at(&self, index: usize) -> usize {
        self.touches.iter().filter(|&&t| t <= index).count()
    }

    pub fn is_swept_at(&self, index: usize) -> bool {
        self.swept_index.is_some_and(|s| s <= index)
    }
}

/// Last opposing candle before a structure break. Once a close goes through
/// its far edge the same range serves the other side as a breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBlock {
    pub id: usize,
    /// Side the block supports; the breaker acts for the opposite side.
    pub direction: Direction,
    pub top: f64,
    pub bottom: f64,
    pub candle_index: usize,
    /// Bar of the break that made the block knowable.
    pub trigger_index: usize,
    pub timestamp: DateTime<Utc>,
    pub tested_index: Option<usize>,
    pub broken_index: Option<usize>,
    pub breaker_tested_index: Option<usize>,
    pub breaker_mitigated_index: Option<usize>,
}

impl OrderBlock {
    pub fn is_block_active_at(&self, index: usize) -> bool {
        self.trigger_index <= index && !self.broken_index.is_some_and(|b| b <= index)
    }

    pub fn is_tested_at(&self, index: usize) -> bool {
        self.tested_index.is_some_and(|t| t <= index)
    }

    pub fn is_breaker_active_at(&self, index: usize) -> bool {
        self.broken_index.is_some_and(|b| b <= index)
            && !self.breaker_mitigated_index.is_some_and(|m| m <= index)
    }

    pub fn is_breaker_tested_at(&self, index: usize) -> bool {
        self.breaker_tested_index.is_some_and(|t| t <= index)
    }
}

/// The annotation streams for one timeframe. Each stream is ordered by the
/// bar at which its records became knowable; see [`sort_by_knowable_index`].
///
/// [`sort_by_knowable_index`]: Annotations::sort_by_knowable_index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Annotations {
    pub swings: Vec<SwingPoint>,
    pub breaks: Vec<StructureBreak>,
    pub gaps: Vec<GapZone>,
    pub liquidity: Vec<LiquidityLevel>,
    #[serde(default)]
    pub order_blocks: Vec<OrderBlock>,
}

impl Annotations {
    pub fn is_empty(&self) -> bool {
        self.swings.is_empty()
            && self.breaks.is_empty()
            && self.gaps.is_empty()
            && self.liquidity.is_empty()
            && self.order_blocks.is_empty()
    }

    /// Stable sort of every stream by knowable index, which the view's
    /// prefix lookups rely on.
    pub fn sort_by_knowable_index(&mut self) {
        self.swings.sort_by_key(|s| s.confirmed_index);
        self.breaks.sort_by_key(|b| b.index);
        self.gaps.sort_by_key(|g| g.created_index);
        self.liquidity.sort_by_key(|l| l.formed_index);
        self.order_blocks.sort_by_key(|ob| ob.trigger_index);
    }
}

/// Annotations restricted to what was knowable at the close of bar `as_of`.
/// Streams must be sorted by knowable index.
#[derive(Debug, Clone, Copy)]
pub struct AnnotationView<'a> {
    pub timeframe: Timeframe,
    pub as_of: usize,
    annotations: &'a Annotations,
}

impl<'a> AnnotationView<'a> {
    pub fn new(timeframe: Timeframe, as_of: usize, annotations: &'a Annotations) -> Self {
        Self {
            timeframe,
            as_of,
            annotations,
        }
    }

    fn known<T>(self, records: &'a [T], knowable: impl Fn(&T) -> usize) -> &'a [T] {
        let end = records.partition_point(|r| knowable(r) <= self.as_of);
        &records[..end]
    }

    pub fn swings(self) -> impl Iterator<Item = &'a SwingPoint> {
        self.known(self.annotations.swings.as_slice(), |s| s.confirmed_index).iter()
    }

    fn known_breaks(self) -> &'a [StructureBreak] {
        self.known(self.annotations.breaks.as_slice(), |b| b.index)
    }

    pub fn breaks(self) -> impl Iterator<Item = &'a StructureBreak> {
        self.known_breaks().iter()
    }

    /// Breaks produced by the bar `index` itself.
    pub fn breaks_at(self, index: usize) -> impl Iterator<Item = &'a StructureBreak> {
        let known = self.known_breaks();
        let lo = known.partition_point(|b| b.index < index);
        let hi = known.partition_point(|b| b.index <= index);
        known[lo..hi].iter()
    }

    /// The most recent `n` breaks, oldest first.
    pub fn recent_breaks(self, n: usize) -> Vec<&'a StructureBreak> {
        let known = self.known_breaks();
        known[known.len().saturating_sub(n)..].iter().collect()
    }

    pub fn gaps(self) -> impl Iterator<Item = &'a GapZone> {
        self.known(self.annotations.gaps.as_slice(), |g| g.created_index).iter()
    }

    pub fn gap_status(self, gap: &GapZone) -> GapStatus {
        gap.status_at(self.as_of)
    }

    pub fn active_gaps(self) -> impl Iterator<Item = &'a GapZone> {
        let as_of = self.as_of;
        self.gaps().filter(move |g| g.status_at(as_of).is_active())
    }

    pub fn liquidity(self) -> impl Iterator<Item = &'a LiquidityLevel> {
        self.known(self.annotations.liquidity.as_slice(), |l| l.formed_index).iter()
    }

    pub fn order_blocks(self) -> impl Iterator<Item = &'a OrderBlock> {
        self.known(self.annotations.order_blocks.as_slice(), |ob| ob.trigger_index).iter()
    }
}

/// Labels a bar series with structural annotations. Implementations must be
/// pure: the same bars always yield the same annotations.
pub trait Annotator: Send + Sync {
    fn annotate(&self, timeframe: Timeframe, candles: &CandleSeries) -> Annotations;
}
