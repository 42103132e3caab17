//! Confirmation predicates.
//!
//! Each check is a pure function of the zone, the current execution bar and
//! the execution-timeframe annotations as of that bar. `collect` returns
//! every candidate the bar produces; the state machine appends them,
//! dropping any occurrence the zone already holds and stopping at the cap.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::Config;
use crate::core::annotations::{AnnotationView, GapZone};
use crate::models::{BreakKind, Candle, Direction};
use crate::strategies::zone::Zone;

/// Discriminant used for occurrence keys and trap-guard checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationType {
    Tap,
    LiquiditySweep,
    GapInversion,
    InversionRetest,
    StructureBreak,
    WickReaction,
    MidpointTest,
    ContinuationBreak,
}

impl ConfirmationType {
    /// Types that lift the trap guard.
    pub fn is_retracement(self) -> bool {
        matches!(
            self,
            ConfirmationType::GapInversion
                | ConfirmationType::InversionRetest
                | ConfirmationType::WickReaction
        )
    }
}

impl fmt::Display for ConfirmationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConfirmationType::Tap => "tap",
            ConfirmationType::LiquiditySweep => "liquidity_sweep",
            ConfirmationType::GapInversion => "gap_inversion",
            ConfirmationType::InversionRetest => "inversion_retest",
            ConfirmationType::StructureBreak => "structure_break",
            ConfirmationType::WickReaction => "wick_reaction",
            ConfirmationType::MidpointTest => "midpoint_test",
            ConfirmationType::ContinuationBreak => "continuation_break",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConfirmationKind {
    Tap,
    LiquiditySweep { level_id: usize, level: f64 },
    GapInversion { gap_id: usize, top: f64, bottom: f64 },
    InversionRetest { gap_id: usize, top: f64, bottom: f64 },
    StructureBreak { break_id: usize, kind: BreakKind, level: f64 },
    WickReaction { gap_id: usize, top: f64, bottom: f64 },
    MidpointTest { gap_id: usize, midpoint: f64 },
    ContinuationBreak { break_id: usize, level: f64 },
}

impl ConfirmationKind {
    pub fn kind(&self) -> ConfirmationType {
        match self {
            ConfirmationKind::Tap => ConfirmationType::Tap,
            ConfirmationKind::LiquiditySweep { .. } => ConfirmationType::LiquiditySweep,
            ConfirmationKind::GapInversion { .. } => ConfirmationType::GapInversion,
            ConfirmationKind::InversionRetest { .. } => ConfirmationType::InversionRetest,
            ConfirmationKind::StructureBreak { .. } => ConfirmationType::StructureBreak,
            ConfirmationKind::WickReaction { .. } => ConfirmationType::WickReaction,
            ConfirmationKind::MidpointTest { .. } => ConfirmationType::MidpointTest,
            ConfirmationKind::ContinuationBreak { .. } => ConfirmationType::ContinuationBreak,
        }
    }

    /// Type plus the id of the annotation that produced it. The tap has no
    /// source, so a zone can only ever hold one.
    pub fn occurrence(&self) -> (ConfirmationType, usize) {
        let source = match *self {
            ConfirmationKind::Tap => 0,
            ConfirmationKind::LiquiditySweep { level_id, .. } => level_id,
            ConfirmationKind::GapInversion { gap_id, .. }
            | ConfirmationKind::InversionRetest { gap_id, .. }
            | ConfirmationKind::WickReaction { gap_id, .. }
            | ConfirmationKind::MidpointTest { gap_id, .. } => gap_id,
            ConfirmationKind::StructureBreak { break_id, .. }
            | ConfirmationKind::ContinuationBreak { break_id, .. } => break_id,
        };
        (self.kind(), source)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Confirmation {
    #[serde(flatten)]
    pub kind: ConfirmationKind,
    pub bar_index: usize,
    pub timestamp: DateTime<Utc>,
}

/// What the checks may look at for one bar.
#[derive(Clone, Copy)]
pub struct CheckInput<'a> {
    pub index: usize,
    pub bar: &'a Candle,
    pub view: AnnotationView<'a>,
    pub config: &'a Config,
}

impl<'a> CheckInput<'a> {
    fn confirm(&self, kind: ConfirmationKind) -> Confirmation {
        Confirmation {
            kind,
            bar_index: self.index,
            timestamp: self.bar.timestamp,
        }
    }

    /// Allowed distance between an annotation and the zone.
    fn reach(&self, zone: &Zone) -> f64 {
        zone.midpoint() * self.config.confirmation_proximity
    }

    fn gap_is_near(&self, zone: &Zone, gap: &GapZone) -> bool {
        let reach = self.reach(zone);
        zone.overlaps(gap.bottom - reach, gap.top + reach)
    }

    fn level_is_near(&self, zone: &Zone, level: f64) -> bool {
        let reach = self.reach(zone);
        level >= zone.bottom - reach && level <= zone.top + reach
    }
}

/// All confirmations the bar produces for `zone`, in check order.
pub fn collect(zone: &Zone, input: &CheckInput<'_>) -> Vec<Confirmation> {
    let mut found = Vec::new();
    found.extend(check_tap(zone, input));
    found.extend(check_liquidity_sweeps(zone, input));
    found.extend(check_gap_inversions(zone, input));
    found.extend(check_inversion_retests(zone, input));
    found.extend(check_structure_breaks(zone, input));
    found.extend(check_midpoint_tests(zone, input));
    found.extend(check_wick_reactions(zone, input));
    found
}

pub fn check_tap(zone: &Zone, input: &CheckInput<'_>) -> Option<Confirmation> {
    let bar = input.bar;
    let tapped = match zone.direction {
        Direction::Long => bar.low <= zone.top,
        Direction::Short => bar.high >= zone.bottom,
    };
    tapped.then(|| input.confirm(ConfirmationKind::Tap))
}

/// Opposite-side liquidity near the zone, wicked through and closed back.
pub fn check_liquidity_sweeps(zone: &Zone, input: &CheckInput<'_>) -> Vec<Confirmation> {
    let bar = input.bar;
    input
        .view
        .liquidity()
        .filter(|l| l.side.supports() == zone.direction)
        .filter(|l| l.swept_index == Some(input.index))
        .filter(|l| match zone.direction {
            Direction::Long => bar.low < l.level && bar.close >= l.level,
            Direction::Short => bar.high > l.level && bar.close <= l.level,
        })
        .filter(|l| input.level_is_near(zone, l.level))
        .map(|l| {
            input.confirm(ConfirmationKind::LiquiditySweep {
                level_id: l.id,
                level: l.level,
            })
        })
        .collect()
}

/// An opposing gap inverted by this bar's close.
pub fn check_gap_inversions(zone: &Zone, input: &CheckInput<'_>) -> Vec<Confirmation> {
    input
        .view
        .gaps()
        .filter(|g| g.direction == zone.direction.opposite())
        .filter(|g| g.inverted_index == Some(input.index))
        .filter(|g| input.gap_is_near(zone, g))
        .map(|g| {
            input.confirm(ConfirmationKind::GapInversion {
                gap_id: g.id,
                top: g.top,
                bottom: g.bottom,
            })
        })
        .collect()
}

/// Price returning into an opposing gap inverted on an earlier bar.
pub fn check_inversion_retests(zone: &Zone, input: &CheckInput<'_>) -> Vec<Confirmation> {
    let bar = input.bar;
    input
        .view
        .gaps()
        .filter(|g| g.direction == zone.direction.opposite())
        .filter(|g| g.inverted_index.is_some_and(|i| i < input.index))
        .filter(|g| bar.overlaps(g.bottom, g.top))
        .filter(|g| input.gap_is_near(zone, g))
        .map(|g| {
            input.confirm(ConfirmationKind::InversionRetest {
                gap_id: g.id,
                top: g.top,
                bottom: g.bottom,
            })
        })
        .collect()
}

/// Breaks in the zone direction on this bar. The first break, or any BOS,
/// counts as a structure break; later continuation breaks count separately.
pub fn check_structure_breaks(zone: &Zone, input: &CheckInput<'_>) -> Vec<Confirmation> {
    let mut seen_structure = zone.has_confirmation(ConfirmationType::StructureBreak);
    let mut found = Vec::new();

    for b in input
        .view
        .breaks_at(input.index)
        .filter(|b| b.direction == zone.direction)
    {
        if b.kind == BreakKind::Bos || !seen_structure {
            found.push(input.confirm(ConfirmationKind::StructureBreak {
                break_id: b.id,
                kind: b.kind,
                level: b.level,
            }));
            seen_structure = true;
        } else {
            found.push(input.confirm(ConfirmationKind::ContinuationBreak {
                break_id: b.id,
                level: b.level,
            }));
        }
    }
    found
}

pub fn check_midpoint_tests(zone: &Zone, input: &CheckInput<'_>) -> Vec<Confirmation> {
    let bar = input.bar;
    let tol = input.config.midpoint_tolerance;
    same_direction_gaps(zone, input)
        .filter(|g| {
            let mid = g.midpoint();
            match zone.direction {
                Direction::Long => bar.low <= mid * (1.0 + tol) && bar.close >= g.bottom,
                Direction::Short => bar.high >= mid * (1.0 - tol) && bar.close <= g.top,
            }
        })
        .map(|g| {
            input.confirm(ConfirmationKind::MidpointTest {
                gap_id: g.id,
                midpoint: g.midpoint(),
            })
        })
        .collect()
}

/// Wick into a same-direction gap that closes back beyond its midpoint.
/// Only accepted once the zone holds the minimum count from other types.
pub fn check_wick_reactions(zone: &Zone, input: &CheckInput<'_>) -> Vec<Confirmation> {
    let stronger = zone
        .confirmations
        .iter()
        .filter(|c| c.kind.kind() != ConfirmationType::WickReaction)
        .count();
    if stronger < input.config.min_confirmations {
        return Vec::new();
    }

    let bar = input.bar;
    same_direction_gaps(zone, input)
        .filter(|g| match zone.direction {
            Direction::Long => bar.low <= g.top && bar.close > g.midpoint() && bar.lower_wick() > 0.0,
            Direction::Short => bar.high >= g.bottom && bar.close < g.midpoint() && bar.upper_wick() > 0.0,
        })
        .map(|g| {
            input.confirm(ConfirmationKind::WickReaction {
                gap_id: g.id,
                top: g.top,
                bottom: g.bottom,
            })
        })
        .collect()
}

fn same_direction_gaps<'a>(
    zone: &'a Zone,
    input: &'a CheckInput<'a>,
) -> impl Iterator<Item = &'a GapZone> + 'a {
    let index = input.index;
    input
        .view
        .gaps()
        .filter(move |g| g.direction == zone.direction)
        .filter(move |g| g.is_active_before(index))
        .filter(move |g| input.gap_is_near(zone, g))
}
