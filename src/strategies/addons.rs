use std::collections::{BTreeMap, BTreeSet};

use crate::models::{Candle, Direction};
use crate::strategies::zone::{ZoneId, ZoneSummary};

/// Tracks add-on candidates for one open zone: when each was touched and
/// which have already been used.
#[derive(Debug, Clone, Default)]
pub struct AddOnTracker {
    touched: BTreeMap<ZoneId, usize>,
    used: BTreeSet<ZoneId>,
}

impl AddOnTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn used(&self) -> usize {
        self.used.len()
    }

    /// Returns a child zone to add on, at most one per bar. A child fires
    /// once it has been touched and a structural break in `direction`
    /// follows within `window` bars of the touch.
    #[allow(clippy::too_many_arguments)]
    pub fn on_bar(
        &mut self,
        parent: ZoneId,
        direction: Direction,
        entry: f64,
        target: f64,
        zones: &[ZoneSummary],
        bar: &Candle,
        index: usize,
        break_in_direction: bool,
        window: usize,
    ) -> Option<ZoneId> {
        for child in candidates(parent, direction, entry, target, zones) {
            if self.used.contains(&child.id) {
                continue;
            }
            if bar.overlaps(child.bottom, child.top) {
                self.touched.entry(child.id).or_insert(index);
            }
        }

        if !break_in_direction {
            return None;
        }

        let child = self
            .touched
            .iter()
            .find(|(id, at)| !self.used.contains(*id) && index - **at <= window)
            .map(|(id, _)| *id)?;
        self.used.insert(child);
        Some(child)
    }
}

/// Active same-direction zones whose midpoint lies between entry and target.
pub fn candidates<'a>(
    parent: ZoneId,
    direction: Direction,
    entry: f64,
    target: f64,
    zones: &'a [ZoneSummary],
) -> impl Iterator<Item = &'a ZoneSummary> + 'a {
    let (low, high) = if entry < target {
        (entry, target)
    } else {
        (target, entry)
    };
    zones.iter().filter(move |z| {
        z.active
            && z.id != parent
            && z.direction == direction
            && !z.phase.has_position()
            && z.midpoint() > low
            && z.midpoint() < high
    })
}
