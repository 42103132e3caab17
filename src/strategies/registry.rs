use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::debug;

use crate::config::Config;
use crate::core::annotations::AnnotationView;
use crate::models::{Direction, GapStatus, LiquiditySide, Timeframe};
use crate::strategies::zone::{Zone, ZoneId, ZoneSource, ZoneSummary};

/// Half-width of a zone built around a liquidity level, as a fraction of price.
const LIQUIDITY_ZONE_HALF_WIDTH: f64 = 0.0005;

const WEIGHT_HTF_GAP: f64 = 3.0;
const WEIGHT_LTF_GAP: f64 = 1.0;
const WEIGHT_INVERSION: f64 = 2.0;
const WEIGHT_LIQUIDITY: f64 = 2.0;
const WEIGHT_ORDER_BLOCK: f64 = 2.0;
const WEIGHT_BREAKER: f64 = 2.0;

/// A zone proposed from one or more annotations, before fingerprinting.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub timeframe: Timeframe,
    pub direction: Direction,
    pub top: f64,
    pub bottom: f64,
    pub sources: Vec<ZoneSource>,
    pub score: f64,
    /// Contains an annotation produced by the bar that just closed.
    pub is_new: bool,
}

impl Candidate {
    fn overlaps(&self, other: &Candidate, tolerance: f64) -> bool {
        self.direction == other.direction
            && self.bottom <= other.top * (1.0 + tolerance)
            && self.top >= other.bottom * (1.0 - tolerance)
    }

    fn absorb(&mut self, other: Candidate) {
        self.top = self.top.max(other.top);
        self.bottom = self.bottom.min(other.bottom);
        self.sources.extend(other.sources);
        self.score += other.score;
        self.is_new |= other.is_new;
    }
}

/// Result of one registration pass.
#[derive(Debug, Default)]
pub struct Registration {
    pub registered: Vec<ZoneId>,
    /// Candidates with no usable width.
    pub rejected: Vec<Candidate>,
}

fn gap_freshness(status: GapStatus) -> f64 {
    match status {
        GapStatus::Fresh => 1.0,
        GapStatus::Tested => 0.75,
        GapStatus::PartiallyFilled => 0.5,
        _ => 0.0,
    }
}

/// Zones the annotations on `view` support as of its bar, merged and scored.
pub fn discover(view: AnnotationView<'_>, config: &Config) -> Vec<Candidate> {
    let tf = view.timeframe;
    let j = view.as_of;
    let mut found = Vec::new();

    for g in view.gaps() {
        let status = view.gap_status(g);
        if status.is_active() {
            let weight = if tf.is_higher_timeframe() {
                WEIGHT_HTF_GAP
            } else {
                WEIGHT_LTF_GAP
            };
            found.push(Candidate {
                timeframe: tf,
                direction: g.direction,
                top: g.top,
                bottom: g.bottom,
                sources: vec![ZoneSource::Gap { timeframe: tf, gap_id: g.id }],
                score: weight * gap_freshness(status),
                is_new: g.created_index == j,
            });
        } else if status == GapStatus::Inverted {
            // An inverted gap flips into support/resistance for the other side.
            found.push(Candidate {
                timeframe: tf,
                direction: g.direction.opposite(),
                top: g.top,
                bottom: g.bottom,
                sources: vec![ZoneSource::InvertedGap { timeframe: tf, gap_id: g.id }],
                score: WEIGHT_INVERSION,
                is_new: g.inverted_index == Some(j),
            });
        }
    }

    let min_touches = config.liquidity_zone_min_touches.max(1);
    for l in view.liquidity() {
        if l.is_swept_at(j) || l.touches_at(j) < min_touches {
            continue;
        }
        let direction = match l.side {
            LiquiditySide::SellSide => Direction::Long,
            LiquiditySide::BuySide => Direction::Short,
        };
        let half = l.level * LIQUIDITY_ZONE_HALF_WIDTH;
        found.push(Candidate {
            timeframe: tf,
            direction,
            top: l.level + half,
            bottom: l.level - half,
            sources: vec![ZoneSource::Liquidity { timeframe: tf, level_id: l.id }],
            score: WEIGHT_LIQUIDITY,
            is_new: l.touches.get(min_touches - 1) == Some(&j),
        });
    }

    for ob in view.order_blocks() {
        if ob.is_block_active_at(j) {
            let freshness = if ob.is_tested_at(j) { 0.75 } else { 1.0 };
            found.push(Candidate {
                timeframe: tf,
                direction: ob.direction,
                top: ob.top,
                bottom: ob.bottom,
                sources: vec![ZoneSource::OrderBlock { timeframe: tf, block_id: ob.id }],
                score: WEIGHT_ORDER_BLOCK * freshness,
                is_new: ob.trigger_index == j,
            });
        } else if ob.is_breaker_active_at(j) {
            let freshness = if ob.is_breaker_tested_at(j) { 0.75 } else { 1.0 };
            found.push(Candidate {
                timeframe: tf,
                direction: ob.direction.opposite(),
                top: ob.top,
                bottom: ob.bottom,
                sources: vec![ZoneSource::Breaker { timeframe: tf, block_id: ob.id }],
                score: WEIGHT_BREAKER * freshness,
                is_new: ob.broken_index == Some(j),
            });
        }
    }

    merge(found, config.zone_merge_tolerance)
}

/// Collapse overlapping same-direction candidates into composites.
fn merge(mut candidates: Vec<Candidate>, tolerance: f64) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        a.direction
            .cmp(&b.direction)
            .then(a.bottom.total_cmp(&b.bottom))
            .then(a.top.total_cmp(&b.top))
    });

    let mut merged: Vec<Candidate> = Vec::new();
    for c in candidates {
        match merged.last_mut() {
            Some(last) if last.overlaps(&c, tolerance) => last.absorb(c),
            _ => merged.push(c),
        }
    }
    merged
}

/// Owns every zone. Zones are kept in registration order (the order the
/// driver feeds them bars); discarded and closed zones stay so their
/// fingerprints keep deduplicating.
#[derive(Default)]
pub struct ZoneRegistry {
    zones: Vec<Zone>,
    index: HashMap<ZoneId, usize>,
}

impl ZoneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register new composites from a just-closed bar on a zone timeframe.
    /// Already-known fingerprints are skipped silently.
    pub fn register_from(
        &mut self,
        view: AnnotationView<'_>,
        config: &Config,
        exec_index: usize,
        timestamp: DateTime<Utc>,
    ) -> Registration {
        let mut result = Registration::default();

        for c in discover(view, config).into_iter().filter(|c| c.is_new) {
            if !(c.top > c.bottom) {
                result.rejected.push(c);
                continue;
            }
            let id = ZoneId::new(c.timeframe, c.direction, c.top, c.bottom, config.fingerprint_decimals);
            if self.index.contains_key(&id) {
                continue;
            }
            debug!(zone = %id, strength = c.score, "Registered zone");
            let zone = Zone::new(id, c.top, c.bottom, c.sources, c.score, exec_index, timestamp);
            self.insert(zone);
            result.registered.push(id);
        }
        result
    }

    /// Adds `zone` unless its fingerprint is already known.
    pub fn insert(&mut self, zone: Zone) -> bool {
        if self.index.contains_key(&zone.id) {
            return false;
        }
        self.index.insert(zone.id, self.zones.len());
        self.zones.push(zone);
        true
    }

    pub fn contains(&self, id: &ZoneId) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &ZoneId) -> Option<&Zone> {
        self.index.get(id).map(|&i| &self.zones[i])
    }

    pub fn get_mut(&mut self, id: &ZoneId) -> Option<&mut Zone> {
        match self.index.get(id) {
            Some(&i) => Some(&mut self.zones[i]),
            None => None,
        }
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Zone> {
        self.zones.iter()
    }

    /// Zones that can still act, in registration order.
    pub fn active_mut(&mut self) -> impl Iterator<Item = &mut Zone> {
        self.zones.iter_mut().filter(|z| z.is_active())
    }

    /// Snapshots of the zones that can still act, in registration order.
    pub fn summaries(&self) -> Vec<ZoneSummary> {
        self.zones
            .iter()
            .filter(|z| z.is_active())
            .map(Zone::summary)
            .collect()
    }

    pub fn into_zones(self) -> Vec<Zone> {
        self.zones
    }

    /// Zones that currently hold a position.
    pub fn positioned(&self) -> impl Iterator<Item = &Zone> {
        self.zones.iter().filter(|z| z.is_active() && z.phase.has_position())
    }
}
