use crate::config::{Config, StopMode, TargetMode};
use crate::core::annotations::AnnotationView;
use crate::models::{Direction, SwingType};
use crate::strategies::confirmations::ConfirmationKind;
use crate::strategies::zone::{Zone, ZoneSummary};

/// Stop for an entry at `entry`, by the configured mode, falling back to
/// behind the zone. `None` when no stop lands on the losing side of entry.
pub fn stop_for(zone: &Zone, entry: f64, view: AnnotationView<'_>, config: &Config) -> Option<f64> {
    let direction = zone.direction;
    let buffer = zone.midpoint() * config.stop_buffer_pct;
    let behind = |level: f64| level - direction.sign() * buffer;
    let valid = |stop: f64| direction.beyond(entry, stop);

    let preferred = match config.stop_mode {
        StopMode::BehindZone => None,
        StopMode::BehindGap => nearest_gap(direction, entry, view).map(|(bottom, top, _)| match direction {
            Direction::Long => behind(bottom),
            Direction::Short => behind(top),
        }),
        StopMode::BehindGapMidpoint => nearest_gap(direction, entry, view).map(|(_, _, mid)| behind(mid)),
        StopMode::BehindLiquidity => zone
            .confirmations
            .iter()
            .rev()
            .find_map(|c| match c.kind {
                ConfirmationKind::LiquiditySweep { level, .. } => Some(behind(level)),
                _ => None,
            }),
    };

    preferred
        .filter(|&s| valid(s))
        .or_else(|| Some(behind(zone.far_edge())).filter(|&s| valid(s)))
}

/// `(bottom, top, midpoint)` of the nearest active same-direction gap on
/// the losing side of entry.
fn nearest_gap(direction: Direction, entry: f64, view: AnnotationView<'_>) -> Option<(f64, f64, f64)> {
    let gaps = view.active_gaps().filter(|g| g.direction == direction);
    let nearest = match direction {
        Direction::Long => gaps
            .filter(|g| g.bottom < entry)
            .max_by(|a, b| a.bottom.total_cmp(&b.bottom)),
        Direction::Short => gaps
            .filter(|g| g.top > entry)
            .min_by(|a, b| a.top.total_cmp(&b.top)),
    };
    nearest.map(|g| (g.bottom, g.top, g.midpoint()))
}

/// Target by the configured mode. Structural targets try the nearest swing
/// beyond entry on `swings_view`, then the nearest opposing zone, then a
/// fixed percentage away. `None` when the result is not beyond entry.
pub fn target_for(
    zone: &Zone,
    entry: f64,
    stop: f64,
    swings_view: Option<AnnotationView<'_>>,
    zones: &[ZoneSummary],
    config: &Config,
) -> Option<f64> {
    let direction = zone.direction;
    let target = match config.target_mode {
        TargetMode::RiskMultiple(r) => entry + direction.sign() * r * (entry - stop).abs(),
        TargetMode::Structural => swings_view
            .and_then(|view| nearest_swing(direction, entry, view))
            .or_else(|| nearest_opposing_zone(zone, entry, zones))
            .unwrap_or(entry * (1.0 + direction.sign() * config.fallback_target_pct)),
    };
    direction.beyond(target, entry).then_some(target)
}

fn nearest_swing(direction: Direction, entry: f64, view: AnnotationView<'_>) -> Option<f64> {
    let prices = view.swings().map(|s| (s.swing_type, s.price));
    match direction {
        Direction::Long => prices
            .filter(|&(t, p)| t == SwingType::High && p > entry)
            .map(|(_, p)| p)
            .min_by(f64::total_cmp),
        Direction::Short => prices
            .filter(|&(t, p)| t == SwingType::Low && p < entry)
            .map(|(_, p)| p)
            .max_by(f64::total_cmp),
    }
}

fn nearest_opposing_zone(zone: &Zone, entry: f64, zones: &[ZoneSummary]) -> Option<f64> {
    let opposing = zones
        .iter()
        .filter(|z| z.active && z.id != zone.id && z.direction == zone.direction.opposite());
    match zone.direction {
        Direction::Long => opposing
            .map(|z| z.bottom)
            .filter(|&b| b > entry)
            .min_by(f64::total_cmp),
        Direction::Short => opposing
            .map(|z| z.top)
            .filter(|&t| t < entry)
            .max_by(f64::total_cmp),
    }
}

/// Stop level that locks in fees on both sides.
pub fn breakeven_level(direction: Direction, fill: f64, fee_rate: f64) -> f64 {
    fill * (1.0 + direction.sign() * 2.0 * fee_rate)
}
