use crate::models::{Candle, Direction};
use crate::strategies::zone::{ZoneId, ZoneSummary};

/// First active opposing zone strictly between `entry` and `target`.
pub fn find_trouble(
    direction: Direction,
    entry: f64,
    target: f64,
    zones: &[ZoneSummary],
    own: ZoneId,
) -> Option<ZoneSummary> {
    let opposing = zones
        .iter()
        .filter(|z| z.active && z.id != own && z.direction == direction.opposite());

    match direction {
        Direction::Long => opposing
            .filter(|z| z.bottom > entry && z.bottom < target)
            .min_by(|a, b| a.bottom.total_cmp(&b.bottom))
            .copied(),
        Direction::Short => opposing
            .filter(|z| z.top < entry && z.top > target)
            .max_by(|a, b| a.top.total_cmp(&b.top))
            .copied(),
    }
}

/// Close when the trouble zone's midpoint sits within `threshold` of the
/// path from entry to target.
pub fn is_close(trouble: &ZoneSummary, entry: f64, target: f64, threshold: f64) -> bool {
    let path = (target - entry).abs();
    path > 0.0 && (trouble.midpoint() - entry).abs() / path <= threshold
}

/// How one bar interacted with a trouble zone ahead of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TroubleCheck {
    /// Reached and closed back out on the position's side.
    pub validated: bool,
    /// Closed fully through; no longer in the way.
    pub invalidated: bool,
    pub midpoint_crossed: bool,
}

pub fn check(trouble: &ZoneSummary, direction: Direction, bar: &Candle) -> TroubleCheck {
    let mid = trouble.midpoint();
    match direction {
        Direction::Long => TroubleCheck {
            validated: bar.high >= trouble.bottom && bar.close < trouble.bottom,
            invalidated: bar.close > trouble.top,
            midpoint_crossed: bar.high >= mid,
        },
        Direction::Short => TroubleCheck {
            validated: bar.low <= trouble.top && bar.close > trouble.top,
            invalidated: bar.close < trouble.bottom,
            midpoint_crossed: bar.low <= mid,
        },
    }
}
