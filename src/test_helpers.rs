use chrono::{DateTime, Duration, Utc};

use crate::config::Config;
use crate::core::annotations::{GapZone, LiquidityLevel, StructureBreak, SwingPoint};
use crate::models::{BreakKind, Candle, CandleSeries, Direction, LiquiditySide, SwingType};

pub fn base_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-15T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn at(index: usize) -> DateTime<Utc> {
    base_time() + Duration::minutes(index as i64)
}

/// Create candles from (open, high, low, close) tuples with auto-incrementing 1m timestamps.
pub fn make_candles(data: &[(f64, f64, f64, f64)]) -> CandleSeries {
    let candles: Vec<Candle> = data
        .iter()
        .enumerate()
        .map(|(i, &(o, h, l, c))| Candle {
            timestamp: at(i),
            open: o,
            high: h,
            low: l,
            close: c,
            volume: 100.0,
        })
        .collect();

    CandleSeries::new(candles)
}

/// `n` identical bars around `price`, one minute apart.
pub fn make_flat(n: usize, price: f64) -> CandleSeries {
    let data: Vec<_> = (0..n)
        .map(|_| (price, price + 0.5, price - 0.5, price))
        .collect();
    make_candles(&data)
}

/// Create n rising (bullish) candles starting from `start` price.
pub fn make_bullish_trend(n: usize, start: f64) -> CandleSeries {
    let candles: Vec<Candle> = (0..n)
        .map(|i| {
            let open = start + i as f64 * 10.0;
            let close = open + 8.0;
            Candle {
                timestamp: at(i),
                open,
                high: close + 2.0,
                low: open - 1.0,
                close,
                volume: 100.0,
            }
        })
        .collect();

    CandleSeries::new(candles)
}

/// Test config: no costs, temp log dir, everything else at defaults.
pub fn default_test_config() -> Config {
    Config {
        fee_rate: 0.0,
        slippage_rate: 0.0,
        log_dir: std::env::temp_dir()
            .join("ict_poi_backtester_test")
            .to_string_lossy()
            .to_string(),
        log_level: "ERROR".to_string(),
        ..Config::default()
    }
}

pub fn swing(
    id: usize,
    swing_type: SwingType,
    price: f64,
    index: usize,
    confirmed_index: usize,
) -> SwingPoint {
    SwingPoint {
        id,
        swing_type,
        price,
        index,
        confirmed_index,
        timestamp: at(index),
    }
}

pub fn structure_break(
    id: usize,
    kind: BreakKind,
    direction: Direction,
    level: f64,
    index: usize,
) -> StructureBreak {
    StructureBreak {
        id,
        kind,
        direction,
        level,
        index,
        swing_index: index.saturating_sub(1),
        timestamp: at(index),
    }
}

pub fn gap(id: usize, direction: Direction, top: f64, bottom: f64, created_index: usize) -> GapZone {
    GapZone {
        id,
        direction,
        top,
        bottom,
        created_index,
        timestamp: at(created_index),
        tested_index: None,
        partially_filled_index: None,
        fully_filled_index: None,
        mitigated_index: None,
        inverted_index: None,
    }
}

/// A level formed at `formed_index` from two touches, not yet swept.
pub fn liquidity(id: usize, side: LiquiditySide, level: f64, formed_index: usize) -> LiquidityLevel {
    LiquidityLevel {
        id,
        side,
        level,
        touches: vec![formed_index.saturating_sub(1), formed_index],
        formed_index,
        swept_index: None,
        timestamp: at(formed_index),
    }
}
