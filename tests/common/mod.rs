#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};

use ict_poi_backtester::backtesting::{BacktestResult, BacktestRunner};
use ict_poi_backtester::config::Config;
use ict_poi_backtester::core::annotations::{Annotations, GapZone, LiquidityLevel, StructureBreak};
use ict_poi_backtester::data::TimeframeStore;
use ict_poi_backtester::models::{BreakKind, Candle, CandleSeries, Direction, LiquiditySide, Timeframe};
use ict_poi_backtester::strategies::ZoneId;

pub type Bar = (f64, f64, f64, f64);

pub fn base_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-15T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

pub fn at(index: usize) -> DateTime<Utc> {
    base_time() + Duration::minutes(index as i64)
}

/// Create candles from (open, high, low, close) tuples with auto-incrementing 1m timestamps.
pub fn make_candles(data: &[Bar]) -> CandleSeries {
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

/// Two-touch level; below the registry's touch minimum so it never becomes a zone.
pub fn sell_side_level(id: usize, level: f64, formed_index: usize, swept_index: usize) -> LiquidityLevel {
    LiquidityLevel {
        id,
        side: LiquiditySide::SellSide,
        level,
        touches: vec![formed_index - 1, formed_index],
        formed_index,
        swept_index: Some(swept_index),
        timestamp: at(formed_index),
    }
}

pub fn structure_break(id: usize, kind: BreakKind, direction: Direction, level: f64, index: usize) -> StructureBreak {
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

/// Everything on 1m: execution, both bias timeframes and zones. No costs.
pub fn single_tf_config() -> Config {
    Config {
        timeframes: vec![Timeframe::M1],
        execution_tf: Timeframe::M1,
        htf_bias_tf: Timeframe::M1,
        ltf_bias_tf: Timeframe::M1,
        zone_timeframes: vec![Timeframe::M1],
        fee_rate: 0.0,
        slippage_rate: 0.0,
        log_dir: std::env::temp_dir()
            .join(format!("ict_poi_integ_{}", std::process::id()))
            .to_string_lossy()
            .to_string(),
        ..Config::default()
    }
}

/// The long zone built from the bullish gap at bars 28-30.
pub fn demand_zone() -> ZoneId {
    ZoneId::new(Timeframe::M1, Direction::Long, 101.0, 100.0, 6)
}

pub const SWEPT_LEVEL: f64 = 99.9;

/// Flat at 105 through bar 30, a drift down into the 100-101 gap, a tap at
/// 36, a sell-side sweep at 37 and a close back above the gap at 40/41.
/// The zone is ready at bar 40 (tap, sweep, midpoint test, BOS, continuation).
pub fn approach_bars() -> Vec<Bar> {
    let mut bars: Vec<Bar> = (0..=30).map(|_| (105.0, 105.5, 104.5, 105.0)).collect();
    bars.extend([
        (104.5, 104.8, 103.8, 104.0),  // 31
        (104.0, 104.2, 103.2, 103.4),  // 32
        (103.4, 103.5, 102.6, 102.8),  // 33
        (102.8, 103.0, 102.0, 102.2),  // 34
        (102.2, 102.4, 101.5, 101.6),  // 35
        (101.6, 101.7, 100.7, 101.2),  // 36 tap
        (101.0, 101.2, 99.7, 100.4),   // 37 sweep + midpoint test
        (100.4, 101.3, 100.3, 101.25), // 38
        (101.25, 101.5, 101.1, 101.45), // 39 BOS
        (101.45, 101.7, 101.3, 101.65), // 40 continuation
        (101.6, 102.0, 101.5, 101.9),  // 41
    ]);
    bars
}

pub fn approach_annotations() -> Annotations {
    Annotations {
        gaps: vec![gap(0, Direction::Long, 101.0, 100.0, 30)],
        liquidity: vec![sell_side_level(0, SWEPT_LEVEL, 20, 37)],
        breaks: vec![
            structure_break(0, BreakKind::Bos, Direction::Long, 101.3, 39),
            structure_break(1, BreakKind::Cbos, Direction::Long, 101.5, 40),
        ],
        ..Annotations::default()
    }
}

/// Same approach, but the fifth confirmation is a bearish gap above the
/// zone that bar 40 closes through instead of a continuation break.
pub fn inversion_annotations() -> Annotations {
    let mut overhead = gap(1, Direction::Short, 101.6, 101.35, 36);
    overhead.inverted_index = Some(40);
    Annotations {
        gaps: vec![gap(0, Direction::Long, 101.0, 100.0, 30), overhead],
        liquidity: vec![sell_side_level(0, SWEPT_LEVEL, 20, 37)],
        breaks: vec![structure_break(0, BreakKind::Bos, Direction::Long, 101.3, 39)],
        ..Annotations::default()
    }
}

pub fn single_tf_store(bars: &[Bar], annotations: Annotations) -> TimeframeStore {
    let mut store = TimeframeStore::new();
    store
        .insert(Timeframe::M1, make_candles(bars), annotations)
        .unwrap();
    store
}

pub fn run(store: TimeframeStore, config: Config) -> BacktestResult {
    BacktestRunner::new(store, config).unwrap().run().unwrap()
}
