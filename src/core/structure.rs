use crate::core::annotations::{StructureBreak, SwingPoint};
use crate::models::{BreakKind, CandleSeries, Direction, SwingType};

/// Fractal swing detection plus break-of-structure classification.
pub struct MarketStructure {
    pub swing_length: usize,
    pub swings: Vec<SwingPoint>,
    pub breaks: Vec<StructureBreak>,
}

impl MarketStructure {
    pub fn with_length(swing_length: usize) -> Self {
        Self {
            swing_length: swing_length.max(1),
            swings: Vec::new(),
            breaks: Vec::new(),
        }
    }

    pub fn analyze(&mut self, candles: &CandleSeries) {
        self.swings.clear();
        self.breaks.clear();

        self.find_swings(candles);
        self.detect_breaks(candles);
    }

    /// A swing high at `i` is the highest high within `length` bars on both
    /// sides, so it is only confirmed at the close of bar `i + length`.
    fn find_swings(&mut self, candles: &CandleSeries) {
        let lb = self.swing_length;
        let len = candles.len();
        if len <= lb * 2 {
            return;
        }

        for i in lb..(len - lb) {
            let window = (i - lb)..=(i + lb);

            let current_high = candles[i].high;
            if window.clone().all(|j| candles[j].high <= current_high) {
                self.swings.push(SwingPoint {
                    id: self.swings.len(),
                    swing_type: SwingType::High,
                    price: current_high,
                    index: i,
                    confirmed_index: i + lb,
                    timestamp: candles[i].timestamp,
                });
            }

            let current_low = candles[i].low;
            if window.clone().all(|j| candles[j].low >= current_low) {
                self.swings.push(SwingPoint {
                    id: self.swings.len(),
                    swing_type: SwingType::Low,
                    price: current_low,
                    index: i,
                    confirmed_index: i + lb,
                    timestamp: candles[i].timestamp,
                });
            }
        }
    }

    /// Close beyond the latest confirmed swing on either side. A break in the
    /// direction of the running trend is a continuation (cBOS), anything else
    /// is a BOS and sets the trend.
    fn detect_breaks(&mut self, candles: &CandleSeries) {
        let mut next_swing = 0;
        let mut last_high: Option<&SwingPoint> = None;
        let mut last_low: Option<&SwingPoint> = None;
        let mut trend: Option<Direction> = None;

        for j in 0..candles.len() {
            // Only swings confirmed on an earlier bar may be broken at j.
            while next_swing < self.swings.len() && self.swings[next_swing].confirmed_index < j {
                let s = &self.swings[next_swing];
                match s.swing_type {
                    SwingType::High => last_high = Some(s),
                    SwingType::Low => last_low = Some(s),
                }
                next_swing += 1;
            }

            let close = candles[j].close;

            if let Some(sh) = last_high {
                if close > sh.price {
                    let kind = if trend == Some(Direction::Long) {
                        BreakKind::Cbos
                    } else {
                        BreakKind::Bos
                    };
                    self.breaks.push(StructureBreak {
                        id: self.breaks.len(),
                        kind,
                        direction: Direction::Long,
                        level: sh.price,
                        index: j,
                        swing_index: sh.index,
                        timestamp: candles[j].timestamp,
                    });
                    trend = Some(Direction::Long);
                    last_high = None;
                }
            }

            if let Some(sl) = last_low {
                if close < sl.price {
                    let kind = if trend == Some(Direction::Short) {
                        BreakKind::Cbos
                    } else {
                        BreakKind::Bos
                    };
                    self.breaks.push(StructureBreak {
                        id: self.breaks.len(),
                        kind,
                        direction: Direction::Short,
                        level: sl.price,
                        index: j,
                        swing_index: sl.index,
                        timestamp: candles[j].timestamp,
                    });
                    trend = Some(Direction::Short);
                    last_low = None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::make_candles;

    /// Rising waves: each leg makes a higher high, each pullback a higher low.
    fn staircase(waves: usize) -> CandleSeries {
        let mut data = Vec::new();
        for wave in 0..waves {
            let trough = 100.0 + wave as f64 * 40.0;
            for i in 0..6 {
                let v = trough + i as f64 * 5.0;
                data.push((v, v + 1.0, v - 1.0, v + 0.5));
            }
            let peak = trough + 30.0;
            for i in 0..6 {
                let v = peak - i as f64 * 3.0;
                data.push((v, v + 0.5, v - 1.0, v - 0.5));
            }
        }
        make_candles(&data)
    }

    #[test]
    fn swings_are_confirmed_after_their_window() {
        let candles = staircase(3);
        let mut ms = MarketStructure::with_length(3);
        ms.analyze(&candles);
        assert!(!ms.swings.is_empty());
        for s in &ms.swings {
            assert_eq!(s.confirmed_index, s.index + 3);
            assert!(s.confirmed_index < candles.len());
        }
        assert!(ms.swings.iter().any(|s| s.swing_type == SwingType::High));
    }

    #[test]
    fn rising_staircase_breaks_upward_with_continuations() {
        let candles = staircase(4);
        let mut ms = MarketStructure::with_length(3);
        ms.analyze(&candles);

        let ups: Vec<_> = ms
            .breaks
            .iter()
            .filter(|b| b.direction == Direction::Long)
            .collect();
        assert!(ups.len() >= 2, "expected repeated upside breaks, got {:?}", ms.breaks);
        assert_eq!(ups[0].kind, BreakKind::Bos);
        assert!(ups[1..].iter().any(|b| b.kind == BreakKind::Cbos));
    }

    #[test]
    fn breaks_never_use_unconfirmed_swings() {
        let candles = staircase(4);
        let mut ms = MarketStructure::with_length(3);
        ms.analyze(&candles);
        for b in &ms.breaks {
            let swing = ms
                .swings
                .iter()
                .find(|s| s.index == b.swing_index && (s.price - b.level).abs() < 1e-9)
                .expect("break references a detected swing");
            assert!(swing.confirmed_index < b.index);
        }
    }

    #[test]
    fn flat_market_has_no_breaks() {
        let data: Vec<(f64, f64, f64, f64)> = (0..30).map(|_| (100.0, 100.5, 99.5, 100.0)).collect();
        let mut ms = MarketStructure::with_length(3);
        ms.analyze(&make_candles(&data));
        assert!(ms.breaks.is_empty());
    }
}
