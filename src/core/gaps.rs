use serde::{Deserialize, Serialize};

use crate::core::annotations::GapZone;
use crate::models::{Candle, CandleSeries, Direction};

/// How later price action consumes a gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MitigationMode {
    /// Wick depth decides tested / partially filled / fully filled.
    Wick,
    /// Closes decide: past the midpoint fills partially, past the far edge inverts.
    Close,
    /// Touching the midpoint (consequent encroachment) mitigates.
    Midpoint,
    /// Wick through the far edge fills, a close through it inverts.
    Full,
}

/// Detects three-bar fair value gaps and replays their lifecycle.
pub struct GapDetector {
    pub min_gap_percent: f64,
    pub mode: MitigationMode,
}

impl GapDetector {
    pub fn new(min_gap_percent: f64, mode: MitigationMode) -> Self {
        Self {
            min_gap_percent,
            mode,
        }
    }

    pub fn detect(&self, candles: &CandleSeries) -> Vec<GapZone> {
        let mut gaps = Vec::new();

        for i in 2..candles.len() {
            let c1 = &candles[i - 2];
            let c3 = &candles[i];

            // Bullish: third bar's low above first bar's high
            let gap_up = c3.low - c1.high;
            if gap_up > 0.0 && gap_up / c1.high >= self.min_gap_percent {
                gaps.push(self.new_gap(gaps.len(), Direction::Long, c3.low, c1.high, i, c3));
            }

            // Bearish: third bar's high below first bar's low
            let gap_down = c1.low - c3.high;
            if gap_down > 0.0 && gap_down / c1.low >= self.min_gap_percent {
                gaps.push(self.new_gap(gaps.len(), Direction::Short, c1.low, c3.high, i, c3));
            }
        }

        for gap in &mut gaps {
            self.track_lifecycle(gap, candles);
        }
        gaps
    }

    fn new_gap(
        &self,
        id: usize,
        direction: Direction,
        top: f64,
        bottom: f64,
        index: usize,
        candle: &Candle,
    ) -> GapZone {
        GapZone {
            id,
            direction,
            top,
            bottom,
            created_index: index,
            timestamp: candle.timestamp,
            tested_index: None,
            partially_filled_index: None,
            fully_filled_index: None,
            mitigated_index: None,
            inverted_index: None,
        }
    }

    /// Records the first bar at which each lifecycle stage was reached.
    /// Scanning stops once the gap is mitigated or inverted.
    fn track_lifecycle(&self, gap: &mut GapZone, candles: &CandleSeries) {
        let mid = gap.midpoint();
        let set = |slot: &mut Option<usize>, k: usize| {
            if slot.is_none() {
                *slot = Some(k);
            }
        };

        for k in (gap.created_index + 1)..candles.len() {
            let c = &candles[k];
            // Depth into the gap measured from its near edge.
            let (touched, wick_past_mid, wick_through, close_past_mid, close_through) =
                match gap.direction {
                    Direction::Long => (
                        c.low <= gap.top,
                        c.low <= mid,
                        c.low <= gap.bottom,
                        c.close <= mid,
                        c.close < gap.bottom,
                    ),
                    Direction::Short => (
                        c.high >= gap.bottom,
                        c.high >= mid,
                        c.high >= gap.top,
                        c.close >= mid,
                        c.close > gap.top,
                    ),
                };
            if !touched {
                continue;
            }
            set(&mut gap.tested_index, k);

            match self.mode {
                MitigationMode::Wick => {
                    if wick_through {
                        set(&mut gap.fully_filled_index, k);
                    } else if wick_past_mid {
                        set(&mut gap.partially_filled_index, k);
                    }
                }
                MitigationMode::Close => {
                    if close_through {
                        gap.inverted_index = Some(k);
                        return;
                    } else if close_past_mid {
                        set(&mut gap.partially_filled_index, k);
                    }
                }
                MitigationMode::Midpoint => {
                    if wick_past_mid {
                        gap.mitigated_index = Some(k);
                        return;
                    }
                }
                MitigationMode::Full => {
                    if close_through {
                        gap.inverted_index = Some(k);
                        return;
                    } else if wick_through {
                        set(&mut gap.fully_filled_index, k);
                    }
                }
            }
        }
    }
}
