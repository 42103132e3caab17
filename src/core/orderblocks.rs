use crate::core::annotations::{OrderBlock, StructureBreak};
use crate::models::{CandleSeries, Direction};

/// How far back from a broken swing to look for the opposing candle.
pub const DEFAULT_BLOCK_SEARCH: usize = 50;

/// Finds the last opposing candle before each structure break and replays
/// its life as a block and, once closed through, as a breaker.
pub struct OrderBlockDetector {
    pub search: usize,
}

impl OrderBlockDetector {
    pub fn new(search: usize) -> Self {
        Self { search }
    }

    pub fn detect(&self, candles: &CandleSeries, breaks: &[StructureBreak]) -> Vec<OrderBlock> {
        let mut blocks: Vec<OrderBlock> = Vec::new();

        for b in breaks {
            let Some(candle_index) = self.opposing_candle(candles, b) else {
                continue;
            };
            // Several breaks can lead back to the same candle; the first one wins.
            if blocks
                .iter()
                .any(|ob| ob.candle_index == candle_index && ob.direction == b.direction)
            {
                continue;
            }
            let c = &candles[candle_index];
            blocks.push(OrderBlock {
                id: blocks.len(),
                direction: b.direction,
                top: c.high,
                bottom: c.low,
                candle_index,
                trigger_index: b.index,
                timestamp: b.timestamp,
                tested_index: None,
                broken_index: None,
                breaker_tested_index: None,
                breaker_mitigated_index: None,
            });
        }

        for block in &mut blocks {
            track_lifecycle(block, candles);
        }
        blocks
    }

    fn opposing_candle(&self, candles: &CandleSeries, b: &StructureBreak) -> Option<usize> {
        if b.swing_index >= candles.len() {
            return None;
        }
        let floor = b.swing_index.saturating_sub(self.search);
        (floor..=b.swing_index).rev().find(|&j| match b.direction {
            Direction::Long => candles[j].is_bearish(),
            Direction::Short => candles[j].is_bullish(),
        })
    }
}

/// Closes decide: a close through the far edge breaks the block and the same
/// range then acts for the other side until a close through its far edge.
fn track_lifecycle(block: &mut OrderBlock, candles: &CandleSeries) {
    for k in (block.trigger_index + 1)..candles.len() {
        let c = &candles[k];
        match block.broken_index {
            None => {
                let (through, touched) = match block.direction {
                    Direction::Long => (c.close < block.bottom, c.low <= block.top),
                    Direction::Short => (c.close > block.top, c.high >= block.bottom),
                };
                if through {
                    block.broken_index = Some(k);
                } else if touched && block.tested_index.is_none() {
                    block.tested_index = Some(k);
                }
            }
            Some(_) => {
                let (through, touched) = match block.direction.opposite() {
                    Direction::Long => (c.close < block.bottom, c.low <= block.top),
                    Direction::Short => (c.close > block.top, c.high >= block.bottom),
                };
                if through {
                    block.breaker_mitigated_index = Some(k);
                    return;
                }
                if touched && block.breaker_tested_index.is_none() {
                    block.breaker_tested_index = Some(k);
                }
            }
        }
    }
}
