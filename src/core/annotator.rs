use tracing::debug;

use crate::config::Config;
use crate::core::annotations::{Annotations, Annotator};
use crate::core::gaps::{GapDetector, MitigationMode};
use crate::core::liquidity::LiquidityDetector;
use crate::core::orderblocks::{OrderBlockDetector, DEFAULT_BLOCK_SEARCH};
use crate::core::structure::MarketStructure;
use crate::models::{CandleSeries, Timeframe};

/// Built-in annotator: fractal swings, BOS/cBOS, three-bar gaps,
/// equal-high/low liquidity and order blocks, all computed from the bars alone.
#[derive(Debug, Clone)]
pub struct ReferenceAnnotator {
    swing_lengths: Vec<(Timeframe, usize)>,
    fvg_min_gap_percent: f64,
    gap_mitigation: MitigationMode,
    liquidity_tolerance: f64,
    liquidity_min_touches: usize,
}

impl ReferenceAnnotator {
    pub fn from_config(config: &Config) -> Self {
        Self {
            swing_lengths: Timeframe::ALL
                .iter()
                .map(|&tf| (tf, config.swing_length_for(tf)))
                .collect(),
            fvg_min_gap_percent: config.fvg_min_gap_percent,
            gap_mitigation: config.gap_mitigation,
            liquidity_tolerance: config.liquidity_tolerance,
            liquidity_min_touches: config.liquidity_min_touches,
        }
    }

    fn swing_length(&self, timeframe: Timeframe) -> usize {
        self.swing_lengths
            .iter()
            .find(|(tf, _)| *tf == timeframe)
            .map_or(5, |(_, len)| *len)
    }
}

impl Annotator for ReferenceAnnotator {
    fn annotate(&self, timeframe: Timeframe, candles: &CandleSeries) -> Annotations {
        let mut structure = MarketStructure::with_length(self.swing_length(timeframe));
        structure.analyze(candles);

        let gaps = GapDetector::new(self.fvg_min_gap_percent, self.gap_mitigation).detect(candles);
        let liquidity = LiquidityDetector::new(self.liquidity_tolerance, self.liquidity_min_touches)
            .detect(candles, &structure.swings);
        let order_blocks = OrderBlockDetector::new(DEFAULT_BLOCK_SEARCH).detect(candles, &structure.breaks);

        debug!(
            timeframe = %timeframe,
            bars = candles.len(),
            swings = structure.swings.len(),
            breaks = structure.breaks.len(),
            gaps = gaps.len(),
            liquidity = liquidity.len(),
            order_blocks = order_blocks.len(),
            "Annotated timeframe"
        );

        Annotations {
            swings: structure.swings,
            breaks: structure.breaks,
            gaps,
            liquidity,
            order_blocks,
        }
    }
}
