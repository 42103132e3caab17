use crate::core::annotations::{LiquidityLevel, SwingPoint};
use crate::models::{CandleSeries, LiquiditySide, SwingType};

struct Cluster {
    side: LiquiditySide,
    prices: Vec<f64>,
    touches: Vec<usize>,
    first_index: usize,
    level: Option<(f64, usize)>,
    swept_index: Option<usize>,
}

impl Cluster {
    fn average(&self) -> f64 {
        self.prices.iter().sum::<f64>() / self.prices.len() as f64
    }
}

/// Groups equal highs / equal lows into resting-liquidity levels.
pub struct LiquidityDetector {
    /// Relative distance under which two swings count as "equal".
    pub tolerance: f64,
    pub min_touches: usize,
}

impl LiquidityDetector {
    pub fn new(tolerance: f64, min_touches: usize) -> Self {
        Self {
            tolerance,
            min_touches: min_touches.max(1),
        }
    }

    /// `swings` must come from the same series; they are consumed in
    /// confirmation order so each level only knows touches confirmed so far.
    pub fn detect(&self, candles: &CandleSeries, swings: &[SwingPoint]) -> Vec<LiquidityLevel> {
        let mut ordered: Vec<&SwingPoint> = swings.iter().collect();
        ordered.sort_by_key(|s| (s.confirmed_index, s.index));

        let mut clusters: Vec<Cluster> = Vec::new();

        for swing in ordered {
            let side = match swing.swing_type {
                SwingType::High => LiquiditySide::BuySide,
                SwingType::Low => LiquiditySide::SellSide,
            };

            // A level that was already taken before this swing printed is spent.
            let existing = clusters.iter().position(|c| {
                c.side == side
                    && c.swept_index.map_or(true, |sw| swing.index < sw)
                    && (swing.price - c.average()).abs() / c.average() < self.tolerance
            });

            let idx = match existing {
                Some(i) => {
                    let c = &mut clusters[i];
                    if c.level.is_none() {
                        c.prices.push(swing.price);
                    }
                    c.touches.push(swing.confirmed_index);
                    i
                }
                None => {
                    clusters.push(Cluster {
                        side,
                        prices: vec![swing.price],
                        touches: vec![swing.confirmed_index],
                        first_index: swing.index,
                        level: None,
                        swept_index: None,
                    });
                    clusters.len() - 1
                }
            };
            let cluster = &mut clusters[idx];

            if cluster.level.is_none() && cluster.touches.len() >= self.min_touches {
                let level = cluster.average();
                let formed = swing.confirmed_index;
                cluster.level = Some((level, formed));
                cluster.swept_index = Self::find_sweep(candles, side, level, formed);
            }
        }

        let mut levels: Vec<LiquidityLevel> = clusters
            .into_iter()
            .filter_map(|c| {
                let (level, formed_index) = c.level?;
                Some(LiquidityLevel {
                    id: 0,
                    side: c.side,
                    level,
                    touches: c.touches,
                    formed_index,
                    swept_index: c.swept_index,
                    timestamp: candles[c.first_index].timestamp,
                })
            })
            .collect();

        levels.sort_by(|a, b| {
            a.formed_index
                .cmp(&b.formed_index)
                .then(a.level.total_cmp(&b.level))
        });
        for (id, level) in levels.iter_mut().enumerate() {
            level.id = id;
        }
        levels
    }

    fn find_sweep(
        candles: &CandleSeries,
        side: LiquiditySide,
        level: f64,
        formed: usize,
    ) -> Option<usize> {
        ((formed + 1)..candles.len()).find(|&k| match side {
            LiquiditySide::BuySide => candles[k].high > level,
            LiquiditySide::SellSide => candles[k].low < level,
        })
    }
}
