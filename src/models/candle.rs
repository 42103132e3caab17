use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Timeframe;

/// One OHLCV bar. `timestamp` is the bar's open time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

impl Candle {
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn total_range(&self) -> f64 {
        self.high - self.low
    }

    pub fn upper_wick(&self) -> f64 {
        self.high - self.close.max(self.open)
    }

    pub fn lower_wick(&self) -> f64 {
        self.close.min(self.open) - self.low
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    /// Whether the bar's high-low range touches `[bottom, top]`.
    pub fn overlaps(&self, bottom: f64, top: f64) -> bool {
        self.low <= top && self.high >= bottom
    }

    pub fn contains(&self, price: f64) -> bool {
        self.low <= price && price <= self.high
    }
}

/// Ordered bar series for a single timeframe.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CandleSeries {
    candles: Vec<Candle>,
}

impl CandleSeries {
    pub fn new(candles: Vec<Candle>) -> Self {
        Self { candles }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Candle> {
        self.candles.get(index)
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn first(&self) -> Option<&Candle> {
        self.candles.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Candle> {
        self.candles.iter()
    }

    pub fn as_slice(&self) -> &[Candle] {
        &self.candles
    }

    pub fn push(&mut self, candle: Candle) {
        self.candles.push(candle);
    }

    /// Index of the first bar whose timestamp does not strictly follow its
    /// predecessor, if any.
    pub fn first_non_monotonic(&self) -> Option<usize> {
        self.candles
            .windows(2)
            .position(|w| w[1].timestamp <= w[0].timestamp)
            .map(|i| i + 1)
    }

    /// Aggregate into `tf` buckets aligned to the Unix epoch.
    pub fn resample(&self, tf: Timeframe) -> CandleSeries {
        if self.candles.is_empty() {
            return CandleSeries::default();
        }
        let bucket_secs = tf.as_seconds() as i64;
        let mut result: Vec<Candle> = Vec::new();

        for candle in &self.candles {
            let ts = candle.timestamp.timestamp();
            let bucket_start = ts - ts.rem_euclid(bucket_secs);
            let bucket_ts =
                DateTime::from_timestamp(bucket_start, 0).unwrap_or(candle.timestamp);

            if let Some(last) = result.last_mut() {
                if last.timestamp == bucket_ts {
                    last.high = last.high.max(candle.high);
                    last.low = last.low.min(candle.low);
                    last.close = candle.close;
                    last.volume += candle.volume;
                    continue;
                }
            }

            result.push(Candle {
                timestamp: bucket_ts,
                ..candle.clone()
            });
        }

        CandleSeries::new(result)
    }
}

impl std::ops::Index<usize> for CandleSeries {
    type Output = Candle;
    fn index(&self, index: usize) -> &Self::Output {
        &self.candles[index]
    }
}

impl From<Vec<Candle>> for CandleSeries {
    fn from(candles: Vec<Candle>) -> Self {
        Self::new(candles)
    }
}

impl IntoIterator for CandleSeries {
    type Item = Candle;
    type IntoIter = std::vec::IntoIter<Candle>;
    fn into_iter(self) -> Self::IntoIter {
        self.candles.into_iter()
    }
}

impl<'a> IntoIterator for &'a CandleSeries {
    type Item = &'a Candle;
    type IntoIter = std::slice::Iter<'a, Candle>;
    fn into_iter(self) -> Self::IntoIter {
        self.candles.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::make_candles;

    fn bullish_candle() -> Candle {
        Candle {
            timestamp: DateTime::from_timestamp(1_705_320_000, 0).unwrap(),
            open: 100.0,
            high: 115.0,
            low: 95.0,
            close: 110.0,
            volume: 50.0,
        }
    }

    #[test]
    fn candle_body_and_wicks() {
        let c = bullish_candle(); // O=100, H=115, L=95, C=110
        assert!((c.body() - 10.0).abs() < 1e-9);
        assert!((c.total_range() - 20.0).abs() < 1e-9);
        assert!((c.upper_wick() - 5.0).abs() < 1e-9);
        assert!((c.lower_wick() - 5.0).abs() < 1e-9);
        assert!(c.is_bullish());
        assert!(!c.is_bearish());
    }

    #[test]
    fn candle_overlap_checks() {
        let c = bullish_candle();
        assert!(c.overlaps(90.0, 96.0));
        assert!(c.overlaps(114.0, 130.0));
        assert!(!c.overlaps(116.0, 130.0));
        assert!(c.contains(95.0));
        assert!(!c.contains(94.99));
    }

    #[test]
    fn series_resample_1m_to_5m() {
        let data: Vec<(f64, f64, f64, f64)> = (0..10)
            .map(|i| {
                let v = 100.0 + i as f64;
                (v, v + 2.0, v - 1.0, v + 1.0)
            })
            .collect();
        let s = make_candles(&data);
        let resampled = s.resample(Timeframe::M5);
        // 12:00..12:09 falls into two 5m buckets
        assert_eq!(resampled.len(), 2);
        assert!((resampled[0].open - 100.0).abs() < 1e-9);
        assert!((resampled[0].close - 105.0).abs() < 1e-9);
        assert!((resampled[0].high - 106.0).abs() < 1e-9);
        assert!((resampled[1].low - 104.0).abs() < 1e-9);
        assert!((resampled[0].volume - 500.0).abs() < 1e-9);
    }

    #[test]
    fn detects_non_monotonic_timestamps() {
        let mut s = make_candles(&[(1.0, 2.0, 0.5, 1.5), (1.5, 2.5, 1.0, 2.0)]);
        assert_eq!(s.first_non_monotonic(), None);
        let dup = s[1].clone();
        s.push(dup);
        assert_eq!(s.first_non_monotonic(), Some(2));
    }
}
