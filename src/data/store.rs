use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::ops::Range;
use tracing::debug;

use crate::core::annotations::{AnnotationView, Annotations, Annotator};
use crate::error::SimError;
use crate::models::{Candle, CandleSeries, Timeframe};

struct Series {
    candles: CandleSeries,
    /// Close time of every bar, kept alongside for binary search.
    close_times: Vec<DateTime<Utc>>,
    annotations: Annotations,
}

/// Per-timeframe bars and annotations with time-gated access.
///
/// Every read is a pure function of `(timeframe, t)`: nothing advances
/// internally, so asking twice for the same `t` gives the same answer. A bar
/// is visible at `t` only once its close time (open + one bar) is `<= t`.
#[derive(Default)]
pub struct TimeframeStore {
    series: BTreeMap<Timeframe, Series>,
}

impl TimeframeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resample `base` into every timeframe and annotate each one in turn.
    pub fn build(
        base: &CandleSeries,
        timeframes: &[Timeframe],
        annotator: &dyn Annotator,
    ) -> Result<Self, SimError> {
        let base_tf = timeframes.iter().min().copied().ok_or(SimError::EmptyInput)?;
        let mut store = Self::new();
        for &tf in timeframes {
            let candles = if tf == base_tf {
                base.clone()
            } else {
                base.resample(tf)
            };
            let annotations = annotator.annotate(tf, &candles);
            store.insert(tf, candles, annotations)?;
        }
        Ok(store)
    }

    /// Bars must be strictly increasing in time; anything else is fatal.
    /// Annotation streams are sorted by the bar at which they became knowable.
    pub fn insert(
        &mut self,
        timeframe: Timeframe,
        candles: CandleSeries,
        mut annotations: Annotations,
    ) -> Result<(), SimError> {
        if let Some(index) = candles.first_non_monotonic() {
            return Err(SimError::NonMonotonicBar {
                timeframe,
                index,
                timestamp: candles[index].timestamp,
                previous: candles[index - 1].timestamp,
            });
        }

        annotations.sort_by_knowable_index();

        let close_times = candles
            .iter()
            .map(|c| timeframe.close_time(c.timestamp))
            .collect();
        debug!(
            timeframe = %timeframe,
            bars = candles.len(),
            "Loaded timeframe"
        );
        self.series.insert(
            timeframe,
            Series {
                candles,
                close_times,
                annotations,
            },
        );
        Ok(())
    }

    /// Loaded timeframes, shortest first.
    pub fn timeframes(&self) -> impl Iterator<Item = Timeframe> + '_ {
        self.series.keys().copied()
    }

    pub fn contains(&self, timeframe: Timeframe) -> bool {
        self.series.contains_key(&timeframe)
    }

    pub fn candles(&self, timeframe: Timeframe) -> Option<&CandleSeries> {
        self.series.get(&timeframe).map(|s| &s.candles)
    }

    pub fn close_time(&self, timeframe: Timeframe, index: usize) -> Option<DateTime<Utc>> {
        self.series
            .get(&timeframe)
            .and_then(|s| s.close_times.get(index).copied())
    }

    /// Index of the latest bar that has closed at or before `t`.
    pub fn closed_index_at(&self, timeframe: Timeframe, t: DateTime<Utc>) -> Option<usize> {
        let series = self.series.get(&timeframe)?;
        match series.close_times.partition_point(|&close| close <= t) {
            0 => None,
            n => Some(n - 1),
        }
    }

    pub fn closed_bar_at(&self, timeframe: Timeframe, t: DateTime<Utc>) -> Option<&Candle> {
        let index = self.closed_index_at(timeframe, t)?;
        self.series.get(&timeframe).map(|s| &s.candles[index])
    }

    /// Bars on `timeframe` that have closed by `t` and come after `after`,
    /// the last index already handled. Gaps in the driving series do not
    /// skip a boundary: every bar closed since `after` is returned.
    pub fn newly_closed(&self, timeframe: Timeframe, after: Option<usize>, t: DateTime<Utc>) -> Range<usize> {
        let start = after.map_or(0, |i| i + 1);
        let end = self.closed_index_at(timeframe, t).map_or(0, |i| i + 1);
        start..end.max(start)
    }

    /// Annotations produced by bars closed at or before `t`, or `None` if
    /// no bar has closed yet.
    pub fn annotations_at(&self, timeframe: Timeframe, t: DateTime<Utc>) -> Option<AnnotationView<'_>> {
        let index = self.closed_index_at(timeframe, t)?;
        self.view_at(timeframe, index)
    }

    /// View as of the close of bar `index`.
    pub fn view_at(&self, timeframe: Timeframe, index: usize) -> Option<AnnotationView<'_>> {
        let series = self.series.get(&timeframe)?;
        (index < series.candles.len())
            .then(|| AnnotationView::new(timeframe, index, &series.annotations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{base_time, gap, make_bullish_trend};
    use crate::models::Direction;
    use chrono::Duration;

    fn store_with_15m() -> TimeframeStore {
        let base = make_bullish_trend(60, 100.0);
        let mut store = TimeframeStore::new();
        store
            .insert(Timeframe::M1, base.clone(), Annotations::default())
            .unwrap();
        let annotations = Annotations {
            gaps: vec![gap(0, Direction::Long, 120.0, 110.0, 1)],
            ..Annotations::default()
        };
        store
            .insert(Timeframe::M15, base.resample(Timeframe::M15), annotations)
            .unwrap();
        store
    }

    #[test]
    fn no_bar_visible_before_its_close() {
        let store = store_with_15m();
        let t0 = base_time();
        assert!(store.closed_bar_at(Timeframe::M15, t0).is_none());
        assert!(store.closed_bar_at(Timeframe::M15, t0 + Duration::minutes(14)).is_none());

        let first = store.closed_bar_at(Timeframe::M15, t0 + Duration::minutes(15)).unwrap();
        assert_eq!(first.timestamp, t0);

        // Never returns a bar whose close lies after t.
        for m in 0..70 {
            let t = t0 + Duration::minutes(m);
            if let Some(i) = store.closed_index_at(Timeframe::M15, t) {
                assert!(store.close_time(Timeframe::M15, i).unwrap() <= t);
            }
        }
    }

    #[test]
    fn newly_closed_fires_once_per_boundary() {
        let store = store_with_15m();
        let t0 = base_time();
        let mut last = None;
        let mut fired = Vec::new();
        for m in 0..=60 {
            let fresh = store.newly_closed(Timeframe::M15, last, t0 + Duration::minutes(m));
            if let Some(i) = fresh.clone().last() {
                fired.push((m, fresh));
                last = Some(i);
            }
        }
        assert_eq!(
            fired,
            vec![(15, 0..1), (30, 1..2), (45, 2..3), (60, 3..4)]
        );
        // Idempotent for a repeated query.
        let t = t0 + Duration::minutes(30);
        assert_eq!(store.newly_closed(Timeframe::M15, Some(0), t), 1..2);
        assert_eq!(store.newly_closed(Timeframe::M15, Some(0), t), 1..2);
    }

    #[test]
    fn newly_closed_catches_up_after_skipped_instants() {
        let store = store_with_15m();
        let t0 = base_time();
        // Nothing queried between minute 14 and minute 47.
        assert_eq!(store.newly_closed(Timeframe::M15, None, t0 + Duration::minutes(14)), 0..0);
        assert_eq!(store.newly_closed(Timeframe::M15, None, t0 + Duration::minutes(47)), 0..3);
        assert_eq!(store.newly_closed(Timeframe::M15, Some(2), t0 + Duration::minutes(47)), 3..3);
    }

    #[test]
    fn annotations_gated_by_closed_index() {
        let store = store_with_15m();
        let t0 = base_time();
        let early = store
            .annotations_at(Timeframe::M15, t0 + Duration::minutes(20))
            .unwrap();
        assert_eq!(early.as_of, 0);
        assert_eq!(early.gaps().count(), 0);

        let later = store
            .annotations_at(Timeframe::M15, t0 + Duration::minutes(30))
            .unwrap();
        assert_eq!(later.as_of, 1);
        assert_eq!(later.gaps().count(), 1);
    }

    #[test]
    fn build_resamples_and_annotates_each_timeframe() {
        use crate::core::annotator::ReferenceAnnotator;
        use crate::test_helpers::default_test_config;

        let base = make_bullish_trend(60, 100.0);
        let annotator = ReferenceAnnotator::from_config(&default_test_config());
        let store =
            TimeframeStore::build(&base, &[Timeframe::M15, Timeframe::M1], &annotator).unwrap();
        assert_eq!(
            store.timeframes().collect::<Vec<_>>(),
            vec![Timeframe::M1, Timeframe::M15]
        );
        assert_eq!(store.candles(Timeframe::M1).unwrap().len(), 60);
        assert_eq!(store.candles(Timeframe::M15).unwrap().len(), 4);
        assert!(TimeframeStore::build(&base, &[], &annotator).is_err());
    }

    #[test]
    fn rejects_non_monotonic_bars() {
        let mut candles = make_bullish_trend(5, 100.0).as_slice().to_vec();
        candles.swap(2, 3);
        let err = TimeframeStore::new()
            .insert(Timeframe::M1, CandleSeries::new(candles), Annotations::default())
            .unwrap_err();
        assert!(matches!(err, SimError::NonMonotonicBar { index: 3, .. }));
    }
}
