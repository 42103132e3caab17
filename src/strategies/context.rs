use std::collections::BTreeMap;
use tracing::debug;

use crate::config::Config;
use crate::core::annotations::AnnotationView;
use crate::models::{Bias, BreakKind, Direction, SyncMode, Timeframe};

/// Bias from the last `lookback` structural breaks visible in `view`.
/// A BOS weighs twice a continuation break; one side needs more than
/// `threshold` of the total weight, otherwise the bias is undefined.
pub fn bias(view: AnnotationView<'_>, lookback: usize, threshold: f64) -> Bias {
    let (mut bullish, mut bearish) = (0.0, 0.0);
    for b in view.recent_breaks(lookback) {
        let weight = match b.kind {
            BreakKind::Bos => 2.0,
            BreakKind::Cbos => 1.0,
        };
        match b.direction {
            Direction::Long => bullish += weight,
            Direction::Short => bearish += weight,
        }
    }

    let total = bullish + bearish;
    if total == 0.0 {
        return Bias::Undefined;
    }
    if bullish / total > threshold {
        Bias::Bullish
    } else if bearish / total > threshold {
        Bias::Bearish
    } else {
        Bias::Undefined
    }
}

pub fn sync_mode(htf: Bias, ltf: Bias) -> SyncMode {
    if htf == ltf && htf != Bias::Undefined {
        SyncMode::Aligned
    } else {
        SyncMode::Conflicting
    }
}

/// What changed on a refresh, for the event log.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextChange {
    pub timeframe: Timeframe,
    pub bias: Option<Bias>,
    pub sync: Option<SyncMode>,
}

/// Per-timeframe bias and the HTF/LTF sync mode. Only refreshed when the
/// timeframe's bar closes, so it is stale between closes.
pub struct ContextEngine {
    htf: Timeframe,
    ltf: Timeframe,
    biases: BTreeMap<Timeframe, Bias>,
    sync: SyncMode,
}

impl ContextEngine {
    pub fn new(config: &Config) -> Self {
        Self {
            htf: config.htf_bias_tf,
            ltf: config.ltf_bias_tf,
            biases: BTreeMap::new(),
            sync: SyncMode::Conflicting,
        }
    }

    pub fn refresh(&mut self, view: AnnotationView<'_>, config: &Config) -> ContextChange {
        let tf = view.timeframe;
        let new_bias = bias(view, config.structure_lookback_for(tf), config.bias_threshold);
        let previous = self.biases.insert(tf, new_bias);
        let bias_changed = previous.unwrap_or(Bias::Undefined) != new_bias;

        let new_sync = sync_mode(self.bias_of(self.htf), self.bias_of(self.ltf));
        let sync_changed = new_sync != self.sync;
        self.sync = new_sync;

        if bias_changed || sync_changed {
            debug!(timeframe = %tf, bias = %new_bias, sync = %new_sync, "Context updated");
        }

        ContextChange {
            timeframe: tf,
            bias: bias_changed.then_some(new_bias),
            sync: sync_changed.then_some(new_sync),
        }
    }

    pub fn bias_of(&self, tf: Timeframe) -> Bias {
        self.biases.get(&tf).copied().unwrap_or(Bias::Undefined)
    }

    pub fn sync(&self) -> SyncMode {
        self.sync
    }

    pub fn size_factor(&self, config: &Config) -> f64 {
        match self.sync {
            SyncMode::Aligned => config.aligned_size_factor,
            SyncMode::Conflicting => config.conflicting_size_factor,
        }
    }

    /// Timeframe whose swings set structural targets: the HTF bias timeframe
    /// when aligned, the execution timeframe otherwise.
    pub fn target_timeframe(&self, config: &Config) -> Timeframe {
        match self.sync {
            SyncMode::Aligned => self.htf,
            SyncMode::Conflicting => config.execution_tf,
        }
    }
}
