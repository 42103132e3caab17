use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::Timeframe;
use crate::strategies::zone::ZoneId;

/// Conditions that abort a run. Anything recoverable is reported through the
/// event log instead.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("{timeframe} bar {index} at {timestamp} does not follow the previous bar at {previous}")]
    NonMonotonicBar {
        timeframe: Timeframe,
        index: usize,
        timestamp: DateTime<Utc>,
        previous: DateTime<Utc>,
    },

    #[error("signal references unknown zone {0}")]
    UnknownZone(ZoneId),

    #[error("exit requested for zone {0} with no open position")]
    NoOpenPosition(ZoneId),

    #[error("trade #{0} is already closed")]
    TradeAlreadyClosed(u64),

    #[error("timeframe {0} is not loaded")]
    MissingTimeframe(Timeframe),

    #[error("no bars to simulate")]
    EmptyInput,

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("min_confirmations must be at least 1")]
    ZeroMinConfirmations,

    #[error("max_confirmations ({max}) is below min_confirmations ({min})")]
    ConfirmationRange { min: usize, max: usize },

    #[error("{name} must be in [0, 1), got {value}")]
    FractionOutOfRange { name: &'static str, value: f64 },

    #[error("{name} must be positive, got {value}")]
    NotPositive { name: &'static str, value: f64 },

    #[error("bias_threshold must be in [0.5, 1), got {0}")]
    BiasThreshold(f64),

    #[error("max_open_positions must be at least 1")]
    ZeroPositionCap,

    #[error("{role} timeframe {timeframe} is not in the loaded timeframes")]
    TimeframeNotLoaded { role: &'static str, timeframe: Timeframe },

    #[error("execution timeframe {execution} must be the shortest loaded timeframe")]
    ExecutionNotShortest { execution: Timeframe },
}
