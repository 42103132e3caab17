use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }

    /// +1.0 for longs, -1.0 for shorts. Multiplies price deltas into P&L.
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    pub fn opposite(self) -> Direction {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }

    /// True when `a` is strictly beyond `b` in this direction's favour.
    pub fn beyond(&self, a: f64, b: f64) -> bool {
        match self {
            Direction::Long => a > b,
            Direction::Short => a < b,
        }
    }
}

/// Directional bias derived from recent structural breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bias {
    Bullish,
    Bearish,
    Undefined,
}

impl fmt::Display for Bias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bias::Bullish => write!(f, "bullish"),
            Bias::Bearish => write!(f, "bearish"),
            Bias::Undefined => write!(f, "undefined"),
        }
    }
}

impl Bias {
    pub fn to_direction(self) -> Option<Direction> {
        match self {
            Bias::Bullish => Some(Direction::Long),
            Bias::Bearish => Some(Direction::Short),
            Bias::Undefined => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Aligned,
    Conflicting,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Aligned => write!(f, "aligned"),
            SyncMode::Conflicting => write!(f, "conflicting"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwingType {
    High,
    Low,
}

impl fmt::Display for SwingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwingType::High => write!(f, "high"),
            SwingType::Low => write!(f, "low"),
        }
    }
}

/// Break of structure against the running trend vs. continuation of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakKind {
    Bos,
    Cbos,
}

impl fmt::Display for BreakKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakKind::Bos => write!(f, "BOS"),
            BreakKind::Cbos => write!(f, "cBOS"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapStatus {
    Fresh,
    Tested,
    PartiallyFilled,
    FullyFilled,
    Mitigated,
    Inverted,
}

impl GapStatus {
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            GapStatus::Fresh | GapStatus::Tested | GapStatus::PartiallyFilled
        )
    }
}

impl fmt::Display for GapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GapStatus::Fresh => write!(f, "fresh"),
            GapStatus::Tested => write!(f, "tested"),
            GapStatus::PartiallyFilled => write!(f, "partially_filled"),
            GapStatus::FullyFilled => write!(f, "fully_filled"),
            GapStatus::Mitigated => write!(f, "mitigated"),
            GapStatus::Inverted => write!(f, "inverted"),
        }
    }
}

/// Which side of price resting orders sit on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LiquiditySide {
    /// Buy-side liquidity: stops above equal highs.
    #[serde(rename = "BSL")]
    BuySide,
    /// Sell-side liquidity: stops below equal lows.
    #[serde(rename = "SSL")]
    SellSide,
}

impl fmt::Display for LiquiditySide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiquiditySide::BuySide => write!(f, "BSL"),
            LiquiditySide::SellSide => write!(f, "SSL"),
        }
    }
}

impl LiquiditySide {
    /// Zones that a sweep of this side confirms: a sell-side sweep supports longs.
    pub fn supports(&self) -> Direction {
        match self {
            LiquiditySide::SellSide => Direction::Long,
            LiquiditySide::BuySide => Direction::Short,
        }
    }
}
