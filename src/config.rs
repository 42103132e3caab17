use crate::core::gaps::MitigationMode;
use crate::error::ConfigError;
use crate::models::Timeframe;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

const DEFAULT_STRUCTURE_LOOKBACK: usize = 10;
const DEFAULT_SWING_LENGTH: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryMode {
    /// Wait for a close beyond the zone in the trade direction.
    Conservative,
    /// Enter on the first bar after the zone is ready.
    Aggressive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopMode {
    BehindZone,
    BehindGap,
    BehindGapMidpoint,
    BehindLiquidity,
}

impl fmt::Display for StopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopMode::BehindZone => write!(f, "behind_zone"),
            StopMode::BehindGap => write!(f, "behind_gap"),
            StopMode::BehindGapMidpoint => write!(f, "behind_gap_midpoint"),
            StopMode::BehindLiquidity => write!(f, "behind_liquidity"),
        }
    }
}

impl StopMode {
    pub fn from_str_loose(s: &str) -> Option<StopMode> {
        match s.trim().to_lowercase().as_str() {
            "behind_zone" | "behind_poi" => Some(StopMode::BehindZone),
            "behind_gap" | "behind_fvg" => Some(StopMode::BehindGap),
            "behind_gap_midpoint" | "behind_cvb" => Some(StopMode::BehindGapMidpoint),
            "behind_liquidity" => Some(StopMode::BehindLiquidity),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetMode {
    /// Nearest swing beyond price, then nearest opposing zone, then a fixed percentage.
    Structural,
    /// Fixed multiple of the initial risk.
    RiskMultiple(f64),
}

impl TargetMode {
    /// Accepts `structural` or `rr:<multiple>`.
    pub fn from_str_loose(s: &str) -> Option<TargetMode> {
        let s = s.trim().to_lowercase();
        if s == "structural" {
            return Some(TargetMode::Structural);
        }
        s.strip_prefix("rr:")
            .and_then(|r| r.parse::<f64>().ok())
            .filter(|r| *r > 0.0)
            .map(TargetMode::RiskMultiple)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Data
    pub symbol: String,
    pub timeframes: Vec<Timeframe>,
    pub execution_tf: Timeframe,
    pub htf_bias_tf: Timeframe,
    pub ltf_bias_tf: Timeframe,
    pub zone_timeframes: Vec<Timeframe>,

    // Annotation
    pub swing_length: BTreeMap<Timeframe, usize>,
    pub fvg_min_gap_percent: f64,
    pub gap_mitigation: MitigationMode,
    pub liquidity_tolerance: f64,
    pub liquidity_min_touches: usize,

    // Context
    pub structure_lookback: BTreeMap<Timeframe, usize>,
    /// Weighted share of breaks one side needs to set a bias.
    pub bias_threshold: f64,

    // Zones
    pub fingerprint_decimals: u32,
    pub zone_merge_tolerance: f64,
    pub liquidity_zone_min_touches: usize,

    // Confirmations
    pub min_confirmations: usize,
    pub max_confirmations: usize,
    pub midpoint_tolerance: f64,
    /// How far (fraction of the zone midpoint) annotations may sit from a zone and still count.
    pub confirmation_proximity: f64,

    // Entry
    pub entry_mode: EntryMode,
    pub trap_guard: bool,
    pub trap_guard_expiry_bars: Option<usize>,
    pub stop_mode: StopMode,
    pub target_mode: TargetMode,
    pub stop_buffer_pct: f64,
    pub min_reward_risk: f64,
    pub fallback_target_pct: f64,
    pub trouble_close_threshold: f64,
    pub flip_enabled: bool,

    // Management
    pub structural_breakeven: bool,
    pub trouble_breakeven: bool,
    pub max_addons: usize,
    pub addon_size_factor: f64,
    pub addon_structure_window: usize,
    pub max_position_bars: Option<usize>,

    // Risk & execution
    pub initial_balance: f64,
    pub risk_per_trade: f64,
    pub aligned_size_factor: f64,
    pub conflicting_size_factor: f64,
    pub max_open_positions: usize,
    // Fees & Slippage (as fraction, e.g., 0.0006 = 0.06%)
    pub fee_rate: f64,
    pub slippage_rate: f64,

    // Logging
    pub log_dir: String,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        let swing_length = BTreeMap::from([
            (Timeframe::M1, 3),
            (Timeframe::M5, 5),
            (Timeframe::M15, 5),
            (Timeframe::M30, 5),
            (Timeframe::H1, 7),
            (Timeframe::H4, 10),
            (Timeframe::D1, 10),
        ]);
        let structure_lookback = Timeframe::ALL
            .iter()
            .map(|&tf| (tf, DEFAULT_STRUCTURE_LOOKBACK))
            .collect();

        Config {
            symbol: "BTC-USD".to_string(),
            timeframes: vec![
                Timeframe::M1,
                Timeframe::M5,
                Timeframe::M15,
                Timeframe::H1,
                Timeframe::H4,
            ],
            execution_tf: Timeframe::M1,
            htf_bias_tf: Timeframe::H4,
            ltf_bias_tf: Timeframe::M15,
            zone_timeframes: vec![Timeframe::M15, Timeframe::H1, Timeframe::H4],
            swing_length,
            fvg_min_gap_percent: 0.0005,
            gap_mitigation: MitigationMode::Close,
            liquidity_tolerance: 0.001,
            liquidity_min_touches: 2,
            structure_lookback,
            bias_threshold: 0.6,
            fingerprint_decimals: 6,
            zone_merge_tolerance: 0.001,
            liquidity_zone_min_touches: 3,
            min_confirmations: 5,
            max_confirmations: 8,
            midpoint_tolerance: 0.001,
            confirmation_proximity: 0.01,
            entry_mode: EntryMode::Conservative,
            trap_guard: true,
            trap_guard_expiry_bars: Some(120),
            stop_mode: StopMode::BehindLiquidity,
            target_mode: TargetMode::Structural,
            stop_buffer_pct: 0.0005,
            min_reward_risk: 1.0,
            fallback_target_pct: 0.03,
            trouble_close_threshold: 0.3,
            flip_enabled: true,
            structural_breakeven: true,
            trouble_breakeven: true,
            max_addons: 2,
            addon_size_factor: 0.5,
            addon_structure_window: 10,
            max_position_bars: None,
            initial_balance: 10_000.0,
            risk_per_trade: 0.02,
            aligned_size_factor: 1.0,
            conflicting_size_factor: 0.5,
            max_open_positions: 3,
            fee_rate: 0.0006,
            slippage_rate: 0.0002,
            log_dir: "logs".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Defaults overridden by `.env` / process environment.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let env = |key: &str, default: &str| -> String {
            std::env::var(key).unwrap_or_else(|_| default.to_string())
        };
        let tf_list = |key: &str, default: &[Timeframe]| -> Vec<Timeframe> {
            std::env::var(key)
                .ok()
                .map(|v| v.split(',').filter_map(Timeframe::from_str_loose).collect::<Vec<_>>())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_vec())
        };
        let optional_bars = |key: &str, default: Option<usize>| -> Option<usize> {
            match std::env::var(key) {
                Ok(v) if v.trim().eq_ignore_ascii_case("none") => None,
                Ok(v) => v.trim().parse().ok().or(default),
                Err(_) => default,
            }
        };

        let d = Config::default();
        let tf = |key: &str, default: Timeframe| -> Timeframe {
            std::env::var(key)
                .ok()
                .and_then(|v| Timeframe::from_str_loose(&v))
                .unwrap_or(default)
        };

        Config {
            symbol: env("SYMBOL", &d.symbol),
            timeframes: tf_list("TIMEFRAMES", &d.timeframes),
            execution_tf: tf("EXECUTION_TF", d.execution_tf),
            htf_bias_tf: tf("HTF_BIAS_TF", d.htf_bias_tf),
            ltf_bias_tf: tf("LTF_BIAS_TF", d.ltf_bias_tf),
            zone_timeframes: tf_list("ZONE_TIMEFRAMES", &d.zone_timeframes),
            fvg_min_gap_percent: env("FVG_MIN_GAP", "0.0005").parse().unwrap_or(d.fvg_min_gap_percent),
            gap_mitigation: match env("GAP_MITIGATION", "close").to_lowercase().as_str() {
                "wick" => MitigationMode::Wick,
                "midpoint" => MitigationMode::Midpoint,
                "full" => MitigationMode::Full,
                _ => MitigationMode::Close,
            },
            liquidity_tolerance: env("LIQUIDITY_TOLERANCE", "0.001").parse().unwrap_or(d.liquidity_tolerance),
            min_confirmations: env("MIN_CONFIRMATIONS", "5").parse().unwrap_or(d.min_confirmations),
            max_confirmations: env("MAX_CONFIRMATIONS", "8").parse().unwrap_or(d.max_confirmations),
            entry_mode: match env("ENTRY_MODE", "conservative").to_lowercase().as_str() {
                "aggressive" => EntryMode::Aggressive,
                _ => EntryMode::Conservative,
            },
            trap_guard: env("TRAP_GUARD", "true").to_lowercase() == "true",
            trap_guard_expiry_bars: optional_bars("TRAP_GUARD_EXPIRY_BARS", d.trap_guard_expiry_bars),
            stop_mode: StopMode::from_str_loose(&env("STOP_MODE", "behind_liquidity")).unwrap_or(d.stop_mode),
            target_mode: TargetMode::from_str_loose(&env("TARGET_MODE", "structural")).unwrap_or(d.target_mode),
            min_reward_risk: env("MIN_REWARD_RISK", "1.0").parse().unwrap_or(d.min_reward_risk),
            trouble_close_threshold: env("FTA_CLOSE_THRESHOLD", "0.3").parse().unwrap_or(d.trouble_close_threshold),
            flip_enabled: env("FLIP_ENABLED", "true").to_lowercase() == "true",
            max_addons: env("MAX_ADDONS", "2").parse().unwrap_or(d.max_addons),
            max_position_bars: optional_bars("MAX_POSITION_BARS", d.max_position_bars),
            initial_balance: env("INITIAL_BALANCE", "10000").parse().unwrap_or(d.initial_balance),
            risk_per_trade: env("RISK_PER_TRADE", "0.02").parse().unwrap_or(d.risk_per_trade),
            conflicting_size_factor: env("CONFLICTING_SIZE_FACTOR", "0.5").parse().unwrap_or(d.conflicting_size_factor),
            max_open_positions: env("MAX_OPEN_POSITIONS", "3").parse().unwrap_or(d.max_open_positions),
            fee_rate: env("FEE_RATE", "0.0006").parse().unwrap_or(d.fee_rate),         // 0.06% per side
            slippage_rate: env("SLIPPAGE_RATE", "0.0002").parse().unwrap_or(d.slippage_rate), // 0.02% per fill
            log_dir: env("LOG_DIR", &d.log_dir),
            log_level: env("LOG_LEVEL", &d.log_level),
            ..d
        }
    }

    pub fn swing_length_for(&self, tf: Timeframe) -> usize {
        self.swing_length.get(&tf).copied().unwrap_or(DEFAULT_SWING_LENGTH)
    }

    pub fn structure_lookback_for(&self, tf: Timeframe) -> usize {
        self.structure_lookback
            .get(&tf)
            .copied()
            .unwrap_or(DEFAULT_STRUCTURE_LOOKBACK)
    }

    /// Checked once by the driver before any bar is processed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_confirmations == 0 {
            return Err(ConfigError::ZeroMinConfirmations);
        }
        if self.max_confirmations < self.min_confirmations {
            return Err(ConfigError::ConfirmationRange {
                min: self.min_confirmations,
                max: self.max_confirmations,
            });
        }
        if self.max_open_positions == 0 {
            return Err(ConfigError::ZeroPositionCap);
        }

        for (name, value) in [
            ("fee_rate", self.fee_rate),
            ("slippage_rate", self.slippage_rate),
            ("risk_per_trade", self.risk_per_trade),
            ("stop_buffer_pct", self.stop_buffer_pct),
            ("fallback_target_pct", self.fallback_target_pct),
            ("midpoint_tolerance", self.midpoint_tolerance),
            ("confirmation_proximity", self.confirmation_proximity),
            ("zone_merge_tolerance", self.zone_merge_tolerance),
            ("trouble_close_threshold", self.trouble_close_threshold),
        ] {
            if !(0.0..1.0).contains(&value) {
                return Err(ConfigError::FractionOutOfRange { name, value });
            }
        }

        for (name, value) in [
            ("initial_balance", self.initial_balance),
            ("risk_per_trade", self.risk_per_trade),
            ("aligned_size_factor", self.aligned_size_factor),
            ("conflicting_size_factor", self.conflicting_size_factor),
            ("addon_size_factor", self.addon_size_factor),
        ] {
            if !(value > 0.0) {
                return Err(ConfigError::NotPositive { name, value });
            }
        }
        // A tie in break weight must never read as a bias.
        if !(0.5..1.0).contains(&self.bias_threshold) {
            return Err(ConfigError::BiasThreshold(self.bias_threshold));
        }
        if let TargetMode::RiskMultiple(r) = self.target_mode {
            if !(r > 0.0) {
                return Err(ConfigError::NotPositive {
                    name: "target_mode risk multiple",
                    value: r,
                });
            }
        }

        let roles = [
            ("execution", self.execution_tf),
            ("htf bias", self.htf_bias_tf),
            ("ltf bias", self.ltf_bias_tf),
        ];
        for (role, timeframe) in roles
            .into_iter()
            .chain(self.zone_timeframes.iter().map(|&tf| ("zone", tf)))
        {
            if !self.timeframes.contains(&timeframe) {
                return Err(ConfigError::TimeframeNotLoaded { role, timeframe });
            }
        }
        if self.timeframes.iter().any(|&tf| tf < self.execution_tf) {
            return Err(ConfigError::ExecutionNotShortest {
                execution: self.execution_tf,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = Config::default();
        assert_eq!(cfg.validate(), Ok(()));
        assert_eq!(cfg.swing_length_for(Timeframe::H1), 7);
        assert_eq!(cfg.structure_lookback_for(Timeframe::D1), 10);
    }

    #[test]
    fn rejects_inverted_confirmation_range() {
        let cfg = Config {
            min_confirmations: 6,
            max_confirmations: 4,
            ..Config::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::ConfirmationRange { min: 6, max: 4 })
        );
    }

    #[test]
    fn rejects_fraction_out_of_range() {
        let cfg = Config {
            slippage_rate: 1.5,
            ..Config::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::FractionOutOfRange { name: "slippage_rate", .. })
        ));
    }

    #[test]
    fn rejects_bias_threshold_that_lets_ties_through() {
        for threshold in [0.4, 0.0, 1.0] {
            let cfg = Config {
                bias_threshold: threshold,
                ..Config::default()
            };
            assert_eq!(cfg.validate(), Err(ConfigError::BiasThreshold(threshold)));
        }
        let cfg = Config {
            bias_threshold: 0.5,
            ..Config::default()
        };
        assert_eq!(cfg.validate(), Ok(()));
    }

    #[test]
    fn rejects_unloaded_bias_timeframe() {
        let cfg = Config {
            htf_bias_tf: Timeframe::D1,
            ..Config::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::TimeframeNotLoaded { role: "htf bias", .. })
        ));
    }

    #[test]
    fn rejects_execution_that_is_not_shortest() {
        let cfg = Config {
            execution_tf: Timeframe::M5,
            ..Config::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::ExecutionNotShortest { .. })
        ));
    }

    #[test]
    fn target_mode_parsing() {
        assert_eq!(TargetMode::from_str_loose("structural"), Some(TargetMode::Structural));
        assert_eq!(TargetMode::from_str_loose("RR:2.5"), Some(TargetMode::RiskMultiple(2.5)));
        assert_eq!(TargetMode::from_str_loose("rr:-1"), None);
        assert_eq!(StopMode::from_str_loose("behind_fvg"), Some(StopMode::BehindGap));
    }
}
