use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::MarketSnapshot;

/// Coarse market-state label. Classification is memoryless: the regime of a
/// bar depends only on that bar's lookback window, never on the previous label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Regime {
    Trending,
    Ranging,
    Volatile,
}

impl Regime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Regime::Trending => "trending",
            Regime::Ranging => "ranging",
            Regime::Volatile => "volatile",
        }
    }

    pub fn all() -> [Regime; 3] {
        [Regime::Trending, Regime::Ranging, Regime::Volatile]
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classification thresholds, all in percent. Fixed configuration constants,
/// not learned; the defaults must be reproduced exactly for parity with the
/// reference system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeThresholds {
    pub trend_24h_pct: f64,
    pub trend_5d_pct: f64,
    pub volatile_width_pct: f64,
    pub range_24h_pct: f64,
    pub range_width_pct: f64,
    pub extreme_width_pct: f64,
    /// Substitute for a missing or NaN band width.
    pub default_width_pct: f64,
}

impl Default for RegimeThresholds {
    fn default() -> Self {
        Self {
            trend_24h_pct: 4.0,
            trend_5d_pct: 8.0,
            volatile_width_pct: 4.0,
            range_24h_pct: 1.5,
            range_width_pct: 2.0,
            extreme_width_pct: 5.0,
            default_width_pct: 2.0,
        }
    }
}

/// Pure threshold classifier over (24h change, 5d change, band width).
#[derive(Debug, Clone, Default)]
pub struct RegimeClassifier {
    thresholds: RegimeThresholds,
}

impl RegimeClassifier {
    pub fn new(thresholds: RegimeThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &RegimeThresholds {
        &self.thresholds
    }

    /// Classify one bar. Evaluated in fixed order, first match wins; every
    /// input triple maps to exactly one regime and NaN inputs never raise.
    pub fn classify(
        &self,
        price_change_24h_pct: f64,
        price_change_5d_pct: f64,
        bb_width_pct: f64,
    ) -> Regime {
        let t = &self.thresholds;
        let change_24h = sanitize(price_change_24h_pct, 0.0);
        let change_5d = sanitize(price_change_5d_pct, 0.0);
        let width = sanitize(bb_width_pct, t.default_width_pct);

        // 1. Large move: volatile when dispersion is also high, else trending.
        if change_24h.abs() > t.trend_24h_pct || change_5d.abs() > t.trend_5d_pct {
            if width > t.volatile_width_pct {
                return Regime::Volatile;
            }
            return Regime::Trending;
        }

        // 2. Quiet and tight: ranging.
        if change_24h.abs() < t.range_24h_pct && width < t.range_width_pct {
            return Regime::Ranging;
        }

        // 3. Width alone can trigger volatile regardless of movement.
        if width > t.extreme_width_pct {
            return Regime::Volatile;
        }

        // 4. Ambiguous cases default to ranging.
        Regime::Ranging
    }

    pub fn classify_snapshot(&self, snapshot: &MarketSnapshot) -> Regime {
        self.classify(
            snapshot.price_change_24h_pct,
            snapshot.price_change_5d_pct,
            snapshot.bb_width_pct,
        )
    }
}

fn sanitize(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> RegimeClassifier {
        RegimeClassifier::default()
    }

    #[test]
    fn test_large_move_low_width_is_trending() {
        assert_eq!(classifier().classify(5.0, 0.0, 2.0), Regime::Trending);
        assert_eq!(classifier().classify(-5.0, 0.0, 2.0), Regime::Trending);
        assert_eq!(classifier().classify(0.0, 9.0, 3.9), Regime::Trending);
    }

    #[test]
    fn test_large_move_high_width_is_volatile() {
        assert_eq!(classifier().classify(5.0, 0.0, 4.5), Regime::Volatile);
        assert_eq!(classifier().classify(0.0, -10.0, 6.0), Regime::Volatile);
    }

    #[test]
    fn test_quiet_and_tight_is_ranging() {
        assert_eq!(classifier().classify(1.0, 3.0, 1.5), Regime::Ranging);
        assert_eq!(classifier().classify(-1.4, 0.0, 1.9), Regime::Ranging);
    }

    #[test]
    fn test_extreme_width_alone_is_volatile() {
        // 24h change between range and trend thresholds, width past extreme.
        assert_eq!(classifier().classify(2.0, 0.0, 5.5), Regime::Volatile);
    }

    #[test]
    fn test_ambiguous_defaults_to_ranging() {
        // Moderate movement, moderate width: no rule fires.
        assert_eq!(classifier().classify(2.0, 4.0, 3.0), Regime::Ranging);
        assert_eq!(classifier().classify(1.0, 0.0, 2.5), Regime::Ranging);
    }

    #[test]
    fn test_nan_inputs_never_raise() {
        // NaN changes become 0.0, NaN width becomes the 2.0 default: ranging.
        assert_eq!(
            classifier().classify(f64::NAN, f64::NAN, f64::NAN),
            Regime::Ranging
        );
        // NaN width with a large move keeps the trending branch.
        assert_eq!(classifier().classify(5.0, 0.0, f64::NAN), Regime::Trending);
        assert_eq!(
            classifier().classify(f64::INFINITY, 0.0, 1.0),
            Regime::Ranging
        );
    }

    #[test]
    fn test_classification_is_deterministic() {
        let c = classifier();
        let grid: Vec<f64> = (-12..=12).map(|v| v as f64).collect();
        for &a in &grid {
            for &b in &grid {
                for &w in &[0.0, 1.0, 2.5, 4.5, 6.0, f64::NAN] {
                    let first = c.classify(a, b, w);
                    let second = c.classify(a, b, w);
                    assert_eq!(first, second);
                    assert!(Regime::all().contains(&first));
                }
            }
        }
    }
}
