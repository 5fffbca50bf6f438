use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Indicator column names used by convention in historical data files.
pub mod columns {
    pub const RSI_14: &str = "rsi_14";
    pub const MACD: &str = "macd";
    pub const MACD_SIGNAL: &str = "macd_signal";
    pub const BB_UPPER: &str = "bb_upper_20";
    pub const BB_MIDDLE: &str = "bb_middle_20";
    pub const BB_LOWER: &str = "bb_lower_20";
    pub const SMA_20: &str = "sma_20";
    pub const SMA_50: &str = "sma_50";
    pub const EMA_12: &str = "ema_12";
    pub const EMA_26: &str = "ema_26";
    pub const ATR: &str = "atr";
    pub const STOCH_K: &str = "stoch_k";
    pub const STOCH_D: &str = "stoch_d";
    pub const VOLUME_SMA_20: &str = "volume_sma_20";

    pub const ALL: &[&str] = &[
        RSI_14,
        MACD,
        MACD_SIGNAL,
        BB_UPPER,
        BB_MIDDLE,
        BB_LOWER,
        SMA_20,
        SMA_50,
        EMA_12,
        EMA_26,
        ATR,
        STOCH_K,
        STOCH_D,
        VOLUME_SMA_20,
    ];
}

/// Neutral fallback for a missing or NaN indicator column.
/// Oscillators default to their midpoint, everything else to zero.
pub fn neutral_indicator_value(name: &str) -> f64 {
    match name {
        columns::RSI_14 | columns::STOCH_K | columns::STOCH_D => 50.0,
        _ => 0.0,
    }
}

/// One OHLCV observation plus its precomputed indicator columns.
/// Immutable once loaded; owned by the historical series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    #[serde(default)]
    pub indicators: BTreeMap<String, f64>,
}

impl Bar {
    /// Indicator value with the conventional neutral default applied for
    /// absent or non-finite columns. Never fails.
    pub fn indicator(&self, name: &str) -> f64 {
        self.indicator_or(name, neutral_indicator_value(name))
    }

    /// Indicator value with an explicit fallback for absent or non-finite columns.
    pub fn indicator_or(&self, name: &str, fallback: f64) -> f64 {
        match self.indicators.get(name) {
            Some(v) if v.is_finite() => *v,
            _ => fallback,
        }
    }

    /// Raw indicator value if present and finite.
    pub fn indicator_raw(&self, name: &str) -> Option<f64> {
        self.indicators.get(name).copied().filter(|v| v.is_finite())
    }

    pub fn close_f64(&self) -> f64 {
        self.close.try_into().unwrap_or(0.0)
    }
}

/// Time-ordered bar series for one asset.
#[derive(Debug, Clone, Default)]
pub struct BarSeries {
    pub bars: Vec<Bar>,
}

impl BarSeries {
    pub fn new(bars: Vec<Bar>) -> Self {
        Self { bars }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Bar> {
        self.bars.get(index)
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    /// Timestamps must be monotonic non-decreasing for replay to be meaningful.
    pub fn is_monotonic(&self) -> bool {
        self.bars.windows(2).all(|w| w[0].timestamp <= w[1].timestamp)
    }

    /// Percentage change of close over `offset` bars ending at `index`.
    /// Lookbacks that exceed available history default to 0.0.
    pub fn change_pct(&self, index: usize, offset: usize) -> f64 {
        if index >= self.bars.len() || index < offset {
            return 0.0;
        }
        let current: f64 = self.bars[index].close.try_into().unwrap_or(0.0);
        let earlier: f64 = self.bars[index - offset].close.try_into().unwrap_or(0.0);
        if earlier == 0.0 || !current.is_finite() || !earlier.is_finite() {
            return 0.0;
        }
        (current - earlier) / earlier * 100.0
    }
}
