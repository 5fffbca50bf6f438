use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{columns, Bar, BarSeries};

/// Assets tradable against EUR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Asset {
    BTC,
    ETH,
    SOL,
    ADA,
    XRP,
}

impl Asset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Asset::BTC => "BTC",
            Asset::ETH => "ETH",
            Asset::SOL => "SOL",
            Asset::ADA => "ADA",
            Asset::XRP => "XRP",
        }
    }

    pub fn pair(&self) -> String {
        format!("{}EUR", self.as_str())
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "BTC" | "BTCEUR" => Some(Asset::BTC),
            "ETH" | "ETHEUR" => Some(Asset::ETH),
            "SOL" | "SOLEUR" => Some(Asset::SOL),
            "ADA" | "ADAEUR" => Some(Asset::ADA),
            "XRP" | "XRPEUR" => Some(Asset::XRP),
            _ => None,
        }
    }

    pub fn all() -> Vec<Asset> {
        vec![Asset::BTC, Asset::ETH, Asset::SOL, Asset::ADA, Asset::XRP]
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lookback offsets in bars, assuming hourly granularity.
pub const LOOKBACK_1H: usize = 1;
pub const LOOKBACK_24H: usize = 24;
pub const LOOKBACK_5D: usize = 120;

/// Per-bar market view built by the engine for decision purposes.
/// Recomputed every bar from the series; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub asset: Asset,
    pub timestamp: DateTime<Utc>,
    pub current_price: Decimal,
    pub price_change_1h_pct: f64,
    pub price_change_24h_pct: f64,
    pub price_change_5d_pct: f64,
    /// Bollinger band width as a percentage of the middle band.
    /// NaN when the bands are absent; the classifier substitutes its default.
    pub bb_width_pct: f64,
}

impl MarketSnapshot {
    /// Build the snapshot for `index` using only bars at or before it.
    pub fn from_series(series: &BarSeries, index: usize, asset: Asset) -> Option<Self> {
        let bar = series.get(index)?;
        Some(Self {
            asset,
            timestamp: bar.timestamp,
            current_price: bar.close,
            price_change_1h_pct: series.change_pct(index, LOOKBACK_1H),
            price_change_24h_pct: series.change_pct(index, LOOKBACK_24H),
            price_change_5d_pct: series.change_pct(index, LOOKBACK_5D),
            bb_width_pct: bollinger_width_pct(bar),
        })
    }
}

/// Band width as a percentage of the middle band, or NaN when bands are
/// missing or degenerate.
pub fn bollinger_width_pct(bar: &Bar) -> f64 {
    let upper = bar.indicator_raw(columns::BB_UPPER);
    let middle = bar.indicator_raw(columns::BB_MIDDLE);
    let lower = bar.indicator_raw(columns::BB_LOWER);
    match (upper, middle, lower) {
        (Some(u), Some(m), Some(l)) if m != 0.0 => (u - l) / m * 100.0,
        _ => f64::NAN,
    }
}
