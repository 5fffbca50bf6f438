//! Rule engines behind the simulated decision maker.
//!
//! Each strategy reads the market snapshot plus the bar's precomputed
//! indicator columns and votes with an action and a confidence in 0..=100.
//! All four are pure functions of their inputs.

use crate::types::{columns, Action, Bar, MarketSnapshot};

use super::StrategyVote;

const MAX_CONFIDENCE: f64 = 95.0;

/// Moving-average alignment with MACD confirmation.
pub fn trend_following(snapshot: &MarketSnapshot, bar: &Bar) -> StrategyVote {
    let close = bar.close_f64();
    let sma_20 = bar.indicator_or(columns::SMA_20, close);
    let sma_50 = bar.indicator_or(columns::SMA_50, close);
    let macd = bar.indicator(columns::MACD);
    let macd_signal = bar.indicator(columns::MACD_SIGNAL);

    if sma_50 == 0.0 {
        return StrategyVote::hold(30.0, "trend: no moving-average data");
    }

    let spread_pct = (sma_20 - sma_50) / sma_50 * 100.0;
    if spread_pct.abs() < 0.3 {
        return StrategyVote::hold(30.0, "trend: MA spread too narrow to act");
    }

    let bullish = spread_pct > 0.0;
    let macd_confirms = if bullish {
        macd > macd_signal
    } else {
        macd < macd_signal
    };
    let move_aligned = if bullish {
        snapshot.price_change_24h_pct > 0.0
    } else {
        snapshot.price_change_24h_pct < 0.0
    };

    let mut confidence: f64 = 50.0;
    if spread_pct.abs() > 1.0 {
        confidence += 15.0;
    }
    if macd_confirms {
        confidence += 20.0;
    }
    if move_aligned {
        confidence += 10.0;
    }

    StrategyVote {
        action: if bullish { Action::Buy } else { Action::Sell },
        confidence: confidence.min(MAX_CONFIDENCE),
        rationale: format!(
            "trend: MA spread {:.2}%, MACD {}, 24h move {}",
            spread_pct,
            if macd_confirms { "confirms" } else { "diverges" },
            if move_aligned { "aligned" } else { "opposed" },
        ),
    }
}

/// RSI strength with stochastic and short-horizon move confirmation.
pub fn momentum(snapshot: &MarketSnapshot, bar: &Bar) -> StrategyVote {
    let rsi = bar.indicator(columns::RSI_14);
    let stoch_k = bar.indicator(columns::STOCH_K);
    let stoch_d = bar.indicator(columns::STOCH_D);
    let change_1h = snapshot.price_change_1h_pct;

    if rsi >= 60.0 && change_1h > 0.1 {
        let mut confidence = 50.0 + ((rsi - 60.0) * 1.2).min(25.0);
        if stoch_k > stoch_d {
            confidence += 10.0;
        }
        return StrategyVote {
            action: Action::Buy,
            confidence: confidence.min(MAX_CONFIDENCE),
            rationale: format!(
                "momentum: RSI {:.1} rising, 1h change {:+.2}%",
                rsi, change_1h
            ),
        };
    }

    if rsi <= 40.0 && change_1h < -0.1 {
        let mut confidence = 50.0 + ((40.0 - rsi) * 1.2).min(25.0);
        if stoch_k < stoch_d {
            confidence += 10.0;
        }
        return StrategyVote {
            action: Action::Sell,
            confidence: confidence.min(MAX_CONFIDENCE),
            rationale: format!(
                "momentum: RSI {:.1} falling, 1h change {:+.2}%",
                rsi, change_1h
            ),
        };
    }

    StrategyVote::hold(35.0, format!("momentum: RSI {:.1} neutral", rsi))
}

/// Bollinger-band extremes with RSI confirmation.
pub fn mean_reversion(snapshot: &MarketSnapshot, bar: &Bar) -> StrategyVote {
    let rsi = bar.indicator(columns::RSI_14);
    let close = bar.close_f64();
    let upper = bar.indicator_raw(columns::BB_UPPER);
    let lower = bar.indicator_raw(columns::BB_LOWER);

    // Position inside the bands in 0..=1 when bands are present.
    let band_position = match (upper, lower) {
        (Some(u), Some(l)) if u > l => Some((close - l) / (u - l)),
        _ => None,
    };

    let oversold = band_position.map(|p| p <= 0.05).unwrap_or(false) || rsi <= 30.0;
    let overbought = band_position.map(|p| p >= 0.95).unwrap_or(false) || rsi >= 70.0;

    if oversold {
        let mut confidence: f64 = 55.0;
        if band_position.map(|p| p <= 0.05).unwrap_or(false) && rsi <= 35.0 {
            confidence += 20.0;
        }
        if rsi <= 25.0 {
            confidence += 10.0;
        }
        return StrategyVote {
            action: Action::Buy,
            confidence: confidence.min(MAX_CONFIDENCE),
            rationale: format!(
                "mean_reversion: oversold (RSI {:.1}, band pos {})",
                rsi,
                band_position
                    .map(|p| format!("{:.2}", p))
                    .unwrap_or_else(|| "n/a".to_string()),
            ),
        };
    }

    if overbought {
        let mut confidence: f64 = 55.0;
        if band_position.map(|p| p >= 0.95).unwrap_or(false) && rsi >= 65.0 {
            confidence += 20.0;
        }
        if rsi >= 75.0 {
            confidence += 10.0;
        }
        return StrategyVote {
            action: Action::Sell,
            confidence: confidence.min(MAX_CONFIDENCE),
            rationale: format!("mean_reversion: overbought (RSI {:.1})", rsi),
        };
    }

    let _ = snapshot;
    StrategyVote::hold(30.0, "mean_reversion: price inside bands")
}

/// Volatility-aware composite. Follows multi-timeframe momentum in calm
/// markets and fades it when the bands blow out.
pub fn llm_composite(snapshot: &MarketSnapshot, bar: &Bar) -> StrategyVote {
    let rsi = bar.indicator(columns::RSI_14);
    let width = if snapshot.bb_width_pct.is_finite() {
        snapshot.bb_width_pct
    } else {
        2.0
    };

    let mut score = snapshot.price_change_1h_pct * 1.5
        + snapshot.price_change_24h_pct * 0.5
        + snapshot.price_change_5d_pct * 0.1
        + (50.0 - rsi) * -0.02;

    let fading = width > 4.0;
    if fading {
        score = -score * 0.8;
    }

    if score.abs() < 0.4 {
        return StrategyVote::hold(
            40.0,
            format!("llm: composite score {:+.2} inconclusive", score),
        );
    }

    let confidence = (50.0 + (score.abs() * 12.0).min(40.0)).min(92.0);
    StrategyVote {
        action: if score > 0.0 { Action::Buy } else { Action::Sell },
        confidence,
        rationale: format!(
            "llm: composite score {:+.2} ({} band width {:.1}%)",
            score,
            if fading { "fading" } else { "following" },
            width,
        ),
    }
}
