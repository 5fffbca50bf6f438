use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::regime::Regime;
use crate::strategies::StrategyKind;
use crate::types::{Action, Asset};

use super::backtest::BacktestResult;

/// Annualization base. Matches the convention of the reference reports even
/// though the underlying bars are hourly.
const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// One statistic that is either a number or a structured error. Serialized
/// untagged, so a failed statistic lands in the report as
/// `{"error": "..."}` instead of aborting the whole aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Stat {
    Value(f64),
    Error { error: String },
}

impl Stat {
    fn err(message: impl Into<String>) -> Self {
        Stat::Error {
            error: message.into(),
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Stat::Value(v) => Some(*v),
            Stat::Error { .. } => None,
        }
    }
}

impl From<Result<f64, String>> for Stat {
    fn from(result: Result<f64, String>) -> Self {
        match result {
            Ok(v) => Stat::Value(v),
            Err(e) => Stat::err(e),
        }
    }
}

/// Per-regime slice of the run. Signal counts and mean confidence come from
/// the decision log; return and Sharpe are computed over the equity returns
/// of the bars labeled with the regime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeBreakdown {
    pub bars: usize,
    pub buy_signals: usize,
    pub sell_signals: usize,
    pub trades: usize,
    pub mean_confidence: f64,
    pub realized_pnl_eur: Decimal,
    pub return_pct: Stat,
    pub sharpe_ratio: Stat,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyBreakdown {
    pub decisions: usize,
    pub trades: usize,
    pub realized_pnl_eur: Decimal,
}

/// Aggregated performance of one backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub asset: Asset,
    pub bars: usize,
    pub trade_count: usize,
    pub buy_count: usize,
    pub sell_count: usize,
    pub initial_capital: Decimal,
    pub final_value: Decimal,
    pub total_fees_eur: Decimal,
    pub total_return_pct: Stat,
    pub annualized_return_pct: Stat,
    pub max_drawdown_pct: Stat,
    pub sharpe_ratio: Stat,
    pub sortino_ratio: Stat,
    pub win_rate_pct: Stat,
    pub profit_factor: Stat,
    pub regimes: BTreeMap<Regime, RegimeBreakdown>,
    pub strategies: BTreeMap<StrategyKind, StrategyBreakdown>,
}

impl PerformanceReport {
    /// Aggregate a finished run. Degenerate inputs produce per-statistic
    /// errors rather than failing the report as a whole.
    pub fn from_result(result: &BacktestResult) -> Self {
        let bars = result.equity_curve.len();
        let equity: Vec<f64> = result
            .equity_curve
            .iter()
            .map(|p| p.value.try_into().unwrap_or(0.0))
            .collect();
        let initial: f64 = result.initial_capital.try_into().unwrap_or(0.0);
        let final_value: f64 = result.final_value.try_into().unwrap_or(0.0);

        let base_error = if initial <= 0.0 {
            Some("non-positive initial capital".to_string())
        } else if bars < 2 {
            Some(format!(
                "insufficient data: need at least 2 equity points, have {}",
                bars
            ))
        } else {
            None
        };

        let (total_return_pct, annualized_return_pct, max_drawdown_pct, sharpe_ratio, sortino_ratio) =
            match &base_error {
                Some(message) => (
                    Stat::err(message.clone()),
                    Stat::err(message.clone()),
                    Stat::err(message.clone()),
                    Stat::err(message.clone()),
                    Stat::err(message.clone()),
                ),
                None => {
                    let returns = bar_returns(&equity);
                    (
                        Stat::Value((final_value / initial - 1.0) * 100.0),
                        annualized_return(result, initial, final_value).into(),
                        Stat::Value(max_drawdown_pct(&equity)),
                        sharpe(&returns).into(),
                        sortino(&returns).into(),
                    )
                }
            };

        let closed: Vec<f64> = result
            .trades
            .iter()
            .filter_map(|t| t.realized_pnl)
            .map(|p| p.try_into().unwrap_or(0.0))
            .collect();
        let (win_rate_pct, profit_factor) = trade_stats(&closed);

        let total_fees_eur: Decimal = result.trades.iter().map(|t| t.fee_eur).sum();
        let buy_count = result
            .trades
            .iter()
            .filter(|t| t.action == Action::Buy)
            .count();
        let sell_count = result.trades.len() - buy_count;

        Self {
            asset: result.asset,
            bars,
            trade_count: result.trades.len(),
            buy_count,
            sell_count,
            initial_capital: result.initial_capital,
            final_value: result.final_value,
            total_fees_eur,
            total_return_pct,
            annualized_return_pct,
            max_drawdown_pct,
            sharpe_ratio,
            sortino_ratio,
            win_rate_pct,
            profit_factor,
            regimes: regime_breakdown(result),
            strategies: strategy_breakdown(result),
        }
    }

    pub fn print_summary(&self) {
        println!("═══════════════════════════════════════════════");
        println!("  Backtest performance: {}", self.asset);
        println!("═══════════════════════════════════════════════");
        println!("  Bars processed:     {}", self.bars);
        println!(
            "  Trades:             {} ({} buys, {} sells)",
            self.trade_count, self.buy_count, self.sell_count
        );
        println!("  Initial capital:    EUR {}", self.initial_capital);
        println!("  Final value:        EUR {}", self.final_value.round_dp(2));
        println!("  Fees paid:          EUR {}", self.total_fees_eur.round_dp(2));
        println!("  Total return:       {}", fmt_stat(&self.total_return_pct, "%"));
        println!(
            "  Annualized return:  {}",
            fmt_stat(&self.annualized_return_pct, "%")
        );
        println!("  Max drawdown:       {}", fmt_stat(&self.max_drawdown_pct, "%"));
        println!("  Sharpe ratio:       {}", fmt_stat(&self.sharpe_ratio, ""));
        println!("  Sortino ratio:      {}", fmt_stat(&self.sortino_ratio, ""));
        println!("  Win rate:           {}", fmt_stat(&self.win_rate_pct, "%"));
        println!("  Profit factor:      {}", fmt_stat(&self.profit_factor, ""));
        println!("───────────────────────────────────────────────");
        for (regime, stats) in &self.regimes {
            println!(
                "  {:<10} {} bars, {} buys/{} sells, {} trades, return {}, realized EUR {}",
                regime,
                stats.bars,
                stats.buy_signals,
                stats.sell_signals,
                stats.trades,
                fmt_stat(&stats.return_pct, "%"),
                stats.realized_pnl_eur.round_dp(2)
            );
        }
        println!("═══════════════════════════════════════════════");
    }
}

fn fmt_stat(stat: &Stat, suffix: &str) -> String {
    match stat {
        Stat::Value(v) => format!("{:.2}{}", v, suffix),
        Stat::Error { error } => format!("n/a ({})", error),
    }
}

fn bar_returns(equity: &[f64]) -> Vec<f64> {
    equity
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .collect()
}

fn annualized_return(
    result: &BacktestResult,
    initial: f64,
    final_value: f64,
) -> Result<f64, String> {
    let first = result.equity_curve.first().map(|p| p.timestamp);
    let last = result.equity_curve.last().map(|p| p.timestamp);
    let (Some(first), Some(last)) = (first, last) else {
        return Err("empty equity curve".to_string());
    };
    let days = (last - first).num_seconds() as f64 / 86400.0;
    if days <= 0.0 {
        return Err("zero-length backtest window".to_string());
    }
    if final_value <= 0.0 {
        return Err("non-positive final value".to_string());
    }
    let growth = final_value / initial;
    Ok((growth.powf(365.25 / days) - 1.0) * 100.0)
}

/// Largest peak-to-trough decline against the expanding maximum, in percent.
fn max_drawdown_pct(equity: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut worst = 0.0_f64;
    for &value in equity {
        peak = peak.max(value);
        if peak > 0.0 {
            let drawdown = (peak - value) / peak * 100.0;
            worst = worst.max(drawdown);
        }
    }
    worst
}

fn sharpe(returns: &[f64]) -> Result<f64, String> {
    if returns.is_empty() {
        return Err("no return observations".to_string());
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance =
        returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    let std = variance.sqrt();
    if std == 0.0 {
        return Err("zero volatility".to_string());
    }
    Ok(mean / std * TRADING_DAYS_PER_YEAR.sqrt())
}

fn sortino(returns: &[f64]) -> Result<f64, String> {
    if returns.is_empty() {
        return Err("no return observations".to_string());
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    if downside.is_empty() {
        return Err("no downside observations".to_string());
    }
    let downside_dev =
        (downside.iter().map(|r| r.powi(2)).sum::<f64>() / returns.len() as f64).sqrt();
    if downside_dev == 0.0 {
        return Err("zero downside deviation".to_string());
    }
    Ok(mean / downside_dev * TRADING_DAYS_PER_YEAR.sqrt())
}

fn trade_stats(closed_pnl: &[f64]) -> (Stat, Stat) {
    if closed_pnl.is_empty() {
        let e = Stat::err("no closed trades");
        return (e.clone(), e);
    }
    let wins = closed_pnl.iter().filter(|p| **p > 0.0).count();
    let win_rate = Stat::Value(wins as f64 / closed_pnl.len() as f64 * 100.0);
    let gross_profit: f64 = closed_pnl.iter().filter(|p| **p > 0.0).sum();
    let gross_loss: f64 = -closed_pnl.iter().filter(|p| **p < 0.0).sum::<f64>();
    let profit_factor = if gross_loss == 0.0 {
        Stat::err("no losing trades")
    } else {
        Stat::Value(gross_profit / gross_loss)
    };
    (win_rate, profit_factor)
}

fn regime_breakdown(result: &BacktestResult) -> BTreeMap<Regime, RegimeBreakdown> {
    #[derive(Default)]
    struct Acc {
        bars: usize,
        buy_signals: usize,
        sell_signals: usize,
        trades: usize,
        confidence_sum: f64,
        realized_pnl_eur: Decimal,
        returns: Vec<f64>,
    }

    let mut accs: BTreeMap<Regime, Acc> = BTreeMap::new();
    for (i, point) in result.equity_curve.iter().enumerate() {
        let acc = accs.entry(point.regime).or_default();
        acc.bars += 1;
        if let Some(record) = result.decisions.get(i) {
            acc.confidence_sum += record.confidence;
            match record.action {
                Action::Buy => acc.buy_signals += 1,
                Action::Sell => acc.sell_signals += 1,
                Action::Hold => {}
            }
        }
        // The return from bar i-1 to i belongs to the regime labeled at i.
        if i > 0 {
            let prev: f64 = result.equity_curve[i - 1].value.try_into().unwrap_or(0.0);
            let value: f64 = point.value.try_into().unwrap_or(0.0);
            if prev > 0.0 {
                acc.returns.push(value / prev - 1.0);
            }
        }
    }
    for trade in &result.trades {
        if let Some(point) = result.equity_curve.get(trade.index) {
            if let Some(acc) = accs.get_mut(&point.regime) {
                acc.trades += 1;
                if let Some(pnl) = trade.realized_pnl {
                    acc.realized_pnl_eur += pnl;
                }
            }
        }
    }

    accs.into_iter()
        .map(|(regime, acc)| {
            let return_pct = if acc.returns.is_empty() {
                Stat::err("no return observations")
            } else {
                let growth: f64 = acc.returns.iter().map(|r| 1.0 + r).product();
                Stat::Value((growth - 1.0) * 100.0)
            };
            let breakdown = RegimeBreakdown {
                bars: acc.bars,
                buy_signals: acc.buy_signals,
                sell_signals: acc.sell_signals,
                trades: acc.trades,
                mean_confidence: if acc.bars > 0 {
                    acc.confidence_sum / acc.bars as f64
                } else {
                    0.0
                },
                realized_pnl_eur: acc.realized_pnl_eur,
                return_pct,
                sharpe_ratio: sharpe(&acc.returns).into(),
            };
            (regime, breakdown)
        })
        .collect()
}

fn strategy_breakdown(result: &BacktestResult) -> BTreeMap<StrategyKind, StrategyBreakdown> {
    let mut map: BTreeMap<StrategyKind, StrategyBreakdown> = BTreeMap::new();
    for record in &result.decisions {
        map.entry(record.strategy).or_default().decisions += 1;
    }
    for trade in &result.trades {
        if let Some(record) = result.decisions.get(trade.index) {
            let entry = map.entry(record.strategy).or_default();
            entry.trades += 1;
            if let Some(pnl) = trade.realized_pnl {
                entry.realized_pnl_eur += pnl;
            }
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::backtest::EquityPoint;
    use crate::types::{DecisionRecord, PortfolioState, TradeRecord};
    use approx::assert_relative_eq;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn result_with_equity(values: &[f64]) -> BacktestResult {
        let equity_curve = values
            .iter()
            .enumerate()
            .map(|(i, v)| EquityPoint {
                index: i,
                timestamp: Utc
                    .timestamp_opt(1_700_000_000 + i as i64 * 3600, 0)
                    .unwrap(),
                value: Decimal::try_from(*v).unwrap(),
                regime: Regime::Ranging,
            })
            .collect();
        BacktestResult {
            asset: Asset::BTC,
            initial_capital: dec!(10000),
            final_value: Decimal::try_from(*values.last().unwrap_or(&0.0)).unwrap(),
            decisions: Vec::new(),
            trades: Vec::new(),
            equity_curve,
            final_state: PortfolioState::new(),
        }
    }

    fn sell(index: usize, pnl: Decimal) -> TradeRecord {
        TradeRecord {
            index,
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            asset: Asset::BTC,
            action: Action::Sell,
            requested_eur: dec!(100),
            approved_eur: dec!(100),
            quantity: dec!(0.003),
            execution_price: dec!(30000),
            fee_eur: dec!(0.6),
            portfolio_value_after: dec!(10000),
            risk_reason: "approved at requested size".to_string(),
            realized_pnl: Some(pnl),
        }
    }

    #[test]
    fn test_total_and_drawdown() {
        let result = result_with_equity(&[10000.0, 11000.0, 9900.0, 10500.0]);
        let report = PerformanceReport::from_result(&result);
        let total = report.total_return_pct.value().unwrap();
        assert_relative_eq!(total, 5.0, epsilon = 1e-9);
        // Peak 11000 to trough 9900 = 10%.
        let dd = report.max_drawdown_pct.value().unwrap();
        assert_relative_eq!(dd, 10.0, epsilon = 1e-9);
    }

    #[test]
    fn test_insufficient_points_yields_stat_errors() {
        let result = result_with_equity(&[10000.0]);
        let report = PerformanceReport::from_result(&result);
        assert!(report.total_return_pct.value().is_none());
        assert!(report.sharpe_ratio.value().is_none());
        let json = serde_json::to_value(&report).unwrap();
        assert!(json["sharpe_ratio"]["error"]
            .as_str()
            .unwrap()
            .contains("insufficient data"));
    }

    #[test]
    fn test_zero_initial_capital_yields_stat_errors() {
        let mut result = result_with_equity(&[0.0, 0.0]);
        result.initial_capital = Decimal::ZERO;
        let report = PerformanceReport::from_result(&result);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(
            json["total_return_pct"]["error"],
            "non-positive initial capital"
        );
    }

    #[test]
    fn test_flat_curve_has_zero_volatility_error() {
        let result = result_with_equity(&[10000.0, 10000.0, 10000.0]);
        let report = PerformanceReport::from_result(&result);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["sharpe_ratio"]["error"], "zero volatility");
    }

    #[test]
    fn test_win_rate_and_profit_factor() {
        let mut result = result_with_equity(&[10000.0, 10100.0, 10200.0]);
        result.trades = vec![sell(0, dec!(50)), sell(1, dec!(-25)), sell(2, dec!(75))];
        let report = PerformanceReport::from_result(&result);
        let wr = report.win_rate_pct.value().unwrap();
        assert_relative_eq!(wr, 200.0 / 3.0, epsilon = 1e-9);
        let pf = report.profit_factor.value().unwrap();
        assert_relative_eq!(pf, 5.0, epsilon = 1e-9);
    }

    #[test]
    fn test_no_trades_yields_trade_stat_errors() {
        let result = result_with_equity(&[10000.0, 10100.0]);
        let report = PerformanceReport::from_result(&result);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["win_rate_pct"]["error"], "no closed trades");
        assert_eq!(json["profit_factor"]["error"], "no closed trades");
    }

    #[test]
    fn test_stat_serialization_shapes() {
        assert_eq!(
            serde_json::to_string(&Stat::Value(1.5)).unwrap(),
            "1.5"
        );
        assert_eq!(
            serde_json::to_string(&Stat::err("boom")).unwrap(),
            "{\"error\":\"boom\"}"
        );
        let back: Stat = serde_json::from_str("{\"error\":\"boom\"}").unwrap();
        assert_eq!(back, Stat::err("boom"));
    }

    fn decision(index: usize, action: Action, confidence: f64) -> DecisionRecord {
        DecisionRecord {
            index,
            timestamp: Utc
                .timestamp_opt(1_700_000_000 + index as i64 * 3600, 0)
                .unwrap(),
            asset: Asset::BTC,
            price: dec!(30000),
            action,
            confidence,
            regime: Regime::Ranging,
            strategy: StrategyKind::Momentum,
            risk_reason: None,
        }
    }

    #[test]
    fn test_regime_breakdown_counts_bars_and_trades() {
        let mut result = result_with_equity(&[10000.0, 10100.0, 10200.0, 10300.0]);
        result.equity_curve[2].regime = Regime::Trending;
        result.equity_curve[3].regime = Regime::Trending;
        result.trades = vec![sell(2, dec!(40))];
        let report = PerformanceReport::from_result(&result);
        assert_eq!(report.regimes[&Regime::Ranging].bars, 2);
        assert_eq!(report.regimes[&Regime::Trending].bars, 2);
        assert_eq!(report.regimes[&Regime::Trending].trades, 1);
        assert_eq!(report.regimes[&Regime::Trending].realized_pnl_eur, dec!(40));
    }

    #[test]
    fn test_regime_breakdown_signals_confidence_and_returns() {
        let mut result = result_with_equity(&[10000.0, 11000.0, 11550.0, 11434.5]);
        result.equity_curve[1].regime = Regime::Trending;
        result.equity_curve[2].regime = Regime::Trending;
        result.decisions = vec![
            decision(0, Action::Hold, 40.0),
            decision(1, Action::Buy, 80.0),
            decision(2, Action::Buy, 60.0),
            decision(3, Action::Sell, 70.0),
        ];
        let report = PerformanceReport::from_result(&result);

        let trending = &report.regimes[&Regime::Trending];
        assert_eq!(trending.buy_signals, 2);
        assert_eq!(trending.sell_signals, 0);
        assert_relative_eq!(trending.mean_confidence, 70.0, epsilon = 1e-9);
        // Bars 1 and 2 are trending: +10% then +5% compounds to 15.5%.
        assert_relative_eq!(
            trending.return_pct.value().unwrap(),
            15.5,
            epsilon = 1e-9
        );
        assert!(trending.sharpe_ratio.value().is_some());

        let ranging = &report.regimes[&Regime::Ranging];
        assert_eq!(ranging.buy_signals, 0);
        assert_eq!(ranging.sell_signals, 1);
        assert_relative_eq!(ranging.mean_confidence, 55.0, epsilon = 1e-9);
        // Bar 0 has no prior, so only bar 3's -1% lands on a ranging bar.
        assert_relative_eq!(
            ranging.return_pct.value().unwrap(),
            -1.0,
            epsilon = 1e-6
        );
        // A single observation has zero dispersion.
        assert!(ranging.sharpe_ratio.value().is_none());
    }
}
